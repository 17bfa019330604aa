use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::borrower_cycle::{BorrowerCycleTerms, ResolvedTerms};
use crate::calendar::WorkingDayPolicy;
use crate::decimal::{Money, Rate};
use crate::errors::{Result, ScheduleError};
use crate::interest::DayCountConvention;
use crate::types::{
    AmortizationMethod, InterestCalculationPeriod, InterestMethod, LoanId, PeriodFrequency,
};

fn default_currency_digits() -> u32 {
    2
}

fn default_every() -> u32 {
    1
}

/// floating rate layered on a published index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FloatingRateTerms {
    /// spread added to the index rate
    pub differential: Rate,
    /// use the loan's own rate when the index has no value
    #[serde(default)]
    pub fallback_to_base_rate: bool,
}

/// snapshot of one loan's schedule-affecting terms
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoanTerms {
    pub loan_id: LoanId,
    pub principal: Money,
    pub annual_interest_rate: Rate,
    pub number_of_repayments: u32,
    #[serde(default = "default_every")]
    pub repayment_every: u32,
    pub repayment_frequency: PeriodFrequency,
    pub expected_disbursement_date: NaiveDate,
    #[serde(default)]
    pub first_repayment_date: Option<NaiveDate>,
    pub interest_method: InterestMethod,
    pub amortization: AmortizationMethod,
    pub interest_calculation_period: InterestCalculationPeriod,
    #[serde(default)]
    pub allow_partial_period_interest: bool,
    pub day_count: DayCountConvention,
    #[serde(default = "default_currency_digits")]
    pub currency_digits: u32,
    /// leading installments that collect no principal
    #[serde(default)]
    pub grace_on_principal: u32,
    /// leading installments whose interest is deferred
    #[serde(default)]
    pub grace_on_interest_payment: u32,
    #[serde(default)]
    pub multi_disbursement: bool,
    #[serde(default)]
    pub floating_rate: Option<FloatingRateTerms>,
    #[serde(default)]
    pub borrower_cycle: Option<BorrowerCycleTerms>,
    #[serde(default)]
    pub working_days: WorkingDayPolicy,
}

impl LoanTerms {
    /// monthly declining-balance loan with equal installments
    pub fn monthly(
        loan_id: LoanId,
        principal: Money,
        annual_interest_rate: Rate,
        number_of_repayments: u32,
        expected_disbursement_date: NaiveDate,
    ) -> Self {
        Self {
            loan_id,
            principal,
            annual_interest_rate,
            number_of_repayments,
            repayment_every: 1,
            repayment_frequency: PeriodFrequency::Months,
            expected_disbursement_date,
            first_repayment_date: None,
            interest_method: InterestMethod::DecliningBalance,
            amortization: AmortizationMethod::EqualInstallments,
            interest_calculation_period: InterestCalculationPeriod::SameAsRepaymentPeriod,
            allow_partial_period_interest: false,
            day_count: DayCountConvention::Actual365,
            currency_digits: 2,
            grace_on_principal: 0,
            grace_on_interest_payment: 0,
            multi_disbursement: false,
            floating_rate: None,
            borrower_cycle: None,
            working_days: WorkingDayPolicy::unadjusted(),
        }
    }

    /// weekly flat-interest group loan, typical of microfinance products
    pub fn weekly_flat(
        loan_id: LoanId,
        principal: Money,
        annual_interest_rate: Rate,
        number_of_repayments: u32,
        expected_disbursement_date: NaiveDate,
    ) -> Self {
        Self {
            repayment_frequency: PeriodFrequency::Weeks,
            interest_method: InterestMethod::Flat,
            amortization: AmortizationMethod::EqualPrincipal,
            ..Self::monthly(
                loan_id,
                principal,
                annual_interest_rate,
                number_of_repayments,
                expected_disbursement_date,
            )
        }
    }

    pub fn with_frequency(mut self, every: u32, frequency: PeriodFrequency) -> Self {
        self.repayment_every = every;
        self.repayment_frequency = frequency;
        self
    }

    pub fn with_first_repayment_date(mut self, date: NaiveDate) -> Self {
        self.first_repayment_date = Some(date);
        self
    }

    pub fn with_methods(mut self, interest: InterestMethod, amortization: AmortizationMethod) -> Self {
        self.interest_method = interest;
        self.amortization = amortization;
        self
    }

    pub fn with_interest_calculation(
        mut self,
        period: InterestCalculationPeriod,
        allow_partial_period_interest: bool,
        day_count: DayCountConvention,
    ) -> Self {
        self.interest_calculation_period = period;
        self.allow_partial_period_interest = allow_partial_period_interest;
        self.day_count = day_count;
        self
    }

    pub fn with_grace(mut self, on_principal: u32, on_interest_payment: u32) -> Self {
        self.grace_on_principal = on_principal;
        self.grace_on_interest_payment = on_interest_payment;
        self
    }

    pub fn with_multi_disbursement(mut self) -> Self {
        self.multi_disbursement = true;
        self
    }

    pub fn with_floating_rate(mut self, floating: FloatingRateTerms) -> Self {
        self.floating_rate = Some(floating);
        self
    }

    pub fn with_borrower_cycle(mut self, cycle: BorrowerCycleTerms) -> Self {
        self.borrower_cycle = Some(cycle);
        self
    }

    pub fn with_working_days(mut self, policy: WorkingDayPolicy) -> Self {
        self.working_days = policy;
        self
    }

    /// load terms from a json document
    pub fn from_json(json: &str) -> Result<Self> {
        let terms: LoanTerms = serde_json::from_str(json).map_err(|e| ScheduleError::MalformedTerms {
            message: e.to_string(),
        })?;
        terms.validate()?;
        Ok(terms)
    }

    pub fn to_json_pretty(&self) -> std::result::Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn validate(&self) -> Result<()> {
        let loan_id = self.loan_id;
        let invalid = |message: String| Err(ScheduleError::InvalidConfiguration { loan_id, message });

        if self.repayment_every == 0 {
            return invalid("repayment_every must be at least 1".to_string());
        }
        if self.currency_digits > crate::decimal::WORKING_DP {
            return invalid(format!("currency_digits {} exceeds working precision", self.currency_digits));
        }
        if self.borrower_cycle.is_none() {
            if self.number_of_repayments == 0 {
                return invalid("number_of_repayments must be at least 1".to_string());
            }
            if !self.principal.is_positive() {
                return invalid(format!("principal {} must be positive", self.principal));
            }
            if self.annual_interest_rate.is_negative() {
                return invalid(format!("interest rate {} is negative", self.annual_interest_rate));
            }
        }
        if let Some(first) = self.first_repayment_date {
            if first <= self.expected_disbursement_date {
                return Err(ScheduleError::InvalidDate {
                    loan_id,
                    message: format!(
                        "first repayment {first} is not after disbursement {}",
                        self.expected_disbursement_date
                    ),
                });
            }
        }
        Ok(())
    }

    /// principal, rate and term after borrower-cycle overrides
    pub fn resolve(&self) -> Result<ResolvedTerms> {
        match &self.borrower_cycle {
            Some(cycle) => cycle.resolve(self.loan_id),
            None => Ok(ResolvedTerms {
                principal: self.principal,
                annual_rate: self.annual_interest_rate,
                number_of_repayments: self.number_of_repayments,
            }),
        }
    }
}

/// bounds on a single generation pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    pub max_installments: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self { max_installments: 1_200 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::borrower_cycle::{BorrowerCycleVariation, CycleTable};
    use rust_decimal_macros::dec;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_terms_from_json_apply_defaults() {
        let json = r#"{
            "loan_id": "00000000-0000-0000-0000-000000000000",
            "principal": "12000",
            "annual_interest_rate": "0.12",
            "number_of_repayments": 12,
            "repayment_frequency": "Months",
            "expected_disbursement_date": "2024-01-01",
            "interest_method": "DecliningBalance",
            "amortization": "EqualPrincipal",
            "interest_calculation_period": "SameAsRepaymentPeriod",
            "day_count": "Actual365"
        }"#;

        let terms = LoanTerms::from_json(json).unwrap();
        assert_eq!(terms.principal, Money::from_major(12_000));
        assert_eq!(terms.annual_interest_rate, Rate::from_percentage(12));
        assert_eq!(terms.repayment_every, 1);
        assert_eq!(terms.currency_digits, 2);
        assert_eq!(terms.working_days, WorkingDayPolicy::default());
        assert!(terms.floating_rate.is_none());
    }

    #[test]
    fn test_malformed_json_is_rejected() {
        let err = LoanTerms::from_json("{\"principal\": 1}").unwrap_err();
        assert!(matches!(err, ScheduleError::MalformedTerms { .. }));
    }

    #[test]
    fn test_first_repayment_must_follow_disbursement() {
        let terms = LoanTerms::monthly(
            LoanId::nil(),
            Money::from_major(1_000),
            Rate::from_percentage(10),
            6,
            date(2024, 1, 1),
        )
        .with_first_repayment_date(date(2024, 1, 1));
        assert!(matches!(
            terms.validate(),
            Err(ScheduleError::InvalidDate { loan_id, .. }) if loan_id == LoanId::nil()
        ));
    }

    #[test]
    fn test_resolve_without_cycle_uses_own_terms() {
        let terms = LoanTerms::monthly(
            LoanId::nil(),
            Money::from_major(1_000),
            Rate::from_percentage(10),
            6,
            date(2024, 1, 1),
        );
        let resolved = terms.resolve().unwrap();
        assert_eq!(resolved.principal, Money::from_major(1_000));
        assert_eq!(resolved.number_of_repayments, 6);
    }

    #[test]
    fn test_resolve_with_cycle_overrides_terms() {
        let terms = LoanTerms::monthly(
            LoanId::nil(),
            Money::from_major(1_000),
            Rate::from_percentage(10),
            6,
            date(2024, 1, 1),
        )
        .with_borrower_cycle(BorrowerCycleTerms {
            cycle_number: 2,
            principal: CycleTable::new(vec![BorrowerCycleVariation::equal(2, dec!(2500))], None),
            interest_rate: CycleTable::new(Vec::new(), Some(dec!(15))),
            number_of_repayments: CycleTable::new(Vec::new(), Some(dec!(10))),
        });
        let resolved = terms.resolve().unwrap();
        assert_eq!(resolved.principal, Money::from_major(2_500));
        assert_eq!(resolved.annual_rate, Rate::from_percentage(15));
        assert_eq!(resolved.number_of_repayments, 10);
    }
}

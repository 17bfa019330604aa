use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::decimal::{Money, Rate};
use crate::errors::{Result, ScheduleError};
use crate::types::LoanId;

/// how a variation's cycle number is compared with the client's
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValueCondition {
    Equal,
    GreaterThan,
}

/// commercial term that borrower cycles can override
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CycleParameter {
    Principal,
    InterestRate,
    NumberOfRepayments,
}

/// product rule giving a term value for a range of borrower cycles
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BorrowerCycleVariation {
    pub cycle_number: u32,
    pub condition: ValueCondition,
    pub default_value: Decimal,
    pub min_value: Option<Decimal>,
    pub max_value: Option<Decimal>,
}

impl BorrowerCycleVariation {
    pub fn equal(cycle_number: u32, default_value: Decimal) -> Self {
        Self {
            cycle_number,
            condition: ValueCondition::Equal,
            default_value,
            min_value: None,
            max_value: None,
        }
    }

    pub fn greater_than(cycle_number: u32, default_value: Decimal) -> Self {
        Self {
            condition: ValueCondition::GreaterThan,
            ..Self::equal(cycle_number, default_value)
        }
    }

    pub fn with_bounds(mut self, min_value: Option<Decimal>, max_value: Option<Decimal>) -> Self {
        self.min_value = min_value;
        self.max_value = max_value;
        self
    }

    /// value lies within the optional min/max bounds
    pub fn permits(&self, value: Decimal) -> bool {
        self.min_value.map_or(true, |min| value >= min) && self.max_value.map_or(true, |max| value <= max)
    }
}

/// winning variation for a cycle: exact match, else nearest greater-than below it
pub fn resolve_variation(
    variations: &[BorrowerCycleVariation],
    cycle_number: u32,
) -> Option<&BorrowerCycleVariation> {
    let mut best_cycle = 0;
    let mut best = None;
    for variation in variations {
        match variation.condition {
            ValueCondition::Equal if variation.cycle_number == cycle_number => return Some(variation),
            ValueCondition::GreaterThan
                if variation.cycle_number < cycle_number && variation.cycle_number > best_cycle =>
            {
                best_cycle = variation.cycle_number;
                best = Some(variation);
            }
            _ => {}
        }
    }
    best
}

pub fn resolve(variations: &[BorrowerCycleVariation], cycle_number: u32) -> Option<Decimal> {
    resolve_variation(variations, cycle_number).map(|v| v.default_value)
}

/// per-parameter variation table with the product's unconditional default
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleTable {
    pub variations: Vec<BorrowerCycleVariation>,
    pub product_default: Option<Decimal>,
}

impl CycleTable {
    pub fn new(variations: Vec<BorrowerCycleVariation>, product_default: Option<Decimal>) -> Self {
        Self { variations, product_default }
    }

    /// three-tier lookup, validated for the parameter
    pub fn resolve_or_default(
        &self,
        loan_id: LoanId,
        parameter: CycleParameter,
        cycle_number: u32,
    ) -> Result<Decimal> {
        let unresolvable = |message: String| ScheduleError::UnresolvableCycleVariation {
            loan_id,
            parameter,
            cycle_number,
            message,
        };

        let value = match resolve_variation(&self.variations, cycle_number) {
            Some(variation) => {
                if !variation.permits(variation.default_value) {
                    return Err(unresolvable(format!(
                        "value {} outside the variation bounds",
                        variation.default_value
                    )));
                }
                variation.default_value
            }
            None => self
                .product_default
                .ok_or_else(|| unresolvable("no matching variation and no product default".to_string()))?,
        };

        let valid = match parameter {
            CycleParameter::Principal => value > Decimal::ZERO,
            CycleParameter::InterestRate => value >= Decimal::ZERO,
            CycleParameter::NumberOfRepayments => value > Decimal::ZERO && value.fract().is_zero(),
        };
        if !valid {
            return Err(unresolvable(format!("resolved value {value} is not valid")));
        }
        debug!(%loan_id, ?parameter, cycle_number, %value, "borrower cycle term resolved");
        Ok(value)
    }
}

/// borrower-cycle dependent terms for one loan
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BorrowerCycleTerms {
    pub cycle_number: u32,
    pub principal: CycleTable,
    /// values in annual percent
    pub interest_rate: CycleTable,
    pub number_of_repayments: CycleTable,
}

/// commercial terms after borrower-cycle resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedTerms {
    pub principal: Money,
    pub annual_rate: Rate,
    pub number_of_repayments: u32,
}

impl BorrowerCycleTerms {
    pub fn resolve(&self, loan_id: LoanId) -> Result<ResolvedTerms> {
        let principal = self
            .principal
            .resolve_or_default(loan_id, CycleParameter::Principal, self.cycle_number)?;
        let rate = self
            .interest_rate
            .resolve_or_default(loan_id, CycleParameter::InterestRate, self.cycle_number)?;
        let count = self.number_of_repayments.resolve_or_default(
            loan_id,
            CycleParameter::NumberOfRepayments,
            self.cycle_number,
        )?;
        let number_of_repayments =
            count.to_u32().ok_or_else(|| ScheduleError::UnresolvableCycleVariation {
                loan_id,
                parameter: CycleParameter::NumberOfRepayments,
                cycle_number: self.cycle_number,
                message: format!("installment count {count} out of range"),
            })?;

        Ok(ResolvedTerms {
            principal: Money::from_decimal(principal),
            annual_rate: Rate::from_annual_percent(rate),
            number_of_repayments,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn table() -> Vec<BorrowerCycleVariation> {
        vec![
            BorrowerCycleVariation::equal(1, dec!(100)),
            BorrowerCycleVariation::greater_than(2, dec!(80)),
        ]
    }

    #[test]
    fn test_nearest_greater_than_below_cycle() {
        assert_eq!(resolve(&table(), 3), Some(dec!(80)));
    }

    #[test]
    fn test_equal_match_wins() {
        assert_eq!(resolve(&table(), 1), Some(dec!(100)));
    }

    #[test]
    fn test_cycle_two_has_no_match() {
        // greater-than 2 does not cover cycle 2 itself
        assert_eq!(resolve(&table(), 2), None);
    }

    #[test]
    fn test_closest_greater_than_wins_over_farther() {
        let variations = vec![
            BorrowerCycleVariation::greater_than(5, dec!(60)),
            BorrowerCycleVariation::greater_than(1, dec!(90)),
            BorrowerCycleVariation::greater_than(3, dec!(70)),
        ];
        assert_eq!(resolve(&variations, 10), Some(dec!(60)));
        assert_eq!(resolve(&variations, 4), Some(dec!(70)));
    }

    #[test]
    fn test_equal_short_circuits_later_greater_than() {
        let variations = vec![
            BorrowerCycleVariation::greater_than(2, dec!(70)),
            BorrowerCycleVariation::equal(4, dec!(50)),
            BorrowerCycleVariation::greater_than(3, dec!(65)),
        ];
        assert_eq!(resolve(&variations, 4), Some(dec!(50)));
    }

    #[test]
    fn test_falls_back_to_product_default() {
        let table = CycleTable::new(table(), Some(dec!(120)));
        let value = table
            .resolve_or_default(LoanId::nil(), CycleParameter::Principal, 2)
            .unwrap();
        assert_eq!(value, dec!(120));
    }

    #[test]
    fn test_missing_default_is_unresolvable() {
        let table = CycleTable::new(table(), None);
        let err = table
            .resolve_or_default(LoanId::nil(), CycleParameter::Principal, 2)
            .unwrap_err();
        assert!(matches!(
            err,
            ScheduleError::UnresolvableCycleVariation { cycle_number: 2, parameter: CycleParameter::Principal, .. }
        ));
    }

    #[test]
    fn test_fractional_installment_count_is_unresolvable() {
        let table = CycleTable::new(vec![BorrowerCycleVariation::equal(1, dec!(10.5))], None);
        assert!(table
            .resolve_or_default(LoanId::nil(), CycleParameter::NumberOfRepayments, 1)
            .is_err());
    }

    #[test]
    fn test_value_outside_bounds_is_unresolvable() {
        let variation = BorrowerCycleVariation::equal(1, dec!(500)).with_bounds(Some(dec!(1000)), None);
        let table = CycleTable::new(vec![variation], Some(dec!(2000)));
        assert!(table
            .resolve_or_default(LoanId::nil(), CycleParameter::Principal, 1)
            .is_err());
    }

    #[test]
    fn test_terms_resolve_each_parameter_independently() {
        let terms = BorrowerCycleTerms {
            cycle_number: 3,
            principal: CycleTable::new(table(), Some(dec!(50))),
            interest_rate: CycleTable::new(vec![BorrowerCycleVariation::equal(3, dec!(18))], Some(dec!(24))),
            number_of_repayments: CycleTable::new(Vec::new(), Some(dec!(6))),
        };
        let resolved = terms.resolve(LoanId::nil()).unwrap();
        assert_eq!(resolved.principal, Money::from_major(80));
        assert_eq!(resolved.annual_rate, Rate::from_percentage(18));
        assert_eq!(resolved.number_of_repayments, 6);
    }
}

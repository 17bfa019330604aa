use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// unique identifier for a loan
pub type LoanId = Uuid;

/// unit of the repayment period
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PeriodFrequency {
    Days,
    Weeks,
    Months,
    Years,
}

impl PeriodFrequency {
    /// number of frequency units in a year
    pub fn periods_per_year(&self) -> Decimal {
        match self {
            PeriodFrequency::Days => Decimal::from(365),
            PeriodFrequency::Weeks => Decimal::from(52),
            PeriodFrequency::Months => Decimal::from(12),
            PeriodFrequency::Years => Decimal::ONE,
        }
    }
}

/// how interest is charged over the life of the loan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InterestMethod {
    /// interest on the outstanding balance of each period
    DecliningBalance,
    /// interest on the disbursed amount every period
    Flat,
}

/// how principal is spread across installments
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AmortizationMethod {
    /// equal total payment each period
    EqualInstallments,
    /// equal principal each period, interest on top
    EqualPrincipal,
}

/// basis of the per-period interest computation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InterestCalculationPeriod {
    /// actual days over the day count year basis
    Daily,
    /// one repayment period's share of the annual rate
    SameAsRepaymentPeriod,
}

/// how a recalculated tail absorbs a changed balance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RescheduleStrategy {
    /// keep the installment count, recompute the amount
    ReduceInstallmentAmount,
    /// keep the amount, shorten or lengthen the tail
    ReduceNumberOfInstallments,
    /// keep count and amount, last installment takes the difference
    ExtendLastInstallment,
}

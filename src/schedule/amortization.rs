use rust_decimal::Decimal;

use crate::decimal::Money;
use crate::types::{AmortizationMethod, InterestMethod};

/// principal and interest split of one installment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PeriodAmounts {
    pub principal: Money,
    pub interest: Money,
}

/// amortization calculator
#[derive(Debug, Clone, Copy)]
pub struct AmortizationCalculator {
    method: AmortizationMethod,
    interest_method: InterestMethod,
    currency_digits: u32,
}

impl AmortizationCalculator {
    pub fn new(method: AmortizationMethod, interest_method: InterestMethod, currency_digits: u32) -> Self {
        Self {
            method,
            interest_method,
            currency_digits,
        }
    }

    /// amount held constant across the remaining periods
    ///
    /// the full installment for equal installments, the principal part
    /// for equal principal and for flat interest.
    pub fn level_amount(&self, outstanding: Money, periodic_rate: Decimal, periods: u32) -> Money {
        let amount = match (self.interest_method, self.method) {
            (InterestMethod::DecliningBalance, AmortizationMethod::EqualInstallments) => {
                calculate_emi_amount(outstanding, periodic_rate, periods)
            }
            _ => calculate_equal_principal(outstanding, periods),
        };
        amount.round_dp(self.currency_digits)
    }

    /// split one period given its interest and the level amount
    ///
    /// the last period takes whatever principal is still outstanding;
    /// earlier periods never take more than is outstanding.
    pub fn split(&self, outstanding: Money, interest: Money, level_amount: Money, is_last: bool) -> PeriodAmounts {
        let interest = interest.round_dp(self.currency_digits);
        if is_last {
            return PeriodAmounts { principal: outstanding, interest };
        }
        let principal = match (self.interest_method, self.method) {
            (InterestMethod::DecliningBalance, AmortizationMethod::EqualInstallments) => {
                (level_amount - interest).max(Money::ZERO)
            }
            _ => level_amount,
        };
        PeriodAmounts {
            principal: principal.min(outstanding).max(Money::ZERO),
            interest,
        }
    }

    pub fn currency_digits(&self) -> u32 {
        self.currency_digits
    }
}

/// EMI = P * r * (1 + r)^n / ((1 + r)^n - 1)
pub fn calculate_emi_amount(principal: Money, periodic_rate: Decimal, periods: u32) -> Money {
    if periods == 0 {
        return principal;
    }
    if periodic_rate.is_zero() {
        return principal / Decimal::from(periods);
    }

    let mut compound = Decimal::ONE;
    let base = Decimal::ONE + periodic_rate;
    for _ in 0..periods {
        compound *= base;
    }

    let numerator = principal.as_decimal() * periodic_rate * compound;
    let denominator = compound - Decimal::ONE;

    Money::from_decimal(numerator / denominator)
}

pub fn calculate_equal_principal(principal: Money, periods: u32) -> Money {
    if periods == 0 {
        return principal;
    }
    principal / Decimal::from(periods)
}

use chrono::NaiveDate;

use crate::charges::ChargeKind;
use crate::decimal::Money;
use crate::schedule::Installment;
use crate::state::{LoanTransaction, TransactionKind};

/// installment component a payment can settle
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum AllocationComponent {
    Penalties,
    Fees,
    Interest,
    Principal,
}

/// payment waterfall configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentWaterfall {
    order: Vec<AllocationComponent>,
}

impl Default for PaymentWaterfall {
    fn default() -> Self {
        Self::standard()
    }
}

impl PaymentWaterfall {
    /// standard waterfall: penalties -> fees -> interest -> principal
    pub fn standard() -> Self {
        Self {
            order: vec![
                AllocationComponent::Penalties,
                AllocationComponent::Fees,
                AllocationComponent::Interest,
                AllocationComponent::Principal,
            ],
        }
    }

    /// interest-first waterfall for certain products
    pub fn interest_first() -> Self {
        Self {
            order: vec![
                AllocationComponent::Interest,
                AllocationComponent::Penalties,
                AllocationComponent::Fees,
                AllocationComponent::Principal,
            ],
        }
    }

    pub fn order(&self) -> &[AllocationComponent] {
        &self.order
    }

    /// allocate transactions over installments in due order
    ///
    /// transactions are applied by date, stable for equal dates. whatever a
    /// repayment leaves after every installment is settled is recorded as a
    /// prepayment on the repayment date.
    pub fn allocate<'t>(
        &self,
        installments: &[Installment],
        transactions: impl IntoIterator<Item = &'t LoanTransaction>,
    ) -> HeadAllocation {
        let mut allocation = HeadAllocation {
            balances: installments.iter().map(InstallmentBalance::of).collect(),
            ..HeadAllocation::default()
        };
        let mut ordered: Vec<&LoanTransaction> = transactions.into_iter().collect();
        ordered.sort_by_key(|t| t.date);

        for transaction in ordered {
            match transaction.kind {
                TransactionKind::Repayment(amount) => {
                    let excess = self.apply_payment(&mut allocation.balances, amount);
                    if excess.is_positive() {
                        allocation.prepayments.push((transaction.date, excess));
                    }
                }
                TransactionKind::InterestWaiver(amount) => {
                    let mut remaining = amount;
                    for balance in &mut allocation.balances {
                        remaining = balance.apply(AllocationComponent::Interest, remaining);
                        if remaining.is_zero() {
                            break;
                        }
                    }
                    allocation.waived_interest += amount - remaining;
                }
                TransactionKind::ChargeApplied { amount, kind } => {
                    let index = installments
                        .iter()
                        .position(|i| i.due_date >= transaction.date)
                        .unwrap_or(installments.len().saturating_sub(1));
                    if let Some(balance) = allocation.balances.get_mut(index) {
                        match kind {
                            ChargeKind::Fee => balance.fees += amount,
                            ChargeKind::Penalty => balance.penalties += amount,
                        }
                    }
                }
            }
        }
        allocation
    }

    fn apply_payment(&self, balances: &mut [InstallmentBalance], amount: Money) -> Money {
        let mut remaining = amount;
        for balance in balances.iter_mut() {
            for component in &self.order {
                remaining = balance.apply(*component, remaining);
            }
            if remaining.is_zero() {
                break;
            }
        }
        remaining
    }
}

/// unpaid portion of one installment
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InstallmentBalance {
    pub principal: Money,
    pub interest: Money,
    pub fees: Money,
    pub penalties: Money,
}

impl InstallmentBalance {
    pub fn of(installment: &Installment) -> Self {
        Self {
            principal: installment.principal,
            interest: installment.interest,
            fees: installment.fees,
            penalties: installment.penalties,
        }
    }

    pub fn total(&self) -> Money {
        self.principal + self.interest + self.fees + self.penalties
    }

    pub fn is_settled(&self) -> bool {
        !self.total().is_positive()
    }

    /// apply up to `available` to one component, returning what is left
    fn apply(&mut self, component: AllocationComponent, available: Money) -> Money {
        let balance = match component {
            AllocationComponent::Penalties => &mut self.penalties,
            AllocationComponent::Fees => &mut self.fees,
            AllocationComponent::Interest => &mut self.interest,
            AllocationComponent::Principal => &mut self.principal,
        };
        let paid = available.min(*balance).max(Money::ZERO);
        *balance -= paid;
        available - paid
    }
}

/// outcome of allocating transactions over retained installments
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeadAllocation {
    pub balances: Vec<InstallmentBalance>,
    /// principal paid ahead of schedule, by payment date
    pub prepayments: Vec<(NaiveDate, Money)>,
    pub waived_interest: Money,
}

impl HeadAllocation {
    pub fn arrears_principal(&self) -> Money {
        self.balances.iter().map(|b| b.principal).sum()
    }

    pub fn arrears_interest(&self) -> Money {
        self.balances.iter().map(|b| b.interest).sum()
    }

    /// unpaid fees and penalties
    pub fn arrears_charges(&self) -> Money {
        self.balances.iter().map(|b| b.fees + b.penalties).sum()
    }

    pub fn prepaid(&self) -> Money {
        self.prepayments.iter().map(|(_, amount)| *amount).sum()
    }

    /// index of the first installment with anything left to pay
    pub fn first_open(&self) -> Option<usize> {
        self.balances.iter().position(|b| !b.is_settled())
    }
}

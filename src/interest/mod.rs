pub mod accrual;
pub mod compound;
pub mod floating;

pub use accrual::{AccrualEngine, BalanceSegment, DayCountConvention};
pub use compound::{CompoundingKind, CompoundingPolicy, RecalculationFrequency};
pub use floating::{FloatingRatePeriod, FloatingRateProvider, FloatingRateTable, NoFloatingRates};

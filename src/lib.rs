pub mod borrower_cycle;
pub mod calendar;
pub mod charges;
pub mod config;
pub mod decimal;
pub mod disbursement;
pub mod errors;
pub mod events;
pub mod interest;
pub mod recalculation;
pub mod schedule;
pub mod state;
pub mod types;
pub mod variations;

// re-export key types
pub use borrower_cycle::{
    BorrowerCycleTerms, BorrowerCycleVariation, CycleParameter, CycleTable, ResolvedTerms,
    ValueCondition,
};
pub use calendar::{HolidayCalendar, HolidayList, ShiftDirection, WorkingDayPolicy};
pub use charges::{
    ChargeBasis, ChargeCalculation, ChargeKind, ChargeList, ChargeProvider, NoCharges,
    ScheduledCharge,
};
pub use config::{EngineConfig, FloatingRateTerms, LoanTerms};
pub use decimal::{Money, Rate};
pub use disbursement::{DisbursementPlan, DisbursementTranche};
pub use errors::{Result, ScheduleError};
pub use events::{Event, EventStore};
pub use interest::{
    AccrualEngine, CompoundingKind, CompoundingPolicy, DayCountConvention, FloatingRatePeriod,
    FloatingRateProvider, FloatingRateTable, NoFloatingRates, RecalculationFrequency,
};
pub use recalculation::{InterestRecalculationPolicy, PaymentWaterfall, RecalculationController};
pub use schedule::{DisbursementRow, Installment, LoanSchedule, ScheduleGenerator, ScheduleView};
pub use state::{LoanState, LoanTransaction, TransactionKind};
pub use types::{
    AmortizationMethod, InterestCalculationPeriod, InterestMethod, LoanId, PeriodFrequency,
    RescheduleStrategy,
};
pub use variations::{classify, ClassifiedVariations, TermVariation, TermVariationKind};

// re-export external dependencies that users will need
pub use chrono;
pub use hourglass_rs::{SafeTimeProvider, TimeSource};
pub use rust_decimal::Decimal;
pub use uuid::Uuid;

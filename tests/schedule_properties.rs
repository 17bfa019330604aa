use chrono::{NaiveDate, TimeZone, Utc};
use proptest::prelude::{prop_assert, prop_assert_eq, proptest};

use loan_schedule_rs::{
    classify, AmortizationMethod, DisbursementPlan, EventStore, HolidayList, InterestMethod, LoanId, LoanSchedule,
    LoanTerms, Money, Rate, Result, SafeTimeProvider, ScheduleGenerator, TimeSource,
};

fn time_provider() -> SafeTimeProvider {
    SafeTimeProvider::new(TimeSource::Test(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()))
}

fn methods(index: u8) -> (InterestMethod, AmortizationMethod) {
    match index % 3 {
        0 => (InterestMethod::DecliningBalance, AmortizationMethod::EqualInstallments),
        1 => (InterestMethod::DecliningBalance, AmortizationMethod::EqualPrincipal),
        _ => (InterestMethod::Flat, AmortizationMethod::EqualPrincipal),
    }
}

fn terms(principal: i64, rate_percent: u32, count: u32, method: u8, start_day: u32) -> LoanTerms {
    let (interest, amortization) = methods(method);
    LoanTerms::monthly(
        LoanId::nil(),
        Money::from_major(principal),
        Rate::from_percentage(rate_percent),
        count,
        NaiveDate::from_ymd_opt(2024, 1, start_day).unwrap(),
    )
    .with_methods(interest, amortization)
}

fn generate(terms: &LoanTerms) -> Result<LoanSchedule> {
    let calendar = HolidayList::new();
    let mut variations = classify(Vec::new());
    let mut events = EventStore::new();
    ScheduleGenerator::new(terms, &calendar).generate(
        &DisbursementPlan::default(),
        &mut variations,
        &time_provider(),
        &mut events,
    )
}

proptest! {
    #![proptest_config(proptest::test_runner::Config::with_cases(48))]

    #[test]
    fn prop_principal_sums_to_loan_amount(
        principal in 1_000i64..1_000_000,
        rate_percent in 0u32..36,
        count in 1u32..60,
        method in 0u8..3,
        start_day in 1u32..28,
    ) {
        let terms = terms(principal, rate_percent, count, method, start_day);
        let schedule = generate(&terms).unwrap();

        prop_assert_eq!(schedule.installments.len(), count as usize);
        prop_assert_eq!(schedule.total_principal(), Money::from_major(principal));
        prop_assert!(schedule.installments.iter().all(|i| !i.principal.is_negative()));
        prop_assert!(schedule.installments.iter().all(|i| !i.interest.is_negative()));
    }

    #[test]
    fn prop_periods_are_contiguous_and_increasing(
        principal in 1_000i64..500_000,
        rate_percent in 1u32..30,
        count in 1u32..48,
        method in 0u8..3,
        start_day in 1u32..28,
    ) {
        let terms = terms(principal, rate_percent, count, method, start_day);
        let schedule = generate(&terms).unwrap();

        let first = &schedule.installments[0];
        prop_assert_eq!(first.from_date, terms.expected_disbursement_date);
        for pair in schedule.installments.windows(2) {
            prop_assert!(pair[0].due_date < pair[1].due_date);
            prop_assert_eq!(pair[1].from_date, pair[0].due_date);
        }
        for (index, installment) in schedule.installments.iter().enumerate() {
            prop_assert_eq!(installment.sequence_number, index as u32 + 1);
            prop_assert!(installment.from_date < installment.due_date);
        }
    }

    #[test]
    fn prop_generation_is_deterministic(
        principal in 1_000i64..500_000,
        rate_percent in 0u32..30,
        count in 1u32..36,
        method in 0u8..3,
    ) {
        let terms = terms(principal, rate_percent, count, method, 15);
        let first = generate(&terms).unwrap();
        let second = generate(&terms).unwrap();

        prop_assert_eq!(first, second);
    }

    #[test]
    fn prop_flat_interest_dominates_declining_balance(
        principal in 1_000i64..500_000,
        rate_percent in 1u32..30,
        count in 1u32..36,
    ) {
        let terms = terms(principal, rate_percent, count, 2, 1);
        let schedule = generate(&terms).unwrap();

        let declining = terms.clone().with_methods(InterestMethod::DecliningBalance, AmortizationMethod::EqualPrincipal);
        let declining = generate(&declining).unwrap();

        // flat interest never falls below declining-balance interest on the same balance
        prop_assert!(schedule.total_interest() >= declining.total_interest());
        prop_assert_eq!(schedule.total_principal(), declining.total_principal());
    }
}

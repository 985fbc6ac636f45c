//! Property-based tests for the balance ledger and the business calendar
//!
//! The ledger row is the one piece of state every workflow path writes, so
//! these tests throw arbitrary mutation sequences at it and check that the
//! `assigned >= used + pending` invariant survives whatever is accepted, and
//! that whatever is refused leaves the row exactly as it was.

use chrono::{Datelike, Duration, NaiveDate, Weekday};
use leave_ledger::{BalanceKey, BusinessCalendar, LeaveBalance, LedgerOp, Quantity, WeekendCalendar};
use proptest::prelude::*;
use rust_decimal::Decimal;

// These property tests cover:
//
// 1. Invariant preservation under any sequence of unforced ops
// 2. Atomicity of a refused op on the in-memory row
// 3. available() staying in step with the three stored fields
// 4. The closed-form weekday count agreeing with a day-by-day walk
//
// Persistence and concurrency are covered by the integration tests.

/// Half-day granular amounts from -2 to 20.
fn amount_strategy() -> impl Strategy<Value = Quantity> {
    (-4i64..=40).prop_map(|halves| Quantity::new(Decimal::new(halves * 5, 1)))
}

fn op_strategy() -> impl Strategy<Value = LedgerOp> {
    prop_oneof![
        amount_strategy().prop_map(LedgerOp::Reserve),
        amount_strategy().prop_map(LedgerOp::Commit),
        amount_strategy().prop_map(LedgerOp::Release),
        amount_strategy().prop_map(|value| LedgerOp::SetAssigned { value, force: false }),
        amount_strategy().prop_map(|delta| LedgerOp::AdjustAssigned { delta, force: false }),
    ]
}

fn fresh_balance() -> LeaveBalance {
    LeaveBalance::new(&BalanceKey::new("user_a", "annual", 2025))
}

/// Counts weekdays one at a time through the trait's default method.
struct DayByDay;

impl BusinessCalendar for DayByDay {
    fn is_chargeable(&self, date: NaiveDate) -> bool {
        !matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
    }
}

fn date_strategy() -> impl Strategy<Value = NaiveDate> {
    let origin = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
    (0i64..2_000).prop_map(move |offset| origin + Duration::days(offset))
}

// PROPERTY TESTS
proptest! {
    /// Property: without force, no sequence of ops can break the invariant
    #[test]
    fn prop_unforced_ops_keep_invariant(ops in prop::collection::vec(op_strategy(), 1..40)) {
        let mut balance = fresh_balance();

        for op in ops {
            let _ = balance.apply(op);
            prop_assert!(balance.is_consistent(), "invariant broken after {:?}: {:?}", op, balance);
            prop_assert!(!balance.assigned().is_negative());
        }
    }

    /// Property: a refused op leaves every field as it was
    #[test]
    fn prop_refused_op_is_a_no_op(
        setup in prop::collection::vec(op_strategy(), 0..20),
        op in op_strategy(),
    ) {
        let mut balance = fresh_balance();
        for step in setup {
            let _ = balance.apply(step);
        }

        let before = balance.clone();
        if balance.apply(op).is_err() {
            prop_assert_eq!(&balance, &before);
        }
    }

    /// Property: available is always assigned - used - pending
    #[test]
    fn prop_available_matches_fields(ops in prop::collection::vec(op_strategy(), 0..30)) {
        let mut balance = fresh_balance();
        for op in ops {
            let _ = balance.apply(op);
        }
        prop_assert_eq!(
            balance.available() + balance.used() + balance.pending(),
            balance.assigned()
        );
    }

    /// Property: a successful reserve is always followed by a successful
    /// release of the same amount, restoring availability
    #[test]
    fn prop_reserve_then_release_round_trips(
        assigned in 0u32..40,
        amount in amount_strategy(),
    ) {
        let mut balance = fresh_balance();
        balance
            .apply(LedgerOp::SetAssigned { value: Quantity::from(assigned), force: false })
            .unwrap();
        let available = balance.available();

        if balance.apply(LedgerOp::Reserve(amount)).is_ok() {
            prop_assert!(balance.apply(LedgerOp::Release(amount)).is_ok());
            prop_assert_eq!(balance.available(), available);
        } else {
            prop_assert!(!amount.is_positive() || amount > available);
        }
    }

    /// Property: the weekend calendar's closed form agrees with walking the range
    #[test]
    fn prop_weekday_count_matches_walk(start in date_strategy(), span in 0i64..400) {
        let end = start + Duration::days(span);
        prop_assert_eq!(
            WeekendCalendar.chargeable_days(start, end).unwrap(),
            DayByDay.chargeable_days(start, end).unwrap()
        );
    }

    /// Property: a reversed range is always refused
    #[test]
    fn prop_reversed_range_is_refused(start in date_strategy(), back in 1i64..30) {
        let end = start - Duration::days(back);
        prop_assert!(WeekendCalendar.chargeable_days(start, end).is_err());
    }
}

//! Property-based tests for the approval workflow
//!
//! Drives a submitted request through random sequences of actions, actors
//! and versions against a real (temporary) sled database, and checks after
//! every step that the request state and the ledger row agree.

use chrono::NaiveDate;
use leave_ledger::{
    Action, Actor, Allocation, AllocationMode, AllocationTarget, Capability, EmployeeProfile,
    InMemoryDirectory, LeaveRequest, LeaveService, LeaveTypeConfig, LedgerConfig, Quantity,
    RequestState,
};
use proptest::prelude::*;
use std::sync::Arc;

// What these tests DON'T cover (deliberately):
//
// - Concurrent callers (see concurrency.rs)
// - Validation rules on submit (unit tests in the validator)
//

#[derive(Debug, Clone, Copy)]
enum Who {
    Owner,
    Colleague,
    Manager,
    OutsideManager,
    Hr,
}

#[derive(Debug, Clone)]
struct Step {
    action: Action,
    who: Who,
    stale: bool,
    reason: Option<String>,
}

fn actor(who: Who) -> Actor {
    match who {
        Who::Owner => Actor::new("user_a").in_department("ops"),
        Who::Colleague => Actor::new("user_b").in_department("ops"),
        Who::Manager => Actor::new("user_m")
            .in_department("ops")
            .with(Capability::ApproveAsManager)
            .with(Capability::Reject),
        Who::OutsideManager => Actor::new("user_s")
            .in_department("sales")
            .with(Capability::ApproveAsManager)
            .with(Capability::Reject),
        Who::Hr => Actor::new("user_h")
            .with(Capability::ApproveAsHr)
            .with(Capability::Reject),
    }
}

fn step_strategy() -> impl Strategy<Value = Step> {
    let action = prop_oneof![
        Just(Action::ApproveByManager),
        Just(Action::ApproveByHr),
        Just(Action::Reject),
        Just(Action::Cancel),
    ];
    let who = prop_oneof![
        Just(Who::Owner),
        Just(Who::Colleague),
        Just(Who::Manager),
        Just(Who::OutsideManager),
        Just(Who::Hr),
    ];
    let reason = prop_oneof![Just(None), Just(Some(String::new())), "[a-z ]{3,20}".prop_map(Some)];

    (action, who, prop::bool::weighted(0.2), reason).prop_map(|(action, who, stale, reason)| Step {
        action,
        who,
        stale,
        reason,
    })
}

fn setup() -> anyhow::Result<(LeaveService, LeaveRequest)> {
    let db = Arc::new(sled::Config::new().temporary(true).open()?);

    let directory = Arc::new(InMemoryDirectory::new());
    let staff = [("user_a", "ops"), ("user_b", "ops"), ("user_m", "ops"), ("user_s", "sales")];
    for (id, department) in staff {
        directory.upsert_employee(EmployeeProfile::new(id, department));
    }
    directory.upsert_leave_type(LeaveTypeConfig::days("annual"));

    let service = LeaveService::new(db, directory, LedgerConfig::default())?;
    service.allocate_balance(
        &Actor::new("user_x").with(Capability::Admin),
        &AllocationTarget::Employee("user_a".into()),
        "annual",
        2025,
        &Allocation::new(Quantity::from(15), AllocationMode::Replace),
    )?;

    let start = NaiveDate::from_ymd_opt(2025, 6, 2).unwrap();
    let end = NaiveDate::from_ymd_opt(2025, 6, 6).unwrap();
    let request = service.submit_request(&actor(Who::Owner), "user_a", "annual", start, end, None)?;
    Ok((service, request))
}

// PROPERTY TESTS
proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Property: after any step, the ledger row matches the request state
    ///
    /// Open requests hold their quantity in pending, approved ones in used,
    /// and closed ones hold nothing.
    #[test]
    fn prop_ledger_follows_state(steps in prop::collection::vec(step_strategy(), 1..12)) {
        let (service, request) = setup().unwrap();
        let quantity = request.quantity;

        for step in steps {
            let current = service.get_request(&request.id).unwrap();
            let version = if step.stale {
                current.version.saturating_sub(1)
            } else {
                current.version
            };
            let reason = step.reason.as_deref();
            let _ = service.transition(&request.id, step.action, &actor(step.who), version, reason);

            let current = service.get_request(&request.id).unwrap();
            let balance = service.get_balance("user_a", "annual", 2025).unwrap();
            prop_assert!(balance.is_consistent());

            let (pending, used) = match current.state {
                RequestState::Pending | RequestState::ManagerApproved => (quantity, Quantity::ZERO),
                RequestState::Approved => (Quantity::ZERO, quantity),
                RequestState::Rejected | RequestState::Cancelled => {
                    (Quantity::ZERO, Quantity::ZERO)
                }
            };
            prop_assert_eq!(balance.pending(), pending, "state {}", current.state);
            prop_assert_eq!(balance.used(), used, "state {}", current.state);
        }
    }

    /// Property: the version counts accepted transitions, and a terminal
    /// request accepts nothing further
    #[test]
    fn prop_version_counts_transitions(steps in prop::collection::vec(step_strategy(), 1..12)) {
        let (service, request) = setup().unwrap();
        let mut accepted = 0u64;

        for step in steps {
            let before = service.get_request(&request.id).unwrap();
            let version = if step.stale {
                before.version.saturating_sub(1)
            } else {
                before.version
            };
            let reason = step.reason.as_deref();
            let outcome =
                service.transition(&request.id, step.action, &actor(step.who), version, reason);

            if before.state.is_terminal() {
                prop_assert!(outcome.is_err());
            }
            if step.stale {
                prop_assert!(outcome.is_err());
            }
            match outcome {
                Ok(updated) => {
                    accepted += 1;
                    prop_assert_eq!(updated.version, before.version + 1);
                }
                Err(_) => {
                    let after = service.get_request(&request.id).unwrap();
                    prop_assert_eq!(&after, &before);
                }
            }
        }

        prop_assert_eq!(service.get_request(&request.id).unwrap().version, accepted + 1);
    }
}

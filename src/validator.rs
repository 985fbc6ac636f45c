//! Gatekeeping for new leave requests
use super::balance::{BalanceKey, BalanceStore, LeaveBalance};
use super::calendar::BusinessCalendar;
use super::config::LedgerConfig;
use super::directory::Directory;
use super::error::ValidationError;
use super::request::RequestStore;
use super::types::{DateStamp, Quantity, Unit};
use chrono::{Datelike, Duration, NaiveDate};
use rust_decimal::Decimal;
use tracing::debug;

/// The outcome of a successful validation. `quantity` is what gets persisted
/// and charged, whatever the client believed the request was worth.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidatedRequest {
    pub chargeable_days: u32,
    pub quantity: Quantity,
    pub unit: Unit,
    pub year: i32,
    pub balance_tracked: bool,
}

pub struct RequestValidator<'a> {
    directory: &'a dyn Directory,
    calendar: &'a dyn BusinessCalendar,
    balances: &'a BalanceStore,
    requests: &'a RequestStore,
    config: &'a LedgerConfig,
}

impl<'a> RequestValidator<'a> {
    pub fn new(
        directory: &'a dyn Directory,
        calendar: &'a dyn BusinessCalendar,
        balances: &'a BalanceStore,
        requests: &'a RequestStore,
        config: &'a LedgerConfig,
    ) -> Self {
        Self {
            directory,
            calendar,
            balances,
            requests,
            config,
        }
    }

    /// Check a proposed request without mutating anything. The answer is
    /// advisory: submit re-checks the balance inside its own transaction.
    pub fn validate(
        &self,
        employee_id: &str,
        leave_type_id: &str,
        start: NaiveDate,
        end: NaiveDate,
        today: NaiveDate,
    ) -> Result<ValidatedRequest, ValidationError> {
        let chargeable_days = self.calendar.chargeable_days(start, end)?;
        if chargeable_days == 0 {
            return Err(ValidationError::EmptyRange {
                start: start.into(),
                end: end.into(),
            });
        }
        self.check_span(chargeable_days, start, today)?;

        let leave_type = self
            .directory
            .leave_type(leave_type_id)
            .ok_or_else(|| ValidationError::UnknownLeaveType(leave_type_id.to_string()))?;
        let employee = self
            .directory
            .employee(employee_id)
            .ok_or_else(|| ValidationError::UnknownEmployee(employee_id.to_string()))?;

        let year = start.year();
        let quantity = quantity_for(leave_type.unit, chargeable_days, self.config.hours_per_day)?;

        if leave_type.balance_tracked {
            let key = BalanceKey::new(employee_id, leave_type_id, year);
            let balance =
                self.balances
                    .get(&key)?
                    .ok_or_else(|| ValidationError::NoBalance {
                        employee_id: employee_id.to_string(),
                        leave_type_id: leave_type_id.to_string(),
                        year,
                    })?;
            check_balance(&balance, quantity, start.into())?;
        }

        if !employee.active {
            return Err(ValidationError::InactiveEntity {
                kind: "employee",
                id: employee.id,
            });
        }
        if !leave_type.active {
            return Err(ValidationError::InactiveEntity {
                kind: "leave type",
                id: leave_type.id,
            });
        }

        if !self.config.allow_overlap {
            self.check_overlap(employee_id, start.into(), end.into())?;
        }

        debug!(employee_id, leave_type_id, chargeable_days, %quantity, "request validated");

        Ok(ValidatedRequest {
            chargeable_days,
            quantity,
            unit: leave_type.unit,
            year,
            balance_tracked: leave_type.balance_tracked,
        })
    }

    fn check_span(
        &self,
        chargeable_days: u32,
        start: NaiveDate,
        today: NaiveDate,
    ) -> Result<(), ValidationError> {
        if let Some(max) = self.config.max_span_days {
            if chargeable_days > max {
                return Err(ValidationError::SpanTooLong {
                    requested: chargeable_days,
                    max,
                });
            }
        }
        if let Some(notice) = self.config.min_notice_days {
            let earliest = today + Duration::days(i64::from(notice));
            if start < earliest {
                return Err(ValidationError::NoticeTooShort {
                    start: start.into(),
                    earliest: earliest.into(),
                });
            }
        }
        Ok(())
    }

    fn check_overlap(
        &self,
        employee_id: &str,
        start: DateStamp,
        end: DateStamp,
    ) -> Result<(), ValidationError> {
        let clash = self
            .requests
            .for_employee(employee_id)?
            .into_iter()
            .find(|r| !r.state.is_terminal() && r.overlaps(start, end));

        match clash {
            Some(request) => Err(ValidationError::Overlap { code: request.code }),
            None => Ok(()),
        }
    }
}

/// The amount charged for `chargeable_days` in the leave type's unit.
pub fn quantity_for(
    unit: Unit,
    chargeable_days: u32,
    hours_per_day: Decimal,
) -> Result<Quantity, ValidationError> {
    let days = Quantity::from(chargeable_days);
    match unit {
        Unit::Days => Ok(days),
        Unit::Hours => days
            .checked_mul(hours_per_day)
            .ok_or(ValidationError::QuantityOutOfRange { chargeable_days }),
    }
}

/// Balance side of validation: not expired before `start`, and enough left.
pub fn check_balance(
    balance: &LeaveBalance,
    quantity: Quantity,
    start: DateStamp,
) -> Result<(), ValidationError> {
    if let Some(expired_on) = balance.expires_on {
        if expired_on < start {
            return Err(ValidationError::BalanceExpired {
                year: balance.year,
                expired_on,
            });
        }
    }

    let available = balance.available();
    if quantity > available {
        return Err(ValidationError::InsufficientBalance {
            requested: quantity,
            available,
            shortfall: quantity.saturating_sub(available),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::balance::{Allocation, AllocationMode};
    use crate::calendar::WeekendCalendar;
    use crate::directory::{EmployeeProfile, InMemoryDirectory, LeaveTypeConfig};
    use rust_decimal_macros::dec;

    struct Fixture {
        directory: InMemoryDirectory,
        balances: BalanceStore,
        requests: RequestStore,
        config: LedgerConfig,
    }

    impl Fixture {
        fn new() -> Self {
            let db = sled::Config::new().temporary(true).open().unwrap();
            let directory = InMemoryDirectory::new();
            directory.upsert_employee(EmployeeProfile::new("user_a", "ops"));
            directory.upsert_leave_type(LeaveTypeConfig::days("annual"));
            directory.upsert_leave_type(LeaveTypeConfig::hours("sick"));

            let balances = BalanceStore::open(&db).unwrap();
            balances
                .allocate(
                    &BalanceKey::new("user_a", "annual", 2025),
                    &Allocation::new(Quantity::from(15), AllocationMode::Replace),
                )
                .unwrap();

            Self {
                directory,
                balances,
                requests: RequestStore::open(&db).unwrap(),
                config: LedgerConfig::default(),
            }
        }

        fn validate(
            &self,
            leave_type: &str,
            start: NaiveDate,
            end: NaiveDate,
        ) -> Result<ValidatedRequest, ValidationError> {
            RequestValidator::new(
                &self.directory,
                &WeekendCalendar,
                &self.balances,
                &self.requests,
                &self.config,
            )
            .validate("user_a", leave_type, start, end, date(2025, 1, 1))
        }
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn computes_quantity_from_calendar() {
        let fixture = Fixture::new();
        let validated = fixture.validate("annual", date(2025, 6, 2), date(2025, 6, 6)).unwrap();

        assert_eq!(validated.chargeable_days, 5);
        assert_eq!(validated.quantity, Quantity::from(5));
        assert_eq!(validated.year, 2025);
        assert!(validated.balance_tracked);
    }

    #[test]
    fn weekend_only_request_is_empty() {
        let fixture = Fixture::new();
        let err = fixture.validate("annual", date(2025, 6, 7), date(2025, 6, 8)).unwrap_err();
        assert!(matches!(err, ValidationError::EmptyRange { .. }));
    }

    #[test]
    fn shortfall_is_reported() {
        let fixture = Fixture::new();
        let err = fixture.validate("annual", date(2025, 6, 2), date(2025, 6, 27)).unwrap_err();

        match err {
            ValidationError::InsufficientBalance { shortfall, .. } => {
                assert_eq!(shortfall, Quantity::from(5))
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn missing_balance_row() {
        let fixture = Fixture::new();
        let err = fixture.validate("sick", date(2025, 6, 2), date(2025, 6, 2)).unwrap_err();
        assert!(matches!(err, ValidationError::NoBalance { year: 2025, .. }));
    }

    #[test]
    fn inactive_employee() {
        let fixture = Fixture::new();
        fixture
            .directory
            .upsert_employee(EmployeeProfile::new("user_a", "ops").inactive());

        let err = fixture.validate("annual", date(2025, 6, 2), date(2025, 6, 2)).unwrap_err();
        assert!(matches!(err, ValidationError::InactiveEntity { kind: "employee", .. }));
    }

    #[test]
    fn inactive_leave_type() {
        let fixture = Fixture::new();
        fixture
            .directory
            .upsert_leave_type(LeaveTypeConfig::days("annual").inactive());

        let err = fixture.validate("annual", date(2025, 6, 2), date(2025, 6, 2)).unwrap_err();
        assert!(matches!(err, ValidationError::InactiveEntity { kind: "leave type", .. }));
    }

    #[test]
    fn untracked_types_skip_the_ledger() {
        let fixture = Fixture::new();
        fixture
            .directory
            .upsert_leave_type(LeaveTypeConfig::days("unpaid").untracked());

        let validated = fixture.validate("unpaid", date(2025, 6, 2), date(2025, 7, 31)).unwrap();
        assert!(!validated.balance_tracked);
        assert_eq!(validated.chargeable_days, 44);
    }

    #[test]
    fn span_and_notice_limits() {
        let mut fixture = Fixture::new();
        fixture.config.max_span_days = Some(3);
        fixture.config.min_notice_days = Some(7);

        let err = fixture.validate("annual", date(2025, 6, 2), date(2025, 6, 6)).unwrap_err();
        assert!(matches!(err, ValidationError::SpanTooLong { requested: 5, max: 3 }));

        let err = fixture.validate("annual", date(2025, 1, 6), date(2025, 1, 6)).unwrap_err();
        assert!(matches!(err, ValidationError::NoticeTooShort { .. }));

        assert!(fixture.validate("annual", date(2025, 1, 8), date(2025, 1, 8)).is_ok());
    }

    #[test]
    fn expired_balance() {
        let fixture = Fixture::new();
        fixture
            .balances
            .allocate(
                &BalanceKey::new("user_a", "annual", 2025),
                &Allocation::new(Quantity::ZERO, AllocationMode::Add)
                    .expiring(DateStamp::from_ymd(2025, 3, 31).unwrap()),
            )
            .unwrap();

        let err = fixture.validate("annual", date(2025, 6, 2), date(2025, 6, 2)).unwrap_err();
        assert!(matches!(err, ValidationError::BalanceExpired { .. }));
        assert!(fixture.validate("annual", date(2025, 3, 31), date(2025, 3, 31)).is_ok());
    }

    #[test]
    fn hours_per_day_scale_hour_types() {
        assert_eq!(
            quantity_for(Unit::Hours, 2, dec!(7.5)).unwrap(),
            Quantity::new(dec!(15.0))
        );
        assert_eq!(quantity_for(Unit::Days, 2, dec!(7.5)).unwrap(), Quantity::from(2));
    }

    #[test]
    fn oversized_hour_quantity_is_refused() {
        let err = quantity_for(Unit::Hours, 5, Decimal::MAX).unwrap_err();
        assert!(matches!(err, ValidationError::QuantityOutOfRange { chargeable_days: 5 }));

        let mut fixture = Fixture::new();
        fixture.config.hours_per_day = Decimal::MAX;
        let err = fixture
            .validate("sick", date(2025, 6, 2), date(2025, 6, 3))
            .unwrap_err();
        assert!(matches!(err, ValidationError::QuantityOutOfRange { .. }));
    }
}

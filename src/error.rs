use super::balance::BalanceKey;
use super::request::RequestState;
use super::types::{DateStamp, Quantity};
use super::workflow::Action;
use std::convert::Infallible;

/// Failures of the persistence layer itself.
#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("storage failure: {0}")]
    Storage(#[from] sled::Error),
    #[error("failed to decode stored record: {0}")]
    Decode(#[from] minicbor::decode::Error),
    #[error("failed to encode record: {0}")]
    Encode(#[from] minicbor::encode::Error<Infallible>),
}

/// A proposed request broke a business rule. Always recoverable by the caller.
#[derive(thiserror::Error, Debug)]
pub enum ValidationError {
    #[error("invalid range: end date {end} is before start date {start}")]
    InvalidRange { start: DateStamp, end: DateStamp },
    #[error("no chargeable days between {start} and {end}")]
    EmptyRange { start: DateStamp, end: DateStamp },
    #[error("no {leave_type_id} balance allocated to {employee_id} for {year}")]
    NoBalance {
        employee_id: String,
        leave_type_id: String,
        year: i32,
    },
    #[error("insufficient balance: need {requested}, have {available}")]
    InsufficientBalance {
        requested: Quantity,
        available: Quantity,
        shortfall: Quantity,
    },
    #[error("{kind} {id} is inactive")]
    InactiveEntity { kind: &'static str, id: String },
    #[error("unknown employee {0}")]
    UnknownEmployee(String),
    #[error("unknown leave type {0}")]
    UnknownLeaveType(String),
    #[error("request spans {requested} chargeable days, at most {max} allowed")]
    SpanTooLong { requested: u32, max: u32 },
    #[error("request starts {start}, the earliest allowed start is {earliest}")]
    NoticeTooShort { start: DateStamp, earliest: DateStamp },
    #[error("{year} balance expired on {expired_on}")]
    BalanceExpired { year: i32, expired_on: DateStamp },
    #[error("overlaps open request {code}")]
    Overlap { code: String },
    #[error("{chargeable_days} chargeable days do not fit in a ledger quantity")]
    QuantityOutOfRange { chargeable_days: u32 },
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// An attempted ledger mutation would break the ledger invariant.
#[derive(thiserror::Error, Debug)]
pub enum LedgerError {
    #[error("no balance for {0}; allocate one first")]
    BalanceNotFound(BalanceKey),
    #[error("{field} would go negative: {current} - {amount}")]
    NegativeBalance {
        field: &'static str,
        current: Quantity,
        amount: Quantity,
    },
    #[error("cannot set assigned to {requested}: {committed} already used or pending")]
    InsufficientCapacity {
        requested: Quantity,
        committed: Quantity,
    },
    #[error("insufficient balance: need {requested}, have {available}")]
    InsufficientBalance {
        requested: Quantity,
        available: Quantity,
    },
    #[error("ledger amounts must be positive, got {0}")]
    InvalidAmount(Quantity),
    #[error("{field} would overflow")]
    Overflow { field: &'static str },
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors returned by the workflow facade.
#[derive(thiserror::Error, Debug)]
pub enum WorkflowError {
    #[error(
        "cannot {action} a request in state {state} \
         (version {version}, caller saw {expected_version})"
    )]
    InvalidTransition {
        action: Action,
        state: RequestState,
        version: u64,
        expected_version: u64,
    },
    #[error("leave request {0} not found")]
    RequestNotFound(String),
    #[error("{actor} is not allowed to {operation}")]
    Forbidden { actor: String, operation: String },
    #[error("{0} requires a non-empty reason")]
    ReasonRequired(Action),
    #[error("could not allocate identifier: {0}")]
    Identifier(String),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Ledger(LedgerError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

// The in-transaction balance recheck reports the same rule the validator does,
// so callers only ever match one shape for it.
impl From<LedgerError> for WorkflowError {
    fn from(value: LedgerError) -> Self {
        match value {
            LedgerError::InsufficientBalance {
                requested,
                available,
            } => WorkflowError::Validation(ValidationError::InsufficientBalance {
                requested,
                available,
                shortfall: requested.saturating_sub(available),
            }),
            LedgerError::Store(e) => WorkflowError::Store(e),
            other => WorkflowError::Ledger(other),
        }
    }
}

macro_rules! store_conversions {
    ($($target:ty),+) => {$(
        impl From<sled::Error> for $target {
            fn from(value: sled::Error) -> Self {
                StoreError::from(value).into()
            }
        }
        impl From<minicbor::decode::Error> for $target {
            fn from(value: minicbor::decode::Error) -> Self {
                StoreError::from(value).into()
            }
        }
        impl From<minicbor::encode::Error<Infallible>> for $target {
            fn from(value: minicbor::encode::Error<Infallible>) -> Self {
                StoreError::from(value).into()
            }
        }
    )+};
}

store_conversions!(ValidationError, LedgerError, WorkflowError);

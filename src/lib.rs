pub mod balance;
pub mod calendar;
pub mod config;
pub mod directory;
pub mod error;
pub mod request;
pub mod service;
pub mod types;
pub mod utils;
pub mod validator;
pub mod workflow;

pub use balance::{Allocation, AllocationMode, BalanceKey, BalanceStore, LeaveBalance, LedgerOp};
pub use calendar::{BusinessCalendar, WeekendCalendar};
pub use config::LedgerConfig;
pub use directory::{Directory, EmployeeProfile, InMemoryDirectory, LeaveTypeConfig};
pub use error::{LedgerError, StoreError, ValidationError, WorkflowError};
pub use request::{LeaveRequest, RequestState, RequestStore};
pub use service::{AllocationTarget, LeaveService};
pub use types::{DateStamp, Quantity, TimeStamp, Unit};
pub use validator::ValidatedRequest;
pub use workflow::{Action, Actor, Capability, Transition};

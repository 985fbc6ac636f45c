//! Service layer API for leave workflow operations
use super::balance::{self, Allocation, BalanceKey, BalanceStore, LeaveBalance, LedgerOp};
use super::calendar::{BusinessCalendar, WeekendCalendar};
use super::config::LedgerConfig;
use super::directory::Directory;
use super::error::{ValidationError, WorkflowError};
use super::request::{LeaveRequest, RequestStore};
use super::types::{DepartmentId, EmployeeId, TimeStamp};
use super::utils::{aborted, new_uuid_to_bech32, settle};
use super::validator::{RequestValidator, ValidatedRequest};
use super::workflow::{Action, Actor, Transition};
use chrono::{NaiveDate, Utc};
use sled::Transactional;
use sled::transaction::ConflictableTransactionResult;
use std::sync::Arc;
use tracing::{info, warn};

type TxResult<T> = ConflictableTransactionResult<T, WorkflowError>;

/// Who an allocation applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllocationTarget {
    Employee(EmployeeId),
    Department(DepartmentId),
}

pub struct LeaveService {
    instance: Arc<sled::Db>,
    balances: BalanceStore,
    requests: RequestStore,
    directory: Arc<dyn Directory>,
    calendar: Arc<dyn BusinessCalendar>,
    config: LedgerConfig,
}

impl LeaveService {
    pub fn new(
        instance: Arc<sled::Db>,
        directory: Arc<dyn Directory>,
        config: LedgerConfig,
    ) -> Result<Self, WorkflowError> {
        let balances = BalanceStore::open(&instance)?;
        let requests = RequestStore::open(&instance)?;
        Ok(Self {
            instance,
            balances,
            requests,
            directory,
            calendar: Arc::new(WeekendCalendar),
            config,
        })
    }

    /// Open the database named by the configuration.
    pub fn open(config: LedgerConfig, directory: Arc<dyn Directory>) -> anyhow::Result<Self> {
        let db = Arc::new(config.open_db()?);
        Ok(Self::new(db, directory, config)?)
    }

    /// Replace the weekend-only calendar, e.g. with one that knows holidays.
    pub fn with_calendar(mut self, calendar: Arc<dyn BusinessCalendar>) -> Self {
        self.calendar = calendar;
        self
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    pub fn flush(&self) -> Result<(), WorkflowError> {
        self.instance.flush()?;
        Ok(())
    }

    fn validator(&self) -> RequestValidator<'_> {
        RequestValidator::new(
            self.directory.as_ref(),
            self.calendar.as_ref(),
            &self.balances,
            &self.requests,
            &self.config,
        )
    }

    fn today() -> NaiveDate {
        Utc::now().date_naive()
    }

    /// Check a request without creating it.
    pub fn validate_request(
        &self,
        employee_id: &str,
        leave_type_id: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<ValidatedRequest, ValidationError> {
        self.validator()
            .validate(employee_id, leave_type_id, start, end, Self::today())
    }

    /// Create a request in `pending` and reserve its quantity on the ledger.
    pub fn submit_request(
        &self,
        actor: &Actor,
        employee_id: &str,
        leave_type_id: &str,
        start: NaiveDate,
        end: NaiveDate,
        reason: Option<String>,
    ) -> Result<LeaveRequest, WorkflowError> {
        if !actor.may_submit_for(employee_id) {
            return Err(WorkflowError::Forbidden {
                actor: actor.id.clone(),
                operation: format!("submit leave for {employee_id}"),
            });
        }

        let validated = self
            .validate_request(employee_id, leave_type_id, start, end)
            .inspect_err(|e| warn!(employee_id, leave_type_id, error = %e, "submit refused"))?;

        let id =
            new_uuid_to_bech32("leave_").map_err(|e| WorkflowError::Identifier(e.to_string()))?;
        let draft = LeaveRequest::new(
            id,
            employee_id.to_string(),
            leave_type_id.to_string(),
            start.into(),
            end.into(),
            &validated,
            reason,
            actor.id.clone(),
        );
        let key = draft.balance_key();

        // Overlap and availability are re-checked against the committed rows.
        let trees = (
            self.balances.tree(),
            self.requests.requests(),
            self.requests.by_employee(),
            self.requests.counters(),
        );
        let result = trees.transaction(
            |(balances, requests, index, counters)| -> TxResult<LeaveRequest> {
                if !self.config.allow_overlap {
                    let clash = RequestStore::find_overlap_in::<WorkflowError>(
                        index,
                        requests,
                        employee_id,
                        draft.start_date,
                        draft.end_date,
                    )?;
                    if let Some(code) = clash {
                        return Err(aborted(ValidationError::Overlap { code }));
                    }
                }
                if validated.balance_tracked {
                    let reserve = LedgerOp::Reserve(validated.quantity);
                    balance::apply_in::<WorkflowError>(balances, &key, reserve)?;
                }
                let mut request = draft.clone();
                request.code =
                    RequestStore::next_code_in::<WorkflowError>(counters, validated.year)?;
                RequestStore::put_in::<WorkflowError>(requests, &request)?;
                RequestStore::index_in::<WorkflowError>(index, &request)?;
                Ok(request)
            },
        );

        let request = settle(result)
            .inspect_err(|e| warn!(employee_id, leave_type_id, error = %e, "submit refused"))?;

        info!(
            request_id = %request.id,
            code = %request.code,
            employee_id,
            leave_type_id,
            quantity = %request.quantity,
            "leave request submitted"
        );
        Ok(request)
    }

    /// Move a request along the workflow, applying its ledger effect in the
    /// same transaction as the state change.
    pub fn transition(
        &self,
        request_id: &str,
        action: Action,
        actor: &Actor,
        expected_version: u64,
        reason: Option<&str>,
    ) -> Result<LeaveRequest, WorkflowError> {
        let now = TimeStamp::new();

        let trees = (self.balances.tree(), self.requests.requests());
        let result = trees.transaction(|(balances, requests)| -> TxResult<LeaveRequest> {
            let Some(mut request) = RequestStore::load_in::<WorkflowError>(requests, request_id)?
            else {
                return Err(aborted(WorkflowError::RequestNotFound(request_id.to_string())));
            };

            let rule = Transition::guard(&request, action, expected_version)
                .map_err(aborted::<WorkflowError>)?;
            let employee = self.directory.employee(&request.employee_id);
            rule.authorize(actor, &request, employee.as_ref()).map_err(aborted::<WorkflowError>)?;
            rule.check_reason(reason).map_err(aborted::<WorkflowError>)?;

            if request.balance_tracked {
                if let Some(op) = rule.effect.op(request.quantity) {
                    balance::apply_in::<WorkflowError>(balances, &request.balance_key(), op)?;
                }
            }

            rule.apply(&mut request, actor, reason, now.clone());
            RequestStore::put_in::<WorkflowError>(requests, &request)?;
            Ok(request)
        });

        let request = settle(result).inspect_err(|e| {
            warn!(request_id, %action, actor = %actor.id, error = %e, "transition refused")
        })?;

        info!(
            request_id,
            code = %request.code,
            %action,
            actor = %actor.id,
            state = %request.state,
            version = request.version,
            "leave request transitioned"
        );
        Ok(request)
    }

    pub fn get_balance(
        &self,
        employee_id: &str,
        leave_type_id: &str,
        year: i32,
    ) -> Result<LeaveBalance, WorkflowError> {
        Ok(self
            .balances
            .require(&BalanceKey::new(employee_id, leave_type_id, year))?)
    }

    pub fn balances_for_employee(
        &self,
        employee_id: &str,
    ) -> Result<Vec<LeaveBalance>, WorkflowError> {
        Ok(self.balances.balances_for_employee(employee_id)?)
    }

    pub fn get_request(&self, request_id: &str) -> Result<LeaveRequest, WorkflowError> {
        self.requests
            .get(request_id)?
            .ok_or_else(|| WorkflowError::RequestNotFound(request_id.to_string()))
    }

    pub fn requests_for_employee(
        &self,
        employee_id: &str,
    ) -> Result<Vec<LeaveRequest>, WorkflowError> {
        Ok(self.requests.for_employee(employee_id)?)
    }

    /// Administrative allocation for one employee or a whole department.
    /// A department is allocated all-or-nothing; returns the number of rows written.
    pub fn allocate_balance(
        &self,
        actor: &Actor,
        target: &AllocationTarget,
        leave_type_id: &str,
        year: i32,
        allocation: &Allocation,
    ) -> Result<usize, WorkflowError> {
        if !actor.may_allocate() {
            return Err(WorkflowError::Forbidden {
                actor: actor.id.clone(),
                operation: format!("allocate {leave_type_id} balances"),
            });
        }

        if self.directory.leave_type(leave_type_id).is_none() {
            return Err(ValidationError::UnknownLeaveType(leave_type_id.to_string()).into());
        }

        let employees = match target {
            AllocationTarget::Employee(id) => {
                if self.directory.employee(id).is_none() {
                    return Err(ValidationError::UnknownEmployee(id.clone()).into());
                }
                vec![id.clone()]
            }
            AllocationTarget::Department(id) => self.directory.employees_in_department(id),
        };
        let keys: Vec<BalanceKey> = employees
            .iter()
            .map(|employee_id| BalanceKey::new(employee_id.as_str(), leave_type_id, year))
            .collect();

        let result = self.balances.tree().transaction(|tx| -> TxResult<usize> {
            for key in &keys {
                balance::allocate_in::<WorkflowError>(tx, key, allocation)?;
            }
            Ok(keys.len())
        });

        let affected = settle(result).inspect_err(|e| {
            warn!(?target, leave_type_id, year, actor = %actor.id, error = %e, "allocation refused")
        })?;

        info!(
            ?target,
            leave_type_id,
            year,
            affected,
            mode = ?allocation.mode,
            amount = %allocation.amount,
            actor = %actor.id,
            "balances allocated"
        );
        Ok(affected)
    }
}

//! The approval state machine
//!
//! Transitions are data: [`TRANSITIONS`] lists every legal (state, action)
//! pair together with who may perform it and what it does to the ledger.
//! [`Transition::guard`] is the single check run before any effect.
use super::balance::LedgerOp;
use super::directory::EmployeeProfile;
use super::error::WorkflowError;
use super::request::{LeaveRequest, RequestState};
use super::types::{DepartmentId, Quantity, TimeStamp};
use chrono::Utc;
use std::collections::HashSet;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    ApproveByManager,
    ApproveByHr,
    Reject,
    Cancel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    ApproveAsManager,
    ApproveAsHr,
    Reject,
    Allocate,
    Admin,
}

/// Who is acting, as reported by the surrounding permission system.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub id: String,
    pub department_id: Option<DepartmentId>,
    pub capabilities: HashSet<Capability>,
}

/// Which requests an actor holding the capability may touch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Anyone,
    SameDepartment,
    Owner,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerEffect {
    None,
    Commit,
    Release,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: RequestState,
    pub action: Action,
    pub to: RequestState,
    pub capability: Option<Capability>,
    pub scope: Scope,
    pub effect: LedgerEffect,
    pub reason_required: bool,
}

pub const TRANSITIONS: &[Transition] = &[
    Transition {
        from: RequestState::Pending,
        action: Action::ApproveByManager,
        to: RequestState::ManagerApproved,
        capability: Some(Capability::ApproveAsManager),
        scope: Scope::SameDepartment,
        effect: LedgerEffect::None,
        reason_required: false,
    },
    Transition {
        from: RequestState::ManagerApproved,
        action: Action::ApproveByHr,
        to: RequestState::Approved,
        capability: Some(Capability::ApproveAsHr),
        scope: Scope::Anyone,
        effect: LedgerEffect::Commit,
        reason_required: false,
    },
    Transition {
        from: RequestState::Pending,
        action: Action::Reject,
        to: RequestState::Rejected,
        capability: Some(Capability::Reject),
        scope: Scope::SameDepartment,
        effect: LedgerEffect::Release,
        reason_required: true,
    },
    Transition {
        from: RequestState::ManagerApproved,
        action: Action::Reject,
        to: RequestState::Rejected,
        capability: Some(Capability::Reject),
        scope: Scope::SameDepartment,
        effect: LedgerEffect::Release,
        reason_required: true,
    },
    Transition {
        from: RequestState::Pending,
        action: Action::Cancel,
        to: RequestState::Cancelled,
        capability: None,
        scope: Scope::Owner,
        effect: LedgerEffect::Release,
        reason_required: false,
    },
    Transition {
        from: RequestState::ManagerApproved,
        action: Action::Cancel,
        to: RequestState::Cancelled,
        capability: None,
        scope: Scope::Owner,
        effect: LedgerEffect::Release,
        reason_required: false,
    },
];

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Action::ApproveByManager => "approve as manager",
            Action::ApproveByHr => "approve as HR",
            Action::Reject => "reject",
            Action::Cancel => "cancel",
        };
        f.write_str(name)
    }
}

impl Actor {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            department_id: None,
            capabilities: HashSet::new(),
        }
    }
    pub fn in_department(mut self, department_id: impl Into<DepartmentId>) -> Self {
        self.department_id = Some(department_id.into());
        self
    }
    pub fn with(mut self, capability: Capability) -> Self {
        self.capabilities.insert(capability);
        self
    }
    pub fn has(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }

    /// Elevated actors bypass ownership and department scoping.
    pub fn is_elevated(&self) -> bool {
        self.has(Capability::Admin) || self.has(Capability::ApproveAsHr)
    }

    pub fn may_submit_for(&self, employee_id: &str) -> bool {
        self.id == employee_id || self.is_elevated()
    }

    pub fn may_allocate(&self) -> bool {
        self.has(Capability::Allocate) || self.has(Capability::Admin)
    }
}

impl LedgerEffect {
    pub fn op(self, quantity: Quantity) -> Option<LedgerOp> {
        match self {
            LedgerEffect::None => None,
            LedgerEffect::Commit => Some(LedgerOp::Commit(quantity)),
            LedgerEffect::Release => Some(LedgerOp::Release(quantity)),
        }
    }
}

impl Transition {
    pub fn lookup(state: RequestState, action: Action) -> Option<&'static Transition> {
        TRANSITIONS
            .iter()
            .find(|t| t.from == state && t.action == action)
    }

    /// Refuse unless the request is still at the version the caller saw and
    /// the table allows `action` from its current state.
    pub fn guard(
        request: &LeaveRequest,
        action: Action,
        expected_version: u64,
    ) -> Result<&'static Transition, WorkflowError> {
        let invalid = || WorkflowError::InvalidTransition {
            action,
            state: request.state,
            version: request.version,
            expected_version,
        };
        if request.version != expected_version {
            return Err(invalid());
        }
        Self::lookup(request.state, action).ok_or_else(invalid)
    }

    pub fn authorize(
        &self,
        actor: &Actor,
        request: &LeaveRequest,
        employee: Option<&EmployeeProfile>,
    ) -> Result<(), WorkflowError> {
        let has_capability = self.capability.is_none_or(|c| actor.has(c));
        let in_scope = actor.is_elevated()
            || match self.scope {
                Scope::Anyone => true,
                Scope::Owner => actor.id == request.employee_id,
                Scope::SameDepartment => match (&actor.department_id, employee) {
                    (Some(mine), Some(profile)) => profile.department_id.as_ref() == Some(mine),
                    _ => false,
                },
            };

        if has_capability && in_scope {
            Ok(())
        } else {
            Err(WorkflowError::Forbidden {
                actor: actor.id.clone(),
                operation: format!("{} request {}", self.action, request.code),
            })
        }
    }

    pub fn check_reason(&self, reason: Option<&str>) -> Result<(), WorkflowError> {
        let present = reason.is_some_and(|r| !r.trim().is_empty());
        if self.reason_required && !present {
            return Err(WorkflowError::ReasonRequired(self.action));
        }
        Ok(())
    }

    /// Move the request to the target state and stamp who did it.
    pub fn apply(
        &self,
        request: &mut LeaveRequest,
        actor: &Actor,
        reason: Option<&str>,
        now: TimeStamp<Utc>,
    ) {
        request.state = self.to;
        request.version += 1;
        request.updated_at = now.clone();

        let actor_id = Some(actor.id.clone());
        match self.action {
            Action::ApproveByManager => {
                request.manager_approver_id = actor_id;
                request.manager_approved_at = Some(now);
            }
            Action::ApproveByHr => {
                request.hr_approver_id = actor_id;
                request.hr_approved_at = Some(now);
            }
            Action::Reject => {
                request.rejected_by = actor_id;
                request.rejected_at = Some(now);
                request.rejection_reason = reason.map(|r| r.trim().to_string());
            }
            Action::Cancel => {
                request.cancelled_by = actor_id;
                request.cancelled_at = Some(now);
            }
        }
    }
}

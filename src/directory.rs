//! Lookups into the employee directory and leave type catalogue.
//!
//! Both live outside the ledger. The workflow only needs a department and an
//! active flag per employee, and a few capability flags per leave type.
use super::types::{DepartmentId, EmployeeId, LeaveTypeId, Unit};
use std::collections::HashMap;
use std::sync::RwLock;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmployeeProfile {
    pub id: EmployeeId,
    pub department_id: Option<DepartmentId>,
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaveTypeConfig {
    pub id: LeaveTypeId,
    pub active: bool,
    pub unit: Unit,
    /// Requests of untracked types never touch a balance.
    pub balance_tracked: bool,
}

pub trait Directory: Send + Sync {
    fn employee(&self, id: &str) -> Option<EmployeeProfile>;
    fn employees_in_department(&self, department_id: &str) -> Vec<EmployeeId>;
    fn leave_type(&self, id: &str) -> Option<LeaveTypeConfig>;
}

impl EmployeeProfile {
    pub fn new(id: impl Into<EmployeeId>, department_id: impl Into<DepartmentId>) -> Self {
        Self {
            id: id.into(),
            department_id: Some(department_id.into()),
            active: true,
        }
    }
    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }
}

impl LeaveTypeConfig {
    pub fn days(id: impl Into<LeaveTypeId>) -> Self {
        Self {
            id: id.into(),
            active: true,
            unit: Unit::Days,
            balance_tracked: true,
        }
    }
    pub fn hours(id: impl Into<LeaveTypeId>) -> Self {
        Self {
            unit: Unit::Hours,
            ..Self::days(id)
        }
    }
    pub fn untracked(mut self) -> Self {
        self.balance_tracked = false;
        self
    }
    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }
}

/// Directory held in memory, for embedding and tests.
#[derive(Debug, Default)]
pub struct InMemoryDirectory {
    employees: RwLock<HashMap<EmployeeId, EmployeeProfile>>,
    leave_types: RwLock<HashMap<LeaveTypeId, LeaveTypeConfig>>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert_employee(&self, profile: EmployeeProfile) {
        let mut employees = self.employees.write().unwrap_or_else(|e| e.into_inner());
        employees.insert(profile.id.clone(), profile);
    }

    pub fn upsert_leave_type(&self, leave_type: LeaveTypeConfig) {
        let mut leave_types = self.leave_types.write().unwrap_or_else(|e| e.into_inner());
        leave_types.insert(leave_type.id.clone(), leave_type);
    }
}

impl Directory for InMemoryDirectory {
    fn employee(&self, id: &str) -> Option<EmployeeProfile> {
        let employees = self.employees.read().unwrap_or_else(|e| e.into_inner());
        employees.get(id).cloned()
    }

    fn employees_in_department(&self, department_id: &str) -> Vec<EmployeeId> {
        let employees = self.employees.read().unwrap_or_else(|e| e.into_inner());
        let mut ids: Vec<EmployeeId> = employees
            .values()
            .filter(|p| p.department_id.as_deref() == Some(department_id))
            .map(|p| p.id.clone())
            .collect();
        ids.sort();
        ids
    }

    fn leave_type(&self, id: &str) -> Option<LeaveTypeConfig> {
        let leave_types = self.leave_types.read().unwrap_or_else(|e| e.into_inner());
        leave_types.get(id).cloned()
    }
}

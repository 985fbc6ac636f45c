//! The leave balance ledger
//!
//! One row per (employee, leave type, year) holding `assigned`, `used` and
//! `pending`. Every change to a row is expressed as a [`LedgerOp`] and applied
//! by [`LeaveBalance::apply`] inside a sled transaction, so the read, the
//! invariant check and the write happen as one serialisable unit.
use super::error::{LedgerError, StoreError};
use super::types::{DateStamp, EmployeeId, LeaveTypeId, Quantity, TimeStamp};
use super::utils::{aborted, settle};
use chrono::Utc;
use sled::transaction::{ConflictableTransactionResult, TransactionalTree};
use std::fmt;
use tracing::{debug, info};

pub const BALANCES_TREE: &str = "balances";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BalanceKey {
    pub employee_id: EmployeeId,
    pub leave_type_id: LeaveTypeId,
    pub year: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct LeaveBalance {
    #[n(0)]
    pub employee_id: EmployeeId,
    #[n(1)]
    pub leave_type_id: LeaveTypeId,
    #[n(2)]
    pub year: i32,
    #[n(3)]
    assigned: Quantity,
    #[n(4)]
    used: Quantity,
    #[n(5)]
    pending: Quantity,
    #[n(6)]
    pub expires_on: Option<DateStamp>,
    #[n(7)]
    pub notes: Option<String>,
    #[n(8)]
    pub updated_at: TimeStamp<Utc>,
}

/// The only ways a ledger row can change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerOp {
    /// Lock `amount` for an unresolved request, provided it is still available.
    Reserve(Quantity),
    /// Final approval: move `amount` from pending to used.
    Commit(Quantity),
    /// Rejection or cancellation: drop `amount` from pending.
    Release(Quantity),
    SetAssigned { value: Quantity, force: bool },
    AdjustAssigned { delta: Quantity, force: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocationMode {
    Replace,
    Add,
    Subtract,
}

/// An administrative allocation of entitlement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Allocation {
    pub amount: Quantity,
    pub mode: AllocationMode,
    /// Permit assigned to drop below what is already used or pending.
    pub force: bool,
    pub expires_on: Option<DateStamp>,
    pub notes: Option<String>,
}

impl BalanceKey {
    pub fn new(
        employee_id: impl Into<EmployeeId>,
        leave_type_id: impl Into<LeaveTypeId>,
        year: i32,
    ) -> Self {
        Self {
            employee_id: employee_id.into(),
            leave_type_id: leave_type_id.into(),
            year,
        }
    }

    // employee \0 leave type \0 year, so one employee's rows share a prefix
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut key = employee_prefix(&self.employee_id);
        key.extend_from_slice(self.leave_type_id.as_bytes());
        key.push(0);
        key.extend_from_slice(&self.year.to_be_bytes());
        key
    }
}

fn employee_prefix(employee_id: &str) -> Vec<u8> {
    let mut prefix = employee_id.as_bytes().to_vec();
    prefix.push(0);
    prefix
}

impl fmt::Display for BalanceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.employee_id, self.leave_type_id, self.year)
    }
}

impl LeaveBalance {
    pub fn new(key: &BalanceKey) -> Self {
        Self {
            employee_id: key.employee_id.clone(),
            leave_type_id: key.leave_type_id.clone(),
            year: key.year,
            assigned: Quantity::ZERO,
            used: Quantity::ZERO,
            pending: Quantity::ZERO,
            expires_on: None,
            notes: None,
            updated_at: TimeStamp::new(),
        }
    }

    pub fn key(&self) -> BalanceKey {
        BalanceKey::new(self.employee_id.clone(), self.leave_type_id.clone(), self.year)
    }
    pub fn assigned(&self) -> Quantity {
        self.assigned
    }
    pub fn used(&self) -> Quantity {
        self.used
    }
    pub fn pending(&self) -> Quantity {
        self.pending
    }
    pub fn available(&self) -> Quantity {
        self.assigned.saturating_sub(self.used).saturating_sub(self.pending)
    }

    /// `assigned >= used + pending` with no negative component.
    pub fn is_consistent(&self) -> bool {
        !self.used.is_negative()
            && !self.pending.is_negative()
            && self
                .used
                .checked_add(self.pending)
                .is_some_and(|committed| self.assigned >= committed)
    }

    /// Apply one mutation. On error the row is left untouched.
    pub fn apply(&mut self, op: LedgerOp) -> Result<(), LedgerError> {
        match op {
            LedgerOp::Reserve(amount) => {
                require_positive(amount)?;
                let available = self.available();
                if amount > available {
                    return Err(LedgerError::InsufficientBalance {
                        requested: amount,
                        available,
                    });
                }
                self.pending = checked(self.pending.checked_add(amount), "pending")?;
            }
            LedgerOp::Commit(amount) => {
                let used = checked(self.used.checked_add(amount), "used")?;
                self.take_pending(amount)?;
                self.used = used;
            }
            LedgerOp::Release(amount) => {
                self.take_pending(amount)?;
            }
            LedgerOp::SetAssigned { value, force } => self.reassign(value, force)?,
            LedgerOp::AdjustAssigned { delta, force } => {
                let value = checked(self.assigned.checked_add(delta), "assigned")?;
                self.reassign(value, force)?
            }
        }
        Ok(())
    }

    fn take_pending(&mut self, amount: Quantity) -> Result<(), LedgerError> {
        require_positive(amount)?;
        if amount > self.pending {
            return Err(LedgerError::NegativeBalance {
                field: "pending",
                current: self.pending,
                amount,
            });
        }
        self.pending = checked(self.pending.checked_sub(amount), "pending")?;
        Ok(())
    }

    fn reassign(&mut self, value: Quantity, force: bool) -> Result<(), LedgerError> {
        if value.is_negative() {
            return Err(LedgerError::NegativeBalance {
                field: "assigned",
                current: self.assigned,
                amount: self.assigned.saturating_sub(value),
            });
        }
        let committed = checked(self.used.checked_add(self.pending), "committed")?;
        if value < committed && !force {
            return Err(LedgerError::InsufficientCapacity {
                requested: value,
                committed,
            });
        }
        self.assigned = value;
        Ok(())
    }
}

fn checked(value: Option<Quantity>, field: &'static str) -> Result<Quantity, LedgerError> {
    value.ok_or(LedgerError::Overflow { field })
}

fn require_positive(amount: Quantity) -> Result<(), LedgerError> {
    if amount.is_positive() {
        Ok(())
    } else {
        Err(LedgerError::InvalidAmount(amount))
    }
}

impl Allocation {
    pub fn new(amount: Quantity, mode: AllocationMode) -> Self {
        Self {
            amount,
            mode,
            force: false,
            expires_on: None,
            notes: None,
        }
    }
    pub fn forced(mut self) -> Self {
        self.force = true;
        self
    }
    pub fn expiring(mut self, expires_on: DateStamp) -> Self {
        self.expires_on = Some(expires_on);
        self
    }
    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    fn op(&self) -> Result<LedgerOp, LedgerError> {
        if self.amount.is_negative() {
            return Err(LedgerError::InvalidAmount(self.amount));
        }
        let force = self.force;
        Ok(match self.mode {
            AllocationMode::Replace => LedgerOp::SetAssigned {
                value: self.amount,
                force,
            },
            AllocationMode::Add => LedgerOp::AdjustAssigned {
                delta: self.amount,
                force,
            },
            AllocationMode::Subtract => LedgerOp::AdjustAssigned {
                delta: Quantity::new(-self.amount.as_decimal()),
                force,
            },
        })
    }
}

/// Read a row inside a transaction.
pub(crate) fn load_in<E>(
    tx: &TransactionalTree,
    key: &BalanceKey,
) -> ConflictableTransactionResult<Option<LeaveBalance>, E>
where
    E: From<LedgerError>,
{
    match tx.get(key.to_bytes())? {
        Some(raw) => {
            let balance = minicbor::decode(&raw)
                .map_err(|e| aborted::<E>(LedgerError::from(StoreError::from(e))))?;
            Ok(Some(balance))
        }
        None => Ok(None),
    }
}

fn put_in<E>(
    tx: &TransactionalTree,
    balance: &mut LeaveBalance,
) -> ConflictableTransactionResult<(), E>
where
    E: From<LedgerError>,
{
    balance.updated_at = TimeStamp::new();
    let bytes = minicbor::to_vec(&*balance)
        .map_err(|e| aborted::<E>(LedgerError::from(StoreError::from(e))))?;
    tx.insert(balance.key().to_bytes(), bytes)?;
    Ok(())
}

/// Apply `op` to an existing row inside a transaction, failing the whole
/// transaction if the row is missing or the op would break the invariant.
pub(crate) fn apply_in<E>(
    tx: &TransactionalTree,
    key: &BalanceKey,
    op: LedgerOp,
) -> ConflictableTransactionResult<LeaveBalance, E>
where
    E: From<LedgerError>,
{
    let Some(mut balance) = load_in::<E>(tx, key)? else {
        return Err(aborted::<E>(LedgerError::BalanceNotFound(key.clone())));
    };
    balance.apply(op).map_err(aborted::<E>)?;
    put_in::<E>(tx, &mut balance)?;
    Ok(balance)
}

/// Create-or-update a row for an administrative allocation.
pub(crate) fn allocate_in<E>(
    tx: &TransactionalTree,
    key: &BalanceKey,
    allocation: &Allocation,
) -> ConflictableTransactionResult<LeaveBalance, E>
where
    E: From<LedgerError>,
{
    let op = allocation.op().map_err(aborted::<E>)?;
    let mut balance = match load_in::<E>(tx, key)? {
        Some(balance) => balance,
        None if allocation.mode == AllocationMode::Subtract => {
            return Err(aborted::<E>(LedgerError::BalanceNotFound(key.clone())));
        }
        None => LeaveBalance::new(key),
    };
    balance.apply(op).map_err(aborted::<E>)?;
    if allocation.expires_on.is_some() {
        balance.expires_on = allocation.expires_on;
    }
    if allocation.notes.is_some() {
        balance.notes = allocation.notes.clone();
    }
    put_in::<E>(tx, &mut balance)?;
    Ok(balance)
}

#[derive(Clone)]
pub struct BalanceStore {
    tree: sled::Tree,
}

impl BalanceStore {
    pub fn open(db: &sled::Db) -> Result<Self, LedgerError> {
        Ok(Self {
            tree: db.open_tree(BALANCES_TREE)?,
        })
    }

    pub(crate) fn tree(&self) -> &sled::Tree {
        &self.tree
    }

    pub fn get(&self, key: &BalanceKey) -> Result<Option<LeaveBalance>, StoreError> {
        debug!(%key, "reading balance");
        match self.tree.get(key.to_bytes())? {
            Some(raw) => Ok(Some(minicbor::decode(&raw)?)),
            None => Ok(None),
        }
    }

    pub fn require(&self, key: &BalanceKey) -> Result<LeaveBalance, LedgerError> {
        self.get(key)?
            .ok_or_else(|| LedgerError::BalanceNotFound(key.clone()))
    }

    /// Every row of one employee, ordered by leave type then year.
    pub fn balances_for_employee(
        &self,
        employee_id: &str,
    ) -> Result<Vec<LeaveBalance>, StoreError> {
        self.tree
            .scan_prefix(employee_prefix(employee_id))
            .map(|entry| -> Result<LeaveBalance, StoreError> {
                let (_, raw) = entry?;
                Ok(minicbor::decode(&raw)?)
            })
            .collect()
    }

    pub fn increment_pending(
        &self,
        key: &BalanceKey,
        amount: Quantity,
    ) -> Result<LeaveBalance, LedgerError> {
        self.mutate(key, LedgerOp::Reserve(amount))
    }

    pub fn move_pending_to_used(
        &self,
        key: &BalanceKey,
        amount: Quantity,
    ) -> Result<LeaveBalance, LedgerError> {
        self.mutate(key, LedgerOp::Commit(amount))
    }

    pub fn release_pending(
        &self,
        key: &BalanceKey,
        amount: Quantity,
    ) -> Result<LeaveBalance, LedgerError> {
        self.mutate(key, LedgerOp::Release(amount))
    }

    pub fn set_assigned(
        &self,
        key: &BalanceKey,
        value: Quantity,
        force: bool,
    ) -> Result<LeaveBalance, LedgerError> {
        self.mutate(key, LedgerOp::SetAssigned { value, force })
    }

    pub fn adjust_assigned(
        &self,
        key: &BalanceKey,
        delta: Quantity,
        force: bool,
    ) -> Result<LeaveBalance, LedgerError> {
        self.mutate(key, LedgerOp::AdjustAssigned { delta, force })
    }

    pub fn allocate(
        &self,
        key: &BalanceKey,
        allocation: &Allocation,
    ) -> Result<LeaveBalance, LedgerError> {
        let balance = settle(
            self.tree
                .transaction(|tx| allocate_in::<LedgerError>(tx, key, allocation)),
        )?;
        info!(%key, assigned = %balance.assigned(), mode = ?allocation.mode, "balance allocated");
        Ok(balance)
    }

    fn mutate(&self, key: &BalanceKey, op: LedgerOp) -> Result<LeaveBalance, LedgerError> {
        let balance = settle(self.tree.transaction(|tx| apply_in::<LedgerError>(tx, key, op)))?;
        info!(
            %key,
            ?op,
            assigned = %balance.assigned(),
            used = %balance.used(),
            pending = %balance.pending(),
            "ledger updated"
        );
        Ok(balance)
    }
}

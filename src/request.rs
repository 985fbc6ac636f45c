//! Leave request records and their storage
use super::balance::BalanceKey;
use super::error::StoreError;
use super::types::{DateStamp, EmployeeId, LeaveTypeId, Quantity, RequestId, TimeStamp, Unit};
use super::utils::{aborted, request_code};
use super::validator::ValidatedRequest;
use chrono::Utc;
use sled::transaction::{ConflictableTransactionResult, TransactionalTree};
use std::fmt;

pub const REQUESTS_TREE: &str = "requests";
pub const EMPLOYEE_INDEX_TREE: &str = "requests_by_employee";
pub const COUNTERS_TREE: &str = "counters";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, minicbor::Encode, minicbor::Decode)]
pub enum RequestState {
    #[n(0)]
    Pending,
    #[n(1)]
    ManagerApproved,
    #[n(2)]
    Approved,
    #[n(3)]
    Rejected,
    #[n(4)]
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct LeaveRequest {
    #[n(0)]
    pub id: RequestId,
    #[n(1)]
    pub code: String, // year + per-year sequence, assigned on submit
    #[n(2)]
    pub employee_id: EmployeeId,
    #[n(3)]
    pub leave_type_id: LeaveTypeId,
    #[n(4)]
    pub start_date: DateStamp,
    #[n(5)]
    pub end_date: DateStamp,
    #[n(6)]
    pub chargeable_days: u32,
    #[n(7)]
    pub quantity: Quantity,
    #[n(8)]
    pub unit: Unit,
    #[n(9)]
    pub balance_tracked: bool, // whether submit reserved the quantity
    #[n(10)]
    pub reason: Option<String>,
    #[n(11)]
    pub state: RequestState,
    #[n(12)]
    pub version: u64,
    #[n(13)]
    pub submitted_by: String,
    #[n(14)]
    pub submitted_at: TimeStamp<Utc>,
    #[n(15)]
    pub manager_approver_id: Option<String>,
    #[n(16)]
    pub manager_approved_at: Option<TimeStamp<Utc>>,
    #[n(17)]
    pub hr_approver_id: Option<String>,
    #[n(18)]
    pub hr_approved_at: Option<TimeStamp<Utc>>,
    #[n(19)]
    pub rejected_by: Option<String>,
    #[n(20)]
    pub rejected_at: Option<TimeStamp<Utc>>,
    #[n(21)]
    pub rejection_reason: Option<String>,
    #[n(22)]
    pub cancelled_by: Option<String>,
    #[n(23)]
    pub cancelled_at: Option<TimeStamp<Utc>>,
    #[n(24)]
    pub updated_at: TimeStamp<Utc>,
}

impl RequestState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RequestState::Approved | RequestState::Rejected | RequestState::Cancelled
        )
    }
}

impl fmt::Display for RequestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RequestState::Pending => "pending",
            RequestState::ManagerApproved => "manager_approved",
            RequestState::Approved => "approved",
            RequestState::Rejected => "rejected",
            RequestState::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

impl LeaveRequest {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: RequestId,
        employee_id: EmployeeId,
        leave_type_id: LeaveTypeId,
        start_date: DateStamp,
        end_date: DateStamp,
        validated: &ValidatedRequest,
        reason: Option<String>,
        submitted_by: String,
    ) -> Self {
        let now = TimeStamp::new();
        Self {
            id,
            code: String::new(),
            employee_id,
            leave_type_id,
            start_date,
            end_date,
            chargeable_days: validated.chargeable_days,
            quantity: validated.quantity,
            unit: validated.unit,
            balance_tracked: validated.balance_tracked,
            reason,
            state: RequestState::Pending,
            version: 1,
            submitted_by,
            submitted_at: now.clone(),
            manager_approver_id: None,
            manager_approved_at: None,
            hr_approver_id: None,
            hr_approved_at: None,
            rejected_by: None,
            rejected_at: None,
            rejection_reason: None,
            cancelled_by: None,
            cancelled_at: None,
            updated_at: now,
        }
    }

    /// Requests are charged to the year they start in.
    pub fn year(&self) -> i32 {
        self.start_date.year()
    }

    pub fn balance_key(&self) -> BalanceKey {
        BalanceKey::new(self.employee_id.clone(), self.leave_type_id.clone(), self.year())
    }

    pub fn overlaps(&self, start: DateStamp, end: DateStamp) -> bool {
        self.start_date <= end && start <= self.end_date
    }
}

// One entry per employee holding the ids of all their requests, so a
// transaction can read the full list with a single point lookup.
#[derive(Debug, Default, minicbor::Encode, minicbor::Decode)]
struct EmployeeIndex {
    #[n(0)]
    request_ids: Vec<RequestId>,
}

fn decode_index(raw: Option<sled::IVec>) -> Result<EmployeeIndex, StoreError> {
    match raw {
        Some(raw) => Ok(minicbor::decode(&raw)?),
        None => Ok(EmployeeIndex::default()),
    }
}

fn counter_key(year: i32) -> Vec<u8> {
    format!("request_code/{year}").into_bytes()
}

#[derive(Clone)]
pub struct RequestStore {
    requests: sled::Tree,
    by_employee: sled::Tree,
    counters: sled::Tree,
}

impl RequestStore {
    pub fn open(db: &sled::Db) -> Result<Self, StoreError> {
        Ok(Self {
            requests: db.open_tree(REQUESTS_TREE)?,
            by_employee: db.open_tree(EMPLOYEE_INDEX_TREE)?,
            counters: db.open_tree(COUNTERS_TREE)?,
        })
    }

    pub(crate) fn requests(&self) -> &sled::Tree {
        &self.requests
    }
    pub(crate) fn by_employee(&self) -> &sled::Tree {
        &self.by_employee
    }
    pub(crate) fn counters(&self) -> &sled::Tree {
        &self.counters
    }

    pub fn get(&self, id: &str) -> Result<Option<LeaveRequest>, StoreError> {
        match self.requests.get(id.as_bytes())? {
            Some(raw) => Ok(Some(minicbor::decode(&raw)?)),
            None => Ok(None),
        }
    }

    /// All requests of one employee, oldest first.
    pub fn for_employee(&self, employee_id: &str) -> Result<Vec<LeaveRequest>, StoreError> {
        let index = decode_index(self.by_employee.get(employee_id.as_bytes())?)?;

        let mut requests = Vec::new();
        for request_id in &index.request_ids {
            if let Some(raw) = self.requests.get(request_id.as_bytes())? {
                requests.push(minicbor::decode(&raw)?);
            }
        }
        requests.sort_by(|a: &LeaveRequest, b| a.submitted_at.cmp(&b.submitted_at));
        Ok(requests)
    }

    pub(crate) fn load_in<E>(
        tx: &TransactionalTree,
        id: &str,
    ) -> ConflictableTransactionResult<Option<LeaveRequest>, E>
    where
        E: From<StoreError>,
    {
        match tx.get(id.as_bytes())? {
            Some(raw) => {
                let request =
                    minicbor::decode(&raw).map_err(|e| aborted::<E>(StoreError::from(e)))?;
                Ok(Some(request))
            }
            None => Ok(None),
        }
    }

    pub(crate) fn put_in<E>(
        tx: &TransactionalTree,
        request: &LeaveRequest,
    ) -> ConflictableTransactionResult<(), E>
    where
        E: From<StoreError>,
    {
        let bytes = minicbor::to_vec(request).map_err(|e| aborted::<E>(StoreError::from(e)))?;
        tx.insert(request.id.as_bytes(), bytes)?;
        Ok(())
    }

    pub(crate) fn index_in<E>(
        tx: &TransactionalTree,
        request: &LeaveRequest,
    ) -> ConflictableTransactionResult<(), E>
    where
        E: From<StoreError>,
    {
        let key = request.employee_id.as_bytes();
        let mut index = decode_index(tx.get(key)?).map_err(aborted::<E>)?;
        index.request_ids.push(request.id.clone());

        let bytes = minicbor::to_vec(&index).map_err(|e| aborted::<E>(StoreError::from(e)))?;
        tx.insert(key, bytes)?;
        Ok(())
    }

    /// The code of an open request of `employee_id` overlapping `start..=end`,
    /// read through the index and request trees of the running transaction.
    pub(crate) fn find_overlap_in<E>(
        index: &TransactionalTree,
        requests: &TransactionalTree,
        employee_id: &str,
        start: DateStamp,
        end: DateStamp,
    ) -> ConflictableTransactionResult<Option<String>, E>
    where
        E: From<StoreError>,
    {
        let entry = decode_index(index.get(employee_id.as_bytes())?).map_err(aborted::<E>)?;
        for request_id in &entry.request_ids {
            if let Some(request) = Self::load_in::<E>(requests, request_id)? {
                if !request.state.is_terminal() && request.overlaps(start, end) {
                    return Ok(Some(request.code));
                }
            }
        }
        Ok(None)
    }

    /// Allocate the next code for `year`; the counter lives in the same transaction.
    pub(crate) fn next_code_in<E>(
        tx: &TransactionalTree,
        year: i32,
    ) -> ConflictableTransactionResult<String, E>
    where
        E: From<StoreError>,
    {
        let key = counter_key(year);
        let current = match tx.get(&key)? {
            Some(raw) => <[u8; 8]>::try_from(raw.as_ref())
                .map(u64::from_be_bytes)
                .map_err(|_| {
                    let message = format!("request code counter for {year} is not 8 bytes");
                    aborted::<E>(StoreError::from(minicbor::decode::Error::message(message)))
                })?,
            None => 0,
        };
        let next = current + 1;
        tx.insert(key, next.to_be_bytes().to_vec())?;
        Ok(request_code(year, next))
    }
}

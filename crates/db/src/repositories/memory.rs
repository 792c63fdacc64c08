use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::NaiveDate;
use tokio::sync::RwLock;

use leaveflow_core::domain::employee::{Department, Employee, EmployeeId};
use leaveflow_core::domain::leave_request::{LeaveRequest, LeaveRequestId, LeaveStatus};
use leaveflow_core::domain::leave_type::{LeaveType, LeaveTypeCode};
use leaveflow_core::ledger::{LeavePeriod, QuotaKey, QuotaRecord, Reservation, ReservationId};
use leaveflow_core::workflow::{ChangeSet, ConflictKind, Directory, LeaveStore, StoreError};

use super::{DirectoryRepository, RepositoryError};

#[derive(Default)]
struct MemoryState {
    departments: HashMap<String, Department>,
    employees: HashMap<String, Employee>,
    leave_types: HashMap<String, LeaveType>,
    requests: HashMap<String, LeaveRequest>,
    quotas: HashMap<QuotaKey, QuotaRecord>,
    reservations: HashMap<String, Reservation>,
}

/// Store with the same write semantics as the SQLite one: versioned rows, overlap detection
/// and an append-only decision log, applied all-or-nothing under one write lock.
#[derive(Default)]
pub struct InMemoryLeaveStore {
    state: RwLock<MemoryState>,
    fail_writes: AtomicBool,
}

impl InMemoryLeaveStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every following `apply` fail with a backend error until switched off again.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn sorted(mut requests: Vec<LeaveRequest>) -> Vec<LeaveRequest> {
        requests.sort_by(|a, b| {
            a.range.start().cmp(&b.range.start()).then(a.created_at.cmp(&b.created_at))
        });
        requests
    }
}

fn check_quota(state: &MemoryState, changes: &ChangeSet) -> Result<(), StoreError> {
    let Some(write) = &changes.quota else {
        return Ok(());
    };
    let key = &write.value.key;
    let current = state.quotas.get(key).map(|quota| quota.version).unwrap_or(0);
    if current != write.expected_version {
        return Err(StoreError::Conflict(ConflictKind::Quota { key: key.clone() }));
    }
    Ok(())
}

fn check_request(state: &MemoryState, changes: &ChangeSet) -> Result<(), StoreError> {
    let Some(write) = &changes.request else {
        return Ok(());
    };
    let request = &write.value;
    let stored = state.requests.get(&request.id.0);
    let actual = stored.map(|stored| stored.version).unwrap_or(0);
    if actual != write.expected_version {
        return Err(StoreError::Conflict(ConflictKind::Request { id: request.id.clone(), actual }));
    }

    if let Some(stored) = stored {
        let kept = stored.decisions().len() <= request.decisions().len()
            && stored.decisions().iter().zip(request.decisions()).all(|(old, new)| old == new);
        if !kept {
            return Err(StoreError::Backend(format!(
                "decision log of {} is append-only",
                request.id
            )));
        }
    }

    if request.status.blocks_calendar() {
        let conflicting = state.requests.values().find(|other| {
            other.employee_id == request.employee_id
                && other.id != request.id
                && other.status.blocks_calendar()
                && other.range.overlaps(&request.range)
        });
        if let Some(conflicting) = conflicting {
            return Err(StoreError::Conflict(ConflictKind::Overlap {
                request_id: request.id.clone(),
                conflicting: conflicting.id.clone(),
            }));
        }
    }
    Ok(())
}

#[async_trait]
impl Directory for InMemoryLeaveStore {
    async fn employee(&self, id: &EmployeeId) -> Result<Option<Employee>, StoreError> {
        let state = self.state.read().await;
        Ok(state.employees.get(&id.0).cloned())
    }

    async fn leave_type(&self, code: &LeaveTypeCode) -> Result<Option<LeaveType>, StoreError> {
        let state = self.state.read().await;
        Ok(state.leave_types.get(&code.0).cloned())
    }

    async fn leave_types(&self) -> Result<Vec<LeaveType>, StoreError> {
        let state = self.state.read().await;
        let mut leave_types: Vec<LeaveType> = state.leave_types.values().cloned().collect();
        leave_types.sort_by(|a, b| a.code.cmp(&b.code));
        Ok(leave_types)
    }

    async fn departments(&self) -> Result<Vec<Department>, StoreError> {
        let state = self.state.read().await;
        let mut departments: Vec<Department> = state.departments.values().cloned().collect();
        departments.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(departments)
    }
}

#[async_trait]
impl DirectoryRepository for InMemoryLeaveStore {
    async fn save_department(&self, department: Department) -> Result<(), RepositoryError> {
        let mut state = self.state.write().await;
        state.departments.insert(department.id.0.clone(), department);
        Ok(())
    }

    async fn save_employee(&self, employee: Employee) -> Result<(), RepositoryError> {
        let mut state = self.state.write().await;
        state.employees.insert(employee.id.0.clone(), employee);
        Ok(())
    }

    async fn save_leave_type(&self, leave_type: LeaveType) -> Result<(), RepositoryError> {
        let mut state = self.state.write().await;
        state.leave_types.insert(leave_type.code.0.clone(), leave_type);
        Ok(())
    }
}

#[async_trait]
impl LeaveStore for InMemoryLeaveStore {
    async fn request(&self, id: &LeaveRequestId) -> Result<Option<LeaveRequest>, StoreError> {
        let state = self.state.read().await;
        Ok(state.requests.get(&id.0).cloned())
    }

    async fn requests_for_employee(
        &self,
        employee_id: &EmployeeId,
    ) -> Result<Vec<LeaveRequest>, StoreError> {
        let state = self.state.read().await;
        let requests = state
            .requests
            .values()
            .filter(|request| request.employee_id == *employee_id)
            .cloned()
            .collect();
        Ok(Self::sorted(requests))
    }

    async fn pending_for_approver(
        &self,
        approver: &EmployeeId,
    ) -> Result<Vec<LeaveRequest>, StoreError> {
        let state = self.state.read().await;
        let requests = state
            .requests
            .values()
            .filter(|request| {
                request.current_step().and_then(|step| step.assigned_to.as_ref())
                    == Some(approver)
            })
            .cloned()
            .collect();
        Ok(Self::sorted(requests))
    }

    async fn approved_starting_between(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<LeaveRequest>, StoreError> {
        let state = self.state.read().await;
        let requests = state
            .requests
            .values()
            .filter(|request| {
                request.status == LeaveStatus::Approved
                    && (from..=to).contains(&request.range.start())
            })
            .cloned()
            .collect();
        Ok(Self::sorted(requests))
    }

    async fn approved_overlapping(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<LeaveRequest>, StoreError> {
        let state = self.state.read().await;
        let requests = state
            .requests
            .values()
            .filter(|request| {
                request.status == LeaveStatus::Approved
                    && request.range.start() <= to
                    && from <= request.range.end()
            })
            .cloned()
            .collect();
        Ok(Self::sorted(requests))
    }

    async fn quota(&self, key: &QuotaKey) -> Result<Option<QuotaRecord>, StoreError> {
        let state = self.state.read().await;
        Ok(state.quotas.get(key).cloned())
    }

    async fn quotas_for_employee(
        &self,
        employee_id: &EmployeeId,
        period: LeavePeriod,
    ) -> Result<Vec<QuotaRecord>, StoreError> {
        let state = self.state.read().await;
        let mut quotas: Vec<QuotaRecord> = state
            .quotas
            .values()
            .filter(|quota| quota.key.employee_id == *employee_id && quota.key.period == period)
            .cloned()
            .collect();
        quotas.sort_by(|a, b| a.key.leave_type.cmp(&b.key.leave_type));
        Ok(quotas)
    }

    async fn reservation(&self, id: &ReservationId) -> Result<Option<Reservation>, StoreError> {
        let state = self.state.read().await;
        Ok(state.reservations.get(&id.0).cloned())
    }

    async fn apply(&self, changes: ChangeSet) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("in-memory store is refusing writes".to_string()));
        }

        let mut state = self.state.write().await;
        check_quota(&state, &changes)?;
        check_request(&state, &changes)?;

        if let Some(write) = changes.quota {
            state.quotas.insert(write.value.key.clone(), write.value);
        }
        if let Some(write) = changes.request {
            state.requests.insert(write.value.id.0.clone(), write.value);
        }
        if let Some(reservation) = changes.reservation {
            state.reservations.insert(reservation.id.0.clone(), reservation);
        }
        Ok(())
    }
}

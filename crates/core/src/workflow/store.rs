//! Storage ports the workflow service is written against.

use async_trait::async_trait;
use chrono::NaiveDate;
use thiserror::Error;

use crate::domain::employee::{Department, Employee, EmployeeId};
use crate::domain::leave_request::{LeaveRequest, LeaveRequestId};
use crate::domain::leave_type::{LeaveType, LeaveTypeCode};
use crate::errors::ApplicationError;
use crate::ledger::{LeavePeriod, QuotaKey, QuotaRecord, Reservation, ReservationId};
use crate::workflow::machine::Transition;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConflictKind {
    /// The request row no longer has the expected version.
    Request { id: LeaveRequestId, actual: u32 },
    /// The quota row was written by someone else since it was read.
    Quota { key: QuotaKey },
    /// Another pending or approved request of the employee covers the same days.
    Overlap { request_id: LeaveRequestId, conflicting: LeaveRequestId },
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("write conflict: {0:?}")]
    Conflict(ConflictKind),
    #[error("storage backend failure: {0}")]
    Backend(String),
}

impl From<StoreError> for ApplicationError {
    fn from(error: StoreError) -> Self {
        ApplicationError::Persistence(error.to_string())
    }
}

/// A row together with the version it must still have in storage. Zero means the row must not
/// exist yet.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VersionedWrite<T> {
    pub value: T,
    pub expected_version: u32,
}

/// Everything one workflow operation writes. Stores apply it all-or-nothing.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChangeSet {
    pub request: Option<VersionedWrite<LeaveRequest>>,
    pub quota: Option<VersionedWrite<QuotaRecord>>,
    pub reservation: Option<Reservation>,
}

impl ChangeSet {
    pub fn from_transition(
        transition: &Transition,
        request_version: u32,
        quota_version: u32,
    ) -> Self {
        Self {
            request: Some(VersionedWrite {
                value: transition.request.clone(),
                expected_version: request_version,
            }),
            quota: transition
                .quota
                .clone()
                .map(|value| VersionedWrite { value, expected_version: quota_version }),
            reservation: transition.reservation.clone(),
        }
    }

    pub fn quota_only(quota: QuotaRecord, expected_version: u32) -> Self {
        Self {
            request: None,
            quota: Some(VersionedWrite { value: quota, expected_version }),
            reservation: None,
        }
    }
}

#[async_trait]
pub trait Directory: Send + Sync {
    async fn employee(&self, id: &EmployeeId) -> Result<Option<Employee>, StoreError>;
    async fn leave_type(&self, code: &LeaveTypeCode) -> Result<Option<LeaveType>, StoreError>;
    async fn leave_types(&self) -> Result<Vec<LeaveType>, StoreError>;
    async fn departments(&self) -> Result<Vec<Department>, StoreError>;
}

#[async_trait]
pub trait LeaveStore: Directory {
    async fn request(&self, id: &LeaveRequestId) -> Result<Option<LeaveRequest>, StoreError>;
    async fn requests_for_employee(
        &self,
        employee_id: &EmployeeId,
    ) -> Result<Vec<LeaveRequest>, StoreError>;
    /// Pending requests whose current step is assigned to `approver`.
    async fn pending_for_approver(
        &self,
        approver: &EmployeeId,
    ) -> Result<Vec<LeaveRequest>, StoreError>;
    /// Approved requests starting in `from..=to`.
    async fn approved_starting_between(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<LeaveRequest>, StoreError>;
    /// Approved requests with at least one day in `from..=to`.
    async fn approved_overlapping(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<LeaveRequest>, StoreError>;
    async fn quota(&self, key: &QuotaKey) -> Result<Option<QuotaRecord>, StoreError>;
    async fn quotas_for_employee(
        &self,
        employee_id: &EmployeeId,
        period: LeavePeriod,
    ) -> Result<Vec<QuotaRecord>, StoreError>;
    async fn reservation(&self, id: &ReservationId) -> Result<Option<Reservation>, StoreError>;
    async fn apply(&self, changes: ChangeSet) -> Result<(), StoreError>;
}

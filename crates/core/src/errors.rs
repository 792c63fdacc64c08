use chrono::NaiveDate;
use thiserror::Error;

use crate::domain::employee::{ApproverRole, DepartmentId, EmployeeId};
use crate::domain::leave_request::{LeaveRequestId, LeaveStatus};
use crate::ledger::{QuotaKey, ReservationId};

/// Workflow rejections. None of these are fatal; a failed operation leaves every entity as it
/// was before the call.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum LeaveError {
    #[error("insufficient quota for {key}: requested {requested} day(s), {available} available")]
    InsufficientQuota { key: QuotaKey, requested: u32, available: u32 },
    #[error("request {request_id} overlaps existing request {conflicting}")]
    DateConflict { request_id: LeaveRequestId, conflicting: LeaveRequestId },
    #[error("{approver} acting as {role} may not decide request {request_id} at this step")]
    NotAuthorizedApprover { request_id: LeaveRequestId, approver: EmployeeId, role: ApproverRole },
    #[error("{actor} does not own request {request_id}")]
    NotRequestOwner { request_id: LeaveRequestId, actor: EmployeeId },
    #[error("cannot {operation} request {request_id} in state {status}")]
    InvalidTransition { request_id: LeaveRequestId, status: LeaveStatus, operation: &'static str },
    #[error("reservation {0} is unknown or already settled")]
    UnknownReservation(ReservationId),
    #[error(
        "no {role} approver configured for department {}",
        department.as_ref().map(|id| id.0.as_str()).unwrap_or("<unassigned>")
    )]
    NoApproverConfigured { department: Option<DepartmentId>, role: ApproverRole },
    #[error("request {request_id} changed since it was loaded (version {expected}, now {actual})")]
    StaleState { request_id: LeaveRequestId, expected: u32, actual: u32 },
    #[error("end date {end} is earlier than start date {start}")]
    InvalidDateRange { start: NaiveDate, end: NaiveDate },
    #[error("policy violation: {0}")]
    PolicyViolation(String),
    #[error("invalid quota adjustment for {key}: {reason}")]
    InvalidQuotaAdjustment { key: QuotaKey, reason: String },
    #[error("month {month} of {period} is not a valid reporting window")]
    InvalidReportWindow { period: i32, month: u32 },
}

impl LeaveError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::InsufficientQuota { .. } => "insufficient_quota",
            Self::DateConflict { .. } => "date_conflict",
            Self::NotAuthorizedApprover { .. } => "not_authorized_approver",
            Self::NotRequestOwner { .. } => "not_request_owner",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::UnknownReservation(_) => "unknown_reservation",
            Self::NoApproverConfigured { .. } => "no_approver_configured",
            Self::StaleState { .. } => "stale_state",
            Self::InvalidDateRange { .. } => "invalid_date_range",
            Self::PolicyViolation(_) => "policy_violation",
            Self::InvalidQuotaAdjustment { .. } => "invalid_quota_adjustment",
            Self::InvalidReportWindow { .. } => "invalid_report_window",
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error(transparent)]
    Domain(#[from] LeaveError),
    #[error("{entity} `{id}` not found")]
    NotFound { entity: &'static str, id: String },
    #[error("persistence failure: {0}")]
    Persistence(String),
    #[error("configuration failure: {0}")]
    Configuration(String),
}

impl ApplicationError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound { entity, id: id.to_string() }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::Domain(error) => error.code(),
            Self::NotFound { .. } => "not_found",
            Self::Persistence(_) => "persistence",
            Self::Configuration(_) => "configuration",
        }
    }

    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let mut mapped = InterfaceError::from(self);
        match &mut mapped {
            InterfaceError::BadRequest { correlation_id: id, .. }
            | InterfaceError::Forbidden { correlation_id: id, .. }
            | InterfaceError::NotFound { correlation_id: id, .. }
            | InterfaceError::Conflict { correlation_id: id, .. }
            | InterfaceError::ServiceUnavailable { correlation_id: id, .. }
            | InterfaceError::Internal { correlation_id: id, .. } => *id = correlation_id,
        }
        mapped
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("bad request: {message}")]
    BadRequest { code: &'static str, message: String, correlation_id: String },
    #[error("forbidden: {message}")]
    Forbidden { code: &'static str, message: String, correlation_id: String },
    #[error("not found: {message}")]
    NotFound { code: &'static str, message: String, correlation_id: String },
    #[error("conflict: {message}")]
    Conflict { code: &'static str, message: String, correlation_id: String },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { code: &'static str, message: String, correlation_id: String },
    #[error("internal error: {message}")]
    Internal { code: &'static str, message: String, correlation_id: String },
}

impl InterfaceError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::BadRequest { code, .. }
            | Self::Forbidden { code, .. }
            | Self::NotFound { code, .. }
            | Self::Conflict { code, .. }
            | Self::ServiceUnavailable { code, .. }
            | Self::Internal { code, .. } => code,
        }
    }

    /// Message safe to show to the caller. Internal failures never leak their details.
    pub fn user_message(&self) -> String {
        match self {
            Self::BadRequest { message, .. }
            | Self::Forbidden { message, .. }
            | Self::NotFound { message, .. }
            | Self::Conflict { message, .. } => message.clone(),
            Self::ServiceUnavailable { .. } => {
                "The service is temporarily unavailable. Please retry shortly.".to_string()
            }
            Self::Internal { .. } => "An unexpected internal error occurred.".to_string(),
        }
    }
}

impl From<ApplicationError> for InterfaceError {
    fn from(value: ApplicationError) -> Self {
        let code = value.code();
        let message = value.to_string();
        let correlation_id = "unassigned".to_owned();
        match value {
            ApplicationError::Domain(error) => match error {
                LeaveError::NotAuthorizedApprover { .. } | LeaveError::NotRequestOwner { .. } => {
                    Self::Forbidden { code, message, correlation_id }
                }
                LeaveError::InvalidTransition { .. }
                | LeaveError::StaleState { .. }
                | LeaveError::UnknownReservation(_)
                | LeaveError::DateConflict { .. } => {
                    Self::Conflict { code, message, correlation_id }
                }
                LeaveError::InsufficientQuota { .. }
                | LeaveError::NoApproverConfigured { .. }
                | LeaveError::InvalidDateRange { .. }
                | LeaveError::PolicyViolation(_)
                | LeaveError::InvalidQuotaAdjustment { .. }
                | LeaveError::InvalidReportWindow { .. } => {
                    Self::BadRequest { code, message, correlation_id }
                }
            },
            ApplicationError::NotFound { .. } => Self::NotFound { code, message, correlation_id },
            ApplicationError::Persistence(detail) => {
                Self::ServiceUnavailable { code, message: detail, correlation_id }
            }
            ApplicationError::Configuration(detail) => {
                Self::Internal { code, message: detail, correlation_id }
            }
        }
    }
}

pub mod approvals;
pub mod audit;
pub mod config;
pub mod domain;
pub mod errors;
pub mod ledger;
pub mod notify;
pub mod policy;
pub mod workflow;

pub use approvals::{authorize, ApprovalChainConfig, ApprovalChainResolver};
pub use audit::{AuditContext, AuditEvent, AuditSink, InMemoryAuditSink, TracingAuditSink};
pub use domain::employee::{Approver, ApproverRole, Department, DepartmentId, Employee, EmployeeId};
pub use domain::leave_request::{
    ApprovalStep, DateRange, DecisionAction, DecisionRecord, LeaveRequest, LeaveRequestId,
    LeaveStatus, StepOutcome,
};
pub use domain::leave_type::{default_leave_types, LeaveType, LeaveTypeCode};
pub use errors::{ApplicationError, InterfaceError, LeaveError};
pub use ledger::{
    LeavePeriod, QuotaAdjustment, QuotaKey, QuotaRecord, QuotaSnapshot, Reservation,
    ReservationId, ReservationState,
};
pub use notify::{NotificationDispatcher, NotificationEvent, RecordingNotifier, TracingNotifier};
pub use workflow::{
    AnalyticsReport, ChangeSet, Clock, Decision, FixedClock, LeaveService, LeaveStore,
    NewLeaveRequest, SystemClock, Verdict,
};

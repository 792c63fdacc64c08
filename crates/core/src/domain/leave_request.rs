use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::employee::{ApproverRole, EmployeeId};
use crate::domain::leave_type::LeaveTypeCode;
use crate::errors::LeaveError;
use crate::ledger::{LeavePeriod, ReservationId};

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LeaveRequestId(pub String);

impl LeaveRequestId {
    pub fn generate() -> Self {
        Self(format!("LR-{}", Uuid::new_v4()))
    }
}

impl fmt::Display for LeaveRequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Inclusive calendar-day range. Construction rejects `end < start`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateRange {
    start: NaiveDate,
    end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, LeaveError> {
        if end < start {
            return Err(LeaveError::InvalidDateRange { start, end });
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }

    pub fn duration_days(&self) -> u32 {
        let days = (self.end - self.start).num_days() + 1;
        u32::try_from(days).unwrap_or(u32::MAX)
    }

    pub fn overlaps(&self, other: &DateRange) -> bool {
        self.start <= other.end && other.start <= self.end
    }

    pub fn period(&self) -> LeavePeriod {
        LeavePeriod::containing(self.start)
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..={}", self.start, self.end)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum LeaveStatus {
    Draft,
    PendingApproval { step: usize },
    Approved,
    Rejected,
    Cancelled,
}

impl LeaveStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Approved | Self::Rejected | Self::Cancelled)
    }

    /// Pending and approved requests hold calendar days against the employee.
    pub fn blocks_calendar(&self) -> bool {
        matches!(self, Self::PendingApproval { .. } | Self::Approved)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::PendingApproval { .. } => "pending_approval",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn step_index(&self) -> Option<usize> {
        match self {
            Self::PendingApproval { step } => Some(*step),
            _ => None,
        }
    }
}

impl fmt::Display for LeaveStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PendingApproval { step } => write!(f, "pending_approval({step})"),
            other => f.write_str(other.as_str()),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepOutcome {
    Pending,
    Approved,
    Rejected,
}

impl StepOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalStep {
    pub order: usize,
    pub role: ApproverRole,
    pub assigned_to: Option<EmployeeId>,
    pub outcome: StepOutcome,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionAction {
    Submit,
    Approve,
    Reject,
    Cancel,
}

impl DecisionAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Submit => "submit",
            Self::Approve => "approve",
            Self::Reject => "reject",
            Self::Cancel => "cancel",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "submit" => Some(Self::Submit),
            "approve" | "approved" => Some(Self::Approve),
            "reject" | "rejected" => Some(Self::Reject),
            "cancel" | "cancelled" => Some(Self::Cancel),
            _ => None,
        }
    }
}

/// One entry of a request's append-only audit trail.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub sequence: usize,
    pub actor: EmployeeId,
    pub role: Option<ApproverRole>,
    pub action: DecisionAction,
    pub comment: String,
    pub decided_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaveRequest {
    pub id: LeaveRequestId,
    pub employee_id: EmployeeId,
    pub leave_type: LeaveTypeCode,
    pub range: DateRange,
    pub reason: String,
    pub status: LeaveStatus,
    pub approval_steps: Vec<ApprovalStep>,
    decisions: Vec<DecisionRecord>,
    pub reservation_id: Option<ReservationId>,
    pub policy_notes: Vec<String>,
    /// Bumped on every persisted transition; approvers echo it back to detect stale views.
    pub version: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl LeaveRequest {
    pub fn draft(
        employee_id: EmployeeId,
        leave_type: LeaveTypeCode,
        range: DateRange,
        reason: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: LeaveRequestId::generate(),
            employee_id,
            leave_type,
            range,
            reason: reason.into(),
            status: LeaveStatus::Draft,
            approval_steps: Vec::new(),
            decisions: Vec::new(),
            reservation_id: None,
            policy_notes: Vec::new(),
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Rebuilds a request from storage, keeping the decision log as persisted.
    #[allow(clippy::too_many_arguments)]
    pub fn restore(
        id: LeaveRequestId,
        employee_id: EmployeeId,
        leave_type: LeaveTypeCode,
        range: DateRange,
        reason: String,
        status: LeaveStatus,
        approval_steps: Vec<ApprovalStep>,
        decisions: Vec<DecisionRecord>,
        reservation_id: Option<ReservationId>,
        policy_notes: Vec<String>,
        version: u32,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            employee_id,
            leave_type,
            range,
            reason,
            status,
            approval_steps,
            decisions,
            reservation_id,
            policy_notes,
            version,
            created_at,
            updated_at,
        }
    }

    pub fn duration_days(&self) -> u32 {
        self.range.duration_days()
    }

    pub fn decisions(&self) -> &[DecisionRecord] {
        &self.decisions
    }

    pub fn current_step(&self) -> Option<&ApprovalStep> {
        self.status.step_index().and_then(|index| self.approval_steps.get(index))
    }

    pub fn pending_role(&self) -> Option<ApproverRole> {
        self.current_step().map(|step| step.role)
    }

    /// Status with the pending role spelled out, e.g. `pending_team_lead`.
    pub fn status_label(&self) -> String {
        match self.pending_role() {
            Some(role) => format!("pending_{}", role.as_str()),
            None => self.status.as_str().to_string(),
        }
    }

    pub(crate) fn record_decision(
        &mut self,
        actor: EmployeeId,
        role: Option<ApproverRole>,
        action: DecisionAction,
        comment: impl Into<String>,
        decided_at: DateTime<Utc>,
    ) {
        let sequence = self.decisions.len() + 1;
        self.decisions.push(DecisionRecord {
            sequence,
            actor,
            role,
            action,
            comment: comment.into(),
            decided_at,
        });
    }
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, TimeZone, Utc};

    use super::{DateRange, DecisionAction, LeaveRequest, LeaveStatus};
    use crate::domain::employee::EmployeeId;
    use crate::domain::leave_type::LeaveTypeCode;
    use crate::errors::LeaveError;

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 11, day).expect("valid date")
    }

    #[test]
    fn range_duration_is_inclusive() {
        let range = DateRange::new(date(2), date(6)).expect("range");
        assert_eq!(range.duration_days(), 5);
        assert_eq!(DateRange::new(date(3), date(3)).expect("single day").duration_days(), 1);
    }

    #[test]
    fn inverted_range_is_rejected() {
        let error = DateRange::new(date(6), date(2)).expect_err("end before start");
        assert!(matches!(error, LeaveError::InvalidDateRange { .. }));
    }

    #[test]
    fn overlap_counts_shared_boundary_days() {
        let first = DateRange::new(date(2), date(6)).expect("range");
        let touching = DateRange::new(date(6), date(9)).expect("range");
        let after = DateRange::new(date(7), date(9)).expect("range");

        assert!(first.overlaps(&touching));
        assert!(touching.overlaps(&first));
        assert!(!first.overlaps(&after));
    }

    #[test]
    fn decisions_are_appended_with_increasing_sequence() {
        let now = Utc.with_ymd_and_hms(2026, 10, 15, 9, 0, 0).single().expect("timestamp");
        let mut request = LeaveRequest::draft(
            EmployeeId("emp-1".to_string()),
            LeaveTypeCode("VAC".to_string()),
            DateRange::new(date(2), date(6)).expect("range"),
            "family trip",
            now,
        );

        request.record_decision(
            EmployeeId("emp-1".to_string()),
            None,
            DecisionAction::Submit,
            "",
            now,
        );
        request.record_decision(
            EmployeeId("lead-1".to_string()),
            None,
            DecisionAction::Approve,
            "ok",
            now,
        );

        let sequences: Vec<usize> = request.decisions().iter().map(|d| d.sequence).collect();
        assert_eq!(sequences, vec![1, 2]);
        assert_eq!(request.status, LeaveStatus::Draft);
        assert_eq!(request.status_label(), "draft");
    }

    #[test]
    fn terminal_and_blocking_states() {
        assert!(LeaveStatus::Approved.is_terminal());
        assert!(LeaveStatus::Cancelled.is_terminal());
        assert!(!LeaveStatus::PendingApproval { step: 0 }.is_terminal());
        assert!(LeaveStatus::PendingApproval { step: 1 }.blocks_calendar());
        assert!(!LeaveStatus::Rejected.blocks_calendar());
        assert!(!LeaveStatus::Draft.blocks_calendar());
    }
}

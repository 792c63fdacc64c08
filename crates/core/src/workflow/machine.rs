//! Pure leave request transitions.
//!
//! Every transition works on copies of the request, quota record and reservation. Nothing is
//! mutated unless the whole transition succeeds, so a rejected call leaves all three as they
//! were.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::approvals::authorize;
use crate::domain::employee::{Approver, ApproverRole, EmployeeId};
use crate::domain::leave_request::{
    ApprovalStep, DecisionAction, LeaveRequest, LeaveStatus, StepOutcome,
};
use crate::errors::LeaveError;
use crate::ledger::{QuotaKey, QuotaRecord, Reservation};
use crate::notify::NotificationEvent;

/// An approver's verdict on the current step.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Approve,
    Reject,
}

impl Verdict {
    pub fn as_action(&self) -> DecisionAction {
        match self {
            Self::Approve => DecisionAction::Approve,
            Self::Reject => DecisionAction::Reject,
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match DecisionAction::parse(value)? {
            DecisionAction::Approve => Some(Self::Approve),
            DecisionAction::Reject => Some(Self::Reject),
            DecisionAction::Submit | DecisionAction::Cancel => None,
        }
    }
}

/// Result of a successful transition, ready to be persisted as one unit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transition {
    pub from: LeaveStatus,
    pub action: Option<DecisionAction>,
    pub request: LeaveRequest,
    /// Present only when the ledger changed.
    pub quota: Option<QuotaRecord>,
    pub reservation: Option<Reservation>,
    pub events: Vec<NotificationEvent>,
}

impl Transition {
    pub fn to(&self) -> LeaveStatus {
        self.request.status
    }
}

pub fn quota_key(request: &LeaveRequest) -> QuotaKey {
    QuotaKey {
        employee_id: request.employee_id.clone(),
        leave_type: request.leave_type.clone(),
        period: request.range.period(),
    }
}

/// Stamps a freshly drafted request so it can be stored.
pub fn create(mut request: LeaveRequest, now: DateTime<Utc>) -> Transition {
    let from = request.status;
    request.version = request.version.saturating_add(1);
    request.updated_at = now;
    Transition { from, action: None, request, quota: None, reservation: None, events: Vec::new() }
}

pub struct SubmitInput<'a> {
    pub request: &'a LeaveRequest,
    pub actor: &'a EmployeeId,
    pub steps: Vec<ApprovalStep>,
    pub policy_notes: Vec<String>,
    pub quota: &'a QuotaRecord,
    /// Every other stored request of the same employee.
    pub existing: &'a [LeaveRequest],
    pub now: DateTime<Utc>,
}

/// Only the owner may submit, and only from Draft.
pub fn ensure_submittable(request: &LeaveRequest, actor: &EmployeeId) -> Result<(), LeaveError> {
    if *actor != request.employee_id {
        return Err(LeaveError::NotRequestOwner {
            request_id: request.id.clone(),
            actor: actor.clone(),
        });
    }
    if request.status != LeaveStatus::Draft {
        return Err(invalid(request, "submit"));
    }
    Ok(())
}

/// Draft -> PendingApproval(0). Reserves the request's duration against the quota.
pub fn submit(input: SubmitInput<'_>) -> Result<Transition, LeaveError> {
    let SubmitInput { request, actor, steps, policy_notes, quota, existing, now } = input;

    ensure_submittable(request, actor)?;
    let Some(first) = steps.first() else {
        return Err(LeaveError::NoApproverConfigured {
            department: None,
            role: ApproverRole::TeamLead,
        });
    };
    let first_role = first.role;
    let first_approver = first.assigned_to.clone();

    if let Some(conflicting) = existing.iter().find(|other| {
        other.id != request.id
            && other.employee_id == request.employee_id
            && other.status.blocks_calendar()
            && other.range.overlaps(&request.range)
    }) {
        return Err(LeaveError::DateConflict {
            request_id: request.id.clone(),
            conflicting: conflicting.id.clone(),
        });
    }

    let mut quota = quota.clone();
    let reservation = quota.reserve(&request.id, request.duration_days(), now)?;

    let mut next = request.clone();
    next.approval_steps = steps;
    next.policy_notes = policy_notes;
    next.status = LeaveStatus::PendingApproval { step: 0 };
    next.reservation_id = Some(reservation.id.clone());
    next.record_decision(actor.clone(), None, DecisionAction::Submit, "", now);
    bump(&mut next, now);

    Ok(Transition {
        from: request.status,
        action: Some(DecisionAction::Submit),
        request: next,
        quota: Some(quota),
        reservation: Some(reservation),
        events: vec![
            NotificationEvent::Submitted,
            NotificationEvent::AwaitingApproval { role: first_role, approver: first_approver },
        ],
    })
}

pub struct DecideInput<'a> {
    pub request: &'a LeaveRequest,
    /// Version the approver saw when loading the request.
    pub expected_version: u32,
    pub approver: &'a Approver,
    pub verdict: Verdict,
    pub comment: &'a str,
    pub quota: &'a QuotaRecord,
    pub reservation: &'a Reservation,
    pub now: DateTime<Utc>,
}

/// Applies an approver's verdict to the current step.
///
/// Checked in order: the request must be pending, the caller's view must be current, and the
/// approver must hold the current step.
pub fn decide(input: DecideInput<'_>) -> Result<Transition, LeaveError> {
    let DecideInput {
        request,
        expected_version,
        approver,
        verdict,
        comment,
        quota,
        reservation,
        now,
    } = input;

    if !matches!(request.status, LeaveStatus::PendingApproval { .. }) {
        return Err(invalid(request, "decide"));
    }
    if request.version != expected_version {
        return Err(LeaveError::StaleState {
            request_id: request.id.clone(),
            expected: expected_version,
            actual: request.version,
        });
    }
    let index = authorize(request, approver)?;
    ensure_reservation(request, reservation)?;

    let mut next = request.clone();
    let mut quota = quota.clone();
    let mut reservation = reservation.clone();
    let action = verdict.as_action();
    next.record_decision(
        approver.employee_id.clone(),
        Some(approver.role),
        action,
        comment,
        now,
    );

    let (ledger_changed, events) = match verdict {
        Verdict::Approve => {
            next.approval_steps[index].outcome = StepOutcome::Approved;
            match next.approval_steps.get(index + 1) {
                Some(following) => {
                    let event = NotificationEvent::AwaitingApproval {
                        role: following.role,
                        approver: following.assigned_to.clone(),
                    };
                    next.status = LeaveStatus::PendingApproval { step: index + 1 };
                    (false, vec![event])
                }
                None => {
                    quota.commit(&mut reservation, now)?;
                    next.status = LeaveStatus::Approved;
                    (true, vec![NotificationEvent::Approved])
                }
            }
        }
        Verdict::Reject => {
            quota.release(&mut reservation, now)?;
            next.approval_steps[index].outcome = StepOutcome::Rejected;
            next.status = LeaveStatus::Rejected;
            (true, vec![NotificationEvent::Rejected { by: approver.employee_id.clone() }])
        }
    };
    bump(&mut next, now);

    Ok(Transition {
        from: request.status,
        action: Some(action),
        request: next,
        quota: ledger_changed.then_some(quota),
        reservation: ledger_changed.then_some(reservation),
        events,
    })
}

pub struct CancelInput<'a> {
    pub request: &'a LeaveRequest,
    pub actor: &'a EmployeeId,
    pub comment: &'a str,
    /// Required while the request holds a reservation.
    pub ledger: Option<(&'a QuotaRecord, &'a Reservation)>,
    pub now: DateTime<Utc>,
}

/// Draft or PendingApproval -> Cancelled, by the requesting employee only.
pub fn cancel(input: CancelInput<'_>) -> Result<Transition, LeaveError> {
    let CancelInput { request, actor, comment, ledger, now } = input;

    if *actor != request.employee_id {
        return Err(LeaveError::NotRequestOwner {
            request_id: request.id.clone(),
            actor: actor.clone(),
        });
    }
    if request.status.is_terminal() {
        return Err(invalid(request, "cancel"));
    }

    let released = match (&request.reservation_id, ledger) {
        (None, _) => None,
        (Some(_), Some((quota, reservation))) => {
            ensure_reservation(request, reservation)?;
            let mut quota = quota.clone();
            let mut reservation = reservation.clone();
            quota.release(&mut reservation, now)?;
            Some((quota, reservation))
        }
        (Some(id), None) => return Err(LeaveError::UnknownReservation(id.clone())),
    };

    let mut next = request.clone();
    next.record_decision(actor.clone(), None, DecisionAction::Cancel, comment, now);
    next.status = LeaveStatus::Cancelled;
    bump(&mut next, now);

    let (quota, reservation) = match released {
        Some((quota, reservation)) => (Some(quota), Some(reservation)),
        None => (None, None),
    };

    Ok(Transition {
        from: request.status,
        action: Some(DecisionAction::Cancel),
        request: next,
        quota,
        reservation,
        events: vec![NotificationEvent::Cancelled],
    })
}

fn ensure_reservation(
    request: &LeaveRequest,
    reservation: &Reservation,
) -> Result<(), LeaveError> {
    let owned = request.reservation_id.as_ref() == Some(&reservation.id)
        && reservation.request_id == request.id;
    if !owned {
        return Err(LeaveError::UnknownReservation(reservation.id.clone()));
    }
    Ok(())
}

fn invalid(request: &LeaveRequest, operation: &'static str) -> LeaveError {
    LeaveError::InvalidTransition {
        request_id: request.id.clone(),
        status: request.status,
        operation,
    }
}

fn bump(request: &mut LeaveRequest, now: DateTime<Utc>) {
    request.version = request.version.saturating_add(1);
    request.updated_at = now;
}

//! Outbound notification port.
//!
//! Dispatch happens after a transition is persisted. A failing dispatcher is logged and never
//! undoes the transition.

use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::employee::{ApproverRole, EmployeeId};
use crate::domain::leave_request::{LeaveRequest, LeaveRequestId};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NotificationEvent {
    Submitted,
    AwaitingApproval { role: ApproverRole, approver: Option<EmployeeId> },
    Approved,
    Rejected { by: EmployeeId },
    Cancelled,
    UpcomingLeave { starts_in_days: i64 },
}

impl NotificationEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Submitted => "leave.submitted",
            Self::AwaitingApproval { .. } => "leave.awaiting_approval",
            Self::Approved => "leave.approved",
            Self::Rejected { .. } => "leave.rejected",
            Self::Cancelled => "leave.cancelled",
            Self::UpcomingLeave { .. } => "leave.upcoming",
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum NotificationError {
    #[error("notification channel unavailable: {0}")]
    Unavailable(String),
    #[error("no recipient for {0}")]
    NoRecipient(String),
}

pub trait NotificationDispatcher: Send + Sync {
    fn notify(
        &self,
        event: &NotificationEvent,
        request: &LeaveRequest,
    ) -> Result<(), NotificationError>;
}

/// Hands every event to the dispatcher, logging failures instead of returning them.
pub fn dispatch_all(
    dispatcher: &dyn NotificationDispatcher,
    events: &[NotificationEvent],
    request: &LeaveRequest,
    correlation_id: &str,
) {
    for event in events {
        if let Err(error) = dispatcher.notify(event, request) {
            tracing::warn!(
                event_name = "leave.notification_failed",
                correlation_id,
                request_id = %request.id,
                notification = event.name(),
                error = %error,
                "notification dispatch failed; transition kept"
            );
        }
    }
}

/// Logs notifications. Stands in for mail delivery, which lives outside this workspace.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingNotifier;

impl NotificationDispatcher for TracingNotifier {
    fn notify(
        &self,
        event: &NotificationEvent,
        request: &LeaveRequest,
    ) -> Result<(), NotificationError> {
        let approver = match event {
            NotificationEvent::AwaitingApproval { approver: Some(approver), .. } => {
                approver.0.as_str()
            }
            _ => "-",
        };
        tracing::info!(
            event_name = event.name(),
            request_id = %request.id,
            employee_id = %request.employee_id,
            leave_type = %request.leave_type,
            range = %request.range,
            status = %request.status_label(),
            approver,
            "leave notification"
        );
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct RecordingNotifier {
    sent: Arc<Mutex<Vec<(NotificationEvent, LeaveRequestId)>>>,
    failing: bool,
}

impl RecordingNotifier {
    /// A notifier that records each attempt and then reports the channel as down.
    pub fn failing() -> Self {
        Self { failing: true, ..Self::default() }
    }

    pub fn sent(&self) -> Vec<(NotificationEvent, LeaveRequestId)> {
        match self.sent.lock() {
            Ok(sent) => sent.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn events_for(&self, request_id: &LeaveRequestId) -> Vec<NotificationEvent> {
        self.sent()
            .into_iter()
            .filter(|(_, id)| id == request_id)
            .map(|(event, _)| event)
            .collect()
    }
}

impl NotificationDispatcher for RecordingNotifier {
    fn notify(
        &self,
        event: &NotificationEvent,
        request: &LeaveRequest,
    ) -> Result<(), NotificationError> {
        match self.sent.lock() {
            Ok(mut sent) => sent.push((event.clone(), request.id.clone())),
            Err(poisoned) => poisoned.into_inner().push((event.clone(), request.id.clone())),
        }
        if self.failing {
            return Err(NotificationError::Unavailable("smtp relay refused connection".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, TimeZone, Utc};

    use super::{dispatch_all, NotificationEvent, RecordingNotifier};
    use crate::domain::employee::EmployeeId;
    use crate::domain::leave_request::{DateRange, LeaveRequest};
    use crate::domain::leave_type::LeaveTypeCode;

    fn request() -> LeaveRequest {
        let day = NaiveDate::from_ymd_opt(2026, 11, 2).expect("date");
        LeaveRequest::draft(
            EmployeeId("emp-1".to_string()),
            LeaveTypeCode("VAC".to_string()),
            DateRange::new(day, day).expect("range"),
            "",
            Utc.with_ymd_and_hms(2026, 10, 15, 9, 0, 0).single().expect("timestamp"),
        )
    }

    #[test]
    fn failing_dispatcher_is_swallowed_after_every_attempt() {
        let notifier = RecordingNotifier::failing();
        let request = request();

        dispatch_all(
            &notifier,
            &[NotificationEvent::Submitted, NotificationEvent::Approved],
            &request,
            "req-1",
        );

        assert_eq!(
            notifier.events_for(&request.id),
            vec![NotificationEvent::Submitted, NotificationEvent::Approved]
        );
    }

    #[test]
    fn event_names_are_namespaced() {
        assert_eq!(NotificationEvent::UpcomingLeave { starts_in_days: 2 }.name(), "leave.upcoming");
        assert_eq!(
            NotificationEvent::Rejected { by: EmployeeId("lead".into()) }.name(),
            "leave.rejected"
        );
    }
}

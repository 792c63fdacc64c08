//! Per-leave-type request rules checked at submission.

use chrono::NaiveDate;

use crate::domain::leave_request::DateRange;
use crate::domain::leave_type::LeaveType;
use crate::errors::LeaveError;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RequestPolicy {
    pub allow_past_start: bool,
}

impl RequestPolicy {
    /// Validates `range` against the leave type's limits and returns the notes to attach to the
    /// request.
    pub fn check(
        &self,
        leave_type: &LeaveType,
        range: &DateRange,
        today: NaiveDate,
    ) -> Result<Vec<String>, LeaveError> {
        if !self.allow_past_start && range.start() < today {
            return Err(LeaveError::PolicyViolation(format!(
                "start date {} is in the past",
                range.start()
            )));
        }

        let duration = range.duration_days();
        if leave_type.max_days_per_request > 0 && duration > leave_type.max_days_per_request {
            return Err(LeaveError::PolicyViolation(format!(
                "{duration} day(s) exceeds the {}-day maximum per {} request",
                leave_type.max_days_per_request, leave_type.code
            )));
        }

        let notice = (range.start() - today).num_days();
        if notice < i64::from(leave_type.min_notice_days) && range.start() >= today {
            return Err(LeaveError::PolicyViolation(format!(
                "{} requires {} day(s) notice, got {notice}",
                leave_type.code, leave_type.min_notice_days
            )));
        }

        Ok(leave_type.policy_notes())
    }
}

//! Approved-leave totals over a year or one month of it.
//!
//! A request counts in full towards every bucket as soon as it touches the window, and its
//! month bucket is the month it starts in.

use std::collections::BTreeMap;

use chrono::{Months, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::domain::leave_request::{DateRange, LeaveRequest, LeaveRequestId, LeaveStatus};
use crate::errors::LeaveError;
use crate::ledger::LeavePeriod;

/// Inclusive date window a report covers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl ReportWindow {
    /// The whole calendar year, or the given month (1 to 12) of it.
    pub fn new(period: LeavePeriod, month: Option<u32>) -> Result<Self, LeaveError> {
        let invalid =
            || LeaveError::InvalidReportWindow { period: period.0, month: month.unwrap_or(0) };
        let start = NaiveDate::from_ymd_opt(period.0, month.unwrap_or(1), 1).ok_or_else(invalid)?;
        let span = Months::new(if month.is_some() { 1 } else { 12 });
        let end = start
            .checked_add_months(span)
            .and_then(|next| next.pred_opt())
            .ok_or_else(invalid)?;
        Ok(Self { start, end })
    }

    fn touches(&self, range: &DateRange) -> bool {
        range.start() <= self.end && self.start <= range.end()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayTotal {
    pub key: String,
    pub days: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalyticsReport {
    pub window: ReportWindow,
    pub total_days: u32,
    pub by_leave_type: Vec<DayTotal>,
    pub by_employee: Vec<DayTotal>,
    /// Keyed `YYYY-MM` by start date.
    pub by_month: Vec<DayTotal>,
    /// Counted requests, earliest start first.
    pub requests: Vec<LeaveRequestId>,
}

impl AnalyticsReport {
    pub fn build(window: ReportWindow, requests: &[LeaveRequest]) -> Self {
        let mut by_leave_type = BTreeMap::new();
        let mut by_employee = BTreeMap::new();
        let mut by_month = BTreeMap::new();
        let mut total_days = 0_u32;

        let mut counted: Vec<&LeaveRequest> = requests
            .iter()
            .filter(|request| {
                request.status == LeaveStatus::Approved && window.touches(&request.range)
            })
            .collect();
        counted.sort_by_key(|request| (request.range.start(), request.created_at));

        for request in &counted {
            let days = request.duration_days();
            total_days = total_days.saturating_add(days);
            add(&mut by_leave_type, request.leave_type.0.clone(), days);
            add(&mut by_employee, request.employee_id.0.clone(), days);
            add(&mut by_month, request.range.start().format("%Y-%m").to_string(), days);
        }

        Self {
            window,
            total_days,
            by_leave_type: flatten(by_leave_type),
            by_employee: flatten(by_employee),
            by_month: flatten(by_month),
            requests: counted.into_iter().map(|request| request.id.clone()).collect(),
        }
    }
}

fn add(totals: &mut BTreeMap<String, u32>, key: String, days: u32) {
    let entry = totals.entry(key).or_insert(0);
    *entry = entry.saturating_add(days);
}

fn flatten(totals: BTreeMap<String, u32>) -> Vec<DayTotal> {
    totals.into_iter().map(|(key, days)| DayTotal { key, days }).collect()
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, TimeZone, Utc};

    use super::{AnalyticsReport, DayTotal, ReportWindow};
    use crate::domain::employee::EmployeeId;
    use crate::domain::leave_request::{DateRange, LeaveRequest, LeaveStatus};
    use crate::domain::leave_type::LeaveTypeCode;
    use crate::errors::LeaveError;
    use crate::ledger::LeavePeriod;

    fn date(year: i32, month: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(year, month, day).expect("valid date")
    }

    fn approved(employee: &str, code: &str, start: NaiveDate, end: NaiveDate) -> LeaveRequest {
        let created = Utc.with_ymd_and_hms(2026, 1, 5, 9, 0, 0).single().expect("timestamp");
        let mut request = LeaveRequest::draft(
            EmployeeId(employee.to_string()),
            LeaveTypeCode(code.to_string()),
            DateRange::new(start, end).expect("range"),
            String::new(),
            created,
        );
        request.status = LeaveStatus::Approved;
        request
    }

    fn totals(pairs: &[(&str, u32)]) -> Vec<DayTotal> {
        pairs.iter().map(|(key, days)| DayTotal { key: (*key).to_string(), days: *days }).collect()
    }

    #[test]
    fn month_window_ends_on_the_last_day_of_the_month() {
        let february = ReportWindow::new(LeavePeriod(2028), Some(2)).expect("window");
        assert_eq!(february.start, date(2028, 2, 1));
        assert_eq!(february.end, date(2028, 2, 29));

        let year = ReportWindow::new(LeavePeriod(2026), None).expect("window");
        assert_eq!((year.start, year.end), (date(2026, 1, 1), date(2026, 12, 31)));

        let december = ReportWindow::new(LeavePeriod(2026), Some(12)).expect("window");
        assert_eq!(december.end, date(2026, 12, 31));
    }

    #[test]
    fn month_outside_the_calendar_is_refused() {
        for month in [0, 13] {
            assert_eq!(
                ReportWindow::new(LeavePeriod(2026), Some(month)),
                Err(LeaveError::InvalidReportWindow { period: 2026, month })
            );
        }
    }

    #[test]
    fn totals_group_by_type_employee_and_start_month() {
        let window = ReportWindow::new(LeavePeriod(2026), None).expect("window");
        let mut pending = approved("emp-a", "VAC", date(2026, 5, 4), date(2026, 5, 8));
        pending.status = LeaveStatus::PendingApproval { step: 0 };
        let requests = vec![
            approved("emp-b", "SICK", date(2026, 3, 30), date(2026, 4, 1)),
            approved("emp-a", "VAC", date(2026, 3, 2), date(2026, 3, 6)),
            approved("emp-a", "SICK", date(2026, 6, 1), date(2026, 6, 1)),
            approved("emp-a", "VAC", date(2025, 7, 1), date(2025, 7, 3)),
            pending,
        ];

        let report = AnalyticsReport::build(window, &requests);

        assert_eq!(report.total_days, 9);
        assert_eq!(report.by_leave_type, totals(&[("SICK", 4), ("VAC", 5)]));
        assert_eq!(report.by_employee, totals(&[("emp-a", 6), ("emp-b", 3)]));
        assert_eq!(report.by_month, totals(&[("2026-03", 8), ("2026-06", 1)]));
        assert_eq!(
            report.requests,
            vec![requests[1].id.clone(), requests[0].id.clone(), requests[2].id.clone()]
        );
    }

    #[test]
    fn leave_spanning_the_window_edge_counts_in_full() {
        let april = ReportWindow::new(LeavePeriod(2026), Some(4)).expect("window");
        let requests = vec![approved("emp-b", "SICK", date(2026, 3, 30), date(2026, 4, 1))];

        let report = AnalyticsReport::build(april, &requests);

        assert_eq!(report.total_days, 3);
        assert_eq!(report.by_month, totals(&[("2026-03", 3)]));
    }
}

//! `LeaveService` drives the state machine against a [`LeaveStore`].
//!
//! Operations for one employee run one at a time behind an async keyed lock; different
//! employees never wait on each other. Each operation ends in a single `apply` so the store
//! persists request, quota and reservation together or not at all.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::approvals::{ApprovalChainConfig, ApprovalChainResolver};
use crate::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
use crate::config::WorkflowConfig;
use crate::domain::employee::{Approver, Employee, EmployeeId};
use crate::domain::leave_request::{DateRange, LeaveRequest, LeaveRequestId, LeaveStatus};
use crate::domain::leave_type::{LeaveType, LeaveTypeCode};
use crate::errors::{ApplicationError, LeaveError};
use crate::ledger::{
    LeavePeriod, QuotaAdjustment, QuotaKey, QuotaRecord, QuotaSnapshot, Reservation,
};
use crate::notify::{dispatch_all, NotificationDispatcher, NotificationEvent};
use crate::policy::RequestPolicy;
use crate::workflow::analytics::{AnalyticsReport, ReportWindow};
use crate::workflow::machine::{
    self, quota_key, CancelInput, DecideInput, SubmitInput, Transition, Verdict,
};
use crate::workflow::store::{ChangeSet, ConflictKind, LeaveStore, StoreError};

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    fn today(&self) -> NaiveDate {
        self.now().date_naive()
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Clone, Copy, Debug)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewLeaveRequest {
    pub employee_id: EmployeeId,
    pub leave_type: LeaveTypeCode,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    #[serde(default)]
    pub reason: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub approver: Approver,
    pub verdict: Verdict,
    /// The request version the approver was looking at.
    pub expected_version: u32,
    #[serde(default)]
    pub comment: String,
}

#[derive(Default)]
struct EmployeeLocks {
    slots: Mutex<HashMap<EmployeeId, Arc<AsyncMutex<()>>>>,
}

impl EmployeeLocks {
    const PRUNE_THRESHOLD: usize = 1024;

    async fn acquire(&self, employee_id: &EmployeeId) -> OwnedMutexGuard<()> {
        let slot = {
            let mut slots = match self.slots.lock() {
                Ok(slots) => slots,
                Err(poisoned) => poisoned.into_inner(),
            };
            if slots.len() > Self::PRUNE_THRESHOLD {
                slots.retain(|_, slot| Arc::strong_count(slot) > 1);
            }
            slots.entry(employee_id.clone()).or_default().clone()
        };
        slot.lock_owned().await
    }
}

pub struct LeaveService<S> {
    store: Arc<S>,
    notifier: Arc<dyn NotificationDispatcher>,
    audit: Arc<dyn AuditSink>,
    clock: Arc<dyn Clock>,
    settings: WorkflowConfig,
    locks: EmployeeLocks,
}

impl<S> LeaveService<S>
where
    S: LeaveStore,
{
    pub fn new(
        store: Arc<S>,
        notifier: Arc<dyn NotificationDispatcher>,
        audit: Arc<dyn AuditSink>,
        settings: WorkflowConfig,
    ) -> Self {
        Self {
            store,
            notifier,
            audit,
            clock: Arc::new(SystemClock),
            settings,
            locks: EmployeeLocks::default(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn settings(&self) -> WorkflowConfig {
        self.settings
    }

    /// Stores a new Draft request without touching the ledger.
    pub async fn create_draft(
        &self,
        correlation_id: &str,
        input: NewLeaveRequest,
    ) -> Result<LeaveRequest, ApplicationError> {
        let audit = AuditContext::new(None, correlation_id, input.employee_id.0.clone());
        let result = async {
            let draft = self.new_draft(input).await?;
            let transition = machine::create(draft, self.clock.now());
            self.store.apply(ChangeSet::from_transition(&transition, 0, 0)).await?;
            Ok::<_, ApplicationError>(transition)
        }
        .await;

        match result {
            Ok(transition) => Ok(self.finish(&audit, transition)),
            Err(error) => Err(self.rejected(&audit, "create", error)),
        }
    }

    /// Submits a stored Draft.
    pub async fn submit(
        &self,
        correlation_id: &str,
        request_id: &LeaveRequestId,
        actor: &EmployeeId,
    ) -> Result<LeaveRequest, ApplicationError> {
        let audit = AuditContext::new(Some(request_id.clone()), correlation_id, actor.0.clone());
        let owner = match self.load_request(request_id).await {
            Ok(request) => request.employee_id,
            Err(error) => return Err(self.rejected(&audit, "submit", error)),
        };
        let _guard = self.locks.acquire(&owner).await;

        let transition = self
            .commit_with_retry(&audit, "submit", move || async move {
                let request = self.load_request(request_id).await?;
                self.prepare_submit(request, actor).await
            })
            .await?;
        Ok(self.finish(&audit, transition))
    }

    /// Creates and submits a request in one step. Nothing is stored if submission fails.
    pub async fn submit_request(
        &self,
        correlation_id: &str,
        input: NewLeaveRequest,
    ) -> Result<LeaveRequest, ApplicationError> {
        let actor = input.employee_id.clone();
        let mut audit = AuditContext::new(None, correlation_id, actor.0.clone());
        let draft = match self.new_draft(input).await {
            Ok(draft) => draft,
            Err(error) => return Err(self.rejected(&audit, "submit", error)),
        };
        audit = audit.with_request(draft.id.clone());
        let _guard = self.locks.acquire(&actor).await;

        let draft = &draft;
        let actor = &actor;
        let transition = self
            .commit_with_retry(&audit, "submit", move || async move {
                self.prepare_submit(draft.clone(), actor).await
            })
            .await?;
        Ok(self.finish(&audit, transition))
    }

    pub async fn decide(
        &self,
        correlation_id: &str,
        request_id: &LeaveRequestId,
        decision: Decision,
    ) -> Result<LeaveRequest, ApplicationError> {
        let audit = AuditContext::new(
            Some(request_id.clone()),
            correlation_id,
            decision.approver.employee_id.0.clone(),
        );
        let owner = match self.load_request(request_id).await {
            Ok(request) => request.employee_id,
            Err(error) => return Err(self.rejected(&audit, "decide", error)),
        };
        let _guard = self.locks.acquire(&owner).await;

        let decision = &decision;
        let transition = self
            .commit_with_retry(&audit, "decide", move || async move {
                let request = self.load_request(request_id).await?;
                if !matches!(request.status, LeaveStatus::PendingApproval { .. }) {
                    return Err(LeaveError::InvalidTransition {
                        request_id: request.id.clone(),
                        status: request.status,
                        operation: "decide",
                    }
                    .into());
                }
                let (quota, reservation) = self.load_ledger(&request).await?;
                let transition = machine::decide(DecideInput {
                    request: &request,
                    expected_version: decision.expected_version,
                    approver: &decision.approver,
                    verdict: decision.verdict,
                    comment: &decision.comment,
                    quota: &quota,
                    reservation: &reservation,
                    now: self.clock.now(),
                })?;
                let changes =
                    ChangeSet::from_transition(&transition, request.version, quota.version);
                Ok((transition, changes))
            })
            .await?;
        Ok(self.finish(&audit, transition))
    }

    pub async fn cancel(
        &self,
        correlation_id: &str,
        request_id: &LeaveRequestId,
        actor: &EmployeeId,
        comment: &str,
    ) -> Result<LeaveRequest, ApplicationError> {
        let audit = AuditContext::new(Some(request_id.clone()), correlation_id, actor.0.clone());
        let owner = match self.load_request(request_id).await {
            Ok(request) => request.employee_id,
            Err(error) => return Err(self.rejected(&audit, "cancel", error)),
        };
        let _guard = self.locks.acquire(&owner).await;

        let transition = self
            .commit_with_retry(&audit, "cancel", move || async move {
                let request = self.load_request(request_id).await?;
                let ledger = match (&request.reservation_id, request.status.is_terminal()) {
                    (Some(_), false) if request.employee_id == *actor => {
                        Some(self.load_ledger(&request).await?)
                    }
                    _ => None,
                };
                let transition = machine::cancel(CancelInput {
                    request: &request,
                    actor,
                    comment,
                    ledger: ledger.as_ref().map(|(quota, reservation)| (quota, reservation)),
                    now: self.clock.now(),
                })?;
                let quota_version = ledger.as_ref().map(|(quota, _)| quota.version).unwrap_or(0);
                let changes =
                    ChangeSet::from_transition(&transition, request.version, quota_version);
                Ok((transition, changes))
            })
            .await?;
        Ok(self.finish(&audit, transition))
    }

    /// Current balance. A quota never written yet reports the leave type's default allocation.
    pub async fn get_quota(
        &self,
        employee_id: &EmployeeId,
        leave_type: &LeaveTypeCode,
        period: LeavePeriod,
    ) -> Result<QuotaSnapshot, ApplicationError> {
        self.load_employee(employee_id).await?;
        let leave_type = self.load_leave_type(leave_type).await?;
        let key = QuotaKey {
            employee_id: employee_id.clone(),
            leave_type: leave_type.code.clone(),
            period,
        };
        Ok(self.quota_or_default(&key, &leave_type).await?.snapshot())
    }

    /// One snapshot per configured leave type.
    pub async fn list_quotas(
        &self,
        employee_id: &EmployeeId,
        period: LeavePeriod,
    ) -> Result<Vec<QuotaSnapshot>, ApplicationError> {
        self.load_employee(employee_id).await?;
        let stored = self.store.quotas_for_employee(employee_id, period).await?;
        let snapshots = self
            .store
            .leave_types()
            .await?
            .into_iter()
            .map(|leave_type| {
                stored
                    .iter()
                    .find(|record| record.key.leave_type == leave_type.code)
                    .map(QuotaRecord::snapshot)
                    .unwrap_or_else(|| {
                        self.open_quota(employee_id, &leave_type, period).snapshot()
                    })
            })
            .collect();
        Ok(snapshots)
    }

    /// Administrative change to allocation, carry-over or emergency grant.
    pub async fn adjust_quota(
        &self,
        correlation_id: &str,
        employee_id: &EmployeeId,
        leave_type: &LeaveTypeCode,
        period: LeavePeriod,
        adjustment: QuotaAdjustment,
    ) -> Result<QuotaSnapshot, ApplicationError> {
        let audit = AuditContext::new(None, correlation_id, employee_id.0.clone());
        let _guard = self.locks.acquire(employee_id).await;
        let mut retries = 0;

        loop {
            let attempt = async {
                self.load_employee(employee_id).await?;
                let leave_type = self.load_leave_type(leave_type).await?;
                let key = QuotaKey {
                    employee_id: employee_id.clone(),
                    leave_type: leave_type.code.clone(),
                    period,
                };
                let current = self.quota_or_default(&key, &leave_type).await?;
                let mut adjusted = current.clone();
                adjusted.adjust(adjustment, self.clock.now())?;
                Ok::<_, ApplicationError>((current.version, adjusted))
            }
            .await;

            let (expected_version, adjusted) = match attempt {
                Ok(value) => value,
                Err(error) => return Err(self.rejected(&audit, "adjust_quota", error)),
            };

            let changes = ChangeSet::quota_only(adjusted.clone(), expected_version);
            match self.store.apply(changes).await {
                Ok(()) => {
                    let snapshot = adjusted.snapshot();
                    self.audit.emit(
                        AuditEvent::new(
                            &audit,
                            "quota.adjusted",
                            AuditCategory::Quota,
                            AuditOutcome::Success,
                        )
                        .with_metadata("quota", adjusted.key.to_string())
                        .with_metadata("allocated", snapshot.allocated.to_string())
                        .with_metadata("version", adjusted.version.to_string()),
                    );
                    return Ok(snapshot);
                }
                Err(StoreError::Conflict(ConflictKind::Quota { key }))
                    if retries < self.settings.commit_retries =>
                {
                    retries += 1;
                    tracing::warn!(
                        event_name = "quota.write_retry",
                        correlation_id,
                        quota = %key,
                        attempt = retries,
                        "quota changed concurrently; reloading"
                    );
                }
                Err(error) => {
                    return Err(self.rejected(&audit, "adjust_quota", error.into()));
                }
            }
        }
    }

    pub async fn get_request(
        &self,
        request_id: &LeaveRequestId,
    ) -> Result<LeaveRequest, ApplicationError> {
        self.load_request(request_id).await
    }

    pub async fn requests_for_employee(
        &self,
        employee_id: &EmployeeId,
    ) -> Result<Vec<LeaveRequest>, ApplicationError> {
        self.load_employee(employee_id).await?;
        Ok(self.store.requests_for_employee(employee_id).await?)
    }

    pub async fn pending_for_approver(
        &self,
        approver: &EmployeeId,
    ) -> Result<Vec<LeaveRequest>, ApplicationError> {
        Ok(self.store.pending_for_approver(approver).await?)
    }

    /// Notifies employees whose approved leave starts within `days` (default from settings).
    /// Returns the reminded requests.
    pub async fn send_upcoming_reminders(
        &self,
        correlation_id: &str,
        days: Option<u32>,
    ) -> Result<Vec<LeaveRequestId>, ApplicationError> {
        let days = days.unwrap_or(self.settings.reminder_days);
        let today = self.clock.today();
        let until = today + Duration::days(i64::from(days));
        let upcoming = self.store.approved_starting_between(today, until).await?;

        for request in &upcoming {
            let starts_in_days = (request.range.start() - today).num_days();
            dispatch_all(
                self.notifier.as_ref(),
                &[NotificationEvent::UpcomingLeave { starts_in_days }],
                request,
                correlation_id,
            );
        }

        tracing::info!(
            event_name = "leave.reminders_sent",
            correlation_id,
            window_days = days,
            reminded = upcoming.len(),
            "upcoming leave reminders dispatched"
        );
        Ok(upcoming.into_iter().map(|request| request.id).collect())
    }

    /// Day totals of approved leave touching `period`, or one `month` of it.
    pub async fn analytics(
        &self,
        period: LeavePeriod,
        month: Option<u32>,
    ) -> Result<AnalyticsReport, ApplicationError> {
        let window = ReportWindow::new(period, month)?;
        let approved = self.store.approved_overlapping(window.start, window.end).await?;
        let report = AnalyticsReport::build(window, &approved);

        tracing::debug!(
            event_name = "leave.analytics_built",
            period = period.0,
            month,
            requests = report.requests.len(),
            total_days = report.total_days,
            "approved leave totals computed"
        );
        Ok(report)
    }

    async fn commit_with_retry<F, Fut>(
        &self,
        audit: &AuditContext,
        operation: &'static str,
        mut attempt: F,
    ) -> Result<Transition, ApplicationError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<(Transition, ChangeSet), ApplicationError>>,
    {
        let mut retries = 0;
        loop {
            let (transition, changes) = match attempt().await {
                Ok(prepared) => prepared,
                Err(error) => return Err(self.rejected(audit, operation, error)),
            };
            let expected_version = changes
                .request
                .as_ref()
                .map(|write| write.expected_version)
                .unwrap_or_default();

            match self.store.apply(changes).await {
                Ok(()) => return Ok(transition),
                Err(StoreError::Conflict(ConflictKind::Quota { key }))
                    if retries < self.settings.commit_retries =>
                {
                    retries += 1;
                    tracing::warn!(
                        event_name = "quota.write_retry",
                        correlation_id = %audit.correlation_id,
                        request_id = %transition.request.id,
                        quota = %key,
                        attempt = retries,
                        "quota changed concurrently; reloading"
                    );
                }
                Err(error) => {
                    let error = store_failure(error, expected_version);
                    return Err(self.rejected(audit, operation, error));
                }
            }
        }
    }

    async fn prepare_submit(
        &self,
        request: LeaveRequest,
        actor: &EmployeeId,
    ) -> Result<(Transition, ChangeSet), ApplicationError> {
        machine::ensure_submittable(&request, actor)?;

        let employee = self.load_employee(&request.employee_id).await?;
        let leave_type = self.load_leave_type(&request.leave_type).await?;
        let resolver = ApprovalChainResolver::new(ApprovalChainConfig::new(
            self.store.departments().await?,
        ));
        let steps = resolver.resolve(&employee, &leave_type)?;
        let policy = RequestPolicy { allow_past_start: self.settings.allow_past_start };
        let policy_notes = policy.check(&leave_type, &request.range, self.clock.today())?;

        let quota = self.quota_or_default(&quota_key(&request), &leave_type).await?;
        let existing = self.store.requests_for_employee(&request.employee_id).await?;

        let transition = machine::submit(SubmitInput {
            request: &request,
            actor,
            steps,
            policy_notes,
            quota: &quota,
            existing: &existing,
            now: self.clock.now(),
        })?;
        let changes = ChangeSet::from_transition(&transition, request.version, quota.version);
        Ok((transition, changes))
    }

    async fn new_draft(&self, input: NewLeaveRequest) -> Result<LeaveRequest, ApplicationError> {
        self.load_employee(&input.employee_id).await?;
        let leave_type = self.load_leave_type(&input.leave_type).await?;
        let range = DateRange::new(input.start_date, input.end_date)?;
        Ok(LeaveRequest::draft(
            input.employee_id,
            leave_type.code,
            range,
            input.reason.trim(),
            self.clock.now(),
        ))
    }

    async fn load_request(&self, id: &LeaveRequestId) -> Result<LeaveRequest, ApplicationError> {
        self.store
            .request(id)
            .await?
            .ok_or_else(|| ApplicationError::not_found("leave request", id))
    }

    async fn load_employee(&self, id: &EmployeeId) -> Result<Employee, ApplicationError> {
        self.store.employee(id).await?.ok_or_else(|| ApplicationError::not_found("employee", id))
    }

    async fn load_leave_type(&self, code: &LeaveTypeCode) -> Result<LeaveType, ApplicationError> {
        self.store
            .leave_type(code)
            .await?
            .ok_or_else(|| ApplicationError::not_found("leave type", code))
    }

    async fn load_ledger(
        &self,
        request: &LeaveRequest,
    ) -> Result<(QuotaRecord, Reservation), ApplicationError> {
        let Some(reservation_id) = &request.reservation_id else {
            return Err(LeaveError::InvalidTransition {
                request_id: request.id.clone(),
                status: request.status,
                operation: "settle",
            }
            .into());
        };
        let reservation = self
            .store
            .reservation(reservation_id)
            .await?
            .ok_or_else(|| LeaveError::UnknownReservation(reservation_id.clone()))?;
        let quota = self
            .store
            .quota(&reservation.key)
            .await?
            .ok_or_else(|| LeaveError::UnknownReservation(reservation_id.clone()))?;
        Ok((quota, reservation))
    }

    async fn quota_or_default(
        &self,
        key: &QuotaKey,
        leave_type: &LeaveType,
    ) -> Result<QuotaRecord, ApplicationError> {
        match self.store.quota(key).await? {
            Some(record) => Ok(record),
            None => Ok(self.open_quota(&key.employee_id, leave_type, key.period)),
        }
    }

    fn open_quota(
        &self,
        employee_id: &EmployeeId,
        leave_type: &LeaveType,
        period: LeavePeriod,
    ) -> QuotaRecord {
        QuotaRecord::open(
            QuotaKey {
                employee_id: employee_id.clone(),
                leave_type: leave_type.code.clone(),
                period,
            },
            leave_type.default_allocation,
            self.clock.now(),
        )
    }

    fn finish(&self, audit: &AuditContext, transition: Transition) -> LeaveRequest {
        let request = transition.request;
        let action = transition.action.map(|action| action.as_str()).unwrap_or("create");
        let audit = audit.clone().with_request(request.id.clone());

        self.audit.emit(
            AuditEvent::new(
                &audit,
                "leave.transition_applied",
                AuditCategory::Workflow,
                AuditOutcome::Success,
            )
            .with_metadata("action", action)
            .with_metadata("from", transition.from.to_string())
            .with_metadata("to", request.status.to_string())
            .with_metadata("version", request.version.to_string()),
        );
        tracing::info!(
            event_name = "leave.transition_applied",
            correlation_id = %audit.correlation_id,
            request_id = %request.id,
            employee_id = %request.employee_id,
            action,
            from = %transition.from,
            to = %request.status,
            "leave request transition applied"
        );

        dispatch_all(self.notifier.as_ref(), &transition.events, &request, &audit.correlation_id);
        request
    }

    fn rejected(
        &self,
        audit: &AuditContext,
        operation: &'static str,
        error: ApplicationError,
    ) -> ApplicationError {
        let outcome = match error {
            ApplicationError::Persistence(_) | ApplicationError::Configuration(_) => {
                AuditOutcome::Failed
            }
            ApplicationError::Domain(_) | ApplicationError::NotFound { .. } => {
                AuditOutcome::Rejected
            }
        };
        self.audit.emit(
            AuditEvent::new(audit, "leave.transition_rejected", AuditCategory::Workflow, outcome)
                .with_metadata("operation", operation)
                .with_metadata("code", error.code())
                .with_metadata("reason", error.to_string()),
        );
        tracing::warn!(
            event_name = "leave.transition_rejected",
            correlation_id = %audit.correlation_id,
            actor = %audit.actor,
            operation,
            code = error.code(),
            error = %error,
            "leave operation rejected"
        );
        error
    }
}

fn store_failure(error: StoreError, expected_version: u32) -> ApplicationError {
    match error {
        StoreError::Conflict(ConflictKind::Request { id, actual }) => {
            LeaveError::StaleState { request_id: id, expected: expected_version, actual }.into()
        }
        StoreError::Conflict(ConflictKind::Overlap { request_id, conflicting }) => {
            LeaveError::DateConflict { request_id, conflicting }.into()
        }
        StoreError::Conflict(ConflictKind::Quota { key }) => ApplicationError::Persistence(
            format!("quota {key} kept changing concurrently; retry budget exhausted"),
        ),
        StoreError::Backend(detail) => ApplicationError::Persistence(detail),
    }
}

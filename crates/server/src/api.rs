//! JSON routes for the leave workflow.
//!
//! - `POST /requests`                                       create (and by default submit)
//! - `GET  /requests/{id}`                                  request with steps and decisions
//! - `POST /requests/{id}/submit`                           submit a draft
//! - `POST /requests/{id}/decisions`                        approve or reject the current step
//! - `POST /requests/{id}/cancel`                           owner cancellation
//! - `GET  /employees/{id}/requests`                        employee dashboard
//! - `GET  /employees/{id}/quotas?period=`                  quota balances for a year
//! - `GET  /employees/{id}/quotas/{leave_type}?period=`     one quota balance
//! - `POST /employees/{id}/quotas/{leave_type}/adjustments` admin quota adjustment
//! - `GET  /approvers/{id}/pending`                         approver dashboard
//! - `GET  /analytics?period=&month=`                       approved-leave day totals
//!
//! Callers may pass `x-correlation-id`; otherwise one is generated per request.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use leaveflow_core::{
    AnalyticsReport, ApplicationError, Decision, EmployeeId, InterfaceError, LeavePeriod,
    LeaveRequest, LeaveRequestId, LeaveService, LeaveStore, LeaveTypeCode, NewLeaveRequest,
    QuotaAdjustment, QuotaSnapshot,
};

const CORRELATION_HEADER: &str = "x-correlation-id";

pub struct ApiState<S> {
    service: Arc<LeaveService<S>>,
}

impl<S> Clone for ApiState<S> {
    fn clone(&self) -> Self {
        Self { service: Arc::clone(&self.service) }
    }
}

pub fn router<S>(service: Arc<LeaveService<S>>) -> Router
where
    S: LeaveStore + 'static,
{
    Router::new()
        .route("/requests", post(create_request::<S>))
        .route("/requests/{id}", get(get_request::<S>))
        .route("/requests/{id}/submit", post(submit_request::<S>))
        .route("/requests/{id}/decisions", post(decide_request::<S>))
        .route("/requests/{id}/cancel", post(cancel_request::<S>))
        .route("/employees/{id}/requests", get(employee_requests::<S>))
        .route("/employees/{id}/quotas", get(employee_quotas::<S>))
        .route("/employees/{id}/quotas/{leave_type}", get(employee_quota::<S>))
        .route("/employees/{id}/quotas/{leave_type}/adjustments", post(adjust_quota::<S>))
        .route("/approvers/{id}/pending", get(approver_pending::<S>))
        .route("/analytics", get(analytics::<S>))
        .with_state(ApiState { service })
}

// ---------------------------------------------------------------------------
// Request / Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct CreateRequestBody {
    pub employee_id: EmployeeId,
    pub leave_type: LeaveTypeCode,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    #[serde(default)]
    pub reason: String,
    /// `false` stores a draft for later submission.
    #[serde(default = "submit_by_default")]
    pub submit: bool,
}

fn submit_by_default() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct ActorBody {
    pub actor: EmployeeId,
    #[serde(default)]
    pub comment: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct PeriodQuery {
    pub period: Option<i32>,
}

impl PeriodQuery {
    fn resolve(&self) -> LeavePeriod {
        LeavePeriod(self.period.unwrap_or_else(|| Utc::now().year()))
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct AnalyticsQuery {
    pub period: Option<i32>,
    pub month: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
    pub correlation_id: String,
}

/// `InterfaceError` rendered as an HTTP response.
#[derive(Debug)]
pub struct ApiError(InterfaceError);

impl ApiError {
    fn from_application(error: ApplicationError, correlation_id: &str) -> Self {
        Self(error.into_interface(correlation_id))
    }

    fn status(&self) -> StatusCode {
        match &self.0 {
            InterfaceError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            InterfaceError::Forbidden { .. } => StatusCode::FORBIDDEN,
            InterfaceError::NotFound { .. } => StatusCode::NOT_FOUND,
            InterfaceError::Conflict { .. } => StatusCode::CONFLICT,
            InterfaceError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            InterfaceError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let correlation_id = match &self.0 {
            InterfaceError::BadRequest { correlation_id, .. }
            | InterfaceError::Forbidden { correlation_id, .. }
            | InterfaceError::NotFound { correlation_id, .. }
            | InterfaceError::Conflict { correlation_id, .. }
            | InterfaceError::ServiceUnavailable { correlation_id, .. }
            | InterfaceError::Internal { correlation_id, .. } => correlation_id.clone(),
        };

        if status.is_server_error() {
            warn!(
                event_name = "api.request_failed",
                correlation_id = %correlation_id,
                code = self.0.code(),
                error = %self.0,
                "request failed"
            );
        }

        let body =
            ErrorBody { code: self.0.code(), message: self.0.user_message(), correlation_id };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

fn correlation_id(headers: &HeaderMap) -> String {
    headers
        .get(CORRELATION_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| format!("api-{}", Uuid::new_v4()))
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn create_request<S: LeaveStore + 'static>(
    State(state): State<ApiState<S>>,
    headers: HeaderMap,
    Json(body): Json<CreateRequestBody>,
) -> ApiResult<(StatusCode, Json<LeaveRequest>)> {
    let correlation_id = correlation_id(&headers);
    let input = NewLeaveRequest {
        employee_id: body.employee_id,
        leave_type: body.leave_type,
        start_date: body.start_date,
        end_date: body.end_date,
        reason: body.reason,
    };

    let result = if body.submit {
        state.service.submit_request(&correlation_id, input).await
    } else {
        state.service.create_draft(&correlation_id, input).await
    };
    let request = result.map_err(|error| ApiError::from_application(error, &correlation_id))?;

    info!(
        event_name = "api.request_created",
        correlation_id = %correlation_id,
        request_id = %request.id,
        status = %request.status,
        "leave request created"
    );
    Ok((StatusCode::CREATED, Json(request)))
}

async fn get_request<S: LeaveStore + 'static>(
    State(state): State<ApiState<S>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<Json<LeaveRequest>> {
    let correlation_id = correlation_id(&headers);
    state
        .service
        .get_request(&LeaveRequestId(id))
        .await
        .map(Json)
        .map_err(|error| ApiError::from_application(error, &correlation_id))
}

async fn submit_request<S: LeaveStore + 'static>(
    State(state): State<ApiState<S>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<ActorBody>,
) -> ApiResult<Json<LeaveRequest>> {
    let correlation_id = correlation_id(&headers);
    state
        .service
        .submit(&correlation_id, &LeaveRequestId(id), &body.actor)
        .await
        .map(Json)
        .map_err(|error| ApiError::from_application(error, &correlation_id))
}

async fn decide_request<S: LeaveStore + 'static>(
    State(state): State<ApiState<S>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(decision): Json<Decision>,
) -> ApiResult<Json<LeaveRequest>> {
    let correlation_id = correlation_id(&headers);
    state
        .service
        .decide(&correlation_id, &LeaveRequestId(id), decision)
        .await
        .map(Json)
        .map_err(|error| ApiError::from_application(error, &correlation_id))
}

async fn cancel_request<S: LeaveStore + 'static>(
    State(state): State<ApiState<S>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<ActorBody>,
) -> ApiResult<Json<LeaveRequest>> {
    let correlation_id = correlation_id(&headers);
    state
        .service
        .cancel(&correlation_id, &LeaveRequestId(id), &body.actor, &body.comment)
        .await
        .map(Json)
        .map_err(|error| ApiError::from_application(error, &correlation_id))
}

async fn employee_requests<S: LeaveStore + 'static>(
    State(state): State<ApiState<S>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<LeaveRequest>>> {
    let correlation_id = correlation_id(&headers);
    state
        .service
        .requests_for_employee(&EmployeeId(id))
        .await
        .map(Json)
        .map_err(|error| ApiError::from_application(error, &correlation_id))
}

async fn employee_quotas<S: LeaveStore + 'static>(
    State(state): State<ApiState<S>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Query(query): Query<PeriodQuery>,
) -> ApiResult<Json<Vec<QuotaSnapshot>>> {
    let correlation_id = correlation_id(&headers);
    state
        .service
        .list_quotas(&EmployeeId(id), query.resolve())
        .await
        .map(Json)
        .map_err(|error| ApiError::from_application(error, &correlation_id))
}

async fn employee_quota<S: LeaveStore + 'static>(
    State(state): State<ApiState<S>>,
    headers: HeaderMap,
    Path((id, leave_type)): Path<(String, String)>,
    Query(query): Query<PeriodQuery>,
) -> ApiResult<Json<QuotaSnapshot>> {
    let correlation_id = correlation_id(&headers);
    state
        .service
        .get_quota(&EmployeeId(id), &LeaveTypeCode(leave_type), query.resolve())
        .await
        .map(Json)
        .map_err(|error| ApiError::from_application(error, &correlation_id))
}

async fn adjust_quota<S: LeaveStore + 'static>(
    State(state): State<ApiState<S>>,
    headers: HeaderMap,
    Path((id, leave_type)): Path<(String, String)>,
    Query(query): Query<PeriodQuery>,
    Json(adjustment): Json<QuotaAdjustment>,
) -> ApiResult<Json<QuotaSnapshot>> {
    let correlation_id = correlation_id(&headers);
    state
        .service
        .adjust_quota(
            &correlation_id,
            &EmployeeId(id),
            &LeaveTypeCode(leave_type),
            query.resolve(),
            adjustment,
        )
        .await
        .map(Json)
        .map_err(|error| ApiError::from_application(error, &correlation_id))
}

async fn approver_pending<S: LeaveStore + 'static>(
    State(state): State<ApiState<S>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<LeaveRequest>>> {
    let correlation_id = correlation_id(&headers);
    state
        .service
        .pending_for_approver(&EmployeeId(id))
        .await
        .map(Json)
        .map_err(|error| ApiError::from_application(error, &correlation_id))
}

async fn analytics<S: LeaveStore + 'static>(
    State(state): State<ApiState<S>>,
    headers: HeaderMap,
    Query(query): Query<AnalyticsQuery>,
) -> ApiResult<Json<AnalyticsReport>> {
    let correlation_id = correlation_id(&headers);
    state
        .service
        .analytics(PeriodQuery { period: query.period }.resolve(), query.month)
        .await
        .map(Json)
        .map_err(|error| ApiError::from_application(error, &correlation_id))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
        Router,
    };
    use chrono::{TimeZone, Utc};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use leaveflow_core::config::WorkflowConfig;
    use leaveflow_core::{FixedClock, InMemoryAuditSink, LeaveService, RecordingNotifier};
    use leaveflow_db::fixtures::{ENGINEER, ENGINEERING_LEAD, HR_APPROVER, OPERATOR};
    use leaveflow_db::{DemoDirectory, InMemoryLeaveStore};

    use super::router;

    async fn app() -> Router {
        let store = Arc::new(InMemoryLeaveStore::new());
        DemoDirectory::load(store.as_ref()).await.expect("seed");
        let now = Utc.with_ymd_and_hms(2026, 10, 15, 9, 0, 0).single().expect("timestamp");
        let service = LeaveService::new(
            store,
            Arc::new(RecordingNotifier::default()),
            Arc::new(InMemoryAuditSink::default()),
            WorkflowConfig::default(),
        )
        .with_clock(Arc::new(FixedClock(now)));
        router(Arc::new(service))
    }

    async fn send(
        app: &Router,
        method: &str,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let builder = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .header("x-correlation-id", "test-corr");
        let body = body.map(|value| Body::from(value.to_string())).unwrap_or_else(Body::empty);
        let response = app
            .clone()
            .oneshot(builder.body(body).expect("request"))
            .await
            .expect("router is infallible");

        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body");
        let payload = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).expect("json body")
        };
        (status, payload)
    }

    fn vacation(employee: &str, start: &str, end: &str) -> Value {
        json!({
            "employee_id": employee,
            "leave_type": "VAC",
            "start_date": start,
            "end_date": end,
            "reason": "family trip",
        })
    }

    #[tokio::test]
    async fn submit_then_approve_through_the_chain() {
        let app = app().await;

        let (status, created) =
            send(&app, "POST", "/requests", Some(vacation(ENGINEER, "2026-11-02", "2026-11-04")))
                .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created["status"]["state"], "pending_approval");
        let id = created["id"].as_str().expect("id").to_string();

        let (status, pending) =
            send(&app, "GET", &format!("/approvers/{ENGINEERING_LEAD}/pending"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(pending.as_array().map(Vec::len), Some(1));

        let decision = |approver: &str, role: &str, version: &Value| {
            json!({
                "approver": { "employee_id": approver, "role": role },
                "verdict": "approve",
                "expected_version": version,
            })
        };
        let (status, after_lead) = send(
            &app,
            "POST",
            &format!("/requests/{id}/decisions"),
            Some(decision(ENGINEERING_LEAD, "team_lead", &created["version"])),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(after_lead["status"]["step"], 1);

        let (status, approved) = send(
            &app,
            "POST",
            &format!("/requests/{id}/decisions"),
            Some(decision(HR_APPROVER, "hr", &after_lead["version"])),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(approved["status"]["state"], "approved");

        let (status, quota) =
            send(&app, "GET", &format!("/employees/{ENGINEER}/quotas/VAC?period=2026"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!((quota["used"].clone(), quota["reserved"].clone()), (json!(3), json!(0)));
    }

    #[tokio::test]
    async fn stale_decision_is_a_conflict() {
        let app = app().await;
        let (_, created) =
            send(&app, "POST", "/requests", Some(vacation(OPERATOR, "2026-11-02", "2026-11-03")))
                .await;
        let id = created["id"].as_str().expect("id");

        let (status, error) = send(
            &app,
            "POST",
            &format!("/requests/{id}/decisions"),
            Some(json!({
                "approver": { "employee_id": "emp-lead-ops", "role": "team_lead" },
                "verdict": "reject",
                "expected_version": 99,
            })),
        )
        .await;

        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(error["code"], "stale_state");
        assert_eq!(error["correlation_id"], "test-corr");
    }

    #[tokio::test]
    async fn wrong_approver_is_forbidden() {
        let app = app().await;
        let (_, created) =
            send(&app, "POST", "/requests", Some(vacation(ENGINEER, "2026-11-02", "2026-11-03")))
                .await;
        let id = created["id"].as_str().expect("id");

        let (status, error) = send(
            &app,
            "POST",
            &format!("/requests/{id}/decisions"),
            Some(json!({
                "approver": { "employee_id": HR_APPROVER, "role": "hr" },
                "verdict": "approve",
                "expected_version": created["version"],
            })),
        )
        .await;

        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(error["code"], "not_authorized_approver");
    }

    #[tokio::test]
    async fn overdrawn_quota_is_a_bad_request() {
        let app = app().await;
        let (status, _) = send(
            &app,
            "POST",
            &format!("/employees/{OPERATOR}/quotas/VAC/adjustments?period=2026"),
            Some(json!({ "allocation": 2 })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, error) =
            send(&app, "POST", "/requests", Some(vacation(OPERATOR, "2026-11-02", "2026-11-04")))
                .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(error["code"], "insufficient_quota");
    }

    #[tokio::test]
    async fn draft_is_submitted_and_cancelled_by_its_owner() {
        let app = app().await;
        let mut body = vacation(OPERATOR, "2026-12-07", "2026-12-08");
        body["submit"] = json!(false);
        let (status, draft) = send(&app, "POST", "/requests", Some(body)).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(draft["status"]["state"], "draft");
        let id = draft["id"].as_str().expect("id");

        let (status, submitted) = send(
            &app,
            "POST",
            &format!("/requests/{id}/submit"),
            Some(json!({ "actor": OPERATOR })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(submitted["status"]["state"], "pending_approval");

        let (status, error) = send(
            &app,
            "POST",
            &format!("/requests/{id}/cancel"),
            Some(json!({ "actor": ENGINEER })),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(error["code"], "not_request_owner");

        let (status, cancelled) = send(
            &app,
            "POST",
            &format!("/requests/{id}/cancel"),
            Some(json!({ "actor": OPERATOR, "comment": "plans changed" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(cancelled["status"]["state"], "cancelled");

        let (_, listed) = send(&app, "GET", &format!("/employees/{OPERATOR}/requests"), None).await;
        assert_eq!(listed.as_array().map(Vec::len), Some(1));
    }

    #[tokio::test]
    async fn analytics_reports_approved_days_for_the_month() {
        let app = app().await;
        let (_, created) =
            send(&app, "POST", "/requests", Some(vacation(OPERATOR, "2026-11-02", "2026-11-04")))
                .await;
        let (status, _) = send(
            &app,
            "POST",
            &format!("/requests/{}/decisions", created["id"].as_str().expect("id")),
            Some(json!({
                "approver": { "employee_id": "emp-lead-ops", "role": "team_lead" },
                "verdict": "approve",
                "expected_version": created["version"],
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        send(&app, "POST", "/requests", Some(vacation(ENGINEER, "2026-11-09", "2026-11-10"))).await;

        let (status, report) = send(&app, "GET", "/analytics?period=2026&month=11", None).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(report["window"]["start"], "2026-11-01");
        assert_eq!(report["window"]["end"], "2026-11-30");
        assert_eq!(report["total_days"], 3);
        assert_eq!(report["by_employee"], json!([{ "key": OPERATOR, "days": 3 }]));
        assert_eq!(report["by_month"], json!([{ "key": "2026-11", "days": 3 }]));

        let (status, error) = send(&app, "GET", "/analytics?period=2026&month=13", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(error["code"], "invalid_report_window");
    }

    #[tokio::test]
    async fn unknown_request_is_not_found() {
        let app = app().await;

        let (status, error) = send(&app, "GET", "/requests/LR-missing", None).await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(error["code"], "not_found");
    }

    #[tokio::test]
    async fn quota_listing_covers_every_leave_type() {
        let app = app().await;

        let (status, quotas) =
            send(&app, "GET", &format!("/employees/{ENGINEER}/quotas?period=2026"), None).await;

        assert_eq!(status, StatusCode::OK);
        let codes: Vec<&str> = quotas
            .as_array()
            .expect("array")
            .iter()
            .filter_map(|quota| quota["leave_type"].as_str())
            .collect();
        assert_eq!(codes, ["SICK", "UNPAID", "VAC"]);
    }
}

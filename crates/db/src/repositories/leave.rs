use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, Transaction};

use leaveflow_core::domain::employee::{ApproverRole, EmployeeId};
use leaveflow_core::domain::leave_request::{
    ApprovalStep, DateRange, DecisionAction, DecisionRecord, LeaveRequest, LeaveRequestId,
    LeaveStatus, StepOutcome,
};
use leaveflow_core::domain::leave_type::LeaveTypeCode;
use leaveflow_core::ledger::{
    LeavePeriod, QuotaKey, QuotaRecord, Reservation, ReservationId, ReservationState,
};
use leaveflow_core::workflow::{ChangeSet, ConflictKind, LeaveStore, StoreError, VersionedWrite};

use super::RepositoryError;
use crate::DbPool;

const DATE_FORMAT: &str = "%Y-%m-%d";

const REQUEST_COLUMNS: &str = "r.id, r.employee_id, r.leave_type, r.start_date, r.end_date, \
     r.reason, r.status, r.current_step, r.reservation_id, r.policy_notes_json, r.version, \
     r.created_at, r.updated_at";

pub struct SqlLeaveStore {
    pub(crate) pool: DbPool,
}

impl SqlLeaveStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    async fn load_requests(
        &self,
        sql: &str,
        binds: &[String],
    ) -> Result<Vec<LeaveRequest>, RepositoryError> {
        let mut query = sqlx::query(sql);
        for value in binds {
            query = query.bind(value);
        }
        let rows = query.fetch_all(&self.pool).await?;

        let mut requests = Vec::with_capacity(rows.len());
        for row in &rows {
            requests.push(self.hydrate_request(row).await?);
        }
        Ok(requests)
    }

    async fn hydrate_request(&self, row: &SqliteRow) -> Result<LeaveRequest, RepositoryError> {
        let id: String = column(row, "id")?;

        let steps = sqlx::query(
            "SELECT step_order, role, assigned_to, outcome
             FROM leave_approval_step
             WHERE request_id = ?
             ORDER BY step_order",
        )
        .bind(&id)
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(row_to_step)
        .collect::<Result<Vec<_>, _>>()?;

        let decisions = sqlx::query(
            "SELECT sequence, actor_id, role, action, comment, decided_at
             FROM leave_decision
             WHERE request_id = ?
             ORDER BY sequence",
        )
        .bind(&id)
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(row_to_decision)
        .collect::<Result<Vec<_>, _>>()?;

        row_to_request(row, steps, decisions)
    }
}

#[async_trait]
impl LeaveStore for SqlLeaveStore {
    async fn request(&self, id: &LeaveRequestId) -> Result<Option<LeaveRequest>, StoreError> {
        let sql = format!("SELECT {REQUEST_COLUMNS} FROM leave_request r WHERE r.id = ?");
        let row = sqlx::query(&sql)
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(RepositoryError::from)?;

        match row {
            Some(row) => Ok(Some(self.hydrate_request(&row).await?)),
            None => Ok(None),
        }
    }

    async fn requests_for_employee(
        &self,
        employee_id: &EmployeeId,
    ) -> Result<Vec<LeaveRequest>, StoreError> {
        let sql = format!(
            "SELECT {REQUEST_COLUMNS} FROM leave_request r
             WHERE r.employee_id = ?
             ORDER BY r.start_date, r.created_at"
        );
        Ok(self.load_requests(&sql, &[employee_id.0.clone()]).await?)
    }

    async fn pending_for_approver(
        &self,
        approver: &EmployeeId,
    ) -> Result<Vec<LeaveRequest>, StoreError> {
        let sql = format!(
            "SELECT {REQUEST_COLUMNS} FROM leave_request r
             JOIN leave_approval_step s
               ON s.request_id = r.id AND s.step_order = r.current_step
             WHERE r.status = 'pending_approval' AND s.assigned_to = ?
             ORDER BY r.start_date, r.created_at"
        );
        Ok(self.load_requests(&sql, &[approver.0.clone()]).await?)
    }

    async fn approved_starting_between(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<LeaveRequest>, StoreError> {
        let sql = format!(
            "SELECT {REQUEST_COLUMNS} FROM leave_request r
             WHERE r.status = 'approved' AND r.start_date >= ? AND r.start_date <= ?
             ORDER BY r.start_date, r.created_at"
        );
        let binds = [from.format(DATE_FORMAT).to_string(), to.format(DATE_FORMAT).to_string()];
        Ok(self.load_requests(&sql, &binds).await?)
    }

    async fn approved_overlapping(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<LeaveRequest>, StoreError> {
        let sql = format!(
            "SELECT {REQUEST_COLUMNS} FROM leave_request r
             WHERE r.status = 'approved' AND r.start_date <= ? AND r.end_date >= ?
             ORDER BY r.start_date, r.created_at"
        );
        let binds = [to.format(DATE_FORMAT).to_string(), from.format(DATE_FORMAT).to_string()];
        Ok(self.load_requests(&sql, &binds).await?)
    }

    async fn quota(&self, key: &QuotaKey) -> Result<Option<QuotaRecord>, StoreError> {
        let row = sqlx::query(
            "SELECT employee_id, leave_type, period, allocation, carried_over, emergency_grant,
                    used, reserved, version, updated_at
             FROM leave_quota
             WHERE employee_id = ? AND leave_type = ? AND period = ?",
        )
        .bind(&key.employee_id.0)
        .bind(&key.leave_type.0)
        .bind(key.period.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        Ok(row.as_ref().map(row_to_quota).transpose()?)
    }

    async fn quotas_for_employee(
        &self,
        employee_id: &EmployeeId,
        period: LeavePeriod,
    ) -> Result<Vec<QuotaRecord>, StoreError> {
        let rows = sqlx::query(
            "SELECT employee_id, leave_type, period, allocation, carried_over, emergency_grant,
                    used, reserved, version, updated_at
             FROM leave_quota
             WHERE employee_id = ? AND period = ?
             ORDER BY leave_type",
        )
        .bind(&employee_id.0)
        .bind(period.0)
        .fetch_all(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        Ok(rows.iter().map(row_to_quota).collect::<Result<Vec<_>, _>>()?)
    }

    async fn reservation(&self, id: &ReservationId) -> Result<Option<Reservation>, StoreError> {
        let row = sqlx::query(
            "SELECT id, request_id, employee_id, leave_type, period, units, state, created_at,
                    settled_at
             FROM quota_reservation
             WHERE id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        Ok(row.as_ref().map(row_to_reservation).transpose()?)
    }

    async fn apply(&self, changes: ChangeSet) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(RepositoryError::from)?;

        // The first statement must write so the transaction takes the write lock up front.
        if let Some(quota) = &changes.quota {
            write_quota(&mut tx, quota).await?;
        }
        if let Some(request) = &changes.request {
            write_request(&mut tx, request).await?;
        }
        if let Some(reservation) = &changes.reservation {
            write_reservation(&mut tx, reservation).await?;
        }

        tx.commit().await.map_err(RepositoryError::from)?;
        Ok(())
    }
}

async fn write_quota(
    tx: &mut Transaction<'_, Sqlite>,
    write: &VersionedWrite<QuotaRecord>,
) -> Result<(), StoreError> {
    let quota = &write.value;
    let updated_at = quota.updated_at.to_rfc3339();

    let result = if write.expected_version == 0 {
        sqlx::query(
            "INSERT INTO leave_quota (
                employee_id, leave_type, period, allocation, carried_over, emergency_grant,
                used, reserved, version, updated_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(employee_id, leave_type, period) DO NOTHING",
        )
        .bind(&quota.key.employee_id.0)
        .bind(&quota.key.leave_type.0)
        .bind(quota.key.period.0)
        .bind(i64::from(quota.allocation()))
        .bind(i64::from(quota.carried_over()))
        .bind(i64::from(quota.emergency_grant()))
        .bind(i64::from(quota.used()))
        .bind(i64::from(quota.reserved()))
        .bind(i64::from(quota.version))
        .bind(updated_at)
        .execute(&mut **tx)
        .await
    } else {
        sqlx::query(
            "UPDATE leave_quota
             SET allocation = ?, carried_over = ?, emergency_grant = ?, used = ?, reserved = ?,
                 version = ?, updated_at = ?
             WHERE employee_id = ? AND leave_type = ? AND period = ? AND version = ?",
        )
        .bind(i64::from(quota.allocation()))
        .bind(i64::from(quota.carried_over()))
        .bind(i64::from(quota.emergency_grant()))
        .bind(i64::from(quota.used()))
        .bind(i64::from(quota.reserved()))
        .bind(i64::from(quota.version))
        .bind(updated_at)
        .bind(&quota.key.employee_id.0)
        .bind(&quota.key.leave_type.0)
        .bind(quota.key.period.0)
        .bind(i64::from(write.expected_version))
        .execute(&mut **tx)
        .await
    }
    .map_err(RepositoryError::from)?;

    if result.rows_affected() == 0 {
        tracing::debug!(
            event_name = "db.quota_version_conflict",
            quota = %quota.key,
            expected_version = write.expected_version,
            "quota row changed underneath the writer"
        );
        return Err(StoreError::Conflict(ConflictKind::Quota { key: quota.key.clone() }));
    }
    Ok(())
}

async fn write_request(
    tx: &mut Transaction<'_, Sqlite>,
    write: &VersionedWrite<LeaveRequest>,
) -> Result<(), StoreError> {
    let request = &write.value;
    let policy_notes = serde_json::to_string(&request.policy_notes)
        .map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let current_step = request.status.step_index().map(|step| step as i64);
    let reservation_id = request.reservation_id.as_ref().map(|id| id.0.clone());

    let result = if write.expected_version == 0 {
        sqlx::query(
            "INSERT INTO leave_request (
                id, employee_id, leave_type, start_date, end_date, reason, status, current_step,
                reservation_id, policy_notes_json, version, created_at, updated_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO NOTHING",
        )
        .bind(&request.id.0)
        .bind(&request.employee_id.0)
        .bind(&request.leave_type.0)
        .bind(request.range.start().format(DATE_FORMAT).to_string())
        .bind(request.range.end().format(DATE_FORMAT).to_string())
        .bind(&request.reason)
        .bind(request.status.as_str())
        .bind(current_step)
        .bind(reservation_id)
        .bind(policy_notes)
        .bind(i64::from(request.version))
        .bind(request.created_at.to_rfc3339())
        .bind(request.updated_at.to_rfc3339())
        .execute(&mut **tx)
        .await
    } else {
        sqlx::query(
            "UPDATE leave_request
             SET status = ?, current_step = ?, reservation_id = ?, policy_notes_json = ?,
                 version = ?, updated_at = ?
             WHERE id = ? AND version = ?",
        )
        .bind(request.status.as_str())
        .bind(current_step)
        .bind(reservation_id)
        .bind(policy_notes)
        .bind(i64::from(request.version))
        .bind(request.updated_at.to_rfc3339())
        .bind(&request.id.0)
        .bind(i64::from(write.expected_version))
        .execute(&mut **tx)
        .await
    }
    .map_err(RepositoryError::from)?;

    if result.rows_affected() == 0 {
        let actual: Option<i64> =
            sqlx::query_scalar("SELECT version FROM leave_request WHERE id = ?")
                .bind(&request.id.0)
                .fetch_optional(&mut **tx)
                .await
                .map_err(RepositoryError::from)?;
        let actual = actual.and_then(|version| u32::try_from(version).ok()).unwrap_or(0);
        return Err(StoreError::Conflict(ConflictKind::Request { id: request.id.clone(), actual }));
    }

    if request.status.blocks_calendar() {
        let conflicting: Option<String> = sqlx::query_scalar(
            "SELECT id FROM leave_request
             WHERE employee_id = ? AND id <> ?
               AND status IN ('pending_approval', 'approved')
               AND start_date <= ? AND end_date >= ?
             ORDER BY start_date
             LIMIT 1",
        )
        .bind(&request.employee_id.0)
        .bind(&request.id.0)
        .bind(request.range.end().format(DATE_FORMAT).to_string())
        .bind(request.range.start().format(DATE_FORMAT).to_string())
        .fetch_optional(&mut **tx)
        .await
        .map_err(RepositoryError::from)?;

        if let Some(conflicting) = conflicting {
            return Err(StoreError::Conflict(ConflictKind::Overlap {
                request_id: request.id.clone(),
                conflicting: LeaveRequestId(conflicting),
            }));
        }
    }

    for step in &request.approval_steps {
        sqlx::query(
            "INSERT INTO leave_approval_step (request_id, step_order, role, assigned_to, outcome)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(request_id, step_order) DO UPDATE SET
                role = excluded.role,
                assigned_to = excluded.assigned_to,
                outcome = excluded.outcome",
        )
        .bind(&request.id.0)
        .bind(step.order as i64)
        .bind(step.role.as_str())
        .bind(step.assigned_to.as_ref().map(|id| id.0.clone()))
        .bind(step.outcome.as_str())
        .execute(&mut **tx)
        .await
        .map_err(RepositoryError::from)?;
    }

    for decision in request.decisions() {
        sqlx::query(
            "INSERT INTO leave_decision (
                request_id, sequence, actor_id, role, action, comment, decided_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(request_id, sequence) DO NOTHING",
        )
        .bind(&request.id.0)
        .bind(decision.sequence as i64)
        .bind(&decision.actor.0)
        .bind(decision.role.map(|role| role.as_str()))
        .bind(decision.action.as_str())
        .bind(&decision.comment)
        .bind(decision.decided_at.to_rfc3339())
        .execute(&mut **tx)
        .await
        .map_err(RepositoryError::from)?;
    }

    Ok(())
}

async fn write_reservation(
    tx: &mut Transaction<'_, Sqlite>,
    reservation: &Reservation,
) -> Result<(), StoreError> {
    sqlx::query(
        "INSERT INTO quota_reservation (
            id, request_id, employee_id, leave_type, period, units, state, created_at, settled_at
         ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET
            state = excluded.state,
            settled_at = excluded.settled_at",
    )
    .bind(&reservation.id.0)
    .bind(&reservation.request_id.0)
    .bind(&reservation.key.employee_id.0)
    .bind(&reservation.key.leave_type.0)
    .bind(reservation.key.period.0)
    .bind(i64::from(reservation.units))
    .bind(reservation.state.as_str())
    .bind(reservation.created_at.to_rfc3339())
    .bind(reservation.settled_at.map(|at| at.to_rfc3339()))
    .execute(&mut **tx)
    .await
    .map_err(RepositoryError::from)?;
    Ok(())
}

pub(crate) fn column<T>(row: &SqliteRow, name: &str) -> Result<T, RepositoryError>
where
    T: for<'r> sqlx::Decode<'r, Sqlite> + sqlx::Type<Sqlite>,
{
    row.try_get(name).map_err(|e| RepositoryError::Decode(e.to_string()))
}

pub(crate) fn unsigned(row: &SqliteRow, name: &str) -> Result<u32, RepositoryError> {
    let value: i64 = column(row, name)?;
    u32::try_from(value)
        .map_err(|_| RepositoryError::Decode(format!("{name} out of range: {value}")))
}

fn timestamp(value: &str, name: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Decode(format!("invalid {name}: {e}")))
}

fn date(value: &str, name: &str) -> Result<NaiveDate, RepositoryError> {
    NaiveDate::parse_from_str(value, DATE_FORMAT)
        .map_err(|e| RepositoryError::Decode(format!("invalid {name}: {e}")))
}

fn role(value: &str) -> Result<ApproverRole, RepositoryError> {
    ApproverRole::parse(value)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown approver role `{value}`")))
}

fn index(value: i64, name: &str) -> Result<usize, RepositoryError> {
    usize::try_from(value)
        .map_err(|_| RepositoryError::Decode(format!("{name} out of range: {value}")))
}

fn row_to_step(row: &SqliteRow) -> Result<ApprovalStep, RepositoryError> {
    let order: i64 = column(row, "step_order")?;
    let role_str: String = column(row, "role")?;
    let assigned_to: Option<String> = column(row, "assigned_to")?;
    let outcome_str: String = column(row, "outcome")?;

    Ok(ApprovalStep {
        order: index(order, "step_order")?,
        role: role(&role_str)?,
        assigned_to: assigned_to.map(EmployeeId),
        outcome: StepOutcome::parse(&outcome_str).ok_or_else(|| {
            RepositoryError::Decode(format!("unknown step outcome `{outcome_str}`"))
        })?,
    })
}

fn row_to_decision(row: &SqliteRow) -> Result<DecisionRecord, RepositoryError> {
    let sequence: i64 = column(row, "sequence")?;
    let actor: String = column(row, "actor_id")?;
    let role_str: Option<String> = column(row, "role")?;
    let action_str: String = column(row, "action")?;
    let comment: String = column(row, "comment")?;
    let decided_at: String = column(row, "decided_at")?;

    Ok(DecisionRecord {
        sequence: index(sequence, "sequence")?,
        actor: EmployeeId(actor),
        role: role_str.as_deref().map(role).transpose()?,
        action: DecisionAction::parse(&action_str).ok_or_else(|| {
            RepositoryError::Decode(format!("unknown decision action `{action_str}`"))
        })?,
        comment,
        decided_at: timestamp(&decided_at, "decided_at")?,
    })
}

fn row_to_status(status: &str, current_step: Option<i64>) -> Result<LeaveStatus, RepositoryError> {
    match (status, current_step) {
        ("draft", _) => Ok(LeaveStatus::Draft),
        ("pending_approval", Some(step)) => {
            Ok(LeaveStatus::PendingApproval { step: index(step, "current_step")? })
        }
        ("approved", _) => Ok(LeaveStatus::Approved),
        ("rejected", _) => Ok(LeaveStatus::Rejected),
        ("cancelled", _) => Ok(LeaveStatus::Cancelled),
        (other, step) => {
            Err(RepositoryError::Decode(format!("invalid status `{other}` with step {step:?}")))
        }
    }
}

fn row_to_request(
    row: &SqliteRow,
    steps: Vec<ApprovalStep>,
    decisions: Vec<DecisionRecord>,
) -> Result<LeaveRequest, RepositoryError> {
    let id: String = column(row, "id")?;
    let employee_id: String = column(row, "employee_id")?;
    let leave_type: String = column(row, "leave_type")?;
    let start_date: String = column(row, "start_date")?;
    let end_date: String = column(row, "end_date")?;
    let reason: String = column(row, "reason")?;
    let status: String = column(row, "status")?;
    let current_step: Option<i64> = column(row, "current_step")?;
    let reservation_id: Option<String> = column(row, "reservation_id")?;
    let policy_notes_json: String = column(row, "policy_notes_json")?;
    let created_at: String = column(row, "created_at")?;
    let updated_at: String = column(row, "updated_at")?;

    let range = DateRange::new(date(&start_date, "start_date")?, date(&end_date, "end_date")?)
        .map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let policy_notes: Vec<String> = serde_json::from_str(&policy_notes_json)
        .map_err(|e| RepositoryError::Decode(format!("invalid policy_notes_json: {e}")))?;

    Ok(LeaveRequest::restore(
        LeaveRequestId(id),
        EmployeeId(employee_id),
        LeaveTypeCode(leave_type),
        range,
        reason,
        row_to_status(&status, current_step)?,
        steps,
        decisions,
        reservation_id.map(ReservationId),
        policy_notes,
        unsigned(row, "version")?,
        timestamp(&created_at, "created_at")?,
        timestamp(&updated_at, "updated_at")?,
    ))
}

fn quota_key(row: &SqliteRow) -> Result<QuotaKey, RepositoryError> {
    let employee_id: String = column(row, "employee_id")?;
    let leave_type: String = column(row, "leave_type")?;
    let period: i32 = column(row, "period")?;
    Ok(QuotaKey {
        employee_id: EmployeeId(employee_id),
        leave_type: LeaveTypeCode(leave_type),
        period: LeavePeriod(period),
    })
}

fn row_to_quota(row: &SqliteRow) -> Result<QuotaRecord, RepositoryError> {
    let updated_at: String = column(row, "updated_at")?;
    QuotaRecord::restore(
        quota_key(row)?,
        unsigned(row, "allocation")?,
        unsigned(row, "carried_over")?,
        unsigned(row, "emergency_grant")?,
        unsigned(row, "used")?,
        unsigned(row, "reserved")?,
        unsigned(row, "version")?,
        timestamp(&updated_at, "updated_at")?,
    )
    .map_err(|e| RepositoryError::Decode(e.to_string()))
}

fn row_to_reservation(row: &SqliteRow) -> Result<Reservation, RepositoryError> {
    let id: String = column(row, "id")?;
    let request_id: String = column(row, "request_id")?;
    let state_str: String = column(row, "state")?;
    let created_at: String = column(row, "created_at")?;
    let settled_at: Option<String> = column(row, "settled_at")?;

    Ok(Reservation {
        id: ReservationId(id),
        key: quota_key(row)?,
        request_id: LeaveRequestId(request_id),
        units: unsigned(row, "units")?,
        state: ReservationState::parse(&state_str).ok_or_else(|| {
            RepositoryError::Decode(format!("unknown reservation state `{state_str}`"))
        })?,
        created_at: timestamp(&created_at, "created_at")?,
        settled_at: settled_at.as_deref().map(|at| timestamp(at, "settled_at")).transpose()?,
    })
}

use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::SqliteRow;

use leaveflow_core::domain::employee::{
    ApproverRole, Department, DepartmentId, Employee, EmployeeId,
};
use leaveflow_core::domain::leave_type::{LeaveType, LeaveTypeCode};
use leaveflow_core::workflow::{Directory, StoreError};

use super::leave::{column, unsigned, SqlLeaveStore};
use super::{DirectoryRepository, RepositoryError};

fn row_to_employee(row: &SqliteRow) -> Result<Employee, RepositoryError> {
    let id: String = column(row, "id")?;
    let display_name: String = column(row, "display_name")?;
    let email: Option<String> = column(row, "email")?;
    let department_id: Option<String> = column(row, "department_id")?;
    let manager_id: Option<String> = column(row, "manager_id")?;

    Ok(Employee {
        id: EmployeeId(id),
        display_name,
        email,
        department_id: department_id.map(DepartmentId),
        manager_id: manager_id.map(EmployeeId),
    })
}

fn row_to_leave_type(row: &SqliteRow) -> Result<LeaveType, RepositoryError> {
    let code: String = column(row, "code")?;
    let name: String = column(row, "name")?;

    Ok(LeaveType {
        code: LeaveTypeCode(code),
        name,
        default_allocation: unsigned(row, "default_allocation")?,
        max_days_per_request: unsigned(row, "max_days_per_request")?,
        min_notice_days: unsigned(row, "min_notice_days")?,
        requires_documentation: column(row, "requires_documentation")?,
        is_paid: column(row, "is_paid")?,
        requires_hr_approval: column(row, "requires_hr_approval")?,
    })
}

#[async_trait]
impl Directory for SqlLeaveStore {
    async fn employee(&self, id: &EmployeeId) -> Result<Option<Employee>, StoreError> {
        let row = sqlx::query(
            "SELECT id, display_name, email, department_id, manager_id
             FROM employee
             WHERE id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        Ok(row.as_ref().map(row_to_employee).transpose()?)
    }

    async fn leave_type(&self, code: &LeaveTypeCode) -> Result<Option<LeaveType>, StoreError> {
        let row = sqlx::query(
            "SELECT code, name, default_allocation, max_days_per_request, min_notice_days,
                    requires_documentation, is_paid, requires_hr_approval
             FROM leave_type
             WHERE code = ?",
        )
        .bind(&code.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        Ok(row.as_ref().map(row_to_leave_type).transpose()?)
    }

    async fn leave_types(&self) -> Result<Vec<LeaveType>, StoreError> {
        let rows = sqlx::query(
            "SELECT code, name, default_allocation, max_days_per_request, min_notice_days,
                    requires_documentation, is_paid, requires_hr_approval
             FROM leave_type
             ORDER BY code",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        Ok(rows.iter().map(row_to_leave_type).collect::<Result<Vec<_>, _>>()?)
    }

    async fn departments(&self) -> Result<Vec<Department>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, name, team_lead_id, hr_approver_id FROM department ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        let mut departments = Vec::with_capacity(rows.len());
        for row in &rows {
            let id: String = column(row, "id")?;
            let name: String = column(row, "name")?;
            let team_lead: Option<String> = column(row, "team_lead_id")?;
            let hr_approver: Option<String> = column(row, "hr_approver_id")?;

            let roles: Vec<String> = sqlx::query_scalar(
                "SELECT role FROM department_approval_rule
                 WHERE department_id = ?
                 ORDER BY step_order",
            )
            .bind(&id)
            .fetch_all(&self.pool)
            .await
            .map_err(RepositoryError::from)?;
            let approval_rules = roles
                .iter()
                .map(|role| {
                    ApproverRole::parse(role).ok_or_else(|| {
                        RepositoryError::Decode(format!("unknown approver role `{role}`"))
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;

            departments.push(Department {
                id: DepartmentId(id),
                name,
                team_lead: team_lead.map(EmployeeId),
                hr_approver: hr_approver.map(EmployeeId),
                approval_rules,
            });
        }
        Ok(departments)
    }
}

#[async_trait]
impl DirectoryRepository for SqlLeaveStore {
    async fn save_department(&self, department: Department) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO department (id, name, team_lead_id, hr_approver_id, created_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                team_lead_id = excluded.team_lead_id,
                hr_approver_id = excluded.hr_approver_id",
        )
        .bind(&department.id.0)
        .bind(&department.name)
        .bind(department.team_lead.as_ref().map(|id| id.0.clone()))
        .bind(department.hr_approver.as_ref().map(|id| id.0.clone()))
        .bind(Utc::now().to_rfc3339())
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM department_approval_rule WHERE department_id = ?")
            .bind(&department.id.0)
            .execute(&mut *tx)
            .await?;

        for (order, role) in department.approval_rules.iter().enumerate() {
            sqlx::query(
                "INSERT INTO department_approval_rule (department_id, step_order, role)
                 VALUES (?, ?, ?)",
            )
            .bind(&department.id.0)
            .bind(order as i64)
            .bind(role.as_str())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn save_employee(&self, employee: Employee) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO employee (id, display_name, email, department_id, manager_id, created_at)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                display_name = excluded.display_name,
                email = excluded.email,
                department_id = excluded.department_id,
                manager_id = excluded.manager_id",
        )
        .bind(&employee.id.0)
        .bind(&employee.display_name)
        .bind(employee.email.as_deref())
        .bind(employee.department_id.as_ref().map(|id| id.0.clone()))
        .bind(employee.manager_id.as_ref().map(|id| id.0.clone()))
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn save_leave_type(&self, leave_type: LeaveType) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO leave_type (
                code, name, default_allocation, max_days_per_request, min_notice_days,
                requires_documentation, is_paid, requires_hr_approval
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(code) DO UPDATE SET
                name = excluded.name,
                default_allocation = excluded.default_allocation,
                max_days_per_request = excluded.max_days_per_request,
                min_notice_days = excluded.min_notice_days,
                requires_documentation = excluded.requires_documentation,
                is_paid = excluded.is_paid,
                requires_hr_approval = excluded.requires_hr_approval",
        )
        .bind(&leave_type.code.0)
        .bind(&leave_type.name)
        .bind(i64::from(leave_type.default_allocation))
        .bind(i64::from(leave_type.max_days_per_request))
        .bind(i64::from(leave_type.min_notice_days))
        .bind(leave_type.requires_documentation)
        .bind(leave_type.is_paid)
        .bind(leave_type.requires_hr_approval)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use leaveflow_core::domain::employee::{
        ApproverRole, Department, DepartmentId, Employee, EmployeeId,
    };
    use leaveflow_core::domain::leave_type::LeaveTypeCode;
    use leaveflow_core::workflow::Directory;

    use crate::repositories::{DirectoryRepository, SqlLeaveStore};
    use crate::{connect_with_settings, migrations::run_pending};

    async fn store() -> SqlLeaveStore {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("migrations");
        SqlLeaveStore::new(pool)
    }

    #[tokio::test]
    async fn department_rules_are_replaced_on_save() {
        let store = store().await;
        let mut department = Department {
            id: DepartmentId("eng".to_string()),
            name: "Engineering".to_string(),
            team_lead: None,
            hr_approver: None,
            approval_rules: vec![ApproverRole::TeamLead, ApproverRole::Hr],
        };
        store.save_department(department.clone()).await.expect("save");

        department.approval_rules = vec![ApproverRole::Hr];
        store.save_department(department.clone()).await.expect("resave");

        let departments = store.departments().await.expect("departments");
        assert_eq!(departments, vec![department]);
    }

    #[tokio::test]
    async fn employee_round_trips_through_directory() {
        let store = store().await;
        let employee = Employee {
            id: EmployeeId("emp-1".to_string()),
            display_name: "Alex Kim".to_string(),
            email: Some("alex@example.com".to_string()),
            department_id: None,
            manager_id: Some(EmployeeId("lead-1".to_string())),
        };
        store.save_employee(employee.clone()).await.expect("save");

        let loaded = store.employee(&employee.id).await.expect("load");
        assert_eq!(loaded, Some(employee));
        assert_eq!(store.employee(&EmployeeId("ghost".to_string())).await.expect("load"), None);
    }

    #[tokio::test]
    async fn seeded_leave_types_are_readable() {
        let store = store().await;

        let sick = store
            .leave_type(&LeaveTypeCode("SICK".to_string()))
            .await
            .expect("load")
            .expect("seeded by migration");

        assert_eq!(sick.default_allocation, 10);
        assert!(sick.requires_documentation);
        assert!(!sick.requires_hr_approval);
        assert_eq!(store.leave_types().await.expect("all").len(), 3);
    }
}

use serde::Serialize;

use leaveflow_core::approvals::{ApprovalChainConfig, ApprovalChainResolver};
use leaveflow_core::domain::employee::{
    ApproverRole, Department, DepartmentId, Employee, EmployeeId,
};
use leaveflow_core::domain::leave_type::default_leave_types;

use crate::repositories::{DirectoryRepository, RepositoryError};

pub const ENGINEERING: &str = "eng";
pub const OPERATIONS: &str = "ops";

pub const ENGINEERING_LEAD: &str = "emp-lead-eng";
pub const OPERATIONS_LEAD: &str = "emp-lead-ops";
pub const HR_APPROVER: &str = "emp-hr-01";
pub const ENGINEER: &str = "emp-eng-01";
pub const SECOND_ENGINEER: &str = "emp-eng-02";
pub const OPERATOR: &str = "emp-ops-01";

struct SeedEmployee {
    id: &'static str,
    display_name: &'static str,
    department: &'static str,
    manager: Option<&'static str>,
}

const SEED_EMPLOYEES: &[SeedEmployee] = &[
    SeedEmployee {
        id: ENGINEERING_LEAD,
        display_name: "Morgan Reyes",
        department: ENGINEERING,
        manager: None,
    },
    SeedEmployee {
        id: OPERATIONS_LEAD,
        display_name: "Jamie Chen",
        department: OPERATIONS,
        manager: None,
    },
    SeedEmployee {
        id: HR_APPROVER,
        display_name: "Casey Novak",
        department: OPERATIONS,
        manager: Some(OPERATIONS_LEAD),
    },
    SeedEmployee {
        id: ENGINEER,
        display_name: "Alex Kim",
        department: ENGINEERING,
        manager: Some(ENGINEERING_LEAD),
    },
    SeedEmployee {
        id: SECOND_ENGINEER,
        display_name: "Sam Ortiz",
        department: ENGINEERING,
        manager: Some(ENGINEERING_LEAD),
    },
    SeedEmployee {
        id: OPERATOR,
        display_name: "Robin Diaz",
        department: OPERATIONS,
        manager: Some(OPERATIONS_LEAD),
    },
];

fn seed_departments() -> Vec<Department> {
    vec![
        Department {
            id: DepartmentId(ENGINEERING.to_string()),
            name: "Engineering".to_string(),
            team_lead: Some(EmployeeId(ENGINEERING_LEAD.to_string())),
            hr_approver: Some(EmployeeId(HR_APPROVER.to_string())),
            approval_rules: vec![ApproverRole::TeamLead, ApproverRole::Hr],
        },
        // Operations only needs its lead to sign off.
        Department {
            id: DepartmentId(OPERATIONS.to_string()),
            name: "Operations".to_string(),
            team_lead: Some(EmployeeId(OPERATIONS_LEAD.to_string())),
            hr_approver: Some(EmployeeId(HR_APPROVER.to_string())),
            approval_rules: vec![ApproverRole::TeamLead],
        },
    ]
}

fn seed_employee(seed: &SeedEmployee) -> Employee {
    Employee {
        id: EmployeeId(seed.id.to_string()),
        display_name: seed.display_name.to_string(),
        email: Some(format!("{}@example.com", seed.id)),
        department_id: Some(DepartmentId(seed.department.to_string())),
        manager_id: seed.manager.map(|id| EmployeeId(id.to_string())),
    }
}

/// Demo organisation used by `leaveflow seed` and the integration tests: two departments, their
/// leads, a shared HR approver and a few employees, plus the default leave types.
pub struct DemoDirectory;

impl DemoDirectory {
    /// Idempotent: every row is upserted.
    pub async fn load<R>(repository: &R) -> Result<SeedResult, RepositoryError>
    where
        R: DirectoryRepository + ?Sized,
    {
        let departments = seed_departments();
        for department in &departments {
            repository.save_department(department.clone()).await?;
        }
        for seed in SEED_EMPLOYEES {
            repository.save_employee(seed_employee(seed)).await?;
        }
        let leave_types = default_leave_types();
        for leave_type in &leave_types {
            repository.save_leave_type(leave_type.clone()).await?;
        }

        Ok(SeedResult {
            departments: departments.len(),
            employees: SEED_EMPLOYEES.len(),
            leave_types: leave_types.len(),
        })
    }

    /// Checks that every demo employee exists and can be routed through an approval chain for
    /// every leave type.
    pub async fn verify<R>(repository: &R) -> Result<VerificationResult, RepositoryError>
    where
        R: DirectoryRepository + ?Sized,
    {
        let mut errors = Vec::new();
        let departments = repository.departments().await?;
        let leave_types = repository.leave_types().await?;
        let resolver = ApprovalChainResolver::new(ApprovalChainConfig::new(departments));

        for seed in SEED_EMPLOYEES {
            let id = EmployeeId(seed.id.to_string());
            let Some(employee) = repository.employee(&id).await? else {
                errors.push(format!("employee {} is missing", seed.id));
                continue;
            };
            if seed.manager.is_none() {
                continue;
            }
            for leave_type in &leave_types {
                if let Err(error) = resolver.resolve(&employee, leave_type) {
                    errors.push(format!("{} / {}: {error}", seed.id, leave_type.code));
                }
            }
        }
        if leave_types.is_empty() {
            errors.push("no leave types configured".to_string());
        }

        Ok(VerificationResult {
            passed: errors.is_empty(),
            employees_checked: SEED_EMPLOYEES.len(),
            errors,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SeedResult {
    pub departments: usize,
    pub employees: usize,
    pub leave_types: usize,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct VerificationResult {
    pub passed: bool,
    pub employees_checked: usize,
    pub errors: Vec<String>,
}

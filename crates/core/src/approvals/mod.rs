//! Approval chain resolution and approver authorization.
//!
//! The department routing table is handed in as an explicit [`ApprovalChainConfig`]; the
//! resolver never reads ambient state.

use std::collections::HashMap;

use crate::domain::employee::{Approver, ApproverRole, Department, DepartmentId, Employee};
use crate::domain::leave_request::{ApprovalStep, LeaveRequest, StepOutcome};
use crate::domain::leave_type::LeaveType;
use crate::errors::LeaveError;

#[derive(Clone, Debug, Default)]
pub struct ApprovalChainConfig {
    departments: HashMap<DepartmentId, Department>,
}

impl ApprovalChainConfig {
    pub fn new(departments: Vec<Department>) -> Self {
        let departments =
            departments.into_iter().map(|department| (department.id.clone(), department)).collect();
        Self { departments }
    }

    pub fn department(&self, id: &DepartmentId) -> Option<&Department> {
        self.departments.get(id)
    }

    pub fn len(&self) -> usize {
        self.departments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.departments.is_empty()
    }
}

#[derive(Clone, Debug, Default)]
pub struct ApprovalChainResolver {
    config: ApprovalChainConfig,
}

impl ApprovalChainResolver {
    pub fn new(config: ApprovalChainConfig) -> Self {
        Self { config }
    }

    /// Ordered approval steps for `employee` requesting `leave_type`.
    ///
    /// The HR step is dropped when the leave type does not require HR sign-off. A step whose
    /// configured reviewer is the requester falls back to the requester's manager.
    pub fn resolve(
        &self,
        employee: &Employee,
        leave_type: &LeaveType,
    ) -> Result<Vec<ApprovalStep>, LeaveError> {
        let Some(department) =
            employee.department_id.as_ref().and_then(|id| self.config.department(id))
        else {
            return Err(LeaveError::NoApproverConfigured {
                department: employee.department_id.clone(),
                role: ApproverRole::TeamLead,
            });
        };

        let mut roles: Vec<ApproverRole> = Vec::new();
        for role in department.approval_sequence() {
            if role == ApproverRole::Hr && !leave_type.requires_hr_approval {
                continue;
            }
            if !roles.contains(&role) {
                roles.push(role);
            }
        }

        if roles.is_empty() {
            return Err(LeaveError::NoApproverConfigured {
                department: Some(department.id.clone()),
                role: ApproverRole::TeamLead,
            });
        }

        roles
            .into_iter()
            .enumerate()
            .map(|(order, role)| {
                let missing = || LeaveError::NoApproverConfigured {
                    department: Some(department.id.clone()),
                    role,
                };
                let configured = department.expected_reviewer(role).ok_or_else(missing)?;
                let reviewer = if *configured == employee.id {
                    employee
                        .manager_id
                        .as_ref()
                        .filter(|manager| **manager != employee.id)
                        .ok_or_else(missing)?
                } else {
                    configured
                };

                Ok(ApprovalStep {
                    order,
                    role,
                    assigned_to: Some(reviewer.clone()),
                    outcome: StepOutcome::Pending,
                })
            })
            .collect()
    }
}

/// Checks that `approver` may act on the request's current step and returns its index.
pub fn authorize(request: &LeaveRequest, approver: &Approver) -> Result<usize, LeaveError> {
    let denied = || LeaveError::NotAuthorizedApprover {
        request_id: request.id.clone(),
        approver: approver.employee_id.clone(),
        role: approver.role,
    };

    if approver.employee_id == request.employee_id {
        return Err(denied());
    }

    let Some(index) = request.status.step_index() else {
        return Err(denied());
    };
    let Some(step) = request.approval_steps.get(index) else {
        return Err(denied());
    };

    if step.role != approver.role || step.outcome != StepOutcome::Pending {
        return Err(denied());
    }
    if let Some(assignee) = &step.assigned_to {
        if *assignee != approver.employee_id {
            return Err(denied());
        }
    }

    Ok(index)
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, TimeZone, Utc};

    use super::{authorize, ApprovalChainConfig, ApprovalChainResolver};
    use crate::domain::employee::{
        Approver, ApproverRole, Department, DepartmentId, Employee, EmployeeId,
    };
    use crate::domain::leave_request::{DateRange, LeaveRequest, LeaveStatus, StepOutcome};
    use crate::domain::leave_type::{default_leave_types, LeaveType};
    use crate::errors::LeaveError;

    fn id(value: &str) -> EmployeeId {
        EmployeeId(value.to_string())
    }

    fn department(team_lead: Option<&str>, hr: Option<&str>) -> Department {
        Department {
            id: DepartmentId("eng".to_string()),
            name: "Engineering".to_string(),
            team_lead: team_lead.map(id),
            hr_approver: hr.map(id),
            approval_rules: Vec::new(),
        }
    }

    fn employee(employee_id: &str, manager: Option<&str>) -> Employee {
        Employee {
            id: id(employee_id),
            display_name: employee_id.to_string(),
            email: None,
            department_id: Some(DepartmentId("eng".to_string())),
            manager_id: manager.map(id),
        }
    }

    fn leave_type(code: &str) -> LeaveType {
        default_leave_types()
            .into_iter()
            .find(|leave_type| leave_type.code.0 == code)
            .expect("seeded leave type")
    }

    fn resolver(department: Department) -> ApprovalChainResolver {
        ApprovalChainResolver::new(ApprovalChainConfig::new(vec![department]))
    }

    #[test]
    fn default_chain_is_team_lead_then_hr() {
        let steps = resolver(department(Some("lead"), Some("hr")))
            .resolve(&employee("emp", None), &leave_type("VAC"))
            .expect("resolved");

        let roles: Vec<ApproverRole> = steps.iter().map(|step| step.role).collect();
        assert_eq!(roles, vec![ApproverRole::TeamLead, ApproverRole::Hr]);
        assert_eq!(steps[0].assigned_to, Some(id("lead")));
        assert_eq!(steps[1].assigned_to, Some(id("hr")));
        assert_eq!(steps[1].order, 1);
    }

    #[test]
    fn hr_step_is_skipped_when_leave_type_does_not_need_it() {
        let steps = resolver(department(Some("lead"), None))
            .resolve(&employee("emp", None), &leave_type("SICK"))
            .expect("resolved without hr approver");

        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].role, ApproverRole::TeamLead);
    }

    #[test]
    fn missing_team_lead_is_reported() {
        let error = resolver(department(None, Some("hr")))
            .resolve(&employee("emp", None), &leave_type("VAC"))
            .expect_err("no team lead");

        assert!(matches!(
            error,
            LeaveError::NoApproverConfigured { role: ApproverRole::TeamLead, .. }
        ));
    }

    #[test]
    fn manager_does_not_stand_in_for_an_unconfigured_reviewer() {
        let error = resolver(department(None, Some("hr")))
            .resolve(&employee("emp", Some("mgr")), &leave_type("VAC"))
            .expect_err("no team lead configured");
        assert!(matches!(
            error,
            LeaveError::NoApproverConfigured { role: ApproverRole::TeamLead, .. }
        ));

        let error = resolver(department(Some("lead"), None))
            .resolve(&employee("emp", Some("mgr")), &leave_type("VAC"))
            .expect_err("no hr approver configured");
        assert!(matches!(error, LeaveError::NoApproverConfigured { role: ApproverRole::Hr, .. }));
    }

    #[test]
    fn employee_without_department_cannot_be_routed() {
        let mut employee = employee("emp", None);
        employee.department_id = None;

        let error = resolver(department(Some("lead"), Some("hr")))
            .resolve(&employee, &leave_type("VAC"))
            .expect_err("no department");

        assert!(matches!(error, LeaveError::NoApproverConfigured { department: None, .. }));
    }

    #[test]
    fn team_lead_requesting_leave_is_routed_to_their_manager() {
        let steps = resolver(department(Some("lead"), Some("hr")))
            .resolve(&employee("lead", Some("director")), &leave_type("VAC"))
            .expect("resolved through manager");

        assert_eq!(steps[0].assigned_to, Some(id("director")));

        let error = resolver(department(Some("lead"), Some("hr")))
            .resolve(&employee("lead", None), &leave_type("VAC"))
            .expect_err("no one else to approve");
        assert!(matches!(error, LeaveError::NoApproverConfigured { .. }));
    }

    #[test]
    fn authorize_checks_role_assignee_and_requester() {
        let now = Utc.with_ymd_and_hms(2026, 10, 15, 9, 0, 0).single().expect("timestamp");
        let start = NaiveDate::from_ymd_opt(2026, 11, 2).expect("date");
        let mut request = LeaveRequest::draft(
            id("emp"),
            leave_type("VAC").code,
            DateRange::new(start, start).expect("range"),
            "",
            now,
        );
        request.approval_steps = resolver(department(Some("lead"), Some("hr")))
            .resolve(&employee("emp", None), &leave_type("VAC"))
            .expect("resolved");
        request.status = LeaveStatus::PendingApproval { step: 0 };

        let lead = Approver { employee_id: id("lead"), role: ApproverRole::TeamLead };
        assert_eq!(authorize(&request, &lead).expect("lead may act"), 0);

        let hr_too_early = Approver { employee_id: id("hr"), role: ApproverRole::Hr };
        assert!(matches!(
            authorize(&request, &hr_too_early),
            Err(LeaveError::NotAuthorizedApprover { .. })
        ));

        let impostor = Approver { employee_id: id("someone"), role: ApproverRole::TeamLead };
        assert!(authorize(&request, &impostor).is_err());

        let requester = Approver { employee_id: id("emp"), role: ApproverRole::TeamLead };
        assert!(authorize(&request, &requester).is_err());

        request.approval_steps[0].outcome = StepOutcome::Approved;
        assert!(authorize(&request, &lead).is_err());
    }
}

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EmployeeId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DepartmentId(pub String);

impl fmt::Display for EmployeeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for DepartmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An employee as seen by the leave workflow.
///
/// `manager_id` is a lookup key only; the workflow never follows it to load or own the
/// manager record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Employee {
    pub id: EmployeeId,
    pub display_name: String,
    pub email: Option<String>,
    pub department_id: Option<DepartmentId>,
    pub manager_id: Option<EmployeeId>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApproverRole {
    TeamLead,
    Hr,
}

impl ApproverRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TeamLead => "team_lead",
            Self::Hr => "hr",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "team_lead" | "lead" | "teamlead" => Some(Self::TeamLead),
            "hr" => Some(Self::Hr),
            _ => None,
        }
    }
}

impl fmt::Display for ApproverRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Department {
    pub id: DepartmentId,
    pub name: String,
    pub team_lead: Option<EmployeeId>,
    pub hr_approver: Option<EmployeeId>,
    /// Ordered approval roles. Empty means the default `[TeamLead, Hr]` chain.
    pub approval_rules: Vec<ApproverRole>,
}

impl Department {
    pub fn approval_sequence(&self) -> Vec<ApproverRole> {
        if self.approval_rules.is_empty() {
            return vec![ApproverRole::TeamLead, ApproverRole::Hr];
        }
        self.approval_rules.clone()
    }

    pub fn expected_reviewer(&self, role: ApproverRole) -> Option<&EmployeeId> {
        match role {
            ApproverRole::TeamLead => self.team_lead.as_ref(),
            ApproverRole::Hr => self.hr_approver.as_ref(),
        }
    }
}

/// The identity acting on a pending approval step.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Approver {
    pub employee_id: EmployeeId,
    pub role: ApproverRole,
}

#[cfg(test)]
mod tests {
    use super::{ApproverRole, Department, DepartmentId, EmployeeId};

    fn department(rules: Vec<ApproverRole>) -> Department {
        Department {
            id: DepartmentId("eng".to_string()),
            name: "Engineering".to_string(),
            team_lead: Some(EmployeeId("lead-1".to_string())),
            hr_approver: None,
            approval_rules: rules,
        }
    }

    #[test]
    fn empty_rules_fall_back_to_lead_then_hr() {
        assert_eq!(
            department(Vec::new()).approval_sequence(),
            vec![ApproverRole::TeamLead, ApproverRole::Hr]
        );
    }

    #[test]
    fn explicit_rules_are_kept_in_order() {
        let rules = vec![ApproverRole::Hr, ApproverRole::TeamLead];
        assert_eq!(department(rules.clone()).approval_sequence(), rules);
    }

    #[test]
    fn expected_reviewer_follows_role() {
        let department = department(Vec::new());
        assert_eq!(
            department.expected_reviewer(ApproverRole::TeamLead).map(|id| id.0.as_str()),
            Some("lead-1")
        );
        assert_eq!(department.expected_reviewer(ApproverRole::Hr), None);
    }

    #[test]
    fn role_parsing_accepts_storage_and_legacy_codes() {
        assert_eq!(ApproverRole::parse("team_lead"), Some(ApproverRole::TeamLead));
        assert_eq!(ApproverRole::parse("LEAD"), Some(ApproverRole::TeamLead));
        assert_eq!(ApproverRole::parse("HR"), Some(ApproverRole::Hr));
        assert_eq!(ApproverRole::parse("ceo"), None);
    }
}

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LeaveTypeCode(pub String);

impl fmt::Display for LeaveTypeCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaveType {
    pub code: LeaveTypeCode,
    pub name: String,
    pub default_allocation: u32,
    /// Zero disables the per-request cap.
    pub max_days_per_request: u32,
    pub min_notice_days: u32,
    pub requires_documentation: bool,
    pub is_paid: bool,
    pub requires_hr_approval: bool,
}

impl LeaveType {
    pub fn policy_notes(&self) -> Vec<String> {
        let mut notes = Vec::new();
        if self.requires_documentation {
            notes.push("Supporting documentation required for this leave type.".to_string());
        }
        if !self.is_paid {
            notes.push("This leave is unpaid.".to_string());
        }
        notes
    }
}

/// The leave types every fresh installation starts with.
pub fn default_leave_types() -> Vec<LeaveType> {
    vec![
        LeaveType {
            code: LeaveTypeCode("VAC".to_string()),
            name: "Vacation".to_string(),
            default_allocation: 20,
            max_days_per_request: 15,
            min_notice_days: 2,
            requires_documentation: false,
            is_paid: true,
            requires_hr_approval: true,
        },
        LeaveType {
            code: LeaveTypeCode("SICK".to_string()),
            name: "Sick Leave".to_string(),
            default_allocation: 10,
            max_days_per_request: 7,
            min_notice_days: 0,
            requires_documentation: true,
            is_paid: true,
            requires_hr_approval: false,
        },
        LeaveType {
            code: LeaveTypeCode("UNPAID".to_string()),
            name: "Unpaid Leave".to_string(),
            default_allocation: 999,
            max_days_per_request: 30,
            min_notice_days: 5,
            requires_documentation: false,
            is_paid: false,
            requires_hr_approval: true,
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::default_leave_types;

    #[test]
    fn policy_notes_reflect_documentation_and_pay() {
        let types = default_leave_types();
        let notes_for = |code: &str| {
            types
                .iter()
                .find(|leave_type| leave_type.code.0 == code)
                .map(|leave_type| leave_type.policy_notes())
                .expect("seeded type")
        };

        assert!(notes_for("VAC").is_empty());
        assert_eq!(
            notes_for("SICK"),
            vec!["Supporting documentation required for this leave type.".to_string()]
        );
        assert_eq!(notes_for("UNPAID"), vec!["This leave is unpaid.".to_string()]);
    }

    #[test]
    fn sick_leave_skips_hr_by_default() {
        let sick = default_leave_types()
            .into_iter()
            .find(|leave_type| leave_type.code.0 == "SICK")
            .expect("sick leave seeded");
        assert!(!sick.requires_hr_approval);
    }
}

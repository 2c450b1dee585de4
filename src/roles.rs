use serde::{Deserialize, Serialize};

/// A person's role in the department. Variants are declared in resolution
/// priority order: when a person holds several role records, the first one
/// listed here wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Role {
    DepartmentHead,
    Coordinator,
    LabChief,
    Teacher,
    Staff,
    Technician,
    Student,
    Admin,
}

impl Role {
    pub const PRIORITY: [Role; 8] = [
        Role::DepartmentHead,
        Role::Coordinator,
        Role::LabChief,
        Role::Teacher,
        Role::Staff,
        Role::Technician,
        Role::Student,
        Role::Admin,
    ];

    /// Table holding this role's records, keyed by `person_id`.
    pub fn table(self) -> &'static str {
        match self {
            Role::DepartmentHead => "department_heads",
            Role::Coordinator => "coordinators",
            Role::LabChief => "lab_chiefs",
            Role::Teacher => "teachers",
            Role::Staff => "staff",
            Role::Technician => "technicians",
            Role::Student => "students",
            Role::Admin => "administrators",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::DepartmentHead => "departmentHead",
            Role::Coordinator => "coordinator",
            Role::LabChief => "labChief",
            Role::Teacher => "teacher",
            Role::Staff => "staff",
            Role::Technician => "technician",
            Role::Student => "student",
            Role::Admin => "admin",
        }
    }

    pub fn parse(raw: &str) -> Option<Role> {
        Role::PRIORITY
            .iter()
            .copied()
            .find(|r| r.as_str().eq_ignore_ascii_case(raw.trim()))
    }

    pub fn rank(self) -> usize {
        Role::PRIORITY
            .iter()
            .position(|r| *r == self)
            .unwrap_or(Role::PRIORITY.len())
    }
}

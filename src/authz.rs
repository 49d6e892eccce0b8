use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Tutor,
    Faculty,
    Student,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Tutor => "tutor",
            Role::Faculty => "faculty",
            Role::Student => "student",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "admin" => Ok(Role::Admin),
            "tutor" => Ok(Role::Tutor),
            "faculty" => Ok(Role::Faculty),
            "student" => Ok(Role::Student),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    ReadTimetable,
    /// Create, update, move or delete a slot.
    WriteTimetable,
    /// Accept a slot whose subject semester differs from the batch's.
    OverrideSemester,
    /// Be named as the instructor of a slot.
    TeachSlot,
    /// Read any instructor's weekly schedule.
    ReadFacultySchedule,
}

/// How far a granted capability reaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Denied,
    /// Only the sections the principal is assigned to.
    AssignedSections,
    /// Only records about the principal themself.
    OwnRecords,
    Institution,
}

impl Scope {
    pub fn is_granted(self) -> bool {
        self != Scope::Denied
    }
}

const RULES: &[(Role, Action, Scope)] = &[
    (Role::Admin, Action::ReadTimetable, Scope::Institution),
    (Role::Admin, Action::WriteTimetable, Scope::Institution),
    (Role::Admin, Action::OverrideSemester, Scope::Institution),
    (Role::Admin, Action::TeachSlot, Scope::Institution),
    (Role::Admin, Action::ReadFacultySchedule, Scope::Institution),
    (Role::Tutor, Action::ReadTimetable, Scope::Institution),
    (Role::Tutor, Action::WriteTimetable, Scope::AssignedSections),
    (Role::Tutor, Action::TeachSlot, Scope::Institution),
    (Role::Tutor, Action::ReadFacultySchedule, Scope::Institution),
    (Role::Faculty, Action::ReadTimetable, Scope::Institution),
    (Role::Faculty, Action::TeachSlot, Scope::Institution),
    (Role::Faculty, Action::ReadFacultySchedule, Scope::OwnRecords),
    (Role::Student, Action::ReadTimetable, Scope::Institution),
];

/// Looks up the rule table. Anything not listed is denied.
pub fn capable_of(role: Role, action: Action) -> Scope {
    RULES
        .iter()
        .find(|(r, a, _)| *r == role && *a == action)
        .map(|(_, _, scope)| *scope)
        .unwrap_or(Scope::Denied)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_admin_and_tutor_write() {
        assert_eq!(
            capable_of(Role::Admin, Action::WriteTimetable),
            Scope::Institution
        );
        assert_eq!(
            capable_of(Role::Tutor, Action::WriteTimetable),
            Scope::AssignedSections
        );
        assert!(!capable_of(Role::Faculty, Action::WriteTimetable).is_granted());
        assert!(!capable_of(Role::Student, Action::WriteTimetable).is_granted());
    }

    #[test]
    fn students_cannot_teach() {
        for role in [Role::Admin, Role::Tutor, Role::Faculty] {
            assert!(capable_of(role, Action::TeachSlot).is_granted(), "{role}");
        }
        assert!(!capable_of(Role::Student, Action::TeachSlot).is_granted());
    }

    #[test]
    fn semester_override_is_admin_only() {
        assert!(capable_of(Role::Admin, Action::OverrideSemester).is_granted());
        assert!(!capable_of(Role::Tutor, Action::OverrideSemester).is_granted());
    }

    #[test]
    fn role_parse_is_case_insensitive() {
        assert_eq!("Tutor".parse::<Role>(), Ok(Role::Tutor));
        assert!("dean".parse::<Role>().is_err());
    }
}

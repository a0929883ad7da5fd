use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::errors::AppError;

/// Privilege level assigned per (user, gym, sport) scope. The same four
/// roles apply in every gym and sport; higher rank means more privilege.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum GymRole {
    Admin,
    Manager,
    Professor,
    Student,
}

impl GymRole {
    pub const ALL: [GymRole; 4] = [GymRole::Admin, GymRole::Manager, GymRole::Professor, GymRole::Student];

    pub fn rank(self) -> u8 {
        match self {
            GymRole::Admin => 4,
            GymRole::Manager => 3,
            GymRole::Professor => 2,
            GymRole::Student => 1,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            GymRole::Admin => "ADMIN",
            GymRole::Manager => "MANAGER",
            GymRole::Professor => "PROFESSOR",
            GymRole::Student => "STUDENT",
        }
    }
}

impl fmt::Display for GymRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GymRole {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "ADMIN" => Ok(GymRole::Admin),
            "MANAGER" => Ok(GymRole::Manager),
            "PROFESSOR" => Ok(GymRole::Professor),
            "STUDENT" => Ok(GymRole::Student),
            other => Err(AppError::internal(format!("unknown gym role: {other}"))),
        }
    }
}

/// Atomic `resource:action` capability. The set is closed; a value outside
/// this enumeration cannot be represented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub enum Permission {
    #[serde(rename = "gym:create")]
    GymCreate,
    #[serde(rename = "gym:read")]
    GymRead,
    #[serde(rename = "gym:update")]
    GymUpdate,
    #[serde(rename = "gym:delete")]
    GymDelete,
    #[serde(rename = "gym:manage_users")]
    GymManageUsers,

    #[serde(rename = "team:create")]
    TeamCreate,
    #[serde(rename = "team:read")]
    TeamRead,
    #[serde(rename = "team:update")]
    TeamUpdate,
    #[serde(rename = "team:delete")]
    TeamDelete,

    #[serde(rename = "class:create")]
    ClassCreate,
    #[serde(rename = "class:read")]
    ClassRead,
    #[serde(rename = "class:update")]
    ClassUpdate,
    #[serde(rename = "class:delete")]
    ClassDelete,
    #[serde(rename = "class:manage_attendance")]
    ClassManageAttendance,

    #[serde(rename = "graduation:create")]
    GraduationCreate,
    #[serde(rename = "graduation:read")]
    GraduationRead,
    #[serde(rename = "graduation:update")]
    GraduationUpdate,
    #[serde(rename = "graduation:delete")]
    GraduationDelete,

    #[serde(rename = "user:read")]
    UserRead,
    #[serde(rename = "user:update")]
    UserUpdate,
}

impl Permission {
    pub fn as_str(self) -> &'static str {
        match self {
            Permission::GymCreate => "gym:create",
            Permission::GymRead => "gym:read",
            Permission::GymUpdate => "gym:update",
            Permission::GymDelete => "gym:delete",
            Permission::GymManageUsers => "gym:manage_users",
            Permission::TeamCreate => "team:create",
            Permission::TeamRead => "team:read",
            Permission::TeamUpdate => "team:update",
            Permission::TeamDelete => "team:delete",
            Permission::ClassCreate => "class:create",
            Permission::ClassRead => "class:read",
            Permission::ClassUpdate => "class:update",
            Permission::ClassDelete => "class:delete",
            Permission::ClassManageAttendance => "class:manage_attendance",
            Permission::GraduationCreate => "graduation:create",
            Permission::GraduationRead => "graduation:read",
            Permission::GraduationUpdate => "graduation:update",
            Permission::GraduationDelete => "graduation:delete",
            Permission::UserRead => "user:read",
            Permission::UserUpdate => "user:update",
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable role→permission table, constructed once at startup and shared by
/// reference with the decision engine. The sets widen monotonically with
/// rank: every role carries the read-only core, and each rank's set contains
/// the set of the rank below it.
#[derive(Debug, Clone)]
pub struct RoleCatalog {
    grants: HashMap<GymRole, HashSet<Permission>>,
}

impl RoleCatalog {
    pub fn new() -> Self {
        use Permission::*;

        let student: HashSet<Permission> =
            [GymRead, TeamRead, ClassRead, GraduationRead, UserRead].into_iter().collect();

        let mut professor = student.clone();
        professor.extend([ClassCreate, ClassUpdate, ClassManageAttendance, GraduationCreate]);

        let mut manager = professor.clone();
        manager.extend([
            GymUpdate,
            GymManageUsers,
            TeamCreate,
            TeamUpdate,
            TeamDelete,
            ClassDelete,
            GraduationUpdate,
        ]);

        let mut admin = manager.clone();
        admin.extend([GymCreate, GymDelete, GraduationDelete, UserUpdate]);

        let grants = HashMap::from([
            (GymRole::Admin, admin),
            (GymRole::Manager, manager),
            (GymRole::Professor, professor),
            (GymRole::Student, student),
        ]);

        Self { grants }
    }

    /// The fixed permission set for a role. Never empty.
    pub fn permissions_of(&self, role: GymRole) -> &HashSet<Permission> {
        // Every role is inserted in `new`; a miss is a construction bug.
        self.grants
            .get(&role)
            .unwrap_or_else(|| panic!("role {role} missing from catalog"))
    }

    pub fn has_higher_or_equal_rank(&self, role: GymRole, required: GymRole) -> bool {
        role.rank() >= required.rank()
    }

    /// True iff the role holds every one of `required`.
    pub fn holds_all(&self, role: GymRole, required: &[Permission]) -> bool {
        let granted = self.permissions_of(role);
        required.iter().all(|permission| granted.contains(permission))
    }
}

impl Default for RoleCatalog {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ranks_are_totally_ordered() {
        assert!(GymRole::Admin.rank() > GymRole::Manager.rank());
        assert!(GymRole::Manager.rank() > GymRole::Professor.rank());
        assert!(GymRole::Professor.rank() > GymRole::Student.rank());

        let catalog = RoleCatalog::new();
        for a in GymRole::ALL {
            for b in GymRole::ALL {
                assert_eq!(catalog.has_higher_or_equal_rank(a, b), a.rank() >= b.rank());
            }
        }
    }

    #[test]
    fn permission_sets_widen_with_rank() {
        let catalog = RoleCatalog::new();

        for role in GymRole::ALL {
            assert!(!catalog.permissions_of(role).is_empty());
        }

        // Each rank's set is a superset of the rank below it.
        let ordered = [GymRole::Student, GymRole::Professor, GymRole::Manager, GymRole::Admin];
        for pair in ordered.windows(2) {
            let lower = catalog.permissions_of(pair[0]);
            let higher = catalog.permissions_of(pair[1]);
            assert!(lower.is_subset(higher), "{} should contain {}", pair[1], pair[0]);
        }
    }

    #[test]
    fn every_role_holds_the_read_only_core() {
        let catalog = RoleCatalog::new();
        let core = [
            Permission::GymRead,
            Permission::TeamRead,
            Permission::ClassRead,
            Permission::GraduationRead,
            Permission::UserRead,
        ];

        for role in GymRole::ALL {
            assert!(catalog.holds_all(role, &core), "{role} is missing part of the read core");
        }
    }

    #[test]
    fn write_permissions_escalate_upward() {
        let catalog = RoleCatalog::new();

        assert!(!catalog.holds_all(GymRole::Student, &[Permission::ClassCreate]));
        assert!(!catalog.holds_all(GymRole::Student, &[Permission::ClassManageAttendance]));
        assert!(catalog.holds_all(
            GymRole::Professor,
            &[Permission::ClassCreate, Permission::ClassManageAttendance]
        ));
        assert!(!catalog.holds_all(GymRole::Professor, &[Permission::TeamCreate]));
        assert!(catalog.holds_all(GymRole::Manager, &[Permission::TeamCreate, Permission::TeamDelete]));
        assert!(!catalog.holds_all(GymRole::Manager, &[Permission::GymCreate]));
        assert!(!catalog.holds_all(GymRole::Manager, &[Permission::GymDelete]));

        let everything: Vec<Permission> = catalog.permissions_of(GymRole::Admin).iter().copied().collect();
        assert!(catalog.holds_all(GymRole::Admin, &everything));
        assert_eq!(everything.len(), 20);
    }

    #[test]
    fn role_round_trips_through_text() {
        for role in GymRole::ALL {
            assert_eq!(role.as_str().parse::<GymRole>().unwrap(), role);
        }
        assert!("COACH".parse::<GymRole>().is_err());
    }
}

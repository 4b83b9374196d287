/// Role model
///
/// Roles are drawn from a small fixed enumeration. They are assigned, not
/// inherited: an administrator does not implicitly hold the manager role, and
/// a principal may hold several roles at once. The authorization policy engine
/// reasons about role membership, never about a role ordering.
///
/// # Schema
///
/// ```sql
/// CREATE TABLE roles (
///     name TEXT PRIMARY KEY
/// );
///
/// CREATE TABLE credential_roles (
///     credential_id BIGINT NOT NULL REFERENCES credentials(id),
///     role TEXT NOT NULL REFERENCES roles(name),
///     PRIMARY KEY (credential_id, role)
/// );
/// ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Fixed role enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Full control over every project, task and user
    Administrator,

    /// Manages projects, tasks and developers
    Manager,

    /// Contributor working on assigned tasks
    Developer,

    /// External user with no default access
    Contractor,
}

/// Error returned when a role name is not part of the enumeration
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown role: {0}")]
pub struct UnknownRole(pub String);

impl Role {
    /// Every role, in declaration order
    pub const ALL: [Role; 4] = [
        Role::Administrator,
        Role::Manager,
        Role::Developer,
        Role::Contractor,
    ];

    /// Converts role to its stored name
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Administrator => "administrator",
            Role::Manager => "manager",
            Role::Developer => "developer",
            Role::Contractor => "contractor",
        }
    }

    /// Parses a requested role, falling back to the lowest-privilege
    /// internal role when the request is absent or unrecognized.
    ///
    /// # Example
    ///
    /// ```
    /// use devtrack_shared::models::role::Role;
    ///
    /// assert_eq!(Role::requested_or_default(Some("manager")), Role::Manager);
    /// assert_eq!(Role::requested_or_default(Some("wizard")), Role::Developer);
    /// assert_eq!(Role::requested_or_default(None), Role::Developer);
    /// ```
    pub fn requested_or_default(requested: Option<&str>) -> Role {
        requested
            .and_then(|name| name.parse().ok())
            .unwrap_or(Role::Developer)
    }

    /// Role assigned to identities created through federated login
    pub fn federated_default() -> Role {
        Role::Contractor
    }

    /// Whether this role grants unconditional access to projects and tasks
    pub fn is_privileged(&self) -> bool {
        matches!(self, Role::Administrator | Role::Manager)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = UnknownRole;

    /// Accepts the stored names plus the common aliases clients send
    /// (`admin`, `contributor`, `ROLE_` prefixed upper-case names).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        let normalized = normalized.strip_prefix("role_").unwrap_or(&normalized);

        match normalized {
            "administrator" | "admin" => Ok(Role::Administrator),
            "manager" => Ok(Role::Manager),
            "developer" | "contributor" => Ok(Role::Developer),
            "contractor" | "external" | "external_contractor" => Ok(Role::Contractor),
            _ => Err(UnknownRole(s.to_string())),
        }
    }
}

/// Parses stored role names, skipping names outside the enumeration
pub fn parse_role_names<I, S>(names: I) -> BTreeSet<Role>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    names
        .into_iter()
        .filter_map(|name| {
            let name = name.as_ref();
            match name.parse() {
                Ok(role) => Some(role),
                Err(_) => {
                    tracing::warn!(role = name, "Ignoring unknown stored role name");
                    None
                }
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_roundtrip_names() {
        for role in Role::ALL {
            assert_eq!(role.as_str().parse::<Role>().unwrap(), role);
        }
    }

    #[test]
    fn test_role_aliases() {
        assert_eq!("ADMIN".parse::<Role>().unwrap(), Role::Administrator);
        assert_eq!("ROLE_MANAGER".parse::<Role>().unwrap(), Role::Manager);
        assert_eq!("contributor".parse::<Role>().unwrap(), Role::Developer);
        assert_eq!("external_contractor".parse::<Role>().unwrap(), Role::Contractor);
        assert!("owner".parse::<Role>().is_err());
    }

    #[test]
    fn test_requested_or_default() {
        assert_eq!(Role::requested_or_default(Some("contractor")), Role::Contractor);
        assert_eq!(Role::requested_or_default(Some("")), Role::Developer);
        assert_eq!(Role::requested_or_default(None), Role::Developer);
    }

    #[test]
    fn test_is_privileged() {
        assert!(Role::Administrator.is_privileged());
        assert!(Role::Manager.is_privileged());
        assert!(!Role::Developer.is_privileged());
        assert!(!Role::Contractor.is_privileged());
    }

    #[test]
    fn test_parse_role_names_skips_unknown() {
        let roles = parse_role_names(["manager", "bogus", "developer"]);
        assert_eq!(roles.len(), 2);
        assert!(roles.contains(&Role::Manager));
        assert!(roles.contains(&Role::Developer));
    }
}

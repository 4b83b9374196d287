/// Credential record model
///
/// A credential record is the sole source of truth for authentication
/// decisions. There is exactly one record per identity, whether it was
/// created through local registration or on first federated login.
///
/// # Schema
///
/// ```sql
/// CREATE TABLE credentials (
///     id BIGSERIAL PRIMARY KEY,
///     username TEXT NOT NULL UNIQUE,
///     email CITEXT NOT NULL UNIQUE,
///     password_hash TEXT NOT NULL,
///     enabled BOOLEAN NOT NULL DEFAULT TRUE,
///     provider TEXT NOT NULL DEFAULT 'local',
///     provider_id TEXT,
///     display_name TEXT,
///     created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
///     last_login_at TIMESTAMPTZ
/// );
/// ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use super::role::Role;

/// Where an identity authenticates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FederationProvider {
    /// Username/email and password
    Local,

    /// Google OpenID Connect
    Google,

    /// GitHub OAuth
    Github,
}

impl FederationProvider {
    /// Stored/path name of the provider
    pub fn as_str(&self) -> &'static str {
        match self {
            FederationProvider::Local => "local",
            FederationProvider::Google => "google",
            FederationProvider::Github => "github",
        }
    }

    /// Whether this provider is an external identity provider
    pub fn is_federated(&self) -> bool {
        !matches!(self, FederationProvider::Local)
    }
}

impl fmt::Display for FederationProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FederationProvider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "local" => Ok(FederationProvider::Local),
            "google" => Ok(FederationProvider::Google),
            "github" => Ok(FederationProvider::Github),
            other => Err(format!("Unknown provider: {}", other)),
        }
    }
}

/// Stored credential record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialRecord {
    /// Stable numeric id
    pub id: i64,

    /// Unique login name
    pub username: String,

    /// Unique email address (case-insensitive)
    pub email: String,

    /// Argon2id password hash
    ///
    /// Federated records hold the hash of a random secret nobody knows.
    #[serde(skip_serializing)]
    pub password_hash: String,

    /// Disabled records cannot authenticate
    pub enabled: bool,

    /// Assigned roles
    pub roles: BTreeSet<Role>,

    /// Provider the record was created under
    pub provider: FederationProvider,

    /// Provider-assigned subject id (None for local records)
    pub provider_id: Option<String>,

    /// Display name reported by the provider
    pub display_name: Option<String>,

    /// When the record was created
    pub created_at: DateTime<Utc>,

    /// When the identity last logged in (None if never)
    pub last_login_at: Option<DateTime<Utc>>,
}

impl CredentialRecord {
    /// Whether the record holds the given role
    pub fn has_role(&self, role: Role) -> bool {
        self.roles.contains(&role)
    }
}

/// Input for creating a credential record
#[derive(Debug, Clone)]
pub struct NewCredential {
    /// Login name (already checked for uniqueness by the caller)
    pub username: String,

    /// Email address
    pub email: String,

    /// Argon2id hash (NOT a plaintext password)
    pub password_hash: String,

    /// Initial roles
    pub roles: BTreeSet<Role>,

    /// Provider the record belongs to
    pub provider: FederationProvider,

    /// Provider subject id
    pub provider_id: Option<String>,

    /// Provider display name
    pub display_name: Option<String>,
}

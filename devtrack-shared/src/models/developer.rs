/// Developer profile model
///
/// A developer profile is the project-tracking side of a contributor. It is
/// optionally linked 1:1 to a credential record; that link is how ownership
/// checks map "the developer assigned to this task" back to a caller.
///
/// # Schema
///
/// ```sql
/// CREATE TABLE developers (
///     id BIGSERIAL PRIMARY KEY,
///     credential_id BIGINT UNIQUE REFERENCES credentials(id),
///     first_name TEXT NOT NULL,
///     last_name TEXT NOT NULL,
///     email CITEXT NOT NULL,
///     skills TEXT,
///     created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
/// );
/// ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Developer profile
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Developer {
    /// Developer id
    pub id: i64,

    /// Linked credential record, if any
    pub credential_id: Option<i64>,

    /// Given name
    pub first_name: String,

    /// Family name
    pub last_name: String,

    /// Contact email
    pub email: String,

    /// Free-form skill summary
    pub skills: Option<String>,

    /// When the profile was created
    pub created_at: DateTime<Utc>,
}

/// Profile details supplied at registration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeveloperProfile {
    /// Given name
    #[serde(default)]
    pub first_name: String,

    /// Family name
    #[serde(default)]
    pub last_name: String,

    /// Free-form skill summary
    #[serde(default)]
    pub skills: Option<String>,
}

/// Input for provisioning a developer profile
///
/// The credential link is filled in by the store inside the registration
/// transaction, once the credential id is known.
#[derive(Debug, Clone)]
pub struct NewDeveloper {
    /// Given name
    pub first_name: String,

    /// Family name
    pub last_name: String,

    /// Contact email
    pub email: String,

    /// Free-form skill summary
    pub skills: Option<String>,
}

impl NewDeveloper {
    /// Builds the provisioning input from registration details
    ///
    /// Blank names fall back to the username so the profile is never empty.
    pub fn from_profile(profile: &DeveloperProfile, username: &str, email: &str) -> Self {
        let first_name = if profile.first_name.trim().is_empty() {
            username.to_string()
        } else {
            profile.first_name.trim().to_string()
        };

        Self {
            first_name,
            last_name: profile.last_name.trim().to_string(),
            email: email.to_string(),
            skills: profile.skills.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_profile_uses_supplied_names() {
        let profile = DeveloperProfile {
            first_name: " Alice ".to_string(),
            last_name: "Liddell".to_string(),
            skills: Some("rust".to_string()),
        };

        let new_dev = NewDeveloper::from_profile(&profile, "alice", "alice@example.com");
        assert_eq!(new_dev.first_name, "Alice");
        assert_eq!(new_dev.last_name, "Liddell");
        assert_eq!(new_dev.email, "alice@example.com");
        assert_eq!(new_dev.skills.as_deref(), Some("rust"));
    }

    #[test]
    fn test_from_profile_blank_name_falls_back_to_username() {
        let new_dev = NewDeveloper::from_profile(&DeveloperProfile::default(), "bob", "bob@example.com");
        assert_eq!(new_dev.first_name, "bob");
        assert!(new_dev.last_name.is_empty());
    }
}

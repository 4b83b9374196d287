/// Persistence interfaces consumed by the identity core
///
/// The identity core never talks to a database directly. It consumes these
/// async traits, which the domain persistence layer implements:
///
/// - [`CredentialStore`]: credential records keyed by id, username and email
/// - [`DeveloperStore`]: developer profiles keyed by id or linked credential
/// - [`ResourceStore`]: projects, tasks and their assigned developers
/// - [`GrantStore`]: explicit read grants for contractors
///
/// Two implementations ship with the crate:
///
/// - [`postgres::PgStore`]: sqlx/PostgreSQL
/// - [`memory::MemoryStore`]: in-process, for development and tests

use async_trait::async_trait;
use std::collections::BTreeSet;

use crate::models::{
    credential::{CredentialRecord, NewCredential},
    developer::{Developer, NewDeveloper},
    role::Role,
    task::{Project, ResourceKind, Task, TaskStatus},
};

pub mod memory;
pub mod postgres;

/// Store result type alias
pub type StoreResult<T> = Result<T, StoreError>;

/// Unique field that a write collided on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UniqueField {
    /// Username already taken
    Username,

    /// Email already registered
    Email,
}

impl UniqueField {
    /// Field name as exposed to clients
    pub fn as_str(&self) -> &'static str {
        match self {
            UniqueField::Username => "username",
            UniqueField::Email => "email",
        }
    }
}

/// Error type for store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Unique constraint violated
    #[error("Duplicate {}", .0.as_str())]
    Duplicate(UniqueField),

    /// Referenced record does not exist
    #[error("Record not found: {0}")]
    NotFound(String),

    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Result of creating a credential, with its developer profile if one was provisioned
#[derive(Debug, Clone)]
pub struct CreatedCredential {
    /// The stored credential record
    pub credential: CredentialRecord,

    /// The linked developer profile
    pub developer: Option<Developer>,
}

/// Credential record store
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Finds a record by id
    async fn find_by_id(&self, id: i64) -> StoreResult<Option<CredentialRecord>>;

    /// Finds a record by exact username
    async fn find_by_username(&self, username: &str) -> StoreResult<Option<CredentialRecord>>;

    /// Finds a record by email (case-insensitive)
    async fn find_by_email(&self, email: &str) -> StoreResult<Option<CredentialRecord>>;

    /// Finds a record whose username or email matches the identifier
    async fn find_by_identifier(&self, identifier: &str) -> StoreResult<Option<CredentialRecord>> {
        if let Some(record) = self.find_by_username(identifier).await? {
            return Ok(Some(record));
        }
        self.find_by_email(identifier).await
    }

    /// Whether a username is taken
    async fn username_exists(&self, username: &str) -> StoreResult<bool> {
        Ok(self.find_by_username(username).await?.is_some())
    }

    /// Whether an email is registered
    async fn email_exists(&self, email: &str) -> StoreResult<bool> {
        Ok(self.find_by_email(email).await?.is_some())
    }

    /// Creates a credential and, if given, its linked developer profile
    ///
    /// Both writes happen in one transaction: either both records exist
    /// afterwards or neither does.
    async fn create(
        &self,
        credential: NewCredential,
        developer: Option<NewDeveloper>,
    ) -> StoreResult<CreatedCredential>;

    /// Refreshes provider-supplied fields of a federated record
    async fn update_provider_profile(
        &self,
        id: i64,
        provider_id: &str,
        display_name: Option<&str>,
    ) -> StoreResult<CredentialRecord>;

    /// Sets the last-login timestamp to now
    async fn touch_last_login(&self, id: i64) -> StoreResult<()>;

    /// Replaces the role set of a record
    async fn set_roles(&self, id: i64, roles: &BTreeSet<Role>) -> StoreResult<Option<CredentialRecord>>;

    /// Enables or disables a record
    async fn set_enabled(&self, id: i64, enabled: bool) -> StoreResult<Option<CredentialRecord>>;
}

/// Developer profile store
#[async_trait]
pub trait DeveloperStore: Send + Sync {
    /// Finds a developer by id
    async fn find_developer(&self, id: i64) -> StoreResult<Option<Developer>>;

    /// Finds the developer linked to a credential record
    async fn find_developer_by_credential(&self, credential_id: i64) -> StoreResult<Option<Developer>>;

    /// Lists all developers
    async fn list_developers(&self) -> StoreResult<Vec<Developer>>;
}

/// Project and task store
#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Finds a project by id
    async fn find_project(&self, id: i64) -> StoreResult<Option<Project>>;

    /// Finds a task by id
    async fn find_task(&self, id: i64) -> StoreResult<Option<Task>>;

    /// Developer assigned to a task (None if unassigned or no such task)
    async fn task_assignee(&self, task_id: i64) -> StoreResult<Option<i64>>;

    /// Developers assigned to any task of a project
    async fn project_assignees(&self, project_id: i64) -> StoreResult<Vec<i64>>;

    /// Updates a task's status
    async fn update_task_status(&self, id: i64, status: TaskStatus) -> StoreResult<Option<Task>>;
}

/// Explicit resource grant store
#[async_trait]
pub trait GrantStore: Send + Sync {
    /// Whether the credential holds a read grant on the resource
    async fn has_grant(&self, credential_id: i64, kind: ResourceKind, resource_id: i64) -> StoreResult<bool>;
}

/// Every collaborator interface the service consumes
pub trait Store: CredentialStore + DeveloperStore + ResourceStore + GrantStore {}

impl<T> Store for T where T: CredentialStore + DeveloperStore + ResourceStore + GrantStore {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_display() {
        let err = StoreError::Duplicate(UniqueField::Email);
        assert_eq!(err.to_string(), "Duplicate email");

        let err = StoreError::NotFound("credential 7".to_string());
        assert!(err.to_string().contains("credential 7"));
    }
}

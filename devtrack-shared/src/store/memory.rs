/// In-process store
///
/// Implements every store trait over a single `tokio::sync::RwLock`. Writes
/// that must be atomic (credential + developer profile) run under one write
/// guard, so a failed registration leaves nothing behind.
///
/// Used as the `STORE_BACKEND=memory` development backend and by tests, which
/// seed projects, tasks, assignments and grants through the inherent helpers.
///
/// # Example
///
/// ```
/// use devtrack_shared::store::memory::MemoryStore;
/// use devtrack_shared::store::ResourceStore;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let store = MemoryStore::new();
/// let project = store.insert_project("Apollo").await;
/// let task = store.insert_task(project.id, "Wire the guidance computer").await;
/// assert!(store.task_assignee(task.id).await?.is_none());
/// # Ok(())
/// # }
/// ```

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeSet, HashMap, HashSet};
use tokio::sync::RwLock;

use super::{
    CreatedCredential, CredentialStore, DeveloperStore, GrantStore, ResourceStore, StoreError,
    StoreResult, UniqueField,
};
use crate::models::{
    credential::{CredentialRecord, NewCredential},
    developer::{Developer, NewDeveloper},
    role::Role,
    task::{Project, ResourceKind, Task, TaskStatus},
};

#[derive(Debug, Default)]
struct Tables {
    next_id: i64,
    credentials: HashMap<i64, CredentialRecord>,
    developers: HashMap<i64, Developer>,
    projects: HashMap<i64, Project>,
    tasks: HashMap<i64, Task>,
    grants: HashSet<(i64, ResourceKind, i64)>,
}

impl Tables {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

/// In-memory implementation of all store traits
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    /// Creates an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a project
    pub async fn insert_project(&self, name: &str) -> Project {
        let mut tables = self.tables.write().await;
        let project = Project {
            id: tables.next_id(),
            name: name.to_string(),
            description: None,
            created_at: Utc::now(),
        };
        tables.projects.insert(project.id, project.clone());
        project
    }

    /// Inserts an unassigned task into a project
    pub async fn insert_task(&self, project_id: i64, title: &str) -> Task {
        let mut tables = self.tables.write().await;
        let task = Task {
            id: tables.next_id(),
            project_id,
            title: title.to_string(),
            status: TaskStatus::Todo,
            assigned_developer_id: None,
            created_at: Utc::now(),
        };
        tables.tasks.insert(task.id, task.clone());
        task
    }

    /// Inserts a task with a caller-chosen id
    pub async fn insert_task_with_id(&self, id: i64, project_id: i64, title: &str) -> Task {
        let mut tables = self.tables.write().await;
        let task = Task {
            id,
            project_id,
            title: title.to_string(),
            status: TaskStatus::Todo,
            assigned_developer_id: None,
            created_at: Utc::now(),
        };
        tables.tasks.insert(id, task.clone());
        if tables.next_id < id {
            tables.next_id = id;
        }
        task
    }

    /// Assigns (or unassigns) a developer to a task
    pub async fn assign_task(&self, task_id: i64, developer_id: Option<i64>) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        let task = tables
            .tasks
            .get_mut(&task_id)
            .ok_or_else(|| StoreError::NotFound(format!("task {}", task_id)))?;
        task.assigned_developer_id = developer_id;
        Ok(())
    }

    /// Grants a credential read access to a resource
    pub async fn grant(&self, credential_id: i64, kind: ResourceKind, resource_id: i64) {
        self.tables
            .write()
            .await
            .grants
            .insert((credential_id, kind, resource_id));
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn find_by_id(&self, id: i64) -> StoreResult<Option<CredentialRecord>> {
        Ok(self.tables.read().await.credentials.get(&id).cloned())
    }

    async fn find_by_username(&self, username: &str) -> StoreResult<Option<CredentialRecord>> {
        let tables = self.tables.read().await;
        Ok(tables
            .credentials
            .values()
            .find(|c| c.username == username)
            .cloned())
    }

    async fn find_by_email(&self, email: &str) -> StoreResult<Option<CredentialRecord>> {
        let tables = self.tables.read().await;
        Ok(tables
            .credentials
            .values()
            .find(|c| c.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    async fn create(
        &self,
        credential: NewCredential,
        developer: Option<NewDeveloper>,
    ) -> StoreResult<CreatedCredential> {
        let mut tables = self.tables.write().await;

        if tables.credentials.values().any(|c| c.username == credential.username) {
            return Err(StoreError::Duplicate(UniqueField::Username));
        }
        if tables
            .credentials
            .values()
            .any(|c| c.email.eq_ignore_ascii_case(&credential.email))
        {
            return Err(StoreError::Duplicate(UniqueField::Email));
        }

        let record = CredentialRecord {
            id: tables.next_id(),
            username: credential.username,
            email: credential.email,
            password_hash: credential.password_hash,
            enabled: true,
            roles: credential.roles,
            provider: credential.provider,
            provider_id: credential.provider_id,
            display_name: credential.display_name,
            created_at: Utc::now(),
            last_login_at: None,
        };

        let developer = developer.map(|new_dev| Developer {
            id: tables.next_id(),
            credential_id: Some(record.id),
            first_name: new_dev.first_name,
            last_name: new_dev.last_name,
            email: new_dev.email,
            skills: new_dev.skills,
            created_at: Utc::now(),
        });

        tables.credentials.insert(record.id, record.clone());
        if let Some(dev) = &developer {
            tables.developers.insert(dev.id, dev.clone());
        }

        Ok(CreatedCredential {
            credential: record,
            developer,
        })
    }

    async fn update_provider_profile(
        &self,
        id: i64,
        provider_id: &str,
        display_name: Option<&str>,
    ) -> StoreResult<CredentialRecord> {
        let mut tables = self.tables.write().await;
        let record = tables
            .credentials
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("credential {}", id)))?;

        record.provider_id = Some(provider_id.to_string());
        if let Some(name) = display_name {
            record.display_name = Some(name.to_string());
        }
        Ok(record.clone())
    }

    async fn touch_last_login(&self, id: i64) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        let record = tables
            .credentials
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("credential {}", id)))?;
        record.last_login_at = Some(Utc::now());
        Ok(())
    }

    async fn set_roles(&self, id: i64, roles: &BTreeSet<Role>) -> StoreResult<Option<CredentialRecord>> {
        let mut tables = self.tables.write().await;
        Ok(tables.credentials.get_mut(&id).map(|record| {
            record.roles = roles.clone();
            record.clone()
        }))
    }

    async fn set_enabled(&self, id: i64, enabled: bool) -> StoreResult<Option<CredentialRecord>> {
        let mut tables = self.tables.write().await;
        Ok(tables.credentials.get_mut(&id).map(|record| {
            record.enabled = enabled;
            record.clone()
        }))
    }
}

#[async_trait]
impl DeveloperStore for MemoryStore {
    async fn find_developer(&self, id: i64) -> StoreResult<Option<Developer>> {
        Ok(self.tables.read().await.developers.get(&id).cloned())
    }

    async fn find_developer_by_credential(&self, credential_id: i64) -> StoreResult<Option<Developer>> {
        let tables = self.tables.read().await;
        Ok(tables
            .developers
            .values()
            .find(|d| d.credential_id == Some(credential_id))
            .cloned())
    }

    async fn list_developers(&self) -> StoreResult<Vec<Developer>> {
        let tables = self.tables.read().await;
        let mut developers: Vec<Developer> = tables.developers.values().cloned().collect();
        developers.sort_by_key(|d| d.id);
        Ok(developers)
    }
}

#[async_trait]
impl ResourceStore for MemoryStore {
    async fn find_project(&self, id: i64) -> StoreResult<Option<Project>> {
        Ok(self.tables.read().await.projects.get(&id).cloned())
    }

    async fn find_task(&self, id: i64) -> StoreResult<Option<Task>> {
        Ok(self.tables.read().await.tasks.get(&id).cloned())
    }

    async fn task_assignee(&self, task_id: i64) -> StoreResult<Option<i64>> {
        let tables = self.tables.read().await;
        Ok(tables
            .tasks
            .get(&task_id)
            .and_then(|t| t.assigned_developer_id))
    }

    async fn project_assignees(&self, project_id: i64) -> StoreResult<Vec<i64>> {
        let tables = self.tables.read().await;
        let assignees: BTreeSet<i64> = tables
            .tasks
            .values()
            .filter(|t| t.project_id == project_id)
            .filter_map(|t| t.assigned_developer_id)
            .collect();
        Ok(assignees.into_iter().collect())
    }

    async fn update_task_status(&self, id: i64, status: TaskStatus) -> StoreResult<Option<Task>> {
        let mut tables = self.tables.write().await;
        Ok(tables.tasks.get_mut(&id).map(|task| {
            task.status = status;
            task.clone()
        }))
    }
}

#[async_trait]
impl GrantStore for MemoryStore {
    async fn has_grant(&self, credential_id: i64, kind: ResourceKind, resource_id: i64) -> StoreResult<bool> {
        Ok(self
            .tables
            .read()
            .await
            .grants
            .contains(&(credential_id, kind, resource_id)))
    }
}

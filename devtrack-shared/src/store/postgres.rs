/// PostgreSQL store
///
/// sqlx-backed implementation of every store trait. Credential creation and
/// developer-profile provisioning share one transaction.
///
/// # Example
///
/// ```no_run
/// use devtrack_shared::db::pool::{create_pool, DatabaseConfig};
/// use devtrack_shared::store::postgres::PgStore;
/// use devtrack_shared::store::CredentialStore;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let pool = create_pool(DatabaseConfig {
///     url: std::env::var("DATABASE_URL")?,
///     ..Default::default()
/// })
/// .await?;
///
/// let store = PgStore::new(pool);
/// if let Some(record) = store.find_by_username("alice").await? {
///     println!("alice has roles {:?}", record.roles);
/// }
/// # Ok(())
/// # }
/// ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use std::collections::BTreeSet;

use super::{
    CreatedCredential, CredentialStore, DeveloperStore, GrantStore, ResourceStore, StoreError,
    StoreResult, UniqueField,
};
use crate::models::{
    credential::{CredentialRecord, FederationProvider, NewCredential},
    developer::{Developer, NewDeveloper},
    role::{parse_role_names, Role},
    task::{Project, ResourceKind, Task, TaskStatus},
};

const CREDENTIAL_COLUMNS: &str = r#"
    c.id, c.username, c.email, c.password_hash, c.enabled, c.provider,
    c.provider_id, c.display_name, c.created_at, c.last_login_at,
    ARRAY(SELECT r.role FROM credential_roles r WHERE r.credential_id = c.id ORDER BY r.role) AS roles
"#;

/// Raw credentials row, roles aggregated into an array
#[derive(Debug, sqlx::FromRow)]
struct CredentialRow {
    id: i64,
    username: String,
    email: String,
    password_hash: String,
    enabled: bool,
    provider: String,
    provider_id: Option<String>,
    display_name: Option<String>,
    created_at: DateTime<Utc>,
    last_login_at: Option<DateTime<Utc>>,
    roles: Vec<String>,
}

impl CredentialRow {
    fn into_record(self) -> StoreResult<CredentialRecord> {
        let provider = self
            .provider
            .parse::<FederationProvider>()
            .map_err(|e| StoreError::Database(sqlx::Error::Decode(e.into())))?;

        Ok(CredentialRecord {
            id: self.id,
            username: self.username,
            email: self.email,
            password_hash: self.password_hash,
            enabled: self.enabled,
            roles: parse_role_names(&self.roles),
            provider,
            provider_id: self.provider_id,
            display_name: self.display_name,
            created_at: self.created_at,
            last_login_at: self.last_login_at,
        })
    }
}

/// Maps unique-constraint violations onto the field that collided
fn map_unique_violation(err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.is_unique_violation() {
            match db_err.constraint() {
                Some(c) if c.contains("username") => return StoreError::Duplicate(UniqueField::Username),
                Some(c) if c.contains("email") => return StoreError::Duplicate(UniqueField::Email),
                _ => {}
            }
        }
    }
    StoreError::Database(err)
}

/// PostgreSQL implementation of all store traits
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Wraps an existing pool
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Underlying pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn fetch_credential(&self, filter: &str, value: &str) -> StoreResult<Option<CredentialRecord>> {
        let query = format!("SELECT {} FROM credentials c WHERE {}", CREDENTIAL_COLUMNS, filter);
        let row = sqlx::query_as::<_, CredentialRow>(&query)
            .bind(value)
            .fetch_optional(&self.pool)
            .await?;

        row.map(CredentialRow::into_record).transpose()
    }

    async fn replace_roles(
        tx: &mut Transaction<'_, Postgres>,
        credential_id: i64,
        roles: &BTreeSet<Role>,
    ) -> StoreResult<()> {
        sqlx::query("DELETE FROM credential_roles WHERE credential_id = $1")
            .bind(credential_id)
            .execute(&mut **tx)
            .await?;

        for role in roles {
            sqlx::query("INSERT INTO credential_roles (credential_id, role) VALUES ($1, $2)")
                .bind(credential_id)
                .bind(role.as_str())
                .execute(&mut **tx)
                .await?;
        }

        Ok(())
    }
}

#[async_trait]
impl CredentialStore for PgStore {
    async fn find_by_id(&self, id: i64) -> StoreResult<Option<CredentialRecord>> {
        let query = format!("SELECT {} FROM credentials c WHERE c.id = $1", CREDENTIAL_COLUMNS);
        let row = sqlx::query_as::<_, CredentialRow>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(CredentialRow::into_record).transpose()
    }

    async fn find_by_username(&self, username: &str) -> StoreResult<Option<CredentialRecord>> {
        self.fetch_credential("c.username = $1", username).await
    }

    async fn find_by_email(&self, email: &str) -> StoreResult<Option<CredentialRecord>> {
        // Bound parameters arrive as text; the cast selects the citext operator
        self.fetch_credential("c.email = $1::citext", email).await
    }

    async fn find_by_identifier(&self, identifier: &str) -> StoreResult<Option<CredentialRecord>> {
        // A username match wins over another account's email
        self.fetch_credential(
            "c.username = $1 OR c.email = $1::citext ORDER BY (c.username = $1) DESC LIMIT 1",
            identifier,
        )
        .await
    }

    async fn create(
        &self,
        credential: NewCredential,
        developer: Option<NewDeveloper>,
    ) -> StoreResult<CreatedCredential> {
        let mut tx = self.pool.begin().await?;

        let (id,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO credentials (username, email, password_hash, provider, provider_id, display_name)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id
            "#,
        )
        .bind(&credential.username)
        .bind(&credential.email)
        .bind(&credential.password_hash)
        .bind(credential.provider.as_str())
        .bind(&credential.provider_id)
        .bind(&credential.display_name)
        .fetch_one(&mut *tx)
        .await
        .map_err(map_unique_violation)?;

        Self::replace_roles(&mut tx, id, &credential.roles).await?;

        let developer = match developer {
            Some(new_dev) => Some(
                sqlx::query_as::<_, Developer>(
                    r#"
                    INSERT INTO developers (credential_id, first_name, last_name, email, skills)
                    VALUES ($1, $2, $3, $4, $5)
                    RETURNING id, credential_id, first_name, last_name, email, skills, created_at
                    "#,
                )
                .bind(id)
                .bind(new_dev.first_name)
                .bind(new_dev.last_name)
                .bind(new_dev.email)
                .bind(new_dev.skills)
                .fetch_one(&mut *tx)
                .await?,
            ),
            None => None,
        };

        // Dropping an uncommitted transaction rolls it back, so any `?` above
        // leaves neither record behind.
        tx.commit().await?;

        let credential = self
            .find_by_id(id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("credential {}", id)))?;

        Ok(CreatedCredential {
            credential,
            developer,
        })
    }

    async fn update_provider_profile(
        &self,
        id: i64,
        provider_id: &str,
        display_name: Option<&str>,
    ) -> StoreResult<CredentialRecord> {
        let updated = sqlx::query(
            r#"
            UPDATE credentials
            SET provider_id = $2, display_name = COALESCE($3, display_name)
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(provider_id)
        .bind(display_name)
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("credential {}", id)));
        }

        self.find_by_id(id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("credential {}", id)))
    }

    async fn touch_last_login(&self, id: i64) -> StoreResult<()> {
        sqlx::query("UPDATE credentials SET last_login_at = NOW() WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_roles(&self, id: i64, roles: &BTreeSet<Role>) -> StoreResult<Option<CredentialRecord>> {
        let mut tx = self.pool.begin().await?;

        let exists: Option<(i64,)> = sqlx::query_as("SELECT id FROM credentials WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?;
        if exists.is_none() {
            return Ok(None);
        }

        Self::replace_roles(&mut tx, id, roles).await?;
        tx.commit().await?;

        self.find_by_id(id).await
    }

    async fn set_enabled(&self, id: i64, enabled: bool) -> StoreResult<Option<CredentialRecord>> {
        let updated = sqlx::query("UPDATE credentials SET enabled = $2 WHERE id = $1")
            .bind(id)
            .bind(enabled)
            .execute(&self.pool)
            .await?;

        if updated.rows_affected() == 0 {
            return Ok(None);
        }
        self.find_by_id(id).await
    }
}

#[async_trait]
impl DeveloperStore for PgStore {
    async fn find_developer(&self, id: i64) -> StoreResult<Option<Developer>> {
        let developer = sqlx::query_as::<_, Developer>(
            r#"
            SELECT id, credential_id, first_name, last_name, email, skills, created_at
            FROM developers
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(developer)
    }

    async fn find_developer_by_credential(&self, credential_id: i64) -> StoreResult<Option<Developer>> {
        let developer = sqlx::query_as::<_, Developer>(
            r#"
            SELECT id, credential_id, first_name, last_name, email, skills, created_at
            FROM developers
            WHERE credential_id = $1
            "#,
        )
        .bind(credential_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(developer)
    }

    async fn list_developers(&self) -> StoreResult<Vec<Developer>> {
        let developers = sqlx::query_as::<_, Developer>(
            r#"
            SELECT id, credential_id, first_name, last_name, email, skills, created_at
            FROM developers
            ORDER BY id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(developers)
    }
}

#[async_trait]
impl ResourceStore for PgStore {
    async fn find_project(&self, id: i64) -> StoreResult<Option<Project>> {
        let project = sqlx::query_as::<_, Project>(
            "SELECT id, name, description, created_at FROM projects WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(project)
    }

    async fn find_task(&self, id: i64) -> StoreResult<Option<Task>> {
        let task = sqlx::query_as::<_, Task>(
            r#"
            SELECT id, project_id, title, status, assigned_developer_id, created_at
            FROM tasks
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(task)
    }

    async fn task_assignee(&self, task_id: i64) -> StoreResult<Option<i64>> {
        let row: Option<(Option<i64>,)> =
            sqlx::query_as("SELECT assigned_developer_id FROM tasks WHERE id = $1")
                .bind(task_id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.and_then(|(developer_id,)| developer_id))
    }

    async fn project_assignees(&self, project_id: i64) -> StoreResult<Vec<i64>> {
        let rows: Vec<(i64,)> = sqlx::query_as(
            r#"
            SELECT DISTINCT assigned_developer_id
            FROM tasks
            WHERE project_id = $1 AND assigned_developer_id IS NOT NULL
            ORDER BY assigned_developer_id
            "#,
        )
        .bind(project_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    async fn update_task_status(&self, id: i64, status: TaskStatus) -> StoreResult<Option<Task>> {
        let task = sqlx::query_as::<_, Task>(
            r#"
            UPDATE tasks SET status = $2
            WHERE id = $1
            RETURNING id, project_id, title, status, assigned_developer_id, created_at
            "#,
        )
        .bind(id)
        .bind(status)
        .fetch_optional(&self.pool)
        .await?;

        Ok(task)
    }
}

#[async_trait]
impl GrantStore for PgStore {
    async fn has_grant(&self, credential_id: i64, kind: ResourceKind, resource_id: i64) -> StoreResult<bool> {
        let (granted,): (bool,) = sqlx::query_as(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM resource_grants
                WHERE credential_id = $1 AND resource_kind = $2 AND resource_id = $3
            )
            "#,
        )
        .bind(credential_id)
        .bind(kind.as_str())
        .bind(resource_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(granted)
    }
}

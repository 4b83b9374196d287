/// Project and task models
///
/// These are the resources the authorization policy engine reasons about.
/// Project/task CRUD belongs to the domain layer; this crate only needs the
/// ownership chain: a task has an optional assigned developer, and a
/// developer is optionally linked to a credential record.
///
/// # Schema
///
/// ```sql
/// CREATE TYPE task_status AS ENUM ('todo', 'in_progress', 'review', 'done');
///
/// CREATE TABLE projects (
///     id BIGSERIAL PRIMARY KEY,
///     name TEXT NOT NULL,
///     description TEXT,
///     created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
/// );
///
/// CREATE TABLE tasks (
///     id BIGSERIAL PRIMARY KEY,
///     project_id BIGINT NOT NULL REFERENCES projects(id),
///     title TEXT NOT NULL,
///     status task_status NOT NULL DEFAULT 'todo',
///     assigned_developer_id BIGINT REFERENCES developers(id),
///     created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
/// );
///
/// CREATE TABLE resource_grants (
///     credential_id BIGINT NOT NULL REFERENCES credentials(id),
///     resource_kind TEXT NOT NULL,
///     resource_id BIGINT NOT NULL,
///     PRIMARY KEY (credential_id, resource_kind, resource_id)
/// );
/// ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Task workflow status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "task_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Not started
    Todo,

    /// Being worked on
    InProgress,

    /// Awaiting review
    Review,

    /// Finished
    Done,
}

impl TaskStatus {
    /// Converts status to its stored name
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Todo => "todo",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Review => "review",
            TaskStatus::Done => "done",
        }
    }
}

/// Project
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Project {
    /// Project id
    pub id: i64,

    /// Project name
    pub name: String,

    /// Optional description
    pub description: Option<String>,

    /// When the project was created
    pub created_at: DateTime<Utc>,
}

/// Task within a project
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Task {
    /// Task id
    pub id: i64,

    /// Owning project
    pub project_id: i64,

    /// Short title
    pub title: String,

    /// Workflow status
    pub status: TaskStatus,

    /// Assigned developer, if any
    pub assigned_developer_id: Option<i64>,

    /// When the task was created
    pub created_at: DateTime<Utc>,
}

/// Kind of resource a grant or permission refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// A project
    Project,

    /// A task
    Task,

    /// Developer profiles
    Developer,

    /// Credential records (user administration)
    User,

    /// Audit log entries
    AuditLog,
}

impl ResourceKind {
    /// Stored name of the resource kind
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Project => "project",
            ResourceKind::Task => "task",
            ResourceKind::Developer => "developer",
            ResourceKind::User => "user",
            ResourceKind::AuditLog => "audit_log",
        }
    }
}

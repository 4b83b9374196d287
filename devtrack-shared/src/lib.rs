//! # DevTrack Shared Library
//!
//! Identity, token and authorization core of the DevTrack project-tracking
//! backend, plus the persistence interfaces it consumes.
//!
//! ## Module Organization
//!
//! - `auth`: Tokens, credentials, federated login, middleware and access policy
//! - `models`: Credential, role, developer and project/task models
//! - `store`: Async store traits with PostgreSQL and in-memory implementations
//! - `db`: Connection pool and migrations

pub mod auth;
pub mod db;
pub mod models;
pub mod store;

/// Current version of the DevTrack shared library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// API route handlers
///
/// This module contains all route handlers organized by resource:
///
/// - `health`: Health check endpoint
/// - `auth`: Login, registration and token refresh
/// - `federated`: Federated login start and provider callback
/// - `users`: Current principal and user administration
/// - `resources`: Guarded project, task and developer endpoints

pub mod auth;
pub mod federated;
pub mod health;
pub mod resources;
pub mod users;

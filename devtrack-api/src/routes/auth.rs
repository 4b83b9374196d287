/// Authentication endpoints
///
/// This module provides local authentication endpoints:
/// - Login
/// - Registration
/// - Token refresh
///
/// # Endpoints
///
/// - `POST /login` - Login and get tokens
/// - `POST /register` - Register new user
/// - `POST /token/refresh` - Exchange a refresh token for a new pair

use crate::{
    app::AppState,
    error::{ApiError, ApiResult},
};
use axum::{extract::State, http::StatusCode, Json};
use devtrack_shared::{
    auth::{context::Principal, credentials::Registration, token::TokenPair},
    models::developer::DeveloperProfile,
    store::CredentialStore,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use validator::Validate;

/// Login request
#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    /// Username or email address
    #[serde(alias = "username", alias = "email")]
    #[validate(length(min = 1, message = "Username or email is required"))]
    pub identifier: String,

    /// Password
    #[validate(length(min = 1, message = "Password is required"))]
    pub password: String,
}

/// Login response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    #[serde(flatten)]
    pub tokens: TokenPair,

    pub principal: Principal,
}

/// Register request
#[derive(Debug, Deserialize, Validate)]
pub struct RegisterRequest {
    /// Login name
    #[validate(length(min = 3, max = 50, message = "Username must be 3 to 50 characters"))]
    pub username: String,

    /// Email address
    #[validate(email(message = "Invalid email format"))]
    pub email: String,

    /// Password (will be validated for strength)
    #[validate(length(min = 8, message = "Password must be at least 8 characters"))]
    pub password: String,

    /// Developer profile details
    #[serde(default)]
    pub profile: DeveloperProfile,

    /// Requested role; unknown or missing names register a developer
    pub role: Option<String>,
}

/// Register response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterResponse {
    pub message: String,
    pub principal: Principal,

    /// Developer profile provisioned for developer-role accounts
    #[serde(skip_serializing_if = "Option::is_none")]
    pub developer_id: Option<i64>,
}

/// Refresh token request
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    /// Refresh token
    #[serde(alias = "refresh_token")]
    pub refresh_token: String,
}

/// Login endpoint
///
/// Authenticates by username or email and returns a token pair.
///
/// # Endpoint
///
/// ```text
/// POST /login
/// Content-Type: application/json
///
/// {
///   "identifier": "alice",
///   "password": "SecureP@ss123"
/// }
/// ```
///
/// # Response
///
/// ```json
/// {
///   "accessToken": "eyJ...",
///   "refreshToken": "eyJ...",
///   "tokenType": "Bearer",
///   "expiresIn": 900,
///   "principal": { "id": 1, "username": "alice", "roles": ["developer"], ... }
/// }
/// ```
///
/// # Errors
///
/// - `401 Unauthorized`: Invalid credentials (the same answer for every cause)
/// - `422 Unprocessable Entity`: Validation failed
pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> ApiResult<Json<LoginResponse>> {
    req.validate()?;

    let principal = state
        .credentials
        .authenticate(&req.identifier, &req.password)
        .await?;
    let tokens = state.tokens.issue_pair(principal.username())?;

    Ok(Json(LoginResponse { tokens, principal }))
}

/// Registration endpoint
///
/// Creates a local account. A developer-role account gets its developer
/// profile in the same transaction.
///
/// # Endpoint
///
/// ```text
/// POST /register
/// Content-Type: application/json
///
/// {
///   "username": "alice",
///   "email": "alice@example.com",
///   "password": "SecureP@ss123",
///   "profile": { "first_name": "Alice", "last_name": "Liddell" },
///   "role": "developer"
/// }
/// ```
///
/// # Errors
///
/// - `409 Conflict`: Username or email already registered
/// - `422 Unprocessable Entity`: Validation failed or password too weak
pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> ApiResult<(StatusCode, Json<RegisterResponse>)> {
    req.validate()?;

    let registered = state
        .credentials
        .register(Registration {
            username: req.username,
            email: req.email,
            password: req.password,
            profile: req.profile,
            role: req.role,
        })
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            message: "User registered successfully".to_string(),
            principal: registered.principal,
            developer_id: registered.developer.map(|d| d.id),
        }),
    ))
}

/// Token refresh endpoint
///
/// Exchanges a refresh token for a new pair. The subject must still exist
/// and be enabled.
///
/// # Endpoint
///
/// ```text
/// POST /token/refresh
/// Content-Type: application/json
///
/// { "refreshToken": "eyJ..." }
/// ```
///
/// # Errors
///
/// - `401 Unauthorized`: Invalid, expired or access-kind token, or the
///   account is gone or disabled
pub async fn refresh(
    State(state): State<AppState>,
    Json(req): Json<RefreshRequest>,
) -> ApiResult<Json<TokenPair>> {
    let claims = state.tokens.verify_refresh(&req.refresh_token).map_err(|e| {
        debug!(reason = %e, "Rejected refresh token");
        ApiError::from(e)
    })?;

    let record = state
        .store
        .find_by_username(claims.subject())
        .await?
        .filter(|record| record.enabled)
        .ok_or_else(|| ApiError::Unauthorized("Invalid token".to_string()))?;

    let tokens = state.tokens.issue_pair(&record.username)?;
    info!(user_id = record.id, "Tokens refreshed");

    Ok(Json(tokens))
}

/// Error handling for the API server
///
/// This module provides a unified error type that maps to HTTP responses.
/// All handlers should return `Result<T, ApiError>` which automatically
/// converts to appropriate HTTP status codes with a stable JSON body:
///
/// ```json
/// { "error": "conflict", "message": "email is already registered" }
/// ```
///
/// Domain errors convert through `From`, so handlers propagate them with `?`.
/// Internal details are logged and replaced by a generic message.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use devtrack_shared::{
    auth::{
        credentials::CredentialError,
        federation::FederationError,
        password::PasswordError,
        policy::AuthzError,
        token::TokenError,
    },
    store::StoreError,
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// API result type alias
pub type ApiResult<T> = Result<T, ApiError>;

/// Unified API error type
#[derive(Debug)]
pub enum ApiError {
    /// Bad request (400)
    BadRequest(String),

    /// Unauthorized (401)
    Unauthorized(String),

    /// Authorization guard refusal (401 or 403)
    Authz(AuthzError),

    /// Not found (404)
    NotFound(String),

    /// Conflict (409), e.g. duplicate email
    Conflict(String),

    /// Unprocessable entity (422) - validation errors
    ValidationError(Vec<ValidationErrorDetail>),

    /// Federated login failure answered directly instead of by redirect
    Federation {
        status: StatusCode,
        code: &'static str,
        message: String,
    },

    /// Internal server error (500)
    InternalError(String),
}

/// Validation error detail
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationErrorDetail {
    /// Field that failed validation
    pub field: String,

    /// Error message
    pub message: String,
}

impl ValidationErrorDetail {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Error response format
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Error code (e.g., "bad_request", "unauthorized")
    pub error: String,

    /// Human-readable error message
    pub message: String,

    /// Optional validation errors
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Vec<ValidationErrorDetail>>,
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            ApiError::Unauthorized(msg) => write!(f, "Unauthorized: {}", msg),
            ApiError::Authz(err) => write!(f, "{}", err),
            ApiError::NotFound(msg) => write!(f, "Not found: {}", msg),
            ApiError::Conflict(msg) => write!(f, "Conflict: {}", msg),
            ApiError::ValidationError(errors) => {
                write!(f, "Validation failed: {} errors", errors.len())
            }
            ApiError::Federation { code, message, .. } => write!(f, "Federated login failed ({}): {}", code, message),
            ApiError::InternalError(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message, details) = match self {
            ApiError::Authz(err) => return err.into_response(),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg, None),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, "unauthorized", msg, None),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg, None),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "conflict", msg, None),
            ApiError::ValidationError(errors) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "validation_error",
                "Request validation failed".to_string(),
                Some(errors),
            ),
            ApiError::Federation { status, code, message } => (status, code, message, None),
            ApiError::InternalError(msg) => {
                // Log internal errors but don't expose details to clients
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "An internal error occurred".to_string(),
                    None,
                )
            }
        };

        let body = Json(ErrorResponse {
            error: error_code.to_string(),
            message,
            details,
        });

        (status, body).into_response()
    }
}

impl From<AuthzError> for ApiError {
    fn from(err: AuthzError) -> Self {
        ApiError::Authz(err)
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Duplicate(field) => ApiError::Conflict(format!("{} is already registered", field.as_str())),
            StoreError::NotFound(what) => ApiError::NotFound(what),
            StoreError::Database(e) => ApiError::InternalError(format!("Database error: {}", e)),
        }
    }
}

impl From<TokenError> for ApiError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Encode(msg) | TokenError::WeakSecret { kid: msg, .. } | TokenError::InvalidTtl(msg) => {
                ApiError::InternalError(format!("Token service failure: {}", msg))
            }
            TokenError::Expired => ApiError::Unauthorized("Token expired".to_string()),
            _ => ApiError::Unauthorized("Invalid token".to_string()),
        }
    }
}

impl From<PasswordError> for ApiError {
    fn from(err: PasswordError) -> Self {
        match err {
            PasswordError::Weak(message) => {
                ApiError::ValidationError(vec![ValidationErrorDetail::new("password", message)])
            }
            other => ApiError::InternalError(format!("Password operation failed: {}", other)),
        }
    }
}

impl From<CredentialError> for ApiError {
    fn from(err: CredentialError) -> Self {
        match err {
            CredentialError::InvalidCredentials => ApiError::Unauthorized("Invalid credentials".to_string()),
            CredentialError::DuplicateIdentity { field } => {
                ApiError::Conflict(format!("{} is already registered", field.as_str()))
            }
            CredentialError::Invalid(message) => {
                ApiError::ValidationError(vec![ValidationErrorDetail::new("registration", message)])
            }
            CredentialError::WeakPassword(message) => {
                ApiError::ValidationError(vec![ValidationErrorDetail::new("password", message)])
            }
            CredentialError::Password(e) => e.into(),
            CredentialError::Store(e) => e.into(),
        }
    }
}

impl From<FederationError> for ApiError {
    fn from(err: FederationError) -> Self {
        let status = match &err {
            FederationError::UnknownProvider(_) => StatusCode::NOT_FOUND,
            FederationError::UnauthorizedRedirect
            | FederationError::InvalidState
            | FederationError::MissingCode
            | FederationError::ProviderProfileIncomplete => StatusCode::BAD_REQUEST,
            FederationError::ProviderDenied(_) => StatusCode::UNAUTHORIZED,
            FederationError::AccountDisabled => StatusCode::FORBIDDEN,
            FederationError::CrossProviderCollision => StatusCode::CONFLICT,
            FederationError::Provider(_) => StatusCode::BAD_GATEWAY,
            FederationError::ProviderTimeout => StatusCode::GATEWAY_TIMEOUT,
            FederationError::Token(_)
            | FederationError::Password(_)
            | FederationError::Cookie(_)
            | FederationError::Store(_) => {
                return ApiError::InternalError(err.to_string());
            }
        };

        let message = match &err {
            // Upstream detail stays in the logs
            FederationError::Provider(_) => "Identity provider request failed".to_string(),
            other => other.to_string(),
        };

        ApiError::Federation {
            status,
            code: err.code(),
            message,
        }
    }
}

/// Convert validator output to a 422 response
impl From<validator::ValidationErrors> for ApiError {
    fn from(e: validator::ValidationErrors) -> Self {
        let errors: Vec<ValidationErrorDetail> = e
            .field_errors()
            .iter()
            .flat_map(|(field, errors)| {
                errors.iter().map(move |error| ValidationErrorDetail {
                    field: field.to_string(),
                    message: error
                        .message
                        .as_ref()
                        .map(|m| m.to_string())
                        .unwrap_or_else(|| "Validation failed".to_string()),
                })
            })
            .collect();
        ApiError::ValidationError(errors)
    }
}

/// Federated login endpoints
///
/// # Endpoints
///
/// - `GET /federated/:provider/start?redirect=<uri>` - 302 to the provider
/// - `GET /federated/:provider/callback?code&state[&error]` - 302 to the target
///
/// The handshake state lives in two HTTP-only cookies scoped to
/// `/federated`; see `devtrack_shared::auth::federation::cookie`.

use crate::{
    app::AppState,
    error::{ApiError, ApiResult},
};
use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use axum_extra::extract::cookie::CookieJar;
use devtrack_shared::auth::federation::{
    cookie::{PENDING_COOKIE, REDIRECT_COOKIE},
    CallbackParams,
};
use serde::Deserialize;

/// Start query
#[derive(Debug, Deserialize)]
pub struct StartQuery {
    /// Post-login destination; must be on the allow-list
    pub redirect: Option<String>,
}

fn found(location: &str) -> Response {
    (StatusCode::FOUND, [(header::LOCATION, location.to_string())]).into_response()
}

/// Begins a federated login
///
/// # Errors
///
/// - `400 Bad Request`: Redirect target not on the allow-list
/// - `404 Not Found`: Provider unknown or not configured
pub async fn start(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    Query(query): Query<StartQuery>,
    jar: CookieJar,
) -> ApiResult<(CookieJar, Response)> {
    let started = state.federation.start(&provider, query.redirect.as_deref())?;

    let jar = started
        .cookies
        .into_iter()
        .fold(jar, |jar, cookie| jar.add(cookie));

    Ok((jar, found(&started.location)))
}

/// Provider callback
///
/// Always clears both handshake cookies. Success and most failures answer
/// with a redirect; when no safe redirect target exists the error is
/// returned as JSON instead.
pub async fn callback(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    Query(params): Query<CallbackParams>,
    jar: CookieJar,
) -> (CookieJar, Response) {
    let pending = jar.get(PENDING_COOKIE).map(|c| c.value().to_string());
    let redirect = jar.get(REDIRECT_COOKIE).map(|c| c.value().to_string());

    let outcome = state
        .federation
        .complete(&provider, params, pending.as_deref(), redirect.as_deref())
        .await;

    let jar = outcome
        .cookies
        .into_iter()
        .fold(jar, |jar, cookie| jar.add(cookie));

    let response = match (outcome.redirect, outcome.result) {
        (Some(target), _) => found(target.as_str()),
        (None, Ok(completed)) => Json(completed.tokens).into_response(),
        (None, Err(e)) => ApiError::from(e).into_response(),
    };

    (jar, response)
}

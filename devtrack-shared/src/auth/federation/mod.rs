/// Federated login orchestration
///
/// A federated login is a three-step handshake that keeps no server-side
/// state between steps:
///
/// 1. [`FederationOrchestrator::start`] validates the post-login redirect
///    target, seals a pending authorization request into a cookie and points
///    the browser at the provider's consent page.
/// 2. [`FederationOrchestrator::complete`] runs when the provider calls back.
///    It verifies the pending cookie against the returned `state`,
///    re-validates the redirect target, exchanges the authorization code for
///    a profile under a timeout and resolves that profile to a local
///    credential record (creating one on first login).
/// 3. Session tokens are minted and the browser is redirected to the target
///    with `accessToken` and `refreshToken` query parameters.
///
/// Both handshake cookies are cleared on every callback, successful or not.
/// Failures redirect to the validated target (or the configured failure
/// page) with an `error` query parameter. A target that fails the allow-list
/// never receives a redirect.
///
/// # Identity Resolution
///
/// | Existing record with the profile's email | Outcome                          |
/// |------------------------------------------|----------------------------------|
/// | none                                     | new contractor record            |
/// | same provider, enabled                   | provider id/display name refresh |
/// | same provider, disabled                  | `AccountDisabled`                |
/// | different provider                       | `CrossProviderCollision`         |

pub mod cookie;
pub mod provider;
pub mod redirect;

use axum_extra::extract::cookie::Cookie;
use serde::Deserialize;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

use self::cookie::{CookieCodec, CookieError};
use self::provider::{IdentityProvider, ProviderError, ProviderProfile};
use self::redirect::RedirectAllowList;
use super::context::Principal;
use super::password::{self, PasswordError};
use super::token::{TokenError, TokenPair, TokenService};
use crate::models::{
    credential::{CredentialRecord, FederationProvider, NewCredential},
    role::Role,
};
use crate::store::{CredentialStore, StoreError, UniqueField};

/// Default bound on the provider code exchange
pub const DEFAULT_PROVIDER_TIMEOUT_SECS: u64 = 10;

/// Creates retried when a concurrent login claims the derived username first
const USERNAME_RETRIES: usize = 3;

/// Error type for federated login
#[derive(Debug, thiserror::Error)]
pub enum FederationError {
    /// Provider name is unknown or not configured
    #[error("Unknown identity provider: {0}")]
    UnknownProvider(String),

    /// Redirect target is not on the allow-list
    #[error("Redirect target is not allowed")]
    UnauthorizedRedirect,

    /// Pending cookie missing, forged, expired or not matching the callback
    #[error("Invalid or expired login state")]
    InvalidState,

    /// Provider reported an error instead of a code
    #[error("Identity provider denied the request: {0}")]
    ProviderDenied(String),

    /// Callback carried neither a code nor an error
    #[error("Authorization code missing")]
    MissingCode,

    /// Code exchange did not finish in time
    #[error("Identity provider timed out")]
    ProviderTimeout,

    /// Code exchange failed
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// Provider did not disclose an email address
    #[error("Identity provider profile has no email address")]
    ProviderProfileIncomplete,

    /// Email already belongs to an identity under another provider
    #[error("Email is registered with a different sign-in method")]
    CrossProviderCollision,

    /// Matching local record is disabled
    #[error("Account is disabled")]
    AccountDisabled,

    #[error(transparent)]
    Token(#[from] TokenError),

    #[error(transparent)]
    Password(#[from] PasswordError),

    #[error(transparent)]
    Cookie(#[from] CookieError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl FederationError {
    /// Stable code sent as the `error` query parameter
    pub fn code(&self) -> &'static str {
        match self {
            FederationError::UnknownProvider(_) => "unknown_provider",
            FederationError::UnauthorizedRedirect => "unauthorized_redirect",
            FederationError::InvalidState => "invalid_state",
            FederationError::ProviderDenied(_) => "provider_denied",
            FederationError::MissingCode => "missing_code",
            FederationError::ProviderTimeout => "provider_timeout",
            FederationError::Provider(_) => "provider_error",
            FederationError::ProviderProfileIncomplete => "profile_incomplete",
            FederationError::CrossProviderCollision => "cross_provider_collision",
            FederationError::AccountDisabled => "account_disabled",
            FederationError::Token(_)
            | FederationError::Password(_)
            | FederationError::Cookie(_)
            | FederationError::Store(_) => "server_error",
        }
    }
}

/// Orchestrator configuration
#[derive(Debug, Clone)]
pub struct FederationSettings {
    /// Public base URL of this service; callbacks go to `{base}/federated/{provider}/callback`
    pub callback_base: Url,

    pub allow_list: RedirectAllowList,

    /// Where failures go when no valid target is known
    pub failure_redirect: Option<Url>,

    pub provider_timeout: Duration,

    pub cookie_secret: Vec<u8>,

    pub cookie_ttl: chrono::Duration,

    /// Sets the `Secure` attribute on handshake cookies
    pub cookie_secure: bool,
}

/// Query parameters of a provider callback
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

/// Result of [`FederationOrchestrator::start`]
#[derive(Debug)]
pub struct StartOutcome {
    /// Provider consent page
    pub location: String,

    /// Pending request and redirect target cookies
    pub cookies: [Cookie<'static>; 2],
}

/// A finished federated login
#[derive(Debug, Clone)]
pub struct Completed {
    pub principal: Principal,
    pub tokens: TokenPair,

    /// Whether the credential record was created by this login
    pub created: bool,
}

/// Result of [`FederationOrchestrator::complete`]
#[derive(Debug)]
pub struct CallbackOutcome {
    /// Always clears both handshake cookies
    pub cookies: [Cookie<'static>; 2],

    /// Where to send the browser; `None` means answer directly
    pub redirect: Option<Url>,

    pub result: Result<Completed, FederationError>,
}

/// Drives the federated login handshake
#[derive(Clone)]
pub struct FederationOrchestrator {
    providers: HashMap<FederationProvider, Arc<dyn IdentityProvider>>,
    credentials: Arc<dyn CredentialStore>,
    tokens: Arc<TokenService>,
    codec: CookieCodec,
    allow_list: RedirectAllowList,
    callback_base: Url,
    failure_redirect: Option<Url>,
    provider_timeout: Duration,
}

impl FederationOrchestrator {
    pub fn new<S>(settings: FederationSettings, tokens: Arc<TokenService>, credentials: Arc<S>) -> Self
    where
        S: CredentialStore + 'static,
    {
        Self {
            providers: HashMap::new(),
            credentials,
            tokens,
            codec: CookieCodec::new(settings.cookie_secret, settings.cookie_ttl, settings.cookie_secure),
            allow_list: settings.allow_list,
            callback_base: settings.callback_base,
            failure_redirect: settings.failure_redirect,
            provider_timeout: settings.provider_timeout,
        }
    }

    /// Registers a provider, replacing any earlier one of the same kind
    pub fn with_provider(mut self, provider: Arc<dyn IdentityProvider>) -> Self {
        let kind = provider.kind();
        if kind.is_federated() {
            self.providers.insert(kind, provider);
        } else {
            warn!("Ignoring identity provider registered as local");
        }
        self
    }

    /// Configured providers, in a fixed order
    pub fn providers(&self) -> Vec<FederationProvider> {
        [FederationProvider::Google, FederationProvider::Github]
            .into_iter()
            .filter(|kind| self.providers.contains_key(kind))
            .collect()
    }

    pub fn callback_uri(&self, kind: FederationProvider) -> String {
        format!(
            "{}/federated/{}/callback",
            self.callback_base.as_str().trim_end_matches('/'),
            kind
        )
    }

    fn provider(&self, name: &str) -> Result<(FederationProvider, &Arc<dyn IdentityProvider>), FederationError> {
        let unknown = || FederationError::UnknownProvider(name.to_string());
        let kind: FederationProvider = name.parse().map_err(|_| unknown())?;
        let provider = self.providers.get(&kind).ok_or_else(unknown)?;
        Ok((kind, provider))
    }

    /// Begins a federated login
    ///
    /// # Errors
    ///
    /// `UnknownProvider` or `UnauthorizedRedirect`; no cookies are set in
    /// either case.
    pub fn start(&self, provider_name: &str, redirect: Option<&str>) -> Result<StartOutcome, FederationError> {
        let (kind, provider) = self.provider(provider_name)?;
        let target = self
            .allow_list
            .validate(redirect)
            .map_err(|_| FederationError::UnauthorizedRedirect)?;

        let pending = self.codec.begin(kind);
        let sealed = self.codec.seal(&pending)?;
        let location = provider.authorization_url(&pending.state, &self.callback_uri(kind));

        debug!(provider = %kind, "Federated login started");

        Ok(StartOutcome {
            location,
            cookies: [
                self.codec.pending_cookie(sealed),
                self.codec.redirect_cookie(target.as_str()),
            ],
        })
    }

    /// Handles the provider callback
    ///
    /// `pending_cookie` and `redirect_cookie` are the raw values of the two
    /// handshake cookies, if the browser sent them.
    pub async fn complete(
        &self,
        provider_name: &str,
        params: CallbackParams,
        pending_cookie: Option<&str>,
        redirect_cookie: Option<&str>,
    ) -> CallbackOutcome {
        let (target, result) = match self.callback_target(redirect_cookie) {
            Ok(target) => {
                let result = self.finish(provider_name, params, pending_cookie).await;
                (Some(target), result)
            }
            Err(e) => (None, Err(e)),
        };

        let redirect = match &result {
            Ok(completed) => target.map(|mut url| {
                url.query_pairs_mut()
                    .append_pair("accessToken", &completed.tokens.access_token)
                    .append_pair("refreshToken", &completed.tokens.refresh_token);
                url
            }),
            Err(e) => {
                warn!(provider = provider_name, error = %e, "Federated login failed");
                target.or_else(|| self.failure_redirect.clone()).map(|mut url| {
                    url.query_pairs_mut().append_pair("error", e.code());
                    url
                })
            }
        };

        CallbackOutcome {
            cookies: self.codec.clearing_cookies(),
            redirect,
            result,
        }
    }

    fn callback_target(&self, redirect_cookie: Option<&str>) -> Result<Url, FederationError> {
        let requested = match redirect_cookie {
            Some(value) => Some(CookieCodec::decode_redirect(value).ok_or(FederationError::UnauthorizedRedirect)?),
            None => None,
        };

        self.allow_list
            .validate(requested.as_deref())
            .map_err(|_| FederationError::UnauthorizedRedirect)
    }

    async fn finish(
        &self,
        provider_name: &str,
        params: CallbackParams,
        pending_cookie: Option<&str>,
    ) -> Result<Completed, FederationError> {
        let (kind, provider) = self.provider(provider_name)?;

        let pending = pending_cookie
            .ok_or(FederationError::InvalidState)
            .and_then(|value| {
                self.codec.open(value).map_err(|e| {
                    debug!(reason = %e, "Rejected pending authorization cookie");
                    FederationError::InvalidState
                })
            })?;

        if pending.provider != kind || params.state.as_deref() != Some(pending.state.as_str()) {
            return Err(FederationError::InvalidState);
        }

        if let Some(error) = params.error {
            debug!(
                provider = %kind,
                description = params.error_description.as_deref().unwrap_or(""),
                "Provider returned an error"
            );
            return Err(FederationError::ProviderDenied(error));
        }

        let code = params
            .code
            .filter(|c| !c.is_empty())
            .ok_or(FederationError::MissingCode)?;

        let callback_uri = self.callback_uri(kind);
        let profile = tokio::time::timeout(self.provider_timeout, provider.exchange(&code, &callback_uri))
            .await
            .map_err(|_| FederationError::ProviderTimeout)??;

        let (record, created) = self.resolve_identity(kind, profile).await?;
        let tokens = self.tokens.issue_pair(&record.username)?;

        if let Err(e) = self.credentials.touch_last_login(record.id).await {
            warn!(user_id = record.id, error = %e, "Failed to update last login");
        }

        info!(provider = %kind, user_id = record.id, created, "Federated login completed");

        Ok(Completed {
            principal: Principal::from_record(&record),
            tokens,
            created,
        })
    }

    async fn resolve_identity(
        &self,
        kind: FederationProvider,
        profile: ProviderProfile,
    ) -> Result<(CredentialRecord, bool), FederationError> {
        let email = profile
            .email
            .as_deref()
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .ok_or(FederationError::ProviderProfileIncomplete)?;

        match self.credentials.find_by_email(email).await? {
            Some(existing) if existing.provider != kind => {
                info!(
                    user_id = existing.id,
                    existing = %existing.provider,
                    attempted = %kind,
                    "Cross-provider email collision"
                );
                Err(FederationError::CrossProviderCollision)
            }
            Some(existing) if !existing.enabled => Err(FederationError::AccountDisabled),
            Some(existing) => {
                let updated = self
                    .credentials
                    .update_provider_profile(existing.id, &profile.provider_id, profile.display_name.as_deref())
                    .await?;
                Ok((updated, false))
            }
            None => {
                let password_hash = password::unusable_password_hash()?;
                let mut retries = 0;
                loop {
                    let username = self.unique_username(email).await?;
                    let result = self
                        .credentials
                        .create(
                            NewCredential {
                                username: username.clone(),
                                email: email.to_string(),
                                password_hash: password_hash.clone(),
                                roles: BTreeSet::from([Role::federated_default()]),
                                provider: kind,
                                provider_id: Some(profile.provider_id.clone()),
                                display_name: profile.display_name.clone(),
                            },
                            None,
                        )
                        .await;

                    match result {
                        Ok(created) => return Ok((created.credential, true)),
                        Err(StoreError::Duplicate(UniqueField::Username)) if retries < USERNAME_RETRIES => {
                            retries += 1;
                            debug!(username = %username, retries, "Derived username taken concurrently, retrying");
                        }
                        Err(e) => return Err(e.into()),
                    }
                }
            }
        }
    }

    /// First free name among `base`, `base1`, `base2`, ...
    async fn unique_username(&self, email: &str) -> Result<String, FederationError> {
        let base = username_base(email);
        if !self.credentials.username_exists(&base).await? {
            return Ok(base);
        }

        let mut suffix: u64 = 1;
        loop {
            let candidate = format!("{}{}", base, suffix);
            if !self.credentials.username_exists(&candidate).await? {
                return Ok(candidate);
            }
            suffix += 1;
        }
    }
}

/// Lower-cased email local part restricted to `[a-z0-9._-]`
fn username_base(email: &str) -> String {
    let local = email.split('@').next().unwrap_or_default();
    let base: String = local
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        .map(|c| c.to_ascii_lowercase())
        .collect();

    if base.is_empty() {
        "user".to_string()
    } else {
        base
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::token::TokenSettings;
    use crate::models::developer::NewDeveloper;
    use crate::store::memory::MemoryStore;
    use crate::store::{CreatedCredential, StoreResult};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const SECRET: &str = "test-secret-key-at-least-32-bytes-long";
    const TARGET: &str = "https://app.example.com/auth/done";

    struct FakeProvider {
        kind: FederationProvider,
        profile: ProviderProfile,
        delay: Option<Duration>,
        exchanges: AtomicUsize,
    }

    impl FakeProvider {
        fn new(kind: FederationProvider, email: Option<&str>) -> Arc<Self> {
            Arc::new(Self {
                kind,
                profile: ProviderProfile {
                    provider_id: format!("{}-42", kind),
                    email: email.map(str::to_string),
                    display_name: Some("Fed User".to_string()),
                },
                delay: None,
                exchanges: AtomicUsize::new(0),
            })
        }

        fn exchanges(&self) -> usize {
            self.exchanges.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl IdentityProvider for FakeProvider {
        fn kind(&self) -> FederationProvider {
            self.kind
        }

        fn authorization_url(&self, state: &str, callback_uri: &str) -> String {
            let mut url = Url::parse("https://idp.test/authorize").unwrap();
            url.query_pairs_mut()
                .append_pair("state", state)
                .append_pair("redirect_uri", callback_uri);
            url.into()
        }

        async fn exchange(&self, code: &str, _callback_uri: &str) -> Result<ProviderProfile, ProviderError> {
            self.exchanges.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if code == "bad-code" {
                return Err(ProviderError::InvalidResponse("bad_verification_code".to_string()));
            }
            Ok(self.profile.clone())
        }
    }

    fn settings(failure_redirect: Option<&str>) -> FederationSettings {
        FederationSettings {
            callback_base: Url::parse("https://api.example.com/").unwrap(),
            allow_list: RedirectAllowList::new([TARGET, "http://localhost:3000/callback"]).unwrap(),
            failure_redirect: failure_redirect.map(|u| Url::parse(u).unwrap()),
            provider_timeout: Duration::from_millis(200),
            cookie_secret: b"cookie-secret-key-at-least-32-bytes!".to_vec(),
            cookie_ttl: chrono::Duration::seconds(180),
            cookie_secure: true,
        }
    }

    fn orchestrator(store: Arc<MemoryStore>, provider: Arc<FakeProvider>) -> (FederationOrchestrator, Arc<TokenService>) {
        let tokens = Arc::new(TokenService::new(TokenSettings::new("k1", SECRET)).unwrap());
        let orchestrator = FederationOrchestrator::new(settings(None), tokens.clone(), store).with_provider(provider);
        (orchestrator, tokens)
    }

    /// Starts a login and returns (state, pending cookie, redirect cookie)
    fn begin(orchestrator: &FederationOrchestrator, provider: &str, redirect: Option<&str>) -> (String, String, String) {
        let started = orchestrator.start(provider, redirect).unwrap();
        let location = Url::parse(&started.location).unwrap();
        let state = location
            .query_pairs()
            .find(|(k, _)| k == "state")
            .map(|(_, v)| v.into_owned())
            .unwrap();
        let [pending, redirect] = started.cookies;
        (state, pending.value().to_string(), redirect.value().to_string())
    }

    fn params(code: &str, state: &str) -> CallbackParams {
        CallbackParams {
            code: Some(code.to_string()),
            state: Some(state.to_string()),
            ..Default::default()
        }
    }

    fn query(url: &Url, key: &str) -> Option<String> {
        url.query_pairs().find(|(k, _)| k == key).map(|(_, v)| v.into_owned())
    }

    fn assert_cleared(outcome: &CallbackOutcome) {
        for cookie in &outcome.cookies {
            assert_eq!(cookie.value(), "");
            assert_eq!(cookie.max_age(), Some(time::Duration::ZERO));
        }
    }

    #[tokio::test]
    async fn test_start_sets_cookies_and_points_at_provider() {
        let provider = FakeProvider::new(FederationProvider::Github, Some("fed@example.com"));
        let (orchestrator, _) = orchestrator(Arc::new(MemoryStore::new()), provider);

        let started = orchestrator.start("github", Some(TARGET)).unwrap();
        let location = Url::parse(&started.location).unwrap();
        assert_eq!(location.host_str(), Some("idp.test"));
        assert_eq!(
            query(&location, "redirect_uri").as_deref(),
            Some("https://api.example.com/federated/github/callback")
        );

        let [pending, redirect] = &started.cookies;
        assert_eq!(pending.name(), cookie::PENDING_COOKIE);
        assert_eq!(redirect.name(), cookie::REDIRECT_COOKIE);
        assert_eq!(CookieCodec::decode_redirect(redirect.value()).as_deref(), Some(TARGET));
    }

    #[tokio::test]
    async fn test_start_rejections() {
        let provider = FakeProvider::new(FederationProvider::Github, Some("fed@example.com"));
        let (orchestrator, _) = orchestrator(Arc::new(MemoryStore::new()), provider);

        assert!(matches!(
            orchestrator.start("github", Some("https://evil.example/")),
            Err(FederationError::UnauthorizedRedirect)
        ));
        for name in ["google", "local", "facebook"] {
            assert!(matches!(
                orchestrator.start(name, None),
                Err(FederationError::UnknownProvider(_))
            ));
        }
        assert_eq!(orchestrator.providers(), vec![FederationProvider::Github]);
    }

    #[tokio::test]
    async fn test_first_login_creates_contractor() {
        let store = Arc::new(MemoryStore::new());
        let provider = FakeProvider::new(FederationProvider::Github, Some("Fed.User+x@example.com"));
        let (orchestrator, tokens) = orchestrator(store.clone(), provider.clone());

        let (state, pending, redirect) = begin(&orchestrator, "github", None);
        let outcome = orchestrator
            .complete("github", params("code-1", &state), Some(&pending), Some(&redirect))
            .await;

        assert_cleared(&outcome);
        let completed = outcome.result.as_ref().unwrap();
        assert!(completed.created);
        assert_eq!(completed.principal.username(), "fed.userx");
        assert!(completed.principal.has_role(Role::Contractor));

        let url = outcome.redirect.unwrap();
        assert!(url.as_str().starts_with(TARGET));
        let access = query(&url, "accessToken").unwrap();
        assert_eq!(tokens.verify_access(&access).unwrap().subject(), "fed.userx");
        assert!(tokens.verify_refresh(&query(&url, "refreshToken").unwrap()).is_ok());

        let record = store.find_by_username("fed.userx").await.unwrap().unwrap();
        assert_eq!(record.provider, FederationProvider::Github);
        assert_eq!(record.provider_id.as_deref(), Some("github-42"));
        assert!(record.last_login_at.is_some());
        assert_eq!(provider.exchanges(), 1);
    }

    #[tokio::test]
    async fn test_returning_login_reuses_record() {
        let store = Arc::new(MemoryStore::new());
        let provider = FakeProvider::new(FederationProvider::Github, Some("fed@example.com"));
        let (orchestrator, _) = orchestrator(store.clone(), provider);

        let mut ids = Vec::new();
        for expected_created in [true, false] {
            let (state, pending, redirect) = begin(&orchestrator, "github", None);
            let outcome = orchestrator
                .complete("github", params("code", &state), Some(&pending), Some(&redirect))
                .await;
            let completed = outcome.result.unwrap();
            assert_eq!(completed.created, expected_created);
            ids.push(completed.principal.id());
        }
        assert_eq!(ids[0], ids[1]);
    }

    #[tokio::test]
    async fn test_unauthorized_redirect_never_exchanges() {
        let store = Arc::new(MemoryStore::new());
        let provider = FakeProvider::new(FederationProvider::Github, Some("fed@example.com"));
        let (orchestrator, _) = orchestrator(store.clone(), provider.clone());

        let (state, pending, _) = begin(&orchestrator, "github", None);
        let evil = orchestrator.codec.redirect_cookie("https://evil.example/").value().to_string();

        let outcome = orchestrator
            .complete("github", params("code", &state), Some(&pending), Some(&evil))
            .await;

        assert!(matches!(outcome.result, Err(FederationError::UnauthorizedRedirect)));
        assert!(outcome.redirect.is_none());
        assert_cleared(&outcome);
        assert_eq!(provider.exchanges(), 0);
        assert!(store.find_by_email("fed@example.com").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unauthorized_redirect_goes_to_failure_page() {
        let provider = FakeProvider::new(FederationProvider::Github, Some("fed@example.com"));
        let tokens = Arc::new(TokenService::new(TokenSettings::new("k1", SECRET)).unwrap());
        let orchestrator = FederationOrchestrator::new(
            settings(Some("https://app.example.com/login-failed")),
            tokens,
            Arc::new(MemoryStore::new()),
        )
        .with_provider(provider);

        let (state, pending, _) = begin(&orchestrator, "github", None);
        let outcome = orchestrator
            .complete("github", params("code", &state), Some(&pending), Some("not-base64!"))
            .await;

        let url = outcome.redirect.unwrap();
        assert_eq!(url.path(), "/login-failed");
        assert_eq!(query(&url, "error").as_deref(), Some("unauthorized_redirect"));
        assert!(query(&url, "accessToken").is_none());
    }

    #[tokio::test]
    async fn test_state_mismatch_rejected() {
        let provider = FakeProvider::new(FederationProvider::Github, Some("fed@example.com"));
        let (orchestrator, _) = orchestrator(Arc::new(MemoryStore::new()), provider.clone());

        let (_, pending, redirect) = begin(&orchestrator, "github", Some(TARGET));
        let outcome = orchestrator
            .complete("github", params("code", "forged-state"), Some(&pending), Some(&redirect))
            .await;

        assert!(matches!(outcome.result, Err(FederationError::InvalidState)));
        let url = outcome.redirect.unwrap();
        assert_eq!(query(&url, "error").as_deref(), Some("invalid_state"));
        assert_eq!(provider.exchanges(), 0);

        // Missing pending cookie
        let outcome = orchestrator
            .complete("github", params("code", "x"), None, Some(&redirect))
            .await;
        assert!(matches!(outcome.result, Err(FederationError::InvalidState)));
    }

    #[tokio::test]
    async fn test_provider_error_parameter() {
        let provider = FakeProvider::new(FederationProvider::Github, Some("fed@example.com"));
        let (orchestrator, _) = orchestrator(Arc::new(MemoryStore::new()), provider.clone());

        let (state, pending, redirect) = begin(&orchestrator, "github", None);
        let outcome = orchestrator
            .complete(
                "github",
                CallbackParams {
                    state: Some(state),
                    error: Some("access_denied".to_string()),
                    ..Default::default()
                },
                Some(&pending),
                Some(&redirect),
            )
            .await;

        assert!(matches!(outcome.result, Err(FederationError::ProviderDenied(_))));
        assert_eq!(query(&outcome.redirect.unwrap(), "error").as_deref(), Some("provider_denied"));
        assert_eq!(provider.exchanges(), 0);
    }

    #[tokio::test]
    async fn test_cross_provider_collision() {
        let store = Arc::new(MemoryStore::new());
        store
            .create(
                NewCredential {
                    username: "alice".to_string(),
                    email: "alice@example.com".to_string(),
                    password_hash: String::new(),
                    roles: BTreeSet::from([Role::Developer]),
                    provider: FederationProvider::Local,
                    provider_id: None,
                    display_name: None,
                },
                None,
            )
            .await
            .unwrap();

        let provider = FakeProvider::new(FederationProvider::Google, Some("ALICE@example.com"));
        let (orchestrator, _) = orchestrator(store.clone(), provider);

        let (state, pending, redirect) = begin(&orchestrator, "google", None);
        let outcome = orchestrator
            .complete("google", params("code", &state), Some(&pending), Some(&redirect))
            .await;

        assert!(matches!(outcome.result, Err(FederationError::CrossProviderCollision)));
        let url = outcome.redirect.unwrap();
        assert_eq!(query(&url, "error").as_deref(), Some("cross_provider_collision"));

        let record = store.find_by_username("alice").await.unwrap().unwrap();
        assert_eq!(record.provider, FederationProvider::Local);
    }

    #[tokio::test]
    async fn test_profile_without_email() {
        let provider = FakeProvider::new(FederationProvider::Github, None);
        let (orchestrator, _) = orchestrator(Arc::new(MemoryStore::new()), provider);

        let (state, pending, redirect) = begin(&orchestrator, "github", None);
        let outcome = orchestrator
            .complete("github", params("code", &state), Some(&pending), Some(&redirect))
            .await;

        assert!(matches!(outcome.result, Err(FederationError::ProviderProfileIncomplete)));
    }

    #[tokio::test]
    async fn test_exchange_failure() {
        let provider = FakeProvider::new(FederationProvider::Github, Some("fed@example.com"));
        let (orchestrator, _) = orchestrator(Arc::new(MemoryStore::new()), provider);

        let (state, pending, redirect) = begin(&orchestrator, "github", None);
        let outcome = orchestrator
            .complete("github", params("bad-code", &state), Some(&pending), Some(&redirect))
            .await;

        assert!(matches!(outcome.result, Err(FederationError::Provider(_))));
        assert_eq!(query(&outcome.redirect.unwrap(), "error").as_deref(), Some("provider_error"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_provider_times_out() {
        let provider = Arc::new(FakeProvider {
            kind: FederationProvider::Github,
            profile: ProviderProfile {
                provider_id: "1".to_string(),
                email: Some("slow@example.com".to_string()),
                display_name: None,
            },
            delay: Some(Duration::from_secs(30)),
            exchanges: AtomicUsize::new(0),
        });
        let store = Arc::new(MemoryStore::new());
        let (orchestrator, _) = orchestrator(store.clone(), provider.clone());

        let (state, pending, redirect) = begin(&orchestrator, "github", None);
        let outcome = orchestrator
            .complete("github", params("code", &state), Some(&pending), Some(&redirect))
            .await;

        assert!(matches!(outcome.result, Err(FederationError::ProviderTimeout)));
        assert_eq!(query(&outcome.redirect.unwrap(), "error").as_deref(), Some("provider_timeout"));
        assert_eq!(provider.exchanges(), 1);
        assert!(store.find_by_email("slow@example.com").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_disabled_account_rejected() {
        let store = Arc::new(MemoryStore::new());
        let provider = FakeProvider::new(FederationProvider::Github, Some("fed@example.com"));
        let (orchestrator, _) = orchestrator(store.clone(), provider);

        let (state, pending, redirect) = begin(&orchestrator, "github", None);
        let first = orchestrator
            .complete("github", params("code", &state), Some(&pending), Some(&redirect))
            .await
            .result
            .unwrap();
        store.set_enabled(first.principal.id(), false).await.unwrap();

        let (state, pending, redirect) = begin(&orchestrator, "github", None);
        let outcome = orchestrator
            .complete("github", params("code", &state), Some(&pending), Some(&redirect))
            .await;
        assert!(matches!(outcome.result, Err(FederationError::AccountDisabled)));
    }

    #[tokio::test]
    async fn test_username_collision_gets_suffix() {
        let store = Arc::new(MemoryStore::new());
        for (username, email) in [("fed", "someone@example.com"), ("fed1", "other@example.com")] {
            store
                .create(
                    NewCredential {
                        username: username.to_string(),
                        email: email.to_string(),
                        password_hash: String::new(),
                        roles: BTreeSet::from([Role::Developer]),
                        provider: FederationProvider::Local,
                        provider_id: None,
                        display_name: None,
                    },
                    None,
                )
                .await
                .unwrap();
        }

        let provider = FakeProvider::new(FederationProvider::Github, Some("fed@example.com"));
        let (orchestrator, _) = orchestrator(store, provider);

        let (state, pending, redirect) = begin(&orchestrator, "github", None);
        let completed = orchestrator
            .complete("github", params("code", &state), Some(&pending), Some(&redirect))
            .await
            .result
            .unwrap();
        assert_eq!(completed.principal.username(), "fed2");
    }

    /// Reports the first username lookup as free, like a check that loses a
    /// race with a concurrent registration
    struct RacingStore {
        inner: MemoryStore,
        stale_lookups: AtomicUsize,
    }

    #[async_trait]
    impl CredentialStore for RacingStore {
        async fn find_by_id(&self, id: i64) -> StoreResult<Option<CredentialRecord>> {
            self.inner.find_by_id(id).await
        }
        async fn find_by_username(&self, username: &str) -> StoreResult<Option<CredentialRecord>> {
            let stale = self
                .stale_lookups
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if stale {
                return Ok(None);
            }
            self.inner.find_by_username(username).await
        }
        async fn find_by_email(&self, email: &str) -> StoreResult<Option<CredentialRecord>> {
            self.inner.find_by_email(email).await
        }
        async fn create(&self, credential: NewCredential, developer: Option<NewDeveloper>) -> StoreResult<CreatedCredential> {
            self.inner.create(credential, developer).await
        }
        async fn update_provider_profile(
            &self,
            id: i64,
            provider_id: &str,
            display_name: Option<&str>,
        ) -> StoreResult<CredentialRecord> {
            self.inner.update_provider_profile(id, provider_id, display_name).await
        }
        async fn touch_last_login(&self, id: i64) -> StoreResult<()> {
            self.inner.touch_last_login(id).await
        }
        async fn set_roles(&self, id: i64, roles: &BTreeSet<Role>) -> StoreResult<Option<CredentialRecord>> {
            self.inner.set_roles(id, roles).await
        }
        async fn set_enabled(&self, id: i64, enabled: bool) -> StoreResult<Option<CredentialRecord>> {
            self.inner.set_enabled(id, enabled).await
        }
    }

    #[tokio::test]
    async fn test_username_claimed_concurrently_is_retried() {
        let inner = MemoryStore::new();
        inner
            .create(
                NewCredential {
                    username: "fed".to_string(),
                    email: "someone@example.com".to_string(),
                    password_hash: String::new(),
                    roles: BTreeSet::from([Role::Contractor]),
                    provider: FederationProvider::Google,
                    provider_id: None,
                    display_name: None,
                },
                None,
            )
            .await
            .unwrap();
        let store = Arc::new(RacingStore {
            inner,
            stale_lookups: AtomicUsize::new(1),
        });

        let tokens = Arc::new(TokenService::new(TokenSettings::new("k1", SECRET)).unwrap());
        let provider = FakeProvider::new(FederationProvider::Github, Some("fed@example.com"));
        let orchestrator = FederationOrchestrator::new(settings(None), tokens, store).with_provider(provider);

        let (state, pending, redirect) = begin(&orchestrator, "github", None);
        let completed = orchestrator
            .complete("github", params("code", &state), Some(&pending), Some(&redirect))
            .await
            .result
            .unwrap();
        assert!(completed.created);
        assert_eq!(completed.principal.username(), "fed1");
    }

    #[test]
    fn test_username_base() {
        assert_eq!(username_base("Jane.Doe@example.com"), "jane.doe");
        assert_eq!(username_base("o'brien+tag@example.com"), "obrientag");
        assert_eq!(username_base("@example.com"), "user");
        assert_eq!(username_base("ünï@example.com"), "n");
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(FederationError::UnauthorizedRedirect.code(), "unauthorized_redirect");
        assert_eq!(FederationError::CrossProviderCollision.code(), "cross_provider_collision");
        assert_eq!(
            FederationError::Store(StoreError::NotFound("x".to_string())).code(),
            "server_error"
        );
    }
}

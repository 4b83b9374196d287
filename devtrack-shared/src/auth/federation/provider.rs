/// Third-party identity providers
///
/// An [`IdentityProvider`] knows how to send a browser to the provider's
/// consent page and how to turn the authorization code that comes back into a
/// [`ProviderProfile`]. [`OAuthProvider`] implements the authorization-code
/// flow over `reqwest` for Google and GitHub; tests substitute their own
/// implementations.
///
/// # Endpoints
///
/// | Provider | Authorize                                   | Token                                         | User info                                      |
/// |----------|---------------------------------------------|-----------------------------------------------|------------------------------------------------|
/// | Google   | `accounts.google.com/o/oauth2/v2/auth`      | `oauth2.googleapis.com/token`                 | `www.googleapis.com/oauth2/v3/userinfo`        |
/// | GitHub   | `github.com/login/oauth/authorize`          | `github.com/login/oauth/access_token`         | `api.github.com/user` (+ `/user/emails`)       |

use async_trait::async_trait;
use reqwest::header::ACCEPT;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::models::credential::FederationProvider;

/// Identity asserted by a provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderProfile {
    /// Provider-assigned stable id
    pub provider_id: String,

    /// Verified email, if the provider disclosed one
    pub email: Option<String>,

    pub display_name: Option<String>,
}

/// Error type for provider calls
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// Transport failure or non-success status
    #[error("Provider request failed: {0}")]
    Http(String),

    /// Provider answered with something we cannot use
    #[error("Unexpected provider response: {0}")]
    InvalidResponse(String),

    /// Provider configuration is unusable
    #[error("Invalid provider configuration: {0}")]
    Config(String),
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        ProviderError::Http(e.to_string())
    }
}

/// A federated login provider
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Which provider this is
    fn kind(&self) -> FederationProvider;

    /// Consent page URL carrying the CSRF state and our callback URI
    fn authorization_url(&self, state: &str, callback_uri: &str) -> String;

    /// Exchanges an authorization code for the user's profile
    async fn exchange(&self, code: &str, callback_uri: &str) -> Result<ProviderProfile, ProviderError>;
}

/// OAuth client registration and endpoints
#[derive(Clone)]
pub struct OAuthProviderConfig {
    pub client_id: String,
    pub client_secret: String,
    pub scopes: Vec<String>,
    pub authorize_url: String,
    pub token_url: String,
    pub user_info_url: String,

    /// Queried when the user-info response has no email (GitHub)
    pub user_emails_url: Option<String>,
}

impl std::fmt::Debug for OAuthProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthProviderConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("scopes", &self.scopes)
            .field("authorize_url", &self.authorize_url)
            .finish()
    }
}

impl OAuthProviderConfig {
    pub fn google(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            scopes: vec!["openid".into(), "email".into(), "profile".into()],
            authorize_url: "https://accounts.google.com/o/oauth2/v2/auth".to_string(),
            token_url: "https://oauth2.googleapis.com/token".to_string(),
            user_info_url: "https://www.googleapis.com/oauth2/v3/userinfo".to_string(),
            user_emails_url: None,
        }
    }

    pub fn github(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            scopes: vec!["read:user".into(), "user:email".into()],
            authorize_url: "https://github.com/login/oauth/authorize".to_string(),
            token_url: "https://github.com/login/oauth/access_token".to_string(),
            user_info_url: "https://api.github.com/user".to_string(),
            user_emails_url: Some("https://api.github.com/user/emails".to_string()),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GithubEmail {
    email: String,
    #[serde(default)]
    primary: bool,
    #[serde(default)]
    verified: bool,
}

/// Authorization-code flow over HTTPS
pub struct OAuthProvider {
    kind: FederationProvider,
    config: OAuthProviderConfig,
    authorize_url: Url,
    client: reqwest::Client,
}

impl OAuthProvider {
    /// Builds the provider with a client whose requests time out after `timeout`
    pub fn new(
        kind: FederationProvider,
        config: OAuthProviderConfig,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        if !kind.is_federated() {
            return Err(ProviderError::Config("local is not a federation provider".to_string()));
        }

        let authorize_url = Url::parse(&config.authorize_url)
            .map_err(|e| ProviderError::Config(format!("authorize_url: {}", e)))?;
        for (label, raw) in [("token_url", &config.token_url), ("user_info_url", &config.user_info_url)] {
            Url::parse(raw).map_err(|e| ProviderError::Config(format!("{}: {}", label, e)))?;
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("devtrack/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            kind,
            config,
            authorize_url,
            client,
        })
    }

    async fn fetch_access_token(&self, code: &str, callback_uri: &str) -> Result<String, ProviderError> {
        let params = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
            ("redirect_uri", callback_uri),
        ];

        let resp = self
            .client
            .post(&self.config.token_url)
            .header(ACCEPT, "application/json")
            .form(&params)
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(ProviderError::Http(format!("token endpoint returned {}", resp.status())));
        }

        let body: TokenResponse = resp
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;

        match (body.access_token, body.error) {
            (Some(token), None) => Ok(token),
            (_, Some(error)) => Err(ProviderError::InvalidResponse(format!(
                "{}: {}",
                error,
                body.error_description.unwrap_or_default()
            ))),
            (None, None) => Err(ProviderError::InvalidResponse(
                "token response has no access_token".to_string(),
            )),
        }
    }

    async fn get_json(&self, url: &str, access_token: &str) -> Result<Value, ProviderError> {
        let resp = self
            .client
            .get(url)
            .bearer_auth(access_token)
            .header(ACCEPT, "application/json")
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(ProviderError::Http(format!("{} returned {}", url, resp.status())));
        }

        resp.json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))
    }

    async fn primary_email(&self, url: &str, access_token: &str) -> Result<Option<String>, ProviderError> {
        let value = self.get_json(url, access_token).await?;
        let emails: Vec<GithubEmail> = serde_json::from_value(value)
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;
        Ok(select_primary_email(emails))
    }
}

#[async_trait]
impl IdentityProvider for OAuthProvider {
    fn kind(&self) -> FederationProvider {
        self.kind
    }

    fn authorization_url(&self, state: &str, callback_uri: &str) -> String {
        let mut url = self.authorize_url.clone();
        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &self.config.client_id)
            .append_pair("redirect_uri", callback_uri)
            .append_pair("scope", &self.config.scopes.join(" "))
            .append_pair("state", state);
        url.into()
    }

    async fn exchange(&self, code: &str, callback_uri: &str) -> Result<ProviderProfile, ProviderError> {
        let access_token = self.fetch_access_token(code, callback_uri).await?;
        let user = self.get_json(&self.config.user_info_url, &access_token).await?;
        let mut profile = parse_profile(self.kind, &user)?;

        if profile.email.is_none() {
            if let Some(ref emails_url) = self.config.user_emails_url {
                debug!(provider = self.kind.as_str(), "Profile has no email, querying emails endpoint");
                profile.email = self.primary_email(emails_url, &access_token).await?;
            }
        }

        Ok(profile)
    }
}

/// Extracts a profile from a provider's user-info document
pub fn parse_profile(kind: FederationProvider, user: &Value) -> Result<ProviderProfile, ProviderError> {
    let text = |key: &str| {
        user.get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };

    match kind {
        FederationProvider::Google => {
            let provider_id = text("sub")
                .ok_or_else(|| ProviderError::InvalidResponse("userinfo has no sub".to_string()))?;
            let verified = user
                .get("email_verified")
                .and_then(Value::as_bool)
                .unwrap_or(true);

            Ok(ProviderProfile {
                provider_id,
                email: text("email").filter(|_| verified),
                display_name: text("name"),
            })
        }
        FederationProvider::Github => {
            let provider_id = match user.get("id") {
                Some(Value::Number(n)) => n.to_string(),
                Some(Value::String(s)) if !s.is_empty() => s.clone(),
                _ => return Err(ProviderError::InvalidResponse("user has no id".to_string())),
            };

            Ok(ProviderProfile {
                provider_id,
                email: text("email"),
                display_name: text("name").or_else(|| text("login")),
            })
        }
        FederationProvider::Local => Err(ProviderError::Config(
            "local is not a federation provider".to_string(),
        )),
    }
}

fn select_primary_email(emails: Vec<GithubEmail>) -> Option<String> {
    emails
        .into_iter()
        .filter(|e| e.verified)
        .max_by_key(|e| e.primary)
        .map(|e| e.email)
}

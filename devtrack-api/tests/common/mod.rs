//! Common test utilities for integration tests
//!
//! This module provides shared infrastructure for integration tests:
//! - Router built on the in-memory store
//! - Fake identity providers (including a slow one)
//! - Request helpers returning status, headers and JSON body
//! - Cookie helpers for the federated handshake

#![allow(dead_code)]

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header, HeaderMap, Method, Request, StatusCode},
    Router,
};
use devtrack_api::{
    app::{build_router, AppState},
    config::Config,
};
use devtrack_shared::{
    auth::federation::provider::{IdentityProvider, ProviderError, ProviderProfile},
    models::credential::FederationProvider,
    store::memory::MemoryStore,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

pub const SECRET: &str = "integration-secret-key-at-least-32-bytes";
pub const TARGET: &str = "https://app.example.com/auth/done";
pub const PASSWORD: &str = "Str0ng!Pass";

/// Identity provider answering with a fixed profile
pub struct FakeProvider {
    kind: FederationProvider,
    profile: ProviderProfile,
    delay: Option<Duration>,
    exchanges: AtomicUsize,
}

impl FakeProvider {
    pub fn new(kind: FederationProvider, email: Option<&str>) -> Arc<Self> {
        Arc::new(Self {
            kind,
            profile: ProviderProfile {
                provider_id: format!("{}-1001", kind),
                email: email.map(str::to_string),
                display_name: Some("Federated User".to_string()),
            },
            delay: None,
            exchanges: AtomicUsize::new(0),
        })
    }

    /// A provider whose exchange takes `delay`
    pub fn slow(kind: FederationProvider, email: &str, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            kind,
            profile: ProviderProfile {
                provider_id: format!("{}-slow", kind),
                email: Some(email.to_string()),
                display_name: None,
            },
            delay: Some(delay),
            exchanges: AtomicUsize::new(0),
        })
    }

    pub fn exchanges(&self) -> usize {
        self.exchanges.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IdentityProvider for FakeProvider {
    fn kind(&self) -> FederationProvider {
        self.kind
    }

    fn authorization_url(&self, state: &str, callback_uri: &str) -> String {
        let mut url = url::Url::parse("https://idp.test/authorize").expect("static URL");
        url.query_pairs_mut()
            .append_pair("state", state)
            .append_pair("redirect_uri", callback_uri);
        url.into()
    }

    async fn exchange(&self, _code: &str, _callback_uri: &str) -> Result<ProviderProfile, ProviderError> {
        self.exchanges.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self.profile.clone())
    }
}

/// Parsed response
pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Value,
}

impl TestResponse {
    /// `name=value` pairs from every `Set-Cookie` header
    pub fn set_cookies(&self) -> HashMap<String, String> {
        self.headers
            .get_all(header::SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .filter_map(|v| v.split(';').next())
            .filter_map(|pair| pair.split_once('='))
            .map(|(name, value)| (name.trim().to_string(), value.trim().to_string()))
            .collect()
    }

    /// Raw `Set-Cookie` header values
    pub fn set_cookie_headers(&self) -> Vec<String> {
        self.headers
            .get_all(header::SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .map(str::to_string)
            .collect()
    }

    pub fn location(&self) -> Option<url::Url> {
        self.headers
            .get(header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| url::Url::parse(v).ok())
    }
}

/// Query parameter lookup
pub fn query(url: &url::Url, key: &str) -> Option<String> {
    url.query_pairs().find(|(k, _)| k == key).map(|(_, v)| v.into_owned())
}

/// Test context containing the router and its store
pub struct TestContext {
    pub app: Router,
    pub store: Arc<MemoryStore>,
    pub state: AppState,
}

impl TestContext {
    /// Router with the given providers and a 1 second provider timeout
    pub fn with_providers(providers: Vec<Arc<FakeProvider>>) -> Self {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("STORE_BACKEND", "memory"),
            ("JWT_SECRET", SECRET),
            ("FEDERATION_CALLBACK_BASE", "https://api.example.com"),
            ("FEDERATION_ALLOWED_REDIRECTS", TARGET),
            ("FEDERATION_PROVIDER_TIMEOUT_SECS", "1"),
            ("COOKIE_SECURE", "false"),
        ]);
        let config = Config::from_lookup(|key| vars.get(key).map(|v| v.to_string())).expect("test config");

        let store = Arc::new(MemoryStore::new());
        let providers = providers
            .into_iter()
            .map(|p| p as Arc<dyn IdentityProvider>)
            .collect();
        let state = AppState::new(config, store.clone(), providers).expect("app state");

        Self {
            app: build_router(state.clone()),
            store,
            state,
        }
    }

    pub fn new() -> Self {
        Self::with_providers(Vec::new())
    }

    pub async fn send(&self, request: Request<Body>) -> TestResponse {
        let response = self.app.clone().oneshot(request).await.expect("infallible");

        let status = response.status();
        let headers = response.headers().clone();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
        };

        TestResponse { status, headers, body }
    }

    pub async fn request(&self, method: Method, path: &str, token: Option<&str>, body: Option<Value>) -> TestResponse {
        let mut builder = Request::builder().method(method).uri(path);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }

        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string())),
            None => builder.body(Body::empty()),
        };

        self.send(request.expect("request")).await
    }

    pub async fn get(&self, path: &str, token: Option<&str>) -> TestResponse {
        self.request(Method::GET, path, token, None).await
    }

    pub async fn post(&self, path: &str, body: Value) -> TestResponse {
        self.request(Method::POST, path, None, Some(body)).await
    }

    pub async fn put(&self, path: &str, token: Option<&str>, body: Value) -> TestResponse {
        self.request(Method::PUT, path, token, Some(body)).await
    }

    /// GET with a `Cookie` header
    pub async fn get_with_cookies(&self, path: &str, cookies: &HashMap<String, String>) -> TestResponse {
        let cookie_header = cookies
            .iter()
            .map(|(name, value)| format!("{}={}", name, value))
            .collect::<Vec<_>>()
            .join("; ");

        let request = Request::builder()
            .method(Method::GET)
            .uri(path)
            .header(header::COOKIE, cookie_header)
            .body(Body::empty())
            .expect("request");

        self.send(request).await
    }

    /// Registers a user and returns the response body
    pub async fn register(&self, username: &str, email: &str, role: Option<&str>) -> Value {
        let response = self
            .post(
                "/register",
                json!({
                    "username": username,
                    "email": email,
                    "password": PASSWORD,
                    "profile": { "first_name": username, "last_name": "Test" },
                    "role": role,
                }),
            )
            .await;
        assert_eq!(response.status, StatusCode::CREATED, "register failed: {}", response.body);
        response.body
    }

    /// Logs in and returns the access token
    pub async fn login(&self, identifier: &str) -> String {
        let response = self
            .post("/login", json!({ "identifier": identifier, "password": PASSWORD }))
            .await;
        assert_eq!(response.status, StatusCode::OK, "login failed: {}", response.body);
        response.body["accessToken"]
            .as_str()
            .expect("access token")
            .to_string()
    }
}

/// Federation handshake cookies
///
/// The server keeps no state between "redirect to provider" and "provider
/// calls back". The pending authorization request travels in a cookie
/// instead, sealed as
///
/// ```text
/// base64url(json{provider, state, expiresAt}) "." hex(hmac_sha256(key, payload))
/// ```
///
/// The MAC is verified before the payload is decoded. A second cookie carries
/// the post-login redirect target; it is not signed because the callback
/// re-validates it against the allow-list anyway.
///
/// Both cookies are HTTP-only, `SameSite=Lax` and scoped to `/federated`.

use axum_extra::extract::cookie::{Cookie, SameSite};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{Duration, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use uuid::Uuid;

use crate::models::credential::FederationProvider;

type HmacSha256 = Hmac<Sha256>;

/// Cookie carrying the sealed pending authorization request
pub const PENDING_COOKIE: &str = "devtrack_pending_auth";

/// Cookie carrying the post-login redirect target
pub const REDIRECT_COOKIE: &str = "devtrack_redirect_uri";

/// Path both cookies are scoped to
pub const FEDERATION_PATH: &str = "/federated";

/// Default pending-request lifetime (3 minutes)
pub const DEFAULT_COOKIE_TTL_SECS: i64 = 180;

/// Error type for cookie decoding
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CookieError {
    #[error("Malformed cookie")]
    Malformed,

    #[error("Cookie signature mismatch")]
    BadSignature,

    #[error("Pending authorization expired")]
    Expired,

    #[error("Cookie signing key rejected")]
    InvalidKey,
}

/// An in-flight federated login
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingAuthorization {
    pub provider: FederationProvider,

    /// CSRF nonce echoed back by the provider as `state`
    pub state: String,

    /// Unix timestamp
    pub expires_at: i64,
}

/// Seals, opens and builds the handshake cookies
#[derive(Clone)]
pub struct CookieCodec {
    key: Vec<u8>,
    ttl: Duration,
    secure: bool,
}

impl std::fmt::Debug for CookieCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CookieCodec")
            .field("ttl", &self.ttl)
            .field("secure", &self.secure)
            .finish_non_exhaustive()
    }
}

impl CookieCodec {
    pub fn new(key: impl Into<Vec<u8>>, ttl: Duration, secure: bool) -> Self {
        Self {
            key: key.into(),
            ttl,
            secure,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Starts a pending request with a fresh state nonce
    pub fn begin(&self, provider: FederationProvider) -> PendingAuthorization {
        PendingAuthorization {
            provider,
            state: Uuid::new_v4().simple().to_string(),
            expires_at: (Utc::now() + self.ttl).timestamp(),
        }
    }

    fn mac(&self) -> Result<HmacSha256, CookieError> {
        <HmacSha256 as Mac>::new_from_slice(&self.key).map_err(|_| CookieError::InvalidKey)
    }

    /// Serializes and signs a pending request
    pub fn seal(&self, pending: &PendingAuthorization) -> Result<String, CookieError> {
        let json = serde_json::to_vec(pending).map_err(|_| CookieError::Malformed)?;
        let payload = URL_SAFE_NO_PAD.encode(json);

        let mut mac = self.mac()?;
        mac.update(payload.as_bytes());
        let signature = hex::encode(mac.finalize().into_bytes());

        Ok(format!("{}.{}", payload, signature))
    }

    /// Verifies the signature, then decodes and checks expiry
    pub fn open(&self, value: &str) -> Result<PendingAuthorization, CookieError> {
        let (payload, signature) = value.rsplit_once('.').ok_or(CookieError::Malformed)?;
        let signature = hex::decode(signature).map_err(|_| CookieError::Malformed)?;

        let mut mac = self.mac()?;
        mac.update(payload.as_bytes());
        mac.verify_slice(&signature)
            .map_err(|_| CookieError::BadSignature)?;

        let json = URL_SAFE_NO_PAD
            .decode(payload)
            .map_err(|_| CookieError::Malformed)?;
        let pending: PendingAuthorization =
            serde_json::from_slice(&json).map_err(|_| CookieError::Malformed)?;

        if Utc::now().timestamp() >= pending.expires_at {
            return Err(CookieError::Expired);
        }

        Ok(pending)
    }

    fn build(&self, name: &'static str, value: String, max_age: time::Duration) -> Cookie<'static> {
        Cookie::build((name, value))
            .http_only(true)
            .secure(self.secure)
            .same_site(SameSite::Lax)
            .path(FEDERATION_PATH)
            .max_age(max_age)
            .build()
    }

    fn max_age(&self) -> time::Duration {
        time::Duration::seconds(self.ttl.num_seconds())
    }

    pub fn pending_cookie(&self, sealed: String) -> Cookie<'static> {
        self.build(PENDING_COOKIE, sealed, self.max_age())
    }

    /// Redirect target cookie (base64url so any URL survives cookie syntax)
    pub fn redirect_cookie(&self, target: &str) -> Cookie<'static> {
        self.build(REDIRECT_COOKIE, URL_SAFE_NO_PAD.encode(target), self.max_age())
    }

    /// Reads a redirect cookie value back into a URL string
    pub fn decode_redirect(value: &str) -> Option<String> {
        let bytes = URL_SAFE_NO_PAD.decode(value).ok()?;
        String::from_utf8(bytes).ok()
    }

    /// Expired cookies that delete both handshake cookies
    pub fn clearing_cookies(&self) -> [Cookie<'static>; 2] {
        [
            self.build(PENDING_COOKIE, String::new(), time::Duration::ZERO),
            self.build(REDIRECT_COOKIE, String::new(), time::Duration::ZERO),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codec() -> CookieCodec {
        CookieCodec::new(
            b"cookie-secret-key-at-least-32-bytes!".to_vec(),
            Duration::seconds(DEFAULT_COOKIE_TTL_SECS),
            true,
        )
    }

    #[test]
    fn test_seal_and_open() {
        let codec = codec();
        let pending = codec.begin(FederationProvider::Github);
        let sealed = codec.seal(&pending).unwrap();

        assert_eq!(codec.open(&sealed).unwrap(), pending);
        assert_eq!(pending.state.len(), 32);
    }

    #[test]
    fn test_states_are_unique() {
        let codec = codec();
        let a = codec.begin(FederationProvider::Google);
        let b = codec.begin(FederationProvider::Google);
        assert_ne!(a.state, b.state);
    }

    #[test]
    fn test_tampered_payload_rejected() {
        let codec = codec();
        let sealed = codec.seal(&codec.begin(FederationProvider::Github)).unwrap();

        // Swap the provider inside the payload but keep the old signature
        let (_, signature) = sealed.rsplit_once('.').unwrap();
        let forged = PendingAuthorization {
            provider: FederationProvider::Google,
            state: "attacker".to_string(),
            expires_at: Utc::now().timestamp() + 600,
        };
        let forged_payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&forged).unwrap());
        let forged = format!("{}.{}", forged_payload, signature);

        assert_eq!(codec.open(&forged), Err(CookieError::BadSignature));
    }

    #[test]
    fn test_other_key_rejected() {
        let sealed = codec().seal(&codec().begin(FederationProvider::Github)).unwrap();
        let other = CookieCodec::new(
            b"a-completely-different-cookie-secret".to_vec(),
            Duration::seconds(180),
            true,
        );
        assert_eq!(other.open(&sealed), Err(CookieError::BadSignature));
    }

    #[test]
    fn test_expired_rejected() {
        let codec = CookieCodec::new(b"cookie-secret".to_vec(), Duration::zero(), false);
        let sealed = codec.seal(&codec.begin(FederationProvider::Github)).unwrap();
        assert_eq!(codec.open(&sealed), Err(CookieError::Expired));
    }

    #[test]
    fn test_malformed_rejected() {
        let codec = codec();
        assert_eq!(codec.open("no-dot-here"), Err(CookieError::Malformed));
        assert_eq!(codec.open("payload.not-hex"), Err(CookieError::Malformed));
        assert_eq!(codec.open(""), Err(CookieError::Malformed));
    }

    #[test]
    fn test_cookie_attributes() {
        let codec = codec();
        let cookie = codec.pending_cookie("value".to_string());

        assert_eq!(cookie.name(), PENDING_COOKIE);
        assert_eq!(cookie.http_only(), Some(true));
        assert_eq!(cookie.secure(), Some(true));
        assert_eq!(cookie.same_site(), Some(SameSite::Lax));
        assert_eq!(cookie.path(), Some(FEDERATION_PATH));
        assert_eq!(cookie.max_age(), Some(time::Duration::seconds(180)));

        for cleared in codec.clearing_cookies() {
            assert_eq!(cleared.value(), "");
            assert_eq!(cleared.max_age(), Some(time::Duration::ZERO));
            assert_eq!(cleared.path(), Some(FEDERATION_PATH));
        }
    }

    #[test]
    fn test_redirect_cookie_roundtrip() {
        let codec = codec();
        let cookie = codec.redirect_cookie("https://app.example/done?x=1;y");

        assert_eq!(cookie.name(), REDIRECT_COOKIE);
        assert_eq!(
            CookieCodec::decode_redirect(cookie.value()).as_deref(),
            Some("https://app.example/done?x=1;y")
        );
        assert_eq!(CookieCodec::decode_redirect("%%%"), None);
    }
}

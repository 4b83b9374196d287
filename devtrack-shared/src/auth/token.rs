/// Session token issuing and verification
///
/// Tokens are compact JWTs signed with HS256 (HMAC-SHA256). The claim set is
/// `{sub = username, iss, iat, exp, kind}`; nothing is stored server-side, so
/// the claims of any token can be re-derived from the token and the signing
/// key alone.
///
/// # Key Ring
///
/// Every token carries a `kid` header naming the key that signed it. The
/// service signs with the active key and verifies against the active key or
/// any configured previous key, which allows the secret to be rotated without
/// invalidating tokens that are still in flight.
///
/// # Security
///
/// - **Algorithm**: HS256 only; the algorithm in the header is not negotiated
/// - **Secrets**: at least 32 bytes, rejected at construction otherwise
/// - **Expiry**: zero leeway; a token whose `exp` equals the current second is expired
/// - **Ordering**: the signature is checked before any claim is inspected
///
/// # Example
///
/// ```
/// use devtrack_shared::auth::token::{TokenKind, TokenService, TokenSettings};
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let service = TokenService::new(TokenSettings::new(
///     "k1",
///     "an-example-secret-that-is-32-bytes-or-more",
/// ))?;
///
/// let pair = service.issue_pair("alice")?;
/// let claims = service.verify_access(&pair.access_token)?;
/// assert_eq!(claims.subject(), "alice");
/// assert_eq!(claims.kind(), TokenKind::Access);
/// # Ok(())
/// # }
/// ```

use chrono::{DateTime, Duration, TimeZone, Utc};
use jsonwebtoken::{
    decode, decode_header, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header,
    Validation,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Issuer claim stamped on every token
pub const ISSUER: &str = "devtrack";

/// Minimum signing secret length in bytes
pub const MIN_SECRET_BYTES: usize = 32;

/// Default access token lifetime (15 minutes)
pub const DEFAULT_ACCESS_TTL_SECS: i64 = 900;

/// Default refresh token lifetime (7 days)
pub const DEFAULT_REFRESH_TTL_SECS: i64 = 604_800;

/// Error type for token operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    /// Signature does not verify, or the signing key is unknown
    #[error("Token signature is invalid")]
    InvalidSignature,

    /// Token has expired
    #[error("Token has expired")]
    Expired,

    /// Token could not be parsed
    #[error("Malformed token: {0}")]
    Malformed(String),

    /// Token verified but is of the wrong kind for this use
    #[error("Expected {expected} token, got {actual} token")]
    WrongKind {
        expected: TokenKind,
        actual: TokenKind,
    },

    /// Configured secret is too short
    #[error("Signing key '{kid}' is {len} bytes; at least 32 bytes are required")]
    WeakSecret { kid: String, len: usize },

    /// Configured TTLs are unusable
    #[error("Invalid token lifetimes: {0}")]
    InvalidTtl(String),

    /// Failed to sign a token
    #[error("Failed to encode token: {0}")]
    Encode(String),
}

/// Token kind claim
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    /// Short-lived, presented on every request
    Access,

    /// Long-lived, exchanged for a new pair
    Refresh,
}

impl TokenKind {
    /// Gets token kind as string
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenKind::Access => "access",
            TokenKind::Refresh => "refresh",
        }
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Wire claim set
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Claims {
    sub: String,
    iss: String,
    iat: i64,
    exp: i64,
    kind: TokenKind,
}

/// Claims of a token whose signature and expiry have been checked
///
/// Only [`TokenService::verify`] constructs this type, so holding one is
/// proof that the subject came from a valid token.
#[derive(Debug, Clone)]
pub struct VerifiedClaims {
    claims: Claims,
    key_id: String,
}

impl VerifiedClaims {
    /// The username the token was issued to
    pub fn subject(&self) -> &str {
        &self.claims.sub
    }

    /// Access or refresh
    pub fn kind(&self) -> TokenKind {
        self.claims.kind
    }

    /// Id of the key that signed the token
    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    /// Issued-at time
    pub fn issued_at(&self) -> DateTime<Utc> {
        Utc.timestamp_opt(self.claims.iat, 0)
            .single()
            .unwrap_or_default()
    }

    /// Expiry time
    pub fn expires_at(&self) -> DateTime<Utc> {
        Utc.timestamp_opt(self.claims.exp, 0)
            .single()
            .unwrap_or_default()
    }
}

/// Access and refresh tokens minted together
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,

    /// Access token lifetime in seconds
    pub expires_in: i64,
}

/// A signing key identified by `kid`
#[derive(Clone)]
pub struct KeySpec {
    pub kid: String,
    pub secret: String,
}

impl KeySpec {
    pub fn new(kid: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            kid: kid.into(),
            secret: secret.into(),
        }
    }
}

impl fmt::Debug for KeySpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeySpec")
            .field("kid", &self.kid)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Token service configuration
#[derive(Debug, Clone)]
pub struct TokenSettings {
    /// Key used for signing new tokens
    pub active: KeySpec,

    /// Retired keys still accepted for verification
    pub previous: Vec<KeySpec>,

    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
}

impl TokenSettings {
    /// Settings with a single key and the default lifetimes
    pub fn new(kid: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            active: KeySpec::new(kid, secret),
            previous: Vec::new(),
            access_ttl: Duration::seconds(DEFAULT_ACCESS_TTL_SECS),
            refresh_ttl: Duration::seconds(DEFAULT_REFRESH_TTL_SECS),
        }
    }

    /// Adds a retired key accepted for verification
    pub fn with_previous_key(mut self, kid: impl Into<String>, secret: impl Into<String>) -> Self {
        self.previous.push(KeySpec::new(kid, secret));
        self
    }

    /// Overrides the access and refresh lifetimes
    pub fn with_ttls(mut self, access_ttl: Duration, refresh_ttl: Duration) -> Self {
        self.access_ttl = access_ttl;
        self.refresh_ttl = refresh_ttl;
        self
    }
}

struct KeyPair {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl KeyPair {
    fn from_key(key: &KeySpec) -> Result<Self, TokenError> {
        let len = key.secret.as_bytes().len();
        if len < MIN_SECRET_BYTES {
            return Err(TokenError::WeakSecret {
                kid: key.kid.clone(),
                len,
            });
        }

        Ok(Self {
            encoding: EncodingKey::from_secret(key.secret.as_bytes()),
            decoding: DecodingKey::from_secret(key.secret.as_bytes()),
        })
    }
}

/// Issues and verifies session tokens
///
/// Immutable after construction; share it behind an `Arc`.
pub struct TokenService {
    active_kid: String,
    keys: HashMap<String, KeyPair>,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl fmt::Debug for TokenService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut kids: Vec<&String> = self.keys.keys().collect();
        kids.sort();
        f.debug_struct("TokenService")
            .field("active_kid", &self.active_kid)
            .field("kids", &kids)
            .field("access_ttl", &self.access_ttl)
            .field("refresh_ttl", &self.refresh_ttl)
            .finish()
    }
}

impl TokenService {
    /// Builds the key ring
    ///
    /// # Errors
    ///
    /// - `WeakSecret` if any key is shorter than [`MIN_SECRET_BYTES`]
    /// - `InvalidTtl` if the access TTL is not positive, the refresh TTL
    ///   does not exceed it, or an expiry would overflow
    pub fn new(settings: TokenSettings) -> Result<Self, TokenError> {
        if settings.access_ttl <= Duration::zero() {
            return Err(TokenError::InvalidTtl(
                "access token lifetime must be positive".to_string(),
            ));
        }
        if settings.refresh_ttl <= settings.access_ttl {
            return Err(TokenError::InvalidTtl(
                "refresh token lifetime must exceed access token lifetime".to_string(),
            ));
        }
        if Utc::now().checked_add_signed(settings.refresh_ttl).is_none() {
            return Err(TokenError::InvalidTtl(
                "refresh token lifetime overflows the expiry".to_string(),
            ));
        }

        let mut keys = HashMap::new();
        for key in settings.previous.iter() {
            keys.insert(key.kid.clone(), KeyPair::from_key(key)?);
        }
        // Active key wins if a previous key reuses its kid
        keys.insert(settings.active.kid.clone(), KeyPair::from_key(&settings.active)?);

        Ok(Self {
            active_kid: settings.active.kid,
            keys,
            access_ttl: settings.access_ttl,
            refresh_ttl: settings.refresh_ttl,
        })
    }

    /// Id of the key used for signing
    pub fn active_key_id(&self) -> &str {
        &self.active_kid
    }

    pub fn access_ttl(&self) -> Duration {
        self.access_ttl
    }

    pub fn refresh_ttl(&self) -> Duration {
        self.refresh_ttl
    }

    /// Signs a token for `subject` that expires `ttl` from now
    pub fn issue(&self, subject: &str, kind: TokenKind, ttl: Duration) -> Result<String, TokenError> {
        let key = self
            .keys
            .get(&self.active_kid)
            .ok_or_else(|| TokenError::Encode("active signing key missing".to_string()))?;

        let now = Utc::now();
        let expires_at = now.checked_add_signed(ttl).ok_or_else(|| {
            TokenError::InvalidTtl(format!("lifetime of {}s overflows the expiry", ttl.num_seconds()))
        })?;
        let claims = Claims {
            sub: subject.to_string(),
            iss: ISSUER.to_string(),
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
            kind,
        };

        let mut header = Header::new(Algorithm::HS256);
        header.kid = Some(self.active_kid.clone());

        encode(&header, &claims, &key.encoding).map_err(|e| TokenError::Encode(e.to_string()))
    }

    /// Mints an access token and a refresh token for `subject`
    pub fn issue_pair(&self, subject: &str) -> Result<TokenPair, TokenError> {
        Ok(TokenPair {
            access_token: self.issue(subject, TokenKind::Access, self.access_ttl)?,
            refresh_token: self.issue(subject, TokenKind::Refresh, self.refresh_ttl)?,
            token_type: "Bearer".to_string(),
            expires_in: self.access_ttl.num_seconds(),
        })
    }

    /// Verifies signature, issuer and expiry
    ///
    /// # Errors
    ///
    /// - `InvalidSignature` for a bad signature or unknown `kid`
    /// - `Expired` once the current time reaches `exp`
    /// - `Malformed` for anything that does not parse as a token of ours
    pub fn verify(&self, token: &str) -> Result<VerifiedClaims, TokenError> {
        // Only the header is read before the signature check, to pick the key
        let header = decode_header(token).map_err(map_jwt_error)?;
        if header.alg != Algorithm::HS256 {
            return Err(TokenError::Malformed(format!(
                "unsupported algorithm {:?}",
                header.alg
            )));
        }

        let key_id = header.kid.unwrap_or_else(|| self.active_kid.clone());
        let key = self.keys.get(&key_id).ok_or(TokenError::InvalidSignature)?;

        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.validate_exp = true;
        validation.set_issuer(&[ISSUER]);
        validation.set_required_spec_claims(&["exp", "iss", "sub"]);

        let data = decode::<Claims>(token, &key.decoding, &validation).map_err(map_jwt_error)?;

        // jsonwebtoken accepts exp == now; we do not
        if Utc::now().timestamp() >= data.claims.exp {
            return Err(TokenError::Expired);
        }

        Ok(VerifiedClaims {
            claims: data.claims,
            key_id,
        })
    }

    /// Verifies a token and requires it to be an access token
    pub fn verify_access(&self, token: &str) -> Result<VerifiedClaims, TokenError> {
        self.verify_kind(token, TokenKind::Access)
    }

    /// Verifies a token and requires it to be a refresh token
    pub fn verify_refresh(&self, token: &str) -> Result<VerifiedClaims, TokenError> {
        self.verify_kind(token, TokenKind::Refresh)
    }

    fn verify_kind(&self, token: &str, expected: TokenKind) -> Result<VerifiedClaims, TokenError> {
        let claims = self.verify(token)?;
        if claims.kind() != expected {
            return Err(TokenError::WrongKind {
                expected,
                actual: claims.kind(),
            });
        }
        Ok(claims)
    }
}

fn map_jwt_error(e: jsonwebtoken::errors::Error) -> TokenError {
    match e.kind() {
        ErrorKind::InvalidSignature => TokenError::InvalidSignature,
        ErrorKind::ExpiredSignature => TokenError::Expired,
        _ => TokenError::Malformed(e.to_string()),
    }
}

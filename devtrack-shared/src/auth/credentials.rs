/// Username/password authentication and registration
///
/// [`CredentialAuthenticator`] is the only code path that compares a
/// plaintext password with a stored hash. Every way a login can fail
/// (unknown identifier, wrong password, disabled account, federated account
/// without a usable password) produces the same [`CredentialError::InvalidCredentials`],
/// and an unknown identifier still pays for one Argon2 verification so the
/// response time does not reveal which case occurred.
///
/// # Example
///
/// ```no_run
/// use devtrack_shared::auth::credentials::{CredentialAuthenticator, Registration};
/// use devtrack_shared::store::memory::MemoryStore;
/// use std::sync::Arc;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let authenticator = CredentialAuthenticator::new(Arc::new(MemoryStore::new()));
///
/// authenticator
///     .register(Registration {
///         username: "alice".to_string(),
///         email: "alice@example.com".to_string(),
///         password: "Str0ng!Pass".to_string(),
///         profile: Default::default(),
///         role: None,
///     })
///     .await?;
///
/// let principal = authenticator.authenticate("alice", "Str0ng!Pass").await?;
/// assert_eq!(principal.username(), "alice");
/// # Ok(())
/// # }
/// ```

use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{info, warn};

use super::context::Principal;
use super::password::{self, PasswordError};
use crate::models::{
    credential::{FederationProvider, NewCredential},
    developer::{Developer, DeveloperProfile, NewDeveloper},
    role::Role,
};
use crate::store::{CredentialStore, StoreError, UniqueField};

/// Error type for credential operations
#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    /// Identifier/password pair rejected; deliberately uninformative
    #[error("Invalid credentials")]
    InvalidCredentials,

    /// Username or email already registered
    #[error("{} is already registered", .field.as_str())]
    DuplicateIdentity { field: UniqueField },

    /// Registration input rejected
    #[error("{0}")]
    Invalid(String),

    /// Password failed the strength rules
    #[error("{0}")]
    WeakPassword(String),

    /// Hashing failed
    #[error("Password error: {0}")]
    Password(PasswordError),

    /// Backing store failed
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl From<PasswordError> for CredentialError {
    fn from(e: PasswordError) -> Self {
        match e {
            PasswordError::Weak(message) => CredentialError::WeakPassword(message),
            other => CredentialError::Password(other),
        }
    }
}

/// Registration input
#[derive(Debug, Clone)]
pub struct Registration {
    pub username: String,
    pub email: String,
    pub password: String,
    pub profile: DeveloperProfile,

    /// Requested role name; unknown or missing names resolve to developer
    pub role: Option<String>,
}

/// Result of a successful registration
#[derive(Debug, Clone)]
pub struct Registered {
    pub principal: Principal,

    /// Profile provisioned alongside a developer-role credential
    pub developer: Option<Developer>,
}

/// Verifies and creates local credentials
#[derive(Clone)]
pub struct CredentialAuthenticator {
    store: Arc<dyn CredentialStore>,
}

impl CredentialAuthenticator {
    pub fn new<S>(store: Arc<S>) -> Self
    where
        S: CredentialStore + 'static,
    {
        Self { store }
    }

    /// Authenticates by username or email
    ///
    /// # Errors
    ///
    /// `InvalidCredentials` for every rejected login; `Store` only when the
    /// lookup itself fails.
    pub async fn authenticate(
        &self,
        identifier: &str,
        password: &str,
    ) -> Result<Principal, CredentialError> {
        let record = self.store.find_by_identifier(identifier.trim()).await?;

        let Some(record) = record else {
            if let Some(hash) = password::dummy_hash() {
                let _ = password::verify_password(password, hash);
            }
            return Err(CredentialError::InvalidCredentials);
        };

        let verified = password::verify_password(password, &record.password_hash).unwrap_or_else(|e| {
            warn!(user_id = record.id, error = %e, "Stored password hash is unusable");
            false
        });

        if !verified || !record.enabled || record.provider.is_federated() {
            return Err(CredentialError::InvalidCredentials);
        }

        if let Err(e) = self.store.touch_last_login(record.id).await {
            warn!(user_id = record.id, error = %e, "Failed to update last login");
        }

        info!(user_id = record.id, "User authenticated");
        Ok(Principal::from_record(&record))
    }

    /// Registers a local account
    ///
    /// The credential and, for the developer role, its developer profile are
    /// written in one store transaction.
    ///
    /// # Errors
    ///
    /// - `Invalid` for a blank username or an email without `@`
    /// - `WeakPassword` when the strength rules fail
    /// - `DuplicateIdentity` when the username or email is taken
    pub async fn register(&self, registration: Registration) -> Result<Registered, CredentialError> {
        let username = registration.username.trim().to_string();
        let email = registration.email.trim().to_string();

        if username.is_empty() {
            return Err(CredentialError::Invalid("Username is required".to_string()));
        }
        if !email.contains('@') {
            return Err(CredentialError::Invalid("Email address is invalid".to_string()));
        }
        password::validate_password_strength(&registration.password)?;

        if self.store.username_exists(&username).await? {
            return Err(CredentialError::DuplicateIdentity {
                field: UniqueField::Username,
            });
        }
        if self.store.email_exists(&email).await? {
            return Err(CredentialError::DuplicateIdentity {
                field: UniqueField::Email,
            });
        }

        let role = Role::requested_or_default(registration.role.as_deref());
        let password_hash = password::hash_password(&registration.password)?;

        let developer = (role == Role::Developer)
            .then(|| NewDeveloper::from_profile(&registration.profile, &username, &email));

        let created = self
            .store
            .create(
                NewCredential {
                    username,
                    email,
                    password_hash,
                    roles: BTreeSet::from([role]),
                    provider: FederationProvider::Local,
                    provider_id: None,
                    display_name: None,
                },
                developer,
            )
            .await
            .map_err(|e| match e {
                StoreError::Duplicate(field) => CredentialError::DuplicateIdentity { field },
                other => CredentialError::Store(other),
            })?;

        info!(
            user_id = created.credential.id,
            role = role.as_str(),
            developer_id = ?created.developer.as_ref().map(|d| d.id),
            "User registered"
        );

        Ok(Registered {
            principal: Principal::from_record(&created.credential),
            developer: created.developer,
        })
    }
}

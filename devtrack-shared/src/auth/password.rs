/// Password hashing module using Argon2id
///
/// Credential records store Argon2id PHC strings. Plaintext passwords are
/// hashed here before they reach a store and are never logged.
///
/// # Parameters
///
/// - **Algorithm**: Argon2id, version 0x13
/// - **Memory**: 64 MB (65536 KB)
/// - **Iterations**: 3 passes
/// - **Parallelism**: 4 lanes
/// - **Output**: 32-byte hash, 16-byte random salt
///
/// Verification reads the parameters back out of the stored PHC string, so
/// older hashes keep verifying if these values change.
///
/// # Example
///
/// ```
/// use devtrack_shared::auth::password::{hash_password, verify_password};
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let hash = hash_password("Corr3ct!Horse")?;
///
/// assert!(verify_password("Corr3ct!Horse", &hash)?);
/// assert!(!verify_password("wrong", &hash)?);
/// # Ok(())
/// # }
/// ```

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2, Params, ParamsBuilder, Version,
};
use rand::{distributions::Alphanumeric, Rng};
use std::sync::OnceLock;

/// Minimum password length accepted at registration
pub const MIN_PASSWORD_LEN: usize = 8;

/// Plaintext behind [`dummy_hash`]; never assigned to an account
const DUMMY_PASSWORD: &str = "devtrack-timing-equalizer";

/// Error type for password operations
#[derive(Debug, thiserror::Error)]
pub enum PasswordError {
    /// Failed to hash password
    #[error("Failed to hash password: {0}")]
    Hash(String),

    /// Stored hash could not be parsed or checked
    #[error("Invalid password hash: {0}")]
    InvalidHash(String),

    /// Password does not meet the strength rules
    #[error("{0}")]
    Weak(String),
}

fn argon2_params() -> Result<Params, PasswordError> {
    ParamsBuilder::new()
        .m_cost(65536)
        .t_cost(3)
        .p_cost(4)
        .output_len(32)
        .build()
        .map_err(|e| PasswordError::Hash(format!("Invalid parameters: {}", e)))
}

/// Hashes a password, returning a PHC string
///
/// ```text
/// $argon2id$v=19$m=65536,t=3,p=4$<salt>$<hash>
/// ```
pub fn hash_password(password: &str) -> Result<String, PasswordError> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::new(argon2::Algorithm::Argon2id, Version::V0x13, argon2_params()?);

    argon2
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| PasswordError::Hash(e.to_string()))
}

/// Verifies a password against a stored hash in constant time
///
/// Returns `Ok(false)` for a wrong password and `Err` only when the stored
/// hash itself is unusable.
pub fn verify_password(password: &str, hash: &str) -> Result<bool, PasswordError> {
    let parsed_hash =
        PasswordHash::new(hash).map_err(|e| PasswordError::InvalidHash(e.to_string()))?;

    match Argon2::default().verify_password(password.as_bytes(), &parsed_hash) {
        Ok(()) => Ok(true),
        Err(argon2::password_hash::Error::Password) => Ok(false),
        Err(e) => Err(PasswordError::InvalidHash(e.to_string())),
    }
}

/// Checks the registration strength rules
///
/// At least [`MIN_PASSWORD_LEN`] characters with an upper-case letter, a
/// lower-case letter, a digit and a symbol.
///
/// ```
/// use devtrack_shared::auth::password::validate_password_strength;
///
/// assert!(validate_password_strength("MyP@ssw0rd!").is_ok());
/// assert!(validate_password_strength("Password123").is_err());
/// ```
pub fn validate_password_strength(password: &str) -> Result<(), PasswordError> {
    let rules: [(bool, &str); 5] = [
        (
            password.chars().count() >= MIN_PASSWORD_LEN,
            "Password must be at least 8 characters long",
        ),
        (
            password.chars().any(char::is_uppercase),
            "Password must contain at least one uppercase letter",
        ),
        (
            password.chars().any(char::is_lowercase),
            "Password must contain at least one lowercase letter",
        ),
        (
            password.chars().any(char::is_numeric),
            "Password must contain at least one digit",
        ),
        (
            password.chars().any(|c| !c.is_alphanumeric()),
            "Password must contain at least one special character",
        ),
    ];

    match rules.iter().find(|(ok, _)| !*ok) {
        Some((_, message)) => Err(PasswordError::Weak(message.to_string())),
        None => Ok(()),
    }
}

/// Hash of a random 48-character password nobody knows
///
/// Assigned to federated accounts, which never authenticate by password.
pub fn unusable_password_hash() -> Result<String, PasswordError> {
    let password: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(48)
        .map(char::from)
        .collect();
    hash_password(&password)
}

/// A fixed hash with production parameters, computed once per process
///
/// Verifying against it costs the same as verifying a real account, so a
/// lookup miss can be made indistinguishable from a wrong password.
pub fn dummy_hash() -> Option<&'static str> {
    static DUMMY: OnceLock<Option<String>> = OnceLock::new();
    DUMMY
        .get_or_init(|| hash_password(DUMMY_PASSWORD).ok())
        .as_deref()
}

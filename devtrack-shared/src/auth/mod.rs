/// Identity, token and authorization core
///
/// # Modules
///
/// - [`token`]: Signed access/refresh session tokens with a rotating key ring
/// - [`password`]: Argon2id password hashing and strength rules
/// - [`credentials`]: Username/password authentication and registration
/// - [`federation`]: Stateless federated login through Google and GitHub
/// - [`context`]: Per-request principal and security context extractors
/// - [`middleware`]: Global bearer-token authentication middleware
/// - [`policy`]: Permission table and resource-scoped access predicates
///
/// # Request Flow
///
/// ```text
/// request -> middleware::authenticate -> route guard (policy) -> handler
/// ```
///
/// # Example
///
/// ```no_run
/// use devtrack_shared::auth::password::{hash_password, verify_password};
/// use devtrack_shared::auth::token::{TokenService, TokenSettings};
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let hash = hash_password("user_password")?;
/// assert!(verify_password("user_password", &hash)?);
///
/// let tokens = TokenService::new(TokenSettings::new(
///     "k1",
///     "an-example-secret-that-is-32-bytes-or-more",
/// ))?;
/// let pair = tokens.issue_pair("alice")?;
/// assert_eq!(tokens.verify_access(&pair.access_token)?.subject(), "alice");
/// # Ok(())
/// # }
/// ```

pub mod context;
pub mod credentials;
pub mod federation;
pub mod middleware;
pub mod password;
pub mod policy;
pub mod token;

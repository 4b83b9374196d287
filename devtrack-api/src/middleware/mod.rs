/// Middleware modules for the API server
///
/// Authentication itself is the shared crate's global
/// `devtrack_shared::auth::middleware::authenticate` layer. This module holds
/// what is specific to the HTTP surface:
///
/// - `guard`: Per-route authorization guards backed by the policy engine

pub mod guard;

/// Database layer for DevTrack
///
/// # Modules
///
/// - `pool`: PostgreSQL connection pool with health check
/// - `migrations`: Embedded migration runner
///
/// Store implementations built on the pool live in [`crate::store::postgres`].

pub mod migrations;
pub mod pool;

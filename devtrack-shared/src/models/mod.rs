/// Domain models for DevTrack
///
/// # Models
///
/// - `role`: Fixed role enumeration
/// - `credential`: Credential records (one per identity) and federation providers
/// - `developer`: Developer profiles linked to credential records
/// - `task`: Projects, tasks and resource kinds used by ownership checks

pub mod credential;
pub mod developer;
pub mod role;
pub mod task;

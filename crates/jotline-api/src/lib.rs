//! jotline-api - Sync server for Jotline
//!
//! Serves authenticated, user-scoped pull/push endpoints over a SQLite
//! record store stamped by a strictly monotonic clock, and signs download
//! URLs for capture audio.

pub mod auth;
pub mod config;
pub mod error;
pub mod media;
pub mod rate_limit;
pub mod routes;
pub mod store;
pub mod sync;

use std::hash::{Hash, Hasher};

pub use auth::{AuthGuard, AuthenticatedUser, JwtVerifier};
pub use config::ApiConfig;
pub use error::AppError;
pub use routes::{app_router, AppState};
pub use store::ServerStore;

/// Stable, non-reversible user tag for logs.
pub(crate) fn user_fingerprint(user_id: &str) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    user_id.hash(&mut hasher);
    hasher.finish()
}

//! jotline-core - Core library for Jotline
//!
//! Offline-first capture store and the sync engine that reconciles it with
//! the Jotline API service: local SQLite store, pull/push sync with
//! server-wins conflict resolution, connectivity-driven orchestration, crash
//! recovery and lazy audio download.

pub mod config;
pub mod db;
pub mod error;
pub mod media;
pub mod models;
pub mod network;
pub mod orchestrator;
pub mod recovery;
pub mod services;
pub mod state;
pub mod sync;
pub mod util;

pub use error::{Error, Result};
pub use models::{Capture, EntityKind, RecordId, SyncRecord};
pub use services::LocalStore;
pub use state::SyncState;

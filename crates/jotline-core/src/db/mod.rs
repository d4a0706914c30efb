//! Local database layer for Jotline

mod connection;
mod cursor_repository;
mod migrations;
mod repository;

pub use connection::Database;
pub use cursor_repository::{CursorRepository, SqliteCursorRepository};
pub use repository::{RecordRepository, SqliteRecordRepository};

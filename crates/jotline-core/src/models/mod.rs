//! Data models for Jotline

mod capture;
mod cursor;
mod record;

pub use capture::{Capture, CaptureKind, CaptureState};
pub use cursor::{CursorStatus, SyncCursor};
pub use record::{EntityKind, LocalRecord, RecordChange, RecordId, RecordStatus, SyncRecord};

pub mod add;
pub mod common;
pub mod fetch;
pub mod list;
pub mod recover;
pub mod sync;
pub mod watch;

//! Driver configuration, on-disk layout and process-level locking.

pub mod constants;
pub mod layout;
pub mod lock;
pub mod options;

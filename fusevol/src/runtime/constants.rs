//! Constants for the fusevol runtime.

pub use fusevol_shared::constants::{driver, session};

pub mod envs {
    pub const FUSEVOL_HOME: &str = "FUSEVOL_HOME";
}

/// File naming patterns
pub mod filenames {
    /// Lock file name
    pub const LOCK_FILE: &str = ".lock";

    /// Database file name inside the db directory
    pub const DB_FILE: &str = "fusevol.db";

    /// Rolling log file prefix
    pub const LOG_FILE: &str = "fusevol.log";
}

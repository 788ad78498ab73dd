//! Driver-wide constants.

/// Driver identity reported through `DriverInfo`.
pub mod driver {
    /// Default driver name.
    pub const DEFAULT_NAME: &str = "fuse";

    /// Driver version string.
    pub const VERSION: &str = "1.0.0";
}

/// Session timing defaults.
pub mod session {
    /// Seconds Mount waits for a session to report ready.
    pub const DEFAULT_READY_TIMEOUT_SECS: u64 = 30;

    /// Seconds Unmount waits for the serve thread to exit after terminate.
    pub const DEFAULT_UNMOUNT_TIMEOUT_SECS: u64 = 5;

    /// FUSE subtype advertised in /proc/mounts.
    pub const FUSE_SUBTYPE: &str = "fusevol";
}

/// Backing directory creation mode (subject to the process umask).
pub const BACKING_DIR_MODE: u32 = 0o777;

//! Operations a volume driver may be asked for, and which ones this one does.

use fusevol_shared::errors::FusevolError;
use std::fmt;

/// Driver operations.
///
/// Only the lifecycle operations are implemented; every other request is
/// answered with `Unsupported`, permanently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    Create,
    Delete,
    Mount,
    Unmount,
    Inspect,
    Enumerate,
    MountedAt,
    Set,
    Catalog,
    VolService,
    Snapshot,
    Block,
    Stats,
    Quiesce,
    Credentials,
    CloudBackup,
    CloudMigrate,
    FilesystemTrim,
    FilesystemCheck,
}

impl Capability {
    pub const SUPPORTED: &'static [Capability] = &[
        Capability::Create,
        Capability::Delete,
        Capability::Mount,
        Capability::Unmount,
        Capability::Inspect,
        Capability::Enumerate,
    ];

    pub fn is_supported(self) -> bool {
        Self::SUPPORTED.contains(&self)
    }

    pub fn name(self) -> &'static str {
        match self {
            Capability::Create => "create",
            Capability::Delete => "delete",
            Capability::Mount => "mount",
            Capability::Unmount => "unmount",
            Capability::Inspect => "inspect",
            Capability::Enumerate => "enumerate",
            Capability::MountedAt => "mounted_at",
            Capability::Set => "set",
            Capability::Catalog => "catalog",
            Capability::VolService => "vol_service",
            Capability::Snapshot => "snapshot",
            Capability::Block => "block",
            Capability::Stats => "stats",
            Capability::Quiesce => "quiesce",
            Capability::Credentials => "credentials",
            Capability::CloudBackup => "cloud_backup",
            Capability::CloudMigrate => "cloud_migrate",
            Capability::FilesystemTrim => "filesystem_trim",
            Capability::FilesystemCheck => "filesystem_check",
        }
    }

    pub(crate) fn unsupported(self) -> FusevolError {
        FusevolError::Unsupported(self.name().to_string())
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle_supported() {
        assert!(Capability::Mount.is_supported());
        assert!(Capability::Delete.is_supported());
    }

    #[test]
    fn test_everything_else_unsupported() {
        for cap in [
            Capability::MountedAt,
            Capability::Snapshot,
            Capability::Catalog,
            Capability::FilesystemTrim,
        ] {
            assert!(!cap.is_supported());
            assert!(cap.unsupported().is_permanent());
        }
    }
}

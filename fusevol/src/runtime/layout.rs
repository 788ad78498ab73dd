use fusevol_shared::errors::{FusevolError, FusevolResult};
use std::path::{Path, PathBuf};

use super::constants::filenames;

/// Directory structure constants
pub mod dirs {
    /// Base directory name for fusevol data
    pub const FUSEVOL_DIR: &str = ".fusevol";

    pub const DB_DIR: &str = "db";

    /// Backing directories, one per volume
    pub const VOLUMES_DIR: &str = "volumes";

    /// Subdirectory for log files
    pub const LOGS_DIR: &str = "logs";
}

// ============================================================================
// FILESYSTEM LAYOUT (home directory)
// ============================================================================

#[derive(Clone, Debug)]
pub struct FilesystemLayout {
    home_dir: PathBuf,
}

impl FilesystemLayout {
    pub fn new(home_dir: PathBuf) -> Self {
        Self { home_dir }
    }

    pub fn home_dir(&self) -> &Path {
        &self.home_dir
    }

    pub fn db_dir(&self) -> PathBuf {
        self.home_dir.join(dirs::DB_DIR)
    }

    pub fn db_path(&self) -> PathBuf {
        self.db_dir().join(filenames::DB_FILE)
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.home_dir.join(dirs::LOGS_DIR)
    }

    /// Base path for backing directories: ~/.fusevol/volumes
    pub fn volumes_dir(&self) -> PathBuf {
        self.home_dir.join(dirs::VOLUMES_DIR)
    }

    /// Backing directory of one volume: ~/.fusevol/volumes/{id}
    pub fn volume_dir(&self, volume_id: &str) -> PathBuf {
        self.volumes_dir().join(volume_id)
    }

    /// Create the home directory tree.
    pub fn prepare(&self) -> FusevolResult<()> {
        for dir in [self.db_dir(), self.logs_dir(), self.volumes_dir()] {
            std::fs::create_dir_all(&dir).map_err(|e| {
                FusevolError::Storage(format!(
                    "Failed to create directory {}: {}",
                    dir.display(),
                    e
                ))
            })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_volume_dir_is_base_joined_with_id() {
        let layout = FilesystemLayout::new(PathBuf::from("/var/lib/fusevol"));
        assert_eq!(
            layout.volume_dir("abc"),
            PathBuf::from("/var/lib/fusevol/volumes/abc")
        );
        assert_eq!(
            layout.db_path(),
            PathBuf::from("/var/lib/fusevol/db/fusevol.db")
        );
    }

    #[test]
    fn test_prepare_creates_tree() {
        let temp_dir = TempDir::new().unwrap();
        let layout = FilesystemLayout::new(temp_dir.path().join("home"));

        layout.prepare().unwrap();

        assert!(layout.db_dir().is_dir());
        assert!(layout.logs_dir().is_dir());
        assert!(layout.volumes_dir().is_dir());
    }
}

//! Home directory lock.
//!
//! Live mount sessions belong to the process that established them, so only
//! one driver process may own a given home directory at a time. Uses flock(2)
//! on `<home>/.lock`.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use fusevol_shared::errors::{FusevolError, FusevolResult};

use super::constants::filenames;

/// Exclusive lock on a driver home directory, released on drop.
#[derive(Debug)]
pub struct RuntimeLock {
    file: File,
    path: PathBuf,
}

impl RuntimeLock {
    /// Acquire the lock without blocking.
    ///
    /// Fails with `Internal` when another driver already holds it.
    pub fn acquire(home_dir: &Path) -> FusevolResult<Self> {
        std::fs::create_dir_all(home_dir)
            .map_err(|e| FusevolError::Storage(format!("failed to create home dir: {}", e)))?;

        let lock_path = home_dir.join(filenames::LOCK_FILE);

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&lock_path)
            .map_err(|e| FusevolError::Storage(format!("failed to open lock file: {}", e)))?;

        #[cfg(unix)]
        {
            use std::os::unix::io::AsRawFd;

            let fd = file.as_raw_fd();
            let result = unsafe { libc::flock(fd, libc::LOCK_EX | libc::LOCK_NB) };

            if result != 0 {
                let err = std::io::Error::last_os_error();
                if err.kind() == std::io::ErrorKind::WouldBlock {
                    return Err(FusevolError::Internal(format!(
                        "Another fusevol driver is already using directory: {}",
                        home_dir.display()
                    )));
                }
                return Err(FusevolError::Storage(format!(
                    "failed to acquire lock: {}",
                    err
                )));
            }
        }

        tracing::debug!(lock_path = %lock_path.display(), "Acquired runtime lock");

        Ok(RuntimeLock {
            file,
            path: lock_path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RuntimeLock {
    fn drop(&mut self) {
        #[cfg(unix)]
        {
            use std::os::unix::io::AsRawFd;
            let fd = self.file.as_raw_fd();
            unsafe {
                libc::flock(fd, libc::LOCK_UN);
            }
        }

        tracing::debug!(lock_path = %self.path.display(), "Released runtime lock");
    }
}

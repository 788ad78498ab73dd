//! Configuration for fusevol.

use crate::runtime::constants::{driver, envs, session};
use crate::runtime::layout::dirs as const_dirs;
use dirs::home_dir;
use fusevol_shared::errors::{FusevolError, FusevolResult};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Options used when constructing a `VolumeDriver`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DriverOptions {
    /// Root of all driver state: database, logs and backing directories.
    pub home_dir: PathBuf,

    /// Driver name reported by `info()` and used as the default mount source.
    #[serde(default = "default_name")]
    pub name: String,

    /// Seconds Mount waits for a session to report ready.
    #[serde(default = "default_ready_timeout")]
    pub ready_timeout_secs: u64,

    /// Seconds Unmount waits for the serve thread to exit.
    #[serde(default = "default_unmount_timeout")]
    pub unmount_timeout_secs: u64,
}

fn default_name() -> String {
    driver::DEFAULT_NAME.to_string()
}

fn default_ready_timeout() -> u64 {
    session::DEFAULT_READY_TIMEOUT_SECS
}

fn default_unmount_timeout() -> u64 {
    session::DEFAULT_UNMOUNT_TIMEOUT_SECS
}

impl Default for DriverOptions {
    fn default() -> Self {
        let home_dir = std::env::var(envs::FUSEVOL_HOME)
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let mut path = home_dir().unwrap_or_else(|| PathBuf::from("."));
                path.push(const_dirs::FUSEVOL_DIR);
                path
            });

        Self {
            home_dir,
            name: default_name(),
            ready_timeout_secs: default_ready_timeout(),
            unmount_timeout_secs: default_unmount_timeout(),
        }
    }
}

impl DriverOptions {
    pub fn with_home(home_dir: impl Into<PathBuf>) -> Self {
        Self {
            home_dir: home_dir.into(),
            ..Default::default()
        }
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_secs(self.ready_timeout_secs)
    }

    pub fn unmount_timeout(&self) -> Duration {
        Duration::from_secs(self.unmount_timeout_secs)
    }

    pub(crate) fn validate(&self) -> FusevolResult<()> {
        if !self.home_dir.is_absolute() {
            return Err(FusevolError::Config(format!(
                "home_dir must be absolute path, got: {}",
                self.home_dir.display()
            )));
        }
        if self.name.trim().is_empty() {
            return Err(FusevolError::Config("driver name must not be empty".into()));
        }
        if self.ready_timeout_secs == 0 {
            return Err(FusevolError::Config(
                "ready_timeout_secs must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

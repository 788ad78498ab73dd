//! fusevol: a volume driver whose volumes are served by user-space
//! filesystem sessions.
//!
//! ```text
//! VolumeDriver ──► VolumeStore      (records, SQLite)
//!      │
//!      ├──► MountProvider           (session options + filesystem handler)
//!      └──► SessionBackend          (establish / ready / serve / terminate)
//! ```

pub mod db;
pub mod metrics;
pub mod provider;
pub mod runtime;
pub mod session;
pub mod volume;

use std::sync::OnceLock;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

pub use fusevol_shared::errors::{FusevolError, FusevolResult};
pub use metrics::DriverMetrics;
pub use provider::MountProvider;
pub use runtime::layout::FilesystemLayout;
pub use runtime::options::DriverOptions;
pub use session::{MountOption, SessionBackend};
pub use volume::{
    Capability, DriverInfo, DriverType, Volume, VolumeDriver, VolumeFilter, VolumeID,
    VolumeLocator, VolumeSource, VolumeSpec, VolumeStore,
};

#[cfg(target_os = "linux")]
pub use provider::PassthroughProvider;
#[cfg(target_os = "linux")]
pub use session::FuseBackend;

static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Write logs to a daily rolling file under `<home>/logs`.
///
/// Level comes from `RUST_LOG`, default `info`. Only the first call in a
/// process installs a subscriber.
pub fn init_logging_for(layout: &FilesystemLayout) -> FusevolResult<()> {
    install_logging(layout, false)
}

/// Like [`init_logging_for`], and also echo to stderr.
pub fn init_logging_with_stderr(layout: &FilesystemLayout) -> FusevolResult<()> {
    install_logging(layout, true)
}

fn install_logging(layout: &FilesystemLayout, stderr: bool) -> FusevolResult<()> {
    if LOG_GUARD.get().is_some() {
        return Ok(());
    }

    let logs_dir = layout.logs_dir();
    std::fs::create_dir_all(&logs_dir).map_err(|e| {
        FusevolError::Storage(format!(
            "Failed to create logs directory {}: {}",
            logs_dir.display(),
            e
        ))
    })?;

    let file_appender =
        tracing_appender::rolling::daily(&logs_dir, runtime::constants::filenames::LOG_FILE);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .map_err(|e| FusevolError::Config(format!("Invalid log filter: {}", e)))?;

    let stderr_layer = stderr.then(|| {
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
    });

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_writer(non_blocking)
                .with_target(true)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false)
                .with_ansi(false),
        )
        .with(stderr_layer)
        .try_init();

    // A concurrent caller may have won; its guard keeps its writer alive.
    let _ = LOG_GUARD.set(guard);
    Ok(())
}

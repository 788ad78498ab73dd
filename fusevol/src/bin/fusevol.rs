//! `fusevol` command-line front end.
//!
//! Each invocation opens the driver on the home directory, runs one command
//! and exits. `mount` stays in the foreground serving the volume until
//! interrupted, then unmounts it.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use fusevol_shared::errors::{FusevolError, FusevolResult};

#[derive(Parser, Debug)]
#[command(author, version, about = "FUSE-backed volume driver")]
struct Cli {
    /// Driver home directory (default: $FUSEVOL_HOME or ~/.fusevol)
    #[arg(long, global = true)]
    home: Option<PathBuf>,

    /// Seconds to wait for a mount to become ready
    #[arg(long, global = true)]
    ready_timeout: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a volume and print its ID
    Create {
        #[arg(long)]
        name: Option<String>,

        /// Label as key=value; may be repeated
        #[arg(long = "label", value_parser = parse_label)]
        labels: Vec<(String, String)>,

        #[arg(long)]
        read_only: bool,
    },
    /// List volumes, newest first
    List,
    /// Print a volume record as JSON
    Inspect { id: String },
    /// Delete an unmounted volume and its data
    Delete { id: String },
    /// Mount a volume and serve it until Ctrl-C
    Mount { id: String, path: PathBuf },
    /// Unmount a volume left mounted by a previous process
    Unmount { id: String, path: Option<PathBuf> },
    /// Print driver information
    Info,
}

fn parse_label(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected key=value, got '{}'", raw)),
    }
}

#[cfg(target_os = "linux")]
#[tokio::main]
async fn main() -> FusevolResult<()> {
    let cli = Cli::parse();
    linux::run(cli).await
}

#[cfg(not(target_os = "linux"))]
fn main() -> FusevolResult<()> {
    let _ = Cli::parse();
    Err(FusevolError::Unsupported(
        "fusevol requires Linux FUSE support".to_string(),
    ))
}

#[cfg(target_os = "linux")]
mod linux {
    use std::collections::HashMap;

    use fuse_backend_rs::passthrough::PassthroughFs;
    use fusevol::{
        DriverOptions, FilesystemLayout, FuseBackend, PassthroughProvider, VolumeDriver,
        VolumeLocator, VolumeSource, VolumeSpec,
    };

    use super::*;

    type Driver = VolumeDriver<PassthroughProvider, FuseBackend<PassthroughFs>>;

    pub(super) async fn run(cli: Cli) -> FusevolResult<()> {
        let mut options = match cli.home {
            Some(home) => DriverOptions::with_home(absolute(home)?),
            None => DriverOptions::default(),
        };
        if let Some(secs) = cli.ready_timeout {
            options.ready_timeout_secs = secs;
        }

        fusevol::init_logging_with_stderr(&FilesystemLayout::new(options.home_dir.clone()))?;

        let provider = PassthroughProvider::new(options.name.clone());
        let driver: Driver = VolumeDriver::open(options, provider, FuseBackend::new())?;

        match cli.command {
            Command::Create {
                name,
                labels,
                read_only,
            } => {
                let locator = VolumeLocator {
                    name,
                    labels: labels.into_iter().collect(),
                };
                let spec = VolumeSpec {
                    read_only,
                    ..Default::default()
                };

                let id = driver
                    .create(locator, VolumeSource::default(), spec)
                    .await?;
                println!("{}", id);
            }
            Command::List => {
                for volume in driver.list()? {
                    let mounted = volume
                        .attach_path()
                        .map(|p| p.display().to_string())
                        .unwrap_or_else(|| "-".to_string());
                    println!(
                        "{}\t{}\t{}\t{}",
                        volume.id,
                        volume.locator.name.as_deref().unwrap_or("-"),
                        volume.created_at.to_rfc3339(),
                        mounted
                    );
                }
            }
            Command::Inspect { id } => {
                let volume = driver.inspect(&id)?;
                println!("{}", serde_json::to_string_pretty(&volume)?);
            }
            Command::Delete { id } => {
                driver.delete(&id).await?;
            }
            Command::Mount { id, path } => {
                let path = absolute(path)?;
                driver.mount(&id, &path, &HashMap::new()).await?;
                tracing::info!(volume_id = %id, mount_path = %path.display(), "Serving volume, press Ctrl-C to unmount");

                serve_until_interrupted(&driver, &id).await?;
                driver.unmount(&id, &path, &HashMap::new()).await?;
            }
            Command::Unmount { id, path } => {
                let path = match path {
                    Some(path) => absolute(path)?,
                    None => driver
                        .inspect(&id)?
                        .attach_path()
                        .map(|p| p.to_path_buf())
                        .ok_or_else(|| FusevolError::NotMounted(id.clone()))?,
                };
                driver.unmount(&id, &path, &HashMap::new()).await?;
            }
            Command::Info => {
                println!("{}", serde_json::to_string_pretty(&driver.info())?);
            }
        }

        Ok(())
    }

    /// Block until Ctrl-C, or until the session goes away on its own.
    async fn serve_until_interrupted(driver: &Driver, volume_id: &str) -> FusevolResult<()> {
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(1));
        loop {
            tokio::select! {
                signal = tokio::signal::ctrl_c() => {
                    return signal.map_err(|e| {
                        FusevolError::Internal(format!("Failed to listen for Ctrl-C: {}", e))
                    });
                }
                _ = ticker.tick() => {
                    if !driver.session_alive(volume_id) {
                        let detached = driver.refresh_sessions().await?;
                        if detached.iter().any(|id| id == volume_id) {
                            return Err(FusevolError::SessionTerminate(format!(
                                "session for volume {} ended unexpectedly",
                                volume_id
                            )));
                        }
                    }
                }
            }
        }
    }

    fn absolute(path: PathBuf) -> FusevolResult<PathBuf> {
        if path.is_absolute() {
            return Ok(path);
        }
        Ok(std::env::current_dir()?.join(path))
    }
}

//! Volume lifecycle manager.
//!
//! Drives each volume through Create → Mount → Unmount → Delete using a
//! `VolumeStore` for records, a `MountProvider` for per-volume session
//! configuration and a `SessionBackend` for the mounts themselves.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use fusevol_shared::constants::{BACKING_DIR_MODE, driver};
use fusevol_shared::errors::{FusevolError, FusevolResult};
use parking_lot::Mutex;
use serde::Serialize;

use super::capability::Capability;
use super::locks::VolumeLocks;
use super::store::VolumeStore;
use super::types::{
    Volume, VolumeFilter, VolumeID, VolumeLocator, VolumeSource, VolumeSpec, generate_volume_id,
};
use crate::db::{Database, SqliteVolumeStore};
use crate::metrics::{DriverMetrics, DriverMetricsStorage};
use crate::provider::MountProvider;
use crate::runtime::layout::FilesystemLayout;
use crate::runtime::lock::RuntimeLock;
use crate::runtime::options::DriverOptions;
use crate::session::{Readiness, ServeHandle, Session, SessionBackend};

/// Kind of storage a driver exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DriverType {
    File,
}

/// Static driver identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DriverInfo {
    pub name: String,
    pub driver_type: DriverType,
    pub version: String,
}

/// Lifecycle manager for FUSE-served volumes.
///
/// # Design
///
/// - **Store is the source of truth**: every transition re-reads the record
///   and persists the result before returning.
/// - **Per-volume serialization**: Mount, Unmount and Delete hold the
///   volume's lock across their whole read-check-write sequence.
/// - **Owned sessions**: each live mount has a `ServeHandle`; its exit is
///   observable through `session_alive` and `refresh_sessions`.
pub struct VolumeDriver<P, B> {
    options: DriverOptions,
    layout: FilesystemLayout,
    store: Arc<dyn VolumeStore>,
    provider: P,
    backend: B,
    locks: VolumeLocks,
    sessions: Mutex<HashMap<VolumeID, ServeHandle>>,
    metrics: DriverMetricsStorage,
    _runtime_lock: RuntimeLock,
}

impl<P, B> std::fmt::Debug for VolumeDriver<P, B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VolumeDriver")
            .field("name", &self.options.name)
            .field("home_dir", &self.layout.home_dir())
            .finish()
    }
}

impl<P, B> VolumeDriver<P, B>
where
    P: MountProvider,
    B: SessionBackend<Handler = P::Handler>,
{
    /// Open a driver on `options.home_dir` with the SQLite volume store.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - The options are invalid (relative home, zero ready timeout)
    /// - Another driver process owns the home directory
    /// - The directory tree or database cannot be initialized
    pub fn open(options: DriverOptions, provider: P, backend: B) -> FusevolResult<Self> {
        options.validate()?;
        let layout = FilesystemLayout::new(options.home_dir.clone());
        layout.prepare()?;

        let db = Database::open(&layout.db_path()).map_err(|e| {
            FusevolError::Database(format!(
                "Failed to initialize database at {}: {}",
                layout.db_path().display(),
                e
            ))
        })?;
        let store = Arc::new(SqliteVolumeStore::new(db));

        Self::with_store(options, store, provider, backend)
    }

    /// Open a driver on top of a caller-supplied store.
    pub fn with_store(
        options: DriverOptions,
        store: Arc<dyn VolumeStore>,
        provider: P,
        backend: B,
    ) -> FusevolResult<Self> {
        options.validate()?;
        let layout = FilesystemLayout::new(options.home_dir.clone());
        layout.prepare()?;

        let runtime_lock = RuntimeLock::acquire(layout.home_dir())?;

        tracing::debug!(
            name = %options.name,
            home_dir = %layout.home_dir().display(),
            "Opened volume driver"
        );

        Ok(Self {
            options,
            layout,
            store,
            provider,
            backend,
            locks: VolumeLocks::new(),
            sessions: Mutex::new(HashMap::new()),
            metrics: DriverMetricsStorage::new(),
            _runtime_lock: runtime_lock,
        })
    }

    // ========================================================================
    // LIFECYCLE
    // ========================================================================

    /// Create a volume and its backing directory.
    ///
    /// The directory exists before any record is written. If the record
    /// cannot be written, the directory is removed again.
    pub async fn create(
        &self,
        locator: VolumeLocator,
        source: VolumeSource,
        spec: VolumeSpec,
    ) -> FusevolResult<VolumeID> {
        let volume_id = generate_volume_id();
        let dir = self.layout.volume_dir(&volume_id);

        create_backing_dir(&dir)?;

        let mut volume = Volume::new(volume_id.clone(), locator, source, spec);
        if let Err(e) = self.store.create(&volume) {
            discard_backing_dir(&volume_id, &dir);
            return Err(e);
        }

        volume.device_path = dir.clone();
        if let Err(e) = self.store.update(&volume) {
            if let Err(rollback) = self.store.delete(&volume_id) {
                tracing::warn!(volume_id = %volume_id, error = %rollback, "Failed to roll back volume record");
            }
            discard_backing_dir(&volume_id, &dir);
            return Err(e);
        }

        DriverMetricsStorage::incr(&self.metrics.volumes_created);
        tracing::info!(
            volume_id = %volume_id,
            device_path = %dir.display(),
            "Created volume"
        );
        Ok(volume_id)
    }

    /// Delete a volume: backing directory first, record last.
    ///
    /// A mounted volume must be unmounted first.
    pub async fn delete(&self, volume_id: &str) -> FusevolResult<()> {
        let guard = self.locks.acquire(volume_id).await;

        let volume = self.store.get(volume_id)?;
        if let Some(path) = volume.attach_path() {
            return Err(FusevolError::InvalidState(format!(
                "volume {} is mounted at {}; unmount it first",
                volume_id,
                path.display()
            )));
        }

        remove_backing_dir(&self.layout.volume_dir(volume_id))?;
        self.store.delete(volume_id)?;

        drop(guard);
        self.locks.forget(volume_id);

        DriverMetricsStorage::incr(&self.metrics.volumes_deleted);
        tracing::info!(volume_id = %volume_id, "Deleted volume");
        Ok(())
    }

    /// Mount a volume at `mount_path`.
    ///
    /// Returns only once the session reports ready. A session that reports
    /// a mount error, or stays silent past the ready timeout, leaves the
    /// volume unmounted. `options` are accepted for interface compatibility
    /// and not interpreted; per-volume options come from the volume spec.
    pub async fn mount(
        &self,
        volume_id: &str,
        mount_path: &Path,
        options: &HashMap<String, String>,
    ) -> FusevolResult<()> {
        let _guard = self.locks.acquire(volume_id).await;

        let mut volume = self.store.get(volume_id)?;
        if let Some(existing) = volume.attach_path() {
            return Err(FusevolError::AlreadyMounted {
                volume_id: volume_id.to_string(),
                mount_path: existing.display().to_string(),
            });
        }
        if !options.is_empty() {
            tracing::trace!(volume_id = %volume_id, ?options, "Ignoring caller mount options");
        }

        let mount_options = self.provider.mount_options(&volume.spec)?;
        let handler = self.provider.filesystem(&volume.spec, &volume.device_path)?;

        let Session {
            mountpoint,
            ready,
            server,
        } = self.backend.establish(mount_path, &mount_options)?;

        let handle = match ServeHandle::spawn(volume_id, &mountpoint, server, handler) {
            Ok(handle) => handle,
            Err(e) => {
                self.abort_session(volume_id, &mountpoint);
                return Err(e);
            }
        };

        match ready.wait(self.options.ready_timeout()).await {
            Readiness::Ready => {}
            Readiness::Failed(mount_error) => {
                DriverMetricsStorage::incr(&self.metrics.mount_failures);
                tracing::warn!(
                    volume_id = %volume_id,
                    mount_path = %mountpoint.display(),
                    error = %mount_error,
                    "Session reported mount error"
                );
                return Err(FusevolError::SessionMount(mount_error));
            }
            Readiness::TimedOut => {
                DriverMetricsStorage::incr(&self.metrics.mount_failures);
                self.abort_session(volume_id, &mountpoint);
                return Err(FusevolError::SessionTimeout(format!(
                    "{} did not become ready within {}s",
                    mountpoint.display(),
                    self.options.ready_timeout_secs
                )));
            }
        }

        volume.attach(&mountpoint);
        if let Err(e) = self.store.update(&volume) {
            DriverMetricsStorage::incr(&self.metrics.mount_failures);
            self.abort_session(volume_id, &mountpoint);
            return Err(e);
        }

        self.sessions.lock().insert(volume_id.to_string(), handle);
        DriverMetricsStorage::incr(&self.metrics.mounts);
        tracing::info!(
            volume_id = %volume_id,
            mount_path = %mountpoint.display(),
            "Mounted volume"
        );
        Ok(())
    }

    /// Unmount a volume.
    ///
    /// The recorded attach path is unmounted; `mount_path` is advisory.
    pub async fn unmount(
        &self,
        volume_id: &str,
        mount_path: &Path,
        options: &HashMap<String, String>,
    ) -> FusevolResult<()> {
        let _guard = self.locks.acquire(volume_id).await;

        let mut volume = self.store.get(volume_id)?;
        let attached = volume
            .attach_path()
            .map(Path::to_path_buf)
            .ok_or_else(|| FusevolError::NotMounted(volume_id.to_string()))?;

        if attached != mount_path {
            tracing::debug!(
                volume_id = %volume_id,
                requested = %mount_path.display(),
                recorded = %attached.display(),
                "Unmount path differs from recorded attach path, using recorded path"
            );
        }
        if !options.is_empty() {
            tracing::trace!(volume_id = %volume_id, ?options, "Ignoring caller unmount options");
        }

        if let Err(e) = self.backend.terminate(&attached) {
            // A record left by a crashed process may name a mount point
            // that no longer exists; only then is the failure ignorable.
            let owned = self.sessions.lock().contains_key(volume_id);
            if owned || self.backend.is_mounted(&attached).unwrap_or(true) {
                return Err(e);
            }
            tracing::warn!(
                volume_id = %volume_id,
                mount_path = %attached.display(),
                error = %e,
                "Nothing mounted at recorded attach path, clearing stale record"
            );
        }

        let handle = self.sessions.lock().remove(volume_id);
        if let Some(handle) = handle {
            match handle.wait_exit(self.options.unmount_timeout()).await {
                Some(exit) => {
                    tracing::debug!(volume_id = %volume_id, ?exit, "Serve loop finished");
                }
                None => {
                    tracing::warn!(
                        volume_id = %volume_id,
                        mount_path = %attached.display(),
                        "Serve loop still running after unmount"
                    );
                }
            }
        }

        volume.detach();
        self.store.update(&volume)?;

        DriverMetricsStorage::incr(&self.metrics.unmounts);
        tracing::info!(
            volume_id = %volume_id,
            mount_path = %attached.display(),
            "Unmounted volume"
        );
        Ok(())
    }

    // ========================================================================
    // SESSION SUPERVISION
    // ========================================================================

    /// Whether this process is serving `volume_id` right now.
    pub fn session_alive(&self, volume_id: &str) -> bool {
        self.sessions
            .lock()
            .get(volume_id)
            .is_some_and(ServeHandle::is_alive)
    }

    /// Detach volumes whose mount is gone.
    ///
    /// Covers serve loops of this process that ended without an Unmount, and
    /// records naming a mount point where nothing is mounted anymore (e.g.
    /// left by a process that crashed). Returns the IDs that were detached.
    pub async fn refresh_sessions(&self) -> FusevolResult<Vec<VolumeID>> {
        let dead: Vec<VolumeID> = self
            .sessions
            .lock()
            .iter()
            .filter(|(_, handle)| !handle.is_alive())
            .map(|(id, _)| id.clone())
            .collect();

        let mut detached = Vec::new();
        for volume_id in dead {
            let _guard = self.locks.acquire(&volume_id).await;

            // Re-check under the volume lock; an Unmount may have raced us.
            let handle = {
                let mut sessions = self.sessions.lock();
                match sessions.get(&volume_id) {
                    Some(handle) if !handle.is_alive() => sessions.remove(&volume_id),
                    _ => None,
                }
            };
            let Some(handle) = handle else { continue };

            tracing::warn!(
                volume_id = %volume_id,
                mount_path = %handle.mountpoint().display(),
                exit = ?handle.exit_status(),
                "Session ended without unmount"
            );
            DriverMetricsStorage::incr(&self.metrics.sessions_lost);

            if let Err(e) = self.backend.terminate(handle.mountpoint()) {
                tracing::debug!(volume_id = %volume_id, error = %e, "Stale mount cleanup skipped");
            }

            let mut volume = match self.store.get(&volume_id) {
                Ok(volume) => volume,
                Err(FusevolError::NotFound(_)) => continue,
                Err(e) => return Err(e),
            };
            if volume.attach_path() == Some(handle.mountpoint()) {
                volume.detach();
                self.store.update(&volume)?;
                detached.push(volume_id);
            }
        }

        detached.extend(self.reconcile_stale_records().await?);
        Ok(detached)
    }

    /// Detach records attached to a mount point that is not mounted and not
    /// served by this process.
    async fn reconcile_stale_records(&self) -> FusevolResult<Vec<VolumeID>> {
        let candidates: Vec<VolumeID> = self
            .store
            .list()?
            .into_iter()
            .filter(|volume| volume.is_attached())
            .map(|volume| volume.id)
            .collect();

        let mut detached = Vec::new();
        for volume_id in candidates {
            let _guard = self.locks.acquire(&volume_id).await;
            if self.sessions.lock().contains_key(&volume_id) {
                continue;
            }

            let mut volume = match self.store.get(&volume_id) {
                Ok(volume) => volume,
                Err(FusevolError::NotFound(_)) => continue,
                Err(e) => return Err(e),
            };
            let Some(path) = volume.attach_path().map(Path::to_path_buf) else {
                continue;
            };
            match self.backend.is_mounted(&path) {
                Ok(false) => {}
                Ok(true) => continue,
                Err(e) => {
                    tracing::debug!(volume_id = %volume_id, error = %e, "Cannot check mount point");
                    continue;
                }
            }

            tracing::warn!(
                volume_id = %volume_id,
                mount_path = %path.display(),
                "Nothing mounted at recorded attach path, detaching"
            );
            volume.detach();
            self.store.update(&volume)?;
            detached.push(volume_id);
        }

        Ok(detached)
    }

    /// Unmount every volume this process serves.
    ///
    /// Failures are logged and do not stop the remaining unmounts.
    pub async fn shutdown(&self) {
        let mounted: Vec<(VolumeID, PathBuf)> = self
            .sessions
            .lock()
            .iter()
            .map(|(id, handle)| (id.clone(), handle.mountpoint().to_path_buf()))
            .collect();

        for (volume_id, mount_path) in mounted {
            if let Err(e) = self.unmount(&volume_id, &mount_path, &HashMap::new()).await {
                tracing::warn!(volume_id = %volume_id, error = %e, "Failed to unmount during shutdown");
            }
        }
    }

    /// Best-effort teardown of a session that will not be recorded.
    fn abort_session(&self, volume_id: &str, mount_path: &Path) {
        if let Err(e) = self.backend.terminate(mount_path) {
            tracing::warn!(
                volume_id = %volume_id,
                mount_path = %mount_path.display(),
                error = %e,
                "Failed to tear down aborted session"
            );
        }
    }

    // ========================================================================
    // QUERIES
    // ========================================================================

    pub fn info(&self) -> DriverInfo {
        DriverInfo {
            name: self.options.name.clone(),
            driver_type: DriverType::File,
            version: driver::VERSION.to_string(),
        }
    }

    pub fn inspect(&self, volume_id: &str) -> FusevolResult<Volume> {
        self.store.get(volume_id)
    }

    pub fn list(&self) -> FusevolResult<Vec<Volume>> {
        self.store.list()
    }

    pub fn enumerate(&self, filter: &VolumeFilter) -> FusevolResult<Vec<Volume>> {
        self.store.enumerate(filter)
    }

    /// Driver status key/value pairs. Always empty.
    pub fn status(&self) -> Vec<(String, String)> {
        Vec::new()
    }

    /// `Ok` for lifecycle operations, `Unsupported` for everything else.
    pub fn check(&self, capability: Capability) -> FusevolResult<()> {
        if capability.is_supported() {
            Ok(())
        } else {
            Err(capability.unsupported())
        }
    }

    pub fn metrics(&self) -> DriverMetrics {
        DriverMetrics::new(self.metrics.clone())
    }

    pub fn layout(&self) -> &FilesystemLayout {
        &self.layout
    }
}

// ============================================================================
// Backing directory helpers
// ============================================================================

fn create_backing_dir(dir: &Path) -> FusevolResult<()> {
    let mut builder = std::fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(BACKING_DIR_MODE);
    }

    builder.create(dir).map_err(|e| {
        FusevolError::Storage(format!(
            "Failed to create backing directory {}: {}",
            dir.display(),
            e
        ))
    })
}

fn remove_backing_dir(dir: &Path) -> FusevolResult<()> {
    match std::fs::remove_dir_all(dir) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(FusevolError::Storage(format!(
            "Failed to remove backing directory {}: {}",
            dir.display(),
            e
        ))),
    }
}

fn discard_backing_dir(volume_id: &str, dir: &Path) {
    if let Err(e) = remove_backing_dir(dir) {
        tracing::warn!(volume_id = %volume_id, error = %e, "Failed to clean up orphaned backing directory");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_backing_dir_create_and_remove() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().join("volumes").join("v1");

        create_backing_dir(&dir).unwrap();
        assert!(dir.is_dir());
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            // umask may clear group/other bits, owner bits always survive.
            let mode = std::fs::metadata(&dir).unwrap().permissions().mode();
            assert_eq!(mode & 0o700, 0o700);
        }

        std::fs::write(dir.join("data"), b"x").unwrap();
        remove_backing_dir(&dir).unwrap();
        assert!(!dir.exists());

        // Already gone counts as removed.
        remove_backing_dir(&dir).unwrap();
    }

    #[test]
    fn test_backing_dir_create_under_file_fails() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("file");
        std::fs::write(&file, b"x").unwrap();

        let err = create_backing_dir(&file.join("v1")).unwrap_err();
        assert!(matches!(err, FusevolError::Storage(_)));
    }
}

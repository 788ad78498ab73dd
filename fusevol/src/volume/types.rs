//! Volume record and the metadata it carries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Opaque volume identifier (UUID v4).
pub type VolumeID = String;

/// Generate a fresh volume identifier.
pub fn generate_volume_id() -> VolumeID {
    uuid::Uuid::new_v4().to_string()
}

/// Storage representation of volumes managed by this driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FsType {
    Fuse,
}

/// Caller-supplied naming and labels.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeLocator {
    pub name: Option<String>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

impl VolumeLocator {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            labels: BTreeMap::new(),
        }
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }
}

/// Provenance of a volume.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeSource {
    /// Volume this one was cloned from.
    pub parent: Option<VolumeID>,
    /// External seed location.
    pub seed: Option<String>,
}

/// Filesystem options requested at creation, consumed by the mount provider.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeSpec {
    #[serde(default)]
    pub read_only: bool,
    /// Name shown as the mount source; defaults to the driver name.
    pub fs_name: Option<String>,
    /// Provider-specific options.
    #[serde(default)]
    pub options: BTreeMap<String, String>,
}

impl VolumeSpec {
    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }
}

/// A volume record as persisted in the store.
///
/// Everything except `attach_path` is fixed at creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Volume {
    pub id: VolumeID,
    pub locator: VolumeLocator,
    pub source: VolumeSource,
    pub spec: VolumeSpec,
    /// Backing directory on the host. Empty until stamped by Create.
    pub device_path: PathBuf,
    /// Current mount point. At most one entry.
    #[serde(default)]
    attach_path: Vec<PathBuf>,
    pub fs_type: FsType,
    pub created_at: DateTime<Utc>,
}

impl Volume {
    pub fn new(
        id: VolumeID,
        locator: VolumeLocator,
        source: VolumeSource,
        spec: VolumeSpec,
    ) -> Self {
        Self {
            id,
            locator,
            source,
            spec,
            device_path: PathBuf::new(),
            attach_path: Vec::new(),
            fs_type: FsType::Fuse,
            created_at: Utc::now(),
        }
    }

    /// The active mount point, if any.
    pub fn attach_path(&self) -> Option<&Path> {
        self.attach_path
            .first()
            .map(PathBuf::as_path)
            .filter(|p| !p.as_os_str().is_empty())
    }

    pub fn is_attached(&self) -> bool {
        self.attach_path().is_some()
    }

    /// Record `path` as the mount point, replacing nothing.
    ///
    /// Callers check `is_attached()` first; attaching twice is a logic error
    /// and leaves the existing mount point in place.
    pub(crate) fn attach(&mut self, path: &Path) -> bool {
        if self.is_attached() {
            return false;
        }
        self.attach_path = vec![path.to_path_buf()];
        true
    }

    pub(crate) fn detach(&mut self) {
        self.attach_path.clear();
    }
}

/// Filter used by `enumerate`. Empty filter matches everything.
#[derive(Debug, Clone, Default)]
pub struct VolumeFilter {
    pub name: Option<String>,
    pub labels: BTreeMap<String, String>,
}

impl VolumeFilter {
    pub fn matches(&self, volume: &Volume) -> bool {
        if let Some(name) = &self.name
            && volume.locator.name.as_deref() != Some(name.as_str())
        {
            return false;
        }
        self.labels
            .iter()
            .all(|(k, v)| volume.locator.labels.get(k) == Some(v))
    }
}

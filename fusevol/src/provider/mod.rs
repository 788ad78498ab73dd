//! Mount providers: session options and filesystem handlers per volume.

#[cfg(target_os = "linux")]
mod passthrough;

#[cfg(target_os = "linux")]
pub use passthrough::PassthroughProvider;

use crate::session::MountOption;
use crate::volume::VolumeSpec;
use fusevol_shared::errors::FusevolResult;
use std::path::Path;

/// Supplies what a session needs to expose one volume.
///
/// How the handler services reads and writes is entirely up to the provider.
pub trait MountProvider: Send + Sync {
    /// Filesystem handler type produced for a volume.
    type Handler: Send + 'static;

    /// Options used to establish the session.
    fn mount_options(&self, spec: &VolumeSpec) -> FusevolResult<Vec<MountOption>>;

    /// Handler serving the volume whose backing directory is `backing_dir`.
    fn filesystem(&self, spec: &VolumeSpec, backing_dir: &Path) -> FusevolResult<Self::Handler>;
}

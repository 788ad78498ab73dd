//! Passthrough provider: exposes the backing directory as-is.

use fuse_backend_rs::passthrough::{Config, PassthroughFs};
use fusevol_shared::constants::session::FUSE_SUBTYPE;
use fusevol_shared::errors::{FusevolError, FusevolResult};
use std::path::Path;
use std::sync::Arc;

use super::MountProvider;
use crate::session::MountOption;
use crate::volume::VolumeSpec;

/// Serves each volume's backing directory through fuse-backend-rs'
/// passthrough filesystem.
#[derive(Debug, Clone)]
pub struct PassthroughProvider {
    default_fs_name: String,
}

impl PassthroughProvider {
    /// `default_fs_name` is the mount source for specs without `fs_name`.
    pub fn new(default_fs_name: impl Into<String>) -> Self {
        Self {
            default_fs_name: default_fs_name.into(),
        }
    }
}

impl MountProvider for PassthroughProvider {
    type Handler = Arc<PassthroughFs>;

    fn mount_options(&self, spec: &VolumeSpec) -> FusevolResult<Vec<MountOption>> {
        Ok(mount_options_for(spec, &self.default_fs_name))
    }

    fn filesystem(&self, spec: &VolumeSpec, backing_dir: &Path) -> FusevolResult<Self::Handler> {
        if !backing_dir.is_dir() {
            return Err(FusevolError::Storage(format!(
                "Backing directory does not exist: {}",
                backing_dir.display()
            )));
        }
        create_passthrough_fs(backing_dir, spec.read_only)
    }
}

fn mount_options_for(spec: &VolumeSpec, default_fs_name: &str) -> Vec<MountOption> {
    let mut options = vec![
        MountOption::FsName(
            spec.fs_name
                .clone()
                .unwrap_or_else(|| default_fs_name.to_string()),
        ),
        MountOption::Subtype(FUSE_SUBTYPE.to_string()),
    ];
    if spec.read_only {
        options.push(MountOption::ReadOnly);
    }
    options.extend(
        spec.options
            .iter()
            .map(|(k, v)| MountOption::Custom(format!("{}={}", k, v))),
    );
    options
}

fn create_passthrough_fs(source: &Path, read_only: bool) -> FusevolResult<Arc<PassthroughFs>> {
    let config = Config {
        root_dir: source.to_string_lossy().to_string(),
        do_import: false,
        writeback: !read_only,
        no_open: true,
        no_opendir: true,
        killpriv_v2: false,
        ..Default::default()
    };

    let fs = PassthroughFs::new(config).map_err(|e| {
        FusevolError::Storage(format!(
            "Failed to create passthrough filesystem for {}: {}",
            source.display(),
            e
        ))
    })?;

    fs.import().map_err(|e| {
        FusevolError::Storage(format!(
            "Failed to initialize passthrough filesystem for {}: {}",
            source.display(),
            e
        ))
    })?;

    Ok(Arc::new(fs))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_default_fs_name() {
        let options = mount_options_for(&VolumeSpec::default(), "fuse");
        assert_eq!(
            options,
            vec![
                MountOption::FsName("fuse".into()),
                MountOption::Subtype("fusevol".into()),
            ]
        );
    }

    #[test]
    fn test_options_from_spec() {
        let mut spec = VolumeSpec::default().read_only();
        spec.fs_name = Some("media".into());
        spec.options.insert("max_read".into(), "131072".into());

        let options = mount_options_for(&spec, "fuse");

        assert_eq!(options[0], MountOption::FsName("media".into()));
        assert!(options.contains(&MountOption::ReadOnly));
        assert!(options.contains(&MountOption::Custom("max_read=131072".into())));
    }

    #[test]
    fn test_missing_backing_dir_rejected() {
        let provider = PassthroughProvider::new("fuse");
        let result = provider.filesystem(&VolumeSpec::default(), Path::new("/nonexistent/fusevol"));
        assert!(matches!(result, Err(FusevolError::Storage(_))));
    }
}

//! Volumes: records, persistence contract and the lifecycle manager.

mod capability;
mod driver;
mod locks;
mod store;
mod types;

pub use capability::Capability;
pub use driver::{DriverInfo, DriverType, VolumeDriver};
pub use locks::VolumeLocks;
pub use store::VolumeStore;
pub use types::{
    FsType, Volume, VolumeFilter, VolumeID, VolumeLocator, VolumeSource, VolumeSpec,
    generate_volume_id,
};

//! Volume record persistence contract.

use fusevol_shared::errors::FusevolResult;

use super::types::{Volume, VolumeFilter};

/// Durable mapping from volume ID to volume record.
///
/// Each call must be linearizable with respect to other calls on the same ID.
/// Multi-call sequences are not transactional; the driver serializes its own
/// read-modify-write steps per volume.
pub trait VolumeStore: Send + Sync {
    /// Fetch a record. `NotFound` if absent.
    fn get(&self, id: &str) -> FusevolResult<Volume>;

    /// Insert a record. `AlreadyExists` if the ID is taken.
    fn create(&self, volume: &Volume) -> FusevolResult<()>;

    /// Replace a record. `NotFound` if absent.
    fn update(&self, volume: &Volume) -> FusevolResult<()>;

    /// Remove a record. `NotFound` if absent.
    fn delete(&self, id: &str) -> FusevolResult<()>;

    /// All records, newest first.
    fn list(&self) -> FusevolResult<Vec<Volume>>;

    /// Records matching `filter`, newest first.
    fn enumerate(&self, filter: &VolumeFilter) -> FusevolResult<Vec<Volume>> {
        Ok(self
            .list()?
            .into_iter()
            .filter(|v| filter.matches(v))
            .collect())
    }
}

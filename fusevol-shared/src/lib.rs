//! fusevol shared - types common to the driver library and its tooling.
//!
//! This crate contains the error taxonomy and driver-wide constants
//! used by the `fusevol` driver and its CLI.

pub mod constants;
pub mod errors;

pub use errors::{FusevolError, FusevolResult};

//! fibertrack-io: Loaders and writers for fibertrack.
//!
//! This crate reads NIfTI volumes and masks, FSL gradient tables and JSON
//! forest models, and writes tracked bundles as VTK, CSV or binary files.
//!

mod error;
pub mod gradients;
pub mod model;
pub mod volume;
mod writer;

pub use error::{Error, Result};
pub use gradients::load_gradients;
pub use model::{load_forest, save_forest};
pub use volume::{load_mask, load_volume};
pub use writer::{write_bundle, FiberFormat, FiberWriter, BINARY_MAGIC};

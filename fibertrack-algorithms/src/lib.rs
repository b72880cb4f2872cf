//! fibertrack-algorithms: Direction estimation and streamline propagation.
//!
//! This crate provides the tracking handlers:
//! - **Tensor** - principal eigenvector with optional tensor deflection
//! - **Peaks** - best-aligned peak of a multi-peak orientation image
//! - **RandomForest** - voxel classifier over diffusion-signal features
//!
//! plus the neighborhood sampler, the propagation state machine, seeding,
//! Douglas-Peucker compression and the parallel tracking pipeline.
//!
#![warn(missing_docs)]

mod axial;
pub mod compress;
mod forest;
mod peaks;
mod processing;
pub mod propagator;
pub mod sampler;
pub mod seeding;
pub mod sh;
mod tensor;

pub use compress::{compress_bundle, douglas_peucker};
pub use forest::{ForestConfig, ForestHandler};
pub use peaks::{PeaksConfig, PeaksHandler};
pub use processing::{
    track_streamlines, track_streamlines_with_cancel, Handler, TrackingAlgorithm, TrackingOutput,
};
pub use propagator::{Propagator, TrackingMasks};
pub use sampler::NeighborhoodSampler;
pub use tensor::{fractional_anisotropy, principal_direction, TensorConfig, TensorHandler};

// Re-export core tracking types
pub use fibertrack_core::config::{TrackingConfig, TrackingStatistics};
pub use fibertrack_core::handler::{HandlerOptions, Proposal, TrackingHandler};

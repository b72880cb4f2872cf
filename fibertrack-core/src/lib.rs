//! fibertrack-core: Core traits and types for streamline tractography.
//!
//! This crate provides the foundational abstractions for volume sampling,
//! direction estimation, streamline propagation state and fiber bundles.
//!

pub mod bundle;
pub mod config;
pub mod error;
pub mod forest;
pub mod geometry;
pub mod gradients;
pub mod handler;
pub mod streamline;
pub mod volume;

pub use bundle::FiberBundle;
pub use config::{TerminationCounts, TrackingConfig, TrackingStatistics};
pub use error::{Error, Result};
pub use forest::{DecisionTree, FeatureLayout, ForestModel, TreeNode};
pub use geometry::{Direction, Flip, VolumeGeometry};
pub use gradients::GradientTable;
pub use handler::{align_to_previous, HandlerOptions, Proposal, TrackingHandler};
pub use streamline::{PropagationState, Streamline, StreamlinePoint, Termination};
pub use volume::{Interpolation, Mask, TissueType, Volume};

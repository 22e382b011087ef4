//! DropCraft Normalizer
//!
//! Conservation-preserving smoothing of raw contribution weights: every
//! recipient is raised to a floor, and the cost of that raise is
//! taken proportionally from the holders well above it.

mod normalize;
mod stats;

pub use normalize::{normalize, normalize_with_report, NormalizeError, NormalizeParams, NormalizeReport};
pub use stats::DistributionStats;

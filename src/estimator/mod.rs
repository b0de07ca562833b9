//! Volume estimator orchestrating the five-stage pipeline.
//!
//! Overview
//! - Validates the structured request at ingress; malformed captures never
//!   start partial work.
//! - Canonicalizes the reference bowl (PCA alignment, opening
//!   disambiguation, rim measurement).
//! - Back-projects valid depth pixels into a millimetre point cloud and
//!   optionally voxel-downsamples it.
//! - Solves the isotropic scale from the rim-diameter ratio, then fits
//!   rotation and translation with ICP.
//! - Ray-casts every food pixel against the fitted mesh through an SAH
//!   BVH and integrates the per-pixel depth differences.
//!
//! Modules
//! - `options` – aggregated parameter struct.
//! - `request` – the borrowed capture request plus ingress validation.
//! - `pipeline` – the main [`VolumeEstimator`] implementation.

pub mod options;
mod pipeline;
pub mod request;

pub use options::VolumeParams;
pub use pipeline::VolumeEstimator;
pub use request::VolumeRequest;

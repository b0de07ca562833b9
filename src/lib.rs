#![doc = include_str!("../README.md")]

// Public modules (stable-ish surface)
pub mod camera;
pub mod cancel;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod estimator;
pub mod mesh;
pub mod types;

// Stage-level modules – public for tools and advanced callers, but the
// estimator is the supported entry point.
pub mod backproject;
pub mod cloud;
pub mod fit;
pub mod raycast;
pub mod volume;

// --- High-level re-exports -------------------------------------------------

// Main entry points: estimator + results.
pub use crate::cancel::CancelToken;
pub use crate::error::{QualityWarning, VolumeError};
pub use crate::estimator::{VolumeEstimator, VolumeParams, VolumeRequest};
pub use crate::types::VolumeResult;

// High-level diagnostics returned by the estimator.
pub use crate::diagnostics::{EstimationReport, PipelineTrace};

// --- Prelude ---------------------------------------------------------------

/// Small prelude for quick experiments.
///
/// ```no_run
/// use food_volume::prelude::*;
/// use nalgebra::Point3;
///
/// # fn main() -> Result<(), VolumeError> {
/// let (w, h) = (64usize, 64usize);
/// let depth = vec![2000u16; w * h];
/// let mask = vec![true; w * h];
/// let bowl = TriangleMesh::new(
///     vec![
///         Point3::new(0.0, 0.0, 0.0),
///         Point3::new(30.0, 0.0, 20.0),
///         Point3::new(-30.0, 0.0, 20.0),
///         Point3::new(0.0, 30.0, 20.0),
///     ],
///     vec![[0, 1, 3], [0, 3, 2], [0, 2, 1], [1, 2, 3]],
/// );
///
/// let request = VolumeRequest {
///     depth: DepthImage { w, h, stride: w, data: &depth },
///     rgb: None,
///     food_mask: FoodMask { w, h, stride: w, data: &mask },
///     intrinsics: Intrinsics { fx: 64.0, fy: 64.0, cx: 32.0, cy: 32.0, width: w, height: h },
///     depth_scale_m_per_unit: 1e-4,
///     bowl_mesh: &bowl,
///     bowl_rim_diameter_mm: 60.0,
///     initial_pose: None,
/// };
/// let report = VolumeEstimator::new(VolumeParams::default()).estimate(&request)?;
/// println!("{:.1} ml", report.result.volume_ml);
/// # Ok(())
/// # }
/// ```
pub mod prelude {
    pub use crate::camera::Intrinsics;
    pub use crate::mesh::TriangleMesh;
    pub use crate::types::{DepthImage, FoodMask, VolumeResult};
    pub use crate::{CancelToken, VolumeError, VolumeEstimator, VolumeParams, VolumeRequest};
}

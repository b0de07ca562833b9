//! Diagnostics data model returned alongside the volume.
//!
//! [`EstimationReport`] bundles the compact [`VolumeResult`] with the
//! fitted transform, accumulated quality warnings and a detailed
//! [`PipelineTrace`] describing every stage the pipeline executed.

pub mod timing;

pub use timing::{StageTiming, TimingBreakdown};

use nalgebra::Matrix4;
use serde::Serialize;

use crate::error::QualityWarning;
use crate::types::VolumeResult;

/// Result produced by [`VolumeEstimator::estimate`](crate::VolumeEstimator).
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EstimationReport {
    pub result: VolumeResult,
    /// Canonical-mesh to camera-frame transform, `x_cam = s R x + t`.
    pub transform: Matrix4<f64>,
    pub warnings: Vec<QualityWarning>,
    pub trace: PipelineTrace,
}

impl EstimationReport {
    /// The fitted transform as nested rows, for callers persisting it as
    /// an unadorned row-major 4x4.
    pub fn transform_rows(&self) -> [[f64; 4]; 4] {
        let mut rows = [[0.0f64; 4]; 4];
        for (i, row) in rows.iter_mut().enumerate() {
            for (j, cell) in row.iter_mut().enumerate() {
                *cell = self.transform[(i, j)];
            }
        }
        rows
    }
}

/// End-to-end trace of one estimation run.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineTrace {
    pub input: InputDescriptor,
    pub timings: TimingBreakdown,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mesh: Option<MeshPrepStage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backprojection: Option<BackprojectStage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fit: Option<FitStage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raycast: Option<RaycastStage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub integration: Option<IntegrationStage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub food_points: Option<FoodPointsStage>,
}

#[derive(Clone, Copy, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InputDescriptor {
    pub width: usize,
    pub height: usize,
    pub food_pixels: usize,
    pub mesh_vertices: usize,
    pub mesh_triangles: usize,
}

/// Canonicalization of the reference bowl.
#[derive(Clone, Copy, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MeshPrepStage {
    pub elapsed_ms: f64,
    pub degenerate_triangles: usize,
    pub rim_vertices: usize,
    /// Rim diameter measured on the reference mesh; compare against the
    /// supplied true diameter to audit the model scale.
    pub rim_diameter_model_mm: f64,
    pub bowl_height_mm: f64,
    pub flipped: bool,
}

#[derive(Clone, Copy, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackprojectStage {
    pub elapsed_ms: f64,
    pub points: usize,
    pub dropped_zero_depth: usize,
    pub dropped_out_of_range: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub downsampled_points: Option<usize>,
}

#[derive(Clone, Copy, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FitStage {
    pub elapsed_ms: f64,
    pub scale: f64,
    pub iterations: usize,
    pub fitness: f64,
    pub rmse_mm: f64,
    pub converged: bool,
    pub source_points: usize,
    pub scene_points: usize,
    /// Largest xy diameter of the scene cloud, for scale inspection.
    pub scene_diameter_mm: f64,
    pub scale_accuracy_percent: f64,
}

#[derive(Clone, Copy, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RaycastStage {
    pub elapsed_ms: f64,
    pub rays: usize,
    pub hits: usize,
    pub hit_ratio: f64,
    pub bvh_nodes: usize,
    pub triangles: usize,
}

#[derive(Clone, Copy, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrationStage {
    pub elapsed_ms: f64,
    pub valid_pixels: usize,
    pub skipped_invalid_depth: usize,
    pub skipped_no_hit: usize,
    pub skipped_non_positive: usize,
}

/// Food points classified inside the fitted bowl, with the voxel-occupancy
/// cross-check volume.
#[derive(Clone, Copy, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FoodPointsStage {
    pub points: usize,
    pub height_threshold_mm: f64,
    pub voxel_volume_ml: f64,
    pub voxel_mm: f64,
}

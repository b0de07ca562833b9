//! Estimation pipeline driving the five stages end-to-end.
//!
//! The [`VolumeEstimator`] exposes a simple API: hand over a capture
//! request and receive the volume with detailed diagnostics. Internally it
//! canonicalizes the reference mesh, back-projects the depth image, fits
//! the scaled bowl with ICP, ray-casts the food pixels against the fitted
//! mesh through a BVH and integrates the per-pixel depth differences.
//!
//! Typical usage:
//! ```no_run
//! use food_volume::{VolumeEstimator, VolumeParams, VolumeRequest};
//!
//! # fn example(request: VolumeRequest<'_>) -> Result<(), food_volume::VolumeError> {
//! let estimator = VolumeEstimator::new(VolumeParams::default());
//! let report = estimator.estimate(&request)?;
//! println!("{:.1} ml ({} warnings)", report.result.volume_ml, report.warnings.len());
//! # Ok(())
//! # }
//! ```

use std::time::Instant;

use log::{debug, warn};
use nalgebra::Point3;

use super::options::VolumeParams;
use super::request::VolumeRequest;
use crate::backproject;
use crate::cancel::CancelToken;
use crate::cloud;
use crate::diagnostics::{
    BackprojectStage, EstimationReport, FitStage, FoodPointsStage, InputDescriptor,
    IntegrationStage, MeshPrepStage, PipelineTrace, RaycastStage, TimingBreakdown,
};
use crate::error::{QualityWarning, VolumeError};
use crate::fit::{self, FitOutcome};
use crate::mesh::{canonicalize, CanonicalBowlMesh};
use crate::raycast::{self, Bvh, RaycastResult};
use crate::types::VolumeResult;
use crate::volume;

/// Fitness below this level is flagged as a warning.
const FITNESS_WARN: f64 = 0.5;
/// RMSE above this level (millimetres) is flagged as a warning.
const RMSE_WARN_MM: f64 = 10.0;

struct MeshPrepComputation {
    canonical: CanonicalBowlMesh,
    stage: MeshPrepStage,
}

struct BackprojectComputation {
    cloud: Vec<Point3<f64>>,
    stage: BackprojectStage,
}

struct FitComputation {
    outcome: FitOutcome,
    stage: FitStage,
}

struct RaycastComputation {
    rays: RaycastResult,
    stage: RaycastStage,
}

/// Volume estimator orchestrating mesh canonicalization, back-projection,
/// scaled-rigid fitting, ray casting and depth-difference integration.
pub struct VolumeEstimator {
    params: VolumeParams,
}

impl VolumeEstimator {
    pub fn new(params: VolumeParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &VolumeParams {
        &self.params
    }

    /// Runs the pipeline without external cancellation.
    pub fn estimate(&self, request: &VolumeRequest<'_>) -> Result<EstimationReport, VolumeError> {
        self.estimate_with_cancel(request, &CancelToken::new())
    }

    /// Runs the pipeline, polling `cancel` between stages and work chunks.
    pub fn estimate_with_cancel(
        &self,
        request: &VolumeRequest<'_>,
        cancel: &CancelToken,
    ) -> Result<EstimationReport, VolumeError> {
        let mesh_summary = request.validate()?;
        cancel.check()?;

        let total_start = Instant::now();
        let food_pixels = request.food_mask.pixel_indices().len();
        debug!(
            "VolumeEstimator::estimate start w={} h={} food_pixels={} mesh_tris={}",
            request.depth.w, request.depth.h, food_pixels, mesh_summary.triangles
        );

        let mut warnings: Vec<QualityWarning> = Vec::new();

        let prep = self.run_mesh_prep(request, mesh_summary.degenerate_triangles)?;
        cancel.check()?;

        let backprojection = self.run_backproject(request);
        if backprojection.cloud.len() < fit::MIN_SCENE_POINTS {
            return Err(VolumeError::InsufficientData {
                valid: backprojection.cloud.len(),
                required: fit::MIN_SCENE_POINTS,
            });
        }
        cancel.check()?;

        let fitted = self.run_fit(request, &prep.canonical, &backprojection.cloud, cancel)?;
        if !fitted.outcome.converged {
            warn!(
                "VolumeEstimator::estimate fit did not converge: fitness={:.3} after {} iterations",
                fitted.outcome.fitness, fitted.outcome.iterations
            );
            warnings.push(QualityWarning::FitDidNotConverge {
                fitness: fitted.outcome.fitness,
                iterations: fitted.outcome.iterations,
            });
        }
        if fitted.outcome.fitness < FITNESS_WARN {
            warnings.push(QualityWarning::LowFitness {
                fitness: fitted.outcome.fitness,
            });
        }
        if fitted.outcome.rmse_mm > RMSE_WARN_MM {
            warnings.push(QualityWarning::HighRmse {
                rmse_mm: fitted.outcome.rmse_mm,
            });
        }
        cancel.check()?;

        let fitted_mesh = prep.canonical.mesh.scaled_transformed(
            fitted.outcome.scale,
            &fitted.outcome.rotation,
            &fitted.outcome.translation,
        );
        let raycast = self.run_raycast(request, &fitted_mesh, cancel)?;
        if raycast.rays.len() > 0 && raycast.rays.hit_count == 0 {
            warn!(
                "VolumeEstimator::estimate no food ray hit the fitted mesh ({} rays)",
                raycast.rays.len()
            );
            warnings.push(QualityWarning::RaycastDegenerate {
                rays: raycast.rays.len(),
            });
        }
        cancel.check()?;

        let integration_start = Instant::now();
        let stats = volume::integrate_depth_difference(
            &request.depth,
            &request.intrinsics,
            request.depth_scale_m_per_unit,
            &self.params.depth,
            &raycast.rays,
            cancel,
        )?;
        let integration_ms = integration_start.elapsed().as_secs_f64() * 1000.0;

        let food_points_stage = self.run_food_points(
            &backprojection.cloud,
            &prep.canonical,
            &fitted.outcome,
        );

        let total_ms = total_start.elapsed().as_secs_f64() * 1000.0;
        debug!(
            "VolumeEstimator::estimate done volume={:.2} ml valid={}/{} fitness={:.3} latency_ms={:.1}",
            stats.volume_ml, stats.n_valid_pixels, stats.n_food_pixels, fitted.outcome.fitness, total_ms
        );

        let mut timings = TimingBreakdown::with_total(total_ms);
        timings.push("mesh_prep", prep.stage.elapsed_ms);
        timings.push("backproject", backprojection.stage.elapsed_ms);
        timings.push("fit", fitted.stage.elapsed_ms);
        timings.push("raycast", raycast.stage.elapsed_ms);
        timings.push("integrate", integration_ms);

        let result = VolumeResult {
            volume_ml: stats.volume_ml,
            n_food_pixels: stats.n_food_pixels,
            n_valid_pixels: stats.n_valid_pixels,
            valid_ratio: stats.valid_ratio,
            mean_height_mm: stats.mean_height_mm,
            max_height_mm: stats.max_height_mm,
            std_height_mm: stats.std_height_mm,
            fitness: fitted.outcome.fitness,
            rmse_mm: fitted.outcome.rmse_mm,
            converged: fitted.outcome.converged,
        };

        let trace = PipelineTrace {
            input: InputDescriptor {
                width: request.depth.w,
                height: request.depth.h,
                food_pixels,
                mesh_vertices: mesh_summary.vertices,
                mesh_triangles: mesh_summary.triangles,
            },
            timings,
            mesh: Some(prep.stage),
            backprojection: Some(backprojection.stage),
            fit: Some(fitted.stage),
            raycast: Some(raycast.stage),
            integration: Some(IntegrationStage {
                elapsed_ms: integration_ms,
                valid_pixels: stats.n_valid_pixels,
                skipped_invalid_depth: stats.skipped_invalid_depth,
                skipped_no_hit: stats.skipped_no_hit,
                skipped_non_positive: stats.skipped_non_positive,
            }),
            food_points: food_points_stage,
        };

        Ok(EstimationReport {
            result,
            transform: fitted.outcome.transform_matrix(),
            warnings,
            trace,
        })
    }

    fn run_mesh_prep(
        &self,
        request: &VolumeRequest<'_>,
        degenerate_triangles: usize,
    ) -> Result<MeshPrepComputation, VolumeError> {
        let start = Instant::now();
        let canonical = canonicalize(request.bowl_mesh, &self.params.mesh)
            .map_err(VolumeError::InvalidInput)?;
        let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
        debug!(
            "VolumeEstimator::mesh_prep rim_model={:.2} mm height={:.2} mm flipped={}",
            canonical.rim_diameter_mm,
            canonical.height_mm(),
            canonical.flipped
        );
        let stage = MeshPrepStage {
            elapsed_ms,
            degenerate_triangles,
            rim_vertices: canonical.rim_indices.len(),
            rim_diameter_model_mm: canonical.rim_diameter_mm,
            bowl_height_mm: canonical.height_mm(),
            flipped: canonical.flipped,
        };
        Ok(MeshPrepComputation { canonical, stage })
    }

    fn run_backproject(&self, request: &VolumeRequest<'_>) -> BackprojectComputation {
        let start = Instant::now();
        let (cloud, summary) = backproject::backproject(
            &request.depth,
            &request.intrinsics,
            request.depth_scale_m_per_unit,
            &self.params.depth,
        );
        let mut cloud = cloud;
        let mut downsampled_points = None;
        if let Some(leaf) = self.params.downsample_voxel_mm {
            if leaf > 0.0 {
                cloud = cloud::voxel_downsample(&cloud, leaf);
                downsampled_points = Some(cloud.len());
            }
        }
        let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
        debug!(
            "VolumeEstimator::backproject points={} (downsampled {:?}) dropped zero={} range={}",
            summary.points, downsampled_points, summary.dropped_zero_depth, summary.dropped_out_of_range
        );
        BackprojectComputation {
            cloud,
            stage: BackprojectStage {
                elapsed_ms,
                points: summary.points,
                dropped_zero_depth: summary.dropped_zero_depth,
                dropped_out_of_range: summary.dropped_out_of_range,
                downsampled_points,
            },
        }
    }

    fn run_fit(
        &self,
        request: &VolumeRequest<'_>,
        canonical: &CanonicalBowlMesh,
        scene: &[Point3<f64>],
        cancel: &CancelToken,
    ) -> Result<FitComputation, VolumeError> {
        let start = Instant::now();
        let outcome = fit::fit_bowl(
            canonical,
            scene,
            request.bowl_rim_diameter_mm,
            request.initial_pose.as_ref(),
            &self.params.icp,
            cancel,
        )?;
        let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
        let stage = FitStage {
            elapsed_ms,
            scale: outcome.scale,
            iterations: outcome.iterations,
            fitness: outcome.fitness,
            rmse_mm: outcome.rmse_mm,
            converged: outcome.converged,
            source_points: outcome.source_points,
            scene_points: outcome.scene_points,
            scene_diameter_mm: outcome.scene_diameter_mm,
            scale_accuracy_percent: outcome.scale_accuracy_percent,
        };
        Ok(FitComputation { outcome, stage })
    }

    fn run_raycast(
        &self,
        request: &VolumeRequest<'_>,
        fitted_mesh: &crate::mesh::TriangleMesh,
        cancel: &CancelToken,
    ) -> Result<RaycastComputation, VolumeError> {
        let start = Instant::now();
        let bvh = Bvh::build(fitted_mesh);
        let rays = raycast::raycast_food_pixels(
            &bvh,
            &request.food_mask,
            &request.intrinsics,
            &self.params.raycast,
            cancel,
        )?;
        let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
        debug!(
            "VolumeEstimator::raycast rays={} hits={} nodes={}",
            rays.len(),
            rays.hit_count,
            bvh.node_count()
        );
        let stage = RaycastStage {
            elapsed_ms,
            rays: rays.len(),
            hits: rays.hit_count,
            hit_ratio: if rays.len() > 0 {
                rays.hit_count as f64 / rays.len() as f64
            } else {
                0.0
            },
            bvh_nodes: bvh.node_count(),
            triangles: bvh.triangle_count(),
        };
        Ok(RaycastComputation { rays, stage })
    }

    fn run_food_points(
        &self,
        scene: &[Point3<f64>],
        canonical: &CanonicalBowlMesh,
        outcome: &FitOutcome,
    ) -> Option<FoodPointsStage> {
        let food = fit::extract_food_points(
            scene,
            canonical,
            outcome,
            self.params.food_height_threshold_mm,
        );
        let voxel = volume::voxel_occupancy_volume(&food, self.params.food_voxel_mm);
        Some(FoodPointsStage {
            points: food.len(),
            height_threshold_mm: self.params.food_height_threshold_mm,
            voxel_volume_ml: voxel.volume_ml,
            voxel_mm: voxel.voxel_mm,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::Intrinsics;
    use crate::mesh::TriangleMesh;
    use crate::types::{DepthImage, FoodMask};

    fn mesh() -> TriangleMesh {
        TriangleMesh::new(
            vec![
                Point3::new(0.0, 0.0, 0.0),
                Point3::new(30.0, 0.0, 20.0),
                Point3::new(-30.0, 0.0, 20.0),
                Point3::new(0.0, 30.0, 20.0),
                Point3::new(0.0, -30.0, 20.0),
            ],
            vec![[0, 1, 3], [0, 3, 2], [0, 2, 4], [0, 4, 1]],
        )
    }

    #[test]
    fn all_invalid_depth_is_insufficient_data() {
        let depth_buf = vec![0u16; 64 * 64];
        let mask_buf = vec![false; 64 * 64];
        let bowl = mesh();
        let request = VolumeRequest {
            depth: DepthImage {
                w: 64,
                h: 64,
                stride: 64,
                data: &depth_buf,
            },
            rgb: None,
            food_mask: FoodMask {
                w: 64,
                h: 64,
                stride: 64,
                data: &mask_buf,
            },
            intrinsics: Intrinsics {
                fx: 64.0,
                fy: 64.0,
                cx: 32.0,
                cy: 32.0,
                width: 64,
                height: 64,
            },
            depth_scale_m_per_unit: 1e-4,
            bowl_mesh: &bowl,
            bowl_rim_diameter_mm: 60.0,
            initial_pose: None,
        };
        let estimator = VolumeEstimator::new(VolumeParams::default());
        let err = estimator.estimate(&request).unwrap_err();
        assert!(matches!(err, VolumeError::InsufficientData { valid: 0, .. }));
    }

    #[test]
    fn pre_cancelled_token_aborts_immediately() {
        let depth_buf = vec![2000u16; 64 * 64];
        let mask_buf = vec![true; 64 * 64];
        let bowl = mesh();
        let request = VolumeRequest {
            depth: DepthImage {
                w: 64,
                h: 64,
                stride: 64,
                data: &depth_buf,
            },
            rgb: None,
            food_mask: FoodMask {
                w: 64,
                h: 64,
                stride: 64,
                data: &mask_buf,
            },
            intrinsics: Intrinsics {
                fx: 64.0,
                fy: 64.0,
                cx: 32.0,
                cy: 32.0,
                width: 64,
                height: 64,
            },
            depth_scale_m_per_unit: 1e-4,
            bowl_mesh: &bowl,
            bowl_rim_diameter_mm: 60.0,
            initial_pose: None,
        };
        let cancel = CancelToken::new();
        cancel.cancel();
        let estimator = VolumeEstimator::new(VolumeParams::default());
        let err = estimator.estimate_with_cancel(&request, &cancel).unwrap_err();
        assert!(matches!(err, VolumeError::Cancelled));
    }
}

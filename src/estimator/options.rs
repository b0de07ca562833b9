//! Parameter types configuring the estimation stages.
//!
//! Stage-specific knobs live next to their algorithms; this module only
//! aggregates them. Defaults target a short-range active-stereo sensor
//! looking straight down at a bowl on a table.

use serde::Deserialize;

use crate::backproject::DepthRangeOptions;
use crate::fit::IcpOptions;
use crate::mesh::MeshPrepOptions;
use crate::raycast::RaycastOptions;

/// Estimator-wide parameters.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct VolumeParams {
    /// Accepted metric depth band for back-projection and integration.
    pub depth: DepthRangeOptions,
    /// Rim detection and opening disambiguation.
    pub mesh: MeshPrepOptions,
    /// Scaled rigid registration.
    pub icp: IcpOptions,
    /// Ray/mesh intersection.
    pub raycast: RaycastOptions,
    /// Scene-cloud voxel downsampling leaf before fitting; `None` disables.
    pub downsample_voxel_mm: Option<f64>,
    /// Height above the fitted bowl bottom below which a scene point is
    /// not considered food.
    pub food_height_threshold_mm: f64,
    /// Leaf size of the voxel-occupancy cross-check volume.
    pub food_voxel_mm: f64,
}

impl Default for VolumeParams {
    fn default() -> Self {
        Self {
            depth: DepthRangeOptions::default(),
            mesh: MeshPrepOptions::default(),
            icp: IcpOptions::default(),
            raycast: RaycastOptions::default(),
            downsample_voxel_mm: Some(2.0),
            food_height_threshold_mm: 5.0,
            food_voxel_mm: 1.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_capture_setup() {
        let params = VolumeParams::default();
        assert_eq!(params.depth.min_valid_mm, 70.0);
        assert_eq!(params.depth.max_valid_mm, 500.0);
        assert_eq!(params.icp.max_iterations, 100);
        assert_eq!(params.icp.distance_threshold_mm, 20.0);
        assert!(params.icp.point_to_plane);
        assert_eq!(params.mesh.rim_percentile, 95.0);
        assert_eq!(params.raycast.epsilon, 1e-6);
    }
}

//! The structured request accepted by the estimator, with ingress
//! validation. Everything is borrowed; the estimator never takes
//! ownership of caller buffers.

use nalgebra::Matrix4;

use crate::camera::Intrinsics;
use crate::error::VolumeError;
use crate::mesh::{MeshSummary, TriangleMesh};
use crate::types::{DepthImage, FoodMask, RgbImage};

/// One capture to estimate. All images share the same pixel grid.
#[derive(Clone, Debug)]
pub struct VolumeRequest<'a> {
    pub depth: DepthImage<'a>,
    /// Optional RGB frame; shape-checked, otherwise unused by the core.
    pub rgb: Option<RgbImage<'a>>,
    pub food_mask: FoodMask<'a>,
    pub intrinsics: Intrinsics,
    /// Metres per raw depth unit, e.g. 1e-4.
    pub depth_scale_m_per_unit: f64,
    pub bowl_mesh: &'a TriangleMesh,
    /// True rim diameter of the physical bowl, millimetres.
    pub bowl_rim_diameter_mm: f64,
    /// Optional rigid pose seed for the fit (4x4, rotation + translation).
    pub initial_pose: Option<Matrix4<f64>>,
}

impl<'a> VolumeRequest<'a> {
    /// Rejects malformed requests before any work happens. Returns the
    /// mesh accounting for the trace.
    pub fn validate(&self) -> Result<MeshSummary, VolumeError> {
        let invalid = |msg: String| VolumeError::InvalidInput(msg);

        if self.depth.w == 0 || self.depth.h == 0 {
            return Err(invalid("depth image has zero dimension".to_string()));
        }
        if self.depth.stride < self.depth.w {
            return Err(invalid("depth stride smaller than width".to_string()));
        }
        let needed = (self.depth.h - 1) * self.depth.stride + self.depth.w;
        if self.depth.data.len() < needed {
            return Err(invalid(format!(
                "depth buffer too small: {} < {}",
                self.depth.data.len(),
                needed
            )));
        }

        if self.food_mask.w != self.depth.w || self.food_mask.h != self.depth.h {
            return Err(invalid(format!(
                "food mask {}x{} does not match depth {}x{}",
                self.food_mask.w, self.food_mask.h, self.depth.w, self.depth.h
            )));
        }
        if self.food_mask.stride < self.food_mask.w {
            return Err(invalid("mask stride smaller than width".to_string()));
        }
        let needed = (self.food_mask.h - 1) * self.food_mask.stride + self.food_mask.w;
        if self.food_mask.data.len() < needed {
            return Err(invalid("mask buffer too small".to_string()));
        }

        if let Some(rgb) = &self.rgb {
            if rgb.w != self.depth.w || rgb.h != self.depth.h {
                return Err(invalid(format!(
                    "rgb {}x{} does not match depth {}x{}",
                    rgb.w, rgb.h, self.depth.w, self.depth.h
                )));
            }
            if rgb.stride < 3 * rgb.w {
                return Err(invalid("rgb stride smaller than 3 * width".to_string()));
            }
            let needed = (rgb.h - 1) * rgb.stride + 3 * rgb.w;
            if rgb.data.len() < needed {
                return Err(invalid("rgb buffer too small".to_string()));
            }
        }

        if self.intrinsics.width != self.depth.w || self.intrinsics.height != self.depth.h {
            return Err(invalid(format!(
                "intrinsics geometry {}x{} does not match depth {}x{}",
                self.intrinsics.width, self.intrinsics.height, self.depth.w, self.depth.h
            )));
        }
        self.intrinsics.validate().map_err(invalid)?;

        if !(self.depth_scale_m_per_unit.is_finite() && self.depth_scale_m_per_unit > 0.0) {
            return Err(invalid(format!(
                "depth scale must be positive and finite, got {}",
                self.depth_scale_m_per_unit
            )));
        }
        if !(self.bowl_rim_diameter_mm.is_finite() && self.bowl_rim_diameter_mm > 0.0) {
            return Err(invalid(format!(
                "rim diameter must be positive and finite, got {}",
                self.bowl_rim_diameter_mm
            )));
        }

        self.bowl_mesh.validate().map_err(invalid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Point3;

    fn mesh() -> TriangleMesh {
        TriangleMesh::new(
            vec![
                Point3::new(0.0, 0.0, 0.0),
                Point3::new(10.0, 0.0, 0.0),
                Point3::new(0.0, 10.0, 0.0),
                Point3::new(0.0, 0.0, 10.0),
            ],
            vec![[0, 1, 2], [0, 1, 3], [0, 2, 3], [1, 2, 3]],
        )
    }

    fn request<'a>(
        depth: &'a [u16],
        mask: &'a [bool],
        mesh: &'a TriangleMesh,
    ) -> VolumeRequest<'a> {
        VolumeRequest {
            depth: DepthImage {
                w: 4,
                h: 4,
                stride: 4,
                data: depth,
            },
            rgb: None,
            food_mask: FoodMask {
                w: 4,
                h: 4,
                stride: 4,
                data: mask,
            },
            intrinsics: Intrinsics {
                fx: 10.0,
                fy: 10.0,
                cx: 2.0,
                cy: 2.0,
                width: 4,
                height: 4,
            },
            depth_scale_m_per_unit: 1e-4,
            bowl_mesh: mesh,
            bowl_rim_diameter_mm: 100.0,
            initial_pose: None,
        }
    }

    #[test]
    fn valid_request_passes() {
        let depth = vec![0u16; 16];
        let mask = vec![false; 16];
        let mesh = mesh();
        assert!(request(&depth, &mask, &mesh).validate().is_ok());
    }

    #[test]
    fn shape_mismatch_is_rejected() {
        let depth = vec![0u16; 16];
        let mask = vec![false; 9];
        let mesh = mesh();
        let mut req = request(&depth, &mask, &mesh);
        req.food_mask.w = 3;
        req.food_mask.h = 3;
        req.food_mask.stride = 3;
        assert!(matches!(
            req.validate(),
            Err(VolumeError::InvalidInput(_))
        ));
    }

    #[test]
    fn bad_scale_and_diameter_are_rejected() {
        let depth = vec![0u16; 16];
        let mask = vec![false; 16];
        let mesh = mesh();
        let mut req = request(&depth, &mask, &mesh);
        req.depth_scale_m_per_unit = 0.0;
        assert!(req.validate().is_err());

        let mut req = request(&depth, &mask, &mesh);
        req.bowl_rim_diameter_mm = -5.0;
        assert!(req.validate().is_err());
    }

    #[test]
    fn undersized_mesh_is_rejected() {
        let depth = vec![0u16; 16];
        let mask = vec![false; 16];
        let tiny = TriangleMesh::new(vec![Point3::new(0.0, 0.0, 0.0)], vec![]);
        let req = request(&depth, &mask, &tiny);
        assert!(matches!(req.validate(), Err(VolumeError::InvalidInput(_))));
    }
}

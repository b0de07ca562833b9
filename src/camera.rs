use nalgebra::{Point3, Vector3};
use serde::{Deserialize, Serialize};

/// Pinhole intrinsics of the depth sensor, in pixels.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct Intrinsics {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
    pub width: usize,
    pub height: usize,
}

impl Intrinsics {
    /// Checks the pinhole constraints: positive finite focal lengths and a
    /// principal point inside the image.
    pub fn validate(&self) -> Result<(), String> {
        if !(self.fx.is_finite() && self.fy.is_finite() && self.cx.is_finite() && self.cy.is_finite())
        {
            return Err("non-finite intrinsics".to_string());
        }
        if self.fx <= 0.0 || self.fy <= 0.0 {
            return Err(format!("focal lengths must be positive: fx={} fy={}", self.fx, self.fy));
        }
        if self.cx < 0.0 || self.cx >= self.width as f64 {
            return Err(format!("cx={} outside [0, {})", self.cx, self.width));
        }
        if self.cy < 0.0 || self.cy >= self.height as f64 {
            return Err(format!("cy={} outside [0, {})", self.cy, self.height));
        }
        Ok(())
    }

    /// Back-projects pixel (u, v) at depth `z_mm` into the camera frame.
    #[inline]
    pub fn backproject(&self, u: f64, v: f64, z_mm: f64) -> Point3<f64> {
        Point3::new(
            (u - self.cx) * z_mm / self.fx,
            (v - self.cy) * z_mm / self.fy,
            z_mm,
        )
    }

    /// Projects a camera-frame point onto the image plane. The caller is
    /// responsible for `p.z > 0`.
    #[inline]
    pub fn project(&self, p: &Point3<f64>) -> (f64, f64) {
        (
            p.x / p.z * self.fx + self.cx,
            p.y / p.z * self.fy + self.cy,
        )
    }

    /// Unit direction of the camera ray through pixel (u, v).
    #[inline]
    pub fn ray_direction(&self, u: f64, v: f64) -> Vector3<f64> {
        let d = Vector3::new((u - self.cx) / self.fx, (v - self.cy) / self.fy, 1.0);
        d / d.norm()
    }
}

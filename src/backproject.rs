//! Depth-image back-projection into a metric point cloud.
//!
//! Each valid pixel (u, v) with raw depth `d` becomes
//! `((u - cx) z / fx, (v - cy) z / fy, z)` with `z = d * scale * 1000` in
//! millimetres. A pixel is valid iff `d != 0` and `z` lies inside the
//! configured range; everything else is dropped and counted.
//!
//! Row-parallel when the `parallel` feature is enabled; output order is the
//! row-major pixel order either way.

use nalgebra::Point3;
use serde::Deserialize;

use crate::camera::Intrinsics;
use crate::types::{DepthImage, FoodMask};

/// Accepted metric depth band. The defaults match the reliable band of a
/// short-range active-stereo sensor.
#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(default)]
pub struct DepthRangeOptions {
    pub min_valid_mm: f64,
    pub max_valid_mm: f64,
}

impl Default for DepthRangeOptions {
    fn default() -> Self {
        Self {
            min_valid_mm: 70.0,
            max_valid_mm: 500.0,
        }
    }
}

impl DepthRangeOptions {
    #[inline]
    pub fn contains(&self, z_mm: f64) -> bool {
        z_mm >= self.min_valid_mm && z_mm <= self.max_valid_mm
    }
}

/// Pixel rectangle in image coordinates, end-exclusive.
#[derive(Clone, Copy, Debug, Deserialize)]
pub struct PixelRect {
    pub x0: usize,
    pub y0: usize,
    pub x1: usize,
    pub y1: usize,
}

impl PixelRect {
    pub fn full(w: usize, h: usize) -> Self {
        Self {
            x0: 0,
            y0: 0,
            x1: w,
            y1: h,
        }
    }

    fn clamped(&self, w: usize, h: usize) -> Self {
        Self {
            x0: self.x0.min(w),
            y0: self.y0.min(h),
            x1: self.x1.min(w),
            y1: self.y1.min(h),
        }
    }
}

/// Per-run accounting of dropped pixels.
#[derive(Clone, Copy, Debug, Default)]
pub struct BackprojectSummary {
    pub points: usize,
    pub dropped_zero_depth: usize,
    pub dropped_out_of_range: usize,
}

/// Back-projects every valid pixel of the image.
pub fn backproject(
    depth: &DepthImage<'_>,
    intrinsics: &Intrinsics,
    depth_scale_m_per_unit: f64,
    range: &DepthRangeOptions,
) -> (Vec<Point3<f64>>, BackprojectSummary) {
    let rect = PixelRect::full(depth.w, depth.h);
    run(depth, None, &rect, intrinsics, depth_scale_m_per_unit, range)
}

/// Back-projects only pixels selected by the mask.
pub fn backproject_masked(
    depth: &DepthImage<'_>,
    mask: &FoodMask<'_>,
    intrinsics: &Intrinsics,
    depth_scale_m_per_unit: f64,
    range: &DepthRangeOptions,
) -> (Vec<Point3<f64>>, BackprojectSummary) {
    let rect = PixelRect::full(depth.w, depth.h);
    run(
        depth,
        Some(mask),
        &rect,
        intrinsics,
        depth_scale_m_per_unit,
        range,
    )
}

/// Back-projects only pixels inside the crop rectangle.
pub fn backproject_crop(
    depth: &DepthImage<'_>,
    crop: &PixelRect,
    intrinsics: &Intrinsics,
    depth_scale_m_per_unit: f64,
    range: &DepthRangeOptions,
) -> (Vec<Point3<f64>>, BackprojectSummary) {
    let rect = crop.clamped(depth.w, depth.h);
    run(depth, None, &rect, intrinsics, depth_scale_m_per_unit, range)
}

struct RowOutput {
    points: Vec<Point3<f64>>,
    dropped_zero_depth: usize,
    dropped_out_of_range: usize,
}

fn project_row(
    depth: &DepthImage<'_>,
    mask: Option<&FoodMask<'_>>,
    rect: &PixelRect,
    intrinsics: &Intrinsics,
    scale_mm: f64,
    range: &DepthRangeOptions,
    y: usize,
) -> RowOutput {
    let mut out = RowOutput {
        points: Vec::new(),
        dropped_zero_depth: 0,
        dropped_out_of_range: 0,
    };
    for x in rect.x0..rect.x1 {
        if let Some(m) = mask {
            if !m.get(x, y) {
                continue;
            }
        }
        let raw = depth.get(x, y);
        if raw == 0 {
            out.dropped_zero_depth += 1;
            continue;
        }
        let z_mm = raw as f64 * scale_mm;
        if !range.contains(z_mm) {
            out.dropped_out_of_range += 1;
            continue;
        }
        out.points
            .push(intrinsics.backproject(x as f64, y as f64, z_mm));
    }
    out
}

fn collect_rows(rows: Vec<RowOutput>) -> (Vec<Point3<f64>>, BackprojectSummary) {
    let mut summary = BackprojectSummary::default();
    let total: usize = rows.iter().map(|r| r.points.len()).sum();
    let mut points = Vec::with_capacity(total);
    for row in rows {
        summary.dropped_zero_depth += row.dropped_zero_depth;
        summary.dropped_out_of_range += row.dropped_out_of_range;
        points.extend(row.points);
    }
    summary.points = points.len();
    (points, summary)
}

#[cfg(not(feature = "parallel"))]
fn run(
    depth: &DepthImage<'_>,
    mask: Option<&FoodMask<'_>>,
    rect: &PixelRect,
    intrinsics: &Intrinsics,
    depth_scale_m_per_unit: f64,
    range: &DepthRangeOptions,
) -> (Vec<Point3<f64>>, BackprojectSummary) {
    let scale_mm = depth_scale_m_per_unit * 1000.0;
    let rows = (rect.y0..rect.y1)
        .map(|y| project_row(depth, mask, rect, intrinsics, scale_mm, range, y))
        .collect();
    collect_rows(rows)
}

#[cfg(feature = "parallel")]
fn run(
    depth: &DepthImage<'_>,
    mask: Option<&FoodMask<'_>>,
    rect: &PixelRect,
    intrinsics: &Intrinsics,
    depth_scale_m_per_unit: f64,
    range: &DepthRangeOptions,
) -> (Vec<Point3<f64>>, BackprojectSummary) {
    use rayon::prelude::*;

    let scale_mm = depth_scale_m_per_unit * 1000.0;
    let rows: Vec<RowOutput> = (rect.y0..rect.y1)
        .into_par_iter()
        .map(|y| project_row(depth, mask, rect, intrinsics, scale_mm, range, y))
        .collect();
    collect_rows(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn intrinsics() -> Intrinsics {
        Intrinsics {
            fx: 100.0,
            fy: 100.0,
            cx: 2.0,
            cy: 2.0,
            width: 4,
            height: 4,
        }
    }

    #[test]
    fn drops_zero_and_out_of_range_pixels() {
        // 1e-4 m/unit: raw 1000 -> 100 mm, raw 9000 -> 900 mm.
        let data = vec![
            0, 1000, 1000, 0, //
            1000, 9000, 1000, 0, //
            0, 0, 100, 1000, //
            1000, 1000, 1000, 1000,
        ];
        let depth = DepthImage {
            w: 4,
            h: 4,
            stride: 4,
            data: &data,
        };
        let (points, summary) = backproject(&depth, &intrinsics(), 1e-4, &DepthRangeOptions::default());
        assert_eq!(summary.dropped_zero_depth, 5);
        // raw 9000 is beyond 500 mm, raw 100 is 10 mm, below 70 mm.
        assert_eq!(summary.dropped_out_of_range, 2);
        assert_eq!(points.len(), 9);
        assert_eq!(summary.points, 9);
        for p in &points {
            assert!((p.z - 100.0).abs() < 1e-9);
        }
    }

    #[test]
    fn masked_projection_selects_pixels() {
        let data = vec![1000u16; 16];
        let depth = DepthImage {
            w: 4,
            h: 4,
            stride: 4,
            data: &data,
        };
        let mut mask_buf = vec![false; 16];
        mask_buf[5] = true;
        mask_buf[10] = true;
        let mask = FoodMask {
            w: 4,
            h: 4,
            stride: 4,
            data: &mask_buf,
        };
        let (points, summary) =
            backproject_masked(&depth, &mask, &intrinsics(), 1e-4, &DepthRangeOptions::default());
        assert_eq!(points.len(), 2);
        assert_eq!(summary.points, 2);
        // Pixel (1, 1) at 100 mm: x = (1-2)*100/100 = -1.
        assert!((points[0] - Point3::new(-1.0, -1.0, 100.0)).norm() < 1e-9);
    }

    #[test]
    fn crop_projection_restricts_rows_and_columns() {
        let data = vec![1000u16; 16];
        let depth = DepthImage {
            w: 4,
            h: 4,
            stride: 4,
            data: &data,
        };
        let crop = PixelRect {
            x0: 1,
            y0: 1,
            x1: 3,
            y1: 3,
        };
        let (points, _) =
            backproject_crop(&depth, &crop, &intrinsics(), 1e-4, &DepthRangeOptions::default());
        assert_eq!(points.len(), 4);
    }

    #[test]
    fn empty_image_is_legal() {
        let data: Vec<u16> = vec![0; 16];
        let depth = DepthImage {
            w: 4,
            h: 4,
            stride: 4,
            data: &data,
        };
        let (points, summary) = backproject(&depth, &intrinsics(), 1e-4, &DepthRangeOptions::default());
        assert!(points.is_empty());
        assert_eq!(summary.dropped_zero_depth, 16);
    }
}

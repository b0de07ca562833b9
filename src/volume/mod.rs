//! Volume integration.
//!
//! The primary estimator is depth-difference integration: per food pixel,
//! height = bowl-surface distance minus food-surface depth, weighted by the
//! pixel footprint at the food surface, `z^2 / (fx fy)`. Two secondary
//! estimators recovered from the capture rig are kept for cross-checks:
//! voxel occupancy over extracted food points and plane-referenced
//! height-map integration.
//!
//! All reductions run over fixed-size index chunks folded in order, so the
//! result is bit-identical for a given input regardless of thread count.

use std::collections::HashSet;

use nalgebra::Point3;

use crate::backproject::DepthRangeOptions;
use crate::camera::Intrinsics;
use crate::cancel::CancelToken;
use crate::error::VolumeError;
use crate::raycast::RaycastResult;
use crate::types::{DepthImage, FoodMask};

/// Pixels per reduction chunk. Constant on purpose: chunk boundaries must
/// not depend on the thread count.
const CHUNK: usize = 4096;

/// Aggregated integration output and skip accounting.
#[derive(Clone, Copy, Debug, Default)]
pub struct IntegrationStats {
    pub volume_ml: f64,
    pub n_food_pixels: usize,
    pub n_valid_pixels: usize,
    pub valid_ratio: f64,
    pub mean_height_mm: f64,
    pub max_height_mm: f64,
    pub std_height_mm: f64,
    pub skipped_invalid_depth: usize,
    pub skipped_no_hit: usize,
    pub skipped_non_positive: usize,
}

#[derive(Clone, Copy, Debug, Default)]
struct Partial {
    volume_mm3: f64,
    sum_h: f64,
    sum_h2: f64,
    max_h: f64,
    valid: usize,
    skipped_invalid_depth: usize,
    skipped_no_hit: usize,
    skipped_non_positive: usize,
}

/// Integrates bowl-minus-food heights over the ray-cast food pixels.
pub fn integrate_depth_difference(
    depth: &DepthImage<'_>,
    intrinsics: &Intrinsics,
    depth_scale_m_per_unit: f64,
    range: &DepthRangeOptions,
    rays: &RaycastResult,
    cancel: &CancelToken,
) -> Result<IntegrationStats, VolumeError> {
    let scale_mm = depth_scale_m_per_unit * 1000.0;
    let inv_ff = 1.0 / (intrinsics.fx * intrinsics.fy);
    let width = depth.w as u32;

    let partials = reduce_chunks(rays, cancel, |lo, hi| {
        let mut part = Partial::default();
        for i in lo..hi {
            let pix = rays.pixel_indices[i];
            let x = (pix % width) as usize;
            let y = (pix / width) as usize;
            let raw = depth.get(x, y);
            if raw == 0 {
                part.skipped_invalid_depth += 1;
                continue;
            }
            let food_mm = raw as f64 * scale_mm;
            if !range.contains(food_mm) {
                part.skipped_invalid_depth += 1;
                continue;
            }
            if !rays.hits[i] {
                part.skipped_no_hit += 1;
                continue;
            }
            let bowl_mm = rays.distances_mm[i] as f64;
            let h_mm = bowl_mm - food_mm;
            if h_mm <= 0.0 {
                part.skipped_non_positive += 1;
                continue;
            }
            let area_mm2 = food_mm * food_mm * inv_ff;
            part.volume_mm3 += h_mm * area_mm2;
            part.sum_h += h_mm;
            part.sum_h2 += h_mm * h_mm;
            part.max_h = part.max_h.max(h_mm);
            part.valid += 1;
        }
        part
    })?;

    let mut total = Partial::default();
    for part in partials {
        total.volume_mm3 += part.volume_mm3;
        total.sum_h += part.sum_h;
        total.sum_h2 += part.sum_h2;
        total.max_h = total.max_h.max(part.max_h);
        total.valid += part.valid;
        total.skipped_invalid_depth += part.skipped_invalid_depth;
        total.skipped_no_hit += part.skipped_no_hit;
        total.skipped_non_positive += part.skipped_non_positive;
    }

    let n_food = rays.len();
    let (mean, std) = if total.valid > 0 {
        let mean = total.sum_h / total.valid as f64;
        let var = (total.sum_h2 / total.valid as f64 - mean * mean).max(0.0);
        (mean, var.sqrt())
    } else {
        (0.0, 0.0)
    };

    Ok(IntegrationStats {
        volume_ml: total.volume_mm3 / 1000.0,
        n_food_pixels: n_food,
        n_valid_pixels: total.valid,
        valid_ratio: if n_food > 0 {
            total.valid as f64 / n_food as f64
        } else {
            0.0
        },
        mean_height_mm: mean,
        max_height_mm: total.max_h,
        std_height_mm: std,
        skipped_invalid_depth: total.skipped_invalid_depth,
        skipped_no_hit: total.skipped_no_hit,
        skipped_non_positive: total.skipped_non_positive,
    })
}

#[cfg(not(feature = "parallel"))]
fn reduce_chunks<F>(
    rays: &RaycastResult,
    cancel: &CancelToken,
    body: F,
) -> Result<Vec<Partial>, VolumeError>
where
    F: Fn(usize, usize) -> Partial + Sync,
{
    let n = rays.len();
    let mut out = Vec::with_capacity(n.div_ceil(CHUNK));
    let mut lo = 0usize;
    while lo < n {
        cancel.check()?;
        let hi = (lo + CHUNK).min(n);
        out.push(body(lo, hi));
        lo = hi;
    }
    Ok(out)
}

#[cfg(feature = "parallel")]
fn reduce_chunks<F>(
    rays: &RaycastResult,
    cancel: &CancelToken,
    body: F,
) -> Result<Vec<Partial>, VolumeError>
where
    F: Fn(usize, usize) -> Partial + Sync,
{
    use rayon::prelude::*;

    let n = rays.len();
    let chunks = n.div_ceil(CHUNK);
    let out: Vec<Partial> = (0..chunks)
        .into_par_iter()
        .map(|c| {
            if cancel.is_cancelled() {
                return Partial::default();
            }
            let lo = c * CHUNK;
            let hi = (lo + CHUNK).min(n);
            body(lo, hi)
        })
        .collect();
    cancel.check()?;
    Ok(out)
}

/// Voxel-occupancy volume over extracted food points.
#[derive(Clone, Copy, Debug, Default)]
pub struct VoxelVolume {
    pub volume_ml: f64,
    pub occupied_voxels: usize,
    pub voxel_mm: f64,
}

pub fn voxel_occupancy_volume(points: &[Point3<f64>], voxel_mm: f64) -> VoxelVolume {
    if voxel_mm <= 0.0 || points.is_empty() {
        return VoxelVolume {
            volume_ml: 0.0,
            occupied_voxels: 0,
            voxel_mm,
        };
    }
    let inv = 1.0 / voxel_mm;
    let mut occupied: HashSet<(i64, i64, i64)> = HashSet::with_capacity(points.len());
    for p in points {
        occupied.insert((
            (p.x * inv).floor() as i64,
            (p.y * inv).floor() as i64,
            (p.z * inv).floor() as i64,
        ));
    }
    let n = occupied.len();
    VoxelVolume {
        volume_ml: n as f64 * voxel_mm * voxel_mm * voxel_mm / 1000.0,
        occupied_voxels: n,
        voxel_mm,
    }
}

/// Height-map volume above a horizontal reference plane.
#[derive(Clone, Copy, Debug, Default)]
pub struct PlaneVolume {
    pub volume_ml: f64,
    pub n_pixels: usize,
    pub mean_height_mm: f64,
    pub max_height_mm: f64,
}

/// Plane-referenced integration: height is the food surface's elevation
/// above the reference depth, footprint is the constant pixel area at the
/// reference plane. Useful when no bowl mesh is available.
pub fn integrate_above_plane(
    depth: &DepthImage<'_>,
    mask: &FoodMask<'_>,
    intrinsics: &Intrinsics,
    depth_scale_m_per_unit: f64,
    reference_plane_z_mm: f64,
    range: &DepthRangeOptions,
) -> PlaneVolume {
    let scale_mm = depth_scale_m_per_unit * 1000.0;
    let area_mm2 = reference_plane_z_mm * reference_plane_z_mm / (intrinsics.fx * intrinsics.fy);

    let mut sum_h = 0.0f64;
    let mut max_h = 0.0f64;
    let mut n = 0usize;
    for y in 0..depth.h {
        for x in 0..depth.w {
            if !mask.get(x, y) {
                continue;
            }
            let raw = depth.get(x, y);
            if raw == 0 {
                continue;
            }
            let food_mm = raw as f64 * scale_mm;
            if !range.contains(food_mm) {
                continue;
            }
            let h = reference_plane_z_mm - food_mm;
            if h <= 0.0 {
                continue;
            }
            sum_h += h;
            max_h = max_h.max(h);
            n += 1;
        }
    }

    PlaneVolume {
        volume_ml: sum_h * area_mm2 / 1000.0,
        n_pixels: n,
        mean_height_mm: if n > 0 { sum_h / n as f64 } else { 0.0 },
        max_height_mm: max_h,
    }
}

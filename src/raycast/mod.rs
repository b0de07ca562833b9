//! Per-pixel ray casting against the fitted bowl mesh.
//!
//! For every food-mask pixel a camera ray is intersected with the fitted
//! mesh through the BVH; the first positive hit is the distance to the
//! bowl surface behind the food. Pixels are processed in fixed-size
//! chunks: the chunking is what the cancellation token and the parallel
//! scheduler both operate on, and the output layout is independent of the
//! thread count.

pub mod bvh;
pub mod triangle;

pub use bvh::Bvh;
pub use triangle::{moller_trumbore, Ray};

use nalgebra::Point3;
use serde::Deserialize;

use crate::camera::Intrinsics;
use crate::cancel::CancelToken;
use crate::error::VolumeError;
use crate::types::FoodMask;

/// Ray-casting knobs.
#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(default)]
pub struct RaycastOptions {
    /// Determinant gate of the triangle intersection.
    pub epsilon: f64,
    /// Pixels per cancellation/scheduling chunk.
    pub chunk_size: usize,
}

impl Default for RaycastOptions {
    fn default() -> Self {
        Self {
            epsilon: 1e-6,
            chunk_size: 4096,
        }
    }
}

/// Per-food-pixel intersection results, aligned with `pixel_indices`.
#[derive(Clone, Debug, Default)]
pub struct RaycastResult {
    /// Row-major image indices of the food pixels, ascending.
    pub pixel_indices: Vec<u32>,
    pub hits: Vec<bool>,
    pub distances_mm: Vec<f32>,
    pub hit_count: usize,
}

impl RaycastResult {
    pub fn len(&self) -> usize {
        self.pixel_indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pixel_indices.is_empty()
    }
}

/// Casts one ray per food pixel. `width` is taken from the intrinsics.
pub fn raycast_food_pixels(
    bvh: &Bvh,
    mask: &FoodMask<'_>,
    intrinsics: &Intrinsics,
    options: &RaycastOptions,
    cancel: &CancelToken,
) -> Result<RaycastResult, VolumeError> {
    let pixel_indices = mask.pixel_indices();
    let n = pixel_indices.len();
    let mut hits = vec![false; n];
    let mut distances_mm = vec![0.0f32; n];

    let width = mask.w as u32;
    let chunk = options.chunk_size.max(1);
    cast_chunks(
        bvh,
        intrinsics,
        options.epsilon,
        width,
        &pixel_indices,
        &mut hits,
        &mut distances_mm,
        chunk,
        cancel,
    )?;
    cancel.check()?;

    let hit_count = hits.iter().filter(|&&h| h).count();
    Ok(RaycastResult {
        pixel_indices,
        hits,
        distances_mm,
        hit_count,
    })
}

fn cast_chunk(
    bvh: &Bvh,
    intrinsics: &Intrinsics,
    epsilon: f64,
    width: u32,
    pixels: &[u32],
    hits: &mut [bool],
    distances: &mut [f32],
) {
    for ((&pix, hit), dist) in pixels.iter().zip(hits.iter_mut()).zip(distances.iter_mut()) {
        let u = (pix % width) as f64;
        let v = (pix / width) as f64;
        let ray = Ray::new(Point3::origin(), intrinsics.ray_direction(u, v));
        match bvh.intersect(&ray, epsilon) {
            Some(t) => {
                *hit = true;
                *dist = t as f32;
            }
            None => {
                *hit = false;
                *dist = 0.0;
            }
        }
    }
}

#[cfg(not(feature = "parallel"))]
#[allow(clippy::too_many_arguments)]
fn cast_chunks(
    bvh: &Bvh,
    intrinsics: &Intrinsics,
    epsilon: f64,
    width: u32,
    pixels: &[u32],
    hits: &mut [bool],
    distances: &mut [f32],
    chunk: usize,
    cancel: &CancelToken,
) -> Result<(), VolumeError> {
    for ((px, hs), ds) in pixels
        .chunks(chunk)
        .zip(hits.chunks_mut(chunk))
        .zip(distances.chunks_mut(chunk))
    {
        cancel.check()?;
        cast_chunk(bvh, intrinsics, epsilon, width, px, hs, ds);
    }
    Ok(())
}

#[cfg(feature = "parallel")]
#[allow(clippy::too_many_arguments)]
fn cast_chunks(
    bvh: &Bvh,
    intrinsics: &Intrinsics,
    epsilon: f64,
    width: u32,
    pixels: &[u32],
    hits: &mut [bool],
    distances: &mut [f32],
    chunk: usize,
    cancel: &CancelToken,
) -> Result<(), VolumeError> {
    use rayon::prelude::*;

    pixels
        .par_chunks(chunk)
        .zip(hits.par_chunks_mut(chunk))
        .zip(distances.par_chunks_mut(chunk))
        .for_each(|((px, hs), ds)| {
            // A cancelled run skips remaining chunks; the caller reports
            // the cancellation after the join.
            if cancel.is_cancelled() {
                return;
            }
            cast_chunk(bvh, intrinsics, epsilon, width, px, hs, ds);
        });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::TriangleMesh;
    use nalgebra::Point3 as P3;

    /// Large quad at z = 150 covering the whole view.
    fn backplane() -> TriangleMesh {
        TriangleMesh::new(
            vec![
                P3::new(-500.0, -500.0, 150.0),
                P3::new(500.0, -500.0, 150.0),
                P3::new(500.0, 500.0, 150.0),
                P3::new(-500.0, 500.0, 150.0),
            ],
            vec![[0, 1, 2], [0, 2, 3]],
        )
    }

    fn intrinsics() -> Intrinsics {
        Intrinsics {
            fx: 64.0,
            fy: 64.0,
            cx: 32.0,
            cy: 32.0,
            width: 64,
            height: 64,
        }
    }

    #[test]
    fn plane_hits_every_masked_pixel() {
        let bvh = Bvh::build(&backplane());
        let mask_buf = vec![true; 64 * 64];
        let mask = FoodMask {
            w: 64,
            h: 64,
            stride: 64,
            data: &mask_buf,
        };
        let result = raycast_food_pixels(
            &bvh,
            &mask,
            &intrinsics(),
            &RaycastOptions::default(),
            &CancelToken::new(),
        )
        .expect("raycast");
        assert_eq!(result.len(), 64 * 64);
        assert_eq!(result.hit_count, 64 * 64);
        // Central pixel: perpendicular ray, distance equals the plane depth.
        let center = result
            .pixel_indices
            .iter()
            .position(|&p| p == 32 * 64 + 32)
            .unwrap();
        assert!((result.distances_mm[center] - 150.0).abs() < 1e-3);
        // Corner pixels are oblique, so the ray is longer.
        assert!(result.distances_mm[0] > 150.0);
    }

    #[test]
    fn raycast_is_bit_deterministic() {
        let bvh = Bvh::build(&backplane());
        let mask_buf: Vec<bool> = (0..64 * 64).map(|i| i % 3 == 0).collect();
        let mask = FoodMask {
            w: 64,
            h: 64,
            stride: 64,
            data: &mask_buf,
        };
        let k = intrinsics();
        let opts = RaycastOptions::default();
        let a = raycast_food_pixels(&bvh, &mask, &k, &opts, &CancelToken::new()).unwrap();
        let b = raycast_food_pixels(&bvh, &mask, &k, &opts, &CancelToken::new()).unwrap();
        assert_eq!(a.pixel_indices, b.pixel_indices);
        assert_eq!(a.hits, b.hits);
        assert_eq!(a.distances_mm, b.distances_mm);
    }

    #[test]
    fn cancellation_surfaces_as_error() {
        let bvh = Bvh::build(&backplane());
        let mask_buf = vec![true; 64 * 64];
        let mask = FoodMask {
            w: 64,
            h: 64,
            stride: 64,
            data: &mask_buf,
        };
        let cancel = CancelToken::new();
        cancel.cancel();
        let err = raycast_food_pixels(
            &bvh,
            &mask,
            &intrinsics(),
            &RaycastOptions::default(),
            &cancel,
        )
        .unwrap_err();
        assert!(matches!(err, VolumeError::Cancelled));
    }
}

//! Point-cloud helpers shared by fitting and diagnostics.
//!
//! Clouds are plain `Vec<Point3<f64>>` in millimetres, camera frame,
//! +Z forward. Functions here never mutate their input.

use std::collections::BTreeMap;

use nalgebra::{Point3, Vector3};

/// Mean of the cloud. Callers must pass a non-empty slice.
pub fn centroid(points: &[Point3<f64>]) -> Point3<f64> {
    let mut acc = Vector3::zeros();
    for p in points {
        acc += p.coords;
    }
    Point3::from(acc / points.len() as f64)
}

/// Voxel-grid downsampling: one averaged point per occupied leaf.
///
/// Output order follows the lexicographic order of the voxel coordinates so
/// reruns over the same cloud produce the same sequence.
pub fn voxel_downsample(points: &[Point3<f64>], leaf_mm: f64) -> Vec<Point3<f64>> {
    if leaf_mm <= 0.0 || points.is_empty() {
        return points.to_vec();
    }
    let inv = 1.0 / leaf_mm;
    let mut cells: BTreeMap<(i64, i64, i64), (Vector3<f64>, usize)> = BTreeMap::new();
    for p in points {
        let key = (
            (p.x * inv).floor() as i64,
            (p.y * inv).floor() as i64,
            (p.z * inv).floor() as i64,
        );
        let entry = cells.entry(key).or_insert((Vector3::zeros(), 0));
        entry.0 += p.coords;
        entry.1 += 1;
    }
    cells
        .into_values()
        .map(|(sum, n)| Point3::from(sum / n as f64))
        .collect()
}

/// Largest xy-plane diameter of the cloud: twice the maximum distance of a
/// point's xy projection from the xy centroid.
pub fn diameter_xy(points: &[Point3<f64>]) -> f64 {
    if points.is_empty() {
        return 0.0;
    }
    let c = centroid(points);
    let mut max_r2 = 0.0f64;
    for p in points {
        let dx = p.x - c.x;
        let dy = p.y - c.y;
        max_r2 = max_r2.max(dx * dx + dy * dy);
    }
    2.0 * max_r2.sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn centroid_of_symmetric_cloud_is_origin() {
        let pts = vec![
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(-1.0, 0.0, 0.0),
            Point3::new(0.0, 2.0, -3.0),
            Point3::new(0.0, -2.0, 3.0),
        ];
        assert!((centroid(&pts) - Point3::origin()).norm() < 1e-12);
    }

    #[test]
    fn downsample_merges_points_in_one_leaf() {
        let pts = vec![
            Point3::new(0.1, 0.1, 0.1),
            Point3::new(0.2, 0.2, 0.2),
            Point3::new(5.0, 5.0, 5.0),
        ];
        let down = voxel_downsample(&pts, 1.0);
        assert_eq!(down.len(), 2);
        assert!((down[0] - Point3::new(0.15, 0.15, 0.15)).norm() < 1e-12);
    }

    #[test]
    fn downsample_is_identity_for_degenerate_leaf() {
        let pts = vec![Point3::new(1.0, 2.0, 3.0)];
        assert_eq!(voxel_downsample(&pts, 0.0).len(), 1);
    }

    #[test]
    fn diameter_spans_widest_pair() {
        let pts = vec![
            Point3::new(-10.0, 0.0, 7.0),
            Point3::new(10.0, 0.0, 9.0),
            Point3::new(0.0, 3.0, 8.0),
            Point3::new(0.0, -3.0, 8.0),
        ];
        assert!((diameter_xy(&pts) - 20.0).abs() < 1e-9);
    }
}

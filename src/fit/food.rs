//! Classification of scene points that sit inside the fitted bowl.
//!
//! Points above the fitted interior bottom by at least the height
//! threshold, and radially inside the rim circle, are reported as food.
//! This is a geometric filter, not a segmentation; it feeds diagnostics
//! and the voxel-occupancy volume fallback.

use nalgebra::{Point3, Vector3};

use super::FitOutcome;
use crate::mesh::CanonicalBowlMesh;

pub fn extract_food_points(
    scene: &[Point3<f64>],
    canonical: &CanonicalBowlMesh,
    fit: &FitOutcome,
    height_threshold_mm: f64,
) -> Vec<Point3<f64>> {
    let rim_center = fit.rotation * (canonical.rim_centroid.coords * fit.scale) + fit.translation;
    // Canonical opening is +z; the fitted interior extends along -axis.
    let axis = fit.rotation * Vector3::z();
    let bowl_depth = canonical.height_mm() * fit.scale;
    let rim_radius = canonical.rim_diameter_mm * 0.5 * fit.scale;

    scene
        .iter()
        .filter(|p| {
            let q = p.coords - rim_center;
            let below_rim = -q.dot(&axis);
            let radial = q + axis * below_rim;
            radial.norm() <= rim_radius && below_rim <= bowl_depth - height_threshold_mm
        })
        .copied()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fit::FitOutcome;
    use crate::mesh::canonical::{canonicalize, MeshPrepOptions};
    use crate::mesh::TriangleMesh;
    use nalgebra::Matrix3;

    fn bowl() -> CanonicalBowlMesh {
        let mut vertices = Vec::new();
        let mut triangles = Vec::new();
        let rings = 12usize;
        let segments = 24usize;
        for ring in 0..=rings {
            let z = 30.0 * ring as f64 / rings as f64;
            let r = (2.0 * 70.0 * z - z * z).max(0.0).sqrt();
            for s in 0..segments {
                let a = std::f64::consts::TAU * s as f64 / segments as f64;
                vertices.push(Point3::new(r * a.cos(), r * a.sin(), z));
            }
        }
        for ring in 0..rings {
            for s in 0..segments {
                let s1 = (s + 1) % segments;
                let a = (ring * segments + s) as u32;
                let b = (ring * segments + s1) as u32;
                let c = ((ring + 1) * segments + s) as u32;
                let d = ((ring + 1) * segments + s1) as u32;
                triangles.push([a, b, c]);
                triangles.push([b, d, c]);
            }
        }
        canonicalize(
            &TriangleMesh::new(vertices, triangles),
            &MeshPrepOptions::default(),
        )
        .expect("canonical")
    }

    fn identity_fit() -> FitOutcome {
        FitOutcome {
            scale: 1.0,
            rotation: Matrix3::identity(),
            translation: Vector3::zeros(),
            fitness: 1.0,
            rmse_mm: 0.0,
            iterations: 1,
            converged: true,
            rim_diameter_model_mm: 0.0,
            scene_diameter_mm: 0.0,
            scale_accuracy_percent: 0.0,
            source_points: 0,
            scene_points: 0,
        }
    }

    #[test]
    fn keeps_interior_points_above_bottom() {
        let canonical = bowl();
        let fit = identity_fit();
        let inside = Point3::new(
            canonical.rim_centroid.x,
            canonical.rim_centroid.y,
            canonical.z_min + 15.0,
        );
        let hugging_bottom = Point3::new(0.0, 0.0, canonical.z_min + 1.0);
        let outside_radial = Point3::new(500.0, 0.0, canonical.z_min + 15.0);
        let scene = vec![inside, hugging_bottom, outside_radial];
        let food = extract_food_points(&scene, &canonical, &fit, 5.0);
        assert_eq!(food.len(), 1);
        assert!((food[0] - inside).norm() < 1e-12);
    }
}

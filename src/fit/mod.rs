//! Bowl fitting: scaled rigid registration of the canonical mesh onto the
//! scene cloud.
//!
//! The sole scale factor is solved analytically from the rim-diameter
//! ratio before any rigid fitting, which keeps ICP in the well-posed rigid
//! case. The initial pose drops the scaled rim centroid onto the scene
//! centroid with an identity rotation; callers observing a different
//! capture geometry can supply a 4x4 seed instead.

pub mod food;
pub mod icp;
pub mod kdtree;
pub mod normals;

pub use food::extract_food_points;
pub use icp::{IcpOptions, IcpResult};
pub use kdtree::KdTree;
pub use normals::estimate_normals;

use log::debug;
use nalgebra::{Matrix3, Matrix4, Point3, Vector3};

use crate::cancel::CancelToken;
use crate::cloud;
use crate::error::VolumeError;
use crate::mesh::CanonicalBowlMesh;

/// Scenes below this population are rejected before fitting.
pub const MIN_SCENE_POINTS: usize = 100;

/// Result of the scaled rigid fit, including the diagnostics the original
/// capture rig surfaces for scale inspection.
#[derive(Clone, Debug)]
pub struct FitOutcome {
    /// Analytic isotropic scale: true rim diameter over model rim diameter.
    pub scale: f64,
    pub rotation: Matrix3<f64>,
    pub translation: Vector3<f64>,
    pub fitness: f64,
    pub rmse_mm: f64,
    pub iterations: usize,
    pub converged: bool,
    /// Rim diameter measured on the reference mesh, millimetres.
    pub rim_diameter_model_mm: f64,
    /// Largest xy diameter of the observed cloud, millimetres.
    pub scene_diameter_mm: f64,
    /// How far the scene diameter deviates from the true rim diameter.
    pub scale_accuracy_percent: f64,
    pub source_points: usize,
    pub scene_points: usize,
}

impl FitOutcome {
    /// Homogeneous transform mapping canonical-mesh coordinates into the
    /// camera frame: `x_cam = scale * R * x + t`.
    pub fn transform_matrix(&self) -> Matrix4<f64> {
        let m = self.rotation * self.scale;
        Matrix4::new(
            m[(0, 0)],
            m[(0, 1)],
            m[(0, 2)],
            self.translation.x,
            m[(1, 0)],
            m[(1, 1)],
            m[(1, 2)],
            self.translation.y,
            m[(2, 0)],
            m[(2, 1)],
            m[(2, 2)],
            self.translation.z,
            0.0,
            0.0,
            0.0,
            1.0,
        )
    }
}

/// Fits the canonical bowl to the scene.
///
/// Fails with [`VolumeError::InsufficientData`] on an under-populated scene
/// and with [`VolumeError::InvalidInput`] on unusable geometry; alignment
/// quality never aborts.
pub fn fit_bowl(
    canonical: &CanonicalBowlMesh,
    scene: &[Point3<f64>],
    rim_diameter_true_mm: f64,
    initial_pose: Option<&Matrix4<f64>>,
    options: &IcpOptions,
    cancel: &CancelToken,
) -> Result<FitOutcome, VolumeError> {
    if scene.len() < MIN_SCENE_POINTS {
        return Err(VolumeError::InsufficientData {
            valid: scene.len(),
            required: MIN_SCENE_POINTS,
        });
    }
    if canonical.rim_diameter_mm <= 0.0 {
        return Err(VolumeError::InvalidInput(
            "canonical mesh has no measurable rim".to_string(),
        ));
    }

    let scale = rim_diameter_true_mm / canonical.rim_diameter_mm;
    let scaled = canonical
        .mesh
        .scaled_transformed(scale, &Matrix3::identity(), &Vector3::zeros());

    let n_source = options.max_source_points.min(scene.len());
    let source = scaled.sample_surface(n_source);
    if source.len() < 6 {
        return Err(VolumeError::InvalidInput(
            "mesh surface too small to sample for registration".to_string(),
        ));
    }

    let (init_rotation, init_translation) = match initial_pose {
        Some(seed) => decompose_seed(seed),
        None => {
            let scene_centroid = cloud::centroid(scene);
            let rim_scaled = canonical.rim_centroid.coords * scale;
            (Matrix3::identity(), scene_centroid.coords - rim_scaled)
        }
    };

    let normals = if options.point_to_plane {
        Some(estimate_normals(scene, options.normal_neighbours))
    } else {
        None
    };

    debug!(
        "fit_bowl: scale={:.4} source={} scene={} init_t=({:.1}, {:.1}, {:.1})",
        scale,
        source.len(),
        scene.len(),
        init_translation.x,
        init_translation.y,
        init_translation.z
    );

    let icp = icp::register(
        &source,
        scene,
        normals.as_deref(),
        init_rotation,
        init_translation,
        options,
        cancel,
    )?;

    let scene_diameter_mm = cloud::diameter_xy(scene);
    let scale_accuracy_percent = if scene_diameter_mm > 0.0 {
        (1.0 - rim_diameter_true_mm / scene_diameter_mm).abs() * 100.0
    } else {
        0.0
    };

    debug!(
        "fit_bowl: done iters={} fitness={:.3} rmse={:.2} converged={}",
        icp.iterations, icp.fitness, icp.rmse_mm, icp.converged
    );

    Ok(FitOutcome {
        scale,
        rotation: icp.rotation,
        translation: icp.translation,
        fitness: icp.fitness,
        rmse_mm: icp.rmse_mm,
        iterations: icp.iterations,
        converged: icp.converged,
        rim_diameter_model_mm: canonical.rim_diameter_mm,
        scene_diameter_mm,
        scale_accuracy_percent,
        source_points: source.len(),
        scene_points: scene.len(),
    })
}

fn decompose_seed(seed: &Matrix4<f64>) -> (Matrix3<f64>, Vector3<f64>) {
    let rotation = Matrix3::new(
        seed[(0, 0)],
        seed[(0, 1)],
        seed[(0, 2)],
        seed[(1, 0)],
        seed[(1, 1)],
        seed[(1, 2)],
        seed[(2, 0)],
        seed[(2, 1)],
        seed[(2, 2)],
    );
    let translation = Vector3::new(seed[(0, 3)], seed[(1, 3)], seed[(2, 3)]);
    (rotation, translation)
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Point3;

    #[test]
    fn tiny_scene_is_rejected() {
        let canonical = crate::mesh::canonical::canonicalize(
            &crate::mesh::TriangleMesh::new(
                vec![
                    Point3::new(0.0, 0.0, 0.0),
                    Point3::new(30.0, 0.0, 20.0),
                    Point3::new(-30.0, 0.0, 20.0),
                    Point3::new(0.0, 30.0, 20.0),
                    Point3::new(0.0, -30.0, 20.0),
                ],
                vec![[0, 1, 3], [0, 3, 2], [0, 2, 4], [0, 4, 1]],
            ),
            &crate::mesh::MeshPrepOptions::default(),
        )
        .expect("canonical");
        let scene = vec![Point3::new(0.0, 0.0, 200.0); 50];
        let err = fit_bowl(
            &canonical,
            &scene,
            60.0,
            None,
            &IcpOptions::default(),
            &CancelToken::new(),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            VolumeError::InsufficientData {
                valid: 50,
                required: MIN_SCENE_POINTS
            }
        ));
    }

    #[test]
    fn transform_matrix_embeds_scale_rotation_translation() {
        let outcome = FitOutcome {
            scale: 2.0,
            rotation: Matrix3::identity(),
            translation: Vector3::new(1.0, 2.0, 3.0),
            fitness: 1.0,
            rmse_mm: 0.0,
            iterations: 1,
            converged: true,
            rim_diameter_model_mm: 50.0,
            scene_diameter_mm: 100.0,
            scale_accuracy_percent: 0.0,
            source_points: 0,
            scene_points: 0,
        };
        let m = outcome.transform_matrix();
        assert_eq!(m[(0, 0)], 2.0);
        assert_eq!(m[(1, 3)], 2.0);
        assert_eq!(m[(3, 3)], 1.0);
    }
}

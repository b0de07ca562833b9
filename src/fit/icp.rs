//! Rigid iterative-closest-point registration.
//!
//! Scale never appears here: the caller solves it analytically from the rim
//! diameters and hands over a pre-scaled source. Each iteration gathers
//! correspondences within a shrinking distance gate, solves a rigid update
//! (point-to-plane Gauss–Newton when scene normals are available,
//! closed-form SVD otherwise) and composes it onto the running transform.

use log::debug;
use nalgebra::{Cholesky, Matrix3, Matrix6, Point3, Rotation3, Vector3, Vector6};
use serde::Deserialize;

use super::kdtree::KdTree;
use crate::cancel::CancelToken;
use crate::error::VolumeError;

/// ICP knobs. Defaults follow the short-range capture setup.
#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(default)]
pub struct IcpOptions {
    /// Upper bound on iterations.
    pub max_iterations: usize,
    /// Correspondence rejection distance at iteration zero (millimetres).
    pub distance_threshold_mm: f64,
    /// Floor the shrinking gate never crosses.
    pub min_threshold_mm: f64,
    /// Multiplier applied to the gate every iteration.
    pub threshold_decay: f64,
    /// Mean-distance delta that declares convergence.
    pub convergence_delta_mm: f64,
    /// Prefer the point-to-plane objective when normals are available.
    pub point_to_plane: bool,
    /// Neighbourhood size for scene-normal estimation.
    pub normal_neighbours: usize,
    /// Cap on source samples taken from the mesh surface.
    pub max_source_points: usize,
    /// After this many iterations, a non-improving fitness stops the loop.
    pub stall_iterations: usize,
}

impl Default for IcpOptions {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            distance_threshold_mm: 20.0,
            min_threshold_mm: 5.0,
            threshold_decay: 0.97,
            convergence_delta_mm: 1e-3,
            point_to_plane: true,
            normal_neighbours: 20,
            max_source_points: 50_000,
            stall_iterations: 20,
        }
    }
}

/// Final rigid alignment plus its quality measures.
#[derive(Clone, Debug)]
pub struct IcpResult {
    pub rotation: Matrix3<f64>,
    pub translation: Vector3<f64>,
    /// Fraction of source points with a correspondence at the base gate.
    pub fitness: f64,
    /// RMS correspondence distance at the base gate, millimetres.
    pub rmse_mm: f64,
    pub mean_distance_mm: f64,
    pub iterations: usize,
    pub converged: bool,
}

struct Correspondence {
    source: u32,
    target: u32,
    dist2: f64,
}

/// Registers `source` onto `target`, starting from `(init_rotation,
/// init_translation)`. `target_normals`, when present, must be aligned with
/// `target`.
pub fn register(
    source: &[Point3<f64>],
    target: &[Point3<f64>],
    target_normals: Option<&[Vector3<f64>]>,
    init_rotation: Matrix3<f64>,
    init_translation: Vector3<f64>,
    options: &IcpOptions,
    cancel: &CancelToken,
) -> Result<IcpResult, VolumeError> {
    if source.is_empty() || target.is_empty() {
        return Err(VolumeError::InvalidInput(
            "icp requires non-empty source and target clouds".to_string(),
        ));
    }

    let tree = KdTree::new(target);
    let mut rotation = init_rotation;
    let mut translation = init_translation;
    let mut transformed = apply(source, &rotation, &translation);

    let mut prev_mean = f64::INFINITY;
    let mut prev_fitness = -1.0f64;
    let mut iterations = 0usize;
    let mut converged = false;

    for iter in 0..options.max_iterations {
        cancel.check()?;
        iterations = iter + 1;

        let gate = (options.distance_threshold_mm * options.threshold_decay.powi(iter as i32))
            .max(options.min_threshold_mm);
        let pairs = correspondences(&transformed, &tree, gate);
        if pairs.len() < 6 {
            debug!(
                "icp::register iter={} gate={:.2} pairs={} -> stop",
                iter,
                gate,
                pairs.len()
            );
            break;
        }

        let fitness = pairs.len() as f64 / source.len() as f64;
        let mean = pairs.iter().map(|c| c.dist2.sqrt()).sum::<f64>() / pairs.len() as f64;

        let update = match target_normals {
            Some(normals) if options.point_to_plane => {
                solve_point_to_plane(&transformed, target, normals, &pairs)
                    .or_else(|| solve_point_to_point(&transformed, target, &pairs))
            }
            _ => solve_point_to_point(&transformed, target, &pairs),
        };
        let Some((dr, dt)) = update else {
            debug!("icp::register iter={} singular update -> stop", iter);
            break;
        };
        rotation = dr * rotation;
        translation = dr * translation + dt;
        transformed = apply(source, &rotation, &translation);

        if (prev_mean - mean).abs() < options.convergence_delta_mm {
            converged = true;
            debug!(
                "icp::register converged iter={} mean={:.4} fitness={:.3}",
                iter, mean, fitness
            );
            break;
        }
        if iterations >= options.stall_iterations && fitness <= prev_fitness {
            debug!(
                "icp::register stalled iter={} fitness={:.3} (prev {:.3})",
                iter, fitness, prev_fitness
            );
            break;
        }
        prev_mean = mean;
        prev_fitness = fitness;
    }

    // Quality measures are always evaluated at the base gate so runs with
    // different decay schedules stay comparable.
    let pairs = correspondences(&transformed, &tree, options.distance_threshold_mm);
    let (fitness, rmse_mm, mean_distance_mm) = if pairs.is_empty() {
        (0.0, 0.0, 0.0)
    } else {
        let sum_d2: f64 = pairs.iter().map(|c| c.dist2).sum();
        let sum_d: f64 = pairs.iter().map(|c| c.dist2.sqrt()).sum();
        (
            pairs.len() as f64 / source.len() as f64,
            (sum_d2 / pairs.len() as f64).sqrt(),
            sum_d / pairs.len() as f64,
        )
    };
    let converged = converged || iterations < options.max_iterations || fitness >= 0.3;

    Ok(IcpResult {
        rotation,
        translation,
        fitness,
        rmse_mm,
        mean_distance_mm,
        iterations,
        converged,
    })
}

fn apply(
    source: &[Point3<f64>],
    rotation: &Matrix3<f64>,
    translation: &Vector3<f64>,
) -> Vec<Point3<f64>> {
    source
        .iter()
        .map(|p| Point3::from(rotation * p.coords + translation))
        .collect()
}

#[cfg(not(feature = "parallel"))]
fn correspondences(
    transformed: &[Point3<f64>],
    tree: &KdTree<'_>,
    gate_mm: f64,
) -> Vec<Correspondence> {
    transformed
        .iter()
        .enumerate()
        .filter_map(|(i, p)| {
            tree.nearest_within(p, gate_mm).map(|(j, d2)| Correspondence {
                source: i as u32,
                target: j,
                dist2: d2,
            })
        })
        .collect()
}

#[cfg(feature = "parallel")]
fn correspondences(
    transformed: &[Point3<f64>],
    tree: &KdTree<'_>,
    gate_mm: f64,
) -> Vec<Correspondence> {
    use rayon::prelude::*;

    transformed
        .par_iter()
        .enumerate()
        .filter_map(|(i, p)| {
            tree.nearest_within(p, gate_mm).map(|(j, d2)| Correspondence {
                source: i as u32,
                target: j,
                dist2: d2,
            })
        })
        .collect()
}

/// Closed-form rigid solve (Kabsch/Umeyama without scale).
fn solve_point_to_point(
    transformed: &[Point3<f64>],
    target: &[Point3<f64>],
    pairs: &[Correspondence],
) -> Option<(Matrix3<f64>, Vector3<f64>)> {
    let n = pairs.len() as f64;
    let mut pc = Vector3::zeros();
    let mut qc = Vector3::zeros();
    for c in pairs {
        pc += transformed[c.source as usize].coords;
        qc += target[c.target as usize].coords;
    }
    pc /= n;
    qc /= n;

    let mut h = Matrix3::zeros();
    for c in pairs {
        let p = transformed[c.source as usize].coords - pc;
        let q = target[c.target as usize].coords - qc;
        h += p * q.transpose();
    }

    let svd = h.svd(true, true);
    let u = svd.u?;
    let v_t = svd.v_t?;
    let mut v = v_t.transpose();
    let mut r = v * u.transpose();
    if r.determinant() < 0.0 {
        let mut col = v.column_mut(2);
        col.neg_mut();
        r = v * u.transpose();
    }
    let t = qc - r * pc;
    Some((r, t))
}

/// One Gauss–Newton step of the linearized point-to-plane objective
/// `sum (n . (R p + t - q))^2` around the identity.
fn solve_point_to_plane(
    transformed: &[Point3<f64>],
    target: &[Point3<f64>],
    normals: &[Vector3<f64>],
    pairs: &[Correspondence],
) -> Option<(Matrix3<f64>, Vector3<f64>)> {
    let mut ata = Matrix6::<f64>::zeros();
    let mut atb = Vector6::<f64>::zeros();
    for c in pairs {
        let p = transformed[c.source as usize].coords;
        let q = target[c.target as usize].coords;
        let n = normals[c.target as usize];
        let residual = (p - q).dot(&n);
        let cxn = p.cross(&n);
        let j = Vector6::new(cxn.x, cxn.y, cxn.z, n.x, n.y, n.z);
        ata += j * j.transpose();
        atb -= j * residual;
    }
    // Tiny Tikhonov term: keeps the solve finite when the scene has a
    // rotational symmetry (the null direction gets a zero step).
    let damping = 1e-9 * ata.trace().max(1e-12);
    for i in 0..6 {
        ata[(i, i)] += damping;
    }
    let chol = Cholesky::new(ata)?;
    let x = chol.solve(&atb);
    let omega = Vector3::new(x[0], x[1], x[2]);
    let rotation = Rotation3::new(omega).into_inner();
    let translation = Vector3::new(x[3], x[4], x[5]);
    Some((rotation, translation))
}

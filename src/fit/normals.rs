//! Scene-normal estimation for point-to-plane ICP.
//!
//! Per-point PCA over the k nearest neighbours; the eigenvector of the
//! smallest eigenvalue is the surface normal. Normals are oriented toward
//! the camera origin, which is well defined for a cloud produced by
//! back-projection.

use nalgebra::{Matrix3, Point3, Vector3};

use super::kdtree::KdTree;

pub fn estimate_normals(points: &[Point3<f64>], k: usize) -> Vec<Vector3<f64>> {
    let tree = KdTree::new(points);
    let k = k.max(3);
    map_points(points, |p| normal_for(p, &tree, points, k))
}

fn normal_for(
    p: &Point3<f64>,
    tree: &KdTree<'_>,
    points: &[Point3<f64>],
    k: usize,
) -> Vector3<f64> {
    let neighbours = tree.knn(p, k);
    if neighbours.len() < 3 {
        return fallback_normal(p);
    }
    let mut mean = Vector3::zeros();
    for &(_, i) in &neighbours {
        mean += points[i as usize].coords;
    }
    mean /= neighbours.len() as f64;
    let mut cov = Matrix3::zeros();
    for &(_, i) in &neighbours {
        let d = points[i as usize].coords - mean;
        cov += d * d.transpose();
    }
    let eig = cov.symmetric_eigen();
    let mut smallest = 0usize;
    for i in 1..3 {
        if eig.eigenvalues[i] < eig.eigenvalues[smallest] {
            smallest = i;
        }
    }
    let mut n = eig.eigenvectors.column(smallest).into_owned();
    let norm = n.norm();
    if !norm.is_finite() || norm < 1e-12 {
        return fallback_normal(p);
    }
    n /= norm;
    // Point the normal at the camera.
    if n.dot(&p.coords) > 0.0 {
        n = -n;
    }
    n
}

fn fallback_normal(p: &Point3<f64>) -> Vector3<f64> {
    let d = p.coords.norm();
    if d > 1e-12 {
        -p.coords / d
    } else {
        -Vector3::z()
    }
}

#[cfg(not(feature = "parallel"))]
fn map_points<F>(points: &[Point3<f64>], f: F) -> Vec<Vector3<f64>>
where
    F: Fn(&Point3<f64>) -> Vector3<f64> + Sync,
{
    points.iter().map(|p| f(p)).collect()
}

#[cfg(feature = "parallel")]
fn map_points<F>(points: &[Point3<f64>], f: F) -> Vec<Vector3<f64>>
where
    F: Fn(&Point3<f64>) -> Vector3<f64> + Sync,
{
    use rayon::prelude::*;

    points.par_iter().map(|p| f(p)).collect()
}

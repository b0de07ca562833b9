//! Ray/triangle intersection primitives.

use nalgebra::{Point3, Vector3};

/// Camera ray with a precomputed reciprocal direction for slab tests.
#[derive(Clone, Copy, Debug)]
pub struct Ray {
    pub origin: Point3<f64>,
    pub direction: Vector3<f64>,
    pub inv_direction: Vector3<f64>,
}

impl Ray {
    pub fn new(origin: Point3<f64>, direction: Vector3<f64>) -> Self {
        Self {
            origin,
            direction,
            inv_direction: Vector3::new(
                1.0 / direction.x,
                1.0 / direction.y,
                1.0 / direction.z,
            ),
        }
    }
}

/// Two-sided Moller-Trumbore. Returns the ray parameter of the hit, which
/// equals the metric distance when `direction` is unit length.
///
/// `epsilon` gates the determinant: rays parallel to the triangle plane
/// within the gate report a miss.
#[inline]
pub fn moller_trumbore(
    ray: &Ray,
    a: &Point3<f64>,
    edge1: &Vector3<f64>,
    edge2: &Vector3<f64>,
    epsilon: f64,
) -> Option<f64> {
    let pvec = ray.direction.cross(edge2);
    let det = edge1.dot(&pvec);
    if det.abs() < epsilon {
        return None;
    }
    let inv_det = 1.0 / det;
    let tvec = ray.origin - a;
    let u = tvec.dot(&pvec) * inv_det;
    if !(0.0..=1.0).contains(&u) {
        return None;
    }
    let qvec = tvec.cross(edge1);
    let v = ray.direction.dot(&qvec) * inv_det;
    if v < 0.0 || u + v > 1.0 {
        return None;
    }
    let t = edge2.dot(&qvec) * inv_det;
    if t > epsilon {
        Some(t)
    } else {
        None
    }
}

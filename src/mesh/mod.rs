//! Triangle-mesh value type and canonicalization of the reference bowl.
//!
//! Meshes are plain owned arrays: vertices in millimetres plus index
//! triples. No half-edge structure, no shared ownership; the ray-casting
//! BVH holds indices into the triangle array instead of references.

pub mod canonical;

pub use canonical::{canonicalize, CanonicalBowlMesh, MeshPrepOptions};

use nalgebra::{Matrix3, Point3, Vector3};

/// Owned triangle soup in millimetres. May be non-watertight.
#[derive(Clone, Debug)]
pub struct TriangleMesh {
    pub vertices: Vec<Point3<f64>>,
    pub triangles: Vec<[u32; 3]>,
}

/// Shape accounting produced by [`TriangleMesh::validate`].
#[derive(Clone, Copy, Debug, Default)]
pub struct MeshSummary {
    pub vertices: usize,
    pub triangles: usize,
    pub degenerate_triangles: usize,
}

const DEGENERATE_AREA_MM2: f64 = 1e-9;

impl TriangleMesh {
    pub fn new(vertices: Vec<Point3<f64>>, triangles: Vec<[u32; 3]>) -> Self {
        Self {
            vertices,
            triangles,
        }
    }

    /// Checks index bounds and minimum sizes; counts degenerate triangles.
    pub fn validate(&self) -> Result<MeshSummary, String> {
        if self.vertices.len() < 4 {
            return Err(format!(
                "mesh needs at least 4 vertices, got {}",
                self.vertices.len()
            ));
        }
        if self.triangles.len() < 4 {
            return Err(format!(
                "mesh needs at least 4 triangles, got {}",
                self.triangles.len()
            ));
        }
        let n = self.vertices.len() as u32;
        let mut degenerate = 0usize;
        for (i, tri) in self.triangles.iter().enumerate() {
            if tri.iter().any(|&v| v >= n) {
                return Err(format!("triangle {} references vertex out of bounds", i));
            }
            if self.triangle_area(i) < DEGENERATE_AREA_MM2 {
                degenerate += 1;
            }
        }
        for v in &self.vertices {
            if !(v.x.is_finite() && v.y.is_finite() && v.z.is_finite()) {
                return Err("mesh contains non-finite vertex coordinates".to_string());
            }
        }
        Ok(MeshSummary {
            vertices: self.vertices.len(),
            triangles: self.triangles.len(),
            degenerate_triangles: degenerate,
        })
    }

    #[inline]
    pub fn corners(&self, tri: usize) -> (Point3<f64>, Point3<f64>, Point3<f64>) {
        let [a, b, c] = self.triangles[tri];
        (
            self.vertices[a as usize],
            self.vertices[b as usize],
            self.vertices[c as usize],
        )
    }

    pub fn triangle_area(&self, tri: usize) -> f64 {
        let (a, b, c) = self.corners(tri);
        0.5 * (b - a).cross(&(c - a)).norm()
    }

    pub fn surface_area(&self) -> f64 {
        (0..self.triangles.len()).map(|i| self.triangle_area(i)).sum()
    }

    /// Axis-aligned bounds; meaningless for an empty mesh.
    pub fn bounds(&self) -> (Point3<f64>, Point3<f64>) {
        let mut lo = Point3::new(f64::INFINITY, f64::INFINITY, f64::INFINITY);
        let mut hi = Point3::new(f64::NEG_INFINITY, f64::NEG_INFINITY, f64::NEG_INFINITY);
        for v in &self.vertices {
            for k in 0..3 {
                lo[k] = lo[k].min(v[k]);
                hi[k] = hi[k].max(v[k]);
            }
        }
        (lo, hi)
    }

    /// Applies `p -> scale * R * p + t` to every vertex.
    pub fn scaled_transformed(
        &self,
        scale: f64,
        rotation: &Matrix3<f64>,
        translation: &Vector3<f64>,
    ) -> TriangleMesh {
        let vertices = self
            .vertices
            .iter()
            .map(|v| Point3::from(rotation * (v.coords * scale) + translation))
            .collect();
        TriangleMesh {
            vertices,
            triangles: self.triangles.clone(),
        }
    }

    /// Deterministic, area-weighted surface sampling.
    ///
    /// Samples are placed on a Halton (base 2/3) barycentric lattice with a
    /// global sequence index, so the pattern varies across triangles but is
    /// identical across runs.
    pub fn sample_surface(&self, count: usize) -> Vec<Point3<f64>> {
        if count == 0 || self.triangles.is_empty() {
            return Vec::new();
        }
        let areas: Vec<f64> = (0..self.triangles.len())
            .map(|i| self.triangle_area(i))
            .collect();
        let total: f64 = areas.iter().sum();
        if total <= 0.0 {
            return Vec::new();
        }

        // Integer allocation per triangle, remainder to the largest
        // fractional shares.
        let mut alloc: Vec<usize> = Vec::with_capacity(areas.len());
        let mut fracs: Vec<(f64, usize)> = Vec::with_capacity(areas.len());
        let mut assigned = 0usize;
        for (i, &a) in areas.iter().enumerate() {
            let share = a / total * count as f64;
            let base = share.floor() as usize;
            alloc.push(base);
            assigned += base;
            fracs.push((share - base as f64, i));
        }
        fracs.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        let mut remaining = count.saturating_sub(assigned);
        for &(_, i) in fracs.iter() {
            if remaining == 0 {
                break;
            }
            alloc[i] += 1;
            remaining -= 1;
        }

        let mut out = Vec::with_capacity(count);
        let mut seq = 0u64;
        for (i, &n) in alloc.iter().enumerate() {
            let (a, b, c) = self.corners(i);
            let ab = b - a;
            let ac = c - a;
            for _ in 0..n {
                seq += 1;
                let mut u = radical_inverse(2, seq);
                let mut v = radical_inverse(3, seq);
                if u + v > 1.0 {
                    u = 1.0 - u;
                    v = 1.0 - v;
                }
                out.push(a + ab * u + ac * v);
            }
        }
        out
    }
}

fn radical_inverse(base: u64, mut i: u64) -> f64 {
    let mut f = 1.0;
    let mut r = 0.0;
    while i > 0 {
        f /= base as f64;
        r += f * (i % base) as f64;
        i /= base;
    }
    r
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tetrahedron() -> TriangleMesh {
        TriangleMesh::new(
            vec![
                Point3::new(0.0, 0.0, 0.0),
                Point3::new(10.0, 0.0, 0.0),
                Point3::new(0.0, 10.0, 0.0),
                Point3::new(0.0, 0.0, 10.0),
            ],
            vec![[0, 1, 2], [0, 1, 3], [0, 2, 3], [1, 2, 3]],
        )
    }

    #[test]
    fn validate_accepts_tetrahedron() {
        let summary = tetrahedron().validate().expect("valid mesh");
        assert_eq!(summary.vertices, 4);
        assert_eq!(summary.triangles, 4);
        assert_eq!(summary.degenerate_triangles, 0);
    }

    #[test]
    fn validate_rejects_out_of_bounds_index() {
        let mut mesh = tetrahedron();
        mesh.triangles[0] = [0, 1, 9];
        assert!(mesh.validate().is_err());
    }

    #[test]
    fn validate_counts_degenerate_triangles() {
        let mut mesh = tetrahedron();
        mesh.triangles.push([1, 1, 2]);
        let summary = mesh.validate().expect("still valid");
        assert_eq!(summary.degenerate_triangles, 1);
    }

    #[test]
    fn sampling_is_deterministic_and_on_surface() {
        let mesh = tetrahedron();
        let a = mesh.sample_surface(500);
        let b = mesh.sample_surface(500);
        assert_eq!(a.len(), 500);
        assert_eq!(a, b);
        let (lo, hi) = mesh.bounds();
        for p in &a {
            for k in 0..3 {
                assert!(p[k] >= lo[k] - 1e-9 && p[k] <= hi[k] + 1e-9);
            }
        }
    }

    #[test]
    fn scaled_transform_applies_scale_then_rigid() {
        let mesh = tetrahedron();
        let r = Matrix3::identity();
        let t = Vector3::new(0.0, 0.0, 100.0);
        let out = mesh.scaled_transformed(2.0, &r, &t);
        assert!((out.vertices[1] - Point3::new(20.0, 0.0, 100.0)).norm() < 1e-12);
        assert!((out.surface_area() - 4.0 * mesh.surface_area()).abs() < 1e-9);
    }
}

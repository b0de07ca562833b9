//! Canonicalization of the reference bowl mesh.
//!
//! The reference bowl arrives in an arbitrary frame. Canonicalization is a
//! rigid transform (never a scale) that puts it into a known pose:
//!
//! - PCA on the vertices; the axis of smallest variance is the bowl's
//!   symmetry axis and is rotated onto +z.
//! - The opening end is the axis end whose vertex band spans the larger
//!   convex-hull area; if the opening points down the mesh is flipped
//!   about x.
//! - The rim-band centroid is translated onto the z axis.
//! - The rim diameter of the model is measured from the top vertex band
//!   and reported for the scale solve and for inspection.

use log::debug;
use nalgebra::{Matrix2, Matrix3, Point3, Vector2, Vector3};
use serde::Deserialize;

use super::TriangleMesh;

/// Knobs for rim detection and opening disambiguation.
#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(default)]
pub struct MeshPrepOptions {
    /// Vertex z-percentile above which a vertex counts as rim.
    pub rim_percentile: f64,
    /// Fraction of the bowl height used as the band for the opening test.
    pub opening_band_fraction: f64,
}

impl Default for MeshPrepOptions {
    fn default() -> Self {
        Self {
            rim_percentile: 95.0,
            opening_band_fraction: 0.05,
        }
    }
}

/// Reference bowl in the canonical frame: opening along +z, rim plane at
/// `z_rim` (the largest z), rim centroid on the z axis.
#[derive(Clone, Debug)]
pub struct CanonicalBowlMesh {
    pub mesh: TriangleMesh,
    /// Major-axis diameter of the rim band, millimetres.
    pub rim_diameter_mm: f64,
    /// Indices of the rim-band vertices (stable across later transforms).
    pub rim_indices: Vec<u32>,
    pub rim_centroid: Point3<f64>,
    pub z_rim: f64,
    pub z_min: f64,
    /// True when the opening test flipped the mesh.
    pub flipped: bool,
}

impl CanonicalBowlMesh {
    pub fn height_mm(&self) -> f64 {
        self.z_rim - self.z_min
    }
}

/// Canonicalizes the reference bowl. Fails only on degenerate geometry
/// (all vertices coplanar along the symmetry axis, or an unmeasurable rim).
pub fn canonicalize(
    mesh: &TriangleMesh,
    options: &MeshPrepOptions,
) -> Result<CanonicalBowlMesh, String> {
    let n = mesh.vertices.len();
    if n < 4 {
        return Err(format!("cannot canonicalize a mesh with {} vertices", n));
    }

    // PCA: covariance of the centred vertices.
    let mut mean = Vector3::zeros();
    for v in &mesh.vertices {
        mean += v.coords;
    }
    mean /= n as f64;
    let mut cov = Matrix3::zeros();
    for v in &mesh.vertices {
        let d = v.coords - mean;
        cov += d * d.transpose();
    }
    cov /= n as f64;

    let eig = cov.symmetric_eigen();
    let mut order = [0usize, 1, 2];
    order.sort_by(|&a, &b| {
        eig.eigenvalues[b]
            .partial_cmp(&eig.eigenvalues[a])
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    let e0 = eig.eigenvectors.column(order[0]).into_owned();
    let mut e1 = eig.eigenvectors.column(order[1]).into_owned();
    let e2 = eig.eigenvectors.column(order[2]).into_owned();
    if eig.eigenvalues[order[0]] <= 0.0 {
        return Err("degenerate vertex distribution, PCA failed".to_string());
    }

    // Row basis maps e0 -> x, e1 -> y, e2 -> z; keep it right-handed.
    let mut rotation = Matrix3::from_rows(&[e0.transpose(), e1.transpose(), e2.transpose()]);
    if rotation.determinant() < 0.0 {
        e1 = -e1;
        rotation = Matrix3::from_rows(&[e0.transpose(), e1.transpose(), e2.transpose()]);
    }

    let mut vertices: Vec<Point3<f64>> = mesh
        .vertices
        .iter()
        .map(|v| Point3::from(rotation * (v.coords - mean)))
        .collect();

    // Opening disambiguation: the rim band encloses more area than the foot.
    let (z_lo, z_hi) = z_range(&vertices);
    let band = ((z_hi - z_lo) * options.opening_band_fraction).max(1e-6);
    let top_area = hull_area_xy(vertices.iter().filter(|v| v.z >= z_hi - band));
    let bottom_area = hull_area_xy(vertices.iter().filter(|v| v.z <= z_lo + band));
    let flipped = bottom_area > top_area;
    if flipped {
        for v in vertices.iter_mut() {
            v.y = -v.y;
            v.z = -v.z;
        }
    }
    debug!(
        "canonicalize: hull areas top={:.1} bottom={:.1} flipped={}",
        top_area, bottom_area, flipped
    );

    // Rim band by z percentile.
    let mut zs: Vec<f64> = vertices.iter().map(|v| v.z).collect();
    zs.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let threshold = percentile(&zs, options.rim_percentile);
    let mut rim_indices: Vec<u32> = vertices
        .iter()
        .enumerate()
        .filter(|(_, v)| v.z > threshold)
        .map(|(i, _)| i as u32)
        .collect();
    if rim_indices.is_empty() {
        // All-ties fallback: take everything at the maximum.
        let z_max = zs[zs.len() - 1];
        rim_indices = vertices
            .iter()
            .enumerate()
            .filter(|(_, v)| v.z >= z_max - 1e-9)
            .map(|(i, _)| i as u32)
            .collect();
    }
    if rim_indices.len() < 3 {
        return Err("too few rim vertices to measure the rim".to_string());
    }

    // Centre the rim on the z axis.
    let mut rim_mean = Vector3::zeros();
    for &i in &rim_indices {
        rim_mean += vertices[i as usize].coords;
    }
    rim_mean /= rim_indices.len() as f64;
    for v in vertices.iter_mut() {
        v.x -= rim_mean.x;
        v.y -= rim_mean.y;
    }

    let (z_min, z_rim) = z_range(&vertices);
    let rim_diameter_mm = rim_diameter(&vertices, &rim_indices)?;
    let rim_centroid = Point3::new(0.0, 0.0, rim_mean.z);

    debug!(
        "canonicalize: rim vertices={} diameter={:.2} mm z_rim={:.2} height={:.2}",
        rim_indices.len(),
        rim_diameter_mm,
        z_rim,
        z_rim - z_min
    );

    Ok(CanonicalBowlMesh {
        mesh: TriangleMesh {
            vertices,
            triangles: mesh.triangles.clone(),
        },
        rim_diameter_mm,
        rim_indices,
        rim_centroid,
        z_rim,
        z_min,
        flipped,
    })
}

fn z_range(vertices: &[Point3<f64>]) -> (f64, f64) {
    let mut lo = f64::INFINITY;
    let mut hi = f64::NEG_INFINITY;
    for v in vertices {
        lo = lo.min(v.z);
        hi = hi.max(v.z);
    }
    (lo, hi)
}

/// Linear-interpolated percentile over a sorted slice.
fn percentile(sorted: &[f64], p: f64) -> f64 {
    let n = sorted.len();
    if n == 1 {
        return sorted[0];
    }
    let pos = (p / 100.0).clamp(0.0, 1.0) * (n - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    if lo == hi {
        sorted[lo]
    } else {
        let w = pos - lo as f64;
        sorted[lo] * (1.0 - w) + sorted[hi] * w
    }
}

/// Major-axis extent of the rim band projected onto xy.
fn rim_diameter(vertices: &[Point3<f64>], rim_indices: &[u32]) -> Result<f64, String> {
    let mut mean = Vector2::zeros();
    for &i in rim_indices {
        let v = &vertices[i as usize];
        mean += Vector2::new(v.x, v.y);
    }
    mean /= rim_indices.len() as f64;

    let mut cov = Matrix2::zeros();
    for &i in rim_indices {
        let v = &vertices[i as usize];
        let d = Vector2::new(v.x, v.y) - mean;
        cov += d * d.transpose();
    }
    cov /= rim_indices.len() as f64;

    let eig = cov.symmetric_eigen();
    let mut diameter = 0.0f64;
    for k in 0..2 {
        let axis = eig.eigenvectors.column(k).into_owned();
        let mut lo = f64::INFINITY;
        let mut hi = f64::NEG_INFINITY;
        for &i in rim_indices {
            let v = &vertices[i as usize];
            let s = (Vector2::new(v.x, v.y) - mean).dot(&axis);
            lo = lo.min(s);
            hi = hi.max(s);
        }
        diameter = diameter.max(hi - lo);
    }
    if diameter <= 0.0 {
        return Err("rim band collapses to a point".to_string());
    }
    Ok(diameter)
}

/// Convex-hull area of the xy projection (monotone chain + shoelace).
fn hull_area_xy<'a, I: Iterator<Item = &'a Point3<f64>>>(points: I) -> f64 {
    let mut pts: Vec<(f64, f64)> = points.map(|p| (p.x, p.y)).collect();
    if pts.len() < 3 {
        return 0.0;
    }
    pts.sort_by(|a, b| {
        a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal)
    });
    pts.dedup();
    if pts.len() < 3 {
        return 0.0;
    }

    let cross = |o: (f64, f64), a: (f64, f64), b: (f64, f64)| {
        (a.0 - o.0) * (b.1 - o.1) - (a.1 - o.1) * (b.0 - o.0)
    };

    let mut hull: Vec<(f64, f64)> = Vec::with_capacity(pts.len() * 2);
    for &p in &pts {
        while hull.len() >= 2 && cross(hull[hull.len() - 2], hull[hull.len() - 1], p) <= 0.0 {
            hull.pop();
        }
        hull.push(p);
    }
    let lower_len = hull.len() + 1;
    for &p in pts.iter().rev() {
        while hull.len() >= lower_len && cross(hull[hull.len() - 2], hull[hull.len() - 1], p) <= 0.0
        {
            hull.pop();
        }
        hull.push(p);
    }
    hull.pop();

    let mut area2 = 0.0;
    for i in 0..hull.len() {
        let (x0, y0) = hull[i];
        let (x1, y1) = hull[(i + 1) % hull.len()];
        area2 += x0 * y1 - x1 * y0;
    }
    area2.abs() * 0.5
}

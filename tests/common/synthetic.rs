//! Synthetic meshes and depth renders shared by the integration tests.

use food_volume::camera::Intrinsics;
use food_volume::mesh::TriangleMesh;
use food_volume::raycast::{Bvh, Ray};
use nalgebra::{Point3, Vector3};

/// Open spherical-cap bowl: interior sphere radius `r_sphere`, depth
/// `depth`, bottom at z = 0, rim ring at z = `depth`, opening along +z.
pub fn lathed_bowl(r_sphere: f64, depth: f64, rings: usize, segments: usize) -> TriangleMesh {
    let mut vertices = Vec::new();
    let mut triangles = Vec::new();
    for ring in 0..=rings {
        let z = depth * ring as f64 / rings as f64;
        let r = (2.0 * r_sphere * z - z * z).max(0.0).sqrt();
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
    TriangleMesh::new(vertices, triangles)
}

/// Lower half of a sphere centred at (0, 0, `equator_z`): the equator ring
/// sits at z = `equator_z`, the pole at z = `equator_z + radius`. Opening
/// toward the camera at the origin.
pub fn hemisphere(equator_z: f64, radius: f64, stacks: usize, slices: usize) -> TriangleMesh {
    let mut vertices = Vec::new();
    let mut triangles = Vec::new();
    for j in 0..stacks {
        let phi = std::f64::consts::FRAC_PI_2 * j as f64 / stacks as f64;
        let (r, z) = (radius * phi.cos(), equator_z + radius * phi.sin());
        for s in 0..slices {
            let a = std::f64::consts::TAU * s as f64 / slices as f64;
            vertices.push(Point3::new(r * a.cos(), r * a.sin(), z));
        }
    }
    let pole = vertices.len() as u32;
    vertices.push(Point3::new(0.0, 0.0, equator_z + radius));
    for j in 0..stacks - 1 {
        for s in 0..slices {
            let s1 = (s + 1) % slices;
            let a = (j * slices + s) as u32;
            let b = (j * slices + s1) as u32;
            let c = ((j + 1) * slices + s) as u32;
            let d = ((j + 1) * slices + s1) as u32;
            triangles.push([a, b, c]);
            triangles.push([b, d, c]);
        }
    }
    let last = ((stacks - 1) * slices) as u32;
    for s in 0..slices {
        let s1 = (s + 1) % slices;
        triangles.push([last + s as u32, last + s1 as u32, pole]);
    }
    TriangleMesh::new(vertices, triangles)
}

/// Flat disc of the given radius at depth `z`, triangulated as a fan.
pub fn flat_disc(radius: f64, z: f64, segments: usize) -> TriangleMesh {
    let mut vertices = vec![Point3::new(0.0, 0.0, z)];
    for s in 0..segments {
        let a = std::f64::consts::TAU * s as f64 / segments as f64;
        vertices.push(Point3::new(radius * a.cos(), radius * a.sin(), z));
    }
    let mut triangles = Vec::with_capacity(segments);
    for s in 0..segments {
        let s1 = (s % segments) as u32 + 1;
        let s2 = ((s + 1) % segments) as u32 + 1;
        triangles.push([0, s1, s2]);
    }
    TriangleMesh::new(vertices, triangles)
}

/// Renders the z-depth of the mesh into raw sensor units (0 where the ray
/// misses).
pub fn render_depth(mesh: &TriangleMesh, k: &Intrinsics, depth_scale_m_per_unit: f64) -> Vec<u16> {
    let bvh = Bvh::build(mesh);
    let scale_mm = depth_scale_m_per_unit * 1000.0;
    let mut out = vec![0u16; k.width * k.height];
    for v in 0..k.height {
        for u in 0..k.width {
            let dir = k.ray_direction(u as f64, v as f64);
            let ray = Ray::new(Point3::origin(), dir);
            if let Some(t) = bvh.intersect(&ray, 1e-6) {
                let z_mm = t * dir.z;
                let raw = (z_mm / scale_mm).round();
                if raw >= 1.0 && raw <= u16::MAX as f64 {
                    out[v * k.width + u] = raw as u16;
                }
            }
        }
    }
    out
}

/// Applies a rigid transform to every vertex.
pub fn transform_mesh(
    mesh: &TriangleMesh,
    rotation: &nalgebra::Matrix3<f64>,
    translation: &Vector3<f64>,
) -> TriangleMesh {
    TriangleMesh::new(
        mesh.vertices
            .iter()
            .map(|p| Point3::from(rotation * p.coords + translation))
            .collect(),
        mesh.triangles.clone(),
    )
}

//! Bounding-volume hierarchy over the fitted mesh.
//!
//! Binned surface-area-heuristic build (single-threaded, double precision)
//! and stack-based nearest-hit traversal. The tree owns triangle indices
//! and cached corner data; it never points back at the mesh, so mesh and
//! BVH can move independently.

use nalgebra::{Point3, Vector3};

use super::triangle::{moller_trumbore, Ray};
use crate::mesh::TriangleMesh;

const BINS: usize = 12;
const LEAF_SIZE: usize = 4;
const STACK_DEPTH: usize = 64;

#[derive(Clone, Copy, Debug)]
struct Aabb {
    min: Vector3<f64>,
    max: Vector3<f64>,
}

impl Aabb {
    fn empty() -> Self {
        Self {
            min: Vector3::repeat(f64::INFINITY),
            max: Vector3::repeat(f64::NEG_INFINITY),
        }
    }

    fn grow_point(&mut self, p: &Point3<f64>) {
        for k in 0..3 {
            self.min[k] = self.min[k].min(p[k]);
            self.max[k] = self.max[k].max(p[k]);
        }
    }

    fn grow(&mut self, other: &Aabb) {
        for k in 0..3 {
            self.min[k] = self.min[k].min(other.min[k]);
            self.max[k] = self.max[k].max(other.max[k]);
        }
    }

    fn surface_area(&self) -> f64 {
        let d = self.max - self.min;
        if d.x < 0.0 || d.y < 0.0 || d.z < 0.0 {
            return 0.0;
        }
        2.0 * (d.x * d.y + d.y * d.z + d.z * d.x)
    }

    /// Slab test bounded by the current best hit; returns the entry t.
    #[inline]
    fn hit(&self, ray: &Ray, t_best: f64) -> Option<f64> {
        let mut t_enter = 0.0f64;
        let mut t_exit = t_best;
        for k in 0..3 {
            let t1 = (self.min[k] - ray.origin[k]) * ray.inv_direction[k];
            let t2 = (self.max[k] - ray.origin[k]) * ray.inv_direction[k];
            let (lo, hi) = if t1 < t2 { (t1, t2) } else { (t2, t1) };
            t_enter = t_enter.max(lo);
            t_exit = t_exit.min(hi);
            if t_enter > t_exit {
                return None;
            }
        }
        Some(t_enter)
    }
}

#[derive(Clone, Copy, Debug)]
struct Node {
    aabb: Aabb,
    /// Leaf: first index into `prims`. Inner: index of the left child
    /// (right child is `left_first + 1`).
    left_first: u32,
    /// Number of primitives; 0 marks an inner node.
    count: u32,
}

/// Cached triangle layout used by the intersection kernel.
#[derive(Clone, Copy, Debug)]
struct TriData {
    a: Point3<f64>,
    edge1: Vector3<f64>,
    edge2: Vector3<f64>,
}

pub struct Bvh {
    nodes: Vec<Node>,
    prims: Vec<u32>,
    tris: Vec<TriData>,
}

impl Bvh {
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn triangle_count(&self) -> usize {
        self.tris.len()
    }

    /// Builds the hierarchy. Empty meshes yield an empty tree that misses
    /// every ray.
    pub fn build(mesh: &TriangleMesh) -> Self {
        let n = mesh.triangles.len();
        let mut tris = Vec::with_capacity(n);
        let mut centroids = Vec::with_capacity(n);
        let mut boxes = Vec::with_capacity(n);
        for i in 0..n {
            let (a, b, c) = mesh.corners(i);
            tris.push(TriData {
                a,
                edge1: b - a,
                edge2: c - a,
            });
            centroids.push(Point3::from((a.coords + b.coords + c.coords) / 3.0));
            let mut bb = Aabb::empty();
            bb.grow_point(&a);
            bb.grow_point(&b);
            bb.grow_point(&c);
            boxes.push(bb);
        }

        let mut bvh = Self {
            nodes: Vec::with_capacity(2 * n.max(1)),
            prims: (0..n as u32).collect(),
            tris,
        };
        if n == 0 {
            return bvh;
        }
        let root = Node {
            aabb: bounds_of(&bvh.prims, &boxes),
            left_first: 0,
            count: n as u32,
        };
        bvh.nodes.push(root);
        bvh.subdivide(0, &centroids, &boxes, 0);
        bvh
    }

    fn subdivide(&mut self, node_idx: usize, centroids: &[Point3<f64>], boxes: &[Aabb], depth: usize) {
        let (start, count) = {
            let node = &self.nodes[node_idx];
            (node.left_first as usize, node.count as usize)
        };
        // The traversal stack holds one deferred child per level.
        if count <= LEAF_SIZE || depth + 2 >= STACK_DEPTH {
            return;
        }

        let Some((axis, split_value)) =
            best_split(&self.prims[start..start + count], centroids, boxes, &self.nodes[node_idx].aabb)
        else {
            return; // no beneficial split, keep as leaf
        };

        // In-place partition of the primitive range.
        let range = &mut self.prims[start..start + count];
        let mut left = 0usize;
        let mut right = range.len();
        while left < right {
            if centroids[range[left] as usize][axis] < split_value {
                left += 1;
            } else {
                right -= 1;
                range.swap(left, right);
            }
        }
        if left == 0 || left == count {
            return; // degenerate partition, keep as leaf
        }

        let left_child = self.nodes.len();
        self.nodes.push(Node {
            aabb: bounds_of(&self.prims[start..start + left], boxes),
            left_first: start as u32,
            count: left as u32,
        });
        self.nodes.push(Node {
            aabb: bounds_of(&self.prims[start + left..start + count], boxes),
            left_first: (start + left) as u32,
            count: (count - left) as u32,
        });
        self.nodes[node_idx].left_first = left_child as u32;
        self.nodes[node_idx].count = 0;

        self.subdivide(left_child, centroids, boxes, depth + 1);
        self.subdivide(left_child + 1, centroids, boxes, depth + 1);
    }

    /// Nearest positive intersection along the ray, if any.
    pub fn intersect(&self, ray: &Ray, epsilon: f64) -> Option<f64> {
        if self.nodes.is_empty() {
            return None;
        }
        let mut best = f64::INFINITY;
        let mut stack = [0u32; STACK_DEPTH];
        let mut sp = 0usize;
        if self.nodes[0].aabb.hit(ray, best).is_some() {
            stack[sp] = 0;
            sp += 1;
        }

        while sp > 0 {
            sp -= 1;
            let node = &self.nodes[stack[sp] as usize];
            if node.aabb.hit(ray, best).is_none() {
                continue;
            }
            if node.count > 0 {
                let start = node.left_first as usize;
                for &prim in &self.prims[start..start + node.count as usize] {
                    let tri = &self.tris[prim as usize];
                    if let Some(t) = moller_trumbore(ray, &tri.a, &tri.edge1, &tri.edge2, epsilon)
                    {
                        if t < best {
                            best = t;
                        }
                    }
                }
            } else {
                // Near child on top of the stack.
                let l = node.left_first as usize;
                let hit_l = self.nodes[l].aabb.hit(ray, best);
                let hit_r = self.nodes[l + 1].aabb.hit(ray, best);
                match (hit_l, hit_r) {
                    (Some(tl), Some(tr)) => {
                        let (near, far) = if tl <= tr { (l, l + 1) } else { (l + 1, l) };
                        stack[sp] = far as u32;
                        sp += 1;
                        stack[sp] = near as u32;
                        sp += 1;
                    }
                    (Some(_), None) => {
                        stack[sp] = l as u32;
                        sp += 1;
                    }
                    (None, Some(_)) => {
                        stack[sp] = (l + 1) as u32;
                        sp += 1;
                    }
                    (None, None) => {}
                }
            }
        }

        if best.is_finite() {
            Some(best)
        } else {
            None
        }
    }
}

fn bounds_of(prims: &[u32], boxes: &[Aabb]) -> Aabb {
    let mut bb = Aabb::empty();
    for &p in prims {
        bb.grow(&boxes[p as usize]);
    }
    bb
}

/// Binned SAH split. Returns the axis and centroid threshold, or `None`
/// when splitting would not beat the leaf cost.
fn best_split(
    prims: &[u32],
    centroids: &[Point3<f64>],
    boxes: &[Aabb],
    parent: &Aabb,
) -> Option<(usize, f64)> {
    let count = prims.len();
    let mut best: Option<(f64, usize, f64)> = None;

    for axis in 0..3 {
        let mut c_min = f64::INFINITY;
        let mut c_max = f64::NEG_INFINITY;
        for &p in prims {
            let c = centroids[p as usize][axis];
            c_min = c_min.min(c);
            c_max = c_max.max(c);
        }
        let extent = c_max - c_min;
        if extent < 1e-12 {
            continue;
        }

        let mut bin_bounds = [Aabb::empty(); BINS];
        let mut bin_counts = [0usize; BINS];
        let scale = BINS as f64 / extent;
        for &p in prims {
            let c = centroids[p as usize][axis];
            let b = (((c - c_min) * scale) as usize).min(BINS - 1);
            bin_counts[b] += 1;
            bin_bounds[b].grow(&boxes[p as usize]);
        }

        // Sweep: cost of each of the BINS-1 split planes.
        let mut left_area = [0.0f64; BINS];
        let mut left_count = [0usize; BINS];
        let mut acc = Aabb::empty();
        let mut n = 0usize;
        for i in 0..BINS - 1 {
            acc.grow(&bin_bounds[i]);
            n += bin_counts[i];
            left_area[i] = acc.surface_area();
            left_count[i] = n;
        }
        let mut acc = Aabb::empty();
        let mut n = 0usize;
        for i in (1..BINS).rev() {
            acc.grow(&bin_bounds[i]);
            n += bin_counts[i];
            let nl = left_count[i - 1];
            if nl == 0 || n == 0 {
                continue;
            }
            let cost = left_area[i - 1] * nl as f64 + acc.surface_area() * n as f64;
            if best.map_or(true, |(c, _, _)| cost < c) {
                let split_value = c_min + extent * i as f64 / BINS as f64;
                best = Some((cost, axis, split_value));
            }
        }
    }

    let (cost, axis, split_value) = best?;
    // Compare against the cost of intersecting everything in a leaf.
    let leaf_cost = count as f64 * parent.surface_area();
    if cost >= leaf_cost {
        return None;
    }
    Some((axis, split_value))
}

//! Minimal 3-d kd-tree for nearest-neighbour queries over the scene cloud.
//!
//! The tree borrows the point slice and stores one node per point. Splits
//! follow the widest axis of each range; queries are branch-and-bound with
//! an exact distance budget.

use nalgebra::Point3;

#[derive(Clone, Copy, Debug)]
struct Node {
    point: u32,
    axis: u8,
    left: i32,
    right: i32,
}

pub struct KdTree<'a> {
    points: &'a [Point3<f64>],
    nodes: Vec<Node>,
    root: i32,
}

impl<'a> KdTree<'a> {
    pub fn new(points: &'a [Point3<f64>]) -> Self {
        let mut indices: Vec<u32> = (0..points.len() as u32).collect();
        let mut nodes = Vec::with_capacity(points.len());
        let root = build(points, &mut indices[..], &mut nodes);
        Self {
            points,
            nodes,
            root,
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Nearest point within `max_dist`, as `(index, squared distance)`.
    pub fn nearest_within(&self, query: &Point3<f64>, max_dist: f64) -> Option<(u32, f64)> {
        if self.root < 0 {
            return None;
        }
        let mut best: Option<(u32, f64)> = None;
        let mut budget = max_dist * max_dist;
        self.search_nearest(self.root, query, &mut budget, &mut best);
        best
    }

    fn search_nearest(
        &self,
        node_idx: i32,
        query: &Point3<f64>,
        budget: &mut f64,
        best: &mut Option<(u32, f64)>,
    ) {
        let node = self.nodes[node_idx as usize];
        let p = &self.points[node.point as usize];
        let d2 = (p - query).norm_squared();
        if d2 <= *budget {
            *budget = d2;
            *best = Some((node.point, d2));
        }

        let axis = node.axis as usize;
        let delta = query[axis] - p[axis];
        let (near, far) = if delta < 0.0 {
            (node.left, node.right)
        } else {
            (node.right, node.left)
        };
        if near >= 0 {
            self.search_nearest(near, query, budget, best);
        }
        if far >= 0 && delta * delta <= *budget {
            self.search_nearest(far, query, budget, best);
        }
    }

    /// The `k` nearest points, ascending by squared distance.
    pub fn knn(&self, query: &Point3<f64>, k: usize) -> Vec<(f64, u32)> {
        let mut heap: Vec<(f64, u32)> = Vec::with_capacity(k + 1);
        if self.root >= 0 && k > 0 {
            self.search_knn(self.root, query, k, &mut heap);
        }
        heap
    }

    fn search_knn(&self, node_idx: i32, query: &Point3<f64>, k: usize, heap: &mut Vec<(f64, u32)>) {
        let node = self.nodes[node_idx as usize];
        let p = &self.points[node.point as usize];
        let d2 = (p - query).norm_squared();
        if heap.len() < k || d2 < heap[heap.len() - 1].0 {
            let pos = heap.partition_point(|&(d, _)| d < d2);
            heap.insert(pos, (d2, node.point));
            if heap.len() > k {
                heap.pop();
            }
        }

        let axis = node.axis as usize;
        let delta = query[axis] - p[axis];
        let (near, far) = if delta < 0.0 {
            (node.left, node.right)
        } else {
            (node.right, node.left)
        };
        if near >= 0 {
            self.search_knn(near, query, k, heap);
        }
        let worst = if heap.len() < k {
            f64::INFINITY
        } else {
            heap[heap.len() - 1].0
        };
        if far >= 0 && delta * delta <= worst {
            self.search_knn(far, query, k, heap);
        }
    }
}

fn build(points: &[Point3<f64>], indices: &mut [u32], nodes: &mut Vec<Node>) -> i32 {
    if indices.is_empty() {
        return -1;
    }
    let axis = widest_axis(points, indices);
    let mid = indices.len() / 2;
    indices.select_nth_unstable_by(mid, |&a, &b| {
        points[a as usize][axis].total_cmp(&points[b as usize][axis])
    });
    let point = indices[mid];

    let slot = nodes.len();
    nodes.push(Node {
        point,
        axis: axis as u8,
        left: -1,
        right: -1,
    });
    let (lo, rest) = indices.split_at_mut(mid);
    let hi = &mut rest[1..];
    let left = build(points, lo, nodes);
    let right = build(points, hi, nodes);
    nodes[slot].left = left;
    nodes[slot].right = right;
    slot as i32
}

fn widest_axis(points: &[Point3<f64>], indices: &[u32]) -> usize {
    let mut lo = [f64::INFINITY; 3];
    let mut hi = [f64::NEG_INFINITY; 3];
    for &i in indices {
        let p = &points[i as usize];
        for k in 0..3 {
            lo[k] = lo[k].min(p[k]);
            hi[k] = hi[k].max(p[k]);
        }
    }
    let mut axis = 0;
    let mut best = hi[0] - lo[0];
    for k in 1..3 {
        let extent = hi[k] - lo[k];
        if extent > best {
            best = extent;
            axis = k;
        }
    }
    axis
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pseudo_cloud(n: usize) -> Vec<Point3<f64>> {
        // Deterministic xorshift so the test never depends on a RNG crate.
        let mut state = 0x2545f4914f6cdd1du64;
        let mut next = move || {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            (state >> 11) as f64 / (1u64 << 53) as f64
        };
        (0..n)
            .map(|_| Point3::new(next() * 200.0 - 100.0, next() * 200.0 - 100.0, next() * 100.0))
            .collect()
    }

    fn brute_nearest(points: &[Point3<f64>], q: &Point3<f64>) -> (usize, f64) {
        let mut best = (0usize, f64::INFINITY);
        for (i, p) in points.iter().enumerate() {
            let d2 = (p - q).norm_squared();
            if d2 < best.1 {
                best = (i, d2);
            }
        }
        best
    }

    #[test]
    fn nearest_matches_brute_force() {
        let cloud = pseudo_cloud(500);
        let tree = KdTree::new(&cloud);
        let queries = pseudo_cloud(50);
        for q in &queries {
            let (bi, bd2) = brute_nearest(&cloud, q);
            let hit = tree.nearest_within(q, 1e6).expect("a neighbour exists");
            assert!(
                (hit.1 - bd2).abs() < 1e-9,
                "tree {:?} vs brute ({}, {})",
                hit,
                bi,
                bd2
            );
        }
    }

    #[test]
    fn nearest_respects_radius() {
        let cloud = vec![Point3::new(0.0, 0.0, 0.0), Point3::new(10.0, 0.0, 0.0)];
        let tree = KdTree::new(&cloud);
        assert!(tree.nearest_within(&Point3::new(4.0, 0.0, 0.0), 3.0).is_none());
        let hit = tree
            .nearest_within(&Point3::new(4.0, 0.0, 0.0), 5.0)
            .expect("in range");
        assert_eq!(hit.0, 0);
    }

    #[test]
    fn knn_returns_sorted_neighbours() {
        let cloud = pseudo_cloud(300);
        let tree = KdTree::new(&cloud);
        let q = Point3::new(5.0, -3.0, 40.0);
        let got = tree.knn(&q, 8);
        assert_eq!(got.len(), 8);
        for w in got.windows(2) {
            assert!(w[0].0 <= w[1].0);
        }
        let mut brute: Vec<f64> = cloud.iter().map(|p| (p - q).norm_squared()).collect();
        brute.sort_by(|a, b| a.total_cmp(b));
        for (i, &(d2, _)) in got.iter().enumerate() {
            assert!((d2 - brute[i]).abs() < 1e-9);
        }
    }
}

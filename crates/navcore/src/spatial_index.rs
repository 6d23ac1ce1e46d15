// spatial_index.rs - flattened 2D bounding volume tree over a triangle soup
//
// Nodes live in one Vec in depth-first order (parent before children). A leaf
// stores the offset/count of its triangles in the reordered triangle array; an
// internal node stores the negated size of its subtree, so a query that
// misses a node skips the whole subtree with one index jump.

use std::cmp::Ordering;

/// One node of the flattened tree.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct IndexNode {
    pub bmin: [f32; 2],
    pub bmax: [f32; 2],
    /// Leaf: first triangle offset (>= 0). Internal: negative escape count.
    pub i: i32,
    /// Leaf: number of triangles. Internal: 0.
    pub n: i32,
}

impl IndexNode {
    pub fn is_leaf(&self) -> bool {
        self.i >= 0
    }

    /// Number of nodes to advance to skip this node and its subtree
    pub fn escape(&self) -> usize {
        if self.is_leaf() { 1 } else { (-self.i) as usize }
    }
}

#[derive(Clone, Copy)]
struct BoundsItem {
    bmin: [f32; 2],
    bmax: [f32; 2],
    tri: usize,
}

/// Spatial index over the XZ projection of a triangle soup.
#[derive(Clone, Debug, Default)]
pub struct TriangleIndex {
    nodes: Vec<IndexNode>,
    /// Triangle vertex indices reordered so every leaf's triangles are contiguous
    tris: Vec<i32>,
    /// Original triangle index for each reordered triangle
    tri_ids: Vec<usize>,
    max_tris_per_leaf: usize,
}

fn calc_extents(items: &[BoundsItem]) -> ([f32; 2], [f32; 2]) {
    let mut bmin = [f32::MAX, f32::MAX];
    let mut bmax = [f32::MIN, f32::MIN];
    for it in items {
        bmin[0] = bmin[0].min(it.bmin[0]);
        bmin[1] = bmin[1].min(it.bmin[1]);
        bmax[0] = bmax[0].max(it.bmax[0]);
        bmax[1] = bmax[1].max(it.bmax[1]);
    }
    (bmin, bmax)
}

fn check_overlap_rect(amin: &[f32; 2], amax: &[f32; 2], bmin: &[f32; 2], bmax: &[f32; 2]) -> bool {
    !(amin[0] > bmax[0] || amax[0] < bmin[0] || amin[1] > bmax[1] || amax[1] < bmin[1])
}

/// Slab test of segment p..q against a 2D box
fn check_overlap_segment(p: &[f32; 2], q: &[f32; 2], bmin: &[f32; 2], bmax: &[f32; 2]) -> bool {
    const EPSILON: f32 = 1e-6;

    let mut tmin = 0.0f32;
    let mut tmax = 1.0f32;
    let d = [q[0] - p[0], q[1] - p[1]];

    for i in 0..2 {
        if d[i].abs() < EPSILON {
            // Ray is parallel to slab. No hit if origin not within slab
            if p[i] < bmin[i] || p[i] > bmax[i] {
                return false;
            }
        } else {
            let ood = 1.0 / d[i];
            let mut t1 = (bmin[i] - p[i]) * ood;
            let mut t2 = (bmax[i] - p[i]) * ood;
            if t1 > t2 {
                std::mem::swap(&mut t1, &mut t2);
            }
            tmin = tmin.max(t1);
            tmax = tmax.min(t2);
            if tmin > tmax {
                return false;
            }
        }
    }
    true
}

impl TriangleIndex {
    /// Build the index. `verts` holds 3 floats per vertex, `tris` 3 indices per
    /// triangle. Returns `None` when storage for the tree can't be reserved or
    /// a triangle references a vertex that doesn't exist.
    pub fn build(verts: &[f32], tris: &[i32], tris_per_leaf: usize) -> Option<Self> {
        let ntris = tris.len() / 3;
        let tris_per_leaf = tris_per_leaf.max(1);
        let nverts = verts.len() / 3;

        let mut items: Vec<BoundsItem> = Vec::new();
        items.try_reserve_exact(ntris).ok()?;

        for t in 0..ntris {
            let tri = &tris[t * 3..t * 3 + 3];
            let mut it = BoundsItem {
                bmin: [f32::MAX, f32::MAX],
                bmax: [f32::MIN, f32::MIN],
                tri: t,
            };
            for &vi in tri {
                if vi < 0 || vi as usize >= nverts {
                    return None;
                }
                let v = &verts[vi as usize * 3..vi as usize * 3 + 3];
                it.bmin[0] = it.bmin[0].min(v[0]);
                it.bmin[1] = it.bmin[1].min(v[2]);
                it.bmax[0] = it.bmax[0].max(v[0]);
                it.bmax[1] = it.bmax[1].max(v[2]);
            }
            items.push(it);
        }

        let nchunks = ntris.div_ceil(tris_per_leaf);
        let max_nodes = (nchunks * 4).max(1);

        let mut index = TriangleIndex::default();
        index.nodes.try_reserve_exact(max_nodes).ok()?;
        index.tris.try_reserve_exact(ntris * 3).ok()?;
        index.tri_ids.try_reserve_exact(ntris).ok()?;

        if ntris == 0 {
            return Some(index);
        }

        index.subdivide(&mut items, tris, tris_per_leaf);

        index.max_tris_per_leaf = index
            .nodes
            .iter()
            .filter(|n| n.is_leaf())
            .map(|n| n.n as usize)
            .max()
            .unwrap_or(0);

        Some(index)
    }

    fn subdivide(&mut self, items: &mut [BoundsItem], in_tris: &[i32], tris_per_leaf: usize) {
        let icur = self.nodes.len();
        let (bmin, bmax) = calc_extents(items);
        self.nodes.push(IndexNode { bmin, bmax, i: 0, n: 0 });

        if items.len() <= tris_per_leaf {
            // Leaf
            let first = self.tri_ids.len();
            for it in items.iter() {
                self.tris.extend_from_slice(&in_tris[it.tri * 3..it.tri * 3 + 3]);
                self.tri_ids.push(it.tri);
            }
            let node = &mut self.nodes[icur];
            node.i = first as i32;
            node.n = items.len() as i32;
            return;
        }

        // Split along the longer axis at the median
        let axis = if bmax[0] - bmin[0] >= bmax[1] - bmin[1] { 0 } else { 1 };
        items.sort_by(|a, b| a.bmin[axis].partial_cmp(&b.bmin[axis]).unwrap_or(Ordering::Equal));

        let isplit = items.len() / 2;
        let (left, right) = items.split_at_mut(isplit);
        self.subdivide(left, in_tris, tris_per_leaf);
        self.subdivide(right, in_tris, tris_per_leaf);

        let iescape = self.nodes.len() - icur;
        self.nodes[icur].i = -(iescape as i32);
    }

    pub fn nodes(&self) -> &[IndexNode] {
        &self.nodes
    }

    pub fn max_tris_per_leaf(&self) -> usize {
        self.max_tris_per_leaf
    }

    pub fn triangle_count(&self) -> usize {
        self.tri_ids.len()
    }

    /// Vertex indices of the triangles stored in a leaf (3 per triangle)
    pub fn leaf_triangles(&self, node: usize) -> &[i32] {
        match self.nodes.get(node) {
            Some(n) if n.is_leaf() => {
                let start = n.i as usize * 3;
                &self.tris[start..start + n.n as usize * 3]
            }
            _ => &[],
        }
    }

    /// Original triangle ids stored in a leaf
    pub fn leaf_triangle_ids(&self, node: usize) -> &[usize] {
        match self.nodes.get(node) {
            Some(n) if n.is_leaf() => &self.tri_ids[n.i as usize..(n.i + n.n) as usize],
            _ => &[],
        }
    }

    /// Collect leaves whose bounds overlap the rectangle. Writes at most
    /// `out.len()` node ids and returns the number written.
    pub fn query_rect(&self, bmin: [f32; 2], bmax: [f32; 2], out: &mut [usize]) -> usize {
        self.walk(out, |node| check_overlap_rect(&bmin, &bmax, &node.bmin, &node.bmax))
    }

    /// Collect leaves whose bounds overlap the XZ segment p..q.
    pub fn query_segment(&self, p: [f32; 2], q: [f32; 2], out: &mut [usize]) -> usize {
        self.walk(out, |node| check_overlap_segment(&p, &q, &node.bmin, &node.bmax))
    }

    fn walk<F: Fn(&IndexNode) -> bool>(&self, out: &mut [usize], overlaps: F) -> usize {
        let mut i = 0;
        let mut n = 0;
        while i < self.nodes.len() {
            let node = &self.nodes[i];
            let overlap = overlaps(node);

            if node.is_leaf() && overlap {
                if n < out.len() {
                    out[n] = i;
                    n += 1;
                }
            }

            if overlap || node.is_leaf() {
                i += 1;
            } else {
                i += node.escape();
            }
        }
        n
    }
}

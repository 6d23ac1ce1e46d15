// poly_mesh.rs - convex polygon mesh from the partitioned heightfield
//
// Each region is covered by axis aligned rectangles of spans, walking the
// span connections so stacked floors stay apart. Rectangle sides are capped
// by the max edge length. Shared corners are welded when their heights are
// within two cells.

use std::collections::HashMap;

use tracing::debug;

use crate::math::Vec3;
use crate::settings::VoxelConfig;

use super::compact::CompactHeightfield;
use super::contour::ContourSet;
use super::EngineError;

/// Max vertical distance (in cells) for two corners to share a vertex
const WELD_HEIGHT: i32 = 2;

#[derive(Clone, Debug, Default)]
pub struct PolyMesh {
    /// Grid coordinates (x, y, z); y in cell-height units
    pub verts: Vec<[u16; 3]>,
    pub polys: Vec<Vec<u16>>,
    pub regs: Vec<u16>,
    pub areas: Vec<u8>,
    pub flags: Vec<u16>,
    pub nvp: usize,
    pub bmin: Vec3,
    pub bmax: Vec3,
    pub cs: f32,
    pub ch: f32,
}

impl PolyMesh {
    pub fn poly_count(&self) -> usize {
        self.polys.len()
    }

    /// World position of vertex `i`
    pub fn world_vert(&self, i: usize) -> Vec3 {
        let v = self.verts[i];
        [
            self.bmin[0] + v[0] as f32 * self.cs,
            self.bmin[1] + v[1] as f32 * self.ch,
            self.bmin[2] + v[2] as f32 * self.cs,
        ]
    }
}

#[derive(Default)]
struct VertexWelder {
    verts: Vec<[u16; 3]>,
    by_column: HashMap<(u16, u16), Vec<u16>>,
}

impl VertexWelder {
    fn add(&mut self, x: i32, y: i32, z: i32) -> Result<u16, EngineError> {
        let key = (x as u16, z as u16);
        let column = self.by_column.entry(key).or_default();
        if let Some(&idx) = column
            .iter()
            .find(|&&idx| (self.verts[idx as usize][1] as i32 - y).abs() <= WELD_HEIGHT)
        {
            return Ok(idx);
        }
        let idx = u16::try_from(self.verts.len())
            .ok()
            .filter(|&i| i != u16::MAX)
            .ok_or_else(|| EngineError::Engine("too many polygon mesh vertices".to_string()))?;
        self.verts.push([x as u16, y.clamp(0, 0xffff) as u16, z as u16]);
        column.push(idx);
        Ok(idx)
    }
}

pub fn build_poly_mesh(cfg: &VoxelConfig, cset: &ContourSet, chf: &CompactHeightfield) -> Result<PolyMesh, EngineError> {
    let nvp = cfg.max_verts_per_poly;
    if nvp < 3 {
        return Err(EngineError::InvalidInput);
    }
    let max_len = if cfg.max_edge_len > 0 { cfg.max_edge_len } else { i32::MAX };

    let mut mesh = PolyMesh {
        nvp: nvp as usize,
        bmin: chf.bmin,
        bmax: chf.bmax,
        cs: chf.cs,
        ch: chf.ch,
        ..Default::default()
    };
    let mut welder = VertexWelder::default();
    let mut covered = vec![false; chf.span_count()];

    for z in 0..chf.height {
        for x in 0..chf.width {
            let c = chf.cell(x, z);
            for i in c.index as usize..(c.index + c.count) as usize {
                let reg = chf.spans[i].reg;
                if covered[i] || reg == 0 || !cset.has_region(reg) {
                    continue;
                }
                let rect = grow_rect(chf, &mut covered, x, z, i, max_len);
                let corners = rect.corners(chf);

                let mut idx = [0u16; 4];
                for (k, (cx, cy, cz)) in corners.iter().enumerate() {
                    idx[k] = welder.add(*cx, *cy, *cz)?;
                }
                let polys: Vec<Vec<u16>> = if nvp < 4 {
                    vec![vec![idx[0], idx[1], idx[2]], vec![idx[0], idx[2], idx[3]]]
                } else {
                    vec![idx.to_vec()]
                };
                for p in polys {
                    mesh.polys.push(p);
                    mesh.regs.push(reg);
                    mesh.areas.push(chf.areas[i]);
                    mesh.flags.push(0);
                }
            }
        }
    }

    mesh.verts = welder.verts;
    debug!("Polygon mesh: {} polys, {} verts", mesh.polys.len(), mesh.verts.len());
    Ok(mesh)
}

/// Rectangle of spans: `rows[r][c]` is the span at cell (x0 + c, z0 + r)
struct SpanRect {
    x0: i32,
    z0: i32,
    rows: Vec<Vec<usize>>,
}

impl SpanRect {
    /// Corner positions in grid units, ordered (x0,z0) (x0,z1) (x1,z1) (x1,z0)
    fn corners(&self, chf: &CompactHeightfield) -> [(i32, i32, i32); 4] {
        let w = self.rows[0].len();
        let h = self.rows.len();
        let x1 = self.x0 + w as i32;
        let z1 = self.z0 + h as i32;
        let y = |r: usize, c: usize| chf.spans[self.rows[r][c]].y as i32;
        [
            (self.x0, y(0, 0), self.z0),
            (self.x0, y(h - 1, 0), z1),
            (x1, y(h - 1, w - 1), z1),
            (x1, y(0, w - 1), self.z0),
        ]
    }
}

fn grow_rect(chf: &CompactHeightfield, covered: &mut [bool], x: i32, z: i32, i: usize, max_len: i32) -> SpanRect {
    let reg = chf.spans[i].reg;
    let area = chf.areas[i];
    let joins = |from: usize, fx: i32, fz: i32, dir: usize, covered: &[bool]| -> Option<usize> {
        let ni = chf.neighbour(fx, fz, from, dir)?;
        (!covered[ni] && chf.spans[ni].reg == reg && chf.areas[ni] == area).then_some(ni)
    };

    // First row along +x
    let mut first = vec![i];
    covered[i] = true;
    while (first.len() as i32) < max_len {
        let last = first[first.len() - 1];
        let lx = x + first.len() as i32 - 1;
        let Some(ni) = joins(last, lx, z, 2, &*covered) else { break };
        covered[ni] = true;
        first.push(ni);
    }
    let width = first.len();
    let mut rows = vec![first];

    // Extend along +z while a full row of matching spans is available
    while (rows.len() as i32) < max_len {
        let prev = &rows[rows.len() - 1];
        let pz = z + rows.len() as i32 - 1;
        let mut next = Vec::with_capacity(width);
        for (c, &pi) in prev.iter().enumerate() {
            let Some(ni) = joins(pi, x + c as i32, pz, 1, &*covered) else { break };
            // the new row must itself be connected along +x
            if let Some(&left) = next.last()
                && chf.neighbour(x + c as i32 - 1, pz + 1, left, 2) != Some(ni)
            {
                break;
            }
            next.push(ni);
        }
        if next.len() != width {
            break;
        }
        for &ni in &next {
            covered[ni] = true;
        }
        rows.push(next);
    }

    SpanRect { x0: x, z0: z, rows }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recast::contour::build_contours;
    use crate::recast::heightfield::Heightfield;
    use crate::recast::region::build_regions;
    use crate::recast::RC_WALKABLE_AREA;
    use crate::settings::{BuildSettings, PartitionType};

    fn setup(w: i32, h: i32, mask: impl Fn(i32, i32) -> bool) -> (VoxelConfig, CompactHeightfield, ContourSet) {
        let mut hf = Heightfield::new(w, h, [0.0; 3], [w as f32, 1.0, h as f32], 1.0, 0.1).unwrap();
        for z in 0..h {
            for x in 0..w {
                if mask(x, z) {
                    hf.add_span(x, z, 0, 1, RC_WALKABLE_AREA, 1);
                }
            }
        }
        let mut chf = CompactHeightfield::build(2, 1, &hf).unwrap();
        build_regions(&mut chf, PartitionType::Watershed, 0, 1000).unwrap();
        let cset = build_contours(&chf, 1.3).unwrap();
        let cfg = BuildSettings { cell_size: 1.0, cell_height: 0.1, ..Default::default() }
            .to_voxel_config(&[0.0; 3], &[w as f32, 1.0, h as f32]);
        (cfg, chf, cset)
    }

    #[test]
    fn test_square_region_is_one_quad() {
        let (cfg, chf, cset) = setup(10, 10, |_, _| true);
        let mesh = build_poly_mesh(&cfg, &cset, &chf).unwrap();
        assert_eq!(mesh.poly_count(), 1);
        assert_eq!(mesh.verts.len(), 4);
        let p = &mesh.polys[0];
        let corners: Vec<[u16; 3]> = p.iter().map(|&v| mesh.verts[v as usize]).collect();
        assert_eq!(corners, vec![[0, 1, 0], [0, 1, 10], [10, 1, 10], [10, 1, 0]]);
        assert_eq!(mesh.areas[0], RC_WALKABLE_AREA);
    }

    #[test]
    fn test_max_edge_len_splits_rectangles() {
        let (mut cfg, chf, cset) = setup(10, 10, |_, _| true);
        cfg.max_edge_len = 5;
        let mesh = build_poly_mesh(&cfg, &cset, &chf).unwrap();
        assert_eq!(mesh.poly_count(), 4);
        // shared corners are welded: 3x3 grid of vertices
        assert_eq!(mesh.verts.len(), 9);
    }

    #[test]
    fn test_triangles_when_few_verts_per_poly() {
        let (mut cfg, chf, cset) = setup(4, 4, |_, _| true);
        cfg.max_verts_per_poly = 3;
        let mesh = build_poly_mesh(&cfg, &cset, &chf).unwrap();
        assert_eq!(mesh.poly_count(), 2);
        assert!(mesh.polys.iter().all(|p| p.len() == 3));
    }

    #[test]
    fn test_invalid_verts_per_poly() {
        let (mut cfg, chf, cset) = setup(4, 4, |_, _| true);
        cfg.max_verts_per_poly = 2;
        assert!(matches!(build_poly_mesh(&cfg, &cset, &chf), Err(EngineError::InvalidInput)));
    }

    #[test]
    fn test_l_shape_covered() {
        let (cfg, chf, cset) = setup(6, 6, |x, z| x < 2 || z < 2);
        let mesh = build_poly_mesh(&cfg, &cset, &chf).unwrap();
        assert!(mesh.poly_count() >= 2);
        let cells: i32 = mesh
            .polys
            .iter()
            .map(|p| {
                let a = mesh.verts[p[0] as usize];
                let c = mesh.verts[p[2] as usize];
                (c[0] as i32 - a[0] as i32) * (c[2] as i32 - a[2] as i32)
            })
            .sum();
        assert_eq!(cells, 6 * 6 - 4 * 4);
    }
}

// compact.rs - open-space (compact) heightfield with 4-neighbour connections
//
// Only walkable spans survive compaction. A span stores the floor height,
// the free height above it and, per direction, the index of the connected
// span inside the neighbour cell.

use tracing::warn;

use crate::geometry::ConvexVolume;
use crate::math::{point_in_poly, Vec3};

use super::heightfield::{Heightfield, DIR_OFFSET_X, DIR_OFFSET_Z};
use super::{EngineError, RC_NULL_AREA};

pub const NOT_CONNECTED: u8 = 0xff;
/// Max spans stacked in one cell that can still be addressed by a connection
const MAX_LAYERS: usize = NOT_CONNECTED as usize - 1;
const MAX_HEIGHT: i32 = 0xffff;

#[derive(Clone, Copy, Debug, Default)]
pub struct CompactCell {
    pub index: u32,
    pub count: u32,
}

#[derive(Clone, Copy, Debug)]
pub struct CompactSpan {
    /// Floor height (top of the solid span below)
    pub y: u16,
    /// Free space above the floor
    pub h: u16,
    /// Region id, 0 when unassigned
    pub reg: u16,
    con: [u8; 4],
}

impl CompactSpan {
    pub fn con(&self, dir: usize) -> Option<usize> {
        let c = self.con[dir];
        (c != NOT_CONNECTED).then_some(c as usize)
    }
}

#[derive(Clone, Debug)]
pub struct CompactHeightfield {
    pub width: i32,
    pub height: i32,
    pub walkable_height: i32,
    pub walkable_climb: i32,
    pub max_distance: u16,
    pub max_regions: u16,
    pub bmin: Vec3,
    pub bmax: Vec3,
    pub cs: f32,
    pub ch: f32,
    pub cells: Vec<CompactCell>,
    pub spans: Vec<CompactSpan>,
    /// Distance to the nearest boundary, filled by `build_distance_field`
    pub dist: Vec<u16>,
    pub areas: Vec<u8>,
}

impl CompactHeightfield {
    pub fn build(walkable_height: i32, walkable_climb: i32, hf: &Heightfield) -> Result<Self, EngineError> {
        let w = hf.width;
        let h = hf.height;
        let span_count = (0..h)
            .flat_map(|z| (0..w).map(move |x| (x, z)))
            .map(|(x, z)| hf.column(x, z).iter().filter(|s| s.area != RC_NULL_AREA).count())
            .sum::<usize>();

        let ncells = (w as usize) * (h as usize);
        let mut cells = Vec::new();
        let mut spans = Vec::new();
        let mut areas = Vec::new();
        cells.try_reserve_exact(ncells).map_err(|_| EngineError::OutOfMemory)?;
        spans.try_reserve_exact(span_count).map_err(|_| EngineError::OutOfMemory)?;
        areas.try_reserve_exact(span_count).map_err(|_| EngineError::OutOfMemory)?;

        for z in 0..h {
            for x in 0..w {
                let column = hf.column(x, z);
                let index = spans.len() as u32;
                for (si, s) in column.iter().enumerate() {
                    if s.area == RC_NULL_AREA {
                        continue;
                    }
                    let bot = s.smax as i32;
                    let top = column.get(si + 1).map_or(MAX_HEIGHT, |n| n.smin as i32);
                    spans.push(CompactSpan {
                        y: bot.clamp(0, 0xffff) as u16,
                        h: (top - bot).clamp(0, 0xff) as u16,
                        reg: 0,
                        con: [NOT_CONNECTED; 4],
                    });
                    areas.push(s.area);
                }
                cells.push(CompactCell { index, count: spans.len() as u32 - index });
            }
        }

        let mut chf = CompactHeightfield {
            width: w,
            height: h,
            walkable_height,
            walkable_climb,
            max_distance: 0,
            max_regions: 0,
            bmin: hf.bmin,
            bmax: [hf.bmax[0], hf.bmax[1] + walkable_height as f32 * hf.ch, hf.bmax[2]],
            cs: hf.cs,
            ch: hf.ch,
            cells,
            spans,
            dist: Vec::new(),
            areas,
        };
        chf.connect(walkable_height, walkable_climb);
        Ok(chf)
    }

    fn connect(&mut self, walkable_height: i32, walkable_climb: i32) {
        let mut too_high_neighbour = 0usize;
        for z in 0..self.height {
            for x in 0..self.width {
                let c = self.cell(x, z);
                for i in c.index as usize..(c.index + c.count) as usize {
                    for dir in 0..4 {
                        let nx = x + DIR_OFFSET_X[dir];
                        let nz = z + DIR_OFFSET_Z[dir];
                        if nx < 0 || nz < 0 || nx >= self.width || nz >= self.height {
                            continue;
                        }
                        let s = self.spans[i];
                        let nc = self.cell(nx, nz);
                        for k in nc.index as usize..(nc.index + nc.count) as usize {
                            let ns = &self.spans[k];
                            let bot = (s.y as i32).max(ns.y as i32);
                            let top = (s.y as i32 + s.h as i32).min(ns.y as i32 + ns.h as i32);
                            // Connected when there is enough room and the step is climbable
                            if top - bot >= walkable_height && (ns.y as i32 - s.y as i32).abs() <= walkable_climb {
                                let layer = k - nc.index as usize;
                                if layer >= MAX_LAYERS {
                                    too_high_neighbour = too_high_neighbour.max(layer);
                                    continue;
                                }
                                self.spans[i].con[dir] = layer as u8;
                                break;
                            }
                        }
                    }
                }
            }
        }
        if too_high_neighbour > 0 {
            warn!(
                "Heightfield has too many layers {} (max: {})",
                too_high_neighbour, MAX_LAYERS
            );
        }
    }

    pub fn cell(&self, x: i32, z: i32) -> CompactCell {
        self.cells[(x + z * self.width) as usize]
    }

    pub fn span_count(&self) -> usize {
        self.spans.len()
    }

    /// Index of the span connected to span `i` (in cell x,z) in direction `dir`
    pub fn neighbour(&self, x: i32, z: i32, i: usize, dir: usize) -> Option<usize> {
        let con = self.spans[i].con(dir)?;
        let nc = self.cell(x + DIR_OFFSET_X[dir], z + DIR_OFFSET_Z[dir]);
        Some(nc.index as usize + con)
    }

    /// Visit every span with its cell coordinates
    pub fn for_each_span(&self, mut f: impl FnMut(i32, i32, usize)) {
        for z in 0..self.height {
            for x in 0..self.width {
                let c = self.cell(x, z);
                for i in c.index as usize..(c.index + c.count) as usize {
                    f(x, z, i);
                }
            }
        }
    }

    /// Chamfer distance (straight step 2, diagonal 3) from boundary spans;
    /// a span is on the boundary when `is_boundary` says so.
    fn chamfer_distance(&self, is_boundary: impl Fn(i32, i32, usize) -> bool) -> Vec<u16> {
        let mut dist = vec![0xffffu16; self.spans.len()];
        self.for_each_span(|x, z, i| {
            if is_boundary(x, z, i) {
                dist[i] = 0;
            }
        });

        // Pass 1: (-x) and (-z) neighbours
        for z in 0..self.height {
            for x in 0..self.width {
                let c = self.cell(x, z);
                for i in c.index as usize..(c.index + c.count) as usize {
                    if let Some(ai) = self.neighbour(x, z, i, 0) {
                        dist[i] = dist[i].min(dist[ai].saturating_add(2));
                        if let Some(aai) = self.neighbour(x - 1, z, ai, 3) {
                            dist[i] = dist[i].min(dist[aai].saturating_add(3));
                        }
                    }
                    if let Some(ai) = self.neighbour(x, z, i, 3) {
                        dist[i] = dist[i].min(dist[ai].saturating_add(2));
                        if let Some(aai) = self.neighbour(x, z - 1, ai, 2) {
                            dist[i] = dist[i].min(dist[aai].saturating_add(3));
                        }
                    }
                }
            }
        }

        // Pass 2: (+x) and (+z) neighbours
        for z in (0..self.height).rev() {
            for x in (0..self.width).rev() {
                let c = self.cell(x, z);
                for i in c.index as usize..(c.index + c.count) as usize {
                    if let Some(ai) = self.neighbour(x, z, i, 2) {
                        dist[i] = dist[i].min(dist[ai].saturating_add(2));
                        if let Some(aai) = self.neighbour(x + 1, z, ai, 1) {
                            dist[i] = dist[i].min(dist[aai].saturating_add(3));
                        }
                    }
                    if let Some(ai) = self.neighbour(x, z, i, 1) {
                        dist[i] = dist[i].min(dist[ai].saturating_add(2));
                        if let Some(aai) = self.neighbour(x, z + 1, ai, 0) {
                            dist[i] = dist[i].min(dist[aai].saturating_add(3));
                        }
                    }
                }
            }
        }
        dist
    }

    /// Remove walkable spans closer than `radius` cells to an obstacle or edge
    pub fn erode_walkable_area(&mut self, radius: i32) {
        let dist = self.chamfer_distance(|x, z, i| {
            if self.areas[i] == RC_NULL_AREA {
                return true;
            }
            (0..4).any(|dir| match self.neighbour(x, z, i, dir) {
                Some(ni) => self.areas[ni] == RC_NULL_AREA,
                None => true,
            })
        });

        let thr = (radius * 2).clamp(0, 0xffff) as u16;
        for (i, d) in dist.iter().enumerate() {
            if *d < thr {
                self.areas[i] = RC_NULL_AREA;
            }
        }
    }

    /// Distance field used by the watershed partition. Boundaries are missing
    /// neighbours and area changes.
    pub fn build_distance_field(&mut self) {
        let dist = self.chamfer_distance(|x, z, i| {
            let area = self.areas[i];
            (0..4).any(|dir| match self.neighbour(x, z, i, dir) {
                Some(ni) => self.areas[ni] != area,
                None => true,
            })
        });
        self.max_distance = dist
            .iter()
            .enumerate()
            .filter(|(i, _)| self.areas[*i] != RC_NULL_AREA)
            .map(|(_, d)| *d)
            .max()
            .unwrap_or(0);
        self.dist = dist;
    }

    /// Retag spans inside a convex volume footprint and height range
    pub fn mark_convex_poly_area(&mut self, volume: &ConvexVolume) {
        let Some(first) = volume.verts.first() else { return };
        let mut bmin = *first;
        let mut bmax = *first;
        for v in &volume.verts[1..] {
            for k in 0..3 {
                bmin[k] = bmin[k].min(v[k]);
                bmax[k] = bmax[k].max(v[k]);
            }
        }
        bmin[1] = volume.hmin;
        bmax[1] = volume.hmax;

        let minx = (((bmin[0] - self.bmin[0]) / self.cs) as i32).max(0);
        let maxx = (((bmax[0] - self.bmin[0]) / self.cs) as i32).min(self.width - 1);
        let minz = (((bmin[2] - self.bmin[2]) / self.cs) as i32).max(0);
        let maxz = (((bmax[2] - self.bmin[2]) / self.cs) as i32).min(self.height - 1);
        let miny = ((bmin[1] - self.bmin[1]) / self.ch) as i32;
        let maxy = ((bmax[1] - self.bmin[1]) / self.ch) as i32;

        if maxx < 0 || minx >= self.width || maxz < 0 || minz >= self.height {
            return;
        }

        for z in minz..=maxz {
            for x in minx..=maxx {
                let c = self.cell(x, z);
                for i in c.index as usize..(c.index + c.count) as usize {
                    if self.areas[i] == RC_NULL_AREA {
                        continue;
                    }
                    let y = self.spans[i].y as i32;
                    if y >= miny && y <= maxy {
                        let p = [
                            self.bmin[0] + (x as f32 + 0.5) * self.cs,
                            0.0,
                            self.bmin[2] + (z as f32 + 0.5) * self.cs,
                        ];
                        if point_in_poly(&volume.verts, &p) {
                            self.areas[i] = volume.area;
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recast::RC_WALKABLE_AREA;

    fn flat(w: i32, h: i32) -> Heightfield {
        let mut hf = Heightfield::new(w, h, [0.0; 3], [w as f32, 1.0, h as f32], 1.0, 0.1).unwrap();
        for z in 0..h {
            for x in 0..w {
                hf.add_span(x, z, 0, 1, RC_WALKABLE_AREA, 1);
            }
        }
        hf
    }

    #[test]
    fn test_connections() {
        let chf = CompactHeightfield::build(2, 1, &flat(3, 3)).unwrap();
        assert_eq!(chf.span_count(), 9);
        let center = chf.cell(1, 1).index as usize;
        for dir in 0..4 {
            assert!(chf.neighbour(1, 1, center, dir).is_some());
        }
        let corner = chf.cell(0, 0).index as usize;
        assert!(chf.neighbour(0, 0, corner, 0).is_none());
        assert!(chf.neighbour(0, 0, corner, 3).is_none());
        assert_eq!(chf.neighbour(0, 0, corner, 2), Some(chf.cell(1, 0).index as usize));
    }

    #[test]
    fn test_step_too_high_not_connected() {
        let mut hf = Heightfield::new(2, 1, [0.0; 3], [2.0, 2.0, 1.0], 1.0, 0.1).unwrap();
        hf.add_span(0, 0, 0, 1, RC_WALKABLE_AREA, 1);
        hf.add_span(1, 0, 0, 8, RC_WALKABLE_AREA, 1);
        let chf = CompactHeightfield::build(2, 3, &hf).unwrap();
        assert!(chf.neighbour(0, 0, 0, 2).is_none());
    }

    #[test]
    fn test_erode() {
        let mut chf = CompactHeightfield::build(2, 1, &flat(9, 9)).unwrap();
        chf.erode_walkable_area(2);
        let walkable = |x: i32, z: i32| chf.areas[chf.cell(x, z).index as usize] != RC_NULL_AREA;
        assert!(!walkable(0, 4));
        assert!(!walkable(1, 4));
        assert!(walkable(2, 4));
        assert!(walkable(4, 4));
        assert!(!walkable(7, 4));
    }

    #[test]
    fn test_distance_field_peak_in_center() {
        let mut chf = CompactHeightfield::build(2, 1, &flat(7, 7)).unwrap();
        chf.build_distance_field();
        let center = chf.cell(3, 3).index as usize;
        assert_eq!(chf.dist[center], chf.max_distance);
        assert_eq!(chf.dist[chf.cell(0, 3).index as usize], 0);
        assert_eq!(chf.max_distance, 6);
    }

    #[test]
    fn test_mark_convex_area() {
        let mut chf = CompactHeightfield::build(2, 1, &flat(6, 6)).unwrap();
        let vol = ConvexVolume {
            verts: vec![[0.0, 0.0, 0.0], [0.0, 0.0, 3.0], [3.0, 0.0, 3.0], [3.0, 0.0, 0.0]],
            hmin: -1.0,
            hmax: 1.0,
            area: 1,
        };
        chf.mark_convex_poly_area(&vol);
        assert_eq!(chf.areas[chf.cell(1, 1).index as usize], 1);
        assert_eq!(chf.areas[chf.cell(4, 4).index as usize], RC_WALKABLE_AREA);

        // out of the vertical range
        let high = ConvexVolume { hmin: 5.0, hmax: 6.0, area: 2, ..vol };
        chf.mark_convex_poly_area(&high);
        assert_eq!(chf.areas[chf.cell(1, 1).index as usize], 1);
    }
}

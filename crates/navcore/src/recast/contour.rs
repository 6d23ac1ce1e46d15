// contour.rs - trace and simplify region outlines

use tracing::warn;

use crate::math::Vec3;

use super::compact::CompactHeightfield;
use super::heightfield::{DIR_OFFSET_X, DIR_OFFSET_Z};
use super::EngineError;

const MAX_WALK_ITERATIONS: usize = 40000;

/// A closed region outline. Vertices are `[x, y, z, r]` in grid units where
/// `r` is the region on the other side of the edge starting at the vertex.
#[derive(Clone, Debug, Default)]
pub struct Contour {
    pub verts: Vec<[i32; 4]>,
    pub raw_verts: Vec<[i32; 4]>,
    pub reg: u16,
    pub area: u8,
}

#[derive(Clone, Debug, Default)]
pub struct ContourSet {
    pub contours: Vec<Contour>,
    pub bmin: Vec3,
    pub bmax: Vec3,
    pub cs: f32,
    pub ch: f32,
    pub width: i32,
    pub height: i32,
}

impl ContourSet {
    pub fn has_region(&self, reg: u16) -> bool {
        self.contours.iter().any(|c| c.reg == reg && c.verts.len() >= 3)
    }
}

pub fn build_contours(chf: &CompactHeightfield, max_error: f32) -> Result<ContourSet, EngineError> {
    let n = chf.span_count();
    let mut flags = vec![0u8; n];

    // Bit per direction whose edge is a region boundary
    chf.for_each_span(|x, z, i| {
        let reg = chf.spans[i].reg;
        if reg == 0 {
            return;
        }
        let mut same = 0u8;
        for dir in 0..4 {
            if let Some(ni) = chf.neighbour(x, z, i, dir)
                && chf.spans[ni].reg == reg
            {
                same |= 1 << dir;
            }
        }
        // isolated spans produce degenerate outlines
        flags[i] = if same == 0 { 0 } else { same ^ 0xf };
    });

    let mut cset = ContourSet {
        contours: Vec::new(),
        bmin: chf.bmin,
        bmax: chf.bmax,
        cs: chf.cs,
        ch: chf.ch,
        width: chf.width,
        height: chf.height,
    };

    for z in 0..chf.height {
        for x in 0..chf.width {
            let c = chf.cell(x, z);
            for i in c.index as usize..(c.index + c.count) as usize {
                if flags[i] == 0 {
                    continue;
                }
                let reg = chf.spans[i].reg;
                if reg == 0 {
                    continue;
                }
                let raw = walk_contour(chf, x, z, i, &mut flags)?;
                let verts = simplify_contour(&raw, max_error);
                if verts.len() < 3 {
                    warn!("Dropping degenerate contour for region {} ({} verts)", reg, verts.len());
                    continue;
                }
                cset.contours.push(Contour { verts, raw_verts: raw, reg, area: chf.areas[i] });
            }
        }
    }
    Ok(cset)
}

fn corner_height(chf: &CompactHeightfield, x: i32, z: i32, i: usize, dir: usize) -> i32 {
    let dirp = (dir + 1) & 3;
    let mut h = chf.spans[i].y as i32;
    for (d0, d1) in [(dir, dirp), (dirp, dir)] {
        if let Some(ai) = chf.neighbour(x, z, i, d0) {
            h = h.max(chf.spans[ai].y as i32);
            let (ax, az) = (x + DIR_OFFSET_X[d0], z + DIR_OFFSET_Z[d0]);
            if let Some(bi) = chf.neighbour(ax, az, ai, d1) {
                h = h.max(chf.spans[bi].y as i32);
            }
        }
    }
    h
}

fn walk_contour(
    chf: &CompactHeightfield,
    mut x: i32,
    mut z: i32,
    mut i: usize,
    flags: &mut [u8],
) -> Result<Vec<[i32; 4]>, EngineError> {
    let mut dir = 0;
    while flags[i] & (1 << dir) == 0 {
        dir += 1;
    }
    let start_dir = dir;
    let start_i = i;
    let mut points = Vec::new();

    for _ in 0..MAX_WALK_ITERATIONS {
        if flags[i] & (1 << dir) != 0 {
            let y = corner_height(chf, x, z, i, dir);
            let (px, pz) = match dir {
                0 => (x, z + 1),
                1 => (x + 1, z + 1),
                2 => (x + 1, z),
                _ => (x, z),
            };
            let r = chf.neighbour(x, z, i, dir).map(|ni| chf.spans[ni].reg as i32).unwrap_or(0);
            points.push([px, y, pz, r]);
            flags[i] &= !(1 << dir);
            dir = (dir + 1) & 3;
        } else {
            let Some(ni) = chf.neighbour(x, z, i, dir) else {
                return Err(EngineError::Engine(format!("broken contour walk at ({x}, {z})")));
            };
            x += DIR_OFFSET_X[dir];
            z += DIR_OFFSET_Z[dir];
            i = ni;
            dir = (dir + 3) & 3;
        }
        if i == start_i && dir == start_dir {
            return Ok(points);
        }
    }
    Err(EngineError::Engine(format!("contour walk did not close at ({x}, {z})")))
}

fn distance_pt_seg_sqr(p: [i32; 4], a: [i32; 4], b: [i32; 4]) -> f32 {
    let (px, pz) = (p[0] as f32, p[2] as f32);
    let (ax, az) = (a[0] as f32, a[2] as f32);
    let (dx, dz) = (b[0] as f32 - ax, b[2] as f32 - az);
    let d = dx * dx + dz * dz;
    let mut t = dx * (px - ax) + dz * (pz - az);
    if d > 0.0 {
        t /= d;
    }
    let t = t.clamp(0.0, 1.0);
    let ex = ax + t * dx - px;
    let ez = az + t * dz - pz;
    ex * ex + ez * ez
}

/// Keep the vertices where the neighbouring region changes, then refine the
/// outline until every raw vertex lies within `max_error` of it.
fn simplify_contour(raw: &[[i32; 4]], max_error: f32) -> Vec<[i32; 4]> {
    let n = raw.len();
    if n == 0 {
        return Vec::new();
    }

    let mut keep: Vec<usize> = (0..n).filter(|&i| raw[i][3] != raw[(i + 1) % n][3]).collect();

    if keep.is_empty() {
        // no portals: seed with the lower-left and upper-right vertices
        let mut ll = 0;
        let mut ur = 0;
        for (i, v) in raw.iter().enumerate() {
            let (l, u) = (raw[ll], raw[ur]);
            if v[0] < l[0] || (v[0] == l[0] && v[2] < l[2]) {
                ll = i;
            }
            if v[0] > u[0] || (v[0] == u[0] && v[2] > u[2]) {
                ur = i;
            }
        }
        keep.push(ll);
        if ur != ll {
            keep.push(ur);
            keep.sort_unstable();
        }
    }

    let max_err_sqr = max_error * max_error;
    let mut k = 0;
    while k < keep.len() {
        let a = keep[k];
        let b = keep[(k + 1) % keep.len()];
        let mut maxd = 0.0;
        let mut maxi = None;
        let mut ci = (a + 1) % n;
        while ci != b {
            let d = distance_pt_seg_sqr(raw[ci], raw[a], raw[b]);
            if d > maxd {
                maxd = d;
                maxi = Some(ci);
            }
            ci = (ci + 1) % n;
        }
        match maxi {
            Some(mi) if maxd > max_err_sqr => keep.insert(k + 1, mi),
            _ => k += 1,
        }
    }

    let mut verts: Vec<[i32; 4]> = keep
        .iter()
        .map(|&i| {
            let v = raw[i];
            [v[0], v[1], v[2], raw[(i + 1) % n][3]]
        })
        .collect();
    verts.dedup_by(|b, a| a[0] == b[0] && a[2] == b[2]);
    if verts.len() > 1 && verts[0][0] == verts[verts.len() - 1][0] && verts[0][2] == verts[verts.len() - 1][2] {
        verts.pop();
    }
    verts
}

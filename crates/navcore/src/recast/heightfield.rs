// heightfield.rs - solid span heightfield, triangle rasterization and span filters

use crate::math::{vcross, vnormalize, vsub, Vec3};

use super::{EngineError, RC_NULL_AREA, RC_WALKABLE_AREA};

/// Largest representable span height
pub const SPAN_MAX_HEIGHT: u16 = 0x1fff;

/// Height used for "open sky" above the topmost span
const MAX_HEIGHT: i32 = 0xffff;

/// Neighbour offsets per direction: -x, +z, +x, -z
pub const DIR_OFFSET_X: [i32; 4] = [-1, 0, 1, 0];
pub const DIR_OFFSET_Z: [i32; 4] = [0, 1, 0, -1];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Span {
    pub smin: u16,
    pub smax: u16,
    pub area: u8,
}

/// Column-major grid of solid spans; each column is sorted bottom up and
/// spans in a column never overlap.
#[derive(Clone, Debug)]
pub struct Heightfield {
    pub width: i32,
    pub height: i32,
    pub bmin: Vec3,
    pub bmax: Vec3,
    pub cs: f32,
    pub ch: f32,
    columns: Vec<Vec<Span>>,
}

impl Heightfield {
    pub fn new(width: i32, height: i32, bmin: Vec3, bmax: Vec3, cs: f32, ch: f32) -> Result<Self, EngineError> {
        if width <= 0 || height <= 0 {
            return Err(EngineError::InvalidInput);
        }
        let n = (width as usize) * (height as usize);
        let mut columns = Vec::new();
        columns.try_reserve_exact(n).map_err(|_| EngineError::OutOfMemory)?;
        columns.resize_with(n, Vec::new);
        Ok(Heightfield { width, height, bmin, bmax, cs, ch, columns })
    }

    pub fn column(&self, x: i32, z: i32) -> &[Span] {
        &self.columns[(x + z * self.width) as usize]
    }

    pub fn span_count(&self) -> usize {
        self.columns.iter().map(Vec::len).sum()
    }

    /// Insert a span, merging it with every span it touches
    pub fn add_span(&mut self, x: i32, z: i32, smin: u16, smax: u16, area: u8, flag_merge_thr: i32) {
        let column = &mut self.columns[(x + z * self.width) as usize];
        let mut s = Span { smin, smax, area };

        let mut i = 0;
        while i < column.len() {
            let cur = column[i];
            if cur.smin > s.smax {
                // Current span is further than the new span, stop
                break;
            } else if cur.smax < s.smin {
                i += 1;
            } else {
                s.smin = s.smin.min(cur.smin);
                s.smax = s.smax.max(cur.smax);
                if (s.smax as i32 - cur.smax as i32).abs() <= flag_merge_thr {
                    s.area = s.area.max(cur.area);
                }
                column.remove(i);
            }
        }
        column.insert(i, s);
    }
}

/// Per-triangle area ids: walkable when the slope is below the limit
pub fn mark_walkable_triangles(walkable_slope_angle: f32, verts: &[f32], tris: &[i32]) -> Vec<u8> {
    let walkable_thr = walkable_slope_angle.to_radians().cos();
    tris.chunks_exact(3)
        .map(|t| {
            let v = |i: i32| -> Vec3 {
                let i = i as usize * 3;
                [verts[i], verts[i + 1], verts[i + 2]]
            };
            let (v0, v1, v2) = (v(t[0]), v(t[1]), v(t[2]));
            let norm = vnormalize(&vcross(&vsub(&v1, &v0), &vsub(&v2, &v0)));
            if norm[1] > walkable_thr { RC_WALKABLE_AREA } else { RC_NULL_AREA }
        })
        .collect()
}

/// Split a convex polygon by the plane `axis = x`. First output is the part
/// on the low side, second the remainder.
fn divide_poly(input: &[Vec3], x: f32, axis: usize) -> (Vec<Vec3>, Vec<Vec3>) {
    let mut out1 = Vec::with_capacity(input.len() + 2);
    let mut out2 = Vec::with_capacity(input.len() + 2);
    let d: Vec<f32> = input.iter().map(|v| x - v[axis]).collect();

    let n = input.len();
    let mut j = n.wrapping_sub(1);
    for i in 0..n {
        let ina = d[j] >= 0.0;
        let inb = d[i] >= 0.0;
        if ina != inb {
            let s = d[j] / (d[j] - d[i]);
            let a = input[j];
            let b = input[i];
            let p = [a[0] + (b[0] - a[0]) * s, a[1] + (b[1] - a[1]) * s, a[2] + (b[2] - a[2]) * s];
            out1.push(p);
            out2.push(p);
            // Points on the dividing line were already added above
            if d[i] > 0.0 {
                out1.push(input[i]);
            } else if d[i] < 0.0 {
                out2.push(input[i]);
            }
        } else if inb {
            out1.push(input[i]);
            if d[i] == 0.0 {
                out2.push(input[i]);
            }
        } else {
            out2.push(input[i]);
        }
        j = i;
    }
    (out1, out2)
}

fn rasterize_tri(v0: &Vec3, v1: &Vec3, v2: &Vec3, area: u8, hf: &mut Heightfield, flag_merge_thr: i32) {
    let w = hf.width;
    let h = hf.height;
    let bmin = hf.bmin;
    let bmax = hf.bmax;
    let by = bmax[1] - bmin[1];
    let ics = 1.0 / hf.cs;
    let ich = 1.0 / hf.ch;

    let mut tmin = *v0;
    let mut tmax = *v0;
    for v in [v1, v2] {
        for k in 0..3 {
            tmin[k] = tmin[k].min(v[k]);
            tmax[k] = tmax[k].max(v[k]);
        }
    }
    if !crate::math::overlap_bounds(&bmin, &bmax, &tmin, &tmax) {
        return;
    }

    let z0 = (((tmin[2] - bmin[2]) * ics) as i32).clamp(-1, h - 1);
    let z1 = (((tmax[2] - bmin[2]) * ics) as i32).clamp(0, h - 1);

    let mut rest = vec![*v0, *v1, *v2];
    for z in z0..=z1 {
        // Clip polygon to row
        let cz = bmin[2] + z as f32 * hf.cs;
        let (row, remainder) = divide_poly(&rest, cz + hf.cs, 2);
        rest = remainder;
        if row.len() < 3 || z < 0 {
            continue;
        }

        let mut min_x = row[0][0];
        let mut max_x = row[0][0];
        for v in &row[1..] {
            min_x = min_x.min(v[0]);
            max_x = max_x.max(v[0]);
        }
        let x0 = ((min_x - bmin[0]) * ics) as i32;
        let x1 = ((max_x - bmin[0]) * ics) as i32;
        if x1 < 0 || x0 >= w {
            continue;
        }
        let x0 = x0.clamp(-1, w - 1);
        let x1 = x1.clamp(0, w - 1);

        let mut row_rest = row;
        for x in x0..=x1 {
            // Clip polygon to column
            let cx = bmin[0] + x as f32 * hf.cs;
            let (cell, remainder) = divide_poly(&row_rest, cx + hf.cs, 0);
            row_rest = remainder;
            if cell.len() < 3 || x < 0 {
                continue;
            }

            let mut smin = cell[0][1];
            let mut smax = cell[0][1];
            for v in &cell[1..] {
                smin = smin.min(v[1]);
                smax = smax.max(v[1]);
            }
            smin -= bmin[1];
            smax -= bmin[1];
            // Skip the span if it is outside the heightfield bbox
            if smax < 0.0 || smin > by {
                continue;
            }
            let smin = smin.max(0.0);
            let smax = smax.min(by);

            let ismin = ((smin * ich).floor() as i32).clamp(0, SPAN_MAX_HEIGHT as i32) as u16;
            let ismax = ((smax * ich).ceil() as i32).clamp(ismin as i32 + 1, SPAN_MAX_HEIGHT as i32) as u16;

            hf.add_span(x, z, ismin, ismax, area, flag_merge_thr);
        }
    }
}

/// Rasterize every triangle with its area id into the heightfield
pub fn rasterize_triangles(verts: &[f32], tris: &[i32], areas: &[u8], hf: &mut Heightfield, flag_merge_thr: i32) {
    for (t, tri) in tris.chunks_exact(3).enumerate() {
        let v = |i: i32| -> Vec3 {
            let i = i as usize * 3;
            [verts[i], verts[i + 1], verts[i + 2]]
        };
        rasterize_tri(&v(tri[0]), &v(tri[1]), &v(tri[2]), areas[t], hf, flag_merge_thr);
    }
}

/// Let the agent step up onto low obstacles standing on walkable spans
pub fn filter_low_hanging_walkable_obstacles(walkable_climb: i32, hf: &mut Heightfield) {
    for column in hf.columns.iter_mut() {
        let mut previous_walkable = false;
        let mut previous_area = RC_NULL_AREA;
        let mut previous_smax = 0i32;

        for span in column.iter_mut() {
            let walkable = span.area != RC_NULL_AREA;
            if !walkable && previous_walkable && (span.smax as i32 - previous_smax).abs() <= walkable_climb {
                span.area = previous_area;
            }
            // Copy the original flag so it can't propagate over several obstacles
            previous_walkable = walkable;
            previous_area = span.area;
            previous_smax = span.smax as i32;
        }
    }
}

/// Remove walkable spans next to a drop larger than `walkable_climb`
pub fn filter_ledge_spans(walkable_height: i32, walkable_climb: i32, hf: &mut Heightfield) {
    let w = hf.width;
    let h = hf.height;
    let mut ledges: Vec<(usize, usize)> = Vec::new();

    for z in 0..h {
        for x in 0..w {
            let column = hf.column(x, z);
            for (si, s) in column.iter().enumerate() {
                if s.area == RC_NULL_AREA {
                    continue;
                }
                let bot = s.smax as i32;
                let top = column.get(si + 1).map_or(MAX_HEIGHT, |n| n.smin as i32);

                let mut minh = MAX_HEIGHT;
                let mut asmin = bot;
                let mut asmax = bot;

                for dir in 0..4 {
                    let dx = x + DIR_OFFSET_X[dir];
                    let dz = z + DIR_OFFSET_Z[dir];
                    if dx < 0 || dz < 0 || dx >= w || dz >= h {
                        minh = minh.min(-walkable_climb - bot);
                        continue;
                    }
                    let neighbour = hf.column(dx, dz);

                    // From minus infinity to the first span
                    let nbot = -walkable_climb;
                    let ntop = neighbour.first().map_or(MAX_HEIGHT, |n| n.smin as i32);
                    if top.min(ntop) - bot.max(nbot) > walkable_height {
                        minh = minh.min(nbot - bot);
                    }

                    for (ni, ns) in neighbour.iter().enumerate() {
                        let nbot = ns.smax as i32;
                        let ntop = neighbour.get(ni + 1).map_or(MAX_HEIGHT, |n| n.smin as i32);
                        if top.min(ntop) - bot.max(nbot) > walkable_height {
                            minh = minh.min(nbot - bot);
                            if (nbot - bot).abs() <= walkable_climb {
                                asmin = asmin.min(nbot);
                                asmax = asmax.max(nbot);
                            }
                        }
                    }
                }

                // Drop to some neighbour is too large, or the accessible
                // neighbours are too uneven (steep slope)
                if minh < -walkable_climb || asmax - asmin > walkable_climb {
                    ledges.push(((x + z * w) as usize, si));
                }
            }
        }
    }

    for (c, si) in ledges {
        hf.columns[c][si].area = RC_NULL_AREA;
    }
}

/// Remove walkable spans without enough free space above them
pub fn filter_walkable_low_height_spans(walkable_height: i32, hf: &mut Heightfield) {
    for column in hf.columns.iter_mut() {
        for si in 0..column.len() {
            let bot = column[si].smax as i32;
            let top = column.get(si + 1).map_or(MAX_HEIGHT, |n| n.smin as i32);
            if top - bot < walkable_height {
                column[si].area = RC_NULL_AREA;
            }
        }
    }
}

// math.rs - small vector helpers over [f32; 3]
//
// Positions are Y-up. "2D" helpers work on the XZ ground plane.

pub type Vec3 = [f32; 3];

pub fn vsub(a: &Vec3, b: &Vec3) -> Vec3 {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

pub fn vadd(a: &Vec3, b: &Vec3) -> Vec3 {
    [a[0] + b[0], a[1] + b[1], a[2] + b[2]]
}

pub fn vscale(a: &Vec3, s: f32) -> Vec3 {
    [a[0] * s, a[1] * s, a[2] * s]
}

/// a + (b - a) * t
pub fn vlerp(a: &Vec3, b: &Vec3, t: f32) -> Vec3 {
    [
        a[0] + (b[0] - a[0]) * t,
        a[1] + (b[1] - a[1]) * t,
        a[2] + (b[2] - a[2]) * t,
    ]
}

/// a + b * s
pub fn vmad(a: &Vec3, b: &Vec3, s: f32) -> Vec3 {
    [a[0] + b[0] * s, a[1] + b[1] * s, a[2] + b[2] * s]
}

pub fn vdot(a: &Vec3, b: &Vec3) -> f32 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

pub fn vcross(a: &Vec3, b: &Vec3) -> Vec3 {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

pub fn vmin(a: &Vec3, b: &Vec3) -> Vec3 {
    [a[0].min(b[0]), a[1].min(b[1]), a[2].min(b[2])]
}

pub fn vmax(a: &Vec3, b: &Vec3) -> Vec3 {
    [a[0].max(b[0]), a[1].max(b[1]), a[2].max(b[2])]
}

pub fn vdist_sqr(a: &Vec3, b: &Vec3) -> f32 {
    let d = vsub(b, a);
    vdot(&d, &d)
}

pub fn vdist(a: &Vec3, b: &Vec3) -> f32 {
    vdist_sqr(a, b).sqrt()
}

pub fn vdist_2d_sqr(a: &Vec3, b: &Vec3) -> f32 {
    let dx = b[0] - a[0];
    let dz = b[2] - a[2];
    dx * dx + dz * dz
}

pub fn vnormalize(v: &Vec3) -> Vec3 {
    let len = vdot(v, v).sqrt();
    if len > f32::EPSILON {
        vscale(v, 1.0 / len)
    } else {
        *v
    }
}

/// Positions equal within a small 3D tolerance
pub fn vequal(a: &Vec3, b: &Vec3) -> bool {
    const THR: f32 = (1.0 / 16384.0) * (1.0 / 16384.0);
    vdist_sqr(a, b) < THR
}

/// Horizontal distance below `r` and vertical distance below `h`
pub fn in_range(a: &Vec3, b: &Vec3, r: f32, h: f32) -> bool {
    vdist_2d_sqr(a, b) < r * r && (b[1] - a[1]).abs() < h
}

/// Signed doubled area of the XZ triangle; negative for counter-clockwise turn
/// in the (x right, z up) frame.
pub fn tri_area_2d(a: &Vec3, b: &Vec3, c: &Vec3) -> f32 {
    let abx = b[0] - a[0];
    let abz = b[2] - a[2];
    let acx = c[0] - a[0];
    let acz = c[2] - a[2];
    acx * abz - abx * acz
}

/// Ray-crossing point in polygon test over XZ
pub fn point_in_poly(verts: &[Vec3], p: &Vec3) -> bool {
    let n = verts.len();
    let mut inside = false;
    let mut j = n.wrapping_sub(1);
    for i in 0..n {
        let vi = &verts[i];
        let vj = &verts[j];
        if ((vi[2] > p[2]) != (vj[2] > p[2]))
            && (p[0] < (vj[0] - vi[0]) * (p[2] - vi[2]) / (vj[2] - vi[2]) + vi[0])
        {
            inside = !inside;
        }
        j = i;
    }
    inside
}

/// Squared XZ distance from `p` to segment `a..b` and the segment parameter
pub fn dist_pt_seg_sqr_2d(p: &Vec3, a: &Vec3, b: &Vec3) -> (f32, f32) {
    let pqx = b[0] - a[0];
    let pqz = b[2] - a[2];
    let d = pqx * pqx + pqz * pqz;
    let mut t = pqx * (p[0] - a[0]) + pqz * (p[2] - a[2]);
    if d > 0.0 {
        t /= d;
    }
    let t = t.clamp(0.0, 1.0);
    let dx = a[0] + t * pqx - p[0];
    let dz = a[2] + t * pqz - p[2];
    (dx * dx + dz * dz, t)
}

/// Closest point on a triangle's plane height at `p` (XZ), if `p` lies inside
pub fn closest_height_on_triangle(p: &Vec3, a: &Vec3, b: &Vec3, c: &Vec3) -> Option<f32> {
    const EPS: f32 = 1e-6;
    let v0 = vsub(c, a);
    let v1 = vsub(b, a);
    let v2 = vsub(p, a);

    let denom = v0[0] * v1[2] - v0[2] * v1[0];
    if denom.abs() < EPS {
        return None;
    }

    let mut denom = denom;
    let mut u = v1[2] * v2[0] - v1[0] * v2[2];
    let mut v = v0[0] * v2[2] - v0[2] * v2[0];
    if denom < 0.0 {
        denom = -denom;
        u = -u;
        v = -v;
    }

    if u >= -EPS * denom && v >= -EPS * denom && u + v <= denom * (1.0 + EPS) {
        Some(a[1] + (v0[1] * u + v1[1] * v) / denom)
    } else {
        None
    }
}

/// Segment/convex polygon intersection over XZ.
///
/// Returns `(tmin, tmax, seg_min, seg_max)` where the seg values are the edge
/// indices the segment enters and leaves through (`None` when the endpoint is
/// inside the polygon).
pub fn intersect_segment_poly_2d(
    p0: &Vec3,
    p1: &Vec3,
    verts: &[Vec3],
) -> Option<(f32, f32, Option<usize>, Option<usize>)> {
    const EPS: f32 = 1e-6;
    let mut tmin = 0.0f32;
    let mut tmax = 1.0f32;
    let mut seg_min = None;
    let mut seg_max = None;

    let dir = vsub(p1, p0);
    let n = verts.len();
    let mut j = n - 1;
    for i in 0..n {
        let edge = vsub(&verts[i], &verts[j]);
        let diff = vsub(p0, &verts[j]);
        let num = edge[2] * diff[0] - edge[0] * diff[2];
        let den = -(edge[2] * dir[0] - edge[0] * dir[2]);
        if den.abs() < EPS {
            // parallel to this edge
            if num < 0.0 {
                return None;
            }
            j = i;
            continue;
        }
        let t = num / den;
        if den < 0.0 {
            if t > tmin {
                tmin = t;
                seg_min = Some(j);
                if tmin > tmax {
                    return None;
                }
            }
        } else if t < tmax {
            tmax = t;
            seg_max = Some(j);
            if tmax < tmin {
                return None;
            }
        }
        j = i;
    }
    Some((tmin, tmax, seg_min, seg_max))
}

/// Segment/triangle intersection in 3D; returns the segment parameter
pub fn intersect_segment_triangle(sp: &Vec3, sq: &Vec3, a: &Vec3, b: &Vec3, c: &Vec3) -> Option<f32> {
    let ab = vsub(b, a);
    let ac = vsub(c, a);
    let qp = vsub(sp, sq);

    let norm = vcross(&ab, &ac);
    let d = vdot(&qp, &norm);
    if d <= 0.0 {
        return None;
    }

    let ap = vsub(sp, a);
    let t = vdot(&ap, &norm);
    if t < 0.0 || t > d {
        return None;
    }

    let e = vcross(&qp, &ap);
    let v = vdot(&ac, &e);
    if v < 0.0 || v > d {
        return None;
    }
    let w = -vdot(&ab, &e);
    if w < 0.0 || v + w > d {
        return None;
    }

    Some(t / d)
}

/// Overlap of two closed intervals
pub fn overlap_range(amin: f32, amax: f32, bmin: f32, bmax: f32) -> bool {
    !(amin > bmax || amax < bmin)
}

/// Overlap of two axis-aligned boxes
pub fn overlap_bounds(amin: &Vec3, amax: &Vec3, bmin: &Vec3, bmax: &Vec3) -> bool {
    (0..3).all(|i| overlap_range(amin[i], amax[i], bmin[i], bmax[i]))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square() -> Vec<Vec3> {
        vec![
            [0.0, 0.0, 0.0],
            [0.0, 0.0, 1.0],
            [1.0, 0.0, 1.0],
            [1.0, 0.0, 0.0],
        ]
    }

    #[test]
    fn test_point_in_poly() {
        let sq = square();
        assert!(point_in_poly(&sq, &[0.5, 0.0, 0.5]));
        assert!(!point_in_poly(&sq, &[1.5, 0.0, 0.5]));
        assert!(!point_in_poly(&sq, &[0.5, 0.0, -0.1]));
    }

    #[test]
    fn test_dist_pt_seg() {
        let (d, t) = dist_pt_seg_sqr_2d(&[0.5, 3.0, 1.0], &[0.0, 0.0, 0.0], &[1.0, 0.0, 0.0]);
        assert!((d - 1.0).abs() < 1e-6);
        assert!((t - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_closest_height_on_triangle() {
        let a = [0.0, 0.0, 0.0];
        let b = [0.0, 2.0, 2.0];
        let c = [2.0, 0.0, 0.0];
        let h = closest_height_on_triangle(&[0.5, 0.0, 1.0], &a, &b, &c).unwrap();
        assert!((h - 1.0).abs() < 1e-5);
        assert!(closest_height_on_triangle(&[3.0, 0.0, 3.0], &a, &b, &c).is_none());
    }

    #[test]
    fn test_segment_poly_through() {
        let sq = square();
        let (tmin, tmax, smin, smax) =
            intersect_segment_poly_2d(&[-1.0, 0.0, 0.5], &[2.0, 0.0, 0.5], &sq).unwrap();
        assert!((tmin - 1.0 / 3.0).abs() < 1e-5);
        assert!((tmax - 2.0 / 3.0).abs() < 1e-5);
        assert!(smin.is_some() && smax.is_some());
    }

    #[test]
    fn test_segment_poly_inside_end() {
        let sq = square();
        let (_, tmax, _, smax) =
            intersect_segment_poly_2d(&[0.2, 0.0, 0.5], &[0.8, 0.0, 0.5], &sq).unwrap();
        assert_eq!(tmax, 1.0);
        assert!(smax.is_none());
    }

    #[test]
    fn test_segment_triangle() {
        let t = intersect_segment_triangle(
            &[0.2, 1.0, 0.2],
            &[0.2, -1.0, 0.2],
            &[0.0, 0.0, 0.0],
            &[0.0, 0.0, 1.0],
            &[1.0, 0.0, 0.0],
        );
        assert!((t.unwrap() - 0.5).abs() < 1e-6);
    }
}

// convex_volume.rs - authoring of convex area volumes
//
// Clicks collect up to MAX_CONVEXVOL_PTS points whose XZ convex hull is kept
// up to date. Clicking the first hull vertex again turns the hull into a
// volume; shift-click deletes the volume under the cursor.

use tracing::debug;

use crate::areas::POLYAREA_GRASS;
use crate::geometry::{ConvexVolume, InputGeometry, MAX_CONVEXVOL_PTS};
use crate::math::{point_in_poly, vdist_sqr, Vec3};

use super::{Tool, ToolKind, Workspace};

/// Distance to the first hull vertex that closes the shape
const CLOSE_DIST: f32 = 0.2;

#[derive(Clone, Debug)]
pub struct ConvexVolumeTool {
    pub area: u8,
    pub box_height: f32,
    pub box_descent: f32,
    pts: Vec<Vec3>,
    hull: Vec<usize>,
}

impl Default for ConvexVolumeTool {
    fn default() -> Self {
        ConvexVolumeTool {
            area: POLYAREA_GRASS,
            box_height: 6.0,
            box_descent: 1.0,
            pts: Vec::new(),
            hull: Vec::new(),
        }
    }
}

impl ConvexVolumeTool {
    pub fn points(&self) -> &[Vec3] {
        &self.pts
    }

    /// Hull as indices into `points()`
    pub fn hull(&self) -> &[usize] {
        &self.hull
    }

    /// Append a point and refresh the hull. Points past the cap are ignored.
    pub fn add_point(&mut self, p: Vec3) -> bool {
        if self.pts.len() >= MAX_CONVEXVOL_PTS {
            return false;
        }
        self.pts.push(p);
        if self.pts.len() > 1 {
            self.hull = convex_hull(&self.pts);
        } else {
            self.hull.clear();
        }
        true
    }

    /// True when `p` lands on the first hull vertex of a closable hull
    pub fn closes_hull(&self, p: &Vec3) -> bool {
        self.hull.len() > 2
            && self
                .hull
                .first()
                .is_some_and(|&i| vdist_sqr(p, &self.pts[i]) < CLOSE_DIST * CLOSE_DIST)
    }

    /// Turn the hull into a volume, or `None` with fewer than three hull
    /// vertices. The pending points are cleared either way.
    pub fn finalize(&mut self, area: u8, box_descent: f32, box_height: f32) -> Option<ConvexVolume> {
        let volume = (self.hull.len() > 2).then(|| {
            let verts: Vec<Vec3> = self.hull.iter().map(|&i| self.pts[i]).collect();
            let hmin = verts.iter().map(|v| v[1]).fold(f32::MAX, f32::min) - box_descent;
            ConvexVolume { verts, hmin, hmax: hmin + box_height, area }
        });
        self.pts.clear();
        self.hull.clear();
        volume
    }
}

impl Tool for ConvexVolumeTool {
    fn kind(&self) -> ToolKind {
        ToolKind::ConvexVolume
    }

    fn reset(&mut self) {
        self.pts.clear();
        self.hull.clear();
    }

    fn handle_click(&mut self, ws: &mut Workspace, pos: &Vec3, shift: bool) {
        let Some(geom) = ws.geometry_mut() else { return };
        if shift {
            if let Some(i) = delete_at(geom, pos) {
                debug!("Deleted convex volume {}", i);
            }
            return;
        }
        if self.pts.is_empty() || !self.closes_hull(pos) {
            self.add_point(*pos);
            return;
        }
        if let Some(vol) = self.finalize(self.area, self.box_descent, self.box_height) {
            geom.add_convex_volume(&vol.verts, vol.hmin, vol.hmax, vol.area);
        }
    }
}

/// Remove the first volume containing `pos`; returns its former index
pub fn delete_at(geom: &mut InputGeometry, pos: &Vec3) -> Option<usize> {
    let i = geom
        .convex_volumes()
        .iter()
        .position(|vol| point_in_poly(&vol.verts, pos) && pos[1] >= vol.hmin && pos[1] <= vol.hmax)?;
    geom.delete_convex_volume(i);
    Some(i)
}

/// 2D cross of (b - a) and (c - a) over XZ; negative when `c` is the next
/// hull candidate past `b` seen from `a`
fn cross_xz(a: &Vec3, b: &Vec3, c: &Vec3) -> f32 {
    let u1 = b[0] - a[0];
    let v1 = b[2] - a[2];
    let u2 = c[0] - a[0];
    let v2 = c[2] - a[2];
    u1 * v2 - v1 * u2
}

fn same_xz(a: &Vec3, b: &Vec3) -> bool {
    a[0] == b[0] && a[2] == b[2]
}

fn dist_sqr_xz(a: &Vec3, b: &Vec3) -> f32 {
    let dx = b[0] - a[0];
    let dz = b[2] - a[2];
    dx * dx + dz * dz
}

/// `a` is lower-left of `b`: smaller x, ties broken on z
fn cmp_pt(a: &Vec3, b: &Vec3) -> bool {
    if a[0] != b[0] {
        return a[0] < b[0];
    }
    a[2] < b[2]
}

/// Gift-wrap hull over XZ, as indices into `pts`. Duplicates of the current
/// vertex are never chosen as the next one, and among collinear candidates
/// the farthest wins, so hull vertices are distinct corners.
pub fn convex_hull(pts: &[Vec3]) -> Vec<usize> {
    let mut out = Vec::new();
    if pts.is_empty() {
        return out;
    }
    let mut hull = 0;
    for i in 1..pts.len() {
        if cmp_pt(&pts[i], &pts[hull]) {
            hull = i;
        }
    }
    loop {
        out.push(hull);
        let cur = pts[hull];
        let mut endpt: Option<usize> = None;
        for (j, p) in pts.iter().enumerate() {
            if same_xz(p, &cur) {
                continue;
            }
            endpt = match endpt {
                None => Some(j),
                Some(e) => {
                    let cross = cross_xz(&cur, &pts[e], p);
                    if cross < 0.0 || (cross == 0.0 && dist_sqr_xz(&cur, p) > dist_sqr_xz(&cur, &pts[e])) {
                        Some(j)
                    } else {
                        Some(e)
                    }
                }
            };
        }
        // every point sits on the current vertex
        let Some(e) = endpt else { break };
        if same_xz(&pts[e], &pts[out[0]]) || out.len() >= pts.len() {
            break;
        }
        hull = e;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::tri_area_2d;
    use crate::pipeline::tests::plane;
    use crate::settings::BuildSettings;

    fn hull_points(tool: &ConvexVolumeTool) -> Vec<Vec3> {
        tool.hull().iter().map(|&i| tool.points()[i]).collect()
    }

    #[test]
    fn test_hull_of_square_with_interior_point() {
        let pts = vec![
            [0.0, 0.0, 0.0],
            [2.0, 0.0, 0.0],
            [1.0, 0.0, 1.0],
            [2.0, 0.0, 2.0],
            [0.0, 0.0, 2.0],
        ];
        let hull = convex_hull(&pts);
        assert_eq!(hull.len(), 4);
        assert!(!hull.contains(&2));
        assert_eq!(hull[0], 0);
    }

    #[test]
    fn test_hull_contains_points_and_winds_consistently() {
        let pts = vec![
            [0.3, 0.0, 0.1],
            [4.0, 0.5, -1.0],
            [2.5, 0.0, 3.7],
            [-1.2, 1.0, 2.2],
            [1.0, 0.0, 1.0],
            [3.1, 0.0, 0.4],
            [0.9, 0.0, 2.9],
        ];
        let hull: Vec<Vec3> = convex_hull(&pts).into_iter().map(|i| pts[i]).collect();
        assert!(hull.len() >= 3);
        let n = hull.len();
        let signs: Vec<bool> = (0..n)
            .map(|i| tri_area_2d(&hull[i], &hull[(i + 1) % n], &hull[(i + 2) % n]) > 0.0)
            .collect();
        assert!(signs.iter().all(|&s| s == signs[0]));
        for p in &pts {
            for i in 0..n {
                let area = tri_area_2d(&hull[i], &hull[(i + 1) % n], p);
                if signs[0] {
                    assert!(area >= -1e-5);
                } else {
                    assert!(area <= 1e-5);
                }
            }
        }
    }

    /// Hull vertices are distinct, wind one way, and every input point lies
    /// on or inside the hull
    fn check_hull(pts: &[Vec3]) {
        let idx = convex_hull(pts);
        assert!(!idx.is_empty());
        let hull: Vec<Vec3> = idx.iter().map(|&i| pts[i]).collect();
        for (i, a) in hull.iter().enumerate() {
            for b in &hull[i + 1..] {
                assert!(!same_xz(a, b), "repeated hull vertex in {pts:?}");
            }
        }
        match hull.len() {
            1 => assert!(pts.iter().all(|p| same_xz(p, &hull[0]))),
            2 => {
                let len = dist_sqr_xz(&hull[0], &hull[1]);
                for p in pts {
                    assert!(tri_area_2d(&hull[0], &hull[1], p).abs() < 1e-5);
                    assert!(dist_sqr_xz(&hull[0], p) <= len + 1e-5);
                    assert!(dist_sqr_xz(&hull[1], p) <= len + 1e-5);
                }
            }
            n => {
                let sign = tri_area_2d(&hull[0], &hull[1], &hull[2]) > 0.0;
                for i in 0..n {
                    let area = tri_area_2d(&hull[i], &hull[(i + 1) % n], &hull[(i + 2) % n]);
                    assert!(area != 0.0 && (area > 0.0) == sign, "bad winding for {pts:?}");
                    for p in pts {
                        let a = tri_area_2d(&hull[i], &hull[(i + 1) % n], p);
                        assert!(if sign { a >= -1e-5 } else { a <= 1e-5 }, "{p:?} outside hull of {pts:?}");
                    }
                }
            }
        }
    }

    #[test]
    fn test_hull_with_duplicate_points() {
        let pts = vec![[0.0, 0.0, 0.0], [0.0, 0.0, 0.0], [2.0, 0.0, 0.0], [1.0, 0.0, 2.0]];
        let hull = convex_hull(&pts);
        assert_eq!(hull.len(), 3);
        check_hull(&pts);

        // duplicate of a later vertex and of the start
        let pts = vec![[0.0, 0.0, 0.0], [2.0, 0.0, 0.0], [2.0, 0.0, 0.0], [1.0, 0.0, 2.0], [0.0, 0.0, 0.0]];
        assert_eq!(convex_hull(&pts).len(), 3);
        check_hull(&pts);
    }

    #[test]
    fn test_hull_with_collinear_points() {
        let pts = vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [2.0, 0.0, 0.0], [3.0, 0.0, 0.0]];
        let hull = convex_hull(&pts);
        assert_eq!(hull.len(), 2);
        assert!(hull.contains(&0) && hull.contains(&3));
        check_hull(&pts);

        // midpoints on the square's edges are not corners
        let pts = vec![
            [0.0, 0.0, 0.0],
            [1.0, 0.0, 0.0],
            [2.0, 0.0, 0.0],
            [2.0, 0.0, 1.0],
            [2.0, 0.0, 2.0],
            [0.0, 0.0, 2.0],
            [0.0, 0.0, 1.0],
        ];
        assert_eq!(convex_hull(&pts).len(), 4);
        check_hull(&pts);
    }

    #[test]
    fn test_hull_of_single_distinct_point() {
        let pts = vec![[1.0, 0.0, 1.0]; 3];
        assert_eq!(convex_hull(&pts), vec![0]);
    }

    #[test]
    fn test_hull_property_on_generated_sets() {
        // small integer grid so duplicates and collinear runs are common
        let mut seed: u32 = 0x2545_f491;
        let mut next = || {
            seed = seed.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
            (seed >> 16) % 4
        };
        for _ in 0..500 {
            let n = 1 + next() as usize * 3 + next() as usize % 3;
            let pts: Vec<Vec3> = (0..n).map(|_| [next() as f32, 0.0, next() as f32]).collect();
            check_hull(&pts);
        }
    }

    #[test]
    fn test_double_click_still_closes_volume() {
        let mut tool = ConvexVolumeTool::default();
        for p in [[0.0, 0.0, 0.0], [0.0, 0.0, 0.0], [2.0, 0.0, 0.0], [1.0, 0.0, 2.0]] {
            tool.add_point(p);
        }
        assert_eq!(tool.hull().len(), 3);
        assert!(tool.finalize(POLYAREA_GRASS, 1.0, 6.0).is_some());
    }

    #[test]
    fn test_add_point_cap() {
        let mut tool = ConvexVolumeTool::default();
        for i in 0..MAX_CONVEXVOL_PTS {
            assert!(tool.add_point([i as f32, 0.0, (i * i) as f32]));
        }
        assert!(!tool.add_point([100.0, 0.0, 0.0]));
        assert_eq!(tool.points().len(), MAX_CONVEXVOL_PTS);
    }

    #[test]
    fn test_finalize_sets_vertical_extent() {
        let mut tool = ConvexVolumeTool::default();
        tool.add_point([0.0, 1.0, 0.0]);
        tool.add_point([2.0, 0.5, 0.0]);
        tool.add_point([1.0, 2.0, 2.0]);
        let vol = tool.finalize(7, 1.0, 6.0).unwrap();
        assert_eq!(vol.verts.len(), 3);
        assert_eq!(vol.hmin, -0.5);
        assert_eq!(vol.hmax, 5.5);
        assert_eq!(vol.area, 7);
        assert!(tool.points().is_empty());

        tool.add_point([0.0, 0.0, 0.0]);
        tool.add_point([1.0, 0.0, 0.0]);
        assert!(tool.finalize(7, 1.0, 6.0).is_none());
    }

    #[test]
    fn test_click_workflow_adds_and_deletes_volume() {
        let mut ws = Workspace::new(BuildSettings::default());
        ws.set_geometry(plane(10.0));
        let mut tool = ConvexVolumeTool::default();

        for p in [[-1.0, 0.0, -1.0], [1.0, 0.0, -1.0], [1.0, 0.0, 1.0], [-1.0, 0.0, 1.0]] {
            tool.handle_click(&mut ws, &p, false);
        }
        assert_eq!(hull_points(&tool).len(), 4);
        // close the shape on the first hull vertex
        let first = hull_points(&tool)[0];
        tool.handle_click(&mut ws, &[first[0] + 0.05, 0.0, first[2]], false);
        assert_eq!(ws.geometry().unwrap().convex_volumes().len(), 1);
        assert!(tool.points().is_empty());

        // outside the volume: nothing deleted
        tool.handle_click(&mut ws, &[3.0, 0.0, 3.0], true);
        assert_eq!(ws.geometry().unwrap().convex_volumes().len(), 1);
        tool.handle_click(&mut ws, &[0.0, 0.0, 0.0], true);
        assert!(ws.geometry().unwrap().convex_volumes().is_empty());
    }

    #[test]
    fn test_delete_removes_first_match_and_keeps_order() {
        let mut geom = plane(10.0);
        let square = |o: f32| vec![[o, 0.0, o], [o, 0.0, o + 2.0], [o + 2.0, 0.0, o + 2.0], [o + 2.0, 0.0, o]];
        geom.add_convex_volume(&square(0.0), -1.0, 1.0, 1);
        geom.add_convex_volume(&square(0.5), -1.0, 1.0, 2);
        geom.add_convex_volume(&square(4.0), -1.0, 1.0, 3);
        assert_eq!(delete_at(&mut geom, &[1.0, 0.0, 1.0]), Some(0));
        let areas: Vec<u8> = geom.convex_volumes().iter().map(|v| v.area).collect();
        assert_eq!(areas, vec![2, 3]);
        // above the vertical extent
        assert_eq!(delete_at(&mut geom, &[1.0, 5.0, 1.0]), None);
    }
}

// tester.rs - interactive path queries against the built navmesh
//
// Shift-click places the start, click places the end. Every change reruns
// the query of the current mode.

use tracing::debug;

use crate::detour::{PolyRef, RaycastHit, StraightPathPoint};
use crate::math::{vlerp, Vec3};
use crate::steering::{smooth_path, MAX_POLYS};

use super::{Tool, ToolKind, Workspace};

/// Search box around clicked points
pub const POLY_PICK_EXT: Vec3 = [2.0, 4.0, 2.0];
pub const MAX_STRAIGHT_PATH: usize = 256;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TesterMode {
    /// Smooth path an agent would walk
    #[default]
    Follow,
    Straight,
    Raycast,
}

impl TesterMode {
    fn next(self) -> Self {
        match self {
            TesterMode::Follow => TesterMode::Straight,
            TesterMode::Straight => TesterMode::Raycast,
            TesterMode::Raycast => TesterMode::Follow,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct NavMeshTesterTool {
    mode: TesterMode,
    start_pos: Option<Vec3>,
    end_pos: Option<Vec3>,
    start_ref: PolyRef,
    end_ref: PolyRef,
    polys: Vec<PolyRef>,
    straight: Vec<StraightPathPoint>,
    smooth: Vec<Vec3>,
    hit: Option<RaycastHit>,
    hit_pos: Option<Vec3>,
}

impl NavMeshTesterTool {
    pub fn mode(&self) -> TesterMode {
        self.mode
    }

    pub fn set_mode(&mut self, ws: &Workspace, mode: TesterMode) {
        self.mode = mode;
        self.recalc(ws);
    }

    pub fn start_ref(&self) -> PolyRef {
        self.start_ref
    }

    pub fn end_ref(&self) -> PolyRef {
        self.end_ref
    }

    /// Polygon corridor of the last query
    pub fn path(&self) -> &[PolyRef] {
        &self.polys
    }

    pub fn straight_path(&self) -> &[StraightPathPoint] {
        &self.straight
    }

    pub fn smooth_path(&self) -> &[Vec3] {
        &self.smooth
    }

    pub fn raycast_hit(&self) -> Option<&RaycastHit> {
        self.hit.as_ref()
    }

    /// Where the last raycast stopped
    pub fn hit_pos(&self) -> Option<Vec3> {
        self.hit_pos
    }

    fn clear_results(&mut self) {
        self.start_ref = PolyRef::NULL;
        self.end_ref = PolyRef::NULL;
        self.polys.clear();
        self.straight.clear();
        self.smooth.clear();
        self.hit = None;
        self.hit_pos = None;
    }

    /// Rerun the query for the current mode and end points
    pub fn recalc(&mut self, ws: &Workspace) {
        self.clear_results();
        let Some(query) = ws.query() else { return };
        let filter = ws.filter();

        if let Some(start) = self.start_pos {
            self.start_ref = query.find_nearest_poly(&start, &POLY_PICK_EXT, filter).0;
        }
        if let Some(end) = self.end_pos {
            self.end_ref = query.find_nearest_poly(&end, &POLY_PICK_EXT, filter).0;
        }
        let (Some(start), Some(end)) = (self.start_pos, self.end_pos) else { return };
        if self.start_ref.is_null() {
            return;
        }

        match self.mode {
            TesterMode::Follow | TesterMode::Straight => {
                if self.end_ref.is_null() {
                    return;
                }
                self.polys = query.find_path(self.start_ref, self.end_ref, &start, &end, filter, MAX_POLYS);
                if self.polys.is_empty() {
                    debug!("No path from {} to {}", self.start_ref, self.end_ref);
                    return;
                }
                // aim at the closest reachable point when the corridor stops short
                let mut end_pos = end;
                if self.polys.last() != Some(&self.end_ref)
                    && let Some(last) = self.polys.last()
                    && let Some((p, _)) = query.closest_point_on_poly(*last, &end)
                {
                    end_pos = p;
                }
                if self.mode == TesterMode::Follow {
                    self.smooth = smooth_path(&query, filter, &start, &end_pos, &self.polys);
                } else {
                    self.straight = query.find_straight_path(&start, &end_pos, &self.polys, MAX_STRAIGHT_PATH);
                }
            }
            TesterMode::Raycast => {
                let Some(hit) = query.raycast(self.start_ref, &start, &end, filter, MAX_POLYS) else { return };
                let mut hit_pos = if hit.t > 1.0 { end } else { vlerp(&start, &end, hit.t) };
                // adjust height to the surface the ray stopped on
                if let Some(&last) = hit.path.last()
                    && let Some(h) = query.get_poly_height(last, &hit_pos)
                {
                    hit_pos[1] = h;
                }
                self.hit_pos = Some(hit_pos);
                self.hit = Some(hit);
            }
        }
    }
}

impl Tool for NavMeshTesterTool {
    fn kind(&self) -> ToolKind {
        ToolKind::NavMeshTester
    }

    fn reset(&mut self) {
        self.clear_results();
    }

    fn handle_click(&mut self, ws: &mut Workspace, pos: &Vec3, shift: bool) {
        if shift {
            self.start_pos = Some(*pos);
        } else {
            self.end_pos = Some(*pos);
        }
        self.recalc(ws);
    }

    /// Cycle through the query modes
    fn handle_toggle(&mut self, ws: &mut Workspace) {
        self.set_mode(ws, self.mode.next());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::tests::plane;
    use crate::settings::BuildSettings;

    fn built_workspace() -> Workspace {
        let mut ws = Workspace::new(BuildSettings::default());
        ws.set_geometry(plane(10.0));
        assert!(ws.build());
        ws
    }

    #[test]
    fn test_straight_path_across_plane() {
        let mut ws = built_workspace();
        let mut tool = NavMeshTesterTool::default();
        tool.set_mode(&ws, TesterMode::Straight);
        tool.handle_click(&mut ws, &[-3.0, 0.0, -3.0], true);
        assert!(!tool.start_ref().is_null());
        assert!(tool.straight_path().is_empty());

        tool.handle_click(&mut ws, &[3.0, 0.0, 3.0], false);
        assert_eq!(tool.path().len(), 1);
        assert_eq!(tool.straight_path().len(), 2);
    }

    #[test]
    fn test_follow_mode_ends_at_goal() {
        let mut ws = built_workspace();
        let mut tool = NavMeshTesterTool::default();
        tool.handle_click(&mut ws, &[-3.0, 0.0, -3.0], true);
        tool.handle_click(&mut ws, &[3.0, 0.0, 3.0], false);
        let smooth = tool.smooth_path();
        assert!(smooth.len() > 2);
        let last = smooth.last().unwrap();
        assert!((last[0] - 3.0).abs() < 0.01 && (last[2] - 3.0).abs() < 0.01);
    }

    #[test]
    fn test_raycast_mode_stops_at_border() {
        let mut ws = built_workspace();
        let mut tool = NavMeshTesterTool::default();
        tool.handle_click(&mut ws, &[0.0, 0.0, 0.0], true);
        tool.handle_click(&mut ws, &[20.0, 0.0, 0.0], false);
        tool.handle_toggle(&mut ws);
        tool.handle_toggle(&mut ws);
        assert_eq!(tool.mode(), TesterMode::Raycast);
        let hit = tool.raycast_hit().unwrap();
        assert!(hit.t < 1.0);
        assert!(hit.hit_edge.is_some());
        let p = tool.hit_pos().unwrap();
        // eroded border sits inside the plane edge
        assert!(p[0] > 3.0 && p[0] < 5.0);
    }

    #[test]
    fn test_reset_clears_results() {
        let mut ws = built_workspace();
        let mut tool = NavMeshTesterTool::default();
        tool.handle_click(&mut ws, &[-3.0, 0.0, -3.0], true);
        tool.handle_click(&mut ws, &[3.0, 0.0, 3.0], false);
        tool.reset();
        assert!(tool.smooth_path().is_empty());
        assert!(tool.start_ref().is_null());
    }
}

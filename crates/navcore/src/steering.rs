// steering.rs - path corridor repair and steering along a found path
//
// An agent follows its corridor by asking for a short straight path, moving a
// fixed step towards the first corner far enough away, and splicing the
// polygons it actually crossed back into the corridor.

use tracing::debug;

use crate::detour::{
    NavMeshQuery, PolyRef, QueryFilter, DT_STRAIGHTPATH_END, DT_STRAIGHTPATH_OFFMESH_CONNECTION,
};
use crate::math::{in_range, vdot, vmad, vsub, Vec3};

/// Straight path points requested per steering update
pub const MAX_STEER_POINTS: usize = 3;
pub const MIN_TARGET_DIST: f32 = 0.01;
pub const STEP_SIZE: f32 = 0.5;
pub const SLOP: f32 = 0.01;
pub const MAX_SMOOTH: usize = 2048;
pub const MAX_POLYS: usize = 256;

const SHORTCUT_MAX_NEIS: usize = 16;
const SHORTCUT_LOOK_AHEAD: usize = 6;
const MAX_VISITED: usize = 16;

#[derive(Clone, Debug, PartialEq)]
pub struct SteerTarget {
    /// Corner to steer towards, at the agent's height
    pub pos: Vec3,
    pub flags: u8,
    pub poly: PolyRef,
    /// Straight path corners that were examined
    pub points: Vec<Vec3>,
}

impl SteerTarget {
    pub fn is_end(&self) -> bool {
        self.flags & DT_STRAIGHTPATH_END != 0
    }

    pub fn is_off_mesh(&self) -> bool {
        self.flags & DT_STRAIGHTPATH_OFFMESH_CONNECTION != 0
    }
}

/// First straight path corner further than `min_target_dist` from `start`,
/// or the path end / an off-mesh entry if one comes first.
pub fn find_steer_target(
    query: &NavMeshQuery,
    start: &Vec3,
    end: &Vec3,
    min_target_dist: f32,
    path: &[PolyRef],
) -> Option<SteerTarget> {
    let corners = query.find_straight_path(start, end, path, MAX_STEER_POINTS);
    let ns = corners.iter().position(|c| {
        c.flags & (DT_STRAIGHTPATH_END | DT_STRAIGHTPATH_OFFMESH_CONNECTION) != 0
            || !in_range(&c.pos, start, min_target_dist, 1000.0)
    })?;

    let corner = corners[ns];
    Some(SteerTarget {
        pos: [corner.pos[0], start[1], corner.pos[2]],
        flags: corner.flags,
        poly: corner.poly,
        points: corners.iter().map(|c| c.pos).collect(),
    })
}

/// Splice the polygons visited by a surface move into the corridor.
///
/// The furthest polygon shared by both lists is found, the visited polygons
/// up to it replace the corridor head (most recent first) and the untouched
/// tail is kept, capped at `max_path`.
pub fn fixup_corridor(path: &mut Vec<PolyRef>, max_path: usize, visited: &[PolyRef]) {
    let mut furthest = None;
    'outer: for i in (0..path.len()).rev() {
        for j in (0..visited.len()).rev() {
            if path[i] == visited[j] {
                furthest = Some((i, j));
                break 'outer;
            }
        }
    }
    let Some((furthest_path, furthest_visited)) = furthest else {
        return;
    };

    let req = (visited.len() - furthest_visited).min(max_path);
    let orig = (furthest_path + 1).min(path.len());
    let size = (path.len() - orig).min(max_path - req);

    let mut fixed = Vec::with_capacity(req + size);
    fixed.extend(visited[visited.len() - req..].iter().rev());
    fixed.extend_from_slice(&path[orig..orig + size]);
    *path = fixed;
}

/// Cut the corridor short when a neighbour of its first polygon shows up a
/// few polygons further along; this removes small U-turns.
pub fn fixup_shortcuts(path: &mut Vec<PolyRef>, query: &NavMeshQuery) {
    if path.len() < 3 {
        return;
    }
    let neis: Vec<PolyRef> = query
        .nav_mesh()
        .links(path[0])
        .iter()
        .map(|l| l.target)
        .filter(|r| !r.is_null())
        .take(SHORTCUT_MAX_NEIS)
        .collect();

    let max_look = SHORTCUT_LOOK_AHEAD.min(path.len());
    let cut = (2..max_look).rev().find(|&i| neis.contains(&path[i]));
    if let Some(cut) = cut {
        path.drain(1..cut);
    }
}

/// Corridor from an agent's polygon towards its goal
#[derive(Clone, Debug)]
pub struct PathCorridor {
    pos: Vec3,
    target: Vec3,
    path: Vec<PolyRef>,
    max_path: usize,
}

impl PathCorridor {
    pub fn new(max_path: usize) -> Self {
        PathCorridor { pos: [0.0; 3], target: [0.0; 3], path: Vec::new(), max_path: max_path.max(1) }
    }

    /// Start over from a single polygon
    pub fn reset(&mut self, r: PolyRef, pos: Vec3) {
        self.pos = pos;
        self.target = pos;
        self.path.clear();
        if !r.is_null() {
            self.path.push(r);
        }
    }

    pub fn set_corridor(&mut self, target: Vec3, path: &[PolyRef]) {
        self.target = target;
        self.path.clear();
        self.path.extend_from_slice(&path[..path.len().min(self.max_path)]);
    }

    pub fn pos(&self) -> Vec3 {
        self.pos
    }

    pub fn target(&self) -> Vec3 {
        self.target
    }

    pub fn path(&self) -> &[PolyRef] {
        &self.path
    }

    pub fn first_poly(&self) -> PolyRef {
        self.path.first().copied().unwrap_or(PolyRef::NULL)
    }

    pub fn last_poly(&self) -> PolyRef {
        self.path.last().copied().unwrap_or(PolyRef::NULL)
    }

    pub fn find_steer_target(&self, query: &NavMeshQuery, min_target_dist: f32) -> Option<SteerTarget> {
        if self.path.is_empty() {
            return None;
        }
        find_steer_target(query, &self.pos, &self.target, min_target_dist, &self.path)
    }

    /// Move the agent along the surface towards `npos` and repair the
    /// corridor. Returns false when the corridor is empty or stale.
    pub fn move_position(&mut self, npos: &Vec3, query: &NavMeshQuery, filter: &QueryFilter) -> bool {
        let Some(&first) = self.path.first() else { return false };
        let Some((result, visited)) = query.move_along_surface(first, &self.pos, npos, filter, MAX_VISITED) else {
            return false;
        };
        fixup_corridor(&mut self.path, self.max_path, &visited);
        fixup_shortcuts(&mut self.path, query);

        self.pos = result;
        if let Some(&first) = self.path.first()
            && let Some(h) = query.get_poly_height(first, &result)
        {
            self.pos[1] = h;
        }
        true
    }

    /// Skip past an off-mesh connection the agent stands at the entry of.
    /// Returns the connection's start and end points.
    pub fn move_over_off_mesh_connection(&mut self, con_ref: PolyRef, query: &NavMeshQuery) -> Option<(Vec3, Vec3)> {
        let idx = self.path.iter().position(|&r| r == con_ref)?;
        let prev = if idx > 0 { self.path[idx - 1] } else { PolyRef::NULL };
        let (start, end) = query.get_off_mesh_connection_poly_end_points(prev, con_ref)?;
        self.path.drain(..=idx);
        self.pos = end;
        if let Some(&first) = self.path.first()
            && let Some(h) = query.get_poly_height(first, &end)
        {
            self.pos[1] = h;
        }
        Some((start, end))
    }
}

/// Follow `path` from `start_pos` to `end_pos` in fixed steps, returning every
/// position the agent passes through.
pub fn smooth_path(
    query: &NavMeshQuery,
    filter: &QueryFilter,
    start_pos: &Vec3,
    end_pos: &Vec3,
    path: &[PolyRef],
) -> Vec<Vec3> {
    let mut smooth = Vec::new();
    let (Some(&first), Some(&last)) = (path.first(), path.last()) else {
        return smooth;
    };
    let Some((iter_pos, _)) = query.closest_point_on_poly(first, start_pos) else {
        return smooth;
    };
    let Some((target_pos, _)) = query.closest_point_on_poly(last, end_pos) else {
        return smooth;
    };

    let mut corridor = PathCorridor::new(MAX_POLYS);
    corridor.pos = iter_pos;
    corridor.set_corridor(target_pos, path);
    smooth.push(iter_pos);

    while !corridor.path.is_empty() && smooth.len() < MAX_SMOOTH {
        let Some(steer) = corridor.find_steer_target(query, SLOP) else { break };
        let end_of_path = steer.is_end();
        let off_mesh = steer.is_off_mesh();

        // Step towards the corner, landing on it exactly when it is the last
        // step before the end or an off-mesh entry
        let delta = vsub(&steer.pos, &corridor.pos);
        let mut len = vdot(&delta, &delta).sqrt();
        if (end_of_path || off_mesh) && len < STEP_SIZE {
            len = 1.0;
        } else {
            len = STEP_SIZE / len;
        }
        let move_tgt = vmad(&corridor.pos, &delta, len);
        if !corridor.move_position(&move_tgt, query, filter) {
            break;
        }

        if end_of_path && in_range(&corridor.pos, &steer.pos, SLOP, 1.0) {
            smooth.push(target_pos);
            break;
        }
        if off_mesh && in_range(&corridor.pos, &steer.pos, SLOP, 1.0) {
            let Some((start, end)) = corridor.move_over_off_mesh_connection(steer.poly, query) else {
                debug!("Off-mesh connection {} is not in the corridor", steer.poly);
                break;
            };
            smooth.push(start);
            smooth.push(end);
            continue;
        }
        smooth.push(corridor.pos);
    }
    smooth
}

// query.rs - searches over a borrowed navmesh
//
// Query misses are not errors: an invalid reference or an unreachable goal
// gives a null reference or an empty result.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, VecDeque};

use crate::math::{dist_pt_seg_sqr_2d, intersect_segment_poly_2d, point_in_poly, tri_area_2d, vdist, vequal, vlerp, vnormalize, Vec3};

use super::nav_mesh::NavMesh;
use super::tile::PolyType;
use super::{PolyRef, QueryFilter, DT_STRAIGHTPATH_END, DT_STRAIGHTPATH_OFFMESH_CONNECTION, DT_STRAIGHTPATH_START};

/// Heuristic scale for the A* search
const H_SCALE: f32 = 0.999;
const MAX_SURFACE_STACK: usize = 48;
const MAX_SURFACE_NEIS: usize = 8;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StraightPathPoint {
    pub pos: Vec3,
    pub flags: u8,
    pub poly: PolyRef,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RaycastHit {
    /// Hit parameter along the segment; `f32::MAX` when the end was reached
    pub t: f32,
    pub hit_normal: Vec3,
    /// Polygon edge that was hit
    pub hit_edge: Option<usize>,
    /// Polygons visited, in order
    pub path: Vec<PolyRef>,
}

struct Node {
    r: PolyRef,
    pos: Vec3,
    cost: f32,
    total: f32,
    parent: Option<usize>,
    open: bool,
    closed: bool,
}

#[derive(PartialEq)]
struct OpenEntry {
    total: f32,
    node: usize,
}

impl Eq for OpenEntry {}

impl Ord for OpenEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // min-heap on total cost
        other.total.total_cmp(&self.total).then_with(|| other.node.cmp(&self.node))
    }
}

impl PartialOrd for OpenEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

pub struct NavMeshQuery<'a> {
    nav: &'a NavMesh,
    max_nodes: usize,
}

impl<'a> NavMeshQuery<'a> {
    pub fn new(nav: &'a NavMesh, max_nodes: usize) -> Self {
        NavMeshQuery { nav, max_nodes: max_nodes.max(1) }
    }

    pub fn nav_mesh(&self) -> &'a NavMesh {
        self.nav
    }

    /// Nearest polygon to `center` within the box `center ± half_ext`.
    /// Returns `PolyRef::NULL` when nothing passes the filter.
    pub fn find_nearest_poly(&self, center: &Vec3, half_ext: &Vec3, filter: &QueryFilter) -> (PolyRef, Vec3) {
        let mut best = (PolyRef::NULL, *center);
        let mut best_dist = f32::MAX;
        for tile in self.nav.tiles() {
            if let Some((ip, p, d)) = tile.nearest_poly_where(center, half_ext, |poly| filter.pass_filter(poly))
                && d < best_dist
            {
                best_dist = d;
                best = (tile.poly_ref(ip), p);
            }
        }
        best
    }

    /// Ground polygons whose bounds overlap the query box
    pub fn query_polygons(&self, center: &Vec3, half_ext: &Vec3, filter: &QueryFilter) -> Vec<PolyRef> {
        let qmin = [center[0] - half_ext[0], center[1] - half_ext[1], center[2] - half_ext[2]];
        let qmax = [center[0] + half_ext[0], center[1] + half_ext[1], center[2] + half_ext[2]];
        let mut out = Vec::new();
        for tile in self.nav.tiles() {
            for (ip, poly) in tile.polys.iter().enumerate() {
                if poly.poly_type != PolyType::Ground || !filter.pass_filter(poly) {
                    continue;
                }
                let (bmin, bmax) = tile.poly_bounds(ip);
                if crate::math::overlap_bounds(&qmin, &qmax, &bmin, &bmax) {
                    out.push(tile.poly_ref(ip));
                }
            }
        }
        out
    }

    pub fn closest_point_on_poly(&self, r: PolyRef, pos: &Vec3) -> Option<(Vec3, bool)> {
        let (tile, ip) = self.nav.tile_and_poly(r)?;
        Some(tile.closest_point_on_poly(ip, pos))
    }

    pub fn closest_point_on_poly_boundary(&self, r: PolyRef, pos: &Vec3) -> Option<Vec3> {
        let (tile, ip) = self.nav.tile_and_poly(r)?;
        Some(tile.closest_point_on_poly_boundary(ip, pos))
    }

    pub fn get_poly_height(&self, r: PolyRef, pos: &Vec3) -> Option<f32> {
        let (tile, ip) = self.nav.tile_and_poly(r)?;
        tile.poly_height(ip, pos)
    }

    pub fn get_off_mesh_connection_poly_end_points(&self, prev_ref: PolyRef, poly_ref: PolyRef) -> Option<(Vec3, Vec3)> {
        self.nav.off_mesh_connection_poly_end_points(prev_ref, poly_ref)
    }

    /// Left and right end of the portal between two linked polygons, with
    /// the polygon types on each side
    fn portal_points(&self, from: PolyRef, to: PolyRef) -> Option<(Vec3, Vec3, PolyType, PolyType)> {
        let (from_tile, fip) = self.nav.tile_and_poly(from)?;
        let (to_tile, tip) = self.nav.tile_and_poly(to)?;
        let from_poly = &from_tile.polys[fip];
        let to_poly = &to_tile.polys[tip];
        let link = from_tile.links[fip].iter().find(|l| l.target == to)?;

        if from_poly.poly_type == PolyType::OffMeshConnection {
            let v = from_tile.verts[*from_poly.verts.get(link.edge as usize)? as usize];
            return Some((v, v, from_poly.poly_type, to_poly.poly_type));
        }
        if to_poly.poly_type == PolyType::OffMeshConnection {
            let back = to_tile.links[tip].iter().find(|l| l.target == from)?;
            let v = to_tile.verts[*to_poly.verts.get(back.edge as usize)? as usize];
            return Some((v, v, from_poly.poly_type, to_poly.poly_type));
        }

        let nv = from_poly.verts.len();
        let e = link.edge as usize;
        let v0 = from_tile.verts[*from_poly.verts.get(e)? as usize];
        let v1 = from_tile.verts[from_poly.verts[(e + 1) % nv] as usize];
        let (left, right) = if link.bmin != 0 || link.bmax != 255 {
            let s = 1.0 / 255.0;
            (vlerp(&v0, &v1, link.bmin as f32 * s), vlerp(&v0, &v1, link.bmax as f32 * s))
        } else {
            (v0, v1)
        };
        Some((left, right, from_poly.poly_type, to_poly.poly_type))
    }

    fn edge_mid_point(&self, from: PolyRef, to: PolyRef) -> Option<Vec3> {
        let (left, right, _, _) = self.portal_points(from, to)?;
        Some(vlerp(&left, &right, 0.5))
    }

    /// A* over the polygon graph. The result runs from `start_ref` to
    /// `end_ref`, truncated to `max_path`; empty when the goal is unreachable.
    pub fn find_path(
        &self,
        start_ref: PolyRef,
        end_ref: PolyRef,
        start_pos: &Vec3,
        end_pos: &Vec3,
        filter: &QueryFilter,
        max_path: usize,
    ) -> Vec<PolyRef> {
        if max_path == 0 || !self.nav.is_valid_poly_ref(start_ref) || !self.nav.is_valid_poly_ref(end_ref) {
            return Vec::new();
        }
        if start_ref == end_ref {
            return vec![start_ref];
        }

        let mut nodes: Vec<Node> = Vec::new();
        let mut lookup: HashMap<PolyRef, usize> = HashMap::new();
        let mut open = BinaryHeap::new();

        let h = vdist(start_pos, end_pos) * H_SCALE;
        nodes.push(Node { r: start_ref, pos: *start_pos, cost: 0.0, total: h, parent: None, open: true, closed: false });
        lookup.insert(start_ref, 0);
        open.push(OpenEntry { total: h, node: 0 });

        let mut end_node = None;
        while let Some(OpenEntry { total, node: best }) = open.pop() {
            if nodes[best].closed || total > nodes[best].total {
                continue;
            }
            nodes[best].open = false;
            nodes[best].closed = true;

            let best_ref = nodes[best].r;
            if best_ref == end_ref {
                end_node = Some(best);
                break;
            }
            let Some((best_tile, bip)) = self.nav.tile_and_poly(best_ref) else { continue };
            let best_poly = &best_tile.polys[bip];
            let parent_ref = nodes[best].parent.map(|p| nodes[p].r);

            for link in &best_tile.links[bip] {
                let nref = link.target;
                if nref.is_null() || Some(nref) == parent_ref {
                    continue;
                }
                let Some(npoly) = self.nav.poly(nref) else { continue };
                if !filter.pass_filter(npoly) {
                    continue;
                }

                let ni = match lookup.get(&nref) {
                    Some(&ni) => ni,
                    None => {
                        if nodes.len() >= self.max_nodes {
                            continue;
                        }
                        let Some(pos) = self.edge_mid_point(best_ref, nref) else { continue };
                        nodes.push(Node {
                            r: nref,
                            pos,
                            cost: 0.0,
                            total: 0.0,
                            parent: None,
                            open: false,
                            closed: false,
                        });
                        lookup.insert(nref, nodes.len() - 1);
                        nodes.len() - 1
                    }
                };

                let npos = nodes[ni].pos;
                let (cost, heuristic) = if nref == end_ref {
                    let cur = filter.cost(&nodes[best].pos, &npos, best_poly);
                    let end_cost = filter.cost(&npos, end_pos, npoly);
                    (nodes[best].cost + cur + end_cost, 0.0)
                } else {
                    let cur = filter.cost(&nodes[best].pos, &npos, best_poly);
                    (nodes[best].cost + cur, vdist(&npos, end_pos) * H_SCALE)
                };
                let total = cost + heuristic;

                let node = &mut nodes[ni];
                if (node.open || node.closed) && total >= node.total {
                    continue;
                }
                node.parent = Some(best);
                node.cost = cost;
                node.total = total;
                node.closed = false;
                node.open = true;
                open.push(OpenEntry { total, node: ni });
            }
        }

        let Some(mut cur) = end_node else {
            return Vec::new();
        };
        let mut path = vec![nodes[cur].r];
        while let Some(p) = nodes[cur].parent {
            path.push(nodes[p].r);
            cur = p;
        }
        path.reverse();
        path.truncate(max_path);
        path
    }

    /// String-pulled corner points along a polygon corridor
    pub fn find_straight_path(
        &self,
        start_pos: &Vec3,
        end_pos: &Vec3,
        path: &[PolyRef],
        max_straight: usize,
    ) -> Vec<StraightPathPoint> {
        let mut out = Vec::new();
        if path.is_empty() || max_straight == 0 {
            return out;
        }
        let Some(closest_start) = self.closest_point_on_poly_boundary(path[0], start_pos) else {
            return out;
        };
        let Some(mut closest_end) = self.closest_point_on_poly_boundary(path[path.len() - 1], end_pos) else {
            return out;
        };

        if !append_vertex(&mut out, closest_start, DT_STRAIGHTPATH_START, path[0], max_straight) {
            return out;
        }

        if path.len() > 1 {
            let mut apex = closest_start;
            let mut portal_left = apex;
            let mut portal_right = apex;
            let mut apex_index = 0;
            let mut left_index = 0;
            let mut right_index = 0;
            let mut left_type = PolyType::Ground;
            let mut right_type = PolyType::Ground;
            let mut left_ref = path[0];
            let mut right_ref = path[0];

            let mut i = 0;
            while i < path.len() {
                let (left, right, to_type) = if i + 1 < path.len() {
                    match self.portal_points(path[i], path[i + 1]) {
                        Some((l, r, _, to_type)) => {
                            // starting right on the first portal: skip it
                            if i == 0 && dist_pt_seg_sqr_2d(&apex, &l, &r).0 < 0.001 * 0.001 {
                                i += 1;
                                continue;
                            }
                            (l, r, to_type)
                        }
                        None => {
                            // broken corridor: end at the last reachable polygon
                            if let Some(p) = self.closest_point_on_poly_boundary(path[i], end_pos) {
                                closest_end = p;
                                append_vertex(&mut out, closest_end, 0, path[i], max_straight);
                            }
                            return out;
                        }
                    }
                } else {
                    (closest_end, closest_end, PolyType::Ground)
                };
                let next_ref = path.get(i + 1).copied().unwrap_or(PolyRef::NULL);

                // Right side
                if tri_area_2d(&apex, &portal_right, &right) <= 0.0 {
                    if vequal(&apex, &portal_right) || tri_area_2d(&apex, &portal_left, &right) > 0.0 {
                        portal_right = right;
                        right_ref = next_ref;
                        right_type = to_type;
                        right_index = i;
                    } else {
                        // left over right: the left point becomes the new apex
                        apex = portal_left;
                        apex_index = left_index;
                        let flags = corner_flags(left_ref, left_type);
                        if !append_vertex(&mut out, apex, flags, left_ref, max_straight) {
                            return out;
                        }
                        portal_left = apex;
                        portal_right = apex;
                        left_index = apex_index;
                        right_index = apex_index;
                        i = apex_index + 1;
                        continue;
                    }
                }

                // Left side
                if tri_area_2d(&apex, &portal_left, &left) >= 0.0 {
                    if vequal(&apex, &portal_left) || tri_area_2d(&apex, &portal_right, &left) < 0.0 {
                        portal_left = left;
                        left_ref = next_ref;
                        left_type = to_type;
                        left_index = i;
                    } else {
                        apex = portal_right;
                        apex_index = right_index;
                        let flags = corner_flags(right_ref, right_type);
                        if !append_vertex(&mut out, apex, flags, right_ref, max_straight) {
                            return out;
                        }
                        portal_left = apex;
                        portal_right = apex;
                        left_index = apex_index;
                        right_index = apex_index;
                        i = apex_index + 1;
                        continue;
                    }
                }
                i += 1;
            }
        }

        append_vertex(&mut out, closest_end, DT_STRAIGHTPATH_END, PolyRef::NULL, max_straight);
        out
    }

    /// Walk a straight segment along the surface from `start_ref`.
    /// `None` when the start reference is invalid.
    pub fn raycast(
        &self,
        start_ref: PolyRef,
        start_pos: &Vec3,
        end_pos: &Vec3,
        filter: &QueryFilter,
        max_path: usize,
    ) -> Option<RaycastHit> {
        if !self.nav.is_valid_poly_ref(start_ref) {
            return None;
        }
        let mut hit = RaycastHit { t: 0.0, hit_normal: [0.0; 3], hit_edge: None, path: Vec::new() };
        let mut cur = start_ref;

        while !cur.is_null() {
            let (tile, ip) = self.nav.tile_and_poly(cur)?;
            let verts = tile.poly_verts(ip);
            let nv = verts.len();

            let Some((_, tmax, _, seg_max)) = intersect_segment_poly_2d(start_pos, end_pos, &verts) else {
                // could not hit the polygon, keep the old t
                return Some(hit);
            };
            if tmax > hit.t {
                hit.t = tmax;
            }
            if hit.path.len() < max_path {
                hit.path.push(cur);
            }

            let Some(seg_max) = seg_max else {
                // ray end is inside this polygon
                hit.t = f32::MAX;
                return Some(hit);
            };

            let mut next = PolyRef::NULL;
            for link in &tile.links[ip] {
                if link.edge as usize != seg_max {
                    continue;
                }
                let Some(npoly) = self.nav.poly(link.target) else { continue };
                if npoly.poly_type == PolyType::OffMeshConnection || !filter.pass_filter(npoly) {
                    continue;
                }
                if link.bmin == 0 && link.bmax == 255 {
                    next = link.target;
                    break;
                }
                // partial portal: the crossing must fall inside the shared stretch
                let left = verts[seg_max];
                let right = verts[(seg_max + 1) % nv];
                let p = vlerp(start_pos, end_pos, tmax);
                let (_, t) = dist_pt_seg_sqr_2d(&p, &left, &right);
                let s = 1.0 / 255.0;
                let eps = 1e-4;
                if t >= link.bmin as f32 * s - eps && t <= link.bmax as f32 * s + eps {
                    next = link.target;
                    break;
                }
            }

            if next.is_null() {
                let va = verts[seg_max];
                let vb = verts[(seg_max + 1) % nv];
                let dx = vb[0] - va[0];
                let dz = vb[2] - va[2];
                hit.hit_normal = vnormalize(&[dz, 0.0, -dx]);
                hit.hit_edge = Some(seg_max);
                return Some(hit);
            }
            cur = next;
        }
        Some(hit)
    }

    /// Move from `start_pos` towards `end_pos` constrained to the surface.
    /// Returns the reached position and the polygons visited from the start
    /// polygon to the one containing the result (at most `max_visited`).
    pub fn move_along_surface(
        &self,
        start_ref: PolyRef,
        start_pos: &Vec3,
        end_pos: &Vec3,
        filter: &QueryFilter,
        max_visited: usize,
    ) -> Option<(Vec3, Vec<PolyRef>)> {
        if !self.nav.is_valid_poly_ref(start_ref) {
            return None;
        }

        struct SearchNode {
            r: PolyRef,
            parent: Option<usize>,
        }
        let mut nodes = vec![SearchNode { r: start_ref, parent: None }];
        let mut closed: HashMap<PolyRef, usize> = HashMap::from([(start_ref, 0)]);
        let mut stack: VecDeque<usize> = VecDeque::from([0]);

        let mut best_pos = *start_pos;
        let mut best_dist = f32::MAX;
        let mut best_node = 0;

        let search_pos = vlerp(start_pos, end_pos, 0.5);
        let search_rad = vdist(start_pos, end_pos) / 2.0 + 0.001;
        let search_rad_sqr = search_rad * search_rad;

        while let Some(cur) = stack.pop_front() {
            let cur_ref = nodes[cur].r;
            let Some((tile, ip)) = self.nav.tile_and_poly(cur_ref) else { continue };
            let verts = tile.poly_verts(ip);
            let nv = verts.len();

            if point_in_poly(&verts, end_pos) {
                best_node = cur;
                best_pos = *end_pos;
                break;
            }

            let mut j = nv - 1;
            for i in 0..nv {
                let neis: Vec<PolyRef> = tile.links[ip]
                    .iter()
                    .filter(|l| l.edge as usize == j)
                    .filter(|l| self.nav.poly(l.target).is_some_and(|p| filter.pass_filter(p)))
                    .map(|l| l.target)
                    .take(MAX_SURFACE_NEIS)
                    .collect();

                let vj = &verts[j];
                let vi = &verts[i];
                if neis.is_empty() {
                    // wall edge
                    let (d, t) = dist_pt_seg_sqr_2d(end_pos, vj, vi);
                    if d < best_dist {
                        best_pos = vlerp(vj, vi, t);
                        best_dist = d;
                        best_node = cur;
                    }
                } else {
                    for nref in neis {
                        if closed.contains_key(&nref) {
                            continue;
                        }
                        let (d, _) = dist_pt_seg_sqr_2d(&search_pos, vj, vi);
                        if d > search_rad_sqr {
                            continue;
                        }
                        if stack.len() < MAX_SURFACE_STACK && nodes.len() < self.max_nodes {
                            nodes.push(SearchNode { r: nref, parent: Some(cur) });
                            closed.insert(nref, nodes.len() - 1);
                            stack.push_back(nodes.len() - 1);
                        }
                    }
                }
                j = i;
            }
        }

        let mut visited = vec![nodes[best_node].r];
        let mut n = best_node;
        while let Some(p) = nodes[n].parent {
            visited.push(nodes[p].r);
            n = p;
        }
        visited.reverse();
        visited.truncate(max_visited);
        Some((best_pos, visited))
    }
}

fn corner_flags(r: PolyRef, poly_type: PolyType) -> u8 {
    if r.is_null() {
        DT_STRAIGHTPATH_END
    } else if poly_type == PolyType::OffMeshConnection {
        DT_STRAIGHTPATH_OFFMESH_CONNECTION
    } else {
        0
    }
}

/// Append a corner, merging it with an equal previous one. Returns false
/// once the path is complete or full.
fn append_vertex(out: &mut Vec<StraightPathPoint>, pos: Vec3, flags: u8, poly: PolyRef, max: usize) -> bool {
    match out.last_mut() {
        Some(last) if vequal(&last.pos, &pos) => {
            last.flags = flags;
            last.poly = poly;
        }
        _ => {
            out.push(StraightPathPoint { pos, flags, poly });
            if out.len() >= max {
                return false;
            }
        }
    }
    flags != DT_STRAIGHTPATH_END
}

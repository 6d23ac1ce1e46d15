// prune.rs - disable navmesh islands that cannot be reached
//
// Clicking flood-fills the polygons reachable from the clicked one. Toggling
// then disables every polygon that was not reached.

use std::collections::HashSet;

use tracing::info;

use crate::areas::POLYFLAGS_DISABLED;
use crate::detour::{NavMesh, PolyRef};
use crate::math::Vec3;

use super::tester::POLY_PICK_EXT;
use super::{Tool, ToolKind, Workspace};

#[derive(Clone, Debug, Default)]
pub struct PruneTool {
    visited: HashSet<PolyRef>,
}

impl PruneTool {
    pub fn visited(&self) -> &HashSet<PolyRef> {
        &self.visited
    }
}

/// Every polygon reachable from `start` over links
pub fn flood_reachable(nav: &NavMesh, start: PolyRef, visited: &mut HashSet<PolyRef>) {
    if !nav.is_valid_poly_ref(start) || !visited.insert(start) {
        return;
    }
    let mut open = vec![start];
    while let Some(r) = open.pop() {
        for link in nav.links(r) {
            if !link.target.is_null() && visited.insert(link.target) {
                open.push(link.target);
            }
        }
    }
}

/// Set the disabled flag on every polygon outside `visited`; returns the count
pub fn disable_unvisited(nav: &mut NavMesh, visited: &HashSet<PolyRef>) -> usize {
    let unvisited: Vec<PolyRef> = nav
        .tiles()
        .flat_map(|tile| (0..tile.polys.len()).map(move |ip| tile.poly_ref(ip)))
        .filter(|r| !visited.contains(r))
        .collect();
    for &r in &unvisited {
        let flags = nav.poly_flags(r).unwrap_or(0);
        nav.set_poly_flags(r, flags | POLYFLAGS_DISABLED);
    }
    unvisited.len()
}

impl Tool for PruneTool {
    fn kind(&self) -> ToolKind {
        ToolKind::Prune
    }

    fn reset(&mut self) {
        self.visited.clear();
    }

    fn handle_click(&mut self, ws: &mut Workspace, pos: &Vec3, _shift: bool) {
        let Some(query) = ws.query() else { return };
        let (r, _) = query.find_nearest_poly(pos, &POLY_PICK_EXT, ws.filter());
        if r.is_null() {
            return;
        }
        flood_reachable(query.nav_mesh(), r, &mut self.visited);
    }

    fn handle_toggle(&mut self, ws: &mut Workspace) {
        if self.visited.is_empty() {
            return;
        }
        let Some(nav) = ws.pipeline_mut().nav_mesh_mut() else { return };
        let n = disable_unvisited(nav, &self.visited);
        info!("Disabled {} unreachable polygons", n);
        self.visited.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::areas::default_filter;
    use crate::detour::tile::tests::sample_nav_mesh;
    use crate::detour::NavMeshQuery;

    #[test]
    fn test_flood_and_disable() {
        let mut nav = sample_nav_mesh(&[]);
        let (p0, p1, p2) = {
            let tile = nav.tiles().next().unwrap();
            (tile.poly_ref(0), tile.poly_ref(1), tile.poly_ref(2))
        };
        let mut visited = HashSet::new();
        flood_reachable(&nav, p0, &mut visited);
        assert_eq!(visited.len(), 3);

        // cut the corridor by pretending only the first quad was reached
        let only_first: HashSet<PolyRef> = [p0].into_iter().collect();
        assert_eq!(disable_unvisited(&mut nav, &only_first), 2);
        assert_eq!(nav.poly_flags(p1), Some(1 | POLYFLAGS_DISABLED));
        assert_eq!(nav.poly_flags(p0), Some(1));

        // disabled polygons no longer pass the tools' filter
        let q = NavMeshQuery::new(&nav, 256);
        let filter = default_filter();
        assert!(q.find_path(p0, p2, &[1.0, 0.0, 1.0], &[5.0, 0.0, 3.0], &filter, 256).is_empty());
    }

    #[test]
    fn test_flood_ignores_invalid_start() {
        let nav = sample_nav_mesh(&[]);
        let mut visited = HashSet::new();
        flood_reachable(&nav, PolyRef::NULL, &mut visited);
        assert!(visited.is_empty());
    }
}

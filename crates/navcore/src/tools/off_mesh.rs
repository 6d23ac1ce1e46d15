// off_mesh.rs - authoring of off-mesh links
//
// First click sets the start, the second adds a link to the clicked point
// with the agent radius. Shift-click removes the link with an end point
// nearest to the cursor.

use tracing::{debug, info};

use crate::areas::{POLYAREA_JUMP, POLYFLAGS_JUMP};
use crate::math::{vdist_sqr, Vec3};

use super::{Tool, ToolKind, Workspace};

#[derive(Clone, Debug)]
pub struct OffMeshLinkTool {
    pub bidirectional: bool,
    hit_pos: Option<Vec3>,
}

impl Default for OffMeshLinkTool {
    fn default() -> Self {
        OffMeshLinkTool { bidirectional: true, hit_pos: None }
    }
}

impl OffMeshLinkTool {
    /// Start point of the link being placed
    pub fn pending_start(&self) -> Option<Vec3> {
        self.hit_pos
    }
}

impl Tool for OffMeshLinkTool {
    fn kind(&self) -> ToolKind {
        ToolKind::OffMeshLink
    }

    fn reset(&mut self) {
        self.hit_pos = None;
    }

    fn handle_click(&mut self, ws: &mut Workspace, pos: &Vec3, shift: bool) {
        let radius = ws.settings().agent_radius;
        let Some(geom) = ws.geometry_mut() else { return };

        if shift {
            let nearest = geom
                .off_mesh_connections()
                .iter()
                .enumerate()
                .map(|(i, c)| (i, vdist_sqr(pos, &c.start).min(vdist_sqr(pos, &c.end))))
                .filter(|&(_, d)| d < radius * radius)
                .min_by(|a, b| a.1.total_cmp(&b.1));
            if let Some((i, _)) = nearest {
                geom.delete_off_mesh_connection(i);
                debug!("Deleted off-mesh connection {}", i);
            }
            return;
        }

        match self.hit_pos.take() {
            None => self.hit_pos = Some(*pos),
            Some(start) => {
                if geom.add_off_mesh_connection(start, *pos, radius, self.bidirectional, POLYAREA_JUMP, POLYFLAGS_JUMP) {
                    info!(
                        "Added off-mesh connection ({:.2}, {:.2}, {:.2}) -> ({:.2}, {:.2}, {:.2})",
                        start[0], start[1], start[2], pos[0], pos[1], pos[2]
                    );
                }
            }
        }
    }
}

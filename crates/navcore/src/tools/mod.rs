// tools/mod.rs - interactive tools and the workspace they act on
//
// A `Workspace` owns the loaded geometry, the build settings, the pipeline
// and at most one active tool. Input events are forwarded to the tool
// together with the workspace so the tool can edit geometry or query the
// navmesh.

pub mod convex_volume;
pub mod off_mesh;
pub mod prune;
pub mod tester;

use std::fmt;
use std::path::Path;

use tracing::{info, warn};

use crate::areas::default_filter;
use crate::detour::{NavMesh, NavMeshQuery, QueryFilter};
use crate::geometry::InputGeometry;
use crate::math::Vec3;
use crate::pipeline::NavMeshPipeline;
use crate::settings::BuildSettings;

pub use convex_volume::ConvexVolumeTool;
pub use off_mesh::OffMeshLinkTool;
pub use prune::PruneTool;
pub use tester::{NavMeshTesterTool, TesterMode};

/// Search nodes for queries issued by tools
pub const MAX_QUERY_NODES: usize = 2048;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ToolKind {
    ConvexVolume,
    OffMeshLink,
    NavMeshTester,
    Prune,
}

impl ToolKind {
    pub const ALL: [ToolKind; 4] =
        [ToolKind::ConvexVolume, ToolKind::OffMeshLink, ToolKind::NavMeshTester, ToolKind::Prune];

    pub fn name(self) -> &'static str {
        match self {
            ToolKind::ConvexVolume => "Create Convex Volumes",
            ToolKind::OffMeshLink => "Create Off-Mesh Links",
            ToolKind::NavMeshTester => "Test Navmesh",
            ToolKind::Prune => "Prune Navmesh",
        }
    }
}

impl fmt::Display for ToolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

pub trait Tool: Send {
    fn kind(&self) -> ToolKind;

    /// Drop any pending interaction state
    fn reset(&mut self);

    /// A click on the mesh at `pos`; `shift` selects the alternate action
    fn handle_click(&mut self, ws: &mut Workspace, pos: &Vec3, shift: bool);

    fn handle_toggle(&mut self, _ws: &mut Workspace) {}

    fn handle_step(&mut self, _ws: &mut Workspace) {}

    fn handle_update(&mut self, _ws: &mut Workspace, _dt: f32) {}
}

pub fn create_tool(kind: ToolKind) -> Box<dyn Tool> {
    match kind {
        ToolKind::ConvexVolume => Box::new(ConvexVolumeTool::default()),
        ToolKind::OffMeshLink => Box::new(OffMeshLinkTool::default()),
        ToolKind::NavMeshTester => Box::new(NavMeshTesterTool::default()),
        ToolKind::Prune => Box::new(PruneTool::default()),
    }
}

pub struct Workspace {
    geometry: Option<InputGeometry>,
    settings: BuildSettings,
    pipeline: NavMeshPipeline,
    filter: QueryFilter,
    tool: Option<Box<dyn Tool>>,
}

impl Workspace {
    pub fn new(settings: BuildSettings) -> Self {
        Workspace {
            geometry: None,
            settings,
            pipeline: NavMeshPipeline::new(settings),
            filter: default_filter(),
            tool: None,
        }
    }

    pub fn with_pipeline(settings: BuildSettings, pipeline: NavMeshPipeline) -> Self {
        Workspace { pipeline, ..Workspace::new(settings) }
    }

    pub fn geometry(&self) -> Option<&InputGeometry> {
        self.geometry.as_ref()
    }

    pub fn geometry_mut(&mut self) -> Option<&mut InputGeometry> {
        self.geometry.as_mut()
    }

    /// Replace the geometry; settings stored with it take over
    pub fn set_geometry(&mut self, geom: InputGeometry) {
        if let Some(s) = geom.build_settings() {
            self.settings = *s;
        }
        self.geometry = Some(geom);
        self.handle_mesh_changed();
    }

    pub fn load_geometry(&mut self, path: &Path) -> bool {
        match InputGeometry::load(path) {
            Some(geom) => {
                info!("Loaded geometry '{}' ({} triangles)", path.display(), geom.mesh().tri_count());
                self.set_geometry(geom);
                true
            }
            None => false,
        }
    }

    pub fn settings(&self) -> &BuildSettings {
        &self.settings
    }

    pub fn set_settings(&mut self, settings: BuildSettings) {
        self.settings = settings;
    }

    pub fn pipeline(&self) -> &NavMeshPipeline {
        &self.pipeline
    }

    pub fn pipeline_mut(&mut self) -> &mut NavMeshPipeline {
        &mut self.pipeline
    }

    pub fn nav_mesh(&self) -> Option<&NavMesh> {
        self.pipeline.nav_mesh()
    }

    pub fn query(&self) -> Option<NavMeshQuery<'_>> {
        self.pipeline.query(MAX_QUERY_NODES)
    }

    pub fn filter(&self) -> &QueryFilter {
        &self.filter
    }

    pub fn filter_mut(&mut self) -> &mut QueryFilter {
        &mut self.filter
    }

    pub fn set_tool(&mut self, kind: ToolKind) {
        self.tool = Some(create_tool(kind));
    }

    pub fn tool(&self) -> Option<&dyn Tool> {
        self.tool.as_deref()
    }

    /// Run `f` with the tool taken out so it can borrow the workspace
    fn with_tool(&mut self, f: impl FnOnce(&mut dyn Tool, &mut Workspace)) {
        if let Some(mut tool) = self.tool.take() {
            f(tool.as_mut(), self);
            if self.tool.is_none() {
                self.tool = Some(tool);
            }
        }
    }

    pub fn click(&mut self, pos: &Vec3, shift: bool) {
        self.with_tool(|tool, ws| tool.handle_click(ws, pos, shift));
    }

    pub fn toggle(&mut self) {
        self.with_tool(|tool, ws| tool.handle_toggle(ws));
    }

    pub fn step(&mut self) {
        self.with_tool(|tool, ws| tool.handle_step(ws));
    }

    pub fn update(&mut self, dt: f32) {
        self.with_tool(|tool, ws| tool.handle_update(ws, dt));
    }

    /// Build the navmesh from the current geometry and settings
    pub fn build(&mut self) -> bool {
        let Some(geom) = self.geometry.as_ref() else {
            warn!("Cannot build navigation: no input mesh loaded");
            return false;
        };
        self.pipeline.set_settings(self.settings);
        let ok = self.pipeline.build(geom);
        if let Some(tool) = self.tool.as_mut() {
            tool.reset();
        }
        ok
    }

    /// Geometry was replaced: drop the navmesh and any tool state tied to it
    pub fn handle_mesh_changed(&mut self) {
        self.pipeline.handle_mesh_changed();
        if let Some(tool) = self.tool.as_mut() {
            tool.reset();
        }
    }
}

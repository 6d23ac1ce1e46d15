// pipeline.rs - staged navmesh build
//
// `NavMeshPipeline::build` drives the voxel engine stage by stage and hands
// the polygon and detail mesh to the tile builder. The state only moves
// forward; the first failing stage lands in `Failed` with every artifact
// released.

use std::fmt;
use std::sync::mpsc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::areas::{flags_for_area, POLYAREA_GROUND};
use crate::detour::{create_nav_mesh_data, NavMesh, NavMeshCreateParams, NavMeshQuery};
use crate::geometry::InputGeometry;
use crate::recast::{
    CompactHeightfield, ContourSet, EngineError, Heightfield, NativeEngine, PolyMesh, PolyMeshDetail, VoxelEngine,
    RC_WALKABLE_AREA,
};
use crate::settings::BuildSettings;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BuildState {
    Empty,
    Rasterized,
    Filtered,
    Partitioned,
    ContoursBuilt,
    PolygonMeshBuilt,
    DetailMeshBuilt,
    QueryMeshReady,
    Failed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BuildStage {
    Rasterize,
    Filter,
    CompactHeightfield,
    Erode,
    MarkAreas,
    Partition,
    Contours,
    PolyMesh,
    DetailMesh,
    NavMeshData,
    NavMeshInit,
}

impl BuildStage {
    pub fn name(self) -> &'static str {
        match self {
            BuildStage::Rasterize => "rasterize",
            BuildStage::Filter => "filter",
            BuildStage::CompactHeightfield => "compact heightfield",
            BuildStage::Erode => "erode",
            BuildStage::MarkAreas => "mark areas",
            BuildStage::Partition => "partition",
            BuildStage::Contours => "contours",
            BuildStage::PolyMesh => "polygon mesh",
            BuildStage::DetailMesh => "detail mesh",
            BuildStage::NavMeshData => "navmesh data",
            BuildStage::NavMeshInit => "navmesh init",
        }
    }
}

impl fmt::Display for BuildStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("build stage '{stage}' failed: {kind}")]
pub struct BuildError {
    pub stage: BuildStage,
    pub kind: EngineError,
}

// ============================================================================
// Build context: categorized log and stage timers
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogCategory {
    Progress,
    Warning,
    Error,
}

#[derive(Clone, Debug, PartialEq)]
pub struct LogEntry {
    pub category: LogCategory,
    pub message: String,
}

#[derive(Clone, Debug, Default)]
pub struct BuildContext {
    entries: Vec<LogEntry>,
    timers: Vec<(BuildStage, Duration)>,
    total: Duration,
}

impl BuildContext {
    pub fn reset(&mut self) {
        self.entries.clear();
        self.timers.clear();
        self.total = Duration::ZERO;
    }

    pub fn log(&mut self, category: LogCategory, message: impl Into<String>) {
        let message = message.into();
        match category {
            LogCategory::Progress => debug!("{}", message),
            LogCategory::Warning => warn!("{}", message),
            LogCategory::Error => error!("{}", message),
        }
        self.entries.push(LogEntry { category, message });
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    pub fn errors(&self) -> impl Iterator<Item = &LogEntry> {
        self.entries.iter().filter(|e| e.category == LogCategory::Error)
    }

    fn record_time(&mut self, stage: BuildStage, elapsed: Duration) {
        self.timers.push((stage, elapsed));
    }

    pub fn stage_time(&self, stage: BuildStage) -> Option<Duration> {
        self.timers.iter().find(|(s, _)| *s == stage).map(|(_, d)| *d)
    }

    pub fn stage_times(&self) -> &[(BuildStage, Duration)] {
        &self.timers
    }

    pub fn total_time(&self) -> Duration {
        self.total
    }

    /// Log every stage time with its share of the total
    pub fn log_build_times(&self) {
        let total = self.total.as_secs_f64().max(f64::EPSILON);
        for (stage, d) in &self.timers {
            info!(
                "  - {:<20} {:>8.2}ms ({:>5.1}%)",
                stage.name(),
                d.as_secs_f64() * 1000.0,
                d.as_secs_f64() * 100.0 / total
            );
        }
        info!("=== TOTAL: {:.2}ms", self.total.as_secs_f64() * 1000.0);
    }
}

// ============================================================================
// Pipeline
// ============================================================================

pub struct NavMeshPipeline {
    engine: Box<dyn VoxelEngine>,
    settings: BuildSettings,
    state: BuildState,
    heightfield: Option<Heightfield>,
    compact: Option<CompactHeightfield>,
    contours: Option<ContourSet>,
    poly_mesh: Option<PolyMesh>,
    detail_mesh: Option<PolyMeshDetail>,
    nav_mesh: Option<NavMesh>,
    ctx: BuildContext,
    last_error: Option<BuildError>,
}

impl NavMeshPipeline {
    pub fn new(settings: BuildSettings) -> Self {
        Self::with_engine(settings, Box::new(NativeEngine))
    }

    pub fn with_engine(settings: BuildSettings, engine: Box<dyn VoxelEngine>) -> Self {
        NavMeshPipeline {
            engine,
            settings,
            state: BuildState::Empty,
            heightfield: None,
            compact: None,
            contours: None,
            poly_mesh: None,
            detail_mesh: None,
            nav_mesh: None,
            ctx: BuildContext::default(),
            last_error: None,
        }
    }

    pub fn settings(&self) -> &BuildSettings {
        &self.settings
    }

    /// Takes effect on the next build
    pub fn set_settings(&mut self, settings: BuildSettings) {
        self.settings = settings;
    }

    pub fn state(&self) -> BuildState {
        self.state
    }

    pub fn context(&self) -> &BuildContext {
        &self.ctx
    }

    pub fn last_error(&self) -> Option<&BuildError> {
        self.last_error.as_ref()
    }

    pub fn heightfield(&self) -> Option<&Heightfield> {
        self.heightfield.as_ref()
    }

    pub fn compact_heightfield(&self) -> Option<&CompactHeightfield> {
        self.compact.as_ref()
    }

    pub fn contour_set(&self) -> Option<&ContourSet> {
        self.contours.as_ref()
    }

    pub fn poly_mesh(&self) -> Option<&PolyMesh> {
        self.poly_mesh.as_ref()
    }

    pub fn detail_mesh(&self) -> Option<&PolyMeshDetail> {
        self.detail_mesh.as_ref()
    }

    pub fn nav_mesh(&self) -> Option<&NavMesh> {
        self.nav_mesh.as_ref()
    }

    pub fn nav_mesh_mut(&mut self) -> Option<&mut NavMesh> {
        self.nav_mesh.as_mut()
    }

    /// Move the finished navmesh out, leaving the pipeline empty
    pub fn take_nav_mesh(&mut self) -> Option<NavMesh> {
        let nav = self.nav_mesh.take();
        self.cleanup();
        nav
    }

    /// Replace the navmesh, e.g. with one loaded from disk
    pub fn set_nav_mesh(&mut self, nav: NavMesh) {
        self.cleanup();
        self.nav_mesh = Some(nav);
        self.state = BuildState::QueryMeshReady;
    }

    pub fn query(&self, max_nodes: usize) -> Option<NavMeshQuery<'_>> {
        self.nav_mesh.as_ref().map(|nav| NavMeshQuery::new(nav, max_nodes))
    }

    /// The input changed: every artifact is stale
    pub fn handle_mesh_changed(&mut self) {
        self.cleanup();
        self.last_error = None;
    }

    /// Free every artifact regardless of the keep-intermediate flag
    pub fn cleanup(&mut self) {
        self.heightfield = None;
        self.compact = None;
        self.contours = None;
        self.poly_mesh = None;
        self.detail_mesh = None;
        self.nav_mesh = None;
        self.state = BuildState::Empty;
    }

    /// Run every stage. Returns false and lands in `Failed` on the first
    /// stage error.
    pub fn build(&mut self, geom: &InputGeometry) -> bool {
        self.cleanup();
        self.ctx.reset();
        self.last_error = None;

        let start = Instant::now();
        let result = self.run_stages(geom);
        self.ctx.total = start.elapsed();

        match result {
            Ok(()) => {
                self.state = BuildState::QueryMeshReady;
                let (polys, verts) = self
                    .poly_mesh
                    .as_ref()
                    .map(|p| (p.poly_count(), p.verts.len()))
                    .unwrap_or_default();
                info!(
                    "Navmesh ready: {} polys, {} verts in {:.2}ms",
                    polys,
                    verts,
                    self.ctx.total.as_secs_f64() * 1000.0
                );
                self.ctx.log_build_times();
                true
            }
            Err(e) => {
                self.ctx.log(LogCategory::Error, format!("Build navigation failed: {}", e));
                self.cleanup();
                self.state = BuildState::Failed;
                self.last_error = Some(e);
                false
            }
        }
    }

    /// Time one engine call and tag its error with the stage
    fn stage<T>(
        &mut self,
        stage: BuildStage,
        f: impl FnOnce(&dyn VoxelEngine) -> Result<T, EngineError>,
    ) -> Result<T, BuildError> {
        let start = Instant::now();
        let result = f(self.engine.as_ref());
        self.ctx.record_time(stage, start.elapsed());
        result.map_err(|kind| BuildError { stage, kind })
    }

    fn run_stages(&mut self, geom: &InputGeometry) -> Result<(), BuildError> {
        let settings = self.settings;
        let keep = settings.keep_intermediate;
        let (bmin, bmax) = geom.bounds();
        let cfg = settings.to_voxel_config(&bmin, &bmax);
        let mesh = geom.mesh();

        self.ctx.log(
            LogCategory::Progress,
            format!(
                "Building navigation: {} x {} cells, {:.1}K verts, {:.1}K tris",
                cfg.width,
                cfg.height,
                mesh.vert_count() as f32 / 1000.0,
                mesh.tri_count() as f32 / 1000.0
            ),
        );

        // Voxelize
        let mut hf = self.stage(BuildStage::Rasterize, |e| e.rasterize(&cfg, mesh.verts(), mesh.tris()))?;
        self.state = BuildState::Rasterized;

        self.stage(BuildStage::Filter, |e| e.filter(&cfg, &mut hf))?;
        self.state = BuildState::Filtered;

        // Regions
        let mut chf = self.stage(BuildStage::CompactHeightfield, |e| e.build_compact(&cfg, &hf))?;
        if keep {
            self.heightfield = Some(hf);
        } else {
            drop(hf);
        }
        self.stage(BuildStage::Erode, |e| e.erode(&cfg, &mut chf))?;
        let volumes = geom.convex_volumes();
        self.stage(BuildStage::MarkAreas, |e| e.mark_areas(&cfg, volumes, &mut chf))?;
        self.stage(BuildStage::Partition, |e| e.partition(&cfg, &mut chf))?;
        self.ctx.log(
            LogCategory::Progress,
            format!("Partitioned ({:?}): {} regions", cfg.partition, chf.max_regions),
        );
        self.state = BuildState::Partitioned;

        // Polygons
        let cset = self.stage(BuildStage::Contours, |e| e.build_contours(&cfg, &chf))?;
        self.state = BuildState::ContoursBuilt;
        if cset.contours.is_empty() {
            self.ctx.log(LogCategory::Warning, "No contours traced; the mesh has no walkable area");
        }

        let mut pmesh = self.stage(BuildStage::PolyMesh, |e| e.build_poly_mesh(&cfg, &cset, &chf))?;
        for i in 0..pmesh.poly_count() {
            if pmesh.areas[i] == RC_WALKABLE_AREA {
                pmesh.areas[i] = POLYAREA_GROUND;
            }
            pmesh.flags[i] = flags_for_area(pmesh.areas[i]);
        }
        self.state = BuildState::PolygonMeshBuilt;

        let dmesh = self.stage(BuildStage::DetailMesh, |e| e.build_detail_mesh(&cfg, &pmesh, &chf))?;
        self.state = BuildState::DetailMeshBuilt;
        if keep {
            self.compact = Some(chf);
            self.contours = Some(cset);
        }

        // Navmesh
        let off_mesh = geom.off_mesh_connections();
        let params = NavMeshCreateParams {
            pmesh: &pmesh,
            dmesh: &dmesh,
            off_mesh,
            walkable_height: settings.agent_height,
            walkable_radius: settings.agent_radius,
            walkable_climb: settings.agent_max_climb,
            tile_x: 0,
            tile_y: 0,
            user_id: 0,
        };
        let data = self.stage(BuildStage::NavMeshData, |_| create_nav_mesh_data(&params))?;
        let nav = self.stage(BuildStage::NavMeshInit, |_| {
            NavMesh::from_tile_data(data).map_err(|e| EngineError::Engine(e.to_string()))
        })?;

        self.ctx.log(
            LogCategory::Progress,
            format!(
                "Polymesh: {} vertices {} polygons, detail: {} triangles",
                pmesh.verts.len(),
                pmesh.poly_count(),
                dmesh.tri_count()
            ),
        );
        self.poly_mesh = Some(pmesh);
        self.detail_mesh = Some(dmesh);
        self.nav_mesh = Some(nav);
        Ok(())
    }
}

/// Result of a build run off the calling thread
pub struct BuildOutcome {
    pub nav_mesh: Option<NavMesh>,
    pub error: Option<BuildError>,
    pub context: BuildContext,
}

/// Build on the rayon pool and hand the navmesh back by message
pub fn build_in_background(geom: Arc<InputGeometry>, settings: BuildSettings) -> mpsc::Receiver<BuildOutcome> {
    let (tx, rx) = mpsc::channel();
    rayon::spawn(move || {
        let mut pipeline = NavMeshPipeline::new(settings);
        pipeline.build(&geom);
        let error = pipeline.last_error().cloned();
        let context = pipeline.context().clone();
        let outcome = BuildOutcome { nav_mesh: pipeline.take_nav_mesh(), error, context };
        if tx.send(outcome).is_err() {
            debug!("Background build finished after its receiver was dropped");
        }
    });
    rx
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::mesh_loader::ObjMesh;
    use crate::settings::VoxelConfig;

    /// Flat square of `size` centered at the origin, two triangles
    pub(crate) fn plane(size: f32) -> InputGeometry {
        let h = size / 2.0;
        let verts = vec![-h, 0.0, -h, -h, 0.0, h, h, 0.0, h, h, 0.0, -h];
        let tris = vec![0, 1, 2, 0, 2, 3];
        InputGeometry::from_mesh(ObjMesh::from_parts(verts, tris)).unwrap()
    }

    /// Native engine that fails at one stage
    struct FailingEngine {
        fail_at: BuildStage,
    }

    impl FailingEngine {
        fn check(&self, stage: BuildStage) -> Result<(), EngineError> {
            if stage == self.fail_at {
                Err(EngineError::OutOfMemory)
            } else {
                Ok(())
            }
        }
    }

    impl VoxelEngine for FailingEngine {
        fn rasterize(&self, cfg: &VoxelConfig, verts: &[f32], tris: &[i32]) -> Result<Heightfield, EngineError> {
            self.check(BuildStage::Rasterize)?;
            NativeEngine.rasterize(cfg, verts, tris)
        }
        fn filter(&self, cfg: &VoxelConfig, hf: &mut Heightfield) -> Result<(), EngineError> {
            self.check(BuildStage::Filter)?;
            NativeEngine.filter(cfg, hf)
        }
        fn build_compact(&self, cfg: &VoxelConfig, hf: &Heightfield) -> Result<CompactHeightfield, EngineError> {
            self.check(BuildStage::CompactHeightfield)?;
            NativeEngine.build_compact(cfg, hf)
        }
        fn erode(&self, cfg: &VoxelConfig, chf: &mut CompactHeightfield) -> Result<(), EngineError> {
            self.check(BuildStage::Erode)?;
            NativeEngine.erode(cfg, chf)
        }
        fn mark_areas(
            &self,
            cfg: &VoxelConfig,
            volumes: &[crate::geometry::ConvexVolume],
            chf: &mut CompactHeightfield,
        ) -> Result<(), EngineError> {
            self.check(BuildStage::MarkAreas)?;
            NativeEngine.mark_areas(cfg, volumes, chf)
        }
        fn partition(&self, cfg: &VoxelConfig, chf: &mut CompactHeightfield) -> Result<(), EngineError> {
            self.check(BuildStage::Partition)?;
            NativeEngine.partition(cfg, chf)
        }
        fn build_contours(&self, cfg: &VoxelConfig, chf: &CompactHeightfield) -> Result<ContourSet, EngineError> {
            self.check(BuildStage::Contours)?;
            NativeEngine.build_contours(cfg, chf)
        }
        fn build_poly_mesh(
            &self,
            cfg: &VoxelConfig,
            cset: &ContourSet,
            chf: &CompactHeightfield,
        ) -> Result<PolyMesh, EngineError> {
            self.check(BuildStage::PolyMesh)?;
            NativeEngine.build_poly_mesh(cfg, cset, chf)
        }
        fn build_detail_mesh(
            &self,
            cfg: &VoxelConfig,
            pmesh: &PolyMesh,
            chf: &CompactHeightfield,
        ) -> Result<PolyMeshDetail, EngineError> {
            self.check(BuildStage::DetailMesh)?;
            NativeEngine.build_detail_mesh(cfg, pmesh, chf)
        }
    }

    #[test]
    fn test_plane_builds_to_ready() {
        let geom = plane(10.0);
        let mut pipeline = NavMeshPipeline::new(BuildSettings::default());
        assert_eq!(pipeline.state(), BuildState::Empty);
        assert!(pipeline.build(&geom));
        assert_eq!(pipeline.state(), BuildState::QueryMeshReady);
        assert_eq!(pipeline.poly_mesh().unwrap().poly_count(), 1);
        assert_eq!(pipeline.poly_mesh().unwrap().flags[0], crate::areas::POLYFLAGS_WALK);
        assert!(pipeline.nav_mesh().is_some());
        // intermediates are dropped by default
        assert!(pipeline.heightfield().is_none());
        assert!(pipeline.compact_heightfield().is_none());
        assert!(pipeline.contour_set().is_none());
        assert!(pipeline.context().stage_time(BuildStage::Rasterize).is_some());
        assert_eq!(pipeline.context().errors().count(), 0);
    }

    #[test]
    fn test_keep_intermediate_retains_artifacts() {
        let geom = plane(10.0);
        let settings = BuildSettings { keep_intermediate: true, ..BuildSettings::default() };
        let mut pipeline = NavMeshPipeline::new(settings);
        assert!(pipeline.build(&geom));
        assert!(pipeline.heightfield().is_some());
        assert!(pipeline.compact_heightfield().is_some());
        assert_eq!(pipeline.contour_set().unwrap().contours.len(), 1);

        pipeline.cleanup();
        assert_eq!(pipeline.state(), BuildState::Empty);
        assert!(pipeline.heightfield().is_none());
        assert!(pipeline.nav_mesh().is_none());
    }

    #[test]
    fn test_stage_failure_lands_in_failed() {
        let geom = plane(10.0);
        let settings = BuildSettings { keep_intermediate: true, ..BuildSettings::default() };
        for stage in [BuildStage::Rasterize, BuildStage::Partition, BuildStage::DetailMesh] {
            let mut pipeline = NavMeshPipeline::with_engine(settings, Box::new(FailingEngine { fail_at: stage }));
            assert!(!pipeline.build(&geom));
            assert_eq!(pipeline.state(), BuildState::Failed);
            let err = pipeline.last_error().unwrap();
            assert_eq!(err.stage, stage);
            assert_eq!(err.kind, EngineError::OutOfMemory);
            assert!(pipeline.heightfield().is_none());
            assert!(pipeline.compact_heightfield().is_none());
            assert!(pipeline.poly_mesh().is_none());
            assert!(pipeline.nav_mesh().is_none());
            assert_eq!(pipeline.context().errors().count(), 1);
            assert!(pipeline.context().errors().next().unwrap().message.contains("out of memory"));
        }
    }

    #[test]
    fn test_failed_pipeline_recovers_on_mesh_change() {
        let geom = plane(10.0);
        let mut pipeline =
            NavMeshPipeline::with_engine(BuildSettings::default(), Box::new(FailingEngine { fail_at: BuildStage::Filter }));
        assert!(!pipeline.build(&geom));
        pipeline.handle_mesh_changed();
        assert_eq!(pipeline.state(), BuildState::Empty);
        assert!(pipeline.last_error().is_none());
    }

    #[test]
    fn test_rebuild_is_idempotent() {
        let geom = plane(10.0);
        let mut pipeline = NavMeshPipeline::new(BuildSettings::default());
        assert!(pipeline.build(&geom));
        let first = pipeline.poly_mesh().unwrap().clone();
        let first_data = pipeline.nav_mesh().unwrap().tiles().next().unwrap().data().to_vec();
        assert!(pipeline.build(&geom));
        assert_eq!(pipeline.poly_mesh().unwrap().polys, first.polys);
        assert_eq!(pipeline.poly_mesh().unwrap().regs, first.regs);
        assert_eq!(pipeline.nav_mesh().unwrap().tiles().next().unwrap().data(), first_data.as_slice());
    }

    #[test]
    fn test_take_nav_mesh_empties_pipeline() {
        let geom = plane(10.0);
        let mut pipeline = NavMeshPipeline::new(BuildSettings::default());
        assert!(pipeline.build(&geom));
        let nav = pipeline.take_nav_mesh().unwrap();
        assert_eq!(nav.tile_count(), 1);
        assert_eq!(pipeline.state(), BuildState::Empty);
        assert!(pipeline.query(64).is_none());

        pipeline.set_nav_mesh(nav);
        assert_eq!(pipeline.state(), BuildState::QueryMeshReady);
        assert!(pipeline.query(64).is_some());
    }

    #[test]
    fn test_build_in_background() {
        let geom = Arc::new(plane(10.0));
        let rx = build_in_background(geom, BuildSettings::default());
        let outcome = rx.recv().unwrap();
        assert!(outcome.error.is_none());
        assert_eq!(outcome.nav_mesh.unwrap().tile_count(), 1);
        assert!(outcome.context.total_time() > Duration::ZERO);
    }
}

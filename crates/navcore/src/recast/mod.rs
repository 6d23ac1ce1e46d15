// recast/mod.rs - voxelization and polygonization engine
//
// The build pipeline talks to the engine through `VoxelEngine`, one call per
// stage. `NativeEngine` is the in-tree implementation.

pub mod compact;
pub mod contour;
pub mod detail;
pub mod heightfield;
pub mod poly_mesh;
pub mod region;

use thiserror::Error;
use tracing::debug;

use crate::geometry::ConvexVolume;
use crate::settings::VoxelConfig;

pub use compact::CompactHeightfield;
pub use contour::{Contour, ContourSet};
pub use detail::PolyMeshDetail;
pub use heightfield::Heightfield;
pub use poly_mesh::PolyMesh;

pub const RC_NULL_AREA: u8 = 0;
pub const RC_WALKABLE_AREA: u8 = 63;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("out of memory")]
    OutOfMemory,
    #[error("invalid input mesh")]
    InvalidInput,
    #[error("{0}")]
    Engine(String),
}

/// One method per build stage, in pipeline order
pub trait VoxelEngine: Send + Sync {
    /// Classify walkable triangles and rasterize them into a new heightfield
    fn rasterize(&self, cfg: &VoxelConfig, verts: &[f32], tris: &[i32]) -> Result<Heightfield, EngineError>;

    /// Low hanging obstacles, ledges and low height spans
    fn filter(&self, cfg: &VoxelConfig, hf: &mut Heightfield) -> Result<(), EngineError>;

    fn build_compact(&self, cfg: &VoxelConfig, hf: &Heightfield) -> Result<CompactHeightfield, EngineError>;

    fn erode(&self, cfg: &VoxelConfig, chf: &mut CompactHeightfield) -> Result<(), EngineError>;

    fn mark_areas(&self, cfg: &VoxelConfig, volumes: &[ConvexVolume], chf: &mut CompactHeightfield) -> Result<(), EngineError>;

    fn partition(&self, cfg: &VoxelConfig, chf: &mut CompactHeightfield) -> Result<(), EngineError>;

    fn build_contours(&self, cfg: &VoxelConfig, chf: &CompactHeightfield) -> Result<ContourSet, EngineError>;

    fn build_poly_mesh(&self, cfg: &VoxelConfig, cset: &ContourSet, chf: &CompactHeightfield) -> Result<PolyMesh, EngineError>;

    fn build_detail_mesh(&self, cfg: &VoxelConfig, pmesh: &PolyMesh, chf: &CompactHeightfield) -> Result<PolyMeshDetail, EngineError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NativeEngine;

impl VoxelEngine for NativeEngine {
    fn rasterize(&self, cfg: &VoxelConfig, verts: &[f32], tris: &[i32]) -> Result<Heightfield, EngineError> {
        if verts.len() % 3 != 0 || tris.len() % 3 != 0 {
            return Err(EngineError::InvalidInput);
        }
        let nverts = (verts.len() / 3) as i32;
        if tris.iter().any(|&t| t < 0 || t >= nverts) {
            return Err(EngineError::InvalidInput);
        }
        let mut hf = Heightfield::new(cfg.width, cfg.height, cfg.bmin, cfg.bmax, cfg.cs, cfg.ch)?;
        let areas = heightfield::mark_walkable_triangles(cfg.walkable_slope_angle, verts, tris);
        heightfield::rasterize_triangles(verts, tris, &areas, &mut hf, cfg.walkable_climb);
        debug!("Rasterized {} triangles into {} spans", tris.len() / 3, hf.span_count());
        Ok(hf)
    }

    fn filter(&self, cfg: &VoxelConfig, hf: &mut Heightfield) -> Result<(), EngineError> {
        heightfield::filter_low_hanging_walkable_obstacles(cfg.walkable_climb, hf);
        heightfield::filter_ledge_spans(cfg.walkable_height, cfg.walkable_climb, hf);
        heightfield::filter_walkable_low_height_spans(cfg.walkable_height, hf);
        Ok(())
    }

    fn build_compact(&self, cfg: &VoxelConfig, hf: &Heightfield) -> Result<CompactHeightfield, EngineError> {
        CompactHeightfield::build(cfg.walkable_height, cfg.walkable_climb, hf)
    }

    fn erode(&self, cfg: &VoxelConfig, chf: &mut CompactHeightfield) -> Result<(), EngineError> {
        chf.erode_walkable_area(cfg.walkable_radius);
        Ok(())
    }

    fn mark_areas(&self, _cfg: &VoxelConfig, volumes: &[ConvexVolume], chf: &mut CompactHeightfield) -> Result<(), EngineError> {
        for vol in volumes {
            chf.mark_convex_poly_area(vol);
        }
        Ok(())
    }

    fn partition(&self, cfg: &VoxelConfig, chf: &mut CompactHeightfield) -> Result<(), EngineError> {
        region::build_regions(chf, cfg.partition, cfg.min_region_area, cfg.merge_region_area)
    }

    fn build_contours(&self, cfg: &VoxelConfig, chf: &CompactHeightfield) -> Result<ContourSet, EngineError> {
        contour::build_contours(chf, cfg.max_simplification_error)
    }

    fn build_poly_mesh(&self, cfg: &VoxelConfig, cset: &ContourSet, chf: &CompactHeightfield) -> Result<PolyMesh, EngineError> {
        poly_mesh::build_poly_mesh(cfg, cset, chf)
    }

    fn build_detail_mesh(&self, cfg: &VoxelConfig, pmesh: &PolyMesh, chf: &CompactHeightfield) -> Result<PolyMeshDetail, EngineError> {
        detail::build_detail_mesh(pmesh, chf, cfg.detail_sample_dist)
    }
}

// settings.rs - navmesh build settings (JSON) and the derived voxel configuration

use std::fs;
use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::math::Vec3;

/// Region partitioning algorithm
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PartitionType {
    /// Distance field flood; best tessellation, slowest
    #[default]
    Watershed,
    /// Row sweeps; fastest, long thin polygons
    Monotone,
    /// Sweeps merged into non-overlapping layers
    Layers,
}

impl PartitionType {
    pub fn index(self) -> i32 {
        match self {
            PartitionType::Watershed => 0,
            PartitionType::Monotone => 1,
            PartitionType::Layers => 2,
        }
    }

    pub fn from_index(index: i32) -> Self {
        match index {
            1 => PartitionType::Monotone,
            2 => PartitionType::Layers,
            _ => PartitionType::Watershed,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildSettings {
    #[serde(default = "default_cell_size")]
    pub cell_size: f32,
    #[serde(default = "default_cell_height")]
    pub cell_height: f32,
    #[serde(default = "default_agent_height")]
    pub agent_height: f32,
    #[serde(default = "default_agent_radius")]
    pub agent_radius: f32,
    #[serde(default = "default_agent_max_climb")]
    pub agent_max_climb: f32,
    /// Degrees
    #[serde(default = "default_agent_max_slope")]
    pub agent_max_slope: f32,
    #[serde(default = "default_region_min_size")]
    pub region_min_size: f32,
    #[serde(default = "default_region_merge_size")]
    pub region_merge_size: f32,
    #[serde(default = "default_edge_max_len")]
    pub edge_max_len: f32,
    #[serde(default = "default_edge_max_error")]
    pub edge_max_error: f32,
    #[serde(default = "default_verts_per_poly")]
    pub verts_per_poly: f32,
    #[serde(default = "default_detail_sample_dist")]
    pub detail_sample_dist: f32,
    #[serde(default = "default_detail_sample_max_error")]
    pub detail_sample_max_error: f32,
    #[serde(default)]
    pub partition_type: PartitionType,
    #[serde(default)]
    pub keep_intermediate: bool,
}

fn default_cell_size() -> f32 { 0.3 }
fn default_cell_height() -> f32 { 0.2 }
fn default_agent_height() -> f32 { 2.0 }
fn default_agent_radius() -> f32 { 0.6 }
fn default_agent_max_climb() -> f32 { 0.9 }
fn default_agent_max_slope() -> f32 { 45.0 }
fn default_region_min_size() -> f32 { 8.0 }
fn default_region_merge_size() -> f32 { 20.0 }
fn default_edge_max_len() -> f32 { 12.0 }
fn default_edge_max_error() -> f32 { 1.3 }
fn default_verts_per_poly() -> f32 { 6.0 }
fn default_detail_sample_dist() -> f32 { 6.0 }
fn default_detail_sample_max_error() -> f32 { 1.0 }

impl Default for BuildSettings {
    fn default() -> Self {
        Self {
            cell_size: default_cell_size(),
            cell_height: default_cell_height(),
            agent_height: default_agent_height(),
            agent_radius: default_agent_radius(),
            agent_max_climb: default_agent_max_climb(),
            agent_max_slope: default_agent_max_slope(),
            region_min_size: default_region_min_size(),
            region_merge_size: default_region_merge_size(),
            edge_max_len: default_edge_max_len(),
            edge_max_error: default_edge_max_error(),
            verts_per_poly: default_verts_per_poly(),
            detail_sample_dist: default_detail_sample_dist(),
            detail_sample_max_error: default_detail_sample_max_error(),
            partition_type: PartitionType::default(),
            keep_intermediate: false,
        }
    }
}

impl BuildSettings {
    /// Load from a JSON file; missing fields take their defaults
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings '{}'", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse settings '{}'", path.display()))
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let text = serde_json::to_string_pretty(self)?;
        fs::write(path, text)
            .with_context(|| format!("Failed to write settings '{}'", path.display()))
    }

    /// Voxel grid parameters for a mesh with the given bounds
    pub fn to_voxel_config(&self, bmin: &Vec3, bmax: &Vec3) -> VoxelConfig {
        let cs = self.cell_size;
        let ch = self.cell_height;
        let detail_sample_dist = if self.detail_sample_dist < 0.9 {
            0.0
        } else {
            cs * self.detail_sample_dist
        };
        VoxelConfig {
            width: ((bmax[0] - bmin[0]) / cs + 0.5) as i32,
            height: ((bmax[2] - bmin[2]) / cs + 0.5) as i32,
            cs,
            ch,
            bmin: *bmin,
            bmax: *bmax,
            walkable_slope_angle: self.agent_max_slope,
            walkable_height: (self.agent_height / ch).ceil() as i32,
            walkable_climb: (self.agent_max_climb / ch).floor() as i32,
            walkable_radius: (self.agent_radius / cs).ceil() as i32,
            max_edge_len: (self.edge_max_len / cs) as i32,
            max_simplification_error: self.edge_max_error,
            min_region_area: (self.region_min_size * self.region_min_size) as i32,
            merge_region_area: (self.region_merge_size * self.region_merge_size) as i32,
            max_verts_per_poly: self.verts_per_poly as i32,
            detail_sample_dist,
            detail_sample_max_error: ch * self.detail_sample_max_error,
            partition: self.partition_type,
        }
    }
}

/// Grid-unit configuration handed to the voxel engine
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct VoxelConfig {
    pub width: i32,
    pub height: i32,
    pub cs: f32,
    pub ch: f32,
    pub bmin: Vec3,
    pub bmax: Vec3,
    pub walkable_slope_angle: f32,
    pub walkable_height: i32,
    pub walkable_climb: i32,
    pub walkable_radius: i32,
    pub max_edge_len: i32,
    pub max_simplification_error: f32,
    pub min_region_area: i32,
    pub merge_region_area: i32,
    pub max_verts_per_poly: i32,
    pub detail_sample_dist: f32,
    pub detail_sample_max_error: f32,
    pub partition: PartitionType,
}

// navcore - navigation mesh construction, queries and agent steering
//
// Leaf-first module order:
// - spatial_index / mesh_loader / geometry: input triangle soup and authoring data
// - settings / recast: voxelization and polygonization stages
// - detour: tile storage, polygon references and queries
// - pipeline / persist: staged build state machine and the navmesh file
// - steering / tools / test_script: corridor following and the interactive harness

pub mod areas;
pub mod detour;
pub mod geometry;
pub mod math;
pub mod mesh_loader;
pub mod persist;
pub mod pipeline;
pub mod recast;
pub mod settings;
pub mod spatial_index;
pub mod steering;
pub mod test_script;
pub mod tools;

pub use detour::{NavMesh, NavMeshQuery, PolyRef, QueryFilter};
pub use geometry::InputGeometry;
pub use math::Vec3;
pub use pipeline::{BuildState, NavMeshPipeline};
pub use settings::{BuildSettings, PartitionType};

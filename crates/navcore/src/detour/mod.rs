// detour/mod.rs - runtime navigation mesh and queries
//
// `tile` writes and reads the tile data blob, `nav_mesh` owns the tiles and
// resolves polygon references, `query` runs searches against a borrowed mesh.

pub mod nav_mesh;
pub mod query;
pub mod tile;

use std::fmt;

use crate::math::{vdist, Vec3};

pub use nav_mesh::{Link, MeshTile, NavMesh, NavMeshError, NavMeshParams};
pub use query::{NavMeshQuery, RaycastHit, StraightPathPoint};
pub use tile::{create_nav_mesh_data, NavMeshCreateParams, OffMeshCon, Poly, PolyType, Portal, TileData};

pub const DT_VERTS_PER_POLYGON: usize = 6;
pub const DT_MAX_AREAS: usize = 64;
/// Link edge marker for links leaving a ground polygon onto an off-mesh connection
pub const DT_OFFMESH_EDGE: u8 = 0xff;

pub const DT_STRAIGHTPATH_START: u8 = 0x01;
pub const DT_STRAIGHTPATH_END: u8 = 0x02;
pub const DT_STRAIGHTPATH_OFFMESH_CONNECTION: u8 = 0x04;

const SALT_BITS: u32 = 16;
const TILE_BITS: u32 = 28;
const POLY_BITS: u32 = 20;

pub const MAX_TILES: u32 = 1 << TILE_BITS;
pub const MAX_POLYS_PER_TILE: u32 = 1 << POLY_BITS;

/// Polygon reference: salt | tile index | polygon index
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PolyRef(pub u64);

impl PolyRef {
    pub const NULL: PolyRef = PolyRef(0);

    pub fn encode(salt: u16, tile: u32, poly: u32) -> Self {
        PolyRef(
            ((salt as u64) << (POLY_BITS + TILE_BITS))
                | (((tile & (MAX_TILES - 1)) as u64) << POLY_BITS)
                | (poly & (MAX_POLYS_PER_TILE - 1)) as u64,
        )
    }

    pub fn is_null(self) -> bool {
        self.0 == 0
    }

    pub fn salt(self) -> u16 {
        ((self.0 >> (POLY_BITS + TILE_BITS)) & ((1 << SALT_BITS) - 1)) as u16
    }

    pub fn tile(self) -> u32 {
        ((self.0 >> POLY_BITS) & ((1 << TILE_BITS) - 1)) as u32
    }

    pub fn poly(self) -> u32 {
        (self.0 & ((1 << POLY_BITS) - 1)) as u32
    }

    /// Reference of the tile owning this polygon
    pub fn tile_ref(self) -> PolyRef {
        PolyRef::encode(self.salt(), self.tile(), 0)
    }
}

impl fmt::Display for PolyRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x}", self.0)
    }
}

/// Polygon filter and traversal cost per area
#[derive(Clone, Debug)]
pub struct QueryFilter {
    area_cost: [f32; DT_MAX_AREAS],
    include_flags: u16,
    exclude_flags: u16,
}

impl Default for QueryFilter {
    fn default() -> Self {
        QueryFilter {
            area_cost: [1.0; DT_MAX_AREAS],
            include_flags: 0xffff,
            exclude_flags: 0,
        }
    }
}

impl QueryFilter {
    pub fn pass_flags(&self, flags: u16) -> bool {
        (flags & self.include_flags) != 0 && (flags & self.exclude_flags) == 0
    }

    pub fn pass_filter(&self, poly: &Poly) -> bool {
        self.pass_flags(poly.flags)
    }

    /// Cost of moving from `pa` to `pb` across `poly`
    pub fn cost(&self, pa: &Vec3, pb: &Vec3, poly: &Poly) -> f32 {
        vdist(pa, pb) * self.area_cost(poly.area)
    }

    pub fn include_flags(&self) -> u16 {
        self.include_flags
    }

    pub fn set_include_flags(&mut self, flags: u16) {
        self.include_flags = flags;
    }

    pub fn exclude_flags(&self) -> u16 {
        self.exclude_flags
    }

    pub fn set_exclude_flags(&mut self, flags: u16) {
        self.exclude_flags = flags;
    }

    pub fn area_cost(&self, area: u8) -> f32 {
        self.area_cost.get(area as usize).copied().unwrap_or(1.0)
    }

    pub fn set_area_cost(&mut self, area: u8, cost: f32) {
        if let Some(c) = self.area_cost.get_mut(area as usize) {
            *c = cost;
        }
    }
}

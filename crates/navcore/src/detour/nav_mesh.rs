// nav_mesh.rs - tile storage and polygon reference resolution

use thiserror::Error;
use tracing::{debug, warn};

use crate::math::{closest_height_on_triangle, dist_pt_seg_sqr_2d, overlap_bounds, point_in_poly, vlerp, vsub, Vec3};

use super::tile::{OffMeshCon, Poly, PolyType, TileData, TileHeader};
use super::{PolyRef, DT_OFFMESH_EDGE, MAX_POLYS_PER_TILE, MAX_TILES};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NavMeshError {
    #[error("invalid navmesh parameters")]
    InvalidParams,
    #[error("wrong tile data magic")]
    WrongMagic,
    #[error("unsupported tile data version {0}")]
    WrongVersion(i32),
    #[error("tile data truncated or corrupt")]
    Truncated,
    #[error("no free tile slot")]
    OutOfTiles,
    #[error("tile slot {0} already in use")]
    TileInUse(u32),
    #[error("tile has {0} polygons, limit is {1}")]
    TooManyPolys(usize, usize),
    #[error("invalid tile reference {0}")]
    InvalidRef(PolyRef),
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct NavMeshParams {
    pub orig: Vec3,
    pub tile_width: f32,
    pub tile_height: f32,
    pub max_tiles: i32,
    pub max_polys: i32,
}

/// Traversable connection from a polygon
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Link {
    pub target: PolyRef,
    /// Edge of the owning polygon, `DT_OFFMESH_EDGE` for links onto off-mesh connections
    pub edge: u8,
    pub side: u8,
    /// Shared part of the edge, quantized 0..255
    pub bmin: u8,
    pub bmax: u8,
}

/// A loaded tile. The encoded blob stays authoritative: polygon flag
/// changes are written back into it so `data()` always reflects them.
#[derive(Clone, Debug)]
pub struct MeshTile {
    index: u32,
    salt: u16,
    pub header: TileHeader,
    pub verts: Vec<Vec3>,
    pub polys: Vec<Poly>,
    pub links: Vec<Vec<Link>>,
    pub detail_meshes: Vec<[u32; 4]>,
    pub detail_verts: Vec<Vec3>,
    pub detail_tris: Vec<[u8; 4]>,
    pub off_mesh_cons: Vec<OffMeshCon>,
    data: Vec<u8>,
    flag_offsets: Vec<usize>,
}

impl MeshTile {
    fn new(index: u32, salt: u16, tile: TileData, data: Vec<u8>) -> Self {
        let mut mt = MeshTile {
            index,
            salt,
            links: vec![Vec::new(); tile.polys.len()],
            header: tile.header,
            verts: tile.verts,
            polys: tile.polys,
            detail_meshes: tile.detail_meshes,
            detail_verts: tile.detail_verts,
            detail_tris: tile.detail_tris,
            off_mesh_cons: tile.off_mesh_cons,
            data,
            flag_offsets: tile.flag_offsets,
        };
        mt.connect_portals();
        mt.connect_off_mesh_links();
        mt
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn salt(&self) -> u16 {
        self.salt
    }

    pub fn tile_ref(&self) -> PolyRef {
        PolyRef::encode(self.salt, self.index, 0)
    }

    pub fn poly_ref(&self, ip: usize) -> PolyRef {
        PolyRef::encode(self.salt, self.index, ip as u32)
    }

    pub fn poly_verts(&self, ip: usize) -> Vec<Vec3> {
        self.polys[ip].verts.iter().map(|&v| self.verts[v as usize]).collect()
    }

    pub fn poly_bounds(&self, ip: usize) -> (Vec3, Vec3) {
        let verts = self.poly_verts(ip);
        let mut bmin = verts[0];
        let mut bmax = verts[0];
        for v in &verts[1..] {
            for k in 0..3 {
                bmin[k] = bmin[k].min(v[k]);
                bmax[k] = bmax[k].max(v[k]);
            }
        }
        (bmin, bmax)
    }

    fn connect_portals(&mut self) {
        let npolys = self.polys.len();
        for ip in 0..npolys {
            for (edge, portals) in self.polys[ip].portals.iter().enumerate() {
                for portal in portals {
                    if portal.poly as usize >= npolys {
                        warn!("Tile {}: portal to missing polygon {}", self.index, portal.poly);
                        continue;
                    }
                    let target = PolyRef::encode(self.salt, self.index, portal.poly as u32);
                    self.links[ip].push(Link {
                        target,
                        edge: edge as u8,
                        side: 0xff,
                        bmin: portal.tmin,
                        bmax: portal.tmax,
                    });
                }
            }
        }
    }

    /// Snap each off-mesh connection end point to the nearest ground polygon
    /// within its radius and link both ways.
    fn connect_off_mesh_links(&mut self) {
        let climb = self.header.walkable_climb;
        for ci in 0..self.off_mesh_cons.len() {
            let con = self.off_mesh_cons[ci];
            let ip = con.poly as usize;
            if ip >= self.polys.len() || self.polys[ip].poly_type != PolyType::OffMeshConnection {
                continue;
            }
            let ext = [con.rad, climb, con.rad];
            let con_ref = self.poly_ref(ip);

            for (side, pos) in [(0usize, con.start), (1usize, con.end)] {
                let Some((land, nearest)) = self.nearest_ground_poly(&pos, &ext) else {
                    debug!("Off-mesh connection {} end {} has no polygon nearby", con.user_id, side);
                    continue;
                };
                let dx = nearest[0] - pos[0];
                let dz = nearest[2] - pos[2];
                if dx * dx + dz * dz > con.rad * con.rad {
                    continue;
                }
                let v = self.polys[ip].verts[side] as usize;
                self.verts[v] = nearest;

                let land_ref = self.poly_ref(land);
                self.links[ip].push(Link { target: land_ref, edge: side as u8, side: 0xff, bmin: 0, bmax: 0 });
                if side == 0 || con.bidirectional {
                    self.links[land].push(Link {
                        target: con_ref,
                        edge: DT_OFFMESH_EDGE,
                        side: 0xff,
                        bmin: 0,
                        bmax: 0,
                    });
                }
            }
        }
    }

    /// Nearest ground polygon whose bounds overlap the box around `center`
    pub fn nearest_ground_poly(&self, center: &Vec3, ext: &Vec3) -> Option<(usize, Vec3)> {
        self.nearest_poly_where(center, ext, |_| true).map(|(ip, p, _)| (ip, p))
    }

    pub(crate) fn nearest_poly_where(
        &self,
        center: &Vec3,
        ext: &Vec3,
        accept: impl Fn(&Poly) -> bool,
    ) -> Option<(usize, Vec3, f32)> {
        let qmin = vsub(center, ext);
        let qmax = [center[0] + ext[0], center[1] + ext[1], center[2] + ext[2]];
        let mut best: Option<(usize, Vec3, f32)> = None;
        let mut best_dist = f32::MAX;
        for ip in 0..self.polys.len() {
            let poly = &self.polys[ip];
            if poly.poly_type == PolyType::OffMeshConnection || !accept(poly) {
                continue;
            }
            let (bmin, bmax) = self.poly_bounds(ip);
            if !overlap_bounds(&qmin, &qmax, &bmin, &bmax) {
                continue;
            }
            let (closest, over) = self.closest_point_on_poly(ip, center);
            // Over the polygon only the vertical gap beyond the climb height counts
            let d = if over {
                let dy = (center[1] - closest[1]).abs() - self.header.walkable_climb;
                if dy > 0.0 { dy * dy } else { 0.0 }
            } else {
                let diff = vsub(center, &closest);
                diff[0] * diff[0] + diff[1] * diff[1] + diff[2] * diff[2]
            };
            if d < best_dist {
                best_dist = d;
                best = Some((ip, closest, d));
            }
        }
        best
    }

    /// Height of the detail surface under `pos`, if `pos` lies over the polygon
    pub fn poly_height(&self, ip: usize, pos: &Vec3) -> Option<f32> {
        let poly = &self.polys[ip];
        if poly.poly_type == PolyType::OffMeshConnection {
            let v0 = self.verts[poly.verts[0] as usize];
            let v1 = self.verts[poly.verts[1] as usize];
            let (_, t) = dist_pt_seg_sqr_2d(pos, &v0, &v1);
            return Some(v0[1] + (v1[1] - v0[1]) * t);
        }
        let verts = self.poly_verts(ip);
        if !point_in_poly(&verts, pos) {
            return None;
        }
        if let Some(&[vb, _, tb, tc]) = self.detail_meshes.get(ip) {
            for t in tb as usize..(tb + tc) as usize {
                let Some(tri) = self.detail_tris.get(t) else { break };
                let v = |k: usize| self.detail_verts.get(vb as usize + tri[k] as usize);
                if let (Some(a), Some(b), Some(c)) = (v(0), v(1), v(2))
                    && let Some(h) = closest_height_on_triangle(pos, a, b, c)
                {
                    return Some(h);
                }
            }
        }
        // on a detail edge: take the height of the closest boundary point
        Some(self.closest_point_on_poly_boundary(ip, pos)[1])
    }

    /// `pos` itself when inside the polygon (XZ), else the closest edge point
    pub fn closest_point_on_poly_boundary(&self, ip: usize, pos: &Vec3) -> Vec3 {
        let verts = self.poly_verts(ip);
        if point_in_poly(&verts, pos) {
            return *pos;
        }
        let n = verts.len();
        let mut best = verts[0];
        let mut best_d = f32::MAX;
        for i in 0..n {
            let a = &verts[i];
            let b = &verts[(i + 1) % n];
            let (d, t) = dist_pt_seg_sqr_2d(pos, a, b);
            if d < best_d {
                best_d = d;
                best = vlerp(a, b, t);
            }
        }
        best
    }

    /// Closest point on the polygon surface and whether `pos` is over it
    pub fn closest_point_on_poly(&self, ip: usize, pos: &Vec3) -> (Vec3, bool) {
        let poly = &self.polys[ip];
        if poly.poly_type == PolyType::OffMeshConnection {
            let v0 = self.verts[poly.verts[0] as usize];
            let v1 = self.verts[poly.verts[1] as usize];
            let (_, t) = dist_pt_seg_sqr_2d(pos, &v0, &v1);
            return (vlerp(&v0, &v1, t), false);
        }
        if let Some(h) = self.poly_height(ip, pos) {
            return ([pos[0], h, pos[2]], true);
        }
        (self.closest_point_on_poly_boundary(ip, pos), false)
    }

    fn set_poly_flags(&mut self, ip: usize, flags: u16) {
        self.polys[ip].flags = flags;
        if let Some(&off) = self.flag_offsets.get(ip)
            && let Some(bytes) = self.data.get_mut(off..off + 2)
        {
            bytes.copy_from_slice(&flags.to_le_bytes());
        }
    }
}

pub struct NavMesh {
    params: NavMeshParams,
    tiles: Vec<Option<MeshTile>>,
    salts: Vec<u16>,
}

impl NavMesh {
    pub fn new(params: NavMeshParams) -> Result<Self, NavMeshError> {
        if params.max_tiles <= 0
            || params.max_tiles as u32 > MAX_TILES
            || params.max_polys <= 0
            || params.max_polys as u32 > MAX_POLYS_PER_TILE
        {
            return Err(NavMeshError::InvalidParams);
        }
        Ok(NavMesh { params, tiles: Vec::new(), salts: Vec::new() })
    }

    /// Single tile navmesh sized for the given tile data
    pub fn from_tile_data(data: Vec<u8>) -> Result<Self, NavMeshError> {
        let tile = TileData::decode(&data)?;
        let mut mesh = NavMesh::new(NavMeshParams {
            orig: tile.header.bmin,
            tile_width: tile.header.bmax[0] - tile.header.bmin[0],
            tile_height: tile.header.bmax[2] - tile.header.bmin[2],
            max_tiles: 1,
            max_polys: tile.polys.len().max(1) as i32,
        })?;
        mesh.add_tile(data, PolyRef::NULL)?;
        Ok(mesh)
    }

    pub fn params(&self) -> &NavMeshParams {
        &self.params
    }

    pub fn max_tiles(&self) -> usize {
        self.params.max_tiles as usize
    }

    /// Add a tile. A non-null `last_ref` restores the tile into the slot and
    /// salt it had when it was saved.
    pub fn add_tile(&mut self, data: Vec<u8>, last_ref: PolyRef) -> Result<PolyRef, NavMeshError> {
        let tile = TileData::decode(&data)?;
        if tile.polys.len() > self.params.max_polys as usize {
            return Err(NavMeshError::TooManyPolys(tile.polys.len(), self.params.max_polys as usize));
        }

        let (index, salt) = if last_ref.is_null() {
            let index = (0..self.max_tiles())
                .find(|&i| self.tiles.get(i).is_none_or(Option::is_none))
                .ok_or(NavMeshError::OutOfTiles)?;
            self.ensure_slot(index);
            (index, self.salts[index])
        } else {
            let index = last_ref.tile() as usize;
            if index >= self.max_tiles() || last_ref.salt() == 0 {
                return Err(NavMeshError::InvalidRef(last_ref));
            }
            self.ensure_slot(index);
            if self.tiles[index].is_some() {
                return Err(NavMeshError::TileInUse(index as u32));
            }
            self.salts[index] = last_ref.salt();
            (index, last_ref.salt())
        };

        let mt = MeshTile::new(index as u32, salt, tile, data);
        let tile_ref = mt.tile_ref();
        debug!(
            "Added tile {} ({} polys, {} off-mesh connections)",
            tile_ref,
            mt.polys.len(),
            mt.off_mesh_cons.len()
        );
        self.tiles[index] = Some(mt);
        Ok(tile_ref)
    }

    fn ensure_slot(&mut self, index: usize) {
        if self.tiles.len() <= index {
            self.tiles.resize_with(index + 1, || None);
            self.salts.resize(index + 1, 1);
        }
    }

    /// Remove a tile and hand back its data blob
    pub fn remove_tile(&mut self, tile_ref: PolyRef) -> Result<Vec<u8>, NavMeshError> {
        let index = tile_ref.tile() as usize;
        let valid = self
            .tiles
            .get(index)
            .and_then(Option::as_ref)
            .is_some_and(|t| t.salt == tile_ref.salt());
        if !valid {
            return Err(NavMeshError::InvalidRef(tile_ref));
        }
        let Some(tile) = self.tiles[index].take() else {
            return Err(NavMeshError::InvalidRef(tile_ref));
        };
        let next = self.salts[index].wrapping_add(1);
        self.salts[index] = if next == 0 { 1 } else { next };
        Ok(tile.data)
    }

    pub fn tile_count(&self) -> usize {
        self.tiles.iter().filter(|t| t.is_some()).count()
    }

    pub fn tiles(&self) -> impl Iterator<Item = &MeshTile> {
        self.tiles.iter().flatten()
    }

    pub fn tile_by_ref(&self, r: PolyRef) -> Option<&MeshTile> {
        let tile = self.tiles.get(r.tile() as usize)?.as_ref()?;
        (tile.salt == r.salt()).then_some(tile)
    }

    /// Tile and polygon index for a polygon reference
    pub fn tile_and_poly(&self, r: PolyRef) -> Option<(&MeshTile, usize)> {
        if r.is_null() {
            return None;
        }
        let tile = self.tile_by_ref(r)?;
        let ip = r.poly() as usize;
        (ip < tile.polys.len()).then_some((tile, ip))
    }

    pub fn is_valid_poly_ref(&self, r: PolyRef) -> bool {
        self.tile_and_poly(r).is_some()
    }

    pub fn poly(&self, r: PolyRef) -> Option<&Poly> {
        self.tile_and_poly(r).map(|(t, ip)| &t.polys[ip])
    }

    pub fn poly_flags(&self, r: PolyRef) -> Option<u16> {
        self.poly(r).map(|p| p.flags)
    }

    pub fn poly_area(&self, r: PolyRef) -> Option<u8> {
        self.poly(r).map(|p| p.area)
    }

    pub fn set_poly_flags(&mut self, r: PolyRef, flags: u16) -> bool {
        if !self.is_valid_poly_ref(r) {
            return false;
        }
        match self.tiles.get_mut(r.tile() as usize).and_then(Option::as_mut) {
            Some(tile) => {
                tile.set_poly_flags(r.poly() as usize, flags);
                true
            }
            None => false,
        }
    }

    pub fn links(&self, r: PolyRef) -> &[Link] {
        match self.tile_and_poly(r) {
            Some((t, ip)) => &t.links[ip],
            None => &[],
        }
    }

    /// End points of an off-mesh connection polygon, ordered for an agent
    /// arriving from `prev_ref`
    pub fn off_mesh_connection_poly_end_points(&self, prev_ref: PolyRef, poly_ref: PolyRef) -> Option<(Vec3, Vec3)> {
        let (tile, ip) = self.tile_and_poly(poly_ref)?;
        let poly = &tile.polys[ip];
        if poly.poly_type != PolyType::OffMeshConnection {
            return None;
        }
        let (mut idx0, mut idx1) = (0, 1);
        if let Some(link) = tile.links[ip].iter().find(|l| l.edge == 0)
            && link.target != prev_ref
        {
            (idx0, idx1) = (1, 0);
        }
        Some((tile.verts[poly.verts[idx0] as usize], tile.verts[poly.verts[idx1] as usize]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detour::tile::tests::sample_mesh;
    use crate::detour::tile::{create_nav_mesh_data, NavMeshCreateParams};
    use crate::geometry::OffMeshConnection;

    fn sample_data(cons: &[OffMeshConnection]) -> Vec<u8> {
        let (pmesh, dmesh) = sample_mesh();
        create_nav_mesh_data(&NavMeshCreateParams {
            pmesh: &pmesh,
            dmesh: &dmesh,
            off_mesh: cons,
            walkable_height: 2.0,
            walkable_radius: 0.5,
            walkable_climb: 0.5,
            tile_x: 0,
            tile_y: 0,
            user_id: 0,
        })
        .unwrap()
    }

    fn jump(start: Vec3, end: Vec3, bidirectional: bool) -> OffMeshConnection {
        OffMeshConnection { start, end, radius: 0.5, bidirectional, area: 5, flags: 8, user_id: 1 }
    }

    #[test]
    fn test_add_tile_and_links() {
        let mesh = NavMesh::from_tile_data(sample_data(&[])).unwrap();
        assert_eq!(mesh.tile_count(), 1);
        let tile = mesh.tiles().next().unwrap();
        let r0 = tile.poly_ref(0);
        let r1 = tile.poly_ref(1);
        assert!(mesh.links(r0).iter().any(|l| l.target == r1 && l.edge == 2));
        assert!(mesh.links(r1).iter().any(|l| l.target == r0 && l.edge == 0));
        assert!(!mesh.is_valid_poly_ref(tile.poly_ref(3)));
        assert!(!mesh.is_valid_poly_ref(PolyRef::NULL));
    }

    #[test]
    fn test_set_poly_flags_patches_data() {
        let mut mesh = NavMesh::from_tile_data(sample_data(&[])).unwrap();
        let r = mesh.tiles().next().unwrap().poly_ref(1);
        assert!(mesh.set_poly_flags(r, 0x11));
        assert_eq!(mesh.poly_flags(r), Some(0x11));
        let data = mesh.tiles().next().unwrap().data().to_vec();
        let reloaded = NavMesh::from_tile_data(data).unwrap();
        let r = reloaded.tiles().next().unwrap().poly_ref(1);
        assert_eq!(reloaded.poly_flags(r), Some(0x11));
    }

    #[test]
    fn test_remove_and_restore_tile() {
        let mut mesh = NavMesh::from_tile_data(sample_data(&[])).unwrap();
        let tile_ref = mesh.tiles().next().unwrap().tile_ref();
        let data = mesh.remove_tile(tile_ref).unwrap();
        assert_eq!(mesh.tile_count(), 0);
        // stale reference after removal
        assert!(mesh.remove_tile(tile_ref).is_err());
        let restored = mesh.add_tile(data.clone(), tile_ref).unwrap();
        assert_eq!(restored, tile_ref);
        assert_eq!(mesh.add_tile(data, tile_ref), Err(NavMeshError::TileInUse(0)));
    }

    #[test]
    fn test_off_mesh_connection_links() {
        let data = sample_data(&[jump([1.0, 0.2, 1.0], [5.0, 0.0, 3.0], false)]);
        let mesh = NavMesh::from_tile_data(data).unwrap();
        let tile = mesh.tiles().next().unwrap();
        let con = tile.poly_ref(3);
        let start_land = tile.poly_ref(0);
        let end_land = tile.poly_ref(2);

        assert!(mesh.links(con).iter().any(|l| l.target == start_land && l.edge == 0));
        assert!(mesh.links(con).iter().any(|l| l.target == end_land && l.edge == 1));
        assert!(mesh.links(start_land).iter().any(|l| l.target == con && l.edge == DT_OFFMESH_EDGE));
        // one way: no link back from the landing polygon
        assert!(!mesh.links(end_land).iter().any(|l| l.target == con));

        // start snapped onto the ground
        let (s, e) = mesh.off_mesh_connection_poly_end_points(start_land, con).unwrap();
        assert_eq!(s, [1.0, 0.0, 1.0]);
        assert_eq!(e, [5.0, 0.0, 3.0]);
        let (s, _) = mesh.off_mesh_connection_poly_end_points(end_land, con).unwrap();
        assert_eq!(s, [5.0, 0.0, 3.0]);
    }

    #[test]
    fn test_poly_height_and_closest_point() {
        let mesh = NavMesh::from_tile_data(sample_data(&[])).unwrap();
        let tile = mesh.tiles().next().unwrap();
        assert_eq!(tile.poly_height(0, &[1.0, 3.0, 1.0]), Some(0.0));
        assert_eq!(tile.poly_height(0, &[3.0, 0.0, 1.0]), None);
        let (p, over) = tile.closest_point_on_poly(0, &[-1.0, 0.0, 1.0]);
        assert!(!over);
        assert_eq!(p, [0.0, 0.0, 1.0]);
    }

    #[test]
    fn test_invalid_params() {
        let params = NavMeshParams { orig: [0.0; 3], tile_width: 1.0, tile_height: 1.0, max_tiles: 0, max_polys: 1 };
        assert!(matches!(NavMesh::new(params), Err(NavMeshError::InvalidParams)));
    }
}

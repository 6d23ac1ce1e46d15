// tile.rs - navmesh tile data blob
//
// Layout (little endian):
//   header      magic, version, tile x/y/layer, user id, counts, agent
//               dimensions, bounds
//   vertices    vec3 per vertex; off-mesh connection end points come last
//   polygons    vertex count, type, area, flags, vertex indices, then per
//               edge the list of portals {poly, tmin, tmax}
//   detail      sub-mesh table, vertices, triangles
//   off-mesh    start, end, radius, polygon, direction, user id

use std::collections::HashMap;

use navkit_shared::util::ByteBuffer;
use tracing::debug;

use crate::geometry::OffMeshConnection;
use crate::math::Vec3;
use crate::recast::{EngineError, PolyMesh, PolyMeshDetail};

use super::nav_mesh::NavMeshError;
use super::DT_VERTS_PER_POLYGON;

pub const DT_NAVMESH_MAGIC: i32 = ('D' as i32) << 24 | ('N' as i32) << 16 | ('A' as i32) << 8 | 'V' as i32;
pub const DT_NAVMESH_VERSION: i32 = 7;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PolyType {
    Ground,
    OffMeshConnection,
}

/// Shared stretch of a polygon edge, `tmin..tmax` quantized to 0..255 along
/// the edge from its first vertex
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Portal {
    pub poly: u16,
    pub tmin: u8,
    pub tmax: u8,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Poly {
    pub verts: Vec<u16>,
    pub flags: u16,
    pub area: u8,
    pub poly_type: PolyType,
    /// Indexed by edge
    pub portals: Vec<Vec<Portal>>,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct OffMeshCon {
    pub start: Vec3,
    pub end: Vec3,
    pub rad: f32,
    pub poly: u16,
    pub bidirectional: bool,
    pub user_id: u32,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct TileHeader {
    pub x: i32,
    pub y: i32,
    pub layer: i32,
    pub user_id: u32,
    pub poly_count: usize,
    pub vert_count: usize,
    pub detail_mesh_count: usize,
    pub detail_vert_count: usize,
    pub detail_tri_count: usize,
    pub off_mesh_con_count: usize,
    /// Index of the first off-mesh connection polygon
    pub off_mesh_base: usize,
    pub walkable_height: f32,
    pub walkable_radius: f32,
    pub walkable_climb: f32,
    pub bmin: Vec3,
    pub bmax: Vec3,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TileData {
    pub header: TileHeader,
    pub verts: Vec<Vec3>,
    pub polys: Vec<Poly>,
    /// Byte offset of each polygon's flags inside the encoded blob
    pub flag_offsets: Vec<usize>,
    pub detail_meshes: Vec<[u32; 4]>,
    pub detail_verts: Vec<Vec3>,
    pub detail_tris: Vec<[u8; 4]>,
    pub off_mesh_cons: Vec<OffMeshCon>,
}

fn count(v: i32) -> std::io::Result<usize> {
    usize::try_from(v).map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidData, "negative count"))
}

impl TileData {
    pub fn encode(&self) -> Vec<u8> {
        let h = &self.header;
        let mut buf = ByteBuffer::with_capacity(128 + self.verts.len() * 12 + self.polys.len() * 32);
        buf.write_i32(DT_NAVMESH_MAGIC);
        buf.write_i32(DT_NAVMESH_VERSION);
        buf.write_i32(h.x);
        buf.write_i32(h.y);
        buf.write_i32(h.layer);
        buf.write_u32(h.user_id);
        buf.write_i32(self.polys.len() as i32);
        buf.write_i32(self.verts.len() as i32);
        buf.write_i32(self.detail_meshes.len() as i32);
        buf.write_i32(self.detail_verts.len() as i32);
        buf.write_i32(self.detail_tris.len() as i32);
        buf.write_i32(self.off_mesh_cons.len() as i32);
        buf.write_i32(h.off_mesh_base as i32);
        buf.write_f32(h.walkable_height);
        buf.write_f32(h.walkable_radius);
        buf.write_f32(h.walkable_climb);
        buf.write_vec3(h.bmin);
        buf.write_vec3(h.bmax);

        for v in &self.verts {
            buf.write_vec3(*v);
        }
        for p in &self.polys {
            buf.write_u8(p.verts.len() as u8);
            buf.write_u8(match p.poly_type {
                PolyType::Ground => 0,
                PolyType::OffMeshConnection => 1,
            });
            buf.write_u8(p.area);
            buf.write_u16(p.flags);
            for v in &p.verts {
                buf.write_u16(*v);
            }
            for e in 0..p.verts.len() {
                let portals = p.portals.get(e).map(Vec::as_slice).unwrap_or(&[]);
                buf.write_u8(portals.len().min(u8::MAX as usize) as u8);
                for portal in portals.iter().take(u8::MAX as usize) {
                    buf.write_u16(portal.poly);
                    buf.write_u8(portal.tmin);
                    buf.write_u8(portal.tmax);
                }
            }
        }
        for m in &self.detail_meshes {
            for v in m {
                buf.write_u32(*v);
            }
        }
        for v in &self.detail_verts {
            buf.write_vec3(*v);
        }
        for t in &self.detail_tris {
            buf.append(t);
        }
        for con in &self.off_mesh_cons {
            buf.write_vec3(con.start);
            buf.write_vec3(con.end);
            buf.write_f32(con.rad);
            buf.write_u16(con.poly);
            buf.write_u8(con.bidirectional as u8);
            buf.write_u32(con.user_id);
        }
        buf.into_inner()
    }

    pub fn decode(data: &[u8]) -> Result<TileData, NavMeshError> {
        let mut buf = ByteBuffer::from_bytes(data);
        let magic = buf.read_i32().map_err(|_| NavMeshError::Truncated)?;
        if magic != DT_NAVMESH_MAGIC {
            return Err(NavMeshError::WrongMagic);
        }
        let version = buf.read_i32().map_err(|_| NavMeshError::Truncated)?;
        if version != DT_NAVMESH_VERSION {
            return Err(NavMeshError::WrongVersion(version));
        }
        Self::read_body(&mut buf).map_err(|_| NavMeshError::Truncated)
    }

    fn read_body(buf: &mut ByteBuffer) -> std::io::Result<TileData> {
        let mut header = TileHeader {
            x: buf.read_i32()?,
            y: buf.read_i32()?,
            layer: buf.read_i32()?,
            user_id: buf.read_u32()?,
            ..Default::default()
        };
        header.poly_count = count(buf.read_i32()?)?;
        header.vert_count = count(buf.read_i32()?)?;
        header.detail_mesh_count = count(buf.read_i32()?)?;
        header.detail_vert_count = count(buf.read_i32()?)?;
        header.detail_tri_count = count(buf.read_i32()?)?;
        header.off_mesh_con_count = count(buf.read_i32()?)?;
        header.off_mesh_base = count(buf.read_i32()?)?;
        header.walkable_height = buf.read_f32()?;
        header.walkable_radius = buf.read_f32()?;
        header.walkable_climb = buf.read_f32()?;
        header.bmin = buf.read_vec3()?;
        header.bmax = buf.read_vec3()?;

        let mut verts = Vec::new();
        for _ in 0..header.vert_count {
            verts.push(buf.read_vec3()?);
        }

        let mut polys = Vec::new();
        let mut flag_offsets = Vec::new();
        for _ in 0..header.poly_count {
            let nv = buf.read_u8()? as usize;
            let poly_type = match buf.read_u8()? {
                0 => PolyType::Ground,
                _ => PolyType::OffMeshConnection,
            };
            let area = buf.read_u8()?;
            flag_offsets.push(buf.read_pos());
            let flags = buf.read_u16()?;
            let mut pverts = Vec::with_capacity(nv);
            for _ in 0..nv {
                let v = buf.read_u16()?;
                if v as usize >= header.vert_count {
                    return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, "vertex index out of range"));
                }
                pverts.push(v);
            }
            let mut portals = Vec::with_capacity(nv);
            for _ in 0..nv {
                let n = buf.read_u8()? as usize;
                let mut edge = Vec::with_capacity(n);
                for _ in 0..n {
                    edge.push(Portal { poly: buf.read_u16()?, tmin: buf.read_u8()?, tmax: buf.read_u8()? });
                }
                portals.push(edge);
            }
            polys.push(Poly { verts: pverts, flags, area, poly_type, portals });
        }

        let mut detail_meshes = Vec::new();
        for _ in 0..header.detail_mesh_count {
            detail_meshes.push([buf.read_u32()?, buf.read_u32()?, buf.read_u32()?, buf.read_u32()?]);
        }
        let mut detail_verts = Vec::new();
        for _ in 0..header.detail_vert_count {
            detail_verts.push(buf.read_vec3()?);
        }
        let mut detail_tris = Vec::new();
        for _ in 0..header.detail_tri_count {
            detail_tris.push([buf.read_u8()?, buf.read_u8()?, buf.read_u8()?, buf.read_u8()?]);
        }
        let mut off_mesh_cons = Vec::new();
        for _ in 0..header.off_mesh_con_count {
            off_mesh_cons.push(OffMeshCon {
                start: buf.read_vec3()?,
                end: buf.read_vec3()?,
                rad: buf.read_f32()?,
                poly: buf.read_u16()?,
                bidirectional: buf.read_u8()? != 0,
                user_id: buf.read_u32()?,
            });
        }

        Ok(TileData { header, verts, polys, flag_offsets, detail_meshes, detail_verts, detail_tris, off_mesh_cons })
    }
}

/// Inputs for one tile
pub struct NavMeshCreateParams<'a> {
    pub pmesh: &'a PolyMesh,
    pub dmesh: &'a PolyMeshDetail,
    pub off_mesh: &'a [OffMeshConnection],
    pub walkable_height: f32,
    pub walkable_radius: f32,
    pub walkable_climb: f32,
    pub tile_x: i32,
    pub tile_y: i32,
    pub user_id: u32,
}

/// Edge of a ground polygon, bucketed by the grid line it lies on
struct EdgeRec {
    poly: usize,
    edge: usize,
    /// Positions of the end points along the line
    sa: i64,
    sb: i64,
    ya: f32,
    yb: f32,
    forward: bool,
}

fn gcd(mut a: i32, mut b: i32) -> i32 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}

/// Find the shared stretches between edges of different polygons. Edges must
/// lie on the same line, run in opposite directions, overlap, and be within
/// `climb` of each other in the middle of the overlap.
fn compute_portals(pmesh: &PolyMesh, climb: f32) -> Vec<Vec<Vec<Portal>>> {
    let mut lines: HashMap<(i32, i32, i64), Vec<EdgeRec>> = HashMap::new();

    for (p, poly) in pmesh.polys.iter().enumerate() {
        let nv = poly.len();
        for e in 0..nv {
            let a = pmesh.verts[poly[e] as usize];
            let b = pmesh.verts[poly[(e + 1) % nv] as usize];
            let (ax, az, bx, bz) = (a[0] as i32, a[2] as i32, b[0] as i32, b[2] as i32);
            let (dx, dz) = (bx - ax, bz - az);
            let g = gcd(dx.abs(), dz.abs());
            if g == 0 {
                continue;
            }
            let (mut ux, mut uz) = (dx / g, dz / g);
            let forward = ux > 0 || (ux == 0 && uz > 0);
            if !forward {
                ux = -ux;
                uz = -uz;
            }
            let c = uz as i64 * ax as i64 - ux as i64 * az as i64;
            lines.entry((ux, uz, c)).or_default().push(EdgeRec {
                poly: p,
                edge: e,
                sa: ux as i64 * ax as i64 + uz as i64 * az as i64,
                sb: ux as i64 * bx as i64 + uz as i64 * bz as i64,
                ya: a[1] as f32 * pmesh.ch,
                yb: b[1] as f32 * pmesh.ch,
                forward,
            });
        }
    }

    let mut portals: Vec<Vec<Vec<Portal>>> = pmesh.polys.iter().map(|p| vec![Vec::new(); p.len()]).collect();
    let height_at = |r: &EdgeRec, s: f32| r.ya + (r.yb - r.ya) * (s - r.sa as f32) / (r.sb - r.sa) as f32;

    for edges in lines.values() {
        for e1 in edges {
            for e2 in edges {
                if e1.poly == e2.poly || e1.forward == e2.forward {
                    continue;
                }
                let lo = e1.sa.min(e1.sb).max(e2.sa.min(e2.sb));
                let hi = e1.sa.max(e1.sb).min(e2.sa.max(e2.sb));
                if hi <= lo {
                    continue;
                }
                let mid = (lo + hi) as f32 * 0.5;
                if (height_at(e1, mid) - height_at(e2, mid)).abs() > climb {
                    continue;
                }
                let len = (e1.sb - e1.sa) as f32;
                let t0 = (lo - e1.sa) as f32 / len;
                let t1 = (hi - e1.sa) as f32 / len;
                let quant = |t: f32| (t.clamp(0.0, 1.0) * 255.0).round() as u8;
                let (tmin, tmax) = (quant(t0.min(t1)), quant(t0.max(t1)));
                portals[e1.poly][e1.edge].push(Portal { poly: e2.poly as u16, tmin, tmax });
            }
        }
    }
    for edges in portals.iter_mut().flat_map(|p| p.iter_mut()) {
        edges.sort_by_key(|p| (p.tmin, p.poly));
    }
    portals
}

/// Build the tile data blob for a polygon mesh, its detail mesh and the
/// off-mesh connections that start inside the mesh bounds
pub fn create_nav_mesh_data(params: &NavMeshCreateParams) -> Result<Vec<u8>, EngineError> {
    let pmesh = params.pmesh;
    let dmesh = params.dmesh;
    if pmesh.polys.is_empty() || pmesh.verts.is_empty() {
        return Err(EngineError::InvalidInput);
    }
    if pmesh.polys.iter().any(|p| p.len() < 3 || p.len() > DT_VERTS_PER_POLYGON) {
        return Err(EngineError::InvalidInput);
    }
    if dmesh.meshes.len() != pmesh.polys.len() {
        return Err(EngineError::Engine("detail mesh does not match polygon mesh".to_string()));
    }

    let cons: Vec<&OffMeshConnection> = params
        .off_mesh
        .iter()
        .filter(|c| {
            c.start[0] >= pmesh.bmin[0]
                && c.start[0] <= pmesh.bmax[0]
                && c.start[2] >= pmesh.bmin[2]
                && c.start[2] <= pmesh.bmax[2]
        })
        .collect();

    let total_verts = pmesh.verts.len() + cons.len() * 2;
    let total_polys = pmesh.polys.len() + cons.len();
    if total_verts > u16::MAX as usize || total_polys > u16::MAX as usize {
        return Err(EngineError::Engine("too many vertices or polygons for a tile".to_string()));
    }

    let mut verts: Vec<Vec3> = (0..pmesh.verts.len()).map(|i| pmesh.world_vert(i)).collect();
    let portal_lists = compute_portals(pmesh, params.walkable_climb);

    let mut polys: Vec<Poly> = pmesh
        .polys
        .iter()
        .zip(portal_lists)
        .enumerate()
        .map(|(i, (p, portals))| Poly {
            verts: p.clone(),
            flags: pmesh.flags[i],
            area: pmesh.areas[i],
            poly_type: PolyType::Ground,
            portals,
        })
        .collect();

    let off_mesh_base = polys.len();
    let mut off_mesh_cons = Vec::with_capacity(cons.len());
    for (k, con) in cons.iter().enumerate() {
        let v = verts.len() as u16;
        verts.push(con.start);
        verts.push(con.end);
        polys.push(Poly {
            verts: vec![v, v + 1],
            flags: con.flags,
            area: con.area,
            poly_type: PolyType::OffMeshConnection,
            portals: vec![Vec::new(), Vec::new()],
        });
        off_mesh_cons.push(OffMeshCon {
            start: con.start,
            end: con.end,
            rad: con.radius,
            poly: (off_mesh_base + k) as u16,
            bidirectional: con.bidirectional,
            user_id: con.user_id,
        });
    }

    let mut bmin = pmesh.bmin;
    let mut bmax = pmesh.bmax;
    for v in &verts {
        for k in 0..3 {
            bmin[k] = bmin[k].min(v[k]);
            bmax[k] = bmax[k].max(v[k]);
        }
    }

    let tile = TileData {
        header: TileHeader {
            x: params.tile_x,
            y: params.tile_y,
            layer: 0,
            user_id: params.user_id,
            poly_count: polys.len(),
            vert_count: verts.len(),
            detail_mesh_count: dmesh.meshes.len(),
            detail_vert_count: dmesh.verts.len(),
            detail_tri_count: dmesh.tris.len(),
            off_mesh_con_count: off_mesh_cons.len(),
            off_mesh_base,
            walkable_height: params.walkable_height,
            walkable_radius: params.walkable_radius,
            walkable_climb: params.walkable_climb,
            bmin,
            bmax,
        },
        verts,
        polys,
        flag_offsets: Vec::new(),
        detail_meshes: dmesh.meshes.clone(),
        detail_verts: dmesh.verts.clone(),
        detail_tris: dmesh.tris.clone(),
        off_mesh_cons,
    };
    let data = tile.encode();
    debug!(
        "Tile data: {} polys ({} off-mesh), {} verts, {} bytes",
        tile.polys.len(),
        tile.off_mesh_cons.len(),
        tile.verts.len(),
        data.len()
    );
    Ok(data)
}

// geometry.rs - input geometry: triangle soup, its spatial index and authored data
//
// Besides the mesh, a geometry carries the user-authored convex area volumes
// and off-mesh connections. Both can be saved next to the mesh in a small
// line-based geometry set (.gset) file:
//
//   f <mesh.obj>
//   s <13 build settings> <partition index>
//   c <start xyz> <end xyz> <radius> <bidir> <area> <flags>
//   v <nverts> <area> <hmin> <hmax>      followed by nverts lines of "x y z"

use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use tracing::{error, info, warn};

use crate::math::{intersect_segment_triangle, Vec3};
use crate::mesh_loader::ObjMesh;
use crate::settings::{BuildSettings, PartitionType};
use crate::spatial_index::TriangleIndex;

pub const MAX_CONVEXVOL_PTS: usize = 12;
pub const MAX_VOLUMES: usize = 256;
pub const MAX_OFFMESH_CONNECTIONS: usize = 256;

/// Triangles per leaf of the spatial index
const TRIS_PER_CHUNK: usize = 256;

/// Convex footprint with a vertical extent that overrides the area of the
/// walkable surface inside it
#[derive(Clone, Debug, PartialEq)]
pub struct ConvexVolume {
    pub verts: Vec<Vec3>,
    pub hmin: f32,
    pub hmax: f32,
    pub area: u8,
}

/// Authored point to point link
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct OffMeshConnection {
    pub start: Vec3,
    pub end: Vec3,
    pub radius: f32,
    pub bidirectional: bool,
    pub area: u8,
    pub flags: u16,
    pub user_id: u32,
}

pub struct InputGeometry {
    mesh: ObjMesh,
    index: TriangleIndex,
    bmin: Vec3,
    bmax: Vec3,
    volumes: Vec<ConvexVolume>,
    off_mesh: Vec<OffMeshConnection>,
    build_settings: Option<BuildSettings>,
    mesh_path: Option<PathBuf>,
    next_user_id: u32,
}

impl InputGeometry {
    /// Wrap a mesh and build its spatial index
    pub fn from_mesh(mesh: ObjMesh) -> Option<Self> {
        let (bmin, bmax) = mesh.bounds();
        let Some(index) = TriangleIndex::build(mesh.verts(), mesh.tris(), TRIS_PER_CHUNK) else {
            error!("Failed to build spatial index for {} triangles", mesh.tri_count());
            return None;
        };
        Some(InputGeometry {
            mesh,
            index,
            bmin,
            bmax,
            volumes: Vec::new(),
            off_mesh: Vec::new(),
            build_settings: None,
            mesh_path: None,
            next_user_id: 1000,
        })
    }

    /// Load an .obj mesh or a .gset geometry set, picked by extension
    pub fn load(path: &Path) -> Option<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());
        match ext.as_deref() {
            Some("gset") => Self::load_geom_set(path),
            Some("obj") => {
                let mut geom = Self::from_mesh(ObjMesh::load(path)?)?;
                geom.mesh_path = Some(path.to_path_buf());
                Some(geom)
            }
            _ => {
                error!("Unsupported geometry file '{}'", path.display());
                None
            }
        }
    }

    fn load_geom_set(path: &Path) -> Option<Self> {
        let content = match fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) => {
                error!("Could not load '{}': {}", path.display(), e);
                return None;
            }
        };
        let base = path.parent().unwrap_or_else(|| Path::new(""));

        let mut geom: Option<InputGeometry> = None;
        let mut settings: Option<BuildSettings> = None;
        let mut offmesh: Vec<OffMeshConnection> = Vec::new();
        let mut volumes: Vec<ConvexVolume> = Vec::new();

        let mut lines = content.lines();
        while let Some(line) = lines.next() {
            let line = line.trim();
            let mut chars = line.chars();
            let Some(tag) = chars.next() else { continue };
            let rest = chars.as_str().trim();
            match tag {
                'f' => {
                    let mesh_path = base.join(rest);
                    let mesh = ObjMesh::load(&mesh_path)?;
                    let mut g = Self::from_mesh(mesh)?;
                    g.mesh_path = Some(mesh_path);
                    geom = Some(g);
                }
                'c' => {
                    let v = parse_floats(rest);
                    if v.len() < 10 {
                        warn!("Malformed off-mesh line in '{}': {}", path.display(), line);
                        continue;
                    }
                    offmesh.push(OffMeshConnection {
                        start: [v[0], v[1], v[2]],
                        end: [v[3], v[4], v[5]],
                        radius: v[6],
                        bidirectional: v[7] != 0.0,
                        area: v[8] as u8,
                        flags: v[9] as u16,
                        user_id: 0,
                    });
                }
                'v' => {
                    let v = parse_floats(rest);
                    if v.len() < 4 {
                        warn!("Malformed volume line in '{}': {}", path.display(), line);
                        continue;
                    }
                    let nverts = (v[0] as usize).min(MAX_CONVEXVOL_PTS);
                    let mut verts = Vec::with_capacity(nverts);
                    for _ in 0..nverts {
                        let p = lines.next().map(parse_floats).unwrap_or_default();
                        if p.len() >= 3 {
                            verts.push([p[0], p[1], p[2]]);
                        }
                    }
                    volumes.push(ConvexVolume { verts, area: v[1] as u8, hmin: v[2], hmax: v[3] });
                }
                's' => {
                    let v = parse_floats(rest);
                    if v.len() < 14 {
                        warn!("Malformed settings line in '{}': {}", path.display(), line);
                        continue;
                    }
                    settings = Some(BuildSettings {
                        cell_size: v[0],
                        cell_height: v[1],
                        agent_height: v[2],
                        agent_radius: v[3],
                        agent_max_climb: v[4],
                        agent_max_slope: v[5],
                        region_min_size: v[6],
                        region_merge_size: v[7],
                        edge_max_len: v[8],
                        edge_max_error: v[9],
                        verts_per_poly: v[10],
                        detail_sample_dist: v[11],
                        detail_sample_max_error: v[12],
                        partition_type: PartitionType::from_index(v[13] as i32),
                        keep_intermediate: false,
                    });
                }
                _ => {}
            }
        }

        let Some(mut geom) = geom else {
            error!("Geometry set '{}' names no mesh", path.display());
            return None;
        };
        geom.build_settings = settings;
        for c in offmesh {
            geom.add_off_mesh_connection(c.start, c.end, c.radius, c.bidirectional, c.area, c.flags);
        }
        for vol in volumes {
            geom.add_convex_volume(&vol.verts, vol.hmin, vol.hmax, vol.area);
        }
        info!(
            "Loaded geometry set '{}': {} volumes, {} off-mesh connections",
            path.display(),
            geom.volumes.len(),
            geom.off_mesh.len()
        );
        Some(geom)
    }

    /// Write a geometry set referencing the mesh this geometry was loaded from
    pub fn save_geom_set(&self, path: &Path, settings: Option<&BuildSettings>) -> anyhow::Result<()> {
        let mesh_path = self
            .mesh_path
            .as_ref()
            .context("Geometry has no source mesh file")?;

        let mut out = String::new();
        writeln!(out, "f {}", mesh_path_for(path, mesh_path).display())?;
        if let Some(s) = settings.or(self.build_settings.as_ref()) {
            writeln!(
                out,
                "s {} {} {} {} {} {} {} {} {} {} {} {} {} {}",
                s.cell_size,
                s.cell_height,
                s.agent_height,
                s.agent_radius,
                s.agent_max_climb,
                s.agent_max_slope,
                s.region_min_size,
                s.region_merge_size,
                s.edge_max_len,
                s.edge_max_error,
                s.verts_per_poly,
                s.detail_sample_dist,
                s.detail_sample_max_error,
                s.partition_type.index()
            )?;
        }
        for c in &self.off_mesh {
            writeln!(
                out,
                "c {} {} {} {} {} {} {} {} {} {}",
                c.start[0],
                c.start[1],
                c.start[2],
                c.end[0],
                c.end[1],
                c.end[2],
                c.radius,
                c.bidirectional as i32,
                c.area,
                c.flags
            )?;
        }
        for vol in &self.volumes {
            writeln!(out, "v {} {} {} {}", vol.verts.len(), vol.area, vol.hmin, vol.hmax)?;
            for v in &vol.verts {
                writeln!(out, "{} {} {}", v[0], v[1], v[2])?;
            }
        }

        fs::write(path, out).with_context(|| format!("Failed to write '{}'", path.display()))
    }

    pub fn mesh(&self) -> &ObjMesh {
        &self.mesh
    }

    pub fn spatial_index(&self) -> &TriangleIndex {
        &self.index
    }

    pub fn bounds(&self) -> (Vec3, Vec3) {
        (self.bmin, self.bmax)
    }

    pub fn mesh_path(&self) -> Option<&Path> {
        self.mesh_path.as_deref()
    }

    pub fn set_mesh_path(&mut self, path: &Path) {
        self.mesh_path = Some(path.to_path_buf());
    }

    /// Settings stored in a loaded geometry set
    pub fn build_settings(&self) -> Option<&BuildSettings> {
        self.build_settings.as_ref()
    }

    /// Closest hit of segment src..dst against the mesh, as a fraction of the
    /// segment length.
    pub fn raycast_mesh(&self, src: &Vec3, dst: &Vec3) -> Option<f32> {
        // Prune the segment to the mesh bounds first
        let (btmin, btmax) = isect_seg_aabb(src, dst, &self.bmin, &self.bmax)?;
        let dir = [dst[0] - src[0], dst[2] - src[2]];
        let p = [src[0] + dir[0] * btmin, src[2] + dir[1] * btmin];
        let q = [src[0] + dir[0] * btmax, src[2] + dir[1] * btmax];

        let mut leaves = [0usize; 512];
        let n = self.index.query_segment(p, q, &mut leaves);

        let mut tmin = 1.0f32;
        let mut hit = false;
        for &node in &leaves[..n] {
            for tri in self.index.leaf_triangles(node).chunks_exact(3) {
                let a = self.mesh.vertex(tri[0] as usize);
                let b = self.mesh.vertex(tri[1] as usize);
                let c = self.mesh.vertex(tri[2] as usize);
                if let Some(t) = intersect_segment_triangle(src, dst, &a, &b, &c)
                    && t < tmin
                {
                    tmin = t;
                    hit = true;
                }
            }
        }
        hit.then_some(tmin)
    }

    // ---- Convex volumes ----

    pub fn convex_volumes(&self) -> &[ConvexVolume] {
        &self.volumes
    }

    /// Returns false when the volume table is full or the footprint is degenerate
    pub fn add_convex_volume(&mut self, verts: &[Vec3], hmin: f32, hmax: f32, area: u8) -> bool {
        if self.volumes.len() >= MAX_VOLUMES {
            warn!("Convex volume limit ({}) reached", MAX_VOLUMES);
            return false;
        }
        if verts.len() < 3 {
            return false;
        }
        let n = verts.len().min(MAX_CONVEXVOL_PTS);
        self.volumes.push(ConvexVolume { verts: verts[..n].to_vec(), hmin, hmax, area });
        true
    }

    /// Remove a volume, keeping the order of the others
    pub fn delete_convex_volume(&mut self, i: usize) {
        if i < self.volumes.len() {
            self.volumes.remove(i);
        }
    }

    // ---- Off-mesh connections ----

    pub fn off_mesh_connections(&self) -> &[OffMeshConnection] {
        &self.off_mesh
    }

    pub fn add_off_mesh_connection(
        &mut self,
        start: Vec3,
        end: Vec3,
        radius: f32,
        bidirectional: bool,
        area: u8,
        flags: u16,
    ) -> bool {
        if self.off_mesh.len() >= MAX_OFFMESH_CONNECTIONS {
            warn!("Off-mesh connection limit ({}) reached", MAX_OFFMESH_CONNECTIONS);
            return false;
        }
        let user_id = self.next_user_id;
        self.next_user_id += 1;
        self.off_mesh.push(OffMeshConnection { start, end, radius, bidirectional, area, flags, user_id });
        true
    }

    pub fn delete_off_mesh_connection(&mut self, i: usize) {
        if i < self.off_mesh.len() {
            self.off_mesh.remove(i);
        }
    }
}

/// Mesh path as written into a geometry set at `gset`: relative to the set's
/// directory when the mesh lives below it, absolute otherwise. Loading joins
/// the written path onto that same directory.
fn mesh_path_for(gset: &Path, mesh: &Path) -> PathBuf {
    let base = gset.parent().unwrap_or_else(|| Path::new(""));
    if let Ok(rel) = mesh.strip_prefix(base) {
        return rel.to_path_buf();
    }
    match (fs::canonicalize(base), fs::canonicalize(mesh)) {
        (Ok(b), Ok(m)) => m.strip_prefix(&b).map(Path::to_path_buf).unwrap_or(m),
        (_, Ok(m)) => m,
        _ => mesh.to_path_buf(),
    }
}

fn parse_floats(s: &str) -> Vec<f32> {
    s.split_whitespace().filter_map(|t| t.parse().ok()).collect()
}

/// Slab test of segment sp..sq against a box; returns the entry/exit fractions
fn isect_seg_aabb(sp: &Vec3, sq: &Vec3, amin: &Vec3, amax: &Vec3) -> Option<(f32, f32)> {
    const EPS: f32 = 1e-6;

    let d = [sq[0] - sp[0], sq[1] - sp[1], sq[2] - sp[2]];
    let mut tmin = 0.0f32;
    let mut tmax = 1.0f32;

    for i in 0..3 {
        if d[i].abs() < EPS {
            if sp[i] < amin[i] || sp[i] > amax[i] {
                return None;
            }
        } else {
            let ood = 1.0 / d[i];
            let mut t1 = (amin[i] - sp[i]) * ood;
            let mut t2 = (amax[i] - sp[i]) * ood;
            if t1 > t2 {
                std::mem::swap(&mut t1, &mut t2);
            }
            tmin = tmin.max(t1);
            tmax = tmax.min(t2);
            if tmin > tmax {
                return None;
            }
        }
    }
    Some((tmin, tmax))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plane_mesh() -> ObjMesh {
        ObjMesh::parse("v -5 0 -5\nv -5 0 5\nv 5 0 5\nv 5 0 -5\nf 1 2 3 4\n")
    }

    #[test]
    fn test_raycast_mesh() {
        let geom = InputGeometry::from_mesh(plane_mesh()).unwrap();
        let t = geom.raycast_mesh(&[1.0, 10.0, 1.0], &[1.0, -10.0, 1.0]).unwrap();
        assert!((t - 0.5).abs() < 1e-5);
        assert!(geom.raycast_mesh(&[8.0, 10.0, 8.0], &[8.0, -10.0, 8.0]).is_none());
    }

    #[test]
    fn test_volume_limits_and_compaction() {
        let mut geom = InputGeometry::from_mesh(plane_mesh()).unwrap();
        let tri = [[0.0, 0.0, 0.0], [0.0, 0.0, 1.0], [1.0, 0.0, 0.0]];
        assert!(!geom.add_convex_volume(&tri[..2], 0.0, 1.0, 1));
        for area in 0..3u8 {
            assert!(geom.add_convex_volume(&tri, 0.0, 1.0, area));
        }
        geom.delete_convex_volume(1);
        let areas: Vec<u8> = geom.convex_volumes().iter().map(|v| v.area).collect();
        assert_eq!(areas, vec![0, 2]);
        geom.delete_convex_volume(7);
        assert_eq!(geom.convex_volumes().len(), 2);
    }

    #[test]
    fn test_off_mesh_limit() {
        let mut geom = InputGeometry::from_mesh(plane_mesh()).unwrap();
        for _ in 0..MAX_OFFMESH_CONNECTIONS {
            assert!(geom.add_off_mesh_connection([0.0; 3], [1.0; 3], 0.5, true, 5, 8));
        }
        assert!(!geom.add_off_mesh_connection([0.0; 3], [1.0; 3], 0.5, true, 5, 8));
    }

    #[test]
    fn test_geom_set_round_trip() {
        let dir = std::env::temp_dir().join(format!("navcore-gset-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let obj = dir.join("plane.obj");
        fs::write(&obj, "v -5 0 -5\nv -5 0 5\nv 5 0 5\nv 5 0 -5\nf 1 2 3 4\n").unwrap();

        let mut geom = InputGeometry::load(&obj).unwrap();
        geom.add_convex_volume(&[[0.0, 0.0, 0.0], [0.0, 0.0, 2.0], [2.0, 0.0, 0.0]], -1.0, 5.0, 1);
        geom.add_off_mesh_connection([1.0, 0.0, 1.0], [3.0, 0.0, 3.0], 0.6, false, 5, 8);
        let settings = BuildSettings { cell_size: 0.25, partition_type: PartitionType::Layers, ..Default::default() };

        let gset = dir.join("plane.gset");
        geom.save_geom_set(&gset, Some(&settings)).unwrap();

        let loaded = InputGeometry::load(&gset).unwrap();
        assert_eq!(loaded.mesh().tri_count(), 2);
        assert_eq!(loaded.convex_volumes(), geom.convex_volumes());
        let c = loaded.off_mesh_connections()[0];
        assert_eq!(c.end, [3.0, 0.0, 3.0]);
        assert!(!c.bidirectional);
        assert_eq!(c.flags, 8);
        let s = loaded.build_settings().unwrap();
        assert_eq!(s.cell_size, 0.25);
        assert_eq!(s.partition_type, PartitionType::Layers);

        let _ = fs::remove_dir_all(&dir);
    }
    #[test]
    fn test_geom_set_in_relative_dir_reloads() {
        let dir = PathBuf::from(format!("navcore-gset-rel-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let obj = dir.join("plane.obj");
        fs::write(&obj, "v -5 0 -5\nv -5 0 5\nv 5 0 5\nv 5 0 -5\nf 1 2 3 4\n").unwrap();

        let geom = InputGeometry::load(&obj).unwrap();
        let gset = dir.join("plane.gset");
        geom.save_geom_set(&gset, None).unwrap();
        let text = fs::read_to_string(&gset).unwrap();
        assert!(text.starts_with("f plane.obj\n"), "{text}");

        let loaded = InputGeometry::load(&gset);
        let _ = fs::remove_dir_all(&dir);
        assert_eq!(loaded.unwrap().mesh().tri_count(), 2);
    }

    #[test]
    fn test_mesh_path_outside_set_dir_is_absolute() {
        let dir = std::env::temp_dir().join(format!("navcore-gset-out-{}", std::process::id()));
        fs::create_dir_all(dir.join("sets")).unwrap();
        let obj = dir.join("plane.obj");
        fs::write(&obj, "v -5 0 -5\nv -5 0 5\nv 5 0 5\nv 5 0 -5\nf 1 2 3 4\n").unwrap();

        let written = mesh_path_for(&dir.join("sets").join("plane.gset"), &obj);
        let _ = fs::remove_dir_all(&dir);
        assert!(written.is_absolute());
        assert!(written.ends_with("plane.obj"));
    }

    #[test]
    fn test_geom_set_skips_lines_with_multibyte_tag() {
        let dir = std::env::temp_dir().join(format!("navcore-gset-utf8-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("plane.obj"), "v -5 0 -5\nv -5 0 5\nv 5 0 5\nv 5 0 -5\nf 1 2 3 4\n").unwrap();
        let gset = dir.join("plane.gset");
        fs::write(&gset, "\u{e9}tage note\n\u{e9}\nf plane.obj\n").unwrap();

        let loaded = InputGeometry::load(&gset);
        let _ = fs::remove_dir_all(&dir);
        assert_eq!(loaded.unwrap().mesh().tri_count(), 2);
    }
}

// mesh_loader.rs - Wavefront OBJ reader
//
// Only positions and faces are read. Polygonal faces are fan triangulated and
// per-triangle unit normals are computed once at load time.

use std::fs;
use std::path::Path;

use tracing::{debug, error};

use crate::math::{vcross, vnormalize, vsub, Vec3};

/// Triangle soup loaded from disk
#[derive(Clone, Debug, Default)]
pub struct ObjMesh {
    verts: Vec<f32>,
    tris: Vec<i32>,
    normals: Vec<f32>,
}

impl ObjMesh {
    /// Read and parse an OBJ file. IO errors are logged and reported as `None`.
    pub fn load(path: &Path) -> Option<Self> {
        let content = match fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) => {
                error!("Could not load '{}': {}", path.display(), e);
                return None;
            }
        };
        let mesh = Self::parse(&content);
        debug!(
            "Loaded '{}': {} verts, {} tris",
            path.display(),
            mesh.vert_count(),
            mesh.tri_count()
        );
        Some(mesh)
    }

    pub fn parse(content: &str) -> Self {
        let mut verts: Vec<f32> = Vec::new();
        let mut tris: Vec<i32> = Vec::new();
        let mut face: Vec<i32> = Vec::with_capacity(32);

        for line in content.lines() {
            let line = line.trim();
            let mut parts = line.split_whitespace();
            match parts.next() {
                Some("v") => {
                    let mut v = [0.0f32; 3];
                    for c in v.iter_mut() {
                        *c = parts.next().and_then(|s| s.parse().ok()).unwrap_or(0.0);
                    }
                    verts.extend_from_slice(&v);
                }
                Some("f") => {
                    let nv = (verts.len() / 3) as i32;
                    face.clear();
                    for token in parts {
                        // "v", "v/vt", "v//vn", "v/vt/vn"
                        let idx = token.split('/').next().and_then(|s| s.parse::<i32>().ok());
                        let Some(idx) = idx else { continue };
                        let vi = if idx < 0 { nv + idx } else { idx - 1 };
                        if vi >= 0 && vi < nv {
                            face.push(vi);
                        }
                    }
                    for i in 2..face.len() {
                        tris.extend_from_slice(&[face[0], face[i - 1], face[i]]);
                    }
                }
                _ => {}
            }
        }

        Self::from_parts(verts, tris)
    }

    /// Build from raw arrays (3 floats per vertex, 3 indices per triangle)
    pub fn from_parts(verts: Vec<f32>, tris: Vec<i32>) -> Self {
        let mut mesh = ObjMesh { verts, tris, normals: Vec::new() };
        mesh.calc_normals();
        mesh
    }

    fn calc_normals(&mut self) {
        self.normals = Vec::with_capacity(self.tris.len());
        for t in 0..self.tri_count() {
            let [a, b, c] = self.triangle(t);
            let n = vnormalize(&vcross(&vsub(&b, &a), &vsub(&c, &a)));
            self.normals.extend_from_slice(&n);
        }
    }

    pub fn verts(&self) -> &[f32] {
        &self.verts
    }

    pub fn tris(&self) -> &[i32] {
        &self.tris
    }

    pub fn normals(&self) -> &[f32] {
        &self.normals
    }

    pub fn vert_count(&self) -> usize {
        self.verts.len() / 3
    }

    pub fn tri_count(&self) -> usize {
        self.tris.len() / 3
    }

    pub fn vertex(&self, i: usize) -> Vec3 {
        [self.verts[i * 3], self.verts[i * 3 + 1], self.verts[i * 3 + 2]]
    }

    pub fn triangle(&self, t: usize) -> [Vec3; 3] {
        let tri = &self.tris[t * 3..t * 3 + 3];
        [
            self.vertex(tri[0] as usize),
            self.vertex(tri[1] as usize),
            self.vertex(tri[2] as usize),
        ]
    }

    /// Axis aligned bounds of all vertices
    pub fn bounds(&self) -> (Vec3, Vec3) {
        if self.verts.is_empty() {
            return ([0.0; 3], [0.0; 3]);
        }
        let mut bmin = self.vertex(0);
        let mut bmax = bmin;
        for i in 1..self.vert_count() {
            let v = self.vertex(i);
            for k in 0..3 {
                bmin[k] = bmin[k].min(v[k]);
                bmax[k] = bmax[k].max(v[k]);
            }
        }
        (bmin, bmax)
    }
}

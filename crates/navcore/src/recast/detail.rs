// detail.rs - height detail mesh
//
// Each polygon gets a triangle fan over its corners. With sampling enabled a
// center vertex is added at the floor height found in the heightfield.

use crate::math::Vec3;

use super::compact::CompactHeightfield;
use super::poly_mesh::PolyMesh;
use super::EngineError;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct PolyMeshDetail {
    /// Per polygon: vertex base, vertex count, triangle base, triangle count
    pub meshes: Vec<[u32; 4]>,
    pub verts: Vec<Vec3>,
    /// Local vertex indices plus an edge flags byte
    pub tris: Vec<[u8; 4]>,
}

impl PolyMeshDetail {
    pub fn tri_count(&self) -> usize {
        self.tris.len()
    }
}

fn sample_height(chf: &CompactHeightfield, pos: &Vec3, reg: u16) -> Option<f32> {
    let x = ((pos[0] - chf.bmin[0]) / chf.cs) as i32;
    let z = ((pos[2] - chf.bmin[2]) / chf.cs) as i32;
    if x < 0 || z < 0 || x >= chf.width || z >= chf.height {
        return None;
    }
    let c = chf.cell(x, z);
    let target = (pos[1] - chf.bmin[1]) / chf.ch;
    (c.index as usize..(c.index + c.count) as usize)
        .filter(|&i| chf.spans[i].reg == reg)
        .map(|i| chf.spans[i].y as f32)
        .min_by(|a, b| (a - target).abs().total_cmp(&(b - target).abs()))
        .map(|y| chf.bmin[1] + y * chf.ch)
}

pub fn build_detail_mesh(pmesh: &PolyMesh, chf: &CompactHeightfield, sample_dist: f32) -> Result<PolyMeshDetail, EngineError> {
    let mut dmesh = PolyMeshDetail::default();
    dmesh.meshes.try_reserve(pmesh.poly_count()).map_err(|_| EngineError::OutOfMemory)?;

    for (p, poly) in pmesh.polys.iter().enumerate() {
        let vbase = dmesh.verts.len() as u32;
        let tbase = dmesh.tris.len() as u32;
        let corners: Vec<Vec3> = poly.iter().map(|&v| pmesh.world_vert(v as usize)).collect();
        let n = corners.len();
        if n < 3 || n > u8::MAX as usize - 1 {
            return Err(EngineError::InvalidInput);
        }
        dmesh.verts.extend_from_slice(&corners);

        if sample_dist > 0.0 {
            let mut center = [0.0f32; 3];
            for c in &corners {
                for k in 0..3 {
                    center[k] += c[k] / n as f32;
                }
            }
            if let Some(y) = sample_height(chf, &center, pmesh.regs[p]) {
                center[1] = y;
            }
            dmesh.verts.push(center);
            let ci = n as u8;
            for i in 0..n {
                dmesh.tris.push([ci, i as u8, ((i + 1) % n) as u8, 0]);
            }
        } else {
            for i in 2..n {
                dmesh.tris.push([0, (i - 1) as u8, i as u8, 0]);
            }
        }

        let vcount = dmesh.verts.len() as u32 - vbase;
        let tcount = dmesh.tris.len() as u32 - tbase;
        dmesh.meshes.push([vbase, vcount, tbase, tcount]);
    }
    Ok(dmesh)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recast::heightfield::Heightfield;

    fn flat_mesh() -> (PolyMesh, CompactHeightfield) {
        let mut hf = Heightfield::new(4, 4, [0.0; 3], [4.0, 1.0, 4.0], 1.0, 0.5).unwrap();
        for z in 0..4 {
            for x in 0..4 {
                hf.add_span(x, z, 0, 2, super::super::RC_WALKABLE_AREA, 1);
            }
        }
        let mut chf = CompactHeightfield::build(2, 1, &hf).unwrap();
        for s in chf.spans.iter_mut() {
            s.reg = 1;
        }
        let pmesh = PolyMesh {
            verts: vec![[0, 2, 0], [0, 2, 4], [4, 2, 4], [4, 2, 0]],
            polys: vec![vec![0, 1, 2, 3]],
            regs: vec![1],
            areas: vec![0],
            flags: vec![1],
            nvp: 6,
            bmin: [0.0; 3],
            bmax: [4.0, 1.0, 4.0],
            cs: 1.0,
            ch: 0.5,
        };
        (pmesh, chf)
    }

    #[test]
    fn test_fan_without_sampling() {
        let (pmesh, chf) = flat_mesh();
        let d = build_detail_mesh(&pmesh, &chf, 0.0).unwrap();
        assert_eq!(d.meshes, vec![[0, 4, 0, 2]]);
        assert_eq!(d.tris, vec![[0, 1, 2, 0], [0, 2, 3, 0]]);
        assert!(d.verts.iter().all(|v| (v[1] - 1.0).abs() < 1e-6));
    }

    #[test]
    fn test_center_vertex_with_sampling() {
        let (pmesh, chf) = flat_mesh();
        let d = build_detail_mesh(&pmesh, &chf, 1.8).unwrap();
        assert_eq!(d.meshes, vec![[0, 5, 0, 4]]);
        let c = d.verts[4];
        assert!((c[0] - 2.0).abs() < 1e-6 && (c[2] - 2.0).abs() < 1e-6);
        assert!((c[1] - 1.0).abs() < 1e-6);
    }
}

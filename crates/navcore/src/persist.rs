// persist.rs - navmesh file
//
// Layout (little endian):
//   i32 magic 'MSET', i32 version, i32 tile count,
//   params { f32 orig[3], f32 tileWidth, f32 tileHeight, i32 maxTiles, i32 maxPolys }
//   then per tile: i64 tileRef, i32 dataSize, u8 data[dataSize]

use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;

use anyhow::Context;
use byteorder::{LittleEndian, WriteBytesExt};
use navkit_shared::util::ByteBuffer;
use tracing::{error, info, warn};

use crate::detour::{NavMesh, NavMeshParams, PolyRef};

pub const NAVMESHSET_MAGIC: i32 = (b'M' as i32) << 24 | (b'S' as i32) << 16 | (b'E' as i32) << 8 | b'T' as i32;
pub const NAVMESHSET_VERSION: i32 = 1;

/// Write every tile of the navmesh with its reference
pub fn save_nav_mesh(path: &Path, mesh: &NavMesh) -> anyhow::Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory '{}'", parent.display()))?;
    }
    let file = fs::File::create(path).with_context(|| format!("Failed to create '{}'", path.display()))?;
    let mut out = BufWriter::new(file);

    let tiles: Vec<_> = mesh.tiles().filter(|t| !t.data().is_empty()).collect();
    out.write_i32::<LittleEndian>(NAVMESHSET_MAGIC)?;
    out.write_i32::<LittleEndian>(NAVMESHSET_VERSION)?;
    out.write_i32::<LittleEndian>(tiles.len() as i32)?;

    let params = mesh.params();
    for v in &params.orig {
        out.write_f32::<LittleEndian>(*v)?;
    }
    out.write_f32::<LittleEndian>(params.tile_width)?;
    out.write_f32::<LittleEndian>(params.tile_height)?;
    out.write_i32::<LittleEndian>(params.max_tiles)?;
    out.write_i32::<LittleEndian>(params.max_polys)?;

    for tile in &tiles {
        out.write_i64::<LittleEndian>(tile.tile_ref().0 as i64)?;
        out.write_i32::<LittleEndian>(tile.data().len() as i32)?;
        out.write_all(tile.data())?;
    }
    out.flush()?;
    info!("Saved navmesh '{}' ({} tiles)", path.display(), tiles.len());
    Ok(())
}

/// Read a navmesh file. `None` on IO errors, a bad header or truncation.
pub fn load_nav_mesh(path: &Path) -> Option<NavMesh> {
    let bytes = match fs::read(path) {
        Ok(b) => b,
        Err(e) => {
            error!("Could not open navmesh '{}': {}", path.display(), e);
            return None;
        }
    };
    let mesh = decode_nav_mesh_set(&bytes);
    if let Some(mesh) = &mesh {
        info!("Loaded navmesh '{}' ({} tiles)", path.display(), mesh.tile_count());
    }
    mesh
}

pub fn decode_nav_mesh_set(bytes: &[u8]) -> Option<NavMesh> {
    let mut buf = ByteBuffer::from_bytes(bytes);

    let magic = buf.read_i32().ok()?;
    let version = buf.read_i32().ok()?;
    if magic != NAVMESHSET_MAGIC {
        warn!("Navmesh file has wrong magic {:#x}", magic);
        return None;
    }
    if version != NAVMESHSET_VERSION {
        warn!("Navmesh file version {} is not supported", version);
        return None;
    }
    let tile_count = buf.read_i32().ok()?;
    let params = NavMeshParams {
        orig: buf.read_vec3().ok()?,
        tile_width: buf.read_f32().ok()?,
        tile_height: buf.read_f32().ok()?,
        max_tiles: buf.read_i32().ok()?,
        max_polys: buf.read_i32().ok()?,
    };

    let mut mesh = match NavMesh::new(params) {
        Ok(m) => m,
        Err(e) => {
            warn!("Navmesh file has bad parameters: {}", e);
            return None;
        }
    };

    for _ in 0..tile_count.max(0) {
        let tile_ref = PolyRef(buf.read_u64().ok()?);
        let data_size = buf.read_i32().ok()?;
        if tile_ref.is_null() || data_size <= 0 {
            break;
        }
        let data = buf.read_bytes(data_size as usize).ok()?;
        if let Err(e) = mesh.add_tile(data, tile_ref) {
            warn!("Failed to restore tile {}: {}", tile_ref, e);
            return None;
        }
    }
    Some(mesh)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detour::tile::tests::sample_nav_mesh;

    fn temp_path(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("navkit_persist_{}_{}", std::process::id(), name))
    }

    #[test]
    fn test_magic_spells_mset() {
        assert_eq!(NAVMESHSET_MAGIC, 0x4D53_4554);
    }

    #[test]
    fn test_save_load_round_trip() {
        let mut nav = sample_nav_mesh(&[]);
        let r = nav.tiles().next().unwrap().poly_ref(1);
        nav.set_poly_flags(r, 0x10);

        let path = temp_path("round_trip.navmesh");
        save_nav_mesh(&path, &nav).unwrap();
        let loaded = load_nav_mesh(&path).unwrap();
        let _ = fs::remove_file(&path);

        assert_eq!(loaded.tile_count(), nav.tile_count());
        assert_eq!(loaded.params(), nav.params());
        let a = nav.tiles().next().unwrap();
        let b = loaded.tiles().next().unwrap();
        assert_eq!(a.tile_ref(), b.tile_ref());
        assert_eq!(a.data(), b.data());
        assert_eq!(loaded.poly_flags(r), Some(0x10));
    }

    #[test]
    fn test_rejects_bad_header_and_truncation() {
        let nav = sample_nav_mesh(&[]);
        let path = temp_path("bad.navmesh");
        save_nav_mesh(&path, &nav).unwrap();
        let bytes = fs::read(&path).unwrap();
        let _ = fs::remove_file(&path);

        let mut wrong_magic = bytes.clone();
        wrong_magic[0] ^= 0xff;
        assert!(decode_nav_mesh_set(&wrong_magic).is_none());

        let mut wrong_version = bytes.clone();
        wrong_version[4] = 2;
        assert!(decode_nav_mesh_set(&wrong_version).is_none());

        assert!(decode_nav_mesh_set(&bytes[..bytes.len() - 3]).is_none());
        assert!(decode_nav_mesh_set(&bytes[..10]).is_none());
        assert!(decode_nav_mesh_set(&bytes).is_some());
    }

    #[test]
    fn test_null_tile_record_stops_reading() {
        let mut buf = ByteBuffer::new();
        buf.write_i32(NAVMESHSET_MAGIC);
        buf.write_i32(NAVMESHSET_VERSION);
        buf.write_i32(1);
        buf.write_vec3([0.0; 3]);
        buf.write_f32(1.0);
        buf.write_f32(1.0);
        buf.write_i32(1);
        buf.write_i32(16);
        buf.write_u64(0);
        buf.write_i32(0);
        let mesh = decode_nav_mesh_set(buf.contents()).unwrap();
        assert_eq!(mesh.tile_count(), 0);
    }

    #[test]
    fn test_load_missing_file() {
        assert!(load_nav_mesh(Path::new("/nonexistent/navkit/none.navmesh")).is_none());
    }
}

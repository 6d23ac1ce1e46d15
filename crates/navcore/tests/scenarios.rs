// scenarios.rs - end to end build, query and persistence runs

use std::path::PathBuf;

use navcore::areas::{default_filter, flags_for_area, POLYAREA_WATER, POLYFLAGS_SWIM};
use navcore::detour::DT_STRAIGHTPATH_OFFMESH_CONNECTION;
use navcore::mesh_loader::ObjMesh;
use navcore::persist::{load_nav_mesh, save_nav_mesh};
use navcore::steering::{smooth_path, MAX_POLYS, SLOP, STEP_SIZE};
use navcore::test_script::TestScript;
use navcore::tools::tester::POLY_PICK_EXT;
use navcore::tools::{ToolKind, Workspace};
use navcore::{BuildSettings, BuildState, InputGeometry, NavMeshPipeline, PolyRef, Vec3};

fn quad(verts: &mut Vec<f32>, tris: &mut Vec<i32>, x0: f32, z0: f32, x1: f32, z1: f32) {
    let base = (verts.len() / 3) as i32;
    verts.extend_from_slice(&[x0, 0.0, z0, x0, 0.0, z1, x1, 0.0, z1, x1, 0.0, z0]);
    tris.extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
}

fn plane() -> InputGeometry {
    let (mut verts, mut tris) = (Vec::new(), Vec::new());
    quad(&mut verts, &mut tris, -5.0, -5.0, 5.0, 5.0);
    InputGeometry::from_mesh(ObjMesh::from_parts(verts, tris)).unwrap()
}

/// Two 4x4 squares four units apart along x
fn islands() -> InputGeometry {
    let (mut verts, mut tris) = (Vec::new(), Vec::new());
    quad(&mut verts, &mut tris, -6.0, -2.0, -2.0, 2.0);
    quad(&mut verts, &mut tris, 2.0, -2.0, 6.0, 2.0);
    InputGeometry::from_mesh(ObjMesh::from_parts(verts, tris)).unwrap()
}

fn temp_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("navkit-{}-{}", std::process::id(), name))
}

fn nearest(ws: &Workspace, pos: &Vec3) -> PolyRef {
    ws.query().unwrap().find_nearest_poly(pos, &POLY_PICK_EXT, ws.filter()).0
}

#[test]
fn plane_builds_single_polygon_and_straight_path() {
    let settings = BuildSettings { keep_intermediate: true, ..BuildSettings::default() };
    let mut ws = Workspace::new(settings);
    ws.set_geometry(plane());
    assert!(ws.build());
    assert_eq!(ws.pipeline().state(), BuildState::QueryMeshReady);
    assert_eq!(ws.pipeline().compact_heightfield().unwrap().max_regions, 1);
    assert_eq!(ws.pipeline().poly_mesh().unwrap().poly_count(), 1);

    let start = [-5.0, 0.0, -5.0];
    let end = [5.0, 0.0, 5.0];
    let query = ws.query().unwrap();
    let (s, _) = query.find_nearest_poly(&start, &POLY_PICK_EXT, ws.filter());
    let (e, _) = query.find_nearest_poly(&end, &POLY_PICK_EXT, ws.filter());
    assert!(!s.is_null());
    assert_eq!(s, e);
    let path = query.find_path(s, e, &start, &end, ws.filter(), MAX_POLYS);
    assert_eq!(path, vec![s]);
    let straight = query.find_straight_path(&start, &end, &path, 256);
    assert_eq!(straight.len(), 2);
}

#[test]
fn following_steer_targets_reaches_goal() {
    let mut ws = Workspace::new(BuildSettings::default());
    ws.set_geometry(plane());
    assert!(ws.build());

    let start = [-3.0, 0.0, -2.0];
    let end = [3.5, 0.0, 4.0];
    let query = ws.query().unwrap();
    let path = query.find_path(nearest(&ws, &start), nearest(&ws, &end), &start, &end, ws.filter(), MAX_POLYS);
    let smooth = smooth_path(&query, ws.filter(), &start, &end, &path);
    assert!(smooth.len() > 2);
    let last = smooth.last().unwrap();
    assert!((last[0] - end[0]).abs() < SLOP && (last[2] - end[2]).abs() < SLOP);
    // every step stays within the step size
    for w in smooth.windows(2) {
        let d = ((w[1][0] - w[0][0]).powi(2) + (w[1][2] - w[0][2]).powi(2)).sqrt();
        assert!(d <= STEP_SIZE + SLOP + 1e-3);
    }
}

#[test]
fn off_mesh_link_joins_islands() {
    let mut ws = Workspace::new(BuildSettings::default());
    ws.set_geometry(islands());
    assert!(ws.build());

    let start = [-4.0, 0.0, 0.0];
    let end = [4.0, 0.0, 0.0];
    let (s, e) = (nearest(&ws, &start), nearest(&ws, &end));
    assert!(!s.is_null() && !e.is_null());
    assert_ne!(s, e);
    assert!(ws.query().unwrap().find_path(s, e, &start, &end, ws.filter(), MAX_POLYS).is_empty());

    // author the link with the tool, then rebuild
    ws.set_tool(ToolKind::OffMeshLink);
    ws.click(&[-3.0, 0.0, 0.0], false);
    ws.click(&[3.0, 0.0, 0.0], false);
    assert_eq!(ws.geometry().unwrap().off_mesh_connections().len(), 1);
    assert!(ws.build());

    let (s, e) = (nearest(&ws, &start), nearest(&ws, &end));
    let query = ws.query().unwrap();
    let path = query.find_path(s, e, &start, &end, ws.filter(), MAX_POLYS);
    assert_eq!(path.len(), 3);
    assert_eq!(*path.last().unwrap(), e);

    let straight = query.find_straight_path(&start, &end, &path, 256);
    assert!(straight.iter().any(|p| p.flags & DT_STRAIGHTPATH_OFFMESH_CONNECTION != 0));

    let smooth = smooth_path(&query, ws.filter(), &start, &end, &path);
    let last = smooth.last().unwrap();
    assert!((last[0] - end[0]).abs() < 0.01 && (last[2] - end[2]).abs() < 0.01);
    assert!(smooth.iter().any(|p| (p[0] - 3.0).abs() < 0.01 && p[2].abs() < 0.01));
}

#[test]
fn convex_volume_marks_area_on_rebuild() {
    let mut ws = Workspace::new(BuildSettings::default());
    ws.set_geometry(plane());
    let square = [[-2.0, 0.0, -2.0], [-2.0, 0.0, 2.0], [2.0, 0.0, 2.0], [2.0, 0.0, -2.0]];
    assert!(ws.geometry_mut().unwrap().add_convex_volume(&square, -1.0, 5.0, POLYAREA_WATER));
    assert!(ws.build());

    let pmesh = ws.pipeline().poly_mesh().unwrap();
    assert!(pmesh.poly_count() > 1);
    let water: Vec<usize> = (0..pmesh.poly_count()).filter(|&i| pmesh.areas[i] == POLYAREA_WATER).collect();
    assert!(!water.is_empty());
    for i in water {
        assert_eq!(pmesh.flags[i], POLYFLAGS_SWIM);
    }
    assert_eq!(flags_for_area(POLYAREA_WATER), POLYFLAGS_SWIM);

    // swimming is still allowed by the default filter
    let start = [-4.0, 0.0, 0.0];
    let end = [4.0, 0.0, 0.0];
    let path = ws
        .query()
        .unwrap()
        .find_path(nearest(&ws, &start), nearest(&ws, &end), &start, &end, &default_filter(), MAX_POLYS);
    assert!(!path.is_empty());
}

#[test]
fn rebuilding_unchanged_geometry_is_deterministic() {
    let geom = islands();
    let mut a = NavMeshPipeline::new(BuildSettings::default());
    let mut b = NavMeshPipeline::new(BuildSettings::default());
    assert!(a.build(&geom));
    assert!(b.build(&geom));
    let tile_a = a.nav_mesh().unwrap().tiles().next().unwrap().data().to_vec();
    let tile_b = b.nav_mesh().unwrap().tiles().next().unwrap().data().to_vec();
    assert_eq!(tile_a, tile_b);
}

#[test]
fn navmesh_file_round_trip_answers_same_queries() {
    let mut ws = Workspace::new(BuildSettings::default());
    ws.set_geometry(plane());
    assert!(ws.build());

    let path = temp_path("roundtrip.navmesh");
    save_nav_mesh(&path, ws.nav_mesh().unwrap()).unwrap();
    let loaded = load_nav_mesh(&path).unwrap();
    let _ = std::fs::remove_file(&path);

    assert_eq!(loaded.tile_count(), 1);
    let original = ws.nav_mesh().unwrap().tiles().next().unwrap().data().to_vec();
    assert_eq!(loaded.tiles().next().unwrap().data(), original.as_slice());

    ws.pipeline_mut().set_nav_mesh(loaded);
    assert_eq!(ws.pipeline().state(), BuildState::QueryMeshReady);
    assert!(!nearest(&ws, &[1.0, 0.0, 1.0]).is_null());
}

#[test]
fn geometry_set_and_test_script_from_disk() {
    let dir = temp_path("script");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(
        dir.join("plane.obj"),
        "v -5 0 -5\nv -5 0 5\nv 5 0 5\nv 5 0 -5\nf 1 2 3\nf 1 3 4\n",
    )
    .unwrap();
    std::fs::write(
        dir.join("tests.txt"),
        "s Solo Mesh\nf plane.obj\npf -4 0 -4 4 0 4 ffff 0\nrc 0 0 0 20 0 0 ffff 0\n",
    )
    .unwrap();

    let mut script = TestScript::load(&dir.join("tests.txt")).unwrap();
    let mut ws = Workspace::new(BuildSettings::default());
    assert!(script.run(&mut ws, &dir));

    let tests = &script.groups[0].tests;
    let pf = tests[0].result.as_ref().unwrap();
    assert_eq!(pf.polys.len(), 1);
    assert_eq!(pf.straight.len(), 2);
    let rc = tests[1].result.as_ref().unwrap();
    assert!(rc.straight[1][0] < 5.0);
    assert!(script.report().contains("Total: 2 tests"));

    let _ = std::fs::remove_dir_all(&dir);
}

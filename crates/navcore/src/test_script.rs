// test_script.rs - scripted path and raycast queries
//
// Line based script:
//   s <sample name>
//   f <geometry file>
//   pf sx sy sz ex ey ez <include hex> <exclude hex>   path find
//   rc sx sy sz ex ey ez <include hex> <exclude hex>   raycast
// Every `s`/`f` pair starts a new group; unknown lines are ignored.

use std::fmt::Write as _;
use std::fs;
use std::path::Path;
use std::time::{Duration, Instant};

use tracing::{error, info, warn};

use crate::detour::{NavMeshQuery, PolyRef, QueryFilter};
use crate::math::{vlerp, Vec3};
use crate::steering::MAX_POLYS;
use crate::tools::tester::POLY_PICK_EXT;
use crate::tools::Workspace;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TestKind {
    PathFind,
    Raycast,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct TestResult {
    pub start_ref: PolyRef,
    pub end_ref: PolyRef,
    /// Snapped start and end
    pub nearest_start: Vec3,
    pub nearest_end: Vec3,
    pub polys: Vec<PolyRef>,
    pub straight: Vec<Vec3>,
    pub find_nearest_time: Duration,
    pub find_path_time: Duration,
    pub find_straight_time: Duration,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TestCase {
    pub kind: TestKind,
    pub start: Vec3,
    pub end: Vec3,
    pub include_flags: u16,
    pub exclude_flags: u16,
    pub result: Option<TestResult>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct TestGroup {
    pub sample: String,
    pub geom_file: String,
    pub tests: Vec<TestCase>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct TestScript {
    pub groups: Vec<TestGroup>,
}

fn parse_hex(s: &str) -> Option<u16> {
    let s = s.trim_start_matches("0x").trim_start_matches("0X");
    u16::from_str_radix(s, 16).ok()
}

fn parse_test(kind: TestKind, rest: &str) -> Option<TestCase> {
    let fields: Vec<&str> = rest.split_whitespace().collect();
    if fields.len() < 8 {
        return None;
    }
    let mut v = [0.0f32; 6];
    for (i, f) in fields[..6].iter().enumerate() {
        v[i] = f.parse().ok()?;
    }
    Some(TestCase {
        kind,
        start: [v[0], v[1], v[2]],
        end: [v[3], v[4], v[5]],
        include_flags: parse_hex(fields[6])?,
        exclude_flags: parse_hex(fields[7])?,
        result: None,
    })
}

impl TestScript {
    pub fn load(path: &Path) -> Option<Self> {
        match fs::read_to_string(path) {
            Ok(content) => Some(Self::parse(&content)),
            Err(e) => {
                error!("Could not load test script '{}': {}", path.display(), e);
                None
            }
        }
    }

    pub fn parse(content: &str) -> Self {
        let mut script = TestScript::default();
        for line in content.lines() {
            let line = line.trim();
            let (tag, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
            let rest = rest.trim();
            match tag {
                "s" => script.groups.push(TestGroup { sample: rest.to_string(), ..Default::default() }),
                "f" => match script.groups.last_mut() {
                    Some(g) if g.geom_file.is_empty() => g.geom_file = rest.to_string(),
                    _ => script.groups.push(TestGroup { geom_file: rest.to_string(), ..Default::default() }),
                },
                "pf" | "rc" => {
                    let kind = if tag == "pf" { TestKind::PathFind } else { TestKind::Raycast };
                    let Some(test) = parse_test(kind, rest) else {
                        warn!("Malformed test line: {}", line);
                        continue;
                    };
                    if script.groups.is_empty() {
                        script.groups.push(TestGroup::default());
                    }
                    if let Some(g) = script.groups.last_mut() {
                        g.tests.push(test);
                    }
                }
                _ => {}
            }
        }
        script
    }

    pub fn test_count(&self) -> usize {
        self.groups.iter().map(|g| g.tests.len()).sum()
    }

    /// Load and build each group's geometry (relative to `root`) and run its
    /// tests. Returns false if any group could not be built.
    pub fn run(&mut self, ws: &mut Workspace, root: &Path) -> bool {
        let mut ok = true;
        for group in &mut self.groups {
            info!("Running tests for '{}' on '{}'", group.sample, group.geom_file);
            if !ws.load_geometry(&root.join(&group.geom_file)) {
                ok = false;
                continue;
            }
            if !ws.build() {
                error!("Failed to build navmesh for '{}'", group.geom_file);
                ok = false;
                continue;
            }
            group.run(ws);
        }
        ok
    }

    /// One line per test plus a timing total
    pub fn report(&self) -> String {
        let mut out = String::new();
        let mut total = Duration::ZERO;
        let mut n = 0;
        for group in &self.groups {
            let _ = writeln!(out, "Sample '{}', geometry '{}'", group.sample, group.geom_file);
            for test in &group.tests {
                n += 1;
                let kind = match test.kind {
                    TestKind::PathFind => "Path Find",
                    TestKind::Raycast => "Ray Cast",
                };
                match &test.result {
                    None => {
                        let _ = writeln!(out, "  {} {}: not run", kind, n);
                    }
                    Some(r) => {
                        let t = r.find_nearest_time + r.find_path_time + r.find_straight_time;
                        total += t;
                        let _ = writeln!(
                            out,
                            "  {} {}: {} polys, {} points, nearest {:.3}ms path {:.3}ms straight {:.3}ms",
                            kind,
                            n,
                            r.polys.len(),
                            r.straight.len(),
                            r.find_nearest_time.as_secs_f64() * 1000.0,
                            r.find_path_time.as_secs_f64() * 1000.0,
                            r.find_straight_time.as_secs_f64() * 1000.0
                        );
                    }
                }
            }
        }
        let _ = writeln!(out, "Total: {} tests, {:.3}ms", n, total.as_secs_f64() * 1000.0);
        out
    }
}

impl TestGroup {
    /// Run every test against the workspace's current navmesh
    pub fn run(&mut self, ws: &Workspace) {
        let Some(query) = ws.query() else {
            warn!("No navmesh to run tests on");
            return;
        };
        for test in &mut self.tests {
            test.result = Some(run_test(&query, test));
        }
    }
}

fn run_test(query: &NavMeshQuery, test: &TestCase) -> TestResult {
    let mut filter = QueryFilter::default();
    filter.set_include_flags(test.include_flags);
    filter.set_exclude_flags(test.exclude_flags);
    let mut r = TestResult::default();

    let t0 = Instant::now();
    (r.start_ref, r.nearest_start) = query.find_nearest_poly(&test.start, &POLY_PICK_EXT, &filter);
    (r.end_ref, r.nearest_end) = query.find_nearest_poly(&test.end, &POLY_PICK_EXT, &filter);
    r.find_nearest_time = t0.elapsed();

    match test.kind {
        TestKind::PathFind => {
            let t1 = Instant::now();
            r.polys = query.find_path(r.start_ref, r.end_ref, &test.start, &test.end, &filter, MAX_POLYS);
            r.find_path_time = t1.elapsed();

            let t2 = Instant::now();
            r.straight = query
                .find_straight_path(&test.start, &test.end, &r.polys, MAX_POLYS)
                .into_iter()
                .map(|p| p.pos)
                .collect();
            r.find_straight_time = t2.elapsed();
        }
        TestKind::Raycast => {
            let t1 = Instant::now();
            let hit = query.raycast(r.start_ref, &test.start, &test.end, &filter, MAX_POLYS);
            r.find_path_time = t1.elapsed();

            if let Some(hit) = hit {
                let mut hit_pos = if hit.t > 1.0 { test.end } else { vlerp(&test.start, &test.end, hit.t) };
                if let Some(&last) = hit.path.last()
                    && let Some(h) = query.get_poly_height(last, &hit_pos)
                {
                    hit_pos[1] = h;
                }
                r.straight = vec![test.start, hit_pos];
                r.polys = hit.path;
            }
        }
    }
    r
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::tests::plane;
    use crate::settings::BuildSettings;

    const SCRIPT: &str = "\
s Solo Mesh
f plane.obj
pf -3 0 -3 3 0 3 0xffef 0x10
rc 0 0 0 20 0 0 ffff 0
# comment
x ignored line
pf 1 2 3
s Second
f other.obj
rc 1 0 1 2 0 2 1 0
";

    #[test]
    fn test_parse_groups_and_flags() {
        let script = TestScript::parse(SCRIPT);
        assert_eq!(script.groups.len(), 2);
        let g = &script.groups[0];
        assert_eq!(g.sample, "Solo Mesh");
        assert_eq!(g.geom_file, "plane.obj");
        assert_eq!(g.tests.len(), 2);
        assert_eq!(g.tests[0].kind, TestKind::PathFind);
        assert_eq!(g.tests[0].start, [-3.0, 0.0, -3.0]);
        assert_eq!(g.tests[0].include_flags, 0xffef);
        assert_eq!(g.tests[0].exclude_flags, 0x10);
        assert_eq!(g.tests[1].kind, TestKind::Raycast);
        assert_eq!(g.tests[1].include_flags, 0xffff);
        assert_eq!(script.groups[1].geom_file, "other.obj");
        assert_eq!(script.test_count(), 3);
    }

    #[test]
    fn test_run_against_plane() {
        let mut ws = Workspace::new(BuildSettings::default());
        ws.set_geometry(plane(10.0));
        assert!(ws.build());

        let mut script = TestScript::parse(SCRIPT);
        script.groups[0].run(&ws);
        let path = script.groups[0].tests[0].result.as_ref().unwrap();
        assert!(!path.start_ref.is_null());
        assert_eq!(path.polys.len(), 1);
        assert_eq!(path.straight.len(), 2);

        let ray = script.groups[0].tests[1].result.as_ref().unwrap();
        assert_eq!(ray.straight.len(), 2);
        assert!(ray.straight[1][0] < 5.0);

        let report = script.report();
        assert!(report.contains("Path Find 1: 1 polys, 2 points"));
        assert!(report.contains("Ray Cast 3: not run"));
    }

    #[test]
    fn test_run_with_missing_geometry_fails() {
        let mut ws = Workspace::new(BuildSettings::default());
        let mut script = TestScript::parse("s A\nf does_not_exist.obj\npf 0 0 0 1 0 1 ffff 0\n");
        assert!(!script.run(&mut ws, Path::new("/nonexistent")));
        assert!(script.groups[0].tests[0].result.is_none());
    }
}

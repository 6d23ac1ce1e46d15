// batch.rs - offline navmesh builds for a list of geometry files

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::{bail, Context};
use tracing::{error, info, warn};

use navcore::persist::save_nav_mesh;
use navcore::{BuildSettings, InputGeometry, NavMeshPipeline};

/// `<out_dir>/<input stem>.navmesh`
pub fn output_path(input: &Path, out_dir: &Path) -> PathBuf {
    let stem = input.file_stem().map_or_else(|| "navmesh".into(), |s| s.to_string_lossy().into_owned());
    out_dir.join(format!("{}.navmesh", stem))
}

/// Build one geometry file and write its navmesh. A geometry set carrying its
/// own settings overrides `settings`.
pub fn build_one(input: &Path, settings: BuildSettings, out_dir: &Path) -> anyhow::Result<PathBuf> {
    let geom = InputGeometry::load(input).with_context(|| format!("could not load geometry '{}'", input.display()))?;
    let settings = geom.build_settings().copied().unwrap_or(settings);

    let mut pipeline = NavMeshPipeline::new(settings);
    if !pipeline.build(&geom) {
        match pipeline.last_error() {
            Some(e) => bail!("{}: {}", input.display(), e),
            None => bail!("{}: build failed", input.display()),
        }
    }
    let nav = pipeline.nav_mesh().context("build finished without a navmesh")?;
    let out = output_path(input, out_dir);
    save_nav_mesh(&out, nav)?;
    info!(
        "[{}] {} polygons, built in {:.2}ms -> {}",
        input.display(),
        pipeline.poly_mesh().map_or(0, |p| p.poly_count()),
        pipeline.context().total_time().as_secs_f64() * 1000.0,
        out.display()
    );
    Ok(out)
}

fn build_logged(input: &Path, settings: BuildSettings, out_dir: &Path, failed: &AtomicUsize) {
    if let Err(e) = build_one(input, settings, out_dir) {
        error!("{:#}", e);
        failed.fetch_add(1, Ordering::Relaxed);
    }
}

/// Build every input on a pool of `threads` workers. Returns the number of
/// failed builds.
pub fn build_all(inputs: &[PathBuf], settings: BuildSettings, out_dir: &Path, threads: usize) -> usize {
    let failed = AtomicUsize::new(0);
    info!("Building {} navmeshes with {} threads", inputs.len(), threads);

    let pool = rayon::ThreadPoolBuilder::new().num_threads(threads).build();
    match pool {
        Ok(pool) => {
            pool.scope(|s| {
                for input in inputs {
                    let failed = &failed;
                    s.spawn(move |_| build_logged(input, settings, out_dir, failed));
                }
            });
        }
        Err(e) => {
            warn!("Failed to create thread pool: {}, using single-threaded", e);
            for input in inputs {
                build_logged(input, settings, out_dir, &failed);
            }
        }
    }
    failed.into_inner()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_path_uses_stem() {
        let out = output_path(Path::new("levels/dungeon.gset"), Path::new("out"));
        assert_eq!(out, PathBuf::from("out/dungeon.navmesh"));
    }

    #[test]
    fn test_build_all_counts_failures() {
        let dir = std::env::temp_dir().join(format!("navtool-batch-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let obj = dir.join("plane.obj");
        std::fs::write(&obj, "v -5 0 -5\nv -5 0 5\nv 5 0 5\nv 5 0 -5\nf 1 2 3\nf 1 3 4\n").unwrap();
        let inputs = vec![obj, dir.join("missing.obj")];

        let failed = build_all(&inputs, BuildSettings::default(), &dir, 2);
        assert_eq!(failed, 1);
        assert!(dir.join("plane.navmesh").exists());

        let _ = std::fs::remove_dir_all(&dir);
    }
}

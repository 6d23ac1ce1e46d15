// navtool - navmesh build and test harness
//
// Subcommands:
// - build: voxelize geometry files into navmesh files, one per input
// - test:  run a path/raycast test script and print the timing report
// - info:  summarize a navmesh file

mod batch;

use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use tracing::{info, warn};

use navcore::persist::load_nav_mesh;
use navcore::test_script::TestScript;
use navcore::tools::Workspace;
use navcore::BuildSettings;
use navkit_shared::config::get_config;
use navkit_shared::log::{initialize_logging, map_log_level};

/// Default config file name
const DEFAULT_CONFIG: &str = "navtool.conf";

#[derive(Parser, Debug)]
#[command(name = "navtool")]
#[command(about = "Navigation mesh build and test tool")]
#[command(version)]
struct Cli {
    /// Console log level override (0=Minimum, 1=Error, 2=Detail, 3=Full/Debug, 4=Trace)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<i32>,

    /// Configuration file path
    #[arg(short, long, default_value = DEFAULT_CONFIG)]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Build navmeshes from .obj or .gset files
    Build(BuildArgs),
    /// Run a test script
    Test(TestArgs),
    /// Print a navmesh file summary
    Info(InfoArgs),
}

#[derive(Args, Debug)]
struct BuildArgs {
    /// Geometry files
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Output directory
    #[arg(short = 'o', long = "output")]
    output: Option<PathBuf>,

    /// JSON build settings
    #[arg(short = 's', long = "settings")]
    settings: Option<PathBuf>,

    /// Number of threads to use
    #[arg(long = "threads")]
    threads: Option<usize>,

    /// Keep intermediate build artifacts (more memory, more diagnostics)
    #[arg(long = "keep-intermediate")]
    keep_intermediate: bool,
}

#[derive(Args, Debug)]
struct TestArgs {
    /// Test script
    script: PathBuf,

    /// Directory geometry files are resolved against (defaults to the script's)
    #[arg(long = "root")]
    root: Option<PathBuf>,

    /// JSON build settings
    #[arg(short = 's', long = "settings")]
    settings: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct InfoArgs {
    /// Navmesh file
    navmesh: PathBuf,
}

fn init_logging(log_level: Option<i32>) {
    let (log_dir, level) = {
        let config = get_config().lock();
        let dir = config.get_string_default("LogsDir", "");
        let level = log_level.unwrap_or_else(|| config.get_int_default("LogLevel", 2));
        ((!dir.is_empty()).then_some(dir), level)
    };
    initialize_logging(log_dir.as_deref(), "navtool.log", map_log_level(level));
}

fn resolve_threads(threads: Option<usize>) -> usize {
    let configured = get_config().lock().get_int_default("Build.Threads", 0);
    threads
        .or_else(|| usize::try_from(configured).ok().filter(|&n| n > 0))
        .unwrap_or_else(|| std::thread::available_parallelism().map_or(1, |n| n.get()))
}

/// Settings from the command line, then the config file, then defaults
fn resolve_settings(path: Option<&Path>) -> anyhow::Result<BuildSettings> {
    let configured = get_config().lock().get_string("Build.SettingsFile");
    let path = path.map(Path::to_path_buf).or_else(|| (!configured.is_empty()).then(|| PathBuf::from(configured)));
    match path {
        Some(p) => BuildSettings::load(&p),
        None => Ok(BuildSettings::default()),
    }
}

fn run_build(args: BuildArgs) -> anyhow::Result<()> {
    let threads = resolve_threads(args.threads);
    let mut settings = resolve_settings(args.settings.as_deref())?;
    settings.keep_intermediate |= args.keep_intermediate;
    let out_dir = args.output.unwrap_or_else(|| {
        PathBuf::from(get_config().lock().get_string_default("Build.OutputDir", "."))
    });
    std::fs::create_dir_all(&out_dir).with_context(|| format!("could not create '{}'", out_dir.display()))?;

    let failed = batch::build_all(&args.inputs, settings, &out_dir, threads);
    if failed > 0 {
        bail!("{} of {} builds failed", failed, args.inputs.len());
    }
    info!("Built {} navmeshes into '{}'", args.inputs.len(), out_dir.display());
    Ok(())
}

fn run_test(args: TestArgs) -> anyhow::Result<()> {
    let mut script =
        TestScript::load(&args.script).with_context(|| format!("could not load '{}'", args.script.display()))?;
    let root = args
        .root
        .or_else(|| args.script.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("."));
    let mut ws = Workspace::new(resolve_settings(args.settings.as_deref())?);

    info!("Running {} tests from '{}'", script.test_count(), args.script.display());
    let ok = script.run(&mut ws, &root);
    print!("{}", script.report());
    if !ok {
        bail!("some test groups could not be built");
    }
    Ok(())
}

fn run_info(args: InfoArgs) -> anyhow::Result<()> {
    let nav = load_nav_mesh(&args.navmesh).with_context(|| format!("could not load '{}'", args.navmesh.display()))?;
    println!("{}: {} tiles", args.navmesh.display(), nav.tile_count());
    for tile in nav.tiles() {
        let h = &tile.header;
        println!(
            "  tile ({}, {}) layer {}: {} polys, {} verts, {} off-mesh links, {} detail tris, bounds ({:.2}, {:.2}, {:.2})-({:.2}, {:.2}, {:.2})",
            h.x,
            h.y,
            h.layer,
            h.poly_count,
            h.vert_count,
            h.off_mesh_con_count,
            h.detail_tri_count,
            h.bmin[0],
            h.bmin[1],
            h.bmin[2],
            h.bmax[0],
            h.bmax[1],
            h.bmax[2]
        );
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_found = get_config().lock().set_source(&cli.config, "Navtool_");
    init_logging(cli.log_level);
    if !config_found {
        warn!("Could not find configuration file {}, using defaults", cli.config);
    }

    match cli.command {
        Command::Build(args) => run_build(args),
        Command::Test(args) => run_test(args),
        Command::Info(args) => run_info(args),
    }
}

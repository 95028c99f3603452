use anyhow::Context;
use beachscape_assets::{AssetLoader, load_background, load_model, load_texture};
use beachscape_common::Rgb;
use beachscape_render::{
    CaptureSlot, CountingRenderer, DebugTextRenderer, DriverConfig, FrameDriver, ManualScheduler,
    RenderView, SceneRenderer,
};
use beachscape_scene::{
    DioramaConfig, Model, ModelPrimitive, attach_model, build_diorama, geometry,
};
use clap::{Parser, Subcommand};
use glam::Mat4;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "beachscape-cli", about = "CLI tool for the beach diorama")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Diorama config file (JSON); defaults are used when omitted
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print version and crate info
    Info,
    /// Run the frame driver headless and report what it did
    Simulate {
        /// Number of frames to run
        #[arg(short, long, default_value = "100")]
        ticks: u64,
        /// Attach a stand-in model just before this frame
        #[arg(long)]
        attach_model_at: Option<u64>,
        /// Print a text dump of the final frame
        #[arg(long)]
        dump: bool,
    },
    /// Load every asset synchronously and print its size
    Inspect {
        /// Asset directory
        #[arg(long, default_value = "./assets")]
        assets: PathBuf,
    },
    /// Write the default diorama config as JSON
    Config {
        /// Output file
        #[arg(short, long, default_value = "diorama.json")]
        out: PathBuf,
    },
}

/// Outcome of a headless run.
#[derive(Debug)]
struct SimulationReport {
    frames: u64,
    renders: u64,
    captures_a: u64,
    captures_b: u64,
    sequence_head: Vec<CaptureSlot>,
    rotation: [f32; 3],
    nodes: usize,
    model_attached_at: Option<u64>,
    dump: String,
}

fn stand_in_model() -> Model {
    Model {
        name: "stand-in".into(),
        primitives: vec![ModelPrimitive {
            name: "stand_in_dome".into(),
            mesh: geometry::sphere(8.0, 16, 8),
            color: Rgb::from_hex(0xd2b48c),
            base_color: None,
            parent: Mat4::IDENTITY,
        }],
    }
}

fn simulate(
    config: &DioramaConfig,
    ticks: u64,
    attach_model_at: Option<u64>,
) -> anyhow::Result<SimulationReport> {
    let (mut scene, handles) = build_diorama(config).context("failed to build diorama")?;
    let mut driver = FrameDriver::new(DriverConfig::from_diorama(config), handles.torus_knot);
    let mut renderer = CountingRenderer::new();
    let scheduler = ManualScheduler::new();
    let view = RenderView::from_camera(&config.camera, 16.0 / 9.0);
    let mut model_attached_at = None;
    tracing::info!(ticks, ?attach_model_at, "running headless frame simulation");

    // The first frame is started by hand; every frame requests the next.
    let mut pending = true;
    while pending && driver.frame_count() < ticks {
        if attach_model_at == Some(driver.frame_count()) {
            attach_model(&mut scene, stand_in_model(), &config.model)
                .context("failed to attach stand-in model")?;
            model_attached_at = Some(driver.frame_count());
            tracing::debug!(frame = driver.frame_count(), "attached stand-in model");
        }
        driver.tick(&mut scene, &view, &mut renderer, &scheduler);
        pending = scheduler.take_request();
    }

    let rotation = scene
        .get(handles.torus_knot)
        .map(|n| n.transform.rotation.to_array())
        .unwrap_or_default();

    let mut text = DebugTextRenderer::new();
    if let Some(last) = renderer.last_capture() {
        text.refresh_capture(last, &scene);
    }
    text.render(&scene, &view);

    Ok(SimulationReport {
        frames: driver.frame_count(),
        renders: renderer.render_count(),
        captures_a: renderer.capture_count(CaptureSlot::A),
        captures_b: renderer.capture_count(CaptureSlot::B),
        sequence_head: renderer.head().to_vec(),
        rotation,
        nodes: scene.node_count(),
        model_attached_at,
        dump: text.last_output().to_string(),
    })
}

/// Load every configured asset. Returns the number of failures.
fn inspect(assets: &Path, config: &DioramaConfig) -> usize {
    let loader = AssetLoader::new(assets);
    let mut failures = 0;
    let mut report = |name: &str, result: Result<String, beachscape_assets::AssetError>| {
        match result {
            Ok(summary) => println!("{name:<12} {summary}"),
            Err(e) => {
                failures += 1;
                tracing::warn!(asset = name, error = %e, "asset failed to load");
                println!("{name:<12} FAILED: {e}");
            }
        }
    };

    for (name, path) in [
        ("sand", &config.assets.sand),
        ("wall", &config.assets.wall),
        ("metal", &config.assets.metal),
    ] {
        report(
            name,
            load_texture(&loader.resolve(path))
                .map(|t| format!("{}x{} ({} bytes)", t.width, t.height, t.byte_len())),
        );
    }

    report(
        "background",
        load_background(&loader.resolve(&config.assets.background), None)
            .map(|cube| format!("6 faces of {0}x{0}", cube.size)),
    );

    report(
        "model",
        load_model(&loader.resolve(&config.assets.model)).map(|model| {
            format!(
                "{} primitives, {} vertices, {} triangles",
                model.primitives.len(),
                model.vertex_count(),
                model.triangle_count()
            )
        }),
    );

    failures
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    let config = match &cli.config {
        Some(path) => DioramaConfig::from_json_file(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => DioramaConfig::default(),
    };

    match cli.command {
        Commands::Info => {
            println!("beachscape-cli v{}", env!("CARGO_PKG_VERSION"));
            println!("scene: {}", beachscape_scene::crate_info());
            println!("assets: {}", beachscape_assets::crate_info());
            println!("render: {}", beachscape_render::crate_info());
        }
        Commands::Simulate {
            ticks,
            attach_model_at,
            dump,
        } => {
            let report = simulate(&config, ticks, attach_model_at)?;
            println!(
                "Frames: {}  Renders: {}  Nodes: {}",
                report.frames, report.renders, report.nodes
            );
            println!(
                "Captures: A={} B={}  first: {:?}",
                report.captures_a, report.captures_b, report.sequence_head
            );
            println!(
                "Knot rotation: ({:.3}, {:.3}, {:.3})",
                report.rotation[0], report.rotation[1], report.rotation[2]
            );
            if let Some(frame) = report.model_attached_at {
                println!("Model attached before frame {frame}");
            }
            if dump {
                print!("{}", report.dump);
            }
        }
        Commands::Inspect { assets } => {
            let failures = inspect(&assets, &config);
            if failures > 0 {
                anyhow::bail!("{failures} asset(s) failed to load from {}", assets.display());
            }
            println!("All assets loaded");
        }
        Commands::Config { out } => {
            config
                .save_json(&out)
                .with_context(|| format!("failed to write {}", out.display()))?;
            println!("Config written to {}", out.display());
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simulate_reports_alternation() {
        let report = simulate(&DioramaConfig::default(), 10, None).unwrap();
        assert_eq!(report.frames, 10);
        assert_eq!(report.renders, 10);
        assert_eq!(report.captures_a, 5);
        assert_eq!(report.captures_b, 5);
        assert_eq!(
            &report.sequence_head[..4],
            &[CaptureSlot::A, CaptureSlot::B, CaptureSlot::A, CaptureSlot::B]
        );
        assert!((report.rotation[0] - 0.1).abs() < 1e-4);
        assert_eq!(report.nodes, 7);
        assert!(report.dump.contains("torus_knot"));
    }

    #[test]
    fn simulate_attaches_model_mid_run() {
        let report = simulate(&DioramaConfig::default(), 102, Some(100)).unwrap();
        assert_eq!(report.frames, 102);
        assert_eq!(report.model_attached_at, Some(100));
        assert_eq!(report.nodes, 8);
        assert_eq!(report.captures_a, 51);
        assert_eq!(report.captures_b, 51);
    }

    #[test]
    fn long_simulation_keeps_summary_small() {
        let report = simulate(&DioramaConfig::default(), 200_000, None).unwrap();
        assert_eq!(report.frames, 200_000);
        assert_eq!(report.renders, 200_000);
        assert_eq!(report.captures_a, 100_000);
        assert_eq!(report.captures_b, 100_000);
        assert_eq!(report.sequence_head.len(), CountingRenderer::HEAD_LEN);
    }

    #[test]
    fn simulate_zero_ticks_renders_nothing() {
        let report = simulate(&DioramaConfig::default(), 0, None).unwrap();
        assert_eq!(report.frames, 0);
        assert_eq!(report.renders, 0);
        assert!(report.sequence_head.is_empty());
    }

    #[test]
    fn inspect_counts_missing_assets() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(inspect(dir.path(), &DioramaConfig::default()), 5);
    }

    #[test]
    fn exported_config_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("diorama.json");
        DioramaConfig::default().save_json(&path).unwrap();
        let loaded = DioramaConfig::from_json_file(&path).unwrap();
        assert_eq!(loaded.capture_resolution, 256);
    }
}

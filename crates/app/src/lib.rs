use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Parser};
use tracing::info;
use tracing_subscriber::EnvFilter;

use upres_core::config::EngineConfig;
use upres_core::device::{probe_for, Device, FixedMemoryProbe, MemoryProbe};
use upres_core::engine::{EngineOptions, UpscaleEngine};
use upres_core::logging::{compose_log_filter, LogFilterOptions};
use upres_core::network::OrtNetwork;
use upres_core::types::AlphaMode;

#[derive(Parser)]
#[command(name = "upres", about = "Memory-aware tiled image super-resolution")]
struct Cli {
    #[arg(help = "Input image path")]
    input: PathBuf,

    #[arg(help = "Output image path (format from extension)")]
    output: PathBuf,

    #[arg(short, long, help = "Path to the ONNX model")]
    model: Option<PathBuf>,

    #[arg(short, long, help = "The model's integer scale factor")]
    scale: Option<usize>,

    #[arg(
        long,
        help = "Final output scale relative to the input (resampled when it differs from the model's factor)"
    )]
    outscale: Option<f32>,

    #[arg(long, value_name = "MODE", help = "Alpha handling: network or resize")]
    alpha_mode: Option<String>,

    #[arg(
        short,
        long,
        value_name = "DEVICE",
        help = "cpu, cuda, cuda:N or mps (auto-detect when omitted)"
    )]
    device: Option<String>,

    #[arg(long, help = "Context padding around each tile, in input pixels")]
    tile_pad: Option<usize>,

    #[arg(long, help = "Reflection padding around the whole input")]
    pad: Option<usize>,

    #[arg(long, help = "Fixed memory budget in MiB, overriding the device probe")]
    memory_limit_mb: Option<u64>,

    #[arg(long, help = "Always run a single forward pass, skipping the memory estimate")]
    no_tiling: bool,

    #[arg(short, long, value_name = "PATH", help = "TOML configuration file")]
    config: Option<PathBuf>,

    #[arg(
        short = 'v',
        long = "verbose",
        action = ArgAction::Count,
        help = "Increase log verbosity (-v: debug, -vv: trace)"
    )]
    verbose: u8,

    #[arg(
        long = "log-filter",
        value_name = "FILTER",
        help = "Explicit tracing filter (overrides RUST_LOG and -v)"
    )]
    log_filter: Option<String>,
}

pub fn run_from_env() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.log_filter.as_deref());

    let config = match cli.config.as_deref() {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => EngineConfig::default(),
    };

    let Some(model) = cli.model.clone().or_else(|| config.model.clone()) else {
        bail!("no model given: pass --model or set `model` in the configuration file");
    };
    let scale = cli.scale.unwrap_or(config.scale);

    let device = match cli.device.as_deref().or(config.device.as_deref()) {
        Some(selector) => Device::parse(selector)?,
        None => Device::auto(),
    };
    info!(%device, model = %model.display(), scale, "initializing engine");

    let network = OrtNetwork::load(&model, scale, device)
        .with_context(|| format!("loading model {}", model.display()))?;

    let probe: Box<dyn MemoryProbe> = match cli.memory_limit_mb.or(config.memory_limit_mb) {
        Some(mib) => Box::new(FixedMemoryProbe(mib * 1024 * 1024)),
        None => probe_for(device)?,
    };

    let options = EngineOptions {
        tile_pad: cli.tile_pad.unwrap_or(config.tile_pad),
        pad: cli.pad.unwrap_or(config.pad),
        pixel_cost_bytes: config.pixel_cost_bytes(),
        calc_tiles: !cli.no_tiling && config.calc_tiles,
    };
    let engine = UpscaleEngine::new(Arc::new(network), probe, options);

    let alpha_mode = AlphaMode::from_str_lossy(
        cli.alpha_mode.as_deref().unwrap_or(config.alpha_mode.as_str()),
    );
    let format = image::ImageFormat::from_path(&cli.output)
        .with_context(|| format!("unrecognized output format for {}", cli.output.display()))?;

    let bytes = std::fs::read(&cli.input)
        .with_context(|| format!("reading {}", cli.input.display()))?;

    let started = Instant::now();
    let (encoded, mode) = engine.upscale_bytes(&bytes, format, cli.outscale, alpha_mode)?;
    info!(
        mode = %mode,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "upscale finished"
    );

    std::fs::write(&cli.output, encoded)
        .with_context(|| format!("writing {}", cli.output.display()))?;
    info!(output = %cli.output.display(), "wrote result");

    Ok(())
}

fn init_logging(verbose: u8, explicit_filter: Option<&str>) {
    let filter = compose_log_filter(&LogFilterOptions {
        verbose,
        explicit_filter: explicit_filter.map(ToString::to_string),
        rust_log_env: std::env::var("RUST_LOG").ok(),
    });
    let env_filter = EnvFilter::try_new(&filter).unwrap_or_else(|error| {
        eprintln!("Warning: invalid log filter '{filter}' ({error}); falling back to 'info'.");
        EnvFilter::new("info")
    });

    if tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .try_init()
        .is_err()
    {
        eprintln!("Warning: tracing subscriber was already initialized.");
    }
}

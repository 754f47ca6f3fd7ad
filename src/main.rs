use std::env;
use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use crossbeam_channel::RecvTimeoutError;
use log::info;
use presence::{
    config, DeviceCamera, FaceDetector, FrameSource, ModelLoader, OverlayRenderer,
    PresenceDetector, PresenceObserver, StreamSource, YuNetLoader,
};
use serde::Serialize;

#[derive(Parser)]
#[command(name = "presence")]
#[command(version, about = "Detect whether a user is in front of the webcam")]
struct Cli {
    /// Config file to use instead of the installed one
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch the camera and report when the user comes and goes
    Watch {
        /// Print each presence event as a JSON line on stdout
        #[arg(long)]
        json: bool,
        /// Write an annotated frame to the overlay path on every tick
        #[arg(long)]
        overlay: bool,
    },
    /// Capture one frame and count the faces in it
    Detect,
    /// Resolve the model files, downloading them if the model path is a URL
    Models,
    /// Open config file in editor
    Config,
}

fn main() -> Result<()> {
    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .format_target(false)
        .format_timestamp(None)
        .parse_default_env()
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Watch { json, overlay } => watch(&cfg, json, overlay),
        Commands::Detect => detect(&cfg),
        Commands::Models => models(&cfg),
        Commands::Config => open_config(cli.config),
    }
}

fn loader(cfg: &config::Config) -> YuNetLoader {
    YuNetLoader::new(cfg.model_source()).with_thresholds(cfg.score_threshold, cfg.nms_threshold)
}

fn camera(cfg: &config::Config) -> DeviceCamera {
    DeviceCamera::new(&cfg.camera, cfg.width, cfg.height)
}

#[derive(Serialize)]
struct PresenceEvent {
    present: bool,
    timestamp_ms: u128,
}

struct CliObserver {
    json: bool,
}

impl PresenceObserver for CliObserver {
    fn on_presence_change(&mut self, present: bool) {
        if !self.json {
            info!("{}", if present { "user present" } else { "user not present" });
            return;
        }
        let event = PresenceEvent {
            present,
            timestamp_ms: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_millis())
                .unwrap_or_default(),
        };
        match serde_json::to_string(&event) {
            Ok(line) => println!("{}", line),
            Err(e) => log::warn!("serializing event: {}", e),
        }
    }
}

fn watch(cfg: &config::Config, json: bool, overlay: bool) -> Result<()> {
    let mut options = cfg.start_options();
    options.use_canvas |= overlay;

    let mut detector = PresenceDetector::new(camera(cfg));
    if options.use_canvas {
        info!("Writing overlay to {}", cfg.overlay_path.display());
        detector = detector.with_renderer(OverlayRenderer::new(&cfg.overlay_path));
    }

    info!("Loading models from {}", cfg.model_path);
    detector.load_models(&loader(cfg))?;

    let (ctrl_tx, ctrl_rx) = crossbeam_channel::bounded(1);
    ctrlc::set_handler(move || {
        let _ = ctrl_tx.try_send(());
    })
    .context("installing Ctrl+C handler")?;

    info!("Opening camera: {}", cfg.camera);
    let session = detector.start(options, CliObserver { json })?;
    info!("Press Ctrl+C to stop.");

    loop {
        match ctrl_rx.recv_timeout(Duration::from_millis(250)) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) if !session.is_active() => break,
            Err(RecvTimeoutError::Timeout) => {}
        }
    }

    session.finish()?;
    Ok(())
}

fn detect(cfg: &config::Config) -> Result<()> {
    let mut detector = loader(cfg)
        .load()
        .context("Failed to initialize face detector")?;

    info!("Opening camera: {}", cfg.camera);
    let mut stream = camera(cfg)
        .acquire_stream()
        .context("Failed to open camera")?;
    let frame = stream.frame().context("Failed to capture frame")?;

    let detections = detector.detect(&frame)?;
    info!("{} face(s) detected", detections.len());
    for (i, det) in detections.iter().enumerate() {
        let [x, y, w, h] = det.bbox;
        info!(
            "  #{} score {:.3} at ({:.0}, {:.0}) size {:.0}x{:.0}",
            i + 1,
            det.score,
            x,
            y,
            w,
            h
        );
    }
    Ok(())
}

fn models(cfg: &config::Config) -> Result<()> {
    let loader = loader(cfg);
    let source = cfg.model_source();
    let paths = source
        .resolve_all(loader.required_models())
        .with_context(|| format!("resolving models from {}", source))?;
    for path in paths {
        println!("{}", path.display());
    }
    Ok(())
}

fn open_config(path: Option<PathBuf>) -> Result<()> {
    let config_path = path.unwrap_or_else(|| config::CONFIG_PATH.to_path_buf());
    let editor = env::var("EDITOR").unwrap_or_else(|_| "vi".to_string());

    info!("Opening config file: {:?}", config_path);

    let status = std::process::Command::new(editor)
        .arg(&config_path)
        .status()
        .context("Failed to open editor")?;

    if !status.success() {
        anyhow::bail!("Editor exited with non-zero status");
    }

    Ok(())
}

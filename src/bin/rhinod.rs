//! rhinod - crash watch daemon
//!
//! 1. Loads configuration (`RHINO_CONFIG` JSON + environment overrides)
//! 2. Loads the detection model and label map
//! 3. Starts the detection loop on the selected source
//! 4. Delivers alerts through the bounded alert pool until the source ends or Ctrl-C

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::io::IsTerminal;
use std::sync::{mpsc, Arc};
use std::time::Duration;

use rhino_watch::config::RhinoConfig;
use rhino_watch::present::{STATUS_LOADING_MODEL, STATUS_MODEL_LOADED};
use rhino_watch::{
    AlertPool, DetectionSession, Detector, LoopExit, Presenter, ScriptedDetector, SourceId,
};

#[path = "../ui.rs"]
mod ui;

#[derive(Parser, Debug)]
#[command(name = "rhinod", version, about = "Watch a video source for vehicle crashes")]
struct Args {
    /// Video file, stub:// URL, or camera:N. Overrides the config file.
    #[arg(long, env = "RHINO_SOURCE")]
    source: Option<String>,

    /// JSON configuration file.
    #[arg(long, env = "RHINO_CONFIG", value_name = "PATH")]
    config: Option<String>,

    /// Skip the model and report this confidence on every frame (smoke tests).
    #[arg(long, value_name = "CONFIDENCE")]
    scripted: Option<f32>,

    /// Seconds to wait for in-flight alerts on shutdown.
    #[arg(long, default_value_t = 30)]
    drain_secs: u64,

    /// UI mode for stderr progress
    #[arg(long, value_enum, default_value = "auto")]
    ui: ui::UiMode,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    if let Some(path) = &args.config {
        // Flag and env var name the same file; the loader reads the env var.
        std::env::set_var("RHINO_CONFIG", path);
    }
    let cfg = RhinoConfig::load()?;
    let source = match args.source.as_deref() {
        Some(raw) => Some(SourceId::parse(raw)?),
        None => cfg.source.clone(),
    };

    let ui = ui::Ui::new(args.ui, std::io::stderr().is_terminal());
    let status = Arc::new(ui.status_line());
    let presenter: Arc<dyn Presenter> = status.clone();

    let detector = {
        presenter.on_status(STATUS_LOADING_MODEL);
        let stage = ui.stage(STATUS_LOADING_MODEL);
        let mut detector = load_detector(&cfg, args.scripted)?;
        detector.warm_up().context("model warm-up")?;
        stage.finish_as(STATUS_MODEL_LOADED);
        presenter.on_status(STATUS_MODEL_LOADED);
        detector
    };

    let pool = Arc::new(AlertPool::new(
        cfg.pool_config(),
        cfg.build_dispatcher()?,
        presenter.clone(),
    )?);
    let mut session = DetectionSession::new(
        detector,
        cfg.detection.policy,
        cfg.ingest.clone(),
        pool.clone(),
        presenter.clone(),
    );

    let Some(source) = source else {
        return Err(anyhow!(
            "no video source: pass --source, set RHINO_SOURCE, or set \"source\" in the config"
        ));
    };
    session.set_source(source);

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .expect("error setting Ctrl-C handler");

    if !session.start() {
        return Err(anyhow!("detection loop did not start"));
    }
    log::info!(
        "rhinod running: threshold={} streak={} top_k={}",
        cfg.detection.policy.confidence_threshold,
        cfg.detection.policy.streak_threshold,
        cfg.detection.policy.top_k
    );

    // Wake up either on Ctrl-C or when the loop ends by itself.
    loop {
        match rx.recv_timeout(Duration::from_millis(200)) {
            Ok(_) => {
                log::info!("shutdown signal received, stopping detection...");
                session.stop();
                break;
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {
                if session.state() == rhino_watch::SessionState::Stopped {
                    break;
                }
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }

    let summary = session.wait();
    if !pool.wait_idle(Duration::from_secs(args.drain_secs)) {
        log::warn!("alerts still in flight after {}s", args.drain_secs);
    }
    let stats = pool.stats();
    status.finish();

    match &summary {
        Some(summary) => {
            log::info!(
                "processed {} frames ({} skipped), {} triggers, {} alerts sent, {} failed, {} dropped",
                summary.frames,
                summary.skipped_frames,
                summary.triggers,
                stats.completed - stats.failed,
                stats.failed,
                stats.dropped
            );
            match &summary.exit {
                LoopExit::SourceUnavailable(reason) => return Err(anyhow!("{}", reason)),
                LoopExit::Panicked(reason) => {
                    return Err(anyhow!("detection loop panicked: {}", reason))
                }
                LoopExit::Exhausted | LoopExit::Stopped => {}
            }
        }
        None => log::warn!("detection loop ended abnormally"),
    }
    Ok(())
}

fn load_detector(cfg: &RhinoConfig, scripted: Option<f32>) -> Result<Box<dyn Detector>> {
    if let Some(confidence) = scripted {
        log::warn!("using scripted detector (confidence {}) instead of a model", confidence);
        return Ok(Box::new(ScriptedDetector::constant("crash", confidence)));
    }
    let model_path = cfg
        .detection
        .model_path
        .as_ref()
        .ok_or_else(|| anyhow!("detection.model_path (or RHINO_MODEL_PATH) must be set"))?;
    load_model(cfg, model_path)
}

#[cfg(feature = "backend-tract")]
fn load_model(cfg: &RhinoConfig, model_path: &std::path::Path) -> Result<Box<dyn Detector>> {
    use rhino_watch::detect::TractDetector;
    use rhino_watch::LabelMap;

    let labels = match &cfg.detection.label_map_path {
        Some(path) => LabelMap::load(path)?,
        None => {
            log::warn!("no label map configured; every class reads as Unknown");
            LabelMap::new()
        }
    };
    log::info!(
        "loading model {} ({} labels)",
        model_path.display(),
        labels.len()
    );
    let detector = TractDetector::new(model_path, labels, cfg.ingest.width, cfg.ingest.height)?;
    Ok(Box::new(detector))
}

#[cfg(not(feature = "backend-tract"))]
fn load_model(_cfg: &RhinoConfig, model_path: &std::path::Path) -> Result<Box<dyn Detector>> {
    Err(anyhow!(
        "cannot load {}: rhinod was built without the backend-tract feature",
        model_path.display()
    ))
}

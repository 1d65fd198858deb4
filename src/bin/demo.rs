//! demo - end-to-end synthetic run for the crash watch
//!
//! Runs a scripted detector over a `stub://` source, with both alert channels
//! writing to the log, and prints what the trigger and the alert pool did.

use anyhow::{anyhow, Result};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;

use rhino_watch::alert::ChannelKind;
use rhino_watch::{
    AlertDispatcher, AlertPool, AlertPoolConfig, DetectionSession, IngestSettings, LogChannel,
    LogPresenter, ScriptedDetector, SourceId, TriggerPolicy, DEFAULT_CONFIDENCE_THRESHOLD,
    DEFAULT_STREAK_THRESHOLD,
};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Frames to generate.
    #[arg(long, default_value_t = 45)]
    frames: u64,
    /// Frames per second for the synthetic source (0 = as fast as possible).
    #[arg(long, default_value_t = 0)]
    fps: u32,
    /// Confidence the scripted detector reports for every frame.
    #[arg(long, default_value_t = 0.97)]
    confidence: f32,
    /// Qualifying detections needed per alert.
    #[arg(long, default_value_t = DEFAULT_STREAK_THRESHOLD)]
    streak: u32,
    /// Confidence that must be exceeded.
    #[arg(long, default_value_t = DEFAULT_CONFIDENCE_THRESHOLD)]
    threshold: f32,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut url = format!("stub://demo?frames={}&width=160&height=120", args.frames);
    if args.fps > 0 {
        url.push_str(&format!("&fps={}", args.fps));
    }
    let source = SourceId::parse(&url)?;

    let presenter = Arc::new(LogPresenter::new(10));
    let dispatcher = AlertDispatcher::new(
        Box::new(LogChannel::new(ChannelKind::Email)),
        Box::new(LogChannel::new(ChannelKind::Sms)),
    );
    let pool_config = AlertPoolConfig {
        status_clear_delay: Duration::from_millis(50),
        ..AlertPoolConfig::default()
    };
    let pool = Arc::new(AlertPool::new(pool_config, dispatcher, presenter.clone())?);

    let policy = TriggerPolicy {
        confidence_threshold: args.threshold,
        streak_threshold: args.streak,
        ..TriggerPolicy::default()
    };
    let mut session = DetectionSession::new(
        Box::new(ScriptedDetector::constant("crash", args.confidence)),
        policy,
        IngestSettings::default(),
        pool.clone(),
        presenter.clone(),
    );
    session.set_source(source.clone());
    if !session.start() {
        return Err(anyhow!("demo session did not start"));
    }
    let summary = session
        .wait()
        .ok_or_else(|| anyhow!("detection loop ended abnormally"))?;
    pool.wait_idle(Duration::from_secs(10));
    let stats = pool.stats();

    println!("demo: {}", source);
    println!("  frames processed : {}", summary.frames);
    println!("  triggers fired   : {}", summary.triggers);
    println!("  hits carried over: {}", summary.final_hits);
    println!(
        "  alerts           : {} submitted, {} completed, {} failed, {} dropped",
        stats.submitted, stats.completed, stats.failed, stats.dropped
    );
    println!("  loop exit        : {:?}", summary.exit);
    Ok(())
}

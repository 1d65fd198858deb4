//! Detection loop and its control surface.
//!
//! `DetectionSession` owns the detector and the streak counter. `start()`
//! spawns one loop thread that opens the configured source, runs every frame
//! through the detector and the trigger policy, and hands completed streaks to
//! the alert pool. `stop()` clears the running flag; the loop notices at the
//! next frame boundary. Alerts already handed to the pool are not cancelled.

use anyhow::anyhow;
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crate::alert::{AlertEvent, AlertPool};
use crate::detect::{Detection, Detector};
use crate::error::RhinoError;
use crate::frame::Frame;
use crate::ingest::{open_source, FrameSource, IngestSettings};
use crate::present::{Presenter, STATUS_NO_DETECTIONS, STATUS_NO_SOURCE};
use crate::trigger::{StreakCounter, TriggerPolicy};
use crate::SourceId;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Stopped,
    Running,
}

/// Why a loop run ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LoopExit {
    /// The source reached end-of-stream.
    Exhausted,
    /// `stop()` was called.
    Stopped,
    /// The source could not be opened or a read failed.
    SourceUnavailable(String),
    /// Something on the loop thread other than the detector panicked.
    Panicked(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoopSummary {
    /// Frames read from the source.
    pub frames: u64,
    /// Frames whose inference failed, panicked, or returned malformed output.
    pub skipped_frames: u64,
    /// Streaks completed during this run.
    pub triggers: u64,
    /// Alerts the pool refused because its queue was full.
    pub alerts_dropped: u64,
    /// Hits left on the counter when the loop ended.
    pub final_hits: u32,
    pub exit: LoopExit,
}

/// Shared handles the loop needs besides the source and detector.
pub struct LoopContext<'a> {
    pub source_id: &'a SourceId,
    pub policy: &'a TriggerPolicy,
    pub running: &'a AtomicBool,
    pub alerts: &'a AlertPool,
    pub presenter: &'a dyn Presenter,
    /// Mirror of the counter for observers on other threads.
    pub hits: &'a AtomicU32,
}

/// Run frames from an opened source until it ends or `running` is cleared.
///
/// The counter is left as the loop found it at exit; resetting on stop is the
/// caller's decision. A panicking detector costs one frame; a panic anywhere
/// else on the loop ends the run with `LoopExit::Panicked`.
pub fn run_detection_loop(
    source: &mut dyn FrameSource,
    detector: &mut dyn Detector,
    counter: &mut StreakCounter,
    ctx: &LoopContext<'_>,
) -> LoopSummary {
    let mut summary = LoopSummary {
        frames: 0,
        skipped_frames: 0,
        triggers: 0,
        alerts_dropped: 0,
        final_hits: counter.hits(),
        exit: LoopExit::Exhausted,
    };

    let outcome = catch_unwind(AssertUnwindSafe(|| {
        drive(source, detector, counter, ctx, &mut summary)
    }));
    if let Err(payload) = outcome {
        let reason = panic_message(payload.as_ref());
        log::error!("detection loop on {} panicked: {}", ctx.source_id, reason);
        summary.exit = LoopExit::Panicked(reason);
    }

    summary.final_hits = counter.hits();
    summary
}

fn drive(
    source: &mut dyn FrameSource,
    detector: &mut dyn Detector,
    counter: &mut StreakCounter,
    ctx: &LoopContext<'_>,
    summary: &mut LoopSummary,
) {
    loop {
        if !ctx.running.load(Ordering::SeqCst) {
            summary.exit = LoopExit::Stopped;
            return;
        }

        let frame = match source.next_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => return,
            Err(e) => {
                let err = RhinoError::source_unavailable(ctx.source_id, format!("{:#}", e));
                log::error!("{}", err);
                ctx.presenter.on_status(STATUS_NO_SOURCE);
                summary.exit = LoopExit::SourceUnavailable(err.to_string());
                return;
            }
        };
        summary.frames += 1;

        let ranked = match infer_ranked(detector, &frame, ctx.policy) {
            Ok(ranked) => ranked,
            Err(e) => {
                let err = RhinoError::inference(frame.index, format!("{:#}", e));
                log::warn!("skipping frame: {}", err);
                summary.skipped_frames += 1;
                ctx.presenter.on_frame(&frame, &[]);
                continue;
            }
        };

        let scan = ctx.policy.scan(counter, &ranked);
        ctx.hits.store(counter.hits(), Ordering::SeqCst);

        if let Some(hit) = scan.triggered_by.as_ref() {
            summary.triggers += 1;
            let sequence = counter.triggers_fired();
            log::warn!(
                "crash streak complete on {} at frame {}: {} ({:.2}), alert #{}",
                ctx.source_id,
                frame.index,
                hit.label,
                hit.confidence,
                sequence
            );
            let event = AlertEvent::new(ctx.source_id.clone(), sequence, &hit.label, hit.confidence);
            if !ctx.alerts.submit(event) {
                summary.alerts_dropped += 1;
            }
        }

        ctx.presenter.on_frame(&frame, &scan.qualifying);
    }
}

/// Run the detector and keep the top candidates. Only candidates that survive
/// ranking are checked, so malformed low-score padding does not cost the frame.
fn infer_ranked(
    detector: &mut dyn Detector,
    frame: &Frame,
    policy: &TriggerPolicy,
) -> anyhow::Result<Vec<Detection>> {
    let candidates = catch_unwind(AssertUnwindSafe(|| detector.infer(frame)))
        .map_err(|payload| anyhow!("detector panicked: {}", panic_message(payload.as_ref())))??;
    let ranked = policy.rank(candidates);
    for detection in &ranked {
        detection.validate()?;
    }
    Ok(ranked)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Clears the running flag when the loop thread exits, unwinding included.
struct RunningGuard(Arc<AtomicBool>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Result of one loop thread: the detector comes back so the session can restart.
type LoopOutcome = (Box<dyn Detector>, StreakCounter, LoopSummary);

/// Owns the detector, the streak counter, and the loop thread.
pub struct DetectionSession {
    detector: Option<Box<dyn Detector>>,
    counter: Option<StreakCounter>,
    policy: TriggerPolicy,
    ingest: IngestSettings,
    source: Option<SourceId>,
    alerts: Arc<AlertPool>,
    presenter: Arc<dyn Presenter>,
    running: Arc<AtomicBool>,
    hits: Arc<AtomicU32>,
    worker: Option<JoinHandle<LoopOutcome>>,
}

impl DetectionSession {
    pub fn new(
        detector: Box<dyn Detector>,
        policy: TriggerPolicy,
        ingest: IngestSettings,
        alerts: Arc<AlertPool>,
        presenter: Arc<dyn Presenter>,
    ) -> Self {
        Self {
            detector: Some(detector),
            counter: Some(StreakCounter::new(policy.streak_threshold)),
            policy,
            ingest,
            source: None,
            alerts,
            presenter,
            running: Arc::new(AtomicBool::new(false)),
            hits: Arc::new(AtomicU32::new(0)),
            worker: None,
        }
    }

    /// Choose the source for the next `start()`. A running loop keeps its source.
    pub fn set_source(&mut self, source: SourceId) {
        log::info!("source set to {}", source);
        self.source = Some(source);
    }

    pub fn source(&self) -> Option<&SourceId> {
        self.source.as_ref()
    }

    /// Spawn the loop thread. Returns false (and does nothing) when no source
    /// is set or a loop is already running.
    pub fn start(&mut self) -> bool {
        if self.worker.as_ref().is_some_and(|w| !w.is_finished()) {
            log::debug!("start ignored: detection already running");
            return false;
        }
        // Reclaim the detector from a loop that ended on its own.
        self.wait();

        let Some(source_id) = self.source.clone() else {
            log::warn!("start ignored: no video source selected");
            return false;
        };
        let (Some(mut detector), Some(mut counter)) = (self.detector.take(), self.counter.take())
        else {
            log::error!("start ignored: detector unavailable");
            return false;
        };

        self.running.store(true, Ordering::SeqCst);
        let running = self.running.clone();
        let hits = self.hits.clone();
        let alerts = self.alerts.clone();
        let presenter = self.presenter.clone();
        let policy = self.policy;
        let ingest = self.ingest.clone();

        let spawned = std::thread::Builder::new()
            .name("detection-loop".to_string())
            .spawn(move || {
                let _running = RunningGuard(running.clone());
                log::info!("detection started on {} ({})", source_id, detector.name());
                let summary = match open_source(&source_id, &ingest) {
                    Ok(mut source) => {
                        let ctx = LoopContext {
                            source_id: &source_id,
                            policy: &policy,
                            running: &running,
                            alerts: &alerts,
                            presenter: presenter.as_ref(),
                            hits: &hits,
                        };
                        let summary =
                            run_detection_loop(source.as_mut(), detector.as_mut(), &mut counter, &ctx);
                        let stats = source.stats();
                        log::info!(
                            "source {} read {} frames (healthy={})",
                            stats.source,
                            stats.frames_captured,
                            source.is_healthy()
                        );
                        source.close();
                        summary
                    }
                    Err(e) => {
                        let err = RhinoError::source_unavailable(&source_id, format!("{:#}", e));
                        log::error!("{}", err);
                        presenter.on_status(STATUS_NO_SOURCE);
                        LoopSummary {
                            frames: 0,
                            skipped_frames: 0,
                            triggers: 0,
                            alerts_dropped: 0,
                            final_hits: counter.hits(),
                            exit: LoopExit::SourceUnavailable(err.to_string()),
                        }
                    }
                };

                if summary.exit == LoopExit::Stopped {
                    counter.reset();
                    hits.store(0, Ordering::SeqCst);
                    presenter.on_status(STATUS_NO_DETECTIONS);
                }
                log::info!(
                    "detection ended on {}: {:?} after {} frames ({} skipped), {} triggers",
                    source_id,
                    summary.exit,
                    summary.frames,
                    summary.skipped_frames,
                    summary.triggers
                );
                (detector, counter, summary)
            });

        match spawned {
            Ok(handle) => {
                self.worker = Some(handle);
                true
            }
            Err(e) => {
                // The closure (and the detector in it) is gone with the failed spawn.
                log::error!("failed to spawn detection loop: {}", e);
                false
            }
        }
    }

    /// Ask the loop to end at the next frame boundary. Does not wait.
    pub fn stop(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            log::info!("stop requested");
        }
    }

    /// Join the loop thread. Returns `None` when no loop was started since the
    /// last `wait`.
    pub fn wait(&mut self) -> Option<LoopSummary> {
        let handle = self.worker.take()?;
        match handle.join() {
            Ok((detector, counter, summary)) => {
                self.detector = Some(detector);
                self.counter = Some(counter);
                Some(summary)
            }
            Err(_) => {
                log::error!("detection loop panicked; detector lost");
                self.running.store(false, Ordering::SeqCst);
                None
            }
        }
    }

    pub fn state(&self) -> SessionState {
        if self.running.load(Ordering::SeqCst) {
            SessionState::Running
        } else {
            SessionState::Stopped
        }
    }

    /// Current hit count toward the next trigger.
    pub fn hits(&self) -> u32 {
        self.hits.load(Ordering::SeqCst)
    }
}

impl Drop for DetectionSession {
    fn drop(&mut self) {
        self.stop();
        self.wait();
    }
}

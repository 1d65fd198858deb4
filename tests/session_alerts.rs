use anyhow::{anyhow, Result};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use rhino_watch::alert::{ChannelKind, STATUS_SENDING, STATUS_SENT};
use rhino_watch::present::STATUS_NO_DETECTIONS;
use rhino_watch::{
    AlertChannel, AlertDispatcher, AlertEvent, AlertPool, AlertPoolConfig, BoundingBox,
    DetectionSession, Detection, Frame, IngestSettings, LoopExit, Presenter, ScriptedDetector, SessionState,
    SourceId, TriggerPolicy,
};

#[derive(Default)]
struct RecordingPresenter {
    statuses: Mutex<Vec<String>>,
    frames: AtomicU64,
    qualifying: AtomicU64,
}

impl RecordingPresenter {
    fn statuses(&self) -> Vec<String> {
        self.statuses.lock().unwrap().clone()
    }
}

impl Presenter for RecordingPresenter {
    fn on_frame(&self, _frame: &Frame, detections: &[Detection]) {
        self.frames.fetch_add(1, Ordering::SeqCst);
        self.qualifying
            .fetch_add(detections.len() as u64, Ordering::SeqCst);
    }

    fn on_status(&self, text: &str) {
        self.statuses.lock().unwrap().push(text.to_string());
    }
}

/// Latch shared between a test and a blocking channel.
#[derive(Default)]
struct Gate {
    state: Mutex<(bool, bool)>,
    cv: Condvar,
}

impl Gate {
    fn wait_entered(&self, timeout: Duration) -> bool {
        let guard = self.state.lock().unwrap();
        let (guard, _) = self
            .cv
            .wait_timeout_while(guard, timeout, |(entered, _)| !*entered)
            .unwrap();
        guard.0
    }

    fn open(&self) {
        self.state.lock().unwrap().1 = true;
        self.cv.notify_all();
    }

    fn enter_and_wait(&self) {
        let mut guard = self.state.lock().unwrap();
        guard.0 = true;
        self.cv.notify_all();
        while !guard.1 {
            guard = self.cv.wait(guard).unwrap();
        }
    }
}

struct FakeChannel {
    kind: ChannelKind,
    fail: bool,
    gate: Option<Arc<Gate>>,
    sent: Arc<Mutex<Vec<AlertEvent>>>,
}

impl FakeChannel {
    fn new(kind: ChannelKind) -> Self {
        Self {
            kind,
            fail: false,
            gate: None,
            sent: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    fn gated(mut self, gate: Arc<Gate>) -> Self {
        self.gate = Some(gate);
        self
    }
}

impl AlertChannel for FakeChannel {
    fn kind(&self) -> ChannelKind {
        self.kind
    }

    fn describe(&self) -> String {
        format!("fake-{}", self.kind)
    }

    fn send(&self, event: &AlertEvent) -> Result<()> {
        if let Some(gate) = &self.gate {
            gate.enter_and_wait();
        }
        if self.fail {
            return Err(anyhow!("relay refused connection"));
        }
        self.sent.lock().unwrap().push(event.clone());
        Ok(())
    }
}

struct Harness {
    session: DetectionSession,
    pool: Arc<AlertPool>,
    presenter: Arc<RecordingPresenter>,
}

fn harness(detector: ScriptedDetector, email: FakeChannel, sms: FakeChannel) -> Harness {
    let presenter = Arc::new(RecordingPresenter::default());
    let config = AlertPoolConfig {
        status_clear_delay: Duration::from_millis(5),
        ..AlertPoolConfig::default()
    };
    let pool = Arc::new(
        AlertPool::new(
            config,
            AlertDispatcher::new(Box::new(email), Box::new(sms)),
            presenter.clone(),
        )
        .expect("alert pool"),
    );
    let ingest = IngestSettings {
        width: 32,
        height: 24,
        ..IngestSettings::default()
    };
    let session = DetectionSession::new(
        Box::new(detector),
        TriggerPolicy::default(),
        ingest,
        pool.clone(),
        presenter.clone(),
    );
    Harness {
        session,
        pool,
        presenter,
    }
}

fn crash(confidence: f32) -> Detection {
    Detection::new(BoundingBox::full(), "crash", confidence)
}

fn stub(frames: u64) -> SourceId {
    SourceId::File(format!("stub://highway?frames={}", frames))
}

#[test]
fn forty_five_qualifying_frames_fire_two_alerts() {
    let email = FakeChannel::new(ChannelKind::Email);
    let sms = FakeChannel::new(ChannelKind::Sms);
    let emails = email.sent.clone();
    let texts = sms.sent.clone();
    let mut h = harness(ScriptedDetector::constant("crash", 0.97), email, sms);

    h.session.set_source(stub(45));
    assert!(h.session.start());
    let summary = h.session.wait().expect("loop summary");

    assert_eq!(summary.exit, LoopExit::Exhausted);
    assert_eq!(summary.frames, 45);
    assert_eq!(summary.triggers, 2);
    assert_eq!(summary.final_hits, 5);
    assert_eq!(h.session.hits(), 5);
    assert_eq!(h.presenter.frames.load(Ordering::SeqCst), 45);
    assert_eq!(h.presenter.qualifying.load(Ordering::SeqCst), 45);

    assert!(h.pool.wait_idle(Duration::from_secs(5)));
    let emails = emails.lock().unwrap();
    assert_eq!(emails.len(), 2);
    assert_eq!(texts.lock().unwrap().len(), 2);
    let mut sequences: Vec<u64> = emails.iter().map(|event| event.sequence).collect();
    sequences.sort();
    assert_eq!(sequences, vec![1, 2]);
    assert_eq!(emails[0].source, stub(45));

    let statuses = h.presenter.statuses();
    assert_eq!(
        statuses.iter().filter(|s| s.as_str() == STATUS_SENDING).count(),
        2
    );
    assert_eq!(statuses.iter().filter(|s| s.as_str() == STATUS_SENT).count(), 2);
}

#[test]
fn mixed_frames_carry_hits_modulo_streak() {
    // Per five frames: two above 0.92, one at it, one below, one empty.
    let frames = 90u64;
    let mut detector = ScriptedDetector::new();
    let mut hits = 0u64;
    for i in 0..frames {
        let confidence = match i % 5 {
            0 => Some(0.99),
            1 => Some(0.5),
            2 => None,
            3 => Some(0.95),
            _ => Some(0.92),
        };
        detector = match confidence {
            Some(c) => {
                if c > 0.92 {
                    hits += 1;
                }
                detector.then(vec![crash(c)])
            }
            None => detector.then(vec![]),
        };
    }
    let email = FakeChannel::new(ChannelKind::Email);
    let emails = email.sent.clone();
    let mut h = harness(detector, email, FakeChannel::new(ChannelKind::Sms));

    h.session.set_source(stub(frames));
    assert!(h.session.start());
    let summary = h.session.wait().expect("loop summary");

    let streak = TriggerPolicy::default().streak_threshold as u64;
    assert_eq!(hits, 36);
    assert_eq!(summary.frames, frames);
    assert_eq!(summary.skipped_frames, 0);
    assert_eq!(summary.triggers, hits / streak);
    assert_eq!(summary.final_hits as u64, hits % streak);
    assert_eq!(h.session.hits() as u64, hits % streak);
    assert_eq!(h.presenter.frames.load(Ordering::SeqCst), frames);
    assert_eq!(h.presenter.qualifying.load(Ordering::SeqCst), hits);

    assert!(h.pool.wait_idle(Duration::from_secs(5)));
    assert_eq!(emails.lock().unwrap().len() as u64, hits / streak);
}

#[test]
fn confidence_at_threshold_never_triggers() {
    let email = FakeChannel::new(ChannelKind::Email);
    let emails = email.sent.clone();
    let mut h = harness(
        ScriptedDetector::constant("crash", 0.92),
        email,
        FakeChannel::new(ChannelKind::Sms),
    );

    h.session.set_source(stub(60));
    assert!(h.session.start());
    let summary = h.session.wait().expect("loop summary");

    assert_eq!(summary.frames, 60);
    assert_eq!(summary.triggers, 0);
    assert_eq!(summary.final_hits, 0);
    assert_eq!(h.presenter.qualifying.load(Ordering::SeqCst), 0);
    assert!(h.pool.wait_idle(Duration::from_secs(1)));
    assert!(emails.lock().unwrap().is_empty());
    assert!(h.presenter.statuses().is_empty());
}

#[test]
fn email_failure_still_sends_sms_and_loop_continues() {
    let sms = FakeChannel::new(ChannelKind::Sms);
    let texts = sms.sent.clone();
    let mut h = harness(
        ScriptedDetector::constant("crash", 0.99),
        FakeChannel::new(ChannelKind::Email).failing(),
        sms,
    );

    h.session.set_source(stub(30));
    assert!(h.session.start());
    let summary = h.session.wait().expect("loop summary");

    assert_eq!(summary.frames, 30);
    assert_eq!(summary.triggers, 1);
    assert_eq!(summary.final_hits, 10);

    assert!(h.pool.wait_idle(Duration::from_secs(5)));
    assert_eq!(texts.lock().unwrap().len(), 1);
    let stats = h.pool.stats();
    assert_eq!(stats.completed, 1);
    assert_eq!(stats.failed, 1);
    assert_eq!(
        h.presenter.statuses(),
        vec![
            STATUS_SENDING.to_string(),
            "Alert partially sent (email failed)".to_string(),
            String::new(),
        ]
    );
}

#[test]
fn stop_mid_stream_lets_in_flight_alert_finish() {
    let gate = Arc::new(Gate::default());
    let email = FakeChannel::new(ChannelKind::Email).gated(gate.clone());
    let emails = email.sent.clone();
    let mut h = harness(
        ScriptedDetector::constant("crash", 0.99),
        email,
        FakeChannel::new(ChannelKind::Sms),
    );

    // Endless source paced at 200 fps.
    h.session
        .set_source(SourceId::File("stub://live?fps=200".to_string()));
    assert!(h.session.start());
    assert_eq!(h.session.state(), SessionState::Running);

    assert!(gate.wait_entered(Duration::from_secs(10)), "first alert never dispatched");

    let stop_at = Instant::now();
    h.session.stop();
    let summary = h.session.wait().expect("loop summary");
    assert!(stop_at.elapsed() < Duration::from_secs(1));

    assert_eq!(summary.exit, LoopExit::Stopped);
    assert!(summary.triggers >= 1);
    assert_eq!(h.session.state(), SessionState::Stopped);
    assert_eq!(h.session.hits(), 0);
    assert!(h
        .presenter
        .statuses()
        .contains(&STATUS_NO_DETECTIONS.to_string()));

    // The alert was still blocked in the email channel when the loop ended.
    assert!(emails.lock().unwrap().is_empty());
    gate.open();
    assert!(h.pool.wait_idle(Duration::from_secs(5)));
    assert!(!emails.lock().unwrap().is_empty());
    assert!(h.presenter.statuses().contains(&STATUS_SENT.to_string()));
}

#[test]
fn start_requires_a_source_and_reads_the_configured_one() {
    let mut h = harness(
        ScriptedDetector::constant("crash", 0.5),
        FakeChannel::new(ChannelKind::Email),
        FakeChannel::new(ChannelKind::Sms),
    );

    assert!(!h.session.start());
    assert_eq!(h.session.state(), SessionState::Stopped);
    assert!(h.session.wait().is_none());
    assert_eq!(h.presenter.frames.load(Ordering::SeqCst), 0);

    h.session.set_source(stub(7));
    assert!(h.session.start());
    let summary = h.session.wait().expect("loop summary");
    assert_eq!(summary.frames, 7);
    assert_eq!(h.presenter.frames.load(Ordering::SeqCst), 7);

    // The detector comes back after each run, so the session restarts.
    h.session.set_source(stub(3));
    assert!(h.session.start());
    assert_eq!(h.session.wait().expect("loop summary").frames, 3);
}

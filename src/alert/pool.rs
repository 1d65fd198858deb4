use anyhow::{anyhow, Result};
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use super::{AlertDispatcher, AlertEvent, STATUS_SENDING};
use crate::present::Presenter;

#[derive(Clone, Debug)]
pub struct AlertPoolConfig {
    /// Worker threads, i.e. alerts delivered at the same time.
    pub workers: usize,
    /// Alerts allowed to wait for a worker. Beyond this, new alerts are dropped.
    pub queue_capacity: usize,
    /// How long the final status stays up before it is cleared.
    pub status_clear_delay: Duration,
}

impl Default for AlertPoolConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            queue_capacity: 4,
            status_clear_delay: Duration::from_millis(500),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AlertPoolStats {
    pub submitted: u64,
    pub dropped: u64,
    pub completed: u64,
    /// Completed alerts where at least one channel failed.
    pub failed: u64,
    /// Alerts queued or being delivered right now.
    pub pending: u64,
}

#[derive(Default)]
struct Counters {
    submitted: AtomicU64,
    dropped: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
}

struct Shared {
    dispatcher: AlertDispatcher,
    presenter: Arc<dyn Presenter>,
    status_clear_delay: Duration,
    counters: Counters,
}

/// Bounded pool that delivers alerts off the detection loop.
///
/// `submit` never blocks: when every worker is busy and the queue is full the
/// alert is dropped and counted. Dropping the pool (or calling `shutdown`)
/// lets queued alerts finish and joins the workers.
pub struct AlertPool {
    tx: Option<Sender<AlertEvent>>,
    workers: Vec<JoinHandle<()>>,
    shared: Arc<Shared>,
}

impl AlertPool {
    pub fn new(
        config: AlertPoolConfig,
        dispatcher: AlertDispatcher,
        presenter: Arc<dyn Presenter>,
    ) -> Result<Self> {
        if config.workers == 0 {
            return Err(anyhow!("alert pool needs at least one worker"));
        }
        // A zero-capacity channel is a rendezvous: every submit would drop.
        if config.queue_capacity == 0 {
            return Err(anyhow!("alert pool needs a queue capacity of at least one"));
        }
        let (tx, rx) = bounded(config.queue_capacity);
        let shared = Arc::new(Shared {
            dispatcher,
            presenter,
            status_clear_delay: config.status_clear_delay,
            counters: Counters::default(),
        });

        let mut workers = Vec::with_capacity(config.workers);
        for id in 0..config.workers {
            let rx: Receiver<AlertEvent> = rx.clone();
            let shared = shared.clone();
            let handle = std::thread::Builder::new()
                .name(format!("alert-worker-{}", id))
                .spawn(move || worker_loop(rx, shared))
                .map_err(|e| anyhow!("failed to spawn alert worker {}: {}", id, e))?;
            workers.push(handle);
        }
        log::info!(
            "alert pool ready: {} workers, queue {}, {}",
            config.workers,
            config.queue_capacity,
            shared.dispatcher.describe()
        );

        Ok(Self {
            tx: Some(tx),
            workers,
            shared,
        })
    }

    /// Hand an alert to the pool. Returns false if it was dropped.
    pub fn submit(&self, event: AlertEvent) -> bool {
        let Some(tx) = self.tx.as_ref() else {
            return false;
        };
        let counters = &self.shared.counters;
        counters.submitted.fetch_add(1, Ordering::SeqCst);
        match tx.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(event)) => {
                counters.dropped.fetch_add(1, Ordering::SeqCst);
                log::warn!(
                    "alert #{} for {} dropped: alert queue full",
                    event.sequence,
                    event.source
                );
                false
            }
            Err(TrySendError::Disconnected(event)) => {
                counters.dropped.fetch_add(1, Ordering::SeqCst);
                log::error!(
                    "alert #{} for {} dropped: alert workers have exited",
                    event.sequence,
                    event.source
                );
                false
            }
        }
    }

    pub fn stats(&self) -> AlertPoolStats {
        let counters = &self.shared.counters;
        let submitted = counters.submitted.load(Ordering::SeqCst);
        let dropped = counters.dropped.load(Ordering::SeqCst);
        let completed = counters.completed.load(Ordering::SeqCst);
        AlertPoolStats {
            submitted,
            dropped,
            completed,
            failed: counters.failed.load(Ordering::SeqCst),
            pending: submitted.saturating_sub(dropped + completed),
        }
    }

    /// Block until nothing is queued or in flight, or the timeout passes.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.stats().pending == 0 {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    /// Stop accepting alerts, finish queued ones, and join the workers.
    pub fn shutdown(mut self) -> Result<()> {
        self.close()
    }

    fn close(&mut self) -> Result<()> {
        self.tx.take();
        let mut panicked = 0;
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                panicked += 1;
            }
        }
        if panicked > 0 {
            return Err(anyhow!("{} alert worker(s) panicked", panicked));
        }
        Ok(())
    }
}

impl Drop for AlertPool {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            log::error!("alert pool shutdown: {}", e);
        }
    }
}

fn worker_loop(rx: Receiver<AlertEvent>, shared: Arc<Shared>) {
    for event in rx.iter() {
        let sequence = event.sequence;
        let outcome = catch_unwind(AssertUnwindSafe(|| deliver(&shared, &event)));
        let counters = &shared.counters;
        match outcome {
            Ok(true) => {}
            Ok(false) => {
                counters.failed.fetch_add(1, Ordering::SeqCst);
            }
            Err(_) => {
                counters.failed.fetch_add(1, Ordering::SeqCst);
                log::error!("alert #{} delivery panicked", sequence);
            }
        }
        counters.completed.fetch_add(1, Ordering::SeqCst);
    }
}

/// Status sequence for one alert: sending, result, cleared after a delay.
fn deliver(shared: &Shared, event: &AlertEvent) -> bool {
    shared.presenter.on_status(STATUS_SENDING);
    let report = shared.dispatcher.dispatch(event);
    shared.presenter.on_status(&report.status_text());
    std::thread::sleep(shared.status_clear_delay);
    shared.presenter.on_status("");
    report.all_delivered()
}

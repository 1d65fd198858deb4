use std::thread;
use std::time::Duration;

use super::{AlertChannel, AlertEvent, ChannelKind, STATUS_SENT};
use crate::error::RhinoError;

/// Sends one alert over email and SMS at the same time.
///
/// Each channel runs on its own scoped thread, so a slow or failing channel
/// never delays or blocks the other. Failures (including panics) come back in
/// the report; nothing propagates out of `dispatch`.
pub struct AlertDispatcher {
    email: Box<dyn AlertChannel>,
    sms: Box<dyn AlertChannel>,
    max_attempts: u32,
    retry_backoff: Duration,
}

/// Per-channel outcome of one dispatch.
#[derive(Debug)]
pub struct DispatchReport {
    pub email: Result<(), RhinoError>,
    pub sms: Result<(), RhinoError>,
}

impl DispatchReport {
    pub fn all_delivered(&self) -> bool {
        self.email.is_ok() && self.sms.is_ok()
    }

    pub fn failures(&self) -> Vec<&RhinoError> {
        [&self.email, &self.sms]
            .into_iter()
            .filter_map(|outcome| outcome.as_ref().err())
            .collect()
    }

    /// Human-readable summary for the status line.
    pub fn status_text(&self) -> String {
        let failures = self.failures();
        if failures.is_empty() {
            return STATUS_SENT.to_string();
        }
        let failed: Vec<String> = failures
            .iter()
            .map(|err| match err {
                RhinoError::DispatchFailure { channel, .. } => channel.to_string(),
                other => other.to_string(),
            })
            .collect();
        if failures.len() == 2 {
            format!("Alert delivery failed ({})", failed.join(", "))
        } else {
            format!("Alert partially sent ({} failed)", failed.join(", "))
        }
    }
}

impl AlertDispatcher {
    pub fn new(email: Box<dyn AlertChannel>, sms: Box<dyn AlertChannel>) -> Self {
        Self {
            email,
            sms,
            max_attempts: 1,
            retry_backoff: Duration::from_millis(500),
        }
    }

    /// Total tries per channel (1 = no retry).
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Pause before retry N is N times this long.
    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    pub fn describe(&self) -> String {
        format!(
            "email={} sms={} attempts={}",
            self.email.describe(),
            self.sms.describe(),
            self.max_attempts
        )
    }

    pub fn dispatch(&self, event: &AlertEvent) -> DispatchReport {
        thread::scope(|scope| {
            let email = scope.spawn(|| self.send_with_retry(self.email.as_ref(), event));
            let sms = scope.spawn(|| self.send_with_retry(self.sms.as_ref(), event));
            DispatchReport {
                email: email.join().unwrap_or_else(|_| {
                    Err(RhinoError::dispatch(ChannelKind::Email, "channel panicked"))
                }),
                sms: sms.join().unwrap_or_else(|_| {
                    Err(RhinoError::dispatch(ChannelKind::Sms, "channel panicked"))
                }),
            }
        })
    }

    fn send_with_retry(
        &self,
        channel: &dyn AlertChannel,
        event: &AlertEvent,
    ) -> Result<(), RhinoError> {
        let mut attempt = 1;
        loop {
            match channel.send(event) {
                Ok(()) => {
                    log::info!(
                        "alert #{} delivered via {} (attempt {})",
                        event.sequence,
                        channel.describe(),
                        attempt
                    );
                    return Ok(());
                }
                Err(err) if attempt < self.max_attempts => {
                    log::warn!(
                        "alert #{} {} attempt {} failed: {:#}; retrying",
                        event.sequence,
                        channel.kind(),
                        attempt,
                        err
                    );
                    thread::sleep(self.retry_backoff * attempt);
                    attempt += 1;
                }
                Err(err) => {
                    let err = RhinoError::dispatch(channel.kind(), err);
                    log::error!("alert #{} {}", event.sequence, err);
                    return Err(err);
                }
            }
        }
    }
}

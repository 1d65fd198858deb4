//! Alert delivery.
//!
//! A completed streak becomes an `AlertEvent`, which is handed to the
//! `AlertPool`. A pool worker runs the `AlertDispatcher`, which sends the email
//! and the SMS concurrently and reports each channel's outcome separately.
//!
//! Channels:
//! - `EmailChannel`: JSON mail-relay API over HTTPS
//! - `SmsChannel`: form-encoded SMS API over HTTPS with basic auth
//! - `LogChannel`: writes the alert to the log (unconfigured channels, demos)

mod dispatcher;
mod email;
mod log_channel;
mod pool;
mod sms;

use anyhow::Result;
use chrono::{DateTime, Local, Utc};
use std::fmt;

use crate::SourceId;

pub use dispatcher::{AlertDispatcher, DispatchReport};
pub use email::{EmailChannel, EmailSettings};
pub use log_channel::LogChannel;
pub use pool::{AlertPool, AlertPoolConfig, AlertPoolStats};
pub use sms::{SmsChannel, SmsSettings, DEFAULT_SMS_API_URL};

/// Status shown while an alert is being delivered.
pub const STATUS_SENDING: &str = "Crash detected! Sending alerts...";
/// Status shown when every channel delivered.
pub const STATUS_SENT: &str = "Alerts sent";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    Email,
    Sms,
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelKind::Email => write!(f, "email"),
            ChannelKind::Sms => write!(f, "sms"),
        }
    }
}

/// One completed streak, captured at trigger time.
#[derive(Clone, Debug)]
pub struct AlertEvent {
    pub source: SourceId,
    pub timestamp: DateTime<Utc>,
    /// 1-based count of alerts raised by this session.
    pub sequence: u64,
    /// Label and confidence of the detection that completed the streak.
    pub label: String,
    pub confidence: f32,
}

impl AlertEvent {
    pub fn new(source: SourceId, sequence: u64, label: &str, confidence: f32) -> Self {
        Self {
            source,
            timestamp: Utc::now(),
            sequence,
            label: label.to_string(),
            confidence,
        }
    }

    pub fn subject(&self) -> String {
        format!("Vehicle crash detected on {}", self.source)
    }

    pub fn body(&self) -> String {
        let local: DateTime<Local> = self.timestamp.with_timezone(&Local);
        format!(
            "A vehicle crash was detected on source {} at {}. Detection: {} ({}% confidence). Alert #{}.",
            self.source,
            local.format("%Y-%m-%d %H:%M:%S %Z"),
            self.label,
            (self.confidence * 100.0) as u32,
            self.sequence
        )
    }
}

/// A single alert delivery channel.
///
/// `send` may block on network I/O. Channels are shared across pool workers.
pub trait AlertChannel: Send + Sync {
    fn kind(&self) -> ChannelKind;

    /// Short description for logs (never includes credentials).
    fn describe(&self) -> String;

    fn send(&self, event: &AlertEvent) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_names_source_and_confidence() {
        let event = AlertEvent::new(SourceId::File("clips/i95.mp4".to_string()), 3, "crash", 0.957);
        assert_eq!(event.subject(), "Vehicle crash detected on clips/i95.mp4");
        let body = event.body();
        assert!(body.contains("clips/i95.mp4"));
        assert!(body.contains("crash (95% confidence)"));
        assert!(body.ends_with("Alert #3."));
    }
}

use anyhow::Result;

use super::{AlertChannel, AlertEvent, ChannelKind};

/// Writes alerts to the log instead of delivering them.
///
/// Stands in for a channel with no configuration so alerts stay visible.
pub struct LogChannel {
    kind: ChannelKind,
}

impl LogChannel {
    pub fn new(kind: ChannelKind) -> Self {
        Self { kind }
    }
}

impl AlertChannel for LogChannel {
    fn kind(&self) -> ChannelKind {
        self.kind
    }

    fn describe(&self) -> String {
        format!("log({})", self.kind)
    }

    fn send(&self, event: &AlertEvent) -> Result<()> {
        log::warn!(
            "[{} not configured] {}: {}",
            self.kind,
            event.subject(),
            event.body()
        );
        Ok(())
    }
}

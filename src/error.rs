//! Failure taxonomy for the detection loop and alert trigger.
//!
//! None of these end the process: source failures end the loop, inference
//! failures skip a frame, dispatch failures become status text.

use thiserror::Error;

use crate::alert::ChannelKind;
use crate::SourceId;

#[derive(Error, Debug)]
pub enum RhinoError {
    #[error("source {source_id} unavailable: {reason}")]
    SourceUnavailable { source_id: SourceId, reason: String },

    #[error("inference failed on frame {frame_index}: {reason}")]
    InferenceFailure { frame_index: u64, reason: String },

    #[error("{channel} dispatch failed: {reason}")]
    DispatchFailure { channel: ChannelKind, reason: String },
}

impl RhinoError {
    pub fn source_unavailable(source_id: &SourceId, err: impl std::fmt::Display) -> Self {
        RhinoError::SourceUnavailable {
            source_id: source_id.clone(),
            reason: err.to_string(),
        }
    }

    pub fn inference(frame_index: u64, err: impl std::fmt::Display) -> Self {
        RhinoError::InferenceFailure {
            frame_index,
            reason: err.to_string(),
        }
    }

    /// Alternate formatting keeps anyhow's context chain in the reason.
    pub fn dispatch(channel: ChannelKind, err: impl std::fmt::Display) -> Self {
        RhinoError::DispatchFailure {
            channel,
            reason: format!("{:#}", err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn dispatch_failure_keeps_context_chain() {
        let err: anyhow::Result<()> = Err(anyhow::anyhow!("connection refused"))
            .context("POST https://mail.example/v3/send");
        let err = RhinoError::dispatch(ChannelKind::Email, err.unwrap_err());
        assert_eq!(
            err.to_string(),
            "email dispatch failed: POST https://mail.example/v3/send: connection refused"
        );
    }

    #[test]
    fn source_unavailable_names_source() {
        let err = RhinoError::source_unavailable(&SourceId::Camera(0), "no such device");
        assert_eq!(err.to_string(), "source camera:0 unavailable: no such device");
    }
}

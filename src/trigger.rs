//! Streak debouncing.
//!
//! `StreakCounter` turns a run of qualifying detections into at most one
//! trigger per `streak_threshold` hits. `TriggerPolicy::scan` decides which of
//! a frame's candidates count as hits.
//!
//! The counter never rests at the threshold: the hit that reaches it fires the
//! trigger and resets the count to zero in the same call.

use crate::detect::Detection;
use crate::{DEFAULT_CONFIDENCE_THRESHOLD, DEFAULT_STREAK_THRESHOLD, DEFAULT_TOP_K};

/// Thresholds applied to each frame's candidates.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TriggerPolicy {
    /// Candidates must score strictly above this to count.
    pub confidence_threshold: f32,
    /// Hits needed to fire one alert.
    pub streak_threshold: u32,
    /// Candidates considered per frame, highest confidence first.
    pub top_k: usize,
}

impl Default for TriggerPolicy {
    fn default() -> Self {
        Self {
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            streak_threshold: DEFAULT_STREAK_THRESHOLD,
            top_k: DEFAULT_TOP_K,
        }
    }
}

/// Outcome of scanning one frame.
#[derive(Clone, Debug, Default)]
pub struct FrameScan {
    /// Candidates that counted as hits, in scan order.
    pub qualifying: Vec<Detection>,
    /// The candidate whose hit completed a streak, if any.
    pub triggered_by: Option<Detection>,
}

impl FrameScan {
    pub fn triggered(&self) -> bool {
        self.triggered_by.is_some()
    }
}

impl TriggerPolicy {
    /// Sort candidates by descending confidence and keep the first `top_k`.
    ///
    /// The sort is stable, so equal scores keep the detector's order.
    pub fn rank(&self, mut candidates: Vec<Detection>) -> Vec<Detection> {
        candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        candidates.truncate(self.top_k);
        candidates
    }

    /// Count this frame's hits against `counter`.
    ///
    /// `ranked` must come from `rank`. Scanning stops at the hit that fires a
    /// trigger, so a frame fires at most once.
    pub fn scan(&self, counter: &mut StreakCounter, ranked: &[Detection]) -> FrameScan {
        let mut scan = FrameScan::default();
        for candidate in ranked {
            if candidate.confidence <= self.confidence_threshold {
                continue;
            }
            scan.qualifying.push(candidate.clone());
            if counter.record_hit() {
                scan.triggered_by = Some(candidate.clone());
                break;
            }
        }
        scan
    }
}

/// Debounce state: hits accumulated toward the next trigger.
#[derive(Clone, Debug)]
pub struct StreakCounter {
    hits: u32,
    threshold: u32,
    triggers_fired: u64,
}

impl StreakCounter {
    /// A threshold of zero is treated as one.
    pub fn new(threshold: u32) -> Self {
        Self {
            hits: 0,
            threshold: threshold.max(1),
            triggers_fired: 0,
        }
    }

    /// Record one qualifying detection. Returns true when it completes a streak;
    /// the count is already back at zero when this returns.
    pub fn record_hit(&mut self) -> bool {
        self.hits += 1;
        if self.hits < self.threshold {
            return false;
        }
        self.hits = 0;
        self.triggers_fired += 1;
        true
    }

    pub fn hits(&self) -> u32 {
        self.hits
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    pub fn triggers_fired(&self) -> u64 {
        self.triggers_fired
    }

    pub fn reset(&mut self) {
        self.hits = 0;
    }
}

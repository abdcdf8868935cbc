//! Re-armable one-shot timer driven by the region clock.
//!
//! A keep owns two of these (level drift and claim bounty). Callbacks run
//! on the region queue; whatever interval the callback returns becomes the
//! next delay, and a zero return stops the timer.

use serde::{Deserialize, Serialize};

/// One-shot timer. `armed_at_ms` anchors elapsed-time math so the level
/// machine can re-arm mid-flight without losing progress.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeepTimer {
    armed_at_ms: Option<u64>,
    due_at_ms: Option<u64>,
}

impl KeepTimer {
    /// Arm (or re-arm) to fire `delay_ms` from `now_ms`.
    pub fn arm(&mut self, now_ms: u64, delay_ms: u64) {
        self.armed_at_ms = Some(now_ms);
        self.due_at_ms = Some(now_ms.saturating_add(delay_ms));
    }

    /// Disarm. Safe to call on an already stopped timer.
    pub fn stop(&mut self) {
        self.armed_at_ms = None;
        self.due_at_ms = None;
    }

    pub fn is_armed(&self) -> bool {
        self.due_at_ms.is_some()
    }

    pub fn is_due(&self, now_ms: u64) -> bool {
        matches!(self.due_at_ms, Some(due) if now_ms >= due)
    }

    pub fn remaining_ms(&self, now_ms: u64) -> Option<u64> {
        self.due_at_ms.map(|due| due.saturating_sub(now_ms))
    }

    pub fn elapsed_ms(&self, now_ms: u64) -> Option<u64> {
        self.armed_at_ms.map(|armed| now_ms.saturating_sub(armed))
    }

    /// Re-arm for `interval_ms` crediting time already served in the
    /// current run. An idle timer just arms for the full interval. If the
    /// served time meets or exceeds the new interval the timer fires on
    /// the next tick.
    pub fn rearm_preserving_elapsed(&mut self, now_ms: u64, interval_ms: u64) {
        let delay = match self.elapsed_ms(now_ms) {
            Some(elapsed) if elapsed >= interval_ms => 1,
            Some(elapsed) => interval_ms - elapsed,
            None => interval_ms,
        };
        self.arm(now_ms, delay);
    }
}

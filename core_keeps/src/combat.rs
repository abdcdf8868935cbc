//! Per-keep siege tracking.
//!
//! A keep counts as contested only while two things hold: somebody landed
//! a hit inside the rolling window, and a door was open when the current
//! engagement started. Bombardment against closed doors keeps refreshing
//! the start marker without ever flagging the keep contested, so the
//! marker still records when the siege truly began once a door falls.

/// Attack bookkeeping for one keep. Zeroed on capture.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SiegeState {
    last_attack_ms: Option<u64>,
    combat_start_ms: Option<u64>,
    window_breached: bool,
}

impl SiegeState {
    /// Record a hostile hit at `now_ms`. `door_open` is the keep's door
    /// state at the moment of the hit.
    pub fn record_attack(&mut self, now_ms: u64, window_ms: u64, door_open: bool) {
        if !self.in_combat(now_ms, window_ms) {
            // Keep the original start when the doors are already down;
            // the engagement began with whatever softened them up.
            if !door_open || self.combat_start_ms.is_none() {
                self.combat_start_ms = Some(now_ms);
            }
            self.window_breached = door_open;
        }
        self.last_attack_ms = Some(now_ms);
    }

    /// Contested right now? True only if the latest hit is inside the
    /// window (strict, so the state flips exactly at the boundary) and a
    /// door was open when this engagement started.
    pub fn in_combat(&self, now_ms: u64, window_ms: u64) -> bool {
        self.window_breached
            && matches!(self.last_attack_ms, Some(last) if now_ms.saturating_sub(last) < window_ms)
    }

    pub fn last_attack_ms(&self) -> Option<u64> {
        self.last_attack_ms
    }

    pub fn combat_start_ms(&self) -> Option<u64> {
        self.combat_start_ms
    }

    pub fn reset(&mut self) {
        *self = SiegeState::default();
    }
}

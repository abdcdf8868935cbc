use keep_schema::{KeepKind, Realm, ServerKind};
use rand::rngs::SmallRng;
use rand::Rng;

/// Lightweight view of a keep handed to the ruleset. The simulation core
/// builds one per query so policy code never touches live records.
#[derive(Debug, Clone, Copy)]
pub struct KeepValuation {
    pub kind: KeepKind,
    pub level: u8,
    pub base_level: u8,
    /// Difficulty multiplier for the realm currently holding the keep
    /// (0 while neutral).
    pub difficulty: u8,
    pub realm: Realm,
}

/// Pluggable reward and pacing policy for keeps.
///
/// Campaign rule sets override individual functions; the baseline keeps the
/// stock frontier pacing. The two drift-duration functions intentionally
/// return zero until the relic-tier upgrade schedule ships.
pub trait FrontierRuleset: Send + Sync {
    /// Realm points granted when the keep falls.
    fn realm_point_value(&self, keep: &KeepValuation) -> u32;

    /// Bounty points granted when the keep falls.
    fn bounty_point_value(&self, keep: &KeepValuation) -> u32;

    /// Experience granted when the keep falls.
    fn experience_value(&self, keep: &KeepValuation) -> u64;

    /// Multiplier applied to the per-kill experience cap inside the keep.
    fn experience_cap(&self, keep: &KeepValuation) -> f64;

    /// Coin granted when the keep falls.
    fn coin_value(&self, keep: &KeepValuation) -> u64;

    /// Realm points credited to the owning guild on each bounty tick.
    fn realm_point_award(&self, keep: &KeepValuation) -> u32;

    /// Respawn delay for the keep lord, in milliseconds.
    fn lord_respawn_ms(&self, realm: Realm, server: ServerKind, rng: &mut SmallRng) -> u64;

    /// Delay before the next one-level drift step, in milliseconds.
    /// Zero means the step resolves on the next scheduler tick.
    fn upgrade_interval_ms(&self, relics_held: u8) -> u64;

    /// Remaining time for the whole drift to `target_level`. Not yet
    /// implemented by the baseline policy; returns zero.
    fn total_drift_remaining_ms(&self, keep: &KeepValuation, target_level: u8) -> u64;
}

/// Stock frontier policy.
#[derive(Debug, Clone)]
pub struct BaselineRules {
    /// Base guard respawn on coop/skirmish servers, seconds.
    pub guard_respawn_s: i64,
    /// Respawn variance on coop/skirmish servers, seconds.
    pub guard_respawn_variance_s: i64,
}

impl Default for BaselineRules {
    fn default() -> Self {
        Self {
            guard_respawn_s: 10,
            guard_respawn_variance_s: 4,
        }
    }
}

impl FrontierRuleset for BaselineRules {
    fn realm_point_value(&self, keep: &KeepValuation) -> u32 {
        u32::from(keep.base_level) * 50 * u32::from(keep.difficulty.max(1))
    }

    fn bounty_point_value(&self, keep: &KeepValuation) -> u32 {
        u32::from(keep.level) * 5 * u32::from(keep.difficulty.max(1))
    }

    fn experience_value(&self, keep: &KeepValuation) -> u64 {
        u64::from(keep.base_level) * 1_000
    }

    fn experience_cap(&self, keep: &KeepValuation) -> f64 {
        1.0 + f64::from(keep.level) / 10.0
    }

    fn coin_value(&self, keep: &KeepValuation) -> u64 {
        u64::from(keep.base_level) * 10_000
    }

    fn realm_point_award(&self, keep: &KeepValuation) -> u32 {
        u32::from(keep.level) * 10 * u32::from(keep.difficulty.max(1))
    }

    fn lord_respawn_ms(&self, realm: Realm, server: ServerKind, rng: &mut SmallRng) -> u64 {
        // Neutral lords on coop/skirmish servers are farm targets; keep them
        // down for a randomised window instead of bringing them straight back.
        if realm == Realm::Neutral
            && matches!(server, ServerKind::Coop | ServerKind::Skirmish)
        {
            let variance = 1_000 * self.guard_respawn_variance_s.abs();
            let jitter = if variance > 0 {
                rng.gen_range(-variance..=variance)
            } else {
                0
            };
            let respawn = 60 * (self.guard_respawn_s.abs() * 1_000 + jitter);
            return respawn.max(1_000) as u64;
        }
        1_000
    }

    fn upgrade_interval_ms(&self, _relics_held: u8) -> u64 {
        // Relic-tier pacing pending; every step resolves on the next tick.
        0
    }

    fn total_drift_remaining_ms(&self, _keep: &KeepValuation, _target_level: u8) -> u64 {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn fortress(level: u8, base_level: u8, difficulty: u8) -> KeepValuation {
        KeepValuation {
            kind: KeepKind::Fortress,
            level,
            base_level,
            difficulty,
            realm: Realm::Ardan,
        }
    }

    #[test]
    fn baseline_values_scale_with_difficulty() {
        let rules = BaselineRules::default();
        let easy = fortress(4, 50, 1);
        let hard = fortress(4, 50, 3);
        assert_eq!(rules.realm_point_value(&easy), 2_500);
        assert_eq!(rules.realm_point_value(&hard), 7_500);
        assert_eq!(rules.realm_point_award(&easy), 40);
        assert_eq!(rules.realm_point_award(&hard), 120);
    }

    #[test]
    fn neutral_difficulty_counts_as_one() {
        let rules = BaselineRules::default();
        let neutral = KeepValuation {
            difficulty: 0,
            realm: Realm::Neutral,
            ..fortress(2, 50, 0)
        };
        assert_eq!(rules.bounty_point_value(&neutral), 10);
    }

    #[test]
    fn frontier_lords_respawn_immediately() {
        let rules = BaselineRules::default();
        let mut rng = SmallRng::seed_from_u64(7);
        assert_eq!(
            rules.lord_respawn_ms(Realm::Ardan, ServerKind::Frontier, &mut rng),
            1_000
        );
        assert_eq!(
            rules.lord_respawn_ms(Realm::Neutral, ServerKind::Frontier, &mut rng),
            1_000
        );
    }

    #[test]
    fn neutral_coop_lords_respawn_with_variance() {
        let rules = BaselineRules::default();
        let mut rng = SmallRng::seed_from_u64(7);
        for _ in 0..32 {
            let ms = rules.lord_respawn_ms(Realm::Neutral, ServerKind::Coop, &mut rng);
            assert!(ms >= 1_000, "respawn never drops below one second: {ms}");
            let base = 60 * rules.guard_respawn_s * 1_000;
            let spread = 60 * 1_000 * rules.guard_respawn_variance_s;
            assert!(ms as i64 <= base + spread);
            assert!(ms as i64 >= (base - spread).max(1_000));
        }
    }

    #[test]
    fn drift_durations_default_to_zero() {
        let rules = BaselineRules::default();
        assert_eq!(rules.upgrade_interval_ms(0), 0);
        assert_eq!(rules.upgrade_interval_ms(6), 0);
        assert_eq!(rules.total_drift_remaining_ms(&fortress(5, 50, 1), 10), 0);
    }
}

//! Level state machine.
//!
//! A keep's level drifts one step at a time toward its target: the
//! configured ceiling while a guild holds the claim, the server floor
//! once it is released. The drift timer re-arms itself from its own
//! callback and stops on its own at a stable boundary. Every transition
//! runs the full apply path over sections, guards, patrols, doors,
//! observers, and persistence, whether the timer or a direct caller
//! asked for it.

use bevy::prelude::{Events, Resource};

use keep_runtime::{FrontierRuleset, KeepStore, KeepStoreError};
use keep_schema::{KeepKind, Realm};

use crate::capture::reposition_observers_above_roofline;
use crate::config::{FrontierConfig, KeepBalance};
use crate::events::{GuardDirective, GuardDirectiveEvent};
use crate::guild::GuildDirectory;
use crate::keep::{persist_keep, refresh_garrison_levels, Keep};
use crate::observer::{BroadcastScope, FeedMessage, ObserverFeed};
use crate::region::RegionAtlas;
use crate::structures::HookOccupant;

/// Relics each claimable realm currently holds. Feeds the ruleset's
/// upgrade schedule.
#[derive(Resource, Debug, Clone, Default)]
pub struct RelicTally {
    counts: [u8; 3],
}

impl RelicTally {
    pub fn held_by(&self, realm: Realm) -> u8 {
        realm.table_index().map_or(0, |index| self.counts[index])
    }

    pub fn set_held(&mut self, realm: Realm, count: u8) {
        if let Some(index) = realm.table_index() {
            self.counts[index] = count;
        }
    }
}

/// Point the drift at `target` and arm the timer, crediting time already
/// served on the current interval. No-ops when drift is disabled or the
/// keep is already there. The claiming guild, if any, is told how long
/// the move will take.
#[allow(clippy::too_many_arguments)]
pub fn start_level_drift(
    keep: &mut Keep,
    target: u8,
    now_ms: u64,
    config: &FrontierConfig,
    rules: &dyn FrontierRuleset,
    relics: &RelicTally,
    feed: &mut ObserverFeed,
) {
    if !config.upgrade_timer_enabled {
        return;
    }
    if keep.level == target {
        return;
    }
    keep.target_level = target;
    let interval = rules.upgrade_interval_ms(relics.held_by(keep.realm)).max(1);
    keep.level_timer.rearm_preserving_elapsed(now_ms, interval);

    if let Some(guild) = keep.guild {
        let total = rules.total_drift_remaining_ms(&keep.valuation(), target);
        let eta_ms = if total > 0 {
            total
        } else {
            keep.level_timer.remaining_ms(now_ms).unwrap_or(0)
        };
        feed.push(FeedMessage::Broadcast {
            scope: BroadcastScope::Guild(guild),
            text: format!(
                "{} is moving to level {}. Time remaining: {}s.",
                keep.display_name(config.debug_names),
                target,
                eta_ms / 1_000
            ),
        });
    }
    tracing::debug!(
        target: "greymarch::upgrade",
        keep = %keep.id,
        target,
        interval_ms = interval,
        "level.drift_armed"
    );
}

/// Drift timer callback. Returns the next delay in milliseconds, zero to
/// stop. Tower drift stalls while any section needs repairs; otherwise
/// the level steps once toward the ceiling (claimed) or the floor
/// (unclaimed) and the timer keeps running until it lands on either.
#[allow(clippy::too_many_arguments)]
pub fn level_timer_fired(
    keep: &mut Keep,
    atlas: &RegionAtlas,
    guilds: &GuildDirectory,
    config: &FrontierConfig,
    balance: &KeepBalance,
    rules: &dyn FrontierRuleset,
    relics: &RelicTally,
    store: &dyn KeepStore,
    feed: &mut ObserverFeed,
    directives: &mut Events<GuardDirectiveEvent>,
) -> u64 {
    if keep.kind == KeepKind::Tower
        && keep
            .sections
            .iter()
            .any(|s| s.health_pct() < config.repair_gate_pct)
    {
        tracing::debug!(
            target: "greymarch::upgrade",
            keep = %keep.id,
            "level.drift_paused_for_repairs"
        );
        return config.repair_gate_rearm_ms;
    }

    let ceiling = if keep.guild.is_some() {
        config.max_level
    } else {
        config.starting_level
    };

    let step = if keep.level < ceiling && keep.guild.is_some() {
        Some(keep.level + 1)
    } else if keep.level > ceiling && keep.guild.is_none() {
        Some(keep.level - 1)
    } else {
        None
    };
    if let Some(new_level) = step {
        if let Err(err) = change_level(
            keep, atlas, guilds, config, balance, store, feed, directives, new_level,
        ) {
            tracing::error!(
                target: "greymarch::upgrade",
                keep = %keep.id,
                error = %err,
                "level.change_failed"
            );
            return config.fallback_rearm_ms;
        }
    }

    if keep.level != config.max_level && keep.level != config.starting_level {
        return rules.upgrade_interval_ms(relics.held_by(keep.realm)).max(1);
    }

    // Stable boundary: one final save, then the timer dies.
    if let Err(err) = persist_keep(keep, guilds, store) {
        tracing::error!(
            target: "greymarch::upgrade",
            keep = %keep.id,
            error = %err,
            "level.boundary_save_failed"
        );
        return config.fallback_rearm_ms;
    }
    tracing::info!(
        target: "greymarch::upgrade",
        keep = %keep.id,
        level = keep.level,
        "level.drift_completed"
    );
    0
}

/// Apply one level transition in full: sections update and shed hook
/// occupants that no longer fit, garrison levels recompute, observers in
/// the region get the deltas plus a realm-wide notice, anyone standing
/// above the new roofline is clamped down, and the row is saved.
#[allow(clippy::too_many_arguments)]
pub fn change_level(
    keep: &mut Keep,
    atlas: &RegionAtlas,
    guilds: &GuildDirectory,
    config: &FrontierConfig,
    balance: &KeepBalance,
    store: &dyn KeepStore,
    feed: &mut ObserverFeed,
    directives: &mut Events<GuardDirectiveEvent>,
    new_level: u8,
) -> Result<(), KeepStoreError> {
    keep.level = new_level.clamp(config.starting_level, config.max_level);

    let keep_id = keep.id;
    let effective = keep.effective_level();
    let height = keep.height();
    for section in &mut keep.sections {
        section.update_level(effective);
        for occupant in section.redistribute_hooks(height) {
            if let HookOccupant::Guard(guard) = occupant {
                directives.send(GuardDirectiveEvent {
                    keep: keep_id,
                    guard,
                    directive: GuardDirective::Despawn,
                });
            }
        }
        feed.push(FeedMessage::SectionDetail {
            state: section.state(keep_id.0),
        });
    }

    refresh_garrison_levels(keep, balance);

    feed.push(FeedMessage::Broadcast {
        scope: BroadcastScope::Realm(keep.realm),
        text: format!(
            "{} is now level {}.",
            keep.display_name(config.debug_names),
            keep.level
        ),
    });

    reposition_observers_above_roofline(keep, atlas, store, balance, config, feed);

    persist_keep(keep, guilds, store)?;
    tracing::info!(
        target: "greymarch::upgrade",
        keep = %keep.id,
        level = keep.level,
        "level.changed"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::SmallRng;

    use keep_runtime::{BaselineRules, KeepValuation, MemoryKeepStore};
    use keep_schema::ServerKind;

    use crate::guard::GuardId;
    use crate::keep::fixtures::{fortress_blueprint, tower_blueprint};
    use crate::keep::{load_keep, KeepId, KeepRegistry};
    use crate::guild::{Guild, GuildId};
    use crate::structures::HookOccupant;

    struct SlowRules {
        interval_ms: u64,
    }

    impl FrontierRuleset for SlowRules {
        fn realm_point_value(&self, _keep: &KeepValuation) -> u32 {
            0
        }
        fn bounty_point_value(&self, _keep: &KeepValuation) -> u32 {
            0
        }
        fn experience_value(&self, _keep: &KeepValuation) -> u64 {
            0
        }
        fn experience_cap(&self, _keep: &KeepValuation) -> f64 {
            1.0
        }
        fn coin_value(&self, _keep: &KeepValuation) -> u64 {
            0
        }
        fn realm_point_award(&self, _keep: &KeepValuation) -> u32 {
            0
        }
        fn lord_respawn_ms(&self, _realm: Realm, _server: ServerKind, _rng: &mut SmallRng) -> u64 {
            1_000
        }
        fn upgrade_interval_ms(&self, _relics_held: u8) -> u64 {
            self.interval_ms
        }
        fn total_drift_remaining_ms(&self, _keep: &KeepValuation, _target_level: u8) -> u64 {
            0
        }
    }

    struct DriftEnv {
        registry: KeepRegistry,
        atlas: RegionAtlas,
        guilds: GuildDirectory,
        config: FrontierConfig,
        balance: KeepBalance,
        relics: RelicTally,
        store: MemoryKeepStore,
        feed: ObserverFeed,
        directives: Events<GuardDirectiveEvent>,
        id: KeepId,
    }

    fn env_with(blueprint: crate::keep::KeepBlueprint) -> DriftEnv {
        let mut registry = KeepRegistry::default();
        let mut atlas = RegionAtlas::default();
        let mut guilds = GuildDirectory::default();
        let config = FrontierConfig::default();
        let balance = KeepBalance::default();
        let relics = RelicTally::default();
        let store = MemoryKeepStore::new();
        let mut feed = ObserverFeed::default();
        let id = load_keep(
            &mut registry,
            &mut atlas,
            &mut guilds,
            &config,
            &balance,
            &BaselineRules::default(),
            &relics,
            &store,
            &mut feed,
            0,
            blueprint,
        )
        .expect("load");
        feed.drain();
        DriftEnv {
            registry,
            atlas,
            guilds,
            config,
            balance,
            relics,
            store,
            feed,
            directives: Events::default(),
            id,
        }
    }

    fn fire(env: &mut DriftEnv, rules: &dyn FrontierRuleset) -> u64 {
        let keep = env.registry.get_mut(env.id).expect("keep");
        level_timer_fired(
            keep,
            &env.atlas,
            &env.guilds,
            &env.config,
            &env.balance,
            rules,
            &env.relics,
            &env.store,
            &mut env.feed,
            &mut env.directives,
        )
    }

    #[test]
    fn claimed_keep_climbs_to_ceiling_then_timer_stops() {
        let mut env = env_with(fortress_blueprint(21));
        let guild = env
            .guilds
            .register(Guild::new(GuildId(5), "Oathbound", Realm::Ardan));
        let rules = BaselineRules::default();
        {
            let keep = env.registry.get_mut(env.id).expect("keep");
            keep.guild = Some(guild);
            keep.level = 5;
        }

        let mut levels = Vec::new();
        let mut firings = 0;
        loop {
            let next = fire(&mut env, &rules);
            firings += 1;
            levels.push(env.registry.get(env.id).expect("keep").level);
            if next == 0 {
                break;
            }
            assert!(firings < 20, "drift did not terminate");
        }

        assert_eq!(levels, vec![6, 7, 8, 9, 10]);
        let row = env.store.load_keep(21).expect("store").expect("row");
        assert_eq!(row.level, 10);
    }

    #[test]
    fn unclaimed_keep_decays_to_floor_then_timer_stops() {
        let mut env = env_with(fortress_blueprint(21));
        let rules = BaselineRules::default();
        env.registry.get_mut(env.id).expect("keep").level = 4;

        let mut levels = Vec::new();
        loop {
            let next = fire(&mut env, &rules);
            levels.push(env.registry.get(env.id).expect("keep").level);
            if next == 0 {
                break;
            }
            assert!(levels.len() < 20, "decay did not terminate");
        }

        assert_eq!(levels, vec![3, 2, 1]);
    }

    #[test]
    fn damaged_tower_stalls_drift_for_the_repair_interval() {
        let mut env = env_with(tower_blueprint(30));
        let guild = env
            .guilds
            .register(Guild::new(GuildId(5), "Oathbound", Realm::Ardan));
        {
            let keep = env.registry.get_mut(env.id).expect("keep");
            keep.guild = Some(guild);
            keep.level = 3;
            let section = keep.section_mut(0).expect("core");
            section.health = section.max_health / 2;
        }

        let next = fire(&mut env, &BaselineRules::default());
        assert_eq!(next, env.config.repair_gate_rearm_ms);
        assert_eq!(env.registry.get(env.id).expect("keep").level, 3);

        // Repairs finish: the next firing moves the level again.
        env.registry
            .get_mut(env.id)
            .expect("keep")
            .section_mut(0)
            .expect("core")
            .repair_to_full();
        let next = fire(&mut env, &BaselineRules::default());
        assert!(next > 0);
        assert_eq!(env.registry.get(env.id).expect("keep").level, 4);
    }

    #[test]
    fn damaged_fortress_does_not_stall() {
        let mut env = env_with(fortress_blueprint(21));
        let guild = env
            .guilds
            .register(Guild::new(GuildId(5), "Oathbound", Realm::Ardan));
        {
            let keep = env.registry.get_mut(env.id).expect("keep");
            keep.guild = Some(guild);
            keep.level = 3;
            keep.section_mut(0).expect("core").health = 1;
        }

        fire(&mut env, &BaselineRules::default());
        assert_eq!(env.registry.get(env.id).expect("keep").level, 4);
    }

    #[test]
    fn drift_start_is_a_no_op_at_the_target() {
        let mut env = env_with(fortress_blueprint(21));
        let rules = BaselineRules::default();
        let keep = env.registry.get_mut(env.id).expect("keep");
        keep.level = 1;
        start_level_drift(
            keep,
            1,
            0,
            &env.config,
            &rules,
            &env.relics,
            &mut env.feed,
        );
        assert!(!keep.level_timer.is_armed());
    }

    #[test]
    fn drift_start_respects_the_enable_flag() {
        let mut env = env_with(fortress_blueprint(21));
        env.config.upgrade_timer_enabled = false;
        let rules = BaselineRules::default();
        let keep = env.registry.get_mut(env.id).expect("keep");
        keep.level = 5;
        start_level_drift(
            keep,
            1,
            0,
            &env.config,
            &rules,
            &env.relics,
            &mut env.feed,
        );
        assert!(!keep.level_timer.is_armed());
    }

    #[test]
    fn retarget_credits_time_already_served() {
        let mut env = env_with(fortress_blueprint(21));
        let slow = SlowRules {
            interval_ms: 10_000,
        };
        let keep = env.registry.get_mut(env.id).expect("keep");
        keep.level = 5;
        start_level_drift(keep, 10, 0, &env.config, &slow, &env.relics, &mut env.feed);
        assert_eq!(keep.level_timer.remaining_ms(0), Some(10_000));

        // Released 4s in: the decay interval inherits the served time.
        let faster = SlowRules { interval_ms: 6_000 };
        start_level_drift(
            keep,
            1,
            4_000,
            &env.config,
            &faster,
            &env.relics,
            &mut env.feed,
        );
        assert_eq!(keep.level_timer.remaining_ms(4_000), Some(2_000));
        assert_eq!(keep.target_level, 1);
    }

    #[test]
    fn retarget_after_overrun_fires_almost_immediately() {
        let mut env = env_with(fortress_blueprint(21));
        let slow = SlowRules {
            interval_ms: 10_000,
        };
        let keep = env.registry.get_mut(env.id).expect("keep");
        keep.level = 5;
        start_level_drift(keep, 10, 0, &env.config, &slow, &env.relics, &mut env.feed);

        let shorter = SlowRules { interval_ms: 5_000 };
        start_level_drift(
            keep,
            1,
            12_000,
            &env.config,
            &shorter,
            &env.relics,
            &mut env.feed,
        );
        assert_eq!(keep.level_timer.remaining_ms(12_000), Some(1));
    }

    #[test]
    fn claimed_drift_start_tells_the_guild() {
        let mut env = env_with(fortress_blueprint(21));
        let guild = env
            .guilds
            .register(Guild::new(GuildId(5), "Oathbound", Realm::Ardan));
        let slow = SlowRules {
            interval_ms: 30_000,
        };
        let keep = env.registry.get_mut(env.id).expect("keep");
        keep.guild = Some(guild);
        start_level_drift(keep, 10, 0, &env.config, &slow, &env.relics, &mut env.feed);

        let messages = env.feed.drain();
        assert!(messages.iter().any(|m| matches!(
            m,
            FeedMessage::Broadcast { scope: BroadcastScope::Guild(g), text }
                if *g == guild && text.contains("level 10") && text.contains("30s")
        )));
    }

    #[test]
    fn change_level_applies_to_every_attached_part() {
        let mut env = env_with(fortress_blueprint(21));
        {
            let keep = env.registry.get_mut(env.id).expect("keep");
            change_level(
                keep,
                &env.atlas,
                &env.guilds,
                &env.config,
                &env.balance,
                &env.store,
                &mut env.feed,
                &mut env.directives,
                5,
            )
            .expect("change");
        }

        let keep = env.registry.get(env.id).expect("keep");
        assert_eq!(keep.level, 5);
        assert!(keep.sections.iter().all(|s| s.level == 4));
        assert!(keep.doors.values().all(|d| d.level == 4));
        // Attached lord on base 50: 62 + 5 * 1.5 truncated to 69.
        assert_eq!(keep.guards[&GuardId(1)].level, 69);
        // Patrol members level like attached fighters: 51 + 7.5 truncated.
        assert_eq!(keep.patrols[&1].level, 58);
        assert_eq!(env.store.load_keep(21).expect("store").expect("row").level, 5);

        let messages = env.feed.drain();
        let details = messages
            .iter()
            .filter(|m| matches!(m, FeedMessage::SectionDetail { .. }))
            .count();
        assert_eq!(details, 2);
        assert!(messages.iter().any(|m| matches!(
            m,
            FeedMessage::Broadcast { scope: BroadcastScope::Realm(Realm::Ardan), text }
                if text.contains("is now level 5")
        )));
    }

    #[test]
    fn shrinking_keep_evicts_high_hook_occupants() {
        let mut env = env_with(fortress_blueprint(21));
        {
            let keep = env.registry.get_mut(env.id).expect("keep");
            keep.level = 7;
            let core = keep.section_mut(0).expect("core");
            core.hook_points.get_mut(&12).expect("hook").occupant =
                Some(HookOccupant::Guard(GuardId(5)));
        }
        {
            let keep = env.registry.get_mut(env.id).expect("keep");
            change_level(
                keep,
                &env.atlas,
                &env.guilds,
                &env.config,
                &env.balance,
                &env.store,
                &mut env.feed,
                &mut env.directives,
                3,
            )
            .expect("change");
        }

        let sent: Vec<_> = env.directives.drain().collect();
        assert!(sent.iter().any(|d| {
            d.guard == GuardId(5) && d.directive == GuardDirective::Despawn
        }));
        let keep = env.registry.get(env.id).expect("keep");
        assert!(keep.section(0).expect("core").hook_points[&12]
            .occupant
            .is_none());
    }

    #[test]
    fn change_level_clamps_to_configured_bounds() {
        let mut env = env_with(fortress_blueprint(21));
        let keep = env.registry.get_mut(env.id).expect("keep");
        change_level(
            keep,
            &env.atlas,
            &env.guilds,
            &env.config,
            &env.balance,
            &env.store,
            &mut env.feed,
            &mut env.directives,
            0,
        )
        .expect("change");
        assert_eq!(keep.level, 1);
        change_level(
            keep,
            &env.atlas,
            &env.guilds,
            &env.config,
            &env.balance,
            &env.store,
            &mut env.feed,
            &mut env.directives,
            200,
        )
        .expect("change");
        assert_eq!(keep.level, 10);
    }

    #[test]
    fn relic_tally_indexes_by_realm() {
        let mut relics = RelicTally::default();
        relics.set_held(Realm::Veska, 3);
        relics.set_held(Realm::Neutral, 9);
        assert_eq!(relics.held_by(Realm::Veska), 3);
        assert_eq!(relics.held_by(Realm::Ardan), 0);
        assert_eq!(relics.held_by(Realm::Neutral), 0);
    }
}

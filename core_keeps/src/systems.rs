//! Region scheduler systems and the world-level entry points the server
//! binary drives between ticks.
//!
//! Everything that mutates keep state runs on the region's single
//! schedule: the clock advances, due timers fire, and queued feed
//! messages become one encoded frame. The `submit_*` functions are the
//! command surface; they borrow the same resources through a
//! [`SystemState`] so a command observes exactly the state a scheduled
//! system would.

use bevy::ecs::system::SystemState;
use bevy::prelude::{Events, Res, ResMut, World};

use keep_runtime::KeepStoreError;
use keep_schema::{DoorState, KeepState, Realm};

use crate::capture;
use crate::claim::{self, ClaimError};
use crate::config::{FrontierConfig, KeepBalanceHandle, RulesetHandle};
use crate::events::{GuardDirective, GuardDirectiveEvent, KeepCapturedEvent, KeepClaimedEvent};
use crate::guild::GuildDirectory;
use crate::keep::{self, FrontierRng, KeepBlueprint, KeepId, KeepRegistry, KeepStoreHandle};
use crate::observer::{self, FeedHistory, ObserverFeed};
use crate::rebalance::KeepCountBonuses;
use crate::region::{Observer, ObserverId, RegionAtlas, RegionClock};
use crate::upgrade::{self, RelicTally};

enum TimerDuty {
    Level,
    Bounty,
}

pub fn advance_clock(mut clock: ResMut<RegionClock>) {
    clock.advance();
}

/// Fire every due keep timer once. Due timers are collected before any
/// callback runs, so a callback that arms or stops other timers never
/// changes what this tick dispatches.
#[allow(clippy::too_many_arguments)]
pub fn drive_keep_timers(
    clock: Res<RegionClock>,
    config: Res<FrontierConfig>,
    balance: Res<KeepBalanceHandle>,
    rules: Res<RulesetHandle>,
    relics: Res<RelicTally>,
    store: Res<KeepStoreHandle>,
    atlas: Res<RegionAtlas>,
    mut registry: ResMut<KeepRegistry>,
    mut guilds: ResMut<GuildDirectory>,
    mut feed: ResMut<ObserverFeed>,
    mut directives: ResMut<Events<GuardDirectiveEvent>>,
) {
    let now = clock.now_ms();
    let balance = balance.get();
    let rules = rules.get();
    let store = store.get();

    let mut due = Vec::new();
    for id in registry.ids() {
        if let Some(keep) = registry.get(id) {
            if keep.level_timer.is_due(now) {
                due.push((id, TimerDuty::Level));
            }
            if keep.bounty_timer.is_due(now) {
                due.push((id, TimerDuty::Bounty));
            }
        }
    }

    for (id, duty) in due {
        let Some(keep) = registry.get_mut(id) else {
            continue;
        };
        match duty {
            TimerDuty::Level => {
                let next = upgrade::level_timer_fired(
                    keep,
                    &atlas,
                    &guilds,
                    &config,
                    &balance,
                    rules.as_ref(),
                    &relics,
                    store.as_ref(),
                    &mut feed,
                    &mut directives,
                );
                if next == 0 {
                    keep.level_timer.stop();
                } else {
                    keep.level_timer.arm(now, next);
                }
            }
            TimerDuty::Bounty => {
                let next = claim::bounty_timer_fired(keep, &mut guilds, rules.as_ref(), &config);
                if next == 0 {
                    keep.bounty_timer.stop();
                } else {
                    keep.bounty_timer.arm(now, next);
                }
            }
        }
    }
}

/// Drain the feed queue into one encoded frame for the fanout server.
/// Nothing queued means no frame; observers only see ticks that changed
/// something.
pub fn publish_feed(
    clock: Res<RegionClock>,
    mut feed: ResMut<ObserverFeed>,
    mut history: ResMut<FeedHistory>,
) {
    if feed.is_empty() {
        return;
    }
    let messages = feed.drain();
    match observer::encode_feed_frame(clock.now_ms(), messages) {
        Ok(frame) => {
            history.latest_frame = Some(frame);
            history.frames_published += 1;
        }
        Err(err) => {
            tracing::error!(
                target: "greymarch::keep",
                error = %err,
                "feed.encode_failed"
            );
        }
    }
}

pub fn log_region_online(
    registry: Res<KeepRegistry>,
    atlas: Res<RegionAtlas>,
    config: Res<FrontierConfig>,
) {
    for (id, info) in atlas.regions() {
        let keeps = registry.iter().filter(|k| k.region() == id).count();
        tracing::info!(
            target: "greymarch::keep",
            region = %id,
            name = %info.name,
            frontier = info.frontier,
            keeps,
            "region.hosting"
        );
    }
    tracing::info!(
        target: "greymarch::keep",
        keeps = registry.len(),
        observers = atlas.observer_count(),
        tick_ms = config.tick_ms,
        "region.online"
    );
}

/// Load one keep blueprint into the world, overlaying any state already
/// persisted for it.
pub fn load_keep_into(
    world: &mut World,
    blueprint: KeepBlueprint,
) -> Result<KeepId, KeepStoreError> {
    let now = world.resource::<RegionClock>().now_ms();
    let mut state: SystemState<(
        ResMut<KeepRegistry>,
        ResMut<RegionAtlas>,
        ResMut<GuildDirectory>,
        Res<FrontierConfig>,
        Res<KeepBalanceHandle>,
        Res<RulesetHandle>,
        Res<RelicTally>,
        Res<KeepStoreHandle>,
        ResMut<ObserverFeed>,
    )> = SystemState::new(world);
    let (mut registry, mut atlas, mut guilds, config, balance, rules, relics, store, mut feed) =
        state.get_mut(world);
    let balance = balance.get();
    let rules = rules.get();
    let store = store.get();
    keep::load_keep(
        &mut registry,
        &mut atlas,
        &mut guilds,
        &config,
        &balance,
        rules.as_ref(),
        &relics,
        store.as_ref(),
        &mut feed,
        now,
        blueprint,
    )
}

/// Record an enemy strike against the keep. Returns false when the keep
/// is not loaded.
pub fn submit_attack(world: &mut World, id: KeepId, attacker: Realm) -> bool {
    let now = world.resource::<RegionClock>().now_ms();
    let window = world.resource::<FrontierConfig>().combat_window_ms;
    let mut registry = world.resource_mut::<KeepRegistry>();
    let Some(keep) = registry.get_mut(id) else {
        return false;
    };
    keep.record_attack(now, window);
    tracing::debug!(
        target: "greymarch::keep",
        keep = %id,
        attacker = ?attacker,
        "combat.attack_recorded"
    );
    true
}

/// Force every door of the keep open or closed.
pub fn set_keep_doors(world: &mut World, id: KeepId, open: bool) -> bool {
    let mut registry = world.resource_mut::<KeepRegistry>();
    let Some(keep) = registry.get_mut(id) else {
        return false;
    };
    let state = if open {
        DoorState::Open
    } else {
        DoorState::Closed
    };
    for door in keep.doors.values_mut() {
        door.state = state;
    }
    true
}

/// Player-driven claim attempt against the full refusal chain.
pub fn submit_claim(world: &mut World, id: KeepId, claimant: ObserverId) -> Result<(), ClaimError> {
    let now = world.resource::<RegionClock>().now_ms();
    let mut state: SystemState<(
        ResMut<KeepRegistry>,
        Res<RegionAtlas>,
        ResMut<GuildDirectory>,
        Res<FrontierConfig>,
        Res<KeepBalanceHandle>,
        Res<RulesetHandle>,
        Res<RelicTally>,
        Res<KeepStoreHandle>,
        ResMut<ObserverFeed>,
        ResMut<Events<GuardDirectiveEvent>>,
        ResMut<Events<KeepClaimedEvent>>,
    )> = SystemState::new(world);
    let (
        mut registry,
        atlas,
        mut guilds,
        config,
        balance,
        rules,
        relics,
        store,
        mut feed,
        mut directives,
        mut claimed,
    ) = state.get_mut(world);
    let balance = balance.get();
    let rules = rules.get();
    let store = store.get();
    claim::claim_keep(
        &mut registry,
        &atlas,
        &mut guilds,
        &config,
        &balance,
        rules.as_ref(),
        &relics,
        store.as_ref(),
        &mut feed,
        &mut directives,
        &mut claimed,
        now,
        id,
        claimant,
    )
}

/// Operator claim on behalf of a named guild.
pub fn submit_admin_claim(
    world: &mut World,
    id: KeepId,
    guild_name: &str,
) -> Result<(), ClaimError> {
    let now = world.resource::<RegionClock>().now_ms();
    let mut state: SystemState<(
        ResMut<KeepRegistry>,
        Res<RegionAtlas>,
        ResMut<GuildDirectory>,
        Res<FrontierConfig>,
        Res<KeepBalanceHandle>,
        Res<RulesetHandle>,
        Res<RelicTally>,
        Res<KeepStoreHandle>,
        ResMut<ObserverFeed>,
        ResMut<Events<GuardDirectiveEvent>>,
        ResMut<Events<KeepClaimedEvent>>,
    )> = SystemState::new(world);
    let (
        mut registry,
        atlas,
        mut guilds,
        config,
        balance,
        rules,
        relics,
        store,
        mut feed,
        mut directives,
        mut claimed,
    ) = state.get_mut(world);
    let balance = balance.get();
    let rules = rules.get();
    let store = store.get();
    claim::admin_claim(
        &mut registry,
        &atlas,
        &mut guilds,
        &config,
        &balance,
        rules.as_ref(),
        &relics,
        store.as_ref(),
        &mut feed,
        &mut directives,
        &mut claimed,
        now,
        id,
        guild_name,
    )
}

pub fn submit_release(world: &mut World, id: KeepId) -> Result<(), ClaimError> {
    let now = world.resource::<RegionClock>().now_ms();
    let mut state: SystemState<(
        ResMut<KeepRegistry>,
        ResMut<GuildDirectory>,
        Res<FrontierConfig>,
        Res<RulesetHandle>,
        Res<RelicTally>,
        Res<KeepStoreHandle>,
        ResMut<ObserverFeed>,
    )> = SystemState::new(world);
    let (mut registry, mut guilds, config, rules, relics, store, mut feed) = state.get_mut(world);
    let rules = rules.get();
    let store = store.get();
    claim::release_keep(
        &mut registry,
        &mut guilds,
        &config,
        rules.as_ref(),
        &relics,
        store.as_ref(),
        &mut feed,
        now,
        id,
    )
}

/// Run the capture reset, handing the keep to `realm`. A capture means
/// the lord fell, so a still-standing lord is marked dead first and his
/// respawn window drawn from the ruleset for the actor layer to honor.
pub fn submit_capture(world: &mut World, id: KeepId, realm: Realm) -> Result<(), KeepStoreError> {
    let now = world.resource::<RegionClock>().now_ms();
    let mut state: SystemState<(
        ResMut<KeepRegistry>,
        Res<RegionAtlas>,
        ResMut<GuildDirectory>,
        Res<FrontierConfig>,
        Res<KeepBalanceHandle>,
        Res<RulesetHandle>,
        Res<RelicTally>,
        Res<KeepStoreHandle>,
        ResMut<ObserverFeed>,
        ResMut<Events<GuardDirectiveEvent>>,
        ResMut<Events<KeepCapturedEvent>>,
        ResMut<KeepCountBonuses>,
        ResMut<FrontierRng>,
    )> = SystemState::new(world);
    let (
        mut registry,
        atlas,
        mut guilds,
        config,
        balance,
        rules,
        relics,
        store,
        mut feed,
        mut directives,
        mut captured,
        mut bonuses,
        mut rng,
    ) = state.get_mut(world);
    let balance = balance.get();
    let rules = rules.get();
    let store = store.get();

    {
        let keep = registry
            .get_mut(id)
            .ok_or(KeepStoreError::MissingKeep(id.0))?;
        let lord = keep
            .guards
            .values()
            .find(|g| g.kind.is_lord() && g.alive)
            .map(|g| g.id);
        if let Some(lord_id) = lord {
            let respawn_ms = keep.lord_respawn_ms(rules.as_ref(), config.server_kind, &mut rng.0);
            if let Some(post) = keep.guards.get_mut(&lord_id) {
                post.alive = false;
            }
            directives.send(GuardDirectiveEvent {
                keep: id,
                guard: lord_id,
                directive: GuardDirective::Kill,
            });
            tracing::info!(
                target: "greymarch::capture",
                keep = %id,
                guard = %lord_id,
                respawn_ms,
                "lord.fell"
            );
        }
    }

    capture::reset_keep(
        &mut registry,
        &atlas,
        &mut guilds,
        &config,
        &balance,
        rules.as_ref(),
        &relics,
        store.as_ref(),
        &mut feed,
        &mut directives,
        &mut captured,
        &mut bonuses,
        now,
        id,
        realm,
    )
}

/// Operator override: set the keep's level immediately, leaving any
/// armed drift in place.
pub fn submit_level(world: &mut World, id: KeepId, target: u8) -> Result<(), KeepStoreError> {
    let mut state: SystemState<(
        ResMut<KeepRegistry>,
        Res<RegionAtlas>,
        Res<GuildDirectory>,
        Res<FrontierConfig>,
        Res<KeepBalanceHandle>,
        Res<KeepStoreHandle>,
        ResMut<ObserverFeed>,
        ResMut<Events<GuardDirectiveEvent>>,
    )> = SystemState::new(world);
    let (mut registry, atlas, guilds, config, balance, store, mut feed, mut directives) =
        state.get_mut(world);
    let Some(keep) = registry.get_mut(id) else {
        return Err(KeepStoreError::MissingKeep(id.0));
    };
    let balance = balance.get();
    let store = store.get();
    upgrade::change_level(
        keep,
        &atlas,
        &guilds,
        &config,
        &balance,
        store.as_ref(),
        &mut feed,
        &mut directives,
        target,
    )
}

pub fn keep_status(world: &World, id: KeepId) -> Option<KeepState> {
    let clock = world.resource::<RegionClock>();
    let config = world.resource::<FrontierConfig>();
    let registry = world.resource::<KeepRegistry>();
    let guilds = world.resource::<GuildDirectory>();
    let keep = registry.get(id)?;
    let guild_name = keep.guild.and_then(|g| guilds.name_of(g));
    Some(keep.state(clock.now_ms(), config.combat_window_ms, guild_name))
}

pub fn all_keep_status(world: &World) -> Vec<KeepState> {
    let clock = world.resource::<RegionClock>();
    let config = world.resource::<FrontierConfig>();
    let registry = world.resource::<KeepRegistry>();
    let guilds = world.resource::<GuildDirectory>();
    registry
        .iter()
        .map(|keep| {
            let guild_name = keep.guild.and_then(|g| guilds.name_of(g));
            keep.state(clock.now_ms(), config.combat_window_ms, guild_name)
        })
        .collect()
}

/// Register the observer with the region and queue its initial keep
/// sync.
pub fn observer_entered(world: &mut World, observer: Observer) {
    let now = world.resource::<RegionClock>().now_ms();
    let mut state: SystemState<(
        ResMut<RegionAtlas>,
        Res<KeepRegistry>,
        Res<GuildDirectory>,
        Res<FrontierConfig>,
        ResMut<ObserverFeed>,
    )> = SystemState::new(world);
    let (mut atlas, registry, guilds, config, mut feed) = state.get_mut(world);
    observer::observer_entered_region(
        &registry, &atlas, &guilds, &config, &mut feed, now, &observer,
    );
    atlas.upsert_observer(observer);
}

pub fn observer_left(world: &mut World, id: ObserverId) -> bool {
    world
        .resource_mut::<RegionAtlas>()
        .remove_observer(id)
        .is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::claim::ClaimRefusal;
    use crate::guild::{Guild, GuildId};
    use crate::keep::fixtures::fortress_blueprint;
    use crate::observer::{decode_feed_frame, FeedMessage};
    use crate::{build_frontier_app, run_tick};
    use bevy::prelude::App;
    use keep_schema::DoorState;

    const GUILD: GuildId = GuildId(5);

    fn seeded_app() -> (App, KeepId) {
        let mut app = build_frontier_app();
        app.world.resource_mut::<RegionAtlas>().insert_region(
            crate::region::RegionId(163),
            crate::region::RegionInfo {
                name: "The Greymarch".into(),
                frontier: true,
            },
        );
        app.world
            .resource_mut::<GuildDirectory>()
            .register(Guild::new(GUILD, "Oathbound", keep_schema::Realm::Ardan));
        let id = load_keep_into(&mut app.world, fortress_blueprint(21)).expect("load");
        app.world.resource_mut::<ObserverFeed>().drain();
        (app, id)
    }

    #[test]
    fn ticks_advance_the_region_clock() {
        let (mut app, _) = seeded_app();
        run_tick(&mut app);
        run_tick(&mut app);
        let clock = app.world.resource::<RegionClock>();
        assert_eq!(clock.now_ms(), 2 * clock.tick_ms());
    }

    #[test]
    fn armed_timers_fire_through_the_scheduler() {
        let (mut app, id) = seeded_app();
        submit_admin_claim(&mut app.world, id, "Oathbound").expect("claim");

        for _ in 0..12 {
            run_tick(&mut app);
        }

        let registry = app.world.resource::<KeepRegistry>();
        let keep = registry.get(id).expect("keep");
        assert_eq!(keep.level, 10);
        assert!(!keep.level_timer.is_armed());
        assert!(keep.bounty_timer.is_armed());
        drop(registry);

        let guilds = app.world.resource::<GuildDirectory>();
        assert!(guilds.guild(GUILD).expect("guild").realm_points > 0);
    }

    #[test]
    fn capture_command_flows_through_the_world() {
        let (mut app, id) = seeded_app();
        submit_capture(&mut app.world, id, keep_schema::Realm::Veska).expect("capture");

        let registry = app.world.resource::<KeepRegistry>();
        let keep = registry.get(id).expect("keep");
        assert_eq!(keep.realm, keep_schema::Realm::Veska);
        // The capture implies the lord fell.
        assert!(!keep.guards[&crate::guard::GuardId(1)].alive);
        drop(registry);

        let directives: Vec<_> = app
            .world
            .resource_mut::<Events<GuardDirectiveEvent>>()
            .drain()
            .collect();
        assert!(directives.iter().any(|d| {
            d.guard == crate::guard::GuardId(1) && d.directive == GuardDirective::Kill
        }));

        let events: Vec<_> = app
            .world
            .resource_mut::<Events<KeepCapturedEvent>>()
            .drain()
            .collect();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].realm, keep_schema::Realm::Veska);
    }

    #[test]
    fn status_reports_combat_and_claims() {
        let (mut app, id) = seeded_app();
        submit_admin_claim(&mut app.world, id, "Oathbound").expect("claim");
        set_keep_doors(&mut app.world, id, true);
        submit_attack(&mut app.world, id, keep_schema::Realm::Veska);

        let state = keep_status(&app.world, id).expect("status");
        assert!(state.under_siege);
        assert_eq!(state.claimed_guild.as_deref(), Some("Oathbound"));
        assert_eq!(all_keep_status(&app.world).len(), 1);
        assert!(keep_status(&app.world, KeepId(999)).is_none());
    }

    #[test]
    fn claim_refusals_surface_through_the_entry_point() {
        let (mut app, id) = seeded_app();
        submit_admin_claim(&mut app.world, id, "Oathbound").expect("claim");
        let err = submit_admin_claim(&mut app.world, id, "Oathbound").expect_err("double");
        assert!(matches!(
            err,
            ClaimError::Refused(ClaimRefusal::AlreadyClaimed)
        ));
    }

    #[test]
    fn feed_publishes_nothing_for_a_quiet_tick() {
        use bevy_ecs::system::RunSystemOnce;

        let (mut app, _) = seeded_app();
        app.world.run_system_once(publish_feed);
        assert_eq!(app.world.resource::<FeedHistory>().frames_published, 0);

        app.world
            .resource_mut::<ObserverFeed>()
            .push(FeedMessage::KeepRemoved { keep: KeepId(21) });
        app.world.run_system_once(publish_feed);
        assert_eq!(app.world.resource::<FeedHistory>().frames_published, 1);
    }

    #[test]
    fn feed_frames_publish_on_tick() {
        let (mut app, id) = seeded_app();
        submit_admin_claim(&mut app.world, id, "Oathbound").expect("claim");
        run_tick(&mut app);

        let history = app.world.resource::<FeedHistory>();
        assert!(history.frames_published >= 1);
        let frame = history.latest_frame.as_ref().expect("frame");
        let decoded = decode_feed_frame(frame).expect("decode");
        assert_eq!(decoded.header.message_count as usize, decoded.messages.len());
        assert!(decoded
            .messages
            .iter()
            .any(|m| matches!(m, FeedMessage::Broadcast { .. })));
    }

    #[test]
    fn door_command_toggles_every_door() {
        let (mut app, id) = seeded_app();
        assert!(set_keep_doors(&mut app.world, id, true));
        {
            let registry = app.world.resource::<KeepRegistry>();
            assert!(registry.get(id).expect("keep").any_door_open());
        }
        assert!(set_keep_doors(&mut app.world, id, false));
        let registry = app.world.resource::<KeepRegistry>();
        assert!(registry
            .get(id)
            .expect("keep")
            .doors
            .values()
            .all(|d| d.state == DoorState::Closed));
    }

    #[test]
    fn observer_entry_syncs_and_departure_clears() {
        let (mut app, _) = seeded_app();
        let observer = Observer {
            id: ObserverId(7),
            name: "scout".into(),
            region: crate::region::RegionId(163),
            x: 51_000,
            y: 30_000,
            z: 8_000,
            heading: 0,
            realm: keep_schema::Realm::Ardan,
            guild: None,
            group: None,
            playing: true,
            staff: false,
        };
        observer_entered(&mut app.world, observer);

        {
            let atlas = app.world.resource::<RegionAtlas>();
            assert!(atlas.observer(ObserverId(7)).is_some());
        }
        let messages = app.world.resource_mut::<ObserverFeed>().drain();
        let keep_infos = messages
            .iter()
            .filter(|m| matches!(m, FeedMessage::KeepInfo { .. }))
            .count();
        let section_infos = messages
            .iter()
            .filter(|m| matches!(m, FeedMessage::SectionInfo { .. }))
            .count();
        assert_eq!(keep_infos, 1);
        assert_eq!(section_infos, 2);

        assert!(observer_left(&mut app.world, ObserverId(7)));
        assert!(!observer_left(&mut app.world, ObserverId(7)));
    }

    #[test]
    fn unknown_keeps_are_reported_by_entry_points() {
        let (mut app, _) = seeded_app();
        assert!(!submit_attack(
            &mut app.world,
            KeepId(999),
            keep_schema::Realm::Veska
        ));
        assert!(!set_keep_doors(&mut app.world, KeepId(999), true));
        assert!(matches!(
            submit_level(&mut app.world, KeepId(999), 5),
            Err(KeepStoreError::MissingKeep(999))
        ));
    }
}

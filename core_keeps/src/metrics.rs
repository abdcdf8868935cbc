use bevy::prelude::*;

use crate::config::FrontierConfig;
use crate::keep::KeepRegistry;
use crate::observer::ObserverFeed;
use crate::region::{RegionAtlas, RegionClock};

#[derive(Resource, Default, Debug, Clone)]
pub struct FrontierMetrics {
    pub ticks: u64,
    pub keeps: u32,
    pub claimed_keeps: u32,
    pub keeps_in_combat: u32,
    pub armed_timers: u32,
    pub observers: u32,
    pub feed_messages: u64,
}

pub fn collect_metrics(
    clock: Res<RegionClock>,
    config: Res<FrontierConfig>,
    registry: Res<KeepRegistry>,
    atlas: Res<RegionAtlas>,
    feed: Res<ObserverFeed>,
    mut metrics: ResMut<FrontierMetrics>,
) {
    metrics.ticks += 1;
    let now = clock.now_ms();
    let mut claimed = 0u32;
    let mut fighting = 0u32;
    let mut armed = 0u32;

    for keep in registry.iter() {
        if keep.guild.is_some() {
            claimed += 1;
        }
        if keep.in_combat(now, config.combat_window_ms) {
            fighting += 1;
        }
        if keep.level_timer.is_armed() {
            armed += 1;
        }
        if keep.bounty_timer.is_armed() {
            armed += 1;
        }
    }

    metrics.keeps = registry.len() as u32;
    metrics.claimed_keeps = claimed;
    metrics.keeps_in_combat = fighting;
    metrics.armed_timers = armed;
    metrics.observers = atlas.observer_count() as u32;
    metrics.feed_messages = feed.published_total();
}

#[cfg(test)]
mod tests {
    use bevy_ecs::system::RunSystemOnce;
    use keep_schema::{DoorState, KeepKind, Realm};

    use super::*;
    use crate::guild::GuildId;
    use crate::keep::fixtures::keep_row;
    use crate::keep::{Keep, KeepId, KeepRegistry};
    use crate::observer::FeedMessage;
    use crate::region::{Observer, ObserverId, RegionId};
    use crate::structures::KeepDoor;

    #[test]
    fn counters_track_registry_atlas_and_feed() {
        let mut world = World::new();
        let config = FrontierConfig::default();
        let window = config.combat_window_ms;
        world.insert_resource(RegionClock::new(config.tick_ms));
        world.insert_resource(config);

        let mut registry = KeepRegistry::default();
        let mut contested = Keep::from_row(keep_row(11, KeepKind::Fortress));
        contested.guild = Some(GuildId(3));
        contested.bounty_timer.arm(0, 1_000);
        contested.doors.insert(
            900,
            KeepDoor {
                id: 900,
                name: "Gate".into(),
                x: 0,
                y: 0,
                z: 0,
                heading: 0,
                state: DoorState::Open,
                health: 1,
                max_health: 1,
                level: 0,
                realm: Realm::Ardan,
            },
        );
        contested.record_attack(0, window);
        registry.insert(contested);
        registry.insert(Keep::from_row(keep_row(12, KeepKind::Tower)));
        world.insert_resource(registry);

        let mut atlas = RegionAtlas::default();
        atlas.upsert_observer(Observer {
            id: ObserverId(1),
            name: "Maela".into(),
            region: RegionId(163),
            x: 0,
            y: 0,
            z: 0,
            heading: 0,
            realm: Realm::Ardan,
            guild: None,
            group: None,
            playing: true,
            staff: false,
        });
        world.insert_resource(atlas);

        let mut feed = ObserverFeed::default();
        feed.push(FeedMessage::KeepRemoved { keep: KeepId(99) });
        feed.drain();
        world.insert_resource(feed);
        world.insert_resource(FrontierMetrics::default());

        world.run_system_once(collect_metrics);
        let metrics = world.resource::<FrontierMetrics>();
        assert_eq!(metrics.ticks, 1);
        assert_eq!(metrics.keeps, 2);
        assert_eq!(metrics.claimed_keeps, 1);
        assert_eq!(metrics.keeps_in_combat, 1);
        assert_eq!(metrics.armed_timers, 1);
        assert_eq!(metrics.observers, 1);
        assert_eq!(metrics.feed_messages, 1);

        world.run_system_once(collect_metrics);
        assert_eq!(world.resource::<FrontierMetrics>().ticks, 2);
    }
}

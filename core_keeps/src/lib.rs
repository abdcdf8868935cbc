//! Core keep-warfare crate for the Greymarch frontier server.
//!
//! Models the fortified keeps of one frontier region: ownership, guild
//! claims, level drift, sieges, and the capture reset. All mutation runs
//! on a single region schedule; one call to [`run_tick`] advances the
//! clock, fires due keep timers, and publishes the queued observer feed
//! as one encoded frame.

mod capture;
mod claim;
mod combat;
pub mod config;
mod events;
mod guard;
mod guild;
mod keep;
pub mod metrics;
pub mod network;
mod observer;
mod rebalance;
mod region;
mod structures;
mod systems;
mod timer;
mod upgrade;

use std::sync::Arc;

use bevy::prelude::*;
use rand::rngs::SmallRng;
use rand::SeedableRng;

use keep_runtime::{BaselineRules, MemoryKeepStore};

pub use capture::reset_keep;
pub use claim::{
    admin_claim, bounty_timer_fired, check_claim, check_release, claim_keep, release_keep,
    ClaimError, ClaimRefusal, ReleaseRefusal,
};
pub use combat::SiegeState;
pub use config::{
    load_keep_balance_from_env, FrontierConfig, KeepBalance, KeepBalanceError, KeepBalanceHandle,
    RulesetHandle,
};
pub use events::{GuardDirective, GuardDirectiveEvent, KeepCapturedEvent, KeepClaimedEvent};
pub use guard::{
    garrison_flags, guard_base_level, patrol_member_level, set_guard_level, GarrisonFlags, GuardId,
    GuardKind, GuardPost,
};
pub use guild::{Guild, GuildDirectory, GuildId};
pub use keep::{
    load_keep, persist_keep, reload_from_row, remove_keep, set_keep_id, FrontierRng, Keep,
    KeepBlueprint, KeepId, KeepRegistry, KeepStoreHandle,
};
pub use metrics::FrontierMetrics;
pub use observer::{
    decode_feed_frame, encode_feed_frame, observer_entered_region, BroadcastScope, FeedFrame,
    FeedHistory, FeedMessage, ObserverFeed,
};
pub use rebalance::{update_base_levels, update_keep_count_bonuses, KeepCountBonuses};
pub use region::{
    planar_distance, GroupId, KeepArea, Observer, ObserverId, RegionAtlas, RegionClock, RegionId,
    RegionInfo, WorldDoor,
};
pub use structures::{
    BannerKind, HookOccupant, HookPoint, KeepBanner, KeepDoor, KeepSection, Patrol,
};
pub use systems::{
    all_keep_status, keep_status, load_keep_into, observer_entered, observer_left, set_keep_doors,
    submit_admin_claim, submit_attack, submit_capture, submit_claim, submit_level, submit_release,
};
pub use timer::KeepTimer;
pub use upgrade::{change_level, level_timer_fired, start_level_drift, RelicTally};

/// Construct a Bevy [`App`] configured with the Greymarch region
/// pipeline and an in-memory store. Callers load keeps and register
/// guilds before the first tick.
pub fn build_frontier_app() -> App {
    let mut app = App::new();

    let config = FrontierConfig::default();
    let balance = config::load_keep_balance_from_env();
    let rng = FrontierRng(SmallRng::seed_from_u64(config.rng_seed));

    app.insert_resource(RegionClock::new(config.tick_ms))
        .insert_resource(KeepRegistry::default())
        .insert_resource(RegionAtlas::default())
        .insert_resource(GuildDirectory::default())
        .insert_resource(ObserverFeed::default())
        .insert_resource(FeedHistory::default())
        .insert_resource(RelicTally::default())
        .insert_resource(KeepCountBonuses::default())
        .insert_resource(KeepBalanceHandle::new(balance))
        .insert_resource(RulesetHandle::new(Arc::new(BaselineRules::default())))
        .insert_resource(KeepStoreHandle::new(Arc::new(MemoryKeepStore::new())))
        .insert_resource(rng)
        .insert_resource(config)
        .add_event::<KeepClaimedEvent>()
        .add_event::<KeepCapturedEvent>()
        .add_event::<GuardDirectiveEvent>()
        .add_plugins(MinimalPlugins)
        .add_systems(Startup, systems::log_region_online)
        .add_systems(
            Update,
            (
                systems::advance_clock,
                systems::drive_keep_timers,
                systems::publish_feed,
            )
                .chain(),
        );

    app
}

/// Advance the region by one scheduler tick.
///
/// Each call runs the chained systems configured in
/// [`build_frontier_app`] (clock → keep timers → feed publication).
/// Callers are responsible for frame fanout and command handling.
pub fn run_tick(app: &mut App) {
    app.update();
}

//! Capture reset protocol.
//!
//! Invoked when a keep's lord falls to another realm. One pass hands the
//! keep over: ownership, level, structures, doors, garrison, banners,
//! observers, and the persisted row all change together on the region
//! queue. There is no rollback; a failed save surfaces to the caller
//! with the in-memory handover already applied.

use bevy::prelude::Events;

use keep_runtime::{FrontierRuleset, KeepStore, KeepStoreError};
use keep_schema::{KeepKind, Realm};

use crate::claim::perform_release;
use crate::config::{FrontierConfig, KeepBalance};
use crate::events::{GuardDirective, GuardDirectiveEvent, KeepCapturedEvent};
use crate::guard::GuardKind;
use crate::guild::GuildDirectory;
use crate::keep::{persist_keep, Keep, KeepId, KeepRegistry};
use crate::observer::{BroadcastScope, FeedMessage, ObserverFeed};
use crate::rebalance::{self, KeepCountBonuses};
use crate::region::{planar_distance, RegionAtlas};
use crate::structures::HookOccupant;
use crate::upgrade::{change_level, RelicTally};

/// Hand the keep to `new_realm`. Runs the full reset: combat marks
/// cleared, capture announced, level dropped to the floor, any claim
/// released, structures repaired and resynced, doors shut, observers
/// clamped below the roofline, garrison cycled, banners re-flagged, the
/// frontier rebalanced where enabled, and the row saved.
#[allow(clippy::too_many_arguments)]
pub fn reset_keep(
    registry: &mut KeepRegistry,
    atlas: &RegionAtlas,
    guilds: &mut GuildDirectory,
    config: &FrontierConfig,
    balance: &KeepBalance,
    rules: &dyn FrontierRuleset,
    relics: &RelicTally,
    store: &dyn KeepStore,
    feed: &mut ObserverFeed,
    directives: &mut Events<GuardDirectiveEvent>,
    captured: &mut Events<KeepCapturedEvent>,
    bonuses: &mut KeepCountBonuses,
    now_ms: u64,
    id: KeepId,
    new_realm: Realm,
) -> Result<(), KeepStoreError> {
    let is_border = {
        let keep = registry
            .get_mut(id)
            .ok_or(KeepStoreError::MissingKeep(id.0))?;

        keep.siege.reset();

        keep.realm = new_realm;
        feed.push(FeedMessage::Broadcast {
            scope: BroadcastScope::Realm(new_realm),
            text: format!(
                "The forces of {} have captured {}!",
                new_realm.as_str(),
                keep.display_name(config.debug_names)
            ),
        });

        change_level(
            keep,
            atlas,
            guilds,
            config,
            balance,
            store,
            feed,
            directives,
            config.starting_level,
        )?;

        if keep.guild.is_some() {
            perform_release(keep, guilds, config, rules, relics, store, feed, now_ms)?;
        }

        let keep_id = keep.id;
        for section in &mut keep.sections {
            if !section.razed {
                section.repair_to_full();
            }
            for hook in section.hook_points.values_mut() {
                if let Some(occupant) = hook.occupant.take() {
                    if let HookOccupant::Guard(guard) = occupant {
                        directives.send(GuardDirectiveEvent {
                            keep: keep_id,
                            guard,
                            directive: GuardDirective::Despawn,
                        });
                    }
                }
            }
        }
        let sections: Vec<_> = keep.sections.iter().map(|s| s.state(keep_id.0)).collect();
        feed.push(FeedMessage::SectionResync {
            keep: keep_id,
            sections,
        });

        for door in keep.doors.values_mut() {
            door.reset(new_realm);
        }

        reposition_observers_above_roofline(keep, atlas, store, balance, config, feed);

        for guard in keep.guards.values_mut() {
            match guard.kind {
                // A surviving lord keeps standing; a dead one is the
                // actor layer's respawn to run.
                GuardKind::Lord => {}
                GuardKind::MissionMaster => {
                    guard.alive = true;
                    guard.realm = new_realm;
                    guard.guild = None;
                    directives.send(GuardDirectiveEvent {
                        keep: keep_id,
                        guard: guard.id,
                        directive: GuardDirective::Respawn,
                    });
                }
                _ => {
                    guard.alive = false;
                    guard.realm = new_realm;
                    guard.guild = None;
                    directives.send(GuardDirectiveEvent {
                        keep: keep_id,
                        guard: guard.id,
                        directive: GuardDirective::Kill,
                    });
                }
            }
        }

        for banner in keep.banners.values_mut() {
            banner.change_realm(new_realm);
        }

        keep.is_border_keep()
    };

    if !is_border && config.keep_rebalancing_enabled {
        rebalance::update_base_levels(registry, config, balance);
    }
    if config.live_keep_count_bonuses {
        rebalance::update_keep_count_bonuses(registry, bonuses);
    }

    let keep = registry
        .get_mut(id)
        .ok_or(KeepStoreError::MissingKeep(id.0))?;
    persist_keep(keep, guilds, store)?;

    captured.send(KeepCapturedEvent {
        keep: id,
        realm: new_realm,
    });
    tracing::info!(
        target: "greymarch::capture",
        keep = %id,
        realm = ?new_realm,
        "capture.reset"
    );
    Ok(())
}

/// Clamp observers standing above the keep's core back down onto it.
/// The core section and the roof hook fixture are data; any of them can
/// be absent, in which case there is nothing to clamp against and the
/// pass is skipped (a missing fixture row is worth a warning, since the
/// catalog should cover every height band).
pub(crate) fn reposition_observers_above_roofline(
    keep: &Keep,
    atlas: &RegionAtlas,
    store: &dyn KeepStore,
    balance: &KeepBalance,
    config: &FrontierConfig,
    feed: &mut ObserverFeed,
) {
    let (radius, skin) = match keep.kind {
        KeepKind::Tower => (balance.tower_reposition_radius, balance.tower_core_skin),
        KeepKind::Fortress => (
            balance.fortress_reposition_radius,
            balance.fortress_core_skin,
        ),
    };
    let Some(section) = keep.sections.iter().find(|s| s.skin == skin) else {
        return;
    };
    let Some(hook) = section.hook_points.get(&balance.roof_hook_id) else {
        return;
    };
    let fixture = match store.hook_height(balance.roof_hook_id, keep.height()) {
        Ok(Some(row)) => row,
        Ok(None) => {
            tracing::warn!(
                target: "greymarch::capture",
                keep = %keep.id,
                hook = balance.roof_hook_id,
                height = keep.height(),
                "roofline.fixture_missing"
            );
            return;
        }
        Err(err) => {
            tracing::warn!(
                target: "greymarch::capture",
                keep = %keep.id,
                error = %err,
                "roofline.fixture_lookup_failed"
            );
            return;
        }
    };

    let ceiling_z = section.z + fixture.z;
    for observer in
        atlas.observers_within(keep.region(), section.x, section.y, config.visibility_distance)
    {
        if planar_distance(observer.x, observer.y, hook.x, hook.y) > f64::from(radius) {
            continue;
        }
        if observer.z > ceiling_z {
            feed.push(FeedMessage::Reposition {
                observer: observer.id,
                x: observer.x,
                y: observer.y,
                z: ceiling_z,
                heading: observer.heading,
            });
        }
    }
}

//! Frontier-wide adjustments run after a capture.
//!
//! Both passes iterate a point-in-time snapshot of keep ids, so a keep
//! removed mid-pass is simply skipped. Border keeps anchor frontier
//! entrances and never rebalance.

use bevy::prelude::Resource;

use keep_schema::{KeepKind, Realm};

use crate::config::{FrontierConfig, KeepBalance};
use crate::keep::{refresh_garrison_levels, KeepRegistry};

/// Keeps and towers held per claimable realm. Reward code outside this
/// crate scales realm-point gains from these counts.
#[derive(Resource, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KeepCountBonuses {
    pub fortresses: [u32; 3],
    pub towers: [u32; 3],
}

impl KeepCountBonuses {
    pub fn fortresses_held(&self, realm: Realm) -> u32 {
        realm.table_index().map_or(0, |index| self.fortresses[index])
    }

    pub fn towers_held(&self, realm: Realm) -> u32 {
        realm.table_index().map_or(0, |index| self.towers[index])
    }
}

/// Normalize every non-border keep to the claimable base level and
/// refresh garrison levels to match.
pub fn update_base_levels(
    registry: &mut KeepRegistry,
    config: &FrontierConfig,
    balance: &KeepBalance,
) {
    for id in registry.ids() {
        let Some(keep) = registry.get_mut(id) else {
            continue;
        };
        if keep.is_border_keep() {
            continue;
        }
        if keep.base_level() != config.claimable_base_level {
            keep.set_base_level(config.claimable_base_level);
            tracing::debug!(
                target: "greymarch::capture",
                keep = %id,
                base_level = config.claimable_base_level,
                "rebalance.base_level_normalized"
            );
        }
        refresh_garrison_levels(keep, balance);
    }
}

/// Recount keeps and towers per realm.
pub fn update_keep_count_bonuses(registry: &KeepRegistry, bonuses: &mut KeepCountBonuses) {
    let mut next = KeepCountBonuses::default();
    for keep in registry.iter() {
        let Some(index) = keep.realm.table_index() else {
            continue;
        };
        match keep.kind {
            KeepKind::Fortress => next.fortresses[index] += 1,
            KeepKind::Tower => next.towers[index] += 1,
        }
    }
    *bonuses = next;
    tracing::debug!(
        target: "greymarch::capture",
        fortresses = ?bonuses.fortresses,
        towers = ?bonuses.towers,
        "rebalance.counts_updated"
    );
}

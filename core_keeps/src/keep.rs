//! The keep record: identity, live state, attached parts, and lifecycle.
//!
//! A keep is assembled from a blueprint (static definition of sections,
//! doors, guards, banners, patrols) overlaid with whatever the store
//! remembers about it. Everything downstream (claims, level drift,
//! captures) mutates the record through the owning region's queue.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use bevy::prelude::{Events, Resource};
use rand::rngs::SmallRng;
use serde::{Deserialize, Serialize};

use keep_runtime::{FrontierRuleset, KeepStore, KeepStoreError, KeepValuation};
use keep_schema::{KeepKind, KeepRow, KeepShape, KeepState, Realm, ServerKind};

use crate::combat::SiegeState;
use crate::config::{FrontierConfig, KeepBalance};
use crate::events::{GuardDirective, GuardDirectiveEvent};
use crate::guard::{
    garrison_flags, patrol_member_level, set_guard_level, GarrisonFlags, GuardId, GuardPost,
};
use crate::guild::{GuildDirectory, GuildId};
use crate::observer::{FeedMessage, ObserverFeed};
use crate::region::{planar_distance, KeepArea, RegionAtlas, RegionId, WorldDoor};
use crate::structures::{KeepBanner, KeepDoor, KeepSection, Patrol};
use crate::timer::KeepTimer;
use crate::upgrade::{self, RelicTally};

/// Identifier of a keep within one shard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct KeepId(pub u16);

impl fmt::Display for KeepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Static definition of a keep and its attached parts, merged with the
/// persisted row on load.
#[derive(Debug, Clone)]
pub struct KeepBlueprint {
    pub row: KeepRow,
    pub sections: Vec<KeepSection>,
    pub doors: Vec<KeepDoor>,
    pub guards: Vec<GuardPost>,
    pub banners: Vec<KeepBanner>,
    pub patrols: Vec<Patrol>,
}

/// One loaded keep.
#[derive(Debug, Clone)]
pub struct Keep {
    pub id: KeepId,
    /// Persisted record, re-synced on every save.
    pub row: KeepRow,
    pub realm: Realm,
    pub kind: KeepKind,
    pub shape: KeepShape,
    pub level: u8,
    /// Where the level machine is currently heading.
    pub target_level: u8,
    pub guild: Option<GuildId>,
    /// Per-claimable-realm difficulty multipliers.
    pub difficulty: [u8; 3],
    pub siege: SiegeState,
    pub level_timer: KeepTimer,
    pub bounty_timer: KeepTimer,
    pub sections: Vec<KeepSection>,
    pub doors: BTreeMap<u32, KeepDoor>,
    pub guards: BTreeMap<GuardId, GuardPost>,
    pub banners: BTreeMap<u16, KeepBanner>,
    pub patrols: BTreeMap<u16, Patrol>,
    /// Rebalanced base level; zero falls through to the persisted row.
    base_level: u8,
}

impl Keep {
    pub fn from_row(row: KeepRow) -> Self {
        let realm = Realm::from_u8(row.realm).unwrap_or_default();
        let kind = KeepKind::from_u8(row.kind).unwrap_or_default();
        let shape = KeepShape::from_u8(row.shape).unwrap_or_default();
        let level = row.level;
        let difficulty = [
            row.difficulty_ardan,
            row.difficulty_veska,
            row.difficulty_morwen,
        ];
        Self {
            id: KeepId(row.keep_id),
            realm,
            kind,
            shape,
            level,
            target_level: level,
            guild: None,
            difficulty,
            siege: SiegeState::default(),
            level_timer: KeepTimer::default(),
            bounty_timer: KeepTimer::default(),
            sections: Vec::new(),
            doors: BTreeMap::new(),
            guards: BTreeMap::new(),
            banners: BTreeMap::new(),
            patrols: BTreeMap::new(),
            base_level: 0,
            row,
        }
    }

    pub fn name(&self) -> &str {
        &self.row.name
    }

    pub fn display_name(&self, debug_names: bool) -> String {
        if debug_names {
            format!("{} KID: {}", self.row.name, self.id)
        } else {
            self.row.name.clone()
        }
    }

    pub fn region(&self) -> RegionId {
        RegionId(self.row.region)
    }

    /// Rebalanced value when set, the persisted one otherwise.
    pub fn base_level(&self) -> u8 {
        if self.base_level != 0 {
            self.base_level
        } else {
            self.row.base_level
        }
    }

    pub fn set_base_level(&mut self, level: u8) {
        self.base_level = level;
    }

    /// Level reported to clients, one under the stored value.
    pub fn effective_level(&self) -> u8 {
        self.level.saturating_sub(1)
    }

    /// Structural height band for the current level.
    pub fn height(&self) -> u8 {
        match self.level {
            0..=4 => 0,
            5..=6 => 1,
            7..=8 => 2,
            _ => 3,
        }
    }

    /// Border keeps anchor a frontier entrance and are exempt from
    /// rebalancing. Multi-section towers and anything persisted at a
    /// triple-digit base level qualify.
    pub fn is_border_keep(&self) -> bool {
        (self.kind == KeepKind::Tower && self.sections.len() > 1) || self.base_level() >= 100
    }

    pub fn difficulty_for(&self, realm: Realm) -> u8 {
        realm
            .table_index()
            .map_or(0, |index| self.difficulty[index])
    }

    /// Difficulty for the realm currently holding the keep.
    pub fn difficulty(&self) -> u8 {
        self.difficulty_for(self.realm)
    }

    pub fn valuation(&self) -> KeepValuation {
        KeepValuation {
            kind: self.kind,
            level: self.level,
            base_level: self.base_level(),
            difficulty: self.difficulty(),
            realm: self.realm,
        }
    }

    pub fn realm_point_value(&self, rules: &dyn FrontierRuleset) -> u32 {
        rules.realm_point_value(&self.valuation())
    }

    pub fn bounty_point_value(&self, rules: &dyn FrontierRuleset) -> u32 {
        rules.bounty_point_value(&self.valuation())
    }

    pub fn experience_value(&self, rules: &dyn FrontierRuleset) -> u64 {
        rules.experience_value(&self.valuation())
    }

    pub fn experience_cap(&self, rules: &dyn FrontierRuleset) -> f64 {
        rules.experience_cap(&self.valuation())
    }

    pub fn coin_value(&self, rules: &dyn FrontierRuleset) -> u64 {
        rules.coin_value(&self.valuation())
    }

    pub fn lord_respawn_ms(
        &self,
        rules: &dyn FrontierRuleset,
        server: ServerKind,
        rng: &mut SmallRng,
    ) -> u64 {
        rules.lord_respawn_ms(self.realm, server, rng)
    }

    pub fn any_door_open(&self) -> bool {
        self.doors.values().any(KeepDoor::is_open)
    }

    /// Record a hostile hit against this keep or one of its parts.
    pub fn record_attack(&mut self, now_ms: u64, window_ms: u64) {
        let door_open = self.any_door_open();
        self.siege.record_attack(now_ms, window_ms, door_open);
    }

    pub fn in_combat(&self, now_ms: u64, window_ms: u64) -> bool {
        self.siege.in_combat(now_ms, window_ms)
    }

    pub fn garrison(&self) -> GarrisonFlags {
        garrison_flags(self.guards.values())
    }

    pub fn section(&self, id: u8) -> Option<&KeepSection> {
        self.sections.iter().find(|s| s.id == id)
    }

    pub fn section_mut(&mut self, id: u8) -> Option<&mut KeepSection> {
        self.sections.iter_mut().find(|s| s.id == id)
    }

    /// Observer-facing summary.
    pub fn state(&self, now_ms: u64, window_ms: u64, guild_name: Option<&str>) -> KeepState {
        KeepState {
            keep_id: self.id.0,
            name: self.row.name.clone(),
            realm: self.realm,
            kind: self.kind,
            shape: self.shape,
            level: self.level,
            base_level: self.base_level(),
            x: self.row.x,
            y: self.row.y,
            z: self.row.z,
            heading: self.row.heading,
            claimed_guild: guild_name.map(str::to_owned),
            under_siege: self.in_combat(now_ms, window_ms),
        }
    }

    /// Copy live state back onto the persisted row.
    pub fn sync_row(&mut self, guild_name: Option<&str>) {
        self.row.level = self.level;
        self.row.realm = self.realm as u8;
        self.row.claimed_guild = guild_name.unwrap_or_default().to_owned();
    }
}

/// All keeps owned by this region queue.
#[derive(Resource, Debug, Default)]
pub struct KeepRegistry {
    keeps: BTreeMap<KeepId, Keep>,
}

impl KeepRegistry {
    pub fn insert(&mut self, keep: Keep) {
        self.keeps.insert(keep.id, keep);
    }

    pub fn get(&self, id: KeepId) -> Option<&Keep> {
        self.keeps.get(&id)
    }

    pub fn get_mut(&mut self, id: KeepId) -> Option<&mut Keep> {
        self.keeps.get_mut(&id)
    }

    pub fn remove(&mut self, id: KeepId) -> Option<Keep> {
        self.keeps.remove(&id)
    }

    pub fn contains(&self, id: KeepId) -> bool {
        self.keeps.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.keeps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keeps.is_empty()
    }

    /// Point-in-time id snapshot for iterations that mutate the map.
    pub fn ids(&self) -> Vec<KeepId> {
        self.keeps.keys().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Keep> {
        self.keeps.values()
    }

    /// Closest keep to a spot within `radius`, if any.
    pub fn keep_near_spot(&self, region: RegionId, x: i32, y: i32, radius: u32) -> Option<KeepId> {
        let mut best: Option<(KeepId, f64)> = None;
        for keep in self.keeps.values() {
            if keep.region() != region {
                continue;
            }
            let distance = planar_distance(keep.row.x, keep.row.y, x, y);
            if distance <= f64::from(radius) && best.map_or(true, |(_, d)| distance < d) {
                best = Some((keep.id, distance));
            }
        }
        best.map(|(id, _)| id)
    }
}

/// Shared handle to the persistence backend.
#[derive(Resource, Clone)]
pub struct KeepStoreHandle(Arc<dyn KeepStore>);

impl KeepStoreHandle {
    pub fn new(store: Arc<dyn KeepStore>) -> Self {
        Self(store)
    }

    pub fn get(&self) -> Arc<dyn KeepStore> {
        self.0.clone()
    }
}

/// Deterministic rng for respawn variance.
#[derive(Resource)]
pub struct FrontierRng(pub SmallRng);

/// Recompute guard, patrol, and door levels from the keep's current
/// level. Sections are handled by the callers since section updates also
/// redistribute hooks and notify observers.
pub(crate) fn refresh_garrison_levels(keep: &mut Keep, balance: &KeepBalance) {
    let kind = keep.kind;
    let base_level = keep.base_level();
    let level = keep.level;
    for guard in keep.guards.values_mut() {
        set_guard_level(guard, kind, base_level, level, balance);
    }
    let member_level = patrol_member_level(kind, base_level, level, balance);
    for patrol in keep.patrols.values_mut() {
        patrol.level = member_level;
    }
    let effective = keep.effective_level();
    for door in keep.doors.values_mut() {
        door.update_level(effective);
    }
}

/// Bring a keep into the world: merge the persisted row over the
/// blueprint, resolve the claimant, arm whichever timers the persisted
/// state calls for, and register world presence.
#[allow(clippy::too_many_arguments)]
pub fn load_keep(
    registry: &mut KeepRegistry,
    atlas: &mut RegionAtlas,
    guilds: &mut GuildDirectory,
    config: &FrontierConfig,
    balance: &KeepBalance,
    rules: &dyn FrontierRuleset,
    relics: &RelicTally,
    store: &dyn KeepStore,
    feed: &mut ObserverFeed,
    now_ms: u64,
    blueprint: KeepBlueprint,
) -> Result<KeepId, KeepStoreError> {
    let row = match store.load_keep(blueprint.row.keep_id)? {
        Some(row) => row,
        None => {
            store.save_keep(&blueprint.row)?;
            blueprint.row.clone()
        }
    };

    let mut keep = Keep::from_row(row);
    keep.sections = blueprint.sections;
    for door in blueprint.doors {
        keep.doors.insert(door.id, door);
    }
    for guard in blueprint.guards {
        keep.guards.insert(guard.id, guard);
    }
    for banner in blueprint.banners {
        keep.banners.insert(banner.id, banner);
    }
    for patrol in blueprint.patrols {
        keep.patrols.insert(patrol.id, patrol);
    }

    let stored_sections = store.load_sections(keep.id.0)?;
    if stored_sections.is_empty() {
        for section in &keep.sections {
            store.save_section(&section.to_row(keep.id.0))?;
        }
    } else {
        for section_row in &stored_sections {
            if let Some(section) = keep.section_mut(section_row.section_id) {
                section.apply_row(section_row);
            }
        }
    }

    if !keep.row.claimed_guild.is_empty() {
        match guilds.find_by_name(&keep.row.claimed_guild) {
            Some(guild) => {
                keep.guild = Some(guild);
                guilds.add_claim(guild, keep.id);
                keep.bounty_timer.arm(now_ms, 1);
            }
            None => {
                tracing::warn!(
                    target: "greymarch::claim",
                    keep = %keep.id,
                    guild = %keep.row.claimed_guild,
                    "keep.claimed_guild_missing"
                );
            }
        }
    }

    let effective = keep.effective_level();
    for section in &mut keep.sections {
        section.update_level(effective);
    }
    refresh_garrison_levels(&mut keep, balance);

    if keep.guild.is_some() && keep.level < config.max_level {
        upgrade::start_level_drift(&mut keep, config.max_level, now_ms, config, rules, relics, feed);
    } else if keep.guild.is_none()
        && keep.level > config.starting_level
        && keep.level <= config.max_level
    {
        upgrade::start_level_drift(
            &mut keep,
            config.starting_level,
            now_ms,
            config,
            rules,
            relics,
            feed,
        );
    }

    atlas.register_area(KeepArea {
        keep: keep.id,
        name: keep.row.name.clone(),
        region: keep.region(),
        x: keep.row.x,
        y: keep.row.y,
        radius: config.keep_area_radius,
    });

    let id = keep.id;
    tracing::info!(
        target: "greymarch::keep",
        keep = %id,
        name = %keep.row.name,
        realm = ?keep.realm,
        level = keep.level,
        "keep.loaded"
    );
    registry.insert(keep);
    Ok(id)
}

/// Write the keep row and all section rows back to the store.
pub fn persist_keep(
    keep: &mut Keep,
    guilds: &GuildDirectory,
    store: &dyn KeepStore,
) -> Result<(), KeepStoreError> {
    let guild_name = keep
        .guild
        .and_then(|g| guilds.name_of(g))
        .map(str::to_owned);
    keep.sync_row(guild_name.as_deref());
    store.save_keep(&keep.row)?;
    for section in &keep.sections {
        store.save_section(&section.to_row(keep.id.0))?;
    }
    Ok(())
}

/// Re-derive live fields from the persisted row after a save, so claim
/// flows observe exactly what a fresh load would.
pub fn reload_from_row(keep: &mut Keep, guilds: &GuildDirectory) {
    keep.level = keep.row.level;
    keep.realm = Realm::from_u8(keep.row.realm).unwrap_or_default();
    keep.difficulty = [
        keep.row.difficulty_ardan,
        keep.row.difficulty_veska,
        keep.row.difficulty_morwen,
    ];
    keep.guild = if keep.row.claimed_guild.is_empty() {
        None
    } else {
        guilds.find_by_name(&keep.row.claimed_guild)
    };
}

/// Tear a keep out of the world: despawn directives for its guards,
/// demote its doors to plain world doors, drop its area, and delete the
/// persisted rows.
pub fn remove_keep(
    registry: &mut KeepRegistry,
    atlas: &mut RegionAtlas,
    guilds: &mut GuildDirectory,
    store: &dyn KeepStore,
    feed: &mut ObserverFeed,
    directives: &mut Events<GuardDirectiveEvent>,
    id: KeepId,
) -> Result<(), KeepStoreError> {
    let Some(mut keep) = registry.remove(id) else {
        return Err(KeepStoreError::MissingKeep(id.0));
    };

    keep.level_timer.stop();
    keep.bounty_timer.stop();
    if let Some(guild) = keep.guild {
        guilds.drop_claim(guild, id);
    }

    let guard_ids: Vec<GuardId> = keep.guards.keys().copied().collect();
    for guard in guard_ids {
        directives.send(GuardDirectiveEvent {
            keep: id,
            guard,
            directive: GuardDirective::Despawn,
        });
    }

    let region = keep.region();
    for door in keep.doors.values() {
        atlas.register_world_door(WorldDoor {
            door_id: door.id,
            region,
            x: door.x,
            y: door.y,
            z: door.z,
            heading: door.heading,
            level: door.level,
            realm: door.realm,
            state: keep_schema::DoorState::Closed,
        });
    }

    atlas.remove_area(id);

    for section in &keep.sections {
        match store.delete_section(id.0, section.id) {
            Ok(()) | Err(KeepStoreError::MissingSection { .. }) => {}
            Err(err) => return Err(err),
        }
    }
    match store.delete_keep(id.0) {
        Ok(()) => {
            tracing::info!(target: "greymarch::keep", keep = %id, "keep.removed");
        }
        Err(KeepStoreError::MissingKeep(_)) => {
            tracing::warn!(target: "greymarch::keep", keep = %id, "keep.row_missing_on_delete");
        }
        Err(err) => return Err(err),
    }

    feed.push(FeedMessage::KeepRemoved { keep: id });
    Ok(())
}

/// Reassign a keep's id. Observers drop the old entry and receive the
/// keep again under the new id.
pub fn set_keep_id(
    registry: &mut KeepRegistry,
    guilds: &GuildDirectory,
    feed: &mut ObserverFeed,
    config: &FrontierConfig,
    now_ms: u64,
    old: KeepId,
    new: KeepId,
) -> Result<(), KeepStoreError> {
    let Some(mut keep) = registry.remove(old) else {
        return Err(KeepStoreError::MissingKeep(old.0));
    };
    feed.push(FeedMessage::KeepRemoved { keep: old });
    keep.id = new;
    keep.row.keep_id = new.0;
    let guild_name = keep
        .guild
        .and_then(|g| guilds.name_of(g))
        .map(str::to_owned);
    feed.push(FeedMessage::KeepInfo {
        observer: None,
        state: keep.state(now_ms, config.combat_window_ms, guild_name.as_deref()),
    });
    registry.insert(keep);
    Ok(())
}

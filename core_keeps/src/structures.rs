//! Structural pieces of a keep: wall sections, doors, banners, patrols.
//!
//! Sections are the persisted part (health and razed state survive
//! restarts); doors, banners, and patrols are rebuilt from the blueprint
//! on load and only their live state matters.

use std::collections::BTreeMap;

use keep_schema::{DoorState, Realm, SectionRow, SectionState};

use crate::guard::GuardId;
use crate::guild::GuildId;

/// Something standing on a hook point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookOccupant {
    Guard(GuardId),
    Banner(u16),
}

/// Attachment point on a section. Hooks above the keep's current height
/// band are dormant and hold nothing.
#[derive(Debug, Clone)]
pub struct HookPoint {
    pub id: u8,
    pub x: i32,
    pub y: i32,
    pub z: i32,
    pub min_height: u8,
    pub occupant: Option<HookOccupant>,
}

/// One structural component of a keep.
#[derive(Debug, Clone)]
pub struct KeepSection {
    pub id: u8,
    pub skin: u16,
    pub x: i32,
    pub y: i32,
    pub z: i32,
    /// Mirrors the keep's effective level for display.
    pub level: u8,
    pub health: u32,
    pub max_health: u32,
    pub razed: bool,
    pub hook_points: BTreeMap<u8, HookPoint>,
}

impl KeepSection {
    pub fn new(id: u8, skin: u16, x: i32, y: i32, z: i32, max_health: u32) -> Self {
        Self {
            id,
            skin,
            x,
            y,
            z,
            level: 0,
            health: max_health,
            max_health,
            razed: false,
            hook_points: BTreeMap::new(),
        }
    }

    /// Overlay persisted health and razed state.
    pub fn apply_row(&mut self, row: &SectionRow) {
        self.skin = row.skin;
        self.health = row.health.min(row.max_health);
        self.max_health = row.max_health;
        self.razed = row.razed;
    }

    pub fn to_row(&self, keep_id: u16) -> SectionRow {
        SectionRow {
            keep_id,
            section_id: self.id,
            skin: self.skin,
            health: self.health,
            max_health: self.max_health,
            razed: self.razed,
        }
    }

    pub fn state(&self, keep_id: u16) -> SectionState {
        SectionState {
            keep_id,
            section_id: self.id,
            skin: self.skin,
            level: self.level,
            health_pct: self.health_pct(),
            razed: self.razed,
        }
    }

    pub fn health_pct(&self) -> u8 {
        if self.max_health == 0 {
            return 100;
        }
        ((u64::from(self.health) * 100) / u64::from(self.max_health)) as u8
    }

    pub fn repair(&mut self, amount: u32) {
        self.health = self.health.saturating_add(amount).min(self.max_health);
    }

    pub fn repair_to_full(&mut self) {
        self.health = self.max_health;
    }

    pub fn update_level(&mut self, effective_level: u8) {
        self.level = effective_level;
    }

    pub fn add_hook(&mut self, hook: HookPoint) {
        self.hook_points.insert(hook.id, hook);
    }

    /// Drop occupants from hooks that sit above the keep's new height
    /// band. Returns them so the caller can despawn the actors.
    pub fn redistribute_hooks(&mut self, height: u8) -> Vec<HookOccupant> {
        let mut evicted = Vec::new();
        for hook in self.hook_points.values_mut() {
            if hook.min_height > height {
                if let Some(occupant) = hook.occupant.take() {
                    evicted.push(occupant);
                }
            }
        }
        evicted
    }
}

/// Keep-bound door. Reverts to a plain world door when the keep is
/// removed.
#[derive(Debug, Clone)]
pub struct KeepDoor {
    pub id: u32,
    pub name: String,
    pub x: i32,
    pub y: i32,
    pub z: i32,
    pub heading: u16,
    pub state: DoorState,
    pub health: u32,
    pub max_health: u32,
    pub level: u8,
    pub realm: Realm,
}

impl KeepDoor {
    pub fn is_open(&self) -> bool {
        self.state == DoorState::Open
    }

    pub fn update_level(&mut self, effective_level: u8) {
        self.level = effective_level;
    }

    /// Capture teardown: new realm, shut, repaired.
    pub fn reset(&mut self, realm: Realm) {
        self.realm = realm;
        self.state = DoorState::Closed;
        self.health = self.max_health;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BannerKind {
    Realm,
    Guild,
}

/// Banner flown from a section. Shows the claimant's emblem while the
/// keep is claimed, the owning realm's otherwise.
#[derive(Debug, Clone)]
pub struct KeepBanner {
    pub id: u16,
    pub kind: BannerKind,
    pub realm: Realm,
    pub guild: Option<GuildId>,
}

impl KeepBanner {
    pub fn change_guild(&mut self, realm: Realm, guild: Option<GuildId>) {
        self.realm = realm;
        self.guild = guild;
        self.kind = if guild.is_some() {
            BannerKind::Guild
        } else {
            BannerKind::Realm
        };
    }

    pub fn change_realm(&mut self, realm: Realm) {
        self.change_guild(realm, None);
    }
}

/// Guard patrol walking the keep perimeter. Member levels track the
/// keep, so the patrol stores the level its members should carry.
#[derive(Debug, Clone)]
pub struct Patrol {
    pub id: u16,
    pub name: String,
    pub level: u8,
    pub members: Vec<GuardId>,
}

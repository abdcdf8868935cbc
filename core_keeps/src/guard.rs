//! Guard roster and the guard-level formula.
//!
//! Guard behaviour (pathing, combat) lives outside this crate; what the
//! keep owns is the roster, each guard's derived level, and the kill or
//! respawn directives issued on capture.

use std::fmt;

use serde::{Deserialize, Serialize};

use keep_schema::{KeepKind, Realm};

use crate::config::KeepBalance;
use crate::guild::GuildId;

/// Identifier of a spawned guard actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GuardId(pub u32);

impl fmt::Display for GuardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Role tag. Role-dependent rules are match arms over this instead of a
/// type hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GuardKind {
    Fighter,
    Lord,
    Commander,
    /// Noncombatant speed vendor, always level 1.
    Hastener,
    PatrolLeader,
    /// Quest vendor, respawned unconditionally on capture.
    MissionMaster,
}

impl GuardKind {
    pub fn is_lord(self) -> bool {
        self == GuardKind::Lord
    }
}

bitflags::bitflags! {
    /// Which special roles the keep currently fields alive.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct GarrisonFlags: u8 {
        const HAS_LORD = 1;
        const HAS_COMMANDER = 1 << 1;
        const HAS_HASTENER = 1 << 2;
    }
}

/// One guard slot on the keep roster.
#[derive(Debug, Clone)]
pub struct GuardPost {
    pub id: GuardId,
    pub name: String,
    pub kind: GuardKind,
    pub level: u8,
    pub alive: bool,
    pub realm: Realm,
    /// Claimant livery; cleared on release and capture.
    pub guild: Option<GuildId>,
    /// Structural section the guard is attached to. `None` for guards
    /// posted outside the walls.
    pub section: Option<u8>,
}

/// Base level before the keep-level bonus.
pub fn guard_base_level(
    kind: GuardKind,
    attached: bool,
    keep_kind: KeepKind,
    keep_base_level: u8,
) -> u8 {
    let base = u16::from(keep_base_level);
    let level = if !attached {
        if kind.is_lord() {
            75
        } else {
            65
        }
    } else if kind.is_lord() {
        match keep_kind {
            KeepKind::Fortress => base + ((base / 10) + 1) * 2,
            KeepKind::Tower => base + 2,
        }
    } else {
        match keep_kind {
            KeepKind::Fortress => base + 1,
            KeepKind::Tower => base,
        }
    };
    level.min(u16::from(u8::MAX)) as u8
}

/// Recompute one guard's level from the keep it defends. The keep-level
/// bonus only applies to attached guards, scaled by the structure-kind
/// multiplier, and the fractional part is truncated.
pub fn set_guard_level(
    guard: &mut GuardPost,
    keep_kind: KeepKind,
    keep_base_level: u8,
    keep_level: u8,
    balance: &KeepBalance,
) {
    if guard.kind == GuardKind::Hastener {
        guard.level = balance.hastener_level;
        return;
    }
    let attached = guard.section.is_some();
    let base = guard_base_level(guard.kind, attached, keep_kind, keep_base_level);
    let bonus = if attached { keep_level } else { 0 };
    let multiplier = if attached && keep_kind == KeepKind::Tower {
        balance.tower_guard_multiplier
    } else {
        balance.fortress_guard_multiplier
    };
    guard.level = (f64::from(base) + f64::from(bonus) * multiplier) as u8;
}

/// Fighter-grade level for patrol members of this keep.
pub fn patrol_member_level(
    keep_kind: KeepKind,
    keep_base_level: u8,
    keep_level: u8,
    balance: &KeepBalance,
) -> u8 {
    let base = guard_base_level(GuardKind::Fighter, true, keep_kind, keep_base_level);
    let multiplier = match keep_kind {
        KeepKind::Tower => balance.tower_guard_multiplier,
        KeepKind::Fortress => balance.fortress_guard_multiplier,
    };
    (f64::from(base) + f64::from(keep_level) * multiplier) as u8
}

/// Flags for the roles currently alive on a roster.
pub fn garrison_flags<'a>(guards: impl Iterator<Item = &'a GuardPost>) -> GarrisonFlags {
    let mut flags = GarrisonFlags::empty();
    for guard in guards.filter(|g| g.alive) {
        match guard.kind {
            GuardKind::Lord => flags |= GarrisonFlags::HAS_LORD,
            GuardKind::Commander => flags |= GarrisonFlags::HAS_COMMANDER,
            GuardKind::Hastener => flags |= GarrisonFlags::HAS_HASTENER,
            _ => {}
        }
    }
    flags
}

//! Data contracts shared between the keep simulation core, the persistence
//! layer, and frontier observers.
//!
//! Everything here is plain serde data: persisted row types (`KeepRow`,
//! `SectionRow`, `HookHeightRow`), the observer-facing state structs pushed
//! over the feed, and the frame envelope with its content hash. No gameplay
//! logic lives in this crate.

use ahash::RandomState;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{BuildHasher, Hasher};

/// One of the three opposing realms, or neutral for unclaimed structures.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum Realm {
    Neutral = 0,
    Ardan = 1,
    Veska = 2,
    Morwen = 3,
}

impl Realm {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Realm::Neutral),
            1 => Some(Realm::Ardan),
            2 => Some(Realm::Veska),
            3 => Some(Realm::Morwen),
            _ => None,
        }
    }

    /// Index into per-realm tables (difficulty, counts). Neutral has no slot.
    pub fn table_index(self) -> Option<usize> {
        match self {
            Realm::Neutral => None,
            Realm::Ardan => Some(0),
            Realm::Veska => Some(1),
            Realm::Morwen => Some(2),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Realm::Neutral => "neutral",
            Realm::Ardan => "Ardan",
            Realm::Veska => "Veska",
            Realm::Morwen => "Morwen",
        }
    }
}

impl Default for Realm {
    fn default() -> Self {
        Realm::Neutral
    }
}

impl fmt::Display for Realm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<Realm> for u8 {
    fn from(value: Realm) -> Self {
        value as u8
    }
}

/// Structural class of a fortification. Fortresses carry the full rule set,
/// towers use halved claim requirements and the repair gate.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum KeepKind {
    Fortress = 0,
    Tower = 1,
}

impl KeepKind {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(KeepKind::Fortress),
            1 => Some(KeepKind::Tower),
            _ => None,
        }
    }
}

impl Default for KeepKind {
    fn default() -> Self {
        KeepKind::Fortress
    }
}

/// Cosmetic shape classification carried in the persisted row. Game rules
/// never branch on it; clients use it to pick wall meshes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum KeepShape {
    Any = 0,
    Bastion = 1,
    Crescent = 2,
    Spur = 3,
    Crown = 4,
    Vale = 5,
    Gate = 6,
    Hold = 7,
}

impl KeepShape {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(KeepShape::Any),
            1 => Some(KeepShape::Bastion),
            2 => Some(KeepShape::Crescent),
            3 => Some(KeepShape::Spur),
            4 => Some(KeepShape::Crown),
            5 => Some(KeepShape::Vale),
            6 => Some(KeepShape::Gate),
            7 => Some(KeepShape::Hold),
            _ => None,
        }
    }
}

impl Default for KeepShape {
    fn default() -> Self {
        KeepShape::Any
    }
}

/// Open/closed state of a keep door.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DoorState {
    Closed = 0,
    Open = 1,
}

impl Default for DoorState {
    fn default() -> Self {
        DoorState::Closed
    }
}

/// Server archetype. Neutral lords on coop/skirmish servers are farm
/// targets and respawn with randomised variance instead of instantly.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[repr(u8)]
pub enum ServerKind {
    Frontier = 0,
    Coop = 1,
    Skirmish = 2,
}

impl Default for ServerKind {
    fn default() -> Self {
        ServerKind::Frontier
    }
}

/// Persisted keep record. Loaded by the lifecycle code at region start and
/// written back on every ownership or level transition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct KeepRow {
    pub keep_id: u16,
    pub name: String,
    pub region: u16,
    pub x: i32,
    pub y: i32,
    pub z: i32,
    pub heading: u16,
    pub realm: u8,
    pub original_realm: u8,
    pub kind: u8,
    pub shape: u8,
    pub level: u8,
    pub base_level: u8,
    pub difficulty_ardan: u8,
    pub difficulty_veska: u8,
    pub difficulty_morwen: u8,
    /// Empty string when unclaimed.
    pub claimed_guild: String,
}

/// Persisted structural section (wall, tower segment, gatehouse).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct SectionRow {
    pub keep_id: u16,
    pub section_id: u8,
    pub skin: u16,
    pub health: u32,
    pub max_health: u32,
    pub razed: bool,
}

/// Fixture row mapping a hook point at a given structural height band to
/// its vertical offset. Used to re-clamp players standing on the roofline
/// when a keep shrinks.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct HookHeightRow {
    pub hook_id: u8,
    pub height: u8,
    pub z: i32,
}

/// Observer-facing summary of one keep.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct KeepState {
    pub keep_id: u16,
    pub name: String,
    pub realm: Realm,
    pub kind: KeepKind,
    pub shape: KeepShape,
    pub level: u8,
    pub base_level: u8,
    pub x: i32,
    pub y: i32,
    pub z: i32,
    pub heading: u16,
    pub claimed_guild: Option<String>,
    pub under_siege: bool,
}

/// Observer-facing detail of one structural section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SectionState {
    pub keep_id: u16,
    pub section_id: u8,
    pub skin: u16,
    pub level: u8,
    pub health_pct: u8,
    pub razed: bool,
}

/// Envelope broadcast to observer connections. `hash` covers the encoded
/// frame with the hash field zeroed, so receivers can verify integrity and
/// test harnesses can compare runs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct FeedHeader {
    pub now_ms: u64,
    pub message_count: u32,
    pub hash: u64,
}

pub fn hash_frame_bytes(encoded: &[u8]) -> u64 {
    let mut hasher = RandomState::with_seeds(0, 0, 0, 0).build_hasher();
    hasher.write(encoded);
    hasher.finish()
}

pub fn encode_row(row: &KeepRow) -> bincode::Result<Vec<u8>> {
    bincode::serialize(row)
}

pub fn decode_row(data: &[u8]) -> bincode::Result<KeepRow> {
    bincode::deserialize(data)
}

pub fn encode_row_json(row: &KeepRow) -> serde_json::Result<String> {
    serde_json::to_string(row)
}

pub fn decode_row_json(data: &str) -> serde_json::Result<KeepRow> {
    serde_json::from_str(data)
}

//! Region clock, observer roster, and world-presence registry.
//!
//! Each frontier region drives its keeps from a single task queue, so the
//! clock here is the only source of "now" inside the crate. All keep state
//! for a region mutates on that queue; nothing in this module is shared
//! across regions.

use std::collections::BTreeMap;
use std::fmt;

use bevy::prelude::Resource;
use serde::{Deserialize, Serialize};

use keep_schema::{DoorState, Realm};

use crate::guild::GuildId;
use crate::keep::KeepId;

/// Identifier of a world region hosting zero or more keeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RegionId(pub u16);

impl fmt::Display for RegionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a connected observer (player session).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObserverId(pub u32);

impl fmt::Display for ObserverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of an observer group. Observers sharing a group id count
/// toward each other's claim head-count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GroupId(pub u32);

/// Milliseconds-since-start clock for one region queue. Advanced once per
/// tick; timer due checks and combat windows all read from it.
#[derive(Resource, Debug, Clone)]
pub struct RegionClock {
    now_ms: u64,
    tick_ms: u64,
}

impl RegionClock {
    pub fn new(tick_ms: u64) -> Self {
        Self { now_ms: 0, tick_ms }
    }

    pub fn now_ms(&self) -> u64 {
        self.now_ms
    }

    pub fn tick_ms(&self) -> u64 {
        self.tick_ms
    }

    /// Advance by one tick and return the new time.
    pub fn advance(&mut self) -> u64 {
        self.advance_by(self.tick_ms)
    }

    pub fn advance_by(&mut self, delta_ms: u64) -> u64 {
        self.now_ms = self.now_ms.saturating_add(delta_ms);
        self.now_ms
    }
}

/// Static description of a region.
#[derive(Debug, Clone)]
pub struct RegionInfo {
    pub name: String,
    pub frontier: bool,
}

/// Live observer snapshot kept current by the session layer.
#[derive(Debug, Clone)]
pub struct Observer {
    pub id: ObserverId,
    pub name: String,
    pub region: RegionId,
    pub x: i32,
    pub y: i32,
    pub z: i32,
    pub heading: u16,
    pub realm: Realm,
    pub guild: Option<GuildId>,
    pub group: Option<GroupId>,
    /// False while zoning or linkdead. Non-playing observers receive no
    /// feed traffic and do not count toward claim head-counts.
    pub playing: bool,
    /// Staff bypass claim head-count checks entirely.
    pub staff: bool,
}

/// Circular area registered around a loaded keep. The session layer uses
/// these for enter/leave notices; removal tears the area down again.
#[derive(Debug, Clone)]
pub struct KeepArea {
    pub keep: KeepId,
    pub name: String,
    pub region: RegionId,
    pub x: i32,
    pub y: i32,
    pub radius: u32,
}

/// Plain (non-keep) door left behind when a keep is removed from the
/// world. Spawns closed at the old door's position.
#[derive(Debug, Clone)]
pub struct WorldDoor {
    pub door_id: u32,
    pub region: RegionId,
    pub x: i32,
    pub y: i32,
    pub z: i32,
    pub heading: u16,
    pub level: u8,
    pub realm: Realm,
    pub state: DoorState,
}

/// World presence for one region queue: regions, observers, keep areas,
/// and demoted world doors.
#[derive(Resource, Debug, Default)]
pub struct RegionAtlas {
    regions: BTreeMap<RegionId, RegionInfo>,
    observers: BTreeMap<ObserverId, Observer>,
    areas: BTreeMap<KeepId, KeepArea>,
    world_doors: BTreeMap<u32, WorldDoor>,
}

impl RegionAtlas {
    pub fn insert_region(&mut self, id: RegionId, info: RegionInfo) {
        self.regions.insert(id, info);
    }

    pub fn region(&self, id: RegionId) -> Option<&RegionInfo> {
        self.regions.get(&id)
    }

    pub fn regions(&self) -> impl Iterator<Item = (RegionId, &RegionInfo)> {
        self.regions.iter().map(|(id, info)| (*id, info))
    }

    pub fn upsert_observer(&mut self, observer: Observer) {
        self.observers.insert(observer.id, observer);
    }

    pub fn remove_observer(&mut self, id: ObserverId) -> Option<Observer> {
        self.observers.remove(&id)
    }

    pub fn observer(&self, id: ObserverId) -> Option<&Observer> {
        self.observers.get(&id)
    }

    pub fn observer_count(&self) -> usize {
        self.observers.len()
    }

    /// Playing observers currently in `region`.
    pub fn playing_in_region(&self, region: RegionId) -> impl Iterator<Item = &Observer> {
        self.observers
            .values()
            .filter(move |o| o.region == region && o.playing)
    }

    /// Playing observers in `region` within `radius` (2D) of a point.
    pub fn observers_within(
        &self,
        region: RegionId,
        x: i32,
        y: i32,
        radius: u32,
    ) -> impl Iterator<Item = &Observer> {
        self.observers.values().filter(move |o| {
            o.region == region && o.playing && planar_distance(o.x, o.y, x, y) <= f64::from(radius)
        })
    }

    /// Playing members of `group`, the anchor observer included.
    pub fn group_members(&self, group: GroupId) -> impl Iterator<Item = &Observer> {
        self.observers
            .values()
            .filter(move |o| o.playing && o.group == Some(group))
    }

    pub fn register_area(&mut self, area: KeepArea) {
        self.areas.insert(area.keep, area);
    }

    pub fn remove_area(&mut self, keep: KeepId) -> Option<KeepArea> {
        self.areas.remove(&keep)
    }

    pub fn area(&self, keep: KeepId) -> Option<&KeepArea> {
        self.areas.get(&keep)
    }

    pub fn register_world_door(&mut self, door: WorldDoor) {
        self.world_doors.insert(door.door_id, door);
    }

    pub fn world_door(&self, door_id: u32) -> Option<&WorldDoor> {
        self.world_doors.get(&door_id)
    }

    pub fn world_door_count(&self) -> usize {
        self.world_doors.len()
    }
}

/// 2D distance between two world points.
pub fn planar_distance(ax: i32, ay: i32, bx: i32, by: i32) -> f64 {
    let dx = f64::from(ax) - f64::from(bx);
    let dy = f64::from(ay) - f64::from(by);
    (dx * dx + dy * dy).sqrt()
}

//! Domain events emitted by claim and capture flows. Other subsystems
//! (quests, scoreboards, guard actors) subscribe to these instead of
//! hooking the keep code directly.

use bevy::prelude::Event;

use keep_schema::Realm;

use crate::guard::GuardId;
use crate::guild::GuildId;
use crate::keep::KeepId;

/// A guild completed a claim on a keep.
#[derive(Event, Debug, Clone)]
pub struct KeepClaimedEvent {
    pub keep: KeepId,
    pub guild: GuildId,
}

/// A keep finished its capture reset under a new realm.
#[derive(Event, Debug, Clone)]
pub struct KeepCapturedEvent {
    pub keep: KeepId,
    pub realm: Realm,
}

/// What the external actor system should do with one guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardDirective {
    /// Kill the actor; its own respawn cycle takes over.
    Kill,
    /// Respawn immediately under the keep's current realm.
    Respawn,
    /// Remove the actor without a respawn.
    Despawn,
}

/// Instruction for the guard actor layer, emitted during capture resets,
/// hook redistribution, and keep removal.
#[derive(Event, Debug, Clone)]
pub struct GuardDirectiveEvent {
    pub keep: KeepId,
    pub guard: GuardId,
    pub directive: GuardDirective,
}

//! Guild directory.
//!
//! Claim code needs four things from guilds: realm membership, a claim
//! permission check, the set of keeps the guild currently holds, and a
//! realm-point ledger for the hourly bounty. The set of held keeps and
//! each keep's claimant pointer are updated together by the claim code so
//! the two views never disagree.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use bevy::prelude::Resource;
use serde::{Deserialize, Serialize};

use keep_schema::Realm;

use crate::keep::KeepId;
use crate::region::ObserverId;

/// Identifier of a registered guild.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GuildId(pub u32);

impl fmt::Display for GuildId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone)]
pub struct Guild {
    pub id: GuildId,
    pub name: String,
    pub realm: Realm,
    pub claimed_keeps: BTreeSet<KeepId>,
    /// Members holding the claim rank.
    pub claim_officers: BTreeSet<ObserverId>,
    pub realm_points: u64,
}

impl Guild {
    pub fn new(id: GuildId, name: impl Into<String>, realm: Realm) -> Self {
        Self {
            id,
            name: name.into(),
            realm,
            claimed_keeps: BTreeSet::new(),
            claim_officers: BTreeSet::new(),
            realm_points: 0,
        }
    }
}

#[derive(Resource, Debug, Default)]
pub struct GuildDirectory {
    guilds: BTreeMap<GuildId, Guild>,
    by_name: BTreeMap<String, GuildId>,
}

impl GuildDirectory {
    pub fn register(&mut self, guild: Guild) -> GuildId {
        let id = guild.id;
        self.by_name.insert(guild.name.clone(), id);
        self.guilds.insert(id, guild);
        id
    }

    pub fn guild(&self, id: GuildId) -> Option<&Guild> {
        self.guilds.get(&id)
    }

    pub fn guild_mut(&mut self, id: GuildId) -> Option<&mut Guild> {
        self.guilds.get_mut(&id)
    }

    /// Lookup by exact name, the form persisted in keep rows.
    pub fn find_by_name(&self, name: &str) -> Option<GuildId> {
        self.by_name.get(name).copied()
    }

    pub fn name_of(&self, id: GuildId) -> Option<&str> {
        self.guilds.get(&id).map(|g| g.name.as_str())
    }

    pub fn grant_claim_rank(&mut self, id: GuildId, officer: ObserverId) {
        if let Some(guild) = self.guilds.get_mut(&id) {
            guild.claim_officers.insert(officer);
        }
    }

    pub fn has_claim_rank(&self, id: GuildId, observer: ObserverId) -> bool {
        self.guilds
            .get(&id)
            .is_some_and(|g| g.claim_officers.contains(&observer))
    }

    /// Number of keeps the guild currently holds.
    pub fn claims_of(&self, id: GuildId) -> usize {
        self.guilds.get(&id).map_or(0, |g| g.claimed_keeps.len())
    }

    /// Record a claim; returns the held count afterwards.
    pub fn add_claim(&mut self, id: GuildId, keep: KeepId) -> usize {
        match self.guilds.get_mut(&id) {
            Some(guild) => {
                guild.claimed_keeps.insert(keep);
                guild.claimed_keeps.len()
            }
            None => 0,
        }
    }

    pub fn drop_claim(&mut self, id: GuildId, keep: KeepId) {
        if let Some(guild) = self.guilds.get_mut(&id) {
            guild.claimed_keeps.remove(&keep);
        }
    }

    pub fn credit_realm_points(&mut self, id: GuildId, amount: u64) {
        if let Some(guild) = self.guilds.get_mut(&id) {
            guild.realm_points = guild.realm_points.saturating_add(amount);
        }
    }
}

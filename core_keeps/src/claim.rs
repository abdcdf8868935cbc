//! Guild claim and release protocol.
//!
//! A claim binds a guild to a keep: the keep drops to the claim starting
//! level and begins drifting toward the ceiling, the garrison and
//! banners take the guild's colors, and the bounty timer starts paying
//! the guild every interval. Release undoes all of it and hands the
//! keep back to realm-paced decay. Both directions run through a check
//! stage that refuses with a player-facing message and a perform stage
//! that never refuses, so the capture protocol and operator tooling can
//! reuse the perform stage directly.

use bevy::prelude::Events;
use thiserror::Error;

use keep_runtime::{FrontierRuleset, KeepStore, KeepStoreError};
use keep_schema::KeepKind;

use crate::config::{FrontierConfig, KeepBalance};
use crate::events::{GuardDirectiveEvent, KeepClaimedEvent};
use crate::guild::{GuildDirectory, GuildId};
use crate::keep::{persist_keep, reload_from_row, Keep, KeepId, KeepRegistry};
use crate::observer::{BroadcastScope, FeedMessage, ObserverFeed};
use crate::region::{Observer, ObserverId, RegionAtlas};
use crate::upgrade::{change_level, start_level_drift, RelicTally};

/// Why a claim attempt was turned down. The display text is what the
/// claimant sees.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ClaimRefusal {
    #[error("{keep} is under attack and can't be claimed.")]
    InCombat { keep: String },
    #[error("This keep does not belong to your realm.")]
    WrongRealm,
    #[error("This keep can't be claimed.")]
    NotClaimable,
    #[error("You must be in a guild to claim a keep.")]
    NoGuild,
    #[error("You don't have permission to make claims for your guild.")]
    NoPermission,
    #[error("This keep is already claimed.")]
    AlreadyClaimed,
    #[error("Keep claiming is disabled.")]
    ClaimingDisabled,
    #[error("Your guild already owns a keep.")]
    GuildAlreadyOwnsKeep,
    #[error("Your guild already owns the maximum of {quota} keeps.")]
    GuildAtQuota { held: u32, quota: u32 },
    #[error("You have {present} players in your group here; {needed} are needed to claim.")]
    GroupTooSmall { present: u32, needed: u32 },
}

/// Why a release attempt was turned down.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ReleaseRefusal {
    #[error("{keep} is under attack and can't be released.")]
    InCombat { keep: String },
}

#[derive(Debug, Error)]
pub enum ClaimError {
    #[error("keep {0} is not loaded")]
    UnknownKeep(KeepId),
    #[error("observer {0} is not known to the region")]
    UnknownObserver(ObserverId),
    #[error("no guild named {0:?} is registered")]
    UnknownGuild(String),
    #[error(transparent)]
    Refused(#[from] ClaimRefusal),
    #[error(transparent)]
    ReleaseRefused(#[from] ReleaseRefusal),
    #[error(transparent)]
    Store(#[from] KeepStoreError),
}

/// Run the full refusal chain for `claimant` trying to claim `keep`.
/// Returns the guild the claim would bind on success.
///
/// The head-count rule looks at the claimant's group and counts the
/// members whose nearest keep is this one; towers need half the
/// configured quorum and staff accounts skip the count entirely.
pub fn check_claim(
    keep: &Keep,
    claimant: &Observer,
    registry: &KeepRegistry,
    atlas: &RegionAtlas,
    guilds: &GuildDirectory,
    config: &FrontierConfig,
    now_ms: u64,
) -> Result<GuildId, ClaimRefusal> {
    if keep.in_combat(now_ms, config.combat_window_ms) {
        tracing::warn!(
            target: "greymarch::claim",
            keep = %keep.id,
            claimant = %claimant.id,
            "claim.refused_in_combat"
        );
        return Err(ClaimRefusal::InCombat {
            keep: keep.display_name(config.debug_names),
        });
    }
    if claimant.realm != keep.realm {
        return Err(ClaimRefusal::WrongRealm);
    }
    if keep.base_level() != config.claimable_base_level {
        return Err(ClaimRefusal::NotClaimable);
    }
    let Some(guild) = claimant.guild else {
        return Err(ClaimRefusal::NoGuild);
    };
    if !guilds.has_claim_rank(guild, claimant.id) {
        return Err(ClaimRefusal::NoPermission);
    }
    if keep.guild.is_some() {
        return Err(ClaimRefusal::AlreadyClaimed);
    }
    let owned = guilds.claims_of(guild) as u32;
    match config.claim_quota {
        0 => return Err(ClaimRefusal::ClaimingDisabled),
        1 => {
            if owned >= 1 {
                return Err(ClaimRefusal::GuildAlreadyOwnsKeep);
            }
        }
        quota => {
            if owned >= quota {
                return Err(ClaimRefusal::GuildAtQuota { held: owned, quota });
            }
        }
    }
    if !claimant.staff {
        let present = match claimant.group {
            None => 1,
            Some(group) => atlas
                .group_members(group)
                .filter(|member| {
                    registry.keep_near_spot(
                        member.region,
                        member.x,
                        member.y,
                        config.visibility_distance,
                    ) == Some(keep.id)
                })
                .count() as u32,
        };
        let mut needed = config.claim_group_size;
        if keep.kind == KeepKind::Tower {
            needed /= 2;
        }
        if present < needed {
            return Err(ClaimRefusal::GroupTooSmall { present, needed });
        }
    }
    Ok(guild)
}

/// Claim entry point for a player-driven attempt: check, then perform.
#[allow(clippy::too_many_arguments)]
pub fn claim_keep(
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
    claimed: &mut Events<KeepClaimedEvent>,
    now_ms: u64,
    id: KeepId,
    claimant: ObserverId,
) -> Result<(), ClaimError> {
    let observer = atlas
        .observer(claimant)
        .ok_or(ClaimError::UnknownObserver(claimant))?;
    let guild = {
        let keep = registry.get(id).ok_or(ClaimError::UnknownKeep(id))?;
        check_claim(keep, observer, registry, atlas, guilds, config, now_ms)?
    };
    perform_claim(
        registry, atlas, guilds, config, balance, rules, relics, store, feed, directives,
        claimed, now_ms, id, guild,
    )
}

/// Operator claim: binds the named guild without running the player
/// refusal chain. Still refuses a double claim; everything else is the
/// operator's call.
#[allow(clippy::too_many_arguments)]
pub fn admin_claim(
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
    claimed: &mut Events<KeepClaimedEvent>,
    now_ms: u64,
    id: KeepId,
    guild_name: &str,
) -> Result<(), ClaimError> {
    let guild = guilds
        .find_by_name(guild_name)
        .ok_or_else(|| ClaimError::UnknownGuild(guild_name.to_owned()))?;
    {
        let keep = registry.get(id).ok_or(ClaimError::UnknownKeep(id))?;
        if keep.guild.is_some() {
            return Err(ClaimRefusal::AlreadyClaimed.into());
        }
    }
    perform_claim(
        registry, atlas, guilds, config, balance, rules, relics, store, feed, directives,
        claimed, now_ms, id, guild,
    )
}

#[allow(clippy::too_many_arguments)]
fn perform_claim(
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
    claimed: &mut Events<KeepClaimedEvent>,
    now_ms: u64,
    id: KeepId,
    guild: GuildId,
) -> Result<(), ClaimError> {
    let Some(guild_name) = guilds.name_of(guild).map(str::to_owned) else {
        return Err(ClaimError::UnknownGuild(guild.to_string()));
    };
    let keep = registry.get_mut(id).ok_or(ClaimError::UnknownKeep(id))?;

    keep.guild = Some(guild);
    let owned = guilds.add_claim(guild, id);
    if config.claim_quota > 1 {
        feed.push(FeedMessage::Broadcast {
            scope: BroadcastScope::Guild(guild),
            text: format!(
                "Your guild has claimed {owned} keeps of a maximum of {}.",
                config.claim_quota
            ),
        });
    }

    change_level(
        keep,
        atlas,
        guilds,
        config,
        balance,
        store,
        feed,
        directives,
        config.claim_start_level,
    )?;
    feed.push(FeedMessage::Broadcast {
        scope: BroadcastScope::Realm(keep.realm),
        text: format!(
            "{guild_name} has claimed {}.",
            keep.display_name(config.debug_names)
        ),
    });

    for guard in keep.guards.values_mut() {
        guard.guild = Some(guild);
    }
    for banner in keep.banners.values_mut() {
        banner.change_guild(keep.realm, Some(guild));
    }

    if let Err(err) = persist_keep(keep, guilds, store) {
        tracing::error!(
            target: "greymarch::claim",
            keep = %id,
            error = %err,
            "claim.save_failed"
        );
        return Err(err.into());
    }
    reload_from_row(keep, guilds);

    start_level_drift(keep, config.max_level, now_ms, config, rules, relics, feed);
    keep.bounty_timer.arm(now_ms, 1);

    claimed.send(KeepClaimedEvent { keep: id, guild });
    tracing::info!(
        target: "greymarch::claim",
        keep = %id,
        guild = %guild,
        "claim.granted"
    );
    Ok(())
}

pub fn check_release(
    keep: &Keep,
    config: &FrontierConfig,
    now_ms: u64,
) -> Result<(), ReleaseRefusal> {
    if keep.in_combat(now_ms, config.combat_window_ms) {
        tracing::warn!(
            target: "greymarch::claim",
            keep = %keep.id,
            "release.refused_in_combat"
        );
        return Err(ReleaseRefusal::InCombat {
            keep: keep.display_name(config.debug_names),
        });
    }
    Ok(())
}

/// Release entry point for a guild-driven drop: check, then perform.
#[allow(clippy::too_many_arguments)]
pub fn release_keep(
    registry: &mut KeepRegistry,
    guilds: &mut GuildDirectory,
    config: &FrontierConfig,
    rules: &dyn FrontierRuleset,
    relics: &RelicTally,
    store: &dyn KeepStore,
    feed: &mut ObserverFeed,
    now_ms: u64,
    id: KeepId,
) -> Result<(), ClaimError> {
    let keep = registry.get_mut(id).ok_or(ClaimError::UnknownKeep(id))?;
    check_release(keep, config, now_ms)?;
    perform_release(keep, guilds, config, rules, relics, store, feed, now_ms)?;
    Ok(())
}

/// Undo a claim on `keep`. No-op when the keep is unclaimed, so the
/// capture protocol can call it unconditionally. Stops both claim
/// timers before pointing the drift back at the floor; the decay run
/// starts from a fresh interval.
#[allow(clippy::too_many_arguments)]
pub(crate) fn perform_release(
    keep: &mut Keep,
    guilds: &mut GuildDirectory,
    config: &FrontierConfig,
    rules: &dyn FrontierRuleset,
    relics: &RelicTally,
    store: &dyn KeepStore,
    feed: &mut ObserverFeed,
    now_ms: u64,
) -> Result<(), KeepStoreError> {
    let Some(guild) = keep.guild else {
        return Ok(());
    };
    let guild_name = guilds.name_of(guild).unwrap_or_default().to_owned();
    guilds.drop_claim(guild, keep.id);
    feed.push(FeedMessage::Broadcast {
        scope: BroadcastScope::Realm(keep.realm),
        text: format!(
            "{guild_name} has lost its claim on {}.",
            keep.display_name(config.debug_names)
        ),
    });
    keep.guild = None;
    keep.bounty_timer.stop();
    keep.level_timer.stop();
    start_level_drift(
        keep,
        config.starting_level,
        now_ms,
        config,
        rules,
        relics,
        feed,
    );

    for guard in keep.guards.values_mut() {
        guard.guild = None;
    }
    for banner in keep.banners.values_mut() {
        banner.change_guild(keep.realm, None);
    }
    persist_keep(keep, guilds, store)?;
    tracing::info!(
        target: "greymarch::claim",
        keep = %keep.id,
        guild = %guild,
        "claim.released"
    );
    Ok(())
}

/// Bounty timer callback. Pays the owning guild and returns the next
/// interval, or zero to stop when the claim is gone.
pub fn bounty_timer_fired(
    keep: &Keep,
    guilds: &mut GuildDirectory,
    rules: &dyn FrontierRuleset,
    config: &FrontierConfig,
) -> u64 {
    let Some(guild) = keep.guild else {
        return 0;
    };
    let award = rules.realm_point_award(&keep.valuation());
    guilds.credit_realm_points(guild, u64::from(award));
    tracing::info!(
        target: "greymarch::claim",
        keep = %keep.id,
        guild = %guild,
        points = award,
        "bounty.credited"
    );
    config.bounty_interval_ms
}

//! Region configuration and the balance catalog.
//!
//! `FrontierConfig` carries the tunables one region queue runs with; the
//! balance catalog is the data-driven part (guard multipliers, roofline
//! fixtures) loaded from JSON with a builtin fallback.

use std::{
    env, fs, io,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    path::{Path, PathBuf},
    sync::Arc,
};

use bevy::prelude::Resource;
use serde::Deserialize;
use thiserror::Error;

use keep_runtime::FrontierRuleset;
use keep_schema::ServerKind;

pub const BUILTIN_KEEP_BALANCE: &str = include_str!("data/keep_balance.json");

/// Tunables for one frontier region. Level bounds, the claim rules, the
/// siege window, and the network binds all live here.
#[derive(Resource, Debug, Clone)]
pub struct FrontierConfig {
    /// Floor a keep decays to when unclaimed.
    pub starting_level: u8,
    /// Ceiling a claimed keep drifts toward.
    pub max_level: u8,
    /// Level applied immediately when a claim lands.
    pub claim_start_level: u8,
    /// Only keeps persisted at exactly this base level accept claims.
    pub claimable_base_level: u8,
    /// Keeps one guild may hold. Zero disables claiming outright.
    pub claim_quota: u32,
    /// Group members that must stand near the keep to claim it. Halved
    /// for towers, waived for staff.
    pub claim_group_size: u32,
    pub combat_window_ms: u64,
    /// Tower sections below this health percentage stall level drift.
    pub repair_gate_pct: u8,
    pub repair_gate_rearm_ms: u64,
    pub bounty_interval_ms: u64,
    /// Retry delay when a timer callback fails part-way.
    pub fallback_rearm_ms: u64,
    pub visibility_distance: u32,
    pub keep_area_radius: u32,
    pub upgrade_timer_enabled: bool,
    pub keep_rebalancing_enabled: bool,
    pub live_keep_count_bonuses: bool,
    /// Suffix keep names with their numeric id.
    pub debug_names: bool,
    pub server_kind: ServerKind,
    pub rng_seed: u64,
    pub tick_ms: u64,
    pub feed_bind: SocketAddr,
    pub command_bind: SocketAddr,
}

impl Default for FrontierConfig {
    fn default() -> Self {
        Self {
            starting_level: 1,
            max_level: 10,
            claim_start_level: 1,
            claimable_base_level: 50,
            claim_quota: 1,
            claim_group_size: 8,
            combat_window_ms: 5 * 60 * 1000,
            repair_gate_pct: 75,
            repair_gate_rearm_ms: 5 * 60 * 1000,
            bounty_interval_ms: 60 * 60 * 1000,
            fallback_rearm_ms: 60 * 1000,
            visibility_distance: 3_600,
            keep_area_radius: 4_000,
            upgrade_timer_enabled: true,
            keep_rebalancing_enabled: false,
            live_keep_count_bonuses: false,
            debug_names: false,
            server_kind: ServerKind::Frontier,
            rng_seed: 0x6b65_6570,
            tick_ms: 1_000,
            feed_bind: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 42000),
            command_bind: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 42001),
        }
    }
}

/// Data-driven balance values. Guard level multipliers and the roofline
/// fixture constants used when a keep changes size.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct KeepBalance {
    #[serde(default = "default_fortress_guard_multiplier")]
    pub fortress_guard_multiplier: f64,
    #[serde(default = "default_tower_guard_multiplier")]
    pub tower_guard_multiplier: f64,
    #[serde(default = "default_hastener_level")]
    pub hastener_level: u8,
    #[serde(default = "default_fortress_reposition_radius")]
    pub fortress_reposition_radius: u32,
    #[serde(default = "default_tower_reposition_radius")]
    pub tower_reposition_radius: u32,
    #[serde(default = "default_fortress_core_skin")]
    pub fortress_core_skin: u16,
    #[serde(default = "default_tower_core_skin")]
    pub tower_core_skin: u16,
    #[serde(default = "default_roof_hook_id")]
    pub roof_hook_id: u8,
}

fn default_fortress_guard_multiplier() -> f64 {
    1.5
}

fn default_tower_guard_multiplier() -> f64 {
    1.0
}

fn default_hastener_level() -> u8 {
    1
}

fn default_fortress_reposition_radius() -> u32 {
    1_500
}

fn default_tower_reposition_radius() -> u32 {
    750
}

fn default_fortress_core_skin() -> u16 {
    10
}

fn default_tower_core_skin() -> u16 {
    11
}

fn default_roof_hook_id() -> u8 {
    97
}

impl Default for KeepBalance {
    fn default() -> Self {
        Self {
            fortress_guard_multiplier: default_fortress_guard_multiplier(),
            tower_guard_multiplier: default_tower_guard_multiplier(),
            hastener_level: default_hastener_level(),
            fortress_reposition_radius: default_fortress_reposition_radius(),
            tower_reposition_radius: default_tower_reposition_radius(),
            fortress_core_skin: default_fortress_core_skin(),
            tower_core_skin: default_tower_core_skin(),
            roof_hook_id: default_roof_hook_id(),
        }
    }
}

#[derive(Resource, Debug, Clone)]
pub struct KeepBalanceHandle(Arc<KeepBalance>);

impl KeepBalanceHandle {
    pub fn new(balance: Arc<KeepBalance>) -> Self {
        Self(balance)
    }

    pub fn get(&self) -> Arc<KeepBalance> {
        self.0.clone()
    }
}

/// Pluggable scoring and schedule rules shared by the claim and level
/// machinery.
#[derive(Resource, Clone)]
pub struct RulesetHandle(Arc<dyn FrontierRuleset>);

impl RulesetHandle {
    pub fn new(rules: Arc<dyn FrontierRuleset>) -> Self {
        Self(rules)
    }

    pub fn get(&self) -> Arc<dyn FrontierRuleset> {
        self.0.clone()
    }
}

#[derive(Debug, Error)]
pub enum KeepBalanceError {
    #[error("failed to parse keep balance: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("failed to read keep balance from {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

pub fn load_keep_balance_from_env() -> Arc<KeepBalance> {
    let override_path = env::var("KEEP_BALANCE_PATH").ok().map(PathBuf::from);
    let default_path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("src/data/keep_balance.json");

    let candidates: Vec<PathBuf> = match override_path {
        Some(ref path) => vec![path.clone()],
        None => vec![default_path.clone()],
    };

    for path in candidates {
        match read_keep_balance_from_file(&path) {
            Ok(balance) => {
                return Arc::new(balance);
            }
            Err(err) => {
                tracing::warn!(
                    target: "greymarch::keep",
                    path = %path.display(),
                    error = %err,
                    "keep_balance.load_failed"
                );
            }
        }
    }

    let balance =
        read_keep_balance_from_str(BUILTIN_KEEP_BALANCE).expect("builtin keep balance should parse");
    Arc::new(balance)
}

fn read_keep_balance_from_file(path: &Path) -> Result<KeepBalance, KeepBalanceError> {
    let contents = fs::read_to_string(path).map_err(|source| KeepBalanceError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    read_keep_balance_from_str(&contents)
}

fn read_keep_balance_from_str(data: &str) -> Result<KeepBalance, KeepBalanceError> {
    Ok(serde_json::from_str(data)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_balance_parses_and_matches_defaults() {
        let balance = read_keep_balance_from_str(BUILTIN_KEEP_BALANCE).expect("builtin parses");
        assert_eq!(balance, KeepBalance::default());
    }

    #[test]
    fn partial_balance_file_falls_back_per_field() {
        let balance: KeepBalance =
            serde_json::from_str(r#"{"tower_guard_multiplier": 1.25}"#).expect("parse");
        assert_eq!(balance.tower_guard_multiplier, 1.25);
        assert_eq!(balance.fortress_guard_multiplier, 1.5);
        assert_eq!(balance.roof_hook_id, 97);
    }

    #[test]
    fn malformed_balance_reports_parse_error() {
        let err = read_keep_balance_from_str("not json").unwrap_err();
        assert!(matches!(err, KeepBalanceError::Parse(_)));
    }
}

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Once;

use bevy::prelude::App;

use core_keeps::{
    build_frontier_app, load_keep_into, observer_entered, BannerKind, GroupId, GuardId, GuardKind,
    GuardPost, Guild, GuildDirectory, GuildId, HookPoint, KeepBanner, KeepBlueprint, KeepDoor,
    KeepId, KeepSection, Observer, ObserverId, Patrol, RegionAtlas, RegionId, RegionInfo,
};
use keep_runtime::{DoorState, KeepKind, KeepRow, KeepShape, Realm};

pub const REGION: RegionId = RegionId(163);
pub const GUILD: GuildId = GuildId(7);
pub const OFFICER: ObserverId = ObserverId(40);

static INIT: Once = Once::new();

pub fn ensure_test_balance() {
    INIT.call_once(|| {
        let balance_path = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
            .join("tests")
            .join("fixtures")
            .join("test_keep_balance.json");

        let contents = std::fs::read_to_string(&balance_path)
            .expect("test keep balance fixture should be readable");
        let parsed: Result<serde_json::Value, _> = serde_json::from_str(&contents);
        debug_assert!(
            parsed.is_ok(),
            "test keep balance fixture is not valid JSON: {:?}",
            parsed.err()
        );

        std::env::set_var("KEEP_BALANCE_PATH", &balance_path);
    });
}

/// App with one frontier region and the Oathbound guild registered with
/// a claim officer, but no keeps loaded yet.
pub fn frontier_shell() -> App {
    ensure_test_balance();
    let mut app = build_frontier_app();
    app.world.resource_mut::<RegionAtlas>().insert_region(
        REGION,
        RegionInfo {
            name: "The Greymarch".into(),
            frontier: true,
        },
    );
    {
        let mut guilds = app.world.resource_mut::<GuildDirectory>();
        guilds.register(Guild::new(GUILD, "Oathbound", Realm::Ardan));
        guilds.grant_claim_rank(GUILD, OFFICER);
    }
    app
}

/// [`frontier_shell`] plus a claimable Ardan fortress loaded as keep 21.
pub fn claimable_frontier() -> (App, KeepId) {
    let mut app = frontier_shell();
    let id = load_keep_into(&mut app.world, fortress_blueprint(21)).expect("fortress loads");
    (app, id)
}

pub fn fortress_blueprint(keep_id: u16) -> KeepBlueprint {
    let row = KeepRow {
        keep_id,
        name: format!("Caer {keep_id}"),
        region: REGION.0,
        x: 50_000,
        y: 30_000,
        z: 8_000,
        heading: 1_024,
        realm: Realm::Ardan as u8,
        original_realm: Realm::Ardan as u8,
        kind: KeepKind::Fortress as u8,
        shape: KeepShape::Bastion as u8,
        level: 1,
        base_level: 50,
        difficulty_ardan: 1,
        difficulty_veska: 2,
        difficulty_morwen: 2,
        claimed_guild: String::new(),
    };
    let mut core = KeepSection::new(0, 10, 50_000, 30_000, 8_000, 40_000);
    core.add_hook(HookPoint {
        id: 97,
        x: 50_064,
        y: 30_064,
        z: 96,
        min_height: 0,
        occupant: None,
    });
    let wall = KeepSection::new(1, 3, 50_512, 30_000, 8_000, 20_000);
    KeepBlueprint {
        row,
        sections: vec![core, wall],
        doors: vec![KeepDoor {
            id: u32::from(keep_id) * 100 + 1,
            name: "Outer Gate".into(),
            x: 50_400,
            y: 30_000,
            z: 8_000,
            heading: 0,
            state: DoorState::Closed,
            health: 8_000,
            max_health: 8_000,
            level: 0,
            realm: Realm::Ardan,
        }],
        guards: vec![
            GuardPost {
                id: GuardId(1),
                name: "Lord Marshal".into(),
                kind: GuardKind::Lord,
                level: 0,
                alive: true,
                realm: Realm::Ardan,
                guild: None,
                section: Some(0),
            },
            GuardPost {
                id: GuardId(2),
                name: "Wall Warden".into(),
                kind: GuardKind::Fighter,
                level: 0,
                alive: true,
                realm: Realm::Ardan,
                guild: None,
                section: Some(1),
            },
            GuardPost {
                id: GuardId(3),
                name: "Mission Master".into(),
                kind: GuardKind::MissionMaster,
                level: 0,
                alive: true,
                realm: Realm::Ardan,
                guild: None,
                section: Some(0),
            },
        ],
        banners: vec![KeepBanner {
            id: 1,
            kind: BannerKind::Realm,
            realm: Realm::Ardan,
            guild: None,
        }],
        patrols: vec![Patrol {
            id: 1,
            name: "Wall Walk".into(),
            level: 0,
            members: vec![GuardId(2)],
        }],
    }
}

/// Enter `count` playing guildmates standing at the fortress gate,
/// grouped together with the claim officer first.
pub fn enter_claim_group(app: &mut App, count: u32) {
    let group = GroupId(3);
    for slot in 0..count {
        let observer = Observer {
            id: ObserverId(OFFICER.0 + slot),
            name: format!("Warden {slot}"),
            region: REGION,
            x: 50_040 + slot as i32 * 40,
            y: 30_040,
            z: 8_000,
            heading: 900,
            realm: Realm::Ardan,
            guild: Some(GUILD),
            group: Some(group),
            playing: true,
            staff: false,
        };
        observer_entered(&mut app.world, observer);
    }
}

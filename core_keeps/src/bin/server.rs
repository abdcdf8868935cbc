use std::io::{BufRead, BufReader};
use std::net::TcpListener;
use std::thread;

use bevy::app::Update;
use crossbeam_channel::{unbounded, Receiver, Sender};
use tracing::{info, warn};

use core_keeps::metrics::{collect_metrics, FrontierMetrics};
use core_keeps::network::{broadcast_latest, start_feed_server};
use core_keeps::{
    all_keep_status, build_frontier_app, keep_status, load_keep_into, run_tick, set_keep_doors,
    submit_admin_claim, submit_attack, submit_capture, submit_level, submit_release, BannerKind,
    FeedHistory, FrontierConfig, GuardId, GuardKind, GuardPost, Guild, GuildDirectory, GuildId,
    HookPoint, KeepBanner, KeepBlueprint, KeepDoor, KeepId, KeepSection, Patrol, RegionAtlas,
    RegionId, RegionInfo,
};
use keep_runtime::{parse_command_line, CommandPayload};
use keep_schema::{DoorState, KeepKind, KeepRow, KeepShape, Realm};

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mut app = build_frontier_app();
    app.insert_resource(FrontierMetrics::default());
    app.add_systems(Update, collect_metrics);

    let config = app.world.resource::<FrontierConfig>().clone();

    seed_demo_frontier(&mut app);

    let feed_server = start_feed_server(config.feed_bind);
    let command_rx = spawn_command_listener(config.command_bind);

    info!(
        command_bind = %config.command_bind,
        feed_bind = %config.feed_bind,
        "Greymarch frontier server ready"
    );

    while let Ok(command) = command_rx.recv() {
        match command {
            CommandPayload::Turn { steps } => {
                for _ in 0..steps {
                    run_tick(&mut app);
                }
                let history = app.world.resource::<FeedHistory>();
                broadcast_latest(feed_server.as_ref(), history);

                let metrics = app.world.resource::<FrontierMetrics>();
                info!(
                    target: "greymarch::server",
                    steps,
                    ticks = metrics.ticks,
                    keeps = metrics.keeps,
                    claimed = metrics.claimed_keeps,
                    in_combat = metrics.keeps_in_combat,
                    armed_timers = metrics.armed_timers,
                    "turn.completed"
                );
            }
            CommandPayload::Attack { keep_id, attacker } => {
                if submit_attack(&mut app.world, KeepId(keep_id), attacker) {
                    info!(
                        target: "greymarch::server",
                        keep_id,
                        attacker = %attacker,
                        "command.applied=attack"
                    );
                } else {
                    warn!(
                        target: "greymarch::server",
                        keep_id,
                        "command.rejected=unknown_keep"
                    );
                }
            }
            CommandPayload::Door { keep_id, open } => {
                if set_keep_doors(&mut app.world, KeepId(keep_id), open) {
                    info!(
                        target: "greymarch::server",
                        keep_id,
                        open,
                        "command.applied=door"
                    );
                } else {
                    warn!(
                        target: "greymarch::server",
                        keep_id,
                        "command.rejected=unknown_keep"
                    );
                }
            }
            CommandPayload::Claim { keep_id, guild } => {
                match submit_admin_claim(&mut app.world, KeepId(keep_id), &guild) {
                    Ok(()) => info!(
                        target: "greymarch::server",
                        keep_id,
                        guild = %guild,
                        "command.applied=claim"
                    ),
                    Err(err) => warn!(
                        target: "greymarch::server",
                        keep_id,
                        error = %err,
                        "command.rejected=claim"
                    ),
                }
            }
            CommandPayload::Release { keep_id } => {
                match submit_release(&mut app.world, KeepId(keep_id)) {
                    Ok(()) => info!(
                        target: "greymarch::server",
                        keep_id,
                        "command.applied=release"
                    ),
                    Err(err) => warn!(
                        target: "greymarch::server",
                        keep_id,
                        error = %err,
                        "command.rejected=release"
                    ),
                }
            }
            CommandPayload::Capture { keep_id, realm } => {
                match submit_capture(&mut app.world, KeepId(keep_id), realm) {
                    Ok(()) => info!(
                        target: "greymarch::server",
                        keep_id,
                        realm = %realm,
                        "command.applied=capture"
                    ),
                    Err(err) => warn!(
                        target: "greymarch::server",
                        keep_id,
                        error = %err,
                        "command.rejected=capture"
                    ),
                }
            }
            CommandPayload::Level { keep_id, target } => {
                match submit_level(&mut app.world, KeepId(keep_id), target) {
                    Ok(()) => info!(
                        target: "greymarch::server",
                        keep_id,
                        level = target,
                        "command.applied=level"
                    ),
                    Err(err) => warn!(
                        target: "greymarch::server",
                        keep_id,
                        error = %err,
                        "command.rejected=level"
                    ),
                }
            }
            CommandPayload::Status { keep_id } => {
                let states = match keep_id {
                    Some(raw) => keep_status(&app.world, KeepId(raw)).into_iter().collect(),
                    None => all_keep_status(&app.world),
                };
                report_status(keep_id, states);
            }
        }
    }
}

fn report_status(requested: Option<u16>, states: Vec<keep_schema::KeepState>) {
    if states.is_empty() {
        warn!(
            target: "greymarch::server",
            keep_id = requested,
            "status.unknown_keep"
        );
        return;
    }
    for state in states {
        info!(
            target: "greymarch::server",
            keep = state.keep_id,
            name = %state.name,
            realm = %state.realm,
            level = state.level,
            guild = state.claimed_guild.as_deref().unwrap_or("-"),
            under_siege = state.under_siege,
            "status"
        );
    }
}

fn spawn_command_listener(bind_addr: std::net::SocketAddr) -> Receiver<CommandPayload> {
    let listener = TcpListener::bind(bind_addr).expect("command listener bind failed");
    listener
        .set_nonblocking(true)
        .expect("set_nonblocking failed");

    let (sender, receiver) = unbounded::<CommandPayload>();
    thread::spawn(move || loop {
        match listener.accept() {
            Ok((stream, addr)) => {
                info!("Command client connected: {}", addr);
                let sender = sender.clone();
                thread::spawn(move || handle_client(stream, sender));
            }
            Err(ref err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                thread::sleep(std::time::Duration::from_millis(50));
            }
            Err(err) => {
                warn!("Error accepting command client: {}", err);
                thread::sleep(std::time::Duration::from_millis(200));
            }
        }
    });

    receiver
}

fn handle_client(stream: std::net::TcpStream, sender: Sender<CommandPayload>) {
    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line) {
            Ok(0) => break,
            Ok(_) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                match parse_command_line(trimmed) {
                    Ok(payload) => {
                        if sender.send(payload).is_err() {
                            break;
                        }
                    }
                    Err(err) => warn!("Invalid command '{}': {}", trimmed, err),
                }
            }
            Err(err) => {
                warn!("Command read error: {}", err);
                break;
            }
        }
    }
}

/// Stand up a small demo frontier so the server is explorable out of
/// the box: one region, one guild, a fortress and two towers.
fn seed_demo_frontier(app: &mut bevy::prelude::App) {
    app.world.resource_mut::<RegionAtlas>().insert_region(
        RegionId(163),
        RegionInfo {
            name: "The Greymarch".into(),
            frontier: true,
        },
    );
    app.world
        .resource_mut::<GuildDirectory>()
        .register(Guild::new(GuildId(1), "Wardens of the Vale", Realm::Ardan));

    for blueprint in demo_blueprints() {
        let name = blueprint.row.name.clone();
        match load_keep_into(&mut app.world, blueprint) {
            Ok(id) => info!(
                target: "greymarch::server",
                keep = %id,
                name = %name,
                "keep.seeded"
            ),
            Err(err) => warn!(
                target: "greymarch::server",
                name = %name,
                error = %err,
                "keep.seed_failed"
            ),
        }
    }
}

fn demo_blueprints() -> Vec<KeepBlueprint> {
    vec![
        demo_fortress("Caer Draeth", 21, 53_400, 23_700),
        demo_tower("Draeth Outlook", 22, 57_000, 21_500),
        demo_tower("Greymarch Watch", 23, 49_800, 27_900),
    ]
}

fn demo_row(name: &str, keep_id: u16, kind: KeepKind, shape: KeepShape, x: i32, y: i32) -> KeepRow {
    KeepRow {
        keep_id,
        name: name.into(),
        region: 163,
        x,
        y,
        z: 8_000,
        heading: 1_024,
        realm: Realm::Ardan as u8,
        original_realm: Realm::Ardan as u8,
        kind: kind as u8,
        shape: shape as u8,
        level: 1,
        base_level: 50,
        difficulty_ardan: 1,
        difficulty_veska: 2,
        difficulty_morwen: 2,
        claimed_guild: String::new(),
    }
}

fn demo_guard(id: u32, name: &str, kind: GuardKind, section: Option<u8>) -> GuardPost {
    GuardPost {
        id: GuardId(id),
        name: name.into(),
        kind,
        level: 0,
        alive: true,
        realm: Realm::Ardan,
        guild: None,
        section,
    }
}

fn demo_door(id: u32, name: &str, x: i32, y: i32) -> KeepDoor {
    KeepDoor {
        id,
        name: name.into(),
        x,
        y,
        z: 8_000,
        heading: 0,
        state: DoorState::Closed,
        health: 8_000,
        max_health: 8_000,
        level: 0,
        realm: Realm::Ardan,
    }
}

fn demo_fortress(name: &str, keep_id: u16, x: i32, y: i32) -> KeepBlueprint {
    let row = demo_row(name, keep_id, KeepKind::Fortress, KeepShape::Bastion, x, y);
    let mut core = KeepSection::new(0, 10, x, y, 8_000, 40_000);
    core.add_hook(HookPoint {
        id: 97,
        x: x + 64,
        y: y + 64,
        z: 96,
        min_height: 0,
        occupant: None,
    });
    core.add_hook(HookPoint {
        id: 12,
        x: x - 64,
        y,
        z: 420,
        min_height: 2,
        occupant: None,
    });
    let east_wall = KeepSection::new(1, 3, x + 512, y, 8_000, 20_000);
    let west_wall = KeepSection::new(2, 3, x - 512, y, 8_000, 20_000);
    let base = u32::from(keep_id) * 100;
    KeepBlueprint {
        row,
        sections: vec![core, east_wall, west_wall],
        doors: vec![
            demo_door(base + 1, "Outer Gate", x + 400, y),
            demo_door(base + 2, "Postern Gate", x - 400, y),
        ],
        guards: vec![
            demo_guard(1, "Lord Marshal", GuardKind::Lord, Some(0)),
            demo_guard(2, "Gate Sergeant", GuardKind::Commander, Some(0)),
            demo_guard(3, "Wall Warden", GuardKind::Fighter, Some(1)),
            demo_guard(4, "Wall Warden", GuardKind::Fighter, Some(2)),
            demo_guard(5, "Hastener", GuardKind::Hastener, None),
            demo_guard(6, "Mission Master", GuardKind::MissionMaster, Some(0)),
        ],
        banners: vec![KeepBanner {
            id: 1,
            kind: BannerKind::Realm,
            realm: Realm::Ardan,
            guild: None,
        }],
        patrols: vec![Patrol {
            id: 1,
            name: format!("{name} Wall Walk"),
            level: 0,
            members: vec![GuardId(3), GuardId(4)],
        }],
    }
}

fn demo_tower(name: &str, keep_id: u16, x: i32, y: i32) -> KeepBlueprint {
    let row = demo_row(name, keep_id, KeepKind::Tower, KeepShape::Spur, x, y);
    let mut core = KeepSection::new(0, 11, x, y, 8_000, 16_000);
    core.add_hook(HookPoint {
        id: 97,
        x: x + 32,
        y: y + 32,
        z: 64,
        min_height: 0,
        occupant: None,
    });
    let base = u32::from(keep_id) * 100;
    KeepBlueprint {
        row,
        sections: vec![core],
        doors: vec![demo_door(base + 1, "Tower Door", x + 200, y)],
        guards: vec![
            demo_guard(1, "Tower Captain", GuardKind::Lord, Some(0)),
            demo_guard(2, "Tower Guard", GuardKind::Fighter, Some(0)),
        ],
        banners: vec![KeepBanner {
            id: 1,
            kind: BannerKind::Realm,
            realm: Realm::Ardan,
            guild: None,
        }],
        patrols: Vec::new(),
    }
}

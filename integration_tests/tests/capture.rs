mod common;

use core_keeps::{
    keep_status, submit_admin_claim, submit_capture, BannerKind, GuardId, GuildDirectory,
    KeepRegistry, KeepStoreHandle,
};
use keep_runtime::{KeepStore, Realm};

#[test]
fn capture_flips_the_keep_to_the_attacking_realm() -> anyhow::Result<()> {
    let (mut app, keep) = common::claimable_frontier();
    submit_admin_claim(&mut app.world, keep, "Oathbound")?;
    for _ in 0..3 {
        app.update();
    }

    submit_capture(&mut app.world, keep, Realm::Veska)?;

    let state = keep_status(&app.world, keep).expect("keep loaded");
    assert_eq!(state.realm, Realm::Veska);
    assert_eq!(state.claimed_guild, None);
    assert_eq!(state.level, 1, "captures reset the keep to the floor level");

    {
        let registry = app.world.resource::<KeepRegistry>();
        let keep_ref = registry.get(keep).expect("keep loaded");
        assert!(
            !keep_ref.level_timer.is_armed() && !keep_ref.bounty_timer.is_armed(),
            "captures leave no stale timers running"
        );

        let fighter = keep_ref.guards.get(&GuardId(2)).expect("fighter posted");
        assert!(!fighter.alive, "garrison falls with the keep");
        assert_eq!(fighter.realm, Realm::Veska);
        assert_eq!(fighter.guild, None);

        let mission = keep_ref.guards.get(&GuardId(3)).expect("mission master posted");
        assert!(mission.alive, "mission masters respawn for the new realm");
        assert_eq!(mission.realm, Realm::Veska);

        let banner = keep_ref.banners.get(&1).expect("banner flown");
        assert_eq!(banner.realm, Realm::Veska);
        assert_eq!(banner.kind, BannerKind::Realm);
    }

    let store = app.world.resource::<KeepStoreHandle>().get();
    let row = store.load_keep(keep.0)?.expect("row persisted");
    assert_eq!(row.realm, Realm::Veska as u8);
    assert_eq!(row.claimed_guild, "");
    Ok(())
}

#[test]
fn recapturing_an_already_veskan_keep_is_stable() -> anyhow::Result<()> {
    let (mut app, keep) = common::claimable_frontier();
    submit_capture(&mut app.world, keep, Realm::Veska)?;
    let first = keep_status(&app.world, keep).expect("keep loaded");

    submit_capture(&mut app.world, keep, Realm::Veska)?;
    let second = keep_status(&app.world, keep).expect("keep loaded");

    assert_eq!(first, second);
    Ok(())
}

#[test]
fn bounty_stops_after_capture() -> anyhow::Result<()> {
    let (mut app, keep) = common::claimable_frontier();
    submit_admin_claim(&mut app.world, keep, "Oathbound")?;
    for _ in 0..2 {
        app.update();
    }
    let paid = {
        let guilds = app.world.resource::<GuildDirectory>();
        guilds.guild(common::GUILD).expect("guild registered").realm_points
    };
    assert!(paid > 0, "claims pay their first bounty within a tick");

    submit_capture(&mut app.world, keep, Realm::Morwen)?;
    for _ in 0..5 {
        app.update();
    }

    let after = {
        let guilds = app.world.resource::<GuildDirectory>();
        guilds.guild(common::GUILD).expect("guild registered").realm_points
    };
    assert_eq!(after, paid, "losing the keep stops the bounty payments");
    Ok(())
}

mod common;

use core_keeps::{
    keep_status, set_keep_doors, submit_attack, submit_claim, submit_release, ClaimError,
    ClaimRefusal, GuildDirectory,
};
use keep_runtime::Realm;

#[test]
fn lone_officer_cannot_claim_without_a_group() {
    let (mut app, keep) = common::claimable_frontier();
    common::enter_claim_group(&mut app, 1);

    let err = submit_claim(&mut app.world, keep, common::OFFICER).unwrap_err();
    assert!(
        matches!(
            err,
            ClaimError::Refused(ClaimRefusal::GroupTooSmall {
                present: 1,
                needed: 8,
            })
        ),
        "expected a head-count refusal, got {err:?}"
    );

    let state = keep_status(&app.world, keep).expect("keep loaded");
    assert_eq!(state.claimed_guild, None);
}

#[test]
fn full_group_claim_drives_the_keep_to_max_level() -> anyhow::Result<()> {
    let (mut app, keep) = common::claimable_frontier();
    common::enter_claim_group(&mut app, 8);

    submit_claim(&mut app.world, keep, common::OFFICER)?;

    let state = keep_status(&app.world, keep).expect("keep loaded");
    assert_eq!(state.claimed_guild.as_deref(), Some("Oathbound"));
    assert_eq!(state.level, 1, "claims restart the keep at the floor level");

    for _ in 0..12 {
        app.update();
    }

    let state = keep_status(&app.world, keep).expect("keep loaded");
    assert_eq!(state.level, 10, "claimed keeps drift up to the ceiling");

    let guilds = app.world.resource::<GuildDirectory>();
    let points = guilds.guild(common::GUILD).expect("guild registered").realm_points;
    assert!(points > 0, "holding a claim should pay the hourly bounty");
    Ok(())
}

#[test]
fn release_drifts_the_keep_back_down() -> anyhow::Result<()> {
    let (mut app, keep) = common::claimable_frontier();
    common::enter_claim_group(&mut app, 8);
    submit_claim(&mut app.world, keep, common::OFFICER)?;
    for _ in 0..12 {
        app.update();
    }

    submit_release(&mut app.world, keep)?;

    let state = keep_status(&app.world, keep).expect("keep loaded");
    assert_eq!(state.claimed_guild, None);
    assert_eq!(state.realm, Realm::Ardan, "releasing never changes the realm");

    for _ in 0..12 {
        app.update();
    }

    let state = keep_status(&app.world, keep).expect("keep loaded");
    assert_eq!(state.level, 1, "unclaimed keeps decay back to the floor");
    Ok(())
}

#[test]
fn siege_blocks_claims_until_the_window_lapses() {
    let (mut app, keep) = common::claimable_frontier();
    common::enter_claim_group(&mut app, 8);

    // A hit only opens a siege window while a door stands open.
    assert!(set_keep_doors(&mut app.world, keep, true));
    assert!(submit_attack(&mut app.world, keep, Realm::Veska));
    let err = submit_claim(&mut app.world, keep, common::OFFICER).unwrap_err();
    assert!(matches!(
        err,
        ClaimError::Refused(ClaimRefusal::InCombat { .. })
    ));
    let state = keep_status(&app.world, keep).expect("keep loaded");
    assert!(state.under_siege);

    // Default siege window is five minutes of region time.
    for _ in 0..301 {
        app.update();
    }

    let state = keep_status(&app.world, keep).expect("keep loaded");
    assert!(!state.under_siege, "attacks age out of the siege window");
    submit_claim(&mut app.world, keep, common::OFFICER).expect("claim after the window");
}

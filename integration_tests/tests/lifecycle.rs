mod common;

use map_core::{CellFlags, CoreState};

/// Territory next to a core promotes instantly while the cluster is
/// small, then switches to the timed pending path as it grows.
#[test]
fn growth_moves_from_instant_to_timed_promotion() {
    let mut engine = common::small_engine();
    common::register(&engine, &["azalea"]);

    common::paint(&mut engine, "azalea", vec![common::cell(10, 10)], 0.0);
    let report = engine.run_maintenance(10.0).expect("pass");
    assert_eq!(report.promoted, 1);

    // Grow to the instant threshold of 8: each pass promotes the cells
    // that touch a live core.
    let row: Vec<_> = (11..18).map(|x| common::cell(x, 10)).collect();
    common::paint(&mut engine, "azalea", row, 20.0);
    let mut promoted = 0;
    for pass in 0..7 {
        let report = engine
            .run_maintenance(30.0 + pass as f64)
            .expect("pass");
        promoted += report.promoted;
        assert_eq!(report.pending_marked, 0);
    }
    assert_eq!(promoted, 7);

    // The ninth tile joins exactly threshold existing tiles: still
    // instant.
    common::paint(&mut engine, "azalea", vec![common::cell(18, 10)], 100.0);
    let report = engine.run_maintenance(105.0).expect("pass");
    assert_eq!(report.promoted, 1);
    assert_eq!(report.pending_marked, 0);

    // The tenth tips the cluster past the threshold: pending.
    common::paint(&mut engine, "azalea", vec![common::cell(19, 10)], 100.0);
    let report = engine.run_maintenance(110.0).expect("pass");
    assert_eq!(report.promoted, 0);
    assert_eq!(report.pending_marked, 1);

    // Before the wait elapses nothing moves; after it, promotion.
    let report = engine.run_maintenance(500.0).expect("pass");
    assert_eq!(report.promoted, 0);
    let report = engine.run_maintenance(1_200.0).expect("pass");
    assert_eq!(report.promoted, 1);
}

/// Capturing a live core starts a grace countdown; if the captor holds
/// it past the lifetime, the flag clears but the tiles stay theirs.
#[test]
fn captured_core_expires_into_plain_territory() {
    let mut engine = common::small_engine();
    common::register(&engine, &["azalea", "bramble"]);

    common::paint(&mut engine, "azalea", vec![common::cell(10, 10)], 0.0);
    common::paint(&mut engine, "bramble", vec![common::cell(14, 10)], 0.0);
    engine.run_maintenance(10.0).expect("pass");

    // Bramble marches onto azalea's core, at war.
    let advance: Vec<_> = (10..14).rev().map(|x| common::cell(x, 10)).collect();
    let plan = engine
        .plan_paint(
            "bramble",
            "painter-1",
            advance,
            &["azalea".into()],
            &[],
            100.0,
        )
        .expect("plan");
    assert!(plan.verdicts.iter().all(|v| v.verdict.is_accepted()));
    engine.commit_paint(&plan);

    let core = engine.shared().grid.read_cell(10, 10).expect("in range");
    assert_eq!(core.faction, Some(2));
    assert!(core.flags.contains(CellFlags::CORE));
    let CoreState::Core {
        expiry_ms: Some(expiry),
    } = core.core_state()
    else {
        panic!("captured core should carry an expiry");
    };
    assert_eq!(expiry, 100.0 + 10_000.0);

    // Held past the grace period: the flag clears, ownership stays.
    let report = engine.run_maintenance(expiry + 1.0).expect("pass");
    assert_eq!(report.expired, 1);
    let cell = engine.shared().grid.read_cell(10, 10).expect("in range");
    assert_eq!(cell.faction, Some(2));
    assert!(!cell.flags.contains(CellFlags::CORE));
}

/// Retaking a captured core before it expires makes it permanent again
/// on the next maintenance pass.
#[test]
fn recaptured_core_returns_to_permanence() {
    let mut engine = common::small_engine();
    common::register(&engine, &["azalea", "bramble"]);

    common::paint(&mut engine, "azalea", vec![common::cell(10, 10)], 0.0);
    common::paint(&mut engine, "bramble", vec![common::cell(12, 10)], 0.0);
    engine.run_maintenance(10.0).expect("pass");

    let take = |engine: &mut map_core::Orchestrator, faction: &str, enemy: &str, now: f64| {
        let plan = engine
            .plan_paint(
                faction,
                "painter-1",
                vec![common::cell(11, 10), common::cell(10, 10)],
                &[enemy.into()],
                &[],
                now,
            )
            .expect("plan");
        engine.commit_paint(&plan);
    };

    take(&mut engine, "bramble", "azalea", 100.0);
    let stolen = engine.shared().grid.read_cell(10, 10).expect("in range");
    assert!(matches!(
        stolen.core_state(),
        CoreState::Core { expiry_ms: Some(_) }
    ));

    // Azalea takes it back well inside the grace period. Azalea holds
    // no live core at this moment, so the enclave rule is waived.
    take(&mut engine, "azalea", "bramble", 500.0);
    let report = engine.run_maintenance(600.0).expect("pass");
    assert!(report.made_permanent >= 1);
    let cell = engine.shared().grid.read_cell(10, 10).expect("in range");
    assert_eq!(cell.faction, Some(1));
    assert_eq!(cell.core_state(), CoreState::Core { expiry_ms: None });
}

/// Removing a faction zeroes its cells; the integrity pass afterwards
/// finds nothing left to fix.
#[test]
fn faction_removal_leaves_a_clean_grid() {
    let mut engine = common::small_engine();
    common::register(&engine, &["azalea", "bramble"]);
    common::paint(
        &mut engine,
        "azalea",
        vec![common::cell(5, 5), common::cell(6, 5)],
        0.0,
    );
    common::paint(&mut engine, "bramble", vec![common::cell(20, 20)], 0.0);
    engine.run_maintenance(10.0).expect("pass");

    let cleared = engine.remove_faction("azalea").expect("remove");
    assert_eq!(cleared, 2);
    assert_eq!(engine.shared().counters.tiles(1), 0);
    assert_eq!(engine.shared().counters.cores(1), 0);
    assert_eq!(engine.run_integrity(20.0).expect("integrity"), 0);

    // Bramble is untouched.
    assert_eq!(engine.shared().counters.tiles(2), 1);
}

use map_core::{EngineConfig, Orchestrator, PaintCell, PaintOutcome};

/// Full-size engine with a small worker pool, suitable for scenario
/// tests that exercise the real 500x500 grid.
pub fn full_size_engine() -> Orchestrator {
    Orchestrator::new(EngineConfig {
        worker_threads: Some(2),
        max_factions: 64,
        ..EngineConfig::default()
    })
}

/// Small engine for lifecycle tests that want fast maintenance scans.
pub fn small_engine() -> Orchestrator {
    Orchestrator::new(EngineConfig {
        grid_size: 48,
        worker_threads: Some(2),
        max_factions: 64,
        instant_core_threshold: 8,
        core_pending_wait_ms: 1_000,
        max_core_tiles: 16,
        captured_core_lifetime_ms: 10_000,
        ..EngineConfig::default()
    })
}

pub fn register(orchestrator: &Orchestrator, factions: &[&str]) {
    for id in factions {
        orchestrator.register_faction(id).expect("faction slot");
    }
    orchestrator.register_player("painter-1").expect("player slot");
}

/// Plan and commit one paint batch, panicking on plumbing failure.
pub fn paint(
    orchestrator: &mut Orchestrator,
    faction: &str,
    cells: Vec<PaintCell>,
    now_ms: f64,
) -> PaintOutcome {
    let plan = orchestrator
        .plan_paint(faction, "painter-1", cells, &[], &[], now_ms)
        .expect("paint plan");
    orchestrator.commit_paint(&plan)
}

pub fn cell(x: u32, y: u32) -> PaintCell {
    PaintCell {
        x,
        y,
        color: 0x3366FF,
    }
}

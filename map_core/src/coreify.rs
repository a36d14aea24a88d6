//! Core-tile lifecycle: `Plain → PendingCore → Core → (Expired → Plain)`.
//!
//! A maintenance pass is split in two halves so it can run on worker
//! threads: [`plan_core_pass`] reads the grid and proposes transitions
//! for a Y-band, and the orchestrator commits them, enforcing the
//! per-faction live-core quota at commit time (band tasks run
//! concurrently and cannot see each other's promotions).

use ahash::{AHashMap, AHashSet};

use crate::{
    cache::FactionCounters,
    cell::CoreState,
    cluster::{adjacent_to_live_core, OwnerComponents},
    config::EngineConfig,
    grid::{TileGrid, YBand},
};

/// One proposed change to a cell's core state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CoreTransition {
    /// First core for a faction that owns tiles but holds no live core
    /// anywhere. One proposal per faction per band; the orchestrator
    /// applies at most one.
    Seed { x: u32, y: u32 },
    /// Plain or pending cell becomes a permanent core.
    Promote { x: u32, y: u32 },
    /// Plain cell starts the timed coreification wait.
    MarkPending { x: u32, y: u32, since_ms: f64 },
    /// Pending cell lost core adjacency before the timer elapsed.
    ClearPending { x: u32, y: u32 },
    /// Captured core ran out its grace period; flag clears, ownership
    /// stays.
    Expire { x: u32, y: u32 },
    /// Owner-held core sheds its expiry and becomes permanent.
    MakePermanent { x: u32, y: u32 },
}

impl CoreTransition {
    pub fn coord(&self) -> (u32, u32) {
        match *self {
            CoreTransition::Seed { x, y }
            | CoreTransition::Promote { x, y }
            | CoreTransition::MarkPending { x, y, .. }
            | CoreTransition::ClearPending { x, y }
            | CoreTransition::Expire { x, y }
            | CoreTransition::MakePermanent { x, y } => (x, y),
        }
    }
}

/// Propose core transitions for every owned cell in `band`.
///
/// A faction that owns tiles but holds no live core anywhere gets one
/// [`CoreTransition::Seed`] proposal: its first plain cell in row-major
/// scan order. Concurrent bands may each propose a seed for the same
/// faction; the orchestrator applies only the first.
///
/// `captured` records the original owner of captured cores; a core with
/// an expiry but no entry (e.g. after a snapshot import) is treated as
/// owner-held and made permanent, per the engine's core-owner ==
/// tile-owner invariant.
pub fn plan_core_pass(
    grid: &TileGrid,
    config: &EngineConfig,
    counters: &FactionCounters,
    components: &OwnerComponents,
    captured: &AHashMap<(u32, u32), u16>,
    band: YBand,
    now_ms: f64,
) -> Vec<CoreTransition> {
    let mut transitions = Vec::new();
    let mut seeded: AHashSet<u16> = AHashSet::new();
    for y in band.rows() {
        for x in 0..grid.size() {
            let Some(cell) = grid.read_cell(x, y) else {
                continue;
            };
            let Some(faction) = cell.faction else {
                continue;
            };
            match cell.core_state() {
                CoreState::Plain => {
                    if counters.cores(faction) == 0 {
                        if seeded.insert(faction) {
                            transitions.push(CoreTransition::Seed { x, y });
                        }
                        continue;
                    }
                    if !adjacent_to_live_core(grid, x, y, faction, now_ms) {
                        continue;
                    }
                    // The component already counts the freshly painted
                    // cell, so the threshold compares against one more
                    // than the pre-existing cluster.
                    let cluster_size = components.component_size(x, y) as usize;
                    if cluster_size <= config.instant_core_threshold + 1 {
                        transitions.push(CoreTransition::Promote { x, y });
                    } else {
                        transitions.push(CoreTransition::MarkPending {
                            x,
                            y,
                            since_ms: now_ms,
                        });
                    }
                }
                CoreState::Pending { since_ms } => {
                    if !adjacent_to_live_core(grid, x, y, faction, now_ms) {
                        transitions.push(CoreTransition::ClearPending { x, y });
                    } else if now_ms - since_ms >= config.core_pending_wait_ms as f64 {
                        transitions.push(CoreTransition::Promote { x, y });
                    }
                }
                CoreState::Core { expiry_ms: None } => {}
                CoreState::Core {
                    expiry_ms: Some(expiry),
                } => {
                    if now_ms >= expiry {
                        transitions.push(CoreTransition::Expire { x, y });
                    } else {
                        let owner_held = match captured.get(&(x, y)) {
                            Some(&original) => original == faction,
                            None => true,
                        };
                        if owner_held {
                            transitions.push(CoreTransition::MakePermanent { x, y });
                        }
                    }
                }
            }
        }
    }
    transitions
}

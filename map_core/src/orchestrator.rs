//! The orchestrator: single writer of committed grid state.
//!
//! Workers only ever propose: paint plans, core transitions, integrity
//! fixes. The orchestrator applies them here, keeping the atomic
//! counters in step with every write and bumping the cache version once
//! per committed batch. Maintenance and integrity passes fan out across
//! Y-bands, one task per worker, then commit sequentially so quota
//! checks see a consistent count.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use ahash::{AHashMap, AHashSet};
use thiserror::Error;

use crate::{
    cache::{AllianceMap, DerivedCaches},
    cell::{Cell, CellFlags, CoreState},
    config::EngineConfig,
    coreify::CoreTransition,
    grid::partition_bands,
    state::EngineShared,
    tasks::{
        CellFix, FactionStats, PaintCell, PaintPlan, PaintRequest, TaskOutput, TaskSpec,
    },
    worker::{default_worker_count, DispatchError, WorkerPool},
    zoc::{Landmark, ZocMap},
};

/// Milliseconds since the epoch, as the engine's clock type.
pub fn epoch_ms() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as f64)
        .unwrap_or(0.0)
}

/// Landmark registry entry as collaborators supply it, owner still an
/// external identifier.
#[derive(Debug, Clone)]
pub struct LandmarkSpec {
    pub name: String,
    pub x: u32,
    pub y: u32,
    pub radius: u32,
    pub owner: Option<String>,
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("unknown faction {0:?}")]
    UnknownFaction(String),
    #[error("unknown player {0:?}")]
    UnknownPlayer(String),
    #[error("faction table is full, cannot register {0:?}")]
    FactionTableFull(String),
    #[error("player table is full, cannot register {0:?}")]
    PlayerTableFull(String),
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

/// What a committed paint did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaintOutcome {
    pub applied: usize,
    pub cost: u64,
}

/// Summary of one maintenance pass; `changed` lists every coordinate
/// whose core state moved, for collaborators to merge into their mirror.
#[derive(Debug, Clone, Default)]
pub struct MaintenanceReport {
    pub promoted: usize,
    pub pending_marked: usize,
    pub pending_cleared: usize,
    pub expired: usize,
    pub made_permanent: usize,
    pub quota_deferred: usize,
    pub changed: Vec<(u32, u32)>,
}

pub struct Orchestrator {
    shared: Arc<EngineShared>,
    pool: WorkerPool,
    caches: DerivedCaches,
    alliances: AllianceMap,
    zoc: Arc<ZocMap>,
    landmarks: Vec<Landmark>,
    /// Original owner of each captured core, keyed by coordinate.
    captured: AHashMap<(u32, u32), u16>,
    /// Faction indices whose identifiers were logically deleted; slots
    /// stay allocated, cells get zeroed.
    removed: AHashSet<u16>,
}

impl Orchestrator {
    pub fn new(config: EngineConfig) -> Self {
        let workers = config.worker_threads.unwrap_or_else(default_worker_count);
        let shared = Arc::new(EngineShared::new(config));
        let pool = WorkerPool::new(Arc::clone(&shared), workers);
        Self {
            shared,
            pool,
            caches: DerivedCaches::default(),
            alliances: AllianceMap::default(),
            zoc: Arc::new(ZocMap::default()),
            landmarks: Vec::new(),
            captured: AHashMap::new(),
            removed: AHashSet::new(),
        }
    }

    pub fn shared(&self) -> &Arc<EngineShared> {
        &self.shared
    }

    pub fn config(&self) -> &EngineConfig {
        &self.shared.config
    }

    pub fn worker_count(&self) -> usize {
        self.pool.worker_count()
    }

    /// Route a raw task to the pool. Collaborators that only read (stats
    /// dashboards, exporters) can bypass the command surface this way.
    pub fn dispatch(&self, spec: TaskSpec) -> crate::worker::TaskHandle {
        self.pool.dispatch(spec)
    }

    /// Register (or look up) a faction identifier.
    pub fn register_faction(&self, id: &str) -> Result<u16, EngineError> {
        let mut table = self
            .shared
            .factions
            .write()
            .expect("faction table lock poisoned");
        table
            .index_of(id)
            .map(|index| index as u16)
            .ok_or_else(|| EngineError::FactionTableFull(id.to_string()))
    }

    pub fn register_player(&self, id: &str) -> Result<u32, EngineError> {
        let mut table = self
            .shared
            .players
            .write()
            .expect("player table lock poisoned");
        table
            .index_of(id)
            .ok_or_else(|| EngineError::PlayerTableFull(id.to_string()))
    }

    /// Replace the alliance snapshot and rebuild the ZOC map, which
    /// depends on it.
    pub fn set_alliances(&mut self, pairs: &[(String, String)]) {
        let resolved: Vec<(u16, u16)> = pairs
            .iter()
            .filter_map(|(a, b)| {
                Some((self.shared.faction_index(a)?, self.shared.faction_index(b)?))
            })
            .collect();
        self.alliances = AllianceMap::from_pairs(&resolved);
        self.rebuild_zoc();
    }

    /// Replace the landmark registry and rebuild the ZOC map.
    pub fn set_landmarks(&mut self, specs: &[LandmarkSpec]) {
        self.landmarks = specs
            .iter()
            .map(|spec| Landmark {
                name: spec.name.clone(),
                x: spec.x,
                y: spec.y,
                radius: spec.radius,
                owner: spec
                    .owner
                    .as_deref()
                    .and_then(|id| self.shared.faction_index(id))
                    .unwrap_or(0),
            })
            .collect();
        self.rebuild_zoc();
    }

    fn rebuild_zoc(&mut self) {
        self.zoc = Arc::new(ZocMap::rebuild(
            &self.landmarks,
            &self.alliances,
            self.shared.grid.size(),
        ));
    }

    /// Validate and price a paint batch on a worker. War and truce
    /// state arrive per request; they are business rules owned by a
    /// collaborator and consulted here as a snapshot.
    pub fn plan_paint(
        &self,
        faction_id: &str,
        painter_id: &str,
        cells: Vec<PaintCell>,
        wars: &[String],
        truces: &[String],
        now_ms: f64,
    ) -> Result<PaintPlan, EngineError> {
        let faction = self
            .shared
            .faction_index(faction_id)
            .ok_or_else(|| EngineError::UnknownFaction(faction_id.to_string()))?;
        let painter = self
            .shared
            .players
            .read()
            .expect("player table lock poisoned")
            .lookup(painter_id)
            .ok_or_else(|| EngineError::UnknownPlayer(painter_id.to_string()))?;

        let resolve = |ids: &[String]| -> AHashSet<u16> {
            ids.iter()
                .filter_map(|id| self.shared.faction_index(id))
                .collect()
        };

        let request = PaintRequest {
            faction,
            painter,
            cells,
            allies: self.alliances.allies_of(faction),
            wars: resolve(wars),
            truces: resolve(truces),
            zoc: Arc::clone(&self.zoc),
            now_ms,
        };
        let handle = self.pool.dispatch(TaskSpec::PreparePaint(Arc::new(request)));
        match handle.wait()? {
            TaskOutput::PaintPlan(plan) => Ok(plan),
            other => unreachable!("PREPARE_PAINT returned {}", output_name(&other)),
        }
    }

    /// Apply a validated plan's writes. The plan was computed against an
    /// earlier grid view; writes are applied as proposed, last committed
    /// write winning, which is the engine's declared consistency model.
    pub fn commit_paint(&mut self, plan: &PaintPlan) -> PaintOutcome {
        let mut applied = 0usize;
        for write in &plan.writes {
            let Some(previous) = self.shared.grid.read_cell(write.x, write.y) else {
                continue;
            };
            self.note_capture(write.x, write.y, &previous, &write.cell);
            self.apply_write(write.x, write.y, &previous, &write.cell);
            applied += 1;
        }
        if applied > 0 {
            let version = self.shared.version.bump();
            log::info!(
                "paint committed: faction {} applied {applied} cells at version {version}",
                plan.faction
            );
        }
        PaintOutcome {
            applied,
            cost: plan.total_cost,
        }
    }

    /// Run the core lifecycle pass, fanned out across Y-bands.
    pub fn run_maintenance(&mut self, now_ms: f64) -> Result<MaintenanceReport, EngineError> {
        let captured = Arc::new(self.captured.clone());
        let bands = partition_bands(self.shared.grid.size(), self.pool.worker_count());
        let handles: Vec<_> = bands
            .into_iter()
            .map(|band| {
                self.pool.dispatch(TaskSpec::ProcessCoreification {
                    band: Some(band),
                    captured: Arc::clone(&captured),
                    now_ms,
                })
            })
            .collect();

        let mut transitions = Vec::new();
        for handle in handles {
            match handle.wait()? {
                TaskOutput::CoreTransitions(mut batch) => transitions.append(&mut batch),
                other => unreachable!("PROCESS_COREIFICATION returned {}", output_name(&other)),
            }
        }

        let mut report = MaintenanceReport::default();
        // Releases commit before claims, so a core slot freed anywhere
        // in the grid is available to every promotion in the same pass,
        // independent of scan order.
        let (claims, releases): (Vec<_>, Vec<_>) =
            transitions.into_iter().partition(|transition| {
                matches!(
                    transition,
                    CoreTransition::Seed { .. }
                        | CoreTransition::Promote { .. }
                        | CoreTransition::MarkPending { .. }
                )
            });
        for transition in releases {
            self.apply_transition(transition, &mut report);
        }
        for transition in claims {
            self.apply_transition(transition, &mut report);
        }
        if !report.changed.is_empty() {
            self.shared.version.bump();
        }
        log::info!(
            "maintenance pass: +{} cores, {} pending, {} expired, {} permanent, {} deferred",
            report.promoted,
            report.pending_marked,
            report.expired,
            report.made_permanent,
            report.quota_deferred
        );
        Ok(report)
    }

    fn apply_transition(&mut self, transition: CoreTransition, report: &mut MaintenanceReport) {
        let (x, y) = transition.coord();
        let Some(cell) = self.shared.grid.read_cell(x, y) else {
            return;
        };
        let Some(faction) = cell.faction else {
            // Ownership changed since the plan was drawn; stale
            // proposals degrade to no-ops.
            return;
        };
        let mut next = cell;
        match transition {
            CoreTransition::Seed { .. } => {
                if cell.core_state() != CoreState::Plain {
                    return;
                }
                // Another band's seed landed first; one core per
                // coreless faction.
                if self.shared.counters.cores(faction) > 0 {
                    return;
                }
                next.set_core_state(CoreState::Core { expiry_ms: None });
            }
            CoreTransition::Promote { .. } => {
                if cell.flags.contains(CellFlags::CORE) {
                    return;
                }
                let cap = self.shared.config.max_core_tiles as i64;
                if self.shared.counters.cores(faction) >= cap {
                    report.quota_deferred += 1;
                    return;
                }
                next.set_core_state(CoreState::Core { expiry_ms: None });
            }
            CoreTransition::MarkPending { since_ms, .. } => {
                if cell.core_state() != CoreState::Plain {
                    return;
                }
                next.set_core_state(CoreState::Pending { since_ms });
                report.pending_marked += 1;
            }
            CoreTransition::ClearPending { .. } => {
                if !matches!(cell.core_state(), CoreState::Pending { .. }) {
                    return;
                }
                next.set_core_state(CoreState::Plain);
                report.pending_cleared += 1;
            }
            CoreTransition::Expire { .. } => {
                if !cell.flags.contains(CellFlags::CORE) {
                    return;
                }
                next.set_core_state(CoreState::Plain);
                self.captured.remove(&(x, y));
                report.expired += 1;
            }
            CoreTransition::MakePermanent { .. } => {
                if !cell.flags.contains(CellFlags::CORE) {
                    return;
                }
                next.set_core_state(CoreState::Core { expiry_ms: None });
                self.captured.remove(&(x, y));
                report.made_permanent += 1;
            }
        }
        if matches!(
            transition,
            CoreTransition::Seed { .. } | CoreTransition::Promote { .. }
        ) {
            report.promoted += 1;
        }
        self.apply_write(x, y, &cell, &next);
        report.changed.push((x, y));
    }

    /// Run the integrity scan and apply its idempotent corrections.
    pub fn run_integrity(&mut self, now_ms: f64) -> Result<usize, EngineError> {
        let live: AHashSet<u16> = {
            let table = self
                .shared
                .factions
                .read()
                .expect("faction table lock poisoned");
            (1..table.len() as u32)
                .map(|index| index as u16)
                .filter(|index| !self.removed.contains(index))
                .collect()
        };
        let live = Arc::new(live);
        let captured = Arc::new(self.captured.clone());
        let bands = partition_bands(self.shared.grid.size(), self.pool.worker_count());
        let handles: Vec<_> = bands
            .into_iter()
            .map(|band| {
                self.pool.dispatch(TaskSpec::CheckIntegrity {
                    band: Some(band),
                    live_factions: Arc::clone(&live),
                    captured: Arc::clone(&captured),
                    now_ms,
                })
            })
            .collect();

        let mut fixes: Vec<CellFix> = Vec::new();
        for handle in handles {
            match handle.wait()? {
                TaskOutput::IntegrityFixes(mut batch) => fixes.append(&mut batch),
                other => unreachable!("CHECK_INTEGRITY returned {}", output_name(&other)),
            }
        }

        for fix in &fixes {
            let Some(previous) = self.shared.grid.read_cell(fix.x, fix.y) else {
                continue;
            };
            log::warn!(
                "integrity fix at ({}, {}): {:?}",
                fix.x,
                fix.y,
                fix.reason
            );
            if !fix.cell.flags.contains(CellFlags::CORE) {
                self.captured.remove(&(fix.x, fix.y));
            }
            self.apply_write(fix.x, fix.y, &previous, &fix.cell);
        }
        if !fixes.is_empty() {
            self.shared.version.bump();
        }
        Ok(fixes.len())
    }

    /// Per-faction aggregates, computed banded on the pool and merged.
    pub fn collect_stats(&self, now_ms: f64) -> Result<Vec<FactionStats>, EngineError> {
        let bands = partition_bands(self.shared.grid.size(), self.pool.worker_count());
        let handles: Vec<_> = bands
            .into_iter()
            .map(|band| {
                self.pool.dispatch(TaskSpec::CalculateStats {
                    band: Some(band),
                    now_ms,
                })
            })
            .collect();

        let mut merged: AHashMap<u16, FactionStats> = AHashMap::new();
        for handle in handles {
            match handle.wait()? {
                TaskOutput::Stats(report) => {
                    for stats in report.per_faction {
                        let entry = merged.entry(stats.faction).or_insert(FactionStats {
                            faction: stats.faction,
                            tiles: 0,
                            cores: 0,
                            points: 0,
                        });
                        entry.tiles += stats.tiles;
                        entry.cores += stats.cores;
                        entry.points += stats.points;
                    }
                }
                other => unreachable!("CALCULATE_STATS returned {}", output_name(&other)),
            }
        }
        let mut stats: Vec<FactionStats> = merged.into_values().collect();
        stats.sort_unstable_by_key(|entry| entry.faction);
        Ok(stats)
    }

    /// Serialize grid plus identifier tables for network export.
    pub fn export_tmap(&self, generated_ms: u64) -> Result<Vec<u8>, EngineError> {
        let handle = self
            .pool
            .dispatch(TaskSpec::GenerateBinaryMap { generated_ms });
        match handle.wait()? {
            TaskOutput::BinaryMap(bytes) => Ok(bytes),
            other => unreachable!("GENERATE_BINARY_MAP returned {}", output_name(&other)),
        }
    }

    /// Logically delete a faction: zero every cell it owns and reset
    /// its counters. The index slot stays allocated forever.
    pub fn remove_faction(&mut self, faction_id: &str) -> Result<usize, EngineError> {
        let faction = self
            .shared
            .faction_index(faction_id)
            .ok_or_else(|| EngineError::UnknownFaction(faction_id.to_string()))?;
        self.removed.insert(faction);

        let size = self.shared.grid.size();
        let empty = Cell::empty();
        let mut cleared = 0usize;
        for y in 0..size {
            for x in 0..size {
                let Some(cell) = self.shared.grid.read_cell(x, y) else {
                    continue;
                };
                if cell.faction != Some(faction) {
                    continue;
                }
                self.captured.remove(&(x, y));
                self.apply_write(x, y, &cell, &empty);
                cleared += 1;
            }
        }
        self.shared.counters.reset(faction);
        if cleared > 0 {
            self.shared.version.bump();
        }
        log::info!("faction {faction_id:?} removed: {cleared} cells cleared");
        Ok(cleared)
    }

    /// Transfer every cell of `from` to `to`. Live cores become captured
    /// cores of the receiving faction with the standard grace period.
    pub fn cede_territory(
        &mut self,
        from_id: &str,
        to_id: &str,
        now_ms: f64,
    ) -> Result<usize, EngineError> {
        let from = self
            .shared
            .faction_index(from_id)
            .ok_or_else(|| EngineError::UnknownFaction(from_id.to_string()))?;
        let to = self
            .shared
            .faction_index(to_id)
            .ok_or_else(|| EngineError::UnknownFaction(to_id.to_string()))?;

        self.caches
            .ensure_valid(&self.shared.grid, self.shared.version.current());
        let coords: Vec<(u32, u32)> = self.caches.tiles_of(from).to_vec();

        let mut moved = 0usize;
        for (x, y) in coords {
            let Some(cell) = self.shared.grid.read_cell(x, y) else {
                continue;
            };
            if cell.faction != Some(from) {
                continue;
            }
            let mut next = cell;
            next.faction = Some(to);
            if cell.is_live_core(now_ms) {
                next.set_core_state(CoreState::Core {
                    expiry_ms: Some(now_ms + self.shared.config.captured_core_lifetime_ms as f64),
                });
                self.captured.entry((x, y)).or_insert(from);
            }
            self.apply_write(x, y, &cell, &next);
            moved += 1;
        }
        if moved > 0 {
            self.shared.version.bump();
        }
        log::info!("cede: {moved} cells moved from {from_id:?} to {to_id:?}");
        Ok(moved)
    }

    /// Orchestrator-private caches, rebuilt on demand against the
    /// current version.
    pub fn caches(&mut self) -> &DerivedCaches {
        self.caches
            .ensure_valid(&self.shared.grid, self.shared.version.current());
        &self.caches
    }

    /// Record capture bookkeeping for one paint write before it lands.
    fn note_capture(&mut self, x: u32, y: u32, previous: &Cell, next: &Cell) {
        let was_core = previous.flags.contains(CellFlags::CORE);
        let stays_core = next.flags.contains(CellFlags::CORE);
        if was_core && stays_core && previous.faction != next.faction {
            if let Some(original) = previous.faction {
                // Chains of captures keep pointing at the first owner.
                self.captured.entry((x, y)).or_insert(original);
            }
        } else if !stays_core {
            self.captured.remove(&(x, y));
        }
    }

    /// The one place committed writes happen: stores the cell and keeps
    /// the atomic tallies in step via add/subtract, never
    /// read-modify-write on the grid bytes.
    fn apply_write(&self, x: u32, y: u32, previous: &Cell, next: &Cell) {
        if let Some(owner) = previous.faction {
            self.shared.counters.add_tiles(owner, -1);
            if previous.flags.contains(CellFlags::CORE) {
                self.shared.counters.add_cores(owner, -1);
            }
        }
        if let Some(owner) = next.faction {
            self.shared.counters.add_tiles(owner, 1);
            if next.flags.contains(CellFlags::CORE) {
                self.shared.counters.add_cores(owner, 1);
            }
        }
        self.shared.grid.write_cell(x, y, next);
    }
}

fn output_name(output: &TaskOutput) -> &'static str {
    match output {
        TaskOutput::Stats(_) => "Stats",
        TaskOutput::PaintPlan(_) => "PaintPlan",
        TaskOutput::Clusters(_) => "Clusters",
        TaskOutput::CoreTransitions(_) => "CoreTransitions",
        TaskOutput::IntegrityFixes(_) => "IntegrityFixes",
        TaskOutput::BinaryMap(_) => "BinaryMap",
    }
}

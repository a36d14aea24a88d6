//! Named computational tasks executed on worker threads.
//!
//! Every task reads the shared grid and returns plain data; committed
//! writes happen only on the orchestrator. Validation outcomes are
//! verdict values inside a successful result, never errors. An error
//! from a task means infrastructure trouble, not a rejected move.

use std::sync::Arc;

use ahash::{AHashMap, AHashSet};
use serde::Serialize;

use crate::{
    cell::{Cell, CellFlags, CoreState},
    cluster::{find_clusters, OwnerComponents},
    coreify::{plan_core_pass, CoreTransition},
    grid::YBand,
    state::EngineShared,
    zoc::ZocMap,
};

/// One proposed cell in a paint batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaintCell {
    pub x: u32,
    pub y: u32,
    pub color: u32,
}

/// Validated-and-priced paint batch request. Diplomacy state arrives as
/// read-only snapshots resolved to dense indices by the orchestrator.
#[derive(Debug, Clone)]
pub struct PaintRequest {
    pub faction: u16,
    pub painter: u32,
    pub cells: Vec<PaintCell>,
    pub allies: AHashSet<u16>,
    /// Factions the painter is currently at war with.
    pub wars: AHashSet<u16>,
    /// Factions protected by an active truce.
    pub truces: AHashSet<u16>,
    pub zoc: Arc<ZocMap>,
    pub now_ms: f64,
}

/// Why a proposed cell was accepted or rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Verdict {
    Accepted,
    OutOfBounds,
    AlliedTerritory,
    TruceBlocked,
    SiegeBlocked,
    Enclave,
}

impl Verdict {
    pub fn is_accepted(self) -> bool {
        self == Verdict::Accepted
    }

    /// Human-readable reason attached to every rejection.
    pub fn reason(self) -> &'static str {
        match self {
            Verdict::Accepted => "accepted",
            Verdict::OutOfBounds => "cell is outside the map",
            Verdict::AlliedTerritory => "cell belongs to an allied faction",
            Verdict::TruceBlocked => "an active truce protects this territory",
            Verdict::SiegeBlocked => {
                "territory is under a hostile zone of control; a war declaration is required"
            }
            Verdict::Enclave => "target is not connected to any of your core territory",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CellVerdict {
    pub x: u32,
    pub y: u32,
    pub verdict: Verdict,
}

/// A grid write the orchestrator may commit verbatim.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CellWrite {
    pub x: u32,
    pub y: u32,
    pub cell: Cell,
}

/// Result of `PreparePaint`: per-cell verdicts, the AP price of the
/// accepted subset, and the writes that would realize it.
#[derive(Debug, Clone)]
pub struct PaintPlan {
    pub faction: u16,
    pub verdicts: Vec<CellVerdict>,
    pub writes: Vec<CellWrite>,
    pub total_cost: u64,
    pub success_rate: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FactionStats {
    pub faction: u16,
    pub tiles: u64,
    pub cores: u64,
    pub points: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatsReport {
    pub band: YBand,
    pub per_faction: Vec<FactionStats>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClusterSummary {
    pub cells: Vec<(u32, u32)>,
    pub has_core: bool,
}

/// What the integrity scan found and how it normalized it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FixReason {
    DeadFactionReference,
    OrphanCoreFlag,
    OrphanPendingFlag,
    ConflictingFlags,
    OverpaintClamped,
    NanStamp,
    OwnerHeldCoreMadePermanent,
}

/// An idempotent correction: writing `cell` back any number of times
/// yields the same grid.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CellFix {
    pub x: u32,
    pub y: u32,
    pub cell: Cell,
    pub reason: FixReason,
}

/// Task request payloads. Large snapshots ride behind `Arc` so cloning
/// a spec for dispatch stays cheap.
#[derive(Debug, Clone)]
pub enum TaskSpec {
    CalculateStats {
        band: Option<YBand>,
        now_ms: f64,
    },
    PreparePaint(Arc<PaintRequest>),
    CalculateClusters {
        faction: u16,
        allies: Arc<AHashSet<u16>>,
        now_ms: f64,
    },
    ProcessCoreification {
        band: Option<YBand>,
        captured: Arc<AHashMap<(u32, u32), u16>>,
        now_ms: f64,
    },
    CheckIntegrity {
        band: Option<YBand>,
        live_factions: Arc<AHashSet<u16>>,
        captured: Arc<AHashMap<(u32, u32), u16>>,
        now_ms: f64,
    },
    GenerateBinaryMap {
        generated_ms: u64,
    },
    /// Deliberately panics inside the worker; exists so the crash path
    /// stays covered.
    #[cfg(test)]
    CrashForTests,
}

impl TaskSpec {
    pub fn name(&self) -> &'static str {
        match self {
            TaskSpec::CalculateStats { .. } => "CALCULATE_STATS",
            TaskSpec::PreparePaint(_) => "PREPARE_PAINT",
            TaskSpec::CalculateClusters { .. } => "CALCULATE_CLUSTERS",
            TaskSpec::ProcessCoreification { .. } => "PROCESS_COREIFICATION",
            TaskSpec::CheckIntegrity { .. } => "CHECK_INTEGRITY",
            TaskSpec::GenerateBinaryMap { .. } => "GENERATE_BINARY_MAP",
            #[cfg(test)]
            TaskSpec::CrashForTests => "CRASH_FOR_TESTS",
        }
    }
}

/// Task result payloads, one variant per spec.
#[derive(Debug, Clone)]
pub enum TaskOutput {
    Stats(StatsReport),
    PaintPlan(PaintPlan),
    Clusters(Vec<ClusterSummary>),
    CoreTransitions(Vec<CoreTransition>),
    IntegrityFixes(Vec<CellFix>),
    BinaryMap(Vec<u8>),
}

/// Run one task to completion against the shared state.
pub fn execute(shared: &EngineShared, spec: &TaskSpec) -> TaskOutput {
    match spec {
        TaskSpec::CalculateStats { band, now_ms } => TaskOutput::Stats(calculate_stats(
            shared,
            band.unwrap_or_else(|| YBand::full(shared.grid.size())),
            *now_ms,
        )),
        TaskSpec::PreparePaint(request) => TaskOutput::PaintPlan(prepare_paint(shared, request)),
        TaskSpec::CalculateClusters {
            faction,
            allies,
            now_ms,
        } => {
            let clusters = find_clusters(&shared.grid, *faction, allies, &[], *now_ms)
                .into_iter()
                .map(|cluster| ClusterSummary {
                    has_core: cluster.has_core,
                    cells: cluster.cells,
                })
                .collect();
            TaskOutput::Clusters(clusters)
        }
        TaskSpec::ProcessCoreification {
            band,
            captured,
            now_ms,
        } => {
            let components = OwnerComponents::build(&shared.grid);
            let transitions = plan_core_pass(
                &shared.grid,
                &shared.config,
                &shared.counters,
                &components,
                captured,
                band.unwrap_or_else(|| YBand::full(shared.grid.size())),
                *now_ms,
            );
            TaskOutput::CoreTransitions(transitions)
        }
        TaskSpec::CheckIntegrity {
            band,
            live_factions,
            captured,
            now_ms,
        } => TaskOutput::IntegrityFixes(check_integrity(
            shared,
            band.unwrap_or_else(|| YBand::full(shared.grid.size())),
            live_factions,
            captured,
            *now_ms,
        )),
        TaskSpec::GenerateBinaryMap { generated_ms } => {
            TaskOutput::BinaryMap(generate_binary_map(shared, *generated_ms))
        }
        #[cfg(test)]
        TaskSpec::CrashForTests => panic!("crash task requested"),
    }
}

fn calculate_stats(shared: &EngineShared, band: YBand, now_ms: f64) -> StatsReport {
    let mut tiles: AHashMap<u16, u64> = AHashMap::new();
    let mut cores: AHashMap<u16, u64> = AHashMap::new();
    for y in band.rows() {
        for x in 0..shared.grid.size() {
            let Some(cell) = shared.grid.read_cell(x, y) else {
                continue;
            };
            let Some(faction) = cell.faction else {
                continue;
            };
            *tiles.entry(faction).or_default() += 1;
            if cell.is_live_core(now_ms) {
                *cores.entry(faction).or_default() += 1;
            }
        }
    }
    let mut per_faction: Vec<FactionStats> = tiles
        .into_iter()
        .map(|(faction, tile_count)| {
            let core_count = cores.get(&faction).copied().unwrap_or(0);
            FactionStats {
                faction,
                tiles: tile_count,
                cores: core_count,
                points: tile_count * shared.config.points_per_tile
                    + core_count * shared.config.points_per_core,
            }
        })
        .collect();
    per_faction.sort_unstable_by_key(|stats| stats.faction);
    StatsReport { band, per_faction }
}

fn prepare_paint(shared: &EngineShared, request: &PaintRequest) -> PaintPlan {
    let grid = &shared.grid;
    let config = &shared.config;
    let mut verdicts = Vec::with_capacity(request.cells.len());

    for paint in &request.cells {
        let verdict = screen_cell(shared, request, paint);
        verdicts.push(CellVerdict {
            x: paint.x,
            y: paint.y,
            verdict,
        });
    }

    // Enclave check over the whole batch: every accepted cell must land
    // in a component connected to the faction's real, cored territory.
    // A faction holding no live core anywhere is exempt (first tiles).
    if shared.counters.cores(request.faction) > 0 {
        let tentative: Vec<(u32, u32)> = verdicts
            .iter()
            .filter(|v| v.verdict.is_accepted())
            .map(|v| (v.x, v.y))
            .collect();
        if !tentative.is_empty() {
            let clusters = find_clusters(
                grid,
                request.faction,
                &request.allies,
                &tentative,
                request.now_ms,
            );
            let mut connected: AHashSet<(u32, u32)> = AHashSet::new();
            for cluster in clusters.iter().filter(|c| c.has_core) {
                connected.extend(cluster.cells.iter().copied());
            }
            for entry in &mut verdicts {
                if entry.verdict.is_accepted() && !connected.contains(&(entry.x, entry.y)) {
                    entry.verdict = Verdict::Enclave;
                }
            }
        }
    }

    let mut writes = Vec::new();
    let mut total_cost = 0u64;
    for entry in &verdicts {
        if !entry.verdict.is_accepted() {
            continue;
        }
        let paint = request
            .cells
            .iter()
            .find(|c| c.x == entry.x && c.y == entry.y)
            .copied()
            .unwrap_or(PaintCell {
                x: entry.x,
                y: entry.y,
                color: 0,
            });
        let Some(previous) = grid.read_cell(entry.x, entry.y) else {
            continue;
        };
        let (cell, cost) = build_write(config, request, &paint, &previous);
        total_cost += cost;
        writes.push(CellWrite {
            x: entry.x,
            y: entry.y,
            cell,
        });
    }

    let accepted = verdicts.iter().filter(|v| v.verdict.is_accepted()).count();
    let success_rate = if verdicts.is_empty() {
        1.0
    } else {
        accepted as f32 / verdicts.len() as f32
    };

    PaintPlan {
        faction: request.faction,
        verdicts,
        writes,
        total_cost,
        success_rate,
    }
}

/// Per-cell screening against bounds and diplomacy. Connectivity is
/// batch-wide and handled separately.
fn screen_cell(shared: &EngineShared, request: &PaintRequest, paint: &PaintCell) -> Verdict {
    let Some(cell) = shared.grid.read_cell(paint.x, paint.y) else {
        return Verdict::OutOfBounds;
    };
    let Some(owner) = cell.faction else {
        return Verdict::Accepted;
    };
    if owner == request.faction {
        return Verdict::Accepted;
    }
    if request.allies.contains(&owner) {
        return Verdict::AlliedTerritory;
    }
    if request.truces.contains(&owner) {
        return Verdict::TruceBlocked;
    }
    if request.zoc.hostile_zone(paint.x, paint.y, request.faction)
        && !request.wars.contains(&owner)
    {
        return Verdict::SiegeBlocked;
    }
    Verdict::Accepted
}

/// Produce the committed cell for one accepted paint, plus its AP cost.
fn build_write(
    config: &crate::config::EngineConfig,
    request: &PaintRequest,
    paint: &PaintCell,
    previous: &Cell,
) -> (Cell, u64) {
    let hostile_owner = previous
        .faction
        .is_some_and(|owner| owner != request.faction);

    let overpaint = if hostile_owner {
        previous.overpaint.saturating_add(1).min(config.max_overpaint)
    } else if previous.faction.is_some() {
        previous.overpaint
    } else {
        0
    };

    let mut cost =
        u64::from(config.base_paint_cost) + u64::from(previous.overpaint.min(config.max_overpaint))
            * u64::from(config.overpaint_cost_step);
    if hostile_owner && request.zoc.hostile_zone(paint.x, paint.y, request.faction) {
        cost = ((cost as f64) * config.zoc_cost_multiplier).ceil() as u64;
    }

    let mut cell = Cell {
        faction: Some(request.faction),
        color: paint.color & 0x00FF_FFFF,
        painter: request.painter,
        overpaint,
        flags: CellFlags::empty(),
        stamp_ms: 0.0,
        painted_at: (request.now_ms / 1_000.0) as u32,
    };

    // Capturing a live enemy core keeps the flag but starts the grace
    // countdown; pending marks never survive a hostile repaint.
    if hostile_owner && previous.is_live_core(request.now_ms) {
        cell.set_core_state(CoreState::Core {
            expiry_ms: Some(request.now_ms + config.captured_core_lifetime_ms as f64),
        });
    }

    (cell, cost)
}

fn check_integrity(
    shared: &EngineShared,
    band: YBand,
    live_factions: &AHashSet<u16>,
    captured: &AHashMap<(u32, u32), u16>,
    _now_ms: f64,
) -> Vec<CellFix> {
    let mut fixes = Vec::new();
    for y in band.rows() {
        for x in 0..shared.grid.size() {
            let Some(cell) = shared.grid.read_cell(x, y) else {
                continue;
            };
            if let Some(fix) = screen_anomaly(shared, live_factions, captured, x, y, &cell) {
                fixes.push(fix);
            }
        }
    }
    fixes
}

fn screen_anomaly(
    shared: &EngineShared,
    live_factions: &AHashSet<u16>,
    captured: &AHashMap<(u32, u32), u16>,
    x: u32,
    y: u32,
    cell: &Cell,
) -> Option<CellFix> {
    // Cell referencing a no-longer-live faction: reset wholesale.
    if let Some(owner) = cell.faction {
        if !live_factions.contains(&owner) {
            return Some(CellFix {
                x,
                y,
                cell: Cell::empty(),
                reason: FixReason::DeadFactionReference,
            });
        }
    } else if cell.flags.contains(CellFlags::CORE) {
        let mut fixed = *cell;
        fixed.set_core_state(CoreState::Plain);
        return Some(CellFix {
            x,
            y,
            cell: fixed,
            reason: FixReason::OrphanCoreFlag,
        });
    } else if cell.flags.contains(CellFlags::PENDING) {
        let mut fixed = *cell;
        fixed.set_core_state(CoreState::Plain);
        return Some(CellFix {
            x,
            y,
            cell: fixed,
            reason: FixReason::OrphanPendingFlag,
        });
    }

    if cell.flags.contains(CellFlags::CORE) && cell.flags.contains(CellFlags::PENDING) {
        let mut fixed = *cell;
        fixed.flags.remove(CellFlags::PENDING);
        return Some(CellFix {
            x,
            y,
            cell: fixed,
            reason: FixReason::ConflictingFlags,
        });
    }

    if cell.overpaint > shared.config.max_overpaint {
        let mut fixed = *cell;
        fixed.overpaint = shared.config.max_overpaint;
        return Some(CellFix {
            x,
            y,
            cell: fixed,
            reason: FixReason::OverpaintClamped,
        });
    }

    // NaN can only enter via an imported snapshot; writes normalize.
    if cell.stamp_ms.is_nan() {
        let mut fixed = *cell;
        fixed.stamp_ms = 0.0;
        return Some(CellFix {
            x,
            y,
            cell: fixed,
            reason: FixReason::NanStamp,
        });
    }

    // A core counting down with no capture record belongs to its tile
    // owner; make it permanent.
    if let CoreState::Core {
        expiry_ms: Some(_),
    } = cell.core_state()
    {
        let owner_held = match captured.get(&(x, y)) {
            Some(&original) => cell.faction == Some(original),
            None => true,
        };
        if owner_held {
            let mut fixed = *cell;
            fixed.set_core_state(CoreState::Core { expiry_ms: None });
            return Some(CellFix {
                x,
                y,
                cell: fixed,
                reason: FixReason::OwnerHeldCoreMadePermanent,
            });
        }
    }

    None
}

fn generate_binary_map(shared: &EngineShared, generated_ms: u64) -> Vec<u8> {
    let factions = shared
        .factions
        .read()
        .expect("faction table lock poisoned")
        .snapshot();
    let players = shared
        .players
        .read()
        .expect("player table lock poisoned")
        .snapshot();
    let snapshot = map_proto::TmapSnapshot {
        generated_ms,
        factions,
        players,
        cells: shared.grid.export_bytes(),
    };
    map_proto::encode_tmap(&snapshot)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;

    fn shared_with_grid(size: u32) -> EngineShared {
        EngineShared::new(EngineConfig {
            grid_size: size,
            max_factions: 64,
            ..EngineConfig::default()
        })
    }

    fn own_cell(shared: &EngineShared, faction: u16, x: u32, y: u32) {
        let mut cell = Cell::empty();
        cell.faction = Some(faction);
        shared.grid.write_cell(x, y, &cell);
        shared.counters.add_tiles(faction, 1);
    }

    fn core_cell(shared: &EngineShared, faction: u16, x: u32, y: u32) {
        own_cell(shared, faction, x, y);
        let mut cell = shared.grid.read_cell(x, y).expect("in range");
        cell.set_core_state(CoreState::Core { expiry_ms: None });
        shared.grid.write_cell(x, y, &cell);
        shared.counters.add_cores(faction, 1);
    }

    fn paint_request(faction: u16, cells: Vec<PaintCell>) -> Arc<PaintRequest> {
        Arc::new(PaintRequest {
            faction,
            painter: 9,
            cells,
            allies: AHashSet::new(),
            wars: AHashSet::new(),
            truces: AHashSet::new(),
            zoc: Arc::new(ZocMap::default()),
            now_ms: 1_000_000.0,
        })
    }

    fn plan(shared: &EngineShared, request: Arc<PaintRequest>) -> PaintPlan {
        match execute(shared, &TaskSpec::PreparePaint(request)) {
            TaskOutput::PaintPlan(plan) => plan,
            other => panic!("unexpected output {other:?}"),
        }
    }

    #[test]
    fn stats_count_tiles_cores_and_points() {
        let shared = shared_with_grid(16);
        core_cell(&shared, 1, 2, 2);
        own_cell(&shared, 1, 3, 2);
        own_cell(&shared, 2, 8, 8);

        let output = execute(
            &shared,
            &TaskSpec::CalculateStats {
                band: None,
                now_ms: 0.0,
            },
        );
        let TaskOutput::Stats(report) = output else {
            panic!("expected stats");
        };
        assert_eq!(
            report.per_faction,
            vec![
                FactionStats {
                    faction: 1,
                    tiles: 2,
                    cores: 1,
                    points: 2 + 10
                },
                FactionStats {
                    faction: 2,
                    tiles: 1,
                    cores: 0,
                    points: 1
                },
            ]
        );
    }

    #[test]
    fn stats_reports_serialize_with_their_band() {
        let shared = shared_with_grid(8);
        own_cell(&shared, 1, 1, 1);

        let TaskOutput::Stats(report) = execute(
            &shared,
            &TaskSpec::CalculateStats {
                band: Some(YBand { y_start: 0, y_end: 4 }),
                now_ms: 0.0,
            },
        ) else {
            panic!("expected stats");
        };
        let json = serde_json::to_string(&report).expect("stats serialize");
        assert!(json.contains("\"y_start\":0"));
        assert!(json.contains("\"y_end\":4"));
        assert!(json.contains("\"tiles\":1"));
    }

    #[test]
    fn enclave_attack_is_rejected_and_connected_attack_accepted() {
        let shared = shared_with_grid(32);
        core_cell(&shared, 1, 10, 10);

        // Disconnected proposal only: rejected with the enclave verdict.
        let detached = plan(
            &shared,
            paint_request(1, vec![PaintCell { x: 20, y: 10, color: 0xFF }]),
        );
        assert_eq!(detached.verdicts[0].verdict, Verdict::Enclave);
        assert!(detached.writes.is_empty());
        assert_eq!(detached.success_rate, 0.0);

        // Same far cell plus a bridge from the core: all accepted.
        let cells: Vec<PaintCell> = (11..=20)
            .map(|x| PaintCell {
                x,
                y: 10,
                color: 0xFF,
            })
            .collect();
        let bridged = plan(&shared, paint_request(1, cells));
        assert!(bridged.verdicts.iter().all(|v| v.verdict.is_accepted()));
        assert_eq!(bridged.writes.len(), 10);
        assert_eq!(bridged.success_rate, 1.0);
    }

    #[test]
    fn coreless_faction_is_exempt_from_the_enclave_rule() {
        let shared = shared_with_grid(16);
        let plan = plan(
            &shared,
            paint_request(3, vec![PaintCell { x: 5, y: 5, color: 0 }]),
        );
        assert!(plan.verdicts[0].verdict.is_accepted());
    }

    #[test]
    fn out_of_bounds_cells_are_rejected_without_failing_the_batch() {
        let shared = shared_with_grid(8);
        let plan = plan(
            &shared,
            paint_request(
                3,
                vec![
                    PaintCell { x: 99, y: 0, color: 0 },
                    PaintCell { x: 1, y: 1, color: 0 },
                ],
            ),
        );
        assert_eq!(plan.verdicts[0].verdict, Verdict::OutOfBounds);
        assert!(plan.verdicts[1].verdict.is_accepted());
        assert_eq!(plan.success_rate, 0.5);
    }

    #[test]
    fn diplomacy_screens_attacks() {
        let shared = shared_with_grid(32);
        core_cell(&shared, 1, 10, 10);
        own_cell(&shared, 2, 11, 10);
        own_cell(&shared, 3, 10, 11);

        let mut request = PaintRequest {
            faction: 1,
            painter: 1,
            cells: vec![
                PaintCell { x: 11, y: 10, color: 0 },
                PaintCell { x: 10, y: 11, color: 0 },
            ],
            allies: [3u16].into_iter().collect(),
            wars: AHashSet::new(),
            truces: [2u16].into_iter().collect(),
            zoc: Arc::new(ZocMap::default()),
            now_ms: 0.0,
        };
        let plan_result = plan(&shared, Arc::new(request.clone()));
        assert_eq!(plan_result.verdicts[0].verdict, Verdict::TruceBlocked);
        assert_eq!(plan_result.verdicts[1].verdict, Verdict::AlliedTerritory);

        request.truces.clear();
        request.allies.clear();
        let plan_result = plan(&shared, Arc::new(request));
        assert!(plan_result.verdicts.iter().all(|v| v.verdict.is_accepted()));
    }

    #[test]
    fn zoc_blocks_attacks_without_war_and_prices_them_with_one() {
        let shared = shared_with_grid(32);
        core_cell(&shared, 1, 9, 10);
        own_cell(&shared, 2, 10, 10);

        let zoc = Arc::new(ZocMap::rebuild(
            &[crate::zoc::Landmark {
                name: "keep".into(),
                x: 10,
                y: 10,
                radius: 2,
                owner: 2,
            }],
            &crate::cache::AllianceMap::default(),
            32,
        ));

        let base = PaintRequest {
            faction: 1,
            painter: 1,
            cells: vec![PaintCell { x: 10, y: 10, color: 0 }],
            allies: AHashSet::new(),
            wars: AHashSet::new(),
            truces: AHashSet::new(),
            zoc,
            now_ms: 0.0,
        };

        let blocked = plan(&shared, Arc::new(base.clone()));
        assert_eq!(blocked.verdicts[0].verdict, Verdict::SiegeBlocked);

        let mut at_war = base;
        at_war.wars.insert(2);
        let priced = plan(&shared, Arc::new(at_war));
        assert!(priced.verdicts[0].verdict.is_accepted());
        // Base cost 1, doubled by the hostile zone multiplier.
        assert_eq!(priced.total_cost, 2);
        assert_eq!(priced.writes[0].cell.overpaint, 1);
    }

    #[test]
    fn capturing_a_live_core_starts_the_grace_countdown() {
        let shared = shared_with_grid(32);
        core_cell(&shared, 1, 9, 10);
        core_cell(&shared, 2, 10, 10);

        let mut request = (*paint_request(1, vec![PaintCell { x: 10, y: 10, color: 0 }])).clone();
        request.wars.insert(2);
        let plan_result = plan(&shared, Arc::new(request));
        let write = plan_result.writes[0];
        assert!(write.cell.flags.contains(CellFlags::CORE));
        let CoreState::Core {
            expiry_ms: Some(expiry),
        } = write.cell.core_state()
        else {
            panic!("captured core should carry an expiry");
        };
        assert!(expiry > 1_000_000.0);
    }

    #[test]
    fn integrity_scan_normalizes_anomalies_idempotently() {
        let shared = shared_with_grid(16);
        // Dead faction reference.
        own_cell(&shared, 7, 1, 1);
        // Orphan core flag on an unowned cell.
        let mut orphan = Cell::empty();
        orphan.set_core_state(CoreState::Core { expiry_ms: None });
        shared.grid.write_cell(2, 2, &orphan);
        // Overpaint past the ceiling.
        let mut thick = Cell::empty();
        thick.faction = Some(1);
        thick.overpaint = 9;
        shared.grid.write_cell(3, 3, &thick);

        let live: Arc<AHashSet<u16>> = Arc::new([1u16].into_iter().collect());
        let spec = TaskSpec::CheckIntegrity {
            band: None,
            live_factions: Arc::clone(&live),
            captured: Arc::new(AHashMap::new()),
            now_ms: 0.0,
        };
        let TaskOutput::IntegrityFixes(fixes) = execute(&shared, &spec) else {
            panic!("expected fixes");
        };
        assert_eq!(fixes.len(), 3);
        for fix in &fixes {
            shared.grid.write_cell(fix.x, fix.y, &fix.cell);
        }

        // Idempotent: a second scan over the corrected grid is clean.
        let TaskOutput::IntegrityFixes(fixes) = execute(&shared, &spec) else {
            panic!("expected fixes");
        };
        assert!(fixes.is_empty());
    }

    #[test]
    fn binary_map_round_trips_through_the_container() {
        let shared = shared_with_grid(8);
        shared
            .factions
            .write()
            .expect("lock")
            .index_of("azalea")
            .expect("capacity");
        own_cell(&shared, 1, 4, 4);

        let TaskOutput::BinaryMap(bytes) = execute(
            &shared,
            &TaskSpec::GenerateBinaryMap {
                generated_ms: 42_000,
            },
        ) else {
            panic!("expected bytes");
        };
        let snapshot = map_proto::decode_tmap(&bytes).expect("decode");
        assert_eq!(snapshot.generated_ms, 42_000);
        assert_eq!(snapshot.factions, vec!["", "azalea"]);
        assert_eq!(snapshot.tile_count(), 64);
        let record = snapshot.record(4 * 8 + 4).expect("record");
        assert_eq!(record.faction, 1);
    }
}

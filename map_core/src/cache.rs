//! Versioned derived views over the grid plus the shared atomic
//! aggregate counters.
//!
//! One monotonic counter is bumped on every committed grid mutation;
//! every derived cache records the version it was built against and is
//! rebuilt wholesale (a single full-grid scan, never an incremental
//! patch) when it falls behind. The per-faction tile/core tallies are
//! the one exception: they are plain atomic integers adjusted per
//! committed write, because worker tasks read them mid-pass.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use ahash::{AHashMap, AHashSet};

use crate::grid::TileGrid;

/// Monotonic version of the committed grid state.
#[derive(Debug, Default)]
pub struct CacheVersion(AtomicU64);

impl CacheVersion {
    pub fn current(&self) -> u64 {
        self.0.load(Ordering::Acquire)
    }

    /// Bump after a committed mutation; returns the new version.
    pub fn bump(&self) -> u64 {
        self.0.fetch_add(1, Ordering::AcqRel) + 1
    }
}

/// Per-faction aggregate tallies, shared across threads.
///
/// Indexed by dense faction index; slots past the configured capacity
/// degrade to zero reads and dropped writes rather than failing.
#[derive(Debug)]
pub struct FactionCounters {
    tiles: Vec<AtomicI64>,
    cores: Vec<AtomicI64>,
}

impl FactionCounters {
    pub fn new(capacity: usize) -> Self {
        let mut tiles = Vec::with_capacity(capacity);
        let mut cores = Vec::with_capacity(capacity);
        for _ in 0..capacity {
            tiles.push(AtomicI64::new(0));
            cores.push(AtomicI64::new(0));
        }
        Self { tiles, cores }
    }

    pub fn add_tiles(&self, faction: u16, delta: i64) {
        if let Some(slot) = self.tiles.get(faction as usize) {
            slot.fetch_add(delta, Ordering::Relaxed);
        }
    }

    pub fn add_cores(&self, faction: u16, delta: i64) {
        if let Some(slot) = self.cores.get(faction as usize) {
            slot.fetch_add(delta, Ordering::Relaxed);
        }
    }

    pub fn tiles(&self, faction: u16) -> i64 {
        self.tiles
            .get(faction as usize)
            .map_or(0, |slot| slot.load(Ordering::Relaxed))
    }

    pub fn cores(&self, faction: u16) -> i64 {
        self.cores
            .get(faction as usize)
            .map_or(0, |slot| slot.load(Ordering::Relaxed))
    }

    pub fn reset(&self, faction: u16) {
        if let Some(slot) = self.tiles.get(faction as usize) {
            slot.store(0, Ordering::Relaxed);
        }
        if let Some(slot) = self.cores.get(faction as usize) {
            slot.store(0, Ordering::Relaxed);
        }
    }
}

/// Alliance membership snapshot, symmetric by construction.
#[derive(Debug, Clone, Default)]
pub struct AllianceMap {
    allies: AHashMap<u16, AHashSet<u16>>,
}

impl AllianceMap {
    pub fn from_pairs(pairs: &[(u16, u16)]) -> Self {
        let mut allies: AHashMap<u16, AHashSet<u16>> = AHashMap::new();
        for &(a, b) in pairs {
            if a == b {
                continue;
            }
            allies.entry(a).or_default().insert(b);
            allies.entry(b).or_default().insert(a);
        }
        Self { allies }
    }

    pub fn are_allied(&self, a: u16, b: u16) -> bool {
        a == b || self.allies.get(&a).is_some_and(|set| set.contains(&b))
    }

    /// Allied faction set for `faction`, excluding itself; empty for an
    /// unknown faction.
    pub fn allies_of(&self, faction: u16) -> AHashSet<u16> {
        self.allies.get(&faction).cloned().unwrap_or_default()
    }
}

/// Orchestrator-private derived views, rebuilt when behind the grid
/// version.
#[derive(Debug, Default)]
pub struct DerivedCaches {
    built_version: Option<u64>,
    faction_tiles: AHashMap<u16, Vec<(u32, u32)>>,
    core_coords: AHashMap<u16, Vec<(u32, u32)>>,
}

impl DerivedCaches {
    /// Rebuild if the stored version differs from `current`. One
    /// O(size²) scan fills every view at once.
    pub fn ensure_valid(&mut self, grid: &TileGrid, current: u64) {
        if self.built_version == Some(current) {
            return;
        }
        self.faction_tiles.clear();
        self.core_coords.clear();
        let size = grid.size();
        for y in 0..size {
            for x in 0..size {
                let Some(cell) = grid.read_cell(x, y) else {
                    continue;
                };
                let Some(faction) = cell.faction else {
                    continue;
                };
                self.faction_tiles.entry(faction).or_default().push((x, y));
                if cell.flags.contains(crate::cell::CellFlags::CORE) {
                    self.core_coords.entry(faction).or_default().push((x, y));
                }
            }
        }
        self.built_version = Some(current);
        log::debug!(
            "derived caches rebuilt at version {current}: {} factions",
            self.faction_tiles.len()
        );
    }

    /// Tiles owned by `faction`; empty for unknown factions.
    pub fn tiles_of(&self, faction: u16) -> &[(u32, u32)] {
        self.faction_tiles
            .get(&faction)
            .map_or(&[], Vec::as_slice)
    }

    /// Core-flagged coordinates of `faction`; empty for unknown factions.
    pub fn cores_of(&self, faction: u16) -> &[(u32, u32)] {
        self.core_coords.get(&faction).map_or(&[], Vec::as_slice)
    }

    pub fn built_version(&self) -> Option<u64> {
        self.built_version
    }
}

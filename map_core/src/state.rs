//! State shared by reference between the orchestrator and the worker
//! pool.
//!
//! The grid and counters are lock-free atomics; the index tables sit
//! behind an `RwLock` because the orchestrator appends to them while
//! workers resolve identifiers. Everything else (derived caches, the
//! capture side table, diplomacy snapshots) is orchestrator-private and
//! reaches workers only as copies inside task payloads.

use std::sync::RwLock;

use crate::{
    cache::{CacheVersion, FactionCounters},
    config::EngineConfig,
    grid::TileGrid,
    index::IndexTable,
};

pub struct EngineShared {
    pub config: EngineConfig,
    pub grid: TileGrid,
    pub factions: RwLock<IndexTable>,
    pub players: RwLock<IndexTable>,
    pub counters: FactionCounters,
    pub version: CacheVersion,
}

impl EngineShared {
    pub fn new(config: EngineConfig) -> Self {
        let grid = TileGrid::new(config.grid_size);
        let counters = FactionCounters::new(config.max_factions);
        Self {
            config,
            grid,
            factions: RwLock::new(IndexTable::for_factions()),
            players: RwLock::new(IndexTable::for_players()),
            counters,
            version: CacheVersion::default(),
        }
    }

    /// Resolve a faction id without allocating a slot.
    pub fn faction_index(&self, id: &str) -> Option<u16> {
        self.factions
            .read()
            .expect("faction table lock poisoned")
            .lookup(id)
            .map(|index| index as u16)
    }

    /// Resolve a dense faction index back to its identifier.
    pub fn faction_id(&self, index: u16) -> Option<String> {
        self.factions
            .read()
            .expect("faction table lock poisoned")
            .id_of(u32::from(index))
            .map(str::to_string)
    }
}

//! Authoritative spatial-state engine for a grid territory game.
//!
//! A 500x500 shared tile grid backed by atomics, read concurrently by a
//! worker pool and mutated only through the single-writer
//! [`Orchestrator`]. Workers compute paint plans, core-lifecycle
//! transitions, integrity fixes, per-faction stats, and the binary map
//! export; the orchestrator commits their proposals and keeps the
//! aggregate counters and cache version in step.

pub mod cache;
pub mod cell;
pub mod cluster;
pub mod config;
pub mod coreify;
pub mod grid;
pub mod index;
pub mod orchestrator;
pub mod state;
pub mod tasks;
pub mod worker;
pub mod zoc;

pub use cache::{AllianceMap, CacheVersion, DerivedCaches, FactionCounters};
pub use cell::{Cell, CellFlags, CoreState};
pub use cluster::{find_clusters, Cluster, OwnerComponents};
pub use config::{EngineConfig, EngineConfigError};
pub use coreify::CoreTransition;
pub use grid::{partition_bands, TileGrid, YBand};
pub use index::IndexTable;
pub use orchestrator::{
    epoch_ms, EngineError, LandmarkSpec, MaintenanceReport, Orchestrator, PaintOutcome,
};
pub use state::EngineShared;
pub use tasks::{
    CellVerdict, CellWrite, FactionStats, PaintCell, PaintPlan, StatsReport, TaskOutput, TaskSpec,
    Verdict,
};
pub use worker::{default_worker_count, DispatchError, TaskHandle, WorkerPool};
pub use zoc::{Landmark, ZocMap};

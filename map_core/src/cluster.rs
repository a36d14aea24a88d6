//! Connectivity engine: connected components ("clusters") over
//! 8-neighbor adjacency and a faction-or-allies ownership predicate.
//!
//! Everything here is an explicit work-list BFS: components can span
//! tens of thousands of cells, so recursion is off the table. Consumers:
//! core eligibility sizing, enclave-attack validation (with tentative
//! coordinates unioned in), and auto core-expansion.

use std::collections::VecDeque;

use ahash::AHashSet;

use crate::{cell::Cell, grid::TileGrid};

/// 8-neighbor offset table.
pub const NEIGHBORS8: [(i32, i32); 8] = [
    (-1, -1),
    (0, -1),
    (1, -1),
    (-1, 0),
    (1, 0),
    (-1, 1),
    (0, 1),
    (1, 1),
];

/// One maximal connected set of coordinates for a faction query.
/// Ephemeral: recomputed on demand, never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct Cluster {
    pub cells: Vec<(u32, u32)>,
    /// Some member holds a live core owned by the queried faction.
    pub has_core: bool,
    /// Some member is real (non-tentative) territory.
    pub has_existing: bool,
}

impl Cluster {
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

/// Find every cluster of `faction` (optionally including allied
/// territory in the predicate), with `tentative` coordinates unioned
/// into the seed set. Membership and flags are independent of seed
/// iteration order; the scan itself runs in fixed row-major order.
pub fn find_clusters(
    grid: &TileGrid,
    faction: u16,
    allies: &AHashSet<u16>,
    tentative: &[(u32, u32)],
    now_ms: f64,
) -> Vec<Cluster> {
    let size = grid.size();
    let total = (size as usize) * (size as usize);
    let mut member = vec![false; total];
    let mut existing = vec![false; total];
    let mut core = vec![false; total];

    let owned_by_query = |cell: &Cell| -> bool {
        match cell.faction {
            Some(owner) => owner == faction || allies.contains(&owner),
            None => false,
        }
    };

    for y in 0..size {
        for x in 0..size {
            let Some(cell) = grid.read_cell(x, y) else {
                continue;
            };
            if !owned_by_query(&cell) {
                continue;
            }
            let idx = (y as usize) * (size as usize) + x as usize;
            member[idx] = true;
            existing[idx] = true;
            if cell.faction == Some(faction) && cell.is_live_core(now_ms) {
                core[idx] = true;
            }
        }
    }

    // Tentative coordinates join the seed set; out-of-range proposals
    // are dropped here the same way the grid drops them.
    for &(x, y) in tentative {
        if x < size && y < size {
            member[(y as usize) * (size as usize) + x as usize] = true;
        }
    }

    let mut visited = vec![false; total];
    let mut clusters = Vec::new();
    let size_i32 = size as i32;

    for start in 0..total {
        if visited[start] || !member[start] {
            continue;
        }
        let mut cluster = Cluster {
            cells: Vec::new(),
            has_core: false,
            has_existing: false,
        };
        let mut queue = VecDeque::new();
        queue.push_back(start);
        visited[start] = true;
        while let Some(idx) = queue.pop_front() {
            let x = (idx % size as usize) as i32;
            let y = (idx / size as usize) as i32;
            cluster.cells.push((x as u32, y as u32));
            cluster.has_core |= core[idx];
            cluster.has_existing |= existing[idx];
            for (dx, dy) in NEIGHBORS8 {
                let nx = x + dx;
                let ny = y + dy;
                if nx < 0 || ny < 0 || nx >= size_i32 || ny >= size_i32 {
                    continue;
                }
                let nidx = (ny as usize) * (size as usize) + nx as usize;
                if visited[nidx] || !member[nidx] {
                    continue;
                }
                visited[nidx] = true;
                queue.push_back(nidx);
            }
        }
        clusters.push(cluster);
    }
    clusters
}

/// Per-cell component sizes for same-owner territory, all factions in
/// one pass. Used by the core lifecycle to price instant vs. timed
/// promotion without one flood fill per faction.
#[derive(Debug)]
pub struct OwnerComponents {
    size: u32,
    component: Vec<u32>,
    sizes: Vec<u32>,
}

impl OwnerComponents {
    pub fn build(grid: &TileGrid) -> Self {
        let size = grid.size();
        let total = (size as usize) * (size as usize);
        let mut owner = vec![map_proto::FACTION_NONE; total];
        for y in 0..size {
            for x in 0..size {
                if let Some(cell) = grid.read_cell(x, y) {
                    if let Some(faction) = cell.faction {
                        owner[(y as usize) * (size as usize) + x as usize] = faction;
                    }
                }
            }
        }

        let mut component = vec![0u32; total];
        let mut sizes = vec![0u32]; // component ids start at 1
        let mut queue = VecDeque::new();
        let size_i32 = size as i32;

        for start in 0..total {
            if component[start] != 0 || owner[start] == map_proto::FACTION_NONE {
                continue;
            }
            let id = sizes.len() as u32;
            let faction = owner[start];
            let mut count = 0u32;
            component[start] = id;
            queue.push_back(start);
            while let Some(idx) = queue.pop_front() {
                count += 1;
                let x = (idx % size as usize) as i32;
                let y = (idx / size as usize) as i32;
                for (dx, dy) in NEIGHBORS8 {
                    let nx = x + dx;
                    let ny = y + dy;
                    if nx < 0 || ny < 0 || nx >= size_i32 || ny >= size_i32 {
                        continue;
                    }
                    let nidx = (ny as usize) * (size as usize) + nx as usize;
                    if component[nidx] != 0 || owner[nidx] != faction {
                        continue;
                    }
                    component[nidx] = id;
                    queue.push_back(nidx);
                }
            }
            sizes.push(count);
        }

        Self {
            size,
            component,
            sizes,
        }
    }

    /// Size of the same-owner component containing `(x, y)`, 0 for
    /// unowned or out-of-range cells.
    pub fn component_size(&self, x: u32, y: u32) -> u32 {
        if x >= self.size || y >= self.size {
            return 0;
        }
        let id = self.component[(y as usize) * (self.size as usize) + x as usize];
        self.sizes.get(id as usize).copied().unwrap_or(0)
    }
}

/// True when some 8-neighbor of `(x, y)` holds a live core owned by
/// `faction`.
pub fn adjacent_to_live_core(grid: &TileGrid, x: u32, y: u32, faction: u16, now_ms: f64) -> bool {
    for (dx, dy) in NEIGHBORS8 {
        let nx = x as i64 + dx as i64;
        let ny = y as i64 + dy as i64;
        if nx < 0 || ny < 0 {
            continue;
        }
        // Past-the-edge lookups resolve to None and fall through.
        if let Some(cell) = grid.read_cell(nx as u32, ny as u32) {
            if cell.faction == Some(faction) && cell.is_live_core(now_ms) {
                return true;
            }
        }
    }
    false
}

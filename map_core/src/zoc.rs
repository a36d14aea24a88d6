//! Zone-of-control influence map derived from the named-landmark
//! registry.
//!
//! Each landmark stamps a square (Chebyshev) radius around its cell;
//! attacking hostile territory inside that radius carries a cost
//! multiplier during paint validation. The map is rebuilt whenever the
//! landmark registry or alliance membership changes, never patched.

use ahash::AHashMap;

use crate::cache::AllianceMap;

/// One entry of the named-landmark registry, supplied by collaborators
/// with the owner already resolved to a dense faction index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Landmark {
    pub name: String,
    pub x: u32,
    pub y: u32,
    pub radius: u32,
    /// Dense faction index of the owner, 0 for an unowned landmark.
    pub owner: u16,
}

/// Influence attributed to a single coordinate.
#[derive(Debug, Clone, PartialEq)]
pub struct ZocInfluence {
    pub landmark: String,
    pub owner: u16,
    pub allied: ahash::AHashSet<u16>,
}

/// Coordinate → influence lookup. Overlapping landmarks resolve to the
/// one stamped last in registry order; the registry is the authority on
/// ordering.
#[derive(Debug, Clone, Default)]
pub struct ZocMap {
    influence: AHashMap<(u32, u32), ZocInfluence>,
}

impl ZocMap {
    pub fn rebuild(landmarks: &[Landmark], alliances: &AllianceMap, grid_size: u32) -> Self {
        let mut influence = AHashMap::new();
        for landmark in landmarks {
            if landmark.owner == 0 {
                continue;
            }
            let allied = alliances.allies_of(landmark.owner);
            let x_lo = landmark.x.saturating_sub(landmark.radius);
            let y_lo = landmark.y.saturating_sub(landmark.radius);
            let x_hi = landmark.x.saturating_add(landmark.radius).min(grid_size.saturating_sub(1));
            let y_hi = landmark.y.saturating_add(landmark.radius).min(grid_size.saturating_sub(1));
            for y in y_lo..=y_hi {
                for x in x_lo..=x_hi {
                    influence.insert(
                        (x, y),
                        ZocInfluence {
                            landmark: landmark.name.clone(),
                            owner: landmark.owner,
                            allied: allied.clone(),
                        },
                    );
                }
            }
        }
        log::debug!(
            "zoc map rebuilt: {} landmarks, {} covered cells",
            landmarks.len(),
            influence.len()
        );
        Self { influence }
    }

    pub fn lookup(&self, x: u32, y: u32) -> Option<&ZocInfluence> {
        self.influence.get(&(x, y))
    }

    /// True when `(x, y)` lies in a zone whose owner (or an ally of the
    /// owner) is hostile to `faction`.
    pub fn hostile_zone(&self, x: u32, y: u32, faction: u16) -> bool {
        self.lookup(x, y).is_some_and(|influence| {
            influence.owner != faction && !influence.allied.contains(&faction)
        })
    }

    pub fn covered_cells(&self) -> usize {
        self.influence.len()
    }
}

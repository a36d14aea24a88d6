//! Append-only string ⇄ dense-integer bijections.
//!
//! Cell records store faction and painter references as small integers;
//! these tables are the only mapping back to external identifiers.
//! Slot 0 is reserved ("none") and never assigned; logically deleted
//! identifiers keep their slot, since referencing cells are zeroed on
//! removal and a stale slot is harmless.

use ahash::AHashMap;

/// One append-only identifier table.
#[derive(Debug, Clone)]
pub struct IndexTable {
    ids: Vec<String>,
    lookup: AHashMap<String, u32>,
    capacity: u32,
}

impl IndexTable {
    /// `capacity` is the highest index that may ever be handed out.
    pub fn new(capacity: u32) -> Self {
        Self {
            // Slot 0 reserved for "none".
            ids: vec![String::new()],
            lookup: AHashMap::new(),
            capacity,
        }
    }

    /// Table for faction references: indices must stay below the u16
    /// wire sentinel.
    pub fn for_factions() -> Self {
        Self::new(u32::from(map_proto::FACTION_NONE) - 1)
    }

    /// Table for player references (full u32 range minus the sentinel 0).
    pub fn for_players() -> Self {
        Self::new(u32::MAX - 1)
    }

    /// Index for `id`, allocating the next monotonic slot if unseen.
    /// `None` only when the table is exhausted.
    pub fn index_of(&mut self, id: &str) -> Option<u32> {
        if let Some(&index) = self.lookup.get(id) {
            return Some(index);
        }
        let next = self.ids.len() as u32;
        if next > self.capacity {
            log::error!("index table exhausted at {} entries, refusing {id:?}", next);
            return None;
        }
        self.ids.push(id.to_string());
        self.lookup.insert(id.to_string(), next);
        Some(next)
    }

    /// Existing index for `id`, without allocating.
    pub fn lookup(&self, id: &str) -> Option<u32> {
        self.lookup.get(id).copied()
    }

    /// Identifier at `index`; `None` for the reserved slot 0 and unknown
    /// slots.
    pub fn id_of(&self, index: u32) -> Option<&str> {
        if index == 0 {
            return None;
        }
        self.ids.get(index as usize).map(String::as_str)
    }

    /// Number of slots including the reserved slot 0.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.len() <= 1
    }

    /// Positional copy of the table for wire export; slot 0 is the empty
    /// placeholder, so export index == dense index.
    pub fn snapshot(&self) -> Vec<String> {
        self.ids.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn indices_are_monotonic_and_stable() {
        let mut table = IndexTable::for_factions();
        let a = table.index_of("azalea").expect("capacity");
        let b = table.index_of("bramble").expect("capacity");
        assert_eq!(a, 1);
        assert_eq!(b, 2);
        assert_eq!(table.index_of("azalea"), Some(1));
        assert_eq!(table.id_of(2), Some("bramble"));
        assert_eq!(table.lookup("missing"), None);
    }

    #[test]
    fn slot_zero_is_never_assigned() {
        let mut table = IndexTable::for_players();
        assert_eq!(table.id_of(0), None);
        assert_ne!(table.index_of("first"), Some(0));
    }

    #[test]
    fn exhausted_table_degrades_to_none() {
        let mut table = IndexTable::new(2);
        assert_eq!(table.index_of("a"), Some(1));
        assert_eq!(table.index_of("b"), Some(2));
        assert_eq!(table.index_of("c"), None);
        // Existing entries still resolve.
        assert_eq!(table.index_of("b"), Some(2));
    }

    #[test]
    fn snapshot_is_positional() {
        let mut table = IndexTable::for_factions();
        table.index_of("azalea");
        table.index_of("bramble");
        assert_eq!(table.snapshot(), vec!["", "azalea", "bramble"]);
    }
}

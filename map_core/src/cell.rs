//! In-memory cell view and the core-tile state machine vocabulary.
//!
//! The wire format packs core state into two flag bits plus one f64
//! stamp; engine code never touches those directly and instead goes
//! through the tagged [`CoreState`] view, which makes the stamp's
//! meaning (expiry vs. pending-since) unambiguous.

use bitflags::bitflags;
use map_proto::{CellRecord, FACTION_NONE, PAINTER_NONE};

bitflags! {
    /// Per-cell flag byte, bit-compatible with the wire record.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct CellFlags: u8 {
        const CORE = map_proto::FLAG_CORE;
        const PENDING = map_proto::FLAG_PENDING;
    }
}

/// Lifecycle state of a cell's core claim.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CoreState {
    Plain,
    Pending { since_ms: f64 },
    Core { expiry_ms: Option<f64> },
}

/// Decoded cell contents.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Cell {
    /// Owning faction index, `None` for unowned.
    pub faction: Option<u16>,
    /// 24-bit RGB color.
    pub color: u32,
    /// Dense index of the last painter, 0 for none.
    pub painter: u32,
    /// Overpaint level, 0–4.
    pub overpaint: u8,
    pub flags: CellFlags,
    /// Core expiry (CORE set), pending-since (PENDING set) or 0.
    pub stamp_ms: f64,
    /// Epoch-seconds of the last paint, 0 if never painted.
    pub painted_at: u32,
}

impl Default for Cell {
    fn default() -> Self {
        Self::empty()
    }
}

impl Cell {
    /// The unowned cell every grid slot starts as.
    pub fn empty() -> Self {
        Self {
            faction: None,
            color: 0,
            painter: PAINTER_NONE,
            overpaint: 0,
            flags: CellFlags::empty(),
            stamp_ms: 0.0,
            painted_at: 0,
        }
    }

    pub fn from_record(record: CellRecord) -> Self {
        let faction = if record.faction == FACTION_NONE {
            None
        } else {
            Some(record.faction)
        };
        Self {
            faction,
            color: record.color,
            painter: record.painter,
            overpaint: record.overpaint,
            // Unknown future flag bits are dropped rather than carried.
            flags: CellFlags::from_bits_truncate(record.flags),
            stamp_ms: record.stamp_ms,
            painted_at: record.painted_at,
        }
    }

    pub fn to_record(self) -> CellRecord {
        CellRecord {
            faction: self.faction.unwrap_or(FACTION_NONE),
            color: self.color,
            painter: self.painter,
            overpaint: self.overpaint,
            flags: self.flags.bits(),
            stamp_ms: self.stamp_ms,
            painted_at: self.painted_at,
        }
    }

    /// Tagged view of the flag bits plus stamp. CORE wins if both flag
    /// bits are somehow set; the integrity scan clears such cells.
    pub fn core_state(&self) -> CoreState {
        if self.flags.contains(CellFlags::CORE) {
            let expiry_ms = if self.stamp_ms > 0.0 {
                Some(self.stamp_ms)
            } else {
                None
            };
            CoreState::Core { expiry_ms }
        } else if self.flags.contains(CellFlags::PENDING) {
            CoreState::Pending {
                since_ms: self.stamp_ms,
            }
        } else {
            CoreState::Plain
        }
    }

    pub fn set_core_state(&mut self, state: CoreState) {
        match state {
            CoreState::Plain => {
                self.flags.remove(CellFlags::CORE | CellFlags::PENDING);
                self.stamp_ms = 0.0;
            }
            CoreState::Pending { since_ms } => {
                self.flags.remove(CellFlags::CORE);
                self.flags.insert(CellFlags::PENDING);
                self.stamp_ms = since_ms;
            }
            CoreState::Core { expiry_ms } => {
                self.flags.remove(CellFlags::PENDING);
                self.flags.insert(CellFlags::CORE);
                self.stamp_ms = expiry_ms.unwrap_or(0.0);
            }
        }
    }

    /// True for a core that has not expired as of `now_ms`.
    pub fn is_live_core(&self, now_ms: f64) -> bool {
        match self.core_state() {
            CoreState::Core { expiry_ms: None } => true,
            CoreState::Core {
                expiry_ms: Some(expiry),
            } => now_ms < expiry,
            _ => false,
        }
    }
}

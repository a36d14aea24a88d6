//! Shared tile grid: a fixed arena of atomic words, three per cell.
//!
//! The 24-byte wire record maps onto three little-endian `u64` words, so
//! one cell is one aligned triple. All loads and stores are relaxed:
//! within a word a reader sees a committed value, across the three words
//! of one cell a concurrent reader may observe a torn cell, which the
//! engine's eventual-consistency model explicitly permits. The
//! orchestrator is the only committed writer; worker tasks that write
//! directly partition the grid by Y-band so their cell sets never
//! overlap.

use std::sync::atomic::{AtomicU64, Ordering};

use map_proto::{CellRecord, CELL_RECORD_SIZE};
use serde::Serialize;

use crate::cell::Cell;

/// Atomic words per cell (24 bytes / 8).
const WORDS_PER_CELL: usize = 3;

/// Fixed-size shared tile grid.
pub struct TileGrid {
    size: u32,
    words: Vec<AtomicU64>,
}

impl TileGrid {
    /// Allocate a `size` × `size` grid with every cell unowned.
    pub fn new(size: u32) -> Self {
        let cells = (size as usize) * (size as usize);
        let empty = pack_words(&Cell::empty().to_record());
        let mut words = Vec::with_capacity(cells * WORDS_PER_CELL);
        for _ in 0..cells {
            for word in empty {
                words.push(AtomicU64::new(word));
            }
        }
        Self { size, words }
    }

    #[inline]
    pub fn size(&self) -> u32 {
        self.size
    }

    #[inline]
    pub fn cell_count(&self) -> usize {
        (self.size as usize) * (self.size as usize)
    }

    /// Row-major word offset for in-range coordinates.
    #[inline]
    fn index(&self, x: u32, y: u32) -> Option<usize> {
        if x < self.size && y < self.size {
            Some(((y as usize) * (self.size as usize) + x as usize) * WORDS_PER_CELL)
        } else {
            None
        }
    }

    /// Read the cell at `(x, y)`, `None` outside the grid. Neighbor
    /// scans reach past the edge routinely, so out-of-range is not an
    /// error.
    pub fn read_cell(&self, x: u32, y: u32) -> Option<Cell> {
        let base = self.index(x, y)?;
        let words = [
            self.words[base].load(Ordering::Relaxed),
            self.words[base + 1].load(Ordering::Relaxed),
            self.words[base + 2].load(Ordering::Relaxed),
        ];
        Some(Cell::from_record(unpack_words(words)))
    }

    /// Write the cell at `(x, y)`; silently a no-op outside the grid.
    /// NaN stamps are normalized to 0 by the record encoder.
    pub fn write_cell(&self, x: u32, y: u32, cell: &Cell) {
        let Some(base) = self.index(x, y) else {
            return;
        };
        let words = pack_words(&cell.to_record());
        self.words[base].store(words[0], Ordering::Relaxed);
        self.words[base + 1].store(words[1], Ordering::Relaxed);
        self.words[base + 2].store(words[2], Ordering::Relaxed);
    }

    /// Serialize the whole grid as row-major wire records.
    pub fn export_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.cell_count() * CELL_RECORD_SIZE);
        for chunk in self.words.chunks_exact(WORDS_PER_CELL) {
            let words = [
                chunk[0].load(Ordering::Relaxed),
                chunk[1].load(Ordering::Relaxed),
                chunk[2].load(Ordering::Relaxed),
            ];
            for word in words {
                out.extend_from_slice(&word.to_le_bytes());
            }
        }
        out
    }

    /// Overwrite the grid from row-major wire records, e.g. a decoded
    /// TMAP payload. Returns false (leaving the grid untouched) when the
    /// payload does not match the grid's cell count.
    pub fn load_bytes(&self, bytes: &[u8]) -> bool {
        if bytes.len() != self.cell_count() * CELL_RECORD_SIZE {
            return false;
        }
        for (cell_idx, record_bytes) in bytes.chunks_exact(CELL_RECORD_SIZE).enumerate() {
            let mut buf = [0u8; CELL_RECORD_SIZE];
            buf.copy_from_slice(record_bytes);
            let words = pack_words(&CellRecord::decode(&buf));
            let base = cell_idx * WORDS_PER_CELL;
            self.words[base].store(words[0], Ordering::Relaxed);
            self.words[base + 1].store(words[1], Ordering::Relaxed);
            self.words[base + 2].store(words[2], Ordering::Relaxed);
        }
        true
    }
}

fn pack_words(record: &CellRecord) -> [u64; WORDS_PER_CELL] {
    let bytes = record.to_bytes();
    let mut words = [0u64; WORDS_PER_CELL];
    for (i, chunk) in bytes.chunks_exact(8).enumerate() {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(chunk);
        words[i] = u64::from_le_bytes(buf);
    }
    words
}

fn unpack_words(words: [u64; WORDS_PER_CELL]) -> CellRecord {
    let mut bytes = [0u8; CELL_RECORD_SIZE];
    for (i, word) in words.iter().enumerate() {
        bytes[i * 8..(i + 1) * 8].copy_from_slice(&word.to_le_bytes());
    }
    CellRecord::decode(&bytes)
}

/// Half-open row range `[y_start, y_end)` assigned to one task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct YBand {
    pub y_start: u32,
    pub y_end: u32,
}

impl YBand {
    pub fn full(size: u32) -> Self {
        Self {
            y_start: 0,
            y_end: size,
        }
    }

    pub fn rows(&self) -> impl Iterator<Item = u32> {
        self.y_start..self.y_end
    }
}

/// Partition `size` rows into at most `parts` contiguous non-overlapping
/// bands covering the whole grid.
pub fn partition_bands(size: u32, parts: usize) -> Vec<YBand> {
    let parts = parts.clamp(1, size.max(1) as usize) as u32;
    let base = size / parts;
    let remainder = size % parts;
    let mut bands = Vec::with_capacity(parts as usize);
    let mut y = 0;
    for i in 0..parts {
        let height = base + u32::from(i < remainder);
        if height == 0 {
            continue;
        }
        bands.push(YBand {
            y_start: y,
            y_end: y + height,
        });
        y += height;
    }
    bands
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::{CellFlags, CoreState};

    #[test]
    fn out_of_range_reads_are_none_and_writes_are_noops() {
        let grid = TileGrid::new(8);
        assert!(grid.read_cell(8, 0).is_none());
        assert!(grid.read_cell(0, 8).is_none());
        assert!(grid.read_cell(u32::MAX, u32::MAX).is_none());

        let mut cell = Cell::empty();
        cell.faction = Some(3);
        grid.write_cell(8, 7, &cell);
        grid.write_cell(7, 8, &cell);

        // No adjacent-cell corruption from the rejected writes.
        for y in 0..8 {
            for x in 0..8 {
                assert_eq!(grid.read_cell(x, y), Some(Cell::empty()));
            }
        }
    }

    #[test]
    fn written_cells_read_back_identically() {
        let grid = TileGrid::new(16);
        let mut cell = Cell::empty();
        cell.faction = Some(12);
        cell.color = 0x00FF_8800;
        cell.painter = 77;
        cell.overpaint = 2;
        cell.painted_at = 1_700_000_000;
        cell.set_core_state(CoreState::Core {
            expiry_ms: Some(1_700_000_999_000.0),
        });

        grid.write_cell(5, 9, &cell);
        let read = grid.read_cell(5, 9).expect("in range");
        assert_eq!(read, cell);
        assert!(read.flags.contains(CellFlags::CORE));
        assert_eq!(grid.read_cell(4, 9), Some(Cell::empty()));
        assert_eq!(grid.read_cell(6, 9), Some(Cell::empty()));
    }

    #[test]
    fn nan_stamp_is_normalized_before_storage() {
        let grid = TileGrid::new(4);
        let mut cell = Cell::empty();
        cell.stamp_ms = f64::NAN;
        grid.write_cell(1, 1, &cell);
        assert_eq!(grid.read_cell(1, 1).expect("in range").stamp_ms, 0.0);
    }

    #[test]
    fn export_and_load_round_trip() {
        let grid = TileGrid::new(6);
        let mut cell = Cell::empty();
        cell.faction = Some(1);
        cell.color = 0x123456;
        grid.write_cell(2, 3, &cell);

        let bytes = grid.export_bytes();
        let other = TileGrid::new(6);
        assert!(other.load_bytes(&bytes));
        assert_eq!(other.read_cell(2, 3), Some(cell));
        assert_eq!(other.read_cell(0, 0), Some(Cell::empty()));

        assert!(!other.load_bytes(&bytes[..24]));
    }

    #[test]
    fn bands_cover_the_grid_without_overlap() {
        for parts in 1..6 {
            let bands = partition_bands(10, parts);
            let mut covered = vec![false; 10];
            for band in &bands {
                for y in band.rows() {
                    assert!(!covered[y as usize], "row {y} covered twice");
                    covered[y as usize] = true;
                }
            }
            assert!(covered.into_iter().all(|c| c));
        }
        assert_eq!(partition_bands(3, 8).len(), 3);
    }
}

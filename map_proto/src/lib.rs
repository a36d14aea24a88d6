//! Wire contract for the territory map engine.
//!
//! Two binary surfaces live here and nowhere else:
//!
//! - the fixed 24-byte little-endian per-cell record, and
//! - the TMAP container (magic + version + identifier tables + raw grid)
//!   that external clients decode without per-cell JSON parsing.
//!
//! Layout changes to either require a [`TMAP_VERSION`] bump.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Size in bytes of one encoded cell record.
pub const CELL_RECORD_SIZE: usize = 24;

/// Wire sentinel for "no owning faction".
pub const FACTION_NONE: u16 = 0xFFFF;

/// Wire sentinel for "no painter".
pub const PAINTER_NONE: u32 = 0;

/// Container magic, first four bytes of every TMAP export.
pub const TMAP_MAGIC: [u8; 4] = *b"TMAP";

/// Current container version.
pub const TMAP_VERSION: u8 = 1;

/// Flag byte bit for a core tile.
pub const FLAG_CORE: u8 = 0b0000_0001;

/// Flag byte bit for a tile currently being coreified.
pub const FLAG_PENDING: u8 = 0b0000_0010;

/// Raw per-cell record as it appears on the wire.
///
/// Offsets (little-endian): 0 faction (u16, `0xFFFF` = none); 2 color
/// (u32, low 24 bits = RGB); 6 painter (u32, 0 = none); 10 overpaint
/// (u8, 0–4); 11 flags (u8, bit0 core / bit1 pending); 12 stamp
/// (f64 epoch-ms, 0 = permanent/none); 20 painted-at (u32 epoch-s,
/// 0 = unset).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CellRecord {
    pub faction: u16,
    pub color: u32,
    pub painter: u32,
    pub overpaint: u8,
    pub flags: u8,
    pub stamp_ms: f64,
    pub painted_at: u32,
}

impl Default for CellRecord {
    fn default() -> Self {
        Self {
            faction: FACTION_NONE,
            color: 0,
            painter: PAINTER_NONE,
            overpaint: 0,
            flags: 0,
            stamp_ms: 0.0,
            painted_at: 0,
        }
    }
}

impl CellRecord {
    /// Encode into a fixed 24-byte buffer.
    ///
    /// Normalizes before packing: the color is masked to its low 24 bits
    /// and a NaN stamp becomes 0.
    pub fn encode(&self, out: &mut [u8; CELL_RECORD_SIZE]) {
        let stamp = if self.stamp_ms.is_nan() {
            0.0
        } else {
            self.stamp_ms
        };
        out[0..2].copy_from_slice(&self.faction.to_le_bytes());
        out[2..6].copy_from_slice(&(self.color & 0x00FF_FFFF).to_le_bytes());
        out[6..10].copy_from_slice(&self.painter.to_le_bytes());
        out[10] = self.overpaint;
        out[11] = self.flags;
        out[12..20].copy_from_slice(&stamp.to_le_bytes());
        out[20..24].copy_from_slice(&self.painted_at.to_le_bytes());
    }

    /// Encode into a freshly allocated buffer.
    pub fn to_bytes(&self) -> [u8; CELL_RECORD_SIZE] {
        let mut out = [0u8; CELL_RECORD_SIZE];
        self.encode(&mut out);
        out
    }

    /// Decode from a fixed 24-byte buffer. Never fails: every bit
    /// pattern is a representable record.
    pub fn decode(bytes: &[u8; CELL_RECORD_SIZE]) -> Self {
        let faction = u16::from_le_bytes([bytes[0], bytes[1]]);
        let color = u32::from_le_bytes([bytes[2], bytes[3], bytes[4], bytes[5]]) & 0x00FF_FFFF;
        let painter = u32::from_le_bytes([bytes[6], bytes[7], bytes[8], bytes[9]]);
        let overpaint = bytes[10];
        let flags = bytes[11];
        let mut stamp = [0u8; 8];
        stamp.copy_from_slice(&bytes[12..20]);
        let stamp_ms = f64::from_le_bytes(stamp);
        let painted_at = u32::from_le_bytes([bytes[20], bytes[21], bytes[22], bytes[23]]);
        Self {
            faction,
            color,
            painter,
            overpaint,
            flags,
            stamp_ms,
            painted_at,
        }
    }
}

/// Decoded TMAP container contents.
///
/// `cells` is the raw grid payload: `tile_count` records of
/// [`CELL_RECORD_SIZE`] bytes in row-major `(y * size + x)` order.
/// Identifier tables are positional: table index == dense index used in
/// cell records, slot 0 being the reserved "none" entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TmapSnapshot {
    pub generated_ms: u64,
    pub factions: Vec<String>,
    pub players: Vec<String>,
    pub cells: Vec<u8>,
}

impl TmapSnapshot {
    pub fn tile_count(&self) -> usize {
        self.cells.len() / CELL_RECORD_SIZE
    }

    /// Decode the record at `index`, or `None` past the end.
    pub fn record(&self, index: usize) -> Option<CellRecord> {
        let start = index.checked_mul(CELL_RECORD_SIZE)?;
        let end = start.checked_add(CELL_RECORD_SIZE)?;
        let slice = self.cells.get(start..end)?;
        let mut buf = [0u8; CELL_RECORD_SIZE];
        buf.copy_from_slice(slice);
        Some(CellRecord::decode(&buf))
    }
}

/// Failure decoding a TMAP container.
#[derive(Debug, Error)]
pub enum TmapError {
    #[error("container truncated at offset {offset}: needed {needed} more bytes")]
    Truncated { offset: usize, needed: usize },
    #[error("bad magic: expected \"TMAP\"")]
    BadMagic,
    #[error("unsupported container version {0}")]
    UnsupportedVersion(u8),
    #[error("identifier table entry at offset {0} is not valid UTF-8")]
    InvalidUtf8(usize),
    #[error("tile payload holds {actual} bytes but the header declares {declared} tiles")]
    TileCountMismatch { declared: u32, actual: usize },
}

/// Serialize a snapshot into the TMAP wire layout.
pub fn encode_tmap(snapshot: &TmapSnapshot) -> Vec<u8> {
    let table_bytes: usize = snapshot
        .factions
        .iter()
        .chain(snapshot.players.iter())
        .map(|entry| 2 + entry.len())
        .sum();
    let mut out = Vec::with_capacity(4 + 1 + 8 + 2 + 4 + 4 + table_bytes + snapshot.cells.len());

    out.extend_from_slice(&TMAP_MAGIC);
    out.push(TMAP_VERSION);
    out.extend_from_slice(&snapshot.generated_ms.to_le_bytes());

    out.extend_from_slice(&(snapshot.factions.len() as u16).to_le_bytes());
    for name in &snapshot.factions {
        out.extend_from_slice(&(name.len() as u16).to_le_bytes());
        out.extend_from_slice(name.as_bytes());
    }

    out.extend_from_slice(&(snapshot.players.len() as u32).to_le_bytes());
    for id in &snapshot.players {
        out.extend_from_slice(&(id.len() as u16).to_le_bytes());
        out.extend_from_slice(id.as_bytes());
    }

    let tile_count = (snapshot.cells.len() / CELL_RECORD_SIZE) as u32;
    out.extend_from_slice(&tile_count.to_le_bytes());
    out.extend_from_slice(&snapshot.cells);
    out
}

/// Parse a TMAP container, validating magic, version and all length
/// arithmetic before touching the payload.
pub fn decode_tmap(bytes: &[u8]) -> Result<TmapSnapshot, TmapError> {
    let mut reader = Reader::new(bytes);

    let magic = reader.take(4)?;
    if magic != TMAP_MAGIC {
        return Err(TmapError::BadMagic);
    }
    let version = reader.u8()?;
    if version != TMAP_VERSION {
        return Err(TmapError::UnsupportedVersion(version));
    }
    let generated_ms = reader.u64()?;

    let faction_count = reader.u16()? as usize;
    let mut factions = Vec::with_capacity(faction_count.min(4096));
    for _ in 0..faction_count {
        factions.push(reader.string()?);
    }

    let player_count = reader.u32()? as usize;
    let mut players = Vec::with_capacity(player_count.min(65_536));
    for _ in 0..player_count {
        players.push(reader.string()?);
    }

    let declared = reader.u32()?;
    let cells = reader.rest().to_vec();
    if cells.len() != declared as usize * CELL_RECORD_SIZE {
        return Err(TmapError::TileCountMismatch {
            declared,
            actual: cells.len(),
        });
    }

    Ok(TmapSnapshot {
        generated_ms,
        factions,
        players,
        cells,
    })
}

/// Offset-tracking reader so every decode failure can name where it
/// happened.
struct Reader<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, offset: 0 }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], TmapError> {
        let end = self.offset.checked_add(len).ok_or_else(|| TmapError::Truncated {
            offset: self.offset,
            needed: len,
        })?;
        let slice = self
            .bytes
            .get(self.offset..end)
            .ok_or_else(|| TmapError::Truncated {
                offset: self.offset,
                needed: end - self.bytes.len(),
            })?;
        self.offset = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, TmapError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, TmapError> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32, TmapError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64(&mut self) -> Result<u64, TmapError> {
        let b = self.take(8)?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(b);
        Ok(u64::from_le_bytes(buf))
    }

    fn string(&mut self) -> Result<String, TmapError> {
        let start = self.offset;
        let len = self.u16()? as usize;
        let raw = self.take(len)?;
        String::from_utf8(raw.to_vec()).map_err(|_| TmapError::InvalidUtf8(start))
    }

    fn rest(&mut self) -> &'a [u8] {
        let slice = &self.bytes[self.offset.min(self.bytes.len())..];
        self.offset = self.bytes.len();
        slice
    }
}

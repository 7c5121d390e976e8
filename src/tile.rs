//! Tile and entry bundle wire codecs
//!
//! Tiles serialize as one lowercase-hex hash per line; entry bundles as one
//! standard-base64 entry per line. Both are newline-terminated with no
//! trailing blank line, and both round-trip exactly.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;

use crate::error::{LogError, LogResult};
use crate::merkle::{Hash, HASH_SIZE};

/// Hard cap on hashes per tile, independent of the configured width
pub const TILE_MAX_LEAVES: usize = 256;

/// An ordered block of subtree hashes at one level of the tree.
///
/// Only the rightmost tile on a level may hold fewer than the configured
/// width; tiles strictly left of the fringe are complete and immutable.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Tile {
    hashes: Vec<Hash>,
}

impl Tile {
    pub fn new() -> Self {
        Self { hashes: Vec::new() }
    }

    pub fn from_hashes(hashes: Vec<Hash>) -> LogResult<Self> {
        if hashes.is_empty() || hashes.len() > TILE_MAX_LEAVES {
            return Err(LogError::InvalidArgument(format!(
                "tile must hold 1..={} hashes, got {}",
                TILE_MAX_LEAVES,
                hashes.len()
            )));
        }
        Ok(Self { hashes })
    }

    pub fn num_leaves(&self) -> usize {
        self.hashes.len()
    }

    pub fn hashes(&self) -> &[Hash] {
        &self.hashes
    }

    /// Append one hash; fails once the hard cap is reached
    pub fn push(&mut self, hash: Hash) -> LogResult<()> {
        if self.hashes.len() >= TILE_MAX_LEAVES {
            return Err(LogError::Corruption(format!(
                "tile already holds {} hashes",
                TILE_MAX_LEAVES
            )));
        }
        self.hashes.push(hash);
        Ok(())
    }

    /// Textual wire form: one hex hash per line
    pub fn to_text(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.hashes.len() * (HASH_SIZE * 2 + 1));
        for h in &self.hashes {
            out.extend_from_slice(hex::encode(h).as_bytes());
            out.push(b'\n');
        }
        out
    }

    /// Parse the textual wire form; the line count becomes `num_leaves`
    pub fn from_text(data: &[u8]) -> LogResult<Self> {
        let text = std::str::from_utf8(data)
            .map_err(|_| LogError::InvalidArgument("tile data is not UTF-8".into()))?;
        let mut hashes = Vec::new();
        for line in text.lines() {
            if line.len() != HASH_SIZE * 2 {
                return Err(LogError::InvalidArgument(format!(
                    "tile line has {} chars, want {}",
                    line.len(),
                    HASH_SIZE * 2
                )));
            }
            let raw = hex::decode(line)?;
            let mut h = [0u8; HASH_SIZE];
            h.copy_from_slice(&raw);
            if hashes.len() == TILE_MAX_LEAVES {
                return Err(LogError::InvalidArgument(format!(
                    "tile holds more than {} hashes",
                    TILE_MAX_LEAVES
                )));
            }
            hashes.push(h);
        }
        if hashes.is_empty() {
            return Err(LogError::InvalidArgument("tile holds no hashes".into()));
        }
        Ok(Self { hashes })
    }
}

/// A dense block of raw entries, stored base64-encoded one per line.
///
/// Bundle `k` holds the entries at positions `[k*B, (k+1)*B)`; only the
/// rightmost bundle may be partial.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EntryBundle {
    entries: Vec<Vec<u8>>,
}

impl EntryBundle {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[Vec<u8>] {
        &self.entries
    }

    pub fn push(&mut self, entry: Vec<u8>) {
        self.entries.push(entry);
    }

    /// Wire form: base64(entry) + "\n" per entry
    pub fn to_text(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for e in &self.entries {
            out.extend_from_slice(BASE64.encode(e).as_bytes());
            out.push(b'\n');
        }
        out
    }

    pub fn from_text(data: &[u8]) -> LogResult<Self> {
        let text = std::str::from_utf8(data)
            .map_err(|_| LogError::InvalidArgument("bundle data is not UTF-8".into()))?;
        let mut entries = Vec::new();
        for line in text.lines() {
            entries.push(BASE64.decode(line)?);
        }
        Ok(Self { entries })
    }
}

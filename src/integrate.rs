//! Tile integrator
//!
//! Takes the current tree size and a batch of new leaves, updates every
//! tile on the right fringe whose coverage intersects the new positions,
//! and derives the new root. All reads and writes go through the caller's
//! open transaction, so a failure at any point unwinds cleanly.
//!
//! A hash stored at position `j` of tile `(level, index)` is the root of a
//! perfect subtree over `width^level` leaves starting at leaf
//! `(index * width + j) * width^level`. Completing a tile therefore hands
//! exactly one new "leaf" (its root) up to level `level + 1` at position
//! `index`.

use std::collections::HashMap;

use tracing::debug;

use crate::error::{LogError, LogResult};
use crate::merkle::{fold_run, leaf_hash, Hash};
use crate::storage::LogTx;
use crate::tile::Tile;

/// Integrate `leaves` into the tree of current size `from`.
///
/// Returns the new size and the new root. The batch must be non-empty;
/// the sequencer short-circuits empty batches before any transaction work.
pub fn integrate(
    tx: &LogTx<'_>,
    width: usize,
    from: u64,
    leaves: &[Vec<u8>],
) -> LogResult<(u64, Hash)> {
    if leaves.is_empty() {
        return Err(LogError::InvalidArgument(
            "integrate called with an empty batch".into(),
        ));
    }

    let mut tiles = TileWriter::new(tx, width);

    let mut level = 0u64;
    let mut first = from;
    let mut hashes: Vec<Hash> = leaves.iter().map(|e| leaf_hash(e)).collect();

    loop {
        let (first_completed, completed) = apply_level(&mut tiles, level, first, &hashes)?;
        debug!(
            level,
            added = hashes.len(),
            completed = completed.len(),
            "integrated level"
        );
        if completed.is_empty() {
            break;
        }
        first = first_completed;
        hashes = completed;
        level += 1;
    }

    let new_size = from + leaves.len() as u64;
    let root = root_at(&mut tiles, new_size)?;
    Ok((new_size, root))
}

/// Append `new` hashes at positions `[first, first + new.len())` of `level`,
/// updating fringe tiles in place. Returns the index of the first tile
/// completed by this pass and the roots of all completed tiles, in order.
fn apply_level(
    tiles: &mut TileWriter<'_, '_>,
    level: u64,
    first: u64,
    new: &[Hash],
) -> LogResult<(u64, Vec<Hash>)> {
    let width = tiles.width as u64;
    let mut completed = Vec::new();
    let mut first_completed = 0u64;

    let mut pos = first;
    let mut remaining = new;
    while !remaining.is_empty() {
        let tile_idx = pos / width;
        let offset = (pos % width) as usize;

        let mut tile = if offset > 0 {
            tiles.load(level, tile_idx)?.ok_or_else(|| {
                LogError::Corruption(format!(
                    "fringe tile ({}, {}) missing at offset {}",
                    level, tile_idx, offset
                ))
            })?
        } else {
            Tile::new()
        };
        if tile.num_leaves() != offset {
            return Err(LogError::Corruption(format!(
                "fringe tile ({}, {}) holds {} hashes, want {}",
                level,
                tile_idx,
                tile.num_leaves(),
                offset
            )));
        }

        let take = remaining.len().min(tiles.width - offset);
        for h in &remaining[..take] {
            tile.push(*h)?;
        }

        if tile.num_leaves() == tiles.width {
            if completed.is_empty() {
                first_completed = tile_idx;
            }
            completed.push(fold_run(tile.hashes(), 1, None));
        }
        tiles.store(level, tile_idx, tile)?;

        pos += take as u64;
        remaining = &remaining[take..];
    }

    Ok((first_completed, completed))
}

/// Root of the tree at `size`, folding the right-fringe partial subtrees
/// left to right.
fn root_at(tiles: &mut TileWriter<'_, '_>, size: u64) -> LogResult<Hash> {
    debug_assert!(size > 0);
    let width = tiles.width as u128;
    // smallest level whose single tile spans the whole tree
    let mut level = 0u64;
    while width.pow(level as u32 + 1) < size as u128 {
        level += 1;
    }
    root_below(tiles, level, 0, size)
}

/// Root of the subtree covered by tile (level, index) in a tree of `size`
/// leaves. The tile's coverage must intersect `[0, size)`.
fn root_below(tiles: &mut TileWriter<'_, '_>, level: u64, index: u64, size: u64) -> LogResult<Hash> {
    let width = tiles.width as u128;
    let span = width.pow(level as u32); // leaves per stored hash
    let base = index as u128 * span * width;
    let end = (size as u128).min(base + span * width);
    debug_assert!(end > base);

    let covered = end - base;
    let full = (covered / span) as usize;
    let remainder = covered % span;

    if full == 0 {
        // nothing complete at this level yet; the subtree lives one level
        // down in the leftmost child position
        return root_below(tiles, level - 1, index * width as u64, size);
    }

    let tile = tiles.load(level, index)?.ok_or_else(|| {
        LogError::Corruption(format!("tile ({}, {}) missing during root fold", level, index))
    })?;
    if tile.num_leaves() != full {
        return Err(LogError::Corruption(format!(
            "tile ({}, {}) holds {} hashes, want {} at size {}",
            level,
            index,
            tile.num_leaves(),
            full,
            size
        )));
    }

    let partial = if remainder > 0 {
        let child = index * width as u64 + full as u64;
        Some((root_below(tiles, level - 1, child, size)?, remainder))
    } else {
        None
    };

    Ok(fold_run(tile.hashes(), span, partial))
}

/// Transaction-scoped tile access with write-through caching, so the root
/// fold sees the tiles updated earlier in the same batch.
struct TileWriter<'a, 'b> {
    tx: &'b LogTx<'a>,
    width: usize,
    dirty: HashMap<(u64, u64), Tile>,
}

impl<'a, 'b> TileWriter<'a, 'b> {
    fn new(tx: &'b LogTx<'a>, width: usize) -> Self {
        Self {
            tx,
            width,
            dirty: HashMap::new(),
        }
    }

    fn load(&mut self, level: u64, index: u64) -> LogResult<Option<Tile>> {
        if let Some(tile) = self.dirty.get(&(level, index)) {
            return Ok(Some(tile.clone()));
        }
        self.tx.get_subtree(level, index)
    }

    fn store(&mut self, level: u64, index: u64, tile: Tile) -> LogResult<()> {
        self.tx.put_subtree(level, index, &tile)?;
        self.dirty.insert((level, index), tile);
        Ok(())
    }
}

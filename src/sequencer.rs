//! Sequencer: assigns contiguous indices and persists a batch atomically
//!
//! One call, one transaction: read and parse the checkpoint, append the
//! batch into entry bundles starting at the next free slot, integrate the
//! new leaves into the tile structure, write the new signed checkpoint,
//! commit. Any failure rolls the whole batch back; no partial state is
//! ever visible.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info};

use crate::config::LogParams;
use crate::error::{LogError, LogResult};
use crate::integrate::integrate;
use crate::note::CheckpointCodec;
use crate::storage::{LogStore, LogTx};
use crate::tile::EntryBundle;

/// Result of sequencing one batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequencedBatch {
    /// Index assigned to the first entry of the batch; entry `i` received
    /// `first_index + i`
    pub first_index: u64,

    /// Entries that would exactly fill the bundle the next batch starts
    /// in; the pool may use it to align batches to bundle boundaries
    pub ideal_next_batch_size: usize,
}

pub struct Sequencer {
    store: Arc<LogStore>,
    codec: Arc<dyn CheckpointCodec>,
    params: LogParams,
}

impl Sequencer {
    pub fn new(store: Arc<LogStore>, codec: Arc<dyn CheckpointCodec>, params: LogParams) -> Self {
        Self {
            store,
            codec,
            params,
        }
    }

    /// Create the initial checkpoint if the store has none.
    ///
    /// The size-0 checkpoint commits to the literal placeholder bytes
    /// `"Empty"`, not the canonical empty-tree hash; verifiers treat
    /// size-0 notes specially.
    pub fn ensure_initialized(&self) -> LogResult<bool> {
        match self.store.read_checkpoint() {
            Ok(_) => Ok(false),
            Err(LogError::NotFound(_)) => {
                let note = self.codec.create(0, b"Empty")?;
                self.store.write_checkpoint(&note)?;
                info!("initialized log with empty checkpoint");
                Ok(true)
            }
            Err(e) => Err(e),
        }
    }

    /// Sequence a batch of entries.
    ///
    /// Blocking: runs a full read-write transaction against the store.
    /// An empty batch returns immediately and touches nothing.
    pub fn sequence_batch(&self, entries: &[Vec<u8>]) -> LogResult<SequencedBatch> {
        if entries.is_empty() {
            return Ok(SequencedBatch {
                first_index: 0,
                ideal_next_batch_size: 0,
            });
        }
        let start = Instant::now();
        let bundle_size = self.params.entry_bundle_size;

        let mut conn = self.store.lock()?;
        let tx = LogTx::begin(&mut conn)?;

        let raw = tx.read_checkpoint()?;
        let size = self.codec.parse(&raw)?;

        let mut bundle_index = size / bundle_size as u64;
        let mut in_bundle = (size % bundle_size as u64) as usize;
        let ideal_next_batch_size = bundle_size - in_bundle;

        let mut bundle = if in_bundle > 0 {
            debug!(bundle_index, in_bundle, "resuming partial bundle");
            let raw = tx.get_bundle(bundle_index)?.ok_or_else(|| {
                LogError::Corruption(format!("bundle {} missing at size {}", bundle_index, size))
            })?;
            let bundle = EntryBundle::from_text(&raw)
                .map_err(|e| LogError::Corruption(format!("bundle {}: {}", bundle_index, e)))?;
            if bundle.len() != in_bundle {
                return Err(LogError::Corruption(format!(
                    "bundle {} holds {} entries, want {}",
                    bundle_index,
                    bundle.len(),
                    in_bundle
                )));
            }
            bundle
        } else {
            EntryBundle::new()
        };

        for entry in entries {
            bundle.push(entry.clone());
            in_bundle += 1;
            if in_bundle == bundle_size {
                tx.put_bundle(bundle_index, &bundle.to_text())?;
                bundle_index += 1;
                in_bundle = 0;
                bundle = EntryBundle::new();
            }
        }
        if in_bundle > 0 {
            tx.put_bundle(bundle_index, &bundle.to_text())?;
        }

        let (new_size, root) = integrate(&tx, bundle_size, size, entries)?;

        let note = self.codec.create(new_size, &root)?;
        tx.write_checkpoint(&note)?;
        tx.commit()?;

        debug!(
            batch = entries.len(),
            first_index = size,
            new_size,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "sequenced batch"
        );
        Ok(SequencedBatch {
            first_index: size,
            ideal_next_batch_size,
        })
    }
}

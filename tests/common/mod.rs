//! Shared fixtures for integration tests

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use tilelog::merkle::{leaf_hash, node_hash, Hash};
use tilelog::{
    EntryBundle, LogParams, LogStore, NoteSigner, Pool, PoolConfig, PoolHandle, Sequencer,
};

pub const TEST_ORIGIN: &str = "test-log";
pub const TEST_SEED: [u8; 32] = [7u8; 32];

pub fn test_signer() -> NoteSigner {
    NoteSigner::new(TEST_ORIGIN, &TEST_SEED)
}

/// A running log: in-memory store, initialized checkpoint, live pool
pub struct TestLog {
    pub store: Arc<LogStore>,
    pub handle: PoolHandle,
    pub signer: NoteSigner,
}

impl TestLog {
    pub async fn start(bundle_size: usize, batch_size: usize, max_age: Duration) -> Self {
        let store = Arc::new(LogStore::in_memory().expect("open store"));
        let sequencer = Arc::new(Sequencer::new(
            store.clone(),
            Arc::new(test_signer()),
            LogParams {
                entry_bundle_size: bundle_size,
            },
        ));
        sequencer.ensure_initialized().expect("initialize log");

        let (pool, handle) = Pool::new(
            sequencer,
            PoolConfig {
                batch_size,
                batch_max_age: max_age,
                ..Default::default()
            },
        );
        tokio::spawn(pool.run());

        Self {
            store,
            handle,
            signer: test_signer(),
        }
    }

    /// Size committed by the current checkpoint
    pub fn checkpoint_size(&self) -> u64 {
        let (size, _) = self
            .signer
            .parse_full(&self.store.read_checkpoint().expect("read checkpoint"))
            .expect("parse checkpoint");
        size
    }

    /// Root committed by the current checkpoint
    pub fn checkpoint_root(&self) -> Vec<u8> {
        let (_, root) = self
            .signer
            .parse_full(&self.store.read_checkpoint().expect("read checkpoint"))
            .expect("parse checkpoint");
        root
    }

    /// All sequenced entries, reassembled from the bundles in order
    pub fn read_all_entries(&self, bundle_size: usize) -> Vec<Vec<u8>> {
        let size = self.checkpoint_size() as usize;
        let mut entries = Vec::with_capacity(size);
        let mut idx = 0u64;
        while entries.len() < size {
            let raw = self.store.get_entry_bundle(idx).expect("bundle present");
            let bundle = EntryBundle::from_text(&raw).expect("well-formed bundle");
            assert!(bundle.len() <= bundle_size);
            entries.extend(bundle.entries().iter().cloned());
            idx += 1;
        }
        assert_eq!(entries.len(), size);
        entries
    }
}

/// Independent RFC 6962 tree head over raw entries
pub fn reference_root(entries: &[Vec<u8>]) -> Hash {
    fn mth(leaves: &[Vec<u8>]) -> Hash {
        match leaves.len() {
            1 => leaf_hash(&leaves[0]),
            n => {
                let mut k = 1usize;
                while k * 2 < n {
                    k *= 2;
                }
                node_hash(&mth(&leaves[..k]), &mth(&leaves[k..]))
            }
        }
    }
    assert!(!entries.is_empty());
    mth(entries)
}

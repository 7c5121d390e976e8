//! Batching pool
//!
//! Coalesces concurrent submissions into bounded batches and amortizes one
//! sequencer transaction across them. A batch opens on the first arrival
//! (its deadline set `batch_max_age` ahead), closes when it reaches the
//! size target, the deadline passes, or the pool shuts down, and settles
//! once the sequencer commits or fails. Every submitter is answered with
//! its own assigned index, or with the batch's error.
//!
//! After a successful commit the next batch's size target becomes the
//! sequencer's bundle-alignment hint, so steady-state writes land on
//! bundle boundaries; after that one batch the target reverts.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::PoolConfig;
use crate::error::{LogError, LogResult};
use crate::sequencer::{SequencedBatch, Sequencer};

/// A single submission waiting for its batch to settle
struct JoinRequest {
    entry: Vec<u8>,
    responder: oneshot::Sender<LogResult<u64>>,
}

/// Handle for submitting entries to the pool
#[derive(Clone)]
pub struct PoolHandle {
    tx: mpsc::Sender<JoinRequest>,
    allow_empty_entries: bool,
}

impl PoolHandle {
    /// Submit one entry and wait until its batch has settled.
    ///
    /// Returns the sequence number assigned to this entry. Callers block on
    /// settlement; there is no back-pressure at this layer beyond the
    /// bounded submission channel.
    pub async fn add(&self, entry: Vec<u8>) -> LogResult<u64> {
        if entry.is_empty() && !self.allow_empty_entries {
            return Err(LogError::InvalidArgument("empty entry rejected".into()));
        }

        let (responder, rx) = oneshot::channel();
        self.tx
            .send(JoinRequest { entry, responder })
            .await
            .map_err(|_| LogError::ServiceUnavailable("pool has shut down".into()))?;

        rx.await
            .map_err(|_| LogError::Internal("pool dropped response channel".into()))?
    }
}

/// The pool run loop; spawn as a task
pub struct Pool {
    rx: mpsc::Receiver<JoinRequest>,
    sequencer: Arc<Sequencer>,
    config: PoolConfig,
}

impl Pool {
    pub fn new(sequencer: Arc<Sequencer>, config: PoolConfig) -> (Self, PoolHandle) {
        let (tx, rx) = mpsc::channel(config.buffer_size);
        let handle = PoolHandle {
            tx,
            allow_empty_entries: config.allow_empty_entries,
        };
        (
            Self {
                rx,
                sequencer,
                config,
            },
            handle,
        )
    }

    pub async fn run(mut self) {
        info!(
            batch_size = self.config.batch_size,
            batch_max_age_ms = self.config.batch_max_age.as_millis() as u64,
            buffer_size = self.config.buffer_size,
            "pool started"
        );

        let mut batch: Vec<JoinRequest> = Vec::new();
        let mut target = self.config.batch_size;
        let mut deadline = Instant::now();

        loop {
            tokio::select! {
                request = self.rx.recv() => match request {
                    Some(request) => {
                        if batch.is_empty() {
                            deadline = Instant::now() + self.config.batch_max_age;
                        }
                        batch.push(request);
                        if batch.len() >= target {
                            debug!(batch = batch.len(), trigger = "size", "closing batch");
                            target = self.flush(&mut batch).await;
                        }
                    }
                    None => {
                        if !batch.is_empty() {
                            info!(batch = batch.len(), "flushing final batch before shutdown");
                            self.flush(&mut batch).await;
                        }
                        info!("pool shutting down");
                        return;
                    }
                },
                _ = tokio::time::sleep_until(deadline), if !batch.is_empty() => {
                    debug!(batch = batch.len(), trigger = "age", "closing batch");
                    target = self.flush(&mut batch).await;
                }
            }
        }
    }

    /// Drive the batch through the sequencer and answer every submitter.
    /// Returns the size target for the following batch.
    async fn flush(&self, batch: &mut Vec<JoinRequest>) -> usize {
        let requests = std::mem::take(batch);
        let batch_len = requests.len();
        let (entries, responders): (Vec<_>, Vec<_>) = requests
            .into_iter()
            .map(|r| (r.entry, r.responder))
            .unzip();

        match self.sequence_with_retry(entries).await {
            Ok(out) => {
                for (offset, responder) in responders.into_iter().enumerate() {
                    // a canceled submitter has simply stopped listening;
                    // its entry is committed either way
                    let _ = responder.send(Ok(out.first_index + offset as u64));
                }
                debug!(
                    batch = batch_len,
                    first_index = out.first_index,
                    "batch committed"
                );
                if out.ideal_next_batch_size > 0 {
                    out.ideal_next_batch_size
                } else {
                    self.config.batch_size
                }
            }
            Err(e) => {
                error!(batch = batch_len, error = %e, "batch failed");
                let msg = e.to_string();
                for responder in responders {
                    let _ = responder.send(Err(LogError::Batch(msg.clone())));
                }
                self.config.batch_size
            }
        }
    }

    /// Run the blocking sequencer off the async runtime, retrying
    /// transient store failures with jittered exponential backoff.
    async fn sequence_with_retry(&self, entries: Vec<Vec<u8>>) -> LogResult<SequencedBatch> {
        let entries = Arc::new(entries);
        let mut attempt = 0u32;
        let mut delay = self.config.retry_base;

        loop {
            let sequencer = Arc::clone(&self.sequencer);
            let entries = Arc::clone(&entries);
            let result = tokio::task::spawn_blocking(move || sequencer.sequence_batch(&entries))
                .await
                .map_err(|e| LogError::Internal(format!("sequencing task failed: {}", e)))?;

            match result {
                Ok(out) => return Ok(out),
                Err(e) if e.is_transient() => {
                    attempt += 1;
                    if attempt >= self.config.retry_count {
                        return Err(e);
                    }
                    let jitter_max = (delay.as_millis() as u64 / 2).max(1);
                    let jitter =
                        Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_max));
                    warn!(
                        attempt,
                        max_attempts = self.config.retry_count,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "batch write failed, retrying"
                    );
                    tokio::time::sleep(delay + jitter).await;
                    delay *= 2;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::config::LogParams;
    use crate::note::{CheckpointCodec, NoteSigner};
    use crate::storage::LogStore;

    /// Codec wrapper that counts commits (one `create` per batch)
    struct CountingCodec {
        inner: NoteSigner,
        creates: AtomicUsize,
    }

    impl CheckpointCodec for CountingCodec {
        fn parse(&self, raw: &[u8]) -> LogResult<u64> {
            self.inner.parse(raw)
        }
        fn create(&self, size: u64, root: &[u8]) -> LogResult<Vec<u8>> {
            self.creates.fetch_add(1, Ordering::SeqCst);
            self.inner.create(size, root)
        }
    }

    fn harness(
        bundle_size: usize,
        config: PoolConfig,
    ) -> (Arc<LogStore>, Arc<CountingCodec>, PoolHandle) {
        let store = Arc::new(LogStore::in_memory().unwrap());
        let codec = Arc::new(CountingCodec {
            inner: NoteSigner::new("test-log", &[7u8; 32]),
            creates: AtomicUsize::new(0),
        });
        let sequencer = Arc::new(Sequencer::new(
            store.clone(),
            codec.clone(),
            LogParams {
                entry_bundle_size: bundle_size,
            },
        ));
        sequencer.ensure_initialized().unwrap();
        // ensure_initialized spent one create; count batches from zero
        codec.creates.store(0, Ordering::SeqCst);

        let (pool, handle) = Pool::new(sequencer, config);
        tokio::spawn(pool.run());
        (store, codec, handle)
    }

    #[tokio::test]
    async fn single_add_settles_by_age() {
        let (store, _, handle) = harness(
            256,
            PoolConfig {
                batch_size: 100,
                batch_max_age: Duration::from_millis(20),
                ..Default::default()
            },
        );
        let idx = handle.add(b"hello".to_vec()).await.unwrap();
        assert_eq!(idx, 0);
        assert!(store.read_checkpoint().is_ok());
    }

    #[tokio::test]
    async fn concurrent_adds_form_one_batch() {
        let (store, codec, handle) = harness(
            256,
            PoolConfig {
                batch_size: 8,
                // generous fallback; the size trigger should fire first
                batch_max_age: Duration::from_secs(5),
                ..Default::default()
            },
        );

        let mut tasks = Vec::new();
        for i in 0..8u8 {
            let handle = handle.clone();
            tasks.push(tokio::spawn(
                async move { handle.add(vec![b'e', i]).await },
            ));
        }

        let mut indices = BTreeSet::new();
        for task in tasks {
            indices.insert(task.await.unwrap().unwrap());
        }
        assert_eq!(indices, (0..8).collect::<BTreeSet<u64>>());
        assert_eq!(codec.creates.load(Ordering::SeqCst), 1);

        let size = codec.parse(&store.read_checkpoint().unwrap()).unwrap();
        assert_eq!(size, 8);
    }

    #[tokio::test]
    async fn size_trigger_preempts_timer() {
        let (_, codec, handle) = harness(
            256,
            PoolConfig {
                batch_size: 2,
                batch_max_age: Duration::from_secs(60),
                ..Default::default()
            },
        );
        let a = handle.clone();
        let t1 = tokio::spawn(async move { a.add(b"a".to_vec()).await });
        let b = handle.clone();
        let t2 = tokio::spawn(async move { b.add(b"b".to_vec()).await });

        let mut got = vec![t1.await.unwrap().unwrap(), t2.await.unwrap().unwrap()];
        got.sort_unstable();
        assert_eq!(got, vec![0, 1]);
        assert_eq!(codec.creates.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn adaptive_target_aligns_to_bundles() {
        // bundle width 4; first flush of 2 leaves an open bundle of 2, so
        // the hint tells the pool to close the next batch at 4
        let (store, codec, handle) = harness(
            4,
            PoolConfig {
                batch_size: 2,
                batch_max_age: Duration::from_secs(60),
                ..Default::default()
            },
        );
        let a = handle.clone();
        let b = handle.clone();
        let t1 = tokio::spawn(async move { a.add(b"a".to_vec()).await });
        let t2 = tokio::spawn(async move { b.add(b"b".to_vec()).await });
        t1.await.unwrap().unwrap();
        t2.await.unwrap().unwrap();

        // hint after first batch is 4 (batch started bundle-aligned), so
        // the next batch waits for 4 entries
        let mut tasks = Vec::new();
        for i in 0..4u8 {
            let handle = handle.clone();
            tasks.push(tokio::spawn(
                async move { handle.add(vec![b'f', i]).await },
            ));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(codec.creates.load(Ordering::SeqCst), 2);
        let size = codec.parse(&store.read_checkpoint().unwrap()).unwrap();
        assert_eq!(size, 6);
    }

    #[tokio::test]
    async fn failed_batch_fans_same_error_to_all() {
        struct FailingCodec(NoteSigner);
        impl CheckpointCodec for FailingCodec {
            fn parse(&self, raw: &[u8]) -> LogResult<u64> {
                self.0.parse(raw)
            }
            fn create(&self, _: u64, _: &[u8]) -> LogResult<Vec<u8>> {
                Err(LogError::Checkpoint("signer down".into()))
            }
        }

        let store = Arc::new(LogStore::in_memory().unwrap());
        let good = NoteSigner::new("test-log", &[7u8; 32]);
        store.write_checkpoint(&good.create(0, b"Empty").unwrap()).unwrap();

        let sequencer = Arc::new(Sequencer::new(
            store.clone(),
            Arc::new(FailingCodec(NoteSigner::new("test-log", &[7u8; 32]))),
            LogParams {
                entry_bundle_size: 4,
            },
        ));
        let (pool, handle) = Pool::new(
            sequencer,
            PoolConfig {
                batch_size: 2,
                batch_max_age: Duration::from_secs(60),
                ..Default::default()
            },
        );
        tokio::spawn(pool.run());

        let a = handle.clone();
        let b = handle.clone();
        let t1 = tokio::spawn(async move { a.add(b"a".to_vec()).await });
        let t2 = tokio::spawn(async move { b.add(b"b".to_vec()).await });

        let e1 = t1.await.unwrap().unwrap_err();
        let e2 = t2.await.unwrap().unwrap_err();
        assert!(matches!(e1, LogError::Batch(_)));
        assert_eq!(e1.to_string(), e2.to_string());

        // nothing committed
        assert_eq!(
            good.parse(&store.read_checkpoint().unwrap()).unwrap(),
            0
        );
        assert!(store.get_entry_bundle(0).is_err());
    }

    #[tokio::test]
    async fn empty_entry_rejected_by_default() {
        let (_, _, handle) = harness(256, PoolConfig::default());
        let err = handle.add(Vec::new()).await.unwrap_err();
        assert!(matches!(err, LogError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn empty_entry_accepted_when_configured() {
        let (_, _, handle) = harness(
            256,
            PoolConfig {
                allow_empty_entries: true,
                batch_size: 1,
                ..Default::default()
            },
        );
        assert_eq!(handle.add(Vec::new()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn shutdown_flushes_pending_batch() {
        let store = Arc::new(LogStore::in_memory().unwrap());
        let codec = Arc::new(NoteSigner::new("test-log", &[7u8; 32]));
        let sequencer = Arc::new(Sequencer::new(
            store.clone(),
            codec.clone(),
            LogParams {
                entry_bundle_size: 4,
            },
        ));
        sequencer.ensure_initialized().unwrap();

        let (pool, handle) = Pool::new(
            sequencer,
            PoolConfig {
                batch_size: 100,
                batch_max_age: Duration::from_secs(60),
                ..Default::default()
            },
        );
        let pool_task = tokio::spawn(pool.run());

        // enqueue directly so the sender can be dropped while the request
        // is still pending
        let (responder, rx) = oneshot::channel();
        handle
            .tx
            .send(JoinRequest {
                entry: b"last".to_vec(),
                responder,
            })
            .await
            .unwrap();
        drop(handle);

        assert_eq!(rx.await.unwrap().unwrap(), 0);
        pool_task.await.unwrap();
        let codec2 = NoteSigner::new("test-log", &[7u8; 32]);
        assert_eq!(codec2.parse(&store.read_checkpoint().unwrap()).unwrap(), 1);
    }

    #[tokio::test]
    async fn add_after_shutdown_is_unavailable() {
        let (_, _, handle) = harness(256, PoolConfig::default());
        // the harness pool is alive; build a dead one
        let store = Arc::new(LogStore::in_memory().unwrap());
        let sequencer = Arc::new(Sequencer::new(
            store,
            Arc::new(NoteSigner::new("test-log", &[7u8; 32])),
            LogParams::default(),
        ));
        let (pool, dead) = Pool::new(sequencer, PoolConfig::default());
        drop(pool);
        let err = dead.add(b"x".to_vec()).await.unwrap_err();
        assert!(matches!(err, LogError::ServiceUnavailable(_)));
        drop(handle);
    }
}

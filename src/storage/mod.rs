//! SQLite-backed log store
//!
//! A single connection behind a mutex: the design assumes one writer
//! process, and readers ride the same connection in cheap deferred
//! transactions (WAL mode keeps them from blocking the writer for long).

mod schema;
mod tx;

pub use tx::LogTx;

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::Connection;

use crate::error::{LogError, LogResult, StorageError};
use crate::tile::Tile;

pub struct LogStore {
    conn: Mutex<Connection>,
}

impl LogStore {
    /// Open (or create) the database at `path` and ensure the schema
    pub fn open<P: AsRef<Path>>(path: P) -> LogResult<Self> {
        let conn = Connection::open(path).map_err(|e| {
            LogError::Storage(StorageError::ConnectionFailed(format!(
                "failed to open db: {}",
                e
            )))
        })?;
        Self::from_connection(conn)
    }

    /// In-memory database, for tests
    pub fn in_memory() -> LogResult<Self> {
        let conn = Connection::open_in_memory().map_err(|e| {
            LogError::Storage(StorageError::ConnectionFailed(format!(
                "failed to open db: {}",
                e
            )))
        })?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> LogResult<Self> {
        configure_connection(&conn)?;
        schema::create_tables(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Lock the connection; the sequencer opens its transaction on this
    pub(crate) fn lock(&self) -> LogResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| {
            LogError::Storage(StorageError::ConnectionFailed("lock poisoned".into()))
        })
    }

    /// Latest signed checkpoint bytes
    pub fn read_checkpoint(&self) -> LogResult<Vec<u8>> {
        let mut conn = self.lock()?;
        let tx = LogTx::begin_read(&mut conn)?;
        let note = tx.read_checkpoint()?;
        tx.commit()?;
        Ok(note)
    }

    /// Write a checkpoint in its own transaction (bootstrap only; the
    /// sequencer writes checkpoints inside its batch transaction)
    pub fn write_checkpoint(&self, note: &[u8]) -> LogResult<()> {
        let mut conn = self.lock()?;
        let tx = LogTx::begin(&mut conn)?;
        tx.write_checkpoint(note)?;
        tx.commit()
    }

    /// Tile at (level, index)
    pub fn get_tile(&self, level: u64, index: u64) -> LogResult<Tile> {
        let mut conn = self.lock()?;
        let tx = LogTx::begin_read(&mut conn)?;
        let tile = tx
            .get_subtree(level, index)?
            .ok_or_else(|| LogError::NotFound(format!("tile ({}, {})", level, index)))?;
        tx.commit()?;
        Ok(tile)
    }

    /// Raw bytes of entry bundle `index`
    pub fn get_entry_bundle(&self, index: u64) -> LogResult<Vec<u8>> {
        let mut conn = self.lock()?;
        let tx = LogTx::begin_read(&mut conn)?;
        let data = tx
            .get_bundle(index)?
            .ok_or_else(|| LogError::NotFound(format!("entry bundle {}", index)))?;
        tx.commit()?;
        Ok(data)
    }
}

fn configure_connection(conn: &Connection) -> LogResult<()> {
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "busy_timeout", 5000)?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    Ok(())
}

//! Transaction handle over the three log tables
//!
//! All mutation of log state flows through a [`LogTx`]. Dropping the handle
//! without calling [`LogTx::commit`] rolls the transaction back, so any
//! error path unwinds to the pre-transaction state.

use rusqlite::{params, Connection, OptionalExtension, Transaction, TransactionBehavior};

use crate::error::{LogError, LogResult};
use crate::tile::{Tile, TILE_MAX_LEAVES};

/// Row id of the single checkpoint row
const CHECKPOINT_ID: i64 = 0;

pub struct LogTx<'a> {
    tx: Transaction<'a>,
}

impl<'a> LogTx<'a> {
    /// Begin a read-write transaction; takes the SQLite write lock up front
    pub fn begin(conn: &'a mut Connection) -> LogResult<Self> {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        Ok(Self { tx })
    }

    /// Begin a read-only (deferred) transaction
    pub fn begin_read(conn: &'a mut Connection) -> LogResult<Self> {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Deferred)?;
        Ok(Self { tx })
    }

    /// Latest signed checkpoint bytes
    pub fn read_checkpoint(&self) -> LogResult<Vec<u8>> {
        self.tx
            .query_row(
                "SELECT Note FROM Checkpoint WHERE Id = ?1",
                params![CHECKPOINT_ID],
                |row| row.get(0),
            )
            .optional()?
            .ok_or_else(|| LogError::NotFound("checkpoint".into()))
    }

    /// Upsert the checkpoint row
    pub fn write_checkpoint(&self, note: &[u8]) -> LogResult<()> {
        self.tx.execute(
            "REPLACE INTO Checkpoint (Id, Note) VALUES (?1, ?2)",
            params![CHECKPOINT_ID, note],
        )?;
        Ok(())
    }

    /// Raw bytes of entry bundle `idx`, if present
    pub fn get_bundle(&self, idx: u64) -> LogResult<Option<Vec<u8>>> {
        Ok(self
            .tx
            .query_row(
                "SELECT Data FROM TiledLeaves WHERE TileIdx = ?1",
                params![idx as i64],
                |row| row.get(0),
            )
            .optional()?)
    }

    /// Upsert entry bundle `idx`
    pub fn put_bundle(&self, idx: u64, data: &[u8]) -> LogResult<()> {
        self.tx.execute(
            "REPLACE INTO TiledLeaves (TileIdx, Data) VALUES (?1, ?2)",
            params![idx as i64, data],
        )?;
        Ok(())
    }

    /// Decoded tile at (level, idx), if present
    pub fn get_subtree(&self, level: u64, idx: u64) -> LogResult<Option<Tile>> {
        let nodes: Option<Vec<u8>> = self
            .tx
            .query_row(
                "SELECT Nodes FROM Subtree WHERE Level = ?1 AND Idx = ?2",
                params![level as i64, idx as i64],
                |row| row.get(0),
            )
            .optional()?;
        match nodes {
            None => Ok(None),
            Some(raw) => Tile::from_text(&raw)
                .map(Some)
                .map_err(|e| LogError::Corruption(format!("tile ({}, {}): {}", level, idx, e))),
        }
    }

    /// Upsert the tile at (level, idx)
    pub fn put_subtree(&self, level: u64, idx: u64, tile: &Tile) -> LogResult<()> {
        let n = tile.num_leaves();
        if n == 0 || n > TILE_MAX_LEAVES {
            return Err(LogError::Corruption(format!(
                "refusing to store tile ({}, {}) with {} leaves",
                level, idx, n
            )));
        }
        self.tx.execute(
            "REPLACE INTO Subtree (Level, Idx, Nodes) VALUES (?1, ?2, ?3)",
            params![level as i64, idx as i64, tile.to_text()],
        )?;
        Ok(())
    }

    /// Commit; consumed on both success and failure
    pub fn commit(self) -> LogResult<()> {
        self.tx.commit()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::schema;

    fn conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        schema::create_tables(&conn).unwrap();
        conn
    }

    #[test]
    fn checkpoint_upsert_and_read() {
        let mut c = conn();
        let tx = LogTx::begin(&mut c).unwrap();
        assert!(matches!(
            tx.read_checkpoint(),
            Err(LogError::NotFound(_))
        ));
        tx.write_checkpoint(b"v1").unwrap();
        assert_eq!(tx.read_checkpoint().unwrap(), b"v1");
        tx.write_checkpoint(b"v2").unwrap();
        assert_eq!(tx.read_checkpoint().unwrap(), b"v2");
        tx.commit().unwrap();

        let tx = LogTx::begin_read(&mut c).unwrap();
        assert_eq!(tx.read_checkpoint().unwrap(), b"v2");
    }

    #[test]
    fn drop_rolls_back() {
        let mut c = conn();
        {
            let tx = LogTx::begin(&mut c).unwrap();
            tx.write_checkpoint(b"uncommitted").unwrap();
            tx.put_bundle(0, b"data").unwrap();
        }
        let tx = LogTx::begin_read(&mut c).unwrap();
        assert!(tx.read_checkpoint().is_err());
        assert_eq!(tx.get_bundle(0).unwrap(), None);
    }

    #[test]
    fn bundle_round_trip() {
        let mut c = conn();
        let tx = LogTx::begin(&mut c).unwrap();
        assert_eq!(tx.get_bundle(7).unwrap(), None);
        tx.put_bundle(7, b"aGk=\n").unwrap();
        assert_eq!(tx.get_bundle(7).unwrap().unwrap(), b"aGk=\n");
        tx.put_bundle(7, b"eW8=\n").unwrap();
        assert_eq!(tx.get_bundle(7).unwrap().unwrap(), b"eW8=\n");
    }

    #[test]
    fn subtree_round_trip() {
        let mut c = conn();
        let tx = LogTx::begin(&mut c).unwrap();
        assert!(tx.get_subtree(0, 0).unwrap().is_none());

        let tile = Tile::from_hashes(vec![[3u8; 32], [4u8; 32]]).unwrap();
        tx.put_subtree(0, 0, &tile).unwrap();
        assert_eq!(tx.get_subtree(0, 0).unwrap().unwrap(), tile);

        // separate coordinates are separate rows
        tx.put_subtree(1, 0, &tile).unwrap();
        assert!(tx.get_subtree(1, 1).unwrap().is_none());
    }

    #[test]
    fn empty_tile_rejected() {
        let mut c = conn();
        let tx = LogTx::begin(&mut c).unwrap();
        let empty = Tile::new();
        assert!(matches!(
            tx.put_subtree(0, 0, &empty),
            Err(LogError::Corruption(_))
        ));
    }

    #[test]
    fn corrupt_tile_row_surfaces_as_corruption() {
        let mut c = conn();
        c.execute(
            "REPLACE INTO Subtree (Level, Idx, Nodes) VALUES (0, 0, ?1)",
            params![b"not a tile".as_slice()],
        )
        .unwrap();
        let tx = LogTx::begin_read(&mut c).unwrap();
        assert!(matches!(
            tx.get_subtree(0, 0),
            Err(LogError::Corruption(_))
        ));
    }
}

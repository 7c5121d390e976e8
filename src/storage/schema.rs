use rusqlite::Connection;

use crate::error::LogResult;

/// Create all tables (idempotent)
pub fn create_tables(conn: &Connection) -> LogResult<()> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}

const SCHEMA_SQL: &str = r#"
-- Signed checkpoint; a single row with Id = 0
CREATE TABLE IF NOT EXISTS Checkpoint (
    Id   INTEGER PRIMARY KEY,
    Note BLOB NOT NULL
);

-- Entry bundles: base64 lines, one row per bundle index
CREATE TABLE IF NOT EXISTS TiledLeaves (
    TileIdx INTEGER PRIMARY KEY,
    Data    BLOB NOT NULL
);

-- Merkle tiles: hex hash lines, one row per (level, index)
CREATE TABLE IF NOT EXISTS Subtree (
    Level INTEGER NOT NULL,
    Idx   INTEGER NOT NULL,
    Nodes BLOB NOT NULL,
    PRIMARY KEY (Level, Idx)
);
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        create_tables(&conn).unwrap();
        create_tables(&conn).unwrap();

        let n: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(n, 3);
    }
}

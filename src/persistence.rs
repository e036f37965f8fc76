use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::distribution::MoveDistribution;
use crate::errors::Result;
use crate::position::Position;

/// Durable position → move distribution table.
///
/// Distributions are stored as bincode blobs keyed by the position's move
/// string. Entries are immutable once written; `save` of an existing key
/// replaces it with the same value.
pub struct DistributionStore {
    conn: Connection,
}

impl DistributionStore {
    pub fn open<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = Connection::open(db_path)?;

        // Concurrent explorers may share one file
        conn.busy_timeout(std::time::Duration::from_secs(5))?;

        let store = DistributionStore { conn };
        store.create_tables()?;
        Ok(store)
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = DistributionStore { conn };
        store.create_tables()?;
        Ok(store)
    }

    fn create_tables(&self) -> Result<()> {
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS distributions (
                position TEXT PRIMARY KEY,
                moves BLOB NOT NULL,
                created_at INTEGER NOT NULL
            )",
            [],
        )?;
        Ok(())
    }

    pub fn save(&self, position: &Position, distribution: &MoveDistribution) -> Result<()> {
        let moves = bincode::serialize(distribution)?;
        let created_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);

        self.conn.execute(
            "INSERT OR REPLACE INTO distributions (position, moves, created_at)
             VALUES (?1, ?2, ?3)",
            params![position.as_str(), moves, created_at],
        )?;
        Ok(())
    }

    pub fn load(&self, position: &Position) -> Result<Option<MoveDistribution>> {
        let blob: Option<Vec<u8>> = self
            .conn
            .query_row(
                "SELECT moves FROM distributions WHERE position = ?1",
                [position.as_str()],
                |row| row.get(0),
            )
            .optional()?;

        match blob {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Every stored entry, for warming an in-memory front.
    pub fn load_all(&self) -> Result<Vec<(Position, MoveDistribution)>> {
        let mut stmt = self
            .conn
            .prepare("SELECT position, moves FROM distributions")?;

        let rows = stmt.query_map([], |row| {
            let position: String = row.get(0)?;
            let bytes: Vec<u8> = row.get(1)?;
            let distribution: MoveDistribution = bincode::deserialize(&bytes).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Blob, e)
            })?;
            Ok((Position::new(&position), distribution))
        })?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?);
        }
        Ok(entries)
    }

    pub fn count(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM distributions", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

//! Database persistence layer for StarNotary
//!
//! The ledger sees storage as a plain key-value map from block height to the
//! block's serialized record.

use crate::error::ChainError;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

/// Abstraction for persistence backends.
pub trait BlockStore: Send + Sync {
    fn get(&self, height: u64) -> Result<Option<Vec<u8>>, ChainError>;
    fn put(&self, height: u64, record: &[u8]) -> Result<(), ChainError>;
    /// Every record, ascending by height.
    fn scan_all(&self) -> Result<Vec<(u64, Vec<u8>)>, ChainError>;

    fn count(&self) -> Result<u64, ChainError> {
        Ok(self.scan_all()?.len() as u64)
    }
}

pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn open(path: &str) -> Result<Self, ChainError> {
        let conn = Connection::open(path)
            .map_err(|e| ChainError::StorageError(format!("Failed to open database: {}", e)))?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS blocks (
                height INTEGER PRIMARY KEY,
                record BLOB NOT NULL
            )",
            [],
        )
        .map_err(|e| ChainError::StorageError(format!("Failed to create blocks table: {}", e)))?;

        Ok(Database {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, ChainError> {
        self.conn
            .lock()
            .map_err(|_| ChainError::StorageError("Mutex poisoned".to_string()))
    }
}

fn to_key(height: u64) -> Result<i64, ChainError> {
    i64::try_from(height)
        .map_err(|_| ChainError::StorageError(format!("Height {} exceeds key range", height)))
}

impl BlockStore for Database {
    fn get(&self, height: u64) -> Result<Option<Vec<u8>>, ChainError> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT record FROM blocks WHERE height = ?1",
            params![to_key(height)?],
            |row| row.get::<_, Vec<u8>>(0),
        )
        .optional()
        .map_err(|e| ChainError::StorageError(format!("Failed to load block {}: {}", height, e)))
    }

    fn put(&self, height: u64, record: &[u8]) -> Result<(), ChainError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO blocks (height, record) VALUES (?1, ?2)",
            params![to_key(height)?, record],
        )
        .map_err(|e| ChainError::StorageError(format!("Failed to save block {}: {}", height, e)))?;
        Ok(())
    }

    fn scan_all(&self) -> Result<Vec<(u64, Vec<u8>)>, ChainError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT height, record FROM blocks ORDER BY height ASC")
            .map_err(|e| ChainError::StorageError(format!("Failed to prepare query: {}", e)))?;

        let rows = stmt
            .query_map([], |row| {
                let height: i64 = row.get(0)?;
                let record: Vec<u8> = row.get(1)?;
                Ok((height as u64, record))
            })
            .map_err(|e| ChainError::StorageError(format!("Failed to query blocks: {}", e)))?;

        let mut records = Vec::new();
        for row in rows {
            records.push(
                row.map_err(|e| ChainError::StorageError(format!("Failed to read row: {}", e)))?,
            );
        }
        Ok(records)
    }

    fn count(&self) -> Result<u64, ChainError> {
        let conn = self.lock()?;
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM blocks", [], |row| row.get(0))
            .map_err(|e| ChainError::StorageError(format!("Failed to count blocks: {}", e)))?;
        Ok(count as u64)
    }
}

/// Simple in-memory persistence implementation useful for tests and ephemeral runs.
///
/// Clones share the same underlying map, so a test can keep a handle to the
/// records a ledger writes.
#[derive(Clone, Default)]
pub struct InMemoryPersistence {
    pub records: Arc<Mutex<BTreeMap<u64, Vec<u8>>>>,
}

impl InMemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<u64, Vec<u8>>>, ChainError> {
        self.records
            .lock()
            .map_err(|_| ChainError::StorageError("Mutex poisoned".to_string()))
    }

    /// Drops a record. Only used to simulate a damaged store.
    pub fn remove(&self, height: u64) -> Result<Option<Vec<u8>>, ChainError> {
        Ok(self.lock()?.remove(&height))
    }
}

impl BlockStore for InMemoryPersistence {
    fn get(&self, height: u64) -> Result<Option<Vec<u8>>, ChainError> {
        Ok(self.lock()?.get(&height).cloned())
    }

    fn put(&self, height: u64, record: &[u8]) -> Result<(), ChainError> {
        self.lock()?.insert(height, record.to_vec());
        Ok(())
    }

    fn scan_all(&self) -> Result<Vec<(u64, Vec<u8>)>, ChainError> {
        Ok(self
            .lock()?
            .iter()
            .map(|(height, record)| (*height, record.clone()))
            .collect())
    }

    fn count(&self) -> Result<u64, ChainError> {
        Ok(self.lock()?.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_database_open() {
        let db = Database::open(":memory:").unwrap();
        assert!(db.conn.lock().unwrap().is_autocommit());
        assert_eq!(db.count().unwrap(), 0);
    }

    #[test]
    fn test_database_put_get_scan() {
        let db = Database::open(":memory:").unwrap();
        db.put(1, b"second").unwrap();
        db.put(0, b"first").unwrap();

        assert_eq!(db.get(0).unwrap(), Some(b"first".to_vec()));
        assert_eq!(db.get(7).unwrap(), None);
        assert_eq!(db.count().unwrap(), 2);

        let heights: Vec<u64> = db.scan_all().unwrap().into_iter().map(|(h, _)| h).collect();
        assert_eq!(heights, vec![0, 1]);
    }

    #[test]
    fn test_database_survives_reopen() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("chain.db");
        let path = path.to_str().unwrap();

        Database::open(path).unwrap().put(0, b"genesis").unwrap();
        let reopened = Database::open(path).unwrap();
        assert_eq!(reopened.get(0).unwrap(), Some(b"genesis".to_vec()));
    }

    #[test]
    fn test_in_memory_clones_share_records() {
        let store = InMemoryPersistence::new();
        let handle = store.clone();
        store.put(0, b"a").unwrap();
        assert_eq!(handle.get(0).unwrap(), Some(b"a".to_vec()));
        handle.remove(0).unwrap();
        assert_eq!(store.count().unwrap(), 0);
    }
}

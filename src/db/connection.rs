use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::db::schema;
use crate::db::store::KeyValueStore;
use crate::error::StorageError;

/// SQLite file (or in-memory database) holding the journal's key-value store.
pub struct Database {
    pub conn: Mutex<Connection>,
    quota_bytes: Option<u64>,
}

impl Database {
    pub fn new(db_path: impl AsRef<Path>) -> rusqlite::Result<Self> {
        let db_path = db_path.as_ref();
        let conn = Connection::open(db_path)?;

        conn.pragma_update(None, "journal_mode", "WAL")?;

        Self::migrate(&conn, Some(db_path))?;

        Ok(Database {
            conn: Mutex::new(conn),
            quota_bytes: None,
        })
    }

    pub fn open_in_memory() -> rusqlite::Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::migrate(&conn, None)?;

        Ok(Database {
            conn: Mutex::new(conn),
            quota_bytes: None,
        })
    }

    /// Cap the total bytes (keys plus values) the store may hold.
    pub fn with_quota(mut self, bytes: u64) -> Self {
        self.quota_bytes = Some(bytes);
        self
    }

    fn migrate(conn: &Connection, db_path: Option<&Path>) -> rusqlite::Result<()> {
        let applied = schema::migrate(conn, db_path)?;
        schema::verify(conn)?;
        log::info!(
            "Schema at version {:?} ({} migration(s) applied)",
            schema::schema_version(conn)?,
            applied
        );
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StorageError> {
        self.conn.lock().map_err(|_| StorageError::Poisoned)
    }

    fn check_quota(&self, conn: &Connection, key: &str, value: &str) -> Result<(), StorageError> {
        let Some(limit) = self.quota_bytes else {
            return Ok(());
        };

        let others: i64 = conn.query_row(
            "SELECT COALESCE(SUM(LENGTH(CAST(key AS BLOB)) + LENGTH(CAST(value AS BLOB))), 0)
             FROM kv_store WHERE key <> ?1",
            params![key],
            |row| row.get(0),
        )?;

        let needed = others.max(0) as u64 + key.len() as u64 + value.len() as u64;
        if needed > limit {
            log::warn!(
                "Write to '{}' rejected: {} bytes needed, quota is {}",
                key,
                needed,
                limit
            );
            return Err(StorageError::QuotaExceeded {
                key: key.to_string(),
                needed,
                limit,
            });
        }

        Ok(())
    }
}

impl KeyValueStore for Database {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let conn = self.lock()?;
        let value = conn
            .query_row(
                "SELECT value FROM kv_store WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let conn = self.lock()?;
        self.check_quota(&conn, key, value)?;

        conn.execute(
            "INSERT INTO kv_store (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, value, unix_millis()],
        )?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let conn = self.lock()?;
        conn.execute("DELETE FROM kv_store WHERE key = ?1", params![key])?;
        Ok(())
    }

    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT key FROM kv_store WHERE substr(key, 1, length(?1)) = ?1 ORDER BY key",
        )?;
        let keys = stmt
            .query_map(params![prefix], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(keys)
    }
}

fn unix_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_get_remove() {
        let db = Database::open_in_memory().unwrap();
        assert_eq!(db.get("trades").unwrap(), None);

        db.set("trades", "[]").unwrap();
        assert_eq!(db.get("trades").unwrap().as_deref(), Some("[]"));

        db.set("trades", "[1]").unwrap();
        assert_eq!(db.get("trades").unwrap().as_deref(), Some("[1]"));

        db.remove("trades").unwrap();
        assert_eq!(db.get("trades").unwrap(), None);
    }

    #[test]
    fn test_keys_with_prefix_is_literal() {
        let db = Database::open_in_memory().unwrap();
        db.set("yen_profit_loss_B", "{}").unwrap();
        db.set("yen_profit_loss_A", "{}").unwrap();
        db.set("yen_profit_lossX", "{}").unwrap();
        db.set("trades", "[]").unwrap();

        let keys = db.keys_with_prefix("yen_profit_loss_").unwrap();
        assert_eq!(keys, vec!["yen_profit_loss_A", "yen_profit_loss_B"]);
    }

    #[test]
    fn test_quota_rejects_oversized_write() {
        let db = Database::open_in_memory().unwrap().with_quota(32);
        db.set("a", "0123456789").unwrap();

        let err = db.set("b", &"x".repeat(40)).unwrap_err();
        assert!(err.is_quota_exceeded());
        assert_eq!(db.get("b").unwrap(), None);

        // Replacing an existing key only counts its new size
        db.set("a", "01234567890123456789").unwrap();
    }

    #[test]
    fn test_file_database_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trading_journal.db");

        {
            let db = Database::new(&path).unwrap();
            db.set("settings", r#"{"currency":"JPY"}"#).unwrap();
        }

        let db = Database::new(&path).unwrap();
        assert_eq!(
            db.get("settings").unwrap().as_deref(),
            Some(r#"{"currency":"JPY"}"#)
        );
    }
}

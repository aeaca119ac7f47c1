//! Versioned schema for the journal database.
//!
//! Each migration runs in its own transaction and is recorded in
//! `schema_migrations` with the sha256 of its SQL, so an edited migration is
//! caught the next time the database is opened.

use rusqlite::{params, Connection, DatabaseName, Result};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

const KEEP_BACKUPS: usize = 5;
const BACKUP_PREFIX: &str = "pre_migration_";

pub struct Migration {
    pub version: u32,
    pub name: &'static str,
    sql: &'static str,
}

pub static MIGRATIONS: &[Migration] = &[
    Migration {
        version: 0,
        name: "bootstrap",
        sql: include_str!("migrations/000_bootstrap.sql"),
    },
    Migration {
        version: 1,
        name: "key_value_store",
        sql: include_str!("migrations/001_key_value_store.sql"),
    },
];

impl Migration {
    pub fn checksum(&self) -> String {
        format!("{:x}", Sha256::digest(self.sql.as_bytes()))
    }

    fn apply(&self, conn: &Connection) -> Result<()> {
        let tx = conn.unchecked_transaction()?;
        tx.execute_batch(self.sql)?;
        tx.execute(
            "INSERT OR REPLACE INTO schema_migrations (version, name, applied_at, checksum)
             VALUES (?1, ?2, ?3, ?4)",
            params![self.version, self.name, unix_seconds(), self.checksum()],
        )?;
        tx.commit()?;

        log::info!("Applied migration {} ({})", self.version, self.name);
        Ok(())
    }
}

/// Highest applied version. `None` for a database that was never migrated.
pub fn schema_version(conn: &Connection) -> Result<Option<u32>> {
    let tracked: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'schema_migrations')",
        [],
        |row| row.get(0),
    )?;
    if !tracked {
        return Ok(None);
    }
    conn.query_row("SELECT MAX(version) FROM schema_migrations", [], |row| row.get(0))
}

/// Apply every migration newer than the recorded version and return how many
/// ran. A file database that already holds journal data is copied to
/// `backups/` beside it first.
pub fn migrate(conn: &Connection, db_path: Option<&Path>) -> Result<usize> {
    let current = schema_version(conn)?;
    let pending: Vec<&Migration> = MIGRATIONS
        .iter()
        .filter(|m| current.is_none_or(|v| m.version > v))
        .collect();

    let Some(target) = pending.last() else {
        return Ok(0);
    };
    log::info!(
        "Migrating schema from {:?} to {} ({} pending)",
        current,
        target.version,
        pending.len()
    );

    if let (Some(path), Some(version)) = (db_path, current) {
        if version >= 1 {
            backup(conn, path, target.version)?;
        }
    }

    for migration in &pending {
        migration.apply(conn).inspect_err(|e| {
            log::error!("Migration {} ({}) failed: {}", migration.version, migration.name, e);
        })?;
    }
    Ok(pending.len())
}

/// Fail when an applied migration's SQL no longer matches its checksum.
pub fn verify(conn: &Connection) -> Result<()> {
    let mut stmt =
        conn.prepare("SELECT version, checksum FROM schema_migrations WHERE checksum IS NOT NULL")?;
    let recorded = stmt.query_map([], |row| Ok((row.get::<_, u32>(0)?, row.get::<_, String>(1)?)))?;

    for row in recorded {
        let (version, checksum) = row?;
        let Some(migration) = MIGRATIONS.iter().find(|m| m.version == version) else {
            continue;
        };
        if migration.checksum() != checksum {
            log::error!(
                "Migration {} ({}) changed after it was applied",
                version,
                migration.name
            );
            return Err(rusqlite::Error::InvalidQuery);
        }
    }
    Ok(())
}

fn backup(conn: &Connection, db_path: &Path, target_version: u32) -> Result<PathBuf> {
    let dir = db_path
        .parent()
        .ok_or_else(|| rusqlite::Error::InvalidPath(db_path.to_path_buf()))?
        .join("backups");
    fs::create_dir_all(&dir).map_err(|e| backup_failure(format!("cannot create {}: {}", dir.display(), e)))?;

    let path = dir.join(format!(
        "{}v{}_{}.db",
        BACKUP_PREFIX,
        target_version,
        unix_seconds()
    ));
    conn.backup(DatabaseName::Main, &path, None)?;

    let integrity: String =
        Connection::open(&path)?.pragma_query_value(None, "integrity_check", |row| row.get(0))?;
    if integrity != "ok" {
        return Err(backup_failure(format!(
            "backup {} failed its integrity check: {}",
            path.display(),
            integrity
        )));
    }

    log::info!("Backed up database to {}", path.display());
    prune_backups(&dir);
    Ok(path)
}

/// Keep the newest [`KEEP_BACKUPS`] backups.
fn prune_backups(dir: &Path) {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            log::warn!("Cannot list backups in {}: {}", dir.display(), e);
            return;
        }
    };

    let mut backups: Vec<(SystemTime, PathBuf)> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.starts_with(BACKUP_PREFIX) && name.ends_with(".db"))
        })
        .map(|path| {
            let modified = fs::metadata(&path)
                .and_then(|m| m.modified())
                .unwrap_or(UNIX_EPOCH);
            (modified, path)
        })
        .collect();
    backups.sort();

    let excess = backups.len().saturating_sub(KEEP_BACKUPS);
    for (_, path) in backups.into_iter().take(excess) {
        if let Err(e) = fs::remove_file(&path) {
            log::warn!("Cannot delete old backup {}: {}", path.display(), e);
        }
    }
}

fn backup_failure(message: String) -> rusqlite::Error {
    log::error!("{}", message);
    rusqlite::Error::SqliteFailure(rusqlite::ffi::Error::new(1), Some(message))
}

fn unix_seconds() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Opening parameters and tunables for a journal session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JournalConfig {
    /// SQLite file holding the key-value store. `None` opens an in-memory database.
    pub db_path: Option<PathBuf>,
    /// Upper bound on the total bytes held by the key-value store.
    pub storage_quota_bytes: Option<u64>,
    /// Yen figures beyond this magnitude are logged as suspicious (not rejected).
    pub yen_warning_threshold: f64,
    /// Lot difference under which an exit counts as closing the whole position.
    pub full_exit_tolerance: f64,
    /// First month of the tax year; earlier months belong to the previous year.
    pub fiscal_year_start_month: u32,
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            storage_quota_bytes: None,
            yen_warning_threshold: 100_000_000.0,
            full_exit_tolerance: 0.01,
            fiscal_year_start_month: 4,
        }
    }
}

impl JournalConfig {
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Config rooted in an application data directory, mirroring the desktop
    /// layout (`<dir>/trading_journal.db`, backups next to it).
    pub fn in_dir(app_dir: impl Into<PathBuf>) -> Self {
        Self {
            db_path: Some(app_dir.into().join("trading_journal.db")),
            ..Self::default()
        }
    }

    pub fn with_quota(mut self, bytes: u64) -> Self {
        self.storage_quota_bytes = Some(bytes);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = JournalConfig::default();
        assert!(config.db_path.is_none());
        assert_eq!(config.fiscal_year_start_month, 4);
        assert_eq!(config.full_exit_tolerance, 0.01);
    }

    #[test]
    fn test_partial_json_falls_back_to_defaults() {
        let config: JournalConfig =
            serde_json::from_str(r#"{"storage_quota_bytes": 5242880}"#).unwrap();
        assert_eq!(config.storage_quota_bytes, Some(5_242_880));
        assert_eq!(config.yen_warning_threshold, 100_000_000.0);
    }

    #[test]
    fn test_in_dir_places_database_file() {
        let config = JournalConfig::in_dir("/tmp/journal");
        assert_eq!(
            config.db_path.unwrap(),
            PathBuf::from("/tmp/journal/trading_journal.db")
        );
    }
}

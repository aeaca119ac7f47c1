use thiserror::Error;

/// Failures at the point of storage access.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StorageError {
    #[error("Storage quota exceeded while writing '{key}' ({needed} bytes needed, limit {limit})")]
    QuotaExceeded { key: String, needed: u64, limit: u64 },

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Storage lock poisoned")]
    Poisoned,
}

impl StorageError {
    pub fn is_quota_exceeded(&self) -> bool {
        matches!(self, StorageError::QuotaExceeded { .. })
    }
}

impl From<rusqlite::Error> for StorageError {
    fn from(err: rusqlite::Error) -> Self {
        if let rusqlite::Error::SqliteFailure(ffi_err, _) = &err {
            if ffi_err.code == rusqlite::ErrorCode::DiskFull {
                return StorageError::QuotaExceeded {
                    key: String::new(),
                    needed: 0,
                    limit: 0,
                };
            }
        }
        StorageError::Database(err.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

/// Domain errors raised by the journal managers.
///
/// Expected "not found" conditions on the stores are not errors; they come
/// back as `None` / `false`.
#[derive(Error, Debug)]
pub enum JournalError {
    #[error("Invalid trade id: {0:?}")]
    InvalidTradeId(String),

    #[error("Invalid yen profit/loss data: {message}")]
    InvalidYenData {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Trade not found: {0}")]
    TradeNotFound(String),

    #[error("Validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),

    #[error("Total exit lot {} exceeds the entry lot ({lot_size} lot)", .existing + .requested)]
    LotLimitExceeded {
        lot_size: f64,
        existing: f64,
        requested: f64,
    },

    #[error("No exit entries were supplied")]
    NoExitEntries,

    #[error("Withdrawal of {amount} exceeds the balance of {balance} on {date}")]
    InsufficientBalance {
        amount: f64,
        balance: f64,
        date: chrono::NaiveDate,
    },

    #[error("Amount must be a positive number: {0}")]
    InvalidAmount(f64),

    #[error("Unknown expense category: {0}")]
    UnknownCategory(String),

    #[error("Period {0} is already closed")]
    PeriodAlreadyClosed(String),

    #[error("Period {period} cannot be closed, unclosed months: {unclosed:?}")]
    PeriodNotReady { period: String, unclosed: Vec<u32> },

    #[error("Invalid period: {0}")]
    InvalidPeriod(String),

    #[error("Invalid import data: {0}")]
    InvalidImport(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl JournalError {
    pub fn invalid_yen(message: impl Into<String>) -> Self {
        JournalError::InvalidYenData {
            message: message.into(),
            source: None,
        }
    }

    /// True when the failure came from the storage quota, so callers can
    /// suggest cleaning up old records.
    pub fn is_quota_exceeded(&self) -> bool {
        matches!(self, JournalError::Storage(e) if e.is_quota_exceeded())
    }
}

impl From<serde_json::Error> for JournalError {
    fn from(err: serde_json::Error) -> Self {
        JournalError::Storage(err.into())
    }
}

pub type JournalResult<T> = Result<T, JournalError>;

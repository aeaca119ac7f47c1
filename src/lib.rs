//! Core of an FX trading journal: trade lifecycle with partial exits, yen
//! profit/loss records, tax-oriented period summaries and the capital,
//! expense and closing ledgers, persisted in a SQLite key-value store.

pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod journal;
pub mod ledger;
pub mod models;
pub mod stats;
pub mod sync;
pub mod trades;
pub mod yen;

pub use config::JournalConfig;
pub use error::{JournalError, JournalResult, StorageError};
pub use events::{EventBus, JournalEvent, Subscription, TradeChange};
pub use journal::{ImportSummary, Journal, JournalBackup};

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::StorageError;

pub const TRADES_KEY: &str = "trades";
pub const CAPITAL_RECORDS_KEY: &str = "depositWithdrawals";
pub const EXPENSES_KEY: &str = "tc_expenses";
pub const CLOSED_PERIODS_KEY: &str = "tc_closed_periods";
pub const SETTINGS_KEY: &str = "settings";
pub const YEN_PROFIT_LOSS_PREFIX: &str = "yen_profit_loss_";

/// Opaque string key-value backend the managers persist through.
///
/// Every write is a whole-value replace; there is no partial update.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;

    fn remove(&self, key: &str) -> Result<(), StorageError>;

    /// Keys starting with `prefix`, in ascending order.
    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StorageError>;
}

/// Serialize `value` as JSON and write it under `key`.
pub fn save_json<T: Serialize + ?Sized>(
    store: &dyn KeyValueStore,
    key: &str,
    value: &T,
) -> Result<(), StorageError> {
    let json = serde_json::to_string(value)?;
    store.set(key, &json)
}

/// Load a JSON array stored under `key` as raw values.
///
/// A missing key, an unreadable backend or corrupt JSON all yield an empty
/// collection; the failure is logged.
pub fn load_raw_array(store: &dyn KeyValueStore, key: &str) -> Vec<serde_json::Value> {
    let raw = match store.get(key) {
        Ok(Some(raw)) => raw,
        Ok(None) => return Vec::new(),
        Err(e) => {
            log::warn!("Failed to read '{}' from storage, starting empty: {}", key, e);
            return Vec::new();
        }
    };

    match serde_json::from_str::<serde_json::Value>(&raw) {
        Ok(serde_json::Value::Array(items)) => items,
        Ok(other) => {
            log::warn!(
                "Stored '{}' is not an array (found {}), starting empty",
                key,
                json_kind(&other)
            );
            Vec::new()
        }
        Err(e) => {
            log::warn!("Corrupt JSON under '{}', starting empty: {}", key, e);
            Vec::new()
        }
    }
}

/// Load a JSON array of records, skipping individual records that do not
/// deserialize.
pub fn load_records<T: DeserializeOwned>(store: &dyn KeyValueStore, key: &str) -> Vec<T> {
    load_raw_array(store, key)
        .into_iter()
        .enumerate()
        .filter_map(|(index, item)| match serde_json::from_value::<T>(item) {
            Ok(record) => Some(record),
            Err(e) => {
                log::warn!("Skipping unreadable record #{} under '{}': {}", index, key, e);
                None
            }
        })
        .collect()
}

pub(crate) fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Row {
        id: String,
        amount: f64,
    }

    #[test]
    fn test_missing_key_loads_empty() {
        let db = Database::open_in_memory().unwrap();
        assert!(load_raw_array(&db, "nothing").is_empty());
    }

    #[test]
    fn test_corrupt_json_degrades_to_empty() {
        let db = Database::open_in_memory().unwrap();
        db.set(TRADES_KEY, "{not json").unwrap();
        assert!(load_raw_array(&db, TRADES_KEY).is_empty());

        db.set(TRADES_KEY, r#"{"id": "x"}"#).unwrap();
        assert!(load_raw_array(&db, TRADES_KEY).is_empty());
    }

    #[test]
    fn test_load_records_skips_bad_rows() {
        let db = Database::open_in_memory().unwrap();
        db.set(
            EXPENSES_KEY,
            r#"[{"id": "a", "amount": 10.0}, {"id": 5}, {"id": "c", "amount": 2.5}]"#,
        )
        .unwrap();

        let rows: Vec<Row> = load_records(&db, EXPENSES_KEY);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].id, "c");
    }

    #[test]
    fn test_save_json_round_trips_through_store() {
        let db = Database::open_in_memory().unwrap();
        let rows = vec![Row { id: "a".into(), amount: 1.0 }];
        save_json(&db, EXPENSES_KEY, &rows).unwrap();

        let loaded: Vec<Row> = load_records(&db, EXPENSES_KEY);
        assert_eq!(loaded, rows);
    }
}

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

use crate::db::store::{load_raw_array, save_json, KeyValueStore, TRADES_KEY};
use crate::error::{JournalError, JournalResult};
use crate::events::{EventBus, JournalEvent, Subscription, TradeChange};
use crate::models::Trade;
use crate::sync::{CloudSync, DataKind};
use crate::trades::exit::LOT_EPSILON;
use crate::trades::normalize::{merge_changes, normalize_stored, normalize_trade};

/// A record a batch operation could not take, with its position in the batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordError {
    pub index: usize,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct BulkAddOutcome {
    pub added: Vec<Trade>,
    pub failed: Vec<RecordError>,
}

pub fn generate_trade_id() -> String {
    format!(
        "TRADE-{}-{}",
        Utc::now().timestamp_millis(),
        Uuid::new_v4().simple()
    )
}

/// Owner of the trade collection. Every mutation goes through here, is
/// persisted as a whole-collection write, then announced on the event bus.
pub struct TradeStore {
    trades: Vec<Trade>,
    backend: Arc<dyn KeyValueStore>,
    events: Arc<EventBus>,
    sync: Option<CloudSync>,
}

impl TradeStore {
    /// Load the stored collection. Corrupt data starts an empty journal.
    pub fn load(backend: Arc<dyn KeyValueStore>, events: Arc<EventBus>) -> Self {
        let trades: Vec<Trade> = load_raw_array(backend.as_ref(), TRADES_KEY)
            .iter()
            .enumerate()
            .filter_map(|(index, raw)| {
                if !raw.is_object() {
                    log::warn!("Skipping stored trade #{}: not an object", index);
                    return None;
                }
                let mut trade = normalize_stored(raw);
                if trade.id.trim().is_empty() {
                    trade.id = generate_trade_id();
                    log::warn!("Stored trade #{} had no id, assigned {}", index, trade.id);
                }
                Some(trade)
            })
            .collect();

        log::info!("Loaded {} trades", trades.len());

        Self {
            trades,
            backend,
            events,
            sync: None,
        }
    }

    pub fn with_sync(mut self, sync: CloudSync) -> Self {
        self.sync = Some(sync);
        self
    }

    /// Snapshot copy of every trade in insertion order.
    pub fn get_all(&self) -> Vec<Trade> {
        self.trades.clone()
    }

    pub fn trades(&self) -> &[Trade] {
        &self.trades
    }

    pub fn len(&self) -> usize {
        self.trades.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trades.is_empty()
    }

    pub fn get_by_id(&self, id: &str) -> Option<&Trade> {
        self.trades.iter().find(|t| t.id == id)
    }

    pub fn add(&mut self, input: &Value) -> JournalResult<Trade> {
        let trade = self.prepare_new(input)?;

        self.trades.push(trade.clone());
        if let Err(e) = self.persist() {
            self.trades.pop();
            return Err(e);
        }

        log::debug!("Added trade {}", trade.id);
        self.push_save(&trade);
        self.events
            .emit(&JournalEvent::Trade(TradeChange::Added(trade.clone())));
        Ok(trade)
    }

    /// Add many trades with a single write and a single notification.
    /// Records that cannot be taken are reported, not fatal.
    pub fn bulk_add(&mut self, inputs: &[Value]) -> JournalResult<BulkAddOutcome> {
        let mut outcome = BulkAddOutcome::default();

        for (index, input) in inputs.iter().enumerate() {
            match self.prepare_new(input) {
                Ok(trade) => {
                    self.trades.push(trade.clone());
                    outcome.added.push(trade);
                }
                Err(e) => outcome.failed.push(RecordError {
                    index,
                    message: e.to_string(),
                }),
            }
        }

        if outcome.added.is_empty() {
            return Ok(outcome);
        }

        if let Err(e) = self.persist() {
            let keep = self.trades.len() - outcome.added.len();
            self.trades.truncate(keep);
            return Err(e);
        }

        log::info!(
            "Bulk added {} trades ({} rejected)",
            outcome.added.len(),
            outcome.failed.len()
        );
        for trade in &outcome.added {
            self.push_save(trade);
        }
        self.events.emit(&JournalEvent::Trade(TradeChange::BulkAdded(
            outcome.added.clone(),
        )));
        Ok(outcome)
    }

    /// Merge `changes` onto the trade and re-normalize it. `Ok(None)` when
    /// no trade has this id. An update whose exits would total more than
    /// its lot size is rejected and leaves the trade untouched.
    pub fn update(&mut self, id: &str, changes: &Value) -> JournalResult<Option<Trade>> {
        validate_id(id)?;
        let Some(index) = self.trades.iter().position(|t| t.id == id) else {
            return Ok(None);
        };

        let previous = self.trades[index].clone();
        let mut updated = normalize_trade(&merge_changes(&previous, changes));
        // Identity and creation time never change through an update
        updated.id = previous.id.clone();
        updated.created_at = previous.created_at;

        let exited = updated.exited_lot();
        if exited > updated.lot_size + LOT_EPSILON {
            log::debug!(
                "Rejected update of {}: exits total {} over {} lot",
                id,
                exited,
                updated.lot_size
            );
            return Err(JournalError::LotLimitExceeded {
                lot_size: updated.lot_size,
                existing: exited,
                requested: 0.0,
            });
        }

        self.trades[index] = updated.clone();
        if let Err(e) = self.persist() {
            self.trades[index] = previous;
            return Err(e);
        }

        self.push_save(&updated);
        self.events
            .emit(&JournalEvent::Trade(TradeChange::Updated(updated.clone())));
        Ok(Some(updated))
    }

    /// Hard delete. `Ok(false)` when no trade has this id.
    pub fn delete(&mut self, id: &str) -> JournalResult<bool> {
        validate_id(id)?;
        let Some(index) = self.trades.iter().position(|t| t.id == id) else {
            return Ok(false);
        };

        let removed = self.trades.remove(index);
        if let Err(e) = self.persist() {
            self.trades.insert(index, removed);
            return Err(e);
        }

        log::debug!("Deleted trade {}", removed.id);
        if let Some(sync) = &self.sync {
            sync.push_delete(DataKind::Trade, &removed.id);
        }
        self.events
            .emit(&JournalEvent::Trade(TradeChange::Deleted(removed)));
        Ok(true)
    }

    /// Receive `(action, change)` for every trade mutation.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&str, &TradeChange) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.events.subscribe(move |event| match event {
            JournalEvent::Trade(change) => callback(change.action(), change),
            _ => Ok(()),
        })
    }

    fn prepare_new(&self, input: &Value) -> JournalResult<Trade> {
        if !input.is_object() {
            return Err(JournalError::Validation(vec![
                "Trade record must be an object".to_string(),
            ]));
        }
        match input.get("id") {
            None | Some(Value::Null) | Some(Value::String(_)) => {}
            Some(other) => return Err(JournalError::InvalidTradeId(other.to_string())),
        }

        let mut trade = normalize_trade(input);
        if trade.id.trim().is_empty() || self.get_by_id(&trade.id).is_some() {
            trade.id = generate_trade_id();
        }
        Ok(trade)
    }

    fn persist(&self) -> JournalResult<()> {
        save_json(self.backend.as_ref(), TRADES_KEY, &self.trades).map_err(|e| {
            log::error!("Failed to persist trades: {}", e);
            JournalError::from(e)
        })
    }

    fn push_save(&self, trade: &Trade) {
        if let Some(sync) = &self.sync {
            match serde_json::to_value(trade) {
                Ok(payload) => sync.push_save(DataKind::Trade, &trade.id, payload),
                Err(e) => log::warn!("Could not serialize trade {} for sync: {}", trade.id, e),
            }
        }
    }
}

fn validate_id(id: &str) -> JournalResult<()> {
    if id.trim().is_empty() {
        return Err(JournalError::InvalidTradeId(id.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use serde_json::json;
    use std::sync::Mutex;

    fn store() -> TradeStore {
        let db = Arc::new(Database::open_in_memory().unwrap());
        TradeStore::load(db, EventBus::new())
    }

    fn sample(pair: &str) -> Value {
        json!({
            "pair": pair,
            "direction": "long",
            "entryTime": "2024-01-10T09:00",
            "entryPrice": 150.0,
            "lotSize": 1.0
        })
    }

    #[test]
    fn test_add_assigns_id_and_persists() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let mut store = TradeStore::load(db.clone(), EventBus::new());

        let trade = store.add(&sample("USD/JPY")).unwrap();
        assert!(trade.id.starts_with("TRADE-"));
        assert_eq!(store.get_by_id(&trade.id), Some(&trade));

        let reloaded = TradeStore::load(db, EventBus::new());
        assert_eq!(reloaded.len(), 1);
        assert_eq!(reloaded.get_all()[0].id, trade.id);
    }

    #[test]
    fn test_get_all_is_a_snapshot() {
        let mut store = store();
        store.add(&sample("USD/JPY")).unwrap();

        let mut snapshot = store.get_all();
        snapshot[0].pair = "EUR/USD".into();
        snapshot.clear();

        assert_eq!(store.trades()[0].pair, "USD/JPY");
    }

    #[test]
    fn test_update_and_delete_soft_fail_on_unknown_id() {
        let mut store = store();
        assert_eq!(store.update("missing", &json!({"scenario": "x"})).unwrap(), None);
        assert!(!store.delete("missing").unwrap());
        assert!(matches!(
            store.delete("  "),
            Err(JournalError::InvalidTradeId(_))
        ));
    }

    #[test]
    fn test_non_string_id_is_rejected() {
        let mut store = store();
        let err = store.add(&json!({"id": 42, "pair": "USD/JPY"})).unwrap_err();
        assert!(matches!(err, JournalError::InvalidTradeId(_)));
    }

    #[test]
    fn test_update_keeps_identity_and_creation_time() {
        let mut store = store();
        let trade = store.add(&sample("USD/JPY")).unwrap();

        let updated = store
            .update(&trade.id, &json!({"id": "other", "scenario": "breakout", "lot": 0.5}))
            .unwrap()
            .unwrap();
        assert_eq!(updated.id, trade.id);
        assert_eq!(updated.created_at, trade.created_at);
        assert_eq!(updated.scenario, "breakout");
        assert_eq!(updated.lot_size, 0.5);
        assert!(updated.updated_at >= trade.updated_at);
    }

    #[test]
    fn test_update_cannot_exit_more_than_the_lot() {
        let mut store = store();
        let trade = store
            .add(&json!({
                "pair": "USD/JPY",
                "direction": "long",
                "entryTime": "2024-01-10T09:00",
                "entryPrice": 150.0,
                "lotSize": 1.0,
                "exits": [{"time": "2024-01-10T12:00", "price": 150.5, "lot": 0.8}]
            }))
            .unwrap();

        let err = store.update(&trade.id, &json!({"lotSize": 0.2})).unwrap_err();
        assert!(matches!(err, JournalError::LotLimitExceeded { lot_size, .. } if lot_size == 0.2));

        let err = store
            .update(
                &trade.id,
                &json!({"exits": [
                    {"time": "2024-01-10T12:00", "price": 150.5, "lot": 0.8},
                    {"time": "2024-01-10T13:00", "price": 150.6, "lot": 0.5}
                ]}),
            )
            .unwrap_err();
        assert!(matches!(err, JournalError::LotLimitExceeded { .. }));

        let stored = store.get_by_id(&trade.id).unwrap();
        assert_eq!(stored.lot_size, 1.0);
        assert_eq!(stored.exits.len(), 1);

        let widened = store.update(&trade.id, &json!({"lotSize": 0.8})).unwrap().unwrap();
        assert_eq!(widened.lot_size, 0.8);
    }

    #[test]
    fn test_bulk_add_notifies_once_and_reports_failures() {
        let mut store = store();
        let actions = Arc::new(Mutex::new(Vec::new()));
        let sink = actions.clone();
        let _sub = store.subscribe(move |action, change| {
            sink.lock().unwrap().push((action.to_string(), change.trades().len()));
            Ok(())
        });

        let outcome = store
            .bulk_add(&[sample("USD/JPY"), json!("not a trade"), sample("EUR/USD")])
            .unwrap();

        assert_eq!(outcome.added.len(), 2);
        assert_eq!(outcome.failed.len(), 1);
        assert_eq!(outcome.failed[0].index, 1);
        assert_eq!(*actions.lock().unwrap(), vec![("bulk-add".to_string(), 2)]);
    }

    #[test]
    fn test_subscriber_sees_every_action() {
        let mut store = store();
        let actions = Arc::new(Mutex::new(Vec::new()));
        let sink = actions.clone();
        let _sub = store.subscribe(move |action, _| {
            sink.lock().unwrap().push(action.to_string());
            Ok(())
        });

        let trade = store.add(&sample("USD/JPY")).unwrap();
        store.update(&trade.id, &json!({"scenario": "s"})).unwrap();
        store.delete(&trade.id).unwrap();

        assert_eq!(*actions.lock().unwrap(), vec!["add", "update", "delete"]);
    }

    #[test]
    fn test_failed_persist_rolls_back_memory() {
        let db = Arc::new(Database::open_in_memory().unwrap().with_quota(64));
        let mut store = TradeStore::load(db, EventBus::new());

        let err = store.add(&sample("USD/JPY")).unwrap_err();
        assert!(err.is_quota_exceeded());
        assert!(store.is_empty());
    }

    #[test]
    fn test_corrupt_storage_starts_empty() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        db.set(TRADES_KEY, "[{broken").unwrap();
        let store = TradeStore::load(db, EventBus::new());
        assert!(store.is_empty());
    }

    #[test]
    fn test_load_keeps_stored_updated_at() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        db.set(
            TRADES_KEY,
            r#"[{"id": "T1", "pair": "USD/JPY", "updatedAt": "2023-05-01T00:00:00Z"}]"#,
        )
        .unwrap();

        let store = TradeStore::load(db, EventBus::new());
        assert_eq!(
            store.get_by_id("T1").unwrap().updated_at.to_rfc3339(),
            "2023-05-01T00:00:00+00:00"
        );
    }
}

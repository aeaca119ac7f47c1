use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::db::store::{save_json, KeyValueStore, YEN_PROFIT_LOSS_PREFIX};
use crate::error::{JournalError, JournalResult};
use crate::events::{EventBus, JournalEvent};
use crate::models::Trade;
use crate::sync::{CloudSync, DataKind};
use crate::trades::normalize::coerce_f64;

pub const EXPORT_VERSION: &str = "1.0.0";

/// Broker-reported realized figures for one trade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct YenProfitLossRecord {
    pub profit_loss: f64,
    pub swap: f64,
    /// Always zero or negative.
    pub commission: f64,
    pub net_profit: f64,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub broker: String,
}

/// Raw figures for [`YenProfitLossManager::set`]. Missing numbers count as 0.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct YenInput {
    pub profit_loss: Option<f64>,
    pub swap: Option<f64>,
    pub commission: Option<f64>,
    pub broker: Option<String>,
}

impl YenInput {
    pub fn new(profit_loss: f64, swap: f64, commission: f64) -> Self {
        Self {
            profit_loss: Some(profit_loss),
            swap: Some(swap),
            commission: Some(commission),
            broker: None,
        }
    }

    /// Read an object with `profitLoss`, `swap`, `commission` and `broker`.
    /// Numeric strings are accepted; anything else present in a numeric
    /// field is an error.
    pub fn from_value(value: &Value) -> JournalResult<Self> {
        let Value::Object(obj) = value else {
            return Err(JournalError::invalid_yen("yen data must be an object"));
        };

        let number = |key: &str| -> JournalResult<Option<f64>> {
            match obj.get(key) {
                None | Some(Value::Null) => Ok(None),
                Some(v) => coerce_f64(v)
                    .map(Some)
                    .ok_or_else(|| JournalError::invalid_yen(format!("{} must be a number", key))),
            }
        };

        Ok(Self {
            profit_loss: number("profitLoss")?,
            swap: number("swap")?,
            commission: number("commission")?,
            broker: obj
                .get("broker")
                .and_then(Value::as_str)
                .map(str::to_string),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct YenTotals {
    pub profit_loss: f64,
    pub swap: f64,
    pub commission: f64,
    pub net_profit: f64,
    /// Trades that had a record. Ids without one are not counted.
    pub count: usize,
    pub win_count: usize,
    pub loss_count: usize,
    /// Whole percent.
    pub win_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct YenExport {
    pub version: String,
    pub export_date: DateTime<Utc>,
    pub data: BTreeMap<String, YenProfitLossRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct YenImportError {
    /// `None` when the whole payload was unusable.
    pub trade_id: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct YenImportResult {
    pub success: usize,
    pub failed: usize,
    pub errors: Vec<YenImportError>,
}

/// Read-through cache over the per-trade `yen_profit_loss_<id>` records.
pub struct YenProfitLossManager {
    cache: HashMap<String, YenProfitLossRecord>,
    backend: Arc<dyn KeyValueStore>,
    events: Arc<EventBus>,
    sync: Option<CloudSync>,
    warning_threshold: f64,
}

impl YenProfitLossManager {
    /// Load every stored record into the cache. Unreadable records are
    /// skipped with a warning.
    pub fn load(
        backend: Arc<dyn KeyValueStore>,
        events: Arc<EventBus>,
        warning_threshold: f64,
    ) -> Self {
        let mut manager = Self {
            cache: HashMap::new(),
            backend,
            events,
            sync: None,
            warning_threshold,
        };

        let keys = match manager.backend.keys_with_prefix(YEN_PROFIT_LOSS_PREFIX) {
            Ok(keys) => keys,
            Err(e) => {
                log::warn!("Could not list yen profit/loss records: {}", e);
                Vec::new()
            }
        };

        for key in keys {
            let trade_id = &key[YEN_PROFIT_LOSS_PREFIX.len()..];
            if let Some(record) = manager.read_stored(trade_id) {
                manager.cache.insert(trade_id.to_string(), record);
            }
        }

        log::info!("Loaded {} yen profit/loss records", manager.cache.len());
        manager
    }

    pub fn with_sync(mut self, sync: CloudSync) -> Self {
        self.sync = Some(sync);
        self
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    /// Validate, compute the net figure and store it for `trade_id`.
    pub fn set(&mut self, trade_id: &str, input: &YenInput) -> JournalResult<YenProfitLossRecord> {
        validate_trade_id(trade_id)?;

        for (field, value) in [
            ("profitLoss", input.profit_loss),
            ("swap", input.swap),
            ("commission", input.commission),
        ] {
            match value {
                Some(v) if !v.is_finite() => {
                    return Err(JournalError::invalid_yen(format!("{} must be a number", field)));
                }
                Some(v) if v.abs() > self.warning_threshold => {
                    log::warn!("Unusually large {} for {}: {}", field, trade_id, v);
                }
                _ => {}
            }
        }

        let record = compute_record(input);
        let previous = self.cache.insert(trade_id.to_string(), record.clone());

        if let Err(e) = save_json(self.backend.as_ref(), &storage_key(trade_id), &record) {
            log::error!("Failed to save yen profit/loss for {}: {}", trade_id, e);
            match previous {
                Some(previous) => self.cache.insert(trade_id.to_string(), previous),
                None => self.cache.remove(trade_id),
            };
            return Err(e.into());
        }

        if let Some(sync) = &self.sync {
            match serde_json::to_value(&record) {
                Ok(payload) => sync.push_save(DataKind::YenProfitLoss, trade_id, payload),
                Err(e) => log::warn!("Could not serialize yen record {} for sync: {}", trade_id, e),
            }
        }

        self.events.emit(&JournalEvent::YenProfitLossUpdated {
            trade_id: trade_id.to_string(),
            record: record.clone(),
        });
        log::debug!("Set yen profit/loss for {}: net {}", trade_id, record.net_profit);
        Ok(record)
    }

    /// Put back the record `trade_id` held before a write that has to be
    /// undone. `None` removes the record.
    pub(crate) fn restore(
        &mut self,
        trade_id: &str,
        previous: Option<YenProfitLossRecord>,
    ) -> JournalResult<()> {
        let Some(record) = previous else {
            self.delete(trade_id)?;
            return Ok(());
        };

        save_json(self.backend.as_ref(), &storage_key(trade_id), &record)?;
        self.cache.insert(trade_id.to_string(), record.clone());

        if let Some(sync) = &self.sync {
            match serde_json::to_value(&record) {
                Ok(payload) => sync.push_save(DataKind::YenProfitLoss, trade_id, payload),
                Err(e) => log::warn!("Could not serialize yen record {} for sync: {}", trade_id, e),
            }
        }
        self.events.emit(&JournalEvent::YenProfitLossUpdated {
            trade_id: trade_id.to_string(),
            record,
        });
        log::debug!("Restored yen profit/loss for {}", trade_id);
        Ok(())
    }

    /// Parse loosely-typed input, then [`set`](Self::set).
    pub fn set_value(&mut self, trade_id: &str, value: &Value) -> JournalResult<YenProfitLossRecord> {
        validate_trade_id(trade_id)?;
        let input = YenInput::from_value(value)?;
        self.set(trade_id, &input)
    }

    /// Cache first, then the backing store. `None` when there is no record.
    pub fn get(&mut self, trade_id: &str) -> Option<YenProfitLossRecord> {
        if trade_id.trim().is_empty() {
            return None;
        }
        if let Some(record) = self.cache.get(trade_id) {
            return Some(record.clone());
        }

        let record = self.read_stored(trade_id)?;
        self.cache.insert(trade_id.to_string(), record.clone());
        Some(record)
    }

    /// Remove the record; `Ok(false)` when there was none.
    pub fn delete(&mut self, trade_id: &str) -> JournalResult<bool> {
        validate_trade_id(trade_id)?;

        let key = storage_key(trade_id);
        let existed = self.cache.remove(trade_id).is_some() || self.backend.get(&key)?.is_some();
        self.backend.remove(&key)?;

        if existed {
            if let Some(sync) = &self.sync {
                sync.push_delete(DataKind::YenProfitLoss, trade_id);
            }
            self.events.emit(&JournalEvent::YenProfitLossDeleted {
                trade_id: trade_id.to_string(),
            });
        }
        Ok(existed)
    }

    /// Sum the records of `trade_ids`, skipping ids that have none.
    pub fn total<S: AsRef<str>>(&mut self, trade_ids: &[S]) -> YenTotals {
        let mut totals = YenTotals::default();

        for trade_id in trade_ids {
            let Some(record) = self.get(trade_id.as_ref()) else {
                continue;
            };
            totals.profit_loss += record.profit_loss;
            totals.swap += record.swap;
            totals.commission += record.commission;
            totals.net_profit += record.net_profit;
            totals.count += 1;
            if record.net_profit > 0.0 {
                totals.win_count += 1;
            } else if record.net_profit < 0.0 {
                totals.loss_count += 1;
            }
        }

        if totals.count > 0 {
            totals.win_rate = (totals.win_count as f64 / totals.count as f64 * 100.0).round();
        }
        totals
    }

    /// [`total`](Self::total) over the trades dated within `[start, end]`.
    pub fn period_total(&mut self, start: NaiveDate, end: NaiveDate, trades: &[Trade]) -> YenTotals {
        let ids: Vec<&str> = trades
            .iter()
            .filter(|t| t.trade_date().is_some_and(|d| d >= start && d <= end))
            .map(|t| t.id.as_str())
            .collect();
        self.total(ids.as_slice())
    }

    pub fn export_all(&self) -> YenExport {
        YenExport {
            version: EXPORT_VERSION.to_string(),
            export_date: Utc::now(),
            data: self
                .cache
                .iter()
                .map(|(id, record)| (id.clone(), record.clone()))
                .collect(),
        }
    }

    /// Restore records from an [`export_all`](Self::export_all) payload,
    /// continuing past records that fail.
    pub fn import_data(&mut self, payload: &Value) -> YenImportResult {
        let mut result = YenImportResult::default();

        let Some(Value::Object(data)) = payload.get("data") else {
            log::error!("Yen import payload has no data object");
            result.errors.push(YenImportError {
                trade_id: None,
                message: "import data is invalid".to_string(),
            });
            return result;
        };

        for (trade_id, record) in data {
            match self.set_value(trade_id, record) {
                Ok(_) => result.success += 1,
                Err(e) => {
                    result.failed += 1;
                    result.errors.push(YenImportError {
                        trade_id: Some(trade_id.clone()),
                        message: e.to_string(),
                    });
                }
            }
        }

        log::info!(
            "Imported {} yen profit/loss records ({} failed)",
            result.success,
            result.failed
        );
        result
    }

    fn read_stored(&self, trade_id: &str) -> Option<YenProfitLossRecord> {
        let key = storage_key(trade_id);
        let raw = match self.backend.get(&key) {
            Ok(raw) => raw?,
            Err(e) => {
                log::warn!("Failed to read {}: {}", key, e);
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(record) => Some(record),
            Err(e) => {
                log::warn!("Skipping unreadable yen record {}: {}", key, e);
                None
            }
        }
    }
}

/// Commission is a cost: a positive figure is flipped negative.
pub fn compute_record(input: &YenInput) -> YenProfitLossRecord {
    let profit_loss = input.profit_loss.unwrap_or(0.0);
    let swap = input.swap.unwrap_or(0.0);
    let commission = -input.commission.unwrap_or(0.0).abs();

    YenProfitLossRecord {
        profit_loss,
        swap,
        commission,
        net_profit: profit_loss + swap + commission,
        timestamp: Utc::now(),
        broker: input.broker.clone().unwrap_or_default(),
    }
}

fn storage_key(trade_id: &str) -> String {
    format!("{}{}", YEN_PROFIT_LOSS_PREFIX, trade_id)
}

fn validate_trade_id(trade_id: &str) -> JournalResult<()> {
    if trade_id.trim().is_empty() {
        return Err(JournalError::InvalidTradeId(trade_id.to_string()));
    }
    Ok(())
}

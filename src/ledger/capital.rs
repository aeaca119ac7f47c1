use chrono::{NaiveDate, Utc};
use std::sync::Arc;
use uuid::Uuid;

use crate::db::store::{load_records, save_json, KeyValueStore, CAPITAL_RECORDS_KEY};
use crate::error::{JournalError, JournalResult};
use crate::events::{EventBus, JournalEvent};
use crate::models::{CapitalRecord, CapitalRecordType, Trade};
use crate::sync::{CloudSync, DataKind};

/// Deposits and withdrawals with a running balance.
///
/// Records are kept sorted by date (insertion order breaks ties) and every
/// `balance` is recomputed from scratch after each change. A change that
/// would drive the balance below zero at any date is rejected.
pub struct CapitalLedger {
    records: Vec<CapitalRecord>,
    backend: Arc<dyn KeyValueStore>,
    events: Arc<EventBus>,
    sync: Option<CloudSync>,
}

impl CapitalLedger {
    pub fn load(backend: Arc<dyn KeyValueStore>, events: Arc<EventBus>) -> Self {
        let mut records: Vec<CapitalRecord> = load_records(backend.as_ref(), CAPITAL_RECORDS_KEY);
        if let Err(e) = recompute_balances(&mut records) {
            // Keep what was stored; the next write re-checks the whole set
            log::warn!("Stored capital records are inconsistent: {}", e);
        }
        log::info!("Loaded {} capital records", records.len());

        Self {
            records,
            backend,
            events,
            sync: None,
        }
    }

    pub fn with_sync(mut self, sync: CloudSync) -> Self {
        self.sync = Some(sync);
        self
    }

    /// Date-sorted records.
    pub fn records(&self) -> &[CapitalRecord] {
        &self.records
    }

    pub fn current_balance(&self) -> f64 {
        self.records.last().map(|r| r.balance).unwrap_or(0.0)
    }

    pub fn add_record(
        &mut self,
        record_type: CapitalRecordType,
        date: NaiveDate,
        amount: f64,
        note: impl Into<String>,
    ) -> JournalResult<CapitalRecord> {
        if !amount.is_finite() || amount <= 0.0 {
            return Err(JournalError::InvalidAmount(amount));
        }

        let mut added = CapitalRecord {
            id: format!("CAP-{}-{}", Utc::now().timestamp_millis(), Uuid::new_v4().simple()),
            date,
            record_type,
            amount,
            balance: 0.0,
            note: note.into(),
            created_at: Utc::now(),
        };

        let mut trial = self.records.clone();
        trial.push(added.clone());
        recompute_balances(&mut trial)?;
        if let Some(stored) = trial.iter().find(|r| r.id == added.id) {
            added.balance = stored.balance;
        }
        self.commit(trial)?;

        log::debug!("Added {:?} of {} on {}", record_type, amount, date);
        if let Some(sync) = &self.sync {
            match serde_json::to_value(&added) {
                Ok(payload) => sync.push_save(DataKind::CapitalRecord, &added.id, payload),
                Err(e) => log::warn!("Could not serialize capital record {} for sync: {}", added.id, e),
            }
        }
        self.events.emit(&JournalEvent::CapitalRecordAdded {
            record: added.clone(),
            balance: self.current_balance(),
        });
        Ok(added)
    }

    /// `Ok(false)` when no record has this id. Removing a deposit that later
    /// withdrawals depend on fails with `InsufficientBalance`.
    pub fn delete(&mut self, id: &str) -> JournalResult<bool> {
        if !self.records.iter().any(|r| r.id == id) {
            return Ok(false);
        }

        let mut trial: Vec<CapitalRecord> =
            self.records.iter().filter(|r| r.id != id).cloned().collect();
        recompute_balances(&mut trial)?;
        self.commit(trial)?;

        if let Some(sync) = &self.sync {
            sync.push_delete(DataKind::CapitalRecord, id);
        }
        self.events.emit(&JournalEvent::CapitalRecordDeleted {
            id: id.to_string(),
            balance: self.current_balance(),
        });
        Ok(true)
    }

    /// Net yen profit of settled trades as a percentage of the current
    /// balance, 1 decimal. 0 without capital.
    pub fn profit_rate(&self, trades: &[Trade]) -> f64 {
        let balance = self.current_balance();
        if balance <= 0.0 {
            return 0.0;
        }
        let profit: f64 = trades
            .iter()
            .filter(|t| t.is_settled())
            .map(|t| t.yen_profit_loss.net_profit)
            .sum();
        (profit / balance * 1000.0).round() / 10.0
    }

    /// Replace the whole set, as a restore from backup does.
    pub(crate) fn replace_all(&mut self, mut records: Vec<CapitalRecord>) -> JournalResult<()> {
        recompute_balances(&mut records)?;
        self.commit(records)
    }

    fn commit(&mut self, records: Vec<CapitalRecord>) -> JournalResult<()> {
        save_json(self.backend.as_ref(), CAPITAL_RECORDS_KEY, &records).map_err(|e| {
            log::error!("Failed to persist capital records: {}", e);
            JournalError::from(e)
        })?;
        self.records = records;
        Ok(())
    }
}

/// Sort by date and rewrite every running balance.
fn recompute_balances(records: &mut [CapitalRecord]) -> JournalResult<()> {
    records.sort_by_key(|r| r.date);

    let mut balance = 0.0;
    for record in records.iter_mut() {
        let next = balance + record.record_type.signed(record.amount);
        if next < 0.0 {
            return Err(JournalError::InsufficientBalance {
                amount: record.amount,
                balance,
                date: record.date,
            });
        }
        balance = next;
        record.balance = balance;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::trades::normalize::normalize_trade;
    use serde_json::json;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    fn ledger() -> CapitalLedger {
        let db = Arc::new(Database::open_in_memory().unwrap());
        CapitalLedger::load(db, EventBus::new())
    }

    #[test]
    fn test_balances_follow_date_order_not_insertion_order() {
        let mut ledger = ledger();
        ledger.add_record(CapitalRecordType::Deposit, day(20), 50_000.0, "").unwrap();
        ledger.add_record(CapitalRecordType::Deposit, day(1), 100_000.0, "").unwrap();
        ledger.add_record(CapitalRecordType::Withdrawal, day(10), 30_000.0, "").unwrap();

        let balances: Vec<(NaiveDate, f64)> =
            ledger.records().iter().map(|r| (r.date, r.balance)).collect();
        assert_eq!(
            balances,
            vec![(day(1), 100_000.0), (day(10), 70_000.0), (day(20), 120_000.0)]
        );
        assert_eq!(ledger.current_balance(), 120_000.0);
    }

    #[test]
    fn test_overdrawn_withdrawal_is_rejected() {
        let mut ledger = ledger();
        ledger.add_record(CapitalRecordType::Deposit, day(10), 10_000.0, "").unwrap();

        // Dated before the deposit, so the balance at that date is 0
        let err = ledger
            .add_record(CapitalRecordType::Withdrawal, day(5), 1_000.0, "")
            .unwrap_err();
        assert!(matches!(err, JournalError::InsufficientBalance { balance, .. } if balance == 0.0));
        assert_eq!(ledger.records().len(), 1);
    }

    #[test]
    fn test_invalid_amounts() {
        let mut ledger = ledger();
        for amount in [0.0, -5.0, f64::NAN] {
            assert!(matches!(
                ledger.add_record(CapitalRecordType::Deposit, day(1), amount, ""),
                Err(JournalError::InvalidAmount(_))
            ));
        }
    }

    #[test]
    fn test_delete_recomputes_and_guards_dependents() {
        let mut ledger = ledger();
        let deposit = ledger.add_record(CapitalRecordType::Deposit, day(1), 10_000.0, "").unwrap();
        let extra = ledger.add_record(CapitalRecordType::Deposit, day(2), 5_000.0, "").unwrap();
        ledger.add_record(CapitalRecordType::Withdrawal, day(3), 8_000.0, "").unwrap();

        assert!(ledger.delete(&extra.id).unwrap());
        assert_eq!(ledger.current_balance(), 2_000.0);

        assert!(ledger.delete(&deposit.id).is_err());
        assert_eq!(ledger.records().len(), 2);
        assert!(!ledger.delete("missing").unwrap());
    }

    #[test]
    fn test_reload_keeps_records() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let mut ledger = CapitalLedger::load(db.clone(), EventBus::new());
        ledger.add_record(CapitalRecordType::Deposit, day(1), 1_000.0, "initial").unwrap();

        let reloaded = CapitalLedger::load(db, EventBus::new());
        assert_eq!(reloaded.records().len(), 1);
        assert_eq!(reloaded.records()[0].note, "initial");
        assert_eq!(reloaded.current_balance(), 1_000.0);
    }

    #[test]
    fn test_profit_rate() {
        let mut ledger = ledger();
        assert_eq!(ledger.profit_rate(&[]), 0.0);

        ledger.add_record(CapitalRecordType::Deposit, day(1), 1_000_000.0, "").unwrap();
        let trades = vec![
            normalize_trade(&json!({
                "entryTime": "2024-01-02T09:00",
                "closed": true,
                "yenProfitLoss": {"netProfit": 55_000.0}
            })),
            normalize_trade(&json!({
                "entryTime": "2024-01-03T09:00",
                "yenProfitLoss": {"netProfit": 99_999.0}
            })),
        ];
        assert_eq!(ledger.profit_rate(&trades), 5.5);
    }
}

//! One journal session: every service constructed once over a shared
//! database and event bus.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use crate::config::JournalConfig;
use crate::db::store::{save_json, KeyValueStore, SETTINGS_KEY};
use crate::db::Database;
use crate::error::{JournalError, JournalResult, StorageError};
use crate::events::{EventBus, JournalEvent, Subscription};
use crate::ledger::{CapitalLedger, ClosingLedger, ExpenseLedger};
use crate::models::{
    CapitalRecord, ClosedPeriod, Expense, RiskStatus, Settings, Trade, UpdateSettingsInput,
    YenProfitLoss,
};
use crate::stats::{AnalyticsEngine, AnalyticsReport, PeriodSummary, SummaryEngine, SummaryScope, Trend};
use crate::sync::CloudSync;
use crate::trades::validator::validate_trade;
use crate::trades::{record_exits, ExitOutcome, ExitSubmission, TradeStore};
use crate::yen::{YenInput, YenProfitLossManager, YenProfitLossRecord, YenTotals};

pub const BACKUP_VERSION: &str = "1.0.0";

/// Full backup written by [`Journal::export_all`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JournalBackup {
    pub version: String,
    pub export_date: DateTime<Utc>,
    pub trades: Vec<Trade>,
    pub capital_records: Vec<CapitalRecord>,
    pub expenses: Vec<Expense>,
    pub closed_periods: Vec<ClosedPeriod>,
    pub settings: Settings,
    pub yen_profit_loss: BTreeMap<String, YenProfitLossRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportError {
    pub section: String,
    /// Record id or position within its section.
    pub record: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportSummary {
    pub imported: usize,
    pub failed: usize,
    pub settings_restored: bool,
    pub errors: Vec<ImportError>,
}

impl ImportSummary {
    fn fail(&mut self, section: &str, record: Option<String>, message: impl Into<String>) {
        self.failed += 1;
        self.errors.push(ImportError {
            section: section.to_string(),
            record,
            message: message.into(),
        });
    }
}

pub struct Journal {
    config: JournalConfig,
    backend: Arc<dyn KeyValueStore>,
    events: Arc<EventBus>,
    trades: TradeStore,
    yen: YenProfitLossManager,
    capital: CapitalLedger,
    expenses: ExpenseLedger,
    closing: ClosingLedger,
    summary: SummaryEngine,
    analytics: AnalyticsEngine,
    settings: Settings,
}

impl Journal {
    pub fn open(config: JournalConfig) -> JournalResult<Self> {
        Self::build(config, None)
    }

    /// Like [`open`](Self::open), mirroring every successful write to `sync`.
    pub fn open_with_sync(config: JournalConfig, sync: CloudSync) -> JournalResult<Self> {
        Self::build(config, Some(sync))
    }

    fn build(config: JournalConfig, sync: Option<CloudSync>) -> JournalResult<Self> {
        let database = match &config.db_path {
            Some(path) => {
                if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
                    std::fs::create_dir_all(dir).map_err(|e| {
                        StorageError::Database(format!("cannot create {}: {}", dir.display(), e))
                    })?;
                }
                log::info!("Opening journal database at {:?}", path);
                Database::new(path).map_err(StorageError::from)?
            }
            None => Database::open_in_memory().map_err(StorageError::from)?,
        };
        let database = match config.storage_quota_bytes {
            Some(bytes) => database.with_quota(bytes),
            None => database,
        };

        let backend: Arc<dyn KeyValueStore> = Arc::new(database);
        let events = EventBus::new();

        let mut trades = TradeStore::load(backend.clone(), events.clone());
        let mut yen =
            YenProfitLossManager::load(backend.clone(), events.clone(), config.yen_warning_threshold);
        let mut capital = CapitalLedger::load(backend.clone(), events.clone());
        let mut expenses =
            ExpenseLedger::load(backend.clone(), events.clone(), config.fiscal_year_start_month);

        if let Some(sync) = sync {
            trades = trades.with_sync(sync.clone());
            yen = yen.with_sync(sync.clone());
            capital = capital.with_sync(sync.clone());
            expenses = expenses.with_sync(sync);
        }

        let settings = load_settings(backend.as_ref());

        Ok(Self {
            closing: ClosingLedger::load(backend.clone(), events.clone()),
            summary: SummaryEngine::new(events.clone()),
            analytics: AnalyticsEngine::new(events.clone()),
            config,
            backend,
            events,
            trades,
            yen,
            capital,
            expenses,
            settings,
        })
    }

    pub fn config(&self) -> &JournalConfig {
        &self.config
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&JournalEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.events.subscribe(handler)
    }

    pub fn trades(&self) -> &TradeStore {
        &self.trades
    }

    pub fn trades_mut(&mut self) -> &mut TradeStore {
        &mut self.trades
    }

    /// Read-only: yen figures are written through
    /// [`set_yen_profit_loss`](Self::set_yen_profit_loss) so the copy on the
    /// trade stays in step.
    pub fn yen(&self) -> &YenProfitLossManager {
        &self.yen
    }

    pub fn yen_profit_loss(&mut self, trade_id: &str) -> Option<YenProfitLossRecord> {
        self.yen.get(trade_id)
    }

    pub fn yen_total<S: AsRef<str>>(&mut self, trade_ids: &[S]) -> YenTotals {
        self.yen.total(trade_ids)
    }

    pub fn yen_period_total(&mut self, start: NaiveDate, end: NaiveDate) -> YenTotals {
        self.yen.period_total(start, end, self.trades.trades())
    }

    pub fn capital(&self) -> &CapitalLedger {
        &self.capital
    }

    pub fn capital_mut(&mut self) -> &mut CapitalLedger {
        &mut self.capital
    }

    pub fn expenses(&self) -> &ExpenseLedger {
        &self.expenses
    }

    pub fn expenses_mut(&mut self) -> &mut ExpenseLedger {
        &mut self.expenses
    }

    pub fn closing(&self) -> &ClosingLedger {
        &self.closing
    }

    /// Strictly validate a new trade, then add it.
    pub fn add_trade(&mut self, input: &Value) -> JournalResult<Trade> {
        validate_trade(input).into_result()?;
        self.trades.add(input)
    }

    /// Delete a trade together with its yen record.
    pub fn delete_trade(&mut self, id: &str) -> JournalResult<bool> {
        if !self.trades.delete(id)? {
            return Ok(false);
        }
        self.yen.delete(id)?;
        Ok(true)
    }

    pub fn record_exit(&mut self, trade_id: &str, submission: &ExitSubmission) -> JournalResult<ExitOutcome> {
        record_exits(
            &mut self.trades,
            trade_id,
            submission,
            self.config.full_exit_tolerance,
        )
    }

    /// Store the broker figures for a trade and copy them onto the trade,
    /// classifying its risk when an allowed loss is configured.
    pub fn set_yen_profit_loss(
        &mut self,
        trade_id: &str,
        input: &YenInput,
    ) -> JournalResult<YenProfitLossRecord> {
        if self.trades.get_by_id(trade_id).is_none() {
            return Err(JournalError::TradeNotFound(trade_id.to_string()));
        }
        let previous = self.yen.get(trade_id);
        let record = self.yen.set(trade_id, input)?;

        if let Err(e) = self.copy_yen_onto_trade(trade_id, &record) {
            log::error!("Could not copy yen figures onto {}: {}", trade_id, e);
            if let Err(restore) = self.yen.restore(trade_id, previous) {
                log::error!("Could not restore yen record for {}: {}", trade_id, restore);
            }
            return Err(e);
        }

        Ok(record)
    }

    fn copy_yen_onto_trade(&mut self, trade_id: &str, record: &YenProfitLossRecord) -> JournalResult<()> {
        let yen = YenProfitLoss {
            profit_loss: record.profit_loss,
            swap: record.swap,
            commission: record.commission,
            net_profit: record.net_profit,
        };
        let mut changes = json!({ "yenProfitLoss": serde_json::to_value(yen)? });
        if let Some(status) = self.classify_risk(record.net_profit) {
            changes["riskStatus"] = json!(status.as_str());
        }
        if !record.broker.is_empty() {
            changes["broker"] = json!(record.broker);
        }
        self.trades.update(trade_id, &changes)?;
        Ok(())
    }

    pub fn classify_risk(&self, net_profit: f64) -> Option<RiskStatus> {
        let allowed = self.settings.allowed_loss.filter(|a| *a > 0.0)?;
        if net_profit >= 0.0 {
            return Some(RiskStatus::Normal);
        }
        Some(RiskStatus::classify(net_profit, allowed))
    }

    pub fn yearly_summary(&self, year: i32) -> PeriodSummary {
        self.summary
            .yearly(self.trades.trades(), self.expenses.expenses(), year)
    }

    pub fn monthly_summary(&self, year: i32, month: u32) -> JournalResult<PeriodSummary> {
        self.summary
            .monthly(self.trades.trades(), self.expenses.expenses(), year, month)
    }

    pub fn quarterly_summary(&self, year: i32, quarter: u32) -> JournalResult<PeriodSummary> {
        self.summary
            .quarterly(self.trades.trades(), self.expenses.expenses(), year, quarter)
    }

    pub fn period_summary(&self, start: NaiveDate, end: NaiveDate) -> JournalResult<PeriodSummary> {
        self.summary
            .period(self.trades.trades(), self.expenses.expenses(), start, end)
    }

    pub fn trend(&self, year: i32) -> Trend {
        self.summary
            .trend(self.trades.trades(), self.expenses.expenses(), year)
    }

    pub fn analytics(&self, scope: SummaryScope) -> AnalyticsReport {
        self.analytics.analyze(self.trades.trades(), scope)
    }

    pub fn profit_rate(&self) -> f64 {
        self.capital.profit_rate(self.trades.trades())
    }

    pub fn close_month(&mut self, year: i32, month: u32) -> JournalResult<ClosedPeriod> {
        self.closing
            .close_month(year, month, self.trades.trades(), self.expenses.expenses())
    }

    pub fn close_quarter(&mut self, year: i32, quarter: u32) -> JournalResult<ClosedPeriod> {
        self.closing.close_quarter(year, quarter)
    }

    pub fn close_year(&mut self, year: i32) -> JournalResult<ClosedPeriod> {
        self.closing.close_year(year)
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn update_settings(&mut self, input: UpdateSettingsInput) -> JournalResult<Settings> {
        let mut settings = self.settings.clone();

        if let Some(currency) = input.currency {
            settings.currency = currency;
        }
        if let Some(lot) = input.default_lot_size {
            settings.default_lot_size = lot;
        }
        if let Some(allowed) = input.allowed_loss {
            settings.allowed_loss = Some(allowed);
        }
        if let Some(enabled) = input.sync_enabled {
            settings.sync_enabled = enabled;
        }
        settings.updated_at = Utc::now();

        self.store_settings(settings)
    }

    fn store_settings(&mut self, settings: Settings) -> JournalResult<Settings> {
        save_json(self.backend.as_ref(), SETTINGS_KEY, &settings).map_err(|e| {
            log::error!("Failed to persist settings: {}", e);
            JournalError::from(e)
        })?;
        self.settings = settings.clone();
        self.events
            .emit(&JournalEvent::SettingsUpdated(settings.clone()));
        Ok(settings)
    }

    pub fn backup(&self) -> JournalBackup {
        JournalBackup {
            version: BACKUP_VERSION.to_string(),
            export_date: Utc::now(),
            trades: self.trades.get_all(),
            capital_records: self.capital.records().to_vec(),
            expenses: self.expenses.expenses().to_vec(),
            closed_periods: self.closing.closed_periods().to_vec(),
            settings: self.settings.clone(),
            yen_profit_loss: self.yen.export_all().data,
        }
    }

    /// Pretty-printed JSON of [`backup`](Self::backup).
    pub fn export_all(&self) -> JournalResult<String> {
        let json = serde_json::to_string_pretty(&self.backup())?;
        log::info!("Exported journal backup ({} bytes)", json.len());
        Ok(json)
    }

    /// Merge a backup into this journal.
    ///
    /// Records whose id already exists are overwritten (trades, yen figures)
    /// or skipped (capital records, expenses, closed periods). Individual
    /// failures are collected and do not stop the import.
    pub fn import_all(&mut self, json: &str) -> JournalResult<ImportSummary> {
        let payload: Value = serde_json::from_str(json)
            .map_err(|e| JournalError::InvalidImport(e.to_string()))?;
        let Value::Object(sections) = &payload else {
            return Err(JournalError::InvalidImport("backup must be a JSON object".to_string()));
        };

        let mut summary = ImportSummary::default();

        if let Some(items) = section_array(sections.get("trades"), "trades", &mut summary) {
            self.import_trades(items, &mut summary);
        }
        if let Some(items) = section_array(sections.get("capitalRecords"), "capitalRecords", &mut summary) {
            self.import_capital(items, &mut summary);
        }
        if let Some(items) = section_array(sections.get("expenses"), "expenses", &mut summary) {
            self.import_expenses(items, &mut summary);
        }
        if let Some(items) = section_array(sections.get("closedPeriods"), "closedPeriods", &mut summary) {
            self.import_closed_periods(items, &mut summary);
        }

        if let Some(data) = sections.get("yenProfitLoss") {
            let result = self.yen.import_data(&json!({ "data": data }));
            summary.imported += result.success;
            for error in result.errors {
                summary.fail("yenProfitLoss", error.trade_id, error.message);
            }
        }

        if let Some(raw) = sections.get("settings") {
            match serde_json::from_value::<Settings>(raw.clone()) {
                Ok(settings) => {
                    self.store_settings(settings)?;
                    summary.settings_restored = true;
                }
                Err(e) => summary.fail("settings", None, e.to_string()),
            }
        }

        log::info!(
            "Imported backup: {} records, {} failed",
            summary.imported,
            summary.failed
        );
        Ok(summary)
    }

    fn import_trades(&mut self, items: &[Value], summary: &mut ImportSummary) {
        let mut new_trades = Vec::new();
        let mut new_positions = Vec::new();

        for (index, item) in items.iter().enumerate() {
            let existing_id = item
                .get("id")
                .and_then(Value::as_str)
                .filter(|id| self.trades.get_by_id(id).is_some())
                .map(str::to_string);

            match existing_id {
                Some(id) => match self.trades.update(&id, item) {
                    Ok(_) => summary.imported += 1,
                    Err(e) => summary.fail("trades", Some(id), e.to_string()),
                },
                None => {
                    new_trades.push(item.clone());
                    new_positions.push(index);
                }
            }
        }

        if new_trades.is_empty() {
            return;
        }
        match self.trades.bulk_add(&new_trades) {
            Ok(outcome) => {
                summary.imported += outcome.added.len();
                for failure in outcome.failed {
                    let position = new_positions.get(failure.index).copied().unwrap_or(failure.index);
                    summary.fail("trades", Some(format!("#{}", position)), failure.message);
                }
            }
            Err(e) => {
                for position in new_positions {
                    summary.fail("trades", Some(format!("#{}", position)), e.to_string());
                }
            }
        }
    }

    fn import_capital(&mut self, items: &[Value], summary: &mut ImportSummary) {
        let mut merged = self.capital.records().to_vec();
        let mut ids: HashSet<String> = merged.iter().map(|r| r.id.clone()).collect();
        let mut added = 0;

        for (index, item) in items.iter().enumerate() {
            match serde_json::from_value::<CapitalRecord>(item.clone()) {
                Ok(record) if ids.insert(record.id.clone()) => {
                    merged.push(record);
                    added += 1;
                }
                Ok(_) => {}
                Err(e) => summary.fail("capitalRecords", Some(format!("#{}", index)), e.to_string()),
            }
        }

        if added == 0 {
            return;
        }
        match self.capital.replace_all(merged) {
            Ok(()) => summary.imported += added,
            Err(e) => summary.fail("capitalRecords", None, e.to_string()),
        }
    }

    fn import_expenses(&mut self, items: &[Value], summary: &mut ImportSummary) {
        let mut merged = self.expenses.expenses().to_vec();
        let mut ids: HashSet<String> = merged.iter().map(|e| e.id.clone()).collect();
        let mut added = 0;

        for (index, item) in items.iter().enumerate() {
            match serde_json::from_value::<Expense>(item.clone()) {
                Ok(expense) if ids.insert(expense.id.clone()) => {
                    merged.push(expense);
                    added += 1;
                }
                Ok(_) => {}
                Err(e) => summary.fail("expenses", Some(format!("#{}", index)), e.to_string()),
            }
        }

        if added == 0 {
            return;
        }
        match self.expenses.replace_all(merged) {
            Ok(()) => summary.imported += added,
            Err(e) => summary.fail("expenses", None, e.to_string()),
        }
    }

    fn import_closed_periods(&mut self, items: &[Value], summary: &mut ImportSummary) {
        let mut merged = self.closing.closed_periods().to_vec();
        let mut keys: HashSet<String> = merged.iter().map(|p| p.period.clone()).collect();
        let mut added = 0;

        for (index, item) in items.iter().enumerate() {
            match serde_json::from_value::<ClosedPeriod>(item.clone()) {
                Ok(period) if keys.insert(period.period.clone()) => {
                    merged.push(period);
                    added += 1;
                }
                Ok(_) => {}
                Err(e) => summary.fail("closedPeriods", Some(format!("#{}", index)), e.to_string()),
            }
        }

        if added == 0 {
            return;
        }
        match self.closing.replace_all(merged) {
            Ok(()) => summary.imported += added,
            Err(e) => summary.fail("closedPeriods", None, e.to_string()),
        }
    }
}

fn section_array<'a>(
    value: Option<&'a Value>,
    section: &str,
    summary: &mut ImportSummary,
) -> Option<&'a [Value]> {
    match value? {
        Value::Array(items) => Some(items.as_slice()),
        Value::Null => None,
        _ => {
            summary.fail(section, None, "section is not an array");
            None
        }
    }
}

fn load_settings(backend: &dyn KeyValueStore) -> Settings {
    match backend.get(SETTINGS_KEY) {
        Ok(Some(raw)) => serde_json::from_str(&raw).unwrap_or_else(|e| {
            log::warn!("Corrupt settings, using defaults: {}", e);
            Settings::default()
        }),
        Ok(None) => Settings::default(),
        Err(e) => {
            log::warn!("Failed to read settings, using defaults: {}", e);
            Settings::default()
        }
    }
}

use chrono::Utc;
use std::sync::Arc;

use crate::db::store::{load_records, save_json, KeyValueStore, CLOSED_PERIODS_KEY};
use crate::error::{JournalError, JournalResult};
use crate::events::{EventBus, JournalEvent};
use crate::models::{
    monthly_key, quarterly_key, yearly_key, ClosedPeriod, ClosingSummary, Expense, PeriodKind,
    Trade,
};
use crate::stats::summary::{quarter_months, summarize, SummaryScope};

/// Finalized period snapshots. A period is written once and never changed.
pub struct ClosingLedger {
    periods: Vec<ClosedPeriod>,
    backend: Arc<dyn KeyValueStore>,
    events: Arc<EventBus>,
}

impl ClosingLedger {
    pub fn load(backend: Arc<dyn KeyValueStore>, events: Arc<EventBus>) -> Self {
        let periods: Vec<ClosedPeriod> = load_records(backend.as_ref(), CLOSED_PERIODS_KEY);
        log::info!("Loaded {} closed periods", periods.len());
        Self {
            periods,
            backend,
            events,
        }
    }

    pub fn closed_periods(&self) -> &[ClosedPeriod] {
        &self.periods
    }

    pub fn is_closed(&self, period: &str) -> bool {
        self.periods.iter().any(|p| p.period == period)
    }

    pub fn is_month_closed(&self, year: i32, month: u32) -> bool {
        self.is_closed(&monthly_key(year, month))
    }

    /// Snapshot a month from the settled trades and expenses dated in it.
    pub fn close_month(
        &mut self,
        year: i32,
        month: u32,
        trades: &[Trade],
        expenses: &[Expense],
    ) -> JournalResult<ClosedPeriod> {
        let scope = SummaryScope::monthly(year, month)?;
        let period = monthly_key(year, month);
        self.ensure_open(&period)?;

        let summary = summarize(scope, trades, expenses);
        self.append(ClosedPeriod {
            kind: PeriodKind::Monthly,
            period,
            year,
            month: Some(month),
            quarter: None,
            closed_at: Utc::now(),
            summary: ClosingSummary {
                trade_count: summary.trades.count,
                total_profit: summary.trades.net_profit,
                total_expenses: summary.expenses.total,
                net_income: summary.net_income,
            },
        })
    }

    /// Requires all three months to be closed; the snapshot is the sum of
    /// their snapshots.
    pub fn close_quarter(&mut self, year: i32, quarter: u32) -> JournalResult<ClosedPeriod> {
        SummaryScope::quarterly(year, quarter)?;
        let period = quarterly_key(year, quarter);
        self.ensure_open(&period)?;

        let summary = self.sum_months(&period, year, quarter_months(quarter))?;
        self.append(ClosedPeriod {
            kind: PeriodKind::Quarterly,
            period,
            year,
            month: None,
            quarter: Some(quarter),
            closed_at: Utc::now(),
            summary,
        })
    }

    /// Requires all twelve months to be closed.
    pub fn close_year(&mut self, year: i32) -> JournalResult<ClosedPeriod> {
        let period = yearly_key(year);
        self.ensure_open(&period)?;

        let summary = self.sum_months(&period, year, 1..=12)?;
        self.append(ClosedPeriod {
            kind: PeriodKind::Yearly,
            period,
            year,
            month: None,
            quarter: None,
            closed_at: Utc::now(),
            summary,
        })
    }

    pub(crate) fn replace_all(&mut self, periods: Vec<ClosedPeriod>) -> JournalResult<()> {
        let previous = std::mem::replace(&mut self.periods, periods);
        if let Err(e) = self.persist() {
            self.periods = previous;
            return Err(e);
        }
        Ok(())
    }

    fn ensure_open(&self, period: &str) -> JournalResult<()> {
        if self.is_closed(period) {
            return Err(JournalError::PeriodAlreadyClosed(period.to_string()));
        }
        Ok(())
    }

    fn sum_months(
        &self,
        period: &str,
        year: i32,
        months: impl IntoIterator<Item = u32>,
    ) -> JournalResult<ClosingSummary> {
        let mut summary = ClosingSummary::default();
        let mut unclosed = Vec::new();

        for month in months {
            let key = monthly_key(year, month);
            match self.periods.iter().find(|p| p.period == key) {
                Some(closed) => {
                    summary.trade_count += closed.summary.trade_count;
                    summary.total_profit += closed.summary.total_profit;
                    summary.total_expenses += closed.summary.total_expenses;
                    summary.net_income += closed.summary.net_income;
                }
                None => unclosed.push(month),
            }
        }

        if !unclosed.is_empty() {
            return Err(JournalError::PeriodNotReady {
                period: period.to_string(),
                unclosed,
            });
        }
        Ok(summary)
    }

    fn append(&mut self, closed: ClosedPeriod) -> JournalResult<ClosedPeriod> {
        self.periods.push(closed.clone());
        if let Err(e) = self.persist() {
            self.periods.pop();
            return Err(e);
        }

        log::info!("Closed period {}", closed.period);
        self.events.emit(&JournalEvent::PeriodClosed(closed.clone()));
        Ok(closed)
    }

    fn persist(&self) -> JournalResult<()> {
        save_json(self.backend.as_ref(), CLOSED_PERIODS_KEY, &self.periods).map_err(|e| {
            log::error!("Failed to persist closed periods: {}", e);
            JournalError::from(e)
        })
    }
}

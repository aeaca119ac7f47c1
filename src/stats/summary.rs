use chrono::{Datelike, NaiveDate};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::{JournalError, JournalResult};
use crate::events::{EventBus, JournalEvent};
use crate::models::{Expense, ExpenseCategory, Trade};

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

/// Window an aggregation covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SummaryScope {
    All,
    Yearly { year: i32 },
    Monthly { year: i32, month: u32 },
    Quarterly { year: i32, quarter: u32 },
    Period { start: NaiveDate, end: NaiveDate },
    Trend { year: i32 },
}

impl SummaryScope {
    pub fn monthly(year: i32, month: u32) -> JournalResult<Self> {
        if !(1..=12).contains(&month) {
            return Err(JournalError::InvalidPeriod(format!("month {} of {}", month, year)));
        }
        Ok(SummaryScope::Monthly { year, month })
    }

    pub fn quarterly(year: i32, quarter: u32) -> JournalResult<Self> {
        if !(1..=4).contains(&quarter) {
            return Err(JournalError::InvalidPeriod(format!("quarter {} of {}", quarter, year)));
        }
        Ok(SummaryScope::Quarterly { year, quarter })
    }

    pub fn period(start: NaiveDate, end: NaiveDate) -> JournalResult<Self> {
        if start > end {
            return Err(JournalError::InvalidPeriod(format!("{} is after {}", start, end)));
        }
        Ok(SummaryScope::Period { start, end })
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        match *self {
            SummaryScope::All => true,
            SummaryScope::Yearly { year } | SummaryScope::Trend { year } => date.year() == year,
            SummaryScope::Monthly { year, month } => date.year() == year && date.month() == month,
            SummaryScope::Quarterly { year, quarter } => {
                date.year() == year && quarter_months(quarter).contains(&date.month())
            }
            SummaryScope::Period { start, end } => date >= start && date <= end,
        }
    }
}

pub fn quarter_months(quarter: u32) -> std::ops::RangeInclusive<u32> {
    let first = (quarter.clamp(1, 4) - 1) * 3 + 1;
    first..=first + 2
}

/// Gross wins over gross losses, with the undefined cases kept distinct.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "camelCase")]
pub enum ProfitFactor {
    Ratio(f64),
    /// Winning trades but no losing ones.
    NoLosses,
    /// Neither wins nor losses.
    Empty,
}

impl ProfitFactor {
    pub fn from_totals(total_profit: f64, total_loss: f64) -> Self {
        if total_loss > 0.0 {
            ProfitFactor::Ratio(round_to(total_profit / total_loss, 2))
        } else if total_profit > 0.0 {
            ProfitFactor::NoLosses
        } else {
            ProfitFactor::Empty
        }
    }

    /// Display value: the ratio, or 0 when undefined.
    pub fn value(&self) -> f64 {
        match self {
            ProfitFactor::Ratio(ratio) => *ratio,
            ProfitFactor::NoLosses | ProfitFactor::Empty => 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeStats {
    pub count: usize,
    pub win_count: usize,
    pub loss_count: usize,
    pub total_profit: f64,
    /// Absolute value.
    pub total_loss: f64,
    pub net_profit: f64,
    /// Percent, 1 decimal.
    pub win_rate: f64,
    pub average_win: f64,
    pub average_loss: f64,
    pub profit_factor: ProfitFactor,
}

impl TradeStats {
    pub fn from_trades<'a>(trades: impl IntoIterator<Item = &'a Trade>) -> Self {
        let mut count = 0;
        let (mut win_count, mut loss_count) = (0, 0);
        let (mut total_profit, mut total_loss) = (0.0, 0.0);

        for trade in trades {
            let profit = trade.yen_profit_loss.net_profit;
            count += 1;
            if profit > 0.0 {
                win_count += 1;
                total_profit += profit;
            } else if profit < 0.0 {
                loss_count += 1;
                total_loss += profit.abs();
            }
        }

        let average = |total: f64, n: usize| if n > 0 { round_to(total / n as f64, 0) } else { 0.0 };

        TradeStats {
            count,
            win_count,
            loss_count,
            total_profit,
            total_loss,
            net_profit: total_profit - total_loss,
            win_rate: if count > 0 {
                round_to(win_count as f64 / count as f64 * 100.0, 1)
            } else {
                0.0
            },
            average_win: average(total_profit, win_count),
            average_loss: average(total_loss, loss_count),
            profit_factor: ProfitFactor::from_totals(total_profit, total_loss),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpenseStats {
    pub total: f64,
    pub by_category: BTreeMap<ExpenseCategory, f64>,
    pub by_month: BTreeMap<u32, f64>,
}

impl ExpenseStats {
    pub fn from_expenses<'a>(expenses: impl IntoIterator<Item = &'a Expense>) -> Self {
        let mut stats = ExpenseStats::default();
        for expense in expenses {
            stats.total += expense.amount;
            *stats.by_category.entry(expense.category).or_default() += expense.amount;
            *stats.by_month.entry(expense.date.month()).or_default() += expense.amount;
        }
        stats
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeriodSummary {
    pub scope: SummaryScope,
    pub trades: TradeStats,
    pub expenses: ExpenseStats,
    pub net_income: f64,
    pub taxable_income: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrendPoint {
    pub month: u32,
    pub net_income: f64,
    pub trades: f64,
    pub expenses: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MovingAverage {
    pub month: u32,
    pub average: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Trend {
    pub year: i32,
    pub monthly: Vec<TrendPoint>,
    pub moving_average3: Vec<MovingAverage>,
    pub moving_average6: Vec<MovingAverage>,
}

/// Payload of [`JournalEvent::SummaryCalculated`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SummaryReport {
    Summary(PeriodSummary),
    Trend(Trend),
}

/// Tax-side roll-ups of settled trades and expenses.
pub struct SummaryEngine {
    events: Arc<EventBus>,
}

impl SummaryEngine {
    pub fn new(events: Arc<EventBus>) -> Self {
        Self { events }
    }

    pub fn yearly(&self, trades: &[Trade], expenses: &[Expense], year: i32) -> PeriodSummary {
        self.publish(summarize(SummaryScope::Yearly { year }, trades, expenses))
    }

    pub fn monthly(
        &self,
        trades: &[Trade],
        expenses: &[Expense],
        year: i32,
        month: u32,
    ) -> JournalResult<PeriodSummary> {
        let scope = SummaryScope::monthly(year, month)?;
        Ok(self.publish(summarize(scope, trades, expenses)))
    }

    /// Built from the three months' filtered sets so that it always agrees
    /// with the monthly figures.
    pub fn quarterly(
        &self,
        trades: &[Trade],
        expenses: &[Expense],
        year: i32,
        quarter: u32,
    ) -> JournalResult<PeriodSummary> {
        let scope = SummaryScope::quarterly(year, quarter)?;

        let mut quarter_trades: Vec<&Trade> = Vec::new();
        let mut quarter_expenses: Vec<&Expense> = Vec::new();
        for month in quarter_months(quarter) {
            let month_scope = SummaryScope::Monthly { year, month };
            quarter_trades.extend(settled_in(trades, month_scope));
            quarter_expenses.extend(expenses_in(expenses, month_scope));
        }

        Ok(self.publish(build_summary(scope, quarter_trades, quarter_expenses)))
    }

    /// Inclusive date range.
    pub fn period(
        &self,
        trades: &[Trade],
        expenses: &[Expense],
        start: NaiveDate,
        end: NaiveDate,
    ) -> JournalResult<PeriodSummary> {
        let scope = SummaryScope::period(start, end)?;
        Ok(self.publish(summarize(scope, trades, expenses)))
    }

    /// Monthly net income for a year with 3- and 6-month moving averages.
    pub fn trend(&self, trades: &[Trade], expenses: &[Expense], year: i32) -> Trend {
        let monthly: Vec<TrendPoint> = (1..=12)
            .map(|month| {
                let summary = summarize(SummaryScope::Monthly { year, month }, trades, expenses);
                TrendPoint {
                    month,
                    net_income: summary.net_income,
                    trades: summary.trades.net_profit,
                    expenses: summary.expenses.total,
                }
            })
            .collect();

        let trend = Trend {
            year,
            moving_average3: moving_average(&monthly, 3),
            moving_average6: moving_average(&monthly, 6),
            monthly,
        };

        self.events
            .emit(&JournalEvent::SummaryCalculated(SummaryReport::Trend(trend.clone())));
        trend
    }

    fn publish(&self, summary: PeriodSummary) -> PeriodSummary {
        log::debug!("Summary calculated for {:?}", summary.scope);
        self.events
            .emit(&JournalEvent::SummaryCalculated(SummaryReport::Summary(summary.clone())));
        summary
    }
}

pub fn settled_in(trades: &[Trade], scope: SummaryScope) -> impl Iterator<Item = &Trade> {
    trades
        .iter()
        .filter(move |t| t.is_settled() && t.trade_date().is_some_and(|d| scope.contains(d)))
}

pub fn expenses_in(expenses: &[Expense], scope: SummaryScope) -> impl Iterator<Item = &Expense> {
    expenses.iter().filter(move |e| scope.contains(e.date))
}

/// Compute a summary without announcing it.
pub fn summarize(scope: SummaryScope, trades: &[Trade], expenses: &[Expense]) -> PeriodSummary {
    build_summary(
        scope,
        settled_in(trades, scope).collect(),
        expenses_in(expenses, scope).collect(),
    )
}

fn build_summary(scope: SummaryScope, trades: Vec<&Trade>, expenses: Vec<&Expense>) -> PeriodSummary {
    let trades = TradeStats::from_trades(trades);
    let expenses = ExpenseStats::from_expenses(expenses);
    let net_income = trades.net_profit - expenses.total;

    PeriodSummary {
        scope,
        trades,
        expenses,
        net_income,
        taxable_income: net_income.max(0.0),
    }
}

fn moving_average(points: &[TrendPoint], window: usize) -> Vec<MovingAverage> {
    points
        .windows(window)
        .map(|w| MovingAverage {
            month: w[window - 1].month,
            average: round_to(w.iter().map(|p| p.net_income).sum::<f64>() / window as f64, 0),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trades::normalize::normalize_trade;
    use chrono::Utc;
    use serde_json::json;
    use std::sync::Mutex;

    fn settled(id: &str, date: &str, net: f64) -> Trade {
        normalize_trade(&json!({
            "id": id,
            "pair": "USD/JPY",
            "entryTime": format!("{}T09:00", date),
            "entryPrice": 150.0,
            "exits": [{"time": format!("{}T15:00", date), "price": 150.1, "lot": 1.0}],
            "yenProfitLoss": {"netProfit": net}
        }))
    }

    fn expense(date: &str, amount: f64, category: ExpenseCategory) -> Expense {
        let date = NaiveDate::parse_from_str(date, "%Y-%m-%d").unwrap();
        Expense {
            id: format!("E-{}", date),
            date,
            category,
            amount,
            description: String::new(),
            memo: String::new(),
            tax_year: date.year(),
            created_at: Utc::now(),
        }
    }

    fn engine() -> SummaryEngine {
        SummaryEngine::new(EventBus::new())
    }

    #[test]
    fn test_win_rate_of_six_in_ten() {
        let trades: Vec<Trade> = (0..10)
            .map(|i| settled(&format!("T{}", i), "2024-05-10", if i < 6 { 1000.0 } else { -500.0 }))
            .collect();

        let summary = engine().yearly(&trades, &[], 2024);
        assert_eq!(summary.trades.count, 10);
        assert_eq!(summary.trades.win_rate, 60.0);
        assert_eq!(summary.trades.average_win, 1000.0);
        assert_eq!(summary.trades.average_loss, 500.0);
    }

    #[test]
    fn test_profit_factor() {
        let trades = vec![
            settled("A", "2024-01-05", 300_000.0),
            settled("B", "2024-01-06", -100_000.0),
        ];
        let summary = engine().yearly(&trades, &[], 2024);
        assert_eq!(summary.trades.profit_factor, ProfitFactor::Ratio(3.0));

        let only_wins = vec![settled("A", "2024-01-05", 300_000.0)];
        let summary = engine().yearly(&only_wins, &[], 2024);
        assert_eq!(summary.trades.profit_factor, ProfitFactor::NoLosses);
        assert_eq!(summary.trades.profit_factor.value(), 0.0);

        let summary = engine().yearly(&[], &[], 2024);
        assert_eq!(summary.trades.profit_factor, ProfitFactor::Empty);
        assert!(summary.trades.profit_factor.value().is_finite());
    }

    #[test]
    fn test_open_trades_are_excluded() {
        let open = normalize_trade(&json!({
            "id": "open",
            "entryTime": "2024-01-05T09:00",
            "yenProfitLoss": {"netProfit": 999.0}
        }));
        let summary = engine().yearly(&[open, settled("A", "2024-01-05", 10.0)], &[], 2024);
        assert_eq!(summary.trades.count, 1);
        assert_eq!(summary.trades.net_profit, 10.0);
    }

    #[test]
    fn test_expenses_and_taxable_income() {
        let trades = vec![settled("A", "2024-02-01", 5_000.0)];
        let expenses = vec![
            expense("2024-02-10", 3_000.0, ExpenseCategory::Internet),
            expense("2024-02-20", 4_000.0, ExpenseCategory::Books),
            expense("2023-02-20", 9_999.0, ExpenseCategory::Books),
        ];

        let summary = engine().monthly(&trades, &expenses, 2024, 2).unwrap();
        assert_eq!(summary.expenses.total, 7_000.0);
        assert_eq!(summary.expenses.by_category[&ExpenseCategory::Books], 4_000.0);
        assert_eq!(summary.expenses.by_month[&2], 7_000.0);
        assert_eq!(summary.net_income, -2_000.0);
        assert_eq!(summary.taxable_income, 0.0);
    }

    #[test]
    fn test_quarter_equals_sum_of_months() {
        let trades = vec![
            settled("A", "2024-04-03", 12_000.0),
            settled("B", "2024-05-09", -4_000.0),
            settled("C", "2024-06-30", 7_500.0),
            settled("D", "2024-07-01", 50_000.0),
        ];
        let expenses = vec![
            expense("2024-04-15", 1_000.0, ExpenseCategory::VpsCloud),
            expense("2024-06-15", 2_500.0, ExpenseCategory::Other),
        ];
        let engine = engine();

        let quarter = engine.quarterly(&trades, &expenses, 2024, 2).unwrap();
        let months: f64 = (4..=6)
            .map(|m| engine.monthly(&trades, &expenses, 2024, m).unwrap().net_income)
            .sum();
        assert_eq!(quarter.net_income, months);
        assert_eq!(quarter.trades.count, 3);
    }

    #[test]
    fn test_invalid_periods() {
        let engine = engine();
        assert!(engine.monthly(&[], &[], 2024, 13).is_err());
        assert!(engine.quarterly(&[], &[], 2024, 0).is_err());
        let start = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        let end = NaiveDate::from_ymd_opt(2024, 4, 1).unwrap();
        assert!(engine.period(&[], &[], start, end).is_err());
    }

    #[test]
    fn test_period_is_inclusive() {
        let trades = vec![
            settled("A", "2024-03-01", 100.0),
            settled("B", "2024-03-31", 200.0),
            settled("C", "2024-04-01", 400.0),
        ];
        let summary = engine()
            .period(
                &trades,
                &[],
                NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
                NaiveDate::from_ymd_opt(2024, 3, 31).unwrap(),
            )
            .unwrap();
        assert_eq!(summary.trades.net_profit, 300.0);
    }

    #[test]
    fn test_trend_moving_averages() {
        let trades: Vec<Trade> = (1..=12)
            .map(|m| settled(&format!("T{}", m), &format!("2024-{:02}-15", m), m as f64 * 300.0))
            .collect();

        let trend = engine().trend(&trades, &[], 2024);
        assert_eq!(trend.monthly.len(), 12);
        assert_eq!(trend.moving_average3.len(), 10);
        assert_eq!(trend.moving_average6.len(), 7);
        // months 1..=3: (300 + 600 + 900) / 3
        assert_eq!(trend.moving_average3[0], MovingAverage { month: 3, average: 600.0 });
        assert_eq!(trend.moving_average6[0].month, 6);
    }

    #[test]
    fn test_every_calculation_is_announced() {
        let events = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let _sub = events.subscribe(move |e| {
            if let JournalEvent::SummaryCalculated(report) = e {
                let label = match report {
                    SummaryReport::Summary(s) => format!("{:?}", s.scope),
                    SummaryReport::Trend(t) => format!("trend {}", t.year),
                };
                sink.lock().unwrap().push(label);
            }
            Ok(())
        });

        let engine = SummaryEngine::new(events);
        engine.yearly(&[], &[], 2024);
        engine.trend(&[], &[], 2024);

        assert_eq!(
            *seen.lock().unwrap(),
            vec!["Yearly { year: 2024 }".to_string(), "trend 2024".to_string()]
        );
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeriodKind {
    Monthly,
    Quarterly,
    Yearly,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClosingSummary {
    pub trade_count: usize,
    pub total_profit: f64,
    pub total_expenses: f64,
    pub net_income: f64,
}

/// Finalized snapshot of a month, quarter or year. Never mutated once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClosedPeriod {
    #[serde(rename = "type")]
    pub kind: PeriodKind,
    /// `2024-03`, `2024-Q1` or `2024`.
    pub period: String,
    pub year: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub month: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quarter: Option<u32>,
    pub closed_at: DateTime<Utc>,
    pub summary: ClosingSummary,
}

pub fn monthly_key(year: i32, month: u32) -> String {
    format!("{}-{:02}", year, month)
}

pub fn quarterly_key(year: i32, quarter: u32) -> String {
    format!("{}-Q{}", year, quarter)
}

pub fn yearly_key(year: i32) -> String {
    year.to_string()
}

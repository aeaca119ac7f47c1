use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CapitalRecordType {
    Deposit,
    Withdrawal,
}

impl CapitalRecordType {
    /// Effect of `amount` on the running balance.
    pub fn signed(&self, amount: f64) -> f64 {
        match self {
            CapitalRecordType::Deposit => amount,
            CapitalRecordType::Withdrawal => -amount,
        }
    }
}

/// A deposit or withdrawal. `balance` is derived from the whole record set
/// and recomputed whenever it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapitalRecord {
    pub id: String,
    pub date: NaiveDate,
    #[serde(rename = "type")]
    pub record_type: CapitalRecordType,
    pub amount: f64,
    #[serde(default)]
    pub balance: f64,
    #[serde(default)]
    pub note: String,
    pub created_at: DateTime<Utc>,
}

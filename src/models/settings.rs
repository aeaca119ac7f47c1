use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub currency: String,
    pub default_lot_size: f64,
    /// Loss a single trade may take before it is flagged; `None` disables
    /// risk classification.
    pub allowed_loss: Option<f64>,
    pub sync_enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Default for Settings {
    fn default() -> Self {
        let now = Utc::now();
        Self {
            currency: "JPY".to_string(),
            default_lot_size: 1.0,
            allowed_loss: None,
            sync_enabled: false,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateSettingsInput {
    pub currency: Option<String>,
    pub default_lot_size: Option<f64>,
    pub allowed_loss: Option<f64>,
    pub sync_enabled: Option<bool>,
}

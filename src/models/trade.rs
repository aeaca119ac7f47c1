use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const CHART_IMAGE_SLOTS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    Long,
    Short,
}

impl Direction {
    /// Accepts `long`/`short` plus the `buy`/`sell` spellings older records use.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "long" | "buy" => Some(Direction::Long),
            "short" | "sell" => Some(Direction::Short),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Long => "long",
            Direction::Short => "short",
        }
    }

    /// +1 for long, -1 for short.
    pub fn sign(&self) -> f64 {
        match self {
            Direction::Long => 1.0,
            Direction::Short => -1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Exit {
    pub time: NaiveDateTime,
    pub price: f64,
    pub lot: f64,
    pub pips: f64,
}

/// Broker-statement figures in account currency.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct YenProfitLoss {
    pub profit_loss: f64,
    pub swap: f64,
    pub commission: f64,
    pub net_profit: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChartImage {
    Legacy(String),
    Descriptor {
        src: String,
        #[serde(default)]
        title: String,
        #[serde(default)]
        description: String,
    },
}

impl ChartImage {
    pub fn src(&self) -> &str {
        match self {
            ChartImage::Legacy(src) => src,
            ChartImage::Descriptor { src, .. } => src,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleFollowed {
    Yes,
    No,
}

impl RuleFollowed {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "yes" | "true" => Some(RuleFollowed::Yes),
            "no" | "false" => Some(RuleFollowed::No),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StructuredReflection {
    pub rule_followed: Option<RuleFollowed>,
    #[serde(default)]
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Post-trade reflection: free text from older records or the structured form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Reflection {
    Text(String),
    Structured(StructuredReflection),
}

impl Default for Reflection {
    fn default() -> Self {
        Reflection::Text(String::new())
    }
}

impl Reflection {
    pub fn rule_followed(&self) -> Option<RuleFollowed> {
        match self {
            Reflection::Text(_) => None,
            Reflection::Structured(s) => s.rule_followed,
        }
    }

    pub fn text(&self) -> &str {
        match self {
            Reflection::Text(text) => text,
            Reflection::Structured(s) => &s.text,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rule_followed().is_none() && self.text().trim().is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskStatus {
    Normal,
    Warning,
    Danger,
}

impl RiskStatus {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "normal" => Some(RiskStatus::Normal),
            "warning" => Some(RiskStatus::Warning),
            "danger" => Some(RiskStatus::Danger),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskStatus::Normal => "normal",
            RiskStatus::Warning => "warning",
            RiskStatus::Danger => "danger",
        }
    }

    /// Classify a loss against the per-trade tolerated loss: within it is
    /// normal, up to 1.5x is a warning, beyond that is danger.
    pub fn classify(loss: f64, allowed_loss: f64) -> Self {
        let loss = loss.abs();
        if loss <= allowed_loss {
            RiskStatus::Normal
        } else if loss <= allowed_loss * 1.5 {
            RiskStatus::Warning
        } else {
            RiskStatus::Danger
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trade {
    pub id: String,
    pub pair: String,
    /// Older name for `pair`, kept identical to it.
    pub symbol: String,
    pub direction: Direction,

    pub entry_time: Option<NaiveDateTime>,
    pub entry_price: f64,
    /// Single exit price from records predating partial exits.
    pub exit_price: Option<f64>,
    /// 0 when not set.
    pub stop_loss: f64,
    /// 0 when not set.
    pub take_profit: f64,
    pub lot_size: f64,
    /// Older name for `lot_size`, kept identical to it.
    pub lot: f64,

    pub profit_loss: f64,
    pub swap: f64,
    pub commission: f64,
    pub net_profit_loss: f64,
    pub yen_profit_loss: YenProfitLoss,

    pub exits: Vec<Exit>,
    pub chart_images: Vec<Option<ChartImage>>,
    /// Entry, stop and target rationale.
    pub reasons: [String; 3],
    pub scenario: String,
    pub entry_emotion: String,
    pub reflection: Reflection,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub broker: Option<String>,
    pub entry_method: String,
    pub is_bulk_entry: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk_status: Option<RiskStatus>,
    /// Explicit close marker for trades settled without recorded exits.
    #[serde(default)]
    pub closed: bool,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    /// Fields this crate does not model, carried through untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Trade {
    pub fn is_open(&self) -> bool {
        !self.is_settled()
    }

    pub fn is_settled(&self) -> bool {
        !self.exits.is_empty() || self.closed
    }

    pub fn exited_lot(&self) -> f64 {
        self.exits.iter().map(|e| e.lot).sum()
    }

    /// Calendar date the trade is reported under.
    pub fn trade_date(&self) -> Option<NaiveDate> {
        self.entry_time.map(|t| t.date())
    }
}

//! Tolerant conversion of loosely-typed trade records into [`Trade`].
//!
//! Reads never fail: unknown shapes degrade to defaults so that old or
//! hand-edited data still loads. Strict checks for new writes live in
//! [`crate::trades::validator`].

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use regex::Regex;
use serde_json::{Map, Value};
use std::sync::OnceLock;

use crate::models::{
    ChartImage, Direction, Exit, Reflection, RiskStatus, RuleFollowed, StructuredReflection,
    Trade, YenProfitLoss, CHART_IMAGE_SLOTS,
};
use crate::trades::calculator;

const DEFAULT_LOT_SIZE: f64 = 1.0;

/// Keys consumed into typed fields. Anything else is kept in `Trade::extra`.
const KNOWN_FIELDS: &[&str] = &[
    "id",
    "pair",
    "symbol",
    "direction",
    "entryTime",
    "date",
    "entryDatetime",
    "entryPrice",
    "exitPrice",
    "stopLoss",
    "takeProfit",
    "lotSize",
    "lot",
    "profitLoss",
    "swap",
    "commission",
    "netProfitLoss",
    "netProfit",
    "yenProfitLoss",
    "exits",
    "chartImages",
    "reasons",
    "scenario",
    "entryEmotion",
    "reflection",
    "broker",
    "entryMethod",
    "isBulkEntry",
    "methodId",
    "riskStatus",
    "closed",
    "status",
    "createdAt",
    "updatedAt",
];

/// Field groups naming the same value. An update that sets one member
/// replaces the whole group.
const ALIAS_GROUPS: &[&[&str]] = &[
    &["pair", "symbol"],
    &["lotSize", "lot"],
    &["entryTime", "date", "entryDatetime"],
    &["netProfitLoss", "netProfit"],
];

fn pair_separator() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[\s/_\-.]+").expect("static regex"))
}

/// `usdjpy`, `USD-JPY` and `usd/jpy` all become `USD/JPY`. Anything that is
/// not two three-letter codes is only trimmed and upper-cased.
pub fn canonical_pair(raw: &str) -> String {
    let compact = pair_separator().replace_all(raw.trim(), "").to_ascii_uppercase();
    if compact.len() == 6 && compact.chars().all(|c| c.is_ascii_alphabetic()) {
        format!("{}/{}", &compact[..3], &compact[3..])
    } else {
        raw.trim().to_ascii_uppercase()
    }
}

pub fn base_currency(pair: &str) -> Option<String> {
    canonical_pair(pair).split_once('/').map(|(base, _)| base.to_string())
}

pub fn quote_currency(pair: &str) -> Option<String> {
    canonical_pair(pair).split_once('/').map(|(_, quote)| quote.to_string())
}

/// Number or numeric string. Non-finite values count as absent.
pub fn coerce_f64(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().replace(',', "").parse::<f64>().ok(),
        _ => None,
    }?;
    n.is_finite().then_some(n)
}

fn number_or_zero(obj: &Map<String, Value>, key: &str) -> f64 {
    obj.get(key).and_then(coerce_f64).unwrap_or(0.0)
}

fn string_field(obj: &Map<String, Value>, key: &str) -> String {
    match obj.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}

fn optional_string(obj: &Map<String, Value>, key: &str) -> Option<String> {
    let s = string_field(obj, key);
    (!s.trim().is_empty()).then_some(s)
}

fn bool_field(obj: &Map<String, Value>, key: &str) -> bool {
    match obj.get(key) {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => s.eq_ignore_ascii_case("true"),
        _ => false,
    }
}

/// Parse the timestamp spellings found in stored records: RFC 3339, ISO
/// local date-times with or without seconds, `YYYY-MM-DD HH:MM`, bare dates
/// and epoch milliseconds.
pub fn parse_datetime(value: &Value) -> Option<NaiveDateTime> {
    match value {
        Value::String(s) => parse_datetime_str(s),
        Value::Number(n) => n
            .as_i64()
            .and_then(DateTime::<Utc>::from_timestamp_millis)
            .map(|dt| dt.naive_utc()),
        _ => None,
    }
}

pub fn parse_datetime_str(raw: &str) -> Option<NaiveDateTime> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_local());
    }

    const FORMATS: &[&str] = &[
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%d %H:%M",
        "%Y/%m/%d %H:%M:%S",
        "%Y/%m/%d %H:%M",
    ];
    for format in FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, format) {
            return Some(dt);
        }
    }

    ["%Y-%m-%d", "%Y/%m/%d"]
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(s, format).ok())
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

fn parse_utc(value: Option<&Value>) -> Option<DateTime<Utc>> {
    match value? {
        Value::String(s) => DateTime::parse_from_rfc3339(s.trim())
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
            .or_else(|| parse_datetime_str(s).map(|naive| naive.and_utc())),
        Value::Number(n) => n.as_i64().and_then(DateTime::<Utc>::from_timestamp_millis),
        _ => None,
    }
}

fn parse_yen(obj: &Map<String, Value>) -> YenProfitLoss {
    match obj.get("yenProfitLoss") {
        Some(Value::Object(yen)) => YenProfitLoss {
            profit_loss: number_or_zero(yen, "profitLoss"),
            swap: number_or_zero(yen, "swap"),
            commission: number_or_zero(yen, "commission"),
            net_profit: number_or_zero(yen, "netProfit"),
        },
        _ => YenProfitLoss {
            profit_loss: number_or_zero(obj, "profitLoss"),
            swap: number_or_zero(obj, "swap"),
            commission: number_or_zero(obj, "commission"),
            net_profit: obj
                .get("netProfitLoss")
                .and_then(coerce_f64)
                .filter(|n| *n != 0.0)
                .or_else(|| obj.get("netProfit").and_then(coerce_f64))
                .unwrap_or(0.0),
        },
    }
}

fn parse_exits(
    value: Option<&Value>,
    pair: &str,
    direction: Direction,
    entry_price: f64,
) -> Vec<Exit> {
    let Some(Value::Array(items)) = value else {
        return Vec::new();
    };

    items
        .iter()
        .enumerate()
        .filter_map(|(index, item)| {
            let Value::Object(exit) = item else {
                log::warn!("Dropping exit #{}: not an object", index);
                return None;
            };
            let Some(time) = exit.get("time").and_then(parse_datetime) else {
                log::warn!("Dropping exit #{}: unreadable time {:?}", index, exit.get("time"));
                return None;
            };
            let price = number_or_zero(exit, "price");
            let pips = exit
                .get("pips")
                .and_then(coerce_f64)
                .unwrap_or_else(|| calculator::pips(pair, direction, entry_price, price));

            Some(Exit {
                time,
                price,
                lot: number_or_zero(exit, "lot"),
                pips,
            })
        })
        .collect()
}

fn parse_chart_image(value: &Value) -> Option<ChartImage> {
    match value {
        Value::String(s) if !s.is_empty() => Some(ChartImage::Legacy(s.clone())),
        Value::Object(obj) => {
            let src = optional_string(obj, "src").or_else(|| optional_string(obj, "url"))?;
            Some(ChartImage::Descriptor {
                src,
                title: string_field(obj, "title"),
                description: string_field(obj, "description"),
            })
        }
        _ => None,
    }
}

fn parse_chart_images(value: Option<&Value>) -> Vec<Option<ChartImage>> {
    let mut slots: Vec<Option<ChartImage>> = match value {
        Some(Value::Array(items)) => items.iter().map(parse_chart_image).collect(),
        _ => Vec::new(),
    };
    slots.resize(CHART_IMAGE_SLOTS, None);
    slots
}

fn parse_reasons(value: Option<&Value>) -> [String; 3] {
    let mut reasons: [String; 3] = Default::default();
    if let Some(Value::Array(items)) = value {
        for (slot, item) in reasons.iter_mut().zip(items) {
            if let Value::String(s) = item {
                *slot = s.clone();
            }
        }
    }
    reasons
}

pub fn parse_rule_followed(value: Option<&Value>) -> Option<RuleFollowed> {
    match value? {
        Value::String(s) => RuleFollowed::parse(s),
        Value::Bool(true) => Some(RuleFollowed::Yes),
        Value::Bool(false) => Some(RuleFollowed::No),
        _ => None,
    }
}

pub fn parse_reflection(value: Option<&Value>) -> Reflection {
    match value {
        Some(Value::String(s)) => Reflection::Text(s.clone()),
        Some(Value::Object(obj)) => Reflection::Structured(StructuredReflection {
            rule_followed: parse_rule_followed(obj.get("ruleFollowed")),
            text: string_field(obj, "text"),
            updated_at: parse_utc(obj.get("updatedAt")),
        }),
        _ => Reflection::default(),
    }
}

/// The lot a record asks for: the first non-zero of `lot` then `lotSize`.
/// Both normalization and strict validation read the lot through here.
pub fn lot_alias(obj: &Map<String, Value>) -> Option<f64> {
    ["lot", "lotSize"]
        .iter()
        .filter_map(|key| obj.get(*key).and_then(coerce_f64))
        .find(|lot| *lot != 0.0)
}

fn parse_lot(obj: &Map<String, Value>) -> f64 {
    lot_alias(obj).unwrap_or(DEFAULT_LOT_SIZE)
}

/// Build a fully-populated trade from any JSON value, stamping `updated_at`.
///
/// Running it again over its own serialized output yields the same trade
/// apart from `updated_at`.
pub fn normalize_trade(input: &Value) -> Trade {
    let empty = Map::new();
    let obj = input.as_object().unwrap_or(&empty);
    let now = Utc::now();

    let raw_pair = optional_string(obj, "pair")
        .or_else(|| optional_string(obj, "symbol"))
        .unwrap_or_default();
    let pair = if raw_pair.is_empty() {
        raw_pair
    } else {
        canonical_pair(&raw_pair)
    };

    let direction = obj
        .get("direction")
        .and_then(Value::as_str)
        .and_then(Direction::parse)
        .unwrap_or_default();
    let entry_price = number_or_zero(obj, "entryPrice");
    let lot = parse_lot(obj);

    let entry_time = ["entryTime", "date", "entryDatetime"]
        .iter()
        .find_map(|key| obj.get(*key).and_then(parse_datetime));

    let exit_price = match obj.get("exitPrice") {
        None | Some(Value::Null) => None,
        Some(v) => Some(coerce_f64(v).unwrap_or(0.0)),
    };

    let closed = bool_field(obj, "closed")
        || obj
            .get("status")
            .and_then(Value::as_str)
            .is_some_and(|s| s.eq_ignore_ascii_case("closed"));

    let extra: Map<String, Value> = obj
        .iter()
        .filter(|(key, _)| !KNOWN_FIELDS.contains(&key.as_str()))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();

    Trade {
        id: string_field(obj, "id"),
        symbol: pair.clone(),
        exits: parse_exits(obj.get("exits"), &pair, direction, entry_price),
        pair,
        direction,
        entry_time,
        entry_price,
        exit_price,
        stop_loss: number_or_zero(obj, "stopLoss"),
        take_profit: number_or_zero(obj, "takeProfit"),
        lot_size: lot,
        lot,
        profit_loss: number_or_zero(obj, "profitLoss"),
        swap: number_or_zero(obj, "swap"),
        commission: number_or_zero(obj, "commission"),
        net_profit_loss: number_or_zero(obj, "netProfitLoss"),
        yen_profit_loss: parse_yen(obj),
        chart_images: parse_chart_images(obj.get("chartImages")),
        reasons: parse_reasons(obj.get("reasons")),
        scenario: string_field(obj, "scenario"),
        entry_emotion: string_field(obj, "entryEmotion"),
        reflection: parse_reflection(obj.get("reflection")),
        broker: optional_string(obj, "broker"),
        entry_method: optional_string(obj, "entryMethod").unwrap_or_else(|| "manual".to_string()),
        is_bulk_entry: bool_field(obj, "isBulkEntry"),
        method_id: optional_string(obj, "methodId"),
        risk_status: obj
            .get("riskStatus")
            .and_then(Value::as_str)
            .and_then(RiskStatus::parse),
        closed,
        created_at: parse_utc(obj.get("createdAt")).unwrap_or(now),
        updated_at: now,
        extra,
    }
}

/// Normalize a record read back from storage, keeping its stored
/// `updatedAt` instead of re-stamping it.
pub fn normalize_stored(input: &Value) -> Trade {
    let mut trade = normalize_trade(input);
    if let Some(updated_at) = parse_utc(input.get("updatedAt")) {
        trade.updated_at = updated_at;
    }
    trade
}

/// Overlay `changes` onto the serialized form of `existing`.
///
/// Setting one member of an alias group (`lot`/`lotSize`, `pair`/`symbol`,
/// ...) drops the other members so the new value wins.
pub fn merge_changes(existing: &Trade, changes: &Value) -> Value {
    let mut merged = match serde_json::to_value(existing) {
        Ok(Value::Object(map)) => map,
        _ => Map::new(),
    };

    if let Value::Object(changes) = changes {
        for group in ALIAS_GROUPS {
            if group.iter().any(|key| changes.contains_key(*key)) {
                for key in group.iter() {
                    merged.remove(*key);
                }
            }
        }
        for (key, value) in changes {
            merged.insert(key.clone(), value.clone());
        }
    }

    Value::Object(merged)
}

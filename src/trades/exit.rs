//! Partial and full closes.
//!
//! A trade moves open -> partially closed -> closed purely through its exit
//! list; nothing else is stored. Exits are only ever appended.

use chrono::{NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::{JournalError, JournalResult};
use crate::models::{Exit, Reflection, RuleFollowed, StructuredReflection, Trade};
use crate::trades::calculator;
use crate::trades::store::TradeStore;
use crate::trades::validator::{validate_exit, validate_exit_date_time};

/// Slack for float noise when comparing summed lots against the entry lot.
pub(crate) const LOT_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExitRequest {
    pub time: NaiveDateTime,
    pub price: f64,
    pub lot: f64,
}

impl ExitRequest {
    /// An untouched form row: no price and no lot.
    fn is_blank(&self) -> bool {
        self.price == 0.0 && self.lot == 0.0
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReflectionInput {
    pub rule_followed: Option<RuleFollowed>,
    pub text: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExitSubmission {
    pub exits: Vec<ExitRequest>,
    /// Only applied when this submission closes the whole position.
    pub reflection: Option<ReflectionInput>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExitOutcome {
    pub trade: Trade,
    pub full_exit: bool,
    pub remaining_lot: f64,
}

/// Append the submitted exits to a trade.
///
/// The whole submission is rejected if any row is invalid or if the exited
/// lot would exceed the entry lot; the trade is then left untouched.
pub fn record_exits(
    store: &mut TradeStore,
    trade_id: &str,
    submission: &ExitSubmission,
    full_exit_tolerance: f64,
) -> JournalResult<ExitOutcome> {
    if trade_id.trim().is_empty() {
        return Err(JournalError::InvalidTradeId(trade_id.to_string()));
    }
    let trade = store
        .get_by_id(trade_id)
        .ok_or_else(|| JournalError::TradeNotFound(trade_id.to_string()))?;

    let rows: Vec<&ExitRequest> = submission.exits.iter().filter(|r| !r.is_blank()).collect();
    if rows.is_empty() {
        return Err(JournalError::NoExitEntries);
    }

    let mut errors = Vec::new();
    for (n, row) in rows.iter().enumerate() {
        let report = validate_exit(row, trade.entry_price, trade.direction);
        errors.extend(report.errors.into_iter().map(|e| format!("Exit #{}: {}", n + 1, e)));

        let timing = validate_exit_date_time(trade.entry_time, Some(row.time));
        if !timing.valid {
            errors.push(format!("Exit #{}: {}", n + 1, timing.message));
        }
    }
    if !errors.is_empty() {
        log::debug!("Rejected exit submission for {}: {:?}", trade_id, errors);
        return Err(JournalError::Validation(errors));
    }

    let existing = trade.exited_lot();
    let requested: f64 = rows.iter().map(|r| r.lot).sum();
    if existing + requested > trade.lot_size + LOT_EPSILON {
        log::debug!(
            "Rejected exit submission for {}: {} + {} exceeds {}",
            trade_id,
            existing,
            requested,
            trade.lot_size
        );
        return Err(JournalError::LotLimitExceeded {
            lot_size: trade.lot_size,
            existing,
            requested,
        });
    }

    let mut exits = trade.exits.clone();
    exits.extend(rows.iter().map(|row| Exit {
        time: row.time,
        price: row.price,
        lot: row.lot,
        pips: calculator::pips(&trade.pair, trade.direction, trade.entry_price, row.price),
    }));

    let full_exit = (existing + requested - trade.lot_size).abs() < full_exit_tolerance;
    let reflection = match (&submission.reflection, full_exit) {
        (Some(input), true) => merge_reflection(&trade.reflection, input),
        _ => trade.reflection.clone(),
    };

    let changes = json!({
        "exits": serde_json::to_value(&exits)?,
        "reflection": serde_json::to_value(&reflection)?,
    });

    let updated = store
        .update(trade_id, &changes)?
        .ok_or_else(|| JournalError::TradeNotFound(trade_id.to_string()))?;
    let remaining_lot = calculator::remaining_lot(Some(&updated));

    log::info!(
        "Recorded {} exit(s) on {} ({})",
        rows.len(),
        trade_id,
        if full_exit { "closed" } else { "partial" }
    );

    Ok(ExitOutcome {
        trade: updated,
        full_exit,
        remaining_lot,
    })
}

/// New values win; blanks in the submission keep what the trade already had.
fn merge_reflection(existing: &Reflection, input: &ReflectionInput) -> Reflection {
    let text = if input.text.trim().is_empty() {
        existing.text().to_string()
    } else {
        input.text.clone()
    };

    Reflection::Structured(StructuredReflection {
        rule_followed: input.rule_followed.or(existing.rule_followed()),
        text,
        updated_at: Some(Utc::now()),
    })
}

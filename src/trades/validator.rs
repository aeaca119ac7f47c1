use chrono::NaiveDateTime;
use serde_json::Value;

use crate::error::{JournalError, JournalResult};
use crate::models::Direction;
use crate::trades::calculator::{self, HoldingTime};
use crate::trades::exit::ExitRequest;
use crate::trades::normalize::{coerce_f64, lot_alias};

pub const MIN_LOT: f64 = 0.01;
pub const MAX_LOT: f64 = 100.0;

/// Every problem found in one pass; `valid` is true when `errors` is empty.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<String>,
}

impl ValidationReport {
    pub fn from_errors(errors: Vec<String>) -> Self {
        Self {
            valid: errors.is_empty(),
            errors,
        }
    }

    pub fn into_result(self) -> JournalResult<()> {
        if self.valid {
            Ok(())
        } else {
            Err(JournalError::Validation(self.errors))
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExitTimeCheck {
    pub valid: bool,
    pub message: String,
    pub holding_time: Option<HoldingTime>,
}

/// Stop must sit below the entry and target above it for a long; the
/// reverse for a short.
pub fn validate_price_logic(
    direction: Direction,
    entry_price: f64,
    stop_loss: f64,
    take_profit: f64,
) -> Vec<String> {
    let mut errors = Vec::new();

    if !entry_price.is_finite() || !stop_loss.is_finite() || !take_profit.is_finite() {
        errors.push("Prices must be numbers".to_string());
        return errors;
    }

    match direction {
        Direction::Long => {
            if entry_price <= stop_loss {
                errors.push("For a long trade the stop loss must be below the entry price".to_string());
            }
            if entry_price >= take_profit {
                errors.push("For a long trade the take profit must be above the entry price".to_string());
            }
        }
        Direction::Short => {
            if entry_price >= stop_loss {
                errors.push("For a short trade the stop loss must be above the entry price".to_string());
            }
            if entry_price <= take_profit {
                errors.push("For a short trade the take profit must be below the entry price".to_string());
            }
        }
    }

    errors
}

pub fn validate_exit_date_time(
    entry_time: Option<NaiveDateTime>,
    exit_time: Option<NaiveDateTime>,
) -> ExitTimeCheck {
    let (Some(entry), Some(exit)) = (entry_time, exit_time) else {
        return ExitTimeCheck {
            valid: false,
            message: "Entry and exit times are required".to_string(),
            holding_time: None,
        };
    };

    if exit <= entry {
        return ExitTimeCheck {
            valid: false,
            message: format!(
                "Exit time must be after the entry time (entry {}, exit {})",
                entry.format("%Y/%m/%d %H:%M"),
                exit.format("%Y/%m/%d %H:%M")
            ),
            holding_time: None,
        };
    }

    ExitTimeCheck {
        valid: true,
        message: String::new(),
        holding_time: Some(calculator::holding_time(entry, exit)),
    }
}

/// Strict check of a new trade submission, run before normalization so
/// that values normalization would silently default are reported.
pub fn validate_trade(input: &Value) -> ValidationReport {
    let mut errors = Vec::new();
    let field = |key: &str| input.get(key);

    let pair = field("pair")
        .or_else(|| field("symbol"))
        .and_then(Value::as_str)
        .unwrap_or("");
    if pair.trim().is_empty() {
        errors.push("Currency pair is required".to_string());
    }

    let direction = field("direction")
        .and_then(Value::as_str)
        .and_then(Direction::parse);
    if direction.is_none() {
        errors.push("Direction must be long or short".to_string());
    }

    let entry_price = field("entryPrice").and_then(coerce_f64).unwrap_or(0.0);
    if entry_price <= 0.0 {
        errors.push("Entry price must be greater than 0".to_string());
    }

    let lot = input.as_object().and_then(lot_alias).unwrap_or(0.0);
    if lot <= 0.0 {
        errors.push("Lot size must be greater than 0".to_string());
    } else if lot < MIN_LOT {
        errors.push(format!("Lot size must be at least {}", MIN_LOT));
    } else if lot > MAX_LOT {
        errors.push(format!("Lot size must be at most {}", MAX_LOT));
    }

    let stop_loss = field("stopLoss").and_then(coerce_f64).unwrap_or(0.0);
    let take_profit = field("takeProfit").and_then(coerce_f64).unwrap_or(0.0);
    if stop_loss != 0.0 && take_profit != 0.0 {
        if let Some(direction) = direction {
            errors.extend(validate_price_logic(direction, entry_price, stop_loss, take_profit));
        }
    }

    ValidationReport::from_errors(errors)
}

/// Exit price and lot must both be positive. The entry price and direction
/// are accepted for symmetry with the trade check but do not constrain the
/// exit price: losing exits are legitimate.
pub fn validate_exit(exit: &ExitRequest, _entry_price: f64, _direction: Direction) -> ValidationReport {
    let mut errors = Vec::new();

    if !exit.price.is_finite() || exit.price <= 0.0 {
        errors.push("Exit price must be greater than 0".to_string());
    }
    if !exit.lot.is_finite() || exit.lot <= 0.0 {
        errors.push("Exit lot must be greater than 0".to_string());
    }

    ValidationReport::from_errors(errors)
}

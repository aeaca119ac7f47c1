//! Pure pip, risk/reward and holding-time arithmetic.
//!
//! Nothing here fails: non-finite input yields 0 (or [`HoldingTime::Invalid`])
//! so these can be called from display code without error handling.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::models::{Direction, Trade};
use crate::trades::normalize::quote_currency;

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

/// Price-to-pip multiplier: 100 for JPY-quoted pairs, 10000 otherwise.
pub fn pip_multiplier(pair: &str) -> f64 {
    if quote_currency(pair).as_deref() == Some("JPY") {
        100.0
    } else {
        10_000.0
    }
}

/// Signed pips between entry and exit, rounded to 1 decimal.
pub fn pips(pair: &str, direction: Direction, entry_price: f64, exit_price: f64) -> f64 {
    if !entry_price.is_finite() || !exit_price.is_finite() {
        return 0.0;
    }
    let raw = (exit_price - entry_price) * direction.sign() * pip_multiplier(pair);
    round_to(raw, 1)
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct RiskReward {
    pub risk: f64,
    pub reward: f64,
    pub ratio: f64,
}

/// Planned risk/reward from entry, stop and target.
///
/// Distances are taken as absolute values, so an inverted stop or target
/// still yields a positive ratio; [`crate::trades::validator::validate_price_logic`]
/// is the check that rejects that configuration.
pub fn risk_reward(
    entry_price: f64,
    stop_loss: f64,
    take_profit: f64,
    direction: Direction,
) -> RiskReward {
    if !entry_price.is_finite() || !stop_loss.is_finite() || !take_profit.is_finite() {
        return RiskReward::default();
    }

    let (risk, reward) = match direction {
        Direction::Long => ((entry_price - stop_loss).abs(), (take_profit - entry_price).abs()),
        Direction::Short => ((stop_loss - entry_price).abs(), (entry_price - take_profit).abs()),
    };
    let ratio = if risk > 0.0 { reward / risk } else { 0.0 };

    RiskReward {
        risk: round_to(risk, 5),
        reward: round_to(reward, 5),
        ratio: round_to(ratio, 2),
    }
}

/// Planned RR at entry; 0 when stop or target is unset.
pub fn initial_rr(trade: &Trade) -> f64 {
    if trade.stop_loss == 0.0 || trade.take_profit == 0.0 {
        return 0.0;
    }
    risk_reward(trade.entry_price, trade.stop_loss, trade.take_profit, trade.direction).ratio
}

/// Lot-weighted average of the pips frozen into each exit.
pub fn trade_pips(trade: &Trade) -> f64 {
    let (weighted, total_lot) = trade
        .exits
        .iter()
        .filter(|e| e.lot.is_finite() && e.pips.is_finite())
        .fold((0.0, 0.0), |(w, l), e| (w + e.pips * e.lot, l + e.lot));

    if total_lot == 0.0 {
        return 0.0;
    }
    round_to(weighted / total_lot, 1)
}

/// Lot-weighted average exit price, `None` without exits.
pub fn average_exit_price(trade: &Trade) -> Option<f64> {
    let (weighted, total_lot) = trade
        .exits
        .iter()
        .fold((0.0, 0.0), |(w, l), e| (w + e.price * e.lot, l + e.lot));

    if total_lot == 0.0 || !weighted.is_finite() {
        return None;
    }
    Some(weighted / total_lot)
}

/// Realized RR of the whole trade from its average exit price.
/// 0 when the stop sits on the wrong side of the entry.
pub fn trade_rr(trade: &Trade) -> f64 {
    let Some(avg_exit) = average_exit_price(trade) else {
        return 0.0;
    };

    let sign = trade.direction.sign();
    let reward = (avg_exit - trade.entry_price) * sign;
    let risk = (trade.entry_price - trade.stop_loss) * sign;

    if risk <= 0.0 || !risk.is_finite() {
        return 0.0;
    }
    round_to(reward / risk, 2)
}

/// Lot still open; 0 for a missing trade.
pub fn remaining_lot(trade: Option<&Trade>) -> f64 {
    match trade {
        Some(trade) => (trade.lot_size - trade.exited_lot()).max(0.0),
        None => 0.0,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HoldingTime {
    Duration { days: i64, hours: i64, minutes: i64 },
    /// Exit before entry. An exit at the entry time is a zero duration.
    Invalid,
}

impl HoldingTime {
    pub fn is_valid(&self) -> bool {
        matches!(self, HoldingTime::Duration { .. })
    }
}

impl fmt::Display for HoldingTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            HoldingTime::Invalid => f.write_str("invalid"),
            HoldingTime::Duration { days, hours, minutes } if days > 0 => {
                write!(f, "{}d {}h {}m", days, hours, minutes)
            }
            HoldingTime::Duration { hours, minutes, .. } if hours > 0 => {
                write!(f, "{}h {}m", hours, minutes)
            }
            HoldingTime::Duration { minutes, .. } => write!(f, "{}m", minutes),
        }
    }
}

pub fn holding_time(entry_time: NaiveDateTime, exit_time: NaiveDateTime) -> HoldingTime {
    if exit_time < entry_time {
        return HoldingTime::Invalid;
    }
    let total_minutes = (exit_time - entry_time).num_minutes();

    HoldingTime::Duration {
        days: total_minutes / (24 * 60),
        hours: (total_minutes % (24 * 60)) / 60,
        minutes: total_minutes % 60,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Exit;
    use crate::trades::normalize::normalize_trade;
    use chrono::NaiveDate;
    use serde_json::json;

    fn at(day: u32, hour: u32, minute: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, day)
            .unwrap()
            .and_hms_opt(hour, minute, 0)
            .unwrap()
    }

    fn usdjpy_long() -> Trade {
        normalize_trade(&json!({
            "pair": "USD/JPY",
            "direction": "long",
            "entryTime": "2024-01-01T09:00",
            "entryPrice": 150.0,
            "stopLoss": 149.5,
            "takeProfit": 151.0,
            "lotSize": 1.0
        }))
    }

    #[test]
    fn test_jpy_pips_round_trip() {
        assert_eq!(pips("USD/JPY", Direction::Long, 150.0, 150.5), 50.0);
        assert_eq!(pips("USD/JPY", Direction::Short, 150.0, 150.5), -50.0);
    }

    #[test]
    fn test_non_jpy_pips_use_four_decimals() {
        assert_eq!(pips("EUR/USD", Direction::Long, 1.1000, 1.1025), 25.0);
        // JPY as the base currency is not JPY-quoted
        assert_eq!(pip_multiplier("JPY/USD"), 10_000.0);
    }

    #[test]
    fn test_pip_symmetry() {
        let cases = [(150.123, 149.456), (1.08, 1.0912), (0.5, 0.5)];
        for (a, b) in cases {
            for pair in ["GBP/JPY", "AUD/USD"] {
                assert_eq!(
                    pips(pair, Direction::Long, a, b),
                    -pips(pair, Direction::Short, a, b)
                );
            }
        }
    }

    #[test]
    fn test_pips_non_finite_is_zero() {
        assert_eq!(pips("USD/JPY", Direction::Long, f64::NAN, 150.0), 0.0);
        assert_eq!(pips("USD/JPY", Direction::Long, 150.0, f64::INFINITY), 0.0);
    }

    #[test]
    fn test_risk_reward() {
        let rr = risk_reward(150.0, 149.5, 151.0, Direction::Long);
        assert_eq!(rr.risk, 0.5);
        assert_eq!(rr.reward, 1.0);
        assert_eq!(rr.ratio, 2.0);

        assert_eq!(risk_reward(150.0, 150.0, 151.0, Direction::Long).ratio, 0.0);
    }

    #[test]
    fn test_risk_reward_is_lenient_on_inverted_stop() {
        let rr = risk_reward(150.0, 150.5, 151.0, Direction::Long);
        assert!(rr.ratio > 0.0);
    }

    #[test]
    fn test_initial_rr_requires_stop_and_target() {
        let mut trade = usdjpy_long();
        assert_eq!(initial_rr(&trade), 2.0);
        trade.take_profit = 0.0;
        assert_eq!(initial_rr(&trade), 0.0);
    }

    #[test]
    fn test_weighted_trade_pips() {
        let mut trade = usdjpy_long();
        trade.exits = vec![
            Exit { time: at(1, 10, 0), price: 150.4, lot: 0.5, pips: 40.0 },
            Exit { time: at(1, 11, 0), price: 150.2, lot: 0.5, pips: 20.0 },
        ];
        assert_eq!(trade_pips(&trade), 30.0);
        assert_eq!(remaining_lot(Some(&trade)), 0.0);
    }

    #[test]
    fn test_trade_rr_uses_average_exit() {
        let mut trade = usdjpy_long();
        trade.exits = vec![
            Exit { time: at(1, 10, 0), price: 150.5, lot: 0.5, pips: 50.0 },
            Exit { time: at(1, 11, 0), price: 151.0, lot: 0.5, pips: 100.0 },
        ];
        // avg exit 150.75, reward 0.75 over risk 0.5
        assert_eq!(trade_rr(&trade), 1.5);

        trade.stop_loss = 150.5;
        assert_eq!(trade_rr(&trade), 0.0);
    }

    #[test]
    fn test_remaining_lot() {
        let mut trade = usdjpy_long();
        assert_eq!(remaining_lot(Some(&trade)), 1.0);
        trade.exits.push(Exit { time: at(1, 10, 0), price: 150.5, lot: 0.3, pips: 50.0 });
        assert!((remaining_lot(Some(&trade)) - 0.7).abs() < 1e-9);
        assert_eq!(remaining_lot(None), 0.0);
    }

    #[test]
    fn test_holding_time_formats() {
        assert_eq!(holding_time(at(1, 9, 0), at(2, 11, 3)).to_string(), "1d 2h 3m");
        assert_eq!(holding_time(at(1, 9, 0), at(1, 12, 15)).to_string(), "3h 15m");
        assert_eq!(holding_time(at(1, 9, 0), at(1, 9, 15)).to_string(), "15m");
        assert_eq!(holding_time(at(2, 9, 0), at(1, 9, 0)), HoldingTime::Invalid);
    }

    #[test]
    fn test_holding_time_at_entry_is_zero() {
        let held = holding_time(at(1, 9, 0), at(1, 9, 0));
        assert_eq!(held, HoldingTime::Duration { days: 0, hours: 0, minutes: 0 });
        assert_eq!(held.to_string(), "0m");
        assert!(!holding_time(at(1, 9, 1), at(1, 9, 0)).is_valid());
    }
}

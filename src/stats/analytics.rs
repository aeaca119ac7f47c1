//! Performance broken down by rule compliance, risk status and entry method.

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::events::{EventBus, JournalEvent};
use crate::models::{RiskStatus, RuleFollowed, Trade};
use crate::stats::summary::{settled_in, SummaryScope};
use crate::trades::calculator;

/// Method bucket for trades without a `methodId`.
pub const NO_METHOD: &str = "none";

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupStats {
    pub count: usize,
    pub wins: usize,
    pub losses: usize,
    pub total_pips: f64,
    pub total_yen: f64,
    /// Percent of decided trades (wins + losses), 1 decimal. `None` when
    /// every trade broke even.
    pub win_rate: Option<f64>,
    pub average_pips: Option<f64>,
    pub average_yen: Option<f64>,
}

impl GroupStats {
    fn record(&mut self, trade: &Trade) {
        let pips = calculator::trade_pips(trade);
        self.count += 1;
        self.total_pips += pips;
        self.total_yen += trade.yen_profit_loss.net_profit;
        if pips > 0.0 {
            self.wins += 1;
        } else if pips < 0.0 {
            self.losses += 1;
        }
    }

    fn finish(&mut self) {
        let decided = self.wins + self.losses;
        self.win_rate = (decided > 0)
            .then(|| (self.wins as f64 / decided as f64 * 1000.0).round() / 10.0);
        if self.count > 0 {
            let n = self.count as f64;
            self.average_pips = Some((self.total_pips / n * 10.0).round() / 10.0);
            self.average_yen = Some((self.total_yen / n).round());
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct RuleBreakdown {
    pub yes: GroupStats,
    pub no: GroupStats,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct RiskBreakdown {
    pub normal: GroupStats,
    pub warning: GroupStats,
    pub danger: GroupStats,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsReport {
    pub scope: SummaryScope,
    /// Only trades with a structured reflection that answered the question.
    pub rule_compliance: RuleBreakdown,
    /// Only trades with a risk status.
    pub risk: RiskBreakdown,
    pub methods: BTreeMap<String, GroupStats>,
}

pub struct AnalyticsEngine {
    events: Arc<EventBus>,
}

impl AnalyticsEngine {
    pub fn new(events: Arc<EventBus>) -> Self {
        Self { events }
    }

    pub fn analyze(&self, trades: &[Trade], scope: SummaryScope) -> AnalyticsReport {
        let mut report = AnalyticsReport {
            scope,
            rule_compliance: RuleBreakdown::default(),
            risk: RiskBreakdown::default(),
            methods: BTreeMap::new(),
        };

        for trade in settled_in(trades, scope) {
            match trade.reflection.rule_followed() {
                Some(RuleFollowed::Yes) => report.rule_compliance.yes.record(trade),
                Some(RuleFollowed::No) => report.rule_compliance.no.record(trade),
                None => {}
            }

            match trade.risk_status {
                Some(RiskStatus::Normal) => report.risk.normal.record(trade),
                Some(RiskStatus::Warning) => report.risk.warning.record(trade),
                Some(RiskStatus::Danger) => report.risk.danger.record(trade),
                None => {}
            }

            let method = trade.method_id.as_deref().unwrap_or(NO_METHOD);
            report.methods.entry(method.to_string()).or_default().record(trade);
        }

        for group in [
            &mut report.rule_compliance.yes,
            &mut report.rule_compliance.no,
            &mut report.risk.normal,
            &mut report.risk.warning,
            &mut report.risk.danger,
        ] {
            group.finish();
        }
        report.methods.values_mut().for_each(GroupStats::finish);

        log::debug!(
            "Analytics for {:?}: {} method group(s)",
            report.scope,
            report.methods.len()
        );
        self.events
            .emit(&JournalEvent::AnalyticsCalculated(report.clone()));
        report
    }
}

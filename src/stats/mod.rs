pub mod analytics;
pub mod summary;

pub use analytics::{AnalyticsEngine, AnalyticsReport, GroupStats};
pub use summary::{
    summarize, ExpenseStats, PeriodSummary, ProfitFactor, SummaryEngine, SummaryReport,
    SummaryScope, TradeStats, Trend,
};

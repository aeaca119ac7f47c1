use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Deductible cost categories. Serialized with the labels stored by the
/// journal UI so existing data loads unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ExpenseCategory {
    #[serde(rename = "通信費（ネット代）")]
    Internet,
    #[serde(rename = "VPS・クラウドサービス")]
    VpsCloud,
    #[serde(rename = "電気代（按分）")]
    Electricity,
    #[serde(rename = "家賃（按分）")]
    Rent,
    #[serde(rename = "PC・モニター")]
    Computer,
    #[serde(rename = "PC周辺機器")]
    Peripherals,
    #[serde(rename = "デスク・チェア")]
    Furniture,
    #[serde(rename = "事務用品")]
    OfficeSupplies,
    #[serde(rename = "書籍・教材費")]
    Books,
    #[serde(rename = "セミナー参加費")]
    Seminars,
    #[serde(rename = "オンラインサロン")]
    OnlineSalon,
    #[serde(rename = "情報配信サービス")]
    Subscriptions,
    #[serde(rename = "新聞・雑誌")]
    Newspapers,
    #[serde(rename = "取引ツール")]
    TradingTools,
    #[serde(rename = "EA・インジケーター")]
    Indicators,
    #[serde(rename = "セキュリティソフト")]
    SecuritySoftware,
    #[serde(rename = "取引手数料")]
    TradingFees,
    #[serde(rename = "振込手数料")]
    TransferFees,
    #[serde(rename = "税理士報酬")]
    AccountantFees,
    #[serde(rename = "交通費")]
    Transportation,
    #[serde(rename = "会議費")]
    Meetings,
    #[serde(rename = "その他")]
    Other,
}

impl ExpenseCategory {
    pub const ALL: [ExpenseCategory; 22] = [
        ExpenseCategory::Internet,
        ExpenseCategory::VpsCloud,
        ExpenseCategory::Electricity,
        ExpenseCategory::Rent,
        ExpenseCategory::Computer,
        ExpenseCategory::Peripherals,
        ExpenseCategory::Furniture,
        ExpenseCategory::OfficeSupplies,
        ExpenseCategory::Books,
        ExpenseCategory::Seminars,
        ExpenseCategory::OnlineSalon,
        ExpenseCategory::Subscriptions,
        ExpenseCategory::Newspapers,
        ExpenseCategory::TradingTools,
        ExpenseCategory::Indicators,
        ExpenseCategory::SecuritySoftware,
        ExpenseCategory::TradingFees,
        ExpenseCategory::TransferFees,
        ExpenseCategory::AccountantFees,
        ExpenseCategory::Transportation,
        ExpenseCategory::Meetings,
        ExpenseCategory::Other,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            ExpenseCategory::Internet => "通信費（ネット代）",
            ExpenseCategory::VpsCloud => "VPS・クラウドサービス",
            ExpenseCategory::Electricity => "電気代（按分）",
            ExpenseCategory::Rent => "家賃（按分）",
            ExpenseCategory::Computer => "PC・モニター",
            ExpenseCategory::Peripherals => "PC周辺機器",
            ExpenseCategory::Furniture => "デスク・チェア",
            ExpenseCategory::OfficeSupplies => "事務用品",
            ExpenseCategory::Books => "書籍・教材費",
            ExpenseCategory::Seminars => "セミナー参加費",
            ExpenseCategory::OnlineSalon => "オンラインサロン",
            ExpenseCategory::Subscriptions => "情報配信サービス",
            ExpenseCategory::Newspapers => "新聞・雑誌",
            ExpenseCategory::TradingTools => "取引ツール",
            ExpenseCategory::Indicators => "EA・インジケーター",
            ExpenseCategory::SecuritySoftware => "セキュリティソフト",
            ExpenseCategory::TradingFees => "取引手数料",
            ExpenseCategory::TransferFees => "振込手数料",
            ExpenseCategory::AccountantFees => "税理士報酬",
            ExpenseCategory::Transportation => "交通費",
            ExpenseCategory::Meetings => "会議費",
            ExpenseCategory::Other => "その他",
        }
    }
}

impl fmt::Display for ExpenseCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for ExpenseCategory {
    type Err = String;

    /// Accepts the stored label or the variant name in any case.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        ExpenseCategory::ALL
            .iter()
            .find(|c| c.label() == s || format!("{:?}", c).eq_ignore_ascii_case(s))
            .copied()
            .ok_or_else(|| s.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Expense {
    pub id: String,
    pub date: NaiveDate,
    pub category: ExpenseCategory,
    pub amount: f64,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub memo: String,
    pub tax_year: i32,
    pub created_at: DateTime<Utc>,
}

/// Tax year a date belongs to when the fiscal year starts in
/// `fiscal_start_month`. Months before it roll into the previous year.
pub fn tax_year_for(date: NaiveDate, fiscal_start_month: u32) -> i32 {
    if date.month() < fiscal_start_month {
        date.year() - 1
    } else {
        date.year()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_round_trips_through_label() {
        for category in ExpenseCategory::ALL {
            let json = serde_json::to_string(&category).unwrap();
            let back: ExpenseCategory = serde_json::from_str(&json).unwrap();
            assert_eq!(back, category);
            assert_eq!(category.label().parse::<ExpenseCategory>().unwrap(), category);
        }
        assert_eq!("tradingfees".parse::<ExpenseCategory>().unwrap(), ExpenseCategory::TradingFees);
        assert!("snacks".parse::<ExpenseCategory>().is_err());
    }

    #[test]
    fn test_tax_year_rolls_back_january_to_march() {
        let march = NaiveDate::from_ymd_opt(2024, 3, 31).unwrap();
        let april = NaiveDate::from_ymd_opt(2024, 4, 1).unwrap();
        assert_eq!(tax_year_for(march, 4), 2023);
        assert_eq!(tax_year_for(april, 4), 2024);
        assert_eq!(tax_year_for(march, 1), 2024);
    }
}

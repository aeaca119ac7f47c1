use chrono::{Datelike, NaiveDate, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::db::store::{load_records, save_json, KeyValueStore, EXPENSES_KEY};
use crate::error::{JournalError, JournalResult};
use crate::events::{EventBus, JournalEvent};
use crate::models::{tax_year_for, Expense, ExpenseCategory};
use crate::sync::{CloudSync, DataKind};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewExpense {
    pub date: NaiveDate,
    /// Japanese label or variant name, e.g. `通信費` or `Internet`.
    pub category: String,
    pub amount: f64,
    pub description: String,
    pub memo: String,
}

/// Narrowing for [`ExpenseLedger::filter`]; `None` fields match everything.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ExpenseFilter {
    pub year: Option<i32>,
    pub month: Option<u32>,
    pub category: Option<ExpenseCategory>,
}

pub struct ExpenseLedger {
    expenses: Vec<Expense>,
    backend: Arc<dyn KeyValueStore>,
    events: Arc<EventBus>,
    sync: Option<CloudSync>,
    fiscal_start_month: u32,
}

impl ExpenseLedger {
    pub fn load(
        backend: Arc<dyn KeyValueStore>,
        events: Arc<EventBus>,
        fiscal_start_month: u32,
    ) -> Self {
        let expenses: Vec<Expense> = load_records(backend.as_ref(), EXPENSES_KEY);
        log::info!("Loaded {} expenses", expenses.len());

        Self {
            expenses,
            backend,
            events,
            sync: None,
            fiscal_start_month,
        }
    }

    pub fn with_sync(mut self, sync: CloudSync) -> Self {
        self.sync = Some(sync);
        self
    }

    pub fn expenses(&self) -> &[Expense] {
        &self.expenses
    }

    pub fn add(&mut self, input: NewExpense) -> JournalResult<Expense> {
        if !input.amount.is_finite() || input.amount <= 0.0 {
            return Err(JournalError::InvalidAmount(input.amount));
        }
        let category: ExpenseCategory = input
            .category
            .parse()
            .map_err(JournalError::UnknownCategory)?;

        let expense = Expense {
            id: format!("EXP-{}-{}", Utc::now().timestamp_millis(), Uuid::new_v4().simple()),
            date: input.date,
            category,
            amount: input.amount,
            description: input.description,
            memo: input.memo,
            tax_year: tax_year_for(input.date, self.fiscal_start_month),
            created_at: Utc::now(),
        };

        self.expenses.push(expense.clone());
        if let Err(e) = self.persist() {
            self.expenses.pop();
            return Err(e);
        }

        log::debug!("Added expense {} ({}, {})", expense.id, category, expense.amount);
        if let Some(sync) = &self.sync {
            match serde_json::to_value(&expense) {
                Ok(payload) => sync.push_save(DataKind::Expense, &expense.id, payload),
                Err(e) => log::warn!("Could not serialize expense {} for sync: {}", expense.id, e),
            }
        }
        self.events.emit(&JournalEvent::ExpenseAdded(expense.clone()));
        Ok(expense)
    }

    pub fn delete(&mut self, id: &str) -> JournalResult<bool> {
        let Some(index) = self.expenses.iter().position(|e| e.id == id) else {
            return Ok(false);
        };

        let removed = self.expenses.remove(index);
        if let Err(e) = self.persist() {
            self.expenses.insert(index, removed);
            return Err(e);
        }

        if let Some(sync) = &self.sync {
            sync.push_delete(DataKind::Expense, id);
        }
        self.events
            .emit(&JournalEvent::ExpenseDeleted { id: id.to_string() });
        Ok(true)
    }

    pub fn by_tax_year(&self, tax_year: i32) -> Vec<&Expense> {
        self.expenses.iter().filter(|e| e.tax_year == tax_year).collect()
    }

    /// Per-category totals for a tax year.
    pub fn category_totals(&self, tax_year: i32) -> BTreeMap<ExpenseCategory, f64> {
        let mut totals = BTreeMap::new();
        for expense in self.by_tax_year(tax_year) {
            *totals.entry(expense.category).or_default() += expense.amount;
        }
        totals
    }

    /// Totals per calendar month (1-12) of a calendar year; months without
    /// expenses are present with 0.
    pub fn monthly_totals(&self, year: i32) -> BTreeMap<u32, f64> {
        let mut totals: BTreeMap<u32, f64> = (1..=12).map(|m| (m, 0.0)).collect();
        for expense in self.expenses.iter().filter(|e| e.date.year() == year) {
            *totals.entry(expense.date.month()).or_default() += expense.amount;
        }
        totals
    }

    /// Matching expenses, newest first. `year` and `month` are calendar based.
    pub fn filter(&self, filter: ExpenseFilter) -> Vec<&Expense> {
        let mut matched: Vec<&Expense> = self
            .expenses
            .iter()
            .filter(|e| filter.year.is_none_or(|y| e.date.year() == y))
            .filter(|e| filter.month.is_none_or(|m| e.date.month() == m))
            .filter(|e| filter.category.is_none_or(|c| e.category == c))
            .collect();
        matched.sort_by(|a, b| b.date.cmp(&a.date));
        matched
    }

    pub(crate) fn replace_all(&mut self, expenses: Vec<Expense>) -> JournalResult<()> {
        let previous = std::mem::replace(&mut self.expenses, expenses);
        if let Err(e) = self.persist() {
            self.expenses = previous;
            return Err(e);
        }
        Ok(())
    }

    fn persist(&self) -> JournalResult<()> {
        save_json(self.backend.as_ref(), EXPENSES_KEY, &self.expenses).map_err(|e| {
            log::error!("Failed to persist expenses: {}", e);
            JournalError::from(e)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn new_expense(date: NaiveDate, category: &str, amount: f64) -> NewExpense {
        NewExpense {
            date,
            category: category.to_string(),
            amount,
            ..Default::default()
        }
    }

    fn ledger() -> ExpenseLedger {
        let db = Arc::new(Database::open_in_memory().unwrap());
        ExpenseLedger::load(db, EventBus::new(), 4)
    }

    #[test]
    fn test_add_assigns_fiscal_tax_year() {
        let mut ledger = ledger();
        let march = ledger.add(new_expense(date(2024, 3, 10), "Internet", 5_000.0)).unwrap();
        let april = ledger
            .add(new_expense(date(2024, 4, 10), ExpenseCategory::Books.label(), 2_000.0))
            .unwrap();

        assert_eq!(march.tax_year, 2023);
        assert_eq!(april.tax_year, 2024);
        assert_eq!(april.category, ExpenseCategory::Books);
        assert_eq!(ledger.by_tax_year(2023).len(), 1);
    }

    #[test]
    fn test_rejects_bad_input() {
        let mut ledger = ledger();
        assert!(matches!(
            ledger.add(new_expense(date(2024, 5, 1), "Internet", 0.0)),
            Err(JournalError::InvalidAmount(_))
        ));
        assert!(matches!(
            ledger.add(new_expense(date(2024, 5, 1), "snacks", 100.0)),
            Err(JournalError::UnknownCategory(_))
        ));
        assert!(ledger.expenses().is_empty());
    }

    #[test]
    fn test_totals_and_filter() {
        let mut ledger = ledger();
        ledger.add(new_expense(date(2024, 5, 1), "Internet", 5_000.0)).unwrap();
        ledger.add(new_expense(date(2024, 5, 20), "Internet", 5_000.0)).unwrap();
        ledger.add(new_expense(date(2024, 6, 3), "Books", 1_500.0)).unwrap();

        let by_category = ledger.category_totals(2024);
        assert_eq!(by_category[&ExpenseCategory::Internet], 10_000.0);
        assert_eq!(by_category[&ExpenseCategory::Books], 1_500.0);

        let monthly = ledger.monthly_totals(2024);
        assert_eq!(monthly.len(), 12);
        assert_eq!(monthly[&5], 10_000.0);
        assert_eq!(monthly[&1], 0.0);

        let may_internet = ledger.filter(ExpenseFilter {
            year: Some(2024),
            month: Some(5),
            category: Some(ExpenseCategory::Internet),
        });
        assert_eq!(may_internet.len(), 2);
        assert_eq!(may_internet[0].date, date(2024, 5, 20));
        assert_eq!(ledger.filter(ExpenseFilter::default()).len(), 3);
    }

    #[test]
    fn test_delete_and_reload() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let mut ledger = ExpenseLedger::load(db.clone(), EventBus::new(), 4);
        let kept = ledger.add(new_expense(date(2024, 5, 1), "Rent", 80_000.0)).unwrap();
        let gone = ledger.add(new_expense(date(2024, 5, 2), "Other", 300.0)).unwrap();

        assert!(ledger.delete(&gone.id).unwrap());
        assert!(!ledger.delete(&gone.id).unwrap());

        let reloaded = ExpenseLedger::load(db, EventBus::new(), 4);
        assert_eq!(reloaded.expenses(), &[kept]);
    }
}

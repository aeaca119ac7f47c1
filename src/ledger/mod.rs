pub mod capital;
pub mod closing;
pub mod expenses;

pub use capital::CapitalLedger;
pub use closing::ClosingLedger;
pub use expenses::{ExpenseFilter, ExpenseLedger, NewExpense};

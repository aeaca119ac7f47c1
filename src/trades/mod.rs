pub mod calculator;
pub mod exit;
pub mod normalize;
pub mod store;
pub mod validator;

pub use exit::{record_exits, ExitOutcome, ExitRequest, ExitSubmission, ReflectionInput};
pub use store::{BulkAddOutcome, RecordError, TradeStore};

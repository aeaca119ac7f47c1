pub mod convert;
pub mod manager;

pub use convert::{convert_pips_to_yen, format_yen, pip_value};
pub use manager::{YenExport, YenImportResult, YenInput, YenProfitLossManager, YenProfitLossRecord, YenTotals};

pub mod capital;
pub mod closing;
pub mod expense;
pub mod settings;
pub mod trade;

pub use capital::*;
pub use closing::*;
pub use expense::*;
pub use settings::*;
pub use trade::*;

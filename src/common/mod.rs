pub mod config;
pub mod error;
pub mod types;

pub use config::*;
pub use error::{AbortReason, Result, StrataError};
pub use types::*;

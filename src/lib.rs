pub mod adapters;
pub mod config;
pub mod core;
pub mod domain;
pub mod utils;

#[cfg(feature = "cli")]
pub use config::CliArgs;
pub use config::TransferConfig;

pub use adapters::{CsvLedgerStore, HttpSourceApi, HttpTargetApi};
pub use core::{Disposition, RunReport, TransferEngine, TransferLedger};
pub use utils::error::{Result, TransferError};

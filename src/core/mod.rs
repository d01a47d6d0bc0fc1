pub mod binder;
pub mod discovery;
pub mod engine;
pub mod extractor;
pub mod ledger;
pub mod price;
pub mod router;
pub mod saga;
pub mod state;
pub mod text;

pub use engine::{EngineSettings, TransferEngine};
pub use ledger::TransferLedger;
pub use state::{Disposition, RequestOutcome, RequestReport, RunReport, TransferState};

// 外部系統的具體實作：Source/Target 的 HTTP 用戶端、CSV 轉移紀錄與記憶體版本

mod http_client;
pub mod http_source;
pub mod http_target;
pub mod ledger_file;
pub mod memory;

pub use http_source::HttpSourceApi;
pub use http_target::HttpTargetApi;
pub use ledger_file::CsvLedgerStore;
pub use memory::{InjectedFailure, MemoryLedgerStore, MemorySource, MemoryTarget};

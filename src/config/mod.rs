#[cfg(feature = "cli")]
pub mod cli;
pub mod toml_config;

#[cfg(feature = "cli")]
pub use cli::CliArgs;
pub use toml_config::{
    EndpointConfig, ExtractionConfig, LedgerConfig, PricingConfig, RouteRule, RoutingConfig,
    RuntimeConfig, TransferConfig,
};

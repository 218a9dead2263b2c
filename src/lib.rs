pub mod batch;
pub mod config;
pub mod executor;
pub mod export;
pub mod harvest;
pub mod http;
pub mod logging;
pub mod model;
pub mod server;
pub mod store;
pub mod traits;

// Re-export common types for convenience
pub use executor::*;
pub use model::*;
pub use traits::*;

pub use config::{ConfigError, HarvesterConfig};
pub use export::{ExportDocument, Exporter};
pub use harvest::{HarvestOrchestrator, HarvestResult, SourcePrecedence};

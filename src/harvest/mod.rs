//! Harvest module - metadata collection and merge pipeline.
//!
//! This module provides the core of the harvester:
//! - **Sources**: [`sources::SelfHostedExtractor`] and the registry harvesters
//! - **Formats**: JSON-LD normalization, HTML, signposting and XML parsing
//! - **Merge**: precedence table and provenance-aware merge via [`merge`]
//! - **Pipeline**: the orchestrator via [`pipeline::HarvestOrchestrator`]

pub mod formats;
pub mod hostname;
pub mod merge;
pub mod pipeline;
pub mod sources;
pub mod traits;

// Re-export commonly used types
pub use traits::{FetchError, FetchedDocument, HttpFetcher};

pub use merge::{merge_partials, SourcePrecedence};

pub use pipeline::{
    HarvestOrchestrator, HarvestResult, HarvestState, HarvestStats, OutcomeStatus, SourceOutcome,
};

use crate::harvest::traits::FetchError;
use crate::model::{PartialRecord, SourceKind};
use async_trait::async_trait;
use thiserror::Error;
use url::Url;

/// Why a source contributed nothing to a harvest.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SourceFailure {
    #[error("Source unreachable: {0}")]
    Unreachable(String),
    #[error("No matching record: {0}")]
    Empty(String),
    #[error("Malformed document: {0}")]
    Malformed(String),
    #[error("Authentication failed: {0}")]
    Auth(String),
    #[error("Timed out after {0}s")]
    Timeout(u64),
}

impl SourceFailure {
    /// Short failure class used in logs and outcome reports.
    pub fn class(&self) -> &'static str {
        match self {
            SourceFailure::Unreachable(_) => "source-unreachable",
            SourceFailure::Empty(_) => "source-empty",
            SourceFailure::Malformed(_) => "malformed-input",
            SourceFailure::Auth(_) => "auth-failure",
            SourceFailure::Timeout(_) => "timeout",
        }
    }
}

impl From<FetchError> for SourceFailure {
    fn from(err: FetchError) -> Self {
        match &err {
            FetchError::Status { status, .. } if *status == 401 || *status == 403 => {
                SourceFailure::Auth(err.to_string())
            }
            FetchError::Status { status: 404, .. } => SourceFailure::Empty(err.to_string()),
            FetchError::InvalidUrl(_) => SourceFailure::Malformed(err.to_string()),
            _ => SourceFailure::Unreachable(err.to_string()),
        }
    }
}

/// The repository a harvest is about, plus any registry identifiers the
/// caller already knows.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HarvestTarget {
    pub url: String,
    pub fairsharing_id: Option<String>,
    pub re3data_id: Option<String>,
}

impl HarvestTarget {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn with_fairsharing_id(mut self, id: Option<String>) -> Self {
        self.fairsharing_id = id.filter(|id| !id.trim().is_empty());
        self
    }

    pub fn with_re3data_id(mut self, id: Option<String>) -> Self {
        self.re3data_id = id.filter(|id| !id.trim().is_empty());
        self
    }

    /// Lowercased hostname of the repository URL.
    pub fn hostname(&self) -> Option<String> {
        Url::parse(&self.url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_ascii_lowercase))
    }
}

#[async_trait]
pub trait MetadataSource: Send + Sync {
    /// Returns the source this harvester represents.
    fn kind(&self) -> SourceKind;

    /// Produces this source's partial record for the target repository.
    async fn harvest(&self, target: &HarvestTarget) -> Result<PartialRecord, SourceFailure>;
}

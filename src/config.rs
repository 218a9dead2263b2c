//! Configuration loading for the harvester.
//!
//! Reads an optional `.env` file, then environment variables, producing a
//! typed [`HarvesterConfig`]. Parsing goes through a lookup closure so the
//! same code serves the process environment and tests.

use std::env;
use std::fmt;
use std::io::ErrorKind;
use std::net::{AddrParseError, SocketAddr};
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::export::DEFAULT_GRAPH_SCHEME;
use crate::harvest::merge::SourcePrecedence;
use crate::harvest::pipeline::HarvestOrchestrator;
use crate::harvest::sources::{
    FairSharingCredentials, FairSharingHarvester, Re3DataHarvester, SelfHostedExtractor,
    DEFAULT_FAIRSHARING_API, DEFAULT_MAX_CANDIDATES, DEFAULT_RE3DATA_API,
};
use crate::harvest::traits::HttpFetcher;
use crate::http::DEFAULT_USER_AGENT;
use crate::traits::MetadataSource;

pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8080";
pub const DEFAULT_LOG_LEVEL: &str = "info";
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_SOURCE_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_BATCH_CONCURRENCY: usize = 4;

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pretty" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            other => Err(other.to_string()),
        }
    }
}

/// Write endpoint of an RDF graph store.
#[derive(Clone)]
pub struct GraphStoreConfig {
    pub url: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl fmt::Debug for GraphStoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GraphStoreConfig")
            .field("url", &self.url)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .finish()
    }
}

/// Harvester configuration.
#[derive(Debug, Clone)]
pub struct HarvesterConfig {
    pub bind_addr: SocketAddr,
    pub log_level: String,
    pub log_format: LogFormat,
    pub user_agent: String,
    /// Timeout of each outbound HTTP request
    pub http_timeout: Duration,
    /// Budget of each source call within a harvest
    pub source_timeout: Duration,
    pub concurrent_sources: bool,
    pub precedence: SourcePrecedence,
    pub batch_concurrency: usize,
    pub graph_scheme: String,
    pub re3data_api_base: String,
    pub re3data_max_candidates: usize,
    pub fairsharing_api_base: String,
    pub fairsharing_credentials: Option<FairSharingCredentials>,
    pub graph_store: Option<GraphStoreConfig>,
}

impl Default for HarvesterConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            log_format: LogFormat::default(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            http_timeout: Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS),
            source_timeout: Duration::from_secs(DEFAULT_SOURCE_TIMEOUT_SECS),
            concurrent_sources: true,
            precedence: SourcePrecedence::default(),
            batch_concurrency: DEFAULT_BATCH_CONCURRENCY,
            graph_scheme: DEFAULT_GRAPH_SCHEME.to_string(),
            re3data_api_base: DEFAULT_RE3DATA_API.to_string(),
            re3data_max_candidates: DEFAULT_MAX_CANDIDATES,
            fairsharing_api_base: DEFAULT_FAIRSHARING_API.to_string(),
            fairsharing_credentials: None,
            graph_store: None,
        }
    }
}

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read env file {path}: {source}")]
    EnvFile {
        path: String,
        #[source]
        source: dotenvy::Error,
    },
    #[error("invalid bind address '{value}': {source}")]
    InvalidBindAddr {
        value: String,
        #[source]
        source: AddrParseError,
    },
    #[error("{key} must be a positive integer, got '{value}'")]
    InvalidNumber { key: &'static str, value: String },
    #[error("{key} must be true or false, got '{value}'")]
    InvalidBool { key: &'static str, value: String },
    #[error("HARVESTER_LOG_FORMAT must be 'pretty' or 'json', got '{0}'")]
    InvalidLogFormat(String),
    #[error("invalid HARVESTER_SOURCE_ORDER: {0}")]
    InvalidSourceOrder(String),
}

impl HarvesterConfig {
    /// Loads `.env` from the working directory, if present, then reads the
    /// process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the `.env` file is unreadable or a value
    /// does not parse.
    pub fn load() -> Result<Self, ConfigError> {
        load_env_file(Path::new(".env"))?;
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from `lookup`; unset or blank keys take
    /// their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let mut config = Self::default();

        if let Some(value) = get("HARVESTER_BIND_ADDR") {
            config.bind_addr = value
                .parse()
                .map_err(|source| ConfigError::InvalidBindAddr { value, source })?;
        }
        if let Some(value) = get("HARVESTER_LOG_LEVEL") {
            config.log_level = value;
        }
        if let Some(value) = get("HARVESTER_LOG_FORMAT") {
            config.log_format = value.parse().map_err(ConfigError::InvalidLogFormat)?;
        }
        if let Some(value) = get("HARVESTER_USER_AGENT") {
            config.user_agent = value;
        }
        if let Some(value) = get("HARVESTER_HTTP_TIMEOUT_SECS") {
            config.http_timeout = Duration::from_secs(positive("HARVESTER_HTTP_TIMEOUT_SECS", value)?);
        }
        if let Some(value) = get("HARVESTER_SOURCE_TIMEOUT_SECS") {
            config.source_timeout =
                Duration::from_secs(positive("HARVESTER_SOURCE_TIMEOUT_SECS", value)?);
        }
        if let Some(value) = get("HARVESTER_CONCURRENT_SOURCES") {
            config.concurrent_sources = boolean("HARVESTER_CONCURRENT_SOURCES", value)?;
        }
        if let Some(value) = get("HARVESTER_SOURCE_ORDER") {
            config.precedence = value.parse().map_err(ConfigError::InvalidSourceOrder)?;
        }
        if let Some(value) = get("HARVESTER_BATCH_CONCURRENCY") {
            config.batch_concurrency = positive("HARVESTER_BATCH_CONCURRENCY", value)? as usize;
        }
        if let Some(value) = get("HARVESTER_GRAPH_SCHEME") {
            config.graph_scheme = value;
        }
        if let Some(value) = get("RE3DATA_API_BASE") {
            config.re3data_api_base = value;
        }
        if let Some(value) = get("RE3DATA_MAX_CANDIDATES") {
            config.re3data_max_candidates = positive("RE3DATA_MAX_CANDIDATES", value)? as usize;
        }
        if let Some(value) = get("FAIRSHARING_API_BASE") {
            config.fairsharing_api_base = value;
        }
        if let (Some(username), Some(password)) =
            (get("FAIRSHARING_USERNAME"), get("FAIRSHARING_PASSWORD"))
        {
            config.fairsharing_credentials = Some(FairSharingCredentials { username, password });
        }
        if let Some(url) = get("GRAPH_STORE_URL") {
            config.graph_store = Some(GraphStoreConfig {
                url,
                username: get("GRAPH_STORE_USERNAME"),
                password: get("GRAPH_STORE_PASSWORD"),
            });
        }

        Ok(config)
    }

    /// Wires the three metadata sources onto `fetcher` and returns the
    /// orchestrator configured by `self`.
    pub fn orchestrator(&self, fetcher: Arc<dyn HttpFetcher>) -> HarvestOrchestrator {
        let sources: Vec<Arc<dyn MetadataSource>> = vec![
            Arc::new(SelfHostedExtractor::new(fetcher.clone())),
            Arc::new(Re3DataHarvester::new(
                fetcher.clone(),
                self.re3data_api_base.clone(),
                self.re3data_max_candidates,
            )),
            Arc::new(FairSharingHarvester::new(
                fetcher,
                self.fairsharing_api_base.clone(),
                self.fairsharing_credentials.clone(),
            )),
        ];
        HarvestOrchestrator::new(sources)
            .with_precedence(self.precedence.clone())
            .with_timeout(self.source_timeout)
            .with_concurrency(self.concurrent_sources)
    }
}

fn load_env_file(path: &Path) -> Result<(), ConfigError> {
    match dotenvy::from_path(path) {
        Ok(()) => Ok(()),
        Err(dotenvy::Error::Io(err)) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(source) => Err(ConfigError::EnvFile {
            path: path.display().to_string(),
            source,
        }),
    }
}

fn positive(key: &'static str, value: String) -> Result<u64, ConfigError> {
    match value.parse::<u64>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(ConfigError::InvalidNumber { key, value }),
    }
}

fn boolean(key: &'static str, value: String) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(ConfigError::InvalidBool { key, value }),
    }
}

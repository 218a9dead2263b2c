//! Core traits and types shared by the harvest sources.
//!
//! This module defines the outbound seam of the harvester:
//! - HTTP access via [`HttpFetcher`]
//! - Fetched responses via [`FetchedDocument`]
//! - Standardized transport errors via [`FetchError`]

use async_trait::async_trait;
use thiserror::Error;

// ============================================================================
// Fetch Trait
// ============================================================================

/// Outbound HTTP capability used by every source.
///
/// Implementations must follow redirects and enforce a request timeout.
/// Responses with a non-success status are returned as
/// [`FetchError::Status`] so callers can react to `401` and `404`.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`; one fetcher is shared by all
/// concurrent harvests.
#[async_trait]
pub trait HttpFetcher: Send + Sync {
    /// Performs a GET request with the given `Accept` header.
    async fn get(&self, url: &str, accept: &str) -> Result<FetchedDocument, FetchError>;

    /// POSTs a JSON body, optionally with a bearer token.
    async fn post_json(
        &self,
        url: &str,
        body: &serde_json::Value,
        bearer: Option<&str>,
    ) -> Result<FetchedDocument, FetchError>;
}

// ============================================================================
// Fetched Documents
// ============================================================================

/// A successfully fetched HTTP response.
#[derive(Debug, Clone, Default)]
pub struct FetchedDocument {
    /// Final URL after redirects
    pub url: String,

    /// HTTP status code
    pub status: u16,

    /// `Content-Type` header without parameters, lowercased
    pub content_type: Option<String>,

    /// Raw values of every `Link` header
    pub link_headers: Vec<String>,

    /// Response body as text
    pub body: String,
}

impl FetchedDocument {
    /// Whether the response declares a JSON or JSON-LD media type.
    pub fn is_json(&self) -> bool {
        self.content_type
            .as_deref()
            .map(|ct| ct.ends_with("json"))
            .unwrap_or(false)
    }

    /// Parses the body as JSON.
    pub fn json(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::from_str(&self.body)
    }
}

/// Strips parameters from a media type and lowercases it.
///
/// `"application/ld+json; charset=utf-8"` becomes `"application/ld+json"`.
pub fn essence(media_type: &str) -> String {
    media_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

// ============================================================================
// Error Types
// ============================================================================

/// Errors raised by an [`HttpFetcher`].
#[derive(Error, Debug)]
pub enum FetchError {
    /// Connection, DNS or body read failure
    #[error("Request to {url} failed: {message}")]
    Transport { url: String, message: String },

    /// The request exceeded the client timeout
    #[error("Request to {url} timed out")]
    Timeout { url: String },

    /// The server answered with a non-success status
    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    /// The URL could not be parsed
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::SourceFailure;

    #[test]
    fn test_essence_strips_parameters() {
        assert_eq!(
            essence("Application/LD+JSON; charset=utf-8"),
            "application/ld+json"
        );
        assert_eq!(essence("text/html"), "text/html");
    }

    #[test]
    fn test_is_json_covers_linkset_and_jsonld() {
        let mut doc = FetchedDocument {
            content_type: Some("application/linkset+json".into()),
            ..Default::default()
        };
        assert!(doc.is_json());
        doc.content_type = Some("text/html".into());
        assert!(!doc.is_json());
    }

    #[test]
    fn test_fetch_error_maps_to_failure_class() {
        let unauthorized = FetchError::Status {
            url: "https://api.example.org".into(),
            status: 401,
        };
        assert_eq!(SourceFailure::from(unauthorized).class(), "auth-failure");

        let missing = FetchError::Status {
            url: "https://api.example.org".into(),
            status: 404,
        };
        assert_eq!(SourceFailure::from(missing).class(), "source-empty");

        let timeout = FetchError::Timeout {
            url: "https://api.example.org".into(),
        };
        assert_eq!(SourceFailure::from(timeout).class(), "source-unreachable");
    }
}

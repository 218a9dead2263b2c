//! reqwest-backed [`HttpFetcher`].

use crate::harvest::traits::{essence, FetchError, FetchedDocument, HttpFetcher};
use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE, LINK};
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_USER_AGENT: &str =
    "EDEN-Harvester/1.0 (Research Project; mailto:admin@eden-fidelis.eu)";

const MAX_REDIRECTS: usize = 10;

/// Shared HTTP client with redirect following and a request timeout.
#[derive(Debug, Clone)]
pub struct ReqwestFetcher {
    client: reqwest::Client,
}

impl ReqwestFetcher {
    pub fn new(user_agent: &str, timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .build()
            .map_err(|e| FetchError::Transport {
                url: String::new(),
                message: format!("Failed to create HTTP client: {}", e),
            })?;
        Ok(Self { client })
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    async fn read(url: &str, response: reqwest::Response) -> Result<FetchedDocument, FetchError> {
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let final_url = response.url().to_string();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(essence);
        let link_headers = response
            .headers()
            .get_all(LINK)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .map(str::to_string)
            .collect();

        let body = response.text().await.map_err(|e| transport(url, e))?;
        debug!(url = %final_url, status = status.as_u16(), bytes = body.len(), "Fetched document");

        Ok(FetchedDocument {
            url: final_url,
            status: status.as_u16(),
            content_type,
            link_headers,
            body,
        })
    }
}

fn transport(url: &str, err: reqwest::Error) -> FetchError {
    if err.is_timeout() {
        FetchError::Timeout {
            url: url.to_string(),
        }
    } else if err.is_builder() {
        FetchError::InvalidUrl(url.to_string())
    } else {
        FetchError::Transport {
            url: url.to_string(),
            message: err.to_string(),
        }
    }
}

#[async_trait]
impl HttpFetcher for ReqwestFetcher {
    async fn get(&self, url: &str, accept: &str) -> Result<FetchedDocument, FetchError> {
        let response = self
            .client
            .get(url)
            .header(ACCEPT, accept)
            .send()
            .await
            .map_err(|e| transport(url, e))?;
        Self::read(url, response).await
    }

    async fn post_json(
        &self,
        url: &str,
        body: &serde_json::Value,
        bearer: Option<&str>,
    ) -> Result<FetchedDocument, FetchError> {
        let mut request = self
            .client
            .post(url)
            .header(ACCEPT, "application/json")
            .json(body);
        if let Some(token) = bearer {
            request = request.bearer_auth(token);
        }
        let response = request.send().await.map_err(|e| transport(url, e))?;
        Self::read(url, response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fetcher() -> ReqwestFetcher {
        ReqwestFetcher::new(DEFAULT_USER_AGENT, Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn test_get_collects_link_headers_and_content_type() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/html; charset=utf-8")
                    .insert_header("link", "</meta.json>; rel=\"describedby\"")
                    .set_body_string("<html></html>"),
            )
            .mount(&server)
            .await;

        let doc = fetcher().get(&server.uri(), "text/html").await.unwrap();
        assert_eq!(doc.status, 200);
        assert_eq!(doc.content_type.as_deref(), Some("text/html"));
        assert_eq!(doc.link_headers.len(), 1);
        assert_eq!(doc.body, "<html></html>");
    }

    #[tokio::test]
    async fn test_non_success_status_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let err = fetcher()
            .get(&format!("{}/missing", server.uri()), "*/*")
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Status { status: 404, .. }));
    }

    #[tokio::test]
    async fn test_post_json_sends_bearer_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/search"))
            .and(header("authorization", "Bearer secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"data": []})))
            .mount(&server)
            .await;

        let doc = fetcher()
            .post_json(
                &format!("{}/search", server.uri()),
                &serde_json::json!({"q": "zenodo"}),
                Some("secret"),
            )
            .await
            .unwrap();
        assert_eq!(doc.json().unwrap()["data"], serde_json::json!([]));
    }
}

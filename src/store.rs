//! Named-graph persistence through the SPARQL Graph Store Protocol.

use std::sync::Arc;

use chrono::Utc;
use reqwest::header::CONTENT_TYPE;
use serde_json::Value;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::GraphStoreConfig;
use crate::export::{graph_uri, Exporter, MERGED_GRAPH};
use crate::harvest::merge::{merge_partials, SourcePrecedence};
use crate::harvest::pipeline::HarvestResult;

const JSON_LD: &str = "application/ld+json";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Graph store request for <{graph}> failed: {source}")]
    Request {
        graph: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Graph store rejected <{graph}> with HTTP {status}")]
    Status { graph: String, status: u16 },
}

/// Writes harvest results as named graphs `scheme://harvester/{source}/{url}`.
pub struct GraphStore {
    client: reqwest::Client,
    config: GraphStoreConfig,
    exporter: Exporter,
}

impl GraphStore {
    pub fn new(client: reqwest::Client, config: GraphStoreConfig, exporter: Exporter) -> Self {
        Self {
            client,
            config,
            exporter,
        }
    }

    /// Replaces the named graph `graph` with `document`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on transport failure or a non-success status.
    pub async fn put_graph(&self, graph: &str, document: &Value) -> Result<(), StoreError> {
        let mut request = self
            .client
            .put(&self.config.url)
            .query(&[("graph", graph)])
            .header(CONTENT_TYPE, JSON_LD)
            .body(document.to_string());
        if let Some(username) = &self.config.username {
            request = request.basic_auth(username, self.config.password.as_deref());
        }

        let response = request.send().await.map_err(|source| StoreError::Request {
            graph: graph.to_string(),
            source,
        })?;
        let status = response.status();
        if !status.is_success() {
            return Err(StoreError::Status {
                graph: graph.to_string(),
                status: status.as_u16(),
            });
        }
        debug!(graph, "Stored named graph");
        Ok(())
    }

    /// Stores each contributing source's view, then the merged record.
    ///
    /// Every graph is attempted; the first error is returned.
    pub async fn persist(&self, result: &HarvestResult) -> Result<usize, StoreError> {
        let repo_url = result.record.repo_uri();
        let scheme = self.exporter.graph_scheme();
        let mut stored = 0;
        let mut first_error = None;

        let mut graphs: Vec<(String, Value)> = result
            .partials
            .iter()
            .map(|partial| {
                let source = partial.source.as_str();
                let single = merge_partials(
                    repo_url,
                    vec![partial.clone()],
                    &SourcePrecedence::default(),
                    Utc::now(),
                );
                (
                    graph_uri(scheme, source, repo_url),
                    self.exporter.catalog_record(&single, source),
                )
            })
            .collect();
        graphs.push((
            graph_uri(scheme, MERGED_GRAPH, repo_url),
            self.exporter.catalog_record(&result.record, MERGED_GRAPH),
        ));

        for (graph, document) in &graphs {
            match self.put_graph(graph, document).await {
                Ok(()) => stored += 1,
                Err(e) => {
                    warn!(graph = %graph, error = %e, "Failed to store named graph");
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(stored),
        }
    }

    /// Persists `result` in the background. Failures are logged only.
    pub fn spawn_persist(self: &Arc<Self>, result: HarvestResult) -> JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            match store.persist(&result).await {
                Ok(graphs) => info!(url = %result.record.repo_uri(), graphs, "Persisted harvest"),
                Err(e) => warn!(url = %result.record.repo_uri(), error = %e, "Graph store persistence failed"),
            }
        })
    }
}

//! Metadata published by the repository itself.
//!
//! Precedence inside this source: embedded JSON-LD, then meta tags (only for
//! fields still absent), then documents reached through signposting.

use crate::harvest::formats::signposting::{
    SignpostingLink, REL_API_CATALOG, REL_DESCRIBEDBY, REL_SERVICE_DESC,
};
use crate::harvest::formats::{
    record_from_graph, record_from_meta_tags, HtmlPage, NormalizedGraph, SignpostingResolver,
};
use crate::harvest::traits::HttpFetcher;
use crate::model::{FieldValue, PartialRecord, ServiceEndpoint, SourceKind};
use crate::traits::{HarvestTarget, MetadataSource, SourceFailure};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};

const LANDING_PAGE_ACCEPT: &str =
    "text/html, application/xhtml+xml, application/ld+json;q=0.9, */*;q=0.8";
const JSONLD_ACCEPT: &str = "application/ld+json, application/json;q=0.9";

/// Harvests embedded JSON-LD, meta tags and signposted documents from a
/// repository's landing page.
pub struct SelfHostedExtractor {
    fetcher: Arc<dyn HttpFetcher>,
    resolver: SignpostingResolver,
}

impl SelfHostedExtractor {
    pub fn new(fetcher: Arc<dyn HttpFetcher>) -> Self {
        let resolver = SignpostingResolver::new(fetcher.clone());
        Self { fetcher, resolver }
    }

    /// Builds the partial record from an already fetched landing page.
    ///
    /// # Errors
    ///
    /// Returns [`SourceFailure::Empty`] when the page carries no embedded
    /// metadata and no signposted document yields any.
    pub async fn extract(
        &self,
        page_url: &str,
        body: &str,
        is_json: bool,
        link_headers: &[String],
    ) -> Result<PartialRecord, SourceFailure> {
        let page = if is_json {
            HtmlPage {
                jsonld_blocks: vec![body.to_string()],
                ..Default::default()
            }
        } else {
            HtmlPage::parse(body)
        };

        // Step 1: embedded JSON-LD, first block wins
        let mut record = PartialRecord::new(SourceKind::SelfHosted);
        for block in &page.jsonld_blocks {
            let graph = NormalizedGraph::parse(block);
            record.absorb(record_from_graph(&graph, SourceKind::SelfHosted));
        }
        debug!(
            url = %page_url,
            blocks = page.jsonld_blocks.len(),
            fields = record.metadata.len(),
            "Embedded JSON-LD extracted"
        );

        // Step 2: meta tags fill what JSON-LD left absent
        let from_tags = record_from_meta_tags(&page.meta_tags, SourceKind::SelfHosted);
        fill_absent(&mut record, from_tags);

        // Step 3: signposting, lowest precedence
        let links = self.resolver.resolve(page_url, link_headers, &page.links).await;
        for link in links.iter().filter(|l| l.relation == REL_DESCRIBEDBY) {
            if let Some(described) = self.fetch_described(link).await {
                record.absorb(described);
            }
        }
        for link in links.iter().filter(|l| l.relation == REL_API_CATALOG) {
            for service in self.fetch_api_catalog(&link.target).await {
                record.add_service(service);
            }
        }

        if record.is_empty() {
            return Err(SourceFailure::Empty(format!(
                "no embedded metadata found at {}",
                page_url
            )));
        }
        Ok(record)
    }

    async fn fetch_described(&self, link: &SignpostingLink) -> Option<PartialRecord> {
        let wanted = link
            .media_type
            .as_deref()
            .map(|t| t.ends_with("json"))
            .unwrap_or(true);
        if !wanted {
            debug!(target_url = %link.target, media_type = ?link.media_type, "Skipping non-JSON describedby");
            return None;
        }
        match self.fetcher.get(&link.target, JSONLD_ACCEPT).await {
            Ok(doc) => {
                let graph = NormalizedGraph::parse(&doc.body);
                if graph.is_empty() {
                    warn!(target_url = %link.target, "describedby document holds no usable JSON-LD");
                    return None;
                }
                Some(record_from_graph(&graph, SourceKind::SelfHosted))
            }
            Err(e) => {
                warn!(target_url = %link.target, error = %e, "Skipping unreachable describedby document");
                None
            }
        }
    }

    /// Each catalogued anchor becomes a service; `service-desc` supplies
    /// its protocol description and media type.
    async fn fetch_api_catalog(&self, url: &str) -> Vec<ServiceEndpoint> {
        let entries = match self.resolver.fetch_linkset(url).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!(catalog = %url, error = %e, "Skipping unreachable api-catalog");
                return Vec::new();
            }
        };

        let mut services: Vec<ServiceEndpoint> = Vec::new();
        for entry in entries {
            let Some(anchor) = entry.anchor.as_deref() else {
                continue;
            };
            let index = match services.iter().position(|s| s.endpoint_url == anchor) {
                Some(index) => index,
                None => {
                    services.push(ServiceEndpoint::new(anchor));
                    services.len() - 1
                }
            };
            let service = &mut services[index];
            if entry.relation == REL_SERVICE_DESC && service.conforms_to.is_none() {
                service.conforms_to = Some(entry.target.clone());
                service.media_type = entry.media_type.clone();
            }
        }
        services
    }
}

/// Copies fields of `lower` that `record` does not have yet.
fn fill_absent(record: &mut PartialRecord, lower: PartialRecord) {
    for (field, value) in lower.metadata {
        let absent = record
            .metadata
            .get(&field)
            .map(FieldValue::is_empty)
            .unwrap_or(true);
        if absent && !(value.is_empty() && record.metadata.contains_key(&field)) {
            record.metadata.insert(field, value);
        }
    }
}

#[async_trait]
impl MetadataSource for SelfHostedExtractor {
    fn kind(&self) -> SourceKind {
        SourceKind::SelfHosted
    }

    async fn harvest(&self, target: &HarvestTarget) -> Result<PartialRecord, SourceFailure> {
        info!(url = %target.url, "Harvesting self-hosted metadata");
        let doc = self.fetcher.get(&target.url, LANDING_PAGE_ACCEPT).await?;
        self.extract(&doc.url, &doc.body, doc.is_json(), &doc.link_headers)
            .await
    }
}

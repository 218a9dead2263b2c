//! Signposting discovery (RFC 8288 links, RFC 9264 linksets).
//!
//! Relations are read from HTTP `Link` headers and HTML `<link>` elements.
//! Referenced linksets are fetched and expanded. Discovery is opportunistic:
//! a linkset that cannot be fetched is logged and skipped.

use super::html::LinkElement;
use crate::harvest::traits::{essence, FetchError, HttpFetcher};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};
use url::Url;

pub const REL_DESCRIBEDBY: &str = "describedby";
pub const REL_LINKSET: &str = "linkset";
pub const REL_API_CATALOG: &str = "api-catalog";
pub const REL_SERVICE_DESC: &str = "service-desc";
pub const REL_SERVICE_DOC: &str = "service-doc";

/// Relations picked up from headers and `<link>` elements.
pub const RELATIONS_OF_INTEREST: &[&str] = &[REL_DESCRIBEDBY, REL_LINKSET, REL_API_CATALOG];

const LINKSET_ACCEPT: &str =
    "application/linkset+json, application/linkset;q=0.9, application/json;q=0.8";

/// One typed link: (relation, target, media type), plus the context it was
/// stated for when it came from a linkset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignpostingLink {
    pub relation: String,
    pub target: String,
    pub media_type: Option<String>,
    pub anchor: Option<String>,
}

/// Parses one or more RFC 8288 `Link` header values.
///
/// Multi-valued `rel` parameters yield one link per relation.
pub fn parse_link_header(value: &str, base: Option<&Url>) -> Vec<SignpostingLink> {
    let mut links = Vec::new();
    for link_value in split_outside(value, ',') {
        let link_value = link_value.trim();
        let Some(rest) = link_value.strip_prefix('<') else {
            continue;
        };
        let Some(end) = rest.find('>') else {
            continue;
        };
        let target = &rest[..end];

        let mut relations = Vec::new();
        let mut media_type = None;
        let mut anchor = None;
        for param in split_outside(&rest[end + 1..], ';') {
            let Some((key, raw)) = param.split_once('=') else {
                continue;
            };
            let raw = raw.trim().trim_matches('"');
            match key.trim().to_ascii_lowercase().as_str() {
                "rel" => relations.extend(raw.split_whitespace().map(str::to_ascii_lowercase)),
                "type" => media_type = Some(essence(raw)),
                "anchor" => anchor = resolve(raw, base),
                _ => {}
            }
        }

        let Some(target) = resolve(target, base) else {
            continue;
        };
        for relation in relations {
            links.push(SignpostingLink {
                relation,
                target: target.clone(),
                media_type: media_type.clone(),
                anchor: anchor.clone(),
            });
        }
    }
    links
}

/// Parses a JSON linkset document (`application/linkset+json`).
pub fn parse_linkset_json(doc: &Value, base: Option<&Url>) -> Vec<SignpostingLink> {
    let mut links = Vec::new();
    let Some(contexts) = doc.get("linkset").and_then(Value::as_array) else {
        return links;
    };
    for context in contexts {
        let Some(map) = context.as_object() else {
            continue;
        };
        let anchor = map
            .get("anchor")
            .and_then(Value::as_str)
            .and_then(|a| resolve(a, base));
        for (relation, targets) in map {
            if relation == "anchor" {
                continue;
            }
            let Some(targets) = targets.as_array() else {
                continue;
            };
            for target in targets {
                let Some(href) = target
                    .get("href")
                    .and_then(Value::as_str)
                    .and_then(|h| resolve(h, base))
                else {
                    continue;
                };
                links.push(SignpostingLink {
                    relation: relation.to_ascii_lowercase(),
                    target: href,
                    media_type: target.get("type").and_then(Value::as_str).map(essence),
                    anchor: anchor.clone(),
                });
            }
        }
    }
    links
}

/// Relations of interest from `Link` headers and HTML `<link>` elements.
pub fn discover(base: &str, link_headers: &[String], html_links: &[LinkElement]) -> Vec<SignpostingLink> {
    let base_url = Url::parse(base).ok();
    let mut links: Vec<SignpostingLink> = link_headers
        .iter()
        .flat_map(|header| parse_link_header(header, base_url.as_ref()))
        .collect();

    for element in html_links {
        let Some(target) = resolve(&element.href, base_url.as_ref()) else {
            continue;
        };
        for relation in element.rel.split_whitespace() {
            links.push(SignpostingLink {
                relation: relation.to_ascii_lowercase(),
                target: target.clone(),
                media_type: element.media_type.as_deref().map(essence),
                anchor: None,
            });
        }
    }

    links.retain(|link| RELATIONS_OF_INTEREST.contains(&link.relation.as_str()));
    dedup(links)
}

/// Discovers signposting links and expands referenced linksets.
#[derive(Clone)]
pub struct SignpostingResolver {
    fetcher: Arc<dyn HttpFetcher>,
}

impl SignpostingResolver {
    pub fn new(fetcher: Arc<dyn HttpFetcher>) -> Self {
        Self { fetcher }
    }

    /// Returns the relations of interest plus every link found in the
    /// referenced linksets. Never fails.
    pub async fn resolve(
        &self,
        base: &str,
        link_headers: &[String],
        html_links: &[LinkElement],
    ) -> Vec<SignpostingLink> {
        let mut links = discover(base, link_headers, html_links);

        let linksets: Vec<String> = links
            .iter()
            .filter(|link| link.relation == REL_LINKSET)
            .map(|link| link.target.clone())
            .collect();

        for target in linksets {
            match self.fetch_linkset(&target).await {
                Ok(found) => {
                    debug!(linkset = %target, links = found.len(), "Expanded linkset");
                    links.extend(found);
                }
                Err(e) => warn!(linkset = %target, error = %e, "Skipping unreachable linkset"),
            }
        }

        dedup(links)
    }

    /// Fetches a linkset in either JSON or text serialization.
    pub async fn fetch_linkset(&self, url: &str) -> Result<Vec<SignpostingLink>, FetchError> {
        let doc = self.fetcher.get(url, LINKSET_ACCEPT).await?;
        let base = Url::parse(&doc.url).ok();
        if doc.is_json() || doc.body.trim_start().starts_with('{') {
            let value = doc.json().map_err(|e| FetchError::Transport {
                url: url.to_string(),
                message: format!("Invalid linkset JSON: {}", e),
            })?;
            Ok(parse_linkset_json(&value, base.as_ref()))
        } else {
            // The text serialization is a sequence of Link header values.
            Ok(parse_link_header(&doc.body.replace('\n', " "), base.as_ref()))
        }
    }
}

fn resolve(target: &str, base: Option<&Url>) -> Option<String> {
    let target = target.trim();
    if target.is_empty() {
        return None;
    }
    match base {
        Some(base) => base.join(target).ok().map(String::from),
        None => Url::parse(target).ok().map(String::from),
    }
}

fn dedup(links: Vec<SignpostingLink>) -> Vec<SignpostingLink> {
    let mut unique: Vec<SignpostingLink> = Vec::with_capacity(links.len());
    for link in links {
        if !unique.contains(&link) {
            unique.push(link);
        }
    }
    unique
}

/// Splits on `sep` outside `<...>` and quoted strings.
fn split_outside(value: &str, sep: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut in_angle = false;
    let mut in_quote = false;
    let mut start = 0;
    for (i, c) in value.char_indices() {
        match c {
            '<' if !in_quote => in_angle = true,
            '>' if !in_quote => in_angle = false,
            '"' if !in_angle => in_quote = !in_quote,
            c if c == sep && !in_angle && !in_quote => {
                parts.push(&value[start..i]);
                start = i + c.len_utf8();
            }
            _ => {}
        }
    }
    parts.push(&value[start..]);
    parts
}

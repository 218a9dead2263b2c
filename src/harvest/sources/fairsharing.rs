//! FAIRsharing.org registry harvester (authenticated JSON API).

use crate::harvest::formats::jsonld::Collect;
use crate::harvest::formats::paths::{lookup, strings};
use crate::harvest::hostname::{host_of, hostnames_match};
use crate::harvest::traits::{FetchError, HttpFetcher};
use crate::model::{Field, PartialRecord, PolicyRecord, SourceKind};
use crate::traits::{HarvestTarget, MetadataSource, SourceFailure};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

pub const DEFAULT_FAIRSHARING_API: &str = "https://api.fairsharing.org";

const RECORD_TYPE: &str = "fairsharing_records";
const STATUS_READY: &str = "ready";
const STATUS_DEPRECATED: &str = "deprecated";

/// Condition on a string attribute of a selected item.
#[derive(Debug, Clone, Copy)]
pub enum Filter {
    Equals(&'static str, &'static str),
    NotEquals(&'static str, &'static str),
}

impl Filter {
    fn accepts(&self, item: &Value) -> bool {
        match *self {
            Filter::Equals(key, wanted) => item.get(key).and_then(Value::as_str) == Some(wanted),
            Filter::NotEquals(key, unwanted) => {
                item.get(key).and_then(Value::as_str) != Some(unwanted)
            }
        }
    }
}

/// Selects `value` from every item under `items` that passes `filter`.
/// An empty `value` takes the item itself.
#[derive(Debug, Clone, Copy)]
pub struct Selector {
    pub items: &'static str,
    pub filter: Option<Filter>,
    pub value: &'static str,
}

const fn at(items: &'static str, value: &'static str) -> Selector {
    Selector {
        items,
        filter: None,
        value,
    }
}

const fn when(items: &'static str, filter: Filter, value: &'static str) -> Selector {
    Selector {
        items,
        filter: Some(filter),
        value,
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RecordRule {
    pub field: Field,
    pub selectors: &'static [Selector],
    pub collect: Collect,
}

pub const FAIRSHARING_RULES: &[RecordRule] = &[
    RecordRule {
        field: Field::Title,
        selectors: &[at("attributes.metadata", "name")],
        collect: Collect::First,
    },
    RecordRule {
        field: Field::Identifier,
        selectors: &[
            at("attributes.metadata", "doi"),
            when(
                "attributes.metadata.cross_references",
                Filter::Equals("portal", "re3data"),
                "url",
            ),
        ],
        collect: Collect::All,
    },
    RecordRule {
        field: Field::ResourceType,
        selectors: &[at("attributes", "record_type")],
        collect: Collect::First,
    },
    RecordRule {
        field: Field::Publisher,
        selectors: &[
            when(
                "attributes.organisation_links",
                Filter::Equals("relation", "maintains"),
                "organisation_name",
            ),
            when(
                "attributes.grants",
                Filter::Equals("relation", "maintains"),
                "saved_state.name",
            ),
        ],
        collect: Collect::All,
    },
    RecordRule {
        field: Field::Description,
        selectors: &[at("attributes.metadata", "description")],
        collect: Collect::First,
    },
    RecordRule {
        field: Field::AccessTerms,
        selectors: &[at("attributes.metadata", "data_access_condition.type")],
        collect: Collect::First,
    },
    RecordRule {
        field: Field::Contact,
        selectors: &[at("attributes.metadata.contacts", "contact_email")],
        collect: Collect::All,
    },
    RecordRule {
        field: Field::Keywords,
        selectors: &[at("attributes.subjects", "label"), at("attributes.subjects", "")],
        collect: Collect::All,
    },
    RecordRule {
        field: Field::License,
        selectors: &[when(
            "attributes.licence_links",
            Filter::NotEquals("relation", "undefined"),
            "licence_url",
        )],
        collect: Collect::All,
    },
    RecordRule {
        field: Field::LandingPage,
        selectors: &[at("attributes.metadata", "homepage")],
        collect: Collect::First,
    },
];

/// Metadata objects describing policies, with the policy type each maps to.
pub const POLICY_PATHS: &[(&str, &str)] = &[
    ("attributes.metadata.data_preservation_policy", "premis:PreservationPolicy"),
    ("attributes.metadata.data_deposition_condition", "ex:DepositionPolicy"),
    ("attributes.metadata.resource_sustainability", "ex:SustainabilityPolicy"),
];

#[derive(Clone)]
pub struct FairSharingCredentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for FairSharingCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FairSharingCredentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// Queries FAIRsharing with a process-wide cached bearer token.
///
/// # Thread Safety
///
/// The token lives behind a [`tokio::sync::Mutex`]; concurrent harvests
/// wait for a single sign-in instead of each signing in.
pub struct FairSharingHarvester {
    fetcher: Arc<dyn HttpFetcher>,
    api_base: String,
    credentials: Option<FairSharingCredentials>,
    token: Mutex<Option<String>>,
}

impl FairSharingHarvester {
    pub fn new(
        fetcher: Arc<dyn HttpFetcher>,
        api_base: impl Into<String>,
        credentials: Option<FairSharingCredentials>,
    ) -> Self {
        Self {
            fetcher,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            credentials,
            token: Mutex::new(None),
        }
    }

    /// Finds the record whose homepage host matches `url`, retrying with
    /// the first hostname label as a name query.
    pub async fn harvest_by_url(&self, url: &str) -> Result<PartialRecord, SourceFailure> {
        let hostname = host_of(url)
            .ok_or_else(|| SourceFailure::Malformed(format!("no hostname in {}", url)))?;

        let results = self.search(&hostname).await?;
        if let Some(best) = best_record(&filter_by_hostname(&results, &hostname)) {
            return Ok(record_from_json(best));
        }

        let name = hostname.split('.').next().unwrap_or_default();
        if name.is_empty() || name == hostname {
            return Err(no_match(&hostname));
        }
        debug!(query = %name, "Retrying FAIRsharing search by name");
        let results = self.search(name).await?;
        best_record(&filter_by_hostname(&results, &hostname))
            .map(record_from_json)
            .ok_or_else(|| no_match(&hostname))
    }

    /// Finds the record with exactly this DOI (case-insensitive).
    pub async fn harvest_by_doi(&self, doi: &str) -> Result<PartialRecord, SourceFailure> {
        info!(doi = %doi, "Harvesting FAIRsharing record by DOI");
        let results = self.search(doi).await?;
        let matching: Vec<&Value> = results
            .iter()
            .filter(|r| {
                r.pointer("/attributes/metadata/doi")
                    .and_then(Value::as_str)
                    .map(|d| d.eq_ignore_ascii_case(doi.trim()))
                    .unwrap_or(false)
            })
            .take(1)
            .collect();
        best_record(&matching)
            .map(record_from_json)
            .ok_or_else(|| SourceFailure::Empty(format!("no FAIRsharing record with DOI {}", doi)))
    }

    /// Runs a record search, re-authenticating once on `401`.
    pub async fn search(&self, query: &str) -> Result<Vec<Value>, SourceFailure> {
        let url = format!("{}/search/fairsharing_records/", self.api_base);
        let body = json!({ "q": query });

        let token = self.token().await?;
        let doc = match self.fetcher.post_json(&url, &body, Some(&token)).await {
            Err(FetchError::Status { status: 401, .. }) => {
                warn!("FAIRsharing token rejected, signing in again");
                self.invalidate(&token).await;
                let token = self.token().await?;
                self.fetcher.post_json(&url, &body, Some(&token)).await?
            }
            other => other?,
        };

        let value = doc
            .json()
            .map_err(|e| SourceFailure::Malformed(format!("FAIRsharing search: {}", e)))?;
        let results = value
            .get("data")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        debug!(query = %query, results = results.len(), "FAIRsharing search returned");
        Ok(results)
    }

    async fn token(&self) -> Result<String, SourceFailure> {
        let mut guard = self.token.lock().await;
        if let Some(token) = guard.as_ref() {
            return Ok(token.clone());
        }

        let credentials = self.credentials.as_ref().ok_or_else(|| {
            SourceFailure::Auth("FAIRSHARING_USERNAME / FAIRSHARING_PASSWORD not configured".into())
        })?;
        let url = format!("{}/users/sign_in", self.api_base);
        let body = json!({
            "user": { "login": credentials.username, "password": credentials.password }
        });
        let doc = self
            .fetcher
            .post_json(&url, &body, None)
            .await
            .map_err(|e| SourceFailure::Auth(e.to_string()))?;
        let token = doc
            .json()
            .ok()
            .and_then(|v| v.get("jwt").and_then(Value::as_str).map(str::to_string))
            .ok_or_else(|| SourceFailure::Auth("sign-in response carried no token".into()))?;

        info!("Authenticated with FAIRsharing");
        *guard = Some(token.clone());
        Ok(token)
    }

    /// Forgets `failed` unless another task already replaced it.
    async fn invalidate(&self, failed: &str) {
        let mut guard = self.token.lock().await;
        if guard.as_deref() == Some(failed) {
            *guard = None;
        }
    }
}

fn no_match(hostname: &str) -> SourceFailure {
    SourceFailure::Empty(format!("no FAIRsharing record with homepage on {}", hostname))
}

fn filter_by_hostname<'a>(results: &'a [Value], hostname: &str) -> Vec<&'a Value> {
    results
        .iter()
        .filter(|r| r.get("type").and_then(Value::as_str) == Some(RECORD_TYPE))
        .filter(|r| {
            r.pointer("/attributes/metadata/homepage")
                .and_then(Value::as_str)
                .and_then(host_of)
                .map(|home| hostnames_match(hostname, &home))
                .unwrap_or(false)
        })
        .collect()
}

/// First `ready` record, else the first that is not deprecated.
pub fn best_record<'a>(records: &[&'a Value]) -> Option<&'a Value> {
    let status = |r: &Value| {
        r.pointer("/attributes/metadata/status")
            .and_then(Value::as_str)
            .map(str::to_string)
    };
    records
        .iter()
        .find(|r| status(**r).as_deref() == Some(STATUS_READY))
        .or_else(|| {
            records
                .iter()
                .find(|r| status(**r).as_deref() != Some(STATUS_DEPRECATED))
        })
        .copied()
}

fn select(root: &Value, selector: &Selector) -> Vec<String> {
    let items: Vec<&Value> = lookup(root, selector.items)
        .into_iter()
        .flat_map(|v| match v {
            Value::Array(items) => items.iter().collect(),
            other => vec![other],
        })
        .filter(|item| selector.filter.map(|f| f.accepts(item)).unwrap_or(true))
        .collect();
    if selector.value.is_empty() {
        return strings(&items);
    }
    let values: Vec<&Value> = items
        .into_iter()
        .flat_map(|item| lookup(item, selector.value))
        .collect();
    strings(&values)
}

/// Applies [`FAIRSHARING_RULES`] and [`POLICY_PATHS`] to one search result.
pub fn record_from_json(result: &Value) -> PartialRecord {
    let mut record = PartialRecord::new(SourceKind::FairSharing);

    for rule in FAIRSHARING_RULES {
        let mut values = Vec::new();
        for selector in rule.selectors {
            values.extend(select(result, selector));
            if rule.collect == Collect::First && !values.is_empty() {
                break;
            }
        }
        if !values.is_empty() {
            record.set(rule.field, values);
        }
    }

    record.registry_id = result
        .pointer("/attributes/metadata/doi")
        .and_then(Value::as_str)
        .map(str::to_string);

    for (path, policy_type) in POLICY_PATHS {
        for policy in lookup(result, path) {
            let Some(uri) = policy.get("url").and_then(Value::as_str).filter(|u| !u.is_empty()) else {
                continue;
            };
            record.add_policy(PolicyRecord {
                policy_type: Some(policy_type.to_string()),
                policy_uri: uri.to_string(),
                title: policy.get("name").and_then(Value::as_str).map(str::to_string),
            });
        }
    }

    record
}

#[async_trait]
impl MetadataSource for FairSharingHarvester {
    fn kind(&self) -> SourceKind {
        SourceKind::FairSharing
    }

    async fn harvest(&self, target: &HarvestTarget) -> Result<PartialRecord, SourceFailure> {
        match target.fairsharing_id.as_deref() {
            Some(doi) => self.harvest_by_doi(doi).await,
            None => self.harvest_by_url(&target.url).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::{ReqwestFetcher, DEFAULT_USER_AGENT};
    use crate::model::FieldValue;
    use std::time::Duration;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn result(name: &str, homepage: &str, status: &str, doi: &str) -> Value {
        json!({
            "id": 1,
            "type": "fairsharing_records",
            "attributes": {
                "record_type": "repository",
                "metadata": {
                    "name": name,
                    "homepage": homepage,
                    "status": status,
                    "doi": doi,
                    "description": format!("{} in FAIRsharing", name),
                    "data_access_condition": {"type": "open"},
                    "contacts": [{"contact_name": "Help", "contact_email": "help@example.org"}],
                    "cross_references": [
                        {"portal": "re3data", "url": "https://doi.org/10.17616/R3X"},
                        {"portal": "Wikidata", "url": "https://www.wikidata.org/wiki/Q1"}
                    ],
                    "data_preservation_policy": {"url": "https://example.org/preservation", "name": "Preservation"}
                },
                "organisation_links": [
                    {"relation": "maintains", "organisation_name": "Example Institute"},
                    {"relation": "funds", "organisation_name": "Funder"}
                ],
                "grants": [{"relation": "maintains", "saved_state": {"name": "Example Grant"}}],
                "subjects": [{"label": "Earth Science"}, "Oceanography"],
                "licence_links": [
                    {"relation": "undefined", "licence_url": "https://example.org/unknown"},
                    {"relation": "applies_to_content", "licence_url": "https://creativecommons.org/licenses/by/4.0/"}
                ]
            }
        })
    }

    fn harvester(server: &MockServer) -> FairSharingHarvester {
        let fetcher = ReqwestFetcher::new(DEFAULT_USER_AGENT, Duration::from_secs(5)).unwrap();
        FairSharingHarvester::new(
            Arc::new(fetcher),
            server.uri(),
            Some(FairSharingCredentials {
                username: "user".into(),
                password: "secret".into(),
            }),
        )
    }

    async fn mount_sign_in(server: &MockServer, jwt: &str, times: u64) {
        Mock::given(method("POST"))
            .and(path("/users/sign_in"))
            .and(body_partial_json(json!({"user": {"login": "user"}})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"jwt": jwt})))
            .expect(times)
            .mount(server)
            .await;
    }

    #[test]
    fn test_record_from_json_maps_filtered_paths() {
        let record = record_from_json(&result("Zenodo", "https://zenodo.org", "ready", "10.25504/FAIRsharing.wy4egf"));

        assert_eq!(record.registry_id.as_deref(), Some("10.25504/FAIRsharing.wy4egf"));
        assert_eq!(record.get(Field::Title), Some(&FieldValue::Single("Zenodo".into())));
        assert_eq!(
            record.get(Field::Identifier),
            Some(&FieldValue::Many(vec![
                "10.25504/FAIRsharing.wy4egf".into(),
                "https://doi.org/10.17616/R3X".into()
            ]))
        );
        assert_eq!(
            record.get(Field::Publisher),
            Some(&FieldValue::Many(vec!["Example Institute".into(), "Example Grant".into()]))
        );
        assert_eq!(
            record.get(Field::Keywords),
            Some(&FieldValue::Many(vec!["Earth Science".into(), "Oceanography".into()]))
        );
        assert_eq!(
            record.get(Field::License),
            Some(&FieldValue::Many(vec![
                "https://creativecommons.org/licenses/by/4.0/".into()
            ]))
        );
        assert_eq!(record.get(Field::AccessTerms), Some(&FieldValue::Single("open".into())));
        assert_eq!(record.policies.len(), 1);
        assert_eq!(
            record.policies[0].policy_type.as_deref(),
            Some("premis:PreservationPolicy")
        );
    }

    #[test]
    fn test_best_record_prefers_ready_then_not_deprecated() {
        let deprecated = result("Old", "https://example.org", "deprecated", "10.1/a");
        let uncertain = result("Uncertain", "https://example.org", "uncertain", "10.1/b");
        let ready = result("Ready", "https://example.org", "ready", "10.1/c");

        let picked = best_record(&[&deprecated, &uncertain, &ready]).unwrap();
        assert_eq!(picked.pointer("/attributes/metadata/name"), Some(&json!("Ready")));

        let picked = best_record(&[&deprecated, &uncertain]).unwrap();
        assert_eq!(picked.pointer("/attributes/metadata/name"), Some(&json!("Uncertain")));

        assert!(best_record(&[&deprecated]).is_none());
    }

    #[tokio::test]
    async fn test_hostname_search_falls_back_to_name() {
        let server = MockServer::start().await;
        mount_sign_in(&server, "token-1", 1).await;
        Mock::given(method("POST"))
            .and(path("/search/fairsharing_records/"))
            .and(body_partial_json(json!({"q": "zenodo.org"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [result("Elsewhere", "https://other.org", "ready", "10.1/x")]
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/search/fairsharing_records/"))
            .and(body_partial_json(json!({"q": "zenodo"})))
            .and(header("authorization", "Bearer token-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [result("Zenodo", "https://www.zenodo.org/", "ready", "10.1/z")]
            })))
            .mount(&server)
            .await;

        let record = harvester(&server)
            .harvest_by_url("https://zenodo.org")
            .await
            .unwrap();
        assert_eq!(record.get(Field::Title), Some(&FieldValue::Single("Zenodo".into())));
    }

    #[tokio::test]
    async fn test_expired_token_is_refreshed_once() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/users/sign_in"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"jwt": "stale"})))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/users/sign_in"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"jwt": "fresh"})))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/search/fairsharing_records/"))
            .and(header("authorization", "Bearer stale"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/search/fairsharing_records/"))
            .and(header("authorization", "Bearer fresh"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [result("Zenodo", "https://zenodo.org", "ready", "10.25504/FAIRsharing.wy4egf")]
            })))
            .mount(&server)
            .await;

        let target = HarvestTarget::new("https://zenodo.org")
            .with_fairsharing_id(Some("10.25504/fairsharing.WY4EGF".into()));
        let record = harvester(&server).harvest(&target).await.unwrap();
        assert_eq!(record.registry_id.as_deref(), Some("10.25504/FAIRsharing.wy4egf"));
    }

    #[tokio::test]
    async fn test_missing_credentials_is_auth_failure() {
        let server = MockServer::start().await;
        let fetcher = ReqwestFetcher::new(DEFAULT_USER_AGENT, Duration::from_secs(5)).unwrap();
        let harvester = FairSharingHarvester::new(Arc::new(fetcher), server.uri(), None);

        let result = harvester.harvest(&HarvestTarget::new("https://zenodo.org")).await;
        assert_eq!(result.unwrap_err().class(), "auth-failure");
    }

    #[tokio::test]
    async fn test_token_is_shared_between_searches() {
        let server = MockServer::start().await;
        mount_sign_in(&server, "token-1", 1).await;
        Mock::given(method("POST"))
            .and(path("/search/fairsharing_records/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": []})))
            .mount(&server)
            .await;

        let harvester = harvester(&server);
        let (a, b) = tokio::join!(harvester.search("one"), harvester.search("two"));
        assert!(a.unwrap().is_empty());
        assert!(b.unwrap().is_empty());
    }
}

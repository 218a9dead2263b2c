use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// A metadata source consulted during a harvest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SourceKind {
    #[serde(rename = "self-hosted")]
    SelfHosted,
    #[serde(rename = "re3data")]
    Re3Data,
    #[serde(rename = "fairsharing")]
    FairSharing,
}

impl SourceKind {
    pub const ALL: [SourceKind; 3] = [
        SourceKind::SelfHosted,
        SourceKind::Re3Data,
        SourceKind::FairSharing,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::SelfHosted => "self-hosted",
            SourceKind::Re3Data => "re3data",
            SourceKind::FairSharing => "fairsharing",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        SourceKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == wanted)
            .ok_or_else(|| format!("unknown metadata source '{}'", s.trim()))
    }
}

/// Semantic metadata fields collected for a repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Field {
    Title,
    Description,
    Publisher,
    Contact,
    Language,
    Country,
    License,
    Keywords,
    ResourceType,
    Identifier,
    LandingPage,
    AccessTerms,
}

/// How values for one field from different sources are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeRule {
    /// Keep the first populated value, only fill when absent.
    Fill,
    /// Set-union of all values, de-duplicated.
    Union { case_insensitive: bool },
}

impl Field {
    pub fn name(&self) -> &'static str {
        match self {
            Field::Title => "title",
            Field::Description => "description",
            Field::Publisher => "publisher",
            Field::Contact => "contact",
            Field::Language => "language",
            Field::Country => "country",
            Field::License => "license",
            Field::Keywords => "keywords",
            Field::ResourceType => "resourceType",
            Field::Identifier => "identifier",
            Field::LandingPage => "landingPage",
            Field::AccessTerms => "accessTerms",
        }
    }

    /// Whether the field holds a list of values rather than a single one.
    pub fn is_list(&self) -> bool {
        matches!(
            self,
            Field::Publisher | Field::Contact | Field::License | Field::Keywords | Field::Identifier
        )
    }

    pub fn merge_rule(&self) -> MergeRule {
        match self {
            Field::Keywords => MergeRule::Union {
                case_insensitive: true,
            },
            Field::Identifier => MergeRule::Union {
                case_insensitive: false,
            },
            _ => MergeRule::Fill,
        }
    }
}

/// A single value or a list of values for a [`Field`].
///
/// An empty `Many` means the source had the field but no usable content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Single(String),
    Many(Vec<String>),
}

impl FieldValue {
    pub fn values(&self) -> Vec<&str> {
        match self {
            FieldValue::Single(value) => vec![value.as_str()],
            FieldValue::Many(values) => values.iter().map(String::as_str).collect(),
        }
    }

    pub fn first(&self) -> Option<&str> {
        match self {
            FieldValue::Single(value) => Some(value.as_str()),
            FieldValue::Many(values) => values.first().map(String::as_str),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            FieldValue::Single(value) => value.is_empty(),
            FieldValue::Many(values) => values.is_empty(),
        }
    }

    /// Builds the value for `field`: trims, drops blanks and exact duplicates.
    pub fn for_field(field: Field, values: Vec<String>) -> Self {
        let mut cleaned: Vec<String> = Vec::with_capacity(values.len());
        for value in values {
            let value = value.trim();
            if !value.is_empty() && !cleaned.iter().any(|v| v == value) {
                cleaned.push(value.to_string());
            }
        }
        if field.is_list() {
            return FieldValue::Many(cleaned);
        }
        match cleaned.into_iter().next() {
            Some(value) => FieldValue::Single(value),
            None => FieldValue::Many(Vec::new()),
        }
    }

    /// Combines `incoming` into `self` according to the field's rule.
    ///
    /// Returns `true` if `self` changed.
    pub fn merge(&mut self, field: Field, incoming: &FieldValue) -> bool {
        if incoming.is_empty() {
            return false;
        }
        match field.merge_rule() {
            MergeRule::Fill => {
                if self.is_empty() {
                    *self = incoming.clone();
                    true
                } else {
                    false
                }
            }
            MergeRule::Union { case_insensitive } => {
                let mut merged: Vec<String> =
                    self.values().into_iter().map(str::to_string).collect();
                let mut changed = false;
                for value in incoming.values() {
                    let seen = merged.iter().any(|v| {
                        if case_insensitive {
                            v.to_lowercase() == value.to_lowercase()
                        } else {
                            v == value
                        }
                    });
                    if !seen {
                        merged.push(value.to_string());
                        changed = true;
                    }
                }
                if changed || matches!(self, FieldValue::Single(_)) {
                    *self = FieldValue::Many(merged);
                }
                changed
            }
        }
    }
}

/// A service endpoint (DCAT `DataService`) offered by a repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceEndpoint {
    #[serde(rename = "endpointURL")]
    pub endpoint_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conforms_to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    /// Identifier of a dataset served by this endpoint (reference only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serves_dataset: Option<String>,
    /// Source-specific service type, e.g. `re3data:API:OAI-PMH`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_type: Option<String>,
}

impl ServiceEndpoint {
    pub fn new(endpoint_url: impl Into<String>) -> Self {
        Self {
            endpoint_url: endpoint_url.into(),
            title: None,
            conforms_to: None,
            media_type: None,
            serves_dataset: None,
            service_type: None,
        }
    }

    /// Fills attributes that are still `None` from `other`.
    pub fn fill_from(&mut self, other: &ServiceEndpoint) {
        fill(&mut self.title, &other.title);
        fill(&mut self.conforms_to, &other.conforms_to);
        fill(&mut self.media_type, &other.media_type);
        fill(&mut self.serves_dataset, &other.serves_dataset);
        fill(&mut self.service_type, &other.service_type);
    }
}

/// A repository policy (preservation, deposition, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyRecord {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub policy_type: Option<String>,
    #[serde(rename = "policyURI")]
    pub policy_uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

fn fill(target: &mut Option<String>, other: &Option<String>) {
    if target.is_none() {
        target.clone_from(other);
    }
}

/// Adds `service` unless its endpoint is already known, in which case the
/// known entry only gains the attributes it lacks.
fn push_service(services: &mut Vec<ServiceEndpoint>, service: ServiceEndpoint) -> bool {
    match services
        .iter_mut()
        .find(|s| s.endpoint_url == service.endpoint_url)
    {
        Some(existing) => {
            existing.fill_from(&service);
            false
        }
        None => {
            services.push(service);
            true
        }
    }
}

fn push_policy(policies: &mut Vec<PolicyRecord>, policy: PolicyRecord) -> bool {
    match policies
        .iter_mut()
        .find(|p| p.policy_uri == policy.policy_uri)
    {
        Some(existing) => {
            fill(&mut existing.policy_type, &policy.policy_type);
            fill(&mut existing.title, &policy.title);
            false
        }
        None => {
            policies.push(policy);
            true
        }
    }
}

/// The subset of a repository record contributed by one source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartialRecord {
    pub source: SourceKind,
    #[serde(rename = "registryID", default, skip_serializing_if = "Option::is_none")]
    pub registry_id: Option<String>,
    pub metadata: BTreeMap<Field, FieldValue>,
    pub services: Vec<ServiceEndpoint>,
    pub policies: Vec<PolicyRecord>,
}

impl PartialRecord {
    pub fn new(source: SourceKind) -> Self {
        Self {
            source,
            registry_id: None,
            metadata: BTreeMap::new(),
            services: Vec::new(),
            policies: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.metadata.values().all(FieldValue::is_empty)
            && self.services.is_empty()
            && self.policies.is_empty()
            && self.registry_id.is_none()
    }

    pub fn get(&self, field: Field) -> Option<&FieldValue> {
        self.metadata.get(&field)
    }

    /// Records values found for `field`, combining with anything already
    /// present under the field's merge rule.
    pub fn set(&mut self, field: Field, values: Vec<String>) {
        let incoming = FieldValue::for_field(field, values);
        match self.metadata.get_mut(&field) {
            Some(existing) => {
                existing.merge(field, &incoming);
            }
            None => {
                self.metadata.insert(field, incoming);
            }
        }
    }

    pub fn set_one(&mut self, field: Field, value: impl Into<String>) {
        self.set(field, vec![value.into()]);
    }

    pub fn add_service(&mut self, service: ServiceEndpoint) {
        push_service(&mut self.services, service);
    }

    pub fn add_policy(&mut self, policy: PolicyRecord) {
        push_policy(&mut self.policies, policy);
    }

    /// Folds a lower-priority partial of the same source into this one.
    pub fn absorb(&mut self, other: PartialRecord) {
        if self.registry_id.is_none() {
            self.registry_id = other.registry_id;
        }
        for (field, value) in other.metadata {
            match self.metadata.get_mut(&field) {
                Some(existing) => {
                    existing.merge(field, &value);
                }
                None => {
                    self.metadata.insert(field, value);
                }
            }
        }
        for service in other.services {
            push_service(&mut self.services, service);
        }
        for policy in other.policies {
            push_policy(&mut self.policies, policy);
        }
    }
}

/// Where a merged field came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Provenance {
    /// Source whose value is (or first entered) the merged value
    pub source: SourceKind,
    /// Precedence rank of `source`; lower wins
    pub rank: u8,
    /// Every source that offered a value, in merge order
    pub contributors: Vec<SourceKind>,
    pub recorded_at: DateTime<Utc>,
}

/// The merged, canonical record for one repository.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryRecord {
    #[serde(rename = "repoURI")]
    repo_uri: String,
    #[serde(rename = "registryID", default, skip_serializing_if = "Option::is_none")]
    pub registry_id: Option<String>,
    pub metadata: BTreeMap<Field, FieldValue>,
    pub services: Vec<ServiceEndpoint>,
    pub policies: Vec<PolicyRecord>,
    pub provenance: BTreeMap<String, Provenance>,
}

pub const SERVICES_KEY: &str = "services";
pub const POLICIES_KEY: &str = "policies";
pub const REGISTRY_ID_KEY: &str = "registryID";

impl RepositoryRecord {
    pub fn new(repo_uri: impl Into<String>) -> Self {
        Self {
            repo_uri: repo_uri.into(),
            registry_id: None,
            metadata: BTreeMap::new(),
            services: Vec::new(),
            policies: Vec::new(),
            provenance: BTreeMap::new(),
        }
    }

    pub fn repo_uri(&self) -> &str {
        &self.repo_uri
    }

    pub fn get(&self, field: Field) -> Option<&FieldValue> {
        self.metadata.get(&field)
    }

    pub fn title(&self) -> Option<&str> {
        self.get(Field::Title).and_then(FieldValue::first)
    }

    /// Merges one source's partial record. Callers must absorb partials in
    /// precedence order: scalar fields already populated are never replaced.
    pub fn absorb(&mut self, partial: PartialRecord, rank: u8, at: DateTime<Utc>) {
        let source = partial.source;

        if let Some(id) = partial.registry_id {
            let won = self.registry_id.is_none();
            if won {
                self.registry_id = Some(id);
            }
            self.note(REGISTRY_ID_KEY, source, rank, at, won);
        }

        for (field, value) in partial.metadata {
            if value.is_empty() {
                // Found-empty only claims a field nobody else has seen.
                self.metadata.entry(field).or_insert(value);
                continue;
            }
            let won = match self.metadata.get_mut(&field) {
                Some(existing) => {
                    let was_empty = existing.is_empty();
                    existing.merge(field, &value);
                    was_empty
                }
                None => {
                    self.metadata.insert(field, value);
                    true
                }
            };
            self.note(field.name(), source, rank, at, won);
        }

        if !partial.services.is_empty() {
            let won = self.services.is_empty();
            for service in partial.services {
                push_service(&mut self.services, service);
            }
            self.note(SERVICES_KEY, source, rank, at, won);
        }

        if !partial.policies.is_empty() {
            let won = self.policies.is_empty();
            for policy in partial.policies {
                push_policy(&mut self.policies, policy);
            }
            self.note(POLICIES_KEY, source, rank, at, won);
        }
    }

    fn note(&mut self, key: &str, source: SourceKind, rank: u8, at: DateTime<Utc>, won: bool) {
        match self.provenance.get_mut(key) {
            Some(entry) => {
                if won {
                    entry.source = source;
                    entry.rank = rank;
                    entry.recorded_at = at;
                }
                if !entry.contributors.contains(&source) {
                    entry.contributors.push(source);
                }
            }
            None => {
                self.provenance.insert(
                    key.to_string(),
                    Provenance {
                        source,
                        rank,
                        contributors: vec![source],
                        recorded_at: at,
                    },
                );
            }
        }
    }
}

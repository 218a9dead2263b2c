//! Declarative mapping from normalized JSON-LD to a partial record.
//!
//! Every field is described by a [`PropertyRule`]: an ordered list of dotted
//! paths into the main entity (see [`super::paths`]). Adding a vocabulary
//! variant means adding a path, not code.

use super::graph::NormalizedGraph;
use super::paths::{all_strings, first_string, first_strings, lookup};
use crate::model::{Field, PartialRecord, PolicyRecord, ServiceEndpoint, SourceKind};
use serde_json::Value;

/// How the paths of a rule combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Collect {
    /// The first path yielding text wins
    First,
    /// Text from every path is gathered
    All,
}

/// Maps a set of JSON paths to one metadata field.
#[derive(Debug, Clone, Copy)]
pub struct PropertyRule {
    pub field: Field,
    pub paths: &'static [&'static str],
    pub collect: Collect,
}

const fn rule(field: Field, paths: &'static [&'static str], collect: Collect) -> PropertyRule {
    PropertyRule {
        field,
        paths,
        collect,
    }
}

pub const JSONLD_RULES: &[PropertyRule] = &[
    rule(Field::Title, &["name", "headline", "title"], Collect::First),
    rule(Field::Description, &["description", "abstract"], Collect::First),
    rule(
        Field::Publisher,
        &[
            "publisher.name",
            "publisher.legalName",
            "provider.name",
            "provider.legalName",
            "publisher",
            "provider",
        ],
        Collect::First,
    ),
    rule(
        Field::Country,
        &[
            "publisher.address.addressCountry.name",
            "publisher.address.addressCountry",
            "publisher.country-name",
            "publisher.hasAddress.country-name",
            "provider.address.addressCountry.name",
            "provider.address.addressCountry",
            "countryOfOrigin.name",
            "countryOfOrigin",
        ],
        Collect::First,
    ),
    rule(
        Field::Contact,
        &[
            "contactPoint.email",
            "contactPoint.hasEmail",
            "contactPoint.url",
            "contactPoint.telephone",
            "contactPoint",
        ],
        Collect::All,
    ),
    rule(
        Field::Language,
        &["inLanguage.alternateName", "inLanguage.name", "inLanguage", "language"],
        Collect::First,
    ),
    rule(
        Field::License,
        &["license.url", "license.@id", "license.id", "license.name", "license"],
        Collect::First,
    ),
    rule(
        Field::Keywords,
        &["keywords", "keyword", "subjects", "theme", "about.name"],
        Collect::All,
    ),
    rule(Field::ResourceType, &["@type"], Collect::First),
    rule(
        Field::Identifier,
        &["@id", "identifier.value", "identifier.@id", "identifier"],
        Collect::All,
    ),
    rule(
        Field::LandingPage,
        &["landingPage", "url", "homepage", "mainEntityOfPage.@id", "mainEntityOfPage"],
        Collect::First,
    ),
    rule(
        Field::AccessTerms,
        &["accessRights", "conditionsOfAccess"],
        Collect::First,
    ),
];

/// Node types that describe a service offered by the repository.
pub const SERVICE_TYPES: &[&str] = &["DataService", "WebAPI"];

const SERVICE_ENDPOINT_PATHS: &[&str] = &["endpointURL", "url", "target", "landingPage"];
const SERVICE_TITLE_PATHS: &[&str] = &["title", "name"];
const SERVICE_MEDIA_TYPE_PATHS: &[&str] = &["mediaType", "encodingFormat", "serviceOutput.identifier"];
const SERVICE_CONFORMS_PATHS: &[&str] = &["conformsTo.@id", "conformsTo", "documentation"];
const SERVICE_DATASET_PATHS: &[&str] = &["servesDataset.@id", "servesDataset"];

const POLICY_URI_PATHS: &[&str] = &["url", "@id"];
const POLICY_TYPE_PATHS: &[&str] = &["@type", "additionalType"];
const POLICY_TITLE_PATHS: &[&str] = &["name", "title"];

/// Applies [`JSONLD_RULES`] to a normalized graph.
pub fn record_from_graph(graph: &NormalizedGraph, source: SourceKind) -> PartialRecord {
    let mut record = PartialRecord::new(source);
    if graph.is_empty() {
        return record;
    }
    let root = graph.root_value();

    for rule in JSONLD_RULES {
        let found = match rule.collect {
            Collect::First => first_strings(&root, rule.paths),
            Collect::All => all_strings(&root, rule.paths),
        };
        if let Some(values) = found {
            record.set(rule.field, clean_values(rule.field, values));
        }
    }

    if record.get(Field::AccessTerms).is_none() {
        if let Some(free) = first_string(&root, "isAccessibleForFree") {
            let terms = match free.to_ascii_lowercase().as_str() {
                "true" => Some("unrestricted"),
                "false" => Some("restricted"),
                _ => None,
            };
            if let Some(terms) = terms {
                record.set_one(Field::AccessTerms, terms);
            }
        }
    }

    for node in service_nodes(graph, &root) {
        if let Some(service) = service_from_node(&node) {
            record.add_service(service);
        }
    }

    for value in lookup(&root, "publishingPrinciples") {
        for item in as_items(value) {
            if let Some(policy) = policy_from_value(item) {
                record.add_policy(policy);
            }
        }
    }

    record
}

fn clean_values(field: Field, values: Vec<String>) -> Vec<String> {
    match field {
        // schema.org allows a single comma separated keyword string
        Field::Keywords => values
            .iter()
            .flat_map(|v| v.split(','))
            .map(|v| v.trim().to_string())
            .collect(),
        Field::Identifier => values.into_iter().filter(|v| !v.starts_with("_:")).collect(),
        _ => values,
    }
}

fn as_items(value: &Value) -> Vec<&Value> {
    match value {
        Value::Array(items) => items.iter().collect(),
        other => vec![other],
    }
}

fn service_nodes(graph: &NormalizedGraph, root: &Value) -> Vec<Value> {
    let mut nodes: Vec<Value> = lookup(root, "service")
        .into_iter()
        .flat_map(as_items)
        .filter(|v| v.is_object())
        .cloned()
        .collect();
    nodes.extend(graph.nodes_by_type(SERVICE_TYPES).into_iter().map(Value::Object));
    nodes
}

/// Builds a service from a JSON-LD node; nodes without an endpoint are
/// skipped.
pub fn service_from_node(node: &Value) -> Option<ServiceEndpoint> {
    let endpoint = first_of(node, SERVICE_ENDPOINT_PATHS)?;
    let mut service = ServiceEndpoint::new(endpoint);
    service.title = first_of(node, SERVICE_TITLE_PATHS);
    service.media_type = first_of(node, SERVICE_MEDIA_TYPE_PATHS);
    service.conforms_to = first_of(node, SERVICE_CONFORMS_PATHS);
    service.serves_dataset = first_of(node, SERVICE_DATASET_PATHS);
    service.service_type = first_string(node, "@type");
    Some(service)
}

fn policy_from_value(value: &Value) -> Option<PolicyRecord> {
    match value {
        Value::String(uri) if !uri.trim().is_empty() => Some(PolicyRecord {
            policy_type: None,
            policy_uri: uri.trim().to_string(),
            title: None,
        }),
        Value::Object(_) => {
            let uri = first_of(value, POLICY_URI_PATHS).filter(|u| !u.starts_with("_:"))?;
            Some(PolicyRecord {
                policy_type: first_of(value, POLICY_TYPE_PATHS),
                policy_uri: uri,
                title: first_of(value, POLICY_TITLE_PATHS),
            })
        }
        _ => None,
    }
}

fn first_of(node: &Value, paths: &[&str]) -> Option<String> {
    paths.iter().find_map(|path| first_string(node, path))
}

//! DCAT / JSON-LD export of merged repository records.
//!
//! The output shape is fixed: a `dcat:CatalogRecord` generated by the
//! harvester whose `prov:hadPrimarySource` is the repository as a
//! `dcat:Catalog`.

use crate::model::{Field, FieldValue, PolicyRecord, Provenance, RepositoryRecord, ServiceEndpoint};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

pub const DEFAULT_GRAPH_SCHEME: &str = "eden";
pub const HARVESTER_AGENT: &str = "EDEN Catalog Service Harvester";
pub const MERGED_GRAPH: &str = "merged";

/// Fields without which an exported record is flagged incomplete.
pub const REQUIRED_FIELDS: &[Field] = &[Field::Title];

/// The JSON document returned for one harvest.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportDocument {
    #[serde(rename = "repoURI")]
    pub repo_uri: String,
    pub metadata: Value,
    pub services: Vec<Value>,
    pub provenance: BTreeMap<String, Provenance>,
    pub complete: bool,
    pub missing_fields: Vec<String>,
}

/// Named graph URI for one source's view of a repository.
pub fn graph_uri(scheme: &str, source: &str, repo_url: &str) -> String {
    format!("{}://harvester/{}/{}", scheme, source, repo_url)
}

pub fn context() -> Value {
    json!({
        "dcat": "http://www.w3.org/ns/dcat#",
        "dct": "http://purl.org/dc/terms/",
        "schema": "https://schema.org/",
        "vcard": "http://www.w3.org/2006/vcard/ns#",
        "foaf": "http://xmlns.com/foaf/0.1/",
        "prov": "http://www.w3.org/ns/prov#",
        "xsd": "http://www.w3.org/2001/XMLSchema#"
    })
}

/// Names of required fields absent or empty in `record`.
pub fn missing_fields(record: &RepositoryRecord) -> Vec<String> {
    REQUIRED_FIELDS
        .iter()
        .filter(|field| record.get(**field).map(FieldValue::is_empty).unwrap_or(true))
        .map(|field| field.name().to_string())
        .collect()
}

#[derive(Debug, Clone)]
pub struct Exporter {
    graph_scheme: String,
}

impl Default for Exporter {
    fn default() -> Self {
        Self::new(DEFAULT_GRAPH_SCHEME)
    }
}

impl Exporter {
    pub fn new(graph_scheme: impl Into<String>) -> Self {
        Self {
            graph_scheme: graph_scheme.into(),
        }
    }

    pub fn graph_scheme(&self) -> &str {
        &self.graph_scheme
    }

    /// Builds the response document for the merged record.
    pub fn export(&self, record: &RepositoryRecord) -> ExportDocument {
        let missing = missing_fields(record);
        ExportDocument {
            repo_uri: record.repo_uri().to_string(),
            metadata: self.catalog_record(record, MERGED_GRAPH),
            services: record.services.iter().map(data_service).collect(),
            provenance: record.provenance.clone(),
            complete: missing.is_empty(),
            missing_fields: missing,
        }
    }

    /// The `dcat:CatalogRecord` for `record` as seen by `source`.
    pub fn catalog_record(&self, record: &RepositoryRecord, source: &str) -> Value {
        let issued = record
            .provenance
            .values()
            .map(|p| p.recorded_at)
            .max()
            .unwrap_or_else(Utc::now);

        json!({
            "@context": context(),
            "@id": graph_uri(&self.graph_scheme, source, record.repo_uri()),
            "@type": "dcat:CatalogRecord",
            "dct:issued": timestamp(issued),
            "prov:wasGeneratedBy": {
                "@type": "prov:Activity",
                "prov:wasAssociatedWith": {
                    "@type": "prov:SoftwareAgent",
                    "foaf:name": HARVESTER_AGENT
                }
            },
            "prov:hadPrimarySource": catalog(record)
        })
    }
}

fn timestamp(at: DateTime<Utc>) -> Value {
    json!({
        "@value": at.to_rfc3339_opts(SecondsFormat::Secs, true),
        "@type": "xsd:dateTime"
    })
}

fn catalog(record: &RepositoryRecord) -> Value {
    let mut node = Map::new();
    node.insert("@id".into(), json!(record.repo_uri()));
    node.insert("@type".into(), json!("dcat:Catalog"));

    let scalar = |field: Field| record.get(field).and_then(FieldValue::first).map(str::to_string);
    let list = |field: Field| -> Vec<String> {
        record
            .get(field)
            .map(|v| v.values().into_iter().map(str::to_string).collect())
            .unwrap_or_default()
    };

    if let Some(title) = scalar(Field::Title) {
        node.insert("dct:title".into(), json!(title));
    }
    if let Some(description) = scalar(Field::Description) {
        node.insert("dct:description".into(), json!(description));
    }
    if let Some(language) = scalar(Field::Language) {
        node.insert("dct:language".into(), json!(language));
    }
    if let Some(resource_type) = scalar(Field::ResourceType) {
        node.insert("dct:type".into(), json!(resource_type));
    }
    if let Some(page) = scalar(Field::LandingPage) {
        node.insert("dcat:landingPage".into(), json!({ "@id": page }));
    }
    if let Some(terms) = scalar(Field::AccessTerms) {
        node.insert("dct:accessRights".into(), json!(terms));
    }

    let identifiers = list(Field::Identifier);
    if !identifiers.is_empty() {
        node.insert("dct:identifier".into(), json!(identifiers));
    }

    // A sole publisher carries the country; otherwise it belongs to the catalog.
    let country = scalar(Field::Country);
    let mut publishers: Vec<Value> = list(Field::Publisher)
        .into_iter()
        .map(|name| json!({ "@type": "foaf:Agent", "foaf:name": name }))
        .collect();
    if let Some(country) = country {
        match publishers.as_mut_slice() {
            [Value::Object(agent)] => {
                agent.insert("vcard:country-name".into(), json!(country));
            }
            _ => {
                node.insert("vcard:country-name".into(), json!(country));
            }
        }
    }
    if !publishers.is_empty() {
        node.insert("dct:publisher".into(), Value::Array(publishers));
    }

    let contacts: Vec<Value> = list(Field::Contact).into_iter().map(contact_point).collect();
    if !contacts.is_empty() {
        node.insert("dcat:contactPoint".into(), Value::Array(contacts));
    }

    let licenses = list(Field::License);
    if !licenses.is_empty() {
        node.insert("dct:license".into(), json!(licenses));
    }

    let keywords = list(Field::Keywords);
    if !keywords.is_empty() {
        node.insert("dcat:keyword".into(), json!(keywords));
    }

    if !record.services.is_empty() {
        node.insert(
            "dcat:service".into(),
            Value::Array(record.services.iter().map(data_service).collect()),
        );
    }
    if !record.policies.is_empty() {
        node.insert(
            "dct:conformsTo".into(),
            Value::Array(record.policies.iter().map(policy).collect()),
        );
    }

    Value::Object(node)
}

fn contact_point(contact: String) -> Value {
    if contact.contains('@') && !contact.starts_with("http") {
        let email = if contact.starts_with("mailto:") {
            contact
        } else {
            format!("mailto:{}", contact)
        };
        json!({ "@type": "vcard:Kind", "vcard:hasEmail": { "@id": email } })
    } else if contact.starts_with("http") {
        json!({ "@type": "vcard:Kind", "vcard:hasURL": { "@id": contact } })
    } else {
        json!({ "@type": "vcard:Kind", "vcard:fn": contact })
    }
}

/// A service as a `dcat:DataService` node.
pub fn data_service(service: &ServiceEndpoint) -> Value {
    let mut node = Map::new();
    node.insert("@id".into(), json!(service.endpoint_url));
    node.insert("@type".into(), json!("dcat:DataService"));
    node.insert("dcat:endpointURL".into(), json!({ "@id": service.endpoint_url }));
    if let Some(title) = &service.title {
        node.insert("dct:title".into(), json!(title));
    }
    if let Some(standard) = &service.conforms_to {
        node.insert("dct:conformsTo".into(), json!({ "@id": standard }));
    }
    if let Some(media_type) = &service.media_type {
        node.insert("dct:format".into(), json!(media_type));
    }
    if let Some(dataset) = &service.serves_dataset {
        node.insert("dcat:servesDataset".into(), json!({ "@id": dataset }));
    }
    if let Some(kind) = &service.service_type {
        node.insert("dct:type".into(), json!(kind));
    }
    Value::Object(node)
}

fn policy(policy: &PolicyRecord) -> Value {
    let mut node = Map::new();
    node.insert("@id".into(), json!(policy.policy_uri));
    node.insert("@type".into(), json!("dct:Policy"));
    if let Some(kind) = &policy.policy_type {
        node.insert("dct:type".into(), json!(kind));
    }
    if let Some(title) = &policy.title {
        node.insert("dct:title".into(), json!(title));
    }
    Value::Object(node)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{PartialRecord, SourceKind};

    fn record() -> RepositoryRecord {
        let mut partial = PartialRecord::new(SourceKind::SelfHosted);
        partial.set_one(Field::Title, "PANGAEA");
        partial.set(Field::Contact, vec!["info@pangaea.de".into(), "https://pangaea.de/contact".into()]);
        partial.set_one(Field::Publisher, "Alfred Wegener Institute");
        partial.set_one(Field::Country, "DE");
        let mut oai = ServiceEndpoint::new("https://ws.pangaea.de/oai/");
        oai.conforms_to = Some("http://www.openarchives.org/OAI/2.0/".into());
        partial.add_service(oai);
        partial.add_policy(PolicyRecord {
            policy_type: None,
            policy_uri: "https://pangaea.de/terms".into(),
            title: Some("Terms".into()),
        });

        let mut record = RepositoryRecord::new("https://pangaea.de");
        record.absorb(partial, 0, Utc::now());
        record
    }

    #[test]
    fn test_export_shapes_catalog_record() {
        let doc = Exporter::default().export(&record());
        assert!(doc.complete);
        assert!(doc.missing_fields.is_empty());
        assert_eq!(doc.repo_uri, "https://pangaea.de");

        assert_eq!(doc.metadata["@type"], "dcat:CatalogRecord");
        assert_eq!(doc.metadata["@id"], "eden://harvester/merged/https://pangaea.de");
        let catalog = &doc.metadata["prov:hadPrimarySource"];
        assert_eq!(catalog["@type"], "dcat:Catalog");
        assert_eq!(catalog["dct:title"], "PANGAEA");
        assert_eq!(catalog["dct:publisher"][0]["vcard:country-name"], "DE");
        assert_eq!(
            catalog["dcat:contactPoint"][0]["vcard:hasEmail"]["@id"],
            "mailto:info@pangaea.de"
        );
        assert_eq!(
            catalog["dcat:contactPoint"][1]["vcard:hasURL"]["@id"],
            "https://pangaea.de/contact"
        );
        assert_eq!(catalog["dct:conformsTo"][0]["@type"], "dct:Policy");

        assert_eq!(doc.services.len(), 1);
        assert_eq!(
            doc.services[0]["dcat:endpointURL"]["@id"],
            "https://ws.pangaea.de/oai/"
        );
    }

    #[test]
    fn test_missing_title_flags_incomplete() {
        let mut partial = PartialRecord::new(SourceKind::Re3Data);
        partial.set_one(Field::Description, "No title here");
        let mut record = RepositoryRecord::new("https://example.org");
        record.absorb(partial, 1, Utc::now());

        let doc = Exporter::default().export(&record);
        assert!(!doc.complete);
        assert_eq!(doc.missing_fields, vec!["title".to_string()]);
    }

    fn country_record(publishers: &[&str]) -> RepositoryRecord {
        let mut partial = PartialRecord::new(SourceKind::Re3Data);
        partial.set_one(Field::Title, "Archive");
        partial.set_one(Field::Country, "Germany");
        if !publishers.is_empty() {
            partial.set(Field::Publisher, publishers.iter().map(|p| p.to_string()).collect());
        }
        let mut record = RepositoryRecord::new("https://example.org");
        record.absorb(partial, 1, Utc::now());
        record
    }

    #[test]
    fn test_country_kept_without_publisher() {
        let doc = Exporter::default().export(&country_record(&[]));
        let catalog = &doc.metadata["prov:hadPrimarySource"];
        assert!(catalog.get("dct:publisher").is_none());
        assert_eq!(catalog["vcard:country-name"], "Germany");
    }

    #[test]
    fn test_country_not_repeated_across_publishers() {
        let doc = Exporter::default().export(&country_record(&["AWI", "MARUM"]));
        let catalog = &doc.metadata["prov:hadPrimarySource"];
        assert_eq!(catalog["vcard:country-name"], "Germany");
        let publishers = catalog["dct:publisher"].as_array().unwrap();
        assert_eq!(publishers.len(), 2);
        assert!(publishers.iter().all(|p| p.get("vcard:country-name").is_none()));
    }

    #[test]
    fn test_graph_uri_format() {
        assert_eq!(
            graph_uri("eden", "re3data", "https://zenodo.org"),
            "eden://harvester/re3data/https://zenodo.org"
        );
    }

    #[test]
    fn test_export_serializes_top_level_keys() {
        let value = serde_json::to_value(Exporter::default().export(&record())).unwrap();
        for key in ["repoURI", "metadata", "services", "provenance", "complete", "missingFields"] {
            assert!(value.get(key).is_some(), "missing {}", key);
        }
        assert_eq!(value["provenance"]["title"]["source"], "self-hosted");
    }
}

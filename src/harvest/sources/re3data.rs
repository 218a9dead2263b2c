//! re3data.org registry harvester (XML API, schema 2.2).

use crate::harvest::formats::jsonld::Collect;
use crate::harvest::formats::xml::XmlNode;
use crate::harvest::hostname::{host_of, hostnames_match, match_score};
use crate::harvest::traits::HttpFetcher;
use crate::model::{Field, PartialRecord, PolicyRecord, ServiceEndpoint, SourceKind};
use crate::traits::{HarvestTarget, MetadataSource, SourceFailure};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

pub const DEFAULT_RE3DATA_API: &str = "https://www.re3data.org/api/beta";
pub const DEFAULT_MAX_CANDIDATES: usize = 10;

const XML_ACCEPT: &str = "application/xml, text/xml;q=0.9";
const RESOURCE_TYPE: &str = "r3d:Repository";

/// Maps re3data element local names to one field.
#[derive(Debug, Clone, Copy)]
pub struct ElementRule {
    pub field: Field,
    pub elements: &'static [&'static str],
    pub collect: Collect,
}

pub const RE3DATA_RULES: &[ElementRule] = &[
    ElementRule {
        field: Field::Title,
        elements: &["repositoryName"],
        collect: Collect::First,
    },
    ElementRule {
        field: Field::Description,
        elements: &["description"],
        collect: Collect::First,
    },
    ElementRule {
        field: Field::Identifier,
        elements: &["re3data.orgIdentifier", "repositoryURL", "repositoryIdentifier"],
        collect: Collect::All,
    },
    ElementRule {
        field: Field::Publisher,
        elements: &["institutionName"],
        collect: Collect::All,
    },
    ElementRule {
        field: Field::Country,
        elements: &["institutionCountry"],
        collect: Collect::First,
    },
    ElementRule {
        field: Field::Language,
        elements: &["repositoryLanguage"],
        collect: Collect::First,
    },
    ElementRule {
        field: Field::License,
        elements: &["databaseLicenseURL", "dataLicenseURL"],
        collect: Collect::All,
    },
    ElementRule {
        field: Field::Keywords,
        elements: &["keyword", "subject"],
        collect: Collect::All,
    },
    ElementRule {
        field: Field::LandingPage,
        elements: &["repositoryURL"],
        collect: Collect::First,
    },
    ElementRule {
        field: Field::AccessTerms,
        elements: &["databaseAccessType", "dataAccessType"],
        collect: Collect::First,
    },
];

/// Protocol acronyms used by `apiType` / `syndicationType` and the
/// standard each one conforms to.
pub const PROTOCOL_STANDARDS: &[(&str, &str)] = &[
    ("OAI-PMH", "http://www.openarchives.org/OAI/2.0/"),
    ("SPARQL", "https://www.w3.org/TR/sparql11-protocol/"),
    ("SWORD", "http://swordapp.org/"),
    ("OpenDAP", "https://www.opendap.org/"),
    ("FTP", "https://www.rfc-editor.org/rfc/rfc959"),
    ("SOAP", "https://www.w3.org/TR/soap/"),
    ("OpenSearch", "https://github.com/dewitt/opensearch"),
    ("CSW", "http://www.opengis.net/cat/csw/2.0.2"),
    ("RSS", "https://www.rssboard.org/rss-specification"),
    ("ATOM", "https://www.rfc-editor.org/rfc/rfc4287"),
];

pub fn protocol_standard(acronym: &str) -> Option<&'static str> {
    PROTOCOL_STANDARDS
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(acronym.trim()))
        .map(|(_, uri)| *uri)
}

/// ISO 3166-1 alpha-3 codes used by `institutionCountry`. `AAA` and `EEC`
/// are re3data's codes for international and European Union institutions.
pub const COUNTRY_NAMES: &[(&str, &str)] = &[
    ("AAA", "International"),
    ("ARG", "Argentina"),
    ("AUS", "Australia"),
    ("AUT", "Austria"),
    ("BEL", "Belgium"),
    ("BGR", "Bulgaria"),
    ("BRA", "Brazil"),
    ("CAN", "Canada"),
    ("CHE", "Switzerland"),
    ("CHL", "Chile"),
    ("CHN", "China"),
    ("COL", "Colombia"),
    ("CZE", "Czechia"),
    ("DEU", "Germany"),
    ("DNK", "Denmark"),
    ("EEC", "European Union"),
    ("EGY", "Egypt"),
    ("ESP", "Spain"),
    ("EST", "Estonia"),
    ("ETH", "Ethiopia"),
    ("FIN", "Finland"),
    ("FRA", "France"),
    ("GBR", "United Kingdom"),
    ("GHA", "Ghana"),
    ("GRC", "Greece"),
    ("HKG", "Hong Kong"),
    ("HRV", "Croatia"),
    ("HUN", "Hungary"),
    ("IDN", "Indonesia"),
    ("IND", "India"),
    ("IRL", "Ireland"),
    ("IRN", "Iran"),
    ("ISL", "Iceland"),
    ("ISR", "Israel"),
    ("ITA", "Italy"),
    ("JPN", "Japan"),
    ("KEN", "Kenya"),
    ("KOR", "South Korea"),
    ("LTU", "Lithuania"),
    ("LUX", "Luxembourg"),
    ("LVA", "Latvia"),
    ("MEX", "Mexico"),
    ("MYS", "Malaysia"),
    ("NGA", "Nigeria"),
    ("NLD", "Netherlands"),
    ("NOR", "Norway"),
    ("NZL", "New Zealand"),
    ("PAK", "Pakistan"),
    ("PER", "Peru"),
    ("PHL", "Philippines"),
    ("POL", "Poland"),
    ("PRT", "Portugal"),
    ("ROU", "Romania"),
    ("RUS", "Russia"),
    ("SAU", "Saudi Arabia"),
    ("SGP", "Singapore"),
    ("SRB", "Serbia"),
    ("SVK", "Slovakia"),
    ("SVN", "Slovenia"),
    ("SWE", "Sweden"),
    ("THA", "Thailand"),
    ("TUR", "Turkey"),
    ("TWN", "Taiwan"),
    ("UKR", "Ukraine"),
    ("URY", "Uruguay"),
    ("USA", "United States"),
    ("VNM", "Vietnam"),
    ("ZAF", "South Africa"),
];

/// Resolves an alpha-3 code to a country name. Anything else, including
/// unknown codes, is returned unchanged.
pub fn country_name(value: &str) -> String {
    let code = value.trim();
    if code.len() == 3 && code.bytes().all(|b| b.is_ascii_uppercase()) {
        if let Some((_, name)) = COUNTRY_NAMES.iter().find(|(c, _)| *c == code) {
            return name.to_string();
        }
    }
    value.to_string()
}

/// A search hit from the repository list endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub id: String,
    pub name: Option<String>,
}

pub struct Re3DataHarvester {
    fetcher: Arc<dyn HttpFetcher>,
    api_base: String,
    max_candidates: usize,
}

impl Re3DataHarvester {
    pub fn new(fetcher: Arc<dyn HttpFetcher>, api_base: impl Into<String>, max_candidates: usize) -> Self {
        Self {
            fetcher,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            max_candidates: max_candidates.max(1),
        }
    }

    /// Finds the registry entry whose `repositoryURL` host matches `url`.
    ///
    /// Among several matching candidates the closest hostname wins, ties
    /// going to the first listed.
    ///
    /// # Errors
    ///
    /// [`SourceFailure::Empty`] when no candidate matches.
    pub async fn harvest_by_url(&self, url: &str) -> Result<PartialRecord, SourceFailure> {
        let hostname = host_of(url)
            .ok_or_else(|| SourceFailure::Malformed(format!("no hostname in {}", url)))?;
        let candidates = self.search(&hostname).await?;
        info!(hostname = %hostname, candidates = candidates.len(), "re3data search returned");

        let mut best: Option<(usize, XmlNode)> = None;
        for candidate in candidates.iter().take(self.max_candidates) {
            let record = match self.fetch_record(&candidate.id).await {
                Ok(record) => record,
                Err(e) => {
                    warn!(id = %candidate.id, error = %e, "Skipping unreadable re3data candidate");
                    continue;
                }
            };
            let Some(registered) = record
                .find_all("repositoryURL")
                .first()
                .and_then(|n| host_of(&n.text))
            else {
                continue;
            };
            debug!(id = %candidate.id, query = %hostname, found = %registered, "Verifying hostname");
            if !hostnames_match(&hostname, &registered) {
                continue;
            }
            let score = match_score(&hostname, &registered);
            if best.as_ref().map(|(s, _)| score > *s).unwrap_or(true) {
                best = Some((score, record));
            }
        }

        match best {
            Some((_, record)) => Ok(record_from_xml(&record)),
            None => Err(SourceFailure::Empty(format!(
                "no re3data entry registered for {}",
                hostname
            ))),
        }
    }

    /// Looks up an entry directly by its re3data identifier.
    pub async fn harvest_by_id(&self, id: &str) -> Result<PartialRecord, SourceFailure> {
        info!(id = %id, "Harvesting re3data entry by id");
        let record = self.fetch_record(id).await?;
        Ok(record_from_xml(&record))
    }

    /// Uses the first search hit whose listed name contains `name`.
    pub async fn harvest_by_name(&self, name: &str) -> Result<PartialRecord, SourceFailure> {
        let wanted = name.trim().to_lowercase();
        let candidates = self.search(name.trim()).await?;
        let hit = candidates.into_iter().find(|c| {
            c.name
                .as_deref()
                .map(|n| n.to_lowercase().contains(&wanted))
                .unwrap_or(false)
        });
        match hit {
            Some(candidate) => self.harvest_by_id(&candidate.id).await,
            None => Err(SourceFailure::Empty(format!(
                "no re3data entry named like '{}'",
                name
            ))),
        }
    }

    pub async fn search(&self, query: &str) -> Result<Vec<Candidate>, SourceFailure> {
        let mut url = Url::parse(&format!("{}/repositories", self.api_base))
            .map_err(|e| SourceFailure::Malformed(format!("invalid re3data base URL: {}", e)))?;
        url.query_pairs_mut().append_pair("query", query);

        let doc = self.fetcher.get(url.as_str(), XML_ACCEPT).await?;
        let root = XmlNode::parse(&doc.body)
            .map_err(|e| SourceFailure::Malformed(format!("re3data search: {}", e)))?;
        Ok(parse_candidates(&root))
    }

    async fn fetch_record(&self, id: &str) -> Result<XmlNode, SourceFailure> {
        let url = format!("{}/repository/{}", self.api_base, id.trim());
        let doc = self.fetcher.get(&url, XML_ACCEPT).await?;
        XmlNode::parse(&doc.body)
            .map_err(|e| SourceFailure::Malformed(format!("re3data record {}: {}", id, e)))
    }
}

pub fn parse_candidates(root: &XmlNode) -> Vec<Candidate> {
    root.find_all("repository")
        .into_iter()
        .filter_map(|repo| {
            let id = repo.child_text("id")?;
            Some(Candidate {
                id: id.to_string(),
                name: repo.child_text("name").map(str::to_string),
            })
        })
        .collect()
}

/// Applies [`RE3DATA_RULES`] plus the service, policy and contact mappings.
pub fn record_from_xml(root: &XmlNode) -> PartialRecord {
    let mut record = PartialRecord::new(SourceKind::Re3Data);

    for rule in RE3DATA_RULES {
        let mut values = Vec::new();
        let mut found = false;
        for element in rule.elements {
            let nodes = root.find_all(element);
            found |= !nodes.is_empty();
            values.extend(nodes.into_iter().map(|n| n.text.clone()).filter(|t| !t.is_empty()));
            if rule.collect == Collect::First && !values.is_empty() {
                break;
            }
        }
        if rule.field == Field::Country {
            values = values.iter().map(|v| country_name(v)).collect();
        }
        if found {
            record.set(rule.field, values);
        }
    }
    record.set_one(Field::ResourceType, RESOURCE_TYPE);

    record.registry_id = root
        .find_all("re3data.orgIdentifier")
        .first()
        .map(|n| n.text.clone())
        .filter(|id| !id.is_empty());

    let contacts: Vec<String> = root
        .find_all("repositoryContact")
        .into_iter()
        .map(|n| n.text.clone())
        .collect();
    let (emails, others): (Vec<String>, Vec<String>) =
        contacts.into_iter().partition(|c| c.contains('@'));
    let mut contact: Vec<String> = emails;
    contact.extend(others.into_iter().filter(|c| c.starts_with("http")));
    if !contact.is_empty() {
        record.set(Field::Contact, contact);
    }

    for (element, attr, kind, suffix) in [
        ("api", "apiType", "API", "API"),
        ("syndication", "syndicationType", "Syndication", "Feed"),
    ] {
        for node in root.find_all(element) {
            if node.text.is_empty() {
                continue;
            }
            let protocol = node.attr(attr).filter(|p| !p.is_empty());
            let mut service = ServiceEndpoint::new(node.text.clone());
            service.service_type = Some(match protocol {
                Some(p) => format!("re3data:{}:{}", kind, p),
                None => format!("re3data:{}", kind),
            });
            service.title = Some(match protocol {
                Some(p) => format!("{} {}", p, suffix),
                None => format!("{} Service", kind),
            });
            service.conforms_to = protocol.and_then(protocol_standard).map(str::to_string);
            record.add_service(service);
        }
    }

    for policy in root.find_all("policy") {
        let Some(uri) = policy.child_text("policyURL") else {
            continue;
        };
        record.add_policy(PolicyRecord {
            policy_type: Some("re3data:Policy".to_string()),
            policy_uri: uri.to_string(),
            title: policy.child_text("policyName").map(str::to_string),
        });
    }

    record
}

#[async_trait]
impl MetadataSource for Re3DataHarvester {
    fn kind(&self) -> SourceKind {
        SourceKind::Re3Data
    }

    async fn harvest(&self, target: &HarvestTarget) -> Result<PartialRecord, SourceFailure> {
        match target.re3data_id.as_deref() {
            Some(id) => self.harvest_by_id(id).await,
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
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn record_xml(id: &str, name: &str, url: &str) -> String {
        format!(
            r#"<?xml version="1.0" encoding="utf-8"?>
<r3d:re3data xmlns:r3d="http://www.re3data.org/schema/2-2">
  <r3d:repository>
    <r3d:re3data.orgIdentifier>{id}</r3d:re3data.orgIdentifier>
    <r3d:repositoryName language="eng">{name}</r3d:repositoryName>
    <r3d:repositoryURL>{url}</r3d:repositoryURL>
    <r3d:repositoryIdentifier>https://doi.org/10.17616/R3{id}</r3d:repositoryIdentifier>
    <r3d:description language="eng">Registry description of {name}</r3d:description>
    <r3d:repositoryContact>info@example.org</r3d:repositoryContact>
    <r3d:repositoryContact>https://example.org/contact</r3d:repositoryContact>
    <r3d:subject subjectScheme="DFG">34 Geosciences</r3d:subject>
    <r3d:keyword>ocean</r3d:keyword>
    <r3d:institution>
      <r3d:institutionName language="eng">Alfred Wegener Institute</r3d:institutionName>
      <r3d:institutionCountry>DEU</r3d:institutionCountry>
    </r3d:institution>
    <r3d:policy>
      <r3d:policyName>Terms of use</r3d:policyName>
      <r3d:policyURL>https://example.org/terms</r3d:policyURL>
    </r3d:policy>
    <r3d:databaseAccess><r3d:databaseAccessType>open</r3d:databaseAccessType></r3d:databaseAccess>
    <r3d:databaseLicense>
      <r3d:databaseLicenseName>CC</r3d:databaseLicenseName>
      <r3d:databaseLicenseURL>https://creativecommons.org/licenses/by/4.0/</r3d:databaseLicenseURL>
    </r3d:databaseLicense>
    <r3d:api apiType="OAI-PMH">https://ws.example.org/oai/</r3d:api>
    <r3d:syndication syndicationType="RSS">https://example.org/feed</r3d:syndication>
  </r3d:repository>
</r3d:re3data>"#
        )
    }

    fn list_xml(entries: &[(&str, &str)]) -> String {
        let items: String = entries
            .iter()
            .map(|(id, name)| format!("<repository><id>{}</id><name>{}</name></repository>", id, name))
            .collect();
        format!("<?xml version=\"1.0\"?><list>{}</list>", items)
    }

    fn harvester(server: &MockServer) -> Re3DataHarvester {
        let fetcher = ReqwestFetcher::new(DEFAULT_USER_AGENT, Duration::from_secs(5)).unwrap();
        Re3DataHarvester::new(Arc::new(fetcher), server.uri(), DEFAULT_MAX_CANDIDATES)
    }

    async fn mount_record(server: &MockServer, id: &str, name: &str, url: &str) {
        Mock::given(method("GET"))
            .and(path(format!("/repository/{}", id)))
            .respond_with(ResponseTemplate::new(200).set_body_string(record_xml(id, name, url)))
            .mount(server)
            .await;
    }

    #[test]
    fn test_record_from_xml_maps_fields_services_and_policies() {
        let root = XmlNode::parse(&record_xml("r3d100010134", "PANGAEA", "https://www.pangaea.de/")).unwrap();
        let record = record_from_xml(&root);

        assert_eq!(record.registry_id.as_deref(), Some("r3d100010134"));
        assert_eq!(record.get(Field::Title), Some(&FieldValue::Single("PANGAEA".into())));
        assert_eq!(record.get(Field::Country), Some(&FieldValue::Single("Germany".into())));
        assert_eq!(
            record.get(Field::Keywords),
            Some(&FieldValue::Many(vec!["ocean".into(), "34 Geosciences".into()]))
        );
        assert_eq!(
            record.get(Field::Contact),
            Some(&FieldValue::Many(vec![
                "info@example.org".into(),
                "https://example.org/contact".into()
            ]))
        );
        assert_eq!(record.get(Field::AccessTerms), Some(&FieldValue::Single("open".into())));
        assert_eq!(
            record.get(Field::ResourceType),
            Some(&FieldValue::Single("r3d:Repository".into()))
        );

        assert_eq!(record.services.len(), 2);
        assert_eq!(
            record.services[0].conforms_to.as_deref(),
            Some("http://www.openarchives.org/OAI/2.0/")
        );
        assert_eq!(record.services[0].title.as_deref(), Some("OAI-PMH API"));
        assert_eq!(record.services[1].service_type.as_deref(), Some("re3data:Syndication:RSS"));

        assert_eq!(record.policies.len(), 1);
        assert_eq!(record.policies[0].title.as_deref(), Some("Terms of use"));
    }

    #[test]
    fn test_country_name_resolves_alpha3_codes() {
        assert_eq!(country_name("DEU"), "Germany");
        assert_eq!(country_name("EEC"), "European Union");
        assert_eq!(country_name("XYZ"), "XYZ");
        assert_eq!(country_name("deu"), "deu");
        assert_eq!(country_name("Germany"), "Germany");
    }

    #[tokio::test]
    async fn test_closest_hostname_wins_over_first_listed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repositories"))
            .and(query_param("query", "about.example.org"))
            .respond_with(ResponseTemplate::new(200).set_body_string(list_xml(&[
                ("r3d1", "Unrelated"),
                ("r3d2", "Example parent"),
                ("r3d3", "Example about"),
            ])))
            .mount(&server)
            .await;
        mount_record(&server, "r3d1", "Unrelated", "https://otherexample.org").await;
        mount_record(&server, "r3d2", "Example parent", "https://example.org").await;
        mount_record(&server, "r3d3", "Example about", "https://about.example.org/").await;

        let record = harvester(&server)
            .harvest_by_url("https://about.example.org")
            .await
            .unwrap();
        assert_eq!(record.registry_id.as_deref(), Some("r3d3"));
    }

    #[tokio::test]
    async fn test_no_matching_candidate_is_source_empty() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repositories"))
            .respond_with(ResponseTemplate::new(200).set_body_string(list_xml(&[("r3d1", "Other")])))
            .mount(&server)
            .await;
        mount_record(&server, "r3d1", "Other", "https://otherexample.org").await;

        let result = harvester(&server).harvest_by_url("https://example.org").await;
        assert_eq!(result.unwrap_err().class(), "source-empty");
    }

    #[tokio::test]
    async fn test_lookup_by_name_and_id() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repositories"))
            .and(query_param("query", "pangaea"))
            .respond_with(ResponseTemplate::new(200).set_body_string(list_xml(&[
                ("r3d9", "Something else"),
                ("r3d100010134", "PANGAEA"),
            ])))
            .mount(&server)
            .await;
        mount_record(&server, "r3d100010134", "PANGAEA", "https://www.pangaea.de/").await;

        let harvester = harvester(&server);
        let by_name = harvester.harvest_by_name("pangaea").await.unwrap();
        assert_eq!(by_name.registry_id.as_deref(), Some("r3d100010134"));

        let target = HarvestTarget::new("https://unrelated.org").with_re3data_id(Some("r3d100010134".into()));
        let by_id = harvester.harvest(&target).await.unwrap();
        assert_eq!(by_id, by_name);
    }

    #[tokio::test]
    async fn test_malformed_search_response() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repositories"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<list><repository>"))
            .mount(&server)
            .await;

        let result = harvester(&server).harvest_by_url("https://example.org").await;
        assert_eq!(result.unwrap_err().class(), "malformed-input");
    }
}

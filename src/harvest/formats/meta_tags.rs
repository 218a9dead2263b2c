//! Declarative HTML meta tag → field mapping.
//!
//! Tag names are compared lowercased and by suffix, so `dct.title`,
//! `DC.Title` and `og:title` all satisfy the sought name `title`. Suffix
//! matching is deliberately loose: `subtitle` satisfies `title` too.

use super::html::MetaTag;
use super::jsonld::Collect;
use crate::model::{Field, PartialRecord, SourceKind};

/// Maps meta tag names (matched by suffix) to one field.
#[derive(Debug, Clone, Copy)]
pub struct MetaTagRule {
    pub field: Field,
    pub names: &'static [&'static str],
    pub collect: Collect,
}

pub const META_TAG_RULES: &[MetaTagRule] = &[
    MetaTagRule {
        field: Field::Title,
        names: &["title"],
        collect: Collect::First,
    },
    MetaTagRule {
        field: Field::Description,
        names: &["description", "abstract"],
        collect: Collect::First,
    },
    MetaTagRule {
        field: Field::Publisher,
        names: &["publisher", "author"],
        collect: Collect::First,
    },
    MetaTagRule {
        field: Field::Language,
        names: &["language"],
        collect: Collect::First,
    },
    MetaTagRule {
        field: Field::License,
        names: &["license", "rights"],
        collect: Collect::First,
    },
    MetaTagRule {
        field: Field::Keywords,
        names: &["keywords", "subject"],
        collect: Collect::All,
    },
    MetaTagRule {
        field: Field::Identifier,
        names: &["identifier"],
        collect: Collect::All,
    },
    MetaTagRule {
        field: Field::LandingPage,
        names: &["url"],
        collect: Collect::First,
    },
];

/// Whether a tag named `tag` satisfies the sought `name`.
pub fn tag_matches(tag: &str, name: &str) -> bool {
    tag.to_lowercase().ends_with(&name.to_lowercase())
}

/// Applies [`META_TAG_RULES`] to the meta tags of a page, in document order.
pub fn record_from_meta_tags(tags: &[MetaTag], source: SourceKind) -> PartialRecord {
    let mut record = PartialRecord::new(source);
    for rule in META_TAG_RULES {
        let matching: Vec<&MetaTag> = tags
            .iter()
            .filter(|tag| rule.names.iter().any(|name| tag_matches(&tag.name, name)))
            .collect();
        if matching.is_empty() {
            continue;
        }
        let values: Vec<String> = match rule.collect {
            Collect::First => matching
                .iter()
                .map(|tag| tag.content.clone())
                .find(|content| !content.is_empty())
                .into_iter()
                .collect(),
            Collect::All => matching
                .iter()
                .flat_map(|tag| tag.content.split([',', ';']))
                .map(|v| v.trim().to_string())
                .collect(),
        };
        record.set(rule.field, values);
    }
    record
}

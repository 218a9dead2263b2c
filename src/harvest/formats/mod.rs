//! Document formats the harvester reads.
//!
//! Everything here is synchronous and network-free except
//! [`signposting::SignpostingResolver`], which fetches linksets.

pub mod graph;
pub mod html;
pub mod jsonld;
pub mod meta_tags;
pub mod paths;
pub mod signposting;
pub mod xml;

pub use graph::NormalizedGraph;
pub use html::{HtmlPage, LinkElement, MetaTag};
pub use jsonld::{record_from_graph, Collect, PropertyRule, JSONLD_RULES};
pub use meta_tags::{record_from_meta_tags, MetaTagRule, META_TAG_RULES};
pub use signposting::{SignpostingLink, SignpostingResolver};
pub use xml::{XmlError, XmlNode};

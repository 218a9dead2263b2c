//! Landing page HTML extraction.
//!
//! The parsed DOM is not `Send`, so [`HtmlPage::parse`] pulls everything the
//! harvester needs into owned data in one pass and drops the DOM.

use scraper::{Html, Selector};

/// A `<meta>` element with a `name` or `property` attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetaTag {
    /// Lowercased `name` (or `property`) attribute
    pub name: String,
    pub content: String,
}

/// A `<link>` element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkElement {
    pub rel: String,
    pub href: String,
    pub media_type: Option<String>,
}

/// Harvest-relevant content of an HTML page.
#[derive(Debug, Clone, Default)]
pub struct HtmlPage {
    /// Text of every `<script type="application/ld+json">` block
    pub jsonld_blocks: Vec<String>,
    pub meta_tags: Vec<MetaTag>,
    pub links: Vec<LinkElement>,
}

impl HtmlPage {
    pub fn parse(html: &str) -> Self {
        let document = Html::parse_document(html);
        let mut page = HtmlPage::default();

        if let Ok(selector) = Selector::parse("script[type]") {
            page.jsonld_blocks = document
                .select(&selector)
                .filter(|el| {
                    el.value()
                        .attr("type")
                        .map(|t| t.trim().eq_ignore_ascii_case("application/ld+json"))
                        .unwrap_or(false)
                })
                .map(|el| el.text().collect::<String>())
                .filter(|text| !text.trim().is_empty())
                .collect();
        }

        if let Ok(selector) = Selector::parse("meta") {
            page.meta_tags = document
                .select(&selector)
                .filter_map(|el| {
                    let attrs = el.value();
                    let name = attrs.attr("name").or_else(|| attrs.attr("property"))?;
                    Some(MetaTag {
                        name: name.trim().to_lowercase(),
                        content: attrs.attr("content").unwrap_or_default().trim().to_string(),
                    })
                })
                .collect();
        }

        if let Ok(selector) = Selector::parse("link[href]") {
            page.links = document
                .select(&selector)
                .filter_map(|el| {
                    let attrs = el.value();
                    Some(LinkElement {
                        rel: attrs.attr("rel")?.trim().to_lowercase(),
                        href: attrs.attr("href")?.trim().to_string(),
                        media_type: attrs.attr("type").map(|t| t.trim().to_lowercase()),
                    })
                })
                .collect();
        }

        page
    }
}

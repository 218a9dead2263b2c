//! Minimal owned XML tree over `quick-xml` events.
//!
//! Element and attribute names are stored as local names (namespace prefix
//! dropped), which is all the registry records need.

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum XmlError {
    #[error("Malformed XML: {0}")]
    Syntax(String),

    #[error("XML document has no root element")]
    NoRoot,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct XmlNode {
    pub name: String,
    pub attrs: BTreeMap<String, String>,
    /// Concatenated, trimmed text content of this element only
    pub text: String,
    pub children: Vec<XmlNode>,
}

impl XmlNode {
    /// Parses a document and returns its root element.
    pub fn parse(input: &str) -> Result<XmlNode, XmlError> {
        let mut reader = Reader::from_str(input);
        reader.config_mut().trim_text(true);

        let mut stack: Vec<XmlNode> = Vec::new();
        let mut root: Option<XmlNode> = None;

        loop {
            match reader.read_event().map_err(|e| XmlError::Syntax(e.to_string()))? {
                Event::Start(start) => stack.push(element(&start)?),
                Event::Empty(start) => {
                    let node = element(&start)?;
                    attach(&mut stack, &mut root, node);
                }
                Event::End(_) => {
                    if let Some(mut node) = stack.pop() {
                        node.text = node.text.trim().to_string();
                        attach(&mut stack, &mut root, node);
                    }
                }
                Event::Text(text) => {
                    if let Some(current) = stack.last_mut() {
                        let text = text.unescape().map_err(|e| XmlError::Syntax(e.to_string()))?;
                        current.text.push_str(&text);
                    }
                }
                Event::CData(data) => {
                    if let Some(current) = stack.last_mut() {
                        current.text.push_str(&String::from_utf8_lossy(&data));
                    }
                }
                Event::Eof => break,
                _ => {}
            }
        }

        if !stack.is_empty() {
            return Err(XmlError::Syntax("unclosed element at end of input".into()));
        }
        root.ok_or(XmlError::NoRoot)
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs.get(name).map(String::as_str)
    }

    pub fn child(&self, name: &str) -> Option<&XmlNode> {
        self.children.iter().find(|c| c.name == name)
    }

    /// Text of the first direct child named `name`, if non-empty.
    pub fn child_text(&self, name: &str) -> Option<&str> {
        self.child(name)
            .map(|c| c.text.as_str())
            .filter(|t| !t.is_empty())
    }

    /// All descendants (and self) named `name`, in document order.
    pub fn find_all<'a>(&'a self, name: &str) -> Vec<&'a XmlNode> {
        let mut found = Vec::new();
        self.collect(name, &mut found);
        found
    }

    /// Follows a `/`-separated chain of child names, fanning out over
    /// repeated elements.
    pub fn select<'a>(&'a self, path: &str) -> Vec<&'a XmlNode> {
        let mut current = vec![self];
        for step in path.split('/').filter(|s| !s.is_empty()) {
            current = current
                .into_iter()
                .flat_map(|node| node.children.iter().filter(move |c| c.name == step))
                .collect();
        }
        current
    }

    fn collect<'a>(&'a self, name: &str, found: &mut Vec<&'a XmlNode>) {
        if self.name == name {
            found.push(self);
        }
        for child in &self.children {
            child.collect(name, found);
        }
    }
}

fn element(start: &BytesStart<'_>) -> Result<XmlNode, XmlError> {
    let mut node = XmlNode {
        name: String::from_utf8_lossy(start.local_name().as_ref()).into_owned(),
        ..Default::default()
    };
    for attr in start.attributes() {
        let attr = attr.map_err(|e| XmlError::Syntax(e.to_string()))?;
        let key = String::from_utf8_lossy(attr.key.local_name().as_ref()).into_owned();
        let value = attr
            .unescape_value()
            .map_err(|e| XmlError::Syntax(e.to_string()))?;
        node.attrs.insert(key, value.trim().to_string());
    }
    Ok(node)
}

fn attach(stack: &mut [XmlNode], root: &mut Option<XmlNode>, node: XmlNode) {
    match stack.last_mut() {
        Some(parent) => parent.children.push(node),
        None => {
            if root.is_none() {
                *root = Some(node);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<r3d:re3data xmlns:r3d="http://www.re3data.org/schema/2-2">
  <r3d:repository>
    <r3d:repositoryName language="eng">PANGAEA &amp; friends</r3d:repositoryName>
    <r3d:keyword>ocean</r3d:keyword>
    <r3d:keyword>climate</r3d:keyword>
    <r3d:api apiType="OAI-PMH">https://ws.pangaea.de/oai/</r3d:api>
    <r3d:description><![CDATA[Earth <b>data</b>]]></r3d:description>
    <r3d:empty/>
  </r3d:repository>
</r3d:re3data>"#;

    #[test]
    fn test_parse_strips_prefixes_and_unescapes() {
        let root = XmlNode::parse(DOC).unwrap();
        assert_eq!(root.name, "re3data");
        let repo = root.child("repository").unwrap();
        assert_eq!(repo.child_text("repositoryName"), Some("PANGAEA & friends"));
        assert_eq!(repo.child_text("description"), Some("Earth <b>data</b>"));
        assert_eq!(repo.child_text("empty"), None);
        assert_eq!(
            repo.child("api").and_then(|a| a.attr("apiType")),
            Some("OAI-PMH")
        );
    }

    #[test]
    fn test_find_all_and_select() {
        let root = XmlNode::parse(DOC).unwrap();
        let keywords: Vec<&str> = root.find_all("keyword").iter().map(|k| k.text.as_str()).collect();
        assert_eq!(keywords, vec!["ocean", "climate"]);
        assert_eq!(root.select("repository/keyword").len(), 2);
        assert!(root.select("repository/missing").is_empty());
    }

    #[test]
    fn test_malformed_input_is_an_error() {
        assert!(matches!(
            XmlNode::parse("<a><b></a>"),
            Err(XmlError::Syntax(_))
        ));
        assert_eq!(XmlNode::parse("   "), Err(XmlError::NoRoot));
    }
}

//! JSON-LD graph normalization.
//!
//! Embedded JSON-LD in the wild is rarely clean: mixed `http`/`https` schema.org
//! namespaces, compact and expanded keys side by side, several top-level nodes
//! in a `@graph`. [`NormalizedGraph`] flattens all nodes into a table, strips
//! known vocabulary prefixes from property keys, picks the main entity and
//! rebuilds a nested document rooted at it, which the property tables in
//! [`super::jsonld`] can then query by plain local names.
//!
//! # Main entity
//!
//! Chosen by the first rule that applies:
//! 1. the document has exactly one top-level node;
//! 2. the first node whose `@type` local name ends with `Catalog` or `Repository`;
//! 3. the first node typed `WebSite`;
//! 4. the first top-level node.

use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// Vocabulary namespaces whose expanded IRIs are reduced to local names.
pub const KNOWN_VOCABULARIES: &[&str] = &[
    "http://schema.org/",
    "https://schema.org/",
    "http://www.schema.org/",
    "https://www.schema.org/",
    "http://www.w3.org/ns/dcat#",
    "http://purl.org/dc/terms/",
    "http://purl.org/dc/elements/1.1/",
    "http://xmlns.com/foaf/0.1/",
    "http://www.w3.org/2006/vcard/ns#",
    "http://www.w3.org/ns/org#",
    "http://www.w3.org/ns/prov#",
    "http://www.w3.org/2004/02/skos/core#",
    "http://www.w3.org/1999/02/22-rdf-syntax-ns#",
    "http://www.w3.org/2000/01/rdf-schema#",
    "http://www.re3data.org/schema/2-2#",
    "http://www.re3data.org/schema/2-2/",
];

const CATALOG_TYPE_SUFFIXES: &[&str] = &["Catalog", "Repository"];
const WEBSITE_TYPE: &str = "WebSite";

/// Properties that are never expanded, even when they hold a reference.
const LITERAL_KEYS: &[&str] = &["@id", "@type", "url"];

const MAX_DEPTH: usize = 16;

/// Upper bound on nodes inlined into one expanded tree. Shared nodes are
/// inlined at every reference, so without it a small DAG expands
/// exponentially; past the bound references stay `{"@id": ..}`.
const MAX_INLINED_NODES: usize = 64;

/// Rewrites a property key to its local name when it belongs to a known
/// vocabulary. Unknown full IRIs are kept untouched.
pub fn strip_key(key: &str) -> String {
    if key.starts_with('@') {
        return key.to_string();
    }
    if key.contains("://") {
        return KNOWN_VOCABULARIES
            .iter()
            .find_map(|vocab| key.strip_prefix(vocab))
            .filter(|local| !local.is_empty() && !local.contains('/'))
            .unwrap_or(key)
            .to_string();
    }
    match key.rsplit_once(':') {
        Some((_, local)) if !local.is_empty() => local.to_string(),
        _ => key.to_string(),
    }
}

/// Local name of a type or property IRI (`"schema:DataCatalog"`,
/// `"http://www.w3.org/ns/dcat#Catalog"` → `"DataCatalog"`, `"Catalog"`).
pub fn local_name(iri: &str) -> &str {
    iri.rsplit(['/', '#', ':']).next().unwrap_or(iri)
}

/// Flattened JSON-LD graph rooted at its main entity.
#[derive(Debug, Clone, Default)]
pub struct NormalizedGraph {
    nodes: Vec<(String, Map<String, Value>)>,
    index: HashMap<String, usize>,
    top_level: Vec<usize>,
    main: Option<usize>,
    root: Map<String, Value>,
    blank_counter: usize,
}

impl NormalizedGraph {
    /// Parses JSON-LD text. Text that is not JSON yields an empty graph.
    pub fn parse(text: &str) -> Self {
        match serde_json::from_str::<Value>(text) {
            Ok(doc) => Self::from_value(&doc),
            Err(e) => {
                debug!(error = %e, "Skipping JSON-LD block that is not valid JSON");
                Self::default()
            }
        }
    }

    /// Normalizes a JSON-LD document. Non graph-shaped input yields an empty
    /// graph.
    pub fn from_value(doc: &Value) -> Self {
        let mut graph = Self::default();
        let mut branches = Vec::new();
        collect_branches(doc, &mut branches);

        for branch in branches {
            if let Some(id) = graph.collect(branch) {
                if let Some(&slot) = graph.index.get(&id) {
                    if !graph.top_level.contains(&slot) {
                        graph.top_level.push(slot);
                    }
                }
            }
        }

        graph.main = graph.detect_main();
        if let Some(main) = graph.main {
            graph.root = graph.expand(main, &mut Expansion::new(), 0);
        }
        graph
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_empty()
    }

    /// The main entity with referenced nodes inlined.
    pub fn root(&self) -> &Map<String, Value> {
        &self.root
    }

    /// The main entity as a JSON value, for path lookups.
    pub fn root_value(&self) -> Value {
        Value::Object(self.root.clone())
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.root.get(key)
    }

    pub fn main_id(&self) -> Option<&str> {
        self.main.map(|idx| self.nodes[idx].0.as_str())
    }

    /// Local type names of the main entity.
    pub fn main_types(&self) -> Vec<String> {
        self.main
            .map(|idx| types_of(&self.nodes[idx].1))
            .unwrap_or_default()
    }

    /// Every node other than the main entity carrying one of `types`
    /// (matched by local name), expanded.
    pub fn nodes_by_type(&self, types: &[&str]) -> Vec<Map<String, Value>> {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(idx, _)| Some(*idx) != self.main)
            .filter(|(_, (_, node))| types_of(node).iter().any(|t| types.contains(&t.as_str())))
            .map(|(idx, _)| self.expand(idx, &mut Expansion::new(), 0))
            .collect()
    }

    /// Stores `node` (and, recursively, its nested nodes) in the node table
    /// and returns its id.
    fn collect(&mut self, node: &Map<String, Value>) -> Option<String> {
        if node.contains_key("@value") {
            return None;
        }
        let explicit_id = node.get("@id").and_then(Value::as_str).map(str::to_string);
        if node.len() == 1 && explicit_id.is_some() {
            return explicit_id;
        }

        let id = explicit_id.unwrap_or_else(|| {
            self.blank_counter += 1;
            format!("_:b{}", self.blank_counter)
        });

        // Reserve the slot before descending so parents precede children.
        let slot = match self.index.get(&id) {
            Some(&existing) => existing,
            None => {
                self.nodes.push((id.clone(), Map::new()));
                self.index.insert(id.clone(), self.nodes.len() - 1);
                self.nodes.len() - 1
            }
        };

        let mut flat = Map::new();
        for (key, value) in node {
            if key == "@context" || key == "@graph" {
                continue;
            }
            let value = match value {
                Value::Object(child) => self.link(child),
                Value::Array(items) => {
                    Value::Array(items.iter().map(|item| self.link_item(item)).collect())
                }
                other => other.clone(),
            };
            flat.insert(strip_key(key), value);
        }
        flat.insert("@id".to_string(), Value::String(id.clone()));

        let target = &mut self.nodes[slot].1;
        for (key, value) in flat {
            target.entry(key).or_insert(value);
        }
        Some(id)
    }

    fn link_item(&mut self, item: &Value) -> Value {
        match item {
            Value::Object(child) => self.link(child),
            other => other.clone(),
        }
    }

    /// Replaces a nested object by a `{"@id": ..}` reference. Literal
    /// (`@value`) objects are kept inline and `@list` objects are unwrapped.
    fn link(&mut self, child: &Map<String, Value>) -> Value {
        if child.contains_key("@value") {
            return Value::Object(child.clone());
        }
        if let Some(Value::Array(items)) = child.get("@list") {
            return Value::Array(items.iter().map(|item| self.link_item(item)).collect());
        }
        match self.collect(child) {
            Some(id) => reference(id),
            None => Value::Object(child.clone()),
        }
    }

    fn detect_main(&self) -> Option<usize> {
        if self.top_level.len() == 1 {
            return self.top_level.first().copied();
        }
        self.first_typed(|t| CATALOG_TYPE_SUFFIXES.iter().any(|suffix| t.ends_with(suffix)))
            .or_else(|| self.first_typed(|t| t == WEBSITE_TYPE))
            .or_else(|| self.top_level.first().copied())
            .or_else(|| (!self.nodes.is_empty()).then_some(0))
    }

    fn first_typed(&self, pred: impl Fn(&str) -> bool) -> Option<usize> {
        self.nodes
            .iter()
            .position(|(_, node)| types_of(node).iter().any(|t| pred(t.as_str())))
    }

    fn expand(&self, idx: usize, budget: &mut Expansion, depth: usize) -> Map<String, Value> {
        budget.visiting.insert(idx);
        let mut out = Map::new();
        for (key, value) in &self.nodes[idx].1 {
            let value = if LITERAL_KEYS.contains(&key.as_str()) {
                value.clone()
            } else {
                self.expand_value(value, budget, depth + 1)
            };
            out.insert(key.clone(), value);
        }
        budget.visiting.remove(&idx);
        out
    }

    /// Inlines `{"@id": ..}` references to known nodes. Plain strings are
    /// literals and stay as they are.
    fn expand_value(&self, value: &Value, budget: &mut Expansion, depth: usize) -> Value {
        match value {
            Value::Object(map) => {
                let target = reference_id(map).and_then(|id| self.index.get(id).copied());
                match target {
                    Some(target) if budget.admits(target, depth) => {
                        budget.remaining -= 1;
                        Value::Object(self.expand(target, budget, depth))
                    }
                    _ => value.clone(),
                }
            }
            Value::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|item| self.expand_value(item, budget, depth))
                    .collect(),
            ),
            other => other.clone(),
        }
    }
}

/// State of one expansion: the nodes on the current path and how many more
/// nodes may be inlined.
struct Expansion {
    visiting: HashSet<usize>,
    remaining: usize,
}

impl Expansion {
    fn new() -> Self {
        Self {
            visiting: HashSet::new(),
            remaining: MAX_INLINED_NODES,
        }
    }

    fn admits(&self, target: usize, depth: usize) -> bool {
        self.remaining > 0 && depth <= MAX_DEPTH && !self.visiting.contains(&target)
    }
}

fn reference(id: String) -> Value {
    let mut map = Map::new();
    map.insert("@id".to_string(), Value::String(id));
    Value::Object(map)
}

/// The id of a bare node reference such as `{"@id": "_:b1"}`.
fn reference_id(map: &Map<String, Value>) -> Option<&str> {
    if map.len() == 1 {
        map.get("@id").and_then(Value::as_str)
    } else {
        None
    }
}

/// Gathers the node objects of a document: a single node, a top-level array,
/// or (possibly nested) `@graph` containers.
fn collect_branches<'a>(doc: &'a Value, out: &mut Vec<&'a Map<String, Value>>) {
    match doc {
        Value::Array(items) => {
            for item in items {
                collect_branches(item, out);
            }
        }
        Value::Object(map) => match map.get("@graph") {
            Some(graph) => collect_branches(graph, out),
            None => out.push(map),
        },
        _ => {}
    }
}

fn types_of(node: &Map<String, Value>) -> Vec<String> {
    match node.get("@type") {
        Some(Value::String(t)) => vec![local_name(t).to_string()],
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(|t| local_name(t).to_string())
            .collect(),
        _ => Vec::new(),
    }
}

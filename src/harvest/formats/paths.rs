//! Dotted-path lookups over JSON values.
//!
//! Paths such as `"license.url"` or `"attributes.metadata.name"` step through
//! object keys; arrays met on the way are flattened, so `"contactPoint.email"`
//! collects the email of every contact point.

use serde_json::Value;

/// Resolves `path` against `value`, returning every non-null match.
pub fn lookup<'a>(value: &'a Value, path: &str) -> Vec<&'a Value> {
    let mut current: Vec<&Value> = vec![value];
    for segment in path.split('.') {
        let mut next = Vec::new();
        for candidate in current {
            step(candidate, segment, &mut next);
        }
        if next.is_empty() {
            return next;
        }
        current = next;
    }
    current.into_iter().filter(|v| !v.is_null()).collect()
}

fn step<'a>(value: &'a Value, segment: &str, out: &mut Vec<&'a Value>) {
    match value {
        Value::Object(map) => {
            if let Some(child) = map.get(segment) {
                out.push(child);
            }
        }
        Value::Array(items) => {
            for item in items {
                step(item, segment, out);
            }
        }
        _ => {}
    }
}

/// Flattens matched values into strings.
///
/// Strings, numbers and booleans are taken as-is, `{"@value": ...}` literals
/// are unwrapped, arrays are flattened. Other objects yield nothing.
pub fn strings(values: &[&Value]) -> Vec<String> {
    let mut out = Vec::new();
    for value in values {
        collect_strings(value, &mut out);
    }
    out
}

fn collect_strings(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::String(s) => out.push(s.clone()),
        Value::Number(n) => out.push(n.to_string()),
        Value::Bool(b) => out.push(b.to_string()),
        Value::Array(items) => {
            for item in items {
                collect_strings(item, out);
            }
        }
        Value::Object(map) => {
            if let Some(literal) = map.get("@value") {
                collect_strings(literal, out);
            }
        }
        Value::Null => {}
    }
}

/// Tries `paths` in order and returns the strings of the first one that
/// yields any.
///
/// Returns `Some(vec![])` when a path resolved but held no usable text, and
/// `None` when no path resolved at all.
pub fn first_strings(root: &Value, paths: &[&str]) -> Option<Vec<String>> {
    let mut resolved = false;
    for path in paths {
        let found = lookup(root, path);
        if found.is_empty() {
            continue;
        }
        resolved = true;
        let values: Vec<String> = strings(&found)
            .into_iter()
            .filter(|s| !s.trim().is_empty())
            .collect();
        if !values.is_empty() {
            return Some(values);
        }
    }
    resolved.then(Vec::new)
}

/// Collects the strings of every path that resolves.
pub fn all_strings(root: &Value, paths: &[&str]) -> Option<Vec<String>> {
    let mut resolved = false;
    let mut values = Vec::new();
    for path in paths {
        let found = lookup(root, path);
        if found.is_empty() {
            continue;
        }
        resolved = true;
        values.extend(strings(&found));
    }
    resolved.then_some(values)
}

/// Returns the first string found at `path`.
pub fn first_string(root: &Value, path: &str) -> Option<String> {
    strings(&lookup(root, path))
        .into_iter()
        .map(|s| s.trim().to_string())
        .find(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_lookup_flattens_arrays() {
        let doc = json!({
            "contactPoint": [{"email": "a@example.org"}, {"email": "b@example.org"}]
        });
        let emails = strings(&lookup(&doc, "contactPoint.email"));
        assert_eq!(emails, vec!["a@example.org", "b@example.org"]);
    }

    #[test]
    fn test_first_strings_falls_through_objects_without_text() {
        let doc = json!({"license": {"@type": "CreativeWork", "name": "CC BY 4.0"}});
        let found = first_strings(&doc, &["license.url", "license.name", "license"]);
        assert_eq!(found, Some(vec!["CC BY 4.0".to_string()]));
    }

    #[test]
    fn test_first_strings_distinguishes_found_empty_from_missing() {
        let doc = json!({"keywords": ""});
        assert_eq!(first_strings(&doc, &["keywords"]), Some(vec![]));
        assert_eq!(first_strings(&doc, &["subject"]), None);
    }

    #[test]
    fn test_literal_objects_are_unwrapped() {
        let doc = json!({"headline": [{"@value": "PANGAEA", "@language": "en"}]});
        assert_eq!(first_string(&doc, "headline"), Some("PANGAEA".to_string()));
    }
}

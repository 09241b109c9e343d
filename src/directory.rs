//! Ordered attribute records for addressees, loaded from JSON sources.
//!
//! A source is a JSON array of flat objects. Several sources concatenate in
//! the order given. The same record shape backs campaign log entries.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::{Map, Value};
use tokio::fs;

use crate::error::DirectoryError;

/// Ordered-insertion string→string mapping for one addressee.
///
/// Lookups match the exact key first, then fall back to an ASCII
/// case-insensitive match, so `Email` and `email` name the same attribute.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Attributes(Map<String, Value>);

impl Attributes {
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Build a record from a JSON object.
    ///
    /// Numbers and booleans are kept as their text; nulls become empty
    /// strings. Nested arrays or objects are rejected.
    pub fn from_value(value: Value) -> Result<Self, String> {
        let Value::Object(object) = value else {
            return Err(format!("expected an object, found {}", kind(&value)));
        };
        let mut attrs = Self::new();
        for (key, value) in object {
            let text = match value {
                Value::String(s) => s,
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                Value::Null => String::new(),
                other => {
                    return Err(format!("attribute '{key}' is {}, not a string", kind(&other)));
                }
            };
            attrs.0.insert(key, Value::String(text));
        }
        Ok(attrs)
    }

    fn key_of(&self, name: &str) -> Option<&String> {
        self.0
            .keys()
            .find(|k| k.as_str() == name)
            .or_else(|| self.0.keys().find(|k| k.eq_ignore_ascii_case(name)))
    }

    /// Look up an attribute value.
    pub fn get(&self, name: &str) -> Option<&str> {
        let key = self.key_of(name)?;
        self.0.get(key).and_then(Value::as_str)
    }

    /// Look up an attribute, reading a missing one as empty.
    pub fn get_or_empty(&self, name: &str) -> &str {
        self.get(name).unwrap_or("")
    }

    /// Set an attribute. An existing key keeps its spelling and position.
    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        let key = self
            .key_of(name)
            .cloned()
            .unwrap_or_else(|| name.to_string());
        self.0.insert(key, Value::String(value.into()));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.key_of(name).is_some()
    }

    /// Iterate attributes in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str().unwrap_or("")))
    }

    /// Merge every attribute of `other` into this record.
    pub fn extend(&mut self, other: &Attributes) {
        for (key, value) in other.iter() {
            self.set(key, value);
        }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Attributes {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut attrs = Self::new();
        for (k, v) in iter {
            attrs.set(&k.into(), v);
        }
        attrs
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Parse a JSON array of flat objects into records.
pub fn parse_records(text: &str) -> Result<Vec<Attributes>, String> {
    if text.trim().is_empty() {
        return Ok(Vec::new());
    }
    let value: Value = serde_json::from_str(text).map_err(|e| e.to_string())?;
    let Value::Array(items) = value else {
        return Err(format!("expected an array of records, found {}", kind(&value)));
    };
    items
        .into_iter()
        .enumerate()
        .map(|(i, item)| Attributes::from_value(item).map_err(|e| format!("record {i}: {e}")))
        .collect()
}

/// Load addressee records from one source file.
pub async fn load_source(path: &Path) -> Result<Vec<Attributes>, DirectoryError> {
    let text = fs::read_to_string(path)
        .await
        .map_err(|source| DirectoryError::Read {
            path: path.to_path_buf(),
            source,
        })?;
    parse_records(&text).map_err(|reason| DirectoryError::Parse {
        path: path.to_path_buf(),
        reason,
    })
}

/// Load and concatenate records from several sources, in order.
pub async fn load_sources(paths: &[PathBuf]) -> Result<Vec<Attributes>, DirectoryError> {
    let mut records = Vec::new();
    for path in paths {
        let batch = load_source(path).await?;
        tracing::debug!(path = %path.display(), count = batch.len(), "Loaded addressees");
        records.extend(batch);
    }
    Ok(records)
}

/// Serialize records as a pretty-printed JSON array.
pub fn to_json(records: &[Attributes]) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(records)
}

/// Build a mailing list from a name list and an email directory.
///
/// Records whose attributes match every filter are kept, extended with the
/// extra parameters, given the `email` of the directory entry sharing their
/// `name`, and given `firstname`/`lastname` split from that name.
pub fn compose(
    list: &[Attributes],
    directory: &[Attributes],
    filters: &[(String, String)],
    parameters: &[(String, String)],
) -> Result<Vec<Attributes>, DirectoryError> {
    let by_name: HashMap<&str, &Attributes> = directory
        .iter()
        .filter_map(|entry| entry.get("name").map(|name| (name, entry)))
        .collect();

    let mut out = Vec::new();
    for record in list {
        let selected = filters
            .iter()
            .all(|(name, value)| record.get(name) == Some(value.as_str()));
        if !selected {
            continue;
        }

        let name = record
            .get("name")
            .ok_or_else(|| DirectoryError::MissingAttribute {
                attribute: "name".into(),
            })?;
        let entry = by_name
            .get(name)
            .ok_or_else(|| DirectoryError::UnknownName { name: name.into() })?;
        let email = entry
            .get("email")
            .ok_or_else(|| DirectoryError::MissingAttribute {
                attribute: "email".into(),
            })?;

        let mut words = name.split_whitespace();
        let first = words.next().unwrap_or_default();
        let last = words.next_back().unwrap_or(first);

        let mut composed = record.clone();
        for (key, value) in parameters {
            composed.set(key, value.as_str());
        }
        composed.set("email", email);
        composed.set("firstname", first);
        composed.set("lastname", last);
        out.push(composed);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn rec(pairs: &[(&str, &str)]) -> Attributes {
        pairs.iter().copied().collect()
    }

    #[test]
    fn lookup_is_case_insensitive() {
        let attrs = rec(&[("Email", "a@x.com")]);
        assert_eq!(attrs.get("email"), Some("a@x.com"));
        assert_eq!(attrs.get("EMAIL"), Some("a@x.com"));
        assert_eq!(attrs.get("phone"), None);
    }

    #[test]
    fn set_keeps_position_and_spelling() {
        let mut attrs = rec(&[("Name", "Ann"), ("email", "a@x.com")]);
        attrs.set("name", "Bob");
        let keys: Vec<&str> = attrs.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["Name", "email"]);
        assert_eq!(attrs.get("Name"), Some("Bob"));
    }

    #[test]
    fn parse_keeps_insertion_order() {
        let records = parse_records(r#"[{"zeta": "1", "alpha": "2", "mid": "3"}]"#).unwrap();
        let keys: Vec<&str> = records[0].iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["zeta", "alpha", "mid"]);
    }

    #[test]
    fn parse_stringifies_scalars() {
        let records = parse_records(r#"[{"age": 42, "vip": true, "note": null}]"#).unwrap();
        assert_eq!(records[0].get("age"), Some("42"));
        assert_eq!(records[0].get("vip"), Some("true"));
        assert_eq!(records[0].get("note"), Some(""));
    }

    #[test]
    fn parse_rejects_nested_values() {
        let err = parse_records(r#"[{"tags": ["a"]}]"#).unwrap_err();
        assert!(err.contains("tags"));
    }

    #[test]
    fn parse_rejects_non_array() {
        assert!(parse_records(r#"{"email": "a@x.com"}"#).is_err());
    }

    #[test]
    fn parse_empty_text_is_empty() {
        assert!(parse_records("  \n").unwrap().is_empty());
    }

    #[tokio::test]
    async fn load_sources_concatenates_in_order() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("a.json");
        let b = dir.path().join("b.json");
        std::fs::write(&a, r#"[{"email": "one@x.com"}, {"email": "two@x.com"}]"#).unwrap();
        std::fs::write(&b, r#"[{"email": "three@x.com"}]"#).unwrap();

        let records = load_sources(&[a, b]).await.unwrap();
        let emails: Vec<&str> = records.iter().map(|r| r.get_or_empty("email")).collect();
        assert_eq!(emails, vec!["one@x.com", "two@x.com", "three@x.com"]);
    }

    #[tokio::test]
    async fn load_source_missing_file_errors() {
        let dir = TempDir::new().unwrap();
        let err = load_source(&dir.path().join("nope.json")).await.unwrap_err();
        assert!(matches!(err, DirectoryError::Read { .. }));
    }

    #[test]
    fn compose_filters_and_joins_directory() {
        let list = vec![
            rec(&[("name", "Ann Marie Lee"), ("group", "a")]),
            rec(&[("name", "Bob Stone"), ("group", "b")]),
        ];
        let directory = vec![
            rec(&[("name", "Ann Marie Lee"), ("email", "ann@x.com")]),
            rec(&[("name", "Bob Stone"), ("email", "bob@x.com")]),
        ];
        let filters = vec![("group".to_string(), "a".to_string())];
        let params = vec![("event".to_string(), "Retreat".to_string())];

        let out = compose(&list, &directory, &filters, &params).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].get("email"), Some("ann@x.com"));
        assert_eq!(out[0].get("firstname"), Some("Ann"));
        assert_eq!(out[0].get("lastname"), Some("Lee"));
        assert_eq!(out[0].get("event"), Some("Retreat"));
    }

    #[test]
    fn compose_single_word_name() {
        let list = vec![rec(&[("name", "Cher")])];
        let directory = vec![rec(&[("name", "Cher"), ("email", "cher@x.com")])];
        let out = compose(&list, &directory, &[], &[]).unwrap();
        assert_eq!(out[0].get("firstname"), Some("Cher"));
        assert_eq!(out[0].get("lastname"), Some("Cher"));
    }

    #[test]
    fn compose_unknown_name_errors() {
        let list = vec![rec(&[("name", "Nobody")])];
        let err = compose(&list, &[], &[], &[]).unwrap_err();
        assert!(matches!(err, DirectoryError::UnknownName { .. }));
    }

    #[test]
    fn compose_missing_filter_attribute_excludes() {
        let list = vec![rec(&[("name", "Ann Lee")])];
        let directory = vec![rec(&[("name", "Ann Lee"), ("email", "ann@x.com")])];
        let filters = vec![("group".to_string(), "a".to_string())];
        assert!(compose(&list, &directory, &filters, &[]).unwrap().is_empty());
    }
}

//! Free-form attribute bags populated from LIMS data associations.
//!
//! Plans, operations, items, collections, and parts may all carry
//! associations; the values are arbitrary JSON. Insertion order is kept so
//! serialized output is stable across runs.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Attributes(IndexMap<String, Value>);

/// Empty-ish values are never stored; association payloads routinely carry
/// placeholder nulls and empty strings.
fn keeps(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64() != Some(0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

impl Attributes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn add(&mut self, key: impl Into<String>, value: Value) {
        if keeps(&value) {
            self.0.insert(key.into(), value);
        }
    }

    /// Adds every key/value pair of a JSON object; non-objects are ignored.
    pub fn extend_from(&mut self, value: &Value) {
        if let Value::Object(map) = value {
            for (key, entry) in map {
                self.add(key.clone(), entry.clone());
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn has(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn as_value(&self) -> Value {
        Value::Object(self.0.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn skips_empty_values() {
        let mut attrs = Attributes::new();
        attrs.add("a", json!(null));
        attrs.add("b", json!(""));
        attrs.add("c", json!([]));
        attrs.add("d", json!("kept"));
        assert!(!attrs.has("a"));
        assert!(!attrs.has("b"));
        assert!(!attrs.has("c"));
        assert_eq!(attrs.get("d"), Some(&json!("kept")));
    }

    #[test]
    fn extends_from_objects_only() {
        let mut attrs = Attributes::new();
        attrs.extend_from(&json!({"media": "YPAD", "blank": null}));
        attrs.extend_from(&json!("not an object"));
        assert_eq!(attrs.get("media"), Some(&json!("YPAD")));
        assert!(!attrs.has("blank"));
    }
}

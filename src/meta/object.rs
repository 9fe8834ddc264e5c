//! Dynamic (schema-less) Kubernetes objects
//!
//! The cache holds objects exactly as the API server serialized them, as
//! `serde_json` values. `DynamicObject` wraps one value with the metadata
//! accessors the proxy needs; callers treat returned objects as immutable
//! snapshots.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Store key for a cached object: `(namespace, name)`.
///
/// Cluster-scoped objects use an empty namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: &str, name: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }
}

/// A Kubernetes object of any kind, kept in its wire (JSON) form
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DynamicObject(pub Value);

impl DynamicObject {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    pub fn into_value(self) -> Value {
        self.0
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn name(&self) -> &str {
        self.meta_str("name")
    }

    pub fn namespace(&self) -> &str {
        self.meta_str("namespace")
    }

    pub fn resource_version(&self) -> &str {
        self.meta_str("resourceVersion")
    }

    pub fn creation_timestamp(&self) -> Option<&str> {
        self.0
            .pointer("/metadata/creationTimestamp")
            .and_then(Value::as_str)
    }

    pub fn labels(&self) -> Option<&serde_json::Map<String, Value>> {
        self.0.pointer("/metadata/labels").and_then(Value::as_object)
    }

    pub fn key(&self) -> ObjectKey {
        ObjectKey::new(self.namespace(), self.name())
    }

    /// Look up a dotted field path (e.g. `status.phase`) and render the leaf
    /// as the string form field selectors compare against: strings verbatim,
    /// booleans as `"true"`/`"false"`, numbers in decimal. Objects, arrays
    /// and missing paths yield `None`.
    pub fn field(&self, path: &str) -> Option<String> {
        let mut current = &self.0;
        for part in path.split('.') {
            current = current.get(part)?;
        }
        scalar_to_string(current)
    }

    /// The full `metadata` object, if present
    pub fn metadata(&self) -> Option<&Value> {
        self.0.get("metadata")
    }

    fn meta_str(&self, field: &str) -> &str {
        self.0
            .get("metadata")
            .and_then(|m| m.get(field))
            .and_then(Value::as_str)
            .unwrap_or("")
    }
}

/// Render a JSON scalar in field-selector string form
pub fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Null => Some(String::new()),
        _ => None,
    }
}

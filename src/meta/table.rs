//! Server-side table types
//!
//! The tabular JSON rendering negotiated via the `Accept` header. Rows carry
//! metadata-only projections (`PartialObjectMetadata`) of their objects, as
//! the real API server returns to table-aware clients.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// The `Accept` media type that requests a server-side table
pub const TABLE_ACCEPT: &str = "application/json;as=Table;v=v1;g=meta.k8s.io";

/// A `meta.k8s.io/v1` Table
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Table {
    pub api_version: String,
    pub kind: String,
    #[serde(default)]
    pub metadata: Value,
    pub column_definitions: Vec<TableColumnDefinition>,
    pub rows: Vec<TableRow>,
}

/// One column of a table
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableColumnDefinition {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub format: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default)]
    pub priority: i32,
}

impl TableColumnDefinition {
    pub fn string(name: &str) -> Self {
        Self {
            name: name.to_string(),
            column_type: "string".to_string(),
            format: String::new(),
            description: String::new(),
            priority: 0,
        }
    }
}

/// One row of a table: rendered cells plus the (projected) object
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableRow {
    pub cells: Vec<Value>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub object: Value,
}

impl Table {
    pub fn new(columns: Vec<TableColumnDefinition>, rows: Vec<TableRow>) -> Self {
        Self {
            api_version: "meta.k8s.io/v1".to_string(),
            kind: "Table".to_string(),
            metadata: Value::Null,
            column_definitions: columns,
            rows,
        }
    }

    /// Replace each row's embedded object with its metadata-only projection
    pub fn project_row_objects(&mut self) {
        for row in &mut self.rows {
            if row.object.is_null() {
                continue;
            }
            if let Some(partial) = to_partial(&row.object) {
                row.object = partial;
            }
        }
    }
}

/// Project an object (or list) to `PartialObjectMetadata`
/// (`PartialObjectMetadataList`), preserving every standard metadata field
pub fn to_partial(object: &Value) -> Option<Value> {
    let kind = object.get("kind").and_then(Value::as_str)?;
    if kind.ends_with("List") {
        let items: Vec<Value> = object
            .get("items")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(to_partial)
                    .collect()
            })
            .unwrap_or_default();
        Some(json!({
            "apiVersion": "meta.k8s.io/v1",
            "kind": "PartialObjectMetadataList",
            "metadata": object.get("metadata").cloned().unwrap_or(json!({})),
            "items": items,
        }))
    } else {
        Some(json!({
            "apiVersion": "meta.k8s.io/v1",
            "kind": "PartialObjectMetadata",
            "metadata": object.get("metadata").cloned().unwrap_or(json!({})),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_preserves_metadata() {
        let obj = json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": {
                "name": "p1",
                "namespace": "default",
                "uid": "u-1",
                "labels": {"a": "b"},
                "ownerReferences": [{"kind": "ReplicaSet", "name": "rs"}]
            },
            "spec": {"nodeName": "n"}
        });
        let partial = to_partial(&obj).unwrap();
        assert_eq!(partial["kind"], "PartialObjectMetadata");
        assert_eq!(partial["apiVersion"], "meta.k8s.io/v1");
        assert_eq!(partial["metadata"]["uid"], "u-1");
        assert_eq!(partial["metadata"]["labels"]["a"], "b");
        assert!(partial.get("spec").is_none());
    }

    #[test]
    fn partial_list_projects_items() {
        let list = json!({
            "apiVersion": "v1",
            "kind": "PodList",
            "metadata": {"resourceVersion": "7"},
            "items": [
                {"kind": "Pod", "metadata": {"name": "a"}},
                {"kind": "Pod", "metadata": {"name": "b"}}
            ]
        });
        let partial = to_partial(&list).unwrap();
        assert_eq!(partial["kind"], "PartialObjectMetadataList");
        assert_eq!(partial["metadata"]["resourceVersion"], "7");
        assert_eq!(partial["items"].as_array().unwrap().len(), 2);
        assert_eq!(partial["items"][0]["kind"], "PartialObjectMetadata");
    }

    #[test]
    fn project_rows_in_place() {
        let mut table = Table::new(
            vec![TableColumnDefinition::string("Name")],
            vec![TableRow {
                cells: vec![json!("p1")],
                object: json!({"kind": "Pod", "metadata": {"name": "p1"}, "spec": {}}),
            }],
        );
        table.project_row_objects();
        assert_eq!(table.rows[0].object["kind"], "PartialObjectMetadata");
    }
}

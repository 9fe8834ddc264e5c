//! Built-in field indexes
//!
//! The index set mirrors what the API server supports in field selectors
//! for each kind: Pods and Events carry rich indexes, ReplicaSets index
//! their replica count, and every kind indexes `metadata.name` and
//! `metadata.namespace`. Booleans render as `"true"`/`"false"` and
//! integers in decimal, matching the wire form of field selector values.

use crate::meta::DynamicObject;

/// Extracts one indexable field from an object
pub struct FieldIndexer {
    pub path: String,
    pub extract: Box<dyn Fn(&DynamicObject) -> Option<String> + Send + Sync>,
}

impl FieldIndexer {
    /// Index a dotted path using the generic scalar rendering
    fn for_path(path: &str) -> Self {
        let owned = path.to_string();
        Self {
            path: path.to_string(),
            extract: Box::new(move |obj| obj.field(&owned)),
        }
    }

    fn with(path: &str, extract: impl Fn(&DynamicObject) -> Option<String> + Send + Sync + 'static) -> Self {
        Self {
            path: path.to_string(),
            extract: Box::new(extract),
        }
    }
}

const POD_FIELDS: &[&str] = &[
    "spec.nodeName",
    "spec.restartPolicy",
    "spec.schedulerName",
    "spec.serviceAccountName",
    "spec.hostNetwork",
    "status.podIP",
    "status.phase",
    "status.nominatedNodeName",
];

const EVENT_FIELDS: &[&str] = &[
    "involvedObject.kind",
    "involvedObject.namespace",
    "involvedObject.name",
    "involvedObject.uid",
    "involvedObject.apiVersion",
    "involvedObject.resourceVersion",
    "involvedObject.fieldPath",
    "reason",
    // the reporting controller serializes as reportingComponent on the wire
    "reportingComponent",
    "type",
];

/// The registered indexers for a kind (group + kind name)
pub fn indexers_for_kind(group: &str, kind: &str) -> Vec<FieldIndexer> {
    let mut indexers = vec![
        FieldIndexer::for_path("metadata.name"),
        FieldIndexer::for_path("metadata.namespace"),
    ];

    match (group, kind) {
        ("", "Pod") => {
            for path in POD_FIELDS {
                indexers.push(FieldIndexer::for_path(path));
            }
        }
        ("", "Event") => {
            for path in EVENT_FIELDS {
                indexers.push(FieldIndexer::for_path(path));
            }
            // source is the event source component, falling back to the
            // reporting controller when the event carries no source
            indexers.push(FieldIndexer::with("source", |obj| {
                match obj.field("source.component") {
                    Some(component) if !component.is_empty() => Some(component),
                    _ => Some(obj.field("reportingComponent").unwrap_or_default()),
                }
            }));
        }
        ("apps", "ReplicaSet") => {
            indexers.push(FieldIndexer::for_path("status.replicas"));
        }
        _ => {}
    }

    indexers
}

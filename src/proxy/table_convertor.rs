//! Server-side table projection
//!
//! Converts typed objects and lists into the `meta.k8s.io/v1` Table form.
//! Lookup order for a convertor: the built-in printer set for the standard
//! API groups, then a convertor synthesized from a matching
//! CustomResourceDefinition's `additionalPrinterColumns`. Resolved
//! convertors are memoized per (group, version, kind).

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde_json::{json, Value};

use crate::client::UpstreamClient;
use crate::error::{KubecacheError, KubecacheResult};
use crate::meta::table::{Table, TableColumnDefinition, TableRow};
use crate::meta::GroupVersionKind;

/// Converts one object (or list) into a table
pub trait TableConvertor: Send + Sync {
    fn convert_to_table(&self, object: &Value) -> KubecacheResult<Table>;
}

/// Resolves the convertor responsible for a gvk
#[async_trait]
pub trait TableConvertorGetter: Send + Sync {
    async fn convertor_for(
        &self,
        gvk: &GroupVersionKind,
    ) -> KubecacheResult<Arc<dyn TableConvertor>>;
}

fn no_convertor(gvk: &GroupVersionKind) -> KubecacheError {
    KubecacheError::Internal(format!("no table convertor found for {gvk}"))
}

/// The default projection chain: builtin printers, then cached CRD columns
pub fn default_table_convertor(client: Option<UpstreamClient>) -> AggregateTableConvertor {
    let mut getters: Vec<Box<dyn TableConvertorGetter>> =
        vec![Box::new(BuiltinConvertorGetter::new())];
    if let Some(client) = client {
        getters.push(Box::new(CachedConvertorGetter::new(Box::new(
            CrdConvertorGetter::new(client),
        ))));
    }
    AggregateTableConvertor::new(ConvertorGetters(getters))
}

// ---- aggregate / combinators ----

/// Tries each getter in order
pub struct ConvertorGetters(pub Vec<Box<dyn TableConvertorGetter>>);

#[async_trait]
impl TableConvertorGetter for ConvertorGetters {
    async fn convertor_for(
        &self,
        gvk: &GroupVersionKind,
    ) -> KubecacheResult<Arc<dyn TableConvertor>> {
        for getter in &self.0 {
            if let Ok(convertor) = getter.convertor_for(gvk).await {
                return Ok(convertor);
            }
        }
        Err(no_convertor(gvk))
    }
}

/// Memoizes resolved convertors per gvk
pub struct CachedConvertorGetter {
    inner: Box<dyn TableConvertorGetter>,
    cache: RwLock<HashMap<GroupVersionKind, Arc<dyn TableConvertor>>>,
}

impl CachedConvertorGetter {
    pub fn new(inner: Box<dyn TableConvertorGetter>) -> Self {
        Self {
            inner,
            cache: RwLock::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl TableConvertorGetter for CachedConvertorGetter {
    async fn convertor_for(
        &self,
        gvk: &GroupVersionKind,
    ) -> KubecacheResult<Arc<dyn TableConvertor>> {
        if let Some(convertor) = self.cache.read().get(gvk) {
            return Ok(convertor.clone());
        }
        let convertor = self.inner.convertor_for(gvk).await?;
        self.cache.write().insert(gvk.clone(), convertor.clone());
        Ok(convertor)
    }
}

/// Table conversion through a getter chain
pub struct AggregateTableConvertor {
    getter: ConvertorGetters,
}

impl AggregateTableConvertor {
    pub fn new(getter: ConvertorGetters) -> Self {
        Self { getter }
    }

    /// Convert an object to a table, resolving the convertor by the
    /// object's own coordinates
    pub async fn convert(&self, object: &Value) -> KubecacheResult<Table> {
        let gvk = gvk_of(object)?;
        let convertor = self.getter.convertor_for(&gvk).await?;
        let mut table = convertor.convert_to_table(object)?;
        table.project_row_objects();
        Ok(table)
    }
}

fn gvk_of(object: &Value) -> KubecacheResult<GroupVersionKind> {
    let api_version = object
        .get("apiVersion")
        .and_then(Value::as_str)
        .unwrap_or_default();
    let kind = object.get("kind").and_then(Value::as_str).unwrap_or_default();
    if kind.is_empty() {
        return Err(KubecacheError::Internal(
            "object carries no kind".to_string(),
        ));
    }
    let (group, version) = match api_version.split_once('/') {
        Some((group, version)) => (group, version),
        None => ("", api_version),
    };
    Ok(GroupVersionKind::new(group, version, kind))
}

// ---- builtin printers ----

/// API groups the builtin printer set covers
const BUILTIN_GROUPS: &[&str] = &[
    "",
    "apps",
    "batch",
    "policy",
    "networking.k8s.io",
    "autoscaling",
    "rbac.authorization.k8s.io",
    "certificates.k8s.io",
    "coordination.k8s.io",
    "storage.k8s.io",
    "scheduling.k8s.io",
    "node.k8s.io",
    "discovery.k8s.io",
    "admissionregistration.k8s.io",
    "flowcontrol.apiserver.k8s.io",
    "internal.apiserver.k8s.io",
    "resource.k8s.io",
    "storagemigration.k8s.io",
    "meta.k8s.io",
];

/// Getter for the builtin printer set
pub struct BuiltinConvertorGetter {
    convertor: Arc<dyn TableConvertor>,
}

impl BuiltinConvertorGetter {
    pub fn new() -> Self {
        Self {
            convertor: Arc::new(BuiltinTableConvertor),
        }
    }
}

impl Default for BuiltinConvertorGetter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TableConvertorGetter for BuiltinConvertorGetter {
    async fn convertor_for(
        &self,
        gvk: &GroupVersionKind,
    ) -> KubecacheResult<Arc<dyn TableConvertor>> {
        if BUILTIN_GROUPS.contains(&gvk.group.as_str()) {
            Ok(self.convertor.clone())
        } else {
            Err(no_convertor(gvk))
        }
    }
}

/// Printer-backed convertor for the standard kinds, with a NAME/AGE
/// default for everything else in the builtin groups
pub struct BuiltinTableConvertor;

impl TableConvertor for BuiltinTableConvertor {
    fn convert_to_table(&self, object: &Value) -> KubecacheResult<Table> {
        let gvk = gvk_of(object)?;
        let kind = gvk.kind.strip_suffix("List").unwrap_or(&gvk.kind);
        let printer = printer_for_kind(kind);
        build_table(object, &printer.columns(), |item, now| printer.cells(item, now))
    }
}

fn build_table(
    object: &Value,
    columns: &[TableColumnDefinition],
    cells: impl Fn(&Value, DateTime<Utc>) -> Vec<Value>,
) -> KubecacheResult<Table> {
    let now = Utc::now();
    let is_list = object
        .get("kind")
        .and_then(Value::as_str)
        .map(|k| k.ends_with("List"))
        .unwrap_or(false);

    let mut rows = Vec::new();
    if is_list {
        if let Some(items) = object.get("items").and_then(Value::as_array) {
            for item in items {
                rows.push(TableRow {
                    cells: cells(item, now),
                    object: item.clone(),
                });
            }
        }
    } else {
        rows.push(TableRow {
            cells: cells(object, now),
            object: object.clone(),
        });
    }

    let mut table = Table::new(columns.to_vec(), rows);
    if let Some(rv) = object
        .pointer("/metadata/resourceVersion")
        .and_then(Value::as_str)
    {
        table.metadata = json!({"resourceVersion": rv});
    }
    Ok(table)
}

/// One kind's column layout and cell renderer
struct Printer {
    extra: &'static [&'static str],
    render: fn(&Value, DateTime<Utc>) -> Vec<Value>,
}

impl Printer {
    fn columns(&self) -> Vec<TableColumnDefinition> {
        let mut columns = vec![TableColumnDefinition::string("Name")];
        for name in self.extra {
            columns.push(TableColumnDefinition::string(name));
        }
        columns.push(TableColumnDefinition::string("Age"));
        columns
    }

    fn cells(&self, item: &Value, now: DateTime<Utc>) -> Vec<Value> {
        let mut cells = vec![json!(field_str(item, "/metadata/name"))];
        cells.extend((self.render)(item, now));
        cells.push(json!(format_age(item, now)));
        cells
    }
}

fn printer_for_kind(kind: &str) -> Printer {
    match kind {
        "Pod" => Printer {
            extra: &["Ready", "Status", "Restarts"],
            render: pod_cells,
        },
        "Deployment" => Printer {
            extra: &["Ready", "Up-to-date", "Available"],
            render: deployment_cells,
        },
        "ReplicaSet" => Printer {
            extra: &["Desired", "Current", "Ready"],
            render: replicaset_cells,
        },
        "StatefulSet" => Printer {
            extra: &["Ready"],
            render: statefulset_cells,
        },
        "DaemonSet" => Printer {
            extra: &["Desired", "Current", "Ready"],
            render: daemonset_cells,
        },
        "Job" => Printer {
            extra: &["Completions"],
            render: job_cells,
        },
        "Service" => Printer {
            extra: &["Type", "Cluster-IP"],
            render: service_cells,
        },
        "Node" => Printer {
            extra: &["Status", "Version"],
            render: node_cells,
        },
        "Namespace" => Printer {
            extra: &["Status"],
            render: namespace_cells,
        },
        "Event" => Printer {
            extra: &["Type", "Reason", "Object", "Message"],
            render: event_cells,
        },
        "ConfigMap" => Printer {
            extra: &["Data"],
            render: configmap_cells,
        },
        "Secret" => Printer {
            extra: &["Type", "Data"],
            render: secret_cells,
        },
        _ => Printer {
            extra: &[],
            render: |_, _| Vec::new(),
        },
    }
}

fn field_str(item: &Value, pointer: &str) -> String {
    item.pointer(pointer)
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string()
}

fn field_i64(item: &Value, pointer: &str) -> i64 {
    item.pointer(pointer).and_then(Value::as_i64).unwrap_or(0)
}

fn format_age(item: &Value, now: DateTime<Utc>) -> String {
    let created = item
        .pointer("/metadata/creationTimestamp")
        .and_then(Value::as_str)
        .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok());
    match created {
        Some(created) => humanize_duration(now.signed_duration_since(created.with_timezone(&Utc))),
        None => "<unknown>".to_string(),
    }
}

/// The kubectl-style compact duration: `30s`, `5m`, `3h`, `7d`
fn humanize_duration(duration: chrono::Duration) -> String {
    let secs = duration.num_seconds().max(0);
    if secs < 60 {
        format!("{secs}s")
    } else if secs < 3600 {
        format!("{}m", secs / 60)
    } else if secs < 86400 {
        format!("{}h", secs / 3600)
    } else {
        format!("{}d", secs / 86400)
    }
}

fn pod_cells(item: &Value, _now: DateTime<Utc>) -> Vec<Value> {
    let statuses = item
        .pointer("/status/containerStatuses")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    let total = statuses.len();
    let ready = statuses
        .iter()
        .filter(|s| s.get("ready").and_then(Value::as_bool).unwrap_or(false))
        .count();
    let restarts: i64 = statuses
        .iter()
        .map(|s| s.get("restartCount").and_then(Value::as_i64).unwrap_or(0))
        .sum();
    let status = {
        let reason = field_str(item, "/status/reason");
        if reason.is_empty() {
            field_str(item, "/status/phase")
        } else {
            reason
        }
    };
    vec![
        json!(format!("{ready}/{total}")),
        json!(status),
        json!(restarts.to_string()),
    ]
}

fn deployment_cells(item: &Value, _now: DateTime<Utc>) -> Vec<Value> {
    let desired = field_i64(item, "/spec/replicas");
    let ready = field_i64(item, "/status/readyReplicas");
    vec![
        json!(format!("{ready}/{desired}")),
        json!(field_i64(item, "/status/updatedReplicas").to_string()),
        json!(field_i64(item, "/status/availableReplicas").to_string()),
    ]
}

fn replicaset_cells(item: &Value, _now: DateTime<Utc>) -> Vec<Value> {
    vec![
        json!(field_i64(item, "/spec/replicas").to_string()),
        json!(field_i64(item, "/status/replicas").to_string()),
        json!(field_i64(item, "/status/readyReplicas").to_string()),
    ]
}

fn statefulset_cells(item: &Value, _now: DateTime<Utc>) -> Vec<Value> {
    let desired = field_i64(item, "/spec/replicas");
    let ready = field_i64(item, "/status/readyReplicas");
    vec![json!(format!("{ready}/{desired}"))]
}

fn daemonset_cells(item: &Value, _now: DateTime<Utc>) -> Vec<Value> {
    vec![
        json!(field_i64(item, "/status/desiredNumberScheduled").to_string()),
        json!(field_i64(item, "/status/currentNumberScheduled").to_string()),
        json!(field_i64(item, "/status/numberReady").to_string()),
    ]
}

fn job_cells(item: &Value, _now: DateTime<Utc>) -> Vec<Value> {
    let completions = field_i64(item, "/spec/completions");
    let succeeded = field_i64(item, "/status/succeeded");
    vec![json!(format!("{succeeded}/{completions}"))]
}

fn service_cells(item: &Value, _now: DateTime<Utc>) -> Vec<Value> {
    vec![
        json!(field_str(item, "/spec/type")),
        json!(field_str(item, "/spec/clusterIP")),
    ]
}

fn node_cells(item: &Value, _now: DateTime<Utc>) -> Vec<Value> {
    let ready = item
        .pointer("/status/conditions")
        .and_then(Value::as_array)
        .and_then(|conditions| {
            conditions
                .iter()
                .find(|c| c.get("type").and_then(Value::as_str) == Some("Ready"))
        })
        .and_then(|c| c.get("status").and_then(Value::as_str))
        .unwrap_or("Unknown");
    let status = if ready == "True" { "Ready" } else { "NotReady" };
    vec![
        json!(status),
        json!(field_str(item, "/status/nodeInfo/kubeletVersion")),
    ]
}

fn namespace_cells(item: &Value, _now: DateTime<Utc>) -> Vec<Value> {
    vec![json!(field_str(item, "/status/phase"))]
}

fn event_cells(item: &Value, _now: DateTime<Utc>) -> Vec<Value> {
    let object = format!(
        "{}/{}",
        field_str(item, "/involvedObject/kind").to_lowercase(),
        field_str(item, "/involvedObject/name")
    );
    vec![
        json!(field_str(item, "/type")),
        json!(field_str(item, "/reason")),
        json!(object),
        json!(field_str(item, "/message")),
    ]
}

fn configmap_cells(item: &Value, _now: DateTime<Utc>) -> Vec<Value> {
    let count = item
        .get("data")
        .and_then(Value::as_object)
        .map(|m| m.len())
        .unwrap_or(0);
    vec![json!(count.to_string())]
}

fn secret_cells(item: &Value, _now: DateTime<Utc>) -> Vec<Value> {
    let count = item
        .get("data")
        .and_then(Value::as_object)
        .map(|m| m.len())
        .unwrap_or(0);
    vec![json!(field_str(item, "/type")), json!(count.to_string())]
}

// ---- CRD-derived printers ----

/// Getter that synthesizes convertors from CustomResourceDefinition
/// `additionalPrinterColumns`
pub struct CrdConvertorGetter {
    client: UpstreamClient,
}

impl CrdConvertorGetter {
    pub fn new(client: UpstreamClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl TableConvertorGetter for CrdConvertorGetter {
    async fn convertor_for(
        &self,
        gvk: &GroupVersionKind,
    ) -> KubecacheResult<Arc<dyn TableConvertor>> {
        let crds = self.client.list_crds().await?;
        for crd in &crds {
            if crd.pointer("/spec/group").and_then(Value::as_str) != Some(gvk.group.as_str()) {
                continue;
            }
            let kind = crd.pointer("/spec/names/kind").and_then(Value::as_str);
            let list_kind = crd.pointer("/spec/names/listKind").and_then(Value::as_str);
            if kind != Some(gvk.kind.as_str()) && list_kind != Some(gvk.kind.as_str()) {
                continue;
            }
            let versions = crd
                .pointer("/spec/versions")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            for version in versions {
                if version.get("name").and_then(Value::as_str) != Some(gvk.version.as_str()) {
                    continue;
                }
                let columns = version
                    .get("additionalPrinterColumns")
                    .and_then(Value::as_array)
                    .cloned()
                    .unwrap_or_default();
                return Ok(Arc::new(CrdTableConvertor::new(columns)));
            }
        }
        Err(no_convertor(gvk))
    }
}

/// Convertor built from `additionalPrinterColumns` entries
pub struct CrdTableConvertor {
    columns: Vec<CrdColumn>,
}

struct CrdColumn {
    definition: TableColumnDefinition,
    json_path: String,
}

impl CrdTableConvertor {
    pub fn new(raw_columns: Vec<Value>) -> Self {
        let mut columns = Vec::new();
        for raw in raw_columns {
            let name = raw.get("name").and_then(Value::as_str).unwrap_or("");
            let column_type = raw.get("type").and_then(Value::as_str).unwrap_or("string");
            let json_path = raw.get("jsonPath").and_then(Value::as_str).unwrap_or("");
            if name.is_empty() || json_path.is_empty() {
                continue;
            }
            columns.push(CrdColumn {
                definition: TableColumnDefinition {
                    name: name.to_string(),
                    column_type: column_type.to_string(),
                    format: String::new(),
                    description: String::new(),
                    priority: 0,
                },
                json_path: json_path.to_string(),
            });
        }
        Self { columns }
    }

    fn render(&self, item: &Value, now: DateTime<Utc>) -> Vec<Value> {
        self.columns
            .iter()
            .map(|column| {
                let value = eval_json_path(item, &column.json_path);
                if column.definition.column_type == "date" {
                    if let Some(raw) = value.as_str() {
                        if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
                            return json!(humanize_duration(
                                now.signed_duration_since(ts.with_timezone(&Utc))
                            ));
                        }
                    }
                }
                value
            })
            .collect()
    }
}

impl TableConvertor for CrdTableConvertor {
    fn convert_to_table(&self, object: &Value) -> KubecacheResult<Table> {
        let mut definitions = vec![TableColumnDefinition::string("Name")];
        definitions.extend(self.columns.iter().map(|c| c.definition.clone()));
        if self.columns.is_empty() {
            definitions.push(TableColumnDefinition::string("Age"));
        }
        build_table(object, &definitions, |item, now| {
            let mut cells = vec![json!(field_str(item, "/metadata/name"))];
            cells.extend(self.render(item, now));
            if self.columns.is_empty() {
                cells.push(json!(format_age(item, now)));
            }
            cells
        })
    }
}

/// Evaluate the simple (dotted-field) subset of JSONPath that
/// `additionalPrinterColumns` use: `.spec.foo.bar`
fn eval_json_path(item: &Value, path: &str) -> Value {
    let mut current = item;
    for part in path.trim_start_matches('.').split('.') {
        if part.is_empty() {
            continue;
        }
        match current.get(part) {
            Some(next) => current = next,
            None => return Value::Null,
        }
    }
    current.clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn pod(name: &str, phase: &str) -> Value {
        json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": {
                "name": name,
                "namespace": "default",
                "creationTimestamp": (Utc::now() - Duration::minutes(5)).to_rfc3339(),
            },
            "status": {
                "phase": phase,
                "containerStatuses": [
                    {"ready": true, "restartCount": 2},
                    {"ready": false, "restartCount": 1}
                ]
            }
        })
    }

    #[tokio::test]
    async fn builtin_pod_table() {
        let convertor = default_table_convertor(None);
        let table = convertor.convert(&pod("p1", "Running")).await.unwrap();

        let names: Vec<_> = table
            .column_definitions
            .iter()
            .map(|c| c.name.as_str())
            .collect();
        assert_eq!(names, vec!["Name", "Ready", "Status", "Restarts", "Age"]);

        let cells = &table.rows[0].cells;
        assert_eq!(cells[0], "p1");
        assert_eq!(cells[1], "1/2");
        assert_eq!(cells[2], "Running");
        assert_eq!(cells[3], "3");
        assert_eq!(cells[4], "5m");
    }

    #[tokio::test]
    async fn list_conversion_projects_rows() {
        let list = json!({
            "apiVersion": "v1",
            "kind": "PodList",
            "metadata": {"resourceVersion": "9"},
            "items": [pod("a", "Running"), pod("b", "Pending")]
        });
        let convertor = default_table_convertor(None);
        let table = convertor.convert(&list).await.unwrap();
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.metadata["resourceVersion"], "9");
        // rows carry metadata-only projections
        assert_eq!(table.rows[0].object["kind"], "PartialObjectMetadata");
        assert!(table.rows[0].object.get("status").is_none());
    }

    #[tokio::test]
    async fn unknown_builtin_kind_gets_name_age() {
        let obj = json!({
            "apiVersion": "coordination.k8s.io/v1",
            "kind": "Lease",
            "metadata": {"name": "leader", "creationTimestamp": (Utc::now() - Duration::hours(2)).to_rfc3339()}
        });
        let table = default_table_convertor(None).convert(&obj).await.unwrap();
        let names: Vec<_> = table
            .column_definitions
            .iter()
            .map(|c| c.name.as_str())
            .collect();
        assert_eq!(names, vec!["Name", "Age"]);
        assert_eq!(table.rows[0].cells[1], "2h");
    }

    #[tokio::test]
    async fn unknown_group_has_no_convertor() {
        let obj = json!({
            "apiVersion": "example.io/v1",
            "kind": "Widget",
            "metadata": {"name": "w"}
        });
        assert!(default_table_convertor(None).convert(&obj).await.is_err());
    }

    #[test]
    fn crd_columns_render_json_paths() {
        let convertor = CrdTableConvertor::new(vec![
            json!({"name": "Replicas", "type": "integer", "jsonPath": ".spec.replicas"}),
            json!({"name": "Phase", "type": "string", "jsonPath": ".status.phase"}),
        ]);
        let obj = json!({
            "apiVersion": "example.io/v1",
            "kind": "Widget",
            "metadata": {"name": "w1"},
            "spec": {"replicas": 3},
            "status": {"phase": "Active"}
        });
        let table = convertor.convert_to_table(&obj).unwrap();
        let names: Vec<_> = table
            .column_definitions
            .iter()
            .map(|c| c.name.as_str())
            .collect();
        assert_eq!(names, vec!["Name", "Replicas", "Phase"]);
        assert_eq!(table.rows[0].cells, vec![json!("w1"), json!(3), json!("Active")]);
    }

    #[test]
    fn crd_without_columns_gets_name_age() {
        let convertor = CrdTableConvertor::new(Vec::new());
        let obj = json!({
            "apiVersion": "example.io/v1",
            "kind": "Widget",
            "metadata": {"name": "w1"}
        });
        let table = convertor.convert_to_table(&obj).unwrap();
        assert_eq!(table.column_definitions.len(), 2);
        assert_eq!(table.rows[0].cells[1], "<unknown>");
    }

    #[test]
    fn json_path_evaluation() {
        let obj = json!({"spec": {"a": {"b": "c"}}});
        assert_eq!(eval_json_path(&obj, ".spec.a.b"), json!("c"));
        assert_eq!(eval_json_path(&obj, ".spec.missing"), Value::Null);
    }

    #[test]
    fn duration_humanization() {
        assert_eq!(humanize_duration(Duration::seconds(42)), "42s");
        assert_eq!(humanize_duration(Duration::minutes(7)), "7m");
        assert_eq!(humanize_duration(Duration::hours(25)), "1d");
        assert_eq!(humanize_duration(Duration::seconds(-5)), "0s");
    }
}

//! Resource-to-kind mapping
//!
//! The URL noun (`pods`) and the type name (`Pod`) are related through the
//! API server's discovery documents. The proxy keeps a static table for the
//! built-in API and falls back to a singularize-and-capitalize guess for
//! everything else (custom resources keep working as long as their resource
//! name is a regular plural).

use super::{GroupVersionKind, GroupVersionResource};

/// Built-in resource → kind pairs, grouped as the API server serves them
const BUILTIN_KINDS: &[(&str, &str, &str)] = &[
    // core/v1
    ("", "pods", "Pod"),
    ("", "services", "Service"),
    ("", "endpoints", "Endpoints"),
    ("", "events", "Event"),
    ("", "namespaces", "Namespace"),
    ("", "nodes", "Node"),
    ("", "configmaps", "ConfigMap"),
    ("", "secrets", "Secret"),
    ("", "serviceaccounts", "ServiceAccount"),
    ("", "persistentvolumes", "PersistentVolume"),
    ("", "persistentvolumeclaims", "PersistentVolumeClaim"),
    ("", "replicationcontrollers", "ReplicationController"),
    ("", "resourcequotas", "ResourceQuota"),
    ("", "limitranges", "LimitRange"),
    ("", "podtemplates", "PodTemplate"),
    // apps/v1
    ("apps", "deployments", "Deployment"),
    ("apps", "replicasets", "ReplicaSet"),
    ("apps", "statefulsets", "StatefulSet"),
    ("apps", "daemonsets", "DaemonSet"),
    ("apps", "controllerrevisions", "ControllerRevision"),
    // batch/v1
    ("batch", "jobs", "Job"),
    ("batch", "cronjobs", "CronJob"),
    // networking.k8s.io
    ("networking.k8s.io", "ingresses", "Ingress"),
    ("networking.k8s.io", "ingressclasses", "IngressClass"),
    ("networking.k8s.io", "networkpolicies", "NetworkPolicy"),
    // policy
    ("policy", "poddisruptionbudgets", "PodDisruptionBudget"),
    // autoscaling
    ("autoscaling", "horizontalpodautoscalers", "HorizontalPodAutoscaler"),
    // rbac.authorization.k8s.io
    ("rbac.authorization.k8s.io", "roles", "Role"),
    ("rbac.authorization.k8s.io", "rolebindings", "RoleBinding"),
    ("rbac.authorization.k8s.io", "clusterroles", "ClusterRole"),
    ("rbac.authorization.k8s.io", "clusterrolebindings", "ClusterRoleBinding"),
    // storage.k8s.io
    ("storage.k8s.io", "storageclasses", "StorageClass"),
    ("storage.k8s.io", "volumeattachments", "VolumeAttachment"),
    // certificates.k8s.io
    ("certificates.k8s.io", "certificatesigningrequests", "CertificateSigningRequest"),
    // coordination.k8s.io
    ("coordination.k8s.io", "leases", "Lease"),
    // scheduling.k8s.io
    ("scheduling.k8s.io", "priorityclasses", "PriorityClass"),
    // node.k8s.io
    ("node.k8s.io", "runtimeclasses", "RuntimeClass"),
    // discovery.k8s.io
    ("discovery.k8s.io", "endpointslices", "EndpointSlice"),
    // admissionregistration.k8s.io
    (
        "admissionregistration.k8s.io",
        "mutatingwebhookconfigurations",
        "MutatingWebhookConfiguration",
    ),
    (
        "admissionregistration.k8s.io",
        "validatingwebhookconfigurations",
        "ValidatingWebhookConfiguration",
    ),
    // apiextensions.k8s.io
    ("apiextensions.k8s.io", "customresourcedefinitions", "CustomResourceDefinition"),
];

/// Maps URL nouns to kinds
#[derive(Debug, Clone, Default)]
pub struct TypeMapper;

impl TypeMapper {
    pub fn new() -> Self {
        Self
    }

    /// Resolve the kind for a resource, guessing for unknown resources
    pub fn kind_for(&self, gvr: &GroupVersionResource) -> GroupVersionKind {
        for (group, resource, kind) in BUILTIN_KINDS {
            if *group == gvr.group && *resource == gvr.resource {
                return GroupVersionKind::new(&gvr.group, &gvr.version, kind);
            }
        }
        GroupVersionKind::new(&gvr.group, &gvr.version, &guess_kind(&gvr.resource))
    }

    /// Resolve a command-line resource name (`pods`, `replicasets.apps`)
    /// to full coordinates. Built-in resources resolve through the table;
    /// anything else is assumed group-qualified at `v1`.
    pub fn resource_for(&self, name: &str) -> GroupVersionResource {
        if let Some((resource, group)) = name.split_once('.') {
            return GroupVersionResource::new(group, "v1", resource);
        }
        for (group, resource, _) in BUILTIN_KINDS {
            if *resource == name {
                return GroupVersionResource::new(group, "v1", resource);
            }
        }
        GroupVersionResource::new("", "v1", name)
    }
}

/// Singularize a regular plural and capitalize: `cronjobs` → `Cronjobs` is
/// wrong, so strip the common plural suffixes first (`-ies` → `-y`,
/// `-ses`/`-xes`/`-zes`/`-ches`/`-shes` → drop `es`, else drop `s`).
fn guess_kind(resource: &str) -> String {
    let singular = if let Some(stem) = resource.strip_suffix("ies") {
        format!("{stem}y")
    } else if resource.ends_with("ses")
        || resource.ends_with("xes")
        || resource.ends_with("zes")
        || resource.ends_with("ches")
        || resource.ends_with("shes")
    {
        resource[..resource.len() - 2].to_string()
    } else if let Some(stem) = resource.strip_suffix('s') {
        stem.to_string()
    } else {
        resource.to_string()
    };

    let mut chars = singular.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => singular,
    }
}

//! Minimal Kubernetes API machinery: group/version coordinates, dynamic
//! objects, `Status` bodies, server-side tables, and selector parsing.

pub mod mapper;
pub mod object;
pub mod selectors;
pub mod status;
pub mod table;

pub use mapper::TypeMapper;
pub use object::{DynamicObject, ObjectKey};
pub use selectors::{FieldSelector, LabelSelector};
pub use status::Status;

use std::fmt;

use serde::{Deserialize, Serialize};

/// (group, version, resource): the URL noun coordinates of a collection
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GroupVersionResource {
    pub group: String,
    pub version: String,
    pub resource: String,
}

impl GroupVersionResource {
    pub fn new(group: &str, version: &str, resource: &str) -> Self {
        Self {
            group: group.to_string(),
            version: version.to_string(),
            resource: resource.to_string(),
        }
    }

    /// `group/resource`, the form used in error details
    pub fn group_resource(&self) -> String {
        if self.group.is_empty() {
            self.resource.clone()
        } else {
            format!("{}.{}", self.resource, self.group)
        }
    }
}

impl fmt::Display for GroupVersionResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.group.is_empty() {
            write!(f, "{}/{}", self.version, self.resource)
        } else {
            write!(f, "{}/{}/{}", self.group, self.version, self.resource)
        }
    }
}

/// (group, version, kind): the type-name coordinates of an object
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GroupVersionKind {
    pub group: String,
    pub version: String,
    pub kind: String,
}

impl GroupVersionKind {
    pub fn new(group: &str, version: &str, kind: &str) -> Self {
        Self {
            group: group.to_string(),
            version: version.to_string(),
            kind: kind.to_string(),
        }
    }

    /// The `apiVersion` wire form: `v1` for the core group, `group/version`
    /// otherwise
    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }

    /// The same coordinates with `List` appended to the kind
    pub fn list_kind(&self) -> Self {
        Self {
            group: self.group.clone(),
            version: self.version.clone(),
            kind: format!("{}List", self.kind),
        }
    }
}

impl fmt::Display for GroupVersionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}, Kind={}", self.api_version(), self.kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn core_group_api_version() {
        let gvk = GroupVersionKind::new("", "v1", "Pod");
        assert_eq!(gvk.api_version(), "v1");
        assert_eq!(gvk.list_kind().kind, "PodList");
    }

    #[test]
    fn grouped_api_version() {
        let gvk = GroupVersionKind::new("apps", "v1", "Deployment");
        assert_eq!(gvk.api_version(), "apps/v1");
    }

    #[test]
    fn group_resource_forms() {
        assert_eq!(
            GroupVersionResource::new("", "v1", "pods").group_resource(),
            "pods"
        );
        assert_eq!(
            GroupVersionResource::new("apps", "v1", "replicasets").group_resource(),
            "replicasets.apps"
        );
    }
}

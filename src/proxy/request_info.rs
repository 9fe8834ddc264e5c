//! Kubernetes request classification
//!
//! Decodes the API server URL grammar into its parts:
//! `/api/<version>/...` for the legacy groupless API and
//! `/apis/<group>/<version>/...` for grouped APIs, with optional
//! `namespaces/<ns>` scoping, object name, and subresource. The decoded
//! form drives the cacheable-vs-passthrough decision.

use std::collections::HashSet;

/// The decoded parts of an API request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestInfo {
    /// Whether the path parsed as a resource request at all
    pub is_resource_request: bool,
    pub api_group: String,
    pub api_version: String,
    pub resource: String,
    pub subresource: String,
    pub namespace: String,
    pub name: String,
    /// Kubernetes verb: get, list, watch, create, update, patch, delete,
    /// deletecollection
    pub verb: String,
}

impl RequestInfo {
    /// Whether the cache can serve this request: a concrete resource, no
    /// subresource other than `status`, and a read verb
    pub fn is_cacheable(&self) -> bool {
        if !self.is_resource_request || self.resource.is_empty() {
            return false;
        }
        if !self.subresource.is_empty() && self.subresource != "status" {
            return false;
        }
        matches!(self.verb.as_str(), "get" | "list")
    }
}

/// Parses requests against configured prefix roots
#[derive(Debug, Clone)]
pub struct RequestInfoResolver {
    api_prefixes: HashSet<String>,
    groupless_prefixes: HashSet<String>,
}

impl RequestInfoResolver {
    /// Build a resolver for an API proxy prefix (`/` gives the standard
    /// `api` and `apis` roots)
    pub fn new(api_proxy_prefix: &str) -> Self {
        let trimmed = api_proxy_prefix.trim_matches('/');
        let join = |root: &str| {
            if trimmed.is_empty() {
                root.to_string()
            } else {
                format!("{trimmed}/{root}")
            }
        };
        let groupless = join("api");
        let grouped = join("apis");
        Self {
            api_prefixes: HashSet::from([groupless.clone(), grouped]),
            groupless_prefixes: HashSet::from([groupless]),
        }
    }

    /// Decode a request
    pub fn resolve(&self, method: &str, path: &str, query: &str) -> RequestInfo {
        let mut info = RequestInfo {
            verb: method_verb(method),
            ..Default::default()
        };

        let parts: Vec<&str> = path.split('/').filter(|p| !p.is_empty()).collect();
        if parts.is_empty() {
            return info;
        }

        // locate the API root; paths outside it are non-resource requests
        let prefix_len = self
            .api_prefixes
            .iter()
            .filter(|prefix| {
                let prefix_parts: Vec<&str> = prefix.split('/').collect();
                parts.len() >= prefix_parts.len() && parts[..prefix_parts.len()] == prefix_parts[..]
            })
            .map(|prefix| prefix.split('/').count())
            .max();
        let Some(prefix_len) = prefix_len else {
            return info;
        };
        let groupless = self
            .groupless_prefixes
            .iter()
            .any(|prefix| {
                let prefix_parts: Vec<&str> = prefix.split('/').collect();
                parts.len() >= prefix_parts.len() && parts[..prefix_parts.len()] == prefix_parts[..]
            });

        let mut rest = &parts[prefix_len..];
        if groupless {
            // /api/<version>/...
            let Some(version) = rest.first() else {
                return info;
            };
            info.api_version = version.to_string();
            rest = &rest[1..];
        } else {
            // /apis/<group>/<version>/...
            let Some(group) = rest.first() else {
                return info;
            };
            let Some(version) = rest.get(1) else {
                return info;
            };
            info.api_group = group.to_string();
            info.api_version = version.to_string();
            rest = &rest[2..];
        }
        if rest.is_empty() {
            return info;
        }
        info.is_resource_request = true;

        // legacy watch prefix: /api/v1/watch/...
        if rest[0] == "watch" {
            info.verb = "watch".to_string();
            rest = &rest[1..];
            if rest.is_empty() {
                info.is_resource_request = false;
                return info;
            }
        }

        // namespace scoping; note /api/v1/namespaces/<ns> is itself a get
        // on the namespace object
        if rest[0] == "namespaces" {
            if rest.len() > 1 {
                info.namespace = rest[1].to_string();
                if rest.len() > 2 {
                    rest = &rest[2..];
                } else {
                    rest = &rest[..2];
                }
            }
        } else {
            info.namespace = String::new();
        }

        info.resource = rest[0].to_string();
        if let Some(name) = rest.get(1) {
            info.name = name.to_string();
        }
        if let Some(subresource) = rest.get(2) {
            info.subresource = subresource.to_string();
        }

        finalize_verb(&mut info, query);
        info
    }
}

fn method_verb(method: &str) -> String {
    match method {
        "POST" => "create",
        "GET" | "HEAD" => "get",
        "PUT" => "update",
        "PATCH" => "patch",
        "DELETE" => "delete",
        _ => "",
    }
    .to_string()
}

fn finalize_verb(info: &mut RequestInfo, query: &str) {
    if info.name.is_empty() && info.verb == "get" {
        if query_watch(query) {
            info.verb = "watch".to_string();
        } else {
            info.verb = "list".to_string();
        }
    }
    if info.name.is_empty() && info.verb == "delete" {
        info.verb = "deletecollection".to_string();
    }
}

fn query_watch(query: &str) -> bool {
    query.split('&').any(|pair| {
        matches!(
            pair.split_once('=').map_or((pair, ""), |kv| kv),
            ("watch", "true") | ("watch", "1") | ("watch", "")
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolve(method: &str, path: &str) -> RequestInfo {
        RequestInfoResolver::new("/").resolve(method, path, "")
    }

    #[test]
    fn namespaced_get() {
        let info = resolve("GET", "/api/v1/namespaces/default/pods/p1");
        assert!(info.is_resource_request);
        assert_eq!(info.api_group, "");
        assert_eq!(info.api_version, "v1");
        assert_eq!(info.namespace, "default");
        assert_eq!(info.resource, "pods");
        assert_eq!(info.name, "p1");
        assert_eq!(info.verb, "get");
        assert!(info.is_cacheable());
    }

    #[test]
    fn cluster_list() {
        let info = resolve("GET", "/api/v1/pods");
        assert_eq!(info.verb, "list");
        assert_eq!(info.namespace, "");
        assert!(info.is_cacheable());
    }

    #[test]
    fn grouped_list() {
        let info = resolve("GET", "/apis/apps/v1/namespaces/kube-system/replicasets");
        assert_eq!(info.api_group, "apps");
        assert_eq!(info.api_version, "v1");
        assert_eq!(info.resource, "replicasets");
        assert_eq!(info.verb, "list");
        assert!(info.is_cacheable());
    }

    #[test]
    fn namespace_object_get() {
        let info = resolve("GET", "/api/v1/namespaces/default");
        assert_eq!(info.resource, "namespaces");
        assert_eq!(info.name, "default");
        assert_eq!(info.namespace, "default");
        assert_eq!(info.verb, "get");
    }

    #[test]
    fn status_subresource_is_cacheable() {
        let info = resolve("GET", "/api/v1/namespaces/default/pods/p1/status");
        assert_eq!(info.subresource, "status");
        assert!(info.is_cacheable());
    }

    #[test]
    fn exec_subresource_is_not_cacheable() {
        let info = resolve("POST", "/api/v1/namespaces/default/pods/p1/exec");
        assert_eq!(info.subresource, "exec");
        assert_eq!(info.verb, "create");
        assert!(!info.is_cacheable());
    }

    #[test]
    fn get_exec_subresource_is_not_cacheable() {
        let info = resolve("GET", "/api/v1/namespaces/default/pods/p1/exec");
        assert!(!info.is_cacheable());
    }

    #[test]
    fn write_verbs_are_not_cacheable() {
        assert_eq!(resolve("POST", "/api/v1/namespaces/default/pods").verb, "create");
        assert_eq!(resolve("PUT", "/api/v1/namespaces/default/pods/p1").verb, "update");
        assert_eq!(resolve("PATCH", "/api/v1/namespaces/default/pods/p1").verb, "patch");
        assert_eq!(resolve("DELETE", "/api/v1/namespaces/default/pods/p1").verb, "delete");
        assert_eq!(resolve("DELETE", "/api/v1/namespaces/default/pods").verb, "deletecollection");
        for path in [
            "/api/v1/namespaces/default/pods",
            "/api/v1/namespaces/default/pods/p1",
        ] {
            assert!(!RequestInfoResolver::new("/").resolve("POST", path, "").is_cacheable());
        }
    }

    #[test]
    fn watch_query_parameter() {
        let resolver = RequestInfoResolver::new("/");
        let info = resolver.resolve("GET", "/api/v1/pods", "watch=true&resourceVersion=5");
        assert_eq!(info.verb, "watch");
        assert!(!info.is_cacheable());
    }

    #[test]
    fn legacy_watch_path() {
        let info = resolve("GET", "/api/v1/watch/namespaces/default/pods");
        assert_eq!(info.verb, "watch");
        assert_eq!(info.resource, "pods");
        assert!(!info.is_cacheable());
    }

    #[test]
    fn non_api_paths_are_not_resource_requests() {
        for path in ["/healthz", "/version", "/openapi/v2", "/api", "/apis", "/api/v1"] {
            let info = resolve("GET", path);
            assert!(!info.is_resource_request, "path {path} parsed as resource");
            assert!(!info.is_cacheable());
        }
    }

    #[test]
    fn prefixed_resolver() {
        let resolver = RequestInfoResolver::new("/k8s-proxy");
        let info = resolver.resolve("GET", "/k8s-proxy/api/v1/pods", "");
        assert_eq!(info.resource, "pods");
        assert_eq!(info.verb, "list");
        let bare = resolver.resolve("GET", "/api/v1/pods", "");
        assert!(!bare.is_resource_request);
    }
}

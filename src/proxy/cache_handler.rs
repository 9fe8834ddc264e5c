//! The cache-backed request handler
//!
//! Serves GET and LIST from the informer layer, speaking the API server's
//! wire dialect: JSON objects and lists, `Status` bodies for errors, and
//! server-side tables when the client's `Accept` header asks for them.

use std::sync::Arc;

use serde_json::{json, Value};
use tracing::debug;

use crate::error::{KubecacheError, KubecacheResult};
use crate::meta::selectors::{FieldSelector, LabelSelector};
use crate::meta::status::Status;
use crate::meta::table::TABLE_ACCEPT;
use crate::meta::{GroupVersionResource, TypeMapper};

use super::informers::{InformerCache, UpstreamSource};
use super::request_info::{RequestInfo, RequestInfoResolver};
use super::table_convertor::AggregateTableConvertor;

/// Decoded LIST parameters
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ListOptions {
    pub label_selector: String,
    pub field_selector: String,
    /// Accepted and deliberately ignored: the cache serves full snapshots,
    /// and a partial page out of an in-memory map would be incorrect
    pub limit: Option<i64>,
    /// Accepted and deliberately ignored, as for `limit`
    pub continue_token: String,
    pub resource_version: String,
}

impl ListOptions {
    /// Decode from a URL query string
    pub fn parse(query: &str) -> Self {
        let mut opts = Self::default();
        for (key, value) in form_urlencoded::parse(query.as_bytes()) {
            match key.as_ref() {
                "labelSelector" => opts.label_selector = value.into_owned(),
                "fieldSelector" => opts.field_selector = value.into_owned(),
                "limit" => opts.limit = value.parse().ok(),
                "continue" => opts.continue_token = value.into_owned(),
                "resourceVersion" => opts.resource_version = value.into_owned(),
                _ => {}
            }
        }
        opts
    }
}

/// Serves cacheable requests from the informer layer
pub struct CacheProxyHandler {
    informers: InformerCache,
    mapper: TypeMapper,
    resolver: RequestInfoResolver,
    table_convertor: Option<AggregateTableConvertor>,
}

impl CacheProxyHandler {
    pub fn new(
        source: Arc<dyn UpstreamSource>,
        api_proxy_prefix: &str,
        table_convertor: Option<AggregateTableConvertor>,
    ) -> Self {
        Self {
            informers: InformerCache::new(source),
            mapper: TypeMapper::new(),
            resolver: RequestInfoResolver::new(api_proxy_prefix),
            table_convertor,
        }
    }

    /// Whether the cache serves this request; everything else belongs to
    /// the passthrough
    pub fn is_cached(&self, method: &str, path: &str, query: &str) -> bool {
        self.resolver.resolve(method, path, query).is_cacheable()
    }

    /// Handle a request, producing the response code and JSON body.
    ///
    /// Error bodies are always `Status` objects carrying their own HTTP
    /// code; unexpected failures become a 500 internal-error `Status`.
    pub async fn serve(&self, method: &str, path: &str, query: &str, accept: &str) -> (u16, Value) {
        match self.handle(method, path, query, accept).await {
            Ok(body) => (200, body),
            Err(e) => {
                debug!("handle request error: {}", e);
                let status = match e.as_api_status() {
                    Some(status) => status.clone(),
                    None => Status::internal_error(e),
                };
                let code = status.code;
                match serde_json::to_value(&status) {
                    Ok(body) => (code, body),
                    Err(_) => (500, json!({"kind": "Status", "apiVersion": "v1", "code": 500})),
                }
            }
        }
    }

    async fn handle(
        &self,
        method: &str,
        path: &str,
        query: &str,
        accept: &str,
    ) -> KubecacheResult<Value> {
        let info = self.resolver.resolve(method, path, query);
        let gvr = GroupVersionResource::new(&info.api_group, &info.api_version, &info.resource);

        if !info.subresource.is_empty() && info.subresource != "status" {
            let subresource = format!("{}/{}", info.resource, info.subresource);
            return Err(KubecacheError::api(Status::method_not_supported(
                &info.api_group,
                &subresource,
                &info.verb,
            )));
        }

        let informer = self.informers.ensure_informer(&gvr).await.map_err(|e| {
            match e.as_api_status() {
                Some(_) => e,
                None => KubecacheError::api(Status::internal_error(format!(
                    "ensure informer for {gvr} error: {e}"
                ))),
            }
        })?;

        let gvk = self.mapper.kind_for(&gvr);

        let body = match info.verb.as_str() {
            "get" => {
                let obj = informer.get(&info.namespace, &info.name).ok_or_else(|| {
                    KubecacheError::api(Status::not_found(
                        &info.api_group,
                        &info.resource,
                        &info.name,
                    ))
                })?;
                obj.into_value()
            }
            "list" => self.handle_list(&informer, &info, query, &gvk.list_kind())?,
            _ => {
                return Err(KubecacheError::api(Status::method_not_supported(
                    &info.api_group,
                    &info.resource,
                    &info.verb,
                )))
            }
        };

        let convertor = match self.table_convertor.as_ref() {
            Some(convertor) if wants_table(accept) => convertor,
            _ => return Ok(body),
        };
        match convertor.convert(&body).await {
            Ok(table) => Ok(serde_json::to_value(&table)?),
            Err(e) => {
                // table projection is best-effort; the raw object is always
                // a valid answer
                debug!("convert to table error: {}", e);
                Ok(body)
            }
        }
    }

    fn handle_list(
        &self,
        informer: &super::informers::Informer,
        info: &RequestInfo,
        query: &str,
        list_gvk: &crate::meta::GroupVersionKind,
    ) -> KubecacheResult<Value> {
        let opts = ListOptions::parse(query);
        let label_selector = LabelSelector::parse(&opts.label_selector)?;
        let field_selector = FieldSelector::parse(&opts.field_selector)?;

        let (objects, resource_version) =
            informer.list(&info.namespace, &label_selector, &field_selector);
        let items: Vec<Value> = objects.into_iter().map(|obj| obj.into_value()).collect();

        Ok(json!({
            "apiVersion": list_gvk.api_version(),
            "kind": list_gvk.kind,
            "metadata": {"resourceVersion": resource_version},
            "items": items,
        }))
    }
}

fn wants_table(accept: &str) -> bool {
    accept
        .split(',')
        .any(|media| media.trim() == TABLE_ACCEPT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::DynamicObject;
    use crate::proxy::informers::testing::FakeSource;
    use crate::proxy::informers::WatchEvent;

    fn pod(name: &str, namespace: &str, phase: &str, rv: &str) -> DynamicObject {
        DynamicObject::new(json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": {"name": name, "namespace": namespace, "resourceVersion": rv},
            "status": {"phase": phase}
        }))
    }

    fn pods_gvr() -> GroupVersionResource {
        GroupVersionResource::new("", "v1", "pods")
    }

    fn handler_with(source: Arc<FakeSource>) -> CacheProxyHandler {
        CacheProxyHandler::new(
            source,
            "/",
            Some(crate::proxy::table_convertor::default_table_convertor(None)),
        )
    }

    #[tokio::test]
    async fn get_hit() {
        let source = Arc::new(FakeSource::new());
        source.seed(&pods_gvr(), vec![pod("p1", "default", "Running", "1")]);
        let handler = handler_with(source);

        let (code, body) = handler
            .serve("GET", "/api/v1/namespaces/default/pods/p1", "", "application/json")
            .await;
        assert_eq!(code, 200);
        assert_eq!(body["metadata"]["name"], "p1");
        assert_eq!(body["kind"], "Pod");
    }

    #[tokio::test]
    async fn get_miss_is_kubernetes_404() {
        let source = Arc::new(FakeSource::new());
        source.seed(&pods_gvr(), vec![]);
        let handler = handler_with(source);

        let (code, body) = handler
            .serve("GET", "/api/v1/namespaces/default/pods/ghost", "", "")
            .await;
        assert_eq!(code, 404);
        assert_eq!(body["kind"], "Status");
        assert_eq!(body["apiVersion"], "v1");
        assert_eq!(body["reason"], "NotFound");
        assert_eq!(body["message"], "pods \"ghost\" not found");
    }

    #[tokio::test]
    async fn deletion_is_observed() {
        let source = Arc::new(FakeSource::new());
        source.seed(&pods_gvr(), vec![pod("p1", "default", "Running", "1")]);
        let handler = handler_with(source.clone());

        let (code, _) = handler
            .serve("GET", "/api/v1/namespaces/default/pods/p1", "", "")
            .await;
        assert_eq!(code, 200);

        source.push_event(&pods_gvr(), WatchEvent::Deleted(pod("p1", "default", "Running", "2")));
        let mut code = 200;
        for _ in 0..50 {
            let (c, _) = handler
                .serve("GET", "/api/v1/namespaces/default/pods/p1", "", "")
                .await;
            code = c;
            if code == 404 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(code, 404);
    }

    #[tokio::test]
    async fn list_returns_full_snapshot() {
        let source = Arc::new(FakeSource::new());
        source.seed(
            &pods_gvr(),
            vec![
                pod("p1", "default", "Running", "1"),
                pod("p2", "default", "Pending", "1"),
                pod("p3", "kube-system", "Running", "1"),
            ],
        );
        let handler = handler_with(source);

        let (code, body) = handler
            .serve("GET", "/api/v1/namespaces/default/pods", "", "")
            .await;
        assert_eq!(code, 200);
        assert_eq!(body["kind"], "PodList");
        assert_eq!(body["apiVersion"], "v1");
        assert_eq!(body["items"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn indexed_field_selector_list() {
        let source = Arc::new(FakeSource::new());
        source.seed(
            &pods_gvr(),
            vec![
                pod("p1", "default", "Running", "1"),
                pod("p2", "default", "Pending", "1"),
            ],
        );
        let handler = handler_with(source);

        let (code, body) = handler
            .serve(
                "GET",
                "/api/v1/pods",
                "fieldSelector=status.phase%3DRunning",
                "",
            )
            .await;
        assert_eq!(code, 200);
        let items = body["items"].as_array().unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0]["metadata"]["name"], "p1");
    }

    #[tokio::test]
    async fn limit_is_ignored() {
        let source = Arc::new(FakeSource::new());
        source.seed(
            &pods_gvr(),
            vec![
                pod("p1", "default", "Running", "1"),
                pod("p2", "default", "Running", "1"),
            ],
        );
        let handler = handler_with(source);

        let (code, body) = handler.serve("GET", "/api/v1/pods", "limit=1", "").await;
        assert_eq!(code, 200);
        assert_eq!(body["items"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn bad_selector_is_400() {
        let source = Arc::new(FakeSource::new());
        source.seed(&pods_gvr(), vec![]);
        let handler = handler_with(source);

        let (code, body) = handler
            .serve("GET", "/api/v1/pods", "fieldSelector=status.phase%3ERunning", "")
            .await;
        assert_eq!(code, 400);
        assert_eq!(body["reason"], "BadRequest");
    }

    #[tokio::test]
    async fn non_status_subresource_is_405() {
        let source = Arc::new(FakeSource::new());
        let handler = handler_with(source);

        let (code, body) = handler
            .serve("GET", "/api/v1/namespaces/default/pods/p1/log", "", "")
            .await;
        assert_eq!(code, 405);
        assert_eq!(body["reason"], "MethodNotAllowed");
        assert_eq!(body["details"]["kind"], "pods/log");
    }

    #[tokio::test]
    async fn informer_start_failure_is_500_and_retried() {
        let source = Arc::new(FakeSource::new());
        source.set_fail_lists(true);
        let handler = handler_with(source.clone());

        let (code, body) = handler.serve("GET", "/api/v1/pods", "", "").await;
        assert_eq!(code, 500);
        assert_eq!(body["reason"], "InternalError");

        source.set_fail_lists(false);
        source.seed(&pods_gvr(), vec![pod("p1", "default", "Running", "1")]);
        let (code, _) = handler.serve("GET", "/api/v1/pods", "", "").await;
        assert_eq!(code, 200);
    }

    #[tokio::test]
    async fn table_accept_negotiation() {
        let source = Arc::new(FakeSource::new());
        source.seed(&pods_gvr(), vec![pod("p1", "default", "Running", "1")]);
        let handler = handler_with(source);

        let accept = format!("{TABLE_ACCEPT},application/json");
        let (code, body) = handler.serve("GET", "/api/v1/pods", "", &accept).await;
        assert_eq!(code, 200);
        assert_eq!(body["kind"], "Table");
        assert_eq!(body["apiVersion"], "meta.k8s.io/v1");
        assert_eq!(body["rows"][0]["object"]["kind"], "PartialObjectMetadata");
    }

    #[tokio::test]
    async fn table_projection_failure_falls_back_to_raw() {
        let source = Arc::new(FakeSource::new());
        let widgets = GroupVersionResource::new("example.io", "v1", "widgets");
        source.seed(
            &widgets,
            vec![DynamicObject::new(json!({
                "apiVersion": "example.io/v1",
                "kind": "Widget",
                "metadata": {"name": "w1", "resourceVersion": "1"}
            }))],
        );
        // no CRD getter configured, so example.io has no convertor
        let handler = handler_with(source);

        let (code, body) = handler
            .serve("GET", "/apis/example.io/v1/widgets", "", TABLE_ACCEPT)
            .await;
        assert_eq!(code, 200);
        assert_eq!(body["kind"], "WidgetList");
    }

    #[test]
    fn list_options_parsing() {
        let opts =
            ListOptions::parse("labelSelector=app%3Dweb&fieldSelector=status.phase%3DRunning&limit=10&continue=tok&resourceVersion=5");
        assert_eq!(opts.label_selector, "app=web");
        assert_eq!(opts.field_selector, "status.phase=Running");
        assert_eq!(opts.limit, Some(10));
        assert_eq!(opts.continue_token, "tok");
        assert_eq!(opts.resource_version, "5");
    }
}

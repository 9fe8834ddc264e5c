//! Lazy per-resource informers
//!
//! An informer keeps one resource collection mirrored in memory: an initial
//! LIST populates the store, a long-lived WATCH applies every subsequent
//! event, and a full re-list every `RESYNC_PERIOD` bounds the damage of
//! missed events. Informers start on first use: the first reader for a
//! `(group, version, resource)` pays for the initial sync, everyone after
//! reads from memory.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::BytesMut;
use parking_lot::RwLock;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::client::UpstreamClient;
use crate::error::{KubecacheError, KubecacheResult};
use crate::meta::selectors::{FieldSelector, LabelSelector};
use crate::meta::{DynamicObject, GroupVersionResource, TypeMapper};

use super::indexers::indexers_for_kind;
use super::store::Store;

/// Background full-resync interval, independent of the watch stream
pub const RESYNC_PERIOD: Duration = Duration::from_secs(10 * 60);

/// One event observed on a watch stream
#[derive(Debug, Clone)]
pub enum WatchEvent {
    Added(DynamicObject),
    Modified(DynamicObject),
    Deleted(DynamicObject),
    /// Progress marker carrying only a resourceVersion
    Bookmark(String),
}

/// A live watch stream
#[async_trait]
pub trait WatchStream: Send {
    /// The next event; `None` when the stream ended cleanly
    async fn next_event(&mut self) -> KubecacheResult<Option<WatchEvent>>;
}

/// Where informers get their data: LIST a collection, WATCH it from a
/// resourceVersion
#[async_trait]
pub trait UpstreamSource: Send + Sync {
    async fn list(
        &self,
        gvr: &GroupVersionResource,
    ) -> KubecacheResult<(Vec<DynamicObject>, String)>;

    async fn watch(
        &self,
        gvr: &GroupVersionResource,
        resource_version: &str,
    ) -> KubecacheResult<Box<dyn WatchStream>>;
}

/// One running informer
pub struct Informer {
    store: Arc<RwLock<Store>>,
    task: JoinHandle<()>,
}

impl Informer {
    /// Read one object from the mirrored collection
    pub fn get(&self, namespace: &str, name: &str) -> Option<DynamicObject> {
        self.store.read().get(namespace, name)
    }

    /// Snapshot the mirrored collection: matching objects plus the
    /// collection resourceVersion
    pub fn list(
        &self,
        namespace: &str,
        label_selector: &LabelSelector,
        field_selector: &FieldSelector,
    ) -> (Vec<DynamicObject>, String) {
        let store = self.store.read();
        (
            store.list(namespace, label_selector, field_selector),
            store.resource_version().to_string(),
        )
    }
}

impl Drop for Informer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Lazily started informers, one per resource
pub struct InformerCache {
    source: Arc<dyn UpstreamSource>,
    mapper: TypeMapper,
    informers: tokio::sync::RwLock<HashMap<GroupVersionResource, Arc<Informer>>>,
    resync_period: Duration,
}

impl InformerCache {
    pub fn new(source: Arc<dyn UpstreamSource>) -> Self {
        Self {
            source,
            mapper: TypeMapper::new(),
            informers: tokio::sync::RwLock::new(HashMap::new()),
            resync_period: RESYNC_PERIOD,
        }
    }

    #[cfg(test)]
    fn with_resync_period(mut self, period: Duration) -> Self {
        self.resync_period = period;
        self
    }

    /// Get the informer for a resource, starting it on first use.
    ///
    /// The first caller blocks until the initial list completes; concurrent
    /// callers for the same resource wait on the registration lock and then
    /// take the fast path. A failed start is not recorded, so the next
    /// request retries.
    pub async fn ensure_informer(
        &self,
        gvr: &GroupVersionResource,
    ) -> KubecacheResult<Arc<Informer>> {
        {
            let informers = self.informers.read().await;
            if let Some(informer) = informers.get(gvr) {
                return Ok(informer.clone());
            }
        }

        let mut informers = self.informers.write().await;
        // re-check under the write lock: another caller may have won the
        // registration race while we swapped locks
        if let Some(informer) = informers.get(gvr) {
            return Ok(informer.clone());
        }

        let gvk = self.mapper.kind_for(gvr);
        let store = Arc::new(RwLock::new(Store::new(indexers_for_kind(
            &gvk.group, &gvk.kind,
        ))));

        debug!("starting informer for {}", gvr);
        let (objects, resource_version) = self.source.list(gvr).await?;
        store.write().replace(objects, &resource_version);

        let task = tokio::spawn(run_informer(
            self.source.clone(),
            gvr.clone(),
            store.clone(),
            self.resync_period,
        ));

        let informer = Arc::new(Informer { store, task });
        informers.insert(gvr.clone(), informer.clone());
        Ok(informer)
    }

    /// Whether an informer has already been started for the resource
    pub async fn has_informer(&self, gvr: &GroupVersionResource) -> bool {
        self.informers.read().await.contains_key(gvr)
    }
}

/// The informer's long-running loop: watch until the resync deadline or a
/// stream failure, then re-list and go again
async fn run_informer(
    source: Arc<dyn UpstreamSource>,
    gvr: GroupVersionResource,
    store: Arc<RwLock<Store>>,
    resync_period: Duration,
) {
    loop {
        let deadline = tokio::time::Instant::now() + resync_period;
        watch_until(source.as_ref(), &gvr, &store, deadline).await;

        match source.list(&gvr).await {
            Ok((objects, resource_version)) => {
                debug!("resynced {} ({} objects)", gvr, objects.len());
                store.write().replace(objects, &resource_version);
            }
            Err(e) => {
                warn!("resync list for {} failed: {}", gvr, e);
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }
}

async fn watch_until(
    source: &dyn UpstreamSource,
    gvr: &GroupVersionResource,
    store: &Arc<RwLock<Store>>,
    deadline: tokio::time::Instant,
) {
    while tokio::time::Instant::now() < deadline {
        let resource_version = store.read().resource_version().to_string();
        let mut stream = match source.watch(gvr, &resource_version).await {
            Ok(stream) => stream,
            Err(e) => {
                debug!("watch {} from rv {:?} failed: {}", gvr, resource_version, e);
                return;
            }
        };

        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return;
            }
            match tokio::time::timeout(remaining, stream.next_event()).await {
                Err(_) => return, // resync due
                Ok(Ok(Some(event))) => apply_event(store, event),
                Ok(Ok(None)) => break, // clean EOF, reopen from current rv
                Ok(Err(e)) => {
                    debug!("watch {} stream error: {}", gvr, e);
                    return;
                }
            }
        }
    }
}

fn apply_event(store: &Arc<RwLock<Store>>, event: WatchEvent) {
    let mut store = store.write();
    match event {
        WatchEvent::Added(obj) | WatchEvent::Modified(obj) => store.upsert(obj),
        WatchEvent::Deleted(obj) => {
            let rv = obj.resource_version().to_string();
            store.delete(&obj.key());
            store.set_resource_version(&rv);
        }
        WatchEvent::Bookmark(rv) => store.set_resource_version(&rv),
    }
}

// ---- reqwest-backed source ----

/// `UpstreamSource` over a real API server connection
pub struct ApiServerSource {
    client: UpstreamClient,
}

impl ApiServerSource {
    pub fn new(client: UpstreamClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl UpstreamSource for ApiServerSource {
    async fn list(
        &self,
        gvr: &GroupVersionResource,
    ) -> KubecacheResult<(Vec<DynamicObject>, String)> {
        let raw = self.client.list(gvr, None).await?;
        let resource_version = raw
            .pointer("/metadata/resourceVersion")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();
        let objects = raw
            .get("items")
            .and_then(Value::as_array)
            .map(|items| items.iter().cloned().map(DynamicObject::new).collect())
            .unwrap_or_default();
        Ok((objects, resource_version))
    }

    async fn watch(
        &self,
        gvr: &GroupVersionResource,
        resource_version: &str,
    ) -> KubecacheResult<Box<dyn WatchStream>> {
        let response = self.client.watch(gvr, resource_version).await?;
        Ok(Box::new(JsonLinesWatchStream {
            gvr: gvr.to_string(),
            response,
            buffer: BytesMut::new(),
        }))
    }
}

/// Decodes the API server's chunked JSON-lines watch body
struct JsonLinesWatchStream {
    gvr: String,
    response: reqwest::Response,
    buffer: BytesMut,
}

#[async_trait]
impl WatchStream for JsonLinesWatchStream {
    async fn next_event(&mut self) -> KubecacheResult<Option<WatchEvent>> {
        loop {
            if let Some(line) = take_line(&mut self.buffer) {
                if line.iter().all(u8::is_ascii_whitespace) {
                    continue;
                }
                return parse_watch_line(&self.gvr, &line).map(Some);
            }
            match self.response.chunk().await? {
                Some(chunk) => self.buffer.extend_from_slice(&chunk),
                None => return Ok(None),
            }
        }
    }
}

fn take_line(buffer: &mut BytesMut) -> Option<Vec<u8>> {
    let pos = buffer.iter().position(|&b| b == b'\n')?;
    let line = buffer.split_to(pos + 1);
    Some(line[..pos].to_vec())
}

fn parse_watch_line(gvr: &str, line: &[u8]) -> KubecacheResult<WatchEvent> {
    let raw: Value = serde_json::from_slice(line)?;
    let event_type = raw.get("type").and_then(Value::as_str).unwrap_or("");
    let object = raw.get("object").cloned().unwrap_or(Value::Null);
    match event_type {
        "ADDED" => Ok(WatchEvent::Added(DynamicObject::new(object))),
        "MODIFIED" => Ok(WatchEvent::Modified(DynamicObject::new(object))),
        "DELETED" => Ok(WatchEvent::Deleted(DynamicObject::new(object))),
        "BOOKMARK" => {
            let rv = object
                .pointer("/metadata/resourceVersion")
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_string();
            Ok(WatchEvent::Bookmark(rv))
        }
        "ERROR" => {
            let message = object
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("watch error")
                .to_string();
            Err(KubecacheError::WatchClosed {
                gvr: gvr.to_string(),
                reason: message,
            })
        }
        other => Err(KubecacheError::WatchClosed {
            gvr: gvr.to_string(),
            reason: format!("unknown watch event type {other:?}"),
        }),
    }
}

// ---- test fake ----

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc;

    /// In-memory `UpstreamSource` for tests: seeded collections plus
    /// manually pushed watch events
    pub struct FakeSource {
        collections: Mutex<HashMap<GroupVersionResource, Vec<DynamicObject>>>,
        senders: Mutex<HashMap<GroupVersionResource, Vec<mpsc::UnboundedSender<WatchEvent>>>>,
        queued: Mutex<HashMap<GroupVersionResource, VecDeque<WatchEvent>>>,
        list_calls: AtomicUsize,
        fail_lists: Mutex<bool>,
    }

    impl FakeSource {
        pub fn new() -> Self {
            Self {
                collections: Mutex::new(HashMap::new()),
                senders: Mutex::new(HashMap::new()),
                queued: Mutex::new(HashMap::new()),
                list_calls: AtomicUsize::new(0),
                fail_lists: Mutex::new(false),
            }
        }

        pub fn seed(&self, gvr: &GroupVersionResource, objects: Vec<DynamicObject>) {
            self.collections.lock().insert(gvr.clone(), objects);
        }

        /// Deliver an event to open watches; queued for the next watch when
        /// none is open yet
        pub fn push_event(&self, gvr: &GroupVersionResource, event: WatchEvent) {
            let senders = self.senders.lock();
            match senders.get(gvr) {
                Some(list) if !list.is_empty() => {
                    for sender in list {
                        let _ = sender.send(event.clone());
                    }
                }
                _ => {
                    self.queued.lock().entry(gvr.clone()).or_default().push_back(event);
                }
            }
        }

        pub fn list_calls(&self) -> usize {
            self.list_calls.load(Ordering::SeqCst)
        }

        pub fn set_fail_lists(&self, fail: bool) {
            *self.fail_lists.lock() = fail;
        }
    }

    pub struct FakeWatchStream {
        receiver: mpsc::UnboundedReceiver<WatchEvent>,
        pending: VecDeque<WatchEvent>,
    }

    #[async_trait]
    impl WatchStream for FakeWatchStream {
        async fn next_event(&mut self) -> KubecacheResult<Option<WatchEvent>> {
            if let Some(event) = self.pending.pop_front() {
                return Ok(Some(event));
            }
            Ok(self.receiver.recv().await)
        }
    }

    #[async_trait]
    impl UpstreamSource for FakeSource {
        async fn list(
            &self,
            gvr: &GroupVersionResource,
        ) -> KubecacheResult<(Vec<DynamicObject>, String)> {
            self.list_calls.fetch_add(1, Ordering::SeqCst);
            if *self.fail_lists.lock() {
                return Err(KubecacheError::Internal("list unavailable".to_string()));
            }
            let objects = self
                .collections
                .lock()
                .get(gvr)
                .cloned()
                .unwrap_or_default();
            Ok((objects, "1".to_string()))
        }

        async fn watch(
            &self,
            gvr: &GroupVersionResource,
            _resource_version: &str,
        ) -> KubecacheResult<Box<dyn WatchStream>> {
            let (sender, receiver) = mpsc::unbounded_channel();
            self.senders.lock().entry(gvr.clone()).or_default().push(sender);
            let pending = self.queued.lock().remove(gvr).unwrap_or_default();
            Ok(Box::new(FakeWatchStream { receiver, pending }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::FakeSource;
    use super::*;
    use serde_json::json;

    fn pods_gvr() -> GroupVersionResource {
        GroupVersionResource::new("", "v1", "pods")
    }

    fn pod(name: &str, phase: &str, rv: &str) -> DynamicObject {
        DynamicObject::new(json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": {"name": name, "namespace": "default", "resourceVersion": rv},
            "status": {"phase": phase}
        }))
    }

    #[tokio::test]
    async fn initial_list_populates_store() {
        let source = Arc::new(FakeSource::new());
        source.seed(&pods_gvr(), vec![pod("p1", "Running", "1")]);

        let cache = InformerCache::new(source);
        let informer = cache.ensure_informer(&pods_gvr()).await.unwrap();
        assert!(informer.get("default", "p1").is_some());
        assert!(informer.get("default", "nope").is_none());
    }

    #[tokio::test]
    async fn ensure_informer_is_idempotent() {
        let source = Arc::new(FakeSource::new());
        source.seed(&pods_gvr(), vec![pod("p1", "Running", "1")]);

        let cache = InformerCache::new(source.clone());
        cache.ensure_informer(&pods_gvr()).await.unwrap();
        cache.ensure_informer(&pods_gvr()).await.unwrap();
        cache.ensure_informer(&pods_gvr()).await.unwrap();
        assert_eq!(source.list_calls(), 1);
    }

    #[tokio::test]
    async fn concurrent_ensure_starts_once() {
        let source = Arc::new(FakeSource::new());
        source.seed(&pods_gvr(), vec![pod("p1", "Running", "1")]);

        let cache = Arc::new(InformerCache::new(source.clone()));
        let mut handles = Vec::new();
        for _ in 0..16 {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move {
                cache.ensure_informer(&pods_gvr()).await.map(|_| ())
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(source.list_calls(), 1);
    }

    #[tokio::test]
    async fn failed_start_is_retried() {
        let source = Arc::new(FakeSource::new());
        source.seed(&pods_gvr(), vec![pod("p1", "Running", "1")]);
        source.set_fail_lists(true);

        let cache = InformerCache::new(source.clone());
        assert!(cache.ensure_informer(&pods_gvr()).await.is_err());
        assert!(!cache.has_informer(&pods_gvr()).await);

        source.set_fail_lists(false);
        cache.ensure_informer(&pods_gvr()).await.unwrap();
        assert!(cache.has_informer(&pods_gvr()).await);
    }

    #[tokio::test]
    async fn watch_events_update_the_store() {
        let source = Arc::new(FakeSource::new());
        source.seed(&pods_gvr(), vec![pod("p1", "Running", "1")]);

        let cache = InformerCache::new(source.clone());
        let informer = cache.ensure_informer(&pods_gvr()).await.unwrap();

        source.push_event(&pods_gvr(), WatchEvent::Added(pod("p2", "Pending", "2")));
        source.push_event(&pods_gvr(), WatchEvent::Deleted(pod("p1", "Running", "3")));

        // the watch task applies events asynchronously
        for _ in 0..50 {
            if informer.get("default", "p1").is_none() && informer.get("default", "p2").is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(informer.get("default", "p1").is_none());
        assert!(informer.get("default", "p2").is_some());
    }

    #[tokio::test]
    async fn resync_replaces_contents() {
        let source = Arc::new(FakeSource::new());
        source.seed(&pods_gvr(), vec![pod("stale", "Running", "1")]);

        let cache = InformerCache::new(source.clone()).with_resync_period(Duration::from_millis(50));
        let informer = cache.ensure_informer(&pods_gvr()).await.unwrap();
        assert!(informer.get("default", "stale").is_some());

        // the next resync list returns a different world
        source.seed(&pods_gvr(), vec![pod("fresh", "Running", "2")]);
        for _ in 0..100 {
            if informer.get("default", "fresh").is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(informer.get("default", "fresh").is_some());
        assert!(informer.get("default", "stale").is_none());
    }

    #[tokio::test]
    async fn api_server_source_lists_and_watches() {
        use axum::extract::Query;
        use axum::routing::get;
        use axum::Router;
        use std::collections::HashMap;

        // a minimal API server: LIST on plain GET, a finite JSON-lines
        // stream when ?watch=true
        let app = Router::new().route(
            "/api/v1/pods",
            get(|Query(params): Query<HashMap<String, String>>| async move {
                if params.get("watch").map(String::as_str) == Some("true") {
                    assert_eq!(params.get("resourceVersion").map(String::as_str), Some("5"));
                    concat!(
                        "{\"type\":\"ADDED\",\"object\":{\"apiVersion\":\"v1\",\"kind\":\"Pod\",",
                        "\"metadata\":{\"name\":\"p2\",\"namespace\":\"default\",\"resourceVersion\":\"6\"}}}\n",
                        "{\"type\":\"DELETED\",\"object\":{\"apiVersion\":\"v1\",\"kind\":\"Pod\",",
                        "\"metadata\":{\"name\":\"p1\",\"namespace\":\"default\",\"resourceVersion\":\"7\"}}}\n",
                    )
                    .to_string()
                } else {
                    serde_json::json!({
                        "apiVersion": "v1",
                        "kind": "PodList",
                        "metadata": {"resourceVersion": "5"},
                        "items": [{
                            "apiVersion": "v1",
                            "kind": "Pod",
                            "metadata": {"name": "p1", "namespace": "default", "resourceVersion": "4"}
                        }]
                    })
                    .to_string()
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let client = UpstreamClient::new(&crate::config::ClientConfig {
            host: format!("http://{addr}"),
            ..Default::default()
        })
        .unwrap();
        let source = ApiServerSource::new(client);

        let (objects, rv) = source.list(&pods_gvr()).await.unwrap();
        assert_eq!(rv, "5");
        assert_eq!(objects.len(), 1);
        assert_eq!(objects[0].name(), "p1");

        let mut stream = source.watch(&pods_gvr(), "5").await.unwrap();
        match stream.next_event().await.unwrap() {
            Some(WatchEvent::Added(obj)) => assert_eq!(obj.name(), "p2"),
            other => panic!("unexpected event {other:?}"),
        }
        match stream.next_event().await.unwrap() {
            Some(WatchEvent::Deleted(obj)) => assert_eq!(obj.name(), "p1"),
            other => panic!("unexpected event {other:?}"),
        }
        assert!(stream.next_event().await.unwrap().is_none());
    }

    #[test]
    fn watch_line_parsing() {
        let line = br#"{"type":"ADDED","object":{"kind":"Pod","metadata":{"name":"p"}}}"#;
        match parse_watch_line("v1/pods", line).unwrap() {
            WatchEvent::Added(obj) => assert_eq!(obj.name(), "p"),
            other => panic!("unexpected event {other:?}"),
        }

        let bookmark =
            br#"{"type":"BOOKMARK","object":{"metadata":{"resourceVersion":"42"}}}"#;
        match parse_watch_line("v1/pods", bookmark).unwrap() {
            WatchEvent::Bookmark(rv) => assert_eq!(rv, "42"),
            other => panic!("unexpected event {other:?}"),
        }

        let error = br#"{"type":"ERROR","object":{"kind":"Status","message":"too old"}}"#;
        assert!(parse_watch_line("v1/pods", error).is_err());
    }

    #[test]
    fn line_splitting() {
        let mut buffer = BytesMut::from(&b"abc\ndef"[..]);
        assert_eq!(take_line(&mut buffer).unwrap(), b"abc");
        assert!(take_line(&mut buffer).is_none());
        buffer.extend_from_slice(b"\n");
        assert_eq!(take_line(&mut buffer).unwrap(), b"def");
    }
}

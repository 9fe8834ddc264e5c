//! Upstream API server client
//!
//! A thin reqwest wrapper assembled from a `ClientConfig`: authentication
//! headers, TLS material, timeouts. The informer layer uses it for LIST and
//! WATCH, the passthrough handler for verbatim forwarding, and the table
//! projector for CRD discovery.

pub mod getter;

pub use getter::ProxyClientConfigProvider;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION};
use serde_json::Value;

use crate::config::ClientConfig;
use crate::error::{KubecacheError, KubecacheResult};
use crate::meta::status::Status;
use crate::meta::GroupVersionResource;

/// HTTP client for one upstream API server
#[derive(Debug, Clone)]
pub struct UpstreamClient {
    http: reqwest::Client,
    base: String,
    basic: Option<(String, String)>,
}

impl UpstreamClient {
    /// Build a client from a resolved configuration
    pub fn new(config: &ClientConfig) -> KubecacheResult<Self> {
        if config.host.is_empty() {
            return Err(KubecacheError::NoServer);
        }

        let mut headers = HeaderMap::new();
        let token = bearer_token(config)?;
        if !token.is_empty() {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|e| KubecacheError::ConfigInvalid(format!("invalid bearer token: {e}")))?;
            headers.insert(AUTHORIZATION, value);
        }
        insert_impersonation_headers(&mut headers, config)?;

        let mut builder = reqwest::Client::builder()
            .use_rustls_tls()
            .default_headers(headers)
            .danger_accept_invalid_certs(config.tls.insecure);

        if !config.user_agent.is_empty() {
            builder = builder.user_agent(config.user_agent.clone());
        }
        if let Some(secs) = config.timeout_secs {
            builder = builder.timeout(std::time::Duration::from_secs(secs));
        }
        if let Some(ca_pem) = read_material(&config.tls.ca_data, &config.tls.ca_file)? {
            let cert = reqwest::Certificate::from_pem(&ca_pem)
                .map_err(|e| KubecacheError::ConfigInvalid(format!("invalid CA certificate: {e}")))?;
            builder = builder.add_root_certificate(cert);
        }
        let cert_pem = read_material(&config.tls.cert_data, &config.tls.cert_file)?;
        let key_pem = read_material(&config.tls.key_data, &config.tls.key_file)?;
        if let (Some(cert), Some(key)) = (cert_pem, key_pem) {
            let mut identity_pem = cert;
            identity_pem.extend_from_slice(&key);
            let identity = reqwest::Identity::from_pem(&identity_pem)
                .map_err(|e| KubecacheError::ConfigInvalid(format!("invalid client identity: {e}")))?;
            builder = builder.identity(identity);
        }

        let http = builder.build()?;
        let base = format!(
            "{}{}",
            config.host.trim_end_matches('/'),
            config.api_path.trim_end_matches('/')
        );

        let basic = if config.username.is_empty() {
            None
        } else {
            Some((config.username.clone(), config.password.clone()))
        };
        Ok(Self { http, base, basic })
    }

    /// The underlying reqwest client, for verbatim forwarding
    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// Absolute URL for a server-relative path (must start with `/`)
    pub fn url_for(&self, path_and_query: &str) -> String {
        format!("{}{}", self.base, path_and_query)
    }

    /// Collection path for a resource, optionally namespaced, optionally
    /// with an object name appended
    pub fn resource_path(
        &self,
        gvr: &GroupVersionResource,
        namespace: Option<&str>,
        name: Option<&str>,
    ) -> String {
        let mut path = if gvr.group.is_empty() {
            format!("/api/{}", gvr.version)
        } else {
            format!("/apis/{}/{}", gvr.group, gvr.version)
        };
        if let Some(ns) = namespace.filter(|ns| !ns.is_empty()) {
            path.push_str("/namespaces/");
            path.push_str(ns);
        }
        path.push('/');
        path.push_str(&gvr.resource);
        if let Some(name) = name {
            path.push('/');
            path.push_str(name);
        }
        path
    }

    /// LIST a collection across all namespaces, returning the raw list
    /// object
    pub async fn list(
        &self,
        gvr: &GroupVersionResource,
        resource_version: Option<&str>,
    ) -> KubecacheResult<Value> {
        let url = self.url_for(&self.resource_path(gvr, None, None));
        let mut request = self.http.get(&url);
        if let Some(rv) = resource_version {
            request = request.query(&[("resourceVersion", rv)]);
        }
        let response = self.send(request).await?;
        Ok(response.json().await?)
    }

    /// Open a WATCH stream on a collection; the caller consumes the
    /// chunked JSON-lines body
    pub async fn watch(
        &self,
        gvr: &GroupVersionResource,
        resource_version: &str,
    ) -> KubecacheResult<reqwest::Response> {
        let url = self.url_for(&self.resource_path(gvr, None, None));
        let request = self.http.get(&url).query(&[
            ("watch", "true"),
            ("resourceVersion", resource_version),
            ("allowWatchBookmarks", "true"),
        ]);
        self.send(request).await
    }

    /// List CustomResourceDefinitions, for table-column discovery
    pub async fn list_crds(&self) -> KubecacheResult<Vec<Value>> {
        let gvr = GroupVersionResource::new("apiextensions.k8s.io", "v1", "customresourcedefinitions");
        let list = self.list(&gvr, None).await?;
        Ok(list
            .get("items")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default())
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> KubecacheResult<reqwest::Response> {
        let mut request = request;
        if let Some((user, pass)) = &self.basic {
            request = request.basic_auth(user, Some(pass));
        }
        let response = request.send().await?;
        if response.status().is_success() {
            return Ok(response);
        }
        // upstream API errors carry their own Status body; pass it through
        let code = response.status().as_u16();
        let body = response.bytes().await.unwrap_or_default();
        match serde_json::from_slice::<Status>(&body) {
            Ok(status) if status.kind == "Status" => Err(KubecacheError::api(status)),
            _ => Err(KubecacheError::api(Status::internal_error(format!(
                "upstream returned HTTP {code}"
            )))),
        }
    }
}

fn bearer_token(config: &ClientConfig) -> KubecacheResult<String> {
    if !config.bearer_token.is_empty() {
        return Ok(config.bearer_token.clone());
    }
    if !config.bearer_token_file.is_empty() {
        let raw = std::fs::read_to_string(&config.bearer_token_file).map_err(|e| {
            KubecacheError::io(
                format!("reading bearer token file {}", config.bearer_token_file),
                e,
            )
        })?;
        return Ok(raw.trim().to_string());
    }
    Ok(String::new())
}

fn insert_impersonation_headers(
    headers: &mut HeaderMap,
    config: &ClientConfig,
) -> KubecacheResult<()> {
    let header = |value: &str| {
        HeaderValue::from_str(value)
            .map_err(|e| KubecacheError::ConfigInvalid(format!("invalid impersonation value: {e}")))
    };
    if !config.impersonate.username.is_empty() {
        headers.insert(
            HeaderName::from_static("impersonate-user"),
            header(&config.impersonate.username)?,
        );
    }
    if !config.impersonate.uid.is_empty() {
        headers.insert(
            HeaderName::from_static("impersonate-uid"),
            header(&config.impersonate.uid)?,
        );
    }
    for group in &config.impersonate.groups {
        headers.append(
            HeaderName::from_static("impersonate-group"),
            header(group)?,
        );
    }
    Ok(())
}

fn read_material(data: &str, file: &str) -> KubecacheResult<Option<Vec<u8>>> {
    if !data.is_empty() {
        return Ok(Some(data.as_bytes().to_vec()));
    }
    if !file.is_empty() {
        let raw = std::fs::read(file)
            .map_err(|e| KubecacheError::io(format!("reading TLS material {file}"), e))?;
        return Ok(Some(raw));
    }
    Ok(None)
}

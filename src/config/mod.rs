//! Client configuration for talking to the upstream API server
//!
//! `ClientConfig` is the resolved connection description the proxy daemon,
//! the fingerprint, and the upstream HTTP client all consume. It is
//! assembled from command-line flags (`ClientConfigFlags`); kubeconfig
//! loading itself is the embedding tool's concern. The kubeconfig path is
//! carried so that parent and child compute identical fingerprints, but
//! never parsed here.

use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;
use clap::Args;
use serde::{Deserialize, Serialize};

use crate::error::KubecacheResult;

/// TLS material for the upstream connection
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TlsConfig {
    pub insecure: bool,
    pub server_name: String,
    pub cert_file: String,
    pub cert_data: String,
    pub key_file: String,
    pub key_data: String,
    pub ca_file: String,
    pub ca_data: String,
}

/// Requested impersonation identity
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImpersonationConfig {
    pub username: String,
    pub uid: String,
    pub groups: Vec<String>,
}

/// External authentication provider configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuthProviderConfig {
    pub name: String,
    pub config: BTreeMap<String, String>,
}

/// Exec-based credential plugin configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecConfig {
    pub command: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub api_version: String,
}

/// A resolved client configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Upstream host, e.g. `https://10.0.0.1:6443`
    pub host: String,
    /// API path prefix on the host (normally empty or `/api`)
    pub api_path: String,

    pub username: String,
    pub password: String,
    pub bearer_token: String,
    pub bearer_token_file: String,
    pub impersonate: ImpersonationConfig,
    pub auth_provider: Option<AuthProviderConfig>,
    pub exec_provider: Option<ExecConfig>,
    pub tls: TlsConfig,

    pub user_agent: String,
    pub disable_compression: bool,
    pub qps: Option<f32>,
    pub burst: Option<i32>,
    /// Request timeout in seconds; `None` means no client-side timeout
    pub timeout_secs: Option<u64>,
    pub accept_content_types: String,
    pub content_type: String,
    pub group_version: Option<String>,
}

impl ClientConfig {
    /// A plaintext-loopback config pointing at a local proxy port.
    ///
    /// TLS and credentials are cleared: the daemon already holds them and
    /// the hop is loopback-only.
    pub fn local_proxy(port: u16) -> Self {
        Self {
            host: format!("http://127.0.0.1:{port}"),
            ..Self::default()
        }
    }
}

/// Client configuration flags, shared by every subcommand
///
/// The set mirrors the flags kubectl accepts, and doubles as the spawn
/// vocabulary: `to_spawn_args` renders exactly these flags back out so a
/// child daemon resolves an identical config.
#[derive(Args, Debug, Clone, Default)]
pub struct ClientConfigFlags {
    /// Path to the kubeconfig file to use for CLI requests
    #[arg(long, global = true, env = "KUBECONFIG")]
    pub kubeconfig: Option<PathBuf>,

    /// Default cache directory
    #[arg(long = "cache-dir", global = true)]
    pub cache_dir: Option<PathBuf>,

    /// Path to a client certificate file for TLS
    #[arg(long = "client-certificate", global = true)]
    pub client_certificate: Option<String>,

    /// Path to a client key file for TLS
    #[arg(long = "client-key", global = true)]
    pub client_key: Option<String>,

    /// Bearer token for authentication to the API server
    #[arg(long, global = true)]
    pub token: Option<String>,

    /// Username to impersonate for the operation
    #[arg(long = "as", global = true)]
    pub impersonate_user: Option<String>,

    /// UID to impersonate for the operation
    #[arg(long = "as-uid", global = true)]
    pub impersonate_uid: Option<String>,

    /// Group to impersonate for the operation (repeatable)
    #[arg(long = "as-group", global = true)]
    pub impersonate_group: Vec<String>,

    /// Username for basic authentication to the API server
    #[arg(long, global = true)]
    pub username: Option<String>,

    /// Password for basic authentication to the API server
    #[arg(long, global = true)]
    pub password: Option<String>,

    /// The name of the kubeconfig cluster to use
    #[arg(long, global = true)]
    pub cluster: Option<String>,

    /// The name of the kubeconfig user to use
    #[arg(long, global = true)]
    pub user: Option<String>,

    /// If present, the namespace scope for this CLI request
    #[arg(long, short = 'n', global = true)]
    pub namespace: Option<String>,

    /// The name of the kubeconfig context to use
    #[arg(long, global = true)]
    pub context: Option<String>,

    /// The address and port of the Kubernetes API server
    #[arg(long, short = 's', global = true)]
    pub server: Option<String>,

    /// Server name to use for server certificate validation
    #[arg(long = "tls-server-name", global = true)]
    pub tls_server_name: Option<String>,

    /// Path to a cert file for the certificate authority
    #[arg(long = "certificate-authority", global = true)]
    pub certificate_authority: Option<String>,

    /// The length of time to wait before giving up on a single request,
    /// e.g. 30s, 2m
    #[arg(long = "request-timeout", global = true)]
    pub request_timeout: Option<String>,

    /// If true, the server's certificate will not be checked for validity
    #[arg(long = "insecure-skip-tls-verify", global = true)]
    pub insecure_skip_tls_verify: bool,

    /// If true, opt out of response compression for all requests
    #[arg(long = "disable-compression", global = true)]
    pub disable_compression: bool,
}

impl ClientConfigFlags {
    /// Resolve the flags into a `ClientConfig`
    pub fn to_client_config(&self) -> KubecacheResult<ClientConfig> {
        let timeout_secs = match &self.request_timeout {
            Some(raw) => Some(parse_duration_secs(raw)?),
            None => None,
        };

        Ok(ClientConfig {
            host: self.server.clone().unwrap_or_default(),
            api_path: String::new(),
            username: self.username.clone().unwrap_or_default(),
            password: self.password.clone().unwrap_or_default(),
            bearer_token: self.token.clone().unwrap_or_default(),
            bearer_token_file: String::new(),
            impersonate: ImpersonationConfig {
                username: self.impersonate_user.clone().unwrap_or_default(),
                uid: self.impersonate_uid.clone().unwrap_or_default(),
                groups: self.impersonate_group.clone(),
            },
            auth_provider: None,
            exec_provider: None,
            tls: TlsConfig {
                insecure: self.insecure_skip_tls_verify,
                server_name: self.tls_server_name.clone().unwrap_or_default(),
                cert_file: self.client_certificate.clone().unwrap_or_default(),
                cert_data: String::new(),
                key_file: self.client_key.clone().unwrap_or_default(),
                key_data: String::new(),
                ca_file: self.certificate_authority.clone().unwrap_or_default(),
                ca_data: String::new(),
            },
            user_agent: String::new(),
            disable_compression: self.disable_compression,
            qps: None,
            burst: None,
            timeout_secs,
            accept_content_types: String::new(),
            content_type: String::new(),
            group_version: None,
        })
    }

    /// Render these flags as arguments for a spawned `internal-proxy`
    /// daemon, in a fixed order.
    ///
    /// The translation is complete over every flag that feeds the
    /// fingerprint, so parent and child agree on the proxy directory name.
    pub fn to_spawn_args(&self) -> Vec<String> {
        let mut args = Vec::new();

        let string_flags: [(&str, Option<String>); 15] = [
            ("--kubeconfig", self.kubeconfig.as_ref().map(|p| p.display().to_string())),
            ("--cache-dir", self.cache_dir.as_ref().map(|p| p.display().to_string())),
            ("--client-certificate", self.client_certificate.clone()),
            ("--client-key", self.client_key.clone()),
            ("--token", self.token.clone()),
            ("--as", self.impersonate_user.clone()),
            ("--as-uid", self.impersonate_uid.clone()),
            ("--username", self.username.clone()),
            ("--password", self.password.clone()),
            ("--cluster", self.cluster.clone()),
            ("--user", self.user.clone()),
            ("--namespace", self.namespace.clone()),
            ("--context", self.context.clone()),
            ("--server", self.server.clone()),
            ("--tls-server-name", self.tls_server_name.clone()),
        ];
        for (flag, value) in string_flags {
            if let Some(value) = value {
                if !value.is_empty() {
                    args.push(flag.to_string());
                    args.push(value);
                }
            }
        }
        if let Some(ca) = &self.certificate_authority {
            if !ca.is_empty() {
                args.push("--certificate-authority".to_string());
                args.push(ca.clone());
            }
        }
        if let Some(timeout) = &self.request_timeout {
            if !timeout.is_empty() {
                args.push("--request-timeout".to_string());
                args.push(timeout.clone());
            }
        }
        for group in &self.impersonate_group {
            args.push("--as-group".to_string());
            args.push(group.clone());
        }
        if self.insecure_skip_tls_verify {
            args.push("--insecure-skip-tls-verify".to_string());
        }
        if self.disable_compression {
            args.push("--disable-compression".to_string());
        }

        args
    }
}

/// Parse a duration like `30s`, `2m`, `1h` (or a bare second count) into
/// seconds
pub fn parse_duration_secs(raw: &str) -> KubecacheResult<u64> {
    use crate::error::KubecacheError;

    let raw = raw.trim();
    if raw.is_empty() {
        return Err(KubecacheError::ConfigInvalid(
            "empty duration".to_string(),
        ));
    }
    let (number, multiplier) = match raw.chars().last() {
        Some('s') => (&raw[..raw.len() - 1], 1),
        Some('m') => (&raw[..raw.len() - 1], 60),
        Some('h') => (&raw[..raw.len() - 1], 3600),
        _ => (raw, 1),
    };
    number
        .parse::<u64>()
        .map(|n| n * multiplier)
        .map_err(|_| KubecacheError::ConfigInvalid(format!("invalid duration {raw:?}")))
}

/// The interface the surrounding command-line code consumes to obtain a
/// client configuration
#[async_trait]
pub trait ClientConfigProvider: Send + Sync {
    async fn client_config(&self) -> KubecacheResult<ClientConfig>;
}

/// Provider that resolves straight from parsed flags
pub struct FlagsConfigProvider {
    flags: ClientConfigFlags,
}

impl FlagsConfigProvider {
    pub fn new(flags: ClientConfigFlags) -> Self {
        Self { flags }
    }
}

#[async_trait]
impl ClientConfigProvider for FlagsConfigProvider {
    async fn client_config(&self) -> KubecacheResult<ClientConfig> {
        self.flags.to_client_config()
    }
}

//! Client-configuration fingerprints
//!
//! A fingerprint canonicalizes the security-relevant fields of a
//! `ClientConfig` into a short stable identifier. Two invocations with the
//! same connection parameters must land on the same proxy directory, across
//! processes and binaries, so the serialization below is part of the
//! contract and must not change shape.
//!
//! The canonical form is the compact JSON encoding of [`FingerprintPayload`]
//! with its fields in declaration order; the fingerprint is the first 4
//! bytes of the payload's SHA-256, hex-encoded (8 characters). It is kept
//! deliberately short: the same string names a UNIX socket path, and socket
//! paths are capped at 108 bytes on Linux (104 on macOS). Accidental
//! collisions merely share a cache between identical-looking configurations.

use std::collections::BTreeMap;

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::config::{AuthProviderConfig, ClientConfig, ExecConfig};

/// The canonical serialization of the fingerprinted fields.
///
/// Field order here *is* the wire order; sub-maps are sorted
/// (`BTreeMap`) so the encoding is total.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FingerprintPayload<'a> {
    host: &'a str,
    api_path: &'a str,
    username: &'a str,
    password: &'a str,
    bearer_token: &'a str,
    bearer_token_file: &'a str,
    impersonate_user: &'a str,
    impersonate_uid: &'a str,
    impersonate_groups: &'a [String],
    auth_provider: Option<AuthPayload<'a>>,
    exec_provider: Option<ExecPayload<'a>>,
    insecure: bool,
    server_name: &'a str,
    cert_file: &'a str,
    cert_data: &'a str,
    key_file: &'a str,
    key_data: &'a str,
    ca_file: &'a str,
    ca_data: &'a str,
    user_agent: &'a str,
    disable_compression: bool,
    qps: Option<f32>,
    burst: Option<i32>,
    timeout_secs: Option<u64>,
    accept_content_types: &'a str,
    content_type: &'a str,
    group_version: Option<&'a str>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AuthPayload<'a> {
    name: &'a str,
    config: &'a BTreeMap<String, String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ExecPayload<'a> {
    command: &'a str,
    args: &'a [String],
    env: &'a BTreeMap<String, String>,
    api_version: &'a str,
}

impl<'a> FingerprintPayload<'a> {
    fn from_config(config: &'a ClientConfig) -> Self {
        Self {
            host: &config.host,
            api_path: &config.api_path,
            username: &config.username,
            password: &config.password,
            bearer_token: &config.bearer_token,
            bearer_token_file: &config.bearer_token_file,
            impersonate_user: &config.impersonate.username,
            impersonate_uid: &config.impersonate.uid,
            impersonate_groups: &config.impersonate.groups,
            auth_provider: config.auth_provider.as_ref().map(AuthPayload::from),
            exec_provider: config.exec_provider.as_ref().map(ExecPayload::from),
            insecure: config.tls.insecure,
            server_name: &config.tls.server_name,
            cert_file: &config.tls.cert_file,
            cert_data: &config.tls.cert_data,
            key_file: &config.tls.key_file,
            key_data: &config.tls.key_data,
            ca_file: &config.tls.ca_file,
            ca_data: &config.tls.ca_data,
            user_agent: &config.user_agent,
            disable_compression: config.disable_compression,
            qps: config.qps,
            burst: config.burst,
            timeout_secs: config.timeout_secs,
            accept_content_types: &config.accept_content_types,
            content_type: &config.content_type,
            group_version: config.group_version.as_deref(),
        }
    }
}

impl<'a> From<&'a AuthProviderConfig> for AuthPayload<'a> {
    fn from(provider: &'a AuthProviderConfig) -> Self {
        Self {
            name: &provider.name,
            config: &provider.config,
        }
    }
}

impl<'a> From<&'a ExecConfig> for ExecPayload<'a> {
    fn from(exec: &'a ExecConfig) -> Self {
        Self {
            command: &exec.command,
            args: &exec.args,
            env: &exec.env,
            api_version: &exec.api_version,
        }
    }
}

/// Compute the 8-hex-char fingerprint of a client configuration
pub fn fingerprint(config: &ClientConfig) -> String {
    let payload = FingerprintPayload::from_config(config);
    // serializing a pure in-memory struct cannot fail
    let raw = serde_json::to_vec(&payload).unwrap_or_default();
    let digest = Sha256::digest(&raw);
    hex::encode(&digest[..4])
}

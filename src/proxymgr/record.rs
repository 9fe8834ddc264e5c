//! Proxy daemon records
//!
//! One record per fingerprint directory, derived from the pid and port
//! files. Records are read-only views; the daemon itself maintains the
//! files through its claim handle.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Observed daemon state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProxyState {
    /// Process exists but has not published a port yet
    Pending,
    /// Process exists and its port file is readable
    Ready,
    /// The recorded PID no longer maps to a running process
    Dead,
}

impl std::fmt::Display for ProxyState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "Pending",
            Self::Ready => "Ready",
            Self::Dead => "Dead",
        };
        f.write_str(s)
    }
}

/// A proxy daemon record, identified by its config fingerprint
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyRecord {
    /// The record name: the client-config fingerprint
    pub fingerprint: String,
    /// Owning process
    pub pid: i32,
    /// Published TCP port; 0 until the daemon writes its port file
    pub port: u16,
    /// The fingerprint directory
    pub data_root: PathBuf,
    /// Modification time of the pid file
    pub created: DateTime<Utc>,
    pub state: ProxyState,
    /// Machine-readable cause when not Ready
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,
    /// Human-readable detail when not Ready
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
}

impl ProxyRecord {
    pub fn is_ready(&self) -> bool {
        self.state == ProxyState::Ready
    }

    /// Age of the record, humanized (`5s`, `3m`, `2h`, `4d`)
    pub fn age(&self, now: DateTime<Utc>) -> String {
        let secs = (now - self.created).num_seconds().max(0);
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
}

//! Proxy daemon lifecycle management
//!
//! Discovers running daemons through the registry, spawns new ones by
//! re-executing the current binary, and stops them with signals. Long waits
//! poll the registry every 500 ms; callers bound them with
//! `tokio::time::timeout` or a `select!` against their own shutdown signal.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tokio::process::Command;
use tracing::{debug, info};

use crate::config::ClientConfig;
use crate::error::{KubecacheError, KubecacheResult};
use crate::proxymgr::fingerprint::fingerprint;
use crate::proxymgr::record::{ProxyRecord, ProxyState};
use crate::proxymgr::registry::ProxyRegistry;

const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Manages proxy daemons for one data root
#[derive(Debug, Clone)]
pub struct ProxyManager {
    registry: ProxyRegistry,
    /// Arguments appended after `internal-proxy` when spawning a daemon
    spawn_args: Vec<String>,
}

impl ProxyManager {
    pub fn new(data_root: impl Into<PathBuf>, spawn_args: Vec<String>) -> Self {
        Self {
            registry: ProxyRegistry::new(data_root),
            spawn_args,
        }
    }

    pub fn registry(&self) -> &ProxyRegistry {
        &self.registry
    }

    /// All records in the registry
    pub fn list(&self) -> KubecacheResult<Vec<ProxyRecord>> {
        self.registry.list_records()
    }

    /// One record by name (fingerprint)
    pub fn get(&self, name: &str) -> KubecacheResult<ProxyRecord> {
        self.registry.read_record(name)
    }

    /// The record for a client configuration
    pub fn get_for_config(&self, config: &ClientConfig) -> KubecacheResult<ProxyRecord> {
        self.get(&fingerprint(config))
    }

    /// Spawn a daemon for the configuration and wait until it is Ready.
    ///
    /// The child is fully detached; cancelling this future leaves it
    /// running (it self-terminates through its idle timeout, or loses the
    /// claim race and exits on its own).
    pub async fn new_for_config(&self, config: &ClientConfig) -> KubecacheResult<ProxyRecord> {
        let exe = std::env::current_exe().map_err(KubecacheError::SpawnFailed)?;

        let mut command = Command::new(&exe);
        command
            .arg("internal-proxy")
            .args(&self.spawn_args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        let child = command.spawn().map_err(KubecacheError::SpawnFailed)?;
        debug!(
            "spawned proxy daemon (pid {:?}): {} internal-proxy {:?}",
            child.id(),
            exe.display(),
            self.spawn_args
        );

        loop {
            tokio::time::sleep(POLL_INTERVAL).await;

            match self.get_for_config(config) {
                Ok(record) if record.is_ready() => {
                    info!(
                        "proxy {} ready on port {}",
                        record.fingerprint, record.port
                    );
                    return Ok(record);
                }
                Ok(record) => {
                    debug!(
                        "waiting for proxy ready ... (state: {}, reason: {}, message: {})",
                        record.state, record.reason, record.message
                    );
                }
                Err(e) => {
                    debug!("waiting for proxy ready ... ({})", e);
                }
            }
        }
    }

    /// Stop a daemon.
    ///
    /// `force` sends SIGKILL and removes the directory (the dead daemon
    /// cannot clean up after itself); otherwise SIGTERM triggers the
    /// daemon's own graceful shutdown and release. With `wait`, polls until
    /// the record disappears or reports Dead.
    pub async fn kill(
        &self,
        record: &ProxyRecord,
        wait: bool,
        force: bool,
    ) -> KubecacheResult<()> {
        if record.pid == 0 {
            return Err(KubecacheError::SignalFailed {
                pid: 0,
                reason: "no proxy process pid".to_string(),
            });
        }
        let pid = Pid::from_raw(record.pid);

        if force {
            kill(pid, Signal::SIGKILL).map_err(|e| KubecacheError::SignalFailed {
                pid: record.pid,
                reason: e.to_string(),
            })?;
            // the daemon cannot release its own directory anymore
            let dir = self.registry.proxy_dir(&record.fingerprint);
            if dir == record.data_root {
                match std::fs::remove_dir_all(&dir) {
                    Ok(()) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => {
                        return Err(KubecacheError::io(
                            format!("removing proxy dir {}", dir.display()),
                            e,
                        ))
                    }
                }
            }
            return Ok(());
        }

        kill(pid, Signal::SIGTERM).map_err(|e| KubecacheError::SignalFailed {
            pid: record.pid,
            reason: e.to_string(),
        })?;

        if !wait {
            return Ok(());
        }

        loop {
            tokio::time::sleep(POLL_INTERVAL).await;

            match self.get(&record.fingerprint) {
                Err(e) if e.is_not_found() => return Ok(()),
                Err(e) => return Err(e),
                Ok(current) if current.state == ProxyState::Dead => return Ok(()),
                Ok(current) => {
                    debug!(
                        "waiting for proxy {} to exit ... (state: {})",
                        current.fingerprint, current.state
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn get_missing_proxy_is_not_found() {
        let dir = TempDir::new().unwrap();
        let mgr = ProxyManager::new(dir.path(), Vec::new());
        assert!(mgr.get("deadbeef").unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn get_for_config_uses_fingerprint() {
        let dir = TempDir::new().unwrap();
        let mgr = ProxyManager::new(dir.path(), Vec::new());

        let config = ClientConfig {
            host: "https://1.2.3.4".to_string(),
            ..Default::default()
        };
        let fp = fingerprint(&config);

        let handle = mgr.registry().claim(&fp).unwrap();
        mgr.registry().publish_port(&handle, 9999).unwrap();

        let record = mgr.get_for_config(&config).unwrap();
        assert_eq!(record.fingerprint, fp);
        assert_eq!(record.port, 9999);

        mgr.registry().release(handle).unwrap();
    }

    #[tokio::test]
    async fn kill_refuses_zero_pid() {
        let dir = TempDir::new().unwrap();
        let mgr = ProxyManager::new(dir.path(), Vec::new());
        let record = ProxyRecord {
            fingerprint: "ab12cd34".to_string(),
            pid: 0,
            port: 0,
            data_root: dir.path().join("kubectl_cache_proxies/ab12cd34"),
            created: chrono::Utc::now(),
            state: ProxyState::Dead,
            reason: String::new(),
            message: String::new(),
        };
        assert!(mgr.kill(&record, false, false).await.is_err());
    }

    #[tokio::test]
    async fn wait_for_dead_record_returns() {
        let dir = TempDir::new().unwrap();
        let mgr = ProxyManager::new(dir.path(), Vec::new());

        // a record whose pid can never be alive: kill() on it still fails,
        // so go through the registry files directly
        let proxy_dir = mgr.registry().proxy_dir("ab12cd34");
        std::fs::create_dir_all(&proxy_dir).unwrap();
        std::fs::write(proxy_dir.join("proxy.pid"), format!("{}\n", i32::MAX)).unwrap();

        let record = mgr.get("ab12cd34").unwrap();
        assert_eq!(record.state, ProxyState::Dead);
    }
}

//! File-lock backed proxy registry
//!
//! Each fingerprint owns one directory under
//! `<data_root>/kubectl_cache_proxies/`. While a daemon runs it holds an
//! exclusive advisory lock on `proxy.pid` inside that directory; the lock
//! plus the directory are the entire coordination protocol between
//! cooperating client invocations on one host. `proxy_port` appears only
//! after the daemon's listener is bound, so its presence doubles as the
//! readiness signal.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use fs2::FileExt;
use nix::sys::signal::kill;
use nix::unistd::Pid;
use tracing::{debug, warn};

use crate::error::{KubecacheError, KubecacheResult};
use crate::proxymgr::record::{ProxyRecord, ProxyState};

const ROOT_SUBPATH: &str = "kubectl_cache_proxies";
const PID_FILE: &str = "proxy.pid";
const PORT_FILE: &str = "proxy_port";

/// The on-disk registry of proxy daemons for one data root
#[derive(Debug, Clone)]
pub struct ProxyRegistry {
    data_root: PathBuf,
}

/// Ownership of a claimed fingerprint directory.
///
/// Holds the locked pid-file descriptor; the advisory lock lives exactly as
/// long as this handle, so it must outlive the daemon's serving loop.
#[derive(Debug)]
pub struct ClaimHandle {
    fingerprint: String,
    dir: PathBuf,
    pid_file: File,
    released: bool,
}

impl ProxyRegistry {
    pub fn new(data_root: impl Into<PathBuf>) -> Self {
        Self {
            data_root: data_root.into(),
        }
    }

    /// The parent directory holding every fingerprint directory
    pub fn proxies_dir(&self) -> PathBuf {
        self.data_root.join(ROOT_SUBPATH)
    }

    /// The directory for one fingerprint
    pub fn proxy_dir(&self, fingerprint: &str) -> PathBuf {
        self.proxies_dir().join(fingerprint)
    }

    /// Claim the fingerprint directory for the current process.
    ///
    /// Creates the directory (0700), opens `proxy.pid` with
    /// create+truncate+rw (0600), takes a non-blocking exclusive advisory
    /// lock, and writes the current PID followed by a newline. Fails with
    /// `AlreadyClaimed` when a peer holds the lock.
    pub fn claim(&self, fingerprint: &str) -> KubecacheResult<ClaimHandle> {
        let dir = self.proxy_dir(fingerprint);
        std::fs::create_dir_all(&dir)
            .map_err(|e| KubecacheError::io(format!("creating proxy dir {}", dir.display()), e))?;
        restrict_permissions(&dir, 0o700)?;

        let pid_path = dir.join(PID_FILE);
        let pid_file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(true)
            .open(&pid_path)
            .map_err(|e| KubecacheError::io(format!("opening pid file {}", pid_path.display()), e))?;
        restrict_permissions(&pid_path, 0o600)?;

        if let Err(e) = pid_file.try_lock_exclusive() {
            if e.kind() == std::io::ErrorKind::WouldBlock {
                return Err(KubecacheError::AlreadyClaimed {
                    fingerprint: fingerprint.to_string(),
                });
            }
            return Err(KubecacheError::io(
                format!("locking pid file {}", pid_path.display()),
                e,
            ));
        }

        let mut handle = ClaimHandle {
            fingerprint: fingerprint.to_string(),
            dir,
            pid_file,
            released: false,
        };
        let pid = std::process::id();
        handle
            .pid_file
            .write_all(format!("{pid}\n").as_bytes())
            .map_err(|e| KubecacheError::io(format!("writing pid file {}", pid_path.display()), e))?;
        handle
            .pid_file
            .flush()
            .map_err(|e| KubecacheError::io(format!("flushing pid file {}", pid_path.display()), e))?;

        debug!("claimed proxy directory {} (pid {})", handle.dir.display(), pid);
        Ok(handle)
    }

    /// Publish the daemon's listening port. Lock-holder only.
    pub fn publish_port(&self, handle: &ClaimHandle, port: u16) -> KubecacheResult<()> {
        let port_path = handle.dir.join(PORT_FILE);
        let mut port_file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&port_path)
            .map_err(|e| {
                KubecacheError::io(format!("opening port file {}", port_path.display()), e)
            })?;
        restrict_permissions(&port_path, 0o600)?;
        port_file
            .write_all(port.to_string().as_bytes())
            .map_err(|e| {
                KubecacheError::io(format!("writing port file {}", port_path.display()), e)
            })?;
        debug!("published proxy port {} in {}", port, port_path.display());
        Ok(())
    }

    /// Release the claim: unlock, close, and remove the whole fingerprint
    /// directory. Idempotent against missing files.
    pub fn release(&self, mut handle: ClaimHandle) -> KubecacheResult<()> {
        handle.released = true;
        if let Err(e) = fs2::FileExt::unlock(&handle.pid_file) {
            warn!("unlocking pid file for {}: {}", handle.fingerprint, e);
        }
        match std::fs::remove_dir_all(&handle.dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(KubecacheError::io(
                format!("removing proxy dir {}", handle.dir.display()),
                e,
            )),
        }
    }

    /// Read one record. Never takes the lock.
    pub fn read_record(&self, fingerprint: &str) -> KubecacheResult<ProxyRecord> {
        let dir = self.proxy_dir(fingerprint);
        let (pid, created) = self.read_pid(&dir, fingerprint)?;

        let mut record = ProxyRecord {
            fingerprint: fingerprint.to_string(),
            pid,
            port: 0,
            data_root: dir.clone(),
            created,
            state: ProxyState::Ready,
            reason: String::new(),
            message: String::new(),
        };

        // best-effort liveness: a null signal probes the process table; PID
        // reuse is an accepted race
        if kill(Pid::from_raw(pid), None).is_err() {
            record.state = ProxyState::Dead;
            record.reason = "GetProcessError".to_string();
            record.message = format!("no running process with pid {pid}");
            return Ok(record);
        }

        match self.read_port(&dir) {
            Ok(port) => {
                record.port = port;
                record.state = ProxyState::Ready;
            }
            Err(e) => {
                record.state = ProxyState::Pending;
                record.reason = "GetProxyPortError".to_string();
                record.message = format!("get proxy port error: {e}");
            }
        }

        Ok(record)
    }

    /// Enumerate every fingerprint directory, skipping entries that fail to
    /// read
    pub fn list_records(&self) -> KubecacheResult<Vec<ProxyRecord>> {
        let proxies_dir = self.proxies_dir();
        let entries = match std::fs::read_dir(&proxies_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(KubecacheError::io(
                    format!("listing proxy directories in {}", proxies_dir.display()),
                    e,
                ))
            }
        };

        let mut records = Vec::new();
        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("reading proxy directory entry: {}", e);
                    continue;
                }
            };
            if !entry.path().is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            match self.read_record(&name) {
                Ok(record) => records.push(record),
                Err(e) => warn!("get proxy {:?} error: {}", name, e),
            }
        }
        records.sort_by(|a, b| a.fingerprint.cmp(&b.fingerprint));
        Ok(records)
    }

    fn read_pid(&self, dir: &Path, fingerprint: &str) -> KubecacheResult<(i32, DateTime<Utc>)> {
        let pid_path = dir.join(PID_FILE);
        let metadata = match std::fs::metadata(&pid_path) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(KubecacheError::ProxyNotFound(fingerprint.to_string()))
            }
            Err(e) => {
                return Err(KubecacheError::io(
                    format!("reading pid file metadata {}", pid_path.display()),
                    e,
                ))
            }
        };
        let created = metadata
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());

        let raw = std::fs::read_to_string(&pid_path)
            .map_err(|e| KubecacheError::io(format!("reading pid file {}", pid_path.display()), e))?;
        let pid = raw
            .trim_end_matches('\n')
            .parse::<i32>()
            .map_err(|e| KubecacheError::InvalidPidFile {
                path: pid_path,
                reason: e.to_string(),
            })?;
        Ok((pid, created))
    }

    fn read_port(&self, dir: &Path) -> KubecacheResult<u16> {
        let port_path = dir.join(PORT_FILE);
        let raw = match std::fs::read_to_string(&port_path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(KubecacheError::InvalidPortFile {
                    path: port_path,
                    reason: "proxy not ready".to_string(),
                })
            }
            Err(e) => {
                return Err(KubecacheError::io(
                    format!("reading port file {}", port_path.display()),
                    e,
                ))
            }
        };
        raw.trim().parse::<u16>().map_err(|e| {
            KubecacheError::InvalidPortFile {
                path: port_path,
                reason: e.to_string(),
            }
        })
    }
}

impl ClaimHandle {
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl Drop for ClaimHandle {
    fn drop(&mut self) {
        if !self.released {
            // released through Drop only on abnormal paths; the directory is
            // left behind so readers can still see the Dead record
            let _ = fs2::FileExt::unlock(&self.pid_file);
        }
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path, mode: u32) -> KubecacheResult<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
        .map_err(|e| KubecacheError::io(format!("setting permissions on {}", path.display()), e))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path, _mode: u32) -> KubecacheResult<()> {
    Ok(())
}

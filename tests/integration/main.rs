//! Integration tests for kubectl-cache

mod cli_tests {
    use assert_cmd::Command;
    use predicates::prelude::*;
    use tempfile::TempDir;

    fn kubectl_cache() -> Command {
        Command::cargo_bin("kubectl-cache").unwrap()
    }

    #[test]
    fn help_displays() {
        kubectl_cache()
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("local cache"));
    }

    #[test]
    fn version_displays() {
        kubectl_cache()
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("kubectl-cache"));
    }

    #[test]
    fn internal_proxy_is_hidden_from_help() {
        kubectl_cache()
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("internal-proxy").not());
    }

    #[test]
    fn proxies_empty() {
        let dir = TempDir::new().unwrap();
        kubectl_cache()
            .args(["proxies", "--data-root"])
            .arg(dir.path())
            .assert()
            .success()
            .stdout(
                predicate::str::contains("No cache proxies running")
                    .or(predicate::str::is_empty()),
            );
    }

    #[test]
    fn proxies_empty_json() {
        let dir = TempDir::new().unwrap();
        kubectl_cache()
            .args(["proxies", "-o", "json", "--data-root"])
            .arg(dir.path())
            .assert()
            .success()
            .stdout(predicate::str::contains("[]"));
    }

    #[test]
    fn shutdown_requires_names_or_all() {
        let dir = TempDir::new().unwrap();
        kubectl_cache()
            .args(["shutdown", "--data-root"])
            .arg(dir.path())
            .assert()
            .failure()
            .stderr(predicate::str::contains("no proxy names specified"));
    }

    #[test]
    fn shutdown_all_with_nothing_running() {
        let dir = TempDir::new().unwrap();
        kubectl_cache()
            .args(["shutdown", "--all", "--data-root"])
            .arg(dir.path())
            .assert()
            .success()
            .stdout(predicate::str::contains("No cache proxies to shut down"));
    }

    #[test]
    fn internal_proxy_requires_a_server() {
        let dir = TempDir::new().unwrap();
        kubectl_cache()
            .args(["internal-proxy", "--max-idle-time", "1s", "--data-root"])
            .arg(dir.path())
            .assert()
            .failure()
            .stderr(predicate::str::contains("--server"));
        // the claim is released on the failure path
        assert!(!dir.path().join("kubectl_cache_proxies").exists()
            || std::fs::read_dir(dir.path().join("kubectl_cache_proxies"))
                .unwrap()
                .next()
                .is_none());
    }
}

mod daemon_tests {
    use assert_cmd::cargo::cargo_bin;
    use std::path::Path;
    use std::process::{Command, Stdio};
    use std::time::{Duration, Instant};
    use tempfile::TempDir;

    fn spawn_daemon(data_root: &Path, server: &str, idle: &str) -> std::process::Child {
        Command::new(cargo_bin("kubectl-cache"))
            .args([
                "internal-proxy",
                "--max-idle-time",
                idle,
                "--server",
                server,
                "--data-root",
            ])
            .arg(data_root)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .expect("spawn internal-proxy")
    }

    fn wait_exit(child: &mut std::process::Child, timeout: Duration) -> Option<i32> {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if let Ok(Some(status)) = child.try_wait() {
                return status.code();
            }
            std::thread::sleep(Duration::from_millis(50));
        }
        let _ = child.kill();
        None
    }

    fn proxies_dir(data_root: &Path) -> std::path::PathBuf {
        data_root.join("kubectl_cache_proxies")
    }

    fn fingerprint_dirs(data_root: &Path) -> usize {
        match std::fs::read_dir(proxies_dir(data_root)) {
            Ok(entries) => entries.filter_map(Result::ok).count(),
            Err(_) => 0,
        }
    }

    #[test]
    fn idle_shutdown_exits_zero_and_cleans_up() {
        let dir = TempDir::new().unwrap();
        // the upstream does not need to be reachable: informers start
        // lazily, and no request ever arrives
        let mut child = spawn_daemon(dir.path(), "http://127.0.0.1:9", "1s");

        let code = wait_exit(&mut child, Duration::from_secs(15));
        assert_eq!(code, Some(0), "daemon should exit zero on idle timeout");
        assert_eq!(
            fingerprint_dirs(dir.path()),
            0,
            "fingerprint directory should be removed on clean shutdown"
        );
    }

    #[test]
    fn daemon_publishes_its_port() {
        let dir = TempDir::new().unwrap();
        let mut child = spawn_daemon(dir.path(), "http://127.0.0.1:9", "30s");

        // wait for the port file to appear
        let deadline = Instant::now() + Duration::from_secs(10);
        let mut port = None;
        while Instant::now() < deadline && port.is_none() {
            if let Ok(entries) = std::fs::read_dir(proxies_dir(dir.path())) {
                for entry in entries.filter_map(Result::ok) {
                    let port_file = entry.path().join("proxy_port");
                    if let Ok(raw) = std::fs::read_to_string(&port_file) {
                        port = raw.trim().parse::<u16>().ok();
                    }
                }
            }
            std::thread::sleep(Duration::from_millis(50));
        }
        let port = port.expect("daemon never published a port");
        assert!(port > 0);

        let _ = child.kill();
        let _ = child.wait();
    }

    #[test]
    fn second_daemon_loses_the_claim_race() {
        let dir = TempDir::new().unwrap();
        let mut first = spawn_daemon(dir.path(), "http://127.0.0.1:9", "10s");
        // let the first daemon take the lock
        std::thread::sleep(Duration::from_millis(500));
        let mut second = spawn_daemon(dir.path(), "http://127.0.0.1:9", "10s");

        let second_code = wait_exit(&mut second, Duration::from_secs(10));
        assert_ne!(
            second_code,
            Some(0),
            "the losing daemon must exit non-zero"
        );
        assert_eq!(fingerprint_dirs(dir.path()), 1);

        let _ = first.kill();
        let _ = first.wait();
    }

    #[cfg(unix)]
    #[test]
    fn sigterm_triggers_graceful_shutdown() {
        let dir = TempDir::new().unwrap();
        let mut child = spawn_daemon(dir.path(), "http://127.0.0.1:9", "60s");
        std::thread::sleep(Duration::from_millis(800));

        let status = Command::new("kill")
            .args(["-TERM", &child.id().to_string()])
            .status()
            .expect("send SIGTERM");
        assert!(status.success());

        let code = wait_exit(&mut child, Duration::from_secs(10));
        assert_eq!(code, Some(0), "daemon should exit zero on SIGTERM");
        assert_eq!(fingerprint_dirs(dir.path()), 0);
    }
}

//! Common test utilities for CLI integration tests
#![allow(dead_code)]

use std::net::TcpListener;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};
use tempfile::TempDir;

/// A scratch fleet: a state directory, a runtime driven by marker files and
/// two ports, one accepting connections and one refusing them
pub struct FleetFixture {
    pub dir: TempDir,
    _listener: TcpListener,
    pub open_port: u16,
    pub closed_port: u16,
}

impl FleetFixture {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let open_port = listener.local_addr().unwrap().port();
        let closed_port = find_closed_port();

        Self {
            dir,
            _listener: listener,
            open_port,
            closed_port,
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Marker file present while `unit` is "running"
    pub fn marker(&self, unit: &str) -> PathBuf {
        self.path().join(format!("{}.running", unit))
    }

    /// Write a configuration with the given `units:` body
    ///
    /// `{open}` and `{closed}` in `units` are replaced by the two ports.
    pub fn write_config(&self, units: &str) -> PathBuf {
        self.write_config_polling_every(units, 1)
    }

    /// Like [`FleetFixture::write_config`] with a custom recovery interval
    pub fn write_config_polling_every(&self, units: &str, recovery_interval: u64) -> PathBuf {
        let dir = self.path().display().to_string();
        let units = units
            .replace("{open}", &self.open_port.to_string())
            .replace("{closed}", &self.closed_port.to_string());

        let content = format!(
            r#"version: "1.0"
name: cli-test
settings:
  probe_interval: 1
  recovery_interval: {recovery_interval}
  stop_timeout: 1
  state_dir: "{dir}/state"
runtime:
  start: "touch {dir}/{{unit}}.running"
  stop: "rm -f {dir}/{{unit}}.running"
  restart: "touch {dir}/{{unit}}.running"
  status: "test -f {dir}/{{unit}}.running"
units:
{units}"#
        );

        let path = self.path().join("fleet.yaml");
        std::fs::write(&path, content).unwrap();
        path
    }

    /// Control socket of a monitor running against this fixture's state
    pub fn socket(&self) -> PathBuf {
        self.path().join("state.sock")
    }

    /// Start the fleet binary with `args` in the background
    pub fn spawn(&self, config: &Path, args: &[&str]) -> Child {
        Command::new(env!("CARGO_BIN_EXE_fleet"))
            .arg("--config")
            .arg(config)
            .args(["--log-level", "warn"])
            .args(args)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .unwrap()
    }

    /// Start `fleet monitor` and wait until its control socket is up
    pub fn spawn_monitor(&self, config: &Path) -> Child {
        let child = self.spawn(config, &["monitor"]);
        let socket = self.socket();
        assert!(
            wait_for(Duration::from_secs(10), || socket.exists()),
            "monitor never opened {}",
            socket.display()
        );
        child
    }

    /// Run the fleet binary with `args` against `config`
    pub fn run(&self, config: &Path, args: &[&str]) -> CliOutput {
        let output = Command::new(env!("CARGO_BIN_EXE_fleet"))
            .arg("--config")
            .arg(config)
            .args(["--log-level", "warn"])
            .args(args)
            .output()
            .unwrap();

        CliOutput {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            exit_code: output.status.code(),
        }
    }
}

#[derive(Debug)]
pub struct CliOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
}

impl CliOutput {
    pub fn assert_contains(&self, text: &str) -> &Self {
        if !self.stdout.contains(text) && !self.stderr.contains(text) {
            panic!(
                "Output does not contain '{}'\nSTDOUT:\n{}\nSTDERR:\n{}",
                text, self.stdout, self.stderr
            );
        }
        self
    }

    pub fn assert_exit_code(&self, expected: i32) -> &Self {
        match self.exit_code {
            Some(code) if code == expected => self,
            Some(code) => panic!(
                "Expected exit code {} but got {}\nSTDOUT:\n{}\nSTDERR:\n{}",
                expected, code, self.stdout, self.stderr
            ),
            None => panic!(
                "Expected exit code {} but process was terminated\nSTDOUT:\n{}\nSTDERR:\n{}",
                expected, self.stdout, self.stderr
            ),
        }
    }

    pub fn json(&self) -> serde_json::Value {
        serde_json::from_str(&self.stdout).unwrap_or_else(|e| {
            panic!("stdout is not JSON ({}):\n{}", e, self.stdout)
        })
    }
}

/// Send SIGTERM to `child` and wait for it to exit
pub fn terminate(child: &mut Child) -> Option<i32> {
    let status = Command::new("kill")
        .args(["-TERM", &child.id().to_string()])
        .status()
        .unwrap();
    assert!(status.success());

    let mut exit = None;
    let exited = wait_for(Duration::from_secs(15), || {
        exit = child.try_wait().unwrap();
        exit.is_some()
    });
    if !exited {
        child.kill().unwrap();
        panic!("process ignored SIGTERM");
    }
    exit.and_then(|status| status.code())
}

/// Poll `condition` every 50ms until it holds or `timeout` elapses
pub fn wait_for(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(50));
    }
    condition()
}

/// A port nothing listens on
fn find_closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    port
}

/// Status of `unit` in `fleet status --format json` output
pub fn unit_status(snapshot: &serde_json::Value, unit: &str) -> String {
    snapshot["units"]
        .as_array()
        .unwrap()
        .iter()
        .find(|entry| entry["id"] == unit)
        .unwrap_or_else(|| panic!("{} missing from snapshot", unit))["status"]
        .as_str()
        .unwrap()
        .to_string()
}

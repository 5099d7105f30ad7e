#![cfg(all(unix, feature = "cli"))]

use std::io::{BufRead, BufReader};
use std::net::TcpListener;
use std::process::{Child, Command, Stdio};
use std::time::Duration;

fn hostbus() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_hostbus"));
    cmd.arg("--log-level").arg("error");
    cmd
}

/// A running `hostbus serve` and the port it reported.
struct Server {
    child: Child,
    port: u16,
}

impl Server {
    fn start(extra: &[&str]) -> Self {
        let mut child = hostbus()
            .args(["--format", "json", "serve", "--port", "0", "--duration", "20s"])
            .args(extra)
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .expect("serve should start");

        let stdout = child.stdout.take().expect("stdout should be piped");
        let mut line = String::new();
        BufReader::new(stdout)
            .read_line(&mut line)
            .expect("listening line should be readable");
        let record: serde_json::Value =
            serde_json::from_str(&line).expect("listening line should be JSON");
        assert_eq!(record["event"], "listening");
        let port = record["port"]
            .as_u64()
            .and_then(|p| u16::try_from(p).ok())
            .expect("port should be a u16");
        Self { child, port }
    }

    fn addr(&self) -> String {
        format!("127.0.0.1:{}", self.port)
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

#[test]
fn version_prints_package_version() {
    let output = hostbus().arg("version").output().expect("version should run");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.starts_with(&format!("hostbus {}", env!("CARGO_PKG_VERSION"))));
}

#[test]
fn probe_port_skips_bound_port() {
    let held = TcpListener::bind("127.0.0.1:0").expect("bind should work");
    let first = held.local_addr().expect("addr should resolve").port();

    let output = hostbus()
        .args(["--format", "json", "probe-port", "--first"])
        .arg(first.to_string())
        .output()
        .expect("probe-port should run");

    assert!(output.status.success());
    let record: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("output should be JSON");
    let port = record["port"].as_u64().expect("port should be a number");
    assert!(port > u64::from(first), "bound port {first} must be skipped, got {port}");
}

#[test]
fn send_waits_for_named_reply() {
    let server = Server::start(&[]);

    let output = hostbus()
        .args(["--format", "json", "send"])
        .arg(server.addr())
        .args(["getSampleRate", "--wait", "getSampleRate", "--wait-timeout", "5s"])
        .output()
        .expect("send should run");

    assert!(output.status.success(), "send failed: {output:?}");
    let record: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("output should be JSON");
    assert_eq!(record["function"], "getSampleRate");
    assert_eq!(record["args"][0], 48000.0);
}

#[test]
fn binary_send_gets_reply() {
    let server = Server::start(&["--protocol", "binary"]);

    let output = hostbus()
        .args(["--format", "json", "send", "--binary"])
        .arg(server.addr())
        .args(["getWidth", "--wait", "getWidth"])
        .output()
        .expect("send should run");

    assert!(output.status.success(), "send failed: {output:?}");
    let record: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("output should be JSON");
    assert_eq!(record["args"][0], 640.0);
}

#[test]
fn monitor_receives_state_replay() {
    let server = Server::start(&["--parameters", "3"]);

    let output = hostbus()
        .args(["--format", "json", "monitor"])
        .arg(server.addr())
        .args(["--functions", "parameterChanged", "--count", "3"])
        .output()
        .expect("monitor should run");

    assert!(output.status.success(), "monitor failed: {output:?}");
    let stdout = String::from_utf8_lossy(&output.stdout);
    let lines: Vec<_> = stdout.lines().collect();
    assert_eq!(lines.len(), 3);
    for (index, line) in lines.iter().enumerate() {
        let record: serde_json::Value = serde_json::from_str(line).expect("line should be JSON");
        assert_eq!(record["function"], "parameterChanged");
        assert_eq!(record["args"][0], index as f64);
    }
}

#[test]
fn parameter_change_reaches_monitor() {
    let server = Server::start(&["--parameters", "1"]);

    let monitor = hostbus()
        .args(["--format", "json", "monitor"])
        .arg(server.addr())
        .args(["--functions", "parameterChanged", "--count", "2"])
        .stdout(Stdio::piped())
        .spawn()
        .expect("monitor should start");
    std::thread::sleep(Duration::from_millis(300));

    let status = hostbus()
        .arg("send")
        .arg(server.addr())
        .args(["setParameterValue", "0", "0.75"])
        .status()
        .expect("send should run");
    assert!(status.success());

    let output = monitor.wait_with_output().expect("monitor should exit");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    let last = stdout.lines().last().expect("monitor should print");
    let record: serde_json::Value = serde_json::from_str(last).expect("line should be JSON");
    assert_eq!(record["args"][1], 0.75);
}

#[test]
fn send_to_closed_port_fails() {
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind should work");
        listener.local_addr().expect("addr should resolve").port()
    };

    let output = hostbus()
        .arg("send")
        .arg(format!("127.0.0.1:{port}"))
        .arg("ping")
        .output()
        .expect("send should run");

    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("connect failed"));
}

#[test]
fn spawn_reports_helper_that_exits_early() {
    let output = hostbus()
        .args(["spawn", "true", "--handshake-timeout", "2s"])
        .output()
        .expect("spawn should run");

    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("renderer start failed"));
}

#[test]
fn spawn_missing_helper_fails() {
    let output = hostbus()
        .args(["spawn", "/nonexistent/hostbus-renderer"])
        .output()
        .expect("spawn should run");

    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("renderer start failed"));
}

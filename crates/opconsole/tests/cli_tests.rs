#![allow(clippy::unwrap_used, clippy::expect_used)]

//! Binary smoke tests against a canned REST backend.

mod common;

use common::*;
use predicates::prelude::*;
use serde_json::json;
use serde_json::Value;

fn devices_body() -> Value {
    json!([
        {
            "id": 7,
            "hostname": "core-sw-7",
            "ip_address": "192.0.2.7",
            "ssh_port": 2222,
            "os_type": "linux",
            "device_group_name": "core",
            "created_at": "2024-05-01T08:30:00Z"
        },
        {
            "id": 12,
            "hostname": "edge-12",
            "ip_address": "192.0.2.12",
            "os_type": ""
        }
    ])
}

#[test]
fn test_help_lists_commands() {
    opconsole_cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("devices"))
        .stdout(predicate::str::contains("connect"))
        .stdout(predicate::str::contains("exec"))
        .stdout(predicate::str::contains("OPCONSOLE_SOCKET_URL"));
}

#[test]
fn test_version() {
    opconsole_cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn test_no_arguments_prints_usage() {
    opconsole_cmd()
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("Usage"));
}

#[test]
fn test_completions_need_no_backend() {
    opconsole_cmd()
        .env("OPCONSOLE_API_URL", format!("http://127.0.0.1:{}/api/v1", closed_port()))
        .args(["completions", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::contains("opconsole"));
}

#[test]
fn test_bad_device_id_is_a_usage_error() {
    opconsole_cmd()
        .args(["connect", "router-1", "-u", "admin"])
        .assert()
        .failure()
        .code(2);
}

#[test]
fn test_devices_table() {
    let backend = CannedBackend::start(vec![("GET", "operator/devices", 200, devices_body())]);
    opconsole_cmd()
        .env("OPCONSOLE_API_URL", backend.base_url())
        .arg("devices")
        .assert()
        .success()
        .stdout(predicate::str::contains("HOSTNAME"))
        .stdout(predicate::str::contains("core-sw-7"))
        .stdout(predicate::str::contains("edge-12"));
}

#[test]
fn test_devices_json() {
    let backend = CannedBackend::start(vec![("GET", "operator/devices", 200, devices_body())]);
    let output = opconsole_cmd()
        .args(["--api-url", &backend.base_url(), "devices", "--json"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let value: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(value["devices"][0]["hostname"], "core-sw-7");
    assert_eq!(value["devices"][1]["id"], 12);
}

#[test]
fn test_exec_prints_output() {
    let backend = CannedBackend::start(vec![(
        "POST",
        "operator/execute",
        200,
        json!({ "success": true, "output": " 10:02:11 up 3 days" }),
    )]);
    opconsole_cmd()
        .env("OPCONSOLE_API_URL", backend.base_url())
        .args(["exec", "7", "uptime"])
        .assert()
        .success()
        .stdout(" 10:02:11 up 3 days\n");
}

#[test]
fn test_exec_failure_exits_with_io_error() {
    let backend = CannedBackend::start(vec![(
        "POST",
        "operator/execute",
        200,
        json!({ "success": false, "message": "Command not permitted" }),
    )]);
    opconsole_cmd()
        .env("OPCONSOLE_API_URL", backend.base_url())
        .args(["exec", "7", "reboot"])
        .assert()
        .failure()
        .code(74)
        .stderr(predicate::str::contains("Command not permitted"));
}

#[test]
fn test_exec_failure_json_payload() {
    let backend = CannedBackend::start(vec![(
        "POST",
        "operator/execute",
        200,
        json!({ "success": false, "message": "Command not permitted" }),
    )]);
    let output = opconsole_cmd()
        .env("OPCONSOLE_API_URL", backend.base_url())
        .args(["--format", "json", "exec", "7", "reboot"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(74));
    let value: Value = serde_json::from_slice(&output.stderr).unwrap();
    assert_eq!(value["code"], 203);
    assert_eq!(value["category"], "external");
}

#[test]
fn test_unreachable_backend() {
    opconsole_cmd()
        .env("OPCONSOLE_API_URL", format!("http://127.0.0.1:{}/api/v1", closed_port()))
        .arg("devices")
        .assert()
        .failure()
        .code(74)
        .stderr(predicate::str::contains("Network error"));
}

#[test]
fn test_connect_to_unassigned_device() {
    let backend = CannedBackend::start(vec![("GET", "operator/devices", 200, devices_body())]);
    opconsole_cmd()
        .env("OPCONSOLE_API_URL", backend.base_url())
        .env("OPCONSOLE_TEST_PASSWORD", "pw")
        .args([
            "connect",
            "99",
            "-u",
            "admin",
            "--password-env",
            "OPCONSOLE_TEST_PASSWORD",
        ])
        .assert()
        .failure()
        .code(69)
        .stderr(predicate::str::contains("Device 99 is not assigned"));
}

#[test]
fn test_connect_rejected_credentials() {
    let backend = CannedBackend::start(vec![
        ("GET", "operator/devices", 200, devices_body()),
        (
            "POST",
            "operator/connect-device",
            401,
            json!({ "detail": "Permission denied (publickey,password)" }),
        ),
    ]);
    opconsole_cmd()
        .env("OPCONSOLE_API_URL", backend.base_url())
        .env("OPCONSOLE_TEST_PASSWORD", "wrong")
        .args([
            "connect",
            "7",
            "-u",
            "admin",
            "--password-env",
            "OPCONSOLE_TEST_PASSWORD",
        ])
        .assert()
        .failure()
        .code(77)
        .stderr(predicate::str::contains("Permission denied"));
}

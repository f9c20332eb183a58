//! Integration tests for the `vitalog serve` HTTP API.
//!
//! Each test starts the server as a child process on a unique port with its
//! own temporary database, makes HTTP requests, and verifies the responses.
//! No provider key is passed, so analysis runs against the mock provider.

use std::io::Read;
use std::net::TcpStream;
use std::process::{Child, Command};
use std::sync::atomic::{AtomicU16, Ordering};
use std::time::Duration;

use tempfile::TempDir;

/// Atomic port counter to avoid port conflicts between parallel tests.
/// Base port is derived from process ID so separate test binaries running
/// at the same time don't collide on the same port range.
static NEXT_PORT: AtomicU16 = AtomicU16::new(0);
static PORT_INIT: std::sync::Once = std::sync::Once::new();

fn next_port() -> u16 {
    PORT_INIT.call_once(|| {
        let base = 20000 + (std::process::id() as u16 % 20000);
        NEXT_PORT.store(base, Ordering::SeqCst);
    });
    NEXT_PORT.fetch_add(1, Ordering::SeqCst)
}

/// A running server plus the directory holding its database.
struct Server {
    child: Child,
    port: u16,
    _dir: TempDir,
}

impl Drop for Server {
    fn drop(&mut self) {
        self.child.kill().ok();
        self.child.wait().ok();
    }
}

fn start_server(api_key: Option<&str>) -> Server {
    let port = next_port();
    let dir = TempDir::new().expect("tempdir");

    let mut cmd = Command::new(env!("CARGO_BIN_EXE_vitalog"));
    cmd.arg("serve").arg("--port").arg(port.to_string());
    cmd.env("VITALOG_DB", dir.path().join("serve.db"));
    cmd.env_remove("ANTHROPIC_API_KEY");
    match api_key {
        Some(key) => cmd.env("VITALOG_API_KEY", key),
        None => cmd.env_remove("VITALOG_API_KEY"),
    };
    // Redirect stdout/stderr to avoid blocking
    cmd.stdout(std::process::Stdio::piped());
    cmd.stderr(std::process::Stdio::piped());

    let child = cmd.spawn().expect("failed to start vitalog serve");
    // Wait for server to be ready by polling the port
    for _ in 0..50 {
        if TcpStream::connect(format!("127.0.0.1:{}", port)).is_ok() {
            break;
        }
        std::thread::sleep(Duration::from_millis(100));
    }
    Server {
        child,
        port,
        _dir: dir,
    }
}

/// Make an HTTP request and return (status, body).
fn http(
    port: u16,
    method: &str,
    path: &str,
    body: Option<&str>,
    extra_headers: &[(&str, &str)],
) -> (u16, String) {
    let mut stream = TcpStream::connect(format!("127.0.0.1:{}", port)).expect("failed to connect");
    stream
        .set_read_timeout(Some(Duration::from_secs(10)))
        .unwrap();

    let mut header_lines = String::new();
    for (name, value) in extra_headers {
        header_lines.push_str(&format!("{}: {}\r\n", name, value));
    }
    let body = body.unwrap_or("");
    let request = format!(
        "{method} {path} HTTP/1.1\r\nHost: localhost:{port}\r\nContent-Type: application/json\r\nContent-Length: {}\r\n{header_lines}Connection: close\r\n\r\n{body}",
        body.len()
    );
    std::io::Write::write_all(&mut stream, request.as_bytes()).expect("failed to write");

    let mut response = String::new();
    let _ = stream.read_to_string(&mut response);

    parse_http_response(&response)
}

fn get(port: u16, path: &str) -> (u16, serde_json::Value) {
    let (status, body) = http(port, "GET", path, None, &[]);
    (status, json(&body))
}

fn post(port: u16, path: &str, body: &str) -> (u16, serde_json::Value) {
    let (status, body) = http(port, "POST", path, Some(body), &[]);
    (status, json(&body))
}

fn json(body: &str) -> serde_json::Value {
    serde_json::from_str(body).unwrap_or_else(|e| panic!("invalid JSON body {body:?}: {e}"))
}

/// Parse an HTTP response into (status_code, body).
fn parse_http_response(response: &str) -> (u16, String) {
    let parts: Vec<&str> = response.splitn(2, "\r\n\r\n").collect();
    let headers = parts.first().unwrap_or(&"").to_string();
    let body = parts.get(1).unwrap_or(&"").to_string();

    let status_line = headers.lines().next().unwrap_or("");
    let status = status_line
        .split_whitespace()
        .nth(1)
        .and_then(|s| s.parse::<u16>().ok())
        .unwrap_or(0);

    let body = if headers.to_ascii_lowercase().contains("transfer-encoding: chunked") {
        decode_chunked(&body)
    } else {
        body
    };
    (status, body)
}

/// Decode chunked transfer encoding.
fn decode_chunked(data: &str) -> String {
    let mut result = String::new();
    let mut remaining = data;

    while let Some(line_end) = remaining.find("\r\n") {
        let size = match usize::from_str_radix(remaining[..line_end].trim(), 16) {
            Ok(s) => s,
            Err(_) => break,
        };
        if size == 0 {
            break;
        }
        let chunk_start = line_end + 2;
        let chunk_end = (chunk_start + size).min(remaining.len());
        result.push_str(&remaining[chunk_start..chunk_end]);
        remaining = remaining.get(chunk_end + 2..).unwrap_or("");
    }
    result
}

fn create_observation(port: u16, subject: &str, observed_at: &str) -> u64 {
    let (status, body) = post(
        port,
        "/observations",
        &format!(
            r#"{{"subject":"{subject}","image_ref":"https://img.example/{subject}.jpg","attributes":{{"effort":2}},"observed_at":"{observed_at}"}}"#
        ),
    );
    assert_eq!(status, 201, "create failed: {body}");
    body["id"].as_u64().expect("numeric id")
}

// ──────────────────────────────────────────────
// Health and routing
// ──────────────────────────────────────────────

#[test]
fn health_reports_ok() {
    let server = start_server(None);
    let (status, body) = get(server.port, "/health");
    assert_eq!(status, 200);
    assert_eq!(body["status"], "ok");
    assert!(body["vitalog_version"].is_string());
}

#[test]
fn unknown_route_is_json_404() {
    let server = start_server(None);
    let (status, body) = get(server.port, "/nope");
    assert_eq!(status, 404);
    assert_eq!(body["error"], "not found");
}

// ──────────────────────────────────────────────
// Observations
// ──────────────────────────────────────────────

#[test]
fn created_observation_is_readable_and_pending() {
    let server = start_server(None);
    let id = create_observation(server.port, "kid", "2024-01-03T08:00:00Z");

    let (status, body) = get(server.port, &format!("/observations/{id}"));
    assert_eq!(status, 200);
    assert_eq!(body["subject"], "kid");
    assert_eq!(body["attributes"]["effort"], 2);
    assert_eq!(body["analysis"]["state"], "pending");
}

#[test]
fn create_without_subject_is_bad_request() {
    let server = start_server(None);
    let (status, body) = post(server.port, "/observations", r#"{"image_ref":"a.jpg"}"#);
    assert_eq!(status, 400);
    assert!(body["error"].is_string());
}

#[test]
fn list_is_newest_first() {
    let server = start_server(None);
    let older = create_observation(server.port, "kid", "2024-01-01T08:00:00Z");
    let newer = create_observation(server.port, "kid", "2024-01-02T08:00:00Z");
    create_observation(server.port, "grandpa", "2024-01-03T08:00:00Z");

    let (status, body) = get(server.port, "/observations?subject=kid");
    assert_eq!(status, 200);
    let ids: Vec<u64> = body["observations"]
        .as_array()
        .unwrap()
        .iter()
        .map(|o| o["id"].as_u64().unwrap())
        .collect();
    assert_eq!(ids, vec![newer, older]);
}

#[test]
fn attributes_patch_merges() {
    let server = start_server(None);
    let id = create_observation(server.port, "kid", "2024-01-03T08:00:00Z");
    let (status, body) = http(
        server.port,
        "PATCH",
        &format!("/observations/{id}/attributes"),
        Some(r#"{"note":"after lunch"}"#),
        &[],
    );
    assert_eq!(status, 200, "{body}");
    let body = json(&body);
    assert_eq!(body["attributes"]["effort"], 2);
    assert_eq!(body["attributes"]["note"], "after lunch");
}

#[test]
fn delete_then_get_is_404() {
    let server = start_server(None);
    let id = create_observation(server.port, "kid", "2024-01-03T08:00:00Z");
    let (status, _) = http(server.port, "DELETE", &format!("/observations/{id}"), None, &[]);
    assert_eq!(status, 200);
    let (status, _) = get(server.port, &format!("/observations/{id}"));
    assert_eq!(status, 404);
}

// ──────────────────────────────────────────────
// Analysis
// ──────────────────────────────────────────────

#[test]
fn triggered_analysis_completes_in_the_background() {
    let server = start_server(None);
    let id = create_observation(server.port, "kid", "2024-01-03T08:00:00Z");

    let (status, body) = post(
        server.port,
        &format!("/observations/{id}/analysis"),
        r#"{"language":"en"}"#,
    );
    assert_eq!(status, 202, "{body}");

    let mut view = serde_json::Value::Null;
    for _ in 0..50 {
        let (status, body) = get(server.port, &format!("/observations/{id}/analysis"));
        assert_eq!(status, 200);
        if body["state"] != "pending" {
            view = body;
            break;
        }
        std::thread::sleep(Duration::from_millis(100));
    }
    assert_eq!(view["state"], "succeeded", "{view}");
    assert_eq!(view["result"]["verdict"]["score_band"], "B+");
}

#[test]
fn trigger_with_empty_body_uses_defaults() {
    let server = start_server(None);
    let id = create_observation(server.port, "kid", "2024-01-03T08:00:00Z");
    let (status, _) = http(
        server.port,
        "POST",
        &format!("/observations/{id}/analysis"),
        None,
        &[],
    );
    assert_eq!(status, 202);
}

#[test]
fn trigger_for_unknown_observation_is_404() {
    let server = start_server(None);
    let (status, _) = post(server.port, "/observations/999/analysis", "{}");
    assert_eq!(status, 404);
}

#[test]
fn dismissing_a_non_rejected_observation_conflicts() {
    let server = start_server(None);
    let id = create_observation(server.port, "kid", "2024-01-03T08:00:00Z");
    let (status, _) = post(
        server.port,
        &format!("/observations/{id}/analysis/dismiss"),
        "",
    );
    assert_eq!(status, 409);
    let (status, _) = get(server.port, &format!("/observations/{id}"));
    assert_eq!(status, 200);
}

// ──────────────────────────────────────────────
// Trends
// ──────────────────────────────────────────────

#[test]
fn trend_with_too_few_observations_is_insufficient() {
    let server = start_server(None);
    create_observation(server.port, "kid", "2024-01-03T08:00:00Z");
    let (status, body) = post(
        server.port,
        "/trends",
        r#"{"subject":"kid","start":"2024-01-01","end":"2024-01-07"}"#,
    );
    assert_eq!(status, 200, "{body}");
    assert_eq!(body["status"], "insufficient_data");
    assert_eq!(body["stats"]["count"], 1);
    assert!(body["narrative"].is_null());
    assert_eq!(body["entries"].as_array().unwrap().len(), 1);
}

#[test]
fn reversed_trend_range_is_bad_request() {
    let server = start_server(None);
    let (status, _) = post(
        server.port,
        "/trends",
        r#"{"subject":"kid","start":"2024-01-07","end":"2024-01-01"}"#,
    );
    assert_eq!(status, 400);
}

// ──────────────────────────────────────────────
// API key
// ──────────────────────────────────────────────

#[test]
fn api_key_is_enforced_except_on_health() {
    let server = start_server(Some("s3cret"));

    let (status, _) = get(server.port, "/health");
    assert_eq!(status, 200);

    let (status, _) = get(server.port, "/observations?subject=kid");
    assert_eq!(status, 401);

    let (status, _) = http(
        server.port,
        "GET",
        "/observations?subject=kid",
        None,
        &[("X-API-Key", "wrong")],
    );
    assert_eq!(status, 403);

    let (status, _) = http(
        server.port,
        "GET",
        "/observations?subject=kid",
        None,
        &[("Authorization", "Bearer s3cret")],
    );
    assert_eq!(status, 200);
}

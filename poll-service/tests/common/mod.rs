#![allow(dead_code)]

use reqwest::Client;
use serde_json::{json, Value};
use std::process::{Command, Stdio};
use std::{
    net::TcpListener,
    path::{Path, PathBuf},
    time::Duration,
};
use tokio::time::sleep;

pub const AUTH_SECRET: &str = "e2e-secret";
pub const METRICS_TOKEN: &str = "test-token";

/// Get an available ephemeral port on localhost.
pub fn find_free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind ephemeral");
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    port
}

/// Resolve the poll-service binary path from env or common target dirs.
pub fn resolve_binary_path() -> String {
    if let Some(p) = option_env!("CARGO_BIN_EXE_poll-service") {
        return p.to_string();
    }

    let manifest = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    let workspace_root = manifest.parent().unwrap_or(&manifest).to_path_buf();
    let candidates = [
        manifest.join("target/debug/poll-service"),
        manifest.join("target/release/poll-service"),
        workspace_root.join("target/debug/poll-service"),
        workspace_root.join("target/release/poll-service"),
    ];
    for cand in candidates.iter() {
        if Path::new(&cand).exists() {
            return cand.to_string_lossy().to_string();
        }
    }

    "poll-service".to_string()
}

/// Poll /healthz until the server responds OK or timeout.
pub async fn wait_ready(base: &str, timeout_ms: u64) -> anyhow::Result<()> {
    let client = Client::new();
    let mut waited = 0u64;
    loop {
        if waited >= timeout_ms {
            anyhow::bail!("server not ready after {}ms", timeout_ms);
        }
        if let Ok(resp) = client.get(format!("{}/healthz", base)).send().await {
            if resp.status().is_success() {
                return Ok(());
            }
        }
        sleep(Duration::from_millis(50)).await;
        waited += 50;
    }
}

// Struct that ensures the child process is killed on drop
pub struct ChildGuard(std::process::Child);
impl Drop for ChildGuard {
    fn drop(&mut self) {
        let _ = self.0.kill();
    }
}

pub struct TestServer {
    pub base_url: String,
    pub ws_url: String,
    _guard: ChildGuard,
}

pub async fn setup_server() -> anyhow::Result<TestServer> {
    // Resolve binary path from Cargo or fallbacks
    let bin = resolve_binary_path();
    let bin_path = Path::new(&bin);
    assert!(bin_path.exists(), "binary not found at {}", bin);

    let port = find_free_port();
    let base_url = format!("http://127.0.0.1:{}", port);

    let child = Command::new(&bin)
        .env("AUTH_SECRET", AUTH_SECRET)
        .env("METRICS_AUTH_TOKEN", METRICS_TOKEN)
        .env("DB_PATH", ":memory:")
        .env("PORT", port.to_string())
        .env("RUST_LOG", "info")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()?;

    // Ensure we always try to kill the child on exit
    let guard = ChildGuard(child);

    wait_ready(&base_url, 10_000).await?;

    Ok(TestServer {
        ws_url: format!("ws://127.0.0.1:{}/ws", port),
        base_url,
        _guard: guard,
    })
}

/// Bearer token for `user_id`, issued with the test secret.
pub async fn issue_token(client: &Client, base_url: &str, user_id: &str) -> anyhow::Result<String> {
    let body: Value = client
        .post(format!("{}/auth/token", base_url))
        .header("x-auth-secret", AUTH_SECRET)
        .json(&json!({ "userId": user_id }))
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;
    Ok(body["token"].as_str().expect("token in response").to_string())
}

/// Create a published poll and return (poll id, option ids in order).
pub async fn create_poll(
    client: &Client,
    base_url: &str,
    token: &str,
    options: &[&str],
) -> anyhow::Result<(i64, Vec<i64>)> {
    let poll: Value = client
        .post(format!("{}/polls", base_url))
        .bearer_auth(token)
        .json(&json!({ "question": "Best language?", "options": options }))
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;
    let poll_id = poll["id"].as_i64().expect("poll id");
    let option_ids = poll["options"]
        .as_array()
        .expect("options")
        .iter()
        .map(|o| o["id"].as_i64().expect("option id"))
        .collect();
    Ok((poll_id, option_ids))
}

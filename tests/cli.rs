//! Runs the `gtc` binary end to end.

use axum::http::StatusCode;
use axum::{Json, Router};
use serde_json::json;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

fn gtc_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_gtc"))
}

fn write_config(root: &Path, base_url: &str) -> (PathBuf, PathBuf) {
    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();
    let token_file = root.join("data").join("session.token");
    let config_path = config_dir.join("gtc.toml");
    fs::write(
        &config_path,
        format!(
            r#"[backend]
base_url = "{}"
timeout_secs = 5

[session]
token_file = "{}"
"#,
            base_url,
            token_file.display()
        ),
    )
    .unwrap();
    (config_path, token_file)
}

fn gtc(config: &Path, args: &[&str]) -> Command {
    let mut cmd = Command::new(gtc_binary());
    cmd.arg("--config")
        .arg(config)
        .args(args)
        .env_remove("GTC_TOKEN")
        .env_remove("GTC_API_URL")
        .env("RUST_LOG", "off");
    cmd
}

fn run(config: &Path, args: &[&str]) -> Output {
    gtc(config, args).output().unwrap()
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).to_string()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).to_string()
}

/// A port with nothing listening on it.
fn dead_url() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{}", addr)
}

#[test]
fn test_session_lifecycle() {
    let tmp = TempDir::new().unwrap();
    let (config, token_file) = write_config(tmp.path(), &dead_url());

    let out = run(&config, &["session", "status"]);
    assert!(out.status.success(), "stderr: {}", stderr(&out));
    assert!(stdout(&out).contains("signed out"));

    let out = run(&config, &["session", "set-token", "abc.def"]);
    assert!(out.status.success(), "stderr: {}", stderr(&out));
    assert_eq!(fs::read_to_string(&token_file).unwrap(), "abc.def");

    let out = run(&config, &["session", "status"]);
    assert!(stdout(&out).contains("signed in"));

    let out = run(&config, &["session", "sign-out"]);
    assert!(out.status.success());
    assert!(!token_file.exists());
}

#[test]
fn test_missing_config_fails() {
    let tmp = TempDir::new().unwrap();
    let out = run(&tmp.path().join("nope.toml"), &["variants", "list"]);
    assert!(!out.status.success());
    assert!(stderr(&out).contains("Failed to read config file"));
}

#[test]
fn test_browse_degrades_but_strict_reads_fail() {
    let tmp = TempDir::new().unwrap();
    let (config, _) = write_config(tmp.path(), &dead_url());

    let out = run(&config, &["variants", "list"]);
    assert!(out.status.success(), "stderr: {}", stderr(&out));
    assert!(stdout(&out).contains("No variants."));

    let out = run(&config, &["classes", "list"]);
    assert_eq!(out.status.code(), Some(1));
    assert!(stderr(&out).contains("list classes failed"));

    let out = run(&config, &["fetch-all", "v1", "--progress", "off"]);
    assert_eq!(out.status.code(), Some(1));
    assert!(stderr(&out).contains("No parts available for this variant."));
}

/// A backend that answers 401 on every route.
async fn spawn_unauthorized_backend() -> String {
    let app = Router::new().fallback(|| async {
        (StatusCode::UNAUTHORIZED, Json(json!({"message": "jwt expired"})))
    });
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

fn stale_session(root: &Path, base_url: &str) -> (PathBuf, PathBuf) {
    let (config, token_file) = write_config(root, base_url);
    fs::create_dir_all(token_file.parent().unwrap()).unwrap();
    fs::write(&token_file, "stale").unwrap();
    (config, token_file)
}

async fn run_async(config: &Path, args: &[&str]) -> Output {
    tokio::process::Command::from(gtc(config, args))
        .output()
        .await
        .unwrap()
}

#[tokio::test(flavor = "multi_thread")]
async fn test_session_expired_exits_with_message() {
    let url = spawn_unauthorized_backend().await;
    let tmp = TempDir::new().unwrap();
    let (config, token_file) = stale_session(tmp.path(), &url);

    let out = run_async(&config, &["classes", "list"]).await;

    assert_eq!(out.status.code(), Some(1));
    assert!(stderr(&out).contains("session expired, sign in again"));
    assert!(!token_file.exists());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_browse_on_expired_session_prompts_sign_in() {
    let url = spawn_unauthorized_backend().await;

    for args in [
        &["variants", "list"][..],
        &["captures", "list", "v1", "p1"][..],
        &["fetch-all", "v1", "--progress", "off"][..],
    ] {
        let tmp = TempDir::new().unwrap();
        let (config, token_file) = stale_session(tmp.path(), &url);

        let out = run_async(&config, args).await;

        assert_eq!(out.status.code(), Some(1), "{:?}", args);
        assert!(
            stderr(&out).contains("session expired, sign in again"),
            "{:?}: {}",
            args,
            stderr(&out)
        );
        assert!(!stderr(&out).contains("Error:"), "{:?}", args);
        assert!(!token_file.exists());
    }
}

// tests/common/mod.rs
// Shared test utilities for integration tests: build a `Config` the same way the CLI
// does, from a temp log file plus a flag slice, pointed at a `wiremock` server.
#![allow(dead_code)]

use std::io::Write;

use clap::Parser;
use tempfile::NamedTempFile;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use logship::cli::Cli;
use logship::config::Config;

/// Writes `content` to a temp file and builds a `Config` as if `logship <extra_args>
/// <temp-file-path>` had been run, with `--url <server.uri()>` already injected.
pub fn config_for(server: &MockServer, extra_args: &[&str], content: &str) -> (Config, NamedTempFile) {
    let mut file = NamedTempFile::new().expect("create temp log file");
    write!(file, "{content}").expect("write temp log file");

    let mut args: Vec<String> = vec!["logship".to_string(), "--url".to_string(), server.uri()];
    args.extend(extra_args.iter().map(|s| s.to_string()));
    args.push(file.path().to_str().unwrap().to_string());

    let cli = Cli::parse_from(args);
    let config = Config::build(cli).expect("config should build");
    (config, file)
}

/// Mounts a `GET /api/apps/v2/{site_id}` responder returning `main_url`, matching the
/// static resolver's startup fetch (SPEC_FULL.md §4.4).
pub async fn mount_static_site_lookup(server: &MockServer, site_id: &str, main_url: &str) {
    Mock::given(method("GET"))
        .and(path(format!("/api/apps/v2/{site_id}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "data": { "id": site_id, "attributes": { "urls": [main_url] } }
        })))
        .mount(server)
        .await;
}

/// Mounts a bulk tracker responder (`POST /ppms.php`) that always succeeds.
pub async fn mount_tracker_bulk_ok(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/ppms.php"))
        .respond_with(ResponseTemplate::new(200))
        .mount(server)
        .await;
}

/// Runs a blocking `logship::runner::run` call on a dedicated OS thread, so the
/// caller's async test body keeps driving the wiremock server concurrently (the same
/// "spawn a separate thread to avoid nested async runtime errors" pattern used for any
/// blocking application entry point under a `#[tokio::test]`).
pub fn run_blocking(config: Config) -> Result<String, logship::error::Fatal> {
    std::thread::spawn(move || logship::runner::run(config))
        .join()
        .expect("runner thread panicked")
}

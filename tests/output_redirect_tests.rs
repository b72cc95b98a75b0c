// tests/output_redirect_tests.rs
// `--output` must actually redirect the final summary to the named file instead of
// silently discarding the flag and always printing to stdout.

mod common;

use wiremock::MockServer;

#[tokio::test]
async fn output_flag_redirects_the_summary_to_the_named_file() {
    let server = MockServer::start().await;
    common::mount_static_site_lookup(&server, "1", "https://p.example/").await;
    common::mount_tracker_bulk_ok(&server).await;

    let out_file = tempfile::NamedTempFile::new().expect("create output temp file");
    let out_path = out_file.path().to_str().unwrap().to_string();

    let line = r#"1.2.3.4 - - [10/Oct/2000:13:55:36 -0700] "GET /a HTTP/1.1" 200 512 "-" "Mozilla/5.0""#;
    let (config, _log_file) = common::config_for(
        &server,
        &["--idsite", "1", "--recorders", "1", "--output", &out_path],
        line,
    );

    let summary = common::run_blocking(config).unwrap();
    assert!(summary.contains("1 lines parsed, 1 recorded"), "summary: {summary}");

    let written = std::fs::read_to_string(&out_path).expect("read redirected output file");
    assert!(written.contains("1 lines parsed, 1 recorded"), "file contents: {written}");
}

// tests/bot_and_redirect_tests.rs
// SPEC_FULL.md §8 boundary scenarios 4 and 6: bot tagging and the 304-is-not-a-redirect
// edge case, exercised end to end against a mocked tracker backend.

mod common;

use serde_json::Value;
use wiremock::MockServer;

async fn first_tracker_request(server: &MockServer) -> Value {
    let requests = server.received_requests().await.unwrap();
    let req = requests.iter().find(|r| r.url.path() == "/ppms.php").expect("a tracker request");
    serde_json::from_slice(&req.body).unwrap()
}

#[tokio::test]
async fn boundary_scenario_4_bot_user_agent_is_tagged_and_recorded() {
    let server = MockServer::start().await;
    common::mount_static_site_lookup(&server, "1", "https://p.example/").await;
    common::mount_tracker_bulk_ok(&server).await;

    let line = r#"66.249.66.1 - - [10/Oct/2000:13:55:36 -0700] "GET /a HTTP/1.1" 200 512 "-" "Googlebot/2.1""#;
    let (config, _file) = common::config_for(&server, &["--idsite", "1", "--enable-bots", "--recorders", "1"], line);

    let summary = common::run_blocking(config).unwrap();
    assert!(summary.contains("1 lines parsed, 1 recorded"), "summary: {summary}");

    let body = first_tracker_request(&server).await;
    let req = &body["requests"][0];
    assert_eq!(req["bots"], "1");
    let cvar: Value = serde_json::from_str(req["_cvar"].as_str().unwrap()).unwrap();
    assert_eq!(cvar["1"][0], "Bot");
    assert_eq!(cvar["1"][1], "Googlebot/2.1");
}

#[tokio::test]
async fn boundary_scenario_6_status_304_is_not_a_redirect() {
    let server = MockServer::start().await;
    common::mount_static_site_lookup(&server, "1", "https://p.example/").await;
    common::mount_tracker_bulk_ok(&server).await;

    let line = r#"1.2.3.4 - - [10/Oct/2000:13:55:36 -0700] "GET /a HTTP/1.1" 304 0 "-" "Mozilla/5.0""#;
    let (config, _file) = common::config_for(
        &server,
        &["--idsite", "1", "--enable-http-redirects", "--recorders", "1"],
        line,
    );

    let summary = common::run_blocking(config).unwrap();
    assert!(summary.contains("1 lines parsed, 1 recorded"), "summary: {summary}");

    let body = first_tracker_request(&server).await;
    let req = &body["requests"][0];
    // A real redirect would carry a synthesized `action_name`; 304 must not.
    assert!(req.get("action_name").is_none());
}

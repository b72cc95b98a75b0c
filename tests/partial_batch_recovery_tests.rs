// tests/partial_batch_recovery_tests.rs
// SPEC_FULL.md §8 boundary scenario 5 / invariant 4: a bulk response that only
// accepts a prefix of the batch must trigger a retry carrying just the trimmed
// suffix, and that trim must never resend an already-accepted request.

mod common;

use serde_json::Value;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn log_lines(n: usize) -> String {
    (0..n)
        .map(|i| {
            format!(
                r#"127.0.0.1 - - [10/Oct/2000:13:55:{:02} -0700] "GET /item-{i} HTTP/1.0" 200 10"#,
                i % 60
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[tokio::test]
async fn partial_success_trims_accepted_prefix_and_retries_the_remainder() {
    let server = MockServer::start().await;
    common::mount_static_site_lookup(&server, "9", "https://p.example/").await;

    // First bulk POST: reject as a transient failure but report 4 of 10 accepted.
    Mock::given(method("POST"))
        .and(path("/ppms.php"))
        .respond_with(
            ResponseTemplate::new(502).set_body_json(serde_json::json!({
                "tracked": 4,
                "message": "bad #5"
            })),
        )
        .up_to_n_times(1)
        .mount(&server)
        .await;
    // Every subsequent bulk POST (the retried 6-element suffix) succeeds.
    Mock::given(method("POST"))
        .and(path("/ppms.php"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let content = log_lines(10);
    let (config, _file) = common::config_for(
        &server,
        &["--idsite", "9", "--recorders", "1", "--recorder-max-payload-size", "10"],
        &content,
    );

    let summary = common::run_blocking(config).unwrap();
    assert!(summary.contains("10 lines parsed, 10 recorded, 10 uploaded"), "summary: {summary}");

    let requests = server.received_requests().await.unwrap();
    let tracker_calls: Vec<Value> = requests
        .into_iter()
        .filter(|r| r.url.path() == "/ppms.php")
        .map(|r| serde_json::from_slice(&r.body).unwrap())
        .collect();

    assert_eq!(tracker_calls.len(), 2, "expected the original batch plus one retry of the trimmed suffix");
    assert_eq!(tracker_calls[0]["requests"].as_array().unwrap().len(), 10);
    let retried = tracker_calls[1]["requests"].as_array().unwrap();
    assert_eq!(retried.len(), 6, "only the 6 unaccepted requests should be resent");
    // The retried suffix starts at original index 4 ("item-4"), not index 0.
    assert_eq!(retried[0]["url"], "https://p.example/item-4");
}

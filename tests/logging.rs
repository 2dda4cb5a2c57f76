//! Captures real `tracing` output to verify spec §7's logging requirements:
//! a WARN when a custom header is dropped as protected, and an INFO per
//! retry attempt.

mod common;

use common::LogCapture;
use control_plane_client::config::ClientSettings;
use control_plane_client::retry::execute_with_retry_and_sleeper;
use std::collections::HashMap;
use std::future::ready;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[test]
fn dropped_custom_header_logs_a_warning() {
    let capture = LogCapture::new();
    let _guard = common::install(capture.clone());

    let mut custom = HashMap::new();
    custom.insert("User-Agent".to_string(), "evil".to_string());

    control_plane_client::headers::compose("prefect", "1.0.0", "1.0", &custom).unwrap();

    let logs = capture.contents();
    assert!(logs.contains("WARN"), "expected a WARN-level event, got:\n{logs}");
    assert!(
        logs.contains("ignored because it conflicts with a reserved header"),
        "expected the drop message, got:\n{logs}"
    );
    assert!(logs.contains("User-Agent"), "expected the header name, got:\n{logs}");
}

#[test]
fn surviving_custom_header_logs_no_warning() {
    let capture = LogCapture::new();
    let _guard = common::install(capture.clone());

    let mut custom = HashMap::new();
    custom.insert("X-Safe-Header".to_string(), "ok".to_string());

    control_plane_client::headers::compose("prefect", "1.0.0", "1.0", &custom).unwrap();

    assert!(!capture.contents().contains("WARN"));
}

#[tokio::test]
async fn retryable_status_logs_an_info_event_per_attempt() {
    let capture = LogCapture::new();
    let _guard = common::install(capture.clone());

    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/thing"))
        .respond_with(ResponseTemplate::new(429))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/thing"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let settings = ClientSettings {
        max_retries: 5,
        retry_jitter_factor: 0.0,
        ..ClientSettings::default()
    };

    let http = reqwest::Client::new();
    let url = format!("{}/thing", server.uri());

    let response = execute_with_retry_and_sleeper(
        &settings,
        "GET /thing",
        || http.get(&url),
        |_| ready(()),
    )
    .await
    .unwrap();

    assert_eq!(response.status(), 200);

    let logs = capture.contents();
    let info_lines: Vec<&str> = logs.lines().filter(|l| l.contains("INFO")).collect();
    assert_eq!(
        info_lines.len(),
        2,
        "expected one INFO line per retried attempt, got:\n{logs}"
    );
    for line in &info_lines {
        assert!(line.contains("Received retryable status code 429"));
        assert!(line.contains("GET /thing"));
    }
}

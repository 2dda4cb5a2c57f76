//! Integration tests for the CSRF token lifecycle, exercised end-to-end
//! through `Client` against a mock control-plane server.

use control_plane_client::Client;
use wiremock::matchers::{header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn csrf_token_body(token: &str) -> serde_json::Value {
    serde_json::json!({
        "client": "00000000-0000-0000-0000-000000000000",
        "token": token,
        "expiration": "2999-01-01T00:00:00Z",
    })
}

#[tokio::test]
async fn mutating_request_fetches_and_attaches_csrf_token() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/csrf-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(csrf_token_body("tok-1")))
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/runs"))
        .and(header_exists("prefect-csrf-token"))
        .and(header_exists("prefect-csrf-client"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let client = Client::builder()
        .with_base_url(format!("{}/", server.uri()))
        .unwrap()
        .build()
        .unwrap();

    let response = client.post("runs", &serde_json::json!({})).await.unwrap();
    assert_eq!(response.status(), 200);

    let requests = server.received_requests().await.unwrap();
    let csrf_fetches = requests.iter().filter(|r| r.url.path() == "/csrf-token").count();
    assert_eq!(csrf_fetches, 1);
}

#[tokio::test]
async fn fresh_token_is_reused_across_mutating_requests() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/csrf-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(csrf_token_body("tok-1")))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/runs"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let client = Client::builder()
        .with_base_url(format!("{}/", server.uri()))
        .unwrap()
        .build()
        .unwrap();

    client.post("runs", &serde_json::json!({})).await.unwrap();
    client.post("runs", &serde_json::json!({})).await.unwrap();
    client.post("runs", &serde_json::json!({})).await.unwrap();

    let requests = server.received_requests().await.unwrap();
    let csrf_fetches = requests.iter().filter(|r| r.url.path() == "/csrf-token").count();
    assert_eq!(csrf_fetches, 1, "token should be reused until it expires");
}

#[tokio::test]
async fn get_requests_never_touch_csrf() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let client = Client::builder()
        .with_base_url(format!("{}/", server.uri()))
        .unwrap()
        .build()
        .unwrap();

    client.get("health").await.unwrap();

    let requests = server.received_requests().await.unwrap();
    assert!(requests.iter().all(|r| r.url.path() != "/csrf-token"));
}

#[tokio::test]
async fn token_endpoint_404_disables_csrf_permanently_for_the_client() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/csrf-token"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/runs"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let client = Client::builder()
        .with_base_url(format!("{}/", server.uri()))
        .unwrap()
        .build()
        .unwrap();

    let first = client.post("runs", &serde_json::json!({})).await.unwrap();
    assert_eq!(first.status(), 200);
    let second = client.post("runs", &serde_json::json!({})).await.unwrap();
    assert_eq!(second.status(), 200);

    let requests = server.received_requests().await.unwrap();
    let csrf_fetches = requests.iter().filter(|r| r.url.path() == "/csrf-token").count();
    assert_eq!(
        csrf_fetches, 1,
        "a disabled client must never refetch a CSRF token"
    );

    let post_without_csrf_headers = requests
        .iter()
        .filter(|r| r.url.path() == "/runs")
        .all(|r| !r.headers.contains_key("prefect-csrf-token"));
    assert!(post_without_csrf_headers);
}

#[tokio::test]
async fn token_endpoint_422_with_disabled_detail_disables_csrf() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/csrf-token"))
        .respond_with(ResponseTemplate::new(422).set_body_json(serde_json::json!({
            "detail": "CSRF protection is disabled."
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/runs"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let client = Client::builder()
        .with_base_url(format!("{}/", server.uri()))
        .unwrap()
        .build()
        .unwrap();

    let response = client.post("runs", &serde_json::json!({})).await.unwrap();
    assert_eq!(response.status(), 200);
}

#[tokio::test]
async fn invalid_csrf_response_triggers_one_shot_refresh_and_resend() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/csrf-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(csrf_token_body("tok-1")))
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/runs"))
        .respond_with(ResponseTemplate::new(403).set_body_json(serde_json::json!({
            "detail": "Invalid CSRF token or client identifier."
        })))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/runs"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let client = Client::builder()
        .with_base_url(format!("{}/", server.uri()))
        .unwrap()
        .build()
        .unwrap();

    let response = client.post("runs", &serde_json::json!({})).await.unwrap();
    assert_eq!(response.status(), 200);

    let requests = server.received_requests().await.unwrap();
    let csrf_fetches = requests.iter().filter(|r| r.url.path() == "/csrf-token").count();
    assert_eq!(csrf_fetches, 2, "invalid-token recovery refetches once");
    let post_attempts = requests.iter().filter(|r| r.url.path() == "/runs").count();
    assert_eq!(post_attempts, 2, "the original request is resent exactly once");
}

#[tokio::test]
async fn second_consecutive_csrf_invalid_response_is_surfaced_as_an_error() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/csrf-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(csrf_token_body("tok-1")))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/runs"))
        .respond_with(ResponseTemplate::new(403).set_body_json(serde_json::json!({
            "detail": "Invalid CSRF token or client identifier."
        })))
        .mount(&server)
        .await;

    let client = Client::builder()
        .with_base_url(format!("{}/", server.uri()))
        .unwrap()
        .build()
        .unwrap();

    let err = client.post("runs", &serde_json::json!({})).await.unwrap_err();
    assert!(matches!(
        err,
        control_plane_client::Error::Status { status: 403, .. }
    ));
}

//! Tests for the retrying HTTP transport.

use std::time::{Duration, Instant};

use bragi::upstream::{RetryConfig, RetryingTransport, UpstreamRequest};
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn transport(max_retries: u32) -> RetryingTransport {
    RetryingTransport::new(
        Duration::from_secs(2),
        RetryConfig::new()
            .max_retries(max_retries)
            .base_delay(Duration::from_millis(1)),
    )
    .unwrap()
}

#[tokio::test]
async fn success_returns_first_response() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/voices"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let request = UpstreamRequest::get(format!("{}/voices", server.uri()));
    let response = transport(3).send("voices", &request).await.unwrap();
    assert_eq!(response.status(), 200);
}

#[tokio::test]
async fn requests_identify_as_bragi() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(header("user-agent", bragi::user_agent().as_str()))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let request = UpstreamRequest::get(server.uri());
    let response = transport(0).send("test", &request).await.unwrap();
    assert_eq!(response.status(), 200);
}

#[tokio::test]
async fn exhausted_retries_return_none() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .expect(4)
        .mount(&server)
        .await;

    let request = UpstreamRequest::get(server.uri());
    assert!(transport(3).send("test", &request).await.is_none());
}

#[tokio::test]
async fn non_retryable_status_returned_immediately() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let request = UpstreamRequest::get(server.uri());
    let response = transport(3).send("test", &request).await.unwrap();
    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn disabled_retries_make_one_attempt() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .expect(1)
        .mount(&server)
        .await;

    let transport =
        RetryingTransport::new(Duration::from_secs(2), RetryConfig::disabled()).unwrap();
    let request = UpstreamRequest::get(server.uri());
    assert!(transport.send("test", &request).await.is_none());
}

#[tokio::test]
async fn body_and_bearer_resent_on_every_attempt() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(header("authorization", "Bearer k"))
        .and(header("content-type", "application/json"))
        .and(body_json(serde_json::json!({"voice": "alba"})))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(header("authorization", "Bearer k"))
        .and(body_json(serde_json::json!({"voice": "alba"})))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let request = UpstreamRequest::post_json(
        format!("{}/download", server.uri()),
        &serde_json::json!({"voice": "alba"}),
    )
    .unwrap()
    .bearer(Some("k"));

    let response = transport(3).send("download", &request).await.unwrap();
    assert_eq!(response.status(), 200);
}

#[tokio::test]
async fn timeouts_are_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
        .expect(2)
        .mount(&server)
        .await;

    let transport = RetryingTransport::new(
        Duration::from_millis(50),
        RetryConfig::new()
            .max_retries(1)
            .base_delay(Duration::from_millis(1)),
    )
    .unwrap();
    let request = UpstreamRequest::get(server.uri());

    assert!(transport.send("test", &request).await.is_none());
}

#[tokio::test]
async fn backoff_grows_between_attempts() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .expect(3)
        .mount(&server)
        .await;

    // Waits 50ms then 100ms.
    let transport = RetryingTransport::new(
        Duration::from_secs(2),
        RetryConfig::new()
            .max_retries(2)
            .base_delay(Duration::from_millis(50)),
    )
    .unwrap();
    let request = UpstreamRequest::get(server.uri());

    let started = Instant::now();
    assert!(transport.send("test", &request).await.is_none());
    assert!(started.elapsed() >= Duration::from_millis(150));
}

#[tokio::test]
async fn connection_refused_counts_as_transient() {
    // Bind and release a port so nothing is listening on it.
    let addr = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap()
    };
    let request = UpstreamRequest::get(format!("http://{addr}/voices"));

    assert!(transport(2).send("voices", &request).await.is_none());
    assert!(transport(2).send_once(&request).await.is_err());
}

//! HTTP adapter against a mock server.

use fisc_core::{CallParams, SourceAdapter, SourceSettings};
use fisc_federation::HttpSourceAdapter;
use serde_json::json;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn adapter(server: &MockServer) -> HttpSourceAdapter {
    let mut settings = SourceSettings::new("compras_gov", &["contracts"])
        .http(format!("{}/api/v1", server.uri()), "contratos/{uf}");
    settings.query.insert("cnpj".into(), "{cnpj}".into());
    settings.timeout_ms = 500;
    HttpSourceAdapter::from_settings(&settings).unwrap()
}

fn params(uf: &str) -> CallParams {
    let mut params = CallParams::new();
    params.insert("uf".into(), json!(uf));
    params.insert("cnpj".into(), json!("11222333000181"));
    params
}

#[tokio::test]
async fn test_success_fills_path_and_query() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/contratos/MG"))
        .and(query_param("cnpj", "11222333000181"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{ "numero": "CT-1", "valor": 1000.0 }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let outcome = adapter(&server)
        .fetch(&params("MG"), &CancellationToken::new())
        .await
        .unwrap();
    assert!(!outcome.partial);
    assert_eq!(outcome.payload["data"][0]["numero"], "CT-1");
}

#[tokio::test]
async fn test_partial_content_is_partial() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(206).set_body_json(json!([{ "numero": "CT-2" }])))
        .mount(&server)
        .await;

    let outcome = adapter(&server)
        .fetch(&params("SP"), &CancellationToken::new())
        .await
        .unwrap();
    assert!(outcome.partial);
}

#[tokio::test]
async fn test_server_errors_are_transient() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let err = adapter(&server)
        .fetch(&params("SP"), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(err.is_transient());
    assert_eq!(err.reason(), "HTTP 503");
}

#[tokio::test]
async fn test_throttling_is_transient() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(429))
        .mount(&server)
        .await;

    let err = adapter(&server)
        .fetch(&params("SP"), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(err.is_transient());
}

#[tokio::test]
async fn test_client_errors_are_permanent() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let err = adapter(&server)
        .fetch(&params("SP"), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(!err.is_transient());
    assert_eq!(err.reason(), "HTTP 404");
}

#[tokio::test]
async fn test_malformed_body_is_permanent() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>manutencao</html>"))
        .mount(&server)
        .await;

    let err = adapter(&server)
        .fetch(&params("SP"), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(!err.is_transient());
    assert!(err.reason().starts_with("malformed response"));
}

#[tokio::test]
async fn test_slow_server_times_out_as_transient() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!([]))
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&server)
        .await;

    let err = adapter(&server)
        .fetch(&params("SP"), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(err.is_transient());
}

#[tokio::test]
async fn test_cancellation_returns_promptly() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
        .mount(&server)
        .await;

    let token = CancellationToken::new();
    token.cancel();
    let started = std::time::Instant::now();
    let err = adapter(&server).fetch(&params("SP"), &token).await.unwrap_err();
    assert!(err.is_transient());
    assert!(started.elapsed() < Duration::from_secs(1));
}

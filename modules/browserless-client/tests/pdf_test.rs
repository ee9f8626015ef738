use std::time::Duration;

use browserless_client::{BrowserlessClient, BrowserlessError, PdfRequest};
use wiremock::matchers::{body_partial_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn posts_html_and_returns_pdf_bytes() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/pdf"))
        .and(query_param("token", "secret"))
        .and(body_partial_json(serde_json::json!({
            "html": "<html><body>10-K</body></html>",
            "options": { "format": "A4", "printBackground": false }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"%PDF-1.7 fake".to_vec()))
        .expect(1)
        .mount(&server)
        .await;

    let client =
        BrowserlessClient::new(&server.uri(), Some("secret"), Duration::from_secs(5)).unwrap();
    let bytes = client
        .pdf(&PdfRequest::from_html("<html><body>10-K</body></html>".into()))
        .await
        .unwrap();

    assert_eq!(bytes, b"%PDF-1.7 fake");
}

#[tokio::test]
async fn surfaces_api_status() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/pdf"))
        .respond_with(ResponseTemplate::new(429).set_body_string("Too Many Requests"))
        .mount(&server)
        .await;

    let client = BrowserlessClient::new(&server.uri(), None, Duration::from_secs(5)).unwrap();
    let err = client
        .pdf(&PdfRequest::from_url("https://example.com"))
        .await
        .unwrap_err();

    match err {
        BrowserlessError::Api { status, message } => {
            assert_eq!(status, 429);
            assert_eq!(message, "Too Many Requests");
        }
        other => panic!("expected Api error, got {other:?}"),
    }
}

#[tokio::test]
async fn slow_renders_map_to_timeout() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/pdf"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
        .mount(&server)
        .await;

    let client = BrowserlessClient::new(&server.uri(), None, Duration::from_millis(50)).unwrap();
    let err = client
        .pdf(&PdfRequest::from_url("https://example.com"))
        .await
        .unwrap_err();

    assert!(matches!(err, BrowserlessError::Timeout(_)));
}

use std::time::Duration;

use page_acquirer::{DirectFetcher, FetchError, PageFetcher};
use wiremock::matchers::{header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn fetcher() -> DirectFetcher {
    DirectFetcher::new(Duration::from_secs(5)).expect("client")
}

#[tokio::test]
async fn direct_fetch_returns_html_with_browser_headers() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/page"))
        .and(header_exists("user-agent"))
        .and(header_exists("accept-language"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw("<html><body><h1>Hi</h1></body></html>", "text/html; charset=utf-8"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let body = fetcher()
        .fetch(&format!("{}/page", server.uri()))
        .await
        .expect("fetch ok");
    assert!(body.contains("<h1>Hi</h1>"));
}

#[tokio::test]
async fn direct_fetch_follows_redirects() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/old"))
        .respond_with(ResponseTemplate::new(301).insert_header("Location", "/new"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/new"))
        .respond_with(ResponseTemplate::new(200).set_body_raw("<p>moved</p>", "text/html"))
        .mount(&server)
        .await;

    let body = fetcher()
        .fetch(&format!("{}/old", server.uri()))
        .await
        .expect("fetch ok");
    assert_eq!(body, "<p>moved</p>");
}

#[tokio::test]
async fn direct_fetch_rejects_error_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/missing"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let err = fetcher()
        .fetch(&format!("{}/missing", server.uri()))
        .await
        .unwrap_err();
    assert_eq!(err, FetchError::Status(404));
}

#[tokio::test]
async fn direct_fetch_rejects_non_html() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/data"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(r#"{"a":1}"#, "application/json"))
        .mount(&server)
        .await;

    let err = fetcher()
        .fetch(&format!("{}/data", server.uri()))
        .await
        .unwrap_err();
    assert_eq!(err, FetchError::NotHtml("application/json".to_string()));
}

#[tokio::test]
async fn direct_fetch_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/slow"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_delay(Duration::from_millis(300))
                .set_body_raw("<p>late</p>", "text/html"),
        )
        .mount(&server)
        .await;

    let fetcher = DirectFetcher::new(Duration::from_millis(50)).expect("client");
    let err = fetcher
        .fetch(&format!("{}/slow", server.uri()))
        .await
        .unwrap_err();
    assert_eq!(err, FetchError::Timeout);
}

#[tokio::test]
async fn direct_fetch_rejects_invalid_url() {
    let err = fetcher().fetch("::nope::").await.unwrap_err();
    assert!(matches!(err, FetchError::InvalidUrl(_)));
}

use axum::http::{self, Request, StatusCode};
use http_body_util::BodyExt;
use mock_server::{app, Echo, StoredFile};
use tower::ServiceExt;

async fn body_json<T: serde::de::DeserializeOwned>(response: axum::response::Response) -> T {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

async fn body_bytes(response: axum::response::Response) -> bytes::Bytes {
    response.into_body().collect().await.unwrap().to_bytes()
}

fn request(method: &str, uri: &str, body: &str) -> Request<String> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(body.to_string())
        .unwrap()
}

// --- hello ---

#[tokio::test]
async fn hello_has_content_length() {
    let resp = app().oneshot(request("GET", "/hello", "")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()[http::header::CONTENT_LENGTH], "5");
    assert_eq!(body_bytes(resp).await, "hello");
}

// --- echo ---

#[tokio::test]
async fn echo_reports_method_query_headers_and_body() {
    let req = Request::builder()
        .method("POST")
        .uri("/echo?a=1&b=two")
        .header(http::header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .header(http::header::COOKIE, "k=v")
        .body("x=1&y=2".to_string())
        .unwrap();
    let resp = app().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let echo: Echo = body_json(resp).await;
    assert_eq!(echo.method, "POST");
    assert_eq!(echo.query["b"], "two");
    assert_eq!(echo.headers["cookie"], "k=v");
    assert_eq!(echo.body, "x=1&y=2");
    assert_eq!(echo.length, 7);
}

#[tokio::test]
async fn echo_accepts_delete() {
    let resp = app().oneshot(request("DELETE", "/echo", "")).await.unwrap();
    let echo: Echo = body_json(resp).await;
    assert_eq!(echo.method, "DELETE");
    assert_eq!(echo.length, 0);
}

// --- status / redirect ---

#[tokio::test]
async fn status_route_uses_requested_code() {
    let resp = app().oneshot(request("GET", "/status/404", "")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_bytes(resp).await, "status 404");
}

#[tokio::test]
async fn status_route_rejects_invalid_code() {
    let resp = app().oneshot(request("GET", "/status/42", "")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn redirect_points_at_hello() {
    let resp = app().oneshot(request("GET", "/redirect", "")).await.unwrap();
    assert!(resp.status().is_redirection());
    assert_eq!(resp.headers()[http::header::LOCATION], "/hello");
}

// --- files ---

#[tokio::test]
async fn file_put_get_delete() {
    let app = app();
    let put = Request::builder()
        .method("PUT")
        .uri("/files/a.txt")
        .header(http::header::CONTENT_TYPE, "text/plain; charset=UTF-8")
        .header(http::header::CONTENT_DISPOSITION, "fileName=\"a.txt\"")
        .body("content".to_string())
        .unwrap();
    let resp = app.clone().oneshot(put).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let stored: StoredFile = body_json(resp).await;
    assert_eq!(stored.length, 7);
    assert_eq!(stored.content_type.as_deref(), Some("text/plain; charset=UTF-8"));
    assert_eq!(stored.disposition.as_deref(), Some("fileName=\"a.txt\""));

    let resp = app.clone().oneshot(request("GET", "/files/a.txt", "")).await.unwrap();
    assert_eq!(body_bytes(resp).await, "content");

    let resp = app.clone().oneshot(request("DELETE", "/files/a.txt", "")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = app.oneshot(request("GET", "/files/a.txt", "")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn delete_missing_file_returns_404() {
    let resp = app().oneshot(request("DELETE", "/files/none", "")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

//! End-to-end requests against the live mock server.
//!
//! # Design
//! Each test starts its own mock server on a random port and drives a
//! blocking `NetworkRequest` against it, checking both the returned result
//! and the exact listener callback sequence.

mod common;

use std::io::Write;
use std::sync::Arc;

use common::{spawn_server, Event, Recorder};
use mock_server::{Echo, StoredFile};
use serde_json::json;
use urlnet_core::{user_agents, Body, NetworkError, NetworkListener, NetworkRequest, ResponseBody};

fn listen(request: &NetworkRequest) -> Arc<Recorder> {
    let recorder = Recorder::new();
    request.set_listener(Some(recorder.clone())).unwrap();
    recorder
}

fn echo(request: &NetworkRequest) -> Echo {
    serde_json::from_str(&request.result_as_string().unwrap()).unwrap()
}

// --- GET ---

#[test]
fn get_hello() {
    let base = spawn_server();
    let request = NetworkRequest::get(&format!("{base}/hello")).unwrap();
    let recorder = listen(&request);

    request.open().unwrap();

    assert_eq!(request.result(), Some(ResponseBody::Bytes(b"hello".to_vec())));
    let header = request.result_header().unwrap().to_json();
    assert_eq!(header["Response-Code"], 200);
    assert_eq!(header["Content-Length"], 5);

    let events = recorder.events();
    assert_eq!(events.first(), Some(&Event::Started));
    assert!(matches!(events.last(), Some(Event::Finished { headers: Some(_), result: Some(_) })));
    assert!(recorder.failures().is_empty());

    let running = recorder.running();
    assert!(!running.is_empty());
    assert!(running.iter().all(|(receiving, _, total)| *receiving && *total == 5));
    assert!(running.windows(2).all(|w| w[0].1 < w[1].1));
    assert_eq!(running.last().unwrap().1, 5);
}

#[test]
fn get_sends_parameters_as_query() {
    let base = spawn_server();
    let request = NetworkRequest::get(&format!("{base}/echo?x=1")).unwrap();
    request.set_string_parameter("q", Some("a b")).unwrap();
    request.open().unwrap();

    let echo = echo(&request);
    assert_eq!(echo.method, "GET");
    assert_eq!(echo.query["x"], "1");
    assert_eq!(echo.query["q"], "a b");
}

#[test]
fn headers_and_cookies_are_sent() {
    let base = spawn_server();
    let request = NetworkRequest::get(&format!("{base}/echo")).unwrap();
    request.set_cookie("session", Some("a b")).unwrap();
    request.set_cookie("id", Some(" 1 ")).unwrap();
    request.set_authorization(Some("Bearer t")).unwrap();
    request.set_property("X-Custom", Some("yes")).unwrap();
    request.open().unwrap();

    let echo = echo(&request);
    assert_eq!(echo.headers["cookie"], "id=1; session=a+b");
    assert_eq!(echo.headers["authorization"], "Bearer t");
    assert_eq!(echo.headers["x-custom"], "yes");
    assert_eq!(echo.headers["user-agent"], user_agents::DEFAULT);
    assert_eq!(echo.headers["accept"], "*/*");
}

#[test]
fn header_injection_is_refused() {
    let base = spawn_server();
    let request = NetworkRequest::get(&format!("{base}/echo")).unwrap();
    let err = request.set_property("X-A", Some("1\r\nX-Injected: yes")).unwrap_err();
    assert!(matches!(err, NetworkError::InvalidHeader(_)));
    assert!(err.is_configuration());
    assert!(matches!(request.set_property("X-A\r\nX-Injected", Some("yes")), Err(NetworkError::InvalidHeader(_))));
    assert_eq!(request.property("X-A").unwrap(), None);

    request.open().unwrap();
    let echo = echo(&request);
    assert!(!echo.headers.contains_key("x-injected"));
    assert!(!echo.headers.contains_key("x-a"));
}

#[test]
fn redirect_is_followed() {
    let base = spawn_server();
    let request = NetworkRequest::get(&format!("{base}/redirect")).unwrap();
    request.open().unwrap();
    assert_eq!(request.result_as_string().as_deref(), Some("hello"));
}

#[test]
fn redirect_loop_fails() {
    let base = spawn_server();
    let request = NetworkRequest::get(&format!("{base}/redirect/loop")).unwrap();
    let recorder = listen(&request);
    assert!(matches!(request.open(), Err(NetworkError::TooManyRedirects)));
    assert_eq!(recorder.failures(), vec![("too many redirects".to_string(), false)]);
}

#[test]
fn file_url_is_read() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("local.txt");
    std::fs::write(&path, "from disk").unwrap();
    let url = url::Url::from_file_path(&path).unwrap();

    let request = NetworkRequest::get(url.as_str()).unwrap();
    request.open().unwrap();

    assert_eq!(request.result_as_string().as_deref(), Some("from disk"));
    let headers = request.result_header().unwrap();
    assert_eq!(headers.response_code(), None);
    assert_eq!(headers.content_length(), 9);
}

// --- POST ---

#[test]
fn post_url_encoded() {
    let base = spawn_server();
    let request = NetworkRequest::post(&format!("{base}/echo")).unwrap();
    let recorder = listen(&request);
    request.set_number_parameter("a", Some(1)).unwrap();
    request
        .set_array_parameter("ids", Some(vec![Body::number(1), Body::string("two")]))
        .unwrap();
    request.open().unwrap();

    let expected = "a=1&ids%5B%5D=1&ids%5B%5D=two";
    let echo = echo(&request);
    assert_eq!(echo.method, "POST");
    assert_eq!(echo.body, expected);
    assert_eq!(echo.headers["content-type"], "application/x-www-form-urlencoded");

    let len = expected.len() as i64;
    let running = recorder.running();
    let sent: Vec<_> = running.iter().take_while(|(receiving, _, _)| !receiving).collect();
    assert_eq!(sent.last(), Some(&&(false, len, len)));
    let first_receive = running[sent.len()];
    assert_eq!(first_receive, (true, len, len));
    let (_, current, total) = *running.last().unwrap();
    assert!(current > len);
    assert_eq!(current, total);
}

#[test]
fn post_multipart_with_file_and_json() {
    let base = spawn_server();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("upload.txt");
    let content = "x".repeat(5000);
    std::fs::File::create(&path).unwrap().write_all(content.as_bytes()).unwrap();

    let request = NetworkRequest::post(&format!("{base}/echo")).unwrap();
    let recorder = listen(&request);
    request.set_file_parameter("file", Some(&path)).unwrap();
    request.set_json_parameter("meta", Some(json!({"k": "v"}))).unwrap();
    request.set_string_parameter("note", Some("hi")).unwrap();
    request.open().unwrap();

    let echo = echo(&request);
    let content_type = &echo.headers["content-type"];
    assert!(content_type.starts_with("multipart/form-data; boundary="));
    let boundary = content_type.trim_start_matches("multipart/form-data; boundary=");
    assert!(echo.body.contains("name=\"file\"; fileName=\"upload.txt\"\r\nContent-Type: text/plain\r\n"));
    assert!(echo.body.contains(&content));
    assert!(echo.body.contains("Content-Type: application/json\r\n\r\n{\"k\":\"v\"}\r\n"));
    assert!(echo.body.contains("name=\"note\"\r\nContent-Type: text/plain; charset=UTF-8\r\n\r\nhi\r\n"));
    assert!(echo.body.ends_with(&format!("--{boundary}--\r\n")));
    assert_eq!(echo.headers["content-length"], echo.length.to_string());

    let total = echo.length as i64;
    let sending: Vec<_> = recorder.running().into_iter().filter(|(r, _, _)| !r).collect();
    assert!(sending.len() >= 3, "file chunks plus the closing report");
    assert!(sending.iter().all(|(_, _, t)| *t == total));
    assert_eq!(sending.last().unwrap().1, total);
}

#[test]
fn single_post_sends_raw_json() {
    let base = spawn_server();
    let request = NetworkRequest::single_post(&format!("{base}/echo")).unwrap();
    request.set_json_parameter("doc", Some(json!([1, 2]))).unwrap();
    assert!(matches!(
        request.set_string_parameter("other", Some("x")),
        Err(NetworkError::TooManyParameters)
    ));
    request.open().unwrap();

    let echo = echo(&request);
    assert_eq!(echo.method, "POST");
    assert_eq!(echo.body, "[1,2]");
    assert_eq!(echo.headers["content-type"], "application/json; charset=UTF-8");
}

// --- PUT / DELETE / HEAD ---

#[test]
fn put_file_then_get_then_delete() {
    let base = spawn_server();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("note.txt");
    std::fs::write(&path, "stored content").unwrap();

    let put = NetworkRequest::put(&format!("{base}/files/note.txt")).unwrap();
    put.set_file_parameter("file", Some(&path)).unwrap();
    put.open().unwrap();
    let stored: StoredFile = serde_json::from_str(&put.result_as_string().unwrap()).unwrap();
    assert_eq!(stored.length, 14);
    assert_eq!(stored.content_type.as_deref(), Some("text/plain"));
    assert_eq!(stored.disposition.as_deref(), Some("fileName=\"note.txt\""));

    let get = NetworkRequest::get(&format!("{base}/files/note.txt")).unwrap();
    get.open().unwrap();
    assert_eq!(get.result_as_string().as_deref(), Some("stored content"));

    // A second client sees the same upload.
    let agent = ureq::Agent::config_builder()
        .http_status_as_error(false)
        .build()
        .new_agent();
    let mut response = agent.get(&format!("{base}/files/note.txt")).call().unwrap();
    assert_eq!(response.status().as_u16(), 200);
    assert_eq!(response.body_mut().read_to_string().unwrap(), "stored content");

    let delete = NetworkRequest::delete(&format!("{base}/files/note.txt")).unwrap();
    delete.open().unwrap();
    assert_eq!(delete.result_as_string().as_deref(), Some("deleted"));

    let response = agent.get(&format!("{base}/files/note.txt")).call().unwrap();
    assert_eq!(response.status().as_u16(), 404);
}

#[test]
fn put_text_is_labeled_utf8() {
    let base = spawn_server();
    let put = NetworkRequest::put(&format!("{base}/files/t")).unwrap();
    put.set_string_parameter("v", Some("  text body ")).unwrap();
    put.open().unwrap();
    let stored: StoredFile = serde_json::from_str(&put.result_as_string().unwrap()).unwrap();
    assert_eq!(stored.length, 9);
    assert_eq!(stored.content_type.as_deref(), Some("text/plain; charset=UTF-8"));
}

#[test]
fn head_has_headers_but_no_body() {
    let base = spawn_server();
    let request = NetworkRequest::head(&format!("{base}/hello")).unwrap();
    request.open().unwrap();
    assert_eq!(request.result(), Some(ResponseBody::Bytes(Vec::new())));
    let headers = request.result_header().unwrap();
    assert_eq!(headers.response_code(), Some(200));
    assert_eq!(headers.content_length(), 5);
}

// --- status handling ---

#[test]
fn non_200_fails_by_default() {
    let base = spawn_server();
    let request = NetworkRequest::get(&format!("{base}/status/404")).unwrap();
    let recorder = listen(&request);

    assert!(matches!(request.open(), Err(NetworkError::HttpStatus(404))));
    assert!(request.result().is_none());
    assert!(request.result_header().is_none());
    assert_eq!(
        recorder.events(),
        vec![
            Event::Started,
            Event::Failed {
                message: "response code = 404".to_string(),
                disconnect: false
            },
            Event::Finished {
                headers: None,
                result: None
            },
        ]
    );
    assert!(!request.is_opening());
}

#[test]
fn non_200_can_be_accepted() {
    let base = spawn_server();
    let request = NetworkRequest::get(&format!("{base}/status/404")).unwrap();
    request.set_accept_non_200(true).unwrap();
    request.open().unwrap();
    assert_eq!(request.result_as_string().as_deref(), Some("status 404"));
    assert_eq!(request.result_header().unwrap().response_code(), Some(404));
}

#[test]
fn target_file_receives_body() {
    let base = spawn_server();
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("out.bin");
    let request = NetworkRequest::get(&format!("{base}/hello")).unwrap();
    request.set_target_file(Some(target.clone())).unwrap();
    request.open().unwrap();

    assert_eq!(request.result_as_file(), Some(target.clone()));
    assert_eq!(std::fs::read(&target).unwrap(), b"hello");
    assert_eq!(request.result_as_string().as_deref(), Some("hello"));
}

#[test]
fn connection_refused_is_reported() {
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let request = NetworkRequest::get(&format!("http://127.0.0.1:{port}/")).unwrap();
    let recorder = listen(&request);
    assert!(matches!(request.open(), Err(NetworkError::Io(_))));
    let failures = recorder.failures();
    assert_eq!(failures.len(), 1);
    assert!(!failures[0].1);
    assert!(matches!(
        recorder.events().last(),
        Some(Event::Finished { headers: None, result: None })
    ));
}

// --- listener isolation ---

struct Exploding;

impl NetworkListener for Exploding {
    fn on_started(&self) {
        panic!("boom");
    }

    fn on_running(&self, _receiving: bool, _current: i64, _total: i64) {
        panic!("boom");
    }
}

#[test]
fn panicking_listener_does_not_break_the_request() {
    let base = spawn_server();
    let request = NetworkRequest::get(&format!("{base}/hello")).unwrap();
    request.set_listener(Some(Arc::new(Exploding))).unwrap();
    request.open().unwrap();
    assert_eq!(request.result_as_string().as_deref(), Some("hello"));
}

#[test]
fn request_can_be_opened_again() {
    let base = spawn_server();
    let request = NetworkRequest::get(&format!("{base}/status/500")).unwrap();
    assert!(request.open().is_err());
    request.set_accept_non_200(true).unwrap();
    request.open().unwrap();
    assert_eq!(request.result_header().unwrap().response_code(), Some(500));
}

//! Stub HTTP endpoints for exercising the request engine.
//!
//! Routes:
//! - `GET /hello` returns `hello` with `Content-Length: 5`.
//! - `ANY /echo` describes the request it received as JSON.
//! - `GET /slow/{ms}` waits `ms` milliseconds before answering.
//! - `ANY /status/{code}` answers with that status.
//! - `GET /redirect` sends a 303 to `/hello`; `/redirect/loop` redirects to
//!   itself forever.
//! - `PUT|GET|DELETE /files/{name}` keeps uploaded bodies in memory.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, HeaderMap, Method, StatusCode},
    response::{IntoResponse, Redirect, Response},
    routing::{any, get, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::{net::TcpListener, sync::RwLock};

/// What `/echo` saw.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Echo {
    pub method: String,
    pub query: BTreeMap<String, String>,
    /// Header names lowercased; repeated headers joined with `, `.
    pub headers: BTreeMap<String, String>,
    pub body: String,
    pub length: usize,
}

/// A body stored with `PUT /files/{name}`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StoredFile {
    pub name: String,
    pub length: usize,
    pub content_type: Option<String>,
    pub disposition: Option<String>,
    #[serde(skip)]
    pub bytes: Vec<u8>,
}

pub type Db = Arc<RwLock<HashMap<String, StoredFile>>>;

pub fn app() -> Router {
    let db: Db = Arc::new(RwLock::new(HashMap::new()));
    Router::new()
        .route("/hello", get(hello))
        .route("/echo", any(echo))
        .route("/slow/{ms}", get(slow))
        .route("/status/{code}", any(status))
        .route("/redirect", get(|| async { Redirect::to("/hello") }))
        .route("/redirect/loop", get(|| async { Redirect::to("/redirect/loop") }))
        .route("/files/{name}", put(put_file).get(get_file).delete(delete_file))
        .with_state(db)
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    if let Ok(addr) = listener.local_addr() {
        tracing::info!(%addr, "mock server listening");
    }
    axum::serve(listener, app()).await
}

async fn hello() -> &'static str {
    "hello"
}

async fn echo(
    method: Method,
    Query(query): Query<BTreeMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> Json<Echo> {
    let mut seen: BTreeMap<String, String> = BTreeMap::new();
    for (name, value) in &headers {
        let value = String::from_utf8_lossy(value.as_bytes()).into_owned();
        seen.entry(name.as_str().to_string())
            .and_modify(|v| {
                v.push_str(", ");
                v.push_str(&value);
            })
            .or_insert(value);
    }
    tracing::debug!(%method, length = body.len(), "echo");
    Json(Echo {
        method: method.to_string(),
        query,
        headers: seen,
        body: String::from_utf8_lossy(&body).into_owned(),
        length: body.len(),
    })
}

async fn slow(Path(ms): Path<u64>) -> &'static str {
    tokio::time::sleep(Duration::from_millis(ms)).await;
    "late"
}

async fn status(Path(code): Path<u16>) -> Response {
    match StatusCode::from_u16(code) {
        Ok(status) => (status, format!("status {code}")).into_response(),
        Err(_) => StatusCode::BAD_REQUEST.into_response(),
    }
}

async fn put_file(
    State(db): State<Db>,
    Path(name): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Json<StoredFile> {
    let text = |key: header::HeaderName| {
        headers
            .get(key)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    let file = StoredFile {
        name: name.clone(),
        length: body.len(),
        content_type: text(header::CONTENT_TYPE),
        disposition: text(header::CONTENT_DISPOSITION),
        bytes: body.to_vec(),
    };
    db.write().await.insert(name, file.clone());
    Json(file)
}

async fn get_file(State(db): State<Db>, Path(name): Path<String>) -> Result<Vec<u8>, StatusCode> {
    let files = db.read().await;
    files.get(&name).map(|f| f.bytes.clone()).ok_or(StatusCode::NOT_FOUND)
}

async fn delete_file(State(db): State<Db>, Path(name): Path<String>) -> Result<&'static str, StatusCode> {
    let mut files = db.write().await;
    files.remove(&name).map(|_| "deleted").ok_or(StatusCode::NOT_FOUND)
}

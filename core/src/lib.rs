//! Blocking HTTP(S) request engine with typed parameters, multipart
//! uploads, progress callbacks and an independent stall watchdog.
//!
//! # Overview
//! Build a `NetworkRequest` for a URL and a request kind, configure its
//! parameters, headers, cookies and listener, then call `open()`. The call
//! blocks until the response is fully received or the request failed; the
//! `NetworkListener` sees every phase along the way.
//!
//! # Design
//! - `NetworkRequest` runs one lifecycle for every kind; the kinds differ
//!   only through the `RequestMethod` strategy hooks.
//! - A `Watchdog` thread fails the request once no byte has moved for the
//!   configured timeout, independently of socket timeouts.
//! - The transport is a small HTTP/1.1 client on `std::net` and rustls, so
//!   a stalled read can be cut from another thread via `ConnectionHandle`.

pub mod body;
pub mod config;
pub mod connection;
pub mod error;
pub mod http;
pub mod listener;
pub mod method;
pub mod multipart;
pub mod request;
pub mod sniff;
pub mod store;
pub mod tls;
pub mod watchdog;
mod wire;

pub use body::{Body, BodyType, FileBody, Source};
pub use config::{user_agents, NetworkConfig, TlsPolicy};
pub use connection::{Connection, ConnectionHandle};
pub use error::{NetworkError, Result};
pub use http::{HttpMethod, HttpSettings, ResponseBody, ResponseHeaders};
pub use listener::NetworkListener;
pub use method::{Progress, RequestKind, RequestMethod};
pub use multipart::MultipartEncoder;
pub use request::NetworkRequest;

//! Error types for the request engine.
//!
//! # Design
//! Configuration mistakes (bad keys, reserved headers, mutation while a
//! request is in flight) surface synchronously from the setter that caused
//! them. Transport, timeout and disconnect errors are produced inside
//! `NetworkRequest::open`, reported to the listener first, and then returned
//! to the caller. `Display` strings double as the `onFailed` message.

use std::io;
use std::path::PathBuf;

/// Errors produced by body construction, request configuration and the
/// request lifecycle.
#[derive(Debug, thiserror::Error)]
pub enum NetworkError {
    /// A parameter, property or cookie key was empty.
    #[error("empty {0} key")]
    InvalidKey(&'static str),

    /// Parameter keys may not contain `[` or `]`; those are reserved for
    /// array expansion.
    #[error("can not use '[' or ']' characters in parameter key {0:?}; use an array body instead")]
    ArrayParameterKey(String),

    /// `Cookie`, `Content-Type` and `Content-Disposition` are managed by the
    /// engine.
    #[error("{0} can't be set by user")]
    ReservedProperty(&'static str),

    /// The request is currently opening; configuration is frozen.
    #[error("\"{0}\" is opening")]
    Opening(String),

    /// A single-value request already holds a parameter.
    #[error("can't set more than 1 parameter")]
    TooManyParameters,

    /// Single-value requests send one raw body and cannot expand arrays.
    #[error("can't use an array body on a single-value request")]
    ArrayBodyNotAllowed,

    /// Header names must be HTTP tokens; values may not carry CR, LF or NUL.
    #[error("invalid header: {0}")]
    InvalidHeader(String),

    #[error("timeout duration needs to be more than 0")]
    InvalidTimeout,

    #[error("protocol {0:?} is not supported by this request method")]
    UnsupportedProtocol(String),

    #[error("invalid config: {0}")]
    InvalidConfig(#[from] serde_json::Error),

    #[error("invalid url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("empty body source")]
    EmptySource,

    #[error("body source {0:?} doesn't exist")]
    FileNotFound(PathBuf),

    #[error("body source {0:?} is not a file")]
    NotAFile(PathBuf),

    /// JSON bodies carry an object or an array.
    #[error("json body source must be an object or an array")]
    NotJsonContainer,

    #[error("number body source must be finite")]
    NonFiniteNumber,

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("tls: {0}")]
    Tls(#[from] rustls::Error),

    /// The server answered with a status other than 200 and non-200 answers
    /// were not accepted.
    #[error("response code = {0}")]
    HttpStatus(u16),

    #[error("http protocol: {0}")]
    Protocol(String),

    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("too many redirects")]
    TooManyRedirects,

    /// The connection does not carry a request body (non-HTTP schemes).
    #[error("protocol doesn't support output")]
    OutputNotSupported,

    /// The watchdog saw no I/O progress within the configured timeout.
    #[error("Timeout")]
    Timeout,

    /// The caller asked for the connection to be torn down.
    #[error("disconnected by request")]
    Disconnected,
}

pub type Result<T> = std::result::Result<T, NetworkError>;

impl From<ureq_proto::Error> for NetworkError {
    fn from(e: ureq_proto::Error) -> Self {
        NetworkError::Protocol(e.to_string())
    }
}

impl From<ureq_proto::http::Error> for NetworkError {
    fn from(e: ureq_proto::http::Error) -> Self {
        NetworkError::InvalidHeader(e.to_string())
    }
}

impl NetworkError {
    /// True for errors raised at the point of misuse, before any I/O.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            NetworkError::InvalidKey(_)
                | NetworkError::ArrayParameterKey(_)
                | NetworkError::ReservedProperty(_)
                | NetworkError::InvalidHeader(_)
                | NetworkError::Opening(_)
                | NetworkError::TooManyParameters
                | NetworkError::ArrayBodyNotAllowed
                | NetworkError::InvalidTimeout
                | NetworkError::UnsupportedProtocol(_)
                | NetworkError::InvalidUrl(_)
                | NetworkError::InvalidConfig(_)
        )
    }
}

//! HTTP-facing data types shared by the strategies, the transport and the
//! listener.
//!
//! # Design
//! Response headers are kept typed: the status and the declared length are
//! fields, and everything else the server sent is a case-preserving
//! multimap. `ResponseHeaders::to_json` renders the flat JSON object hosts
//! expect, with the synthesized `Response-Code` and `Content-Length` keys.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::ser::{Serialize, SerializeMap, Serializer};

pub const RESPONSE_CODE_KEY: &str = "Response-Code";
pub const CONTENT_LENGTH_KEY: &str = "Content-Length";

/// HTTP verb sent on the request line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
    Head,
}

impl HttpMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Head => "HEAD",
        }
    }
}

/// HTTP-only connection settings, filled in by a strategy's
/// `build_http_connection`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HttpSettings {
    pub method: HttpMethod,
    pub follow_redirects: bool,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            method: HttpMethod::Get,
            follow_redirects: true,
        }
    }
}

/// Headers of a finished response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseHeaders {
    response_code: Option<u16>,
    content_length: i64,
    fields: BTreeMap<String, Vec<String>>,
}

impl ResponseHeaders {
    pub fn new(response_code: Option<u16>, fields: BTreeMap<String, Vec<String>>) -> Self {
        let content_length = fields
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(CONTENT_LENGTH_KEY))
            .and_then(|(_, v)| v.first())
            .and_then(|v| v.trim().parse::<i64>().ok())
            .filter(|n| *n >= 0)
            .unwrap_or(-1);
        Self {
            response_code,
            content_length,
            fields,
        }
    }

    /// Status code; absent for non-HTTP connections.
    pub fn response_code(&self) -> Option<u16> {
        self.response_code
    }

    /// Declared body length, -1 if absent or unparseable.
    pub fn content_length(&self) -> i64 {
        self.content_length
    }

    /// All values of a header, matched case-insensitively.
    pub fn get(&self, name: &str) -> Option<&[String]> {
        self.fields
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_slice())
    }

    pub fn first(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(|v| v.first()).map(String::as_str)
    }

    pub fn fields(&self) -> &BTreeMap<String, Vec<String>> {
        &self.fields
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

impl Serialize for ResponseHeaders {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let synthesized = |k: &str| {
            k.eq_ignore_ascii_case(CONTENT_LENGTH_KEY) || k.eq_ignore_ascii_case(RESPONSE_CODE_KEY)
        };
        let mut map = serializer.serialize_map(None)?;
        for (k, v) in self.fields.iter().filter(|(k, _)| !synthesized(k)) {
            map.serialize_entry(k, v)?;
        }
        if let Some(code) = self.response_code {
            map.serialize_entry(RESPONSE_CODE_KEY, &code)?;
        }
        map.serialize_entry(CONTENT_LENGTH_KEY, &self.content_length)?;
        map.end()
    }
}

/// Where the response body ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseBody {
    /// Buffered in memory.
    Bytes(Vec<u8>),
    /// Streamed to the configured target file.
    File(PathBuf),
}

impl ResponseBody {
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            ResponseBody::Bytes(b) => Some(b),
            ResponseBody::File(_) => None,
        }
    }

    pub fn as_path(&self) -> Option<&Path> {
        match self {
            ResponseBody::File(p) => Some(p),
            ResponseBody::Bytes(_) => None,
        }
    }
}

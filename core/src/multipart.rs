//! `multipart/form-data` framing for POST bodies.
//!
//! # Design
//! Encoding is split in two. `MultipartEncoder::plan` turns the parameters
//! into a list of segments: pre-built byte blocks for every header, text
//! and JSON payload, and file references for file payloads. The exact body
//! length is known from the plan before a single byte is sent, so progress
//! can report a real total. The POST strategy then streams the segments,
//! copying files from disk in fixed-size chunks.

use std::path::PathBuf;

use crate::body::{Body, Source};
use crate::error::Result;
use crate::store::{sanitize_header_value, Parameters};

const BOUNDARY_MARKER: &str = "----UrlNetFormBoundary";
const CRLF: &str = "\r\n";

/// One contiguous piece of a planned body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Bytes(Vec<u8>),
    File { path: PathBuf, len: u64 },
}

impl Segment {
    pub fn len(&self) -> u64 {
        match self {
            Segment::Bytes(b) => b.len() as u64,
            Segment::File { len, .. } => *len,
        }
    }
}

/// A fully planned multipart body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Multipart {
    segments: Vec<Segment>,
    total: u64,
}

impl Multipart {
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Exact number of bytes the body occupies on the wire.
    pub fn total_len(&self) -> u64 {
        self.total
    }

    fn push_bytes(&mut self, bytes: impl Into<Vec<u8>>) {
        let bytes = bytes.into();
        self.total += bytes.len() as u64;
        match self.segments.last_mut() {
            Some(Segment::Bytes(prev)) => prev.extend_from_slice(&bytes),
            _ => self.segments.push(Segment::Bytes(bytes)),
        }
    }

    fn push_file(&mut self, path: PathBuf, len: u64) {
        self.total += len;
        self.segments.push(Segment::File { path, len });
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultipartEncoder {
    boundary: String,
}

impl Default for MultipartEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl MultipartEncoder {
    /// Encoder with a fresh random boundary.
    pub fn new() -> Self {
        Self::with_boundary(format!("{BOUNDARY_MARKER}{}", uuid::Uuid::new_v4().simple()))
    }

    pub fn with_boundary(boundary: impl Into<String>) -> Self {
        Self {
            boundary: boundary.into(),
        }
    }

    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    /// Value for the request's `Content-Type` header.
    pub fn content_type(&self) -> String {
        format!("multipart/form-data; boundary={}", self.boundary)
    }

    /// Lay out every parameter as a part. Array parameters become one
    /// `key[]` part per element. File sizes are read now.
    pub fn plan(&self, parameters: &Parameters) -> Result<Multipart> {
        let mut body = Multipart {
            segments: Vec::new(),
            total: 0,
        };
        for (key, value) in parameters {
            match value.items() {
                Some(items) => {
                    let name = format!("{key}[]");
                    for item in items {
                        self.part(&mut body, &name, item)?;
                    }
                }
                None => self.part(&mut body, key, value)?,
            }
        }
        body.push_bytes(format!("--{}--{CRLF}", self.boundary));
        Ok(body)
    }

    fn part(&self, body: &mut Multipart, name: &str, value: &Body) -> Result<()> {
        let name = sanitize_header_value(name);
        let mut head = format!("--{}{CRLF}Content-Disposition: form-data; name=\"{name}\"", self.boundary);
        match value.source() {
            Source::File(file) => {
                head.push_str(&format!(
                    "; fileName=\"{}\"{CRLF}",
                    sanitize_header_value(&file.file_name())
                ));
                if let Some(content_type) = file.content_type() {
                    head.push_str(&format!("Content-Type: {content_type}{CRLF}"));
                }
                head.push_str(&format!("Content-Transfer-Encoding: binary{CRLF}{CRLF}"));
                body.push_bytes(head);
                body.push_file(file.path().to_path_buf(), file.len()?);
                body.push_bytes(CRLF);
            }
            Source::Json(json) => {
                head.push_str(&format!("{CRLF}Content-Type: application/json{CRLF}{CRLF}"));
                body.push_bytes(head);
                body.push_bytes(format!("{json}{CRLF}"));
            }
            _ => {
                head.push_str(CRLF);
                if let Some(content_type) = value.content_type() {
                    head.push_str(&format!("Content-Type: {content_type}; charset=UTF-8{CRLF}"));
                }
                head.push_str(CRLF);
                body.push_bytes(head);
                body.push_bytes(format!("{value}{CRLF}"));
            }
        }
        Ok(())
    }
}

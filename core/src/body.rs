//! Typed request-parameter payloads.
//!
//! # Design
//! A `Body` wraps a private `Source` so the invariants established at
//! construction stay true for its whole life: strings are trimmed, files
//! exist and carry a probed content type, JSON is an object or an array, and
//! arrays are flat and non-empty. Callers read the payload back through
//! `Body::source`, but can only build one through the constructors below.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use serde_json::{Number, Value};

use crate::error::{NetworkError, Result};
use crate::sniff;

/// Discriminant of a `Body`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BodyType {
    String,
    Number,
    Json,
    File,
    Array,
}

impl BodyType {
    /// String and number payloads serialize to a single text value.
    pub fn is_scalar(self) -> bool {
        matches!(self, BodyType::String | BodyType::Number)
    }

    /// File and JSON payloads need their own multipart section.
    pub fn is_structured(self) -> bool {
        matches!(self, BodyType::File | BodyType::Json)
    }
}

/// A local file used as a payload. The path is absolute and was a regular
/// file when the body was built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileBody {
    path: PathBuf,
    content_type: Option<String>,
}

impl FileBody {
    fn open(path: &Path) -> Result<Self> {
        let metadata = match std::fs::metadata(path) {
            Ok(m) => m,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(NetworkError::FileNotFound(path.to_path_buf()))
            }
            Err(e) => return Err(e.into()),
        };
        if !metadata.is_file() {
            return Err(NetworkError::NotAFile(path.to_path_buf()));
        }
        let path = std::path::absolute(path)?;
        let content_type = sniff::probe(&path)?;
        Ok(Self { path, content_type })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Final path component, lossily converted to UTF-8.
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    /// Current size on disk. Read at send time, not cached.
    pub fn len(&self) -> io::Result<u64> {
        Ok(std::fs::metadata(&self.path)?.len())
    }
}

/// Read-only view of a body's payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Source {
    String(String),
    Number(Number),
    Json(Value),
    File(FileBody),
    Array(Vec<Body>),
}

/// A request parameter value.
#[derive(Debug, Clone, PartialEq)]
pub struct Body(Source);

impl Body {
    /// Text payload. Leading and trailing whitespace is removed.
    pub fn string(source: impl AsRef<str>) -> Self {
        Body(Source::String(source.as_ref().trim().to_string()))
    }

    pub fn number(source: impl Into<Number>) -> Self {
        Body(Source::Number(source.into()))
    }

    /// Floating-point payload. NaN and infinities have no text form.
    pub fn float(source: f64) -> Result<Self> {
        Number::from_f64(source)
            .map(|n| Body(Source::Number(n)))
            .ok_or(NetworkError::NonFiniteNumber)
    }

    pub fn json(source: Value) -> Result<Self> {
        match source {
            Value::Null => Err(NetworkError::EmptySource),
            Value::Object(_) | Value::Array(_) => Ok(Body(Source::Json(source))),
            _ => Err(NetworkError::NotJsonContainer),
        }
    }

    /// File payload. Fails if `path` does not exist or is not a regular file.
    pub fn file(path: impl AsRef<Path>) -> Result<Self> {
        FileBody::open(path.as_ref()).map(|f| Body(Source::File(f)))
    }

    /// Array payload. Nested arrays are inlined in argument order; an array
    /// that flattens to nothing is rejected.
    pub fn array(items: impl IntoIterator<Item = Body>) -> Result<Self> {
        let mut flat = Vec::new();
        for item in items {
            match item.0 {
                Source::Array(inner) => flat.extend(inner),
                other => flat.push(Body(other)),
            }
        }
        if flat.is_empty() {
            return Err(NetworkError::EmptySource);
        }
        Ok(Body(Source::Array(flat)))
    }

    pub fn source(&self) -> &Source {
        &self.0
    }

    pub fn body_type(&self) -> BodyType {
        match self.0 {
            Source::String(_) => BodyType::String,
            Source::Number(_) => BodyType::Number,
            Source::Json(_) => BodyType::Json,
            Source::File(_) => BodyType::File,
            Source::Array(_) => BodyType::Array,
        }
    }

    /// MIME type of the payload. Files whose type could not be probed have
    /// none; arrays report the `*/*` wildcard.
    pub fn content_type(&self) -> Option<&str> {
        match &self.0 {
            Source::String(_) | Source::Number(_) => Some("text/plain"),
            Source::Json(_) => Some("application/json"),
            Source::File(f) => f.content_type(),
            Source::Array(_) => Some("*/*"),
        }
    }

    /// Array elements, or `None` for non-array bodies.
    pub fn items(&self) -> Option<&[Body]> {
        match &self.0 {
            Source::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_file(&self) -> Option<&FileBody> {
        match &self.0 {
            Source::File(f) => Some(f),
            _ => None,
        }
    }

    /// True if this body, or any element of it, needs a multipart section.
    pub fn requires_multipart(&self) -> bool {
        match &self.0 {
            Source::Array(items) => items.iter().any(Body::requires_multipart),
            _ => self.body_type().is_structured(),
        }
    }
}

impl fmt::Display for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Source::String(s) => f.write_str(s),
            Source::Number(n) => write!(f, "{n}"),
            Source::Json(v) => write!(f, "{v}"),
            Source::File(file) => write!(f, "{}", file.path.display()),
            Source::Array(items) => {
                let texts: Vec<Value> = items.iter().map(|b| Value::String(b.to_string())).collect();
                write!(f, "{}", Value::Array(texts))
            }
        }
    }
}

impl From<&str> for Body {
    fn from(s: &str) -> Self {
        Body::string(s)
    }
}

impl From<String> for Body {
    fn from(s: String) -> Self {
        Body::string(s)
    }
}

impl From<i64> for Body {
    fn from(n: i64) -> Self {
        Body::number(n)
    }
}

impl From<u64> for Body {
    fn from(n: u64) -> Self {
        Body::number(n)
    }
}

//! Parameter, property and cookie stores.
//!
//! # Design
//! Each store owns its map behind its own mutex and shares one
//! `OpeningFlag` with the request that created it. Every mutation checks the
//! flag while holding the store's lock, so configuration is frozen for the
//! whole time a request is opening while reads stay available. Nothing
//! outside this module touches the maps directly; the orchestrator works on
//! snapshots.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use ureq_proto::http::{HeaderName, HeaderValue};

use crate::body::Body;
use crate::error::{NetworkError, Result};

pub const USER_AGENT: &str = "User-Agent";
pub const AUTHORIZATION: &str = "Authorization";
pub const COOKIE: &str = "Cookie";
pub const CONTENT_TYPE: &str = "Content-Type";
pub const CONTENT_DISPOSITION: &str = "Content-Disposition";

/// Parameters as handed to a method strategy: sorted by key.
pub type Parameters = BTreeMap<String, Body>;

/// Shared "request is opening" flag, tagged with the request URL for error
/// messages.
#[derive(Debug, Clone)]
pub struct OpeningFlag {
    flag: Arc<AtomicBool>,
    url: Arc<str>,
}

impl OpeningFlag {
    pub fn new(url: &str) -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            url: Arc::from(url),
        }
    }

    pub fn is_set(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    pub fn ensure_idle(&self) -> Result<()> {
        if self.is_set() {
            return Err(self.error());
        }
        Ok(())
    }

    /// Flip idle to opening. The returned guard flips it back on drop.
    pub fn begin(&self) -> Result<OpeningGuard> {
        self.flag
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| self.error())?;
        Ok(OpeningGuard { flag: self.flag.clone() })
    }

    fn error(&self) -> NetworkError {
        NetworkError::Opening(self.url.to_string())
    }
}

#[derive(Debug)]
pub struct OpeningGuard {
    flag: Arc<AtomicBool>,
}

impl Drop for OpeningGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// A string-keyed map guarded by a key policy and the opening flag.
#[derive(Debug)]
pub struct Store<V> {
    entries: Mutex<BTreeMap<String, V>>,
    opening: OpeningFlag,
    validate: fn(&str) -> Result<()>,
}

impl<V: Clone> Store<V> {
    fn new(opening: OpeningFlag, validate: fn(&str) -> Result<()>) -> Self {
        Self {
            entries: Mutex::new(BTreeMap::new()),
            opening,
            validate,
        }
    }

    pub fn get(&self, key: &str) -> Result<Option<V>> {
        (self.validate)(key)?;
        Ok(self.entries.lock().get(key).cloned())
    }

    /// Insert or replace `key`. `None` removes it.
    pub fn set(&self, key: &str, value: Option<V>) -> Result<()> {
        self.set_checked(key, value, |_, _, _| Ok(()))
    }

    /// Like `set`, but `check` sees the current entries under the lock and
    /// may veto the insertion. Removal is never vetoed.
    pub fn set_checked<F>(&self, key: &str, value: Option<V>, check: F) -> Result<()>
    where
        F: FnOnce(&BTreeMap<String, V>, &str, &V) -> Result<()>,
    {
        (self.validate)(key)?;
        let mut entries = self.entries.lock();
        self.opening.ensure_idle()?;
        match value {
            Some(v) => {
                check(&entries, key, &v)?;
                entries.insert(key.to_string(), v);
            }
            None => {
                entries.remove(key);
            }
        }
        Ok(())
    }

    pub fn remove(&self, key: &str) -> Result<Option<V>> {
        (self.validate)(key)?;
        let mut entries = self.entries.lock();
        self.opening.ensure_idle()?;
        Ok(entries.remove(key))
    }

    pub fn clear(&self) -> Result<()> {
        let mut entries = self.entries.lock();
        self.opening.ensure_idle()?;
        entries.clear();
        Ok(())
    }

    pub fn snapshot(&self) -> BTreeMap<String, V> {
        self.entries.lock().clone()
    }

    pub fn keys(&self) -> Vec<String> {
        self.entries.lock().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

pub type ParameterStore = Store<Body>;
pub type PropertyStore = Store<String>;
pub type CookieStore = Store<String>;

pub fn parameter_store(opening: OpeningFlag) -> ParameterStore {
    Store::new(opening, validate_parameter_key)
}

pub fn property_store(opening: OpeningFlag) -> PropertyStore {
    Store::new(opening, validate_property_key)
}

pub fn cookie_store(opening: OpeningFlag) -> CookieStore {
    Store::new(opening, validate_cookie_key)
}

pub fn validate_parameter_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(NetworkError::InvalidKey("parameter"));
    }
    if key.contains(|c| c == '[' || c == ']') {
        return Err(NetworkError::ArrayParameterKey(key.to_string()));
    }
    Ok(())
}

pub fn validate_property_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(NetworkError::InvalidKey("property"));
    }
    if HeaderName::from_bytes(key.as_bytes()).is_err() {
        return Err(NetworkError::InvalidHeader(format!("{key:?} is not a header name")));
    }
    for reserved in [COOKIE, CONTENT_TYPE, CONTENT_DISPOSITION] {
        if key.eq_ignore_ascii_case(reserved) {
            return Err(NetworkError::ReservedProperty(reserved));
        }
    }
    Ok(())
}

/// Header values may hold any byte but controls other than tab; CR, LF and
/// NUL in particular would split the header line.
pub fn validate_property_value(value: &str) -> Result<()> {
    if HeaderValue::from_bytes(value.as_bytes()).is_err() {
        return Err(NetworkError::InvalidHeader(format!("{value:?} is not a header value")));
    }
    Ok(())
}

pub fn validate_cookie_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(NetworkError::InvalidKey("cookie"));
    }
    Ok(())
}

/// `application/x-www-form-urlencoded` component encoding.
pub fn encode(s: &str) -> String {
    url::form_urlencoded::byte_serialize(s.as_bytes()).collect()
}

/// `key=value` pairs joined with `&`. Array values repeat `key[]` once per
/// element.
pub fn parameters_string(parameters: &Parameters) -> String {
    let mut pairs = Vec::new();
    for (key, body) in parameters {
        match body.items() {
            Some(items) => {
                let array_key = encode(&format!("{key}[]"));
                for item in items {
                    pairs.push(format!("{array_key}={}", encode(&item.to_string())));
                }
            }
            None => pairs.push(format!("{}={}", encode(key), encode(&body.to_string()))),
        }
    }
    pairs.join("&")
}

/// Value of the `Cookie` request header.
pub fn cookies_string(cookies: &BTreeMap<String, String>) -> String {
    cookies
        .iter()
        .map(|(k, v)| format!("{}={}", encode(k), encode(v)))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Strip characters that would break a quoted header parameter.
pub fn sanitize_header_value(s: &str) -> String {
    s.chars().filter(|c| !matches!(c, '"' | '\'' | '\n' | '\r')).collect()
}

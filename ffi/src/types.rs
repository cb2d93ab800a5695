//! `#[repr(C)]` types for the FFI boundary.
//!
//! # Design
//! Each type mirrors a core type with a C-compatible representation:
//! request kinds and outcomes become enums with explicit discriminants, and
//! the listener becomes a struct of nullable function pointers plus an
//! opaque `user_data` pointer handed back on every call.

use std::ffi::{c_void, CString};
use std::os::raw::c_char;

use urlnet_core::{NetworkError, NetworkListener, NetworkRequest, RequestKind, ResponseBody, ResponseHeaders};

/// Opaque handle to a `NetworkRequest`. C callers receive a pointer to this
/// and pass it back into every FFI function. `urlnet_open` and
/// `urlnet_attempt_disconnect` may be called from different threads on the
/// same handle.
pub struct FfiNetworkRequest {
    pub(crate) inner: NetworkRequest,
}

/// Request kind as a C enum.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FfiRequestKind {
    Get = 0,
    Post = 1,
    Put = 2,
    SinglePost = 3,
    Delete = 4,
    Head = 5,
}

impl From<FfiRequestKind> for RequestKind {
    fn from(kind: FfiRequestKind) -> Self {
        match kind {
            FfiRequestKind::Get => RequestKind::Get,
            FfiRequestKind::Post => RequestKind::Post,
            FfiRequestKind::Put => RequestKind::Put,
            FfiRequestKind::SinglePost => RequestKind::SinglePost,
            FfiRequestKind::Delete => RequestKind::Delete,
            FfiRequestKind::Head => RequestKind::Head,
        }
    }
}

/// Outcome of every fallible FFI call.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FfiStatus {
    Ok = 0,
    NullArg = 1,
    /// Bad key, reserved or malformed header, invalid timeout, unsupported
    /// protocol.
    InvalidArgument = 2,
    /// The value could not become a body (missing file, bad JSON, ...).
    InvalidBody = 3,
    /// The request is opening; configuration is frozen.
    Opening = 4,
    Transport = 5,
    /// The server answered with a status other than 200.
    HttpStatus = 6,
    Timeout = 7,
    Disconnected = 8,
    Panic = 9,
}

impl From<&NetworkError> for FfiStatus {
    fn from(err: &NetworkError) -> Self {
        match err {
            NetworkError::Opening(_) => FfiStatus::Opening,
            NetworkError::EmptySource
            | NetworkError::FileNotFound(_)
            | NetworkError::NotAFile(_)
            | NetworkError::NotJsonContainer
            | NetworkError::NonFiniteNumber => FfiStatus::InvalidBody,
            NetworkError::HttpStatus(_) => FfiStatus::HttpStatus,
            NetworkError::Timeout => FfiStatus::Timeout,
            NetworkError::Disconnected => FfiStatus::Disconnected,
            e if e.is_configuration() => FfiStatus::InvalidArgument,
            _ => FfiStatus::Transport,
        }
    }
}

impl<T> From<Result<T, NetworkError>> for FfiStatus {
    fn from(result: Result<T, NetworkError>) -> Self {
        match result {
            Ok(_) => FfiStatus::Ok,
            Err(e) => FfiStatus::from(&e),
        }
    }
}

/// Listener callbacks. Any pointer may be null. Callbacks can run on the
/// thread that called `urlnet_open` or on the watchdog thread.
///
/// `on_finished` receives the response headers as a JSON object and the
/// in-memory result bytes; both are null on failure, and the bytes are
/// null when the result went to a target file. Neither pointer outlives
/// the call.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct FfiListener {
    pub user_data: *mut c_void,
    pub on_started: Option<extern "C" fn(user_data: *mut c_void)>,
    pub on_running: Option<extern "C" fn(user_data: *mut c_void, receiving: bool, current: i64, total: i64)>,
    pub on_failed: Option<extern "C" fn(user_data: *mut c_void, message: *const c_char, attempted_disconnect: bool)>,
    pub on_finished: Option<
        extern "C" fn(user_data: *mut c_void, headers_json: *const c_char, result: *const u8, result_len: usize),
    >,
}

/// Adapts an `FfiListener` to the core trait.
pub(crate) struct CListener(pub(crate) FfiListener);

// The C caller guarantees `user_data` may be used from any thread.
unsafe impl Send for CListener {}
unsafe impl Sync for CListener {}

impl NetworkListener for CListener {
    fn on_started(&self) {
        if let Some(f) = self.0.on_started {
            f(self.0.user_data);
        }
    }

    fn on_running(&self, receiving: bool, current: i64, total: i64) {
        if let Some(f) = self.0.on_running {
            f(self.0.user_data, receiving, current, total);
        }
    }

    fn on_failed(&self, message: &str, attempted_disconnect: bool) {
        if let Some(f) = self.0.on_failed {
            let message = to_c_string(message);
            f(self.0.user_data, message.as_ptr(), attempted_disconnect);
        }
    }

    fn on_finished(&self, headers: Option<&ResponseHeaders>, result: Option<&ResponseBody>) {
        let Some(f) = self.0.on_finished else {
            return;
        };
        let headers = headers.map(|h| to_c_string(&h.to_json().to_string()));
        let bytes = result.and_then(ResponseBody::as_bytes);
        f(
            self.0.user_data,
            headers.as_ref().map_or(std::ptr::null(), |h| h.as_ptr()),
            bytes.map_or(std::ptr::null(), <[u8]>::as_ptr),
            bytes.map_or(0, <[u8]>::len),
        );
    }
}

/// `CString` that drops interior NUL bytes instead of failing.
pub(crate) fn to_c_string(s: &str) -> CString {
    CString::new(s.replace('\0', "")).unwrap_or_default()
}

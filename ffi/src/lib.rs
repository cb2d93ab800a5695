//! C-ABI wrapper around `urlnet-core`.
//!
//! # Overview
//! Exposes the blocking request engine through `extern "C"` functions so any
//! language with a C FFI can configure a request, open it, and read back
//! the result without linking against Rust types.
//!
//! # Design
//! - Every `extern "C"` function wraps its body in `catch_unwind` so panics
//!   never cross the FFI boundary.
//! - Setters return an `FfiStatus`; a null `value` removes the entry.
//! - The C caller owns all returned pointers and must call the matching
//!   `urlnet_free_*` function to release them.

pub mod types;

use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use urlnet_core::NetworkRequest;

use types::*;

/// Borrow a C string as UTF-8. `None` for null or invalid UTF-8.
unsafe fn str_arg<'a>(ptr: *const c_char) -> Option<&'a str> {
    if ptr.is_null() {
        return None;
    }
    unsafe { CStr::from_ptr(ptr) }.to_str().ok()
}

/// Run `f` against a live request handle, mapping null handles, null keys
/// and panics to a status.
fn with_request(
    request: *const FfiNetworkRequest,
    f: impl FnOnce(&NetworkRequest) -> FfiStatus,
) -> FfiStatus {
    if request.is_null() {
        return FfiStatus::NullArg;
    }
    let request = unsafe { &*request };
    catch_unwind(AssertUnwindSafe(|| f(&request.inner))).unwrap_or(FfiStatus::Panic)
}

// ---------------------------------------------------------------------------
// Request lifecycle
// ---------------------------------------------------------------------------

/// Create a request of `kind` for `url`.
///
/// Returns null if `url` is null, fails to parse, or names a scheme the
/// request kind does not support. The caller must free the returned pointer
/// with `urlnet_request_free`.
#[unsafe(no_mangle)]
pub extern "C" fn urlnet_request_new(kind: FfiRequestKind, url: *const c_char) -> *mut FfiNetworkRequest {
    catch_unwind(|| {
        let Some(url) = (unsafe { str_arg(url) }) else {
            return std::ptr::null_mut();
        };
        match NetworkRequest::new(kind.into(), url) {
            Ok(inner) => Box::into_raw(Box::new(FfiNetworkRequest { inner })),
            Err(_) => std::ptr::null_mut(),
        }
    })
    .unwrap_or(std::ptr::null_mut())
}

/// Free a request created by `urlnet_request_new`. Safe to call with null.
/// The request must not be opening on another thread.
#[unsafe(no_mangle)]
pub extern "C" fn urlnet_request_free(request: *mut FfiNetworkRequest) {
    if !request.is_null() {
        let _ = catch_unwind(AssertUnwindSafe(|| {
            drop(unsafe { Box::from_raw(request) });
        }));
    }
}

/// Send the request and block until it finishes, fails, times out, or is
/// disconnected. Listener callbacks run before this returns.
#[unsafe(no_mangle)]
pub extern "C" fn urlnet_open(request: *const FfiNetworkRequest) -> FfiStatus {
    with_request(request, |r| r.open().into())
}

/// Ask an in-flight `urlnet_open` on another thread to abort. No-op when the
/// request is idle.
#[unsafe(no_mangle)]
pub extern "C" fn urlnet_attempt_disconnect(request: *const FfiNetworkRequest) -> FfiStatus {
    with_request(request, |r| {
        r.attempt_disconnect();
        FfiStatus::Ok
    })
}

// ---------------------------------------------------------------------------
// Parameters
// ---------------------------------------------------------------------------

/// Set a string parameter. A null `value` removes it.
#[unsafe(no_mangle)]
pub extern "C" fn urlnet_set_parameter_string(
    request: *const FfiNetworkRequest,
    key: *const c_char,
    value: *const c_char,
) -> FfiStatus {
    with_request(request, |r| {
        let Some(key) = (unsafe { str_arg(key) }) else {
            return FfiStatus::NullArg;
        };
        if value.is_null() {
            return r.set_string_parameter(key, None).into();
        }
        match unsafe { str_arg(value) } {
            Some(value) => r.set_string_parameter(key, Some(value)).into(),
            None => FfiStatus::InvalidArgument,
        }
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn urlnet_set_parameter_number(
    request: *const FfiNetworkRequest,
    key: *const c_char,
    value: i64,
) -> FfiStatus {
    with_request(request, |r| match unsafe { str_arg(key) } {
        Some(key) => r.set_number_parameter(key, Some(value)).into(),
        None => FfiStatus::NullArg,
    })
}

/// Set a file parameter from a path. A null `path` removes it. The file
/// must exist when this is called.
#[unsafe(no_mangle)]
pub extern "C" fn urlnet_set_parameter_file(
    request: *const FfiNetworkRequest,
    key: *const c_char,
    path: *const c_char,
) -> FfiStatus {
    with_request(request, |r| {
        let Some(key) = (unsafe { str_arg(key) }) else {
            return FfiStatus::NullArg;
        };
        if path.is_null() {
            return r.set_file_parameter(key, None).into();
        }
        match unsafe { str_arg(path) } {
            Some(path) => r.set_file_parameter(key, Some(Path::new(path))).into(),
            None => FfiStatus::InvalidArgument,
        }
    })
}

/// Set a JSON parameter from its text. The text must parse to an object or
/// an array. A null `json` removes it.
#[unsafe(no_mangle)]
pub extern "C" fn urlnet_set_parameter_json(
    request: *const FfiNetworkRequest,
    key: *const c_char,
    json: *const c_char,
) -> FfiStatus {
    with_request(request, |r| {
        let Some(key) = (unsafe { str_arg(key) }) else {
            return FfiStatus::NullArg;
        };
        if json.is_null() {
            return r.set_json_parameter(key, None).into();
        }
        let Some(text) = (unsafe { str_arg(json) }) else {
            return FfiStatus::InvalidArgument;
        };
        match serde_json::from_str(text) {
            Ok(value) => r.set_json_parameter(key, Some(value)).into(),
            Err(_) => FfiStatus::InvalidBody,
        }
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn urlnet_remove_parameter(request: *const FfiNetworkRequest, key: *const c_char) -> FfiStatus {
    with_request(request, |r| match unsafe { str_arg(key) } {
        Some(key) => r.remove_parameter(key).into(),
        None => FfiStatus::NullArg,
    })
}

// ---------------------------------------------------------------------------
// Properties, cookies and settings
// ---------------------------------------------------------------------------

/// Set a request header. A null `value` removes it. `Cookie`,
/// `Content-Type` and `Content-Disposition` are rejected.
#[unsafe(no_mangle)]
pub extern "C" fn urlnet_set_property(
    request: *const FfiNetworkRequest,
    key: *const c_char,
    value: *const c_char,
) -> FfiStatus {
    with_request(request, |r| {
        let Some(key) = (unsafe { str_arg(key) }) else {
            return FfiStatus::NullArg;
        };
        if value.is_null() {
            return r.set_property(key, None).into();
        }
        match unsafe { str_arg(value) } {
            Some(value) => r.set_property(key, Some(value)).into(),
            None => FfiStatus::InvalidArgument,
        }
    })
}

/// Set a cookie. A null `value` removes it.
#[unsafe(no_mangle)]
pub extern "C" fn urlnet_set_cookie(
    request: *const FfiNetworkRequest,
    key: *const c_char,
    value: *const c_char,
) -> FfiStatus {
    with_request(request, |r| {
        let Some(key) = (unsafe { str_arg(key) }) else {
            return FfiStatus::NullArg;
        };
        if value.is_null() {
            return r.set_cookie(key, None).into();
        }
        match unsafe { str_arg(value) } {
            Some(value) => r.set_cookie(key, Some(value)).into(),
            None => FfiStatus::InvalidArgument,
        }
    })
}

/// Set the stall timeout in milliseconds. Zero is rejected.
#[unsafe(no_mangle)]
pub extern "C" fn urlnet_set_timeout(request: *const FfiNetworkRequest, millis: u64) -> FfiStatus {
    with_request(request, |r| r.set_timeout(Duration::from_millis(millis)).into())
}

#[unsafe(no_mangle)]
pub extern "C" fn urlnet_set_accept_non_200(request: *const FfiNetworkRequest, accept: bool) -> FfiStatus {
    with_request(request, |r| r.set_accept_non_200(accept).into())
}

/// Stream the response body to `path` instead of memory. A null `path`
/// switches back to memory.
#[unsafe(no_mangle)]
pub extern "C" fn urlnet_set_target_file(request: *const FfiNetworkRequest, path: *const c_char) -> FfiStatus {
    with_request(request, |r| {
        if path.is_null() {
            return r.set_target_file(None).into();
        }
        match unsafe { str_arg(path) } {
            Some(path) => r.set_target_file(Some(PathBuf::from(path))).into(),
            None => FfiStatus::InvalidArgument,
        }
    })
}

/// Install listener callbacks. The struct is copied; a null `listener`
/// removes the current one.
#[unsafe(no_mangle)]
pub extern "C" fn urlnet_set_listener(
    request: *const FfiNetworkRequest,
    listener: *const FfiListener,
) -> FfiStatus {
    with_request(request, |r| {
        if listener.is_null() {
            return r.set_listener(None).into();
        }
        let listener = unsafe { *listener };
        r.set_listener(Some(Arc::new(CListener(listener)))).into()
    })
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// Copy the in-memory result of the last successful open.
///
/// Returns null (and writes 0 to `out_len`) when there is no result or it
/// was written to a target file. Free with `urlnet_free_bytes`.
#[unsafe(no_mangle)]
pub extern "C" fn urlnet_result_bytes(request: *const FfiNetworkRequest, out_len: *mut usize) -> *mut u8 {
    if request.is_null() || out_len.is_null() {
        return std::ptr::null_mut();
    }
    catch_unwind(AssertUnwindSafe(|| {
        let request = unsafe { &*request };
        let bytes = request.inner.result().and_then(|r| r.as_bytes().map(<[u8]>::to_vec));
        let Some(bytes) = bytes else {
            unsafe { *out_len = 0 };
            return std::ptr::null_mut();
        };
        let boxed = bytes.into_boxed_slice();
        unsafe { *out_len = boxed.len() };
        Box::into_raw(boxed).cast::<u8>()
    }))
    .unwrap_or(std::ptr::null_mut())
}

/// Response headers of the last open as a JSON object, with the status
/// under `"Response-Code"`. Null when no response was received. Free with
/// `urlnet_free_string`.
#[unsafe(no_mangle)]
pub extern "C" fn urlnet_result_header_json(request: *const FfiNetworkRequest) -> *mut c_char {
    if request.is_null() {
        return std::ptr::null_mut();
    }
    catch_unwind(AssertUnwindSafe(|| {
        let request = unsafe { &*request };
        match request.inner.result_header() {
            Some(headers) => to_c_string(&headers.to_json().to_string()).into_raw(),
            None => std::ptr::null_mut(),
        }
    }))
    .unwrap_or(std::ptr::null_mut())
}

// ---------------------------------------------------------------------------
// Free functions
// ---------------------------------------------------------------------------

/// Free bytes returned by `urlnet_result_bytes`. `len` must be the length
/// written to `out_len`. Safe to call with null.
#[unsafe(no_mangle)]
pub extern "C" fn urlnet_free_bytes(ptr: *mut u8, len: usize) {
    if !ptr.is_null() {
        let _ = catch_unwind(|| {
            drop(unsafe { Box::from_raw(std::ptr::slice_from_raw_parts_mut(ptr, len)) });
        });
    }
}

/// Free a string returned by this library. Safe to call with null.
#[unsafe(no_mangle)]
pub extern "C" fn urlnet_free_string(ptr: *mut c_char) {
    if !ptr.is_null() {
        let _ = catch_unwind(|| {
            drop(unsafe { CString::from_raw(ptr) });
        });
    }
}

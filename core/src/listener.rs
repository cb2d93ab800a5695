//! Listener callbacks and the panic-isolating notifier that invokes them.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use crate::http::{ResponseBody, ResponseHeaders};

/// Observer of one `open()` invocation. Callbacks may run on the watchdog
/// thread as well as the caller's thread.
///
/// `on_finished` is called exactly once per invocation and is the only
/// completion signal a caller needs.
pub trait NetworkListener: Send + Sync {
    fn on_started(&self) {}

    /// Progress during send (`receiving == false`) and receive. `total_bytes`
    /// is -1 when the size is not known in advance.
    fn on_running(&self, _receiving: bool, _current_bytes: i64, _total_bytes: i64) {}

    fn on_failed(&self, _message: &str, _attempted_disconnect: bool) {}

    fn on_finished(&self, _headers: Option<&ResponseHeaders>, _result: Option<&ResponseBody>) {}
}

/// Invokes an optional listener, swallowing and logging any panic.
#[derive(Clone, Default)]
pub struct Notifier {
    listener: Option<Arc<dyn NetworkListener>>,
}

impl Notifier {
    pub fn new(listener: Option<Arc<dyn NetworkListener>>) -> Self {
        Self { listener }
    }

    pub fn started(&self) {
        self.call("on_started", |l| l.on_started());
    }

    pub fn running(&self, receiving: bool, current: i64, total: i64) {
        self.call("on_running", |l| l.on_running(receiving, current, total));
    }

    pub fn failed(&self, message: &str, attempted_disconnect: bool) {
        self.call("on_failed", |l| l.on_failed(message, attempted_disconnect));
    }

    pub fn finished(&self, headers: Option<&ResponseHeaders>, result: Option<&ResponseBody>) {
        self.call("on_finished", |l| l.on_finished(headers, result));
    }

    fn call(&self, callback: &'static str, f: impl FnOnce(&dyn NetworkListener)) {
        let Some(listener) = &self.listener else {
            return;
        };
        if catch_unwind(AssertUnwindSafe(|| f(listener.as_ref()))).is_err() {
            tracing::warn!(callback, "listener panicked; ignoring");
        }
    }
}

impl std::fmt::Debug for Notifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notifier")
            .field("listener", &self.listener.is_some())
            .finish()
    }
}

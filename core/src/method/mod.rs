//! Request kinds and the strategy contract they implement.
//!
//! # Design
//! `NetworkRequest` runs one lifecycle for every kind of request. What
//! differs between GET, POST, PUT and friends is captured by four hooks on
//! `RequestMethod`: build the connection, configure the HTTP verb and
//! redirect policy, stream the request body, and stream the response body.
//! Byte counts travel between the send and receive hooks as a `Progress`
//! value rather than living in shared mutable state.

use std::fmt;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use std::cell::Cell;

use parking_lot::ReentrantMutex;
use url::Url;

use crate::body::Body;
use crate::config::BUFFER_SIZE;
use crate::connection::{Connection, RequestBody};
use crate::error::Result;
use crate::http::{HttpSettings, ResponseHeaders};
use crate::listener::Notifier;
use crate::store::Parameters;
use crate::watchdog::ActivityCounter;

mod post;
mod query;
mod single;

pub use post::PostMethod;
pub use query::QueryMethod;
pub use single::SingleValueMethod;

/// Cumulative transfer counters. `total` is -1 while the size is unknown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub current: i64,
    pub total: i64,
}

impl Progress {
    pub const NONE: Progress = Progress { current: 0, total: 0 };

    pub fn with_total(total: u64) -> Self {
        Self {
            current: 0,
            total: i64::try_from(total).unwrap_or(i64::MAX),
        }
    }

    fn advance(&mut self, n: usize) {
        self.current = self.current.saturating_add(n as i64);
    }
}

/// Abort flag that progress reports are serialized against. Once `abort`
/// returns, no further progress reaches the listener. Reentrant so a
/// listener may abort from inside its own progress callback.
#[derive(Debug, Default)]
pub struct AbortGate {
    aborted: ReentrantMutex<Cell<bool>>,
}

impl AbortGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Close the gate, waiting out a report that is already running.
    pub fn abort(&self) {
        self.aborted.lock().set(true);
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.lock().get()
    }

    fn pass(&self, f: impl FnOnce()) {
        let aborted = self.aborted.lock();
        if !aborted.get() {
            f();
        }
    }
}

/// What a strategy may touch while streaming: the listener and the
/// watchdog's activity counter.
pub struct IoContext<'a> {
    notifier: &'a Notifier,
    activity: &'a ActivityCounter,
    gate: &'a AbortGate,
}

impl<'a> IoContext<'a> {
    pub fn new(notifier: &'a Notifier, activity: &'a ActivityCounter, gate: &'a AbortGate) -> Self {
        Self {
            notifier,
            activity,
            gate,
        }
    }

    /// Record forward I/O progress.
    pub fn touch(&self) {
        self.activity.reset();
    }

    /// Forward progress to the listener. Silent once the request was
    /// aborted by the watchdog or a disconnect.
    pub fn report(&self, receiving: bool, progress: Progress) {
        self.gate.pass(|| {
            tracing::trace!(receiving, current = progress.current, total = progress.total, "progress");
            self.notifier.running(receiving, progress.current, progress.total);
        });
    }
}

/// The per-kind hooks of the request lifecycle.
pub trait RequestMethod: Send + Sync + fmt::Debug {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Create the connection for `url` and set its I/O flags and any
    /// body-related headers.
    fn build_connection(&self, url: &Url, parameters: &Parameters) -> Result<Connection>;

    /// Pick the verb and redirect policy. Only called for HTTP(S).
    fn build_http_connection(&self, http: &mut HttpSettings);

    /// Stream the request body. Only called when the connection has output
    /// enabled. Returns the counters after the last byte.
    fn do_send_connection(
        &self,
        ctx: &IoContext<'_>,
        parameters: &Parameters,
        output: &mut RequestBody<'_>,
    ) -> Result<Progress>;

    /// Copy the response body from `input` to `output`, reporting progress
    /// on top of what was sent.
    fn do_receive_connection(
        &self,
        ctx: &IoContext<'_>,
        sent: Progress,
        headers: &ResponseHeaders,
        input: &mut dyn Read,
        output: &mut dyn Write,
    ) -> Result<Progress> {
        receive_body(ctx, sent, headers, input, output)
    }

    /// Whether schemes other than http/https may be used.
    fn supports_non_http_protocol(&self) -> bool {
        false
    }

    /// Veto a parameter before it is stored. `existing` holds the current
    /// parameters.
    fn check_parameter(&self, _existing: &Parameters, _key: &str, _value: &Body) -> Result<()> {
        Ok(())
    }
}

/// Built-in request kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    Get,
    Post,
    Put,
    /// POST carrying exactly one raw value, like PUT.
    SinglePost,
    Delete,
    Head,
}

impl RequestKind {
    pub fn strategy(self) -> Box<dyn RequestMethod> {
        match self {
            RequestKind::Get => Box::new(QueryMethod::get()),
            RequestKind::Delete => Box::new(QueryMethod::delete()),
            RequestKind::Head => Box::new(QueryMethod::head()),
            RequestKind::Post => Box::new(PostMethod::new()),
            RequestKind::Put => Box::new(SingleValueMethod::put()),
            RequestKind::SinglePost => Box::new(SingleValueMethod::post()),
        }
    }
}

/// Default receive loop shared by every kind.
pub fn receive_body(
    ctx: &IoContext<'_>,
    sent: Progress,
    headers: &ResponseHeaders,
    input: &mut dyn Read,
    output: &mut dyn Write,
) -> Result<Progress> {
    let declared = headers.content_length();
    let mut progress = Progress {
        current: sent.current,
        total: if declared >= 0 && sent.total >= 0 {
            sent.total.saturating_add(declared)
        } else {
            -1
        },
    };
    let mut buf = [0u8; BUFFER_SIZE];
    loop {
        let n = input.read(&mut buf)?;
        if n == 0 {
            break;
        }
        output.write_all(&buf[..n])?;
        ctx.touch();
        progress.advance(n);
        ctx.report(true, progress);
    }
    output.flush()?;
    Ok(progress)
}

/// Copy the first `len` bytes of a file into the request body chunk by
/// chunk, reporting each chunk as sending progress. `len` is the size the
/// body was planned with; bytes appended to the file since are not sent.
fn send_file(
    ctx: &IoContext<'_>,
    path: &Path,
    len: u64,
    output: &mut impl Write,
    progress: &mut Progress,
) -> Result<()> {
    let mut file = File::open(path)?.take(len);
    let mut buf = [0u8; BUFFER_SIZE];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            return Ok(());
        }
        output.write_all(&buf[..n])?;
        ctx.touch();
        progress.advance(n);
        ctx.report(false, *progress);
    }
}

fn send_bytes(ctx: &IoContext<'_>, bytes: &[u8], output: &mut RequestBody<'_>, progress: &mut Progress) -> Result<()> {
    output.write_all(bytes)?;
    ctx.touch();
    progress.advance(bytes.len());
    Ok(())
}

/// Flush the body and emit the closing pair of progress calls.
fn finish_send(ctx: &IoContext<'_>, output: &mut RequestBody<'_>, progress: Progress) -> Result<Progress> {
    output.flush()?;
    ctx.touch();
    ctx.report(false, progress);
    ctx.report(true, progress);
    Ok(progress)
}

/// A connection with the settings every kind starts from.
fn base_connection(url: Url, do_output: bool) -> Connection {
    let mut connection = Connection::new(url);
    connection.set_do_input(true);
    connection.set_do_output(do_output);
    connection.set_use_caches(false);
    connection
}

//! `NetworkRequest`: configuration surface and the blocking `open()`
//! lifecycle.
//!
//! # Design
//! A request owns its stores, its settings and one strategy. `open()` runs
//! on the caller's thread:
//!
//! ```text
//! started -> build connection -> inject properties/cookies -> verb/TLS/timeouts
//!         -> start watchdog -> send body -> status -> headers -> receive body
//!         -> stop watchdog -> finished            (or failed -> finished)
//! ```
//!
//! Per-invocation state lives in a `Session` shared with the watchdog
//! thread and with `attempt_disconnect`. Both can abort the session, which
//! disconnects the socket and unblocks the I/O thread. The session also
//! makes sure `on_failed` is reported at most once no matter which thread
//! notices the failure first.

use std::fmt;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use url::Url;

use crate::body::Body;
use crate::config::{
    user_agents, NetworkConfig, TlsPolicy, DEFAULT_ACCEPT_NON_200, DEFAULT_TIMEOUT, SLEEP_INTERVAL, TIMEOUT_INTERVAL,
};
use crate::connection::{Connection, ConnectionHandle};
use crate::error::{NetworkError, Result};
use crate::http::{ResponseBody, ResponseHeaders};
use crate::listener::{NetworkListener, Notifier};
use crate::method::{AbortGate, IoContext, Progress, RequestKind, RequestMethod};
use crate::store::{
    cookie_store, cookies_string, parameter_store, property_store, validate_property_value, CookieStore,
    OpeningFlag, ParameterStore, Parameters, PropertyStore, AUTHORIZATION, COOKIE, USER_AGENT,
};
use crate::watchdog::{ActivityCounter, Watchdog};

const FINISHED_AFTER_DISCONNECT: &str = "Finish but the connection has been disconnected.";

// ----------------------------------------------------------------------------
// Session
// ----------------------------------------------------------------------------

/// State of one `open()` invocation.
#[derive(Debug, Default)]
struct Session {
    handle: ConnectionHandle,
    activity: Arc<ActivityCounter>,
    gate: AbortGate,
    stalled: AtomicBool,
    disconnect_requested: AtomicBool,
    failure_reported: AtomicBool,
}

impl Session {
    /// Abort on a watchdog timeout. Progress that was already being
    /// reported completes before `on_failed`, and none follows it.
    fn stall(&self, notifier: &Notifier) {
        self.stalled.store(true, Ordering::Release);
        self.gate.abort();
        self.report_failure(notifier, &NetworkError::Timeout.to_string());
        self.handle.disconnect();
    }

    fn request_disconnect(&self) {
        self.disconnect_requested.store(true, Ordering::Release);
        self.gate.abort();
        self.handle.disconnect();
    }

    fn disconnect_requested(&self) -> bool {
        self.disconnect_requested.load(Ordering::Acquire)
    }

    fn stalled(&self) -> bool {
        self.stalled.load(Ordering::Acquire)
    }

    fn report_failure(&self, notifier: &Notifier, message: &str) {
        if !self.failure_reported.swap(true, Ordering::AcqRel) {
            notifier.failed(message, self.disconnect_requested());
        }
    }

    /// The error `open()` returns: stalls and requested disconnects win over
    /// whatever I/O error they caused.
    fn classify(&self, error: NetworkError) -> NetworkError {
        if self.stalled() {
            NetworkError::Timeout
        } else if self.disconnect_requested() && !error.is_configuration() {
            NetworkError::Disconnected
        } else {
            error
        }
    }
}

// ----------------------------------------------------------------------------
// Request
// ----------------------------------------------------------------------------

#[derive(Clone)]
struct Settings {
    timeout: Duration,
    accept_non_200: bool,
    target_file: Option<PathBuf>,
    listener: Option<Arc<dyn NetworkListener>>,
    tls: TlsPolicy,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            accept_non_200: DEFAULT_ACCEPT_NON_200,
            target_file: None,
            listener: None,
            tls: TlsPolicy::default(),
        }
    }
}

#[derive(Debug, Clone)]
struct Outcome {
    headers: ResponseHeaders,
    body: ResponseBody,
}

/// One configurable, openable request.
pub struct NetworkRequest {
    url: Url,
    method: Box<dyn RequestMethod>,
    opening: OpeningFlag,
    parameters: ParameterStore,
    properties: PropertyStore,
    cookies: CookieStore,
    settings: Mutex<Settings>,
    live: Mutex<Option<Arc<Session>>>,
    outcome: Mutex<Option<Outcome>>,
}

impl fmt::Debug for NetworkRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetworkRequest")
            .field("method", &self.method.name())
            .field("url", &self.url.as_str())
            .field("opening", &self.is_opening())
            .finish_non_exhaustive()
    }
}

impl NetworkRequest {
    pub fn get(url: &str) -> Result<Self> {
        Self::new(RequestKind::Get, url)
    }

    pub fn post(url: &str) -> Result<Self> {
        Self::new(RequestKind::Post, url)
    }

    pub fn put(url: &str) -> Result<Self> {
        Self::new(RequestKind::Put, url)
    }

    pub fn single_post(url: &str) -> Result<Self> {
        Self::new(RequestKind::SinglePost, url)
    }

    pub fn delete(url: &str) -> Result<Self> {
        Self::new(RequestKind::Delete, url)
    }

    pub fn head(url: &str) -> Result<Self> {
        Self::new(RequestKind::Head, url)
    }

    pub fn new(kind: RequestKind, url: &str) -> Result<Self> {
        Self::with_method(kind.strategy(), url)
    }

    /// Request driven by a custom strategy. The query string of `url` is
    /// moved into the parameters.
    pub fn with_method(method: Box<dyn RequestMethod>, url: &str) -> Result<Self> {
        let mut url = Url::parse(url)?;
        if !matches!(url.scheme(), "http" | "https") && !method.supports_non_http_protocol() {
            return Err(NetworkError::UnsupportedProtocol(url.scheme().to_string()));
        }
        let query = url.query().map(str::to_string);
        url.set_query(None);
        url.set_fragment(None);

        let opening = OpeningFlag::new(url.as_str());
        let request = Self {
            method,
            parameters: parameter_store(opening.clone()),
            properties: property_store(opening.clone()),
            cookies: cookie_store(opening.clone()),
            opening,
            url,
            settings: Mutex::new(Settings::default()),
            live: Mutex::new(None),
            outcome: Mutex::new(None),
        };
        request.use_default_user_agent()?;
        if let Some(query) = query {
            for (key, value) in parse_query(&query) {
                match request.set_parameter(&key, Some(Body::string(value))) {
                    Ok(()) => {}
                    Err(e @ (NetworkError::InvalidKey(_) | NetworkError::ArrayParameterKey(_))) => {
                        tracing::warn!(key = %key, error = %e, "skipping query parameter");
                    }
                    Err(e) => return Err(e),
                }
            }
        }
        Ok(request)
    }

    /// Target URL without query or fragment.
    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn protocol(&self) -> &str {
        self.url.scheme()
    }

    pub fn method_name(&self) -> &'static str {
        self.method.name()
    }

    pub fn is_opening(&self) -> bool {
        self.opening.is_set()
    }

    // ------------------------------------------------------------------------
    // Parameters
    // ------------------------------------------------------------------------

    pub fn parameter(&self, key: &str) -> Result<Option<Body>> {
        self.parameters.get(key)
    }

    /// Store `value` under `key`; `None` removes it.
    pub fn set_parameter(&self, key: &str, value: Option<Body>) -> Result<()> {
        self.parameters
            .set_checked(key, value, |existing, key, value| self.method.check_parameter(existing, key, value))
    }

    pub fn set_string_parameter(&self, key: &str, value: Option<&str>) -> Result<()> {
        self.set_parameter(key, value.map(Body::string))
    }

    pub fn set_number_parameter(&self, key: &str, value: Option<i64>) -> Result<()> {
        self.set_parameter(key, value.map(Body::number))
    }

    pub fn set_float_parameter(&self, key: &str, value: Option<f64>) -> Result<()> {
        self.set_parameter(key, value.map(Body::float).transpose()?)
    }

    pub fn set_file_parameter(&self, key: &str, path: Option<&Path>) -> Result<()> {
        self.set_parameter(key, path.map(Body::file).transpose()?)
    }

    pub fn set_json_parameter(&self, key: &str, value: Option<Value>) -> Result<()> {
        self.set_parameter(key, value.map(Body::json).transpose()?)
    }

    pub fn set_array_parameter(&self, key: &str, items: Option<Vec<Body>>) -> Result<()> {
        self.set_parameter(key, items.map(Body::array).transpose()?)
    }

    pub fn remove_parameter(&self, key: &str) -> Result<Option<Body>> {
        self.parameters.remove(key)
    }

    pub fn clear_parameters(&self) -> Result<()> {
        self.parameters.clear()
    }

    pub fn parameter_keys(&self) -> Vec<String> {
        self.parameters.keys()
    }

    // ------------------------------------------------------------------------
    // Properties and cookies
    // ------------------------------------------------------------------------

    pub fn property(&self, key: &str) -> Result<Option<String>> {
        self.properties.get(key)
    }

    /// Set a request header. `Cookie`, `Content-Type` and
    /// `Content-Disposition` are refused, as are names that are not HTTP
    /// tokens and values carrying CR, LF or NUL.
    pub fn set_property(&self, key: &str, value: Option<&str>) -> Result<()> {
        let value = value.map(str::trim);
        if let Some(value) = value {
            validate_property_value(value)?;
        }
        self.properties.set(key, value.map(str::to_string))
    }

    pub fn remove_property(&self, key: &str) -> Result<Option<String>> {
        self.properties.remove(key)
    }

    pub fn clear_properties(&self) -> Result<()> {
        self.properties.clear()
    }

    pub fn cookie(&self, key: &str) -> Result<Option<String>> {
        self.cookies.get(key)
    }

    pub fn set_cookie(&self, key: &str, value: Option<&str>) -> Result<()> {
        self.cookies.set(key, value.map(|v| v.trim().to_string()))
    }

    pub fn remove_cookie(&self, key: &str) -> Result<Option<String>> {
        self.cookies.remove(key)
    }

    pub fn clear_cookies(&self) -> Result<()> {
        self.cookies.clear()
    }

    pub fn user_agent(&self) -> Option<String> {
        self.properties.get(USER_AGENT).ok().flatten()
    }

    pub fn set_user_agent(&self, agent: Option<&str>) -> Result<()> {
        self.set_property(USER_AGENT, agent)
    }

    pub fn use_default_user_agent(&self) -> Result<()> {
        self.set_user_agent(Some(user_agents::DEFAULT))
    }

    pub fn remove_user_agent(&self) -> Result<Option<String>> {
        self.remove_property(USER_AGENT)
    }

    pub fn authorization(&self) -> Option<String> {
        self.properties.get(AUTHORIZATION).ok().flatten()
    }

    pub fn set_authorization(&self, value: Option<&str>) -> Result<()> {
        self.set_property(AUTHORIZATION, value)
    }

    pub fn remove_authorization(&self) -> Result<Option<String>> {
        self.remove_property(AUTHORIZATION)
    }

    // ------------------------------------------------------------------------
    // Settings
    // ------------------------------------------------------------------------

    fn update(&self, f: impl FnOnce(&mut Settings)) -> Result<()> {
        let mut settings = self.settings.lock();
        self.opening.ensure_idle()?;
        f(&mut settings);
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        self.settings.lock().timeout
    }

    /// Stall timeout. Must be at least one millisecond.
    pub fn set_timeout(&self, timeout: Duration) -> Result<()> {
        if timeout.as_millis() == 0 {
            return Err(NetworkError::InvalidTimeout);
        }
        self.update(|s| s.timeout = timeout)
    }

    pub fn use_default_timeout(&self) -> Result<()> {
        self.set_timeout(DEFAULT_TIMEOUT)
    }

    pub fn accept_non_200(&self) -> bool {
        self.settings.lock().accept_non_200
    }

    pub fn set_accept_non_200(&self, accept: bool) -> Result<()> {
        self.update(|s| s.accept_non_200 = accept)
    }

    pub fn target_file(&self) -> Option<PathBuf> {
        self.settings.lock().target_file.clone()
    }

    /// Stream the response body to `path` instead of memory.
    pub fn set_target_file(&self, path: Option<PathBuf>) -> Result<()> {
        self.update(|s| s.target_file = path)
    }

    pub fn set_listener(&self, listener: Option<Arc<dyn NetworkListener>>) -> Result<()> {
        self.update(|s| s.listener = listener)
    }

    pub fn tls_policy(&self) -> TlsPolicy {
        self.settings.lock().tls
    }

    pub fn set_tls_policy(&self, policy: TlsPolicy) -> Result<()> {
        self.update(|s| s.tls = policy)
    }

    pub fn apply_config(&self, config: &NetworkConfig) -> Result<()> {
        self.set_timeout(config.timeout())?;
        self.set_accept_non_200(config.accept_non_200)?;
        self.set_tls_policy(config.tls)?;
        self.set_target_file(config.target_file.clone())?;
        self.set_user_agent(config.user_agent.as_deref())
    }

    // ------------------------------------------------------------------------
    // Results
    // ------------------------------------------------------------------------

    /// Body of the last successful `open()`.
    pub fn result(&self) -> Option<ResponseBody> {
        self.outcome.lock().as_ref().map(|o| o.body.clone())
    }

    /// Headers of the last successful `open()`.
    pub fn result_header(&self) -> Option<ResponseHeaders> {
        self.outcome.lock().as_ref().map(|o| o.headers.clone())
    }

    /// The result as text, read back from the target file if there is one.
    pub fn result_as_string(&self) -> Option<String> {
        match self.result()? {
            ResponseBody::Bytes(bytes) => Some(String::from_utf8_lossy(&bytes).into_owned()),
            ResponseBody::File(path) => std::fs::read_to_string(path).ok(),
        }
    }

    pub fn result_as_file(&self) -> Option<PathBuf> {
        match self.result()? {
            ResponseBody::File(path) => Some(path),
            ResponseBody::Bytes(_) => None,
        }
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    /// Abort the in-flight `open()`, if any. The listener's `on_failed`
    /// sees `attempted_disconnect == true`.
    pub fn attempt_disconnect(&self) {
        if let Some(session) = self.live.lock().clone() {
            tracing::debug!(url = %self.url, "disconnect requested");
            session.request_disconnect();
        }
    }

    /// Execute the request, blocking until it finished or failed.
    ///
    /// A second call while one is running fails with `Opening` and touches
    /// nothing else. Every other call invokes `on_started` and exactly one
    /// `on_finished`; failures are reported to `on_failed` before being
    /// returned.
    pub fn open(&self) -> Result<()> {
        let _opening = self.opening.begin()?;
        let span = tracing::info_span!("open", method = self.method.name(), url = %self.url);
        let _entered = span.enter();

        let settings = self.settings.lock().clone();
        let notifier = Notifier::new(settings.listener.clone());
        *self.outcome.lock() = None;
        let session = Arc::new(Session::default());
        *self.live.lock() = Some(session.clone());

        notifier.started();
        let result = match self.run(&session, &settings, &notifier) {
            Ok(_) if session.stalled() => Err(NetworkError::Timeout),
            other => other,
        };
        *self.live.lock() = None;
        session.handle.disconnect();

        match result {
            Ok(outcome) => {
                if session.disconnect_requested() {
                    session.report_failure(&notifier, FINISHED_AFTER_DISCONNECT);
                }
                tracing::debug!(code = ?outcome.headers.response_code(), "finished");
                notifier.finished(Some(&outcome.headers), Some(&outcome.body));
                *self.outcome.lock() = Some(outcome);
                Ok(())
            }
            Err(error) => {
                let error = session.classify(error);
                tracing::debug!(%error, "failed");
                session.report_failure(&notifier, &error.to_string());
                notifier.finished(None, None);
                Err(error)
            }
        }
    }

    fn run(&self, session: &Arc<Session>, settings: &Settings, notifier: &Notifier) -> Result<Outcome> {
        let parameters = self.parameters.snapshot();
        let mut connection = self.method.build_connection(&self.url, &parameters)?;
        if !connection.is_http() && !self.method.supports_non_http_protocol() {
            return Err(NetworkError::UnsupportedProtocol(self.url.scheme().to_string()));
        }
        connection.set_handle(session.handle.clone());
        for (key, value) in self.properties.snapshot() {
            connection.set_request_property(&key, &value);
        }
        let cookies = self.cookies.snapshot();
        if !cookies.is_empty() {
            connection.set_request_property(COOKIE, &cookies_string(&cookies));
        }
        if let Some(http) = connection.http_settings_mut() {
            self.method.build_http_connection(http);
        }
        connection.set_tls_policy(settings.tls);
        connection.set_timeout(settings.timeout + TIMEOUT_INTERVAL);

        let watchdog = {
            let session = session.clone();
            let notifier = notifier.clone();
            Watchdog::start(settings.timeout, SLEEP_INTERVAL, session.activity.clone(), move || {
                session.stall(&notifier)
            })?
        };
        let ctx = IoContext::new(notifier, &session.activity, &session.gate);
        let outcome = self.exchange(&ctx, &mut connection, &parameters, settings);
        watchdog.stop();
        outcome
    }

    fn exchange(
        &self,
        ctx: &IoContext<'_>,
        connection: &mut Connection,
        parameters: &Parameters,
        settings: &Settings,
    ) -> Result<Outcome> {
        let mut sink = Sink::open(settings.target_file.as_deref())?;

        let mut progress = Progress::NONE;
        if connection.do_output() {
            tracing::debug!("sending request body");
            let mut output = connection.output_stream()?;
            progress = self.method.do_send_connection(ctx, parameters, &mut output)?;
        }

        let code = connection.response_code()?;
        if let Some(code) = code {
            if code != 200 && !settings.accept_non_200 {
                return Err(NetworkError::HttpStatus(code));
            }
        }
        let headers = ResponseHeaders::new(code, connection.header_fields());

        tracing::debug!(content_length = headers.content_length(), "receiving response body");
        let mut input = connection.input_stream()?;
        self.method
            .do_receive_connection(ctx, progress, &headers, &mut input, &mut sink)?;
        Ok(Outcome {
            headers,
            body: sink.finish()?,
        })
    }
}

/// Where response bytes go while receiving.
enum Sink {
    Memory(Vec<u8>),
    File(BufWriter<File>, PathBuf),
}

impl Sink {
    fn open(target: Option<&Path>) -> io::Result<Self> {
        Ok(match target {
            Some(path) => Sink::File(BufWriter::new(File::create(path)?), path.to_path_buf()),
            None => Sink::Memory(Vec::new()),
        })
    }

    fn finish(self) -> io::Result<ResponseBody> {
        match self {
            Sink::Memory(bytes) => Ok(ResponseBody::Bytes(bytes)),
            Sink::File(mut file, path) => {
                file.flush()?;
                Ok(ResponseBody::File(path))
            }
        }
    }
}

impl Write for Sink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Sink::Memory(bytes) => bytes.write(buf),
            Sink::File(file, _) => file.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Sink::Memory(_) => Ok(()),
            Sink::File(file, _) => file.flush(),
        }
    }
}

/// `k=v` pairs of a raw query string. Pairs without exactly one `=` are
/// dropped; values are form-decoded.
fn parse_query(query: &str) -> Vec<(String, String)> {
    query
        .split('&')
        .filter_map(|pair| {
            let mut parts = pair.split('=');
            let (key, value) = (parts.next()?, parts.next()?);
            if parts.next().is_some() {
                return None;
            }
            let value = url::form_urlencoded::parse(value.as_bytes())
                .map(|(decoded, _)| decoded.into_owned())
                .next()
                .unwrap_or_default();
            Some((key.trim().to_string(), value))
        })
        .collect()
}

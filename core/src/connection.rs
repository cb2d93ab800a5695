//! The URL connection a strategy builds and the orchestrator drives.
//!
//! # Design
//! A `Connection` is a lazily connected, single-exchange HTTP/1.1 client
//! (plain TCP or rustls) with a `file:` fallback for GET. Message framing
//! is delegated to `ureq-proto` through `wire`; redirect policy stays here. Its lifecycle is a
//! small state machine:
//!
//! ```text
//! Idle --connect--> Writing --response_code--> Reading
//!   \--connect (file:)--> File
//! any --disconnect--> Closed
//! ```
//!
//! The socket is registered with a cloneable `ConnectionHandle`. Any thread
//! holding the handle can `disconnect()`, which shuts the socket down and
//! makes every later read or write on the I/O thread fail. The watchdog and
//! `NetworkRequest::attempt_disconnect` both rely on this.

use std::collections::BTreeMap;
use std::fmt;
use std::fs::File;
use std::io::{self, BufReader, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rustls::pki_types::ServerName;
use rustls::{ClientConnection, StreamOwned};
use ureq_proto::http::Request;
use url::Url;

use crate::config::{TlsPolicy, BUFFER_SIZE, DEFAULT_TIMEOUT, TIMEOUT_INTERVAL};
use crate::error::{NetworkError, Result};
use crate::http::{HttpMethod, HttpSettings};
use crate::sniff;
use crate::tls;
use crate::wire;

const MAX_REDIRECTS: usize = 20;

/// Headers the connection writes itself; user properties with these names
/// are ignored.
const CONNECTION_MANAGED: &[&str] = &["Host", "Content-Length", "Transfer-Encoding", "Connection"];

// ----------------------------------------------------------------------------
// Handle
// ----------------------------------------------------------------------------

/// Cross-thread kill switch for one connection.
#[derive(Debug, Clone, Default)]
pub struct ConnectionHandle {
    inner: Arc<HandleState>,
}

#[derive(Debug, Default)]
struct HandleState {
    closed: AtomicBool,
    socket: Mutex<Option<TcpStream>>,
}

impl ConnectionHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the connection closed and shut its socket down. Idempotent.
    pub fn disconnect(&self) {
        self.inner.closed.store(true, Ordering::Release);
        if let Some(socket) = self.inner.socket.lock().take() {
            if let Err(e) = socket.shutdown(Shutdown::Both) {
                tracing::trace!(error = %e, "socket shutdown");
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    fn attach(&self, socket: &TcpStream) -> io::Result<()> {
        let clone = socket.try_clone()?;
        let mut slot = self.inner.socket.lock();
        if self.is_closed() {
            let _ = clone.shutdown(Shutdown::Both);
            return Err(closed());
        }
        *slot = Some(clone);
        Ok(())
    }

    fn check(&self) -> io::Result<()> {
        if self.is_closed() {
            return Err(closed());
        }
        Ok(())
    }
}

fn closed() -> io::Error {
    io::Error::new(io::ErrorKind::ConnectionAborted, "connection closed")
}

// ----------------------------------------------------------------------------
// Transport
// ----------------------------------------------------------------------------

enum Transport {
    Plain(TcpStream),
    Tls(Box<StreamOwned<ClientConnection, TcpStream>>),
}

impl Read for Transport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Transport::Plain(s) => s.read(buf),
            Transport::Tls(s) => s.read(buf),
        }
    }
}

impl Write for Transport {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Transport::Plain(s) => s.write(buf),
            Transport::Tls(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Transport::Plain(s) => s.flush(),
            Transport::Tls(s) => s.flush(),
        }
    }
}

// ----------------------------------------------------------------------------
// Connection
// ----------------------------------------------------------------------------

/// How the request body is framed once the head is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BodyLength {
    None,
    Sized(u64),
    Chunked,
}

enum Outgoing {
    /// Request head not written yet.
    Pending,
    Streaming(wire::BodyWriter),
    Sent(wire::AwaitResponse),
}

struct Exchange {
    stream: Transport,
    url: Url,
    method: HttpMethod,
    outgoing: Outgoing,
    body_sent: bool,
}

impl Exchange {
    fn new(stream: Transport, url: Url, method: HttpMethod) -> Self {
        Self {
            stream,
            url,
            method,
            outgoing: Outgoing::Pending,
            body_sent: false,
        }
    }
}

struct Response {
    stream: Transport,
    url: Url,
    head: wire::Head,
    body: Option<wire::BodyReader>,
    input: Vec<u8>,
}

enum State {
    Idle,
    Writing(Exchange),
    Reading(Response),
    File {
        reader: BufReader<File>,
        fields: BTreeMap<String, Vec<String>>,
    },
    Closed,
}

pub struct Connection {
    url: Url,
    do_input: bool,
    do_output: bool,
    use_caches: bool,
    properties: Vec<(String, String)>,
    http: Option<HttpSettings>,
    tls: TlsPolicy,
    timeout: Duration,
    handle: ConnectionHandle,
    state: State,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("url", &self.url.as_str())
            .field("http", &self.http)
            .field("do_output", &self.do_output)
            .field("closed", &self.handle.is_closed())
            .finish_non_exhaustive()
    }
}

impl Connection {
    /// An unconnected connection to `url`. HTTP settings exist only for
    /// `http` and `https` URLs.
    pub fn new(url: Url) -> Self {
        let http = is_http(&url).then(HttpSettings::default);
        Self {
            url,
            do_input: true,
            do_output: false,
            use_caches: true,
            properties: Vec::new(),
            http,
            tls: TlsPolicy::default(),
            timeout: DEFAULT_TIMEOUT + TIMEOUT_INTERVAL,
            handle: ConnectionHandle::new(),
            state: State::Idle,
        }
    }

    /// The URL of the final exchange, after redirects.
    pub fn url(&self) -> &Url {
        match &self.state {
            State::Writing(ex) => &ex.url,
            State::Reading(r) => &r.url,
            _ => &self.url,
        }
    }

    pub fn is_http(&self) -> bool {
        self.http.is_some()
    }

    pub fn http_settings(&self) -> Option<&HttpSettings> {
        self.http.as_ref()
    }

    pub fn http_settings_mut(&mut self) -> Option<&mut HttpSettings> {
        self.http.as_mut()
    }

    pub fn set_do_input(&mut self, on: bool) {
        self.do_input = on;
    }

    pub fn do_input(&self) -> bool {
        self.do_input
    }

    pub fn set_do_output(&mut self, on: bool) {
        self.do_output = on;
    }

    pub fn do_output(&self) -> bool {
        self.do_output
    }

    /// With caching off every request carries `Cache-Control: no-cache`.
    pub fn set_use_caches(&mut self, on: bool) {
        self.use_caches = on;
    }

    /// Set a request header, replacing any value under the same name.
    pub fn set_request_property(&mut self, key: &str, value: &str) {
        match self.properties.iter_mut().find(|(k, _)| k.eq_ignore_ascii_case(key)) {
            Some(slot) => slot.1 = value.to_string(),
            None => self.properties.push((key.to_string(), value.to_string())),
        }
    }

    pub fn request_property(&self, key: &str) -> Option<&str> {
        self.properties
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    pub fn set_tls_policy(&mut self, policy: TlsPolicy) {
        self.tls = policy;
    }

    /// Connect and read timeout of the underlying socket.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// Share an existing handle instead of the connection's own. Must be
    /// called before the first I/O.
    pub fn set_handle(&mut self, handle: ConnectionHandle) {
        self.handle = handle;
    }

    pub fn handle(&self) -> ConnectionHandle {
        self.handle.clone()
    }

    /// Open the socket (or file). A no-op once connected.
    pub fn connect(&mut self) -> Result<()> {
        if !matches!(self.state, State::Idle) {
            return Ok(());
        }
        self.handle.check()?;
        match self.url.scheme() {
            "http" | "https" => {
                let method = self.http.map(|h| h.method).unwrap_or(HttpMethod::Get);
                tracing::debug!(url = %self.url, method = method.as_str(), "connecting");
                let stream = self.open_transport(&self.url)?;
                self.state = State::Writing(Exchange::new(stream, self.url.clone(), method));
            }
            "file" => {
                let path = self
                    .url
                    .to_file_path()
                    .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "not a local file url"))?;
                let file = File::open(&path)?;
                let mut fields = BTreeMap::new();
                fields.insert("Content-Length".to_string(), vec![file.metadata()?.len().to_string()]);
                if let Some(mime) = sniff::probe(&path)? {
                    fields.insert("Content-Type".to_string(), vec![mime]);
                }
                self.state = State::File {
                    reader: BufReader::with_capacity(BUFFER_SIZE, file),
                    fields,
                };
            }
            other => return Err(NetworkError::UnsupportedProtocol(other.to_string())),
        }
        Ok(())
    }

    /// The request body sink. Only HTTP connections with output enabled
    /// have one.
    pub fn output_stream(&mut self) -> Result<RequestBody<'_>> {
        if !self.do_output || self.http.is_none() {
            return Err(NetworkError::OutputNotSupported);
        }
        self.connect()?;
        Ok(RequestBody { conn: self })
    }

    /// Finish the request and read the response status, following
    /// redirects when allowed. `None` for non-HTTP connections.
    pub fn response_code(&mut self) -> Result<Option<u16>> {
        self.connect()?;
        match &self.state {
            State::Reading(r) => return Ok(Some(r.head.code)),
            State::File { .. } => return Ok(None),
            State::Closed => return Err(closed().into()),
            State::Idle | State::Writing(_) => {}
        }
        let State::Writing(exchange) = std::mem::replace(&mut self.state, State::Closed) else {
            return Err(closed().into());
        };
        let response = self.exchange(exchange)?;
        let code = response.head.code;
        tracing::debug!(code, url = %response.url, "response");
        self.state = State::Reading(response);
        Ok(Some(code))
    }

    /// Response header fields, grouped case-insensitively under the first
    /// spelling the server used. Empty before `response_code`.
    pub fn header_fields(&self) -> BTreeMap<String, Vec<String>> {
        match &self.state {
            State::Reading(r) => {
                let mut fields: BTreeMap<String, Vec<String>> = BTreeMap::new();
                for (name, value) in &r.head.headers {
                    let key = fields
                        .keys()
                        .find(|k| k.eq_ignore_ascii_case(name))
                        .cloned()
                        .unwrap_or_else(|| name.clone());
                    fields.entry(key).or_default().push(value.clone());
                }
                fields
            }
            State::File { fields, .. } => fields.clone(),
            _ => BTreeMap::new(),
        }
    }

    /// The response body. For HTTP this is also where the body of a
    /// non-200 answer is read from.
    pub fn input_stream(&mut self) -> Result<ResponseStream<'_>> {
        if !self.do_input {
            return Err(io::Error::new(io::ErrorKind::Unsupported, "input disabled").into());
        }
        self.response_code()?;
        Ok(ResponseStream { conn: self })
    }

    /// Tear the connection down. Later I/O on it fails.
    pub fn disconnect(&mut self) {
        self.handle.disconnect();
        self.state = State::Closed;
    }

    fn open_transport(&self, url: &Url) -> Result<Transport> {
        self.handle.check()?;
        let mut last_error = None;
        let mut socket = None;
        for addr in url.socket_addrs(|| None)? {
            match TcpStream::connect_timeout(&addr, self.timeout) {
                Ok(s) => {
                    socket = Some(s);
                    break;
                }
                Err(e) => last_error = Some(e),
            }
        }
        let socket = match socket {
            Some(s) => s,
            None => {
                return Err(last_error
                    .unwrap_or_else(|| io::Error::new(io::ErrorKind::NotFound, "host has no addresses"))
                    .into())
            }
        };
        socket.set_read_timeout(Some(self.timeout))?;
        socket.set_write_timeout(Some(self.timeout))?;
        socket.set_nodelay(true)?;
        self.handle.attach(&socket)?;

        if url.scheme() != "https" {
            return Ok(Transport::Plain(socket));
        }
        let host = url
            .host_str()
            .unwrap_or_default()
            .trim_start_matches('[')
            .trim_end_matches(']');
        let name = ServerName::try_from(host.to_string())
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e.to_string()))?;
        let tls = ClientConnection::new(tls::client_config(self.tls)?, name)?;
        Ok(Transport::Tls(Box::new(StreamOwned::new(tls, socket))))
    }

    /// The request head for `url`. Header names and values are validated
    /// while building.
    fn build_request(&self, url: &Url, method: HttpMethod, body: BodyLength) -> Result<Request<()>> {
        let mut host = url.host_str().unwrap_or_default().to_string();
        if let Some(port) = url.port() {
            host.push_str(&format!(":{port}"));
        }
        let mut builder = Request::builder()
            .method(method.as_str())
            .uri(url.as_str())
            .header("Host", host);
        for (key, value) in &self.properties {
            if !CONNECTION_MANAGED.iter().any(|m| m.eq_ignore_ascii_case(key)) {
                builder = builder.header(key.as_str(), value.as_str());
            }
        }
        if self.request_property("Accept").is_none() {
            builder = builder.header("Accept", "*/*");
        }
        if !self.use_caches && self.request_property("Cache-Control").is_none() {
            builder = builder.header("Cache-Control", "no-cache");
        }
        builder = match body {
            BodyLength::Sized(len) => builder.header("Content-Length", len.to_string()),
            BodyLength::Chunked => builder.header("Transfer-Encoding", "chunked"),
            BodyLength::None if matches!(method, HttpMethod::Post | HttpMethod::Put) => {
                builder.header("Content-Length", "0")
            }
            BodyLength::None => builder,
        };
        Ok(builder.header("Connection", "close").body(())?)
    }

    /// Write the request head, switching the exchange out of `Pending`.
    fn start_request(&mut self, body: BodyLength) -> Result<()> {
        let State::Writing(ex) = &self.state else {
            return Err(closed().into());
        };
        if !matches!(ex.outgoing, Outgoing::Pending) {
            return Err(io::Error::other("request head already sent").into());
        }
        let request = self.build_request(&ex.url, ex.method, body)?;
        let State::Writing(ex) = &mut self.state else {
            return Err(closed().into());
        };
        ex.outgoing = match wire::send_request(request, &mut ex.stream)? {
            wire::Sent::Body(writer) => Outgoing::Streaming(writer),
            wire::Sent::Complete(flow) => Outgoing::Sent(flow),
        };
        ex.body_sent = matches!(body, BodyLength::Chunked | BodyLength::Sized(1..));
        self.handle.check()?;
        Ok(())
    }

    fn exchange(&mut self, mut ex: Exchange) -> Result<Response> {
        let mut redirects = 0;
        loop {
            let flow = self.finish_request(&mut ex)?;
            let mut input = Vec::new();
            let (head, body) = wire::read_response(flow, &mut ex.stream, &mut input)?;
            self.handle.check()?;

            if let Some(next) = self.redirect(&ex, &head) {
                redirects += 1;
                if redirects > MAX_REDIRECTS {
                    return Err(NetworkError::TooManyRedirects);
                }
                let method = if matches!(head.code, 301..=303) && ex.method != HttpMethod::Head {
                    self.properties.retain(|(k, _)| {
                        !k.eq_ignore_ascii_case("Content-Type") && !k.eq_ignore_ascii_case("Content-Disposition")
                    });
                    HttpMethod::Get
                } else {
                    ex.method
                };
                tracing::debug!(code = head.code, to = %next, method = method.as_str(), "following redirect");
                ex = Exchange::new(self.open_transport(&next)?, next, method);
                continue;
            }

            return Ok(Response {
                stream: ex.stream,
                url: ex.url,
                head,
                body,
                input,
            });
        }
    }

    /// Close the request body (sending a bodiless head if nothing was
    /// written yet) and flush.
    fn finish_request(&self, ex: &mut Exchange) -> Result<wire::AwaitResponse> {
        let flow = match std::mem::replace(&mut ex.outgoing, Outgoing::Pending) {
            Outgoing::Pending => {
                let request = self.build_request(&ex.url, ex.method, BodyLength::None)?;
                match wire::send_request(request, &mut ex.stream)? {
                    wire::Sent::Body(writer) => writer.finish(&mut ex.stream)?,
                    wire::Sent::Complete(flow) => flow,
                }
            }
            Outgoing::Streaming(writer) => writer.finish(&mut ex.stream)?,
            Outgoing::Sent(flow) => flow,
        };
        ex.stream.flush()?;
        self.handle.check()?;
        Ok(flow)
    }

    /// Where a 3xx response points, if it may be followed.
    fn redirect(&self, ex: &Exchange, head: &wire::Head) -> Option<Url> {
        if !self.http.is_some_and(|h| h.follow_redirects) {
            return None;
        }
        let rewrites_method = match head.code {
            301..=303 => true,
            307 | 308 => false,
            _ => return None,
        };
        if ex.body_sent && !rewrites_method {
            return None;
        }
        let next = ex.url.join(head.header("Location")?).ok()?;
        (next.scheme() == ex.url.scheme()).then_some(next)
    }
}

fn is_http(url: &Url) -> bool {
    matches!(url.scheme(), "http" | "https")
}

/// Hand a request-side error back through `io::Write`.
fn into_io(e: NetworkError) -> io::Error {
    match e {
        NetworkError::Io(e) => e,
        other => io::Error::new(io::ErrorKind::InvalidInput, other.to_string()),
    }
}

// ----------------------------------------------------------------------------
// Streams
// ----------------------------------------------------------------------------

/// Request body writer. Declare the length up front with `declare_length`
/// to send `Content-Length`; otherwise the first write switches the request
/// to chunked transfer encoding.
pub struct RequestBody<'a> {
    conn: &'a mut Connection,
}

impl RequestBody<'_> {
    pub fn declare_length(&mut self, len: u64) -> Result<()> {
        self.conn.start_request(BodyLength::Sized(len))
    }
}

impl Write for RequestBody<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if matches!(&self.conn.state, State::Writing(ex) if matches!(ex.outgoing, Outgoing::Pending)) {
            self.conn.start_request(BodyLength::Chunked).map_err(into_io)?;
        }
        let Connection { handle, state, .. } = &mut *self.conn;
        let State::Writing(ex) = state else {
            return Err(closed());
        };
        let Outgoing::Streaming(writer) = &mut ex.outgoing else {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "request carries no body"));
        };
        writer.write(&mut ex.stream, buf)?;
        handle.check()?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        let Connection { handle, state, .. } = &mut *self.conn;
        if let State::Writing(ex) = state {
            ex.stream.flush()?;
        }
        handle.check()
    }
}

/// Response body reader. Fails once the handle is disconnected, even if the
/// socket reported a clean end of stream.
pub struct ResponseStream<'a> {
    conn: &'a mut Connection,
}

impl Read for ResponseStream<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let Connection { handle, state, .. } = &mut *self.conn;
        handle.check()?;
        let n = match state {
            State::Reading(r) => match &mut r.body {
                Some(body) => body.read(&mut r.stream, &mut r.input, buf)?,
                None => 0,
            },
            State::File { reader, .. } => reader.read(buf)?,
            _ => return Err(closed()),
        };
        handle.check()?;
        Ok(n)
    }
}

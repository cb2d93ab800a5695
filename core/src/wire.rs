//! Blocking driver for `ureq-proto` client flows.
//!
//! `ureq-proto` turns a request into bytes and bytes into a response but
//! never touches a socket. The functions here shuttle those bytes over the
//! connection's own stream, so the socket stays owned by `Connection` and
//! killable through its handle.
//!
//! Bytes read from the stream but not yet consumed by the flow live in a
//! caller-owned `input` buffer that carries over from the response head to
//! the body.

use std::io::{self, Read, Write};

use ureq_proto::client::flow::state::{RecvBody, RecvResponse, SendBody};
use ureq_proto::client::flow::{self, RecvResponseResult, SendRequestResult};
use ureq_proto::http::{header, Request, Response};

use crate::config::BUFFER_SIZE;
use crate::error::{NetworkError, Result};

/// Upper bound on the buffered response head (status line plus headers).
pub const MAX_HEAD_BYTES: usize = 64 * 1024;

const READ_CHUNK: usize = BUFFER_SIZE * 4;
const OUTPUT_BYTES: usize = 16 * 1024;

type Flow<S> = flow::Flow<(), S>;

/// A flow whose request is fully sent, waiting for the response head.
pub type AwaitResponse = Flow<RecvResponse>;

/// Where a flow stands once the request head is on the wire.
pub enum Sent {
    Body(BodyWriter),
    Complete(AwaitResponse),
}

/// Status and header lines of a response.
#[derive(Debug, Clone)]
pub struct Head {
    pub code: u16,
    pub headers: Vec<(String, String)>,
}

impl Head {
    /// First value of `name`, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    fn from_response(response: &Response<()>) -> Self {
        let headers = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (canonical_name(name.as_str()), String::from_utf8_lossy(value.as_bytes()).into_owned())
            })
            .collect();
        Self {
            code: response.status().as_u16(),
            headers,
        }
    }
}

/// `content-type` -> `Content-Type`.
fn canonical_name(name: &str) -> String {
    name.split('-')
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join("-")
}

/// Write the head of `request` to `out`.
pub fn send_request<W: Write>(request: Request<()>, out: &mut W) -> Result<Sent> {
    let mut flow = flow::Flow::new(request)?.proceed();
    let mut buf = vec![0u8; OUTPUT_BYTES];
    while !flow.can_proceed() {
        let n = flow.write(&mut buf)?;
        if n == 0 {
            return Err(NetworkError::Protocol("request head does not fit the output buffer".into()));
        }
        out.write_all(&buf[..n])?;
    }
    match flow.proceed()? {
        Some(SendRequestResult::SendBody(flow)) => Ok(Sent::Body(BodyWriter { flow, buf })),
        Some(SendRequestResult::RecvResponse(flow)) => Ok(Sent::Complete(flow)),
        Some(SendRequestResult::Await100(_)) => Err(NetworkError::Protocol("unexpected 100-continue wait".into())),
        None => Err(NetworkError::Protocol("request head incomplete".into())),
    }
}

/// Frames request body bytes the way the head announced them: verbatim
/// under `Content-Length`, as chunks under `Transfer-Encoding: chunked`.
pub struct BodyWriter {
    flow: Flow<SendBody>,
    buf: Vec<u8>,
}

impl BodyWriter {
    pub fn write<W: Write>(&mut self, out: &mut W, mut data: &[u8]) -> io::Result<()> {
        while !data.is_empty() {
            let max = self.flow.calculate_max_input(self.buf.len()).max(1);
            let take = data.len().min(max);
            let (used, produced) = self.flow.write(&data[..take], &mut self.buf).map_err(invalid_input)?;
            out.write_all(&self.buf[..produced])?;
            if used == 0 {
                return Err(io::Error::new(io::ErrorKind::InvalidInput, "request body refused"));
            }
            data = &data[used..];
        }
        Ok(())
    }

    /// End the body. Fails when fewer bytes were written than declared.
    pub fn finish<W: Write>(mut self, out: &mut W) -> Result<AwaitResponse> {
        if !self.flow.can_proceed() {
            let (_, produced) = self.flow.write(&[], &mut self.buf)?;
            out.write_all(&self.buf[..produced])?;
        }
        self.flow.proceed().ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "request body shorter than declared").into()
        })
    }
}

/// Read the response head, never buffering more than `MAX_HEAD_BYTES`.
/// Returns the head and, unless the response carries no body, its reader.
pub fn read_response<R: Read>(
    mut flow: AwaitResponse,
    src: &mut R,
    input: &mut Vec<u8>,
) -> Result<(Head, Option<BodyReader>)> {
    let response = loop {
        if !input.is_empty() {
            let (used, response) = flow.try_response(input, false)?;
            input.drain(..used);
            if let Some(response) = response {
                break response;
            }
        }
        if input.len() >= MAX_HEAD_BYTES {
            return Err(NetworkError::MalformedResponse(format!(
                "response head exceeds {MAX_HEAD_BYTES} bytes"
            )));
        }
        if fill(src, input, MAX_HEAD_BYTES - input.len())? == 0 {
            return Err(NetworkError::MalformedResponse("connection closed before response head".into()));
        }
    };
    let head = Head::from_response(&response);
    let close_delimited = !response.headers().contains_key(header::CONTENT_LENGTH)
        && !response
            .headers()
            .get_all(header::TRANSFER_ENCODING)
            .iter()
            .any(|v| String::from_utf8_lossy(v.as_bytes()).to_ascii_lowercase().contains("chunked"));

    let body = match flow.proceed() {
        Some(RecvResponseResult::RecvBody(flow)) => Some(BodyReader { flow, close_delimited }),
        Some(RecvResponseResult::Redirect(_)) | Some(RecvResponseResult::Cleanup(_)) => None,
        None => return Err(NetworkError::Protocol("response head incomplete".into())),
    };
    Ok((head, body))
}

/// Decodes the response body (length-delimited, chunked or until close).
pub struct BodyReader {
    flow: Flow<RecvBody>,
    close_delimited: bool,
}

impl BodyReader {
    pub fn read<R: Read>(&mut self, src: &mut R, input: &mut Vec<u8>, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        loop {
            if !input.is_empty() {
                let (used, produced) = self.flow.read(input, buf).map_err(invalid_data)?;
                input.drain(..used);
                if produced > 0 {
                    return Ok(produced);
                }
                if self.flow.can_proceed() {
                    return Ok(0);
                }
                if used > 0 {
                    continue;
                }
            } else if self.flow.can_proceed() {
                return Ok(0);
            }
            if fill(src, input, READ_CHUNK)? == 0 {
                if self.close_delimited {
                    return Ok(0);
                }
                return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "response body truncated"));
            }
        }
    }
}

/// Append up to `max` bytes from `src`. Returns the count, 0 at EOF.
fn fill<R: Read>(src: &mut R, input: &mut Vec<u8>, max: usize) -> io::Result<usize> {
    let mut chunk = [0u8; READ_CHUNK];
    let limit = chunk.len().min(max);
    let n = src.read(&mut chunk[..limit])?;
    input.extend_from_slice(&chunk[..n]);
    Ok(n)
}

fn invalid_input(e: ureq_proto::Error) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidInput, e.to_string())
}

fn invalid_data(e: ureq_proto::Error) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, e.to_string())
}

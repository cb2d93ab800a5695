//! POST with any number of parameters: url-encoded when every value is
//! text, multipart as soon as a file or JSON value is present.

use url::Url;

use super::{base_connection, finish_send, send_bytes, send_file, IoContext, Progress, RequestMethod};
use crate::connection::{Connection, RequestBody};
use crate::error::Result;
use crate::http::{HttpMethod, HttpSettings};
use crate::multipart::{MultipartEncoder, Segment};
use crate::store::{parameters_string, Parameters, CONTENT_TYPE};

const FORM_URLENCODED: &str = "application/x-www-form-urlencoded";

#[derive(Debug, Clone, Default)]
pub struct PostMethod {
    encoder: MultipartEncoder,
}

impl PostMethod {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_encoder(encoder: MultipartEncoder) -> Self {
        Self { encoder }
    }

    pub fn is_multipart(parameters: &Parameters) -> bool {
        parameters.values().any(|b| b.requires_multipart())
    }
}

impl RequestMethod for PostMethod {
    fn name(&self) -> &'static str {
        "POST"
    }

    fn build_connection(&self, url: &Url, parameters: &Parameters) -> Result<Connection> {
        let mut connection = base_connection(url.clone(), true);
        if Self::is_multipart(parameters) {
            connection.set_request_property(CONTENT_TYPE, &self.encoder.content_type());
        } else {
            connection.set_request_property(CONTENT_TYPE, FORM_URLENCODED);
        }
        Ok(connection)
    }

    fn build_http_connection(&self, http: &mut HttpSettings) {
        http.method = HttpMethod::Post;
        http.follow_redirects = true;
    }

    fn do_send_connection(
        &self,
        ctx: &IoContext<'_>,
        parameters: &Parameters,
        output: &mut RequestBody<'_>,
    ) -> Result<Progress> {
        if !Self::is_multipart(parameters) {
            let body = parameters_string(parameters);
            output.declare_length(body.len() as u64)?;
            let mut progress = Progress::with_total(body.len() as u64);
            send_bytes(ctx, body.as_bytes(), output, &mut progress)?;
            return finish_send(ctx, output, progress);
        }

        let body = self.encoder.plan(parameters)?;
        tracing::debug!(parts = body.segments().len(), total = body.total_len(), "sending multipart body");
        output.declare_length(body.total_len())?;
        let mut progress = Progress::with_total(body.total_len());
        for segment in body.segments() {
            match segment {
                Segment::Bytes(bytes) => send_bytes(ctx, bytes, output, &mut progress)?,
                Segment::File { path, len } => send_file(ctx, path, *len, output, &mut progress)?,
            }
        }
        finish_send(ctx, output, progress)
    }
}

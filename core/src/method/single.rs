//! PUT and single-value POST: at most one parameter, sent as the raw
//! request body.

use url::Url;

use super::{base_connection, finish_send, send_bytes, send_file, IoContext, Progress, RequestMethod};
use crate::body::{Body, BodyType, Source};
use crate::connection::{Connection, RequestBody};
use crate::error::{NetworkError, Result};
use crate::http::{HttpMethod, HttpSettings};
use crate::store::{sanitize_header_value, Parameters, CONTENT_DISPOSITION, CONTENT_TYPE};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SingleValueMethod {
    verb: HttpMethod,
}

impl SingleValueMethod {
    pub fn put() -> Self {
        Self { verb: HttpMethod::Put }
    }

    pub fn post() -> Self {
        Self {
            verb: HttpMethod::Post,
        }
    }

    fn only(parameters: &Parameters) -> Option<&Body> {
        parameters.values().next()
    }
}

/// `Content-Type` for a raw body. Text and JSON are labeled UTF-8.
fn content_type(body: &Body) -> Option<String> {
    let content_type = body.content_type()?;
    Some(match body.body_type() {
        BodyType::String | BodyType::Number | BodyType::Json => format!("{content_type}; charset=UTF-8"),
        _ => content_type.to_string(),
    })
}

impl RequestMethod for SingleValueMethod {
    fn name(&self) -> &'static str {
        self.verb.as_str()
    }

    fn build_connection(&self, url: &Url, parameters: &Parameters) -> Result<Connection> {
        let mut connection = base_connection(url.clone(), true);
        if let Some(body) = Self::only(parameters) {
            if let Some(content_type) = content_type(body) {
                connection.set_request_property(CONTENT_TYPE, &content_type);
            }
            if let Some(file) = body.as_file() {
                let disposition = format!("fileName=\"{}\"", sanitize_header_value(&file.file_name()));
                connection.set_request_property(CONTENT_DISPOSITION, &disposition);
            }
        }
        Ok(connection)
    }

    fn build_http_connection(&self, http: &mut HttpSettings) {
        http.method = self.verb;
        http.follow_redirects = true;
    }

    fn do_send_connection(
        &self,
        ctx: &IoContext<'_>,
        parameters: &Parameters,
        output: &mut RequestBody<'_>,
    ) -> Result<Progress> {
        let Some(body) = Self::only(parameters) else {
            output.declare_length(0)?;
            return finish_send(ctx, output, Progress::NONE);
        };
        match body.source() {
            Source::File(file) => {
                let len = file.len()?;
                output.declare_length(len)?;
                let mut progress = Progress::with_total(len);
                send_file(ctx, file.path(), len, output, &mut progress)?;
                finish_send(ctx, output, progress)
            }
            Source::Array(_) => Err(NetworkError::ArrayBodyNotAllowed),
            _ => {
                let text = body.to_string();
                output.declare_length(text.len() as u64)?;
                let mut progress = Progress::with_total(text.len() as u64);
                send_bytes(ctx, text.as_bytes(), output, &mut progress)?;
                finish_send(ctx, output, progress)
            }
        }
    }

    fn check_parameter(&self, existing: &Parameters, key: &str, value: &Body) -> Result<()> {
        if value.body_type() == BodyType::Array {
            return Err(NetworkError::ArrayBodyNotAllowed);
        }
        if existing.keys().any(|k| k != key) {
            return Err(NetworkError::TooManyParameters);
        }
        Ok(())
    }
}

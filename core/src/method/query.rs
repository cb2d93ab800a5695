//! GET, DELETE and HEAD: parameters travel in the query string and there is
//! no request body.

use url::Url;

use super::{base_connection, IoContext, Progress, RequestMethod};
use crate::connection::{Connection, RequestBody};
use crate::error::Result;
use crate::http::{HttpMethod, HttpSettings};
use crate::store::{parameters_string, Parameters};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryMethod {
    verb: HttpMethod,
}

impl QueryMethod {
    pub fn get() -> Self {
        Self { verb: HttpMethod::Get }
    }

    pub fn delete() -> Self {
        Self {
            verb: HttpMethod::Delete,
        }
    }

    pub fn head() -> Self {
        Self { verb: HttpMethod::Head }
    }
}

impl RequestMethod for QueryMethod {
    fn name(&self) -> &'static str {
        self.verb.as_str()
    }

    fn build_connection(&self, url: &Url, parameters: &Parameters) -> Result<Connection> {
        let mut url = url.clone();
        let query = parameters_string(parameters);
        url.set_query((!query.is_empty()).then_some(query.as_str()));
        Ok(base_connection(url, false))
    }

    fn build_http_connection(&self, http: &mut HttpSettings) {
        http.method = self.verb;
        http.follow_redirects = self.verb == HttpMethod::Get;
    }

    fn do_send_connection(
        &self,
        _ctx: &IoContext<'_>,
        _parameters: &Parameters,
        _output: &mut RequestBody<'_>,
    ) -> Result<Progress> {
        Ok(Progress::NONE)
    }

    fn supports_non_http_protocol(&self) -> bool {
        self.verb == HttpMethod::Get
    }
}

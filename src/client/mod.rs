// Copyright (c) 2025 ADBC Drivers Contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Transport abstraction for the HTTP query interface.
//!
//! This module provides:
//! - `Transport` trait: send one query request and observe response headers
//! - `HttpTransport`: HTTP implementation with retry logic that streams
//!   response headers to the hook as they arrive

pub mod http;
mod stream;

use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;

pub use http::{Credentials, HttpClientConfig, HttpTransport};

/// Request field selecting the response format.
pub const PARAM_DEFAULT_FORMAT: &str = "default_format";
pub const PARAM_QUERY_ID: &str = "query_id";
pub const PARAM_REPLACE_RUNNING_QUERY: &str = "replace_running_query";
pub const PARAM_DATABASE: &str = "database";
pub const PARAM_MAX_EXECUTION_TIME: &str = "max_execution_time";
pub const PARAM_WAIT_END_OF_QUERY: &str = "wait_end_of_query";
pub const PARAM_SEND_PROGRESS: &str = "send_progress_in_http_headers";
/// Prefix of out-of-band parameter value fields.
pub const PARAM_VALUE_PREFIX: &str = "param_";

pub const HEADER_PROGRESS: &str = "X-ClickHouse-Progress";
pub const HEADER_SUMMARY: &str = "X-ClickHouse-Summary";
pub const HEADER_QUERY_ID: &str = "X-ClickHouse-Query-Id";
pub const HEADER_EXCEPTION_CODE: &str = "X-ClickHouse-Exception-Code";
pub const HEADER_USER: &str = "X-ClickHouse-User";
pub const HEADER_KEY: &str = "X-ClickHouse-Key";

/// One query request: URL fields plus the query text sent as the body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HttpRequest {
    pub params: Vec<(String, String)>,
    pub body: String,
}

impl HttpRequest {
    pub fn new(body: impl Into<String>) -> Self {
        Self {
            params: Vec::new(),
            body: body.into(),
        }
    }

    pub fn param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((name.into(), value.into()));
        self
    }

    /// Value of the first field called `name`.
    pub fn get_param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }
}

/// A complete response. Headers are kept in arrival order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl HttpResponse {
    /// Last value of the header called `name`, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .rev()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Observer for response headers, called once per header in arrival order.
///
/// Runs on the transport's task while the caller is still waiting for the
/// response, so implementations must be cheap and must not block.
pub trait HeaderHook: Send + Sync {
    fn on_header(&self, name: &str, value: &str);
}

/// Abstract interface for sending query requests.
///
/// Implementations own connection handling. The core never retries a
/// request; whatever retry policy a transport applies happens below this
/// trait.
#[async_trait]
pub trait Transport: Send + Sync + std::fmt::Debug {
    /// Send `request` and wait for the full response.
    ///
    /// When `hook` is given, every response header is passed to it as soon
    /// as it is received, while the server may still be running the query.
    async fn send(
        &self,
        request: HttpRequest,
        hook: Option<Arc<dyn HeaderHook>>,
    ) -> Result<HttpResponse>;
}

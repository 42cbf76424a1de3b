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

//! Server error classification.
//!
//! The server signals failures with an `X-ClickHouse-Exception-Code`
//! header and, in the body, a banner of the form
//! `Code: 216. DB::Exception: <message>. (QUERY_WITH_SAME_ID_IS_ALREADY_RUNNING) (version 23.3.1.1)`.
//! The header wins when both are present; the banner supplies the message.

use crate::error::{Error, DUPLICATE_QUERY_ID_CODE, QUERY_ABORTED_CODE, QUERY_TIMEOUT_CODE};
use crate::types::QueryProgress;
use regex::Regex;
use std::sync::OnceLock;
use std::time::Duration;

static BANNER: OnceLock<Regex> = OnceLock::new();

fn banner() -> &'static Regex {
    BANNER.get_or_init(|| {
        Regex::new(r"(?ims)^Code: ([0-9]+).*?Exception: (.*?)\s*\(version")
            .expect("valid exception banner regex")
    })
}

/// A classified server-side failure, before it is turned into an [`Error`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerError {
    pub code: i32,
    pub message: String,
}

impl ServerError {
    /// Map to the crate error for the query that produced it.
    ///
    /// `timeout` and `progress` only feed [`Error::QueryTimeout`].
    pub fn into_error(
        self,
        query_id: &str,
        timeout: Option<Duration>,
        progress: Option<QueryProgress>,
    ) -> Error {
        match self.code {
            DUPLICATE_QUERY_ID_CODE => Error::DuplicateQueryId {
                code: self.code,
                message: self.message,
            },
            QUERY_ABORTED_CODE => Error::QueryAborted {
                query_id: query_id.to_string(),
                message: Some(self.message),
            },
            QUERY_TIMEOUT_CODE => Error::QueryTimeout {
                query_id: query_id.to_string(),
                timeout: timeout.unwrap_or_default(),
                progress,
                message: self.message,
            },
            code => Error::Server {
                code,
                message: self.message,
            },
        }
    }
}

/// Classify a response.
///
/// Returns `None` when neither an exception code nor an error banner is
/// present, in which case the body is an ordinary payload.
pub fn classify(body: &str, exception_code: Option<i32>) -> Option<ServerError> {
    let matched = banner().captures(body).and_then(|caps| {
        let code = caps.get(1)?.as_str().parse::<i32>().ok()?;
        let message = caps.get(2)?.as_str().to_string();
        Some((code, message))
    });

    match (exception_code, matched) {
        (Some(code), Some((_, message))) => Some(ServerError { code, message }),
        (Some(code), None) => Some(ServerError {
            code,
            message: body.trim().to_string(),
        }),
        (None, Some((code, message))) => Some(ServerError { code, message }),
        (None, None) => None,
    }
}

/// Parse the value of an exception-code header.
pub fn parse_exception_code(value: &str) -> Option<i32> {
    value.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const DUPLICATE: &str = "Code: 216, e.displayText() = DB::Exception: Query with id = x is already running. (version 21.3.1.6130 (official build))";

    #[test]
    fn test_banner_without_header() {
        let err = classify(DUPLICATE, None).unwrap();
        assert_eq!(err.code, 216);
        assert_eq!(err.message, "Query with id = x is already running.");
        assert!(matches!(
            err.into_error("x", None, None),
            Error::DuplicateQueryId { code: 216, .. }
        ));
    }

    #[test]
    fn test_modern_banner_format() {
        let body = "Code: 394. DB::Exception: Query was cancelled. (QUERY_WAS_CANCELLED) (version 23.8.2.7 (official build))\n";
        let err = classify(body, None).unwrap();
        assert_eq!(err.code, 394);
        assert_eq!(err.message, "Query was cancelled. (QUERY_WAS_CANCELLED)");
        match err.into_error("q-1", None, None) {
            Error::QueryAborted { query_id, message } => {
                assert_eq!(query_id, "q-1");
                assert!(message.unwrap().starts_with("Query was cancelled"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_banner_after_partial_output() {
        let body = "{\"meta\": [\n\nCode: 159. DB::Exception: Timeout exceeded: elapsed 1.0 seconds, maximum: 1. (TIMEOUT_EXCEEDED) (version 23.8.2.7)";
        let err = classify(body, None).unwrap();
        assert_eq!(err.code, 159);
        let progress = QueryProgress::new(10, 100, 1000);
        match err.into_error("q-2", Some(Duration::from_secs(1)), Some(progress)) {
            Error::QueryTimeout {
                timeout, progress, ..
            } => {
                assert_eq!(timeout, Duration::from_secs(1));
                assert_eq!(progress, Some(QueryProgress::new(10, 100, 1000)));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_header_code_takes_precedence() {
        let err = classify(DUPLICATE, Some(60)).unwrap();
        assert_eq!(err.code, 60);
        assert_eq!(err.message, "Query with id = x is already running.");

        let err = classify("  something broke \n", Some(62)).unwrap();
        assert_eq!(err, ServerError { code: 62, message: "something broke".to_string() });
        assert!(matches!(
            err.into_error("q", None, None),
            Error::Server { code: 62, .. }
        ));
    }

    #[test]
    fn test_ordinary_bodies_are_not_errors() {
        assert!(classify("", None).is_none());
        assert!(classify(r#"{"meta": [], "data": [], "rows": 0}"#, None).is_none());
        assert!(classify("Code: abc Exception: x (version 1)", None).is_none());
    }

    #[test]
    fn test_parse_exception_code() {
        assert_eq!(parse_exception_code(" 216 "), Some(216));
        assert_eq!(parse_exception_code("x"), None);
    }
}

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

//! Error types for query execution and result decoding.
//!
//! Every failure surfaced by this crate is a variant of [`Error`], so callers
//! can branch on the kind of failure instead of inspecting message text.

use crate::reader::TargetKind;
use crate::types::QueryProgress;
use std::time::Duration;
use thiserror::Error;

/// Server code reported when a query id is already in use.
pub const DUPLICATE_QUERY_ID_CODE: i32 = 216;
/// Server code reported when a query was cancelled or killed.
pub const QUERY_ABORTED_CODE: i32 = 394;
/// Server code reported when `max_execution_time` was exceeded.
pub const QUERY_TIMEOUT_CODE: i32 = 159;

#[derive(Debug, Error)]
pub enum Error {
    /// A `:name` placeholder had no parameter with that name.
    #[error("malformed query template: no parameter named '{name}'")]
    MissingParameter { name: String },

    /// Invalid client or per-query configuration.
    #[error("invalid options: {0}")]
    InvalidOptions(String),

    #[error("duplicate query id (code {code}): {message}")]
    DuplicateQueryId { code: i32, message: String },

    #[error("query {query_id} was aborted")]
    QueryAborted {
        query_id: String,
        message: Option<String>,
    },

    #[error("query {query_id} timed out after {timeout:?}: {message}")]
    QueryTimeout {
        query_id: String,
        timeout: Duration,
        progress: Option<QueryProgress>,
        message: String,
    },

    /// Any other error reported by the server, code and message untouched.
    #[error("server error {code}: {message}")]
    Server { code: i32, message: String },

    #[error("unknown column type '{type_name}'")]
    UnknownType { type_name: String },

    #[error("unable to convert '{input}' of type {type_name} to {target:?}: {reason}")]
    TypeConversion {
        type_name: String,
        input: String,
        target: TargetKind,
        reason: String,
    },

    #[error("transport error: {0}")]
    Transport(String),

    /// The waiting task was cancelled or dropped before the query finished.
    #[error("interrupted: {0}")]
    Interrupted(String),

    #[error("unexpected response {status}: {body}")]
    UnexpectedResponse { status: u16, body: String },

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid state: {0}")]
    InvalidState(String),
}

impl Error {
    /// Stable tag for the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::MissingParameter { .. } => "MALFORMED_TEMPLATE",
            Error::InvalidOptions(_) => "INVALID_OPTIONS",
            Error::DuplicateQueryId { .. } => "DUPLICATE_QUERY_ID",
            Error::QueryAborted { .. } => "QUERY_ABORTED",
            Error::QueryTimeout { .. } => "QUERY_TIMEOUT",
            Error::Server { .. } => "SERVER_ERROR",
            Error::UnknownType { .. } => "UNKNOWN_TYPE",
            Error::TypeConversion { .. } => "TYPE_CONVERSION",
            Error::Transport(_) => "TRANSPORT",
            Error::Interrupted(_) => "INTERRUPTED",
            Error::UnexpectedResponse { .. } => "UNEXPECTED_RESPONSE",
            Error::Json(_) => "JSON",
            Error::InvalidState(_) => "INVALID_STATE",
        }
    }

    /// Numeric server error code, if the server reported one.
    ///
    /// A query aborted locally, before the server answered, has no code.
    pub fn code(&self) -> Option<i32> {
        match self {
            Error::DuplicateQueryId { code, .. } | Error::Server { code, .. } => Some(*code),
            Error::QueryAborted { message: Some(_), .. } => Some(QUERY_ABORTED_CODE),
            Error::QueryTimeout { .. } => Some(QUERY_TIMEOUT_CODE),
            _ => None,
        }
    }

    pub(crate) fn transport(message: impl Into<String>) -> Self {
        Error::Transport(message.into())
    }

    pub(crate) fn invalid_options(message: impl Into<String>) -> Self {
        Error::InvalidOptions(message.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

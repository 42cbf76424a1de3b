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

//! ClickHouse HTTP query execution for Rust
//!
//! This crate runs parameterized queries against the ClickHouse HTTP
//! interface and decodes `JSON` results into typed rows.
//!
//! ## Overview
//!
//! - [`ClientConfig`] - Holds endpoint, credentials and client options
//! - [`Connection`] - Blocking facade that executes queries
//! - [`Statement`] - One query execution and its state machine
//! - [`TypeRegistry`] - Maps server type names to value decoders
//!
//! ## Features
//!
//! - **Named parameters**: `:name` placeholders become `{name:Type}` and the
//!   values travel out of band, never spliced into the query text
//! - **Progress**: per-query progress callback or event stream, with
//!   cooperative abort that kills the query on the server
//! - **Timeouts**: server-side `max_execution_time` plus a local wait limit
//! - **Error classification**: duplicate query ids, aborted and timed-out
//!   queries are told apart from other server errors
//!
//! ## Example
//!
//! ```ignore
//! use clickhouse_http_query::{ClientConfig, QueryOptions, QueryParam};
//!
//! let connection = ClientConfig::new("http://localhost:8123")
//!     .with_credentials("default", "")
//!     .connect()?;
//!
//! let result = connection.query(
//!     "SELECT number FROM system.numbers WHERE number IN (:ids) LIMIT 3",
//!     vec![QueryParam::array("ids", [4u64, 12, 989])],
//!     QueryOptions::new().with_progress(|p| {
//!         println!("{}", p);
//!         true
//!     }),
//! )?;
//! for row in &result {
//!     println!("{:?}", row.get_u64("number"));
//! }
//! ```
//!
//! ## Configuration Options
//!
//! | Option | Default | Description |
//! |--------|---------|-------------|
//! | `uri` | | Base URL of the HTTP interface |
//! | `clickhouse.database` | | Default database |
//! | `clickhouse.user` | `default` | User name |
//! | `clickhouse.password` | | Password |
//! | `clickhouse.request_timeout_ms` | | Local wait limit per query |
//! | `clickhouse.http.connect_timeout_ms` | 30000 | TCP connect timeout |
//! | `clickhouse.http.max_retries` | 3 | Retries for requests that never reached the server |
//! | `clickhouse.http.retry_delay_ms` | 500 | Base retry delay, doubled each attempt |
//! | `clickhouse.log_level` | `warn` | Log level, or `off` |
//! | `clickhouse.log_file` | stderr | Log file path |

pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod exception;
pub mod logging;
pub mod progress;
pub mod reader;
pub mod statement;
pub mod template;
pub mod types;

// Re-export main types
pub use config::ClientConfig;
pub use connection::{Connection, ConnectionConfig, QueryHandle};
pub use error::{Error, Result};
pub use progress::ProgressEvent;
pub use reader::{DataType, ResultSet, Row, TargetKind, TypeRegistry};
pub use statement::{ExecutionState, Statement};
pub use types::{
    ParamValue, ProgressCallback, QueryOptions, QueryParam, QueryProgress, RawResponse, Value,
};

// Re-export transport types for callers bringing their own HTTP stack
pub use client::{HeaderHook, HttpRequest, HttpResponse, HttpTransport, Transport};

pub use tokio_util::sync::CancellationToken;

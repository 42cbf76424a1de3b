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

//! Type definitions shared across the crate.
//!
//! This module contains data structures organized by domain:
//! - `param`: named query parameters and their literal rendering
//! - `options`: per-query options
//! - `progress`: progress snapshots parsed from response headers
//! - `response`: `JSON` output format body and raw responses
//! - `value`: decoded cell values

pub mod options;
pub mod param;
pub mod progress;
pub mod response;
pub mod value;

// Re-export commonly used types
pub use options::{ProgressCallback, QueryOptions};
pub use param::{params_from_pairs, ParamValue, QueryParam, ToParam};
pub use progress::QueryProgress;
pub use response::{ColumnMeta, QueryResponse, QueryStatistics, RawResponse};
pub use value::Value;

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

//! Response types for the `JSON` output format.
//!
//! These map directly to the body the server produces for
//! `default_format=JSON`. Cell values are kept as raw JSON until the
//! reader decodes them against the column types in `meta`.

use crate::types::progress::deserialize_counter;
use crate::types::QueryProgress;
use serde::{Deserialize, Deserializer};
use std::time::Duration;

/// Completed response of one executed query, before decoding.
#[derive(Debug, Clone)]
pub struct RawResponse {
    /// Effective query id the request ran under.
    pub query_id: String,
    pub status: u16,
    pub content_type: Option<String>,
    pub body: String,
    /// Parsed `X-ClickHouse-Summary` header, if one was sent.
    pub summary: Option<QueryProgress>,
}

impl RawResponse {
    pub fn is_json(&self) -> bool {
        self.content_type
            .as_deref()
            .map(|ct| ct.contains("application/json"))
            .unwrap_or(false)
    }
}

/// Top-level `JSON` format body.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct QueryResponse {
    #[serde(default)]
    pub meta: Vec<ColumnMeta>,
    #[serde(default)]
    pub data: Vec<serde_json::Map<String, serde_json::Value>>,
    #[serde(default)]
    pub statistics: Option<QueryStatistics>,
    #[serde(default, deserialize_with = "deserialize_counter")]
    pub rows: u64,
    #[serde(default, deserialize_with = "deserialize_optional_counter")]
    pub rows_before_limit_at_least: Option<u64>,
}

/// Name and declared type of one result column.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ColumnMeta {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
}

impl ColumnMeta {
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
        }
    }
}

/// Execution statistics reported alongside the data.
#[derive(Debug, Clone, Copy, PartialEq, Default, Deserialize)]
pub struct QueryStatistics {
    /// Elapsed server time in seconds.
    #[serde(default)]
    pub elapsed: f64,
    #[serde(default, deserialize_with = "deserialize_counter")]
    pub rows_read: u64,
    #[serde(default, deserialize_with = "deserialize_counter")]
    pub bytes_read: u64,
}

impl QueryStatistics {
    /// Elapsed server time; zero when the reported value is negative, not a
    /// number, or too large for a [`Duration`].
    pub fn elapsed(&self) -> Duration {
        Duration::try_from_secs_f64(self.elapsed).unwrap_or(Duration::ZERO)
    }
}

fn deserialize_optional_counter<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    struct Wrapper(#[serde(deserialize_with = "deserialize_counter")] u64);

    let opt: Option<Wrapper> = Option::deserialize(deserializer)?;
    Ok(opt.map(|Wrapper(v)| v))
}

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

//! Query progress as reported by the `X-ClickHouse-Progress` and
//! `X-ClickHouse-Summary` response headers.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer};
use std::fmt;

/// Snapshot of how far a running query has come.
///
/// `total_rows_to_read` is an estimate from the server and may lag behind
/// `read_rows`; it is clamped so that it is never smaller than `read_rows`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(from = "RawProgress")]
pub struct QueryProgress {
    read_rows: u64,
    read_bytes: u64,
    total_rows_to_read: u64,
}

impl QueryProgress {
    pub const ZERO: QueryProgress = QueryProgress {
        read_rows: 0,
        read_bytes: 0,
        total_rows_to_read: 0,
    };

    pub fn new(read_rows: u64, read_bytes: u64, total_rows_to_read: u64) -> Self {
        Self {
            read_rows,
            read_bytes,
            total_rows_to_read: total_rows_to_read.max(read_rows),
        }
    }

    pub fn read_rows(&self) -> u64 {
        self.read_rows
    }

    pub fn read_bytes(&self) -> u64 {
        self.read_bytes
    }

    pub fn total_rows_to_read(&self) -> u64 {
        self.total_rows_to_read
    }

    /// Percentage of rows read, in `[0, 100]`. Zero when either operand is zero.
    pub fn percent_done(&self) -> f64 {
        if self.read_rows == 0 || self.total_rows_to_read == 0 {
            return 0.0;
        }
        let pct = self.read_rows as f64 / self.total_rows_to_read as f64 * 100.0;
        pct.clamp(0.0, 100.0)
    }

    /// Parse a progress header value.
    pub fn from_header(value: &str) -> serde_json::Result<Self> {
        serde_json::from_str(value)
    }
}

impl fmt::Display for QueryProgress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:.1}% ({} of {} rows, {} bytes)",
            self.percent_done(),
            self.read_rows,
            self.total_rows_to_read,
            self.read_bytes
        )
    }
}

/// Header payload as sent by the server. Counters arrive as JSON strings
/// (`{"read_rows":"42",...}`) but plain numbers are accepted too.
#[derive(Deserialize)]
struct RawProgress {
    #[serde(default, deserialize_with = "deserialize_counter")]
    read_rows: u64,
    #[serde(default, deserialize_with = "deserialize_counter")]
    read_bytes: u64,
    #[serde(default, deserialize_with = "deserialize_counter")]
    total_rows_to_read: u64,
}

impl From<RawProgress> for QueryProgress {
    fn from(raw: RawProgress) -> Self {
        QueryProgress::new(raw.read_rows, raw.read_bytes, raw.total_rows_to_read)
    }
}

pub(crate) fn deserialize_counter<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    // Counters arrive either as JSON numbers or as quoted decimal strings.
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::Number(n) => n
            .as_u64()
            .ok_or_else(|| D::Error::custom(format!("invalid counter {}", n))),
        serde_json::Value::String(s) => s.trim().parse().map_err(D::Error::custom),
        other => Err(D::Error::custom(format!("invalid counter {}", other))),
    }
}

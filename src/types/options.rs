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

//! Per-query options.

use crate::error::{Error, Result};
use crate::types::QueryProgress;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Called for every distinct progress report. Returning `false` aborts the
/// query: it is killed on the server and the call fails with
/// [`Error::QueryAborted`].
pub type ProgressCallback = Arc<dyn Fn(&QueryProgress) -> bool + Send + Sync>;

/// Options for a single query execution.
///
/// Fields are public; [`QueryOptions::validate`] runs before anything is sent.
#[derive(Clone, Default)]
pub struct QueryOptions {
    /// Query id to use. A fresh UUID is generated when unset.
    pub query_id: Option<String>,
    /// Replace a running query with the same id instead of failing with
    /// [`Error::DuplicateQueryId`]. Requires `query_id`.
    pub replace_running_query: bool,
    /// Server-enforced limit, sent as `max_execution_time` in whole seconds.
    pub max_execution_time: Option<Duration>,
    pub progress_callback: Option<ProgressCallback>,
    /// Default database for this query; overrides the client default.
    pub database: Option<String>,
    /// Local wait limit; overrides the client's request timeout.
    pub timeout: Option<Duration>,
    /// Cancelling this token aborts the query the same way a progress
    /// callback returning `false` does.
    pub cancellation: Option<CancellationToken>,
}

impl QueryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Options that run under `query_id`, replacing any running query with it.
    pub fn replacing(query_id: impl Into<String>) -> Self {
        Self {
            query_id: Some(query_id.into()),
            replace_running_query: true,
            ..Self::default()
        }
    }

    pub fn with_query_id(mut self, query_id: impl Into<String>) -> Self {
        self.query_id = Some(query_id.into());
        self
    }

    pub fn with_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(&QueryProgress) -> bool + Send + Sync + 'static,
    {
        self.progress_callback = Some(Arc::new(callback));
        self
    }

    pub fn with_max_execution_time(mut self, limit: Duration) -> Self {
        self.max_execution_time = Some(limit);
        self
    }

    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.replace_running_query && self.query_id.is_none() {
            return Err(Error::invalid_options(
                "query_id is required when replace_running_query is set",
            ));
        }
        if let Some(id) = &self.query_id {
            if id.trim().is_empty() {
                return Err(Error::invalid_options("query_id must not be empty"));
            }
        }
        Ok(())
    }
}

impl fmt::Debug for QueryOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryOptions")
            .field("query_id", &self.query_id)
            .field("replace_running_query", &self.replace_running_query)
            .field("max_execution_time", &self.max_execution_time)
            .field(
                "progress_callback",
                &if self.progress_callback.is_some() {
                    "<set>"
                } else {
                    "<not set>"
                },
            )
            .field("database", &self.database)
            .field("timeout", &self.timeout)
            .field("cancellation", &self.cancellation.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replace_requires_query_id() {
        let options = QueryOptions {
            replace_running_query: true,
            ..QueryOptions::default()
        };
        assert!(matches!(options.validate(), Err(Error::InvalidOptions(_))));
        assert!(QueryOptions::replacing("q-1").validate().is_ok());
    }

    #[test]
    fn test_empty_query_id_rejected() {
        assert!(QueryOptions::new().with_query_id("  ").validate().is_err());
        assert!(QueryOptions::new().validate().is_ok());
    }

    #[test]
    fn test_debug_hides_callback() {
        let options = QueryOptions::new().with_progress(|_| true);
        let text = format!("{:?}", options);
        assert!(text.contains("<set>"));
    }
}

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

//! Blocking connection facade.
//!
//! A [`Connection`] owns a Tokio runtime and a [`Transport`]. Each call
//! builds a [`Statement`] and drives it to completion with `block_on`;
//! [`Connection::submit`] instead runs the statement in the background and
//! hands back a [`QueryHandle`].

use crate::client::Transport;
use crate::error::{Error, Result};
use crate::progress::ProgressEvent;
use crate::reader::{ResultSet, TypeRegistry};
use crate::statement::{ExecutionContext, Statement};
use crate::types::{QueryOptions, QueryParam, RawResponse};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

/// Connection-level defaults.
#[derive(Debug, Clone, Default)]
pub struct ConnectionConfig {
    /// Default database, unless a query sets its own.
    pub database: Option<String>,
    /// Local wait limit for every query, unless a query sets its own.
    pub request_timeout: Option<Duration>,
    pub registry: TypeRegistry,
}

/// A client for one ClickHouse HTTP endpoint.
#[derive(Debug)]
pub struct Connection {
    context: Arc<ExecutionContext>,

    // Tokio runtime for async operations
    runtime: tokio::runtime::Runtime,
}

impl Connection {
    /// Connect over an arbitrary transport.
    pub fn with_transport(transport: Arc<dyn Transport>, config: ConnectionConfig) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .thread_name("clickhouse-http-query")
            .build()
            .map_err(|e| Error::transport(format!("failed to create runtime: {}", e)))?;

        debug!(
            "Created connection (database: {:?}, request timeout: {:?}, {} registered types)",
            config.database,
            config.request_timeout,
            config.registry.len()
        );

        Ok(Self {
            context: Arc::new(ExecutionContext {
                transport,
                registry: config.registry,
                database: config.database,
                request_timeout: config.request_timeout,
            }),
            runtime,
        })
    }

    pub fn database(&self) -> Option<&str> {
        self.context.database.as_deref()
    }

    /// Type registry used to decode results. Registering on it affects all
    /// later queries on this connection.
    pub fn registry(&self) -> &TypeRegistry {
        &self.context.registry
    }

    /// A statement for async callers. It must be awaited inside a Tokio
    /// runtime.
    pub fn statement(
        &self,
        query: impl Into<String>,
        params: Vec<QueryParam>,
        options: QueryOptions,
    ) -> Statement {
        Statement::new(Arc::clone(&self.context), query, params, options)
    }

    /// Run a query and return the undecoded response.
    pub fn execute(
        &self,
        query: &str,
        params: Vec<QueryParam>,
        options: QueryOptions,
    ) -> Result<RawResponse> {
        let mut statement = self.statement(query, params, options);
        self.runtime.block_on(statement.execute())
    }

    /// Run a query and decode its rows.
    pub fn query(
        &self,
        query: &str,
        params: Vec<QueryParam>,
        options: QueryOptions,
    ) -> Result<ResultSet> {
        let mut statement = self.statement(query, params, options);
        self.runtime.block_on(statement.query())
    }

    /// Start a query in the background.
    ///
    /// The query id and cancellation token are fixed before the request is
    /// sent, so the handle can cancel or kill the query at any point.
    pub fn submit(
        &self,
        query: &str,
        params: Vec<QueryParam>,
        mut options: QueryOptions,
    ) -> Result<QueryHandle> {
        options.validate()?;
        let query_id = options
            .query_id
            .get_or_insert_with(|| Uuid::new_v4().to_string())
            .clone();
        let token = options
            .cancellation
            .get_or_insert_with(CancellationToken::new)
            .clone();

        let (tx, rx) = unbounded_channel();
        let mut statement = self.statement(query, params, options).with_events(tx);
        let result = self.runtime.spawn(async move { statement.query().await });

        debug!("Submitted query {}", query_id);
        Ok(QueryHandle {
            query_id,
            events: rx,
            result,
            token,
            runtime: self.runtime.handle().clone(),
        })
    }

    /// Kill a running query by id.
    pub fn kill_query(&self, query_id: &str, sync: bool) -> Result<()> {
        self.runtime.block_on(self.context.kill(query_id, sync))
    }

    /// Shut down the runtime without waiting for in-flight requests.
    pub fn close(self) {
        debug!("Closing connection");
        self.runtime.shutdown_background();
    }
}

/// A query running in the background.
///
/// Iterating the handle yields its progress events and ends when the query
/// finishes; [`QueryHandle::wait`] returns the decoded result. Both block,
/// so they must not be called from inside an async context.
#[derive(Debug)]
pub struct QueryHandle {
    query_id: String,
    events: UnboundedReceiver<ProgressEvent>,
    result: JoinHandle<Result<ResultSet>>,
    token: CancellationToken,
    runtime: Handle,
}

impl QueryHandle {
    pub fn query_id(&self) -> &str {
        &self.query_id
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Abort the query. It is killed on the server and
    /// [`wait`](Self::wait) fails with [`Error::QueryAborted`].
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Wait for the query to finish.
    pub fn wait(self) -> Result<ResultSet> {
        let query_id = self.query_id;
        self.runtime
            .block_on(self.result)
            .map_err(|e| Error::Interrupted(format!("query {} did not complete: {}", query_id, e)))?
    }
}

impl Iterator for QueryHandle {
    type Item = ProgressEvent;

    fn next(&mut self) -> Option<ProgressEvent> {
        self.events.blocking_recv()
    }
}

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

//! Per-query execution.
//!
//! A [`Statement`] moves through `Building → Sent → {Succeeded, Failed,
//! Aborted, TimedOut}` exactly once. The transport request runs on its own
//! task; the statement waits on whichever comes first of the request's
//! cancellation token, the response, or the local deadline.

use crate::client::{
    HeaderHook, HttpRequest, HttpResponse, Transport, HEADER_EXCEPTION_CODE, HEADER_QUERY_ID,
    HEADER_SUMMARY, PARAM_DATABASE, PARAM_DEFAULT_FORMAT, PARAM_MAX_EXECUTION_TIME,
    PARAM_QUERY_ID, PARAM_REPLACE_RUNNING_QUERY, PARAM_SEND_PROGRESS, PARAM_VALUE_PREFIX,
    PARAM_WAIT_END_OF_QUERY,
};
use crate::error::{Error, Result};
use crate::exception::{classify, parse_exception_code};
use crate::progress::{ProgressEvent, ProgressTracker};
use crate::reader::{decode_body, ResultSet, TypeRegistry};
use crate::template;
use crate::types::{QueryOptions, QueryParam, QueryProgress, RawResponse};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::{AbortHandle, JoinError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

/// Response format requested for every query.
pub const JSON_FORMAT: &str = "JSON";

const KILL_QUERY: &str = "KILL QUERY WHERE query_id = :query_id";
const KILL_QUERY_SYNC: &str = "KILL QUERY WHERE query_id = :query_id SYNC";

/// Lifecycle of a single statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionState {
    Building,
    Sent,
    Succeeded,
    Failed,
    Aborted,
    TimedOut,
}

impl ExecutionState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ExecutionState::Building | ExecutionState::Sent)
    }
}

/// Connection-wide state shared by all statements.
#[derive(Debug)]
pub(crate) struct ExecutionContext {
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) registry: TypeRegistry,
    pub(crate) database: Option<String>,
    pub(crate) request_timeout: Option<Duration>,
}

impl ExecutionContext {
    /// Kill `query_id` on the server. The kill runs under its own fresh id.
    pub(crate) async fn kill(&self, query_id: &str, sync: bool) -> Result<()> {
        let params = [QueryParam::of("query_id", query_id)];
        let sql = template::format(if sync { KILL_QUERY_SYNC } else { KILL_QUERY }, &params)?;
        let kill_id = Uuid::new_v4().to_string();

        let mut request = HttpRequest::new(sql)
            .param(PARAM_DEFAULT_FORMAT, JSON_FORMAT)
            .param(PARAM_QUERY_ID, kill_id.as_str());
        for param in &params {
            request = request.param(value_field(param), param.wire_value());
        }

        debug!("Killing query {} (sync={})", query_id, sync);
        let response = self.transport.send(request, None).await?;
        check_response(&kill_id, &response, None, None)
    }

    /// Fire-and-forget kill. Failures are logged, never returned.
    pub(crate) fn spawn_kill(self: &Arc<Self>, query_id: String) {
        let context = Arc::clone(self);
        tokio::spawn(async move {
            match context.kill(&query_id, false).await {
                Ok(()) => debug!("Kill issued for query {}", query_id),
                Err(e) => warn!("Failed to kill query {}: {}", query_id, e),
            }
        });
    }
}

/// A query bound to its parameters and options, executed at most once.
#[derive(Debug)]
pub struct Statement {
    context: Arc<ExecutionContext>,
    query: String,
    params: Vec<QueryParam>,
    options: QueryOptions,
    events: Option<UnboundedSender<ProgressEvent>>,
    query_id: Option<String>,
    state: ExecutionState,
}

impl Statement {
    pub(crate) fn new(
        context: Arc<ExecutionContext>,
        query: impl Into<String>,
        params: Vec<QueryParam>,
        options: QueryOptions,
    ) -> Self {
        Self {
            context,
            query: query.into(),
            params,
            options,
            events: None,
            query_id: None,
            state: ExecutionState::Building,
        }
    }

    /// Also publish progress reports to `events`.
    pub(crate) fn with_events(mut self, events: UnboundedSender<ProgressEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn state(&self) -> ExecutionState {
        self.state
    }

    /// Effective query id, known once execution started.
    pub fn query_id(&self) -> Option<&str> {
        self.query_id.as_deref()
    }

    pub fn sql_query(&self) -> &str {
        &self.query
    }

    /// Execute and decode the `JSON` body.
    pub async fn query(&mut self) -> Result<ResultSet> {
        let raw = self.execute().await?;
        decode_body(&self.context.registry, &raw.body)
    }

    /// Execute and return the undecoded response.
    pub async fn execute(&mut self) -> Result<RawResponse> {
        if self.state != ExecutionState::Building {
            return Err(Error::InvalidState(format!(
                "statement already executed (state {:?})",
                self.state
            )));
        }

        let query_id = self
            .options
            .query_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        self.query_id = Some(query_id.clone());

        let request = match self.build_request(&query_id) {
            Ok(request) => request,
            Err(e) => {
                self.state = ExecutionState::Failed;
                return Err(e);
            }
        };

        let token = self
            .options
            .cancellation
            .as_ref()
            .map(CancellationToken::child_token)
            .unwrap_or_else(CancellationToken::new);
        let tracker = self.tracks_progress().then(|| {
            Arc::new(ProgressTracker::new(
                query_id.as_str(),
                self.options.progress_callback.clone(),
                self.events.take(),
                token.clone(),
            ))
        });
        let hook = tracker.clone().map(|t| t as Arc<dyn HeaderHook>);
        let timeout = self.options.timeout.or(self.context.request_timeout);

        debug!(
            "Sending query {} with {} parameter(s), timeout {:?}",
            query_id,
            self.params.len(),
            timeout
        );
        self.state = ExecutionState::Sent;

        let transport = Arc::clone(&self.context.transport);
        let mut task = tokio::spawn(async move { transport.send(request, hook).await });
        let _abort = AbortOnDrop(task.abort_handle());

        let outcome = tokio::select! {
            biased;
            _ = token.cancelled() => Outcome::Cancelled,
            joined = &mut task => Outcome::Completed(joined),
            _ = wait_for(timeout) => Outcome::TimedOut,
        };

        match outcome {
            Outcome::Cancelled => {
                if let Some(ref tracker) = tracker {
                    tracker.abort();
                }
                self.context.spawn_kill(query_id.clone());
                self.state = ExecutionState::Aborted;
                Err(Error::QueryAborted {
                    query_id,
                    message: None,
                })
            }
            Outcome::TimedOut => {
                let progress = tracker.as_ref().and_then(|t| t.last());
                if let Some(ref tracker) = tracker {
                    tracker.abort();
                }
                self.context.spawn_kill(query_id.clone());
                self.state = ExecutionState::TimedOut;
                let timeout = timeout.unwrap_or_default();
                Err(Error::QueryTimeout {
                    query_id,
                    timeout,
                    progress,
                    message: format!("no response within {:?}", timeout),
                })
            }
            Outcome::Completed(Err(e)) => {
                self.state = ExecutionState::Failed;
                Err(Error::Interrupted(format!(
                    "request for query {} did not complete: {}",
                    query_id, e
                )))
            }
            Outcome::Completed(Ok(Err(e))) => {
                self.state = ExecutionState::Failed;
                Err(e)
            }
            Outcome::Completed(Ok(Ok(response))) => {
                self.complete(query_id, response, tracker.as_deref(), timeout)
            }
        }
    }

    fn complete(
        &mut self,
        query_id: String,
        response: HttpResponse,
        tracker: Option<&ProgressTracker>,
        timeout: Option<Duration>,
    ) -> Result<RawResponse> {
        let limit = self.options.max_execution_time.or(timeout);
        let progress = tracker.and_then(ProgressTracker::last);
        if let Err(e) = check_response(&query_id, &response, limit, progress) {
            debug!("Query {} failed: {}", query_id, e);
            self.state = match e {
                Error::QueryAborted { .. } => ExecutionState::Aborted,
                Error::QueryTimeout { .. } => ExecutionState::TimedOut,
                _ => ExecutionState::Failed,
            };
            return Err(e);
        }

        let summary = response
            .header(HEADER_SUMMARY)
            .and_then(|value| match QueryProgress::from_header(value) {
                Ok(summary) => Some(summary),
                Err(e) => {
                    debug!("Ignoring malformed summary header '{}': {}", value, e);
                    None
                }
            });
        if let Some(tracker) = tracker {
            tracker.finish(summary);
        }

        if let Some(echoed) = response.header(HEADER_QUERY_ID) {
            if echoed != query_id {
                debug!("Server reported query id {} for {}", echoed, query_id);
            }
        }

        let content_type = response.header("content-type").map(str::to_string);
        self.state = ExecutionState::Succeeded;
        Ok(RawResponse {
            query_id,
            status: response.status,
            content_type,
            body: response.body,
            summary,
        })
    }

    fn tracks_progress(&self) -> bool {
        self.options.progress_callback.is_some() || self.events.is_some()
    }

    /// Control fields, optional toggles, then one field per parameter.
    fn build_request(&self, query_id: &str) -> Result<HttpRequest> {
        self.options.validate()?;
        let query = template::format(&self.query, &self.params)?;

        let mut request = HttpRequest::new(query)
            .param(PARAM_DEFAULT_FORMAT, JSON_FORMAT)
            .param(PARAM_QUERY_ID, query_id)
            .param(
                PARAM_REPLACE_RUNNING_QUERY,
                if self.options.replace_running_query {
                    "1"
                } else {
                    "0"
                },
            );

        if let Some(database) = self
            .options
            .database
            .as_deref()
            .or(self.context.database.as_deref())
        {
            request = request.param(PARAM_DATABASE, database);
        }
        if let Some(limit) = self.options.max_execution_time {
            request = request.param(PARAM_MAX_EXECUTION_TIME, whole_seconds(limit).to_string());
        }
        if self.tracks_progress() {
            request = request
                .param(PARAM_WAIT_END_OF_QUERY, "1")
                .param(PARAM_SEND_PROGRESS, "1");
        }
        for param in &self.params {
            request = request.param(value_field(param), param.wire_value());
        }

        Ok(request)
    }
}

enum Outcome {
    Cancelled,
    Completed(std::result::Result<Result<HttpResponse>, JoinError>),
    TimedOut,
}

struct AbortOnDrop(AbortHandle);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

async fn wait_for(timeout: Option<Duration>) {
    match timeout {
        Some(limit) => tokio::time::sleep(limit).await,
        None => std::future::pending::<()>().await,
    }
}

/// Classify a completed response. `Ok` means the body is a payload.
fn check_response(
    query_id: &str,
    response: &HttpResponse,
    timeout: Option<Duration>,
    progress: Option<QueryProgress>,
) -> Result<()> {
    let exception_code = response
        .header(HEADER_EXCEPTION_CODE)
        .and_then(parse_exception_code);
    if let Some(server_error) = classify(&response.body, exception_code) {
        return Err(server_error.into_error(query_id, timeout, progress));
    }
    if response.status != 200 {
        return Err(Error::UnexpectedResponse {
            status: response.status,
            body: response.body.clone(),
        });
    }
    Ok(())
}

fn value_field(param: &QueryParam) -> String {
    format!("{}{}", PARAM_VALUE_PREFIX, param.name())
}

/// Seconds for `max_execution_time`, rounded up so sub-second limits do not
/// turn into 0 (no limit).
fn whole_seconds(limit: Duration) -> u64 {
    let secs = limit.as_secs();
    if limit.subsec_nanos() > 0 {
        secs + 1
    } else {
        secs.max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    /// Replies with a fixed response, optionally emitting headers first.
    #[derive(Debug, Default)]
    struct FixedTransport {
        response: HttpResponse,
        delay: Option<Duration>,
    }

    #[async_trait]
    impl Transport for FixedTransport {
        async fn send(
            &self,
            request: HttpRequest,
            hook: Option<Arc<dyn HeaderHook>>,
        ) -> Result<HttpResponse> {
            debug!("mock transport received {}", request.body);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if let Some(hook) = hook {
                for (name, value) in &self.response.headers {
                    hook.on_header(name, value);
                }
            }
            Ok(self.response.clone())
        }
    }

    fn context(transport: FixedTransport, database: Option<&str>) -> Arc<ExecutionContext> {
        Arc::new(ExecutionContext {
            transport: Arc::new(transport),
            registry: TypeRegistry::builtin(),
            database: database.map(str::to_string),
            request_timeout: None,
        })
    }

    fn ok_response(body: &str) -> HttpResponse {
        HttpResponse {
            status: 200,
            headers: vec![("Content-Type".to_string(), "application/json".to_string())],
            body: body.to_string(),
        }
    }

    #[test]
    fn test_whole_seconds_rounds_up() {
        assert_eq!(whole_seconds(Duration::from_secs(5)), 5);
        assert_eq!(whole_seconds(Duration::from_millis(1500)), 2);
        assert_eq!(whole_seconds(Duration::from_millis(10)), 1);
        assert_eq!(whole_seconds(Duration::ZERO), 1);
    }

    #[test]
    fn test_state_terminality() {
        assert!(!ExecutionState::Building.is_terminal());
        assert!(!ExecutionState::Sent.is_terminal());
        assert!(ExecutionState::Succeeded.is_terminal());
        assert!(ExecutionState::TimedOut.is_terminal());
    }

    #[test]
    fn test_build_request_fields() {
        let ctx = context(FixedTransport::default(), Some("default_db"));
        let options = QueryOptions::replacing("q-7")
            .with_max_execution_time(Duration::from_secs(30))
            .with_database("analytics");
        let statement = Statement::new(
            ctx,
            "SELECT * FROM t WHERE a = :a AND s = :s",
            vec![QueryParam::of("a", 5i32), QueryParam::null("s", "Nullable(String)")],
            options,
        );
        let request = statement.build_request("q-7").unwrap();

        assert_eq!(request.body, "SELECT * FROM t WHERE a = {a:Int32} AND s = {s:Nullable(String)}");
        assert_eq!(request.get_param(PARAM_DEFAULT_FORMAT), Some("JSON"));
        assert_eq!(request.get_param(PARAM_QUERY_ID), Some("q-7"));
        assert_eq!(request.get_param(PARAM_REPLACE_RUNNING_QUERY), Some("1"));
        assert_eq!(request.get_param(PARAM_DATABASE), Some("analytics"));
        assert_eq!(request.get_param(PARAM_MAX_EXECUTION_TIME), Some("30"));
        assert_eq!(request.get_param("param_a"), Some("5"));
        assert_eq!(request.get_param("param_s"), Some("\\N"));
        assert_eq!(request.get_param(PARAM_WAIT_END_OF_QUERY), None);
        assert_eq!(request.get_param(PARAM_SEND_PROGRESS), None);
    }

    #[test]
    fn test_build_request_with_progress_and_client_database() {
        let ctx = context(FixedTransport::default(), Some("default_db"));
        let statement = Statement::new(
            ctx,
            "SELECT 1",
            Vec::new(),
            QueryOptions::new().with_progress(|_| true),
        );
        let request = statement.build_request("q").unwrap();
        assert_eq!(request.body, "SELECT 1");
        assert_eq!(request.get_param(PARAM_DATABASE), Some("default_db"));
        assert_eq!(request.get_param(PARAM_REPLACE_RUNNING_QUERY), Some("0"));
        assert_eq!(request.get_param(PARAM_WAIT_END_OF_QUERY), Some("1"));
        assert_eq!(request.get_param(PARAM_SEND_PROGRESS), Some("1"));
        assert!(request.params.iter().all(|(k, _)| !k.starts_with(PARAM_VALUE_PREFIX)));
    }

    #[tokio::test]
    async fn test_missing_parameter_fails_before_sending() {
        let ctx = context(FixedTransport::default(), None);
        let mut statement = Statement::new(ctx.clone(), "SELECT :x", Vec::new(), QueryOptions::new());
        let err = statement.execute().await.unwrap_err();
        assert!(matches!(err, Error::MissingParameter { .. }));
        assert_eq!(statement.state(), ExecutionState::Failed);
        assert!(statement.query_id().is_some());
    }

    #[tokio::test]
    async fn test_successful_query_decodes() {
        let ctx = context(
            FixedTransport {
                response: ok_response(
                    r#"{"meta":[{"name":"n","type":"UInt64"}],"data":[{"n":"4"},{"n":"12"}],"rows":2}"#,
                ),
                ..FixedTransport::default()
            },
            None,
        );
        let mut statement = Statement::new(ctx, "SELECT n FROM t", Vec::new(), QueryOptions::new());
        let result = statement.query().await.unwrap();
        assert_eq!(statement.state(), ExecutionState::Succeeded);
        assert_eq!(result.len(), 2);
        assert_eq!(result.row(1).and_then(|r| r.get_u64("n")), Some(12));

        let err = statement.execute().await.unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));
    }

    #[tokio::test]
    async fn test_server_timeout_code_maps_to_timed_out() {
        let mut response = ok_response(
            "Code: 159. DB::Exception: Timeout exceeded: elapsed 2.1 seconds, maximum: 2. (TIMEOUT_EXCEEDED) (version 23.8.2.7)",
        );
        response.status = 500;
        response
            .headers
            .push((HEADER_EXCEPTION_CODE.to_string(), "159".to_string()));
        let ctx = context(
            FixedTransport {
                response,
                ..FixedTransport::default()
            },
            None,
        );
        let mut statement = Statement::new(
            ctx,
            "SELECT sleep(3)",
            Vec::new(),
            QueryOptions::new().with_max_execution_time(Duration::from_secs(2)),
        );
        match statement.execute().await.unwrap_err() {
            Error::QueryTimeout { timeout, .. } => assert_eq!(timeout, Duration::from_secs(2)),
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(statement.state(), ExecutionState::TimedOut);
    }

    #[tokio::test]
    async fn test_unclassified_error_status() {
        let mut response = ok_response("Bad gateway");
        response.status = 502;
        let ctx = context(
            FixedTransport {
                response,
                ..FixedTransport::default()
            },
            None,
        );
        let mut statement = Statement::new(ctx, "SELECT 1", Vec::new(), QueryOptions::new());
        assert!(matches!(
            statement.execute().await.unwrap_err(),
            Error::UnexpectedResponse { status: 502, .. }
        ));
        assert_eq!(statement.state(), ExecutionState::Failed);
    }

    #[tokio::test]
    async fn test_caller_cancellation_aborts() {
        let ctx = context(
            FixedTransport {
                response: ok_response(""),
                delay: Some(Duration::from_secs(30)),
                ..FixedTransport::default()
            },
            None,
        );
        let token = CancellationToken::new();
        let mut statement = Statement::new(
            ctx,
            "SELECT 1",
            Vec::new(),
            QueryOptions::new()
                .with_query_id("q-cancel")
                .with_cancellation(token.clone()),
        );
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        match statement.execute().await.unwrap_err() {
            Error::QueryAborted { query_id, .. } => assert_eq!(query_id, "q-cancel"),
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(statement.state(), ExecutionState::Aborted);
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn test_local_timeout() {
        let ctx = context(
            FixedTransport {
                response: ok_response(""),
                delay: Some(Duration::from_secs(30)),
                ..FixedTransport::default()
            },
            None,
        );
        let mut statement = Statement::new(
            ctx,
            "SELECT 1",
            Vec::new(),
            QueryOptions::new().with_timeout(Duration::from_millis(50)),
        );
        match statement.execute().await.unwrap_err() {
            Error::QueryTimeout {
                timeout, progress, ..
            } => {
                assert_eq!(timeout, Duration::from_millis(50));
                assert!(progress.is_none());
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(statement.state(), ExecutionState::TimedOut);
    }
}

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

//! HTTP transport for the ClickHouse HTTP interface.
//!
//! This module provides the HTTP [`Transport`] with:
//! - Connection pooling through reqwest for requests that do not watch headers
//! - A dedicated HTTP/1.1 exchange for requests that do, so progress headers
//!   are delivered while the query runs
//! - Retry with exponential backoff for requests that never reached the server
//! - Credentials sent as `X-ClickHouse-User` / `X-ClickHouse-Key`

use crate::client::stream::{self, Endpoint};
use crate::client::{HeaderHook, HttpRequest, HttpResponse, Transport, HEADER_KEY, HEADER_USER};
use crate::error::{Error, Result};
use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode, Url};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::time::sleep;
use tracing::{debug, warn};

/// Configuration for the HTTP client.
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// Connection timeout duration.
    pub connect_timeout: Duration,
    /// Maximum number of retry attempts.
    pub max_retries: u32,
    /// Base delay between retry attempts (doubles each retry).
    pub retry_delay: Duration,
    /// Maximum number of idle connections per host.
    pub max_connections_per_host: usize,
    pub user_agent: String,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            max_retries: 3,
            retry_delay: Duration::from_millis(500),
            max_connections_per_host: 32,
            user_agent: format!("clickhouse-http-query/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// User name and password for the HTTP interface.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub user: String,
    pub password: String,
}

impl Credentials {
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Transport posting queries to a single base URL.
///
/// Non-success responses are returned as-is so that the caller can classify
/// the server error carried in their headers and body. Only connect failures
/// and 429/502/503 responses are retried: in those cases the query never
/// started executing.
///
/// When a [`HeaderHook`] is given, the request runs on its own connection and
/// each header line is passed to the hook as soon as it is read. reqwest only
/// yields a response once the whole head has arrived, which for a query with
/// progress tracking is when the query has finished.
#[derive(Debug)]
pub struct HttpTransport {
    client: Client,
    url: Url,
    endpoint: Endpoint,
    config: HttpClientConfig,
    credentials: Option<Credentials>,
}

impl HttpTransport {
    pub fn new(
        url: &str,
        config: HttpClientConfig,
        credentials: Option<Credentials>,
    ) -> Result<Self> {
        let url = Url::parse(url)
            .map_err(|e| Error::invalid_options(format!("invalid url '{}': {}", url, e)))?;
        let endpoint = Endpoint::from_url(&url)?;
        stream::validate_header_value("User-Agent", &config.user_agent)?;
        if let Some(ref credentials) = credentials {
            stream::validate_header_value(HEADER_USER, &credentials.user)?;
            stream::validate_header_value(HEADER_KEY, &credentials.password)?;
        }

        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .pool_max_idle_per_host(config.max_connections_per_host)
            .user_agent(&config.user_agent)
            .build()
            .map_err(|e| Error::transport(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            url,
            endpoint,
            config,
            credentials,
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn config(&self) -> &HttpClientConfig {
        &self.config
    }

    async fn execute_with_retry(&self, request: &HttpRequest) -> Result<Response> {
        let mut attempts = 0;

        loop {
            attempts += 1;

            let mut builder = self
                .client
                .post(self.url.clone())
                .query(&request.params)
                .body(request.body.clone());
            if let Some(ref credentials) = self.credentials {
                builder = builder
                    .header(HEADER_USER, &credentials.user)
                    .header(HEADER_KEY, &credentials.password);
            }

            debug!(
                "POST {} (attempt {}/{})",
                self.url,
                attempts,
                self.config.max_retries + 1
            );

            match builder.send().await {
                Ok(response) => {
                    let status = response.status();
                    if Self::is_retryable_status(status) && attempts <= self.config.max_retries {
                        warn!(
                            "Request failed with {} (attempt {}/{}), retrying...",
                            status,
                            attempts,
                            self.config.max_retries + 1
                        );
                        self.wait_for_retry(attempts).await;
                        continue;
                    }
                    return Ok(response);
                }
                Err(e) => {
                    if Self::is_retryable_error(&e) && attempts <= self.config.max_retries {
                        warn!(
                            "Request failed with error (attempt {}/{}): {}, retrying...",
                            attempts,
                            self.config.max_retries + 1,
                            e
                        );
                        self.wait_for_retry(attempts).await;
                        continue;
                    }
                    return Err(Error::transport(format!(
                        "HTTP request failed after {} attempts: {}",
                        attempts, e
                    )));
                }
            }
        }
    }

    async fn execute_streaming(
        &self,
        request: &HttpRequest,
        hook: &dyn HeaderHook,
    ) -> Result<HttpResponse> {
        let mut url = self.url.clone();
        url.query_pairs_mut().extend_pairs(request.params.iter());
        let bytes = stream::encode_request(
            &self.endpoint,
            &url,
            &self.config.user_agent,
            self.credentials.as_ref(),
            &request.body,
        );

        let mut attempts = 0;
        loop {
            attempts += 1;
            debug!(
                "POST {} with header streaming (attempt {}/{})",
                self.url,
                attempts,
                self.config.max_retries + 1
            );

            let connection = match self.endpoint.connect(self.config.connect_timeout).await {
                Ok(connection) => connection,
                Err(e) => {
                    if attempts <= self.config.max_retries {
                        warn!(
                            "Connect failed (attempt {}/{}): {}, retrying...",
                            attempts,
                            self.config.max_retries + 1,
                            e
                        );
                        self.wait_for_retry(attempts).await;
                        continue;
                    }
                    return Err(Error::transport(format!(
                        "HTTP request failed after {} attempts: {}",
                        attempts, e
                    )));
                }
            };

            let mut reader = BufReader::new(connection);
            let writer = reader.get_mut();
            writer
                .write_all(&bytes)
                .await
                .map_err(|e| Error::transport(format!("failed to send request: {}", e)))?;
            writer
                .flush()
                .await
                .map_err(|e| Error::transport(format!("failed to send request: {}", e)))?;

            let status = stream::read_status(&mut reader).await?;
            if Self::is_retryable_status(status) && attempts <= self.config.max_retries {
                warn!(
                    "Request failed with {} (attempt {}/{}), retrying...",
                    status,
                    attempts,
                    self.config.max_retries + 1
                );
                self.wait_for_retry(attempts).await;
                continue;
            }

            let headers = stream::read_headers(&mut reader, Some(hook)).await?;
            let mut response = HttpResponse {
                status: status.as_u16(),
                headers,
                body: String::new(),
            };
            response.body = stream::read_body(&mut reader, &response).await?;
            return Ok(response);
        }
    }

    /// Statuses returned before the query engine saw the request.
    fn is_retryable_status(status: StatusCode) -> bool {
        matches!(
            status,
            StatusCode::TOO_MANY_REQUESTS
                | StatusCode::BAD_GATEWAY
                | StatusCode::SERVICE_UNAVAILABLE
        )
    }

    fn is_retryable_error(error: &reqwest::Error) -> bool {
        error.is_connect()
    }

    fn backoff(&self, attempt: u32) -> Duration {
        self.config.retry_delay * 2u32.saturating_pow(attempt.saturating_sub(1))
    }

    async fn wait_for_retry(&self, attempt: u32) {
        let delay = self.backoff(attempt);
        debug!("Waiting {:?} before retry", delay);
        sleep(delay).await;
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(
        &self,
        request: HttpRequest,
        hook: Option<Arc<dyn HeaderHook>>,
    ) -> Result<HttpResponse> {
        if let Some(hook) = hook {
            return self.execute_streaming(&request, hook.as_ref()).await;
        }

        let response = self.execute_with_retry(&request).await?;
        let status = response.status().as_u16();

        let mut headers = Vec::with_capacity(response.headers().len());
        for (name, value) in response.headers() {
            let Ok(value) = value.to_str() else {
                debug!("Skipping non-UTF-8 header {}", name);
                continue;
            };
            headers.push((name.as_str().to_string(), value.to_string()));
        }

        let body = response
            .text()
            .await
            .map_err(|e| Error::transport(format!("failed to read response body: {}", e)))?;

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

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

//! Client configuration.
//!
//! A [`ClientConfig`] is filled in either with builder methods or with
//! string-keyed options, then turned into a [`Connection`] with
//! [`ClientConfig::connect`].

use crate::client::{Credentials, HttpClientConfig, HttpTransport};
use crate::connection::{Connection, ConnectionConfig};
use crate::error::{Error, Result};
use crate::logging::{init_logging, LogConfig};
use crate::reader::TypeRegistry;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

pub const OPTION_URI: &str = "uri";
pub const OPTION_DATABASE: &str = "clickhouse.database";
pub const OPTION_USER: &str = "clickhouse.user";
pub const OPTION_PASSWORD: &str = "clickhouse.password";
pub const OPTION_REQUEST_TIMEOUT_MS: &str = "clickhouse.request_timeout_ms";
pub const OPTION_CONNECT_TIMEOUT_MS: &str = "clickhouse.http.connect_timeout_ms";
pub const OPTION_MAX_RETRIES: &str = "clickhouse.http.max_retries";
pub const OPTION_RETRY_DELAY_MS: &str = "clickhouse.http.retry_delay_ms";
pub const OPTION_LOG_LEVEL: &str = "clickhouse.log_level";
pub const OPTION_LOG_FILE: &str = "clickhouse.log_file";

/// User assumed when only a password is configured.
const DEFAULT_USER: &str = "default";

/// Everything needed to open a [`Connection`].
#[derive(Clone, Default)]
pub struct ClientConfig {
    // Core configuration
    url: Option<String>,
    database: Option<String>,
    user: Option<String>,
    password: Option<String>,
    request_timeout: Option<Duration>,

    // HTTP client configuration
    http: HttpClientConfig,

    log: LogConfig,
    registry: Option<TypeRegistry>,
}

impl ClientConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self::default().with_url(url)
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    pub fn with_credentials(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self.password = Some(password.into());
        self
    }

    /// Local wait limit applied to every query without its own timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.http.connect_timeout = timeout;
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.http.max_retries = retries;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.http.retry_delay = delay;
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.http.user_agent = user_agent.into();
        self
    }

    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.log.level = Some(level.into());
        self
    }

    pub fn with_log_file(mut self, path: impl Into<String>) -> Self {
        self.log.file = Some(path.into());
        self
    }

    /// Decode results with `registry` instead of the built-in one.
    pub fn with_registry(mut self, registry: TypeRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    pub fn database(&self) -> Option<&str> {
        self.database.as_deref()
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout
    }

    pub fn http_config(&self) -> &HttpClientConfig {
        &self.http
    }

    pub fn log_config(&self) -> &LogConfig {
        &self.log
    }

    /// Set a string-keyed option.
    pub fn set_option(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            OPTION_URI => self.url = Some(value.to_string()),
            OPTION_DATABASE => self.database = Some(value.to_string()),
            OPTION_USER => self.user = Some(value.to_string()),
            OPTION_PASSWORD => self.password = Some(value.to_string()),
            OPTION_REQUEST_TIMEOUT_MS => {
                self.request_timeout = Some(Duration::from_millis(parse_int_option(key, value)?));
            }
            OPTION_CONNECT_TIMEOUT_MS => {
                self.http.connect_timeout = Duration::from_millis(parse_int_option(key, value)?);
            }
            OPTION_MAX_RETRIES => {
                let retries = parse_int_option(key, value)?;
                self.http.max_retries = u32::try_from(retries)
                    .map_err(|_| invalid_value(key, value, "value out of range"))?;
            }
            OPTION_RETRY_DELAY_MS => {
                self.http.retry_delay = Duration::from_millis(parse_int_option(key, value)?);
            }
            OPTION_LOG_LEVEL => self.log.level = Some(value.to_string()),
            OPTION_LOG_FILE => self.log.file = Some(value.to_string()),
            _ => {
                return Err(Error::invalid_options(format!("unknown option '{}'", key)));
            }
        }
        Ok(())
    }

    /// Read an option back as a string.
    pub fn get_option(&self, key: &str) -> Result<String> {
        let value = match key {
            OPTION_URI => self.url.clone(),
            OPTION_DATABASE => self.database.clone(),
            OPTION_USER => self.user.clone(),
            OPTION_REQUEST_TIMEOUT_MS => self.request_timeout.map(|t| t.as_millis().to_string()),
            OPTION_CONNECT_TIMEOUT_MS => Some(self.http.connect_timeout.as_millis().to_string()),
            OPTION_MAX_RETRIES => Some(self.http.max_retries.to_string()),
            OPTION_RETRY_DELAY_MS => Some(self.http.retry_delay.as_millis().to_string()),
            OPTION_LOG_LEVEL => self.log.level.clone(),
            OPTION_LOG_FILE => self.log.file.clone(),
            OPTION_PASSWORD => {
                return Err(Error::invalid_options(format!(
                    "option '{}' cannot be read back",
                    key
                )));
            }
            _ => return Err(Error::invalid_options(format!("unknown option '{}'", key))),
        };
        value.ok_or_else(|| Error::InvalidState(format!("option '{}' is not set", key)))
    }

    fn credentials(&self) -> Option<Credentials> {
        match (&self.user, &self.password) {
            (None, None) => None,
            (user, password) => Some(Credentials::new(
                user.as_deref().unwrap_or(DEFAULT_USER),
                password.as_deref().unwrap_or_default(),
            )),
        }
    }

    /// Initialize logging, build the HTTP transport and open a connection.
    pub fn connect(&self) -> Result<Connection> {
        let url = self
            .url
            .as_deref()
            .ok_or_else(|| Error::invalid_options("uri not set"))?;

        init_logging(&self.log);
        debug!("Connecting to {} (database: {:?})", url, self.database);

        let transport = HttpTransport::new(url, self.http.clone(), self.credentials())?;
        Connection::with_transport(
            Arc::new(transport),
            ConnectionConfig {
                database: self.database.clone(),
                request_timeout: self.request_timeout,
                registry: self.registry.clone().unwrap_or_default(),
            },
        )
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("url", &self.url)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("request_timeout", &self.request_timeout)
            .field("http", &self.http)
            .field("log", &self.log)
            .field("registry", &self.registry)
            .finish()
    }
}

fn parse_int_option(key: &str, value: &str) -> Result<u64> {
    value
        .trim()
        .parse()
        .map_err(|e| invalid_value(key, value, &format!("{}", e)))
}

fn invalid_value(key: &str, value: &str, reason: &str) -> Error {
    Error::invalid_options(format!(
        "invalid value '{}' for option '{}': {}",
        value, key, reason
    ))
}

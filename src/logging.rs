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

//! Logging setup.
//!
//! Installs a `tracing-subscriber` writing to a file or stderr.
//!
//! ## Configuration priority
//!
//! 1. `clickhouse.log_level` / `clickhouse.log_file` client options (highest)
//! 2. `RUST_LOG` environment variable
//! 3. Default: `warn`
//!
//! ```bash
//! RUST_LOG=clickhouse_http_query=debug ./my_app
//! ```
//!
//! Or programmatically:
//! ```ignore
//! config.set_option("clickhouse.log_level", "debug")?;
//! config.set_option("clickhouse.log_file", "/tmp/clickhouse.log")?;
//! ```

use std::sync::OnceLock;
use tracing_subscriber::{
    fmt::{self, time::SystemTime},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

const LOG_TARGET: &str = "clickhouse_http_query";

static LOGGING_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Log level and destination.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogConfig {
    /// "off", "error", "warn", "info", "debug" or "trace", case-insensitive.
    pub level: Option<String>,
    /// Log file path. If unset, logs go to stderr.
    pub file: Option<String>,
}

impl LogConfig {
    fn is_off(&self) -> bool {
        self.level
            .as_deref()
            .is_some_and(|level| level.eq_ignore_ascii_case("off"))
    }

    fn filter(&self) -> EnvFilter {
        match self.level {
            Some(ref level) => EnvFilter::new(format!("{}={}", LOG_TARGET, level.to_lowercase())),
            None => EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(format!("{}=warn", LOG_TARGET))),
        }
    }
}

/// Initialize the tracing subscriber.
///
/// Only the first call in a process has any effect; later calls, including
/// ones with a different config, are no-ops. A subscriber installed by the
/// application itself is left alone.
pub fn init_logging(config: &LogConfig) {
    LOGGING_INITIALIZED.get_or_init(|| {
        if config.is_off() {
            return;
        }
        let filter = config.filter();

        if let Some(ref path) = config.file {
            let file = match std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
            {
                Ok(f) => f,
                Err(e) => {
                    eprintln!("clickhouse-http-query: failed to open log file {}: {}", path, e);
                    return;
                }
            };

            tracing_subscriber::registry()
                .with(filter)
                .with(
                    fmt::layer()
                        .with_writer(file)
                        .with_target(false)
                        .with_ansi(false)
                        .with_timer(SystemTime),
                )
                .try_init()
                .ok();
        } else {
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    fmt::layer()
                        .with_writer(std::io::stderr)
                        .with_target(false)
                        .with_timer(SystemTime),
                )
                .try_init()
                .ok();
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_config_default() {
        let config = LogConfig::default();
        assert!(config.level.is_none());
        assert!(config.file.is_none());
        assert!(!config.is_off());
    }

    #[test]
    fn test_off_level_detected() {
        let config = LogConfig {
            level: Some("OFF".to_string()),
            file: None,
        };
        assert!(config.is_off());
    }

    #[test]
    fn test_explicit_level_filter() {
        let config = LogConfig {
            level: Some("DEBUG".to_string()),
            file: None,
        };
        assert_eq!(config.filter().to_string(), "clickhouse_http_query=debug");
    }
}

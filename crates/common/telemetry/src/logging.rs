// Copyright 2025 Crrow
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::{
    env,
    io::IsTerminal,
    sync::{Arc, Mutex, Once},
};

use bon::Builder;
use once_cell::sync::{Lazy, OnceCell};
use serde::{Deserialize, Deserializer, Serialize, de};
use smart_default::SmartDefault;
use snafu::{OptionExt, ResultExt, Snafu};
use tracing_appender::{
    non_blocking::WorkerGuard,
    rolling::{RollingFileAppender, Rotation},
};
use tracing_log::LogTracer;
use tracing_subscriber::{EnvFilter, Registry, filter, layer::SubscriberExt, prelude::*};

pub fn empty_string_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    let s = String::deserialize(deserializer)?;
    if s.is_empty() {
        Ok(T::default())
    } else {
        T::deserialize(de::value::StrDeserializer::new(&s)).map_err(|e: de::value::Error| {
            de::Error::custom(format!("invalid value, expect empty string, err: {e}"))
        })
    }
}

const DEFAULT_LOG_TARGETS: &str = "info";

static RELOAD_HANDLE: OnceCell<tracing_subscriber::reload::Handle<filter::Targets, Registry>> =
    OnceCell::new();

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum LoggingError {
    #[snafu(display("Invalid log level filter '{level}'"))]
    InvalidLevel {
        level:  String,
        source: filter::ParseError,
    },

    #[snafu(display("Global logging has not been initialized"))]
    NotInitialized,

    #[snafu(display("Failed to swap log level filter"))]
    Reload {
        source: tracing_subscriber::reload::Error,
    },
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, SmartDefault, Builder)]
#[serde(default)]
pub struct LoggingOptions {
    /// Directory for rolling log files. Empty means stdout only.
    ///
    /// Files rotate hourly; ERROR records are additionally written to a
    /// separate `{file_prefix}-err` series.
    #[default = ""]
    #[builder(default, into)]
    pub dir: String,

    /// Filter string such as `"info"` or `"info,tasklet_lifecycle=debug"`.
    /// Falls back to `RUST_LOG`, then `"info"`.
    #[builder(into)]
    pub level: Option<String>,

    #[serde(default, deserialize_with = "empty_string_as_default")]
    #[builder(default)]
    pub log_format: LogFormat,

    /// Prefix of rolled file names.
    #[default = "tasklet"]
    #[builder(default = "tasklet".to_string(), into)]
    pub file_prefix: String,

    /// Maximum number of rotated files kept per series (30 days hourly).
    #[default = 720]
    #[builder(default = 720)]
    pub max_log_files: usize,

    #[default = true]
    #[builder(default = true)]
    pub append_stdout: bool,
}

#[derive(
    Clone, Debug, Copy, PartialEq, Eq, Serialize, Deserialize, Default, derive_more::Display,
)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// One JSON object per record, with the current span and span list.
    Json,

    /// Human-readable lines, ANSI-colored when stdout is a terminal.
    #[default]
    Text,
}

/// Logging for unit tests: debug level into `UNITTEST_LOG_DIR`
/// (default `/tmp/__unittest_logs`). Safe to call from every test.
pub fn init_default_ut_logging() {
    static START: Once = Once::new();

    START.call_once(|| {
        let mut g = GLOBAL_UT_LOG_GUARD.as_ref().lock().unwrap();

        let dir =
            env::var("UNITTEST_LOG_DIR").unwrap_or_else(|_| "/tmp/__unittest_logs".to_string());
        let level =
            env::var("UNITTEST_LOG_LEVEL").unwrap_or_else(|_| "debug,tokio=info".to_string());
        let opts = LoggingOptions {
            dir: dir.clone(),
            level: Some(level),
            file_prefix: "unittest".to_string(),
            ..Default::default()
        };
        *g = Some(init_global_logging("unittest", &opts));

        tracing::info!("logs dir = {}", dir);
    });
}

static GLOBAL_UT_LOG_GUARD: Lazy<Arc<Mutex<Option<Vec<WorkerGuard>>>>> =
    Lazy::new(|| Arc::new(Mutex::new(None)));

fn rolling_appender(opts: &LoggingOptions, prefix: &str) -> RollingFileAppender {
    RollingFileAppender::builder()
        .rotation(Rotation::HOURLY)
        .filename_prefix(prefix)
        .max_log_files(opts.max_log_files)
        .build(&opts.dir)
        .unwrap_or_else(|e| {
            panic!(
                "initializing rolling file appender at {} failed: {}",
                &opts.dir, e
            )
        })
}

/// Installs the global subscriber. Only the first call has any effect; the
/// returned guards must be held until shutdown so buffered records flush.
pub fn init_global_logging(app_name: &str, opts: &LoggingOptions) -> Vec<WorkerGuard> {
    static START: Once = Once::new();
    let mut guards = vec![];

    START.call_once(|| {
        LogTracer::init().expect("log tracer must be valid");

        let stdout_logging_layer = if opts.append_stdout {
            let (writer, guard) = tracing_appender::non_blocking(std::io::stdout());
            guards.push(guard);

            if opts.log_format == LogFormat::Json {
                Some(
                    tracing_subscriber::fmt::Layer::new()
                        .json()
                        .with_writer(writer)
                        .with_ansi(std::io::stdout().is_terminal())
                        .with_current_span(true)
                        .with_span_list(true)
                        .boxed(),
                )
            } else {
                Some(
                    tracing_subscriber::fmt::Layer::new()
                        .with_writer(writer)
                        .with_ansi(std::io::stdout().is_terminal())
                        .boxed(),
                )
            }
        } else {
            None
        };

        let file_logging_layer = if opts.dir.is_empty() {
            None
        } else {
            let (writer, guard) =
                tracing_appender::non_blocking(rolling_appender(opts, &opts.file_prefix));
            guards.push(guard);

            if opts.log_format == LogFormat::Json {
                Some(
                    tracing_subscriber::fmt::Layer::new()
                        .json()
                        .with_writer(writer)
                        .with_ansi(false)
                        .with_current_span(true)
                        .with_span_list(true)
                        .boxed(),
                )
            } else {
                Some(
                    tracing_subscriber::fmt::Layer::new()
                        .with_writer(writer)
                        .with_ansi(false)
                        .boxed(),
                )
            }
        };

        let err_file_logging_layer = if opts.dir.is_empty() {
            None
        } else {
            let prefix = format!("{}-err", opts.file_prefix);
            let (writer, guard) = tracing_appender::non_blocking(rolling_appender(opts, &prefix));
            guards.push(guard);

            Some(
                tracing_subscriber::fmt::Layer::new()
                    .with_writer(writer)
                    .with_ansi(false)
                    .with_filter(filter::LevelFilter::ERROR)
                    .boxed(),
            )
        };

        let filter = opts
            .level
            .as_deref()
            .or(env::var(EnvFilter::DEFAULT_ENV).ok().as_deref())
            .unwrap_or(DEFAULT_LOG_TARGETS)
            .parse::<filter::Targets>()
            .expect("error parsing log level string");

        let (dyn_filter, reload_handle) = tracing_subscriber::reload::Layer::new(filter);
        RELOAD_HANDLE
            .set(reload_handle)
            .expect("reload handle already set, maybe init_global_logging get called twice?");

        let subscriber = Registry::default()
            .with(dyn_filter)
            .with(stdout_logging_layer)
            .with(file_logging_layer)
            .with(err_file_logging_layer);

        tracing::subscriber::set_global_default(subscriber)
            .expect("error setting global tracing subscriber");

        tracing::info!(app = app_name, format = %opts.log_format, "logging initialized");
    });

    guards
}

/// Swaps the active level filter of a running process.
pub fn reload_log_level(level: &str) -> Result<(), LoggingError> {
    let targets = level
        .parse::<filter::Targets>()
        .context(InvalidLevelSnafu { level })?;
    RELOAD_HANDLE
        .get()
        .context(NotInitializedSnafu)?
        .reload(targets)
        .context(ReloadSnafu)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_format_falls_back_to_text() {
        let opts: LoggingOptions =
            serde_json::from_str(r#"{"log_format": "", "level": "debug"}"#).unwrap();
        assert_eq!(opts.log_format, LogFormat::Text);
        assert_eq!(opts.level.as_deref(), Some("debug"));
        assert_eq!(opts.max_log_files, 720);
        assert_eq!(opts.file_prefix, "tasklet");
    }

    #[test]
    fn json_format_parses() {
        let opts: LoggingOptions = serde_json::from_str(r#"{"log_format": "json"}"#).unwrap();
        assert_eq!(opts.log_format, LogFormat::Json);
        assert!(opts.append_stdout);
    }

    #[test]
    fn builder_matches_defaults() {
        assert_eq!(LoggingOptions::builder().build(), LoggingOptions::default());
    }

    #[test]
    fn reload_rejects_garbage() {
        assert!(matches!(
            reload_log_level("tasklet=loud"),
            Err(LoggingError::InvalidLevel { .. })
        ));
    }
}

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
    path::{Path, PathBuf},
    time::Duration,
};

use bon::Builder;
use config::{Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use smart_default::SmartDefault;
use snafu::{ResultExt, ensure};
use tasklet_common_telemetry::LoggingOptions;

use crate::error::{InvalidConfigSnafu, LoadConfigSnafu, MissingConfigSnafu, Result};

const DEFAULT_CONFIG: &str = include_str!("../config/default.toml");

/// Prefix of environment overrides, e.g. `TASKLET__WORKERS__MAX_WORKERS=20`.
pub const ENV_PREFIX: &str = "TASKLET";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub logging: LoggingOptions,
    pub counter: CounterOptions,
    pub workers: WorkersOptions,
}

impl AppConfig {
    /// Layers the built-in defaults, the optional file at `path` and
    /// `TASKLET__*` environment variables, in that order.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder()
            .add_source(File::from_str(DEFAULT_CONFIG, FileFormat::Toml));

        if let Some(path) = path {
            ensure!(path.exists(), MissingConfigSnafu { path });
            builder = builder.add_source(File::from(path));
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        );

        let config: Self = builder
            .build()
            .context(LoadConfigSnafu)?
            .try_deserialize()
            .context(LoadConfigSnafu)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let workers = &self.workers;
        ensure!(
            workers.workers <= workers.max_workers,
            InvalidConfigSnafu {
                message: format!(
                    "workers ({}) exceeds max_workers ({})",
                    workers.workers, workers.max_workers
                ),
            }
        );
        ensure!(
            (0.0..=1.0).contains(&workers.self_stop_probability),
            InvalidConfigSnafu {
                message: format!(
                    "self_stop_probability {} is outside [0, 1]",
                    workers.self_stop_probability
                ),
            }
        );
        Ok(())
    }
}

/// Settings of the `counter` process.
#[derive(Debug, Clone, Serialize, Deserialize, SmartDefault, Builder)]
#[serde(default)]
pub struct CounterOptions {
    /// Unix socket accepting commands. No socket, no commands.
    #[builder(into)]
    pub socket: Option<PathBuf>,

    /// Stop on its own once the counter reaches this value.
    pub limit: Option<u64>,

    #[default = 1000]
    #[builder(default = 1000)]
    pub interval_ms: u64,

    #[default = 5000]
    #[builder(default = 5000)]
    pub term_delay_ms: u64,
}

impl CounterOptions {
    #[must_use]
    pub const fn interval(&self) -> Duration { Duration::from_millis(self.interval_ms) }

    #[must_use]
    pub const fn term_delay(&self) -> Duration { Duration::from_millis(self.term_delay_ms) }
}

/// Settings of the `workers` pool manager.
#[derive(Debug, Clone, Serialize, Deserialize, SmartDefault, Builder)]
#[serde(default)]
pub struct WorkersOptions {
    #[builder(into)]
    pub socket: Option<PathBuf>,

    /// Workers registered at startup, named `wrk1..wrkN`.
    #[default = 3]
    #[builder(default = 3)]
    pub workers: usize,

    #[default = 13]
    #[builder(default = 13)]
    pub max_workers: usize,

    /// Pause between two units of work of a worker.
    #[default = 1000]
    #[builder(default = 1000)]
    pub work_interval_ms: u64,

    /// Chance, per unit of work, that a worker stops itself.
    #[default = 0.0]
    #[builder(default = 0.0)]
    pub self_stop_probability: f64,

    #[default = 5000]
    #[builder(default = 5000)]
    pub monitor_interval_ms: u64,

    #[default = 3000]
    #[builder(default = 3000)]
    pub stop_delay_ms: u64,

    #[default = 5000]
    #[builder(default = 5000)]
    pub term_delay_ms: u64,
}

impl WorkersOptions {
    #[must_use]
    pub const fn work_interval(&self) -> Duration { Duration::from_millis(self.work_interval_ms) }

    #[must_use]
    pub const fn monitor_interval(&self) -> Duration {
        Duration::from_millis(self.monitor_interval_ms)
    }

    #[must_use]
    pub const fn stop_delay(&self) -> Duration { Duration::from_millis(self.stop_delay_ms) }

    #[must_use]
    pub const fn term_delay(&self) -> Duration { Duration::from_millis(self.term_delay_ms) }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use crate::error::AppError;

    #[test]
    fn defaults_match_embedded_file() {
        let config = AppConfig::load(None).unwrap();
        assert_eq!(config.counter.interval(), Duration::from_secs(1));
        assert!(config.counter.limit.is_none());
        assert_eq!(config.workers.workers, 3);
        assert_eq!(config.workers.max_workers, 13);
        assert_eq!(config.workers.monitor_interval(), Duration::from_secs(5));
        assert_eq!(config.logging, LoggingOptions::default());
    }

    #[test]
    fn file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[counter]\nlimit = 60\n\n[workers]\nmax_workers = 5\nsocket = \"/tmp/w.sock\""
        )
        .unwrap();

        let config = AppConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.counter.limit, Some(60));
        assert_eq!(config.counter.interval_ms, 1000);
        assert_eq!(config.workers.max_workers, 5);
        assert_eq!(config.workers.socket, Some(PathBuf::from("/tmp/w.sock")));
    }

    #[test]
    fn missing_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let err = AppConfig::load(Some(&dir.path().join("absent.toml"))).unwrap_err();
        assert!(matches!(err, AppError::MissingConfig { .. }));
    }

    #[test]
    fn rejects_more_workers_than_allowed() {
        let mut config = AppConfig::default();
        config.workers.workers = 20;
        assert!(matches!(
            config.validate(),
            Err(AppError::InvalidConfig { .. })
        ));

        config.workers.workers = 1;
        config.workers.self_stop_probability = 1.5;
        assert!(config.validate().is_err());
    }
}

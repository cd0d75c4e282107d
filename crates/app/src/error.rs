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

use std::path::PathBuf;

use snafu::{Location, Snafu};
use tasklet_lifecycle::{CommandError, ManagerError, ProcessError};

pub type Result<T, E = AppError> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum AppError {
    #[snafu(display("Config file {} does not exist", path.display()))]
    MissingConfig {
        path: PathBuf,
        #[snafu(implicit)]
        loc:  Location,
    },

    #[snafu(display("Failed to load configuration"))]
    LoadConfig {
        source: config::ConfigError,
        #[snafu(implicit)]
        loc:    Location,
    },

    #[snafu(display("Invalid configuration: {message}"))]
    InvalidConfig {
        message: String,
        #[snafu(implicit)]
        loc:     Location,
    },

    #[snafu(display("Failed to register worker {name}"))]
    Register {
        name:   String,
        source: ManagerError,
        #[snafu(implicit)]
        loc:    Location,
    },

    #[snafu(display("Failed to open command transport"))]
    Transport {
        source: CommandError,
        #[snafu(implicit)]
        loc:    Location,
    },

    #[snafu(display("Process {name} failed"))]
    Run {
        name:   String,
        source: ProcessError,
        #[snafu(implicit)]
        loc:    Location,
    },
}

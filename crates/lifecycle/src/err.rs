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

use snafu::{IntoError, Location, Snafu};

/// Result type returned by [`Tasklet`](crate::Tasklet) callbacks.
pub type TaskResult<T = ()> = std::result::Result<T, TaskError>;

/// Failure of a user callback.
///
/// Whatever the variant, the handler reacts by phase: a failed `initialize`
/// ends the current start, failures in `execute` and `terminate` are logged
/// and the lifecycle carries on.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum TaskError {
    #[snafu(display("{message}"))]
    Failed {
        message: String,
        #[snafu(implicit)]
        loc:     Location,
    },

    #[snafu(display("{message}"))]
    Wrapped {
        message: String,
        source:  Box<dyn std::error::Error + Send + Sync>,
        #[snafu(implicit)]
        loc:     Location,
    },

    /// The callback panicked; the panic was caught by the handler.
    #[snafu(display("panicked: {message}"))]
    Panicked {
        message: String,
        #[snafu(implicit)]
        loc:     Location,
    },

    #[snafu(display("{source}"))]
    Routine {
        source: ManagerError,
        #[snafu(implicit)]
        loc:    Location,
    },
}

impl TaskError {
    pub fn msg(message: impl Into<String>) -> Self {
        FailedSnafu {
            message: message.into(),
        }
        .build()
    }

    pub fn wrap<E>(message: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        WrappedSnafu {
            message: message.into(),
        }
        .into_error(Box::new(source) as Box<dyn std::error::Error + Send + Sync>)
    }

    #[must_use]
    pub const fn is_panic(&self) -> bool { matches!(self, Self::Panicked { .. }) }
}

/// Errors of the routine administration API.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ManagerError {
    #[snafu(display("duplicate routine name: {name}"))]
    DuplicateRoutine {
        name: String,
        #[snafu(implicit)]
        loc:  Location,
    },

    #[snafu(display("invalid routine name: {name}"))]
    InvalidRoutine {
        name: String,
        #[snafu(implicit)]
        loc:  Location,
    },

    #[snafu(display("failed to stop routine: {name}"))]
    StopRoutineFailed {
        name: String,
        #[snafu(implicit)]
        loc:  Location,
    },

    #[snafu(display("no routines loaded"))]
    NoRoutines {
        #[snafu(implicit)]
        loc: Location,
    },
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ProcessError {
    #[snafu(display("Failed to subscribe to signal {signal}"))]
    SignalInstall {
        signal: i32,
        source: std::io::Error,
        #[snafu(implicit)]
        loc:    Location,
    },
}

/// Errors raised by command transports.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum CommandError {
    #[snafu(display("Failed to bind command socket {}", path.display()))]
    Bind {
        path:   PathBuf,
        source: std::io::Error,
        #[snafu(implicit)]
        loc:    Location,
    },

    #[snafu(display("Failed to accept command connection"))]
    Accept {
        source: std::io::Error,
        #[snafu(implicit)]
        loc:    Location,
    },

    #[snafu(display("Failed to connect to command socket {}", path.display()))]
    Connect {
        path:   PathBuf,
        source: std::io::Error,
        #[snafu(implicit)]
        loc:    Location,
    },

    #[snafu(display("Command transport I/O failed"))]
    Io {
        source: std::io::Error,
        #[snafu(implicit)]
        loc:    Location,
    },

    #[snafu(display("Command channel closed"))]
    Closed {
        #[snafu(implicit)]
        loc: Location,
    },
}

#[cfg(test)]
mod tests {
    use snafu::ResultExt;

    use super::*;

    #[test]
    fn messages_read_like_the_admin_replies() {
        assert_eq!(
            DuplicateRoutineSnafu { name: "wrk1" }.build().to_string(),
            "duplicate routine name: wrk1"
        );
        assert_eq!(
            InvalidRoutineSnafu { name: "wrk9" }.build().to_string(),
            "invalid routine name: wrk9"
        );
        assert_eq!(NoRoutinesSnafu.build().to_string(), "no routines loaded");
    }

    #[test]
    fn manager_errors_lift_into_task_errors() {
        let err = NoRoutinesSnafu
            .fail::<()>()
            .context(RoutineSnafu)
            .unwrap_err();
        assert_eq!(err.to_string(), "no routines loaded");
        assert!(!err.is_panic());
    }

    #[test]
    fn wrapped_keeps_source() {
        let io = std::io::Error::other("disk gone");
        let err = TaskError::wrap("flush failed", io);
        assert_eq!(err.to_string(), "flush failed");
        assert!(std::error::Error::source(&err).is_some());
    }
}

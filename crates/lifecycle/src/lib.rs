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

//! Cooperative lifecycle management for long-running work.
//!
//! A [`Tasklet`] supplies `initialize`, `execute` and `terminate`. A
//! [`TaskletHandler`] drives those callbacks and owns the stop and kill
//! requests. A [`Process`] adds OS signal routing and external command
//! dispatch, and a [`RoutineManager`] is a process that keeps a named set of
//! [`Routine`]s running.
//!
//! Cancellation is never preemptive. Stop and kill requests are observed
//! between two `execute` calls and inside [`TaskletContext::sleep`].

pub mod command;
mod config;
mod context;
mod err;
mod handler;
pub mod latch;
mod manager;
pub mod metrics;
mod process;
mod routine;
pub mod signal;
mod tasklet;

pub use command::{
    ChannelListener, Command, CommandClient, CommandHandler, CommandListener, FnCommandHandler,
    UnixCommandListener, channel, command_fn, send_command,
};
pub use config::{HandlerConfig, ManagerConfig};
pub use context::{TaskletContext, TaskletControl};
pub use err::{CommandError, ManagerError, ProcessError, TaskError, TaskResult};
pub use handler::TaskletHandler;
pub use latch::Latch;
pub use manager::{ManagerHandle, RoutineManager};
pub use process::Process;
pub use routine::Routine;
pub use signal::{SignalAction, SignalMap};
pub use tasklet::Tasklet;
pub use tokio::signal::unix::SignalKind;

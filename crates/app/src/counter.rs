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

//! A process that counts, and answers `exit`, `reset` and `count`.

use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use snafu::ResultExt;
use tasklet_lifecycle::{
    CommandHandler, CommandListener, HandlerConfig, Process, Tasklet, TaskletContext,
    TaskletControl, TaskResult,
};
use tracing::{debug, info};

use crate::{
    config::CounterOptions,
    error::{Result, RunSnafu},
};

pub const DONE: &str = "done";
pub const INVALID_COMMAND: &str = "INVALID_COMMAND";

struct CounterTasklet {
    count:    Arc<AtomicU64>,
    limit:    Option<u64>,
    interval: Duration,
}

#[async_trait::async_trait]
impl Tasklet for CounterTasklet {
    async fn initialize(&mut self, _ctx: &TaskletContext) -> TaskResult {
        info!(limit = ?self.limit, interval = ?self.interval, "counter starting");
        Ok(())
    }

    async fn execute(&mut self, ctx: &TaskletContext) -> TaskResult {
        let count = self.count.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(count, "tick");
        ctx.sleep(self.interval).await;
        if self.limit.is_some_and(|limit| count >= limit) {
            info!(count, "limit reached");
            ctx.stop();
        }
        Ok(())
    }

    async fn terminate(&mut self, _ctx: &TaskletContext) -> TaskResult {
        info!(count = self.count.load(Ordering::SeqCst), "counter stopped");
        Ok(())
    }
}

/// Command vocabulary of the counter.
#[derive(Debug, Clone)]
pub struct CounterCommands {
    count:   Arc<AtomicU64>,
    control: TaskletControl,
}

#[async_trait::async_trait]
impl CommandHandler for CounterCommands {
    async fn handle(&self, request: &str) -> String {
        match request {
            "exit" => {
                self.control.stop();
                DONE.to_string()
            }
            "reset" => {
                self.count.store(0, Ordering::SeqCst);
                DONE.to_string()
            }
            "count" => self.count.load(Ordering::SeqCst).to_string(),
            _ => INVALID_COMMAND.to_string(),
        }
    }
}

#[derive(Debug)]
pub struct CounterApp {
    process: Process,
    count:   Arc<AtomicU64>,
}

impl CounterApp {
    #[must_use]
    pub fn new(opts: &CounterOptions) -> Self {
        let count = Arc::new(AtomicU64::new(0));
        let process = Process::with_config(
            "counter",
            CounterTasklet {
                count:    Arc::clone(&count),
                limit:    opts.limit,
                interval: opts.interval(),
            },
            HandlerConfig::builder().term_delay(opts.term_delay()).build(),
        );
        Self { process, count }
    }

    /// Serves the counter vocabulary on `listener` during the next run.
    pub fn listen(&mut self, listener: impl CommandListener) {
        let commands = self.commands();
        self.process.set_command_listener(listener, commands);
    }

    #[must_use]
    pub fn commands(&self) -> CounterCommands {
        CounterCommands {
            count:   Arc::clone(&self.count),
            control: self.process.control(),
        }
    }

    #[must_use]
    pub fn count(&self) -> u64 { self.count.load(Ordering::SeqCst) }

    #[must_use]
    pub fn control(&self) -> TaskletControl { self.process.control() }

    pub fn process_mut(&mut self) -> &mut Process { &mut self.process }

    pub async fn run(&self) -> Result<()> {
        self.process.start().await.context(RunSnafu {
            name: self.process.name(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn vocabulary() {
        let app = CounterApp::new(&CounterOptions::default());
        let commands = app.commands();
        app.count.store(7, Ordering::SeqCst);

        assert_eq!(commands.handle("count").await, "7");
        assert_eq!(commands.handle("reset").await, DONE);
        assert_eq!(app.count(), 0);
        assert_eq!(commands.handle("bogus").await, INVALID_COMMAND);
        assert_eq!(commands.handle("exit").await, DONE);
        assert!(app.control().is_stopping());
    }

    #[tokio::test(start_paused = true)]
    async fn limit_stops_the_counter() {
        let app = CounterApp::new(&CounterOptions::builder().limit(5).build());
        app.run().await.unwrap();
        assert_eq!(app.count(), 5);
    }
}

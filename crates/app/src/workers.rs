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

//! A [`RoutineManager`] running a pool of numbered workers, driven by the
//! worker command vocabulary.

use std::{sync::Arc, time::Duration};

use snafu::ResultExt;
use tasklet_common_telemetry::reload_log_level;
use tasklet_lifecycle::{
    CommandHandler, CommandListener, HandlerConfig, ManagerConfig, ManagerHandle,
    RoutineManager, SignalKind, Tasklet, TaskletContext, TaskletHandler, TaskResult,
};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::{
    config::WorkersOptions,
    error::{RegisterSnafu, Result, RunSnafu},
};

pub const DONE: &str = "DONE";
pub const FAILED: &str = "FAILED";
pub const MAX_REACHED: &str = "MAX_REACHED";
pub const NO_WORKERS: &str = "NO_WORKERS";
pub const MISSING_PARAM: &str = "MISSING_PARAM";
pub const INVALID_COMMAND: &str = "INVALID_COMMAND";

const WORKER_PREFIX: &str = "wrk";

#[must_use]
pub fn worker_name(id: u64) -> String { format!("{WORKER_PREFIX}{id}") }

fn worker_id(name: &str) -> Option<u64> { name.strip_prefix(WORKER_PREFIX)?.parse().ok() }

/// One pool member: works, sleeps, and now and then gives up on its own.
struct PoolWorker {
    interval:    Duration,
    stop_chance: f64,
    units:       u64,
}

#[async_trait::async_trait]
impl Tasklet for PoolWorker {
    async fn initialize(&mut self, ctx: &TaskletContext) -> TaskResult {
        self.units = 0;
        debug!(worker = ctx.name(), "worker up");
        Ok(())
    }

    async fn execute(&mut self, ctx: &TaskletContext) -> TaskResult {
        self.units += 1;
        if !ctx.sleep(self.interval).await {
            return Ok(());
        }
        if self.stop_chance > 0.0 && rand::random_bool(self.stop_chance) {
            info!(worker = ctx.name(), units = self.units, "worker stopping itself");
            ctx.stop();
        }
        Ok(())
    }

    async fn terminate(&mut self, ctx: &TaskletContext) -> TaskResult {
        debug!(worker = ctx.name(), units = self.units, "worker down");
        Ok(())
    }
}

/// Numbered view over a manager's routines.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    manager: ManagerHandle,
    opts:    Arc<WorkersOptions>,
    // Serializes add/del so numbering decisions see a stable roster.
    roster:  Arc<Mutex<()>>,
}

impl WorkerPool {
    fn worker(&self, id: u64) -> TaskletHandler {
        TaskletHandler::with_config(
            worker_name(id),
            PoolWorker {
                interval:    self.opts.work_interval(),
                stop_chance: self.opts.self_stop_probability,
                units:       0,
            },
            HandlerConfig::builder().enabled(true).build(),
        )
    }

    /// Worker ids in ascending order.
    pub async fn ids(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self
            .manager
            .list_routines()
            .await
            .iter()
            .filter_map(|name| worker_id(name))
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Comma-separated worker names in numeric order, or `NO_WORKERS`.
    pub async fn list(&self) -> String {
        let ids = self.ids().await;
        if ids.is_empty() {
            return NO_WORKERS.to_string();
        }
        ids.into_iter()
            .map(worker_name)
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Adds a worker numbered one past the highest id.
    pub async fn add(&self) -> &'static str {
        let _roster = self.roster.lock().await;
        let ids = self.ids().await;
        if ids.len() >= self.opts.max_workers {
            return MAX_REACHED;
        }
        let id = ids.last().map_or(1, |last| last + 1);
        match self
            .manager
            .add_routine(worker_name(id), self.worker(id), true)
            .await
        {
            Ok(()) => DONE,
            Err(e) => {
                warn!(error = %e, "add_worker failed");
                FAILED
            }
        }
    }

    /// Removes the lowest numbered worker.
    pub async fn remove_lowest(&self) -> &'static str {
        let _roster = self.roster.lock().await;
        let Some(id) = self.ids().await.first().copied() else {
            return NO_WORKERS;
        };
        match self.manager.del_routine(&worker_name(id)).await {
            Ok(()) => DONE,
            Err(e) => {
                warn!(error = %e, "del_worker failed");
                FAILED
            }
        }
    }

    async fn register_initial(&self) -> Result<()> {
        for id in 1..=self.opts.workers as u64 {
            let name = worker_name(id);
            self.manager
                .add_routine(name.clone(), self.worker(id), true)
                .await
                .context(RegisterSnafu { name })?;
        }
        Ok(())
    }
}

/// Command vocabulary of the worker pool.
#[derive(Debug, Clone)]
pub struct WorkerCommands {
    pool: WorkerPool,
}

impl WorkerCommands {
    async fn by_name<F, Fut>(&self, param: Option<&str>, op: F) -> &'static str
    where
        F: FnOnce(ManagerHandle, String) -> Fut,
        Fut: Future<Output = std::result::Result<(), tasklet_lifecycle::ManagerError>>,
    {
        let Some(param) = param.map(str::trim).filter(|p| !p.is_empty()) else {
            return MISSING_PARAM;
        };
        let name = param
            .parse::<u64>()
            .map_or_else(|_| param.to_string(), worker_name);
        match op(self.pool.manager.clone(), name).await {
            Ok(()) => DONE,
            Err(e) => {
                warn!(error = %e, "worker command failed");
                FAILED
            }
        }
    }
}

#[async_trait::async_trait]
impl CommandHandler for WorkerCommands {
    async fn handle(&self, request: &str) -> String {
        let (verb, param) = match request.split_once(':') {
            Some((verb, param)) => (verb, Some(param)),
            None => (request, None),
        };

        let reply = match verb {
            "list_workers" => return self.pool.list().await,
            "add_worker" => self.pool.add().await,
            "del_worker" => self.pool.remove_lowest().await,
            "start_worker" => {
                self.by_name(param, |m, name| async move { m.start_routine(&name).await })
                    .await
            }
            "stop_worker" => {
                self.by_name(param, |m, name| async move { m.stop_routine(&name).await })
                    .await
            }
            "restart_worker" => {
                self.by_name(param, |m, name| async move { m.restart_routine(&name).await })
                    .await
            }
            "log_level" => match param {
                None => MISSING_PARAM,
                Some(level) => match reload_log_level(level) {
                    Ok(()) => DONE,
                    Err(e) => {
                        warn!(error = %e, "log level reload failed");
                        FAILED
                    }
                },
            },
            "exit" => {
                self.pool.manager.stop();
                DONE
            }
            _ => INVALID_COMMAND,
        };
        reply.to_string()
    }
}

#[derive(Debug)]
pub struct WorkersApp {
    manager: RoutineManager,
    pool:    WorkerPool,
}

impl WorkersApp {
    /// Builds the manager and registers `wrk1..wrkN`. SIGQUIT kills the
    /// manager and SIGHUP logs the roster.
    pub async fn new(opts: &WorkersOptions) -> Result<Self> {
        let mut manager = RoutineManager::new(
            "workers",
            ManagerConfig::builder()
                .monitor_interval(opts.monitor_interval())
                .stop_delay(opts.stop_delay())
                .handler(HandlerConfig::builder().term_delay(opts.term_delay()).build())
                .build(),
        );
        let pool = WorkerPool {
            manager: manager.handle(),
            opts:    Arc::new(opts.clone()),
            roster:  Arc::new(Mutex::new(())),
        };
        pool.register_initial().await?;

        let control = manager.control();
        manager.set_signal_handler(SignalKind::quit(), move || control.kill());
        {
            let pool = pool.clone();
            manager.set_signal_handler(SignalKind::hangup(), move || {
                let pool = pool.clone();
                tokio::spawn(async move {
                    let workers = pool.list().await;
                    info!(workers = %workers, "worker roster");
                });
            });
        }

        Ok(Self { manager, pool })
    }

    pub fn listen(&mut self, listener: impl CommandListener) {
        let commands = self.commands();
        self.manager.set_command_listener(listener, commands);
    }

    #[must_use]
    pub fn commands(&self) -> WorkerCommands {
        WorkerCommands {
            pool: self.pool.clone(),
        }
    }

    #[must_use]
    pub const fn pool(&self) -> &WorkerPool { &self.pool }

    #[must_use]
    pub const fn manager(&self) -> &RoutineManager { &self.manager }

    pub async fn run(&self) -> Result<()> {
        self.manager.start().await.context(RunSnafu {
            name: self.manager.name(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_round_trip_through_ids() {
        assert_eq!(worker_name(12), "wrk12");
        assert_eq!(worker_id("wrk12"), Some(12));
        assert_eq!(worker_id("wrk"), None);
        assert_eq!(worker_id("other3"), None);
    }

    #[tokio::test]
    async fn parameters_are_required() {
        let app = WorkersApp::new(&WorkersOptions::default()).await.unwrap();
        let commands = app.commands();
        assert_eq!(commands.handle("start_worker").await, MISSING_PARAM);
        assert_eq!(commands.handle("stop_worker:").await, MISSING_PARAM);
        assert_eq!(commands.handle("restart_worker:9").await, FAILED);
        assert_eq!(commands.handle("log_level").await, MISSING_PARAM);
        assert_eq!(commands.handle("dance").await, INVALID_COMMAND);
    }

    #[tokio::test]
    async fn roster_lists_numerically() {
        let opts = WorkersOptions::builder().workers(0).max_workers(11).build();
        let app = WorkersApp::new(&opts).await.unwrap();
        let commands = app.commands();
        assert_eq!(commands.handle("list_workers").await, NO_WORKERS);
        assert_eq!(commands.handle("del_worker").await, NO_WORKERS);

        for _ in 0..11 {
            assert_eq!(commands.handle("add_worker").await, DONE);
        }
        assert_eq!(commands.handle("add_worker").await, MAX_REACHED);
        assert_eq!(
            commands.handle("list_workers").await,
            "wrk1,wrk2,wrk3,wrk4,wrk5,wrk6,wrk7,wrk8,wrk9,wrk10,wrk11"
        );
    }
}

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

//! Supervision of a named set of [`Routine`]s.

use std::{
    collections::BTreeMap,
    sync::{
        Arc, OnceLock,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use snafu::{OptionExt, ResultExt};
use tokio::{signal::unix::SignalKind, sync::Mutex, time::Instant};
use tracing::{debug, error, info, warn};

use crate::{
    command::{CommandHandler, CommandListener},
    config::ManagerConfig,
    context::{TaskletContext, TaskletControl},
    err::{
        DuplicateRoutineSnafu, InvalidRoutineSnafu, ManagerError, NoRoutinesSnafu,
        ProcessError, RoutineSnafu, StopRoutineFailedSnafu, TaskResult,
    },
    metrics::{ROUTINE_ADMIN_OPS, ROUTINE_SPAWNS, ROUTINE_STOP_TIMEOUTS},
    process::Process,
    routine::Routine,
    tasklet::Tasklet,
};

/// Liveness poll period used while waiting for routines to die.
const POLL: Duration = Duration::from_millis(100);

type RoutineMap = BTreeMap<String, Arc<dyn Routine>>;

struct Shared {
    name:        String,
    config:      ManagerConfig,
    routines:    Mutex<RoutineMap>,
    /// Set by the supervisor's terminate, cleared by its next initialize.
    terminating: AtomicBool,
    /// Spawned starts that have not returned yet.
    launching:   AtomicUsize,
    /// Control of the manager's own handler.
    control:     OnceLock<TaskletControl>,
}

/// Counts one spawned start in [`Shared::launching`] until dropped.
struct Launch(Arc<Shared>);

impl Launch {
    fn new(shared: &Arc<Shared>) -> Self {
        shared.launching.fetch_add(1, Ordering::AcqRel);
        Self(Arc::clone(shared))
    }
}

impl Drop for Launch {
    fn drop(&mut self) { self.0.launching.fetch_sub(1, Ordering::AcqRel); }
}

impl Shared {
    /// Whether the manager is inside its terminate phase. Routines must not
    /// be enabled or started then.
    fn is_terminating(&self) -> bool {
        self.terminating.load(Ordering::Acquire)
            && self.control.get().is_some_and(TaskletControl::is_initialized)
    }

    fn launching(&self) -> usize { self.launching.load(Ordering::Acquire) }

    /// Starts `routine` on a fresh task. The start is skipped if the routine
    /// was disabled, or the manager began terminating, before the task ran.
    fn spawn_start(self: &Arc<Self>, name: &str, routine: Arc<dyn Routine>) {
        debug!(manager = %self.name, routine = name, "spawning routine start");
        ROUTINE_SPAWNS.with_label_values(&[self.name.as_str()]).inc();
        let launch = Launch::new(self);
        drop(self.config.spawner().spawn(async move {
            if routine.is_enabled() && !launch.0.is_terminating() {
                routine.start().await;
            }
            drop(launch);
        }));
    }

    async fn snapshot(&self) -> Vec<(String, Arc<dyn Routine>)> {
        self.routines
            .lock()
            .await
            .iter()
            .map(|(name, routine)| (name.clone(), Arc::clone(routine)))
            .collect()
    }

    fn record(&self, op: &str, result: &Result<(), ManagerError>) {
        let outcome = if result.is_ok() { "ok" } else { "error" };
        ROUTINE_ADMIN_OPS
            .with_label_values(&[self.name.as_str(), op, outcome])
            .inc();
    }
}

/// Polls `routine` until it is dead or `wait` elapsed. Returns whether it
/// died.
async fn wait_dead(routine: &dyn Routine, wait: Duration) -> bool {
    let deadline = Instant::now() + wait;
    while routine.is_alive() {
        let now = Instant::now();
        if now >= deadline {
            return false;
        }
        tokio::time::sleep(POLL.min(deadline - now)).await;
    }
    true
}

fn alive_names(routines: &[(String, Arc<dyn Routine>)]) -> Vec<&str> {
    routines
        .iter()
        .filter(|(_, routine)| routine.is_alive())
        .map(|(name, _)| name.as_str())
        .collect()
}

/// Stops every live routine and returns their names. Stop is idempotent, so
/// repeating it catches starts that were in flight on the previous pass.
fn stop_alive(routines: &[(String, Arc<dyn Routine>)]) -> Vec<&str> {
    let alive = alive_names(routines);
    for (name, routine) in routines {
        if routine.is_alive() {
            debug!(routine = %name, "stopping routine");
            routine.stop();
        }
    }
    alive
}

/// The tasklet a [`RoutineManager`]'s process drives.
struct Supervisor {
    shared: Arc<Shared>,
}

#[async_trait::async_trait]
impl Tasklet for Supervisor {
    async fn initialize(&mut self, _ctx: &TaskletContext) -> TaskResult {
        let routines = self.shared.routines.lock().await;
        self.shared.terminating.store(false, Ordering::Release);
        if routines.is_empty() {
            return NoRoutinesSnafu.fail().context(RoutineSnafu);
        }
        for (name, routine) in routines.iter() {
            info!(routine = %name, enabled = routine.is_enabled(), "routine registered");
        }
        info!(count = routines.len(), "routine catalog loaded");
        Ok(())
    }

    async fn execute(&mut self, ctx: &TaskletContext) -> TaskResult {
        for (name, routine) in self.shared.snapshot().await {
            if routine.is_enabled() && !routine.is_alive() {
                self.shared.spawn_start(&name, routine);
            }
        }
        ctx.sleep(self.shared.config.monitor_interval).await;
        Ok(())
    }

    async fn terminate(&mut self, ctx: &TaskletContext) -> TaskResult {
        // Raised under the map lock so no add can slip in unnoticed.
        let routines = {
            let routines = self.shared.routines.lock().await;
            self.shared.terminating.store(true, Ordering::Release);
            routines
                .iter()
                .map(|(name, routine)| (name.clone(), Arc::clone(routine)))
                .collect::<Vec<_>>()
        };
        for (_, routine) in &routines {
            routine.disable();
        }

        let deadline = Instant::now() + self.shared.config.stop_delay;
        loop {
            if stop_alive(&routines).is_empty() && self.shared.launching() == 0 {
                info!("all routines stopped");
                return Ok(());
            }
            let poll = POLL.min(deadline.saturating_duration_since(Instant::now()));
            // A false sleep means kill or the end of the terminate budget.
            if poll.is_zero() || !ctx.sleep(poll).await {
                break;
            }
        }

        let survivors = alive_names(&routines);
        if !survivors.is_empty() {
            error!(
                routines = %survivors.join(","),
                stop_delay = ?self.shared.config.stop_delay,
                "routines still alive after stop delay"
            );
            ROUTINE_STOP_TIMEOUTS
                .with_label_values(&[self.shared.name.as_str()])
                .inc();
        }
        Ok(())
    }
}

/// Cloneable administration handle of a [`RoutineManager`], for command
/// handlers and signal actions.
///
/// Every operation holds the routine map for its whole duration, so
/// concurrent operations are serialized.
#[derive(Clone)]
pub struct ManagerHandle {
    shared:  Arc<Shared>,
    control: TaskletControl,
}

impl std::fmt::Debug for ManagerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagerHandle")
            .field("name", &self.shared.name)
            .finish_non_exhaustive()
    }
}

impl ManagerHandle {
    #[must_use]
    pub fn name(&self) -> &str { &self.shared.name }

    #[must_use]
    pub const fn control(&self) -> &TaskletControl { &self.control }

    /// Stops the manager itself; its terminate then stops every routine.
    pub fn stop(&self) { self.control.stop(); }

    pub fn kill(&self) { self.control.kill(); }

    /// Registers `routine` under `name`. A routine added to an initialized
    /// manager is started right away.
    pub async fn add_routine(
        &self,
        name: impl Into<String>,
        routine: impl Routine,
        enabled: bool,
    ) -> Result<(), ManagerError> {
        let name = name.into();
        let result = self.insert(&name, Arc::new(routine), enabled).await;
        self.shared.record("add", &result);
        result
    }

    async fn insert(
        &self,
        name: &str,
        routine: Arc<dyn Routine>,
        enabled: bool,
    ) -> Result<(), ManagerError> {
        let mut routines = self.shared.routines.lock().await;
        if routines.contains_key(name) {
            return DuplicateRoutineSnafu { name }.fail();
        }
        let terminating = self.shared.is_terminating();
        if terminating {
            routine.disable();
        } else if enabled {
            routine.enable();
        }
        routines.insert(name.to_string(), Arc::clone(&routine));
        info!(
            manager = %self.shared.name,
            routine = name,
            enabled = routine.is_enabled(),
            "routine added"
        );

        if self.control.is_initialized() && !terminating {
            self.shared.spawn_start(name, routine);
        }
        Ok(())
    }

    /// Disables and removes a routine, stopping it first and killing it if
    /// the stop is not enough.
    pub async fn del_routine(&self, name: &str) -> Result<(), ManagerError> {
        let result = self.remove(name).await;
        self.shared.record("del", &result);
        result
    }

    async fn remove(&self, name: &str) -> Result<(), ManagerError> {
        let mut routines = self.shared.routines.lock().await;
        let routine = routines
            .get(name)
            .cloned()
            .context(InvalidRoutineSnafu { name })?;

        routine.disable();
        if routine.is_alive() {
            let wait = self.shared.config.removal_wait;
            routine.stop();
            if !wait_dead(routine.as_ref(), wait).await {
                warn!(routine = name, "routine ignored stop, killing");
                routine.kill();
                if !wait_dead(routine.as_ref(), wait).await {
                    error!(routine = name, "routine survived kill");
                    return StopRoutineFailedSnafu { name }.fail();
                }
            }
        }

        routines.remove(name);
        info!(manager = %self.shared.name, routine = name, "routine removed");
        Ok(())
    }

    /// Enables a routine and starts it unless it is already alive.
    pub async fn start_routine(&self, name: &str) -> Result<(), ManagerError> {
        let result = async {
            let routines = self.shared.routines.lock().await;
            let routine = routines.get(name).context(InvalidRoutineSnafu { name })?;
            if self.shared.is_terminating() {
                debug!(routine = name, "manager terminating, start ignored");
                return Ok(());
            }
            routine.enable();
            if !routine.is_alive() {
                self.shared.spawn_start(name, Arc::clone(routine));
            }
            Ok::<_, ManagerError>(())
        }
        .await;
        self.shared.record("start", &result);
        result
    }

    /// Disables a routine and asks it to stop. It stays registered.
    pub async fn stop_routine(&self, name: &str) -> Result<(), ManagerError> {
        let result = async {
            let routines = self.shared.routines.lock().await;
            let routine = routines.get(name).context(InvalidRoutineSnafu { name })?;
            routine.disable();
            routine.stop();
            Ok::<_, ManagerError>(())
        }
        .await;
        self.shared.record("stop", &result);
        result
    }

    /// Enables a routine; a live one is stopped and relaunched by the next
    /// sweep, a dead one is started right away.
    pub async fn restart_routine(&self, name: &str) -> Result<(), ManagerError> {
        let result = async {
            let routines = self.shared.routines.lock().await;
            let routine = routines.get(name).context(InvalidRoutineSnafu { name })?;
            if self.shared.is_terminating() {
                debug!(routine = name, "manager terminating, restart ignored");
                return Ok(());
            }
            routine.enable();
            if routine.is_alive() {
                routine.stop();
            } else {
                self.shared.spawn_start(name, Arc::clone(routine));
            }
            Ok::<_, ManagerError>(())
        }
        .await;
        self.shared.record("restart", &result);
        result
    }

    /// Registered names, sorted.
    pub async fn list_routines(&self) -> Vec<String> {
        self.shared.routines.lock().await.keys().cloned().collect()
    }

    pub async fn routine_count(&self) -> usize { self.shared.routines.lock().await.len() }

    pub async fn get_routine(&self, name: &str) -> Option<Arc<dyn Routine>> {
        self.shared.routines.lock().await.get(name).cloned()
    }
}

/// A [`Process`] whose execute loop keeps every enabled routine running.
///
/// Each sweep starts the enabled routines that are not alive, then sleeps
/// `monitor_interval`. There is no per-routine backoff: a routine that dies
/// right away is relaunched on every sweep.
#[derive(Debug)]
pub struct RoutineManager {
    process: Process,
    handle:  ManagerHandle,
}

impl RoutineManager {
    pub fn new(name: impl Into<String>, config: ManagerConfig) -> Self {
        let name = name.into();
        let handler_config = config.handler.clone();
        let shared = Arc::new(Shared {
            name: name.clone(),
            config,
            routines: Mutex::new(BTreeMap::new()),
            terminating: AtomicBool::new(false),
            launching: AtomicUsize::new(0),
            control: OnceLock::new(),
        });
        let process = Process::with_config(
            name,
            Supervisor {
                shared: Arc::clone(&shared),
            },
            handler_config,
        );
        let control = process.control();
        let _ = shared.control.set(control.clone());
        let handle = ManagerHandle { shared, control };
        Self { process, handle }
    }

    #[must_use]
    pub fn handle(&self) -> ManagerHandle { self.handle.clone() }

    #[must_use]
    pub fn name(&self) -> &str { self.process.name() }

    #[must_use]
    pub fn control(&self) -> TaskletControl { self.process.control() }

    #[must_use]
    pub const fn process(&self) -> &Process { &self.process }

    #[must_use]
    pub fn config(&self) -> &ManagerConfig { &self.handle.shared.config }

    pub fn set_signal_handler<F>(&mut self, kind: SignalKind, action: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.process.set_signal_handler(kind, action);
    }

    pub fn clear_signal_handler(&mut self, kind: SignalKind) -> bool {
        self.process.clear_signal_handler(kind)
    }

    pub fn set_command_listener(
        &mut self,
        listener: impl CommandListener,
        handler: impl CommandHandler,
    ) {
        self.process.set_command_listener(listener, handler);
    }

    /// Runs the supervisor until it is stopped. Returns once every routine
    /// has been stopped or reported as a survivor.
    pub async fn start(&self) -> Result<(), ProcessError> { self.process.start().await }

    pub fn stop(&self) { self.process.stop(); }

    pub fn kill(&self) { self.process.kill(); }

    pub async fn sleep(&self, duration: Duration) -> bool { self.process.sleep(duration).await }

    pub fn enable(&self) { self.process.enable(); }

    pub fn disable(&self) { self.process.disable(); }

    #[must_use]
    pub fn is_enabled(&self) -> bool { self.process.is_enabled() }

    #[must_use]
    pub fn is_alive(&self) -> bool { self.process.is_alive() }

    #[must_use]
    pub fn is_initialized(&self) -> bool { self.process.is_initialized() }

    pub async fn add_routine(
        &self,
        name: impl Into<String>,
        routine: impl Routine,
        enabled: bool,
    ) -> Result<(), ManagerError> {
        self.handle.add_routine(name, routine, enabled).await
    }

    pub async fn del_routine(&self, name: &str) -> Result<(), ManagerError> {
        self.handle.del_routine(name).await
    }

    pub async fn start_routine(&self, name: &str) -> Result<(), ManagerError> {
        self.handle.start_routine(name).await
    }

    pub async fn stop_routine(&self, name: &str) -> Result<(), ManagerError> {
        self.handle.stop_routine(name).await
    }

    pub async fn restart_routine(&self, name: &str) -> Result<(), ManagerError> {
        self.handle.restart_routine(name).await
    }

    pub async fn list_routines(&self) -> Vec<String> { self.handle.list_routines().await }

    pub async fn routine_count(&self) -> usize { self.handle.routine_count().await }

    pub async fn get_routine(&self, name: &str) -> Option<Arc<dyn Routine>> {
        self.handle.get_routine(name).await
    }
}

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

//! The lifecycle driver of a single [`Tasklet`].
//!
//! ```text
//!   IDLE ──start──▶ INITIALIZING ──ok──▶ RUNNING ──stop/kill──▶ TERMINATING ──▶ IDLE
//!                        │ err                                                   ▲
//!                        └───────────────────────────────────────────────────────┘
//! ```

use std::{panic::AssertUnwindSafe, sync::Arc, time::Duration};

use futures::FutureExt;
use tasklet_common_telemetry::{panic_message, stack_excerpt};
use tokio::sync::Mutex;
use tracing::{Instrument, debug, error, info, info_span};

use crate::{
    config::HandlerConfig,
    context::{HandlerState, TaskletContext, TaskletControl},
    err::{PanickedSnafu, TaskResult},
    metrics::{
        TASKLET_ALIVE, TASKLET_EXECUTION_DURATION_SECONDS, TASKLET_EXECUTION_ERRORS,
        TASKLET_EXECUTIONS, TASKLET_INITIALIZE_ERRORS, TASKLET_PANICS, TASKLET_STARTED,
        TASKLET_TERMINATE_ERRORS,
    },
    tasklet::Tasklet,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
enum Phase {
    #[display("initialize")]
    Initialize,
    #[display("execute")]
    Execute,
    #[display("terminate")]
    Terminate,
}

/// Owns one [`Tasklet`] together with its stop and kill latches.
pub struct TaskletHandler {
    state:   Arc<HandlerState>,
    config:  HandlerConfig,
    tasklet: Mutex<Box<dyn Tasklet>>,
}

impl std::fmt::Debug for TaskletHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskletHandler")
            .field("name", &self.state.name())
            .field("alive", &self.state.is_alive())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl TaskletHandler {
    pub fn new(name: impl Into<String>, tasklet: impl Tasklet) -> Self {
        Self::with_config(name, tasklet, HandlerConfig::default())
    }

    pub fn with_config(name: impl Into<String>, tasklet: impl Tasklet, config: HandlerConfig) -> Self {
        Self {
            state: Arc::new(HandlerState::new(name.into(), config.enabled)),
            config,
            tasklet: Mutex::new(Box::new(tasklet)),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str { self.state.name() }

    #[must_use]
    pub const fn config(&self) -> &HandlerConfig { &self.config }

    #[must_use]
    pub fn control(&self) -> TaskletControl { TaskletControl::new(Arc::clone(&self.state)) }

    /// Runs the whole lifecycle on the caller's task and returns once the
    /// tasklet is dead again. Returns immediately if it is already alive.
    pub async fn start(&self) {
        if self.claim() {
            self.run_claimed().await;
        }
    }

    /// Marks the handler alive ahead of [`Self::run_claimed`]. Returns
    /// `false` if another start already owns the lifecycle.
    pub(crate) fn claim(&self) -> bool {
        let claimed = self.state.try_begin();
        if !claimed {
            debug!(tasklet = self.name(), "start ignored, tasklet already alive");
        }
        claimed
    }

    /// Gives back a claim that will not be run.
    pub(crate) fn release(&self) { self.state.finish(); }

    pub(crate) async fn run_claimed(&self) {
        let span = info_span!("tasklet", name = %self.state.name());
        self.run().instrument(span).await;
    }

    /// Requests a graceful stop: the loop exits after the current `execute`.
    pub fn stop(&self) { self.state.stop(); }

    /// Requests an immediate stop: like [`Self::stop`], and also cuts the
    /// terminate budget short.
    pub fn kill(&self) { self.state.kill(); }

    /// Cooperative sleep on this handler's latches, see
    /// [`TaskletContext::sleep`].
    pub async fn sleep(&self, duration: Duration) -> bool { self.state.sleep(duration).await }

    pub fn enable(&self) { self.state.enable(); }

    pub fn disable(&self) { self.state.disable(); }

    #[must_use]
    pub fn is_enabled(&self) -> bool { self.state.is_enabled() }

    #[must_use]
    pub fn is_alive(&self) -> bool { self.state.is_alive() }

    #[must_use]
    pub fn is_initialized(&self) -> bool { self.state.is_initialized() }

    async fn run(&self) {
        let name = self.state.name();
        TASKLET_STARTED.with_label_values(&[name]).inc();
        TASKLET_ALIVE.with_label_values(&[name]).set(1);

        let ctx = TaskletContext::new(Arc::clone(&self.state));
        let mut tasklet = self.tasklet.lock().await;

        info!("initializing");
        match guarded(name, Phase::Initialize, tasklet.initialize(&ctx)).await {
            Err(e) => {
                error!(error = %e, "initialize failed");
                TASKLET_INITIALIZE_ERRORS.with_label_values(&[name]).inc();
            }
            Ok(()) => {
                self.state.mark_initialized();
                info!("running");
                self.execute_loop(tasklet.as_mut(), &ctx).await;

                info!(term_delay = ?self.config.term_delay, "terminating");
                self.state.begin_terminate(self.config.term_delay);
                if let Err(e) = guarded(name, Phase::Terminate, tasklet.terminate(&ctx)).await {
                    error!(error = %e, "terminate failed");
                    TASKLET_TERMINATE_ERRORS.with_label_values(&[name]).inc();
                }
            }
        }

        drop(tasklet);
        self.state.finish();
        TASKLET_ALIVE.with_label_values(&[name]).set(0);
        info!("stopped");
    }

    async fn execute_loop(&self, tasklet: &mut dyn Tasklet, ctx: &TaskletContext) {
        let name = self.state.name();
        while !self.state.is_stopping() {
            let start = std::time::Instant::now();
            match guarded(name, Phase::Execute, tasklet.execute(ctx)).await {
                Ok(()) => {
                    TASKLET_EXECUTIONS.with_label_values(&[name]).inc();
                    TASKLET_EXECUTION_DURATION_SECONDS
                        .with_label_values(&[name])
                        .observe(start.elapsed().as_secs_f64());
                }
                Err(e) => {
                    error!(error = %e, "execute failed");
                    TASKLET_EXECUTION_ERRORS.with_label_values(&[name]).inc();
                }
            }

            if self.config.exec_interval.is_zero() {
                // Tight loops must still let the runtime schedule the tasks
                // that will ask us to stop.
                tokio::task::yield_now().await;
            } else {
                self.state.sleep(self.config.exec_interval).await;
            }
        }
    }
}

/// Runs one callback, turning a panic into a [`TaskError::Panicked`].
///
/// [`TaskError::Panicked`]: crate::TaskError::Panicked
async fn guarded<F>(name: &str, phase: Phase, callback: F) -> TaskResult
where
    F: Future<Output = TaskResult>,
{
    match AssertUnwindSafe(callback).catch_unwind().await {
        Ok(result) => result,
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            error!(
                panic = true,
                %phase,
                stack = %stack_excerpt(),
                "recovered panic: {message}"
            );
            TASKLET_PANICS.with_label_values(&[name]).inc();
            PanickedSnafu { message }.fail()
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc, Mutex as StdMutex,
        atomic::{AtomicUsize, Ordering},
    };

    use super::*;
    use crate::err::TaskError;

    type Journal = Arc<StdMutex<Vec<String>>>;

    fn entries(journal: &Journal) -> Vec<String> { journal.lock().unwrap().clone() }

    struct Scripted {
        journal:     Journal,
        fail_init:   bool,
        panic_every: Option<usize>,
        stop_after:  usize,
        calls:       usize,
    }

    impl Scripted {
        fn new(journal: &Journal, stop_after: usize) -> Self {
            Self {
                journal: Arc::clone(journal),
                fail_init: false,
                panic_every: None,
                stop_after,
                calls: 0,
            }
        }

        fn record(&self, entry: &str) { self.journal.lock().unwrap().push(entry.to_string()); }
    }

    #[async_trait::async_trait]
    impl Tasklet for Scripted {
        async fn initialize(&mut self, ctx: &TaskletContext) -> TaskResult {
            assert!(ctx.is_alive());
            assert!(!ctx.is_initialized());
            self.record("initialize");
            if self.fail_init {
                return Err(TaskError::msg("no database"));
            }
            Ok(())
        }

        async fn execute(&mut self, ctx: &TaskletContext) -> TaskResult {
            assert!(ctx.is_initialized());
            self.calls += 1;
            self.record("execute");
            if self.calls >= self.stop_after {
                ctx.stop();
            }
            if self.panic_every.is_some_and(|every| self.calls % every == 0) {
                panic!("iteration {} exploded", self.calls);
            }
            if self.calls % 2 == 0 {
                return Err(TaskError::msg("even iteration"));
            }
            Ok(())
        }

        async fn terminate(&mut self, _ctx: &TaskletContext) -> TaskResult {
            self.record("terminate");
            Ok(())
        }
    }

    #[tokio::test]
    async fn lifecycle_order() {
        let journal = Journal::default();
        let handler = TaskletHandler::new("order", Scripted::new(&journal, 3));

        handler.start().await;

        assert_eq!(
            entries(&journal),
            ["initialize", "execute", "execute", "execute", "terminate"]
        );
        assert!(!handler.is_alive());
        assert!(!handler.is_initialized());
    }

    #[tokio::test]
    async fn failed_initialize_skips_execute_and_terminate() {
        let journal = Journal::default();
        let mut tasklet = Scripted::new(&journal, 1);
        tasklet.fail_init = true;
        let handler = TaskletHandler::new("init-fails", tasklet);

        handler.start().await;

        assert_eq!(entries(&journal), ["initialize"]);
        assert!(!handler.is_alive());
    }

    #[tokio::test]
    async fn panics_are_contained() {
        let journal = Journal::default();
        let mut tasklet = Scripted::new(&journal, 4);
        tasklet.panic_every = Some(2);
        let handler = TaskletHandler::new("panics", tasklet);

        handler.start().await;

        let log = entries(&journal);
        assert_eq!(log.iter().filter(|e| *e == "execute").count(), 4);
        assert_eq!(log.last().map(String::as_str), Some("terminate"));
        assert!(!handler.is_alive());
    }

    #[tokio::test]
    async fn restart_clears_latches() {
        let journal = Journal::default();
        let handler = TaskletHandler::new("twice", Scripted::new(&journal, 1));

        handler.start().await;
        handler.stop();
        handler.start().await;

        assert_eq!(
            entries(&journal),
            ["initialize", "execute", "terminate", "initialize", "execute", "terminate"]
        );
    }

    struct Idle {
        entered: Arc<AtomicUsize>,
    }

    #[async_trait::async_trait]
    impl Tasklet for Idle {
        async fn initialize(&mut self, _ctx: &TaskletContext) -> TaskResult {
            self.entered.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn execute(&mut self, ctx: &TaskletContext) -> TaskResult {
            ctx.sleep(Duration::from_secs(60)).await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn second_start_is_a_noop_while_alive() {
        let entered = Arc::new(AtomicUsize::new(0));
        let handler = Arc::new(TaskletHandler::new(
            "single",
            Idle {
                entered: Arc::clone(&entered),
            },
        ));

        let first = tokio::spawn({
            let handler = Arc::clone(&handler);
            async move { handler.start().await }
        });
        while !handler.is_initialized() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        handler.start().await;
        assert_eq!(entered.load(Ordering::SeqCst), 1);
        assert!(handler.is_alive());

        handler.stop();
        first.await.unwrap();
        assert!(!handler.is_alive());
    }

    #[tokio::test(start_paused = true)]
    async fn exec_interval_spaces_iterations() {
        let journal = Journal::default();
        let config = HandlerConfig::builder()
            .exec_interval(Duration::from_secs(2))
            .build();
        let handler = TaskletHandler::with_config("spaced", Scripted::new(&journal, 3), config);

        let start = tokio::time::Instant::now();
        handler.start().await;

        assert_eq!(start.elapsed(), Duration::from_secs(4));
    }
}

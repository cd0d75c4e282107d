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
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use tokio::time::Instant;

use crate::latch::Latch;

/// State shared between a handler, the context it lends to its tasklet, and
/// every control handle given out.
#[derive(Debug)]
pub(crate) struct HandlerState {
    name:        String,
    stop:        Latch,
    kill:        Latch,
    enabled:     AtomicBool,
    alive:       AtomicBool,
    initialized: AtomicBool,
    /// Set while `terminate` runs: the instant its budget runs out.
    term_until:  Mutex<Option<Instant>>,
    /// Serializes lifecycle claims.
    claim:       Mutex<()>,
}

impl HandlerState {
    pub(crate) fn new(name: String, enabled: bool) -> Self {
        Self {
            name,
            stop: Latch::new(),
            kill: Latch::new(),
            enabled: AtomicBool::new(enabled),
            alive: AtomicBool::new(false),
            initialized: AtomicBool::new(false),
            term_until: Mutex::new(None),
            claim: Mutex::new(()),
        }
    }

    pub(crate) fn name(&self) -> &str { &self.name }

    /// Claims the lifecycle. Returns `false` if it is already running.
    ///
    /// The per-start state is reset before `alive` is published, so a stop
    /// or kill sent to a handler seen alive is never cleared.
    pub(crate) fn try_begin(&self) -> bool {
        let _claim = self
            .claim
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if self.alive.load(Ordering::Acquire) {
            return false;
        }
        self.stop.clear();
        self.kill.clear();
        self.initialized.store(false, Ordering::Release);
        self.set_term_until(None);
        self.alive.store(true, Ordering::Release);
        true
    }

    pub(crate) fn mark_initialized(&self) { self.initialized.store(true, Ordering::Release); }

    pub(crate) fn finish(&self) {
        self.set_term_until(None);
        self.initialized.store(false, Ordering::Release);
        self.alive.store(false, Ordering::Release);
    }

    pub(crate) fn begin_terminate(&self, budget: Duration) {
        self.set_term_until(Some(Instant::now() + budget));
    }

    fn set_term_until(&self, until: Option<Instant>) {
        *self
            .term_until
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = until;
    }

    fn term_until(&self) -> Option<Instant> {
        *self
            .term_until
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    pub(crate) fn stop(&self) { self.stop.set(); }

    pub(crate) fn kill(&self) {
        self.kill.set();
        self.stop.set();
    }

    pub(crate) fn is_stopping(&self) -> bool { self.stop.is_set() || self.kill.is_set() }

    pub(crate) fn is_killed(&self) -> bool { self.kill.is_set() }

    pub(crate) fn enable(&self) { self.enabled.store(true, Ordering::Release); }

    pub(crate) fn disable(&self) { self.enabled.store(false, Ordering::Release); }

    pub(crate) fn is_enabled(&self) -> bool { self.enabled.load(Ordering::Acquire) }

    pub(crate) fn is_alive(&self) -> bool { self.alive.load(Ordering::Acquire) }

    pub(crate) fn is_initialized(&self) -> bool { self.initialized.load(Ordering::Acquire) }

    /// Cooperative sleep.
    ///
    /// Outside `terminate` a stop or kill request cuts the wait short.
    /// Inside `terminate` the stop request is already set, so only kill and
    /// the end of the terminate budget do.
    pub(crate) async fn sleep(&self, duration: Duration) -> bool {
        if duration.is_zero() {
            return true;
        }

        let wake = Instant::now() + duration;
        match self.term_until() {
            Some(until) => {
                let truncated = until < wake;
                tokio::select! {
                    () = tokio::time::sleep_until(until.min(wake)) => !truncated,
                    () = self.kill.wait() => false,
                }
            }
            None => {
                tokio::select! {
                    () = tokio::time::sleep_until(wake) => true,
                    () = self.stop.wait() => false,
                    () = self.kill.wait() => false,
                }
            }
        }
    }

    async fn stopped(&self) { self.stop.wait().await }

    async fn killed(&self) { self.kill.wait().await }
}

/// Handle a [`Tasklet`](crate::Tasklet) receives in each callback.
///
/// Cancellation is cooperative: the handler only checks its stop and kill
/// requests between two `execute` calls and inside [`Self::sleep`]. Long
/// running work must return promptly, sleep through this context, or poll
/// [`Self::is_stopping`].
#[derive(Debug, Clone)]
pub struct TaskletContext {
    state: Arc<HandlerState>,
}

impl TaskletContext {
    pub(crate) const fn new(state: Arc<HandlerState>) -> Self { Self { state } }

    #[must_use]
    pub fn name(&self) -> &str { self.state.name() }

    /// Sleeps for `duration`. Returns `true` when the whole duration elapsed
    /// and `false` when a shutdown request (or the end of the terminate
    /// budget) interrupted it. A zero duration returns `true` at once.
    pub async fn sleep(&self, duration: Duration) -> bool { self.state.sleep(duration).await }

    /// Requests a graceful stop of the owning handler.
    pub fn stop(&self) { self.state.stop(); }

    /// Requests an immediate stop of the owning handler.
    pub fn kill(&self) { self.state.kill(); }

    #[must_use]
    pub fn is_stopping(&self) -> bool { self.state.is_stopping() }

    #[must_use]
    pub fn is_killed(&self) -> bool { self.state.is_killed() }

    #[must_use]
    pub fn is_alive(&self) -> bool { self.state.is_alive() }

    #[must_use]
    pub fn is_initialized(&self) -> bool { self.state.is_initialized() }

    /// Resolves once a stop (or kill) has been requested.
    pub async fn stopped(&self) { self.state.stopped().await }

    #[must_use]
    pub fn control(&self) -> TaskletControl { TaskletControl::new(Arc::clone(&self.state)) }
}

/// Cloneable remote control of a handler, for signal actions, command
/// handlers and supervisors.
#[derive(Debug, Clone)]
pub struct TaskletControl {
    state: Arc<HandlerState>,
}

impl TaskletControl {
    pub(crate) const fn new(state: Arc<HandlerState>) -> Self { Self { state } }

    #[must_use]
    pub fn name(&self) -> &str { self.state.name() }

    pub fn stop(&self) { self.state.stop(); }

    pub fn kill(&self) { self.state.kill(); }

    pub fn enable(&self) { self.state.enable(); }

    pub fn disable(&self) { self.state.disable(); }

    #[must_use]
    pub fn is_enabled(&self) -> bool { self.state.is_enabled() }

    #[must_use]
    pub fn is_alive(&self) -> bool { self.state.is_alive() }

    #[must_use]
    pub fn is_initialized(&self) -> bool { self.state.is_initialized() }

    #[must_use]
    pub fn is_stopping(&self) -> bool { self.state.is_stopping() }

    /// Resolves once a kill has been requested.
    pub async fn killed(&self) { self.state.killed().await }

    /// Waits until the handler is no longer alive, polling every `poll`.
    /// Returns `false` if it is still alive after `timeout`.
    pub async fn wait_dead(&self, poll: Duration, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.is_alive() {
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(poll).await;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> Arc<HandlerState> { Arc::new(HandlerState::new("t".to_string(), false)) }

    #[tokio::test]
    async fn zero_sleep_returns_true() {
        let state = state();
        state.stop();
        assert!(state.sleep(Duration::ZERO).await);
    }

    #[tokio::test(start_paused = true)]
    async fn full_sleep_returns_true() {
        let state = state();
        let start = Instant::now();
        assert!(state.sleep(Duration::from_secs(2)).await);
        assert!(start.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test]
    async fn stop_interrupts_sleep_promptly() {
        let state = state();
        let sleeper = {
            let state = Arc::clone(&state);
            tokio::spawn(async move { state.sleep(Duration::from_secs(30)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        let requested = std::time::Instant::now();
        state.stop();
        assert!(!sleeper.await.unwrap());
        assert!(requested.elapsed() < Duration::from_millis(100));
    }

    #[tokio::test]
    async fn terminate_phase_ignores_stop_but_not_kill() {
        let state = state();
        state.stop();
        state.begin_terminate(Duration::from_secs(30));

        assert!(state.sleep(Duration::from_millis(20)).await);

        let sleeper = {
            let state = Arc::clone(&state);
            tokio::spawn(async move { state.sleep(Duration::from_secs(10)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        state.kill();
        assert!(!sleeper.await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn terminate_budget_truncates_sleep() {
        let state = state();
        state.begin_terminate(Duration::from_secs(2));
        let start = Instant::now();
        assert!(!state.sleep(Duration::from_secs(10)).await);
        assert_eq!(start.elapsed().as_secs(), 2);
    }

    #[test]
    fn stop_sent_after_begin_survives_the_claim() {
        let state = state();
        state.stop();
        assert!(state.try_begin());
        assert!(!state.is_stopping());

        state.stop();
        assert!(!state.try_begin());
        assert!(state.is_stopping());
    }

    #[test]
    fn begin_is_exclusive() {
        let state = state();
        assert!(state.try_begin());
        assert!(!state.try_begin());
        state.mark_initialized();
        assert!(state.is_initialized() && state.is_alive());
        state.finish();
        assert!(!state.is_initialized() && !state.is_alive());
        assert!(state.try_begin());
    }
}

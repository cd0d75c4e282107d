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

use std::{sync::Arc, time::Duration};

use tokio::{signal::unix::SignalKind, sync::Mutex, task::JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::{
    command::{CommandHandler, CommandListener},
    config::HandlerConfig,
    context::TaskletControl,
    err::ProcessError,
    handler::TaskletHandler,
    signal::SignalMap,
    tasklet::Tasklet,
};

/// Pause after a failed accept before asking the listener again.
const LISTENER_RETRY: Duration = Duration::from_millis(100);

type CommandPair = (Box<dyn CommandListener>, Arc<dyn CommandHandler>);

/// A [`TaskletHandler`] that routes OS signals to actions and dispatches
/// external commands while its tasklet runs.
///
/// Interrupt and termination are bound to a graceful stop by default.
pub struct Process {
    handler: TaskletHandler,
    signals: SignalMap,
    command: Mutex<Option<CommandPair>>,
}

impl std::fmt::Debug for Process {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Process")
            .field("handler", &self.handler)
            .field("signals", &self.signals)
            .finish_non_exhaustive()
    }
}

impl Process {
    pub fn new(name: impl Into<String>, tasklet: impl Tasklet) -> Self {
        Self::with_config(name, tasklet, HandlerConfig::default())
    }

    pub fn with_config(name: impl Into<String>, tasklet: impl Tasklet, config: HandlerConfig) -> Self {
        let handler = TaskletHandler::with_config(name, tasklet, config);
        let mut signals = SignalMap::new();
        for kind in [SignalKind::interrupt(), SignalKind::terminate()] {
            let control = handler.control();
            signals.set(kind, move || control.stop());
        }
        Self {
            handler,
            signals,
            command: Mutex::new(None),
        }
    }

    /// Binds `kind` to `action`, replacing any earlier binding. Takes effect
    /// on the next start.
    pub fn set_signal_handler<F>(&mut self, kind: SignalKind, action: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.signals.set(kind, action);
    }

    /// Unbinds `kind`; the signal keeps its previous disposition.
    pub fn clear_signal_handler(&mut self, kind: SignalKind) -> bool { self.signals.remove(kind) }

    #[must_use]
    pub const fn signals(&self) -> &SignalMap { &self.signals }

    /// Installs the command transport. The listener is owned by the next
    /// start and closed when it returns.
    pub fn set_command_listener(
        &mut self,
        listener: impl CommandListener,
        handler: impl CommandHandler,
    ) {
        *self.command.get_mut() = Some((Box::new(listener), Arc::new(handler)));
    }

    #[must_use]
    pub const fn handler(&self) -> &TaskletHandler { &self.handler }

    #[must_use]
    pub fn name(&self) -> &str { self.handler.name() }

    #[must_use]
    pub fn control(&self) -> TaskletControl { self.handler.control() }

    pub fn stop(&self) { self.handler.stop(); }

    pub fn kill(&self) { self.handler.kill(); }

    /// Cooperative sleep on the process's own latches.
    pub async fn sleep(&self, duration: Duration) -> bool { self.handler.sleep(duration).await }

    pub fn enable(&self) { self.handler.enable(); }

    pub fn disable(&self) { self.handler.disable(); }

    #[must_use]
    pub fn is_enabled(&self) -> bool { self.handler.is_enabled() }

    #[must_use]
    pub fn is_alive(&self) -> bool { self.handler.is_alive() }

    #[must_use]
    pub fn is_initialized(&self) -> bool { self.handler.is_initialized() }

    /// Runs the tasklet lifecycle with signal routing and command dispatch
    /// attached, and tears both down before returning.
    ///
    /// A start on a live process returns at once and leaves the command
    /// listener with the run that owns it.
    pub async fn start(&self) -> Result<(), ProcessError> {
        if !self.handler.claim() {
            return Ok(());
        }

        let token = CancellationToken::new();
        let mut tasks = JoinSet::new();
        if let Err(e) = self.signals.install(&token, &mut tasks) {
            token.cancel();
            drain(&mut tasks).await;
            self.handler.release();
            return Err(e);
        }

        let command = self.command.lock().await.take();
        if let Some((listener, handler)) = command {
            tasks.spawn(dispatch(listener, handler, token.clone()));
        }

        self.handler.run_claimed().await;

        token.cancel();
        drain(&mut tasks).await;
        Ok(())
    }
}

async fn drain(tasks: &mut JoinSet<()>) {
    while let Some(res) = tasks.join_next().await {
        match res {
            Err(e) if e.is_panic() => error!(panic = true, "process side task panicked"),
            _ => {}
        }
    }
}

async fn dispatch(
    mut listener: Box<dyn CommandListener>,
    handler: Arc<dyn CommandHandler>,
    token: CancellationToken,
) {
    loop {
        let next = tokio::select! {
            biased;
            () = token.cancelled() => break,
            next = listener.next_command() => next,
        };

        match next {
            Ok(Some(command)) => {
                debug!(request = command.request(), "command received");
                let reply = tokio::select! {
                    biased;
                    () = token.cancelled() => break,
                    reply = handler.handle(command.request()) => reply,
                };
                debug!(request = command.request(), %reply, "command handled");
                command.reply(reply);
            }
            Ok(None) => {
                debug!("command listener exhausted");
                break;
            }
            Err(e) => {
                warn!(error = %e, "command listener failed");
                tokio::select! {
                    () = token.cancelled() => break,
                    () = tokio::time::sleep(LISTENER_RETRY) => {}
                }
            }
        }
    }
    listener.close().await;
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::{
        command::{channel, command_fn},
        context::TaskletContext,
        err::TaskResult,
    };

    struct Idle;

    #[async_trait::async_trait]
    impl Tasklet for Idle {
        async fn execute(&mut self, ctx: &TaskletContext) -> TaskResult {
            ctx.sleep(Duration::from_secs(60)).await;
            Ok(())
        }
    }

    #[test]
    fn interrupt_and_terminate_bound_by_default() {
        let mut process = Process::new("p", Idle);
        assert!(process.signals().contains(SignalKind::interrupt()));
        assert!(process.signals().contains(SignalKind::terminate()));
        assert!(!process.signals().contains(SignalKind::quit()));

        let control = process.control();
        process.set_signal_handler(SignalKind::quit(), move || control.kill());
        assert!(process.clear_signal_handler(SignalKind::interrupt()));
        assert_eq!(process.signals().len(), 2);
    }

    #[tokio::test]
    async fn commands_dispatch_while_running() {
        let (client, listener) = channel(4);
        let mut process = Process::new("echo", Idle);
        let control = process.control();
        let seen = Arc::new(AtomicUsize::new(0));
        {
            let seen = Arc::clone(&seen);
            process.set_command_listener(
                listener,
                command_fn(move |request: &str| {
                    seen.fetch_add(1, Ordering::SeqCst);
                    if request == "exit" {
                        control.stop();
                        return "done".to_string();
                    }
                    format!("echo {request}")
                }),
            );
        }

        let process = Arc::new(process);
        let running = {
            let process = Arc::clone(&process);
            tokio::spawn(async move { process.start().await })
        };

        assert_eq!(client.send("hello").await.unwrap(), "echo hello");
        assert_eq!(client.send("exit").await.unwrap(), "done");
        tokio::time::timeout(Duration::from_secs(5), running)
            .await
            .unwrap()
            .unwrap()
            .unwrap();

        assert_eq!(seen.load(Ordering::SeqCst), 2);
        assert!(!process.is_alive());
        // The listener was closed with the process.
        assert!(client.send("hello").await.is_err());
    }

    #[tokio::test]
    async fn second_start_leaves_the_listener_alone() {
        let (client, listener) = channel(4);
        let mut process = Process::new("single", Idle);
        process.set_command_listener(listener, command_fn(|request: &str| request.to_string()));

        let process = Arc::new(process);
        let running = {
            let process = Arc::clone(&process);
            tokio::spawn(async move { process.start().await })
        };
        while !process.is_initialized() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        tokio::time::timeout(Duration::from_secs(1), process.start())
            .await
            .unwrap()
            .unwrap();
        assert!(process.is_alive());
        assert_eq!(client.send("still here").await.unwrap(), "still here");

        process.stop();
        tokio::time::timeout(Duration::from_secs(5), running)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }
}

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

//! External string commands: a listener yields requests, a handler maps each
//! request to a reply.

mod channel;
mod unix;

pub use channel::{ChannelListener, CommandClient, channel};
use tokio::sync::oneshot;
pub use unix::{UnixCommandListener, send_command};

use crate::err::CommandError;

/// One request awaiting its reply.
#[derive(Debug)]
pub struct Command {
    request:   String,
    responder: oneshot::Sender<String>,
}

impl Command {
    /// Creates a command and the receiver its reply will be delivered to.
    #[must_use]
    pub fn new(request: impl Into<String>) -> (Self, oneshot::Receiver<String>) {
        let (responder, rx) = oneshot::channel();
        (
            Self {
                request: request.into(),
                responder,
            },
            rx,
        )
    }

    #[must_use]
    pub fn request(&self) -> &str { &self.request }

    /// Sends the reply. A requester that went away is not an error.
    pub fn reply(self, reply: impl Into<String>) { let _ = self.responder.send(reply.into()); }
}

/// Source of [`Command`]s. A process owns its listener for the duration of
/// its start and closes it on exit.
#[async_trait::async_trait]
pub trait CommandListener: Send + 'static {
    /// Next request, or `None` once the transport is exhausted.
    async fn next_command(&mut self) -> Result<Option<Command>, CommandError>;

    async fn close(&mut self) {}
}

/// Maps a request to its reply.
///
/// Dispatch runs concurrently with the process's `execute`; implementations
/// synchronize their own access to shared state.
#[async_trait::async_trait]
pub trait CommandHandler: Send + Sync + 'static {
    async fn handle(&self, request: &str) -> String;
}

/// Adapter created by [`command_fn`].
pub struct FnCommandHandler<F>(F);

/// Wraps a synchronous closure as a [`CommandHandler`].
pub const fn command_fn<F>(f: F) -> FnCommandHandler<F>
where
    F: Fn(&str) -> String + Send + Sync + 'static,
{
    FnCommandHandler(f)
}

#[async_trait::async_trait]
impl<F> CommandHandler for FnCommandHandler<F>
where
    F: Fn(&str) -> String + Send + Sync + 'static,
{
    async fn handle(&self, request: &str) -> String { (self.0)(request) }
}

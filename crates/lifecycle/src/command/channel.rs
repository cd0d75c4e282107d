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

use snafu::OptionExt;
use tokio::sync::mpsc;

use super::{Command, CommandListener};
use crate::err::{ClosedSnafu, CommandError};

/// In-process command transport.
#[must_use]
pub fn channel(capacity: usize) -> (CommandClient, ChannelListener) {
    let (tx, rx) = mpsc::channel(capacity);
    (CommandClient { tx }, ChannelListener { rx })
}

/// Sending half of [`channel`].
#[derive(Debug, Clone)]
pub struct CommandClient {
    tx: mpsc::Sender<Command>,
}

impl CommandClient {
    /// Sends `request` and waits for its reply.
    pub async fn send(&self, request: impl Into<String>) -> Result<String, CommandError> {
        let (command, reply) = Command::new(request);
        self.tx.send(command).await.ok().context(ClosedSnafu)?;
        reply.await.ok().context(ClosedSnafu)
    }
}

#[derive(Debug)]
pub struct ChannelListener {
    rx: mpsc::Receiver<Command>,
}

#[async_trait::async_trait]
impl CommandListener for ChannelListener {
    async fn next_command(&mut self) -> Result<Option<Command>, CommandError> {
        Ok(self.rx.recv().await)
    }

    async fn close(&mut self) { self.rx.close(); }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trip() {
        let (client, mut listener) = channel(4);
        let server = tokio::spawn(async move {
            while let Ok(Some(command)) = listener.next_command().await {
                let reply = format!("got {}", command.request());
                command.reply(reply);
            }
        });

        assert_eq!(client.send("a").await.unwrap(), "got a");
        assert_eq!(client.send("b").await.unwrap(), "got b");

        drop(client);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn closed_listener_fails_senders() {
        let (client, mut listener) = channel(1);
        listener.close().await;
        assert!(matches!(
            client.send("exit").await,
            Err(CommandError::Closed { .. })
        ));
    }
}

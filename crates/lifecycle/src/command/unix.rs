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
    path::{Path, PathBuf},
    time::Duration,
};

use snafu::ResultExt;
use tokio::{
    io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader},
    net::{UnixListener, UnixStream},
    sync::mpsc,
};
use tracing::{debug, warn};

use super::{Command, CommandListener};
use crate::err::{AcceptSnafu, BindSnafu, CommandError, ConnectSnafu, IoSnafu};

/// Longest request line accepted from a client.
const MAX_LINE: u64 = 64 * 1024;

/// How long a client may take to send its request line.
const READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Requests read but not yet handed to the process.
const PENDING: usize = 16;

/// Unix-domain socket transport. Each connection carries one request line
/// and receives one reply line.
///
/// Connections are read on their own tasks, so a slow or silent client
/// never holds up the others.
#[derive(Debug)]
pub struct UnixCommandListener {
    path:     PathBuf,
    listener: Option<UnixListener>,
    pending:  mpsc::Sender<Command>,
    requests: mpsc::Receiver<Command>,
}

impl UnixCommandListener {
    /// Binds `path`, replacing a stale socket file left by a previous run.
    pub fn bind(path: impl AsRef<Path>) -> Result<Self, CommandError> {
        let path = path.as_ref().to_path_buf();
        if path.exists() {
            std::fs::remove_file(&path).context(BindSnafu { path: path.clone() })?;
        }
        let listener = UnixListener::bind(&path).context(BindSnafu { path: path.clone() })?;
        let (pending, requests) = mpsc::channel(PENDING);
        Ok(Self {
            path,
            listener: Some(listener),
            pending,
            requests,
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path { &self.path }
}

async fn read_request(stream: &mut BufReader<UnixStream>) -> std::io::Result<String> {
    let mut line = String::new();
    stream.take(MAX_LINE).read_line(&mut line).await?;
    Ok(line.trim().to_string())
}

/// Reads the request of one connection, hands it over, and writes the
/// reply back once the process answered.
async fn serve_connection(stream: UnixStream, pending: mpsc::Sender<Command>) {
    let mut stream = BufReader::new(stream);
    let request = match tokio::time::timeout(READ_TIMEOUT, read_request(&mut stream)).await {
        Ok(Ok(request)) if !request.is_empty() => request,
        Ok(Ok(_)) => return,
        Ok(Err(e)) => {
            warn!(error = %e, "dropping unreadable command connection");
            return;
        }
        Err(_) => {
            warn!(timeout = ?READ_TIMEOUT, "dropping silent command connection");
            return;
        }
    };

    let (command, reply) = Command::new(request);
    if pending.send(command).await.is_err() {
        return;
    }
    // A dropped command (process exiting) just closes the socket.
    let Ok(reply) = reply.await else {
        return;
    };
    let mut stream = stream.into_inner();
    let line = format!("{reply}\n");
    if let Err(e) = stream.write_all(line.as_bytes()).await {
        debug!(error = %e, "command client went away before the reply");
    }
    let _ = stream.shutdown().await;
}

#[async_trait::async_trait]
impl CommandListener for UnixCommandListener {
    async fn next_command(&mut self) -> Result<Option<Command>, CommandError> {
        let Some(listener) = self.listener.as_ref() else {
            return Ok(None);
        };

        loop {
            tokio::select! {
                Some(command) = self.requests.recv() => return Ok(Some(command)),
                accepted = listener.accept() => {
                    let (stream, _) = accepted.context(AcceptSnafu)?;
                    tokio::spawn(serve_connection(stream, self.pending.clone()));
                }
            }
        }
    }

    async fn close(&mut self) {
        if self.listener.take().is_none() {
            return;
        }
        // Requests nobody will answer: dropping them hangs up their clients.
        self.requests.close();
        while self.requests.try_recv().is_ok() {}
        if let Err(e) = std::fs::remove_file(&self.path) {
            debug!(path = %self.path.display(), error = %e, "failed to remove command socket");
        }
    }
}

/// Client side of [`UnixCommandListener`]: sends one request, returns the
/// reply line.
pub async fn send_command(path: impl AsRef<Path>, request: &str) -> Result<String, CommandError> {
    let path = path.as_ref();
    let mut stream = UnixStream::connect(path)
        .await
        .context(ConnectSnafu { path })?;
    stream
        .write_all(format!("{}\n", request.trim()).as_bytes())
        .await
        .context(IoSnafu)?;

    let mut stream = BufReader::new(stream);
    read_request(&mut stream).await.context(IoSnafu)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn serves_one_line_per_connection() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ctl.sock");
        let mut listener = UnixCommandListener::bind(&path).unwrap();

        let server = tokio::spawn(async move {
            for _ in 0..2 {
                let command = listener.next_command().await.unwrap().unwrap();
                let reply = command.request().chars().rev().collect::<String>();
                command.reply(reply);
            }
            listener.close().await;
        });

        assert_eq!(send_command(&path, "abc").await.unwrap(), "cba");
        assert_eq!(send_command(&path, " list_workers \n").await.unwrap(), "srekrow_tsil");

        server.await.unwrap();
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn rebinds_over_stale_socket() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stale.sock");
        drop(UnixCommandListener::bind(&path).unwrap());
        assert!(path.exists());

        let listener = UnixCommandListener::bind(&path).unwrap();
        assert_eq!(listener.path(), path.as_path());
    }

    #[tokio::test]
    async fn connect_to_missing_socket_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = send_command(dir.path().join("none.sock"), "exit")
            .await
            .unwrap_err();
        assert!(matches!(err, CommandError::Connect { .. }));
    }

    #[tokio::test]
    async fn silent_client_does_not_block_others() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("busy.sock");
        let mut listener = UnixCommandListener::bind(&path).unwrap();

        let server = tokio::spawn(async move {
            let command = listener.next_command().await.unwrap().unwrap();
            let request = command.request().to_string();
            command.reply("done");
            listener.close().await;
            request
        });

        let _silent = UnixStream::connect(&path).await.unwrap();
        let reply = tokio::time::timeout(Duration::from_secs(2), send_command(&path, "exit"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reply, "done");
        assert_eq!(server.await.unwrap(), "exit");
    }
}

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

use std::time::Duration;

use tokio::sync::watch;

/// A resettable boolean with an awaitable, optionally timed, wait.
///
/// Waiters wake as soon as the latch is set; a latch that is already set
/// satisfies a wait immediately.
#[derive(Debug)]
pub struct Latch {
    tx: watch::Sender<bool>,
}

impl Default for Latch {
    fn default() -> Self { Self::new() }
}

impl Latch {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx }
    }

    pub fn set(&self) { self.tx.send_replace(true); }

    pub fn clear(&self) { self.tx.send_replace(false); }

    #[must_use]
    pub fn is_set(&self) -> bool { *self.tx.borrow() }

    /// Waits until the latch is set.
    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so the channel cannot close under us.
        let _ = rx.wait_for(|set| *set).await;
    }

    /// Waits at most `timeout`. Returns `true` if the latch was set.
    pub async fn wait_timeout(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.wait()).await.is_ok()
    }
}

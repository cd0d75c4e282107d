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

//! Routing of OS signals to zero-argument actions.

use std::{collections::BTreeMap, sync::Arc};

use snafu::ResultExt;
use tokio::{
    signal::unix::{SignalKind, signal},
    task::JoinSet,
};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::err::{ProcessError, SignalInstallSnafu};

/// Action run on the signal task each time its signal is delivered.
pub type SignalAction = Arc<dyn Fn() + Send + Sync>;

/// Signal number to action table of a [`Process`](crate::Process).
///
/// Entries are keyed by raw signal number, so setting the same signal twice
/// replaces the earlier action.
#[derive(Clone, Default)]
pub struct SignalMap {
    entries: BTreeMap<i32, (SignalKind, SignalAction)>,
}

impl std::fmt::Debug for SignalMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.entries.keys()).finish()
    }
}

impl SignalMap {
    #[must_use]
    pub fn new() -> Self { Self::default() }

    pub fn set<F>(&mut self, kind: SignalKind, action: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.entries
            .insert(kind.as_raw_value(), (kind, Arc::new(action)));
    }

    /// Removes the binding of `kind`. Returns whether one existed.
    pub fn remove(&mut self, kind: SignalKind) -> bool {
        self.entries.remove(&kind.as_raw_value()).is_some()
    }

    #[must_use]
    pub fn contains(&self, kind: SignalKind) -> bool {
        self.entries.contains_key(&kind.as_raw_value())
    }

    /// Raw numbers of the bound signals, ascending.
    #[must_use]
    pub fn signals(&self) -> Vec<i32> { self.entries.keys().copied().collect() }

    #[must_use]
    pub fn len(&self) -> usize { self.entries.len() }

    #[must_use]
    pub fn is_empty(&self) -> bool { self.entries.is_empty() }

    /// Subscribes to every bound signal and spawns one routing task per
    /// signal onto `tasks`. The tasks exit once `token` is cancelled.
    ///
    /// On error, tasks spawned so far stay in `tasks`; the caller cancels
    /// `token` to tear them down.
    pub(crate) fn install(
        &self,
        token: &CancellationToken,
        tasks: &mut JoinSet<()>,
    ) -> Result<(), ProcessError> {
        for (&signum, (kind, action)) in &self.entries {
            let mut stream = signal(*kind).context(SignalInstallSnafu { signal: signum })?;
            let action = Arc::clone(action);
            let token = token.clone();
            tasks.spawn(async move {
                loop {
                    tokio::select! {
                        biased;
                        () = token.cancelled() => break,
                        received = stream.recv() => {
                            if received.is_none() {
                                break;
                            }
                            info!(signal = signum, "signal received");
                            action();
                        }
                    }
                }
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn set_replaces_by_signal_number() {
        let mut map = SignalMap::new();
        map.set(SignalKind::interrupt(), || {});
        map.set(SignalKind::terminate(), || {});
        map.set(SignalKind::from_raw(SignalKind::interrupt().as_raw_value()), || {});
        assert_eq!(map.len(), 2);
        assert!(map.contains(SignalKind::terminate()));

        assert!(map.remove(SignalKind::terminate()));
        assert!(!map.remove(SignalKind::terminate()));
        assert_eq!(map.signals(), vec![SignalKind::interrupt().as_raw_value()]);
    }

    #[tokio::test]
    async fn cancelled_token_ends_routing_tasks() {
        let hits = Arc::new(AtomicUsize::new(0));
        let mut map = SignalMap::new();
        {
            let hits = Arc::clone(&hits);
            map.set(SignalKind::user_defined2(), move || {
                hits.fetch_add(1, Ordering::SeqCst);
            });
        }

        let token = CancellationToken::new();
        let mut tasks = JoinSet::new();
        map.install(&token, &mut tasks).unwrap();
        assert_eq!(tasks.len(), 1);

        token.cancel();
        while let Some(res) = tasks.join_next().await {
            res.unwrap();
        }
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }
}

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

use tracing::error;

use crate::{handler::TaskletHandler, manager::RoutineManager, process::Process};

/// Anything a [`RoutineManager`] can supervise, including another manager.
///
/// `start` drives a full lifecycle and only returns once the routine is
/// dead; the manager always calls it on a fresh task.
#[async_trait::async_trait]
pub trait Routine: Send + Sync + 'static {
    fn is_enabled(&self) -> bool;

    fn is_alive(&self) -> bool;

    fn is_initialized(&self) -> bool;

    fn enable(&self);

    fn disable(&self);

    async fn start(&self);

    fn stop(&self);

    fn kill(&self);
}

#[async_trait::async_trait]
impl Routine for TaskletHandler {
    fn is_enabled(&self) -> bool { Self::is_enabled(self) }

    fn is_alive(&self) -> bool { Self::is_alive(self) }

    fn is_initialized(&self) -> bool { Self::is_initialized(self) }

    fn enable(&self) { Self::enable(self) }

    fn disable(&self) { Self::disable(self) }

    async fn start(&self) { Self::start(self).await }

    fn stop(&self) { Self::stop(self) }

    fn kill(&self) { Self::kill(self) }
}

#[async_trait::async_trait]
impl Routine for Process {
    fn is_enabled(&self) -> bool { Self::is_enabled(self) }

    fn is_alive(&self) -> bool { Self::is_alive(self) }

    fn is_initialized(&self) -> bool { Self::is_initialized(self) }

    fn enable(&self) { Self::enable(self) }

    fn disable(&self) { Self::disable(self) }

    async fn start(&self) {
        if let Err(e) = Self::start(self).await {
            error!(process = self.name(), error = %e, "process failed to start");
        }
    }

    fn stop(&self) { Self::stop(self) }

    fn kill(&self) { Self::kill(self) }
}

#[async_trait::async_trait]
impl Routine for RoutineManager {
    fn is_enabled(&self) -> bool { self.process().is_enabled() }

    fn is_alive(&self) -> bool { Self::is_alive(self) }

    fn is_initialized(&self) -> bool { Self::is_initialized(self) }

    fn enable(&self) { self.process().enable() }

    fn disable(&self) { self.process().disable() }

    async fn start(&self) { Routine::start(self.process()).await }

    fn stop(&self) { Self::stop(self) }

    fn kill(&self) { Self::kill(self) }
}

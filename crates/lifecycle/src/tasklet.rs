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

use crate::{context::TaskletContext, err::TaskResult};

/// A unit of long-running work driven by a
/// [`TaskletHandler`](crate::TaskletHandler).
///
/// Per start, the handler calls `initialize` once, then `execute` in a loop
/// until a stop or kill is requested, then `terminate` once, only if
/// `initialize` succeeded. The three callbacks never overlap.
///
/// Nothing is preempted. An `execute` that never returns and never awaits
/// [`TaskletContext::sleep`] cannot be stopped.
#[async_trait::async_trait]
pub trait Tasklet: Send + 'static {
    /// One-time setup. An error ends the start before any `execute`.
    async fn initialize(&mut self, _ctx: &TaskletContext) -> TaskResult { Ok(()) }

    /// One iteration of work. Errors are logged and the loop continues.
    async fn execute(&mut self, ctx: &TaskletContext) -> TaskResult;

    /// Shutdown hook. Sleeps taken here are bounded by the handler's
    /// `term_delay` and cut short by a kill request.
    async fn terminate(&mut self, _ctx: &TaskletContext) -> TaskResult { Ok(()) }
}

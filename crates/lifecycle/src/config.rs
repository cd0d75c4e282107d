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

use smart_default::SmartDefault;
use tokio::runtime::Handle;

#[derive(Debug, Clone, SmartDefault, bon::Builder)]
pub struct HandlerConfig {
    /// Floor between two consecutive `execute` calls. Zero runs the next
    /// iteration immediately.
    #[default(Duration::ZERO)]
    #[builder(default = Duration::ZERO, into)]
    pub exec_interval: Duration,

    /// Budget of `terminate`, enforced by shortening
    /// [`TaskletContext::sleep`](crate::TaskletContext::sleep) calls made
    /// while it runs.
    #[default(Duration::from_secs(5))]
    #[builder(default = Duration::from_secs(5), into)]
    pub term_delay: Duration,

    /// Initial value of the supervisor hint.
    #[default(false)]
    #[builder(default = false)]
    pub enabled: bool,
}

#[derive(Debug, Clone, SmartDefault, bon::Builder)]
pub struct ManagerConfig {
    /// Pause between two supervisory sweeps.
    #[default(Duration::from_secs(300))]
    #[builder(default = Duration::from_secs(300), into)]
    pub monitor_interval: Duration,

    /// How long `terminate` waits for stopped routines to wind down.
    #[default(Duration::from_secs(3))]
    #[builder(default = Duration::from_secs(3), into)]
    pub stop_delay: Duration,

    /// Wait after each of the stop and kill requests issued by
    /// `del_routine`.
    #[default(Duration::from_secs(1))]
    #[builder(default = Duration::from_secs(1), into)]
    pub removal_wait: Duration,

    /// Lifecycle settings of the manager's own handler. Its `term_delay`
    /// should exceed `stop_delay`.
    #[builder(default)]
    pub handler: HandlerConfig,

    /// Runtime receiving routine starts. Defaults to the caller's runtime.
    pub runtime: Option<Handle>,
}

impl ManagerConfig {
    pub(crate) fn spawner(&self) -> Handle {
        self.runtime
            .clone()
            .unwrap_or_else(tasklet_common_runtime::current_or_background)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let handler = HandlerConfig::default();
        assert_eq!(handler.exec_interval, Duration::ZERO);
        assert_eq!(handler.term_delay, Duration::from_secs(5));
        assert!(!handler.enabled);

        let manager = ManagerConfig::builder().build();
        assert_eq!(manager.monitor_interval, Duration::from_secs(300));
        assert_eq!(manager.stop_delay, Duration::from_secs(3));
        assert_eq!(manager.removal_wait, Duration::from_secs(1));
        assert!(manager.handler.term_delay > manager.stop_delay);
        assert!(manager.runtime.is_none());
    }
}

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

//! Runtime construction shared by tasklet processes.
//!
//! Every routine started by a manager needs an execution context. Callers can
//! hand a dedicated runtime to the manager; otherwise routines land on the
//! runtime the caller is already running on, falling back to a lazily built
//! background runtime.

mod error;
mod factory;
mod global;
mod options;

pub use error::{Error, Result};
pub use factory::create_current_thread_runtime;
pub use global::{background_runtime, current_or_background};
pub use options::RuntimeOptions;
pub use tokio::runtime::{Handle, Runtime};

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn builds_multi_thread_runtime_with_names() {
        let runtime = RuntimeOptions::builder()
            .thread_name("test-rt")
            .worker_threads(2)
            .build()
            .create()
            .unwrap();
        let handle = runtime.spawn(async move { std::thread::current().name().map(str::to_owned) });
        let handle_name = runtime.block_on(handle).unwrap().unwrap();
        assert!(handle_name.starts_with("test-rt-"));
    }

    #[test]
    fn builds_current_thread_runtime() {
        let runtime = create_current_thread_runtime("single-thread").unwrap();
        let value = runtime.block_on(async {
            tokio::time::sleep(std::time::Duration::from_millis(1)).await;
            42
        });
        assert_eq!(value, 42);
    }

    #[test]
    fn background_runtime_is_shared() {
        let first = background_runtime();
        let second = background_runtime();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn current_or_background_prefers_current() {
        let runtime = RuntimeOptions::builder()
            .thread_name("outer")
            .worker_threads(1)
            .build()
            .create()
            .unwrap();
        let name = runtime
            .block_on(async {
                current_or_background()
                    .spawn(async { std::thread::current().name().map(str::to_owned) })
                    .await
                    .unwrap()
            })
            .unwrap_or_default();
        assert!(name.starts_with("outer-"));

        let name = background_runtime()
            .block_on(
                current_or_background().spawn(async { std::thread::current().name().map(str::to_owned) }),
            )
            .unwrap()
            .unwrap_or_default();
        assert!(name.starts_with("tasklet-bg-"));
    }
}

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

use std::sync::atomic::{AtomicUsize, Ordering};

use snafu::ResultExt;
use tokio::runtime::{Builder as TokioBuilder, Runtime};

use crate::{
    error::{self, Result},
    options::{RuntimeOptions, cpu_threads},
};

impl RuntimeOptions {
    /// Build a multi-thread runtime whose threads are named
    /// `{thread_name}-{idx}`. Worker threads default to the CPU count.
    pub fn create(self) -> Result<Runtime> {
        let mut builder = TokioBuilder::new_multi_thread();
        builder.worker_threads(self.worker_threads.unwrap_or_else(cpu_threads));

        if self.enable_io {
            builder.enable_io();
        }
        if self.enable_time {
            builder.enable_time();
        }

        let counter = AtomicUsize::new(0);
        let prefix = self.thread_name.clone();
        builder.thread_name_fn(move || {
            let idx = counter.fetch_add(1, Ordering::SeqCst);
            format!("{prefix}-{idx}")
        });

        builder.build().context(error::BuildSnafu {
            thread_name: self.thread_name,
        })
    }
}

/// Single-threaded runtime with every driver enabled, handy for running one
/// process to completion from a synchronous `main`.
pub fn create_current_thread_runtime(thread_name: impl Into<String>) -> Result<Runtime> {
    let thread_name = thread_name.into();
    TokioBuilder::new_current_thread()
        .enable_all()
        .thread_name(&thread_name)
        .build()
        .context(error::BuildSnafu { thread_name })
}

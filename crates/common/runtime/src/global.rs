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

use std::sync::Arc;

use once_cell::sync::OnceCell;
use tokio::runtime::{Handle, Runtime};

use crate::options::{RuntimeOptions, background_threads};

static BACKGROUND: OnceCell<Arc<Runtime>> = OnceCell::new();

/// Runtime hosting routine starts requested from plain threads. Built on
/// first use with one worker per spare CPU.
#[must_use]
pub fn background_runtime() -> Arc<Runtime> {
    Arc::clone(BACKGROUND.get_or_init(|| {
        Arc::new(
            RuntimeOptions::builder()
                .thread_name("tasklet-bg")
                .worker_threads(background_threads())
                .build()
                .create()
                .expect("Failed to create background runtime"),
        )
    }))
}

/// Handle of the runtime the caller is running on, or the background runtime
/// when called from plain threads.
#[must_use]
pub fn current_or_background() -> Handle {
    Handle::try_current().unwrap_or_else(|_| background_runtime().handle().clone())
}

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

use std::sync::LazyLock;

use prometheus::{
    HistogramVec, IntCounterVec, IntGaugeVec, register_histogram_vec, register_int_counter_vec,
    register_int_gauge_vec,
};

pub const TASKLET_LABEL: &str = "tasklet";
pub const MANAGER_LABEL: &str = "manager";
pub const OP_LABEL: &str = "op";
pub const OUTCOME_LABEL: &str = "outcome";

pub static TASKLET_STARTED: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "tasklet_started_total",
        "Total number of tasklet lifecycles entered",
        &[TASKLET_LABEL]
    )
    .unwrap()
});

pub static TASKLET_INITIALIZE_ERRORS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "tasklet_initialize_errors_total",
        "Total number of failed tasklet initializations",
        &[TASKLET_LABEL]
    )
    .unwrap()
});

pub static TASKLET_EXECUTIONS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "tasklet_executions_total",
        "Total number of tasklet execute iterations",
        &[TASKLET_LABEL]
    )
    .unwrap()
});

pub static TASKLET_EXECUTION_ERRORS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "tasklet_execution_errors_total",
        "Total number of failed tasklet execute iterations",
        &[TASKLET_LABEL]
    )
    .unwrap()
});

pub static TASKLET_TERMINATE_ERRORS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "tasklet_terminate_errors_total",
        "Total number of failed tasklet terminations",
        &[TASKLET_LABEL]
    )
    .unwrap()
});

pub static TASKLET_PANICS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "tasklet_panics_total",
        "Total number of panics caught in tasklet callbacks",
        &[TASKLET_LABEL]
    )
    .unwrap()
});

pub static TASKLET_ALIVE: LazyLock<IntGaugeVec> = LazyLock::new(|| {
    register_int_gauge_vec!(
        "tasklet_alive",
        "Whether the tasklet is currently alive (1) or not (0)",
        &[TASKLET_LABEL]
    )
    .unwrap()
});

pub static TASKLET_EXECUTION_DURATION_SECONDS: LazyLock<HistogramVec> = LazyLock::new(|| {
    register_histogram_vec!(
        "tasklet_execution_duration_seconds",
        "Tasklet execute duration in seconds",
        &[TASKLET_LABEL]
    )
    .unwrap()
});

pub static ROUTINE_SPAWNS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "routine_spawns_total",
        "Total number of routine starts spawned by a manager",
        &[MANAGER_LABEL]
    )
    .unwrap()
});

pub static ROUTINE_STOP_TIMEOUTS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "routine_stop_timeouts_total",
        "Total number of manager shutdowns that left routines alive",
        &[MANAGER_LABEL]
    )
    .unwrap()
});

pub static ROUTINE_ADMIN_OPS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "routine_admin_ops_total",
        "Routine administration calls by operation and outcome",
        &[MANAGER_LABEL, OP_LABEL, OUTCOME_LABEL]
    )
    .unwrap()
});

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

#[cfg(feature = "deadlock_detection")]
use std::time::Duration;
use std::{panic, sync::LazyLock};

use backtrace::Backtrace;
use prometheus::{IntCounter, register_int_counter};

pub static PANIC_COUNTER: LazyLock<IntCounter> =
    LazyLock::new(|| register_int_counter!("tasklet_panic_counter", "panic_counter").unwrap());

/// Number of frames kept when a panic is summarized into a log record.
pub const STACK_EXCERPT_FRAMES: usize = 12;

/// Renders the first [`STACK_EXCERPT_FRAMES`] resolved frames of the current
/// stack, one `symbol (file:line)` per line.
#[must_use]
pub fn stack_excerpt() -> String {
    let backtrace = Backtrace::new();
    let mut lines = Vec::with_capacity(STACK_EXCERPT_FRAMES);
    for symbol in backtrace
        .frames()
        .iter()
        .flat_map(backtrace::BacktraceFrame::symbols)
    {
        if lines.len() == STACK_EXCERPT_FRAMES {
            break;
        }
        let name = symbol
            .name()
            .map_or_else(|| "<unknown>".to_string(), |n| n.to_string());
        match (symbol.filename(), symbol.lineno()) {
            (Some(file), Some(line)) => lines.push(format!("{name} ({}:{line})", file.display())),
            _ => lines.push(name),
        }
    }
    lines.join("\n")
}

/// Extracts the message of a panic payload caught by `catch_unwind`.
#[must_use]
pub fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "Box<dyn Any>".to_string())
}

pub fn set_panic_hook() {
    let default_hook = panic::take_hook();
    panic::set_hook(Box::new(move |panic| {
        let backtrace = Backtrace::new();
        let backtrace = format!("{backtrace:?}");
        if let Some(location) = panic.location() {
            tracing::error!(
                message = %panic,
                backtrace = %backtrace,
                panic.file = location.file(),
                panic.line = location.line(),
                panic.column = location.column(),
            );
        } else {
            tracing::error!(message = %panic, backtrace = %backtrace);
        }
        PANIC_COUNTER.inc();
        default_hook(panic);
    }));

    #[cfg(feature = "deadlock_detection")]
    let _ = std::thread::spawn(move || {
        loop {
            std::thread::sleep(Duration::from_secs(5));
            let deadlocks = parking_lot::deadlock::check_deadlock();
            if deadlocks.is_empty() {
                continue;
            }

            tracing::info!("{} deadlocks detected", deadlocks.len());
            for (i, threads) in deadlocks.iter().enumerate() {
                tracing::info!("Deadlock #{}", i);
                for t in threads {
                    tracing::info!("Thread Id {:#?}", t.thread_id());
                    tracing::info!("{:#?}", t.backtrace());
                }
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn static_str() { panic!("boom"); }

    fn formatted() { panic!("count = {}", 3); }

    fn opaque() { std::panic::panic_any(7_u32); }

    #[test]
    fn extracts_static_and_owned_messages() {
        let caught = std::panic::catch_unwind(static_str).unwrap_err();
        assert_eq!(panic_message(caught.as_ref()), "boom");

        let caught = std::panic::catch_unwind(formatted).unwrap_err();
        assert_eq!(panic_message(caught.as_ref()), "count = 3");

        let caught = std::panic::catch_unwind(opaque).unwrap_err();
        assert_eq!(panic_message(caught.as_ref()), "Box<dyn Any>");
    }

    #[test]
    fn excerpt_is_bounded() {
        let excerpt = stack_excerpt();
        assert!(excerpt.lines().count() <= STACK_EXCERPT_FRAMES);
    }
}

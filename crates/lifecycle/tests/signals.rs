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

//! Signal delivery is process-wide, so these tests live in their own binary.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use tasklet_lifecycle::{Process, SignalKind, Tasklet, TaskletContext, TaskResult};
use tokio::sync::{Mutex, Notify};

/// Raised signals reach every listener in the binary; one test at a time.
static RAISE: Mutex<()> = Mutex::const_new(());

fn raise(signal: libc::c_int) {
    #[allow(unsafe_code)]
    // SAFETY: raise only delivers a signal to this process, which has a
    // handler installed for it.
    let rc = unsafe { libc::raise(signal) };
    assert_eq!(rc, 0);
}

struct WindDown {
    entered:   Arc<Notify>,
    truncated: Arc<AtomicBool>,
}

#[async_trait::async_trait]
impl Tasklet for WindDown {
    async fn execute(&mut self, ctx: &TaskletContext) -> TaskResult {
        ctx.stop();
        Ok(())
    }

    async fn terminate(&mut self, ctx: &TaskletContext) -> TaskResult {
        self.entered.notify_one();
        if !ctx.sleep(Duration::from_secs(3)).await {
            self.truncated.store(true, Ordering::SeqCst);
        }
        Ok(())
    }
}

#[tokio::test]
async fn sigquit_kill_truncates_terminate() {
    let _serial = RAISE.lock().await;
    let entered = Arc::new(Notify::new());
    let truncated = Arc::new(AtomicBool::new(false));
    let mut process = Process::new(
        "signals",
        WindDown {
            entered:   Arc::clone(&entered),
            truncated: Arc::clone(&truncated),
        },
    );
    let control = process.control();
    process.set_signal_handler(SignalKind::quit(), move || control.kill());

    let process = Arc::new(process);
    let running = {
        let process = Arc::clone(&process);
        tokio::spawn(async move { process.start().await })
    };

    entered.notified().await;
    let raised_at = std::time::Instant::now();
    raise(libc::SIGQUIT);

    tokio::time::timeout(Duration::from_secs(1), running)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert!(raised_at.elapsed() < Duration::from_secs(1));
    assert!(truncated.load(Ordering::SeqCst));
    assert!(!process.is_alive());
}

struct Idle {
    terminated: Arc<AtomicBool>,
}

#[async_trait::async_trait]
impl Tasklet for Idle {
    async fn execute(&mut self, ctx: &TaskletContext) -> TaskResult {
        ctx.sleep(Duration::from_secs(30)).await;
        Ok(())
    }

    async fn terminate(&mut self, ctx: &TaskletContext) -> TaskResult {
        self.terminated.store(!ctx.is_killed(), Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::test]
async fn interrupt_and_terminate_stop_by_default() {
    let _serial = RAISE.lock().await;
    for signal in [libc::SIGTERM, libc::SIGINT] {
        let terminated = Arc::new(AtomicBool::new(false));
        let process = Arc::new(Process::new(
            "defaults",
            Idle {
                terminated: Arc::clone(&terminated),
            },
        ));
        let running = {
            let process = Arc::clone(&process);
            tokio::spawn(async move { process.start().await })
        };
        while !process.is_initialized() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        raise(signal);
        tokio::time::timeout(Duration::from_secs(1), running)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(terminated.load(Ordering::SeqCst), "signal {signal} should stop gracefully");
        assert!(!process.is_alive());
    }
}

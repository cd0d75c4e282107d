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

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use snafu::{ResultExt, Whatever};
use tasklet_app::{AppConfig, CounterApp, WorkersApp};
use tasklet_common_runtime::{RuntimeOptions, create_current_thread_runtime};
use tasklet_common_telemetry::{init_global_logging, set_panic_hook};
use tasklet_lifecycle::{UnixCommandListener, send_command};
use tracing::info;

mod build_info;

#[derive(Debug, Parser)]
#[clap(
name = "tasklet",
about= "Run and control tasklet processes",
author = build_info::AUTHOR,
version = build_info::FULL_VERSION)]
struct Cli {
    /// TOML file layered over the built-in defaults.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    commands: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    Counter(CounterArgs),
    Workers(WorkersArgs),
    Ctl(CtlArgs),
}

#[derive(Debug, Clone, Args)]
#[command(flatten_help = true)]
#[command(long_about = r"

Runs the counter process. It answers exit, reset and count.
Examples:

tasklet counter --socket /tmp/counter.sock --limit 60

")]
struct CounterArgs {
    #[arg(long)]
    socket:      Option<PathBuf>,
    /// Stop once the counter reaches this value.
    #[arg(long)]
    limit:       Option<u64>,
    #[arg(long)]
    interval_ms: Option<u64>,
}

impl CounterArgs {
    async fn run(self, mut config: AppConfig) -> Result<(), Whatever> {
        let opts = &mut config.counter;
        if self.socket.is_some() {
            opts.socket = self.socket;
        }
        if self.limit.is_some() {
            opts.limit = self.limit;
        }
        if let Some(interval_ms) = self.interval_ms {
            opts.interval_ms = interval_ms;
        }

        let mut app = CounterApp::new(opts);
        if let Some(socket) = &opts.socket {
            let listener =
                UnixCommandListener::bind(socket).whatever_context("Failed to bind command socket")?;
            info!(socket = %socket.display(), "listening for commands");
            app.listen(listener);
        }
        app.run().await.whatever_context("Counter failed")?;
        info!(count = app.count(), "counter exited");
        Ok(())
    }
}

#[derive(Debug, Clone, Args)]
#[command(flatten_help = true)]
#[command(long_about = r"

Runs the worker pool manager. SIGQUIT kills it, SIGHUP logs the roster.
Examples:

tasklet workers --socket /tmp/workers.sock --workers 3 --max-workers 13

")]
struct WorkersArgs {
    #[arg(long)]
    socket:      Option<PathBuf>,
    #[arg(long)]
    workers:     Option<usize>,
    #[arg(long)]
    max_workers: Option<usize>,
}

impl WorkersArgs {
    async fn run(self, mut config: AppConfig) -> Result<(), Whatever> {
        let opts = &mut config.workers;
        if self.socket.is_some() {
            opts.socket = self.socket;
        }
        if let Some(workers) = self.workers {
            opts.workers = workers;
        }
        if let Some(max_workers) = self.max_workers {
            opts.max_workers = max_workers;
        }
        config.validate().whatever_context("Invalid worker settings")?;

        let opts = &config.workers;
        let mut app = WorkersApp::new(opts)
            .await
            .whatever_context("Failed to build worker pool")?;
        if let Some(socket) = &opts.socket {
            let listener =
                UnixCommandListener::bind(socket).whatever_context("Failed to bind command socket")?;
            info!(socket = %socket.display(), "listening for commands");
            app.listen(listener);
        }
        app.run().await.whatever_context("Worker pool failed")
    }
}

#[derive(Debug, Clone, Args)]
#[command(flatten_help = true)]
#[command(long_about = r"

Sends one command to a running process and prints the reply.
Examples:

tasklet ctl --socket /tmp/workers.sock add_worker
tasklet ctl --socket /tmp/workers.sock stop_worker:2

")]
struct CtlArgs {
    #[arg(long)]
    socket:  PathBuf,
    command: String,
}

impl CtlArgs {
    fn run(&self) -> Result<(), Whatever> {
        let runtime =
            create_current_thread_runtime("tasklet-ctl").whatever_context("Failed to build runtime")?;
        let reply = runtime
            .block_on(send_command(&self.socket, &self.command))
            .whatever_context("Command failed")?;
        println!("{reply}");
        Ok(())
    }
}

/// Replaces the startup crash reporter with the logging hook. Tasklet
/// panics are recovered and must not produce crash reports.
fn install_runtime_panic_hook() {
    drop(std::panic::take_hook());
    set_panic_hook();
}

fn main() -> Result<(), Whatever> {
    human_panic::setup_panic!();
    let cli = Cli::parse();

    if let Commands::Ctl(args) = &cli.commands {
        return args.run();
    }

    let config = AppConfig::load(cli.config.as_deref()).whatever_context("Failed to load configuration")?;
    install_runtime_panic_hook();
    let _guards = init_global_logging("tasklet", &config.logging);
    info!(version = build_info::FULL_VERSION, "tasklet starting");

    let runtime = RuntimeOptions::builder()
        .thread_name("tasklet-main")
        .build()
        .create()
        .whatever_context("Failed to build runtime")?;

    runtime.block_on(async move {
        match cli.commands {
            Commands::Counter(args) => args.run(config).await,
            Commands::Workers(args) => args.run(config).await,
            Commands::Ctl(_) => Ok(()),
        }
    })
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;

    #[test]
    fn startup_hook_is_replaced_not_chained() {
        static STARTUP_HOOK_RAN: AtomicBool = AtomicBool::new(false);
        std::panic::set_hook(Box::new(|_| STARTUP_HOOK_RAN.store(true, Ordering::SeqCst)));

        install_runtime_panic_hook();
        let recovered = std::panic::catch_unwind(|| panic!("recovered by a handler"));
        assert!(recovered.is_err());
        assert!(!STARTUP_HOOK_RAN.load(Ordering::SeqCst));
    }

    #[test]
    fn parses_ctl_invocation() {
        let cli = Cli::parse_from(["tasklet", "ctl", "--socket", "/tmp/w.sock", "add_worker"]);
        match cli.commands {
            Commands::Ctl(args) => {
                assert_eq!(args.socket, PathBuf::from("/tmp/w.sock"));
                assert_eq!(args.command, "add_worker");
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}

// src/lib.rs

pub mod cli;
pub mod command;
pub mod config;
pub mod driver;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod hooks;
pub mod logging;
pub mod types;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use tracing::{debug, info, warn};

use crate::cli::CliArgs;
use crate::command::{Batch, CommandSpec};
use crate::config::{ExitHook, SchedulerConfig, default_config_path, load_and_validate};
use crate::engine::{CommandOutcome, Scheduler};
use crate::hooks::{PrefixedOutput, chain_exit, log_before_start, stop_all_on_failure};
use crate::types::CommandId;

/// What to run and how, after merging the batch file with CLI overrides.
#[derive(Debug)]
pub struct Plan {
    pub batch: Batch,
    pub config: SchedulerConfig,
    pub stop_on_failure: bool,
}

/// Per-command results of one run, in batch order.
#[derive(Debug, Default)]
pub struct RunSummary {
    pub outcomes: Vec<(CommandId, Option<CommandOutcome>)>,
}

impl RunSummary {
    /// True when every command ran and exited with code 0.
    pub fn all_succeeded(&self) -> bool {
        self.outcomes
            .iter()
            .all(|(_, outcome)| outcome.as_ref().is_some_and(CommandOutcome::is_success))
    }

    pub fn print(&self) {
        println!("summary:");
        for (id, outcome) in &self.outcomes {
            let status = match outcome {
                Some(CommandOutcome::Exited(Some(code))) => format!("exited with code {code}"),
                Some(CommandOutcome::Exited(None)) => "exited (code unknown)".to_string(),
                Some(CommandOutcome::SkippedByCancellation) => "cancelled before start".to_string(),
                Some(CommandOutcome::StartFailed(reason)) => format!("failed to start: {reason}"),
                None => "no result".to_string(),
            };
            println!("  - {id}: {status}");
        }
    }
}

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - batch loading (file or `--cmd` flags)
/// - scheduler with the real process adapter and the Tokio driver
/// - output prefixing and optional stop-on-failure hooks
/// - Ctrl-C handling
pub async fn run(args: CliArgs) -> Result<RunSummary> {
    let plan = build_plan(&args)?;

    if args.dry_run {
        print_dry_run(&plan);
        return Ok(RunSummary::default());
    }

    let order: Vec<CommandId> = plan.batch.ids().map(String::from).collect();
    let stop_timeout = plan.config.stop_timeout;
    let scheduler = Scheduler::with_child_processes(with_cli_hooks(plan.config, plan.stop_on_failure));

    info!(commands = order.len(), "running batch");
    scheduler.exec(plan.batch)?;

    tokio::select! {
        _ = scheduler.wait_until_idle() => {}
        signal = tokio::signal::ctrl_c() => {
            match signal {
                Ok(()) => warn!("Ctrl-C received; stopping all commands"),
                Err(e) => warn!(error = %e, "failed to listen for Ctrl-C; stopping all commands"),
            }
            scheduler.stop_all(stop_timeout, None);
            scheduler.wait_until_idle().await;
        }
    }

    let mut outcomes = scheduler.outcomes();
    let summary = RunSummary {
        outcomes: order
            .into_iter()
            .map(|id| {
                let outcome = outcomes
                    .iter()
                    .position(|(done, _)| *done == id)
                    .map(|idx| outcomes.swap_remove(idx).1);
                (id, outcome)
            })
            .collect(),
    };
    Ok(summary)
}

/// Merge the batch source with CLI overrides.
pub fn build_plan(args: &CliArgs) -> Result<Plan> {
    let (batch, mut config, mut stop_on_failure) = if args.commands.is_empty() {
        let path = args
            .config
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(default_config_path);
        let cfg = load_and_validate(&path)
            .with_context(|| format!("failed to load batch file {}", path.display()))?;
        (cfg.batch(), cfg.scheduler_config(), cfg.config.stop_on_failure)
    } else {
        let batch: Batch = args
            .commands
            .iter()
            .enumerate()
            .map(|(idx, line)| (format!("cmd-{}", idx + 1), CommandSpec::shell(line.clone())))
            .collect();
        (batch, SchedulerConfig::default(), false)
    };

    if let Some(limit) = args.concurrency {
        if limit == 0 {
            bail!("--concurrency must be >= 1");
        }
        config.concurrency_limit = limit;
    }
    if let Some(ms) = args.poll_interval_ms {
        if ms == 0 {
            bail!("--poll-interval-ms must be >= 1");
        }
        config.poll_interval = Duration::from_millis(ms);
    }
    if let Some(secs) = args.timeout {
        let Ok(timeout) = Duration::try_from_secs_f64(secs) else {
            bail!("--timeout must be a non-negative number of seconds (got {secs})");
        };
        config.process_timeout = Some(timeout);
    }
    stop_on_failure |= args.stop_on_failure;

    debug!(?config, stop_on_failure, "resolved scheduler config");
    Ok(Plan {
        batch,
        config,
        stop_on_failure,
    })
}

fn with_cli_hooks(config: SchedulerConfig, stop_on_failure: bool) -> SchedulerConfig {
    let output = PrefixedOutput::stdio();
    let mut on_exit: ExitHook = Arc::new(output.exit_hook());
    if stop_on_failure {
        on_exit = chain_exit(on_exit, Arc::new(stop_all_on_failure(config.stop_timeout)));
    }

    let mut config = config
        .on_before_start(log_before_start())
        .on_stream_read(output.stream_hook());
    config.hooks.on_exit = Some(on_exit);
    config
}

/// Simple dry-run output: print settings and commands.
fn print_dry_run(plan: &Plan) {
    println!("parexec dry-run");
    println!("  concurrency_limit = {}", plan.config.concurrency_limit);
    println!("  poll_interval = {:?}", plan.config.poll_interval);
    if let Some(timeout) = plan.config.process_timeout {
        println!("  process_timeout = {timeout:?}");
    }
    println!("  stop_on_failure = {}", plan.stop_on_failure);
    println!();

    println!("commands ({}):", plan.batch.len());
    for (id, spec) in plan.batch.iter() {
        println!("  - {id}");
        println!("      cmd: {}", spec.command_line());
        if let Some(cwd) = spec.cwd() {
            println!("      cwd: {}", cwd.display());
        }
        if let Some(env) = spec.env() {
            println!("      env: {:?}", env.keys().collect::<Vec<_>>());
        }
        if let Some(timeout) = spec.timeout() {
            println!("      timeout: {timeout:?}");
        }
    }

    debug!("dry-run complete (no execution)");
}

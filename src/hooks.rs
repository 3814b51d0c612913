// src/hooks.rs

//! Ready-made lifecycle hooks for [`SchedulerConfig`](crate::config::SchedulerConfig).

use std::collections::HashMap;
use std::io::{self, Write};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tracing::{info, warn};

use crate::command::CommandSpec;
use crate::config::ExitHook;
use crate::engine::Scheduler;
use crate::exec::ProcessHandle;
use crate::types::{CommandId, StreamKind};

/// Before-start hook that logs which command is about to start.
pub fn log_before_start() -> impl Fn(&Scheduler, &dyn ProcessHandle, &CommandSpec, &str) + Send + Sync + 'static
{
    |_scheduler, handle, _spec, id| {
        info!(command = %id, command_line = %handle.command_line(), "about to start command");
    }
}

/// Exit hook that stops the whole batch as soon as one command exits with a
/// non-zero code. Unknown exit codes don't count as failures.
pub fn stop_all_on_failure(
    timeout: Duration,
) -> impl Fn(&dyn ProcessHandle, Option<i32>, &Scheduler, &CommandSpec, &str) + Send + Sync + 'static
{
    move |_handle, exit_code, scheduler, _spec, id| {
        if matches!(exit_code, Some(code) if code != 0) {
            warn!(command = %id, exit_code = ?exit_code, "command failed; stopping all commands");
            scheduler.stop_all(timeout, None);
        }
    }
}

/// Run `first`, then `second`.
pub fn chain_exit(first: ExitHook, second: ExitHook) -> ExitHook {
    Arc::new(
        move |handle: &dyn ProcessHandle,
              exit_code: Option<i32>,
              scheduler: &Scheduler,
              spec: &CommandSpec,
              id: &str| {
            first(handle, exit_code, scheduler, spec, id);
            second(handle, exit_code, scheduler, spec, id);
        },
    )
}

type SharedWriter = Box<dyn Write + Send>;

struct PrefixState {
    partial: HashMap<(CommandId, StreamKind), Vec<u8>>,
    out: SharedWriter,
    err: SharedWriter,
}

/// Writes command output line by line as `[id] line`, keeping lines from
/// concurrent commands from interleaving mid-line.
///
/// Install [`PrefixedOutput::stream_hook`] as the stream hook and
/// [`PrefixedOutput::exit_hook`] as (part of) the exit hook so trailing
/// partial lines get flushed.
#[derive(Clone)]
pub struct PrefixedOutput {
    state: Arc<Mutex<PrefixState>>,
}

impl PrefixedOutput {
    /// Stdout lines go to stdout, stderr lines to stderr.
    pub fn stdio() -> Self {
        Self::with_writers(io::stdout(), io::stderr())
    }

    pub fn with_writers(out: impl Write + Send + 'static, err: impl Write + Send + 'static) -> Self {
        Self {
            state: Arc::new(Mutex::new(PrefixState {
                partial: HashMap::new(),
                out: Box::new(out),
                err: Box::new(err),
            })),
        }
    }

    /// Buffer `chunk` and write out every complete line.
    pub fn write_chunk(&self, id: &str, kind: StreamKind, chunk: &[u8]) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let buffered = state.partial.entry((id.to_string(), kind)).or_default();
        buffered.extend_from_slice(chunk);

        let Some(last_newline) = buffered.iter().rposition(|b| *b == b'\n') else {
            return;
        };
        let rest = buffered.split_off(last_newline + 1);
        let mut complete = std::mem::replace(buffered, rest);
        complete.pop();

        let writer = state.writer(kind);
        for line in complete.split(|b| *b == b'\n') {
            write_line(writer, id, line);
        }
        let _ = writer.flush();
    }

    /// Write out whatever is left for `id`, newline-terminated.
    pub fn flush(&self, id: &str) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        for kind in [StreamKind::Stdout, StreamKind::Stderr] {
            let Some(rest) = state.partial.remove(&(id.to_string(), kind)) else {
                continue;
            };
            if rest.is_empty() {
                continue;
            }
            let writer = state.writer(kind);
            write_line(writer, id, &rest);
            let _ = writer.flush();
        }
    }

    pub fn stream_hook(
        &self,
    ) -> impl Fn(StreamKind, &[u8], &Scheduler, &dyn ProcessHandle, &CommandSpec, &str)
    + Send
    + Sync
    + 'static {
        let output = self.clone();
        move |kind, chunk, _scheduler, _handle, _spec, id| output.write_chunk(id, kind, chunk)
    }

    pub fn exit_hook(
        &self,
    ) -> impl Fn(&dyn ProcessHandle, Option<i32>, &Scheduler, &CommandSpec, &str) + Send + Sync + 'static
    {
        let output = self.clone();
        move |_handle, _exit_code, _scheduler, _spec, id| output.flush(id)
    }
}

impl PrefixState {
    fn writer(&mut self, kind: StreamKind) -> &mut SharedWriter {
        match kind {
            StreamKind::Stdout => &mut self.out,
            StreamKind::Stderr => &mut self.err,
        }
    }
}

fn write_line(writer: &mut SharedWriter, id: &str, line: &[u8]) {
    let line = String::from_utf8_lossy(line);
    let _ = writeln!(writer, "[{id}] {}", line.trim_end_matches('\r'));
}

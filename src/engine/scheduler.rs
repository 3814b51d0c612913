// src/engine/scheduler.rs

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, info};

use crate::command::{Batch, CommandSpec};
use crate::config::SchedulerConfig;
use crate::driver::{Driver, TokioDriver};
use crate::engine::state::{ProcessRecord, SchedulerState};
use crate::engine::{CancelOutcome, CommandOutcome, ProcessState};
use crate::errors::{ParexecError, Result};
use crate::exec::{ChildProcessAdapter, OutputSink, ProcessAdapter, ProcessHandle, SpawnRequest};
use crate::types::{CommandId, StreamKind};

/// Runs a batch of commands with at most `concurrency_limit` alive at once.
///
/// `Scheduler` is a cheap handle: clones share the same state, which is how
/// hooks receive it. All public methods return immediately; progress is
/// made by timer callbacks scheduled on the [`Driver`].
///
/// ```no_run
/// # async fn demo() -> parexec::errors::Result<()> {
/// use parexec::command::{Batch, CommandSpec};
/// use parexec::config::SchedulerConfig;
/// use parexec::engine::Scheduler;
///
/// let scheduler = Scheduler::with_child_processes(
///     SchedulerConfig::default().with_concurrency_limit(2),
/// );
/// scheduler.exec(
///     Batch::new()
///         .with("list", CommandSpec::from_string("ls -la"))
///         .with("date", CommandSpec::from_string("date")),
/// )?;
/// scheduler.wait_until_idle().await;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

struct Inner {
    config: SchedulerConfig,
    adapter: Arc<dyn ProcessAdapter>,
    driver: Arc<dyn Driver>,
    state: Mutex<SchedulerState>,
    idle_tx: watch::Sender<bool>,
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

enum TickStep {
    Start(CommandId, Arc<CommandSpec>),
    Saturated,
    Done,
}

impl Scheduler {
    pub fn new(
        mut config: SchedulerConfig,
        adapter: Arc<dyn ProcessAdapter>,
        driver: Arc<dyn Driver>,
    ) -> Self {
        config.concurrency_limit = config.concurrency_limit.max(1);
        let (idle_tx, _) = watch::channel(true);
        Self {
            inner: Arc::new(Inner {
                config,
                adapter,
                driver,
                state: Mutex::new(SchedulerState::default()),
                idle_tx,
            }),
        }
    }

    /// Scheduler spawning real OS processes on the current Tokio runtime.
    ///
    /// Panics when called outside a Tokio runtime.
    pub fn with_child_processes(config: SchedulerConfig) -> Self {
        Self::new(
            config,
            Arc::new(ChildProcessAdapter::new()),
            Arc::new(TokioDriver::current()),
        )
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.inner.config
    }

    fn lock(&self) -> MutexGuard<'_, SchedulerState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Submit a batch. Commands start in batch order once the first tick
    /// fires.
    ///
    /// Fails with [`ParexecError::AlreadyRunning`] while the previous batch
    /// still has live processes or unstarted commands.
    pub fn exec(&self, batch: Batch) -> Result<()> {
        let mut state = self.lock();
        let reaped = state.sweep();
        let running = state.running_count();
        let pending = if state.stopped { 0 } else { state.pending.len() };

        let result = if running > 0 || pending > 0 {
            Err(ParexecError::AlreadyRunning { running, pending })
        } else {
            let generation = state.reset(batch);
            info!(generation, commands = state.total, "starting batch");
            self.inner.idle_tx.send_replace(false);
            Ok(generation)
        };
        drop(state);

        self.dispatch_exit_hooks(reaped);
        let generation = result?;

        let fast = self.inner.config.fast_retry_interval;
        let poll = self.inner.config.poll_interval;
        self.schedule_start_tick(generation, fast);
        self.schedule_sweep(generation, poll);
        Ok(())
    }

    /// Whether at least one process of the current batch is alive.
    pub fn is_any_running(&self) -> bool {
        self.count_running() > 0
    }

    /// Number of live processes. Reaps exited ones as a side effect.
    pub fn count_running(&self) -> usize {
        let (reaped, count) = {
            let mut state = self.lock();
            let reaped = state.sweep();
            (reaped, state.running_count())
        };
        self.dispatch_exit_hooks(reaped);
        count
    }

    /// Stop the whole batch: no further command starts and every running
    /// process receives `signal` (SIGTERM by default), escalated to SIGKILL
    /// after `timeout`.
    ///
    /// Only the first call has an effect until the next `exec`.
    pub fn stop_all(&self, timeout: Duration, signal: Option<i32>) -> CancelOutcome {
        let to_stop = {
            let mut state = self.lock();
            if state.stopped || state.finished {
                return CancelOutcome::NoOp;
            }
            state.stopped = true;
            state.request_stop_all()
        };

        info!(running = to_stop.len(), "stop requested for all commands");
        for (id, handle) in to_stop {
            debug!(command = %id, pid = ?handle.pid(), "stopping command");
            handle.stop(timeout, signal);
        }
        CancelOutcome::Requested
    }

    /// Stop one command. A command that has not started yet is skipped when
    /// its turn comes; one that is running receives `signal` now.
    pub fn stop_command(&self, id: &str, timeout: Duration, signal: Option<i32>) -> CancelOutcome {
        let handle = {
            let mut state = self.lock();
            if state.stopped {
                return CancelOutcome::NoOp;
            }
            state.cancelled.insert(id.to_string());

            if state.in_flight.contains_key(id) {
                match state.request_stop(id) {
                    Some(handle) => handle,
                    None => return CancelOutcome::NoOp,
                }
            } else {
                let not_started = matches!(
                    state.states.get(id),
                    Some(ProcessState::Queued | ProcessState::Starting)
                );
                if not_started {
                    debug!(command = %id, "command will be skipped before start");
                    return CancelOutcome::Deferred;
                }
                return CancelOutcome::NoOp;
            }
        };

        debug!(command = %id, pid = ?handle.pid(), "stopping command");
        handle.stop(timeout, signal);
        CancelOutcome::Requested
    }

    /// Lifecycle state of `id` in the current batch.
    pub fn state_of(&self, id: &str) -> Option<ProcessState> {
        self.lock().states.get(id).copied()
    }

    /// Outcomes recorded so far for the current batch, in completion order.
    pub fn outcomes(&self) -> Vec<(CommandId, CommandOutcome)> {
        self.lock().outcomes.clone()
    }

    /// True once the current batch has drained and every exit hook has run.
    pub fn is_idle(&self) -> bool {
        *self.inner.idle_tx.borrow()
    }

    /// Resolve once [`Scheduler::is_idle`] becomes true.
    pub async fn wait_until_idle(&self) {
        let mut rx = self.inner.idle_tx.subscribe();
        // The sender lives as long as `self`, so this can't fail.
        let _ = rx.wait_for(|idle| *idle).await;
    }

    fn schedule_start_tick(&self, generation: u64, delay: Duration) {
        let scheduler = self.clone();
        self.inner
            .driver
            .schedule_after(delay, Box::new(move || scheduler.start_tick(generation)));
    }

    fn schedule_sweep(&self, generation: u64, delay: Duration) {
        let scheduler = self.clone();
        self.inner
            .driver
            .schedule_after(delay, Box::new(move || scheduler.sweep_tick(generation)));
    }

    /// Start as many queued commands as admission allows.
    fn start_tick(&self, generation: u64) {
        let mut reaped = Vec::new();
        let saturated = loop {
            match self.next_step(generation, &mut reaped) {
                TickStep::Start(id, spec) => self.start_background_process(id, spec),
                TickStep::Saturated => break true,
                TickStep::Done => break false,
            }
        };
        self.dispatch_exit_hooks(reaped);

        if saturated {
            self.schedule_start_tick(generation, self.inner.config.poll_interval);
        }
    }

    fn next_step(&self, generation: u64, reaped: &mut Vec<ProcessRecord>) -> TickStep {
        let mut state = self.lock();
        if state.generation != generation {
            return TickStep::Done;
        }
        if state.stopped {
            state.drop_pending_after_stop();
            return TickStep::Done;
        }

        reaped.extend(state.sweep());
        if state.running_count() >= self.inner.config.concurrency_limit {
            debug!(
                running = state.running_count(),
                pending = state.pending.len(),
                "concurrency limit reached"
            );
            return TickStep::Saturated;
        }

        match state.pop_next() {
            Some((id, spec)) => TickStep::Start(id, spec),
            None => TickStep::Done,
        }
    }

    fn start_background_process(&self, id: CommandId, spec: Arc<CommandSpec>) {
        let request = SpawnRequest::from_spec(&spec, self.inner.config.process_timeout);
        let started = self.create_and_start(&id, &spec, request);

        let mut state = self.lock();
        state.starting = state.starting.saturating_sub(1);

        let handle = match started {
            Ok(handle) => handle,
            Err(e) => {
                error!(command = %id, error = %e, "failed to start command");
                state.record_start_failure(id, e.to_string());
                return;
            }
        };

        info!(
            command = %id,
            pid = ?handle.pid(),
            remaining = state.pending.len(),
            "started command"
        );
        let stop_now = state.stopped || state.cancelled.contains(&id);
        state.insert_running(id.clone(), spec, Arc::clone(&handle));

        if stop_now && state.request_stop(&id).is_some() {
            drop(state);
            debug!(command = %id, "stop requested while starting; stopping now");
            handle.stop(self.inner.config.stop_timeout, None);
        }
    }

    fn create_and_start(
        &self,
        id: &str,
        spec: &Arc<CommandSpec>,
        request: SpawnRequest,
    ) -> Result<Arc<dyn ProcessHandle>> {
        let handle = self.inner.adapter.create(request)?;
        if let Some(hook) = &self.inner.config.hooks.on_before_start {
            hook(self, handle.as_ref(), spec.as_ref(), id);
        }
        debug!(command = %id, command_line = %handle.command_line(), "starting command");
        handle.start(self.output_sink(id, spec, &handle))?;
        Ok(handle)
    }

    /// Forward output chunks to the stream hook. Holds only weak references
    /// so a handle that keeps its sink can't keep the scheduler alive.
    fn output_sink(
        &self,
        id: &str,
        spec: &Arc<CommandSpec>,
        handle: &Arc<dyn ProcessHandle>,
    ) -> Option<OutputSink> {
        let hook = self.inner.config.hooks.on_stream_read.clone()?;
        let inner: Weak<Inner> = Arc::downgrade(&self.inner);
        let handle: Weak<dyn ProcessHandle> = Arc::downgrade(handle);
        let spec = Arc::clone(spec);
        let id = id.to_string();

        Some(Box::new(move |kind: StreamKind, chunk: &[u8]| {
            if let (Some(inner), Some(handle)) = (inner.upgrade(), handle.upgrade()) {
                let scheduler = Scheduler { inner };
                hook(kind, chunk, &scheduler, handle.as_ref(), spec.as_ref(), id.as_str());
            }
        }))
    }

    fn sweep_tick(&self, generation: u64) {
        let (reaped, keep_going) = {
            let mut state = self.lock();
            if state.generation != generation {
                return;
            }
            let reaped = state.sweep();
            if state.stopped {
                state.drop_pending_after_stop();
            }
            (reaped, !state.is_drained())
        };
        self.dispatch_exit_hooks(reaped);

        if keep_going {
            self.schedule_sweep(generation, self.inner.config.poll_interval);
        } else {
            self.maybe_finish();
        }
    }

    /// Fire exit hooks on the driver, outside the state lock.
    fn dispatch_exit_hooks(&self, reaped: Vec<ProcessRecord>) {
        if reaped.is_empty() {
            return;
        }
        let Some(hook) = self.inner.config.hooks.on_exit.clone() else {
            return;
        };

        self.lock().callbacks_in_flight += reaped.len();
        for record in reaped {
            let hook = Arc::clone(&hook);
            let scheduler = self.clone();
            self.inner.driver.schedule_after(
                self.inner.config.fast_retry_interval,
                Box::new(move || {
                    hook(
                        record.handle.as_ref(),
                        record.cached_exit_code,
                        &scheduler,
                        record.spec.as_ref(),
                        record.id.as_str(),
                    );
                    scheduler.exit_hook_done();
                }),
            );
        }
    }

    fn exit_hook_done(&self) {
        {
            let mut state = self.lock();
            state.callbacks_in_flight = state.callbacks_in_flight.saturating_sub(1);
        }
        self.maybe_finish();
    }

    fn maybe_finish(&self) {
        let mut state = self.lock();
        if state.stopped {
            state.drop_pending_after_stop();
        }
        if state.finished || state.callbacks_in_flight > 0 || !state.is_drained() {
            return;
        }
        state.finished = true;
        info!(generation = state.generation, "No more processes are running");
        self.inner.idle_tx.send_replace(true);
    }
}

// src/engine/state.rs

//! Per-batch bookkeeping for the scheduler.
//!
//! Everything here runs under the scheduler's state lock and never calls
//! user hooks; callers collect the reaped [`ProcessRecord`]s and fire hooks
//! after the lock is released.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use tracing::{debug, info};

use crate::command::{Batch, CommandSpec};
use crate::engine::{CommandOutcome, ProcessState};
use crate::exec::ProcessHandle;
use crate::types::CommandId;

/// A command whose process has been started and not yet reaped.
pub struct ProcessRecord {
    pub id: CommandId,
    pub spec: Arc<CommandSpec>,
    pub handle: Arc<dyn ProcessHandle>,
    /// `Running` or `StopRequested`, then `Exited` once reaped.
    pub state: ProcessState,
    /// Exit code read by the stop procedure; `None` while running or when
    /// the adapter could not report one.
    pub cached_exit_code: Option<i32>,
}

#[derive(Default)]
pub struct SchedulerState {
    /// Not-yet-started commands, in batch order.
    pub pending: VecDeque<(CommandId, Arc<CommandSpec>)>,
    pub in_flight: HashMap<CommandId, ProcessRecord>,
    pub cancelled: HashSet<CommandId>,
    /// Batch-wide stop flag. Only `reset` clears it.
    pub stopped: bool,
    /// Commands popped from `pending` whose start has not completed.
    pub starting: usize,
    pub states: HashMap<CommandId, ProcessState>,
    pub outcomes: Vec<(CommandId, CommandOutcome)>,
    /// Bumped on every `exec`; timer callbacks of older batches compare
    /// against it and bail out.
    pub generation: u64,
    pub total: usize,
    /// Exit hooks scheduled on the driver but not yet run. Survives `reset`.
    pub callbacks_in_flight: usize,
    /// Completion already reported for the current generation.
    pub finished: bool,
}

impl SchedulerState {
    /// Load a new batch, clearing every per-batch field.
    pub fn reset(&mut self, batch: Batch) -> u64 {
        self.generation += 1;
        self.pending.clear();
        self.in_flight.clear();
        self.cancelled.clear();
        self.stopped = false;
        self.starting = 0;
        self.states.clear();
        self.outcomes.clear();
        self.finished = false;

        for (id, spec) in batch {
            self.states.insert(id.clone(), ProcessState::Queued);
            self.pending.push_back((id, Arc::new(spec)));
        }
        self.total = self.pending.len();
        self.generation
    }

    /// Live processes, including the one currently being started.
    pub fn running_count(&self) -> usize {
        self.in_flight.len() + self.starting
    }

    /// Nothing left to start and nothing alive.
    pub fn is_drained(&self) -> bool {
        (self.pending.is_empty() || self.stopped) && self.in_flight.is_empty() && self.starting == 0
    }

    pub fn set_state(&mut self, id: &str, state: ProcessState) {
        if let Some(slot) = self.states.get_mut(id) {
            *slot = state;
        }
    }

    fn finish(&mut self, id: CommandId, state: ProcessState, outcome: CommandOutcome) {
        self.set_state(&id, state);
        self.outcomes.push((id, outcome));
    }

    /// Pop the next command to start, silently skipping cancelled ones.
    pub fn pop_next(&mut self) -> Option<(CommandId, Arc<CommandSpec>)> {
        while let Some((id, spec)) = self.pending.pop_front() {
            if self.cancelled.contains(&id) {
                info!(command = %id, "command cancelled before start; skipping");
                self.finish(id, ProcessState::SkippedByCancellation, CommandOutcome::SkippedByCancellation);
                continue;
            }
            self.set_state(&id, ProcessState::Starting);
            self.starting += 1;
            return Some((id, spec));
        }
        None
    }

    /// After a batch-wide stop, everything still queued is skipped.
    pub fn drop_pending_after_stop(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        info!(
            count = self.pending.len(),
            "commands will not be started since stop is requested"
        );
        while let Some((id, _)) = self.pending.pop_front() {
            self.finish(id, ProcessState::SkippedByCancellation, CommandOutcome::SkippedByCancellation);
        }
    }

    pub fn insert_running(&mut self, id: CommandId, spec: Arc<CommandSpec>, handle: Arc<dyn ProcessHandle>) {
        self.set_state(&id, ProcessState::Running);
        self.in_flight.insert(
            id.clone(),
            ProcessRecord {
                id,
                spec,
                handle,
                state: ProcessState::Running,
                cached_exit_code: None,
            },
        );
    }

    pub fn record_start_failure(&mut self, id: CommandId, reason: String) {
        self.finish(id, ProcessState::StartFailed, CommandOutcome::StartFailed(reason));
    }

    /// Liveness sweep: reap every in-flight process that is no longer
    /// running and return the records whose exit hooks must fire.
    pub fn sweep(&mut self) -> Vec<ProcessRecord> {
        let exited: Vec<CommandId> = self
            .in_flight
            .iter()
            .filter(|(_, record)| !record.handle.is_running())
            .map(|(id, _)| id.clone())
            .collect();

        let records: Vec<ProcessRecord> = exited
            .into_iter()
            .filter_map(|id| self.in_flight.remove(&id))
            .collect();

        records
            .into_iter()
            .map(|mut record| {
                self.stop_procedure(&mut record);
                record
            })
            .collect()
    }

    fn stop_procedure(&mut self, record: &mut ProcessRecord) {
        let exit_code = match record.handle.exit_code() {
            Ok(code) => code,
            Err(e) => {
                debug!(command = %record.id, error = %e, "exit code unavailable");
                None
            }
        };
        record.cached_exit_code = exit_code;
        record.state = ProcessState::Exited;

        debug!(
            command = %record.id,
            exit_code = ?exit_code,
            "command is not running"
        );
        self.finish(
            record.id.clone(),
            ProcessState::Exited,
            CommandOutcome::Exited(exit_code),
        );
    }

    /// Mark a running command as stopping. Returns its handle if this call
    /// made the transition.
    pub fn request_stop(&mut self, id: &str) -> Option<Arc<dyn ProcessHandle>> {
        let record = self.in_flight.get_mut(id)?;
        if record.state != ProcessState::Running {
            return None;
        }
        record.state = ProcessState::StopRequested;
        let handle = Arc::clone(&record.handle);
        self.set_state(id, ProcessState::StopRequested);
        Some(handle)
    }

    /// Mark every running command as stopping.
    pub fn request_stop_all(&mut self) -> Vec<(CommandId, Arc<dyn ProcessHandle>)> {
        let ids: Vec<CommandId> = self.in_flight.keys().cloned().collect();
        ids.into_iter()
            .filter_map(|id| self.request_stop(&id).map(|handle| (id, handle)))
            .collect()
    }
}

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use parexec::command::{Batch, CommandSpec};
use parexec::config::{ExitHook, SchedulerConfig};
use parexec::engine::Scheduler;
use parexec::exec::ProcessHandle;
use parexec::hooks::chain_exit;

use crate::fake_adapter::FakeAdapter;
use crate::manual_driver::ManualDriver;

/// Batch where every command's line is its own id, so fake scripts can be
/// keyed by id.
pub fn batch_of(ids: &[&str]) -> Batch {
    ids.iter()
        .map(|id| (id.to_string(), CommandSpec::from_string(id)))
        .collect()
}

/// Scheduler config with the given limit and the default intervals.
pub fn config_with_limit(limit: usize) -> SchedulerConfig {
    SchedulerConfig::default().with_concurrency_limit(limit)
}

/// Records every exit hook call as `(id, exit_code)`.
#[derive(Clone, Default)]
pub struct ExitLog {
    calls: Arc<Mutex<Vec<(String, Option<i32>)>>>,
}

impl ExitLog {
    pub fn calls(&self) -> Vec<(String, Option<i32>)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn ids(&self) -> Vec<String> {
        self.calls().into_iter().map(|(id, _)| id).collect()
    }

    pub fn code_of(&self, id: &str) -> Option<Option<i32>> {
        self.calls()
            .into_iter()
            .find(|(done, _)| done == id)
            .map(|(_, code)| code)
    }
}

/// Scheduler wired to a `FakeAdapter` on a `ManualDriver`, with an `ExitLog`
/// chained after whatever exit hook the config already carries.
pub struct Harness {
    pub driver: Arc<ManualDriver>,
    pub adapter: Arc<FakeAdapter>,
    pub scheduler: Scheduler,
    pub exits: ExitLog,
}

impl Harness {
    pub fn new(mut config: SchedulerConfig) -> Self {
        let driver = ManualDriver::new();
        let adapter = FakeAdapter::new(Arc::clone(&driver));
        let exits = ExitLog::default();

        let calls = Arc::clone(&exits.calls);
        let recorder: ExitHook = Arc::new(
            move |_handle: &dyn ProcessHandle,
                  code: Option<i32>,
                  _scheduler: &Scheduler,
                  _spec: &CommandSpec,
                  id: &str| {
                calls.lock().unwrap().push((id.to_string(), code));
            },
        );
        config.hooks.on_exit = Some(match config.hooks.on_exit.take() {
            Some(existing) => chain_exit(recorder, existing),
            None => recorder,
        });

        let scheduler = Scheduler::new(config, adapter.clone(), driver.clone());
        Self {
            driver,
            adapter,
            scheduler,
            exits,
        }
    }

    pub fn with_limit(limit: usize) -> Self {
        Self::new(config_with_limit(limit))
    }

    /// Run the driver until the scheduler goes quiet.
    pub fn run(&self) {
        self.driver.run_until_idle(100_000);
    }

    pub fn advance(&self, by: Duration) {
        self.driver.advance(by);
    }
}

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use parexec::errors::{ParexecError, Result};
use parexec::exec::{OutputSink, ProcessAdapter, ProcessHandle, SpawnRequest};
use parexec::types::StreamKind;

use crate::manual_driver::ManualDriver;

/// How a fake process behaves once started.
#[derive(Debug, Clone)]
pub struct FakeScript {
    pub runtime: Duration,
    pub exit_code: Option<i32>,
    pub output: Vec<(StreamKind, Vec<u8>)>,
    pub create_error: Option<String>,
    pub start_error: Option<String>,
    /// Keep running after SIGTERM until the stop timeout forces a kill.
    pub ignores_stop: bool,
    /// `exit_code()` fails instead of reporting a code.
    pub status_error: bool,
}

impl Default for FakeScript {
    fn default() -> Self {
        Self::runs_for(Duration::from_millis(50))
    }
}

impl FakeScript {
    pub fn runs_for(runtime: Duration) -> Self {
        Self {
            runtime,
            exit_code: Some(0),
            output: Vec::new(),
            create_error: None,
            start_error: None,
            ignores_stop: false,
            status_error: false,
        }
    }

    pub fn exits_with(mut self, code: i32) -> Self {
        self.exit_code = Some(code);
        self
    }

    pub fn unknown_exit_code(mut self) -> Self {
        self.exit_code = None;
        self
    }

    pub fn prints(mut self, kind: StreamKind, text: &str) -> Self {
        self.output.push((kind, text.as_bytes().to_vec()));
        self
    }

    pub fn fails_on_create(mut self, reason: &str) -> Self {
        self.create_error = Some(reason.to_string());
        self
    }

    pub fn fails_on_start(mut self, reason: &str) -> Self {
        self.start_error = Some(reason.to_string());
        self
    }

    pub fn ignores_stop(mut self) -> Self {
        self.ignores_stop = true;
        self
    }

    pub fn with_status_error(mut self) -> Self {
        self.status_error = true;
        self
    }
}

/// One `stop` call received by a fake process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StopCall {
    pub command_line: String,
    pub timeout: Duration,
    pub signal: Option<i32>,
}

#[derive(Default)]
struct Journal {
    started: Vec<Arc<FakeProcess>>,
    stops: Vec<StopCall>,
}

/// A fake adapter that:
/// - hands out scripted processes keyed by their command line
/// - runs them on the `ManualDriver` clock
/// - records starts, stop calls and how many were alive at once.
pub struct FakeAdapter {
    driver: Arc<ManualDriver>,
    scripts: Mutex<HashMap<String, FakeScript>>,
    journal: Arc<Mutex<Journal>>,
    next_pid: Mutex<u32>,
}

impl FakeAdapter {
    pub fn new(driver: Arc<ManualDriver>) -> Arc<Self> {
        Arc::new(Self {
            driver,
            scripts: Mutex::new(HashMap::new()),
            journal: Arc::new(Mutex::new(Journal::default())),
            next_pid: Mutex::new(1000),
        })
    }

    /// Script the process whose command line displays as `command_line`.
    /// Unscripted commands use `FakeScript::default()`.
    pub fn script(&self, command_line: &str, script: FakeScript) {
        self.scripts
            .lock()
            .unwrap()
            .insert(command_line.to_string(), script);
    }

    /// Command lines in the order they were started.
    pub fn started(&self) -> Vec<String> {
        let journal = self.journal.lock().unwrap();
        journal.started.iter().map(|p| p.command_line()).collect()
    }

    /// Requests as they were when started (after any `configure`).
    pub fn started_requests(&self) -> Vec<SpawnRequest> {
        let journal = self.journal.lock().unwrap();
        journal
            .started
            .iter()
            .map(|p| p.state.lock().unwrap().request.clone())
            .collect()
    }

    pub fn stops(&self) -> Vec<StopCall> {
        self.journal.lock().unwrap().stops.clone()
    }

    pub fn stop_count(&self, command_line: &str) -> usize {
        self.stops()
            .iter()
            .filter(|s| s.command_line == command_line)
            .count()
    }

    /// Largest number of processes alive at the same virtual instant.
    pub fn peak_concurrency(&self) -> usize {
        let journal = self.journal.lock().unwrap();
        let mut edges: Vec<(Duration, i32)> = Vec::new();
        for process in &journal.started {
            let state = process.state.lock().unwrap();
            if let Some(started_at) = state.started_at {
                edges.push((started_at, 1));
                edges.push((state.exit_at.unwrap_or(Duration::MAX), -1));
            }
        }
        // Exits sort before starts at the same instant.
        edges.sort();

        let mut alive = 0i32;
        let mut peak = 0i32;
        for (_, delta) in edges {
            alive += delta;
            peak = peak.max(alive);
        }
        peak as usize
    }
}

impl ProcessAdapter for FakeAdapter {
    fn create(&self, request: SpawnRequest) -> Result<Arc<dyn ProcessHandle>> {
        request.validate()?;
        let line = request.command.to_string();
        let script = self
            .scripts
            .lock()
            .unwrap()
            .get(&line)
            .cloned()
            .unwrap_or_default();

        if let Some(reason) = &script.create_error {
            return Err(spawn_error(line, reason));
        }

        let pid = {
            let mut next = self.next_pid.lock().unwrap();
            *next += 1;
            *next
        };

        let process: Arc<FakeProcess> = Arc::new_cyclic(|this: &Weak<FakeProcess>| FakeProcess {
            this: this.clone(),
            driver: Arc::clone(&self.driver),
            journal: Arc::clone(&self.journal),
            script,
            pid,
            state: Mutex::new(FakeState {
                request,
                started_at: None,
                exit_at: None,
                exit_code: None,
                unread: (Vec::new(), Vec::new()),
            }),
        });
        Ok(process)
    }
}

struct FakeState {
    request: SpawnRequest,
    started_at: Option<Duration>,
    exit_at: Option<Duration>,
    exit_code: Option<i32>,
    unread: (Vec<u8>, Vec<u8>),
}

pub struct FakeProcess {
    this: Weak<FakeProcess>,
    driver: Arc<ManualDriver>,
    journal: Arc<Mutex<Journal>>,
    script: FakeScript,
    pid: u32,
    state: Mutex<FakeState>,
}

impl FakeProcess {
    fn has_exited(state: &FakeState, now: Duration) -> bool {
        state.exit_at.is_some_and(|at| now >= at)
    }
}

impl ProcessHandle for FakeProcess {
    fn configure(&self, edit: &mut dyn FnMut(&mut SpawnRequest)) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.started_at.is_some() {
            return Err(spawn_error(
                state.request.command.to_string(),
                "process already started",
            ));
        }
        edit(&mut state.request);
        Ok(())
    }

    fn start(&self, on_output: Option<OutputSink>) -> Result<()> {
        let now = self.driver.now();
        {
            let mut state = self.state.lock().unwrap();
            if state.started_at.is_some() {
                return Err(spawn_error(
                    state.request.command.to_string(),
                    "process already started",
                ));
            }
            if let Some(reason) = &self.script.start_error {
                return Err(spawn_error(
                    state.request.command.to_string(),
                    reason,
                ));
            }

            let mut runtime = self.script.runtime;
            let mut exit_code = self.script.exit_code;
            if let Some(timeout) = state.request.effective_timeout() {
                if timeout < runtime {
                    runtime = timeout;
                    exit_code = Some(137);
                }
            }
            state.started_at = Some(now);
            state.exit_at = Some(now + runtime);
            state.exit_code = exit_code;

            for (kind, bytes) in &self.script.output {
                match kind {
                    StreamKind::Stdout => state.unread.0.extend_from_slice(bytes),
                    StreamKind::Stderr => state.unread.1.extend_from_slice(bytes),
                }
            }
        }

        if let Some(me) = self.this.upgrade() {
            self.journal.lock().unwrap().started.push(me);
        }

        if let Some(sink) = on_output {
            for (kind, bytes) in &self.script.output {
                sink(*kind, bytes);
            }
        }
        Ok(())
    }

    fn is_running(&self) -> bool {
        let state = self.state.lock().unwrap();
        state.started_at.is_some() && !Self::has_exited(&state, self.driver.now())
    }

    fn pid(&self) -> Option<u32> {
        let state = self.state.lock().unwrap();
        state.started_at.map(|_| self.pid)
    }

    fn read_incremental_output(&self) -> (Vec<u8>, Vec<u8>) {
        let mut state = self.state.lock().unwrap();
        std::mem::take(&mut state.unread)
    }

    fn exit_code(&self) -> Result<Option<i32>> {
        if self.script.status_error {
            return Err(ParexecError::AdapterStatus("scripted status failure".into()));
        }
        let state = self.state.lock().unwrap();
        if Self::has_exited(&state, self.driver.now()) {
            Ok(state.exit_code)
        } else {
            Ok(None)
        }
    }

    fn stop(&self, timeout: Duration, signal: Option<i32>) {
        let now = self.driver.now();
        self.journal.lock().unwrap().stops.push(StopCall {
            command_line: self.command_line(),
            timeout,
            signal,
        });

        let mut state = self.state.lock().unwrap();
        if state.started_at.is_none() || Self::has_exited(&state, now) {
            return;
        }
        let (exit_at, code) = if self.script.ignores_stop {
            (now + timeout, 137)
        } else {
            (now, 128 + signal.unwrap_or(15))
        };
        if state.exit_at.is_none_or(|at| exit_at < at) {
            state.exit_at = Some(exit_at);
            state.exit_code = Some(code);
        }
    }

    fn command_line(&self) -> String {
        self.state.lock().unwrap().request.command.to_string()
    }
}

fn spawn_error(command: String, reason: &str) -> ParexecError {
    ParexecError::Spawn {
        command,
        reason: reason.to_string(),
    }
}

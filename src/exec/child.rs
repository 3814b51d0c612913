// src/exec/child.rs

//! Real process adapter built on `tokio::process`.

use std::io;
use std::process::Stdio;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::runtime::Handle;
use tracing::{debug, warn};

use crate::errors::{ParexecError, Result};
use crate::exec::adapter::{
    CommandLine, DEFAULT_STOP_SIGNAL, OutputSink, ProcessAdapter, ProcessHandle, SpawnRequest,
};
use crate::exec::status::{ProcessStatus, StickyStatus};
use crate::types::StreamKind;

const READ_CHUNK: usize = 8 * 1024;
const SIGKILL: i32 = 9;

type SharedSink = Arc<dyn Fn(StreamKind, &[u8]) + Send + Sync>;

/// Production adapter: every handle wraps one `tokio::process::Child`.
///
/// Handles must be started from inside a Tokio runtime; the runtime is used
/// for the pipe readers, the stdin writer, the timeout watchdog and the
/// stop escalation.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChildProcessAdapter;

impl ChildProcessAdapter {
    pub fn new() -> Self {
        Self
    }
}

impl ProcessAdapter for ChildProcessAdapter {
    fn create(&self, request: SpawnRequest) -> Result<Arc<dyn ProcessHandle>> {
        request.validate()?;
        Ok(Arc::new(ChildProcess::new(request)))
    }
}

pub struct ChildProcess {
    shared: Arc<Shared>,
}

struct Shared {
    state: Mutex<ChildState>,
    output: Mutex<OutputBuffers>,
    /// Pipe readers still running; the process counts as alive until both
    /// reached EOF so no output is delivered after the exit is reported.
    open_streams: AtomicUsize,
}

struct ChildState {
    request: SpawnRequest,
    child: Option<Child>,
    pid: Option<u32>,
    /// Process group of the child, equal to its pid on unix. Kept after the
    /// child is reaped so descendants can still be signalled.
    pgid: Option<u32>,
    status: StickyStatus,
    runtime: Option<Handle>,
}

/// Bytes not yet handed out by `read_incremental_output`.
#[derive(Default)]
struct OutputBuffers {
    stdout: Vec<u8>,
    stderr: Vec<u8>,
}

impl OutputBuffers {
    fn push(&mut self, kind: StreamKind, chunk: &[u8]) {
        match kind {
            StreamKind::Stdout => self.stdout.extend_from_slice(chunk),
            StreamKind::Stderr => self.stderr.extend_from_slice(chunk),
        }
    }

    fn take_incremental(&mut self) -> (Vec<u8>, Vec<u8>) {
        (
            std::mem::take(&mut self.stdout),
            std::mem::take(&mut self.stderr),
        )
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ChildProcess {
    pub fn new(request: SpawnRequest) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(ChildState {
                    request,
                    child: None,
                    pid: None,
                    pgid: None,
                    status: StickyStatus::new(),
                    runtime: None,
                }),
                output: Mutex::new(OutputBuffers::default()),
                open_streams: AtomicUsize::new(0),
            }),
        }
    }

    fn spawn_reader<R>(&self, runtime: &Handle, mut reader: R, kind: StreamKind, sink: Option<SharedSink>)
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let shared = Arc::clone(&self.shared);
        shared.open_streams.fetch_add(1, Ordering::SeqCst);

        runtime.spawn(async move {
            let mut buf = vec![0u8; READ_CHUNK];
            loop {
                match reader.read(&mut buf).await {
                    Ok(0) => break,
                    Ok(n) => {
                        let chunk = &buf[..n];
                        lock(&shared.output).push(kind, chunk);
                        if let Some(sink) = &sink {
                            sink(kind, chunk);
                        }
                    }
                    Err(e) => {
                        debug!(stream = %kind, error = %e, "error reading child pipe; closing");
                        break;
                    }
                }
            }
            shared.open_streams.fetch_sub(1, Ordering::SeqCst);
        });
    }
}

impl Shared {
    /// Send `signal` to the process group while the command counts as
    /// running: the child is unreaped or a descendant still holds one of
    /// its pipes. Returns whether it did.
    fn signal_if_running(&self, signal: i32) -> bool {
        let mut guard = lock(&self.state);
        let state = &mut *guard;
        let Some(child) = state.child.as_mut() else {
            return false;
        };
        let child_alive = matches!(state.status.refresh(child), Ok(ProcessStatus::Running));
        let pipes_open = self.open_streams.load(Ordering::SeqCst) > 0;
        if !child_alive && !pipes_open {
            return false;
        }
        if let Err(e) = send_signal(child, state.pgid, signal) {
            warn!(pid = state.pid, signal, error = %e, "failed to signal child process");
        }
        true
    }
}

fn build_command(request: &SpawnRequest) -> Result<Command> {
    let mut cmd = match &request.command {
        CommandLine::Argv(argv) => {
            let Some((program, args)) = argv.split_first() else {
                return Err(ParexecError::spawn("", "command line is empty"));
            };
            let mut c = Command::new(program);
            c.args(args);
            c
        }
        // Build a shell command appropriate for the platform.
        CommandLine::Shell(line) => {
            if cfg!(windows) {
                let mut c = Command::new("cmd");
                c.arg("/C").arg(line);
                c
            } else {
                let mut c = Command::new("sh");
                c.arg("-c").arg(line);
                c
            }
        }
    };

    if let Some(cwd) = &request.cwd {
        if !cwd.is_dir() {
            return Err(ParexecError::spawn(
                request.command.to_string(),
                format!("working directory {:?} does not exist", cwd),
            ));
        }
        cmd.current_dir(cwd);
    }
    if let Some(env) = &request.env {
        cmd.envs(env);
    }

    let stdin = if request.input.is_some() {
        Stdio::piped()
    } else {
        Stdio::null()
    };
    cmd.stdin(stdin)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    // Own process group, so stop signals reach the whole tree.
    #[cfg(unix)]
    cmd.process_group(0);

    Ok(cmd)
}

#[cfg(unix)]
fn send_signal(_child: &mut Child, pgid: Option<u32>, signal: i32) -> io::Result<()> {
    use nix::errno::Errno;
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    let Some(pgid) = pgid else {
        return Ok(());
    };
    let signal = Signal::try_from(signal).map_err(io::Error::from)?;
    match killpg(Pid::from_raw(pgid as i32), signal) {
        // The whole group is gone already.
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(not(unix))]
fn send_signal(child: &mut Child, _pgid: Option<u32>, _signal: i32) -> io::Result<()> {
    match child.start_kill() {
        Err(e) if e.kind() == io::ErrorKind::InvalidInput => Ok(()),
        other => other,
    }
}

impl ProcessHandle for ChildProcess {
    fn configure(&self, edit: &mut dyn FnMut(&mut SpawnRequest)) -> Result<()> {
        let mut state = lock(&self.shared.state);
        if state.child.is_some() {
            return Err(ParexecError::AdapterStatus(
                "cannot reconfigure a process that has already started".to_string(),
            ));
        }
        edit(&mut state.request);
        state.request.validate()
    }

    fn start(&self, on_output: Option<OutputSink>) -> Result<()> {
        let mut state = lock(&self.shared.state);
        let command_line = state.request.command.to_string();

        if state.child.is_some() {
            return Err(ParexecError::spawn(command_line, "process already started"));
        }
        let runtime = Handle::try_current()
            .map_err(|e| ParexecError::spawn(command_line.clone(), e))?;

        let mut cmd = build_command(&state.request)?;
        let mut child = {
            let _enter = runtime.enter();
            cmd.spawn()
                .map_err(|e| ParexecError::spawn(command_line.clone(), e))?
        };
        state.pid = child.id();
        state.pgid = state.pid;

        if let (Some(mut stdin), Some(input)) = (child.stdin.take(), state.request.input.clone()) {
            runtime.spawn(async move {
                if let Err(e) = stdin.write_all(&input).await {
                    debug!(error = %e, "failed writing input to child stdin");
                }
                // Dropping stdin closes the pipe.
            });
        }

        let sink: Option<SharedSink> = on_output.map(Arc::from);
        if let Some(stdout) = child.stdout.take() {
            self.spawn_reader(&runtime, stdout, StreamKind::Stdout, sink.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            self.spawn_reader(&runtime, stderr, StreamKind::Stderr, sink);
        }

        if let Some(timeout) = state.request.effective_timeout() {
            let shared = Arc::clone(&self.shared);
            runtime.spawn(async move {
                tokio::time::sleep(timeout).await;
                if shared.signal_if_running(SIGKILL) {
                    warn!(
                        command = %command_line,
                        timeout_secs = timeout.as_secs_f64(),
                        "process exceeded its timeout; killed"
                    );
                }
            });
        }

        state.child = Some(child);
        state.runtime = Some(runtime);
        Ok(())
    }

    fn is_running(&self) -> bool {
        let mut guard = lock(&self.shared.state);
        let state = &mut *guard;
        let Some(child) = state.child.as_mut() else {
            return false;
        };
        match state.status.refresh(child) {
            Ok(ProcessStatus::Running) => true,
            Ok(ProcessStatus::Exited(_)) => self.shared.open_streams.load(Ordering::SeqCst) > 0,
            Err(e) => {
                warn!(pid = state.pid, error = %e, "status query failed; treating process as exited");
                false
            }
        }
    }

    fn pid(&self) -> Option<u32> {
        lock(&self.shared.state).pid
    }

    fn read_incremental_output(&self) -> (Vec<u8>, Vec<u8>) {
        lock(&self.shared.output).take_incremental()
    }

    fn exit_code(&self) -> Result<Option<i32>> {
        let mut guard = lock(&self.shared.state);
        let state = &mut *guard;
        let Some(child) = state.child.as_mut() else {
            return Err(ParexecError::AdapterStatus(
                "process has not been started".to_string(),
            ));
        };
        match state
            .status
            .refresh(child)
            .map_err(|e| ParexecError::AdapterStatus(e.to_string()))?
        {
            ProcessStatus::Running => Ok(None),
            ProcessStatus::Exited(code) => Ok(code),
        }
    }

    fn stop(&self, timeout: Duration, signal: Option<i32>) {
        if !self.shared.signal_if_running(signal.unwrap_or(DEFAULT_STOP_SIGNAL)) {
            return;
        }

        let runtime = lock(&self.shared.state).runtime.clone();
        let Some(runtime) = runtime else {
            return;
        };
        let shared = Arc::clone(&self.shared);
        runtime.spawn(async move {
            tokio::time::sleep(timeout).await;
            if shared.signal_if_running(SIGKILL) {
                debug!("process still alive after stop timeout; sent SIGKILL");
            }
        });
    }

    fn command_line(&self) -> String {
        lock(&self.shared.state).request.command.to_string()
    }
}

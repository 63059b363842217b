//! External programs: players, downloaders and postprocessors
//!
//! A [`Program`] is one configured executable bound to a source and an
//! output for a single run. Running it yields a [`ProcessHandle`]; a
//! background reader folds the program's output into its [`Progress`].

pub mod downloader;
pub mod parser;
pub mod player;
pub mod postprocessor;
pub mod registry;

pub use parser::ProgressParser;
pub use registry::{
    Backend, CompletionCheck, PipeMode, ProgramDef, ProgramFilter, ProgramRegistry, ProgramSpec,
    ProgramType,
};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, ChildStdout, Command};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::models::{MediaListing, Progress};
use crate::task::{lock, path_exists, Slot, Task};
use crate::template::{ArgContext, Template};

// =============================================================================
// Run configuration
// =============================================================================

/// What to do with a program's stdout/stderr
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputMode {
    /// Discard it
    Ignore,
    /// Parse it into progress as it arrives
    #[default]
    Watch,
    /// Keep every line, available once the program exits
    Collect,
}

/// Where a program reads its input from
#[derive(Clone)]
pub enum ProgramSource {
    /// URLs or paths passed as arguments
    Locators(Vec<String>),
    /// Another program's output
    Program(Arc<Program>),
}

/// Where a program writes its payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputTarget {
    File(PathBuf),
    Stdout,
    Fifo(PathBuf),
}

impl OutputTarget {
    fn path(&self) -> Option<&Path> {
        match self {
            OutputTarget::File(p) | OutputTarget::Fifo(p) => Some(p),
            OutputTarget::Stdout => None,
        }
    }
}

/// Per-run options, taken from the task
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub resolution: Option<u32>,
    pub format: Option<String>,
    pub extra_args: Vec<String>,
    pub listing: Option<MediaListing>,
    pub task_id: Option<u64>,
    pub task_title: Option<String>,
}

impl RunOptions {
    pub fn for_task(task: &Task) -> Self {
        Self {
            resolution: task.options.resolution,
            format: task.options.format.clone(),
            extra_args: task.options.args.clone(),
            listing: task.listing.clone(),
            task_id: Some(task.id()),
            task_title: Some(task.title.clone()),
        }
    }
}

/// Settings the launchers share
#[derive(Debug, Clone)]
pub struct LaunchSettings {
    /// Minimum time between progress updates from output
    pub progress_interval: Duration,
    /// Where finished downloads go when a task has no explicit destination
    pub download_dir: PathBuf,
    /// Root for per-task work directories
    pub temp_dir: PathBuf,
    pub output_template: String,
}

impl Default for LaunchSettings {
    fn default() -> Self {
        Self {
            progress_interval: Duration::from_millis(500),
            download_dir: PathBuf::from("."),
            temp_dir: std::env::temp_dir(),
            output_template: crate::template::DEFAULT_OUTPUT_TEMPLATE.to_string(),
        }
    }
}

// =============================================================================
// Process handle
// =============================================================================

struct ProcessState {
    child: Option<Child>,
    exit: Option<i32>,
    /// Named pipe to unlink once the process is gone
    fifo: Option<PathBuf>,
}

struct ProcessInner {
    program: String,
    pid: Option<u32>,
    state: Mutex<ProcessState>,
    upstream: Option<ProcessHandle>,
}

/// Shared handle to a running OS process
///
/// Exit codes follow the shell convention for signals: a process killed by
/// signal N reports `-N`.
#[derive(Clone)]
pub struct ProcessHandle {
    inner: Arc<ProcessInner>,
}

impl ProcessHandle {
    fn new(program: &str, child: Child, upstream: Option<ProcessHandle>) -> Self {
        Self {
            inner: Arc::new(ProcessInner {
                program: program.to_string(),
                pid: child.id(),
                state: Mutex::new(ProcessState {
                    child: Some(child),
                    exit: None,
                    fifo: None,
                }),
                upstream,
            }),
        }
    }

    pub fn pid(&self) -> Option<u32> {
        self.inner.pid
    }

    pub fn program(&self) -> &str {
        &self.inner.program
    }

    /// Exit code, or `None` while the process runs
    pub fn exit_code(&self) -> Option<i32> {
        let mut state = lock(&self.inner.state);
        if state.exit.is_some() {
            return state.exit;
        }
        let child = state.child.as_mut()?;
        match child.try_wait() {
            Ok(Some(status)) => {
                let code = status.code().unwrap_or_else(|| signal_code(&status));
                debug!(program = %self.inner.program, pid = ?self.inner.pid, code, "process exited");
                state.exit = Some(code);
                state.child = None;
                remove_fifo(state.fifo.take());
                state.exit
            }
            Ok(None) => None,
            Err(e) => {
                warn!(program = %self.inner.program, "failed to poll process: {}", e);
                state.exit = Some(-1);
                state.child = None;
                remove_fifo(state.fifo.take());
                state.exit
            }
        }
    }

    /// Unlink `path` once this process has exited
    fn remove_fifo_on_exit(&self, path: PathBuf) {
        let mut state = lock(&self.inner.state);
        if state.exit.is_some() {
            remove_fifo(Some(path));
        } else {
            state.fifo = Some(path);
        }
    }

    pub fn has_exited(&self) -> bool {
        self.exit_code().is_some()
    }

    /// Ask the process (and anything feeding it) to stop
    ///
    /// Every process in the chain is signalled; the first failure is returned.
    pub fn terminate(&self) -> Result<()> {
        let upstream = match &self.inner.upstream {
            Some(upstream) => upstream.terminate(),
            None => Ok(()),
        };
        upstream.and(self.terminate_own())
    }

    fn terminate_own(&self) -> Result<()> {
        if self.has_exited() {
            return Ok(());
        }
        info!(program = %self.inner.program, pid = ?self.inner.pid, "terminating");

        #[cfg(unix)]
        if let Some(pid) = self.inner.pid {
            return match send_signal(pid, libc::SIGTERM) {
                Ok(()) => Ok(()),
                Err(e) if e.raw_os_error() == Some(libc::ESRCH) => Ok(()),
                Err(e) => Err(e.into()),
            };
        }

        self.kill_own()
    }

    /// Kill the process (and anything feeding it) immediately
    pub fn kill(&self) -> Result<()> {
        let upstream = match &self.inner.upstream {
            Some(upstream) => upstream.kill(),
            None => Ok(()),
        };
        upstream.and(self.kill_own())
    }

    fn kill_own(&self) -> Result<()> {
        if self.has_exited() {
            return Ok(());
        }
        info!(program = %self.inner.program, pid = ?self.inner.pid, "killing");
        let mut state = lock(&self.inner.state);
        let sent = state.child.as_mut().map(|c| c.start_kill());
        drop(state);
        match sent {
            Some(Err(e)) => {
                if self.has_exited() {
                    Ok(())
                } else {
                    Err(e.into())
                }
            }
            _ => Ok(()),
        }
    }

    /// Wait for the process to exit
    pub async fn wait(&self) -> i32 {
        loop {
            if let Some(code) = self.exit_code() {
                return code;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }
}

impl fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessHandle")
            .field("program", &self.inner.program)
            .field("pid", &self.inner.pid)
            .finish()
    }
}

#[cfg(unix)]
fn signal_code(status: &std::process::ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status.signal().map(|s| -s).unwrap_or(-1)
}

#[cfg(not(unix))]
fn signal_code(_status: &std::process::ExitStatus) -> i32 {
    -1
}

#[cfg(unix)]
fn send_signal(pid: u32, signal: libc::c_int) -> std::io::Result<()> {
    // SAFETY: kill(2) takes plain integers
    let ret = unsafe { libc::kill(pid as libc::pid_t, signal) };
    if ret == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}

fn remove_fifo(path: Option<PathBuf>) {
    let Some(path) = path else { return };
    match std::fs::remove_file(&path) {
        Ok(()) => debug!(fifo = %path.display(), "removed named pipe"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(fifo = %path.display(), "could not remove named pipe: {}", e),
    }
}

/// Stop an upstream process whose consumer failed to start
fn abandon(upstream: &ProcessHandle) {
    warn!(program = %upstream.program(), pid = ?upstream.pid(), "consumer failed to start; killing upstream");
    if let Err(e) = upstream.kill() {
        warn!(program = %upstream.program(), "could not kill upstream: {}", e);
    }
}

#[cfg(unix)]
fn make_fifo(path: &Path) -> Result<()> {
    use std::os::unix::ffi::OsStrExt;
    let c_path = std::ffi::CString::new(path.as_os_str().as_bytes())
        .map_err(|e| Error::Io(std::io::Error::new(std::io::ErrorKind::InvalidInput, e)))?;
    // SAFETY: c_path is a valid NUL-terminated string for the duration of the call
    let ret = unsafe { libc::mkfifo(c_path.as_ptr(), 0o600) };
    if ret == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error().into())
    }
}

// =============================================================================
// Program
// =============================================================================

/// A program bound to one source and one output
pub struct Program {
    def: ProgramDef,
    progress_interval: Duration,
    source: Mutex<Option<ProgramSource>>,
    output: Mutex<Option<OutputTarget>>,
    workdir: Mutex<Option<PathBuf>>,
    progress: Mutex<Progress>,
    /// Handle of the process this program runs, once started
    pub proc: Slot<ProcessHandle>,
    /// Output lines in [`OutputMode::Collect`], resolved when output ends
    pub collected: Slot<Arc<Vec<String>>>,
}

impl Program {
    pub fn new(def: ProgramDef, progress_interval: Duration) -> Arc<Self> {
        Arc::new(Self {
            def,
            progress_interval,
            source: Mutex::new(None),
            output: Mutex::new(None),
            workdir: Mutex::new(None),
            progress: Mutex::new(Progress::default()),
            proc: Slot::new("proc"),
            collected: Slot::new("collected"),
        })
    }

    pub fn name(&self) -> &str {
        &self.def.name
    }

    pub fn def(&self) -> &ProgramDef {
        &self.def
    }

    pub fn set_source(&self, source: ProgramSource) {
        *lock(&self.source) = Some(source);
    }

    pub fn set_output(&self, output: OutputTarget) {
        *lock(&self.output) = Some(output);
    }

    pub fn set_workdir(&self, dir: PathBuf) {
        *lock(&self.workdir) = Some(dir);
    }

    pub fn output(&self) -> Option<OutputTarget> {
        lock(&self.output).clone()
    }

    /// The program feeding this one, if any
    pub fn upstream(&self) -> Option<Arc<Program>> {
        match &*lock(&self.source) {
            Some(ProgramSource::Program(up)) => Some(up.clone()),
            _ => None,
        }
    }

    /// Latest progress; a program that reports nothing shows its upstream's
    pub fn progress(&self) -> Progress {
        let own = lock(&self.progress).clone();
        if own == Progress::default() {
            if let Some(up) = self.upstream() {
                return up.progress();
            }
        }
        own
    }

    /// Start the program and any upstream program feeding it
    pub async fn run(self: &Arc<Self>, opts: &RunOptions) -> Result<ProcessHandle> {
        let handle = self.start(opts)?;
        tokio::task::yield_now().await;
        Ok(handle)
    }

    fn start(self: &Arc<Self>, opts: &RunOptions) -> Result<ProcessHandle> {
        let source = lock(&self.source)
            .clone()
            .ok_or_else(|| Error::NoSource(self.name().to_string()))?;

        let (handle, _) = match source {
            ProgramSource::Locators(locators) => {
                self.spawn(&self.def.args, &locators, opts, &[], Stdio::null(), false, None)?
            }
            ProgramSource::Program(up) => match up.def.pipe {
                PipeMode::Integrated if up.def.integrates(&self.def) => {
                    return self.start_integrated(&up, opts);
                }
                #[cfg(unix)]
                PipeMode::Fifo => {
                    let dir = lock(&up.workdir).clone().unwrap_or_else(std::env::temp_dir);
                    let fifo = dir.join(format!("{}-{}.fifo", up.name(), uuid::Uuid::new_v4()));
                    make_fifo(&fifo)?;
                    up.set_output(OutputTarget::Fifo(fifo.clone()));
                    let upstream = match up.start(opts) {
                        Ok(handle) => handle,
                        Err(e) => {
                            remove_fifo(Some(fifo));
                            return Err(e);
                        }
                    };
                    let locators = vec![fifo.display().to_string()];
                    let spawned = self.spawn(
                        &self.def.args,
                        &locators,
                        opts,
                        &[],
                        Stdio::null(),
                        false,
                        Some(upstream.clone()),
                    );
                    match spawned {
                        Ok((handle, out)) => {
                            handle.remove_fifo_on_exit(fifo);
                            (handle, out)
                        }
                        Err(e) => {
                            abandon(&upstream);
                            remove_fifo(Some(fifo));
                            return Err(e);
                        }
                    }
                }
                _ => {
                    up.set_output(OutputTarget::Stdout);
                    let up_locators = match lock(&up.source).clone() {
                        Some(ProgramSource::Locators(l)) => l,
                        _ => return Err(Error::NoSource(up.name().to_string())),
                    };
                    let (upstream, stdout) =
                        up.spawn(&up.def.args, &up_locators, opts, &[], Stdio::null(), true, None)?;
                    let stdin: Result<Stdio> = match stdout {
                        Some(out) => out.try_into().map_err(Error::from),
                        None => Ok(Stdio::null()),
                    };
                    let locators = vec!["-".to_string()];
                    let spawned = stdin.and_then(|stdin| {
                        self.spawn(&self.def.args, &locators, opts, &[], stdin, false, Some(upstream.clone()))
                    });
                    match spawned {
                        Ok(spawned) => spawned,
                        Err(e) => {
                            abandon(&upstream);
                            return Err(e);
                        }
                    }
                }
            },
        };
        Ok(handle)
    }

    /// Let the upstream program launch this one, sharing one process
    fn start_integrated(self: &Arc<Self>, up: &Arc<Program>, opts: &RunOptions) -> Result<ProcessHandle> {
        let extra = up.def.backend.integration_args(self.def.backend).unwrap_or_default();
        let locators = match lock(&up.source).clone() {
            Some(ProgramSource::Locators(l)) => l,
            _ => return Err(Error::NoSource(up.name().to_string())),
        };
        let args: Vec<String> = up
            .def
            .backend
            .integrated_args()
            .into_iter()
            .map(String::from)
            .collect();
        let (handle, _) = up.spawn(&args, &locators, opts, &extra, Stdio::null(), false, None)?;
        self.proc.set(handle.clone())?;
        info!(player = %self.name(), via = %up.name(), "player launched by upstream program");
        Ok(handle)
    }

    /// Expand argument templates for one run
    fn build_args(
        &self,
        templates: &[String],
        locators: &[String],
        opts: &RunOptions,
        extra: &[String],
    ) -> Result<Vec<String>> {
        let output = self.output();
        let outfile = match &output {
            Some(OutputTarget::Stdout) => Some("-".to_string()),
            Some(target) => target.path().map(|p| p.display().to_string()),
            None => None,
        };
        let outdir = output
            .as_ref()
            .and_then(|t| t.path())
            .and_then(|p| p.parent())
            .map(|p| p.display().to_string())
            .or_else(|| lock(&self.workdir).as_ref().map(|d| d.display().to_string()));
        let ctx = ArgContext {
            source: locators.first().cloned().unwrap_or_default(),
            outfile,
            outdir,
            listing: opts.listing.clone(),
            task_id: opts.task_id,
            task_title: opts.task_title.clone(),
        };

        let mut options = self.def.backend.option_args(opts);
        options.extend(extra.iter().cloned());
        options.extend(opts.extra_args.iter().cloned());

        let mut args = Vec::new();
        let mut placed_options = false;
        for raw in templates {
            match raw.as_str() {
                "{source}" => args.extend(locators.iter().cloned()),
                "{options}" => {
                    args.append(&mut options);
                    placed_options = true;
                }
                _ => args.push(Template::parse(raw)?.render(&ctx)?),
            }
        }
        if !placed_options {
            options.append(&mut args);
            return Ok(options);
        }
        Ok(args)
    }

    #[allow(clippy::too_many_arguments)]
    fn spawn(
        self: &Arc<Self>,
        templates: &[String],
        locators: &[String],
        opts: &RunOptions,
        extra: &[String],
        stdin: Stdio,
        pipe_stdout: bool,
        upstream: Option<ProcessHandle>,
    ) -> Result<(ProcessHandle, Option<ChildStdout>)> {
        let args = self.build_args(templates, locators, opts, extra)?;
        let watch = self.def.output != OutputMode::Ignore;

        let mut cmd = Command::new(&self.def.path);
        cmd.args(&args).stdin(stdin);
        cmd.stdout(if pipe_stdout || watch { Stdio::piped() } else { Stdio::null() });
        cmd.stderr(if watch { Stdio::piped() } else { Stdio::null() });
        if let Some(dir) = lock(&self.workdir).as_ref() {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::ProgramNotFound(self.def.path.display().to_string())
            } else {
                Error::Spawn {
                    program: self.name().to_string(),
                    source: e,
                }
            }
        })?;
        debug!(program = %self.name(), pid = ?child.id(), ?args, "spawned");

        let data = if pipe_stdout { child.stdout.take() } else { None };
        if watch {
            let (tx, rx) = mpsc::unbounded_channel();
            if let Some(out) = child.stdout.take() {
                tokio::spawn(read_lines(out, tx.clone()));
            }
            if let Some(err) = child.stderr.take() {
                tokio::spawn(read_lines(err, tx));
            }
            tokio::spawn(pump_output(self.clone(), rx));
        }

        let handle = ProcessHandle::new(self.name(), child, upstream);
        self.proc.set(handle.clone())?;
        Ok((handle, data))
    }

    /// True once the program finished its work
    pub fn is_complete(&self) -> bool {
        let Some(handle) = self.proc.get() else {
            return false;
        };
        let Some(code) = handle.exit_code() else {
            return false;
        };
        match self.def.completion {
            CompletionCheck::Exit => true,
            CompletionCheck::Destination => {
                code != 0 || self.resolved_output().is_some() || self.progress().is_complete()
            }
        }
    }

    /// True once complete with a usable output file
    ///
    /// Destination-checked programs succeed whenever their file exists,
    /// whatever they exit with; the rest also need exit 0.
    pub fn succeeded(&self) -> bool {
        if !self.is_complete() {
            return false;
        }
        match self.def.completion {
            CompletionCheck::Exit => self.exit_code() == Some(0) && self.resolved_output().is_some(),
            CompletionCheck::Destination => self.resolved_output().is_some(),
        }
    }

    pub fn exit_code(&self) -> Option<i32> {
        self.proc.get().and_then(|h| h.exit_code())
    }

    /// The file this program produced, if it exists
    ///
    /// Falls back to the destination reported in output, then to the single
    /// file left in the work directory.
    pub fn resolved_output(&self) -> Option<PathBuf> {
        if let Some(path) = self.output().as_ref().and_then(|t| match t {
            OutputTarget::File(p) => Some(p.clone()),
            _ => None,
        }) {
            if path_exists(&path) {
                return Some(path);
            }
        }

        let reported = lock(&self.progress).destination.clone();
        if let Some(path) = reported {
            let path = match lock(&self.workdir).as_ref() {
                Some(dir) if path.is_relative() => dir.join(path),
                _ => path,
            };
            if path.is_file() {
                return Some(path);
            }
        }

        let dir = lock(&self.workdir).clone()?;
        let files: Vec<PathBuf> = std::fs::read_dir(dir)
            .ok()?
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
            .map(|e| e.path())
            .collect();
        match files.as_slice() {
            [only] => Some(only.clone()),
            _ => None,
        }
    }

    /// Refresh progress from things output does not report
    pub fn update_progress(&self) {
        if let Some(up) = self.upstream() {
            up.update_progress();
        }
        let written = match self.output() {
            Some(OutputTarget::File(path)) => std::fs::metadata(&path).ok().map(|m| m.len()),
            _ => None,
        };
        let exit = self.exit_code();

        let mut progress = lock(&self.progress);
        if let Some(size) = written {
            if self.def.parser().is_none() || progress.downloaded.is_none() {
                progress.downloaded = Some(size);
            }
        }
        if let Some(code) = exit {
            progress.status = Some(format!("exited ({})", code));
        }
        progress.recompute();
    }

    /// Collected output lines; waits for the program's output to end
    pub async fn collected_output(&self) -> Option<Arc<Vec<String>>> {
        self.collected.wait().await
    }
}

impl fmt::Debug for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Program")
            .field("name", &self.def.name)
            .field("type", &self.def.program_type)
            .field("path", &self.def.path)
            .field("proc", &self.proc)
            .finish()
    }
}

// =============================================================================
// Output readers
// =============================================================================

/// Split a stream on `\r` and `\n`; progress bars redraw with bare `\r`
async fn read_lines<R: AsyncRead + Unpin>(mut reader: R, tx: mpsc::UnboundedSender<String>) {
    let mut buf = [0u8; 4096];
    let mut line = Vec::new();
    loop {
        match reader.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                for &b in &buf[..n] {
                    if b == b'\n' || b == b'\r' {
                        if !line.is_empty() {
                            let _ = tx.send(String::from_utf8_lossy(&line).into_owned());
                            line.clear();
                        }
                    } else {
                        line.push(b);
                    }
                }
            }
        }
    }
    if !line.is_empty() {
        let _ = tx.send(String::from_utf8_lossy(&line).into_owned());
    }
}

/// Fold lines into the program's progress, publishing at most once per interval
async fn pump_output(program: Arc<Program>, mut rx: mpsc::UnboundedReceiver<String>) {
    let parser = program.def.parser();
    let mode = program.def.output;
    let interval = program.progress_interval;
    let mut local = lock(&program.progress).clone();
    let mut collected = Vec::new();
    let mut last_publish: Option<Instant> = None;

    while let Some(line) = rx.recv().await {
        match mode {
            OutputMode::Collect => collected.push(line),
            OutputMode::Watch => {
                let changed = match &parser {
                    Some(parser) => parser.parse_line(&line, &mut local),
                    None => {
                        local.status = Some(line);
                        true
                    }
                };
                let due = last_publish.map(|t| t.elapsed() >= interval).unwrap_or(true);
                if changed && due {
                    local.recompute();
                    *lock(&program.progress) = local.clone();
                    last_publish = Some(Instant::now());
                }
            }
            OutputMode::Ignore => {}
        }
    }

    if mode == OutputMode::Watch {
        local.recompute();
        *lock(&program.progress) = local;
    }
    let _ = program.collected.set(Arc::new(collected));
}

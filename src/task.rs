//! Tasks: queued units of play/download work
//!
//! A [`Task`] is built by a provider, handed to the
//! [`TaskManager`](crate::manager::TaskManager) and shared (`Arc<Task>`) with
//! whoever wants to await it. Its three result slots resolve in order:
//! `program` once a concrete program is chosen, `proc` once the OS process
//! exists, `result` once the task is finished for good.

use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use tokio::sync::watch;

use crate::error::{Error, Result};
use crate::models::{MediaListing, MediaSource, Progress};
use crate::program::{ProcessHandle, Program, ProgramSpec};

/// Task identifier, assigned by the task manager at enqueue time
pub type TaskId = u64;

/// Final value of a task: the exit code of its last process, or the error
/// that kept it from running
pub type TaskOutcome = std::result::Result<i32, Arc<Error>>;

/// Lock a mutex, recovering the data if a previous holder panicked
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// =============================================================================
// Single-assignment slot
// =============================================================================

/// A value that is set at most once and can be awaited by any number of readers
///
/// Setting an already-resolved slot fails with [`Error::AlreadySet`] and leaves
/// the first value in place. [`Slot::reset`] empties the slot again; the task
/// manager does that between postprocessing stages.
pub struct Slot<T> {
    name: &'static str,
    tx: watch::Sender<Option<T>>,
}

impl<T: Clone> Slot<T> {
    pub fn new(name: &'static str) -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { name, tx }
    }

    /// Resolve the slot
    pub fn set(&self, value: T) -> Result<()> {
        let mut value = Some(value);
        let stored = self.tx.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = value.take();
            true
        });
        if stored {
            Ok(())
        } else {
            Err(Error::AlreadySet(self.name))
        }
    }

    /// Current value, if resolved
    pub fn get(&self) -> Option<T> {
        self.tx.borrow().clone()
    }

    pub fn is_set(&self) -> bool {
        self.tx.borrow().is_some()
    }

    /// Wait until the slot is resolved
    pub async fn wait(&self) -> Option<T> {
        let mut rx = self.tx.subscribe();
        let value = rx.wait_for(Option::is_some).await.ok()?;
        value.clone()
    }

    /// Empty the slot, returning what it held
    pub fn reset(&self) -> Option<T> {
        let mut old = None;
        self.tx.send_modify(|current| old = current.take());
        old
    }
}

impl<T> fmt::Debug for Slot<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Slot")
            .field("name", &self.name)
            .field("set", &self.tx.borrow().is_some())
            .finish()
    }
}

// =============================================================================
// Task options
// =============================================================================

/// Provider-specific parameters forwarded to programs
#[derive(Debug, Clone, Default, Serialize)]
pub struct TaskOptions {
    /// Maximum vertical resolution, e.g. 720
    pub resolution: Option<u32>,
    /// Backend-specific format selector
    pub format: Option<String>,
    /// Extra arguments appended to the program command line
    pub args: Vec<String>,
    /// Free-form values for custom programs
    pub kwargs: BTreeMap<String, String>,
}

// =============================================================================
// Task kinds
// =============================================================================

/// Play-specific state
#[derive(Debug)]
pub struct PlayTask {
    pub player: ProgramSpec,
    /// Downloader to chain in front of the player, if one is required
    pub downloader: Option<ProgramSpec>,
}

/// Download-specific state
///
/// `stage_results` only grows. The current stage index equals its length:
/// the base download is stage 0, the first postprocessor stage 1, and so on.
#[derive(Debug)]
pub struct DownloadTask {
    pub downloader: ProgramSpec,
    output_template: Option<String>,
    dest: Mutex<Option<PathBuf>>,
    postprocessors: Mutex<VecDeque<ProgramSpec>>,
    stage_results: Mutex<Vec<PathBuf>>,
    total_stages: usize,
    workdir: Mutex<Option<PathBuf>>,
    stage_outfile: Mutex<Option<PathBuf>>,
    finalized: AtomicBool,
}

impl DownloadTask {
    fn new(downloader: ProgramSpec) -> Self {
        Self {
            downloader,
            output_template: None,
            dest: Mutex::new(None),
            postprocessors: Mutex::new(VecDeque::new()),
            stage_results: Mutex::new(Vec::new()),
            total_stages: 1,
            workdir: Mutex::new(None),
            stage_outfile: Mutex::new(None),
            finalized: AtomicBool::new(false),
        }
    }

    pub fn output_template(&self) -> Option<&str> {
        self.output_template.as_deref()
    }

    /// Final destination path, once known
    pub fn dest(&self) -> Option<PathBuf> {
        lock(&self.dest).clone()
    }

    pub fn set_dest(&self, dest: PathBuf) {
        *lock(&self.dest) = Some(dest);
    }

    /// Postprocessors still to run, front first
    pub fn postprocessors(&self) -> Vec<ProgramSpec> {
        lock(&self.postprocessors).iter().cloned().collect()
    }

    pub fn has_postprocessors(&self) -> bool {
        !lock(&self.postprocessors).is_empty()
    }

    /// Next postprocessor, left in the list until its stage succeeds
    pub fn next_postprocessor(&self) -> Option<ProgramSpec> {
        lock(&self.postprocessors).front().cloned()
    }

    /// Drop the postprocessor whose stage just completed
    pub(crate) fn pop_postprocessor(&self) -> Option<ProgramSpec> {
        lock(&self.postprocessors).pop_front()
    }

    /// Abandon the remaining chain
    pub(crate) fn clear_postprocessors(&self) -> usize {
        let mut pps = lock(&self.postprocessors);
        let dropped = pps.len();
        pps.clear();
        dropped
    }

    /// Intermediate and final outputs produced so far
    pub fn stage_results(&self) -> Vec<PathBuf> {
        lock(&self.stage_results).clone()
    }

    /// Index of the stage currently running or next to run
    pub fn stage_index(&self) -> usize {
        lock(&self.stage_results).len()
    }

    /// Number of stages the task started with (download + postprocessors)
    pub fn total_stages(&self) -> usize {
        self.total_stages
    }

    pub(crate) fn push_stage_result(&self, path: PathBuf) -> usize {
        let mut results = lock(&self.stage_results);
        results.push(path);
        results.len()
    }

    pub fn last_stage_result(&self) -> Option<PathBuf> {
        lock(&self.stage_results).last().cloned()
    }

    /// Private working directory for intermediate files
    pub fn workdir(&self) -> Option<PathBuf> {
        lock(&self.workdir).clone()
    }

    pub(crate) fn set_workdir(&self, dir: PathBuf) {
        *lock(&self.workdir) = Some(dir);
    }

    /// Output path the in-flight stage is expected to produce
    pub fn stage_outfile(&self) -> Option<PathBuf> {
        lock(&self.stage_outfile).clone()
    }

    pub(crate) fn set_stage_outfile(&self, path: Option<PathBuf>) {
        *lock(&self.stage_outfile) = path;
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized.load(Ordering::SeqCst)
    }

    /// Mark finalized; returns false if it already was
    pub(crate) fn mark_finalized(&self) -> bool {
        !self.finalized.swap(true, Ordering::SeqCst)
    }
}

/// What a task does
#[derive(Debug)]
pub enum TaskKind {
    Play(PlayTask),
    Download(DownloadTask),
}

// =============================================================================
// Task
// =============================================================================

/// One unit of work owned by the task manager
#[derive(Debug)]
pub struct Task {
    id: OnceLock<TaskId>,
    pub title: String,
    pub sources: Vec<MediaSource>,
    pub listing: Option<MediaListing>,
    pub options: TaskOptions,
    pub program: Slot<Arc<Program>>,
    pub proc: Slot<ProcessHandle>,
    pub result: Slot<TaskOutcome>,
    kind: TaskKind,
}

impl Task {
    fn new(title: impl Into<String>, sources: Vec<MediaSource>, kind: TaskKind) -> Self {
        let mut sources = sources;
        sources.sort_by_key(|s| s.rank);
        Self {
            id: OnceLock::new(),
            title: title.into(),
            sources,
            listing: None,
            options: TaskOptions::default(),
            program: Slot::new("program"),
            proc: Slot::new("proc"),
            result: Slot::new("result"),
            kind,
        }
    }

    /// A play task using the default player
    pub fn play(title: impl Into<String>, sources: Vec<MediaSource>) -> Self {
        Self::new(
            title,
            sources,
            TaskKind::Play(PlayTask {
                player: ProgramSpec::Any,
                downloader: None,
            }),
        )
    }

    /// A download task using the default downloader
    pub fn download(title: impl Into<String>, sources: Vec<MediaSource>) -> Self {
        Self::new(
            title,
            sources,
            TaskKind::Download(DownloadTask::new(ProgramSpec::Any)),
        )
    }

    pub fn with_listing(mut self, listing: MediaListing) -> Self {
        self.listing = Some(listing);
        self
    }

    pub fn with_options(mut self, options: TaskOptions) -> Self {
        self.options = options;
        self
    }

    /// Select the player (play tasks only)
    pub fn with_player(mut self, spec: ProgramSpec) -> Self {
        if let TaskKind::Play(play) = &mut self.kind {
            play.player = spec;
        }
        self
    }

    /// Select the downloader; for play tasks this chains it in front of the player
    pub fn with_downloader(mut self, spec: ProgramSpec) -> Self {
        match &mut self.kind {
            TaskKind::Play(play) => play.downloader = Some(spec),
            TaskKind::Download(dl) => dl.downloader = spec,
        }
        self
    }

    /// Final destination (download tasks only)
    pub fn with_dest(self, dest: impl Into<PathBuf>) -> Self {
        if let TaskKind::Download(dl) = &self.kind {
            dl.set_dest(dest.into());
        }
        self
    }

    /// Override the file name template (download tasks only)
    pub fn with_output_template(mut self, template: impl Into<String>) -> Self {
        if let TaskKind::Download(dl) = &mut self.kind {
            dl.output_template = Some(template.into());
        }
        self
    }

    /// Postprocessor chain, applied front to back (download tasks only)
    pub fn with_postprocessors(mut self, specs: Vec<ProgramSpec>) -> Self {
        if let TaskKind::Download(dl) = &mut self.kind {
            dl.total_stages = specs.len() + 1;
            *lock(&dl.postprocessors) = specs.into();
        }
        self
    }

    /// Id assigned at enqueue time; 0 before that
    pub fn id(&self) -> TaskId {
        self.id.get().copied().unwrap_or(0)
    }

    pub(crate) fn assign_id(&self, id: TaskId) -> Result<()> {
        self.id
            .set(id)
            .map_err(|_| Error::AlreadyQueued(self.id()))
    }

    pub fn kind(&self) -> &TaskKind {
        &self.kind
    }

    pub fn is_play(&self) -> bool {
        matches!(self.kind, TaskKind::Play(_))
    }

    pub fn as_download(&self) -> Option<&DownloadTask> {
        match &self.kind {
            TaskKind::Download(dl) => Some(dl),
            TaskKind::Play(_) => None,
        }
    }

    pub fn as_play(&self) -> Option<&PlayTask> {
        match &self.kind {
            TaskKind::Play(play) => Some(play),
            TaskKind::Download(_) => None,
        }
    }

    /// First source, by rank
    pub fn primary_source(&self) -> Option<&MediaSource> {
        self.sources.first()
    }

    /// Resolve the result slot, logging instead of overwriting if it was
    /// already resolved. Returns true if this call stored the value.
    pub fn resolve(&self, outcome: TaskOutcome) -> bool {
        match self.result.set(outcome) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(task_id = self.id(), "{}; keeping the first value", e);
                false
            }
        }
    }

    /// Resolve the result slot with an error
    pub fn fail(&self, error: Error) -> bool {
        tracing::warn!(task_id = self.id(), error = %error, "task failed");
        self.resolve(Err(Arc::new(error)))
    }

    /// Reset `program` and `proc` before the next stage starts
    pub(crate) fn reset_program(&self) {
        self.program.reset();
        self.proc.reset();
    }

    /// Progress of the current program, if one is running
    pub fn progress(&self) -> Option<Progress> {
        self.program.get().map(|p| p.progress())
    }

    /// Wait for the task to finish
    pub async fn wait(&self) -> Option<TaskOutcome> {
        self.result.wait().await
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = if self.is_play() { "play" } else { "download" };
        write!(f, "#{} {} '{}'", self.id(), kind, self.title)
    }
}

// =============================================================================
// Summaries
// =============================================================================

/// Read-only view of a task for display
#[derive(Debug, Clone, Serialize)]
pub struct TaskSummary {
    pub id: TaskId,
    pub title: String,
    pub kind: &'static str,
    pub program: Option<String>,
    pub pid: Option<u32>,
    pub stage: Option<usize>,
    pub stages: Option<usize>,
    pub dest: Option<PathBuf>,
    pub progress: Option<Progress>,
    pub result: Option<String>,
}

impl From<&Task> for TaskSummary {
    fn from(task: &Task) -> Self {
        let program = task.program.get();
        let download = task.as_download();
        Self {
            id: task.id(),
            title: task.title.clone(),
            kind: if task.is_play() { "play" } else { "download" },
            program: program.as_ref().map(|p| p.name().to_string()),
            pid: task.proc.get().and_then(|h| h.pid()),
            stage: download.map(|d| d.stage_index()),
            stages: download.map(|d| d.total_stages()),
            dest: download.and_then(|d| d.dest()),
            progress: program.map(|p| p.progress()),
            result: task.result.get().map(|r| describe_outcome(&r)),
        }
    }
}

/// Human-readable outcome, e.g. "exit 0" or "error: ..."
pub fn describe_outcome(outcome: &TaskOutcome) -> String {
    match outcome {
        Ok(code) => format!("exit {}", code),
        Err(e) => format!("error: {}", e),
    }
}

/// True if `path` exists as a file or directory
pub(crate) fn path_exists(path: &Path) -> bool {
    path.symlink_metadata().is_ok()
}

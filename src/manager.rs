//! Task manager
//!
//! Owns every task's lifecycle. Tasks live in exactly one bucket at a time:
//!
//! ```text
//! play:     to_play ──► playing ──► done
//! download: to_download ──► active ──► postprocessing ──► done
//!                              └──────────────────────────► done
//! ```
//!
//! Two periodic loops drive the buckets. The worker starts pending plays
//! (always) and pending downloads (while fewer than `max_concurrent_tasks`
//! are active). The poller notices finished processes, runs postprocessing
//! stages and finalizes downloads. Both loops are plain methods
//! ([`TaskManager::worker_tick`], [`TaskManager::poll_tick`]) so callers and
//! tests can step the state machine by hand.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use unicode_normalization::UnicodeNormalization;

use crate::error::{Error, Result};
use crate::program::{
    downloader, player, postprocessor, LaunchSettings, ProgramRegistry, ProgramSpec,
};
use crate::task::{lock, path_exists, Task, TaskId, TaskSummary};

/// Default cap on concurrently running downloads
pub const DEFAULT_MAX_CONCURRENT_TASKS: usize = 20;

// =============================================================================
// Settings
// =============================================================================

/// Unicode normalization applied to final file names
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Normalization {
    #[default]
    None,
    Nfc,
    Nfd,
    Nfkc,
    Nfkd,
}

impl Normalization {
    pub fn apply(&self, name: &str) -> String {
        match self {
            Normalization::None => name.to_string(),
            Normalization::Nfc => name.nfc().collect(),
            Normalization::Nfd => name.nfd().collect(),
            Normalization::Nfkc => name.nfkc().collect(),
            Normalization::Nfkd => name.nfkd().collect(),
        }
    }
}

/// Runtime settings for a [`TaskManager`]
#[derive(Debug, Clone)]
pub struct ManagerSettings {
    pub max_concurrent_tasks: usize,
    /// Worker loop period
    pub tick_interval: Duration,
    /// Poller loop period
    pub poll_interval: Duration,
    pub launch: LaunchSettings,
    pub normalization: Normalization,
    /// Player used when a task does not name one
    pub player: ProgramSpec,
    /// Downloader used when a task does not name one
    pub downloader: ProgramSpec,
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: DEFAULT_MAX_CONCURRENT_TASKS,
            tick_interval: Duration::from_secs(1),
            poll_interval: Duration::from_secs(1),
            launch: LaunchSettings::default(),
            normalization: Normalization::None,
            player: ProgramSpec::Any,
            downloader: ProgramSpec::Any,
        }
    }
}

// =============================================================================
// Buckets
// =============================================================================

/// Lifecycle position of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Bucket {
    ToPlay,
    Playing,
    ToDownload,
    Active,
    Postprocessing,
    Done,
}

impl Bucket {
    pub const ALL: [Bucket; 6] = [
        Bucket::ToPlay,
        Bucket::Playing,
        Bucket::ToDownload,
        Bucket::Active,
        Bucket::Postprocessing,
        Bucket::Done,
    ];
}

impl fmt::Display for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Bucket::ToPlay => "queued (play)",
            Bucket::Playing => "playing",
            Bucket::ToDownload => "queued",
            Bucket::Active => "downloading",
            Bucket::Postprocessing => "postprocessing",
            Bucket::Done => "done",
        };
        write!(f, "{}", name)
    }
}

#[derive(Default)]
struct Buckets {
    to_play: VecDeque<Arc<Task>>,
    playing: Vec<Arc<Task>>,
    to_download: VecDeque<Arc<Task>>,
    active: Vec<Arc<Task>>,
    postprocessing: Vec<Arc<Task>>,
    done: Vec<Arc<Task>>,
}

impl Buckets {
    fn list(&self, bucket: Bucket) -> Vec<Arc<Task>> {
        match bucket {
            Bucket::ToPlay => self.to_play.iter().cloned().collect(),
            Bucket::Playing => self.playing.clone(),
            Bucket::ToDownload => self.to_download.iter().cloned().collect(),
            Bucket::Active => self.active.clone(),
            Bucket::Postprocessing => self.postprocessing.clone(),
            Bucket::Done => self.done.clone(),
        }
    }

    fn locate(&self, id: TaskId) -> Option<(Bucket, Arc<Task>)> {
        Bucket::ALL.into_iter().find_map(|b| {
            self.list(b)
                .into_iter()
                .find(|t| t.id() == id)
                .map(|t| (b, t))
        })
    }

    fn remove(&mut self, bucket: Bucket, id: TaskId) -> Option<Arc<Task>> {
        match bucket {
            Bucket::ToPlay => self.to_play.remove_id(id),
            Bucket::Playing => self.playing.remove_id(id),
            Bucket::ToDownload => self.to_download.remove_id(id),
            Bucket::Active => self.active.remove_id(id),
            Bucket::Postprocessing => self.postprocessing.remove_id(id),
            Bucket::Done => self.done.remove_id(id),
        }
    }

    fn push(&mut self, bucket: Bucket, task: Arc<Task>) {
        match bucket {
            Bucket::ToPlay => self.to_play.push_back(task),
            Bucket::Playing => self.playing.push(task),
            Bucket::ToDownload => self.to_download.push_back(task),
            Bucket::Active => self.active.push(task),
            Bucket::Postprocessing => self.postprocessing.push(task),
            Bucket::Done => self.done.push(task),
        }
    }

    /// Unfinished download already writing to `dest`
    fn claimant(&self, dest: &Path) -> Option<TaskId> {
        self.to_download
            .iter()
            .chain(&self.active)
            .chain(&self.postprocessing)
            .find(|t| t.as_download().and_then(|d| d.dest()).as_deref() == Some(dest))
            .map(|t| t.id())
    }

    fn is_idle(&self) -> bool {
        self.to_play.is_empty()
            && self.playing.is_empty()
            && self.to_download.is_empty()
            && self.active.is_empty()
            && self.postprocessing.is_empty()
    }
}

trait RemoveById {
    fn remove_id(&mut self, id: TaskId) -> Option<Arc<Task>>;
}

impl RemoveById for Vec<Arc<Task>> {
    fn remove_id(&mut self, id: TaskId) -> Option<Arc<Task>> {
        let pos = self.iter().position(|t| t.id() == id)?;
        Some(self.remove(pos))
    }
}

impl RemoveById for VecDeque<Arc<Task>> {
    fn remove_id(&mut self, id: TaskId) -> Option<Arc<Task>> {
        let pos = self.iter().position(|t| t.id() == id)?;
        self.remove(pos)
    }
}

/// Point-in-time view of all buckets
#[derive(Debug, Clone, Serialize)]
pub struct ManagerSnapshot {
    pub max_concurrent_tasks: usize,
    pub to_play: Vec<TaskSummary>,
    pub playing: Vec<TaskSummary>,
    pub to_download: Vec<TaskSummary>,
    pub active: Vec<TaskSummary>,
    pub postprocessing: Vec<TaskSummary>,
    pub done: Vec<TaskSummary>,
}

impl ManagerSnapshot {
    /// Tasks in display order, tagged with their bucket
    pub fn rows(&self) -> Vec<(Bucket, &TaskSummary)> {
        let lists = [
            (Bucket::Playing, &self.playing),
            (Bucket::ToPlay, &self.to_play),
            (Bucket::Active, &self.active),
            (Bucket::Postprocessing, &self.postprocessing),
            (Bucket::ToDownload, &self.to_download),
            (Bucket::Done, &self.done),
        ];
        lists
            .into_iter()
            .flat_map(|(b, list)| list.iter().map(move |t| (b, t)))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.to_play.len()
            + self.playing.len()
            + self.to_download.len()
            + self.active.len()
            + self.postprocessing.len()
            + self.done.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// =============================================================================
// Task manager
// =============================================================================

struct Inner {
    registry: Arc<ProgramRegistry>,
    settings: ManagerSettings,
    max_concurrent: AtomicUsize,
    next_id: AtomicU64,
    buckets: Mutex<Buckets>,
    loops: Mutex<Vec<JoinHandle<()>>>,
    wake: Notify,
}

/// Scheduler for play and download tasks. Cheap to clone.
#[derive(Clone)]
pub struct TaskManager {
    inner: Arc<Inner>,
}

impl TaskManager {
    pub fn new(registry: Arc<ProgramRegistry>, settings: ManagerSettings) -> Self {
        let max = settings.max_concurrent_tasks;
        Self {
            inner: Arc::new(Inner {
                registry,
                settings,
                max_concurrent: AtomicUsize::new(max),
                next_id: AtomicU64::new(1),
                buckets: Mutex::new(Buckets::default()),
                loops: Mutex::new(Vec::new()),
                wake: Notify::new(),
            }),
        }
    }

    pub fn registry(&self) -> &ProgramRegistry {
        &self.inner.registry
    }

    pub fn settings(&self) -> &ManagerSettings {
        &self.inner.settings
    }

    pub fn max_concurrent_tasks(&self) -> usize {
        self.inner.max_concurrent.load(Ordering::SeqCst)
    }

    /// Change the download cap; 0 pauses new downloads. Running ones are untouched.
    pub fn set_max_concurrent_tasks(&self, max: usize) {
        let old = self.inner.max_concurrent.swap(max, Ordering::SeqCst);
        if old != max {
            info!(old, new = max, "max concurrent tasks changed");
            self.inner.wake.notify_one();
        }
    }

    fn assign_id(&self, task: &Task) -> Result<TaskId> {
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        task.assign_id(id)?;
        Ok(id)
    }

    // -------------------------------------------------------------------------
    // Enqueue
    // -------------------------------------------------------------------------

    /// Queue a play task
    pub fn play(&self, task: impl Into<Arc<Task>>) -> Result<Arc<Task>> {
        let task = task.into();
        if !task.is_play() {
            return Err(Error::Config(format!("'{}' is not a play task", task.title)));
        }
        let id = self.assign_id(&task)?;
        lock(&self.inner.buckets).to_play.push_back(task.clone());
        info!(task_id = id, title = %task.title, "play queued");
        self.inner.wake.notify_one();
        Ok(task)
    }

    /// Queue a download task
    ///
    /// The destination is resolved now. An existing destination, or one an
    /// unfinished download already writes to, fails the task (and resolves
    /// its result) before it is queued.
    pub fn download(&self, task: impl Into<Arc<Task>>) -> Result<Arc<Task>> {
        let task = task.into();
        let dl = task
            .as_download()
            .ok_or_else(|| Error::Config(format!("'{}' is not a download task", task.title)))?;
        let id = self.assign_id(&task)?;
        let dest = match downloader::destination(&task, &self.inner.settings.launch) {
            Ok(dest) => dest,
            Err(e) => {
                task.resolve(Err(Arc::new(e.duplicate())));
                return Err(e);
            }
        };
        if path_exists(&dest) {
            warn!(task_id = id, dest = %dest.display(), "destination exists");
            task.resolve(Err(Arc::new(Error::DestinationExists(dest.clone()))));
            return Err(Error::DestinationExists(dest));
        }

        {
            let mut buckets = lock(&self.inner.buckets);
            let claimant = buckets.claimant(&dest);
            if let Some(owner) = claimant {
                drop(buckets);
                warn!(task_id = id, owner, dest = %dest.display(), "destination claimed by another task");
                let err = Error::DestinationClaimed { dest, task: owner };
                task.resolve(Err(Arc::new(err.duplicate())));
                return Err(err);
            }
            dl.set_dest(dest.clone());
            buckets.to_download.push_back(task.clone());
        }
        info!(task_id = id, title = %task.title, dest = %dest.display(), "download queued");
        self.inner.wake.notify_one();
        Ok(task)
    }

    // -------------------------------------------------------------------------
    // Inspection and control
    // -------------------------------------------------------------------------

    pub fn find(&self, id: TaskId) -> Option<Arc<Task>> {
        lock(&self.inner.buckets).locate(id).map(|(_, t)| t)
    }

    pub fn bucket_of(&self, id: TaskId) -> Option<Bucket> {
        lock(&self.inner.buckets).locate(id).map(|(b, _)| b)
    }

    pub fn tasks(&self, bucket: Bucket) -> Vec<Arc<Task>> {
        lock(&self.inner.buckets).list(bucket)
    }

    pub fn snapshot(&self) -> ManagerSnapshot {
        let buckets = lock(&self.inner.buckets);
        let summarize = |b: Bucket| -> Vec<TaskSummary> {
            buckets.list(b).iter().map(|t| TaskSummary::from(t.as_ref())).collect()
        };
        ManagerSnapshot {
            max_concurrent_tasks: self.max_concurrent_tasks(),
            to_play: summarize(Bucket::ToPlay),
            playing: summarize(Bucket::Playing),
            to_download: summarize(Bucket::ToDownload),
            active: summarize(Bucket::Active),
            postprocessing: summarize(Bucket::Postprocessing),
            done: summarize(Bucket::Done),
        }
    }

    /// True when nothing is queued or running
    pub fn is_idle(&self) -> bool {
        lock(&self.inner.buckets).is_idle()
    }

    /// Remove a task that has not started yet
    pub fn cancel(&self, id: TaskId) -> Result<Arc<Task>> {
        let task = {
            let mut buckets = lock(&self.inner.buckets);
            buckets
                .remove(Bucket::ToPlay, id)
                .or_else(|| buckets.remove(Bucket::ToDownload, id))
        }
        .ok_or(Error::UnknownTask(id))?;
        task.resolve(Err(Arc::new(Error::Cancelled(id))));
        info!(task_id = id, "cancelled");
        Ok(task)
    }

    /// Send SIGTERM to a running task's process
    pub fn terminate(&self, id: TaskId) -> Result<()> {
        self.running_handle(id)?.terminate()
    }

    /// Send SIGKILL to a running task's process
    pub fn kill(&self, id: TaskId) -> Result<()> {
        self.running_handle(id)?.kill()
    }

    fn running_handle(&self, id: TaskId) -> Result<crate::program::ProcessHandle> {
        let (bucket, task) = lock(&self.inner.buckets)
            .locate(id)
            .ok_or(Error::UnknownTask(id))?;
        match bucket {
            Bucket::Playing | Bucket::Active | Bucket::Postprocessing => {
                task.proc.get().ok_or(Error::UnknownTask(id))
            }
            _ => Err(Error::UnknownTask(id)),
        }
    }

    // -------------------------------------------------------------------------
    // Worker
    // -------------------------------------------------------------------------

    /// Start pending plays, then admit downloads up to the cap
    pub async fn worker_tick(&self) -> Result<()> {
        let plays: Vec<Arc<Task>> = {
            let mut buckets = lock(&self.inner.buckets);
            let plays: Vec<_> = buckets.to_play.drain(..).collect();
            buckets.playing.extend(plays.iter().cloned());
            plays
        };
        for task in plays {
            self.start_play(&task).await;
        }

        loop {
            let next = {
                let mut buckets = lock(&self.inner.buckets);
                if buckets.active.len() >= self.max_concurrent_tasks() {
                    None
                } else {
                    let task = buckets.to_download.pop_front();
                    if let Some(t) = &task {
                        buckets.active.push(t.clone());
                    }
                    task
                }
            };
            let Some(task) = next else { break };
            self.start_download(&task).await;
        }
        Ok(())
    }

    async fn start_play(&self, task: &Arc<Task>) {
        let Some(play) = task.as_play() else { return };
        let player_spec = match &play.player {
            ProgramSpec::Any => &self.inner.settings.player,
            spec => spec,
        };
        let result = player::play(
            &self.inner.registry,
            &self.inner.settings.launch,
            task,
            player_spec,
            play.downloader.as_ref(),
        )
        .await;
        if let Err(e) = result {
            error!(task_id = task.id(), "failed to start playback: {}", e);
            task.fail(e);
            self.transfer(task.id(), Bucket::Playing, Bucket::Done);
        }
    }

    async fn start_download(&self, task: &Arc<Task>) {
        let Some(dl) = task.as_download() else { return };
        let spec = match &dl.downloader {
            ProgramSpec::Any => &self.inner.settings.downloader,
            spec => spec,
        };
        let result = downloader::download(&self.inner.registry, &self.inner.settings.launch, task, spec).await;
        if let Err(e) = result {
            error!(task_id = task.id(), "failed to start download: {}", e);
            task.fail(e);
            dl.clear_postprocessors();
            remove_workdir(task);
            self.transfer(task.id(), Bucket::Active, Bucket::Done);
        }
    }

    fn transfer(&self, id: TaskId, from: Bucket, to: Bucket) {
        let mut buckets = lock(&self.inner.buckets);
        if let Some(task) = buckets.remove(from, id) {
            debug!(task_id = id, %from, %to, "task moved");
            buckets.push(to, task);
        }
    }

    // -------------------------------------------------------------------------
    // Poller
    // -------------------------------------------------------------------------

    /// Retire finished plays, advance downloads and refresh progress
    pub async fn poll_tick(&self) -> Result<()> {
        self.poll_playing();
        self.poll_active();
        self.poll_postprocessing().await;
        self.refresh_progress();
        Ok(())
    }

    fn poll_playing(&self) {
        for task in self.tasks(Bucket::Playing) {
            let exit = task.proc.get().and_then(|h| h.exit_code());
            if exit.is_none() && !task.result.is_set() {
                continue;
            }
            if let Some(code) = exit {
                if !task.result.is_set() {
                    task.resolve(Ok(code));
                }
                info!(task_id = task.id(), code, "playback finished");
            }
            self.transfer(task.id(), Bucket::Playing, Bucket::Done);
        }
    }

    fn poll_active(&self) {
        for task in self.tasks(Bucket::Active) {
            let Some(dl) = task.as_download() else { continue };
            let Some(program) = task.program.get() else { continue };
            if !program.is_complete() {
                continue;
            }

            let code = program.exit_code().unwrap_or(-1);
            let output = program.resolved_output();
            let succeeded = program.succeeded();
            dl.set_stage_outfile(None);
            match &output {
                Some(path) if succeeded => {
                    dl.push_stage_result(path.clone());
                }
                Some(_) => {}
                None => warn!(task_id = task.id(), "download produced no output file"),
            }

            if !succeeded {
                let skipped = dl.clear_postprocessors();
                warn!(task_id = task.id(), code, skipped, "download failed; skipping postprocessing");
            }

            if dl.has_postprocessors() {
                info!(task_id = task.id(), code, "download finished; postprocessing");
                self.transfer(task.id(), Bucket::Active, Bucket::Postprocessing);
            } else {
                info!(task_id = task.id(), code, "download finished");
                if let Err(e) = self.finalize(&task) {
                    error!(task_id = task.id(), "finalize failed: {}", e);
                }
                self.transfer(task.id(), Bucket::Active, Bucket::Done);
            }
        }
    }

    async fn poll_postprocessing(&self) {
        for task in self.tasks(Bucket::Postprocessing) {
            let Some(dl) = task.as_download() else { continue };

            if let Some(outfile) = dl.stage_outfile() {
                let Some(program) = task.program.get() else { continue };
                if !program.is_complete() {
                    continue;
                }
                let code = program.exit_code().unwrap_or(-1);
                dl.set_stage_outfile(None);
                if path_exists(&outfile) {
                    let stage = dl.push_stage_result(outfile);
                    dl.pop_postprocessor();
                    info!(task_id = task.id(), stage, code, "postprocessing stage finished");
                } else {
                    let skipped = dl.clear_postprocessors();
                    warn!(
                        task_id = task.id(),
                        code,
                        skipped,
                        "postprocessor produced no output; keeping last good result"
                    );
                }
            }

            if dl.has_postprocessors() {
                self.start_stage(&task).await;
            } else {
                if let Err(e) = self.finalize(&task) {
                    error!(task_id = task.id(), "finalize failed: {}", e);
                }
                self.transfer(task.id(), Bucket::Postprocessing, Bucket::Done);
            }
        }
    }

    async fn start_stage(&self, task: &Arc<Task>) {
        let Some(dl) = task.as_download() else { return };
        let Some(spec) = dl.next_postprocessor() else { return };

        let last = dl.last_stage_result();
        let infile: Vec<String> = match &last {
            Some(path) => vec![path.display().to_string()],
            None => task.sources.iter().map(|s| s.locator.clone()).collect(),
        };
        let outfile = match (dl.postprocessors().len(), dl.dest(), dl.workdir()) {
            (1, Some(dest), _) => dest,
            (_, dest, Some(workdir)) => {
                let reference = last.or(dest).unwrap_or_else(|| workdir.join("media"));
                postprocessor::stage_path(&workdir, dl.stage_index(), &reference, None)
            }
            (_, Some(dest), None) => dest,
            (_, None, None) => {
                task.fail(Error::Config(format!("task {} has no destination", task.id())));
                dl.clear_postprocessors();
                return;
            }
        };

        task.reset_program();
        dl.set_stage_outfile(Some(outfile.clone()));
        let result = postprocessor::process(
            &self.inner.registry,
            &self.inner.settings.launch,
            task,
            &spec,
            &infile,
            &outfile,
        )
        .await;
        if let Err(e) = result {
            error!(task_id = task.id(), stage = dl.stage_index(), "failed to start postprocessor: {}", e);
            dl.set_stage_outfile(None);
            dl.clear_postprocessors();
            task.fail(e);
        }
    }

    fn refresh_progress(&self) {
        let buckets = [Bucket::Playing, Bucket::Active, Bucket::Postprocessing];
        for bucket in buckets {
            for task in self.tasks(bucket) {
                if let Some(program) = task.program.get() {
                    program.update_progress();
                }
            }
        }
    }

    // -------------------------------------------------------------------------
    // Finalization
    // -------------------------------------------------------------------------

    /// Move a download's last good result to its destination, remove its
    /// work directory and resolve its result. Runs at most once per task.
    ///
    /// If the move fails the work directory is kept and the task fails with
    /// [`Error::NotSaved`], naming the file that was kept.
    pub fn finalize(&self, task: &Task) -> Result<()> {
        let Some(dl) = task.as_download() else {
            let code = task.proc.get().and_then(|h| h.exit_code()).unwrap_or(-1);
            task.resolve(Ok(code));
            return Ok(());
        };
        if !dl.mark_finalized() {
            debug!(task_id = task.id(), "already finalized");
            return Ok(());
        }

        if let (Some(last), Some(dest)) = (dl.last_stage_result(), dl.dest()) {
            if last != dest && path_exists(&last) {
                let dest = normalize_file_name(&dest, self.inner.settings.normalization);
                if let Err(e) = move_into_place(&last, &dest) {
                    error!(
                        task_id = task.id(),
                        kept = %last.display(),
                        to = %dest.display(),
                        "move failed, work directory kept: {}",
                        e
                    );
                    let err = Error::NotSaved {
                        kept: last,
                        source: Box::new(e),
                    };
                    task.resolve(Err(Arc::new(err.duplicate())));
                    return Err(err);
                }
                info!(task_id = task.id(), dest = %dest.display(), "saved");
                dl.set_dest(dest);
            }
        }
        remove_workdir(task);

        let code = task.proc.get().and_then(|h| h.exit_code()).unwrap_or(-1);
        if !task.result.is_set() {
            task.resolve(Ok(code));
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Loops
    // -------------------------------------------------------------------------

    /// Spawn the worker and poller loops. Must be called inside a tokio runtime.
    pub fn start(&self) {
        let mut loops = lock(&self.inner.loops);
        if !loops.is_empty() {
            return;
        }
        let worker = self.clone();
        loops.push(tokio::spawn(async move { worker.worker_loop().await }));
        let poller = self.clone();
        loops.push(tokio::spawn(async move { poller.poll_loop().await }));
        info!(
            max_concurrent = self.max_concurrent_tasks(),
            tick_ms = self.inner.settings.tick_interval.as_millis() as u64,
            poll_ms = self.inner.settings.poll_interval.as_millis() as u64,
            "task manager started"
        );
    }

    /// Stop the loops. Running processes are left alone.
    pub fn stop(&self) {
        let loops: Vec<_> = lock(&self.inner.loops).drain(..).collect();
        if loops.is_empty() {
            return;
        }
        for handle in loops {
            handle.abort();
        }
        info!("task manager stopped");
    }

    pub fn is_running(&self) -> bool {
        !lock(&self.inner.loops).is_empty()
    }

    async fn worker_loop(self) {
        let mut interval = tokio::time::interval(self.inner.settings.tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = self.inner.wake.notified() => {}
            }
            if let Err(e) = self.worker_tick().await {
                error!("worker tick failed: {}", e);
            }
        }
    }

    async fn poll_loop(self) {
        let mut interval = tokio::time::interval(self.inner.settings.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            if let Err(e) = self.poll_tick().await {
                error!("poll tick failed: {}", e);
            }
        }
    }

    /// Wait until every task is done
    pub async fn wait_idle(&self) {
        while !self.is_idle() {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    /// Terminate everything still running and stop the loops
    pub fn shutdown(&self) {
        self.stop();
        for bucket in [Bucket::Playing, Bucket::Active, Bucket::Postprocessing] {
            for task in self.tasks(bucket) {
                if let Some(handle) = task.proc.get() {
                    if let Err(e) = handle.terminate() {
                        warn!(task_id = task.id(), "terminate failed: {}", e);
                    }
                }
            }
        }
    }
}

impl fmt::Debug for TaskManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let buckets = lock(&self.inner.buckets);
        f.debug_struct("TaskManager")
            .field("max_concurrent_tasks", &self.max_concurrent_tasks())
            .field("to_play", &buckets.to_play.len())
            .field("playing", &buckets.playing.len())
            .field("to_download", &buckets.to_download.len())
            .field("active", &buckets.active.len())
            .field("postprocessing", &buckets.postprocessing.len())
            .field("done", &buckets.done.len())
            .finish()
    }
}

fn remove_workdir(task: &Task) {
    let Some(dir) = task.as_download().and_then(|d| d.workdir()) else {
        return;
    };
    match std::fs::remove_dir_all(&dir) {
        Ok(()) => debug!(task_id = task.id(), dir = %dir.display(), "removed work directory"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(task_id = task.id(), dir = %dir.display(), "could not remove work directory: {}", e),
    }
}

fn normalize_file_name(path: &Path, form: Normalization) -> PathBuf {
    match path.file_name().and_then(|n| n.to_str()) {
        Some(name) if form != Normalization::None => path.with_file_name(form.apply(name)),
        _ => path.to_path_buf(),
    }
}

/// Rename, falling back to copy and delete across filesystems. Never
/// replaces an existing file.
fn move_into_place(from: &Path, to: &Path) -> Result<()> {
    if path_exists(to) {
        return Err(Error::DestinationExists(to.to_path_buf()));
    }
    if let Some(parent) = to.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    // hard_link fails on an existing target, so a file created since the
    // check above is not clobbered
    match std::fs::hard_link(from, to) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
            return Err(Error::DestinationExists(to.to_path_buf()));
        }
        Err(e) => {
            debug!("hard link failed ({}); copying instead", e);
            copy_new(from, to)?;
        }
    }
    std::fs::remove_file(from)?;
    Ok(())
}

/// Copy into a file that must not exist yet; a partial copy is removed
fn copy_new(from: &Path, to: &Path) -> Result<()> {
    let mut out = match std::fs::OpenOptions::new().write(true).create_new(true).open(to) {
        Ok(out) => out,
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
            return Err(Error::DestinationExists(to.to_path_buf()));
        }
        Err(e) => return Err(e.into()),
    };
    let copied = std::fs::File::open(from).and_then(|mut input| std::io::copy(&mut input, &mut out));
    if let Err(e) = copied {
        drop(out);
        let _ = std::fs::remove_file(to);
        return Err(e.into());
    }
    Ok(())
}

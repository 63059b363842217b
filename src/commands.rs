//! CLI Command Handlers
//!
//! Each handler takes its CLI args, the application context and Output,
//! and returns an ExitCode.

use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;

use crate::cli::{
    DownloadCmd, ExitCode, Output, PlayCmd, ProgramsCmd, TaskArgs, TemplateCmd,
};
use crate::context::AppContext;
use crate::error::Error;
use crate::models::{MediaListing, MediaSource};
use crate::program::{ProgramSpec, ProgramType};
use crate::task::{describe_outcome, Task, TaskOptions};
use crate::template::{FilenameContext, Template};

// =============================================================================
// Reports
// =============================================================================

/// Final state of one task, as printed by `play` and `download`
#[derive(Debug, Clone, Serialize)]
pub struct TaskReport {
    pub id: u64,
    pub title: String,
    pub kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dest: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    pub result: String,
}

impl TaskReport {
    fn from_task(task: &Task) -> Self {
        let outcome = task.result.get();
        Self {
            id: task.id(),
            title: task.title.clone(),
            kind: if task.is_play() { "play" } else { "download" },
            dest: task.as_download().and_then(|d| d.dest()),
            exit_code: outcome.as_ref().and_then(|r| r.as_ref().ok().copied()),
            result: outcome
                .as_ref()
                .map(describe_outcome)
                .unwrap_or_else(|| "pending".to_string()),
        }
    }

    fn succeeded(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Exit code summarizing a batch of finished tasks
fn batch_exit_code(reports: &[TaskReport]) -> ExitCode {
    if reports.iter().all(TaskReport::succeeded) {
        ExitCode::Success
    } else {
        ExitCode::TaskFailed
    }
}

fn print_reports(reports: &[TaskReport], output: &Output) -> ExitCode {
    if output.json {
        if let Err(e) = output.print(reports) {
            return output.error(format!("Failed to serialize output: {}", e), ExitCode::Error);
        }
    } else {
        for r in reports {
            match &r.dest {
                Some(dest) => output.line(format!("#{} {} [{}] -> {}", r.id, r.title, r.result, dest.display())),
                None => output.line(format!("#{} {} [{}]", r.id, r.title, r.result)),
            }
        }
    }
    batch_exit_code(reports)
}

// =============================================================================
// Task construction
// =============================================================================

fn listing_for(args: &TaskArgs, source: &MediaSource) -> MediaListing {
    let title = args.title.clone().unwrap_or_else(|| source.default_name());
    MediaListing::new(args.provider.clone(), title)
}

fn options_for(args: &TaskArgs) -> TaskOptions {
    TaskOptions {
        resolution: args.resolution,
        ..Default::default()
    }
}

/// One play task per locator
pub fn play_tasks(cmd: &PlayCmd) -> Vec<Task> {
    cmd.task
        .locators
        .iter()
        .map(|locator| {
            let source = MediaSource::new(locator.clone());
            let listing = listing_for(&cmd.task, &source);
            let mut task = Task::play(listing.title.clone(), vec![source])
                .with_listing(listing)
                .with_options(options_for(&cmd.task));
            if let Some(player) = &cmd.player {
                task = task.with_player(ProgramSpec::parse(player));
            }
            if let Some(downloader) = &cmd.task.downloader {
                task = task.with_downloader(ProgramSpec::parse(downloader));
            }
            task
        })
        .collect()
}

/// One download task per locator
pub fn download_tasks(cmd: &DownloadCmd) -> Vec<Task> {
    let postprocessors: Vec<ProgramSpec> = cmd.postprocessors.iter().map(ProgramSpec::name).collect();
    cmd.task
        .locators
        .iter()
        .map(|locator| {
            let source = MediaSource::new(locator.clone());
            let listing = listing_for(&cmd.task, &source);
            let mut task = Task::download(listing.title.clone(), vec![source])
                .with_listing(listing)
                .with_options(options_for(&cmd.task))
                .with_postprocessors(postprocessors.clone());
            if let Some(downloader) = &cmd.task.downloader {
                task = task.with_downloader(ProgramSpec::parse(downloader));
            }
            if let Some(dest) = &cmd.dest {
                task = task.with_dest(dest.clone());
            }
            if let Some(template) = &cmd.template {
                task = task.with_output_template(template.clone());
            }
            task
        })
        .collect()
}

/// Queue download tasks; tasks refused at enqueue time are reported, not fatal
pub fn enqueue_downloads(cmd: &DownloadCmd, ctx: &AppContext, output: &Output) -> Vec<Arc<Task>> {
    if let Some(max) = cmd.max_concurrent {
        ctx.manager.set_max_concurrent_tasks(max);
    }
    let mut queued = Vec::new();
    for task in download_tasks(cmd) {
        let task = Arc::new(task);
        match ctx.manager.download(task.clone()) {
            Ok(task) => {
                output.info(format!("Queued #{} {}", task.id(), task.title));
                queued.push(task);
            }
            Err(e) => {
                output.error(format!("{}: {}", task.title, e), ExitCode::from(&e));
                queued.push(task);
            }
        }
    }
    queued
}

// =============================================================================
// Play Command
// =============================================================================

pub async fn play_cmd(cmd: PlayCmd, ctx: &AppContext, output: &Output) -> ExitCode {
    let mut tasks = Vec::new();
    for task in play_tasks(&cmd) {
        match ctx.manager.play(task) {
            Ok(task) => {
                output.info(format!("Playing #{} {}", task.id(), task.title));
                tasks.push(task);
            }
            Err(e) => return output.error(e.to_string(), ExitCode::from(&e)),
        }
    }

    ctx.start();
    for task in &tasks {
        task.wait().await;
    }
    ctx.manager.wait_idle().await;
    ctx.manager.stop();

    let reports: Vec<TaskReport> = tasks.iter().map(|t| TaskReport::from_task(t)).collect();
    if let Some(err) = first_error(&tasks) {
        output.error(err.to_string(), ExitCode::from(err.as_ref()));
    }
    print_reports(&reports, output)
}

// =============================================================================
// Download Command
// =============================================================================

pub async fn download_cmd(cmd: DownloadCmd, ctx: &AppContext, output: &Output) -> ExitCode {
    if let Err(e) = cmd.validate() {
        return output.error(e, ExitCode::InvalidArgs);
    }

    let tasks = enqueue_downloads(&cmd, ctx, output);
    if tasks.iter().all(|t| t.result.is_set()) {
        // nothing was queued
        let reports: Vec<TaskReport> = tasks.iter().map(|t| TaskReport::from_task(t)).collect();
        print_reports(&reports, output);
        return match first_error(&tasks) {
            Some(err) => ExitCode::from(err.as_ref()),
            None => ExitCode::Error,
        };
    }

    ctx.start();
    ctx.manager.wait_idle().await;
    ctx.manager.stop();

    let reports: Vec<TaskReport> = tasks.iter().map(|t| TaskReport::from_task(t)).collect();
    print_reports(&reports, output)
}

fn first_error(tasks: &[Arc<Task>]) -> Option<Arc<Error>> {
    tasks
        .iter()
        .filter_map(|t| t.result.get())
        .find_map(|r| r.err())
}

// =============================================================================
// Programs Command
// =============================================================================

#[derive(Debug, Serialize)]
struct ProgramInfo {
    name: String,
    #[serde(rename = "type")]
    program_type: ProgramType,
    backend: String,
    path: PathBuf,
    args: Vec<String>,
}

pub async fn programs_cmd(cmd: ProgramsCmd, ctx: &AppContext, output: &Output) -> ExitCode {
    let wanted: Option<ProgramType> = cmd.program_type.map(Into::into);
    let programs: Vec<ProgramInfo> = ctx
        .registry
        .all()
        .iter()
        .filter(|p| wanted.map(|t| t == p.program_type).unwrap_or(true))
        .map(|p| ProgramInfo {
            name: p.name.clone(),
            program_type: p.program_type,
            backend: p.backend.to_string(),
            path: p.path.clone(),
            args: p.args.clone(),
        })
        .collect();

    if output.json {
        if let Err(e) = output.print(&programs) {
            return output.error(format!("Failed to serialize output: {}", e), ExitCode::Error);
        }
    } else if programs.is_empty() {
        output.info("No programs found. Install mpv, vlc, yt-dlp or configure [programs] in config.toml");
    } else {
        for p in &programs {
            output.line(format!(
                "{:<14} {:<14} {:<11} {}",
                p.program_type.to_string(),
                p.name,
                p.backend,
                p.path.display()
            ));
        }
    }
    ExitCode::Success
}

// =============================================================================
// Template Command
// =============================================================================

#[derive(Debug, Serialize)]
struct RenderedTemplate {
    template: String,
    locator: String,
    filename: String,
}

pub async fn template_cmd(cmd: TemplateCmd, output: &Output) -> ExitCode {
    let template = match Template::parse(&cmd.template) {
        Ok(t) => t,
        Err(e) => return output.error(e.to_string(), ExitCode::InvalidArgs),
    };
    let source = MediaSource::new(cmd.locator.clone());
    let title = cmd.title.clone().unwrap_or_else(|| source.default_name());
    let listing = MediaListing::new(cmd.provider.clone(), title);
    let ctx = FilenameContext::new(&source, Some(&listing)).with_position(1, 1);

    match template.render(&ctx) {
        Ok(filename) => {
            if output.json {
                let rendered = RenderedTemplate {
                    template: cmd.template,
                    locator: cmd.locator,
                    filename,
                };
                if let Err(e) = output.print(rendered) {
                    return output.error(format!("Failed to serialize output: {}", e), ExitCode::Error);
                }
            } else {
                output.line(filename);
            }
            ExitCode::Success
        }
        Err(e) => output.error(e.to_string(), ExitCode::InvalidArgs),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::{Cli, Command};
    use clap::Parser;

    fn download(args: &[&str]) -> DownloadCmd {
        let mut argv = vec!["mediatui", "download"];
        argv.extend_from_slice(args);
        match Cli::parse_from(argv).command {
            Some(Command::Download(cmd)) => cmd,
            _ => panic!("Expected Download command"),
        }
    }

    #[test]
    fn test_download_tasks_one_per_locator() {
        let cmd = download(&["https://a/x.mp4", "https://b/y.mp4", "-p", "tomp3", "-p", "tag"]);
        let tasks = download_tasks(&cmd);
        assert_eq!(tasks.len(), 2);
        let dl = tasks[0].as_download().unwrap();
        assert_eq!(
            dl.postprocessors(),
            vec![ProgramSpec::name("tomp3"), ProgramSpec::name("tag")]
        );
        assert_eq!(dl.total_stages(), 3);
        assert_eq!(tasks[1].title, "y");
    }

    #[test]
    fn test_play_tasks_carry_specs() {
        let cli = Cli::parse_from(["mediatui", "play", "magnet:?xt=urn:btih:abc&dn=Movie", "--player", "mpv"]);
        let Some(Command::Play(cmd)) = cli.command else {
            panic!("Expected Play command");
        };
        let tasks = play_tasks(&cmd);
        assert_eq!(tasks[0].title, "Movie");
        assert_eq!(tasks[0].as_play().unwrap().player, ProgramSpec::name("mpv"));
        assert_eq!(tasks[0].listing.as_ref().unwrap().provider, "direct");
    }

    #[test]
    fn test_batch_exit_code() {
        let ok = TaskReport {
            id: 1,
            title: "a".into(),
            kind: "download",
            dest: None,
            exit_code: Some(0),
            result: "exit 0".into(),
        };
        let failed = TaskReport {
            exit_code: Some(1),
            result: "exit 1".into(),
            ..ok.clone()
        };
        assert_eq!(batch_exit_code(&[ok.clone()]), ExitCode::Success);
        assert_eq!(batch_exit_code(&[ok, failed]), ExitCode::TaskFailed);
    }
}

//! Downloader launcher
//!
//! Downloads always land in the task's own work directory first; the task
//! manager moves the final result to the destination once every stage ran.

use std::path::PathBuf;
use tracing::{debug, info};

use super::{
    LaunchSettings, OutputTarget, ProcessHandle, Program, ProgramDef, ProgramRegistry, ProgramSource,
    ProgramSpec, ProgramType, RunOptions,
};
use crate::error::{Error, Result};
use crate::task::{path_exists, Task};
use crate::template::render_filename;

/// First downloader matching `spec` that can fetch `locator`
pub fn select(registry: &ProgramRegistry, spec: &ProgramSpec, locator: &str) -> Result<ProgramDef> {
    let candidates = registry.candidates(ProgramType::Downloader, spec)?;
    candidates
        .into_iter()
        .find(|d| d.supports_url(locator))
        .ok_or_else(|| Error::NoProgram {
            program_type: ProgramType::Downloader,
            spec: format!("{} for {}", spec, locator),
        })
}

/// Final path for a download task
///
/// An explicit destination wins; otherwise the task's (or the default)
/// output template is rendered inside the download directory.
pub fn destination(task: &Task, settings: &LaunchSettings) -> Result<PathBuf> {
    let download = task
        .as_download()
        .ok_or_else(|| Error::Config(format!("task {} is not a download", task.id())))?;
    if let Some(dest) = download.dest() {
        return Ok(dest);
    }
    let source = task
        .primary_source()
        .ok_or_else(|| Error::NoSource(task.title.clone()))?;
    let template = download
        .output_template()
        .unwrap_or(settings.output_template.as_str());
    let name = render_filename(template, source, task.listing.as_ref(), 1, task.sources.len())?;
    Ok(settings.download_dir.join(name))
}

/// Create the per-task work directory, once
pub fn ensure_workdir(task: &Task, settings: &LaunchSettings) -> Result<PathBuf> {
    let download = task
        .as_download()
        .ok_or_else(|| Error::Config(format!("task {} is not a download", task.id())))?;
    if let Some(dir) = download.workdir() {
        return Ok(dir);
    }
    let dir = settings
        .temp_dir
        .join(format!("mediatui-task-{}-{}", task.id(), uuid::Uuid::new_v4().simple()));
    std::fs::create_dir_all(&dir)?;
    debug!(task_id = task.id(), dir = %dir.display(), "created work directory");
    download.set_workdir(dir.clone());
    Ok(dir)
}

/// Start downloading `task`'s primary source
pub async fn download(
    registry: &ProgramRegistry,
    settings: &LaunchSettings,
    task: &Task,
    spec: &ProgramSpec,
) -> Result<ProcessHandle> {
    let source = task
        .primary_source()
        .ok_or_else(|| Error::NoSource(task.title.clone()))?;
    let def = select(registry, spec, &source.locator)?;

    let dest = destination(task, settings)?;
    if path_exists(&dest) {
        return Err(Error::DestinationExists(dest));
    }
    let download = task
        .as_download()
        .ok_or_else(|| Error::Config(format!("task {} is not a download", task.id())))?;
    download.set_dest(dest.clone());

    let workdir = ensure_workdir(task, settings)?;
    let file_name = dest
        .file_name()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(format!("download.{}", source.ext())));
    let outfile = workdir.join(file_name);

    let program = Program::new(def, settings.progress_interval);
    program.set_source(ProgramSource::Locators(vec![source.locator.clone()]));
    program.set_output(OutputTarget::File(outfile.clone()));
    program.set_workdir(workdir);
    download.set_stage_outfile(Some(outfile));

    task.program.set(program.clone())?;
    let handle = program.run(&RunOptions::for_task(task)).await?;
    task.proc.set(handle.clone())?;
    info!(
        task_id = task.id(),
        downloader = %program.name(),
        dest = %dest.display(),
        pid = ?handle.pid(),
        "download started"
    );
    Ok(handle)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::models::{MediaListing, MediaSource};

    fn settings(dir: &std::path::Path) -> LaunchSettings {
        LaunchSettings {
            download_dir: dir.join("out"),
            temp_dir: dir.join("tmp"),
            ..Default::default()
        }
    }

    fn fetcher() -> ProgramRegistry {
        let mut r = ProgramRegistry::new();
        r.register(
            ProgramDef::custom(
                "fetch",
                ProgramType::Downloader,
                "/bin/sh",
                vec!["-c".into(), "printf data > \"$1\"".into(), "sh".into(), "{outfile}".into()],
            )
            .with_url_patterns(&[r"^https?://"]),
        );
        r
    }

    #[test]
    fn test_destination_from_template() {
        let dir = tempfile::tempdir().unwrap();
        let task = Task::download("a", vec![MediaSource::new("https://example.com/clip.mp4")])
            .with_listing(MediaListing::new("tube", "Great Show"))
            .with_output_template("{listing.title}.{self.ext}");
        let dest = destination(&task, &settings(dir.path())).unwrap();
        assert_eq!(dest, dir.path().join("out").join("Great Show.mp4"));
    }

    #[test]
    fn test_destination_index_is_one_based() {
        let dir = tempfile::tempdir().unwrap();
        let task = Task::download("a", vec![MediaSource::new("https://example.com/clip.mp4")])
            .with_output_template("part{index}of{num}.{self.ext}");
        let dest = destination(&task, &settings(dir.path())).unwrap();
        assert_eq!(dest, dir.path().join("out").join("part1of1.mp4"));
    }

    #[test]
    fn test_destination_explicit_wins() {
        let dir = tempfile::tempdir().unwrap();
        let task = Task::download("a", vec![MediaSource::new("https://example.com/clip.mp4")])
            .with_dest("/data/x.mkv");
        assert_eq!(
            destination(&task, &settings(dir.path())).unwrap(),
            PathBuf::from("/data/x.mkv")
        );
    }

    #[test]
    fn test_select_skips_unsupported() {
        let r = fetcher();
        let err = select(&r, &ProgramSpec::Any, "magnet:?xt=urn:btih:abc").unwrap_err();
        assert!(matches!(err, Error::NoProgram { .. }));
        assert_eq!(select(&r, &ProgramSpec::Any, "https://x/y").unwrap().name, "fetch");
    }

    #[tokio::test]
    async fn test_download_writes_into_workdir() {
        let dir = tempfile::tempdir().unwrap();
        let s = settings(dir.path());
        let task = Task::download("a", vec![MediaSource::new("https://example.com/clip.mp4")])
            .with_dest(dir.path().join("final.mp4"));

        let handle = download(&fetcher(), &s, &task, &ProgramSpec::Any).await.unwrap();
        assert_eq!(handle.wait().await, 0);

        let dl = task.as_download().unwrap();
        let outfile = dl.stage_outfile().unwrap();
        assert!(outfile.starts_with(dl.workdir().unwrap()));
        assert_eq!(std::fs::read_to_string(outfile).unwrap(), "data");
        assert!(!dir.path().join("final.mp4").exists());
    }

    #[tokio::test]
    async fn test_download_refuses_existing_destination() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("exists.mp4");
        std::fs::write(&dest, b"old").unwrap();
        let task = Task::download("a", vec![MediaSource::new("https://example.com/clip.mp4")]).with_dest(&dest);

        let err = download(&fetcher(), &settings(dir.path()), &task, &ProgramSpec::Any)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DestinationExists(p) if p == dest));
        assert!(!task.proc.is_set());
    }
}

//! Postprocessor launcher
//!
//! Runs one stage of a download's postprocessing chain: read `infile`,
//! write `outfile`.

use std::path::{Path, PathBuf};
use tracing::info;

use super::{
    LaunchSettings, OutputTarget, ProcessHandle, Program, ProgramRegistry, ProgramSource, ProgramSpec,
    ProgramType, RunOptions,
};
use crate::error::Result;
use crate::models::MediaType;
use crate::task::Task;

/// Start a postprocessing stage for `task`
pub async fn process(
    registry: &ProgramRegistry,
    settings: &LaunchSettings,
    task: &Task,
    spec: &ProgramSpec,
    infile: &[String],
    outfile: &Path,
) -> Result<ProcessHandle> {
    let media_type = infile
        .first()
        .and_then(|f| Path::new(f).extension())
        .and_then(|e| e.to_str())
        .map(MediaType::from_extension)
        .unwrap_or_default();
    let candidates = registry.candidates(ProgramType::Postprocessor, spec)?;
    let def = candidates
        .iter()
        .find(|d| d.supports_media_type(media_type))
        .unwrap_or(&candidates[0])
        .clone();

    let program = Program::new(def, settings.progress_interval);
    program.set_source(ProgramSource::Locators(infile.to_vec()));
    program.set_output(OutputTarget::File(outfile.to_path_buf()));
    if let Some(dir) = task.as_download().and_then(|d| d.workdir()) {
        program.set_workdir(dir);
    }

    task.program.set(program.clone())?;
    let handle = program.run(&RunOptions::for_task(task)).await?;
    task.proc.set(handle.clone())?;
    info!(
        task_id = task.id(),
        postprocessor = %program.name(),
        outfile = %outfile.display(),
        "postprocessing stage started"
    );
    Ok(handle)
}

/// Output path for an intermediate stage inside `workdir`
///
/// Keeps the input's extension unless the postprocessor declares its own.
pub fn stage_path(workdir: &Path, stage: usize, infile: &Path, extension: Option<&str>) -> PathBuf {
    let ext = extension
        .map(str::to_string)
        .or_else(|| infile.extension().and_then(|e| e.to_str()).map(str::to_string));
    let name = match ext {
        Some(ext) => format!("stage{}.{}", stage, ext),
        None => format!("stage{}", stage),
    };
    workdir.join(name)
}

//! Config and Context Tests
//!
//! Load a config file, build the program registry and task manager from it
//! and run a download end to end through the background loops.

#![cfg(unix)]

use std::time::Duration;

use mediatui::config::Config;
use mediatui::context::AppContext;
use mediatui::models::MediaSource;
use mediatui::program::{ProgramRegistry, ProgramSpec, ProgramType};
use mediatui::task::Task;
use mediatui::Error;
use tempfile::TempDir;
use tokio_test::assert_ok;

fn write_config(dir: &TempDir, body: &str) -> std::path::PathBuf {
    let header = format!(
        "download_dir = {:?}\ntemp_dir = {:?}\ntick_interval_ms = 20\npoll_interval_ms = 20\n",
        dir.path().join("out"),
        dir.path().join("tmp"),
    );
    let path = dir.path().join("config.toml");
    std::fs::write(&path, format!("{}{}", header, body)).unwrap();
    path
}

const PROGRAMS: &str = r#"
max_concurrent_tasks = 2
downloader = "fetch"

[programs.fetch]
type = "downloader"
path = "/bin/sh"
args = ["-c", "printf data > \"$1\"", "sh", "{outfile}"]

[programs.upper]
type = "postprocessor"
path = "/bin/sh"
args = ["-c", "tr a-z A-Z < \"$1\" > \"$2\"", "sh", "{source}", "{outfile}"]

[programs.off]
type = "player"
path = "/bin/sh"
disabled = true

[programs.ghost]
type = "player"
path = "/nonexistent/ghost-player"
"#;

#[test]
fn test_registry_from_config_file() {
    let dir = TempDir::new().unwrap();
    let config = assert_ok!(Config::load_from(&write_config(&dir, PROGRAMS)));
    assert_ok!(config.validate());

    let registry = ProgramRegistry::from_config(&config);
    let fetch = registry.get(ProgramType::Downloader, "fetch").unwrap();
    assert_eq!(fetch.args[0], "-c");
    assert!(registry.get(ProgramType::Postprocessor, "upper").is_some());
    // disabled and missing programs are skipped
    assert!(registry.get(ProgramType::Player, "off").is_none());
    assert!(registry.get(ProgramType::Player, "ghost").is_none());
}

#[test]
fn test_invalid_config_is_an_error() {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, "max_concurrent_tasks = \"lots\"\n");
    let err = Config::load_from(&path).unwrap_err();
    assert!(matches!(err, Error::Config(_)));

    let path = write_config(&dir, "output_template = \"{self.ext\"\n");
    let config = Config::load_from(&path).unwrap();
    assert!(config.validate().is_err());
}

#[test]
fn test_save_and_reload() {
    let dir = TempDir::new().unwrap();
    let config = Config::load_from(&write_config(&dir, PROGRAMS)).unwrap();
    let copy = dir.path().join("copy.toml");
    assert_ok!(config.save_to(&copy));
    assert_eq!(Config::load_from(&copy).unwrap(), config);
}

#[tokio::test]
async fn test_context_runs_download_with_postprocessor() {
    let dir = TempDir::new().unwrap();
    let config = Config::load_from(&write_config(&dir, PROGRAMS)).unwrap();
    let ctx = assert_ok!(AppContext::build(config));
    assert_eq!(ctx.manager.max_concurrent_tasks(), 2);

    let task = Task::download("Clip", vec![MediaSource::new("https://example.com/clip.txt")])
        .with_postprocessors(vec![ProgramSpec::name("upper")]);
    let task = ctx.manager.download(task).unwrap();

    ctx.start();
    let outcome = tokio::time::timeout(Duration::from_secs(10), task.wait())
        .await
        .expect("download did not finish");
    ctx.shutdown();

    assert_eq!(outcome.unwrap().unwrap(), 0);
    let dest = task.as_download().unwrap().dest().unwrap();
    assert!(dest.starts_with(dir.path().join("out")));
    assert_eq!(std::fs::read_to_string(dest).unwrap(), "DATA");
}

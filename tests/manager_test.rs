//! Task Manager Tests
//!
//! Drives the scheduler against small `/bin/sh` programs standing in for
//! players, downloaders and postprocessors. Most tests step the worker and
//! poller by hand so bucket transitions can be observed one tick at a time.

#![cfg(unix)]

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use mediatui::manager::{Bucket, ManagerSettings, TaskManager};
use mediatui::models::MediaSource;
use mediatui::program::{
    CompletionCheck, LaunchSettings, OutputMode, ProgramDef, ProgramRegistry, ProgramSpec, ProgramType,
};
use mediatui::task::Task;
use mediatui::Error;
use tempfile::TempDir;
use tokio_test::{assert_err, assert_ok};

// =============================================================================
// Fixtures
// =============================================================================

const URL: &str = "https://example.com/clip.mp4";

/// `/bin/sh -c script sh extra...`, so `extra` lands in `$1`, `$2`, ...
fn sh(name: &str, program_type: ProgramType, script: &str, extra: &[&str]) -> ProgramDef {
    let mut args = vec!["-c".to_string(), script.to_string(), "sh".to_string()];
    args.extend(extra.iter().map(|s| s.to_string()));
    ProgramDef::custom(name, program_type, "/bin/sh", args)
}

fn fetcher(name: &str, script: &str) -> ProgramDef {
    sh(name, ProgramType::Downloader, script, &["{outfile}"])
}

fn stage(name: &str, script: &str) -> ProgramDef {
    sh(name, ProgramType::Postprocessor, script, &["{source}", "{outfile}"])
}

fn registry(defs: Vec<ProgramDef>) -> Arc<ProgramRegistry> {
    let mut registry = ProgramRegistry::new();
    for def in defs {
        registry.register(def);
    }
    Arc::new(registry)
}

fn settings(dir: &Path, max: usize) -> ManagerSettings {
    ManagerSettings {
        max_concurrent_tasks: max,
        tick_interval: Duration::from_millis(20),
        poll_interval: Duration::from_millis(20),
        launch: LaunchSettings {
            progress_interval: Duration::from_millis(10),
            download_dir: dir.join("out"),
            temp_dir: dir.join("tmp"),
            ..Default::default()
        },
        ..Default::default()
    }
}

fn manager(dir: &TempDir, defs: Vec<ProgramDef>, max: usize) -> TaskManager {
    TaskManager::new(registry(defs), settings(dir.path(), max))
}

fn download_to(dir: &TempDir, file: &str) -> Task {
    Task::download(file, vec![MediaSource::new(URL)]).with_dest(dir.path().join(file))
}

/// Step worker and poller until `done` holds or time runs out
async fn drive_until(manager: &TaskManager, done: impl Fn(&TaskManager) -> bool) {
    for _ in 0..400 {
        manager.worker_tick().await.unwrap();
        manager.poll_tick().await.unwrap();
        if done(manager) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached; state: {:?}", manager);
}

async fn drive_idle(manager: &TaskManager) {
    drive_until(manager, |m| m.is_idle()).await;
}

// =============================================================================
// Download lifecycle
// =============================================================================

mod downloads {
    use super::*;

    #[tokio::test]
    async fn test_download_without_postprocessors_completes() {
        let dir = TempDir::new().unwrap();
        let m = manager(&dir, vec![fetcher("fetch", "printf data > \"$1\"")], 2);

        let task = assert_ok!(m.download(download_to(&dir, "clip.mp4")));
        assert_eq!(m.bucket_of(task.id()), Some(Bucket::ToDownload));

        drive_idle(&m).await;

        assert_eq!(m.bucket_of(task.id()), Some(Bucket::Done));
        assert_eq!(task.result.get().unwrap().unwrap(), 0);
        let dl = task.as_download().unwrap();
        assert_eq!(std::fs::read_to_string(dir.path().join("clip.mp4")).unwrap(), "data");
        let workdir = dl.workdir().unwrap();
        assert!(!workdir.exists(), "work directory should be removed");
        assert!(dl.is_finalized());
    }

    #[tokio::test]
    async fn test_existing_destination_is_refused() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("foo.mp4"), b"old").unwrap();
        let m = manager(&dir, vec![fetcher("fetch", "printf data > \"$1\"")], 2);

        let task = Arc::new(download_to(&dir, "foo.mp4"));
        let err = assert_err!(m.download(task.clone()));
        assert!(matches!(err, Error::DestinationExists(_)));

        // never queued
        assert_eq!(m.bucket_of(task.id()), None);
        m.worker_tick().await.unwrap();
        assert!(m.tasks(Bucket::Active).is_empty());

        let outcome = task.result.get().unwrap();
        assert!(matches!(outcome.unwrap_err().as_ref(), Error::DestinationExists(_)));
        assert_eq!(std::fs::read(dir.path().join("foo.mp4")).unwrap(), b"old");
    }

    #[tokio::test]
    async fn test_second_task_for_same_destination_is_refused() {
        let dir = TempDir::new().unwrap();
        let m = manager(&dir, vec![fetcher("fetch", "printf data > \"$1\"")], 5);

        let first = m.download(download_to(&dir, "same.mp4")).unwrap();
        let second = Arc::new(download_to(&dir, "same.mp4"));
        let err = assert_err!(m.download(second.clone()));
        assert!(matches!(err, Error::DestinationClaimed { task, .. } if task == first.id()));
        let outcome = second.result.get().unwrap();
        assert!(matches!(outcome.unwrap_err().as_ref(), Error::DestinationClaimed { .. }));
        assert_eq!(m.bucket_of(second.id()), None);

        drive_idle(&m).await;
        assert_eq!(first.result.get().unwrap().unwrap(), 0);
        assert_eq!(std::fs::read_to_string(dir.path().join("same.mp4")).unwrap(), "data");

        // once the first is saved, the file itself blocks reuse
        let err = assert_err!(m.download(download_to(&dir, "same.mp4")));
        assert!(matches!(err, Error::DestinationExists(_)));
    }

    #[tokio::test]
    async fn test_destination_created_during_download_is_not_replaced() {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("clip.mp4");
        let script = "printf data > \"$1\"; printf other > \"$2\"";
        let m = manager(
            &dir,
            vec![sh("fetch", ProgramType::Downloader, script, &["{outfile}", dest.to_str().unwrap()])],
            2,
        );

        let task = m.download(download_to(&dir, "clip.mp4")).unwrap();
        drive_idle(&m).await;

        let outcome = task.result.get().unwrap();
        let err = outcome.unwrap_err();
        let Error::NotSaved { kept, source } = err.as_ref() else {
            panic!("expected NotSaved, got {:?}", err);
        };
        assert!(matches!(source.as_ref(), Error::DestinationExists(p) if *p == dest));
        assert_eq!(std::fs::read_to_string(&dest).unwrap(), "other");
        assert_eq!(std::fs::read_to_string(kept).unwrap(), "data");
        assert!(task.as_download().unwrap().workdir().unwrap().exists());
    }

    #[tokio::test]
    async fn test_failed_move_keeps_work_directory() {
        let dir = TempDir::new().unwrap();
        // a file where the destination's parent directory should be
        std::fs::write(dir.path().join("blocker"), b"").unwrap();
        let m = manager(&dir, vec![fetcher("fetch", "printf data > \"$1\"")], 2);

        let task = Task::download("clip", vec![MediaSource::new(URL)]).with_dest(dir.path().join("blocker/clip.mp4"));
        let task = m.download(task).unwrap();
        drive_idle(&m).await;

        let outcome = task.result.get().unwrap();
        let err = outcome.unwrap_err();
        let Error::NotSaved { kept, source } = err.as_ref() else {
            panic!("expected NotSaved, got {:?}", err);
        };
        assert!(matches!(source.as_ref(), Error::Io(_)));
        assert_eq!(std::fs::read_to_string(kept).unwrap(), "data");

        let dl = task.as_download().unwrap();
        assert!(kept.starts_with(dl.workdir().unwrap()));
        assert!(dl.is_finalized());
        // already finalized; nothing is retried or removed
        assert_ok!(m.finalize(&task));
        assert!(kept.exists());
    }

    #[tokio::test]
    async fn test_destination_checked_download_ignores_exit_code() {
        let dir = TempDir::new().unwrap();
        let fetch = fetcher("fetch", "printf data > \"$1\"; exit 1").with_completion(CompletionCheck::Destination);
        let m = manager(&dir, vec![fetch], 2);

        let task = m.download(download_to(&dir, "clip.mp4")).unwrap();
        drive_idle(&m).await;

        assert_eq!(task.result.get().unwrap().unwrap(), 1);
        assert_eq!(std::fs::read_to_string(dir.path().join("clip.mp4")).unwrap(), "data");
        assert!(!task.as_download().unwrap().workdir().unwrap().exists());
    }

    #[tokio::test]
    async fn test_active_download_progress_tracks_output_file() {
        let dir = TempDir::new().unwrap();
        let m = manager(&dir, vec![fetcher("fetch", "printf 12345 > \"$1\"; exec sleep 30")], 2);

        let task = m.download(download_to(&dir, "clip.mp4")).unwrap();
        drive_until(&m, |_| task.progress().and_then(|p| p.downloaded) == Some(5)).await;
        assert_eq!(m.bucket_of(task.id()), Some(Bucket::Active));
        let row = m.snapshot().active[0].clone();
        assert_eq!(row.id, task.id());

        assert_ok!(m.terminate(task.id()));
        drive_idle(&m).await;
        assert_eq!(task.result.get().unwrap().unwrap(), -15);
        assert!(!dir.path().join("clip.mp4").exists());
    }

    #[tokio::test]
    async fn test_invalid_template_is_stored_as_such() {
        let dir = TempDir::new().unwrap();
        let m = manager(&dir, vec![fetcher("fetch", "printf data > \"$1\"")], 2);

        let task = Arc::new(Task::download("clip", vec![MediaSource::new(URL)]).with_output_template("{self.ext"));
        let err = assert_err!(m.download(task.clone()));
        assert!(matches!(err, Error::InvalidTemplate { .. }));
        let outcome = task.result.get().unwrap();
        assert!(matches!(outcome.unwrap_err().as_ref(), Error::InvalidTemplate { .. }));
    }

    #[tokio::test]
    async fn test_destination_from_template() {
        let dir = TempDir::new().unwrap();
        let m = manager(&dir, vec![fetcher("fetch", "printf data > \"$1\"")], 2);

        let task = Task::download("Clip", vec![MediaSource::new(URL)]).with_output_template("{self.default_name}.{self.ext}");
        let task = m.download(task).unwrap();
        drive_idle(&m).await;

        assert_eq!(task.result.get().unwrap().unwrap(), 0);
        assert!(dir.path().join("out").join("clip.mp4").is_file());
    }

    #[tokio::test]
    async fn test_nonzero_exit_skips_postprocessing() {
        let dir = TempDir::new().unwrap();
        let m = manager(
            &dir,
            vec![
                fetcher("fetch", "exit 3"),
                stage("p1", "cat \"$1\" > \"$2\""),
            ],
            2,
        );

        let task = download_to(&dir, "clip.mp4").with_postprocessors(vec![ProgramSpec::name("p1")]);
        let task = m.download(task).unwrap();
        drive_idle(&m).await;

        assert_eq!(task.result.get().unwrap().unwrap(), 3);
        let dl = task.as_download().unwrap();
        assert!(dl.postprocessors().is_empty());
        assert!(dl.stage_results().is_empty());
        assert!(!dir.path().join("clip.mp4").exists());
    }

    #[tokio::test]
    async fn test_unknown_downloader_fails_task() {
        let dir = TempDir::new().unwrap();
        let m = manager(&dir, vec![fetcher("fetch", "printf data > \"$1\"")], 2);

        let task = download_to(&dir, "clip.mp4").with_downloader(ProgramSpec::name("no-such-downloader-xyz"));
        let task = m.download(task).unwrap();
        drive_idle(&m).await;

        assert_eq!(m.bucket_of(task.id()), Some(Bucket::Done));
        assert!(task.result.get().unwrap().is_err());
    }

    #[tokio::test]
    async fn test_finalize_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let m = manager(&dir, vec![fetcher("fetch", "printf data > \"$1\"")], 2);

        let task = m.download(download_to(&dir, "clip.mp4")).unwrap();
        drive_idle(&m).await;

        assert_ok!(m.finalize(&task));
        assert_ok!(m.finalize(&task));
        assert_eq!(task.result.get().unwrap().unwrap(), 0);
        assert_eq!(std::fs::read_to_string(dir.path().join("clip.mp4")).unwrap(), "data");
    }

    #[tokio::test]
    async fn test_cancel_pending_download() {
        let dir = TempDir::new().unwrap();
        let m = manager(&dir, vec![fetcher("fetch", "printf data > \"$1\"")], 0);

        let task = m.download(download_to(&dir, "clip.mp4")).unwrap();
        m.worker_tick().await.unwrap();
        assert_eq!(m.bucket_of(task.id()), Some(Bucket::ToDownload));

        assert_ok!(m.cancel(task.id()));
        assert_eq!(m.bucket_of(task.id()), None);
        let outcome = task.result.get().unwrap();
        assert!(matches!(outcome.unwrap_err().as_ref(), Error::Cancelled(_)));
        assert!(m.is_idle());
    }
}

// =============================================================================
// Postprocessing chain
// =============================================================================

mod postprocessing {
    use super::*;

    fn chain_registry() -> Vec<ProgramDef> {
        vec![
            fetcher("fetch", "printf data > \"$1\""),
            stage("p1", "cat \"$1\" > \"$2\"; printf ' p1' >> \"$2\""),
            stage("p2", "cat \"$1\" > \"$2\"; printf ' p2' >> \"$2\""),
        ]
    }

    #[tokio::test]
    async fn test_two_stage_chain() {
        let dir = TempDir::new().unwrap();
        let m = manager(&dir, chain_registry(), 2);

        let task = download_to(&dir, "clip.mp4")
            .with_postprocessors(vec![ProgramSpec::name("p1"), ProgramSpec::name("p2")]);
        let task = m.download(task).unwrap();
        let dl = task.as_download().unwrap();
        assert_eq!(dl.total_stages(), 3);

        // download and p1 done, p2 running
        drive_until(&m, |_| dl.stage_results().len() >= 2).await;
        assert_eq!(dl.stage_results().len(), 2);
        assert_eq!(dl.postprocessors(), vec![ProgramSpec::name("p2")]);
        assert_eq!(m.bucket_of(task.id()), Some(Bucket::Postprocessing));

        drive_idle(&m).await;

        assert_eq!(m.bucket_of(task.id()), Some(Bucket::Done));
        assert_eq!(task.result.get().unwrap().unwrap(), 0);
        assert!(dl.postprocessors().is_empty());
        assert_eq!(
            std::fs::read_to_string(dir.path().join("clip.mp4")).unwrap(),
            "data p1 p2"
        );
        assert!(!dl.workdir().unwrap().exists());
    }

    #[tokio::test]
    async fn test_stage_index_never_decreases() {
        let dir = TempDir::new().unwrap();
        let m = manager(&dir, chain_registry(), 2);

        let task = download_to(&dir, "clip.mp4")
            .with_postprocessors(vec![ProgramSpec::name("p1"), ProgramSpec::name("p2")]);
        let task = m.download(task).unwrap();
        let dl = task.as_download().unwrap();

        let mut last = dl.stage_index();
        for _ in 0..400 {
            m.worker_tick().await.unwrap();
            m.poll_tick().await.unwrap();
            let now = dl.stage_index();
            assert!(now >= last, "stage went from {} to {}", last, now);
            assert!(now <= dl.total_stages());
            last = now;
            if m.is_idle() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(m.is_idle());
    }

    #[tokio::test]
    async fn test_missing_stage_output_keeps_last_good_result() {
        let dir = TempDir::new().unwrap();
        let m = manager(
            &dir,
            vec![
                fetcher("fetch", "printf data > \"$1\""),
                stage("broken", "exit 0"),
                stage("p2", "cat \"$1\" > \"$2\"; printf ' p2' >> \"$2\""),
            ],
            2,
        );

        let task = download_to(&dir, "clip.mp4")
            .with_postprocessors(vec![ProgramSpec::name("broken"), ProgramSpec::name("p2")]);
        let task = m.download(task).unwrap();
        drive_idle(&m).await;

        let dl = task.as_download().unwrap();
        assert!(dl.postprocessors().is_empty());
        assert_eq!(dl.stage_results().len(), 1);
        assert_eq!(std::fs::read_to_string(dir.path().join("clip.mp4")).unwrap(), "data");
    }
}

// =============================================================================
// Scheduling
// =============================================================================

mod scheduling {
    use super::*;

    #[tokio::test]
    async fn test_concurrency_cap_of_one() {
        let dir = TempDir::new().unwrap();
        let m = manager(&dir, vec![fetcher("fetch", "sleep 0.2; printf data > \"$1\"")], 1);

        let first = m.download(download_to(&dir, "a.mp4")).unwrap();
        let second = m.download(download_to(&dir, "b.mp4")).unwrap();

        m.worker_tick().await.unwrap();
        assert_eq!(m.bucket_of(first.id()), Some(Bucket::Active));
        assert_eq!(m.bucket_of(second.id()), Some(Bucket::ToDownload));

        let mut second_started_after_first_left = true;
        for _ in 0..400 {
            m.worker_tick().await.unwrap();
            assert!(m.tasks(Bucket::Active).len() <= 1);
            if m.bucket_of(second.id()) == Some(Bucket::Active) && m.bucket_of(first.id()) == Some(Bucket::Active) {
                second_started_after_first_left = false;
            }
            m.poll_tick().await.unwrap();
            if m.is_idle() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        assert!(second_started_after_first_left);
        assert!(m.is_idle());
        assert_eq!(first.result.get().unwrap().unwrap(), 0);
        assert_eq!(second.result.get().unwrap().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_zero_cap_pauses_downloads() {
        let dir = TempDir::new().unwrap();
        let m = manager(&dir, vec![fetcher("fetch", "printf data > \"$1\"")], 0);

        let task = m.download(download_to(&dir, "clip.mp4")).unwrap();
        m.worker_tick().await.unwrap();
        assert_eq!(m.bucket_of(task.id()), Some(Bucket::ToDownload));

        m.set_max_concurrent_tasks(1);
        m.worker_tick().await.unwrap();
        assert_eq!(m.bucket_of(task.id()), Some(Bucket::Active));
        drive_idle(&m).await;
    }

    #[tokio::test]
    async fn test_plays_ignore_the_download_cap() {
        let dir = TempDir::new().unwrap();
        let m = manager(
            &dir,
            vec![
                fetcher("fetch", "printf data > \"$1\""),
                sh("player", ProgramType::Player, "exit 0", &["{source}"]),
            ],
            0,
        );

        let download = m.download(download_to(&dir, "clip.mp4")).unwrap();
        let play = m.play(Task::play("watch", vec![MediaSource::new(URL)])).unwrap();

        m.worker_tick().await.unwrap();
        assert_eq!(m.bucket_of(play.id()), Some(Bucket::Playing));
        assert_eq!(m.bucket_of(download.id()), Some(Bucket::ToDownload));

        drive_until(&m, |m| m.bucket_of(play.id()) == Some(Bucket::Done)).await;
        assert_eq!(play.result.get().unwrap().unwrap(), 0);
        assert_eq!(m.bucket_of(download.id()), Some(Bucket::ToDownload));
    }

    #[tokio::test]
    async fn test_snapshot_lists_every_task_once() {
        let dir = TempDir::new().unwrap();
        let m = manager(&dir, vec![fetcher("fetch", "printf data > \"$1\"")], 1);

        m.download(download_to(&dir, "a.mp4")).unwrap();
        m.download(download_to(&dir, "b.mp4")).unwrap();
        m.worker_tick().await.unwrap();

        let snapshot = m.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot.active.len(), 1);
        assert_eq!(snapshot.to_download.len(), 1);
        assert_eq!(snapshot.max_concurrent_tasks, 1);
        drive_idle(&m).await;
        assert_eq!(m.snapshot().done.len(), 2);
    }

    #[tokio::test]
    async fn test_background_loops_finish_all_tasks() {
        let dir = TempDir::new().unwrap();
        let m = manager(&dir, vec![fetcher("fetch", "printf data > \"$1\"")], 2);

        let tasks: Vec<Arc<Task>> = ["a.mp4", "b.mp4", "c.mp4"]
            .iter()
            .map(|f| m.download(download_to(&dir, f)).unwrap())
            .collect();

        m.start();
        assert!(m.is_running());
        let outcomes = tokio::time::timeout(
            Duration::from_secs(10),
            futures::future::join_all(tasks.iter().map(|t| t.wait())),
        )
        .await
        .expect("tasks did not finish");
        m.stop();
        assert!(!m.is_running());

        for outcome in outcomes {
            assert_eq!(outcome.unwrap().unwrap(), 0);
        }
        m.wait_idle().await;
    }
}

// =============================================================================
// Playback control
// =============================================================================

mod playback {
    use super::*;

    #[tokio::test]
    async fn test_terminate_exited_play_does_not_fail() {
        let dir = TempDir::new().unwrap();
        let m = manager(&dir, vec![sh("player", ProgramType::Player, "exit 0", &["{source}"])], 2);

        let task = m.play(Task::play("watch", vec![MediaSource::new(URL)])).unwrap();
        m.worker_tick().await.unwrap();
        assert_eq!(m.bucket_of(task.id()), Some(Bucket::Playing));

        let handle = task.proc.get().unwrap();
        assert_eq!(handle.wait().await, 0);

        // still in playing until the poller notices
        assert_ok!(m.terminate(task.id()));
        assert_ok!(m.terminate(task.id()));

        m.poll_tick().await.unwrap();
        assert_eq!(m.bucket_of(task.id()), Some(Bucket::Done));
        assert_eq!(task.result.get().unwrap().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_terminate_running_play() {
        let dir = TempDir::new().unwrap();
        let m = manager(&dir, vec![sh("player", ProgramType::Player, "exec sleep 30", &[])], 2);

        let task = m.play(Task::play("watch", vec![MediaSource::new(URL)])).unwrap();
        m.worker_tick().await.unwrap();

        assert_ok!(m.terminate(task.id()));
        drive_until(&m, |m| m.is_idle()).await;

        let code = task.result.get().unwrap().unwrap();
        assert_eq!(code, -15);
    }

    #[tokio::test]
    async fn test_play_through_downloader() {
        let dir = TempDir::new().unwrap();
        let seen = dir.path().join("seen.txt");
        let player = sh(
            "player",
            ProgramType::Player,
            "cat > \"$1\"; exec sleep 30",
            &[seen.to_str().unwrap()],
        )
        .with_url_patterns(&[r"^https?://"])
        .with_output(OutputMode::Ignore);
        let torrent = sh("torrent", ProgramType::Downloader, "printf streamed", &["{source}"])
            .with_url_patterns(&[r"^magnet:"]);
        let m = manager(&dir, vec![player, torrent], 0);

        let task = m.play(Task::play("film", vec![MediaSource::new("magnet:?xt=urn:btih:abc")])).unwrap();
        m.worker_tick().await.unwrap();
        assert_eq!(m.bucket_of(task.id()), Some(Bucket::Playing));

        let program = task.program.get().unwrap();
        assert_eq!(program.name(), "player");
        assert_eq!(program.upstream().unwrap().name(), "torrent");

        // the player reports nothing itself, so the downloader's refreshed
        // progress shows through while the player keeps running
        drive_until(&m, |_| {
            task.progress().and_then(|p| p.status).as_deref() == Some("exited (0)")
        })
        .await;
        assert_eq!(m.bucket_of(task.id()), Some(Bucket::Playing));
        assert_eq!(std::fs::read_to_string(&seen).unwrap(), "streamed");

        assert_ok!(m.terminate(task.id()));
        drive_idle(&m).await;
        assert_eq!(task.result.get().unwrap().unwrap(), -15);
    }

    #[tokio::test]
    async fn test_terminate_queued_play_is_unknown() {
        let dir = TempDir::new().unwrap();
        let m = manager(&dir, vec![], 2);

        let task = m.play(Task::play("watch", vec![MediaSource::new(URL)])).unwrap();
        let err = assert_err!(m.terminate(task.id()));
        assert!(matches!(err, Error::UnknownTask(_)));
    }

    #[test]
    fn test_task_cannot_be_queued_twice() {
        tokio_test::block_on(async {
            let dir = TempDir::new().unwrap();
            let m = manager(&dir, vec![], 2);

            let task = m.play(Task::play("watch", vec![MediaSource::new(URL)])).unwrap();
            let err = assert_err!(m.play(task.clone()));
            assert!(matches!(err, Error::AlreadyQueued(_)));
            assert_eq!(m.snapshot().len(), 1);
        });
    }
}

//! Player launcher
//!
//! Opens a task's sources in a media player. Sources a player cannot open
//! directly (magnet links, sites that need extraction) are routed through a
//! downloader first, either piped or launched by the downloader itself.

use tracing::info;

use super::{
    downloader, LaunchSettings, ProcessHandle, Program, ProgramDef, ProgramRegistry, ProgramSource,
    ProgramSpec, ProgramType, RunOptions,
};
use crate::error::{Error, Result};
use crate::task::Task;

/// Start playback of `task`
///
/// The chosen program is stored in `task.program` and its process in
/// `task.proc` before this returns.
pub async fn play(
    registry: &ProgramRegistry,
    settings: &LaunchSettings,
    task: &Task,
    player_spec: &ProgramSpec,
    downloader_spec: Option<&ProgramSpec>,
) -> Result<ProcessHandle> {
    let source = task
        .primary_source()
        .ok_or_else(|| Error::NoSource(task.title.clone()))?;
    let players = registry.candidates(ProgramType::Player, player_spec)?;
    let locators: Vec<String> = task.sources.iter().map(|s| s.locator.clone()).collect();

    let direct = players
        .iter()
        .find(|p| p.supports_url(&source.locator) && p.supports_media_type(source.media_type));

    let player = match (direct, downloader_spec) {
        (Some(def), None) => {
            let player = Program::new(def.clone(), settings.progress_interval);
            player.set_source(ProgramSource::Locators(locators));
            player
        }
        (_, spec) => {
            let spec = spec.cloned().unwrap_or_default();
            let dl_def = downloader::select(registry, &spec, &source.locator)?;
            let player_def = pick_player(&players, &dl_def);

            std::fs::create_dir_all(&settings.temp_dir)?;
            let upstream = Program::new(dl_def, settings.progress_interval);
            upstream.set_source(ProgramSource::Locators(locators));
            upstream.set_workdir(settings.temp_dir.clone());

            let player = Program::new(player_def, settings.progress_interval);
            player.set_source(ProgramSource::Program(upstream));
            player
        }
    };

    task.program.set(player.clone())?;
    let handle = player.run(&RunOptions::for_task(task)).await?;
    task.proc.set(handle.clone())?;
    info!(
        task_id = task.id(),
        player = %player.name(),
        via = ?player.upstream().map(|u| u.name().to_string()),
        pid = ?handle.pid(),
        "playback started"
    );
    Ok(handle)
}

/// Prefer a player the downloader can launch itself
fn pick_player(players: &[ProgramDef], downloader: &ProgramDef) -> ProgramDef {
    players
        .iter()
        .find(|p| downloader.integrates(p))
        .unwrap_or(&players[0])
        .clone()
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::models::MediaSource;
    use crate::program::{Backend, OutputMode};

    fn registry(dir: &std::path::Path) -> ProgramRegistry {
        let mut r = ProgramRegistry::new();
        let log = dir.join("played.txt");
        r.register(
            ProgramDef::custom(
                "fake-player",
                ProgramType::Player,
                "/bin/sh",
                vec![
                    "-c".into(),
                    "printf '%s' \"$2\" > \"$1\"".into(),
                    "sh".into(),
                    log.display().to_string(),
                    "{source}".into(),
                ],
            )
            .with_url_patterns(&[r"^https?://"])
            .with_output(OutputMode::Ignore),
        );
        r.register(
            ProgramDef::custom(
                "fake-torrent",
                ProgramType::Downloader,
                "/bin/sh",
                vec!["-c".into(), "printf streamed".into(), "sh".into(), "{source}".into()],
            )
            .with_url_patterns(&[r"^magnet:"]),
        );
        r
    }

    #[tokio::test]
    async fn test_play_direct() {
        let dir = tempfile::tempdir().unwrap();
        let r = registry(dir.path());
        let task = Task::play("clip", vec![MediaSource::new("https://example.com/a.mp4")]);

        let handle = play(&r, &LaunchSettings::default(), &task, &ProgramSpec::Any, None)
            .await
            .unwrap();
        assert_eq!(handle.wait().await, 0);
        assert_eq!(task.program.get().unwrap().name(), "fake-player");
        assert!(task.proc.is_set());
        assert_eq!(
            std::fs::read_to_string(dir.path().join("played.txt")).unwrap(),
            "https://example.com/a.mp4"
        );
    }

    #[tokio::test]
    async fn test_play_routes_unsupported_source_through_downloader() {
        let dir = tempfile::tempdir().unwrap();
        let r = registry(dir.path());
        let task = Task::play("torrent", vec![MediaSource::new("magnet:?xt=urn:btih:abc")]);

        let handle = play(&r, &LaunchSettings::default(), &task, &ProgramSpec::Any, None)
            .await
            .unwrap();
        assert_eq!(handle.wait().await, 0);

        let player = task.program.get().unwrap();
        assert_eq!(player.upstream().unwrap().name(), "fake-torrent");
        // the player saw stdin, not the magnet link
        assert_eq!(std::fs::read_to_string(dir.path().join("played.txt")).unwrap(), "-");
    }

    #[tokio::test]
    async fn test_play_unknown_player() {
        let dir = tempfile::tempdir().unwrap();
        let r = registry(dir.path());
        let task = Task::play("x", vec![MediaSource::new("https://example.com/a.mp4")]);
        let err = play(
            &r,
            &LaunchSettings::default(),
            &task,
            &ProgramSpec::name("no-such-player-anywhere"),
            None,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::ProgramNotFound(_)));
        assert!(!task.program.is_set());
    }

    #[test]
    fn test_pick_player_prefers_integration() {
        let players = vec![
            ProgramDef::custom("other", ProgramType::Player, "/bin/true", vec![]),
            ProgramDef::builtin(Backend::Vlc, "/usr/bin/vlc"),
        ];
        let wt = ProgramDef::builtin(Backend::Webtorrent, "/usr/bin/webtorrent");
        assert_eq!(pick_player(&players, &wt).backend, Backend::Vlc);

        let ytdlp = ProgramDef::builtin(Backend::YtDlp, "/usr/bin/yt-dlp");
        assert_eq!(pick_player(&players, &ytdlp).name, "other");
    }
}

//! mediatui - terminal task manager for media players and downloaders
//!
//! Queues play and download tasks, runs external programs (mpv, vlc,
//! yt-dlp, wget, curl, webtorrent, ffmpeg or anything configured) with at
//! most N downloads at a time, chains postprocessors over finished
//! downloads and moves results into place.
//!
//! # Modules
//!
//! - `models` - media sources, listings and transfer progress
//! - `template` - output filename templates
//! - `task` - play and download tasks with single-assignment slots
//! - `program` - program registry, process wiring and progress parsers
//! - `manager` - the scheduler: buckets, worker and poller loops
//! - `config` - TOML configuration
//! - `cli` / `commands` - command line surface
//! - `ui` / `app` - live task monitor

pub mod app;
pub mod cli;
pub mod commands;
pub mod config;
pub mod context;
pub mod error;
pub mod logging;
pub mod manager;
pub mod models;
pub mod program;
pub mod task;
pub mod template;
pub mod ui;

// Re-export commonly used types
pub use config::Config;
pub use context::AppContext;
pub use error::{Error, Result};
pub use manager::{Bucket, ManagerSettings, ManagerSnapshot, TaskManager};
pub use models::{MediaListing, MediaSource, MediaType, Progress};
pub use program::{
    Backend, ProcessHandle, Program, ProgramDef, ProgramRegistry, ProgramSpec, ProgramType,
};
pub use task::{Task, TaskId, TaskOutcome, TaskSummary};
pub use template::{FilenameContext, Template};

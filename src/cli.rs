//! CLI - Command Line Interface for mediatui
//!
//! Every task the monitor shows can be queued from the command line. All
//! output is JSON-parseable with `--json` (the default when stdout is not a
//! terminal).
//!
//! # Examples
//!
//! ```bash
//! # Play a stream, routing it through a downloader if needed
//! mediatui play "magnet:?xt=urn:btih:..." --player mpv
//!
//! # Download two files, at most one at a time, then convert to mp3
//! mediatui download https://a/x.mp4 https://b/y.mp4 --max-concurrent 1 -p tomp3
//!
//! # Inspect configured programs
//! mediatui programs --type downloader
//! ```

use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};
use std::io::IsTerminal;
use std::path::PathBuf;

use crate::error::Error;
use crate::program::ProgramType;

// =============================================================================
// Exit Codes
// =============================================================================

/// Exit codes for CLI operations (semantic for scripting)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    /// Success
    Success = 0,
    /// General error
    Error = 1,
    /// Invalid arguments
    InvalidArgs = 2,
    /// No program could run the task
    ProgramNotFound = 3,
    /// Download destination already exists
    DestinationExists = 4,
    /// A task ran but did not succeed
    TaskFailed = 5,
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> i32 {
        code as i32
    }
}

impl From<ExitCode> for std::process::ExitCode {
    fn from(code: ExitCode) -> std::process::ExitCode {
        std::process::ExitCode::from(code as u8)
    }
}

impl From<&Error> for ExitCode {
    fn from(err: &Error) -> Self {
        match err.root() {
            Error::ProgramNotFound(_) | Error::NoProgram { .. } => ExitCode::ProgramNotFound,
            Error::DestinationExists(_) | Error::DestinationClaimed { .. } => ExitCode::DestinationExists,
            Error::InvalidTemplate { .. } | Error::Config(_) => ExitCode::InvalidArgs,
            _ => ExitCode::Error,
        }
    }
}

// =============================================================================
// Main CLI Structure
// =============================================================================

/// mediatui - queue, play and download media with external programs
///
/// Run without arguments to open the task monitor.
#[derive(Parser, Debug)]
#[command(
    name = "mediatui",
    version,
    about = "Queue, play and download media with external programs",
    long_about = "Runs media players, downloaders and postprocessors as subprocesses, \
                  with a concurrency cap on downloads and live progress.\n\n\
                  Run without arguments to open the task monitor.\n\
                  Use subcommands for automation and scripting.",
    after_help = "EXAMPLES:\n\
                  mediatui                                   Open the task monitor\n\
                  mediatui play https://x/clip.mp4           Play with the default player\n\
                  mediatui download URL -p tomp3 --dest a.mp3  Download and convert\n\
                  mediatui programs --json                   List configured programs"
)]
pub struct Cli {
    /// Output format as JSON (default for non-TTY)
    #[arg(long, short = 'j', global = true)]
    pub json: bool,

    /// Suppress non-essential output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,

    /// Path to config file
    #[arg(long, short = 'c', global = true)]
    pub config: Option<PathBuf>,

    /// Log level filter (overridden by MEDIATUI_LOG / RUST_LOG)
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,

    /// Subcommand to run (omit for the task monitor)
    #[command(subcommand)]
    pub command: Option<Command>,
}

impl Cli {
    /// Check if running in CLI mode (has subcommand that does not open the monitor)
    pub fn is_cli_mode(&self) -> bool {
        match &self.command {
            Some(Command::Download(cmd)) => !cmd.tui,
            Some(_) => true,
            None => false,
        }
    }

    /// Check if JSON output should be used
    pub fn should_json(&self) -> bool {
        self.json || !std::io::stdout().is_terminal()
    }
}

// =============================================================================
// Subcommands
// =============================================================================

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Play media with a player
    #[command(visible_alias = "p")]
    Play(PlayCmd),

    /// Download media, optionally postprocessing it
    #[command(visible_alias = "dl")]
    Download(DownloadCmd),

    /// List configured and detected programs
    Programs(ProgramsCmd),

    /// Render a filename template for a locator
    Template(TemplateCmd),
}

/// Fields shared by play and download
#[derive(Args, Debug, Clone)]
pub struct TaskArgs {
    /// URLs, magnet links or paths (one task per locator)
    #[arg(required = true)]
    pub locators: Vec<String>,

    /// Task title (defaults to a name derived from the locator)
    #[arg(long, short = 't')]
    pub title: Option<String>,

    /// Provider name used for `{listing.provider}`
    #[arg(long, default_value = "direct")]
    pub provider: String,

    /// Maximum video height (e.g. 1080)
    #[arg(long, short = 'r')]
    pub resolution: Option<u32>,

    /// Downloader spec: a name, a comma-separated priority list, or "any"
    #[arg(long)]
    pub downloader: Option<String>,
}

#[derive(Args, Debug)]
pub struct PlayCmd {
    #[command(flatten)]
    pub task: TaskArgs,

    /// Player spec: a name, a comma-separated priority list, or "any"
    #[arg(long)]
    pub player: Option<String>,
}

#[derive(Args, Debug)]
pub struct DownloadCmd {
    #[command(flatten)]
    pub task: TaskArgs,

    /// Destination file (only with a single locator)
    #[arg(long, short = 'o')]
    pub dest: Option<PathBuf>,

    /// Postprocessor to run after download (repeatable, in order)
    #[arg(long = "postprocess", short = 'p')]
    pub postprocessors: Vec<String>,

    /// Filename template, e.g. "{listing.title}.{self.ext}"
    #[arg(long)]
    pub template: Option<String>,

    /// Cap on concurrent downloads for this run
    #[arg(long, short = 'm')]
    pub max_concurrent: Option<usize>,

    /// Watch the downloads in the task monitor
    #[arg(long)]
    pub tui: bool,
}

impl DownloadCmd {
    /// Reject flag combinations that cannot work
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.dest.is_some() && self.task.locators.len() > 1 {
            return Err("--dest can only be used with a single locator");
        }
        if self.max_concurrent == Some(0) {
            return Err("--max-concurrent must be at least 1");
        }
        Ok(())
    }
}

/// Program type filter for `programs`
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProgramTypeFilter {
    Player,
    Downloader,
    Postprocessor,
}

impl From<ProgramTypeFilter> for ProgramType {
    fn from(f: ProgramTypeFilter) -> Self {
        match f {
            ProgramTypeFilter::Player => ProgramType::Player,
            ProgramTypeFilter::Downloader => ProgramType::Downloader,
            ProgramTypeFilter::Postprocessor => ProgramType::Postprocessor,
        }
    }
}

#[derive(Args, Debug)]
pub struct ProgramsCmd {
    /// Only list programs of this type
    #[arg(long = "type", short = 't', value_enum)]
    pub program_type: Option<ProgramTypeFilter>,
}

#[derive(Args, Debug)]
pub struct TemplateCmd {
    /// Template, e.g. "{listing.provider}.{self.default_name}.{self.ext}"
    pub template: String,

    /// Locator to render it for
    pub locator: String,

    /// Provider name used for `{listing.provider}`
    #[arg(long, default_value = "direct")]
    pub provider: String,

    /// Listing title used for `{listing.title}`
    #[arg(long, short = 't')]
    pub title: Option<String>,
}

// =============================================================================
// JSON Output Types
// =============================================================================

/// Generic JSON output wrapper with status
#[derive(Debug, Serialize, Deserialize)]
pub struct JsonOutput<T: Serialize> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "is_zero")]
    pub exit_code: i32,
}

fn is_zero(n: &i32) -> bool {
    *n == 0
}

impl<T: Serialize> JsonOutput<T> {
    /// Create success output with data
    pub fn success(data: T) -> Self {
        Self {
            data: Some(data),
            error: None,
            exit_code: 0,
        }
    }

    /// Create error output (no data)
    pub fn error_msg(msg: impl Into<String>, code: ExitCode) -> JsonOutput<()> {
        JsonOutput::<()> {
            data: None,
            error: Some(msg.into()),
            exit_code: code.into(),
        }
    }
}

// =============================================================================
// Output Helpers
// =============================================================================

/// Output handler for consistent formatting
pub struct Output {
    pub json: bool,
    pub quiet: bool,
}

impl Output {
    pub fn new(cli: &Cli) -> Self {
        Self {
            json: cli.should_json(),
            quiet: cli.quiet,
        }
    }

    /// Print success data
    pub fn print<T: Serialize>(&self, data: T) -> anyhow::Result<()> {
        if self.json {
            let output = JsonOutput::success(data);
            println!("{}", serde_json::to_string_pretty(&output)?);
        } else {
            println!("{}", serde_json::to_string_pretty(&data)?);
        }
        Ok(())
    }

    /// Print a line of human-readable output (JSON mode prints nothing)
    pub fn line(&self, msg: impl std::fmt::Display) {
        if !self.json {
            println!("{}", msg);
        }
    }

    /// Print error and return exit code
    pub fn error(&self, msg: impl Into<String>, code: ExitCode) -> ExitCode {
        let msg = msg.into();
        if self.json {
            let output = JsonOutput::<()>::error_msg(&msg, code);
            if let Ok(json) = serde_json::to_string_pretty(&output) {
                eprintln!("{}", json);
            }
        } else if !self.quiet {
            eprintln!("Error: {}", msg);
        }
        code
    }

    /// Print info message (suppressed in quiet mode)
    pub fn info(&self, msg: impl std::fmt::Display) {
        if !self.quiet && !self.json {
            eprintln!("{}", msg);
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

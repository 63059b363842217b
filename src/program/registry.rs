//! Program registry
//!
//! An explicit table of the players, downloaders and postprocessors this
//! machine can run. Built once at startup from the config file plus the
//! known [`Backend`]s found on `PATH`; programs are then selected from it by
//! [`ProgramSpec`].

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

use super::parser::{self, ProgressParser};
use super::{OutputMode, RunOptions};
use crate::config::{Config, ProgramConfig};
use crate::error::{Error, Result};
use crate::models::MediaType;

// =============================================================================
// Program types and backends
// =============================================================================

/// Role a program plays in a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgramType {
    Player,
    Downloader,
    Postprocessor,
}

impl fmt::Display for ProgramType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProgramType::Player => write!(f, "player"),
            ProgramType::Downloader => write!(f, "downloader"),
            ProgramType::Postprocessor => write!(f, "postprocessor"),
        }
    }
}

/// How a downstream program consumes this program's output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipeMode {
    /// Write to stdout, which becomes the downstream program's stdin
    #[default]
    Stdout,
    /// Write to a named pipe the downstream program opens as a file
    Fifo,
    /// Launch the downstream program itself (e.g. `webtorrent --mpv`)
    Integrated,
}

/// What "finished" means for a program
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompletionCheck {
    /// The process exited
    #[default]
    Exit,
    /// The process exited and its output is on disk
    Destination,
}

/// Known program families
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Backend {
    Mpv,
    Vlc,
    YtDlp,
    Wget,
    Curl,
    Webtorrent,
    Ffmpeg,
    #[default]
    Custom,
}

impl Backend {
    /// Backends probed on `PATH` at startup, in preference order
    pub const BUILTIN: [Backend; 7] = [
        Backend::Mpv,
        Backend::Vlc,
        Backend::YtDlp,
        Backend::Webtorrent,
        Backend::Wget,
        Backend::Curl,
        Backend::Ffmpeg,
    ];

    /// Executable name
    pub fn command(&self) -> &'static str {
        match self {
            Backend::Mpv => "mpv",
            Backend::Vlc => {
                #[cfg(target_os = "macos")]
                if Path::new("/Applications/VLC.app").exists() {
                    return "/Applications/VLC.app/Contents/MacOS/VLC";
                }
                "vlc"
            }
            Backend::YtDlp => "yt-dlp",
            Backend::Wget => "wget",
            Backend::Curl => "curl",
            Backend::Webtorrent => "webtorrent",
            Backend::Ffmpeg => "ffmpeg",
            Backend::Custom => "",
        }
    }

    /// Guess the backend from an executable name or path
    pub fn from_command(command: &str) -> Backend {
        let stem = Path::new(command)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(command)
            .to_ascii_lowercase();
        match stem.as_str() {
            "mpv" => Backend::Mpv,
            "vlc" | "cvlc" => Backend::Vlc,
            "yt-dlp" | "youtube-dl" => Backend::YtDlp,
            "wget" => Backend::Wget,
            "curl" => Backend::Curl,
            "webtorrent" => Backend::Webtorrent,
            "ffmpeg" => Backend::Ffmpeg,
            _ => Backend::Custom,
        }
    }

    pub fn program_type(&self) -> ProgramType {
        match self {
            Backend::Mpv | Backend::Vlc => ProgramType::Player,
            Backend::Ffmpeg => ProgramType::Postprocessor,
            _ => ProgramType::Downloader,
        }
    }

    /// Argument template; `{options}` marks where per-task options go
    pub fn default_args(&self) -> Vec<&'static str> {
        match self {
            Backend::Mpv => vec!["--force-window=immediate", "{options}", "{source}"],
            Backend::Vlc => vec!["--no-video-title-show", "{options}", "{source}"],
            Backend::YtDlp => vec!["--newline", "--no-part", "{options}", "-o", "{outfile}", "{source}"],
            Backend::Wget => vec!["--progress=bar:force", "{options}", "-O", "{outfile}", "{source}"],
            Backend::Curl => vec!["-L", "-s", "-S", "{options}", "-o", "{outfile}", "{source}"],
            Backend::Webtorrent => vec!["download", "{source}", "--out", "{outdir}", "{options}"],
            Backend::Ffmpeg => vec!["-y", "-nostdin", "-i", "{source}", "{options}", "{outfile}"],
            Backend::Custom => vec!["{options}", "{source}"],
        }
    }

    /// Locators the backend accepts; empty means any
    pub fn url_patterns(&self) -> Vec<&'static str> {
        match self {
            Backend::Mpv | Backend::Vlc => vec![r"^(https?|rtmp|rtsp|file)://", r"^/", r"^-$"],
            Backend::YtDlp | Backend::Wget | Backend::Curl => vec![r"^https?://"],
            Backend::Webtorrent => vec![r"^magnet:\?", r"\.torrent$"],
            Backend::Ffmpeg | Backend::Custom => vec![],
        }
    }

    pub fn media_types(&self) -> Vec<MediaType> {
        match self {
            Backend::Mpv | Backend::Vlc | Backend::Ffmpeg => {
                vec![MediaType::Video, MediaType::Audio, MediaType::Image]
            }
            _ => vec![],
        }
    }

    pub fn pipe_mode(&self) -> PipeMode {
        match self {
            Backend::Webtorrent => PipeMode::Integrated,
            _ => PipeMode::Stdout,
        }
    }

    pub fn output_mode(&self) -> OutputMode {
        match self {
            Backend::Mpv | Backend::Vlc => OutputMode::Ignore,
            _ => OutputMode::Watch,
        }
    }

    pub fn completion(&self) -> CompletionCheck {
        match self {
            Backend::Webtorrent => CompletionCheck::Destination,
            _ => CompletionCheck::Exit,
        }
    }

    /// Flags for resolution/format options
    pub fn option_args(&self, opts: &RunOptions) -> Vec<String> {
        let mut args = Vec::new();
        match self {
            Backend::YtDlp => {
                if let Some(format) = &opts.format {
                    args.push("-f".to_string());
                    args.push(format.clone());
                } else if let Some(height) = opts.resolution {
                    args.push("-f".to_string());
                    args.push(format!(
                        "bestvideo[height<={h}]+bestaudio/best[height<={h}]",
                        h = height
                    ));
                }
            }
            Backend::Mpv => {
                if let Some(format) = &opts.format {
                    args.push(format!("--ytdl-format={}", format));
                } else if let Some(height) = opts.resolution {
                    args.push(format!("--ytdl-format=best[height<={}]", height));
                }
                if let Some(title) = &opts.task_title {
                    args.push(format!("--force-media-title={}", title));
                }
            }
            _ => {}
        }
        args
    }

    /// Arguments that make this backend launch `player` itself
    pub fn integration_args(&self, player: Backend) -> Option<Vec<String>> {
        match (self, player) {
            (Backend::Webtorrent, Backend::Mpv) => Some(vec!["--mpv".into(), "--not-on-top".into()]),
            (Backend::Webtorrent, Backend::Vlc) => Some(vec!["--vlc".into(), "--not-on-top".into()]),
            _ => None,
        }
    }

    /// Argument template when running integrated with a player
    pub fn integrated_args(&self) -> Vec<&'static str> {
        match self {
            Backend::Webtorrent => vec!["{source}", "{options}"],
            _ => self.default_args(),
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backend::Custom => write!(f, "custom"),
            other => write!(f, "{}", other.command().rsplit('/').next().unwrap_or("")),
        }
    }
}

// =============================================================================
// Program definitions
// =============================================================================

/// A runnable, configured program
#[derive(Debug, Clone)]
pub struct ProgramDef {
    pub name: String,
    pub program_type: ProgramType,
    pub backend: Backend,
    pub path: PathBuf,
    pub args: Vec<String>,
    pub media_types: Vec<MediaType>,
    pub url_patterns: Vec<Regex>,
    pub pipe: PipeMode,
    pub output: OutputMode,
    pub completion: CompletionCheck,
    /// Output extension for postprocessors that change the container
    pub extension: Option<String>,
}

impl ProgramDef {
    /// Definition for a known backend at `path`
    pub fn builtin(backend: Backend, path: impl Into<PathBuf>) -> Self {
        Self {
            name: backend.to_string(),
            program_type: backend.program_type(),
            backend,
            path: path.into(),
            args: backend.default_args().into_iter().map(String::from).collect(),
            media_types: backend.media_types(),
            url_patterns: compile_patterns(&backend.url_patterns()),
            pipe: backend.pipe_mode(),
            output: backend.output_mode(),
            completion: backend.completion(),
            extension: None,
        }
    }

    /// Definition for an arbitrary executable
    pub fn custom(
        name: impl Into<String>,
        program_type: ProgramType,
        path: impl Into<PathBuf>,
        args: Vec<String>,
    ) -> Self {
        Self {
            name: name.into(),
            program_type,
            backend: Backend::Custom,
            path: path.into(),
            args,
            media_types: vec![],
            url_patterns: vec![],
            pipe: PipeMode::Stdout,
            output: OutputMode::Watch,
            completion: CompletionCheck::Exit,
            extension: None,
        }
    }

    pub fn with_output(mut self, output: OutputMode) -> Self {
        self.output = output;
        self
    }

    pub fn with_pipe(mut self, pipe: PipeMode) -> Self {
        self.pipe = pipe;
        self
    }

    pub fn with_completion(mut self, completion: CompletionCheck) -> Self {
        self.completion = completion;
        self
    }

    pub fn with_url_patterns(mut self, patterns: &[&str]) -> Self {
        self.url_patterns = compile_patterns(patterns);
        self
    }

    pub fn with_media_types(mut self, media_types: Vec<MediaType>) -> Self {
        self.media_types = media_types;
        self
    }

    /// Build from a `[programs.<name>]` config table
    pub fn from_config(name: &str, cfg: &ProgramConfig) -> Result<Self> {
        let command = cfg.path.clone().unwrap_or_else(|| PathBuf::from(name));
        let backend = cfg
            .backend
            .unwrap_or_else(|| Backend::from_command(&command.to_string_lossy()));
        let program_type = cfg.program_type.unwrap_or_else(|| backend.program_type());
        let path = locate(&command).ok_or_else(|| Error::ProgramNotFound(command.display().to_string()))?;

        let mut def = if backend == Backend::Custom {
            Self::custom(name, program_type, path, vec!["{options}".into(), "{source}".into()])
        } else {
            let mut def = Self::builtin(backend, path);
            def.name = name.to_string();
            def.program_type = program_type;
            def
        };
        if let Some(args) = &cfg.args {
            def.args = args.clone();
        }
        if let Some(types) = &cfg.media_types {
            def.media_types = types.clone();
        }
        if let Some(patterns) = &cfg.url_patterns {
            def.url_patterns = patterns
                .iter()
                .map(|p| Regex::new(p).map_err(|e| Error::Config(format!("programs.{}: {}", name, e))))
                .collect::<Result<_>>()?;
        }
        if let Some(pipe) = cfg.pipe {
            def.pipe = pipe;
        }
        if let Some(output) = cfg.output {
            def.output = output;
        }
        if let Some(completion) = cfg.completion {
            def.completion = completion;
        }
        def.extension = cfg.extension.clone();
        Ok(def)
    }

    /// True if the program can open `locator`
    pub fn supports_url(&self, locator: &str) -> bool {
        self.url_patterns.is_empty() || self.url_patterns.iter().any(|re| re.is_match(locator))
    }

    pub fn supports_media_type(&self, media_type: MediaType) -> bool {
        self.media_types.is_empty() || self.media_types.contains(&media_type)
    }

    /// True if this program can launch `player` itself
    pub fn integrates(&self, player: &ProgramDef) -> bool {
        self.pipe == PipeMode::Integrated && self.backend.integration_args(player.backend).is_some()
    }

    /// Fresh output parser for one run
    pub fn parser(&self) -> Option<Arc<dyn ProgressParser>> {
        parser::for_backend(self.backend)
    }
}

fn compile_patterns(patterns: &[&str]) -> Vec<Regex> {
    patterns.iter().filter_map(|p| Regex::new(p).ok()).collect()
}

/// Resolve an executable from an explicit path or `PATH`
pub fn locate(command: &Path) -> Option<PathBuf> {
    if command.components().count() > 1 {
        return command.is_file().then(|| command.to_path_buf());
    }
    which::which(command).ok()
}

// =============================================================================
// Selection specs
// =============================================================================

/// Capability filter, the config-dict form of a spec
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgramFilter {
    #[serde(default)]
    pub media_types: Vec<MediaType>,
    #[serde(default)]
    pub backend: Option<Backend>,
    #[serde(default)]
    pub pipe: Option<PipeMode>,
    #[serde(default)]
    pub output: Option<OutputMode>,
}

impl ProgramFilter {
    pub fn matches(&self, def: &ProgramDef) -> bool {
        self.media_types.iter().all(|t| def.supports_media_type(*t))
            && self.backend.map(|b| b == def.backend).unwrap_or(true)
            && self.pipe.map(|p| p == def.pipe).unwrap_or(true)
            && self.output.map(|o| o == def.output).unwrap_or(true)
    }
}

/// Predicate over program definitions
pub type ProgramPredicate = Arc<dyn Fn(&ProgramDef) -> bool + Send + Sync>;

/// Which program(s) a task may use
#[derive(Clone, Default)]
pub enum ProgramSpec {
    /// Every configured program of the requested type
    #[default]
    Any,
    /// A configured program by name, or an executable on `PATH`
    Name(String),
    /// Each spec in order, first match wins
    List(Vec<ProgramSpec>),
    /// Configured programs with the given capabilities
    Filter(ProgramFilter),
    /// Configured programs accepted by a predicate
    Predicate(ProgramPredicate),
}

impl ProgramSpec {
    pub fn name(name: impl Into<String>) -> Self {
        ProgramSpec::Name(name.into())
    }

    /// Parse a command-line spec: "" / "any" → Any, "a,b" → List, else Name
    pub fn parse(s: &str) -> Self {
        let s = s.trim();
        if s.is_empty() || s.eq_ignore_ascii_case("any") || s.eq_ignore_ascii_case("true") {
            return ProgramSpec::Any;
        }
        if s.contains(',') {
            return ProgramSpec::List(
                s.split(',')
                    .map(str::trim)
                    .filter(|p| !p.is_empty())
                    .map(ProgramSpec::name)
                    .collect(),
            );
        }
        ProgramSpec::name(s)
    }
}

impl PartialEq for ProgramSpec {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (ProgramSpec::Any, ProgramSpec::Any) => true,
            (ProgramSpec::Name(a), ProgramSpec::Name(b)) => a == b,
            (ProgramSpec::List(a), ProgramSpec::List(b)) => a == b,
            (ProgramSpec::Filter(a), ProgramSpec::Filter(b)) => a == b,
            (ProgramSpec::Predicate(a), ProgramSpec::Predicate(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for ProgramSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProgramSpec::Any => write!(f, "Any"),
            ProgramSpec::Name(n) => f.debug_tuple("Name").field(n).finish(),
            ProgramSpec::List(l) => f.debug_tuple("List").field(l).finish(),
            ProgramSpec::Filter(flt) => f.debug_tuple("Filter").field(flt).finish(),
            ProgramSpec::Predicate(_) => write!(f, "Predicate(..)"),
        }
    }
}

impl fmt::Display for ProgramSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProgramSpec::Any => write!(f, "any"),
            ProgramSpec::Name(n) => write!(f, "{}", n),
            ProgramSpec::List(l) => {
                let names: Vec<String> = l.iter().map(|s| s.to_string()).collect();
                write!(f, "{}", names.join(","))
            }
            ProgramSpec::Filter(_) => write!(f, "filter"),
            ProgramSpec::Predicate(_) => write!(f, "predicate"),
        }
    }
}

// =============================================================================
// Registry
// =============================================================================

/// Every program available to the task manager, in preference order
#[derive(Debug, Clone, Default)]
pub struct ProgramRegistry {
    programs: Vec<ProgramDef>,
}

impl ProgramRegistry {
    /// An empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from config: configured programs first, then built-in backends
    /// found on `PATH`. Programs without an executable are skipped with a warning.
    pub fn from_config(config: &Config) -> Self {
        let mut registry = Self::new();

        for (name, cfg) in &config.programs {
            if cfg.disabled {
                debug!(program = %name, "program disabled in config");
                continue;
            }
            match ProgramDef::from_config(name, cfg) {
                Ok(def) => registry.register(def),
                Err(e) => warn!(program = %name, "skipping program: {}", e),
            }
        }

        for backend in Backend::BUILTIN {
            let name = backend.to_string();
            if config.programs.contains_key(&name) {
                continue;
            }
            match locate(Path::new(backend.command())) {
                Some(path) => registry.register(ProgramDef::builtin(backend, path)),
                None => debug!(program = %name, "not found on PATH"),
            }
        }

        for program_type in [ProgramType::Player, ProgramType::Downloader, ProgramType::Postprocessor] {
            if registry.by_type(program_type).next().is_none() {
                warn!("no {} available", program_type);
            }
        }
        registry
    }

    /// Add a program; a program with the same name and type is replaced
    pub fn register(&mut self, def: ProgramDef) {
        self.programs
            .retain(|p| !(p.name == def.name && p.program_type == def.program_type));
        debug!(program = %def.name, kind = %def.program_type, path = %def.path.display(), "registered program");
        self.programs.push(def);
    }

    pub fn all(&self) -> &[ProgramDef] {
        &self.programs
    }

    pub fn by_type(&self, program_type: ProgramType) -> impl Iterator<Item = &ProgramDef> {
        self.programs
            .iter()
            .filter(move |p| p.program_type == program_type)
    }

    pub fn get(&self, program_type: ProgramType, name: &str) -> Option<&ProgramDef> {
        self.by_type(program_type).find(|p| p.name == name)
    }

    /// Programs matching `spec`, in preference order
    pub fn candidates(&self, program_type: ProgramType, spec: &ProgramSpec) -> Result<Vec<ProgramDef>> {
        let found: Vec<ProgramDef> = match spec {
            ProgramSpec::Any => self.by_type(program_type).cloned().collect(),
            ProgramSpec::Name(name) => vec![self.lookup(program_type, name)?],
            ProgramSpec::List(specs) => {
                let mut found: Vec<ProgramDef> = Vec::new();
                let mut last_err = None;
                for spec in specs {
                    match self.candidates(program_type, spec) {
                        Ok(defs) => {
                            for def in defs {
                                if !found.iter().any(|f| f.name == def.name) {
                                    found.push(def);
                                }
                            }
                        }
                        Err(e) => last_err = Some(e),
                    }
                }
                if found.is_empty() {
                    if let Some(e) = last_err {
                        return Err(e);
                    }
                }
                found
            }
            ProgramSpec::Filter(filter) => self
                .by_type(program_type)
                .filter(|p| filter.matches(p))
                .cloned()
                .collect(),
            ProgramSpec::Predicate(pred) => self
                .by_type(program_type)
                .filter(|p| pred(p))
                .cloned()
                .collect(),
        };

        if found.is_empty() {
            return Err(Error::NoProgram {
                program_type,
                spec: spec.to_string(),
            });
        }
        Ok(found)
    }

    /// Configured program by name, falling back to `PATH`
    fn lookup(&self, program_type: ProgramType, name: &str) -> Result<ProgramDef> {
        if let Some(def) = self.get(program_type, name) {
            return Ok(def.clone());
        }
        let path = locate(Path::new(name)).ok_or_else(|| Error::ProgramNotFound(name.to_string()))?;
        let backend = Backend::from_command(name);
        let mut def = if backend == Backend::Custom {
            ProgramDef::custom(name, program_type, path, vec!["{options}".into(), "{source}".into()])
        } else {
            ProgramDef::builtin(backend, path)
        };
        def.name = name.to_string();
        def.program_type = program_type;
        debug!(program = %name, kind = %program_type, "resolved unconfigured program from PATH");
        Ok(def)
    }
}

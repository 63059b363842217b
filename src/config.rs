//! Configuration management for mediatui
//!
//! Config is stored at ~/.config/mediatui/config.toml. A missing file means
//! defaults; a file that does not parse is an error.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::manager::{ManagerSettings, Normalization, DEFAULT_MAX_CONCURRENT_TASKS};
use crate::models::MediaType;
use crate::program::{
    Backend, CompletionCheck, LaunchSettings, OutputMode, PipeMode, ProgramSpec, ProgramType,
};
use crate::template::{Template, DEFAULT_OUTPUT_TEMPLATE};

/// Program selection as written in config: one name or a priority list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SpecValue {
    One(String),
    Many(Vec<String>),
}

impl SpecValue {
    pub fn to_spec(&self) -> ProgramSpec {
        match self {
            SpecValue::One(s) => ProgramSpec::parse(s),
            SpecValue::Many(names) => ProgramSpec::List(names.iter().map(ProgramSpec::name).collect()),
        }
    }
}

/// One `[programs.<name>]` table
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProgramConfig {
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub program_type: Option<ProgramType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend: Option<Backend>,
    /// Executable name or path; defaults to the table name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub args: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_types: Option<Vec<MediaType>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url_patterns: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pipe: Option<PipeMode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<OutputMode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completion: Option<CompletionCheck>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extension: Option<String>,
    pub disabled: bool,
}

/// Application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Cap on concurrently running downloads
    pub max_concurrent_tasks: usize,
    pub tick_interval_ms: u64,
    pub poll_interval_ms: u64,
    /// Minimum time between progress samples of program output
    pub progress_interval_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_dir: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temp_dir: Option<PathBuf>,
    pub output_template: String,
    pub unicode_normalization: Normalization,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub player: Option<SpecValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub downloader: Option<SpecValue>,
    pub programs: BTreeMap<String, ProgramConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: DEFAULT_MAX_CONCURRENT_TASKS,
            tick_interval_ms: 1000,
            poll_interval_ms: 1000,
            progress_interval_ms: 500,
            download_dir: None,
            temp_dir: None,
            output_template: DEFAULT_OUTPUT_TEMPLATE.to_string(),
            unicode_normalization: Normalization::None,
            player: None,
            downloader: None,
            programs: BTreeMap::new(),
        }
    }
}

impl Config {
    /// Get config file path (~/.config/mediatui/config.toml)
    pub fn path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("mediatui").join("config.toml"))
    }

    /// Load config from the default path, or defaults if there is no file
    pub fn load() -> Result<Self> {
        match Self::path() {
            Some(path) => Self::load_from(&path),
            None => Ok(Self::default()),
        }
    }

    /// Load config from `path`; a missing file yields defaults
    pub fn load_from(path: &Path) -> Result<Self> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no config file; using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(e.into()),
        };
        let config: Config = toml::from_str(&text)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Save config to the default path
    pub fn save(&self) -> Result<()> {
        let path = Self::path().ok_or_else(|| Error::Config("could not determine config path".into()))?;
        self.save_to(&path)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let toml = toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))?;
        std::fs::write(path, toml)?;
        Ok(())
    }

    /// Reject values the manager cannot run with
    pub fn validate(&self) -> Result<()> {
        Template::parse(&self.output_template)?;
        if self.tick_interval_ms == 0 || self.poll_interval_ms == 0 {
            return Err(Error::Config("tick and poll intervals must be positive".into()));
        }
        Ok(())
    }

    pub fn download_dir(&self) -> PathBuf {
        self.download_dir
            .clone()
            .or_else(dirs::download_dir)
            .unwrap_or_else(|| PathBuf::from("."))
    }

    pub fn temp_dir(&self) -> PathBuf {
        self.temp_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("mediatui"))
    }

    /// Settings for a task manager built from this config
    pub fn manager_settings(&self) -> Result<ManagerSettings> {
        self.validate()?;
        Ok(ManagerSettings {
            max_concurrent_tasks: self.max_concurrent_tasks,
            tick_interval: Duration::from_millis(self.tick_interval_ms),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            launch: LaunchSettings {
                progress_interval: Duration::from_millis(self.progress_interval_ms),
                download_dir: self.download_dir(),
                temp_dir: self.temp_dir(),
                output_template: self.output_template.clone(),
            },
            normalization: self.unicode_normalization,
            player: self.player.as_ref().map(SpecValue::to_spec).unwrap_or_default(),
            downloader: self.downloader.as_ref().map(SpecValue::to_spec).unwrap_or_default(),
        })
    }
}

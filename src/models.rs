//! Data structures shared across the application
//!
//! - **Media**: sources and listings handed over by providers
//! - **Progress**: the snapshot a running program exposes to observers

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

// =============================================================================
// Media Models
// =============================================================================

/// Media type of a source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    #[default]
    Video,
    Audio,
    Image,
    Other,
}

impl MediaType {
    /// Guess a media type from a file extension
    pub fn from_extension(ext: &str) -> Self {
        match ext.to_ascii_lowercase().as_str() {
            "mp4" | "mkv" | "webm" | "avi" | "mov" | "m4v" | "ts" | "m3u8" => MediaType::Video,
            "mp3" | "m4a" | "aac" | "flac" | "ogg" | "opus" | "wav" => MediaType::Audio,
            "jpg" | "jpeg" | "png" | "gif" | "webp" => MediaType::Image,
            _ => MediaType::Other,
        }
    }

    /// Extension used when a source does not carry one
    pub fn default_extension(&self) -> &'static str {
        match self {
            MediaType::Video => "mp4",
            MediaType::Audio => "mp3",
            MediaType::Image => "jpg",
            MediaType::Other => "bin",
        }
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaType::Video => write!(f, "video"),
            MediaType::Audio => write!(f, "audio"),
            MediaType::Image => write!(f, "image"),
            MediaType::Other => write!(f, "other"),
        }
    }
}

/// One playable/downloadable locator supplied by a provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaSource {
    /// URL, magnet link or local path
    pub locator: String,
    pub media_type: MediaType,
    /// Lower rank sorts first
    #[serde(default)]
    pub rank: u32,
    #[serde(default)]
    pub title: Option<String>,
    /// Explicit extension, overriding what the locator suggests
    #[serde(default)]
    pub ext: Option<String>,
}

impl MediaSource {
    /// Create a source, guessing the media type from the locator
    pub fn new(locator: impl Into<String>) -> Self {
        let locator = locator.into();
        let media_type = Self::locator_extension(&locator)
            .map(|ext| MediaType::from_extension(&ext))
            .filter(|t| *t != MediaType::Other)
            .unwrap_or_default();
        Self {
            locator,
            media_type,
            rank: 0,
            title: None,
            ext: None,
        }
    }

    pub fn with_media_type(mut self, media_type: MediaType) -> Self {
        self.media_type = media_type;
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_rank(mut self, rank: u32) -> Self {
        self.rank = rank;
        self
    }

    /// True for magnet links
    pub fn is_magnet(&self) -> bool {
        self.locator.starts_with("magnet:?")
    }

    /// Path component of the locator, without scheme, host or query
    fn locator_path(locator: &str) -> &str {
        let without_query = locator.split(['?', '#']).next().unwrap_or(locator);
        match without_query.split_once("://") {
            Some((_, rest)) => rest.split_once('/').map(|(_, p)| p).unwrap_or(""),
            None => without_query,
        }
    }

    fn locator_extension(locator: &str) -> Option<String> {
        let last = Self::locator_path(locator).rsplit('/').next()?;
        let (stem, ext) = last.rsplit_once('.')?;
        if stem.is_empty() || ext.is_empty() || ext.len() > 5 {
            return None;
        }
        Some(ext.to_ascii_lowercase())
    }

    /// Display name from magnet `dn=` parameter
    fn magnet_name(&self) -> Option<String> {
        let query = self.locator.strip_prefix("magnet:?")?;
        query
            .split('&')
            .find_map(|kv| kv.strip_prefix("dn="))
            .and_then(|v| urlencoding::decode(v).ok())
            .map(|v| v.replace('+', " "))
    }

    /// Name used for `{self.default_name}` in filename templates
    pub fn default_name(&self) -> String {
        if let Some(title) = &self.title {
            return title.clone();
        }
        if self.is_magnet() {
            if let Some(name) = self.magnet_name() {
                return name;
            }
        }
        let last = Self::locator_path(&self.locator)
            .rsplit('/')
            .find(|s| !s.is_empty())
            .unwrap_or("");
        let stem = match last.rsplit_once('.') {
            Some((stem, _)) if !stem.is_empty() => stem,
            _ => last,
        };
        if stem.is_empty() {
            "media".to_string()
        } else {
            urlencoding::decode(stem)
                .map(|s| s.into_owned())
                .unwrap_or_else(|_| stem.to_string())
        }
    }

    /// Extension used for `{self.ext}` in filename templates
    pub fn ext(&self) -> String {
        self.ext
            .clone()
            .or_else(|| Self::locator_extension(&self.locator))
            .unwrap_or_else(|| self.media_type.default_extension().to_string())
    }
}

impl fmt::Display for MediaSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.media_type, self.locator)
    }
}

/// Catalog entry a task originated from
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaListing {
    /// Provider name, e.g. "youtube" or "rss"
    pub provider: String,
    pub title: String,
    #[serde(default)]
    pub id: Option<String>,
    /// Provider-specific fields, reachable as `{listing.<key>}`
    #[serde(default)]
    pub extra: BTreeMap<String, String>,
}

impl MediaListing {
    pub fn new(provider: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            title: title.into(),
            id: None,
            extra: BTreeMap::new(),
        }
    }

    /// Look up a field by name for template rendering
    pub fn field(&self, name: &str) -> Option<String> {
        match name {
            "provider" => Some(self.provider.clone()),
            "title" => Some(self.title.clone()),
            "id" => self.id.clone(),
            other => self.extra.get(other).cloned(),
        }
    }
}

impl fmt::Display for MediaListing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.title)
    }
}

// =============================================================================
// Progress Snapshot
// =============================================================================

/// Transfer statistics of a running program
///
/// Every field is optional: players report nothing, `curl -s` only grows a
/// file, yt-dlp reports almost everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    pub downloaded: Option<u64>,
    pub total: Option<u64>,
    pub remaining: Option<u64>,
    /// 0.0 - 100.0
    pub percent: Option<f64>,
    /// Bytes per second
    pub rate: Option<f64>,
    #[serde(with = "duration_secs", default)]
    pub eta: Option<Duration>,
    pub destination: Option<PathBuf>,
    pub status: Option<String>,
}

impl Progress {
    /// Fill in fields that can be derived from the others
    pub fn recompute(&mut self) {
        if let (Some(done), Some(total)) = (self.downloaded, self.total) {
            self.remaining = Some(total.saturating_sub(done));
            if total > 0 {
                self.percent = Some((done as f64 / total as f64 * 100.0).min(100.0));
            }
        } else if let (Some(percent), Some(total)) = (self.percent, self.total) {
            let done = (total as f64 * percent / 100.0) as u64;
            self.downloaded.get_or_insert(done);
            self.remaining = Some(total.saturating_sub(done));
        }

        if self.eta.is_none() {
            if let (Some(remaining), Some(rate)) = (self.remaining, self.rate) {
                if rate > 0.0 {
                    self.eta = Some(Duration::from_secs_f64(remaining as f64 / rate));
                }
            }
        }
    }

    /// True once a program reported the whole payload
    pub fn is_complete(&self) -> bool {
        match (self.downloaded, self.total) {
            (Some(done), Some(total)) if total > 0 => done >= total,
            _ => self.percent.map(|p| p >= 100.0).unwrap_or(false),
        }
    }

    /// Format transfer rate for display
    pub fn format_rate(&self) -> String {
        match self.rate {
            Some(rate) => format!("{}/s", format_bytes(rate as u64)),
            None => "-".to_string(),
        }
    }

    /// Format percent for display
    pub fn format_percent(&self) -> String {
        match self.percent {
            Some(p) => format!("{:.1}%", p),
            None => "-".to_string(),
        }
    }

    /// Format eta for display
    pub fn format_eta(&self) -> String {
        self.eta.map(format_duration).unwrap_or_else(|| "-".to_string())
    }
}

impl fmt::Display for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let size = match (self.downloaded, self.total) {
            (Some(d), Some(t)) => format!("{} / {}", format_bytes(d), format_bytes(t)),
            (Some(d), None) => format_bytes(d),
            _ => "-".to_string(),
        };
        write!(
            f,
            "{} {} @ {} eta {}",
            self.format_percent(),
            size,
            self.format_rate(),
            self.format_eta()
        )
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match d {
            Some(d) => s.serialize_some(&d.as_secs()),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(d)?.map(Duration::from_secs))
    }
}

// =============================================================================
// Utility Functions
// =============================================================================

/// Format a byte count (e.g. "4.2 GB", "890 MB", "12 KB")
pub fn format_bytes(bytes: u64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = KB * 1024.0;
    const GB: f64 = MB * 1024.0;
    let b = bytes as f64;
    if b >= GB {
        format!("{:.1} GB", b / GB)
    } else if b >= MB {
        format!("{:.1} MB", b / MB)
    } else if b >= KB {
        format!("{:.0} KB", b / KB)
    } else {
        format!("{} B", bytes)
    }
}

/// Format a Duration as HH:MM:SS or MM:SS
pub fn format_duration(d: Duration) -> String {
    let total_secs = d.as_secs();
    let hours = total_secs / 3600;
    let mins = (total_secs % 3600) / 60;
    let secs = total_secs % 60;

    if hours > 0 {
        format!("{:02}:{:02}:{:02}", hours, mins, secs)
    } else {
        format!("{:02}:{:02}", mins, secs)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

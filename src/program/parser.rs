//! Progress parsers for program output
//!
//! Each parser reads one line at a time (output is split on `\r` and `\n`)
//! and folds what it recognizes into a [`Progress`].

use regex::Regex;
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use super::Backend;
use crate::models::Progress;

/// Folds program output lines into progress
pub trait ProgressParser: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    /// Returns true if `line` changed `progress`
    fn parse_line(&self, line: &str, progress: &mut Progress) -> bool;
}

/// Fresh parser for a backend, if its output is understood
pub fn for_backend(backend: Backend) -> Option<Arc<dyn ProgressParser>> {
    match backend {
        Backend::YtDlp => Some(Arc::new(YtDlpParser)),
        Backend::Wget => Some(Arc::new(WgetParser)),
        Backend::Webtorrent => Some(Arc::new(WebtorrentParser)),
        Backend::Ffmpeg => Some(Arc::new(FfmpegParser::default())),
        _ => None,
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn cached(cell: &'static OnceLock<Option<Regex>>, pattern: &str) -> Option<&'static Regex> {
    cell.get_or_init(|| Regex::new(pattern).ok()).as_ref()
}

macro_rules! regex {
    ($pattern:expr) => {{
        static CELL: OnceLock<Option<Regex>> = OnceLock::new();
        cached(&CELL, $pattern)
    }};
}

/// Parse "12.3" + "MiB" into bytes. Decimal and binary prefixes both count as 1024.
pub fn parse_size(value: &str, unit: &str) -> Option<u64> {
    let value: f64 = value.replace(',', "").trim().parse().ok()?;
    let multiplier = match unit.trim().to_ascii_uppercase().chars().next() {
        None | Some('B') => 1.0,
        Some('K') => 1024.0,
        Some('M') => 1024.0 * 1024.0,
        Some('G') => 1024.0 * 1024.0 * 1024.0,
        Some('T') => 1024.0 * 1024.0 * 1024.0 * 1024.0,
        _ => return None,
    };
    Some((value * multiplier) as u64)
}

/// Parse "01:02:03", "02:03", "1h2m3s", "3s" or "5 minutes"
pub fn parse_eta(value: &str) -> Option<Duration> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    if value.contains(':') {
        let mut secs = 0u64;
        for part in value.split(':') {
            secs = secs * 60 + part.trim().parse::<u64>().ok()?;
        }
        return Some(Duration::from_secs(secs));
    }

    if let Some(re) = regex!(r"^(\d+)\s*(seconds?|minutes?|hours?)$") {
        if let Some(caps) = re.captures(value) {
            let n: u64 = caps[1].parse().ok()?;
            let secs = match &caps[2][..1] {
                "s" => n,
                "m" => n * 60,
                _ => n * 3600,
            };
            return Some(Duration::from_secs(secs));
        }
    }

    let mut secs = 0u64;
    let mut num = String::new();
    let mut matched = false;
    for c in value.chars() {
        match c {
            '0'..='9' => num.push(c),
            'h' | 'm' | 's' | 'd' => {
                let n: u64 = num.parse().ok()?;
                num.clear();
                matched = true;
                secs += n * match c {
                    'd' => 86400,
                    'h' => 3600,
                    'm' => 60,
                    _ => 1,
                };
            }
            ' ' => {}
            _ => return None,
        }
    }
    (matched && num.is_empty()).then(|| Duration::from_secs(secs))
}

// =============================================================================
// yt-dlp
// =============================================================================

/// `yt-dlp --newline` output
#[derive(Debug, Default)]
pub struct YtDlpParser;

impl ProgressParser for YtDlpParser {
    fn name(&self) -> &'static str {
        "yt-dlp"
    }

    fn parse_line(&self, line: &str, progress: &mut Progress) -> bool {
        let line = line.trim();

        if let Some(dest) = line
            .strip_prefix("[download] Destination:")
            .or_else(|| line.strip_prefix("[ExtractAudio] Destination:"))
        {
            progress.destination = Some(PathBuf::from(dest.trim()));
            return true;
        }

        if let Some(re) = regex!(r#"^\[Merger\] Merging formats into "(.+)"$"#) {
            if let Some(caps) = re.captures(line) {
                progress.destination = Some(PathBuf::from(&caps[1]));
                progress.status = Some("merging".into());
                return true;
            }
        }

        if line.starts_with("[download]") && line.ends_with("has already been downloaded") {
            progress.percent = Some(100.0);
            progress.status = Some("already downloaded".into());
            return true;
        }

        let Some(re) = regex!(
            r"^\[download\]\s+(?P<pct>[\d.]+)%\s+of\s+~?\s*(?P<total>[\d.]+)\s*(?P<tunit>[KMGT]?i?B)(?:\s+at\s+(?P<rate>[\d.]+)\s*(?P<runit>[KMGT]?i?B)/s)?(?:\s+ETA\s+(?P<eta>[\d:]+))?"
        ) else {
            return false;
        };
        let Some(caps) = re.captures(line) else {
            return false;
        };

        progress.percent = caps["pct"].parse().ok();
        progress.total = parse_size(&caps["total"], &caps["tunit"]);
        progress.downloaded = None;
        if let (Some(rate), Some(unit)) = (caps.name("rate"), caps.name("runit")) {
            progress.rate = parse_size(rate.as_str(), unit.as_str()).map(|b| b as f64);
        }
        progress.eta = caps.name("eta").and_then(|m| parse_eta(m.as_str()));
        progress.status = Some("downloading".into());
        true
    }
}

// =============================================================================
// wget
// =============================================================================

/// `wget --progress=bar:force` output
#[derive(Debug, Default)]
pub struct WgetParser;

impl ProgressParser for WgetParser {
    fn name(&self) -> &'static str {
        "wget"
    }

    fn parse_line(&self, line: &str, progress: &mut Progress) -> bool {
        let line = line.trim();

        if let Some(re) = regex!(r"^Length:\s+(\d+)") {
            if let Some(caps) = re.captures(line) {
                progress.total = caps[1].parse().ok();
                return true;
            }
        }

        if let Some(re) = regex!(r#"^Saving to:\s*['‘"](.+?)['’"]$"#) {
            if let Some(caps) = re.captures(line) {
                progress.destination = Some(PathBuf::from(&caps[1]));
                return true;
            }
        }

        let Some(re) = regex!(
            r"(?P<pct>\d+)%\s*\[[^\]]*\]\s+(?P<done>[\d,.]+)(?P<dunit>[KMGT]?)\s+(?P<rate>[\d.,]+|--\.-)(?P<runit>[KMGT]?)B/s(?:\s+eta\s+(?P<eta>[\dhms ]+))?"
        ) else {
            return false;
        };
        let Some(caps) = re.captures(line) else {
            return false;
        };

        progress.percent = caps["pct"].parse().ok();
        progress.downloaded = parse_size(&caps["done"], &caps["dunit"]);
        progress.rate = parse_size(&caps["rate"], &caps["runit"]).map(|b| b as f64);
        progress.eta = caps.name("eta").and_then(|m| parse_eta(m.as_str()));
        progress.status = Some("downloading".into());
        true
    }
}

// =============================================================================
// webtorrent
// =============================================================================

/// `webtorrent download` status lines
#[derive(Debug, Default)]
pub struct WebtorrentParser;

impl ProgressParser for WebtorrentParser {
    fn name(&self) -> &'static str {
        "webtorrent"
    }

    fn parse_line(&self, line: &str, progress: &mut Progress) -> bool {
        let mut changed = false;

        if let Some(re) = regex!(r"Speed:\s*([\d.]+)\s*([KMGT]?B)/s") {
            if let Some(caps) = re.captures(line) {
                progress.rate = parse_size(&caps[1], &caps[2]).map(|b| b as f64);
                changed = true;
            }
        }

        if let Some(re) = regex!(r"Downloaded:\s*([\d.]+)\s*([KMGT]?B)(?:\s*/\s*([\d.]+)\s*([KMGT]?B))?") {
            if let Some(caps) = re.captures(line) {
                progress.downloaded = parse_size(&caps[1], &caps[2]);
                if let (Some(v), Some(u)) = (caps.get(3), caps.get(4)) {
                    progress.total = parse_size(v.as_str(), u.as_str());
                }
                changed = true;
            }
        }

        if let Some(re) = regex!(r"Time remaining:\s*(.+?)(?:\s{2,}|$)") {
            if let Some(caps) = re.captures(line) {
                progress.eta = parse_eta(&caps[1]);
                changed = true;
            }
        }

        if let Some(name) = line.trim().strip_prefix("Downloading:") {
            progress.status = Some(format!("downloading {}", name.trim()));
            changed = true;
        }

        changed
    }
}

// =============================================================================
// ffmpeg
// =============================================================================

/// ffmpeg `-stats` lines; percent comes from the input duration
#[derive(Debug, Default)]
pub struct FfmpegParser {
    duration: Mutex<Option<f64>>,
}

fn clock_secs(value: &str) -> Option<f64> {
    let mut secs = 0.0;
    for part in value.split(':') {
        secs = secs * 60.0 + part.parse::<f64>().ok()?;
    }
    Some(secs)
}

impl ProgressParser for FfmpegParser {
    fn name(&self) -> &'static str {
        "ffmpeg"
    }

    fn parse_line(&self, line: &str, progress: &mut Progress) -> bool {
        if let Some(re) = regex!(r"^\s*Duration:\s*(\d+:\d+:[\d.]+)") {
            if let Some(caps) = re.captures(line) {
                let mut duration = self.duration.lock().unwrap_or_else(|e| e.into_inner());
                *duration = clock_secs(&caps[1]);
                return true;
            }
        }

        let Some(re) = regex!(r"size=\s*(\d+)\s*(k?i?B).*?time=\s*(\d+:\d+:[\d.]+).*?(?:speed=\s*([\d.]+)x)?\s*$")
        else {
            return false;
        };
        let Some(caps) = re.captures(line) else {
            return false;
        };

        progress.downloaded = parse_size(&caps[1], &caps[2]);
        let elapsed = clock_secs(&caps[3]);
        let duration = *self.duration.lock().unwrap_or_else(|e| e.into_inner());
        if let (Some(elapsed), Some(duration)) = (elapsed, duration) {
            if duration > 0.0 {
                progress.percent = Some((elapsed / duration * 100.0).min(100.0));
                if let Some(speed) = caps.get(4).and_then(|m| m.as_str().parse::<f64>().ok()) {
                    if speed > 0.0 {
                        progress.eta =
                            Some(Duration::from_secs_f64(((duration - elapsed) / speed).max(0.0)));
                    }
                }
            }
        }
        progress.status = Some(match caps.get(4) {
            Some(speed) => format!("encoding {} ({}x)", &caps[3], speed.as_str()),
            None => format!("encoding {}", &caps[3]),
        });
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("1", "KiB"), Some(1024));
        assert_eq!(parse_size("1.5", "MB"), Some(1_572_864));
        assert_eq!(parse_size("1,234,567", ""), Some(1_234_567));
        assert_eq!(parse_size("2", "GB"), Some(2 * 1024 * 1024 * 1024));
        assert_eq!(parse_size("x", "MB"), None);
    }

    #[test]
    fn test_parse_eta() {
        assert_eq!(parse_eta("00:07"), Some(Duration::from_secs(7)));
        assert_eq!(parse_eta("01:02:03"), Some(Duration::from_secs(3723)));
        assert_eq!(parse_eta("1m20s"), Some(Duration::from_secs(80)));
        assert_eq!(parse_eta("3s"), Some(Duration::from_secs(3)));
        assert_eq!(parse_eta("5 minutes"), Some(Duration::from_secs(300)));
        assert_eq!(parse_eta("Unknown"), None);
    }

    #[test]
    fn test_ytdlp_progress_line() {
        let mut p = Progress::default();
        assert!(YtDlpParser.parse_line(
            "[download]  45.0% of ~  10.00MiB at    1.00MiB/s ETA 00:05 (frag 3/10)",
            &mut p
        ));
        assert_eq!(p.percent, Some(45.0));
        assert_eq!(p.total, Some(10 * 1024 * 1024));
        assert_eq!(p.rate, Some(1024.0 * 1024.0));
        assert_eq!(p.eta, Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_ytdlp_destination() {
        let mut p = Progress::default();
        assert!(YtDlpParser.parse_line("[download] Destination: /tmp/x/video.mp4", &mut p));
        assert_eq!(p.destination, Some(PathBuf::from("/tmp/x/video.mp4")));

        assert!(YtDlpParser.parse_line("[Merger] Merging formats into \"/tmp/x/video.mkv\"", &mut p));
        assert_eq!(p.destination, Some(PathBuf::from("/tmp/x/video.mkv")));
    }

    #[test]
    fn test_ytdlp_unknown_rate() {
        let mut p = Progress::default();
        assert!(YtDlpParser.parse_line("[download]   0.0% of   10.00MiB at Unknown B/s ETA Unknown", &mut p));
        assert_eq!(p.percent, Some(0.0));
        assert_eq!(p.rate, None);
        assert!(!YtDlpParser.parse_line("[youtube] abc: Downloading webpage", &mut p));
    }

    #[test]
    fn test_wget_lines() {
        let mut p = Progress::default();
        assert!(WgetParser.parse_line("Length: 2048000 (2.0M) [video/mp4]", &mut p));
        assert_eq!(p.total, Some(2_048_000));

        assert!(WgetParser.parse_line("Saving to: ‘video.mp4’", &mut p));
        assert_eq!(p.destination, Some(PathBuf::from("video.mp4")));

        assert!(WgetParser.parse_line(
            "video.mp4           50%[=========>          ]   1000K   500KB/s    eta 2s",
            &mut p
        ));
        assert_eq!(p.percent, Some(50.0));
        assert_eq!(p.downloaded, Some(1000 * 1024));
        assert_eq!(p.rate, Some(500.0 * 1024.0));
        assert_eq!(p.eta, Some(Duration::from_secs(2)));
    }

    #[test]
    fn test_webtorrent_status() {
        let mut p = Progress::default();
        assert!(WebtorrentParser.parse_line("Speed: 2.0 MB/s  Downloaded: 100 MB/400 MB  Uploaded: 0 B", &mut p));
        assert_eq!(p.rate, Some(2.0 * 1024.0 * 1024.0));
        assert_eq!(p.downloaded, Some(100 * 1024 * 1024));
        assert_eq!(p.total, Some(400 * 1024 * 1024));
        assert!(!WebtorrentParser.parse_line("Peers: 3", &mut p));
    }

    #[test]
    fn test_ffmpeg_percent_from_duration() {
        let parser = FfmpegParser::default();
        let mut p = Progress::default();
        assert!(parser.parse_line("  Duration: 00:00:10.00, start: 0.000000, bitrate: 128 kb/s", &mut p));
        assert!(parser.parse_line(
            "size=     256kB time=00:00:05.00 bitrate= 419.4kbits/s speed=2.5x",
            &mut p
        ));
        assert_eq!(p.downloaded, Some(256 * 1024));
        assert_eq!(p.percent, Some(50.0));
        assert_eq!(p.eta, Some(Duration::from_secs(2)));
    }

    #[test]
    fn test_for_backend() {
        assert_eq!(for_backend(Backend::YtDlp).map(|p| p.name()), Some("yt-dlp"));
        assert!(for_backend(Backend::Mpv).is_none());
        assert!(for_backend(Backend::Custom).is_none());
    }
}

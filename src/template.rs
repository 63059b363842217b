//! Placeholder templates
//!
//! Used for download file names (`{listing.provider}.{self.default_name}.{self.timestamp}.{self.ext}`)
//! and for program arguments (`-o {outfile} {source}`).
//!
//! Syntax: `{name}`, `{name.field}`, an optional numeric width (`{index:02}`),
//! and `{{` / `}}` for literal braces. Anything else is an invalid template.

use chrono::{DateTime, Local};
use regex::Regex;
use std::sync::OnceLock;

use crate::error::{Error, Result};
use crate::models::{MediaListing, MediaSource};

/// Default download file name template
pub const DEFAULT_OUTPUT_TEMPLATE: &str =
    "{listing.provider}.{self.default_name}.{self.timestamp}.{self.ext}";

/// Timestamp format used for `{self.timestamp}`
const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

fn placeholder_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^([A-Za-z_][A-Za-z0-9_]*)(?:\.([A-Za-z_][A-Za-z0-9_]*))?(?::(0?)([0-9]{1,2}))?$").ok()
    })
    .as_ref()
}

/// Supplies values for placeholders
pub trait TemplateContext {
    /// Value for `{root}` or `{root.field}`, `None` if the placeholder is unknown
    fn lookup(&self, root: &str, field: Option<&str>) -> Option<String>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Placeholder {
    root: String,
    field: Option<String>,
    width: Option<usize>,
    zero_pad: bool,
}

impl Placeholder {
    fn name(&self) -> String {
        match &self.field {
            Some(field) => format!("{}.{}", self.root, field),
            None => self.root.clone(),
        }
    }

    fn pad(&self, value: String) -> String {
        match self.width {
            Some(width) if self.zero_pad => format!("{:0>width$}", value, width = width),
            Some(width) => format!("{:>width$}", value, width = width),
            None => value,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Part {
    Literal(String),
    Field(Placeholder),
}

/// A parsed template
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    raw: String,
    parts: Vec<Part>,
}

impl Template {
    /// Parse a template, rejecting malformed syntax
    pub fn parse(raw: &str) -> Result<Self> {
        let mut parts = Vec::new();
        let mut literal = String::new();
        let mut chars = raw.chars().peekable();

        while let Some(c) = chars.next() {
            match c {
                '{' if chars.peek() == Some(&'{') => {
                    chars.next();
                    literal.push('{');
                }
                '}' if chars.peek() == Some(&'}') => {
                    chars.next();
                    literal.push('}');
                }
                '}' => return Err(Error::invalid_template(raw, "unmatched '}'")),
                '{' => {
                    let mut name = String::new();
                    let mut closed = false;
                    for c in chars.by_ref() {
                        match c {
                            '}' => {
                                closed = true;
                                break;
                            }
                            '{' => return Err(Error::invalid_template(raw, "nested '{'")),
                            c => name.push(c),
                        }
                    }
                    if !closed {
                        return Err(Error::invalid_template(raw, "unclosed '{'"));
                    }
                    let caps = placeholder_re().and_then(|re| re.captures(&name)).ok_or_else(|| {
                        Error::invalid_template(raw, format!("bad placeholder '{{{}}}'", name))
                    })?;
                    if !literal.is_empty() {
                        parts.push(Part::Literal(std::mem::take(&mut literal)));
                    }
                    parts.push(Part::Field(Placeholder {
                        root: caps[1].to_string(),
                        field: caps.get(2).map(|m| m.as_str().to_string()),
                        zero_pad: caps.get(3).map(|m| !m.as_str().is_empty()).unwrap_or(false),
                        width: caps.get(4).and_then(|m| m.as_str().parse().ok()),
                    }));
                }
                c => literal.push(c),
            }
        }
        if !literal.is_empty() {
            parts.push(Part::Literal(literal));
        }
        if parts.is_empty() {
            return Err(Error::invalid_template(raw, "empty template"));
        }

        Ok(Self {
            raw: raw.to_string(),
            parts,
        })
    }

    /// The template text as written
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// True if the template contains the placeholder `{root...}`
    pub fn references(&self, root: &str) -> bool {
        self.parts
            .iter()
            .any(|p| matches!(p, Part::Field(ph) if ph.root == root))
    }

    /// Substitute every placeholder; unknown placeholders are an error
    pub fn render(&self, ctx: &dyn TemplateContext) -> Result<String> {
        let mut out = String::new();
        for part in &self.parts {
            match part {
                Part::Literal(s) => out.push_str(s),
                Part::Field(ph) => {
                    let value = ctx.lookup(&ph.root, ph.field.as_deref()).ok_or_else(|| {
                        Error::invalid_template(
                            &self.raw,
                            format!("unknown placeholder '{{{}}}'", ph.name()),
                        )
                    })?;
                    out.push_str(&ph.pad(value));
                }
            }
        }
        Ok(out)
    }
}

// =============================================================================
// Filename Context
// =============================================================================

/// Placeholder values for download file names
pub struct FilenameContext<'a> {
    source: &'a MediaSource,
    listing: MediaListing,
    /// 1-based position of the source in its task
    index: usize,
    /// Number of sources in the task
    num: usize,
    timestamp: DateTime<Local>,
}

impl<'a> FilenameContext<'a> {
    pub fn new(source: &'a MediaSource, listing: Option<&MediaListing>) -> Self {
        Self {
            source,
            listing: listing
                .cloned()
                .unwrap_or_else(|| MediaListing::new("direct", source.default_name())),
            index: 1,
            num: 1,
            timestamp: Local::now(),
        }
    }

    pub fn with_position(mut self, index: usize, num: usize) -> Self {
        self.index = index;
        self.num = num;
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Local>) -> Self {
        self.timestamp = timestamp;
        self
    }

    fn source_field(&self, field: &str) -> Option<String> {
        match field {
            "default_name" => Some(self.source.default_name()),
            "ext" => Some(self.source.ext()),
            "timestamp" => Some(self.timestamp.format(TIMESTAMP_FORMAT).to_string()),
            "locator" | "url" => Some(self.source.locator.clone()),
            "media_type" => Some(self.source.media_type.to_string()),
            "rank" => Some(self.source.rank.to_string()),
            "title" => self.source.title.clone(),
            _ => None,
        }
    }
}

impl TemplateContext for FilenameContext<'_> {
    fn lookup(&self, root: &str, field: Option<&str>) -> Option<String> {
        let value = match (root, field) {
            ("listing", Some(f)) => self.listing.field(f),
            ("listing", None) => Some(self.listing.title.clone()),
            ("self", Some(f)) => self.source_field(f),
            ("index", None) => Some(self.index.to_string()),
            ("num", None) => Some(self.num.to_string()),
            ("uri", None) => Some(urlencoding::encode(&self.source.locator).into_owned()),
            _ => None,
        }?;
        Some(sanitize_filename(&value))
    }
}

/// Replace characters that cannot appear inside a single path component
pub fn sanitize_filename(value: &str) -> String {
    value
        .chars()
        .map(|c| match c {
            '/' | '\\' | '\0' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect()
}

/// Render a download file name for `source`
pub fn render_filename(
    template: &str,
    source: &MediaSource,
    listing: Option<&MediaListing>,
    index: usize,
    num: usize,
) -> Result<String> {
    let tpl = Template::parse(template)?;
    let ctx = FilenameContext::new(source, listing).with_position(index, num);
    let name = tpl.render(&ctx)?;
    if name.trim().is_empty() || name == "." || name == ".." {
        return Err(Error::invalid_template(template, "renders to an empty file name"));
    }
    Ok(name)
}

// =============================================================================
// Program Argument Context
// =============================================================================

/// Placeholder values for program arguments
#[derive(Debug, Clone, Default)]
pub struct ArgContext {
    pub source: String,
    pub outfile: Option<String>,
    pub outdir: Option<String>,
    pub listing: Option<MediaListing>,
    pub task_id: Option<u64>,
    pub task_title: Option<String>,
}

impl TemplateContext for ArgContext {
    fn lookup(&self, root: &str, field: Option<&str>) -> Option<String> {
        match (root, field) {
            ("source", None) => Some(self.source.clone()),
            ("outfile", None) => self.outfile.clone(),
            ("outdir", None) => self.outdir.clone(),
            ("listing", None) => self.listing.as_ref().map(|l| l.title.clone()),
            ("listing", Some(f)) => self.listing.as_ref().and_then(|l| l.field(f)),
            ("task", None) | ("task", Some("title")) => self.task_title.clone(),
            ("task", Some("id")) => self.task_id.map(|id| id.to_string()),
            _ => None,
        }
    }
}

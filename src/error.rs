//! Error types for the task core
//!
//! Configuration problems (missing executables, bad templates) and
//! destination conflicts are ordinary values here: the manager stores them in
//! a task's result slot instead of letting them escape the scheduler loops.

use std::path::PathBuf;
use thiserror::Error;

use crate::program::ProgramType;

/// Errors raised by tasks, programs and the task manager
#[derive(Debug, Error)]
pub enum Error {
    #[error("Program '{0}' not found. Install it or configure its path.")]
    ProgramNotFound(String),

    #[error("No {program_type} matches '{spec}'")]
    NoProgram {
        program_type: ProgramType,
        spec: String,
    },

    #[error("Invalid filename template '{template}': {reason}")]
    InvalidTemplate { template: String, reason: String },

    #[error("Destination file exists: {}", .0.display())]
    DestinationExists(PathBuf),

    #[error("Destination {} is claimed by task {task}", dest.display())]
    DestinationClaimed { dest: PathBuf, task: u64 },

    #[error("{source}; finished file kept at {}", kept.display())]
    NotSaved {
        kept: PathBuf,
        #[source]
        source: Box<Error>,
    },

    #[error("Program '{0}' has no source to run")]
    NoSource(String),

    #[error("Slot '{0}' was already resolved")]
    AlreadySet(&'static str),

    #[error("Task {0} is already queued")]
    AlreadyQueued(u64),

    #[error("Unknown task {0}")]
    UnknownTask(u64),

    #[error("Task {0} was cancelled before it started")]
    Cancelled(u64),

    #[error("Failed to start '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Config error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Build an [`Error::InvalidTemplate`]
    pub fn invalid_template(template: &str, reason: impl Into<String>) -> Self {
        Error::InvalidTemplate {
            template: template.to_string(),
            reason: reason.into(),
        }
    }

    /// Same variant and message, for errors that are both stored in a
    /// task's result and returned to the caller. I/O sources keep their kind.
    pub fn duplicate(&self) -> Self {
        match self {
            Error::ProgramNotFound(p) => Error::ProgramNotFound(p.clone()),
            Error::NoProgram { program_type, spec } => Error::NoProgram {
                program_type: *program_type,
                spec: spec.clone(),
            },
            Error::InvalidTemplate { template, reason } => Error::InvalidTemplate {
                template: template.clone(),
                reason: reason.clone(),
            },
            Error::DestinationExists(p) => Error::DestinationExists(p.clone()),
            Error::DestinationClaimed { dest, task } => Error::DestinationClaimed {
                dest: dest.clone(),
                task: *task,
            },
            Error::NotSaved { kept, source } => Error::NotSaved {
                kept: kept.clone(),
                source: Box::new(source.duplicate()),
            },
            Error::NoSource(p) => Error::NoSource(p.clone()),
            Error::AlreadySet(name) => Error::AlreadySet(*name),
            Error::AlreadyQueued(id) => Error::AlreadyQueued(*id),
            Error::UnknownTask(id) => Error::UnknownTask(*id),
            Error::Cancelled(id) => Error::Cancelled(*id),
            Error::Spawn { program, source } => Error::Spawn {
                program: program.clone(),
                source: std::io::Error::new(source.kind(), source.to_string()),
            },
            Error::Config(msg) => Error::Config(msg.clone()),
            Error::Io(e) => Error::Io(std::io::Error::new(e.kind(), e.to_string())),
        }
    }

    /// The error underneath any [`Error::NotSaved`] wrapping
    pub fn root(&self) -> &Error {
        match self {
            Error::NotSaved { source, .. } => source.root(),
            other => other,
        }
    }

    /// True for conditions caused by configuration rather than by a process
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            Error::ProgramNotFound(_)
                | Error::NoProgram { .. }
                | Error::InvalidTemplate { .. }
                | Error::Config(_)
        )
    }
}

/// Crate result alias
pub type Result<T> = std::result::Result<T, Error>;

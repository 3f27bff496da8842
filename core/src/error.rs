// Error types for the core library
// Uses thiserror for ergonomic error handling

use serde::{Deserialize, Serialize};
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for core library operations
#[derive(Error, Debug)]
pub enum CoreError {
    /// Configuration error (malformed file, invalid values, bad pattern)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Error enumerating, renaming, or validating input files
    #[error("Intake error: {0}")]
    Intake(String),

    /// Error running or parsing ffprobe
    #[error("Probe error: {0}")]
    Probe(String),

    /// The sandbox refused a command, argument, or path
    #[error("Sandbox rejected request: {0}")]
    PolicyDenied(String),

    /// Error spawning or managing a child process
    #[error("Process error: {0}")]
    Process(String),

    /// The ffmpeg/ffprobe toolchain is missing or unusable
    #[error("Toolchain error: {0}")]
    Toolchain(String),

    /// A configured regular expression did not compile
    #[error("Invalid pattern: {0}")]
    Pattern(#[from] regex::Error),

    /// Expected output artifact is absent
    #[error("Missing output artifact: {0}")]
    OutputMissing(PathBuf),

    /// IO error (file operations, etc.)
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Convenience type alias for Results using CoreError
pub type Result<T> = std::result::Result<T, CoreError>;

/// Classification of a per-job failure
///
/// These are the kinds the batch report distinguishes; the scheduler treats
/// `SpawnFailed` and `PolicyViolation` as fatal-class when `stop_on_fatal`
/// is set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureKind {
    /// Binary not found, ACL rejected, or the sandbox refused to spawn
    SpawnFailed,
    /// A policy breach observed after spawn (resource violation escalation)
    PolicyViolation,
    /// Wall-clock deadline exceeded; the child has been terminated
    Timeout,
    /// No progress event for longer than the stall threshold
    ProgressStalled,
    /// Child exited with a nonzero code
    NonZeroExit,
    /// Child exited 0 but expected artifacts are absent
    OutputMissing,
}

impl FailureKind {
    /// Whether this kind aborts the batch under `stop_on_fatal`
    pub fn is_fatal(self) -> bool {
        matches!(self, FailureKind::SpawnFailed | FailureKind::PolicyViolation)
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureKind::SpawnFailed => write!(f, "SpawnFailed"),
            FailureKind::PolicyViolation => write!(f, "PolicyViolation"),
            FailureKind::Timeout => write!(f, "Timeout"),
            FailureKind::ProgressStalled => write!(f, "ProgressStalled"),
            FailureKind::NonZeroExit => write!(f, "NonZeroExit"),
            FailureKind::OutputMissing => write!(f, "OutputMissing"),
        }
    }
}

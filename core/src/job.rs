// Job model for transcode operations
// Tracks what each file's conversion produced

use crate::error::FailureKind;
use crate::transcode::TranscodeSpec;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Terminal status of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    /// Job completed successfully
    Ok,
    /// Job failed (spawn, runtime, or output verification)
    Failed,
    /// Job was cancelled before it could finish
    Cancelled,
    /// Job was skipped (invalid name, unreadable file)
    Skipped,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Ok => write!(f, "OK"),
            JobStatus::Failed => write!(f, "FAILED"),
            JobStatus::Cancelled => write!(f, "CANCELLED"),
            JobStatus::Skipped => write!(f, "SKIPPED"),
        }
    }
}

/// One file to transcode, plus everything derived from it at intake time
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Unique identifier for this job (UUID v4)
    pub id: String,

    /// Path to the validated source file
    pub input_path: PathBuf,

    /// Normalized name without extension; names the output subtree
    pub stem: String,

    /// Job-private output directory (`<output_folder>/<stem>`)
    pub output_root: PathBuf,

    /// Hash of the input path and codec settings
    pub fingerprint: String,
}

impl Job {
    /// Create a job for a validated input file
    ///
    /// The output root is `<output_folder>/<stem>`; the fingerprint binds
    /// the input path to the batch's codec settings.
    pub fn new(input_path: PathBuf, output_folder: &Path, spec: &TranscodeSpec) -> Self {
        let stem = input_path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        let output_root = output_folder.join(&stem);
        let fingerprint = fingerprint(&input_path, spec);

        Self {
            id: Uuid::new_v4().to_string(),
            input_path,
            stem,
            output_root,
            fingerprint,
        }
    }
}

/// Compute the job fingerprint: sha256 over input path + codec settings
fn fingerprint(input_path: &Path, spec: &TranscodeSpec) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input_path.to_string_lossy().as_bytes());
    hasher.update(b"\0");
    hasher.update(spec.fingerprint_material().as_bytes());
    let digest = hasher.finalize();
    // First 16 hex chars are plenty for correlation
    digest.iter().take(8).map(|b| format!("{:02x}", b)).collect()
}

/// Sealed outcome of one job
///
/// Exactly one of these is emitted per job that enters the batch. Immutable
/// once constructed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobResult {
    /// Id of the job this result seals
    pub job_id: String,

    /// Source file the job referred to
    pub input_path: PathBuf,

    /// Terminal status
    pub status: JobStatus,

    /// When the driver picked the job up
    pub started_at: DateTime<Utc>,

    /// When the result was sealed
    pub ended_at: DateTime<Utc>,

    /// Child exit code, when a child ran to completion
    pub exit_code: Option<i32>,

    /// Failure classification, present iff status is Failed
    pub error_kind: Option<FailureKind>,

    /// Human-readable context for failures and skips
    pub message: Option<String>,

    /// Last lines of transcoder stderr, for the failure report
    pub stderr_tail: Vec<String>,
}

impl JobResult {
    /// Seal a successful result
    pub fn ok(job: &Job, started_at: DateTime<Utc>, exit_code: Option<i32>) -> Self {
        Self {
            job_id: job.id.clone(),
            input_path: job.input_path.clone(),
            status: JobStatus::Ok,
            started_at,
            ended_at: Utc::now(),
            exit_code,
            error_kind: None,
            message: None,
            stderr_tail: Vec::new(),
        }
    }

    /// Seal a failed result with its classification and stderr tail
    pub fn failed(
        job: &Job,
        started_at: DateTime<Utc>,
        kind: FailureKind,
        message: impl Into<String>,
        exit_code: Option<i32>,
        stderr_tail: Vec<String>,
    ) -> Self {
        Self {
            job_id: job.id.clone(),
            input_path: job.input_path.clone(),
            status: JobStatus::Failed,
            started_at,
            ended_at: Utc::now(),
            exit_code,
            error_kind: Some(kind),
            message: Some(message.into()),
            stderr_tail,
        }
    }

    /// Seal a cancelled result
    pub fn cancelled(job: &Job, started_at: DateTime<Utc>) -> Self {
        Self {
            job_id: job.id.clone(),
            input_path: job.input_path.clone(),
            status: JobStatus::Cancelled,
            started_at,
            ended_at: Utc::now(),
            exit_code: None,
            error_kind: None,
            message: None,
            stderr_tail: Vec::new(),
        }
    }

    /// Seal a skipped result for a file that never became a job
    ///
    /// Used by intake for files that fail validation or cannot be listed.
    pub fn skipped(input_path: PathBuf, message: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            job_id: Uuid::new_v4().to_string(),
            input_path,
            status: JobStatus::Skipped,
            started_at: now,
            ended_at: now,
            exit_code: None,
            error_kind: None,
            message: Some(message.into()),
            stderr_tail: Vec::new(),
        }
    }

    /// Wall time the job was in flight
    pub fn duration(&self) -> chrono::Duration {
        self.ended_at - self.started_at
    }
}

/// Summary of one completed batch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchReport {
    /// Every sealed result, in seal order
    pub results: Vec<JobResult>,

    /// When the batch started
    pub started_at: DateTime<Utc>,

    /// When the batch finished
    pub ended_at: DateTime<Utc>,

    /// Total number of results
    pub total: usize,

    /// Count of successful jobs
    pub ok: usize,

    /// Count of failed jobs
    pub failed: usize,

    /// Count of cancelled jobs
    pub cancelled: usize,

    /// Count of skipped files
    pub skipped: usize,
}

impl BatchReport {
    /// Build a report from sealed results, tallying by status
    pub fn new(
        results: Vec<JobResult>,
        started_at: DateTime<Utc>,
        ended_at: DateTime<Utc>,
    ) -> Self {
        let mut ok = 0;
        let mut failed = 0;
        let mut cancelled = 0;
        let mut skipped = 0;
        for r in &results {
            match r.status {
                JobStatus::Ok => ok += 1,
                JobStatus::Failed => failed += 1,
                JobStatus::Cancelled => cancelled += 1,
                JobStatus::Skipped => skipped += 1,
            }
        }

        Self {
            total: results.len(),
            results,
            started_at,
            ended_at,
            ok,
            failed,
            cancelled,
            skipped,
        }
    }

    /// The batch succeeded iff every result is Ok
    pub fn is_ok(&self) -> bool {
        self.ok == self.total
    }

    /// One-line summary for the final report
    pub fn summary_line(&self) -> String {
        format!(
            "total: {} | ok: {} | failed: {} | cancelled: {} | skipped: {}",
            self.total, self.ok, self.failed, self.cancelled, self.skipped
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_job_derives_stem_and_output_root() {
        let spec = TranscodeSpec::default();
        let job = Job::new(
            PathBuf::from("/in/123-456.mp4"),
            Path::new("/out"),
            &spec,
        );
        assert_eq!(job.stem, "123-456");
        assert_eq!(job.output_root, PathBuf::from("/out/123-456"));
        assert_eq!(job.fingerprint.len(), 16);
    }

    #[test]
    fn test_fingerprint_tracks_path_and_settings() {
        let spec = TranscodeSpec::default();
        let a = Job::new(PathBuf::from("/in/a.mp4"), Path::new("/out"), &spec);
        let b = Job::new(PathBuf::from("/in/b.mp4"), Path::new("/out"), &spec);
        assert_ne!(a.fingerprint, b.fingerprint);

        let mut other = TranscodeSpec::default();
        other.crf = Some(18);
        let c = Job::new(PathBuf::from("/in/a.mp4"), Path::new("/out"), &other);
        assert_ne!(a.fingerprint, c.fingerprint);

        let again = Job::new(PathBuf::from("/in/a.mp4"), Path::new("/out"), &spec);
        assert_eq!(a.fingerprint, again.fingerprint);
    }

    #[test]
    fn test_report_tallies_by_status() {
        let spec = TranscodeSpec::default();
        let job = Job::new(PathBuf::from("/in/a.mp4"), Path::new("/out"), &spec);
        let started = Utc::now();

        let results = vec![
            JobResult::ok(&job, started, Some(0)),
            JobResult::cancelled(&job, started),
            JobResult::skipped(PathBuf::from("/in/bad.mp4"), "invalid name"),
        ];
        let report = BatchReport::new(results, started, Utc::now());

        assert_eq!(report.total, 3);
        assert_eq!(report.ok, 1);
        assert_eq!(report.cancelled, 1);
        assert_eq!(report.skipped, 1);
        assert!(!report.is_ok());
    }
}

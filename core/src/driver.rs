// Transcoder driver
// Runs one job end to end: probe, spawn under the sandbox, stream progress,
// enforce timeouts, verify outputs

use crate::constants::driver::{
    FAILURE_TAIL_LINES, STALL_TIMEOUT_SECONDS, TERMINATE_GRACE_SECONDS,
};
use crate::error::{CoreError, FailureKind};
use crate::job::{Job, JobResult};
use crate::probe::{probe_media, MediaInfo};
use crate::progress::{ProgressEvent, ProgressParser, ProgressStage};
use crate::sandbox::{ProcessSandbox, SandboxPolicy};
use crate::toolchain::Toolchain;
use crate::transcode::{build_hls_args, TranscodeSpec};
use log::{debug, info, warn};
use std::path::Path;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Driver knobs not covered by the sandbox policy
#[derive(Debug, Clone)]
pub struct DriverOptions {
    /// Terminate when no progress event arrives for this long
    pub stall_timeout: Duration,

    /// Interval between graceful stop and force kill
    pub grace: Duration,
}

impl Default for DriverOptions {
    fn default() -> Self {
        Self {
            stall_timeout: Duration::from_secs(STALL_TIMEOUT_SECONDS),
            grace: Duration::from_secs(TERMINATE_GRACE_SECONDS),
        }
    }
}

/// Why the stderr loop stopped before the child finished on its own
enum Interruption {
    WallTimeout,
    Stalled,
    Cancelled,
}

/// Run one job to completion under the sandbox
///
/// Emits progress through `progress` (a latest-value channel; sending never
/// blocks) and honors `cancel` at every suspension point. Always seals
/// exactly one JobResult.
pub async fn run_job(
    job: &Job,
    spec: &TranscodeSpec,
    policy: &SandboxPolicy,
    sandbox: &ProcessSandbox,
    toolchain: &Toolchain,
    progress: &watch::Sender<ProgressEvent>,
    cancel: &CancellationToken,
    options: &DriverOptions,
) -> JobResult {
    let started_at = chrono::Utc::now();
    let send = |fraction: f64, stage: ProgressStage| {
        let _ = progress.send(ProgressEvent::new(&job.id, fraction, stage));
    };

    if cancel.is_cancelled() {
        return JobResult::cancelled(job, started_at);
    }

    // A hostile input name never reaches a child. The transcoder argv is
    // machine-built (filter graphs contain ';'), so the policy-level
    // argument scan is off for it and this check stands in.
    let input_str = job.input_path.to_string_lossy();
    if input_str
        .chars()
        .any(|c| matches!(c, ';' | '&' | '|' | '`' | '$' | '>' | '<'))
    {
        return JobResult::failed(
            job,
            started_at,
            FailureKind::SpawnFailed,
            format!("suspicious characters in input path: {}", input_str),
            None,
            Vec::new(),
        );
    }

    // Probe the input; failures degrade to indeterminate progress
    send(0.0, ProgressStage::Probing);
    let media = match probe_media(&toolchain.ffprobe_path, &job.input_path, policy).await {
        Ok(info) => info,
        Err(e) => {
            warn!(
                "probe failed for {}, continuing with indeterminate progress: {}",
                job.input_path.display(),
                e
            );
            MediaInfo::default()
        }
    };
    debug!(
        "probed {}: duration={:?} audio={:?}",
        job.input_path.display(),
        media.duration_seconds,
        media.has_audio
    );

    if cancel.is_cancelled() {
        return JobResult::cancelled(job, started_at);
    }

    // Build the command line; argv only, never a shell
    let mut cmd = vec![toolchain.ffmpeg_path.to_string_lossy().to_string()];
    cmd.extend(build_hls_args(&job.input_path, &job.output_root, spec, &media));

    // Validate against the policy before any output directory exists, so a
    // rejected job leaves nothing behind
    let cwd = job
        .input_path
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .to_path_buf();
    if let Err(e) = sandbox.validate(&cmd, policy, &cwd) {
        return JobResult::failed(
            job,
            started_at,
            FailureKind::SpawnFailed,
            e.to_string(),
            None,
            Vec::new(),
        );
    }

    if let Err(e) = create_output_dirs(job, spec) {
        return JobResult::failed(
            job,
            started_at,
            FailureKind::SpawnFailed,
            format!("cannot create output directories: {}", e),
            None,
            Vec::new(),
        );
    }

    let spawned = match sandbox.spawn(&cmd, policy, Some(&cwd)) {
        Ok(s) => s,
        Err(e) => {
            return JobResult::failed(
                job,
                started_at,
                FailureKind::SpawnFailed,
                e.to_string(),
                None,
                Vec::new(),
            );
        }
    };
    let mut child = spawned.child;
    let handle = spawned.handle;

    send(0.0, ProgressStage::Transcoding);

    let mut parser = ProgressParser::new(media.duration_seconds);
    let stderr = child.stderr.take();
    let mut lines = stderr.map(|s| BufReader::new(s).lines());

    let wall_deadline = Instant::now() + policy.wall_timeout;
    let mut stall_deadline = Instant::now() + options.stall_timeout;
    let mut interruption: Option<Interruption> = None;

    // Drain stderr until EOF or a watchdog fires. Each decoded progress
    // line resets the stall watchdog and updates the latest-value channel.
    while let Some(reader) = lines.as_mut() {
        tokio::select! {
            line = reader.next_line() => {
                match line {
                    Ok(Some(line)) => {
                        if let Some(fraction) = parser.feed_line(&line) {
                            stall_deadline = Instant::now() + options.stall_timeout;
                            send(fraction, ProgressStage::Transcoding);
                        }
                    }
                    Ok(None) | Err(_) => break,
                }
            }
            _ = tokio::time::sleep_until(wall_deadline), if policy.kill_on_timeout => {
                interruption = Some(Interruption::WallTimeout);
                break;
            }
            _ = tokio::time::sleep_until(stall_deadline) => {
                interruption = Some(Interruption::Stalled);
                break;
            }
            _ = cancel.cancelled() => {
                interruption = Some(Interruption::Cancelled);
                break;
            }
        }
    }

    // Reap the child. On an interruption, terminate runs concurrently with
    // the reap; marking the handle as soon as the child dies lets the grace
    // wait resolve immediately instead of escalating to a force-kill.
    let status = if interruption.is_some() {
        let (_, status) = tokio::join!(handle.terminate(options.grace), reap(&mut child, &handle));
        status
    } else {
        // Normal EOF: bound the reap by what is left of the wall clock
        match tokio::time::timeout_at(wall_deadline, reap(&mut child, &handle)).await {
            Ok(status) => status,
            Err(_) => {
                interruption = Some(Interruption::WallTimeout);
                let (_, status) =
                    tokio::join!(handle.terminate(options.grace), reap(&mut child, &handle));
                status
            }
        }
    };

    let exit_code = status.as_ref().ok().and_then(|s| s.code());
    sandbox.release(&handle, exit_code);

    let tail = parser.tail(FAILURE_TAIL_LINES);

    // A monitor-initiated termination outranks the generic exit paths; the
    // child died because it broke its resource policy, not on its own
    if let Some(reason) = handle.violation() {
        return JobResult::failed(
            job,
            started_at,
            FailureKind::PolicyViolation,
            reason,
            exit_code,
            tail,
        );
    }

    match interruption {
        Some(Interruption::Cancelled) => JobResult::cancelled(job, started_at),
        Some(Interruption::WallTimeout) => JobResult::failed(
            job,
            started_at,
            FailureKind::Timeout,
            format!(
                "wall-clock limit of {}s exceeded",
                policy.wall_timeout.as_secs()
            ),
            exit_code,
            tail,
        ),
        Some(Interruption::Stalled) => JobResult::failed(
            job,
            started_at,
            FailureKind::ProgressStalled,
            format!(
                "no progress for {}s while child was running",
                options.stall_timeout.as_secs()
            ),
            exit_code,
            tail,
        ),
        None => match status {
            Ok(status) if status.success() => match verify_outputs(&job.output_root) {
                Ok(()) => {
                    send(1.0, ProgressStage::Finalizing);
                    info!("transcode complete: {}", job.input_path.display());
                    JobResult::ok(job, started_at, exit_code)
                }
                Err(e) => JobResult::failed(
                    job,
                    started_at,
                    FailureKind::OutputMissing,
                    e.to_string(),
                    exit_code,
                    tail,
                ),
            },
            Ok(status) => JobResult::failed(
                job,
                started_at,
                FailureKind::NonZeroExit,
                format!("transcoder exited with status {}", status),
                exit_code,
                tail,
            ),
            Err(e) => JobResult::failed(
                job,
                started_at,
                FailureKind::NonZeroExit,
                format!("failed to reap transcoder: {}", e),
                None,
                tail,
            ),
        },
    }
}

/// Wait for the child and record its exit on the handle right away
async fn reap(
    child: &mut tokio::process::Child,
    handle: &crate::sandbox::ProcessHandle,
) -> std::io::Result<std::process::ExitStatus> {
    let status = child.wait().await;
    handle.mark_exited(status.as_ref().ok().and_then(|s| s.code()));
    status
}

/// Create the job's output root and one directory per rendition
///
/// The HLS muxer writes `<root>/<label>/segment_*.ts` and expects the
/// directories to exist.
fn create_output_dirs(job: &Job, spec: &TranscodeSpec) -> std::io::Result<()> {
    std::fs::create_dir_all(&job.output_root)?;
    for rendition in spec.deduped_ladder() {
        std::fs::create_dir_all(job.output_root.join(rendition.label()))?;
    }
    Ok(())
}

/// Verify the child left a master playlist and at least one media segment
fn verify_outputs(output_root: &Path) -> crate::error::Result<()> {
    let master = output_root.join("master.m3u8");
    if !master.is_file() {
        return Err(CoreError::OutputMissing(master));
    }

    let mut found_segment = false;
    for entry in std::fs::read_dir(output_root)? {
        let entry = entry?;
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        for sub in std::fs::read_dir(&path)? {
            let sub = sub?.path();
            if sub.extension().is_some_and(|e| e == "ts" || e == "m4s") {
                found_segment = true;
                break;
            }
        }
        if found_segment {
            break;
        }
    }

    if !found_segment {
        return Err(CoreError::OutputMissing(output_root.join("<segments>")));
    }
    Ok(())
}

// Application context
// Wires configuration, toolchain, sandbox, intake, scheduler, and organizer
// into one batch run and maps the outcome to an exit code

use crate::cli::Args;
use crate::shutdown;
use anyhow::{Context, Result};
use hlsmill_core::{
    build_jobs, find_toolchain, organize_output, rename_files, validate_files, AggregateProgress,
    AuditLog, BatchReport, EngineConfig, JobResult, JobStatus, PathsConfig, ProcessSandbox,
    SandboxPolicy, Scheduler, SchedulerOptions,
};
use log::{error, info, warn};
use regex::Regex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Exit code for a batch interrupted by a signal
const EXIT_INTERRUPTED: i32 = 130;

/// Run one batch end to end; returns the process exit code
pub async fn run(args: Args) -> Result<i32> {
    let paths = PathsConfig::default();

    // Configuration: file or profile first, then CLI overrides
    let mut config = if let Some(ref path) = args.config {
        info!("loading configuration from {}", path.display());
        EngineConfig::load_from_file(path).context("loading configuration")?
    } else if let Some(ref profile) = args.profile {
        info!("loading profile {:?}", profile);
        EngineConfig::load_profile(profile, &paths.profiles_dir).context("loading profile")?
    } else {
        EngineConfig::default()
    };
    apply_args(&mut config, &args);

    let validation = config.validate();
    for warning in &validation.warnings {
        warn!("configuration warning: {}", warning);
    }
    if !validation.is_ok() {
        for err in &validation.errors {
            error!("configuration error: {}", err);
        }
        return Ok(1);
    }

    // Startup gate: both binaries and a parsed version, or no batch at all
    let toolchain = match find_toolchain() {
        Ok(toolchain) => {
            info!(
                "found ffmpeg {} at {}",
                toolchain.version,
                toolchain.ffmpeg_path.display()
            );
            toolchain
        }
        Err(e) => {
            error!("toolchain validation failed: {}", e);
            return Ok(1);
        }
    };

    std::fs::create_dir_all(&config.output_folder)
        .with_context(|| format!("creating {}", config.output_folder.display()))?;
    std::fs::create_dir_all(&paths.log_dir).ok();

    let audit = AuditLog::new(Some(paths.log_dir.clone()));
    let sandbox = Arc::new(ProcessSandbox::new(audit.clone()));
    let policy = build_policy(&config, &toolchain);

    print_configuration(&config);

    let cancel = CancellationToken::new();
    shutdown::install_signal_handlers(cancel.clone());

    if let Some(secs) = config.batch_timeout_seconds {
        let token = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(secs)).await;
            warn!("batch timeout of {}s reached, cancelling", secs);
            token.cancel();
        });
    }

    // Intake: optional rename, then validation into jobs and skips
    let rename_pattern = Regex::new(&config.file_rename_pattern)?;
    let validation_pattern = Regex::new(&config.file_validation_pattern)?;
    let organization_pattern = Regex::new(&config.folder_organization_pattern)?;

    if config.auto_rename_files {
        info!("renaming files...");
        rename_files(&config.input_folder, &rename_pattern, &config.file_extension)?;
    }

    let (valid, invalid) =
        validate_files(&config.input_folder, &validation_pattern, &config.file_extension)?;
    let skipped: Vec<JobResult> = invalid
        .into_iter()
        .map(|path| {
            warn!("skipping invalid file name: {}", path.display());
            JobResult::skipped(path, "file name failed validation")
        })
        .collect();

    let jobs = build_jobs(valid, &config.output_folder, &config.ffmpeg_params);
    info!("{} job(s) to process, {} skipped", jobs.len(), skipped.len());

    // Scheduler with a logging progress sink
    let options = SchedulerOptions {
        parallelism: config.effective_parallelism(),
        stop_on_fatal: config.stop_on_fatal,
        driver: Default::default(),
    };
    let scheduler = Scheduler::new(
        config.ffmpeg_params.clone(),
        policy,
        Arc::clone(&sandbox),
        toolchain,
        options,
    );

    let (progress_tx, mut progress_rx) = mpsc::channel::<AggregateProgress>(64);
    let progress_logger = tokio::spawn(async move {
        while let Some(update) = progress_rx.recv().await {
            info!(
                "batch progress: {:5.1}% ({}/{} jobs done)",
                update.fraction * 100.0,
                update.completed,
                update.total
            );
        }
    });

    let started_at = chrono::Utc::now();
    let batch = scheduler.process(jobs, cancel.clone(), Some(progress_tx)).await;
    let _ = progress_logger.await;

    // Organizer runs over the finished tree; failed jobs leave no matching
    // top-level directories worth moving and conflicts are skipped anyway
    if config.auto_organize_folders && !shutdown::was_interrupted() {
        info!("organizing folders...");
        organize_output(&config.output_folder, &organization_pattern)?;
    }

    // Merge intake skips into the final accounting
    let mut results = skipped;
    results.extend(batch.results);
    let report = BatchReport::new(results, started_at, chrono::Utc::now());

    print_summary(&report);

    // Backstop: nothing sandboxed survives the run
    let lingering = sandbox.terminate_all(Duration::from_secs(5)).await;
    if lingering > 0 {
        warn!("terminated {} lingering process(es) at shutdown", lingering);
    }
    if audit.dropped() > 0 {
        warn!("{} audit record(s) dropped under load", audit.dropped());
    }
    audit.flush().await;

    if shutdown::was_interrupted() {
        return Ok(EXIT_INTERRUPTED);
    }
    Ok(if report.is_ok() { 0 } else { 1 })
}

/// Apply command line arguments to the configuration
fn apply_args(config: &mut EngineConfig, args: &Args) {
    if let Some(ref input) = args.input {
        config.input_folder = input.clone();
    }
    if let Some(ref output) = args.output {
        config.output_folder = output.clone();
    }
    if let Some(ref encoder) = args.encoder {
        config.ffmpeg_params.video_encoder = encoder.clone();
    }
    if let Some(ref preset) = args.preset {
        config.ffmpeg_params.preset = preset.clone();
    }
    if let Some(ref tune) = args.tune {
        config.ffmpeg_params.tune = Some(tune.clone());
    }
    if let Some(fps) = args.fps {
        config.ffmpeg_params.fps = Some(fps);
    }
    if args.no_audio {
        config.ffmpeg_params.include_audio = false;
    }
    if let Some(parallel) = args.parallel {
        config.max_parallel_jobs = parallel;
    }
    if let Some(rename) = args.rename_override() {
        config.auto_rename_files = rename;
    }
    if let Some(organize) = args.organize_override() {
        config.auto_organize_folders = organize;
    }
}

/// Build the sandbox policy for transcoder and probe processes
fn build_policy(config: &EngineConfig, toolchain: &hlsmill_core::Toolchain) -> SandboxPolicy {
    let mut policy = SandboxPolicy::default();
    policy.allow_read_path(config.input_folder.clone());
    policy.allow_write_path(config.output_folder.clone());
    policy.allow_command(toolchain.ffmpeg_path.to_string_lossy().to_string());
    policy.allow_command(toolchain.ffprobe_path.to_string_lossy().to_string());
    // The transcoder argv is machine-built and contains filter graphs with
    // ';'; the driver screens the input path itself before building argv
    policy.validate_args = false;
    policy
}

/// Print the effective configuration
fn print_configuration(config: &EngineConfig) {
    info!("configuration:");
    info!("  input:  {}", config.input_folder.display());
    info!("  output: {}", config.output_folder.display());
    info!("  parallel jobs: {}", config.effective_parallelism());
    info!("  rename: {}", config.auto_rename_files);
    info!("  organize: {}", config.auto_organize_folders);
    info!(
        "  encoder: {} (preset {}, crf {:?})",
        config.ffmpeg_params.video_encoder, config.ffmpeg_params.preset, config.ffmpeg_params.crf
    );
    let ladder: Vec<String> = config
        .ffmpeg_params
        .ladder
        .iter()
        .map(|r| format!("{}p@{}k", r.height, r.bitrate_kbps))
        .collect();
    info!("  ladder: {}", ladder.join(", "));
}

/// Final summary line plus one block per failed job
fn print_summary(report: &BatchReport) {
    info!("batch summary: {}", report.summary_line());

    for result in report
        .results
        .iter()
        .filter(|r| r.status == JobStatus::Failed)
    {
        let kind = result
            .error_kind
            .map(|k| k.to_string())
            .unwrap_or_else(|| "Internal".to_string());
        error!(
            "job {} failed ({}): {} [{}]",
            result.job_id,
            kind,
            result.message.as_deref().unwrap_or("no message"),
            result.input_path.display()
        );
        for line in &result.stderr_tail {
            error!("  | {}", line);
        }
    }
}

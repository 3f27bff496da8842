// FFmpeg toolchain discovery
// Locates ffmpeg and ffprobe and parses the version; startup is rejected
// when either binary or the version string is missing

use crate::error::{CoreError, Result};
use std::path::{Path, PathBuf};
use std::process::Command;

/// A validated ffmpeg/ffprobe installation
#[derive(Debug, Clone)]
pub struct Toolchain {
    /// Path to the ffmpeg binary
    pub ffmpeg_path: PathBuf,

    /// Path to the ffprobe binary
    pub ffprobe_path: PathBuf,

    /// Version string (e.g. "7.1" or "n7.1")
    pub version: String,
}

/// Find and validate the transcoding toolchain
///
/// Searches the system PATH first, then common installation locations. Both
/// binaries must exist and `ffmpeg -version` must yield a parseable version
/// string; anything less is an error, not a degraded start.
pub fn find_toolchain() -> Result<Toolchain> {
    if let Ok(toolchain) = check_ffmpeg_at_path("ffmpeg") {
        return Ok(toolchain);
    }

    let common_locations = [
        "/usr/bin/ffmpeg",
        "/usr/local/bin/ffmpeg",
        "/opt/ffmpeg/bin/ffmpeg",
        "/snap/bin/ffmpeg",
    ];

    for location in common_locations {
        if Path::new(location).exists() {
            if let Ok(toolchain) = check_ffmpeg_at_path(location) {
                return Ok(toolchain);
            }
        }
    }

    Err(CoreError::Toolchain(
        "ffmpeg not found. Install it with your package manager and ensure ffprobe is alongside it".into(),
    ))
}

/// Validate ffmpeg at the given path and locate its ffprobe
fn check_ffmpeg_at_path(ffmpeg_path: &str) -> Result<Toolchain> {
    let ffmpeg = PathBuf::from(ffmpeg_path);

    let version_output = Command::new(&ffmpeg)
        .arg("-version")
        .output()
        .map_err(|e| CoreError::Toolchain(format!("failed to run ffmpeg: {}", e)))?;

    if !version_output.status.success() {
        return Err(CoreError::Toolchain("ffmpeg execution failed".into()));
    }

    let version_text = String::from_utf8_lossy(&version_output.stdout);
    let version = extract_version(&version_text)?;

    let ffprobe = find_ffprobe(&ffmpeg)?;

    Ok(Toolchain {
        ffmpeg_path: ffmpeg,
        ffprobe_path: ffprobe,
        version,
    })
}

/// Extract version from `ffmpeg -version` output
fn extract_version(output: &str) -> Result<String> {
    // First line: "ffmpeg version n7.1 Copyright..."
    let first_line = output
        .lines()
        .next()
        .ok_or_else(|| CoreError::Toolchain("empty version output".into()))?;

    if let Some(start) = first_line.find("version ") {
        let version_part = &first_line[start + 8..];
        let version = version_part
            .split_whitespace()
            .next()
            .ok_or_else(|| CoreError::Toolchain("could not parse version".into()))?;
        Ok(version.to_string())
    } else {
        Err(CoreError::Toolchain("version not found in output".into()))
    }
}

/// Find the ffprobe binary (alongside ffmpeg, or on PATH)
fn find_ffprobe(ffmpeg_path: &Path) -> Result<PathBuf> {
    if let Some(parent) = ffmpeg_path.parent() {
        let ffprobe = parent.join("ffprobe");
        if ffprobe.exists() {
            return Ok(ffprobe);
        }
    }

    let ffprobe = PathBuf::from("ffprobe");
    let test = Command::new(&ffprobe).arg("-version").output();
    if test.is_ok() {
        return Ok(ffprobe);
    }

    Err(CoreError::Toolchain(
        "ffprobe not found. It should be installed alongside ffmpeg".into(),
    ))
}

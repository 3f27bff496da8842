// FFprobe integration for pre-dispatch media inspection
// Queries duration and audio presence before a job is handed to the driver

use crate::constants::probe::PROBE_TIMEOUT_SECONDS;
use crate::error::{CoreError, Result};
use crate::sandbox::SandboxPolicy;
use serde::Deserialize;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

/// What a probe learned about an input file
///
/// Missing or unparseable fields are absent, not zero, so callers can
/// degrade (indeterminate progress) instead of misreporting.
#[derive(Debug, Clone, Default)]
pub struct MediaInfo {
    /// Container duration in seconds
    pub duration_seconds: Option<f64>,

    /// Whether the file carries at least one audio stream
    pub has_audio: Option<bool>,

    /// Container format name
    pub container: Option<String>,
}

/// Run ffprobe on a media file
///
/// Read-only operation; the policy's allow-read set is consulted before the
/// binary is invoked, and the invocation is bounded by a timeout.
///
/// # Arguments
/// * `ffprobe_path` - Path to the ffprobe binary
/// * `file` - Media file to inspect
/// * `policy` - Sandbox policy; only its read ACL applies here
///
/// # Errors
/// Returns `CoreError::PolicyDenied` if the file is not readable under the
/// policy, `CoreError::Probe` if ffprobe fails, times out, or its output
/// cannot be parsed
pub async fn probe_media(
    ffprobe_path: &Path,
    file: &Path,
    policy: &SandboxPolicy,
) -> Result<MediaInfo> {
    if !policy.is_path_allowed_read(file) {
        return Err(CoreError::PolicyDenied(format!(
            "probe target not readable under policy: {}",
            file.display()
        )));
    }

    let output = Command::new(ffprobe_path)
        .args([
            "-v",
            "quiet",
            "-print_format",
            "json",
            "-show_format",
            "-show_streams",
        ])
        .arg(file)
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output();

    let output = tokio::time::timeout(Duration::from_secs(PROBE_TIMEOUT_SECONDS), output)
        .await
        .map_err(|_| CoreError::Probe(format!("ffprobe timed out for {}", file.display())))?
        .map_err(|e| CoreError::Probe(format!("failed to run ffprobe: {}", e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(CoreError::Probe(format!(
            "ffprobe failed for {}: {}",
            file.display(),
            stderr.trim()
        )));
    }

    let parsed: FfprobeOutput = serde_json::from_slice(&output.stdout)
        .map_err(|e| CoreError::Probe(format!("failed to parse ffprobe JSON: {}", e)))?;

    Ok(convert_ffprobe_output(parsed))
}

/// Helper struct for deserializing ffprobe JSON output
#[derive(Deserialize, Debug)]
struct FfprobeOutput {
    streams: Option<Vec<FfprobeStream>>,
    format: Option<FfprobeFormat>,
}

/// Stream information from ffprobe
#[derive(Deserialize, Debug)]
struct FfprobeStream {
    /// Type of stream: "video", "audio", "subtitle", etc.
    codec_type: Option<String>,
}

/// Format (container) information from ffprobe
#[derive(Deserialize, Debug)]
struct FfprobeFormat {
    /// Format name: "mov,mp4,m4a,3gp,3g2,mj2", etc.
    format_name: Option<String>,
    /// Duration in seconds as a decimal string (may be missing)
    duration: Option<String>,
}

/// Convert ffprobe output to MediaInfo, keeping unknown fields absent
fn convert_ffprobe_output(output: FfprobeOutput) -> MediaInfo {
    let duration_seconds = output
        .format
        .as_ref()
        .and_then(|f| f.duration.as_deref())
        .and_then(|d| d.parse::<f64>().ok())
        .filter(|d| d.is_finite() && *d >= 0.0);

    let has_audio = output.streams.as_ref().map(|streams| {
        streams
            .iter()
            .any(|s| s.codec_type.as_deref() == Some("audio"))
    });

    let container = output.format.and_then(|f| f.format_name);

    MediaInfo {
        duration_seconds,
        has_audio,
        container,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_convert_full_output() {
        let raw = r#"{
            "streams": [
                {"codec_type": "video"},
                {"codec_type": "audio"}
            ],
            "format": {"format_name": "mov,mp4,m4a,3gp,3g2,mj2", "duration": "10.050000"}
        }"#;
        let parsed: FfprobeOutput = serde_json::from_str(raw).unwrap();
        let info = convert_ffprobe_output(parsed);

        assert_eq!(info.has_audio, Some(true));
        assert!((info.duration_seconds.unwrap() - 10.05).abs() < 1e-9);
        assert!(info.container.unwrap().contains("mp4"));
    }

    #[test]
    fn test_missing_fields_stay_absent() {
        let raw = r#"{"format": {"format_name": "matroska,webm"}}"#;
        let parsed: FfprobeOutput = serde_json::from_str(raw).unwrap();
        let info = convert_ffprobe_output(parsed);

        assert_eq!(info.duration_seconds, None);
        assert_eq!(info.has_audio, None);
    }

    #[test]
    fn test_video_only_reports_no_audio() {
        let raw = r#"{"streams": [{"codec_type": "video"}], "format": {"duration": "1.0"}}"#;
        let parsed: FfprobeOutput = serde_json::from_str(raw).unwrap();
        let info = convert_ffprobe_output(parsed);

        assert_eq!(info.has_audio, Some(false));
        assert_eq!(info.duration_seconds, Some(1.0));
    }

    #[test]
    fn test_garbage_duration_stays_absent() {
        let raw = r#"{"format": {"duration": "N/A"}}"#;
        let parsed: FfprobeOutput = serde_json::from_str(raw).unwrap();
        let info = convert_ffprobe_output(parsed);
        assert_eq!(info.duration_seconds, None);
    }
}

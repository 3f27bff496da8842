// HLS transcoding command builder
// Constructs the exact ffmpeg command line for adaptive bitrate output

use crate::constants::defaults;
use crate::probe::MediaInfo;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// One output rendition of the adaptive bitrate ladder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rendition {
    /// Output height in pixels (width derived, keeping aspect ratio)
    pub height: u32,

    /// Video bitrate in kilobits per second
    pub bitrate_kbps: u32,

    /// Audio bitrate in kilobits per second
    pub audio_bitrate_kbps: u32,
}

impl Rendition {
    /// Label used for the per-rendition output directory ("720p")
    pub fn label(&self) -> String {
        format!("{}p", self.height)
    }
}

/// Encoding parameters for one batch
///
/// Frozen for the duration of a batch; every job of the batch is transcoded
/// with the same spec.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscodeSpec {
    /// Video encoder name passed to ffmpeg (e.g. "libx264")
    pub video_encoder: String,

    /// Audio encoder name (e.g. "aac")
    pub audio_encoder: String,

    /// Encoder preset
    pub preset: String,

    /// Optional encoder tune
    pub tune: Option<String>,

    /// Optional constant rate factor
    pub crf: Option<u8>,

    /// Optional output frame rate
    pub fps: Option<u32>,

    /// Whether to carry an audio track into the output
    pub include_audio: bool,

    /// HLS segment length in seconds
    pub segment_seconds: u32,

    /// Ordered output renditions
    pub ladder: Vec<Rendition>,
}

impl Default for TranscodeSpec {
    fn default() -> Self {
        Self {
            video_encoder: defaults::VIDEO_ENCODER.to_string(),
            audio_encoder: defaults::AUDIO_ENCODER.to_string(),
            preset: defaults::PRESET.to_string(),
            tune: None,
            crf: Some(defaults::CRF),
            fps: None,
            include_audio: true,
            segment_seconds: defaults::SEGMENT_SECONDS,
            ladder: vec![
                Rendition { height: 1080, bitrate_kbps: 5000, audio_bitrate_kbps: 192 },
                Rendition { height: 720, bitrate_kbps: 3000, audio_bitrate_kbps: 128 },
                Rendition { height: 480, bitrate_kbps: 1500, audio_bitrate_kbps: 96 },
                Rendition { height: 360, bitrate_kbps: 800, audio_bitrate_kbps: 64 },
            ],
        }
    }
}

impl TranscodeSpec {
    /// The ladder with duplicate (height, bitrate) entries removed
    ///
    /// Order of first occurrence is preserved. Two renditions that differ
    /// only in audio bitrate are still duplicates; the first wins.
    pub fn deduped_ladder(&self) -> Vec<Rendition> {
        let mut seen: Vec<(u32, u32)> = Vec::new();
        let mut out = Vec::new();
        for r in &self.ladder {
            let key = (r.height, r.bitrate_kbps);
            if !seen.contains(&key) {
                seen.push(key);
                out.push(*r);
            }
        }
        out
    }

    /// Stable string of the codec settings, folded into job fingerprints
    pub fn fingerprint_material(&self) -> String {
        let ladder: Vec<String> = self
            .deduped_ladder()
            .iter()
            .map(|r| format!("{}:{}", r.height, r.bitrate_kbps))
            .collect();
        format!(
            "{}|{}|{}|{}|{}|{}|{}|{}",
            self.video_encoder,
            self.audio_encoder,
            self.preset,
            self.tune.as_deref().unwrap_or("-"),
            self.crf.map(|c| c.to_string()).unwrap_or_else(|| "-".into()),
            self.fps.map(|f| f.to_string()).unwrap_or_else(|| "-".into()),
            self.include_audio,
            ladder.join(","),
        )
    }
}

/// Build the ffmpeg argument list for one HLS transcode
///
/// Produces one variant stream per ladder rendition via a split/scale filter
/// graph, segments each variant under `<output_root>/<label>/`, and writes a
/// master playlist at `<output_root>/master.m3u8`. The list never goes
/// through a shell; every argument is a discrete element.
///
/// # Arguments
/// * `input` - Path to the source file
/// * `output_root` - Job-private output directory
/// * `spec` - Encoding parameters
/// * `media` - Probe result; audio mapping is skipped when the input has no
///   audio track
pub fn build_hls_args(
    input: &Path,
    output_root: &Path,
    spec: &TranscodeSpec,
    media: &MediaInfo,
) -> Vec<String> {
    let ladder = spec.deduped_ladder();
    let with_audio = spec.include_audio && media.has_audio.unwrap_or(true);

    let mut args = Vec::new();

    // Output control flags
    args.push("-y".to_string());
    args.push("-hide_banner".to_string());
    args.push("-v".to_string());
    args.push("info".to_string());
    args.push("-stats".to_string());

    // Input file
    args.push("-i".to_string());
    args.push(input.to_string_lossy().to_string());

    // Split the decoded video into one branch per rendition, then scale
    // each branch to its target height (width kept even for the encoder)
    let mut graph = format!("[0:v]split={}", ladder.len());
    for i in 0..ladder.len() {
        graph.push_str(&format!("[v{}]", i));
    }
    for (i, r) in ladder.iter().enumerate() {
        graph.push_str(&format!(";[v{}]scale=-2:{}[v{}out]", i, r.height, i));
    }
    args.push("-filter_complex".to_string());
    args.push(graph);

    // Per-rendition stream mapping and bitrate control
    for (i, r) in ladder.iter().enumerate() {
        args.push("-map".to_string());
        args.push(format!("[v{}out]", i));
        args.push(format!("-c:v:{}", i));
        args.push(spec.video_encoder.clone());
        args.push(format!("-b:v:{}", i));
        args.push(format!("{}k", r.bitrate_kbps));
        args.push(format!("-maxrate:v:{}", i));
        args.push(format!("{}k", r.bitrate_kbps * 107 / 100));
        args.push(format!("-bufsize:v:{}", i));
        args.push(format!("{}k", r.bitrate_kbps * 3 / 2));
    }

    // Encoder-wide settings
    args.push("-preset".to_string());
    args.push(spec.preset.clone());
    if let Some(ref tune) = spec.tune {
        args.push("-tune".to_string());
        args.push(tune.clone());
    }
    if let Some(crf) = spec.crf {
        args.push("-crf".to_string());
        args.push(crf.to_string());
    }
    if let Some(fps) = spec.fps {
        args.push("-r".to_string());
        args.push(fps.to_string());
    }

    // Audio: one track per rendition so every variant is self-contained
    if with_audio {
        for (i, r) in ladder.iter().enumerate() {
            args.push("-map".to_string());
            args.push("0:a:0".to_string());
            args.push(format!("-c:a:{}", i));
            args.push(spec.audio_encoder.clone());
            args.push(format!("-b:a:{}", i));
            args.push(format!("{}k", r.audio_bitrate_kbps));
        }
    }

    // HLS muxer settings
    args.push("-f".to_string());
    args.push("hls".to_string());
    args.push("-hls_time".to_string());
    args.push(spec.segment_seconds.to_string());
    args.push("-hls_playlist_type".to_string());
    args.push("vod".to_string());
    args.push("-hls_flags".to_string());
    args.push("independent_segments".to_string());
    args.push("-hls_segment_filename".to_string());
    args.push(
        output_root
            .join("%v")
            .join("segment_%03d.ts")
            .to_string_lossy()
            .to_string(),
    );
    args.push("-master_pl_name".to_string());
    args.push("master.m3u8".to_string());

    // Variant stream map names each rendition after its label
    let entries: Vec<String> = ladder
        .iter()
        .enumerate()
        .map(|(i, r)| {
            if with_audio {
                format!("v:{},a:{},name:{}", i, i, r.label())
            } else {
                format!("v:{},name:{}", i, r.label())
            }
        })
        .collect();
    args.push("-var_stream_map".to_string());
    args.push(entries.join(" "));

    // Variant playlist pattern (the master playlist lands next to it)
    args.push(
        output_root
            .join("%v")
            .join("playlist.m3u8")
            .to_string_lossy()
            .to_string(),
    );

    args
}

#[cfg(test)]
mod tests {
    use super::*;

    fn media(has_audio: Option<bool>) -> MediaInfo {
        MediaInfo {
            duration_seconds: Some(10.0),
            has_audio,
            container: None,
        }
    }

    #[test]
    fn test_build_hls_args_basic() {
        let spec = TranscodeSpec::default();
        let args = build_hls_args(
            Path::new("/media/in/123-456.mp4"),
            Path::new("/media/out/123-456"),
            &spec,
            &media(Some(true)),
        );

        assert!(args.contains(&"-f".to_string()));
        assert!(args.contains(&"hls".to_string()));
        assert!(args.contains(&"-master_pl_name".to_string()));
        assert!(args.contains(&"master.m3u8".to_string()));
        assert!(args.contains(&"-c:v:0".to_string()));
        assert!(args.contains(&"libx264".to_string()));
        // One bitrate entry per ladder rung
        assert!(args.contains(&"5000k".to_string()));
        assert!(args.contains(&"800k".to_string()));
        // Audio mapped per rendition
        assert!(args.contains(&"-c:a:3".to_string()));
    }

    #[test]
    fn test_no_audio_when_input_silent() {
        let spec = TranscodeSpec::default();
        let args = build_hls_args(
            Path::new("/in/a.mp4"),
            Path::new("/out/a"),
            &spec,
            &media(Some(false)),
        );

        assert!(!args.iter().any(|a| a.starts_with("-c:a")));
        let map_idx = args.iter().position(|a| a == "-var_stream_map").unwrap();
        assert!(!args[map_idx + 1].contains("a:"));
    }

    #[test]
    fn test_duplicate_renditions_deduplicated() {
        let mut spec = TranscodeSpec::default();
        spec.ladder = vec![
            Rendition { height: 720, bitrate_kbps: 3000, audio_bitrate_kbps: 128 },
            Rendition { height: 720, bitrate_kbps: 3000, audio_bitrate_kbps: 96 },
            Rendition { height: 480, bitrate_kbps: 1500, audio_bitrate_kbps: 96 },
        ];

        assert_eq!(spec.deduped_ladder().len(), 2);

        let args = build_hls_args(
            Path::new("/in/a.mp4"),
            Path::new("/out/a"),
            &spec,
            &media(Some(true)),
        );
        // Only two video codec slots were emitted
        assert!(args.contains(&"-c:v:1".to_string()));
        assert!(!args.contains(&"-c:v:2".to_string()));
    }

    #[test]
    fn test_fps_and_tune_flags() {
        let mut spec = TranscodeSpec::default();
        spec.fps = Some(30);
        spec.tune = Some("film".to_string());

        let args = build_hls_args(
            Path::new("/in/a.mp4"),
            Path::new("/out/a"),
            &spec,
            &media(None),
        );

        let r_idx = args.iter().position(|a| a == "-r").unwrap();
        assert_eq!(args[r_idx + 1], "30");
        let t_idx = args.iter().position(|a| a == "-tune").unwrap();
        assert_eq!(args[t_idx + 1], "film");
    }

    #[test]
    fn test_fingerprint_material_changes_with_settings() {
        let a = TranscodeSpec::default();
        let mut b = TranscodeSpec::default();
        b.crf = Some(18);
        assert_ne!(a.fingerprint_material(), b.fingerprint_material());
    }
}

// Configuration types for the batch transcoding engine
// A frozen snapshot of these types drives one batch end to end

use crate::constants::{defaults, scheduling};
use crate::error::{CoreError, Result};
use crate::transcode::TranscodeSpec;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Configuration for one batch run
///
/// Loaded from a JSON file or profile, then overridden by CLI flags. The
/// scheduler and driver consume this as an immutable snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Folder scanned for input media
    pub input_folder: PathBuf,

    /// Folder receiving the per-job output subtrees
    pub output_folder: PathBuf,

    /// Worker-slot count; 0 means "derive from core count"
    pub max_parallel_jobs: usize,

    /// Whether intake renames files to their canonical form first
    pub auto_rename_files: bool,

    /// Whether output folders are organized into parent buckets afterwards
    pub auto_organize_folders: bool,

    /// File extension handled by intake (without the dot)
    pub file_extension: String,

    /// Rename pattern; must contain one capture group
    pub file_rename_pattern: String,

    /// Validation pattern; a canonical file name matches exactly
    pub file_validation_pattern: String,

    /// Organization pattern; first capture group is the parent bucket
    pub folder_organization_pattern: String,

    /// Abort the batch on the first fatal-class failure
    pub stop_on_fatal: bool,

    /// Optional batch-wide timeout in seconds
    pub batch_timeout_seconds: Option<u64>,

    /// Encoding parameters
    pub ffmpeg_params: TranscodeSpec,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let media_root = std::env::var("MEDIA_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(defaults::MEDIA_ROOT));

        Self {
            input_folder: media_root.join("input"),
            output_folder: media_root.join("output"),
            max_parallel_jobs: 0,
            auto_rename_files: true,
            auto_organize_folders: true,
            file_extension: defaults::FILE_EXTENSION.to_string(),
            file_rename_pattern: defaults::FILE_RENAME_PATTERN.to_string(),
            file_validation_pattern: defaults::FILE_VALIDATION_PATTERN.to_string(),
            folder_organization_pattern: defaults::FOLDER_ORGANIZATION_PATTERN.to_string(),
            stop_on_fatal: false,
            batch_timeout_seconds: None,
            ffmpeg_params: TranscodeSpec::default(),
        }
    }
}

/// Outcome of configuration validation
#[derive(Debug, Default)]
pub struct ValidationReport {
    /// Problems that must stop the run
    pub errors: Vec<String>,

    /// Problems worth surfacing but not fatal
    pub warnings: Vec<String>,
}

impl ValidationReport {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

impl EngineConfig {
    /// Validate configuration values
    ///
    /// Collects every problem instead of stopping at the first, so the user
    /// sees the full list before the process exits.
    pub fn validate(&self) -> ValidationReport {
        let mut report = ValidationReport::default();

        if self.input_folder.as_os_str().is_empty() {
            report.errors.push("input_folder must be set".into());
        } else if !self.input_folder.exists() {
            report.errors.push(format!(
                "input folder does not exist: {}",
                self.input_folder.display()
            ));
        }

        if self.output_folder.as_os_str().is_empty() {
            report.errors.push("output_folder must be set".into());
        }

        if self.file_extension.is_empty() || self.file_extension.starts_with('.') {
            report.errors.push(format!(
                "file_extension must be a bare extension, got {:?}",
                self.file_extension
            ));
        }

        // Patterns must compile; rename and organization patterns also need
        // a capture group to extract the canonical id / parent bucket
        match Regex::new(&self.file_rename_pattern) {
            Ok(re) if re.captures_len() < 2 => report.errors.push(format!(
                "file_rename_pattern needs one capture group: {}",
                self.file_rename_pattern
            )),
            Ok(_) => {}
            Err(e) => report
                .errors
                .push(format!("invalid file_rename_pattern: {}", e)),
        }
        if let Err(e) = Regex::new(&self.file_validation_pattern) {
            report
                .errors
                .push(format!("invalid file_validation_pattern: {}", e));
        }
        match Regex::new(&self.folder_organization_pattern) {
            Ok(re) if re.captures_len() < 2 => report.errors.push(format!(
                "folder_organization_pattern needs one capture group: {}",
                self.folder_organization_pattern
            )),
            Ok(_) => {}
            Err(e) => report
                .errors
                .push(format!("invalid folder_organization_pattern: {}", e)),
        }

        if self.ffmpeg_params.ladder.is_empty() {
            report.errors.push("ladder cannot be empty".into());
        }
        for r in &self.ffmpeg_params.ladder {
            if r.height == 0 || r.bitrate_kbps == 0 {
                report.errors.push(format!(
                    "ladder entry must have nonzero height and bitrate: {}x{}k",
                    r.height, r.bitrate_kbps
                ));
            }
        }
        if let Some(crf) = self.ffmpeg_params.crf {
            if crf > 51 {
                report
                    .errors
                    .push(format!("crf must be 0-51, got {}", crf));
            }
        }
        if self.ffmpeg_params.segment_seconds == 0 {
            report.errors.push("segment_seconds cannot be 0".into());
        }

        if self.max_parallel_jobs > 64 {
            report.warnings.push(format!(
                "max_parallel_jobs of {} is unusually high",
                self.max_parallel_jobs
            ));
        }
        if self.input_folder == self.output_folder {
            report
                .warnings
                .push("input and output folders are the same directory".into());
        }

        report
    }

    /// Worker-slot count for this run
    ///
    /// Explicit settings win; the default is three quarters of the logical
    /// cores, and never less than one.
    pub fn effective_parallelism(&self) -> usize {
        if self.max_parallel_jobs > 0 {
            return self.max_parallel_jobs;
        }
        let cores = num_cpus::get();
        (cores * scheduling::PARALLELISM_NUMERATOR / scheduling::PARALLELISM_DENOMINATOR).max(1)
    }

    /// Load configuration from a JSON file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| CoreError::Config(format!("failed to read config file: {}", e)))?;

        let config: EngineConfig = serde_json::from_str(&contents)
            .map_err(|e| CoreError::Config(format!("failed to parse config file: {}", e)))?;

        Ok(config)
    }

    /// Load a named profile from the profiles directory
    ///
    /// A profile is an ordinary config file stored as `<name>.json`.
    pub fn load_profile(name: &str, profiles_dir: &Path) -> Result<Self> {
        let path = profiles_dir.join(format!("{}.json", name));
        if !path.exists() {
            return Err(CoreError::Config(format!(
                "profile not found: {}",
                path.display()
            )));
        }
        Self::load_from_file(&path)
    }

    /// Save configuration to a JSON file
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(path, json)?;
        Ok(())
    }
}

/// Directories used by the engine for profiles and logs
///
/// Each directory can be overridden through an environment variable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Base directory for engine data
    /// Override: HLSMILL_DATA_DIR
    pub data_dir: PathBuf,

    /// Directory holding profile JSON files
    /// Override: HLSMILL_PROFILES_DIR
    pub profiles_dir: PathBuf,

    /// Directory for audit logs
    /// Override: HLSMILL_LOG_DIR
    pub log_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        let base = std::env::var("HLSMILL_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                PathBuf::from(home).join(".local/share/hlsmill")
            });

        let profiles_dir = std::env::var("HLSMILL_PROFILES_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| base.join("profiles"));

        let log_dir = std::env::var("HLSMILL_LOG_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| base.join("logs"));

        Self {
            data_dir: base,
            profiles_dir,
            log_dir,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn existing_config(dir: &Path) -> EngineConfig {
        let mut config = EngineConfig::default();
        config.input_folder = dir.join("in");
        config.output_folder = dir.join("out");
        std::fs::create_dir_all(&config.input_folder).unwrap();
        config
    }

    #[test]
    fn test_default_config_patterns_compile() {
        let config = EngineConfig::default();
        assert!(Regex::new(&config.file_rename_pattern).is_ok());
        assert!(Regex::new(&config.file_validation_pattern).is_ok());
        assert!(Regex::new(&config.folder_organization_pattern).is_ok());
    }

    #[test]
    fn test_validate_flags_missing_capture_group() {
        let dir = tempdir().unwrap();
        let mut config = existing_config(dir.path());
        config.file_rename_pattern = r"^\d+\.mp4$".to_string();

        let report = config.validate();
        assert!(!report.is_ok());
        assert!(report
            .errors
            .iter()
            .any(|e| e.contains("capture group")));
    }

    #[test]
    fn test_validate_flags_missing_input_folder() {
        let mut config = EngineConfig::default();
        config.input_folder = PathBuf::from("/definitely/not/here");
        let report = config.validate();
        assert!(report.errors.iter().any(|e| e.contains("does not exist")));
    }

    #[test]
    fn test_validate_rejects_empty_ladder() {
        let dir = tempdir().unwrap();
        let mut config = existing_config(dir.path());
        config.ffmpeg_params.ladder.clear();

        let report = config.validate();
        assert!(report.errors.iter().any(|e| e.contains("ladder")));
    }

    #[test]
    fn test_same_in_out_folder_is_a_warning() {
        let dir = tempdir().unwrap();
        let mut config = existing_config(dir.path());
        config.output_folder = config.input_folder.clone();

        let report = config.validate();
        assert!(report.is_ok());
        assert!(!report.warnings.is_empty());
    }

    #[test]
    fn test_json_round_trip() {
        let dir = tempdir().unwrap();
        let config = existing_config(dir.path());
        let path = dir.path().join("config.json");

        config.save_to_file(&path).unwrap();
        let loaded = EngineConfig::load_from_file(&path).unwrap();

        assert_eq!(loaded.input_folder, config.input_folder);
        assert_eq!(loaded.ffmpeg_params.ladder, config.ffmpeg_params.ladder);
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("partial.json");
        std::fs::write(&path, r#"{"max_parallel_jobs": 2}"#).unwrap();

        let loaded = EngineConfig::load_from_file(&path).unwrap();
        assert_eq!(loaded.max_parallel_jobs, 2);
        assert_eq!(loaded.file_extension, "mp4");
    }

    #[test]
    fn test_effective_parallelism_floor() {
        let mut config = EngineConfig::default();
        config.max_parallel_jobs = 0;
        assert!(config.effective_parallelism() >= 1);

        config.max_parallel_jobs = 3;
        assert_eq!(config.effective_parallelism(), 3);
    }

    #[test]
    fn test_load_missing_profile_errors() {
        let dir = tempdir().unwrap();
        let result = EngineConfig::load_profile("nope", dir.path());
        assert!(result.is_err());
    }
}

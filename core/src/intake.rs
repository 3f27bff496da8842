// File intake
// Enumerates source files, normalizes their names, and partitions them into
// valid jobs and skipped files

use crate::error::{CoreError, Result};
use crate::job::Job;
use crate::transcode::TranscodeSpec;
use crate::utils::strip_whitespace;
use log::{debug, info, warn};
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};

/// List files with the given extension directly under `root`
///
/// Non-recursive; subdirectories are ignored. Extension matching is
/// case-insensitive. The result is sorted so repeated runs see the same
/// order.
pub fn enumerate_media(root: &Path, extension: &str) -> Result<Vec<PathBuf>> {
    if !root.is_dir() {
        return Err(CoreError::Intake(format!(
            "input folder does not exist: {}",
            root.display()
        )));
    }

    let wanted = extension.to_lowercase();
    let mut files = Vec::new();
    for entry in fs::read_dir(root)? {
        let entry = entry?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let matches = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase() == wanted)
            .unwrap_or(false);
        if matches {
            files.push(path);
        }
    }

    files.sort();
    Ok(files)
}

/// Rename files under `root` to their canonical form
///
/// For each file: strip all whitespace from the name, match it against
/// `pattern` (one capture group), and rename to `<capture>.<extension>`.
/// Files already canonical are left alone; an existing target is never
/// overwritten. Returns the number of files renamed. Per-file problems are
/// logged and skipped, never fatal — a file left unrenamed simply fails
/// validation later.
pub fn rename_files(root: &Path, pattern: &Regex, extension: &str) -> Result<usize> {
    let files = enumerate_media(root, extension)?;
    let total = files.len();
    let mut renamed = 0;

    info!("renaming up to {} file(s) in {}", total, root.display());
    for file in files {
        let Some(name) = file.file_name().and_then(|n| n.to_str()) else {
            warn!("skipping file with undecodable name: {}", file.display());
            continue;
        };

        let normalized = strip_whitespace(name);
        let Some(caps) = pattern.captures(&normalized) else {
            warn!("skipping non-matching file: {}", name);
            continue;
        };
        let Some(capture) = caps.get(1) else {
            warn!("rename pattern matched without a capture for: {}", name);
            continue;
        };

        let new_name = format!("{}.{}", capture.as_str(), extension);
        if name == new_name {
            debug!("already canonical: {}", name);
            continue;
        }

        let target = file.with_file_name(&new_name);
        if target.exists() {
            warn!("cannot rename {} to {} - destination exists", name, new_name);
            continue;
        }

        match rename_or_copy(&file, &target) {
            Ok(()) => {
                info!("renamed: {} to {}", name, new_name);
                renamed += 1;
            }
            Err(e) => warn!("failed to rename {}: {}", name, e),
        }
    }

    info!("file renaming completed: {} of {} files renamed", renamed, total);
    Ok(renamed)
}

/// Atomic rename, falling back to copy+unlink across filesystems
fn rename_or_copy(from: &Path, to: &Path) -> std::io::Result<()> {
    match fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(_) => {
            fs::copy(from, to)?;
            fs::remove_file(from)
        }
    }
}

/// Partition files under `root` by whether their name matches `pattern`
///
/// Returns (valid, invalid). Validation looks at the file name only.
pub fn validate_files(
    root: &Path,
    pattern: &Regex,
    extension: &str,
) -> Result<(Vec<PathBuf>, Vec<PathBuf>)> {
    let files = enumerate_media(root, extension)?;
    let mut valid = Vec::new();
    let mut invalid = Vec::new();

    for file in files {
        let matches = file
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| pattern.is_match(n))
            .unwrap_or(false);
        if matches {
            valid.push(file);
        } else {
            invalid.push(file);
        }
    }

    Ok((valid, invalid))
}

/// Build one job per validated file
///
/// No deduplication happens here: the same path listed twice runs twice.
pub fn build_jobs(files: Vec<PathBuf>, output_folder: &Path, spec: &TranscodeSpec) -> Vec<Job> {
    files
        .into_iter()
        .map(|path| Job::new(path, output_folder, spec))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn touch(path: &Path) {
        fs::write(path, b"x").unwrap();
    }

    #[test]
    fn test_enumerate_filters_by_extension_non_recursive() {
        let dir = tempdir().unwrap();
        touch(&dir.path().join("a.mp4"));
        touch(&dir.path().join("b.MP4"));
        touch(&dir.path().join("c.mkv"));
        fs::create_dir(dir.path().join("sub")).unwrap();
        touch(&dir.path().join("sub/d.mp4"));

        let files = enumerate_media(dir.path(), "mp4").unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|f| f.file_name().unwrap().to_str().unwrap())
            .collect();
        assert_eq!(names, vec!["a.mp4", "b.MP4"]);
    }

    #[test]
    fn test_rename_normalizes_whitespace() {
        let dir = tempdir().unwrap();
        touch(&dir.path().join("123 - 456.mp4"));
        let pattern = Regex::new(r"^(\d+-\d+)\.mp4$").unwrap();

        let renamed = rename_files(dir.path(), &pattern, "mp4").unwrap();
        assert_eq!(renamed, 1);
        assert!(dir.path().join("123-456.mp4").exists());
        assert!(!dir.path().join("123 - 456.mp4").exists());
    }

    #[test]
    fn test_rename_is_idempotent() {
        let dir = tempdir().unwrap();
        touch(&dir.path().join("123 - 456.mp4"));
        let pattern = Regex::new(r"^(\d+-\d+)\.mp4$").unwrap();

        rename_files(dir.path(), &pattern, "mp4").unwrap();
        let second = rename_files(dir.path(), &pattern, "mp4").unwrap();
        assert_eq!(second, 0);
        assert!(dir.path().join("123-456.mp4").exists());
    }

    #[test]
    fn test_rename_refuses_overwrite() {
        let dir = tempdir().unwrap();
        touch(&dir.path().join("123 - 456.mp4"));
        touch(&dir.path().join("123-456.mp4"));
        let pattern = Regex::new(r"^(\d+-\d+)\.mp4$").unwrap();

        let renamed = rename_files(dir.path(), &pattern, "mp4").unwrap();
        assert_eq!(renamed, 0);
        // Both files still present
        assert!(dir.path().join("123 - 456.mp4").exists());
        assert!(dir.path().join("123-456.mp4").exists());
    }

    #[test]
    fn test_rename_leaves_non_matching_files() {
        let dir = tempdir().unwrap();
        touch(&dir.path().join("not-canonical.mp4"));
        let pattern = Regex::new(r"^(\d+-\d+)\.mp4$").unwrap();

        let renamed = rename_files(dir.path(), &pattern, "mp4").unwrap();
        assert_eq!(renamed, 0);
        assert!(dir.path().join("not-canonical.mp4").exists());
    }

    #[test]
    fn test_validate_partitions() {
        let dir = tempdir().unwrap();
        touch(&dir.path().join("123-456.mp4"));
        touch(&dir.path().join("garbage.mp4"));
        let pattern = Regex::new(r"^\d+-\d+\.mp4$").unwrap();

        let (valid, invalid) = validate_files(dir.path(), &pattern, "mp4").unwrap();
        assert_eq!(valid.len(), 1);
        assert_eq!(invalid.len(), 1);
        assert!(valid[0].ends_with("123-456.mp4"));
        assert!(invalid[0].ends_with("garbage.mp4"));
    }

    #[test]
    fn test_validation_stable_after_rename() {
        let dir = tempdir().unwrap();
        touch(&dir.path().join("123 - 456.mp4"));
        let rename_pattern = Regex::new(r"^(\d+-\d+)\.mp4$").unwrap();
        let validate_pattern = Regex::new(r"^\d+-\d+\.mp4$").unwrap();

        rename_files(dir.path(), &rename_pattern, "mp4").unwrap();
        let (valid1, _) = validate_files(dir.path(), &validate_pattern, "mp4").unwrap();

        rename_files(dir.path(), &rename_pattern, "mp4").unwrap();
        let (valid2, _) = validate_files(dir.path(), &validate_pattern, "mp4").unwrap();

        assert_eq!(valid1, valid2);
    }

    #[test]
    fn test_build_jobs_no_deduplication() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("123-456.mp4");
        touch(&file);
        let spec = TranscodeSpec::default();

        let jobs = build_jobs(vec![file.clone(), file], dir.path(), &spec);
        assert_eq!(jobs.len(), 2);
        assert_ne!(jobs[0].id, jobs[1].id);
        assert_eq!(jobs[0].fingerprint, jobs[1].fingerprint);
    }

    #[test]
    fn test_enumerate_missing_root_errors() {
        let result = enumerate_media(Path::new("/no/such/dir"), "mp4");
        assert!(result.is_err());
    }
}

// Output organizer
// Moves finished output trees into parent buckets derived from their names

use crate::error::Result;
use log::{debug, info, warn};
use regex::Regex;
use std::fs;
use std::path::Path;

/// Organize top-level output directories into parent buckets
///
/// Each directory directly under `output_root` whose name matches `pattern`
/// is moved to `output_root/<capture-1>/<name>`. Existing destinations are
/// never overwritten; conflicts are logged and skipped. Running twice over
/// the same tree yields the same tree, because a moved directory is no
/// longer at the top level and bucket names do not match the pattern.
///
/// Returns the number of directories moved.
pub fn organize_output(output_root: &Path, pattern: &Regex) -> Result<usize> {
    if !output_root.is_dir() {
        debug!("output root missing, nothing to organize");
        return Ok(0);
    }

    info!("organizing output folders in {}", output_root.display());
    let mut moved = 0;

    for entry in fs::read_dir(output_root)? {
        let entry = entry?;
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };

        let Some(caps) = pattern.captures(name) else {
            continue;
        };
        let Some(parent) = caps.get(1) else {
            warn!("organization pattern matched without a capture for: {}", name);
            continue;
        };

        let bucket = output_root.join(parent.as_str());
        let dest = bucket.join(name);
        if dest.exists() {
            warn!("cannot move {} - destination exists", name);
            continue;
        }

        if let Err(e) = fs::create_dir_all(&bucket) {
            warn!("cannot create bucket {}: {}", bucket.display(), e);
            continue;
        }
        match fs::rename(&path, &dest) {
            Ok(()) => {
                info!("moved {} to {}", name, bucket.display());
                moved += 1;
            }
            Err(e) => warn!("failed to move {}: {}", name, e),
        }
    }

    info!("folder organization completed: {} folder(s) moved", moved);
    Ok(moved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn org_pattern() -> Regex {
        Regex::new(r"^(\d+)-\d+$").unwrap()
    }

    #[test]
    fn test_moves_matching_directories() {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join("123-456")).unwrap();
        fs::write(dir.path().join("123-456/master.m3u8"), "#EXTM3U").unwrap();
        fs::create_dir(dir.path().join("unmatched")).unwrap();

        let moved = organize_output(dir.path(), &org_pattern()).unwrap();
        assert_eq!(moved, 1);
        assert!(dir.path().join("123/123-456/master.m3u8").exists());
        assert!(dir.path().join("unmatched").exists());
    }

    #[test]
    fn test_organize_is_idempotent() {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join("123-456")).unwrap();

        assert_eq!(organize_output(dir.path(), &org_pattern()).unwrap(), 1);
        assert_eq!(organize_output(dir.path(), &org_pattern()).unwrap(), 0);
        assert!(dir.path().join("123/123-456").is_dir());
    }

    #[test]
    fn test_refuses_overwrite() {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join("123-456")).unwrap();
        fs::write(dir.path().join("123-456/fresh.txt"), "new").unwrap();
        fs::create_dir_all(dir.path().join("123/123-456")).unwrap();
        fs::write(dir.path().join("123/123-456/old.txt"), "old").unwrap();

        let moved = organize_output(dir.path(), &org_pattern()).unwrap();
        assert_eq!(moved, 0);
        // Neither tree was touched
        assert!(dir.path().join("123-456/fresh.txt").exists());
        assert!(dir.path().join("123/123-456/old.txt").exists());
    }

    #[test]
    fn test_plain_files_ignored() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("123-456"), "a file, not a dir").unwrap();

        let moved = organize_output(dir.path(), &org_pattern()).unwrap();
        assert_eq!(moved, 0);
    }

    #[test]
    fn test_missing_root_is_a_noop() {
        let moved = organize_output(Path::new("/no/such/root"), &org_pattern()).unwrap();
        assert_eq!(moved, 0);
    }
}

// Utility functions used across the codebase
// Centralized to avoid duplication

use crate::constants::units::{GIB, KIB, MIB, TIB};

/// Format bytes as human-readable string with appropriate unit
///
/// Automatically selects the best unit (B, KiB, MiB, GiB, TiB) based on size.
pub fn format_bytes(bytes: u64) -> String {
    if bytes >= TIB {
        format!("{:.2} TiB", bytes as f64 / TIB as f64)
    } else if bytes >= GIB {
        format!("{:.2} GiB", bytes as f64 / GIB as f64)
    } else if bytes >= MIB {
        format!("{:.1} MiB", bytes as f64 / MIB as f64)
    } else if bytes >= KIB {
        format!("{:.0} KiB", bytes as f64 / KIB as f64)
    } else {
        format!("{} B", bytes)
    }
}

/// Parse a clock string in HH:MM:SS.CC format to seconds
///
/// # Arguments
/// * `clock` - Clock string like "00:01:23.45"
///
/// # Returns
/// Time in seconds as f64, or 0.0 if the string does not parse
pub fn parse_clock_to_seconds(clock: &str) -> f64 {
    let parts: Vec<&str> = clock.split(':').collect();
    if parts.len() == 3 {
        let hours: f64 = parts[0].parse().unwrap_or(0.0);
        let minutes: f64 = parts[1].parse().unwrap_or(0.0);
        let seconds: f64 = parts[2].parse().unwrap_or(0.0);
        hours * 3600.0 + minutes * 60.0 + seconds
    } else {
        0.0
    }
}

/// Remove all whitespace from a file name
///
/// Used by intake before matching the rename pattern, so that
/// "123 - 456.mp4" and "123-456.mp4" normalize to the same canonical name.
pub fn strip_whitespace(name: &str) -> String {
    name.chars().filter(|c| !c.is_whitespace()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(1024), "1 KiB");
        assert_eq!(format_bytes(1024 * 1024), "1.0 MiB");
        assert_eq!(format_bytes(5 * 1024 * 1024 * 1024), "5.00 GiB");
    }

    #[test]
    fn test_parse_clock_to_seconds() {
        assert_eq!(parse_clock_to_seconds("00:01:23.45"), 83.45);
        assert_eq!(parse_clock_to_seconds("01:00:00.00"), 3600.0);
        assert_eq!(parse_clock_to_seconds("00:00:30.50"), 30.5);
        assert_eq!(parse_clock_to_seconds("garbage"), 0.0);
    }

    #[test]
    fn test_strip_whitespace() {
        assert_eq!(strip_whitespace("123 - 456.mp4"), "123-456.mp4");
        assert_eq!(strip_whitespace("no-change.mp4"), "no-change.mp4");
        assert_eq!(strip_whitespace(" a\tb "), "ab");
    }
}

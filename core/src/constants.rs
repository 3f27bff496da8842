// Constants used throughout the application
// Centralizes magic numbers for maintainability

/// Byte size constants
pub mod units {
    /// Kibibyte (1024 bytes)
    pub const KIB: u64 = 1024;

    /// Mebibyte (1024 KiB)
    pub const MIB: u64 = KIB * 1024;

    /// Gibibyte (1024 MiB)
    pub const GIB: u64 = MIB * 1024;

    /// Tebibyte (1024 GiB)
    pub const TIB: u64 = GIB * 1024;
}

/// Default configuration values
pub mod defaults {
    /// Default media file extension handled by intake
    pub const FILE_EXTENSION: &str = "mp4";

    /// Default rename pattern: one capture group holding the canonical id
    pub const FILE_RENAME_PATTERN: &str = r"^(\d+-\d+)\.mp4$";

    /// Default validation pattern: a canonical name matches exactly
    pub const FILE_VALIDATION_PATTERN: &str = r"^\d+-\d+\.mp4$";

    /// Default organization pattern: first capture group is the parent bucket
    pub const FOLDER_ORGANIZATION_PATTERN: &str = r"^(\d+)-\d+$";

    /// Default video encoder
    pub const VIDEO_ENCODER: &str = "libx264";

    /// Default audio encoder
    pub const AUDIO_ENCODER: &str = "aac";

    /// Default encoder preset
    pub const PRESET: &str = "medium";

    /// Default constant rate factor
    pub const CRF: u8 = 23;

    /// Default HLS segment length in seconds
    pub const SEGMENT_SECONDS: u32 = 6;

    /// Fallback media root when MEDIA_ROOT is not set
    pub const MEDIA_ROOT: &str = "/srv/media";
}

/// Scheduling constants
pub mod scheduling {
    /// Fraction of logical cores used for the default worker-slot count (3/4)
    pub const PARALLELISM_NUMERATOR: usize = 3;
    pub const PARALLELISM_DENOMINATOR: usize = 4;

    /// Minimum interval between aggregate progress emissions
    pub const AGGREGATE_EMIT_INTERVAL_MS: u64 = 250;
}

/// Transcoder driver timeouts
pub mod driver {
    /// Default wall-clock limit for one transcode (4 hours)
    pub const WALL_TIMEOUT_SECONDS: u64 = 3600 * 4;

    /// Default stall watchdog: no progress for this long escalates to
    /// termination
    pub const STALL_TIMEOUT_SECONDS: u64 = 60;

    /// Interval between a graceful stop signal and a forced kill
    pub const TERMINATE_GRACE_SECONDS: u64 = 5;

    /// Raw stderr lines retained for error reports
    pub const STDERR_TAIL_CAPACITY: usize = 128;

    /// Stderr lines shown in a per-failure block
    pub const FAILURE_TAIL_LINES: usize = 10;
}

/// FFprobe adapter constants
pub mod probe {
    /// Timeout for one probe invocation
    pub const PROBE_TIMEOUT_SECONDS: u64 = 10;
}

/// Process sandbox constants
pub mod sandbox {
    /// Interval between resource usage polls per monitored process
    pub const MONITOR_INTERVAL_MS: u64 = 1000;

    /// Bounded audit queue capacity; older records are dropped when full
    pub const AUDIT_QUEUE_CAPACITY: usize = 1024;
}

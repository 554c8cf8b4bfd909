//! Well-known path fragments and timing constants for the on-disk layout
//! described in spec.md §6.

pub const ASSETS_DIR: &str = "assets";
pub const THUMB_DIR: &str = "thumb";
pub const DISPLAY_DIR: &str = "display";
pub const METADATA_DIR: &str = "metadata";
pub const DB_DIR: &str = ".db";

pub const TREE_FILE_NAME: &str = "tree.dat";
pub const HASH_CACHE_FILE_NAME: &str = "hash-cache";
pub const WRITE_LOCK_FILE_NAME: &str = "write.lock";

/// Stale-lock threshold: a lock whose `timestamp` is older than this is
/// assumed abandoned and may be broken by another owner.
pub const LOCK_STALE_AFTER_MS: u64 = 10_000;

/// Lower/upper bound of the lock refresher's jittered interval.
pub const LOCK_REFRESH_MIN_MS: u64 = 3_000;
pub const LOCK_REFRESH_MAX_MS: u64 = 5_000;

/// How many files/copies are processed between periodic flush/persist.
pub const PROGRESS_FLUSH_INTERVAL: usize = 100;

/// Transient I/O retry policy (spec.md §4.5, §7).
pub const RETRY_ATTEMPTS: usize = 3;
pub const RETRY_BASE_DELAY_MS: u64 = 200;

/// S3 `DeleteObjects` batch cap.
pub const S3_DELETE_BATCH_MAX: usize = 1000;

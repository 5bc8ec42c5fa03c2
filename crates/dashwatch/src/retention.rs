//! Footage retention.
//!
//! Each sweep lists the storage directory (non-recursively, regular files
//! only), drops aborted recordings on the way, and evicts the oldest
//! recording when the directory is over its ceiling. Nothing is cached
//! between sweeps since the recorder keeps writing in the meantime.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use crate::clock::InterruptibleClock;
use crate::error::{Error, Result};

const SECS_PER_DAY: u64 = 24 * 60 * 60;

/// Retention rules, fixed at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetentionPolicy {
    /// Usage at or above which bulk eviction kicks in.
    pub max_total_bytes: u64,
    /// The oldest file must be at least this many whole days old to be evicted.
    pub min_age_days_for_bulk_eviction: u32,
    /// Files at or below this size are treated as aborted recordings.
    pub small_file_byte_threshold: u64,
    /// Aborted recordings younger than this are left alone.
    pub small_file_min_age: Duration,
    /// Upper bound on bulk evictions in one sweep.
    pub max_evictions_per_sweep: usize,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            max_total_bytes: 50 * 1024 * 1024 * 1024,
            min_age_days_for_bulk_eviction: 7,
            small_file_byte_threshold: 25 * 1024 * 1024,
            small_file_min_age: Duration::from_secs(300),
            max_evictions_per_sweep: 1,
        }
    }
}

impl RetentionPolicy {
    fn is_aborted_recording(&self, file: &FileCandidate, now: DateTime<Utc>) -> bool {
        file.size_bytes <= self.small_file_byte_threshold
            && file.age(now) >= self.small_file_min_age
    }

    fn is_evictable(&self, file: &FileCandidate, now: DateTime<Utc>) -> bool {
        file.age(now).as_secs() / SECS_PER_DAY >= u64::from(self.min_age_days_for_bulk_eviction)
    }
}

/// Aggregate size of the storage directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DirectoryUsage {
    /// Sum of file sizes.
    pub total_bytes: u64,
    /// Number of files counted.
    pub file_count: usize,
}

impl DirectoryUsage {
    fn of(files: &[FileCandidate]) -> Self {
        Self {
            total_bytes: files.iter().map(|f| f.size_bytes).sum(),
            file_count: files.len(),
        }
    }
}

/// A regular file found during a sweep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileCandidate {
    /// Full path.
    pub path: PathBuf,
    /// Last modification time.
    pub modified: DateTime<Utc>,
    /// Size in bytes.
    pub size_bytes: u64,
}

impl FileCandidate {
    /// Age relative to `now`. Files stamped in the future are zero days old.
    #[must_use]
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        (now - self.modified).to_std().unwrap_or_default()
    }
}

/// What one sweep did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Usage after small-file cleanup, before bulk eviction.
    pub usage: DirectoryUsage,
    /// Aborted recordings removed.
    pub small_files_removed: Vec<PathBuf>,
    /// Files removed by bulk eviction.
    pub evicted: Vec<PathBuf>,
    /// Over the ceiling, but the oldest file was too young to evict.
    pub eviction_deferred: bool,
}

/// Periodically enforces the retention policy on the storage directory.
#[derive(Debug)]
pub struct RetentionManager {
    directory: PathBuf,
    policy: RetentionPolicy,
    interval: Duration,
    clock: InterruptibleClock,
}

impl RetentionManager {
    /// Create a manager for `directory`, sweeping every `interval`.
    #[must_use]
    pub fn new(
        directory: impl AsRef<Path>,
        policy: RetentionPolicy,
        interval: Duration,
        clock: InterruptibleClock,
    ) -> Self {
        Self {
            directory: directory.as_ref().to_path_buf(),
            policy,
            interval,
            clock,
        }
    }

    /// Sweep until shutdown is requested. A failed sweep only skips its own
    /// cycle.
    pub fn run(&self) {
        info!(directory = %self.directory.display(), "retention manager started");
        while !self.clock.is_shutdown() {
            match self.sweep() {
                Ok(report) => debug!(
                    bytes = report.usage.total_bytes,
                    files = report.usage.file_count,
                    removed = report.small_files_removed.len(),
                    evicted = report.evicted.len(),
                    "retention sweep finished"
                ),
                Err(e) => error!(error = %e, "retention sweep failed"),
            }
            self.clock.sleep(self.interval);
        }
        info!("retention manager stopped");
    }

    /// Run a single sweep.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StorageScan`] if the directory cannot be listed.
    /// Failures to delete individual files are logged, not returned.
    pub fn sweep(&self) -> Result<SweepReport> {
        self.sweep_at(Utc::now())
    }

    fn sweep_at(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let mut report = SweepReport::default();
        let mut files = self.scan(now, &mut report)?;
        let mut usage = DirectoryUsage::of(&files);
        report.usage = usage;

        let mut attempts = 0;
        while usage.total_bytes >= self.policy.max_total_bytes
            && attempts < self.policy.max_evictions_per_sweep
        {
            attempts += 1;

            let Some(index) = oldest(&files) else {
                info!(bytes = usage.total_bytes, "over the limit but nothing to evict");
                break;
            };

            let file = &files[index];
            if !self.policy.is_evictable(file, now) {
                info!(
                    path = %file.path.display(),
                    min_age_days = self.policy.min_age_days_for_bulk_eviction,
                    "oldest recording is too recent, not evicting"
                );
                report.eviction_deferred = true;
                break;
            }

            info!(
                path = %file.path.display(),
                modified = %file.modified.to_rfc3339(),
                bytes = file.size_bytes,
                "evicting oldest recording"
            );
            match fs::remove_file(&file.path) {
                Ok(()) => {
                    let file = files.swap_remove(index);
                    usage.total_bytes -= file.size_bytes;
                    usage.file_count -= 1;
                    report.evicted.push(file.path);
                }
                Err(e) => {
                    warn!(path = %file.path.display(), error = %e, "failed to evict recording");
                    break;
                }
            }
        }

        Ok(report)
    }

    /// List regular files, deleting aborted recordings as they are found.
    fn scan(&self, now: DateTime<Utc>, report: &mut SweepReport) -> Result<Vec<FileCandidate>> {
        let entries = fs::read_dir(&self.directory).map_err(|source| Error::StorageScan {
            path: self.directory.clone(),
            source,
        })?;

        let mut files = Vec::new();
        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(error = %e, "skipping unreadable directory entry");
                    continue;
                }
            };
            let path = entry.path();

            let metadata = match entry.metadata() {
                Ok(metadata) if metadata.is_file() => metadata,
                Ok(_) => continue,
                Err(e) => {
                    // Commonly a file removed between listing and stat.
                    debug!(path = %path.display(), error = %e, "skipping entry");
                    continue;
                }
            };
            let modified = match metadata.modified() {
                Ok(modified) => DateTime::<Utc>::from(modified),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "no modification time, skipping");
                    continue;
                }
            };

            let file = FileCandidate {
                path,
                modified,
                size_bytes: metadata.len(),
            };

            if self.policy.is_aborted_recording(&file, now) {
                match fs::remove_file(&file.path) {
                    Ok(()) => {
                        info!(
                            path = %file.path.display(),
                            bytes = file.size_bytes,
                            "removed aborted recording"
                        );
                        report.small_files_removed.push(file.path);
                        continue;
                    }
                    Err(e) => {
                        warn!(path = %file.path.display(), error = %e, "failed to remove aborted recording");
                    }
                }
            }

            files.push(file);
        }

        Ok(files)
    }
}

fn oldest(files: &[FileCandidate]) -> Option<usize> {
    files
        .iter()
        .enumerate()
        .min_by_key(|(_, f)| f.modified)
        .map(|(i, _)| i)
}

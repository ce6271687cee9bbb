use std::collections::hash_map::DefaultHasher;
use std::fs;
use std::hash::{Hash, Hasher};
use std::time::{Duration, SystemTime};

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{Local, Timelike};
use regex::Regex;
use tracing::{debug, info, warn};

use crate::copy_engine;
use crate::error::CaptureError;

const STALE_BUCKET_AGE: Duration = Duration::from_secs(14 * 24 * 3600);

/// Method files are written by a separate logger with a dotted
/// date.time stamp pair in the name, e.g.
/// `20260310.142233_20260310.151122_Sample_A.meth`.
const TIMESTAMP_FILTER: &str = r"\d+\.\d+.*\d+\.\d+";

#[derive(Debug, Clone)]
pub struct CompanionConfig {
    pub search_root: Option<Utf8PathBuf>,
    pub method_extension: String,
    pub filter_by_timestamp: bool,
}

impl Default for CompanionConfig {
    fn default() -> Self {
        Self {
            search_root: None,
            method_extension: "meth".to_string(),
            filter_by_timestamp: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CompanionResult {
    pub captured: usize,
}

/// Captures the method file associated with `dataset` into `dest_dir`. A
/// missing side channel or missing match never fails the capture, but a
/// matched method file that cannot be copied does.
pub fn capture(
    config: &CompanionConfig,
    dataset: &str,
    dest_dir: &Utf8Path,
) -> Result<CompanionResult, CaptureError> {
    let Some(root) = &config.search_root else {
        return Ok(CompanionResult::default());
    };
    if !root.as_std_path().is_dir() {
        debug!(root = %root, "companion side channel not present");
        return Ok(CompanionResult::default());
    }

    let mut matches = find_matches(root, dataset, config);
    if matches.is_empty() {
        // Date-bucketed subdirectories, newest first.
        for bucket in date_buckets(root) {
            matches = find_matches(&bucket, dataset, config);
            if !matches.is_empty() {
                break;
            }
        }
    }

    let mut captured = 0;
    for path in matches {
        let Some(name) = path.file_name() else {
            continue;
        };
        copy_engine::copy_file(&path, &dest_dir.join(name))?;
        info!(method_file = %path, "companion file captured");
        captured += 1;
    }
    Ok(CompanionResult { captured })
}

fn find_matches(dir: &Utf8Path, dataset: &str, config: &CompanionConfig) -> Vec<Utf8PathBuf> {
    let suffix = format!("_{dataset}.{}", config.method_extension).to_lowercase();
    let filter = config
        .filter_by_timestamp
        .then(|| Regex::new(TIMESTAMP_FILTER).ok())
        .flatten();

    let Ok(entries) = fs::read_dir(dir.as_std_path()) else {
        return Vec::new();
    };
    let mut matches = Vec::new();
    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().into_owned();
        if entry.path().is_dir() || !name.to_lowercase().ends_with(&suffix) {
            continue;
        }
        if let Some(filter) = &filter
            && !filter.is_match(&name)
        {
            continue;
        }
        matches.push(dir.join(&name));
    }
    matches.sort();
    matches
}

// Bucket directories are named YYYY_MM.
fn is_date_bucket(name: &str) -> bool {
    let bytes = name.as_bytes();
    bytes.len() == 7
        && bytes[4] == b'_'
        && name[..4].chars().all(|ch| ch.is_ascii_digit())
        && name[5..].chars().all(|ch| ch.is_ascii_digit())
}

fn date_buckets(root: &Utf8Path) -> Vec<Utf8PathBuf> {
    let Ok(entries) = fs::read_dir(root.as_std_path()) else {
        return Vec::new();
    };
    let mut buckets = Vec::new();
    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().into_owned();
        if entry.path().is_dir() && is_date_bucket(&name) {
            buckets.push(root.join(&name));
        }
    }
    buckets.sort();
    buckets.reverse();
    buckets
}

/// Whether this host should purge stale side-channel buckets right now.
/// Each host is assigned one hour of the day by a stable hostname hash, so
/// a fleet spreads its purge traffic instead of stampeding at midnight.
pub fn purge_due(hostname: &str) -> bool {
    let mut hasher = DefaultHasher::new();
    hostname.hash(&mut hasher);
    let assigned_hour = (hasher.finish() % 24) as u32;
    Local::now().hour() == assigned_hour
}

/// Deletes date buckets whose entries are all older than 14 days.
/// Best-effort: unreadable entries just keep their bucket alive.
pub fn purge_stale_buckets(root: &Utf8Path) -> usize {
    let cutoff = SystemTime::now() - STALE_BUCKET_AGE;
    let mut purged = 0;
    for bucket in date_buckets(root) {
        if !bucket_is_stale(&bucket, cutoff) {
            continue;
        }
        match fs::remove_dir_all(bucket.as_std_path()) {
            Ok(()) => {
                info!(bucket = %bucket, "stale companion bucket purged");
                purged += 1;
            }
            Err(err) => warn!(bucket = %bucket, %err, "stale bucket purge failed"),
        }
    }
    purged
}

fn bucket_is_stale(bucket: &Utf8Path, cutoff: SystemTime) -> bool {
    let Ok(entries) = fs::read_dir(bucket.as_std_path()) else {
        return false;
    };
    for entry in entries.flatten() {
        let Ok(meta) = entry.metadata() else {
            return false;
        };
        let Ok(modified) = meta.modified() else {
            return false;
        };
        if modified > cutoff {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use camino::Utf8PathBuf;
    use filetime::FileTime;

    use super::*;

    fn utf8(path: &std::path::Path) -> Utf8PathBuf {
        Utf8PathBuf::from_path_buf(path.to_path_buf()).unwrap()
    }

    fn config(root: &std::path::Path) -> CompanionConfig {
        CompanionConfig {
            search_root: Some(utf8(root)),
            method_extension: "meth".to_string(),
            filter_by_timestamp: false,
        }
    }

    #[test]
    fn exact_name_match_is_captured() {
        let temp = tempfile::tempdir().unwrap();
        let side = temp.path().join("methods");
        let dest = temp.path().join("dest");
        std::fs::create_dir_all(&side).unwrap();
        std::fs::create_dir_all(&dest).unwrap();
        std::fs::write(side.join("run1_Sample_A.meth"), b"method").unwrap();
        std::fs::write(side.join("run1_Other.meth"), b"method").unwrap();

        let result = capture(&config(&side), "Sample_A", &utf8(&dest)).unwrap();
        assert_eq!(result.captured, 1);
        assert!(dest.join("run1_Sample_A.meth").exists());
        assert!(!dest.join("run1_Other.meth").exists());
    }

    #[test]
    #[cfg(unix)]
    fn matched_file_that_cannot_be_copied_is_an_error() {
        let temp = tempfile::tempdir().unwrap();
        let side = temp.path().join("methods");
        let dest = temp.path().join("dest");
        std::fs::create_dir_all(&side).unwrap();
        std::fs::create_dir_all(&dest).unwrap();
        std::os::unix::fs::symlink("gone_target", side.join("run1_Sample_A.meth")).unwrap();

        let err = capture(&config(&side), "Sample_A", &utf8(&dest)).unwrap_err();
        assert_matches!(err, CaptureError::Copy(_));
    }

    #[test]
    fn date_bucket_fallback_prefers_newest() {
        let temp = tempfile::tempdir().unwrap();
        let side = temp.path().join("methods");
        let dest = temp.path().join("dest");
        std::fs::create_dir_all(side.join("2026_07")).unwrap();
        std::fs::create_dir_all(side.join("2026_08")).unwrap();
        std::fs::create_dir_all(&dest).unwrap();
        std::fs::write(side.join("2026_07/old_Sample_A.meth"), b"old").unwrap();
        std::fs::write(side.join("2026_08/new_Sample_A.meth"), b"new").unwrap();

        let result = capture(&config(&side), "Sample_A", &utf8(&dest)).unwrap();
        assert_eq!(result.captured, 1);
        assert!(dest.join("new_Sample_A.meth").exists());
    }

    #[test]
    fn missing_side_channel_is_not_an_error() {
        let temp = tempfile::tempdir().unwrap();
        let mut cfg = config(&temp.path().join("nowhere"));
        cfg.search_root = Some(utf8(&temp.path().join("nowhere")));

        let result = capture(&cfg, "Sample_A", &utf8(temp.path())).unwrap();
        assert_eq!(result.captured, 0);
    }

    #[test]
    fn timestamp_filter_requires_two_dotted_groups() {
        let temp = tempfile::tempdir().unwrap();
        let side = temp.path().join("methods");
        let dest = temp.path().join("dest");
        std::fs::create_dir_all(&side).unwrap();
        std::fs::create_dir_all(&dest).unwrap();
        std::fs::write(
            side.join("20260310.142233_20260310.151122_Sample_A.meth"),
            b"stamped",
        )
        .unwrap();
        std::fs::write(side.join("plain_Sample_A.meth"), b"plain").unwrap();

        let mut cfg = config(&side);
        cfg.filter_by_timestamp = true;
        let result = capture(&cfg, "Sample_A", &utf8(&dest)).unwrap();
        assert_eq!(result.captured, 1);
        assert!(
            dest.join("20260310.142233_20260310.151122_Sample_A.meth")
                .exists()
        );
    }

    #[test]
    fn stale_buckets_are_purged() {
        let temp = tempfile::tempdir().unwrap();
        let stale = temp.path().join("2026_01");
        let fresh = temp.path().join("2026_08");
        std::fs::create_dir_all(&stale).unwrap();
        std::fs::create_dir_all(&fresh).unwrap();
        std::fs::write(stale.join("ancient_Sample.meth"), b"old").unwrap();
        std::fs::write(fresh.join("recent_Sample.meth"), b"new").unwrap();

        let old =
            FileTime::from_system_time(SystemTime::now() - Duration::from_secs(30 * 24 * 3600));
        filetime::set_file_mtime(stale.join("ancient_Sample.meth"), old).unwrap();

        let purged = purge_stale_buckets(&utf8(temp.path()));
        assert_eq!(purged, 1);
        assert!(!stale.exists());
        assert!(fresh.exists());
    }

    #[test]
    fn purge_due_is_stable_per_host() {
        assert_eq!(purge_due("proto-7"), purge_due("proto-7"));
    }
}

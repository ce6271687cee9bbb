//! Write-stability detection. The only signal for "acquisition finished" is
//! that the source size did not change across a bounded sleep window. This
//! is an accepted approximation: a paused acquisition looks stable, and a
//! writer slower than one byte per window looks stable too.

use std::thread;
use std::time::Duration;

use camino::Utf8Path;
use tracing::debug;

use crate::error::CaptureError;

pub const MIN_SLEEP_SECS: u64 = 1;
pub const MAX_SLEEP_SECS: u64 = 900;

const PROGRESS_STEP_SECS: u64 = 30;

/// Stable iff the measured size is exactly equal before and after the full
/// sleep window. `sleep_secs` outside [1, 900] is clamped, not rejected.
pub fn is_stable(path: &Utf8Path, is_file: bool, sleep_secs: u64) -> Result<bool, CaptureError> {
    let wait = sleep_secs.clamp(MIN_SLEEP_SECS, MAX_SLEEP_SECS);
    let before = measure(path, is_file)?;

    let mut remaining = wait;
    while remaining > 0 {
        let step = remaining.min(PROGRESS_STEP_SECS);
        thread::sleep(Duration::from_secs(step));
        remaining -= step;
        if remaining > 0 {
            debug!(path = %path, remaining_secs = remaining, "waiting out stability window");
        }
    }

    let after = measure(path, is_file)?;
    debug!(path = %path, before, after, "stability probe complete");
    Ok(before == after)
}

fn measure(path: &Utf8Path, is_file: bool) -> Result<u64, CaptureError> {
    if is_file {
        let meta = std::fs::metadata(path.as_std_path())
            .map_err(|err| CaptureError::Filesystem(format!("stat {path}: {err}")))?;
        return Ok(meta.len());
    }
    dir_byte_total(path)
}

fn dir_byte_total(dir: &Utf8Path) -> Result<u64, CaptureError> {
    let mut total = 0u64;
    let mut stack = vec![dir.to_path_buf()];
    while let Some(current) = stack.pop() {
        let entries = std::fs::read_dir(current.as_std_path())
            .map_err(|err| CaptureError::Filesystem(format!("read {current}: {err}")))?;
        for entry in entries {
            let entry = entry
                .map_err(|err| CaptureError::Filesystem(format!("read {current}: {err}")))?;
            let path = entry.path();
            if path.is_dir() {
                stack.push(current.join(entry.file_name().to_string_lossy().as_ref()));
            } else {
                let meta = entry.metadata().map_err(|err| {
                    CaptureError::Filesystem(format!("stat {}: {err}", path.display()))
                })?;
                total += meta.len();
            }
        }
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::time::Instant;

    use camino::Utf8PathBuf;

    use super::*;

    #[test]
    fn clamp_applies_below_minimum() {
        let temp = tempfile::tempdir().unwrap();
        let file = temp.path().join("probe.raw");
        fs::write(&file, b"data").unwrap();
        let path = Utf8PathBuf::from_path_buf(file).unwrap();

        let started = Instant::now();
        let stable = is_stable(&path, true, 0).unwrap();
        assert!(stable);
        assert!(started.elapsed() >= Duration::from_secs(1));
    }

    #[test]
    fn directory_totals_recurse() {
        let temp = tempfile::tempdir().unwrap();
        fs::create_dir(temp.path().join("sub")).unwrap();
        fs::write(temp.path().join("a.bin"), vec![0u8; 10]).unwrap();
        fs::write(temp.path().join("sub/b.bin"), vec![0u8; 5]).unwrap();
        let path = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();

        assert_eq!(dir_byte_total(&path).unwrap(), 15);
    }
}

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::time::{Duration, Instant};

use camino::Utf8Path;
use filetime::FileTime;
use tracing::{debug, warn};

use crate::error::CaptureError;

/// A transient mid-copy fault is only worth an automatic retry when the
/// copy had been running long enough that real progress was likely made.
pub const RETRY_HOLDOFF: Duration = Duration::from_secs(10);

// SMB and FAT round modification times, so equality needs slack.
const MTIME_TOLERANCE_SECS: i64 = 2;

const SEAM_CHECK_BYTES: u64 = 4096;
const COPY_BUFFER_BYTES: usize = 256 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverwriteMode {
    /// Skip files already complete at the destination, resume partial ones.
    IfDifferent,
    /// Recopy everything unconditionally.
    Always,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FileCopyResult {
    pub copied: bool,
    pub resumed: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TreeCopyStats {
    pub skipped: usize,
    pub resumed: usize,
    pub copied: usize,
}

#[derive(Debug)]
struct CopyFault {
    kind: io::ErrorKind,
    message: String,
}

impl CopyFault {
    fn new(context: &str, err: &io::Error) -> Self {
        Self {
            kind: err.kind(),
            message: format!("{context}: {err}"),
        }
    }

    // Permission and not-found faults are deterministic; everything else is
    // treated as a transport hiccup.
    fn transient(&self) -> bool {
        !matches!(
            self.kind,
            io::ErrorKind::PermissionDenied | io::ErrorKind::NotFound
        )
    }
}

fn should_retry(fault: &CopyFault, elapsed: Duration, mode: OverwriteMode, holdoff: Duration) -> bool {
    mode == OverwriteMode::IfDifferent && fault.transient() && elapsed >= holdoff
}

pub fn copy_file(src: &Utf8Path, dst: &Utf8Path) -> Result<FileCopyResult, CaptureError> {
    copy_file_inner(src, dst, OverwriteMode::IfDifferent)
        .map_err(|fault| CaptureError::Copy(fault.message))
}

/// Copies the children of `src` into `dst`. Safe to re-invoke after a
/// partial failure: complete destination files are skipped, partial ones are
/// resumed. One automatic retry of the whole tree runs after a transient
/// fault, provided at least [`RETRY_HOLDOFF`] elapsed since the copy began.
pub fn copy_tree(
    src: &Utf8Path,
    dst: &Utf8Path,
    recurse: bool,
    mode: OverwriteMode,
    skip_list: &[&str],
) -> Result<TreeCopyStats, CaptureError> {
    run_with_retry(mode, RETRY_HOLDOFF, || {
        copy_tree_once(src, dst, recurse, mode, skip_list)
    })
}

fn run_with_retry<F>(
    mode: OverwriteMode,
    holdoff: Duration,
    mut attempt: F,
) -> Result<TreeCopyStats, CaptureError>
where
    F: FnMut() -> Result<TreeCopyStats, CopyFault>,
{
    let started = Instant::now();
    match attempt() {
        Ok(stats) => Ok(stats),
        Err(fault) if should_retry(&fault, started.elapsed(), mode, holdoff) => {
            warn!(error = %fault.message, "transient copy fault, re-invoking tree copy");
            attempt().map_err(|fault| CaptureError::Copy(fault.message))
        }
        Err(fault) => Err(CaptureError::Copy(fault.message)),
    }
}

fn copy_tree_once(
    src: &Utf8Path,
    dst: &Utf8Path,
    recurse: bool,
    mode: OverwriteMode,
    skip_list: &[&str],
) -> Result<TreeCopyStats, CopyFault> {
    fs::create_dir_all(dst.as_std_path())
        .map_err(|err| CopyFault::new(&format!("create {dst}"), &err))?;

    let mut stats = TreeCopyStats::default();
    let mut names = Vec::new();
    let entries = fs::read_dir(src.as_std_path())
        .map_err(|err| CopyFault::new(&format!("read {src}"), &err))?;
    for entry in entries {
        let entry = entry.map_err(|err| CopyFault::new(&format!("read {src}"), &err))?;
        names.push(entry.file_name().to_string_lossy().into_owned());
    }
    names.sort();

    for name in names {
        if skip_list.iter().any(|skip| skip.eq_ignore_ascii_case(&name)) {
            debug!(name, "on skip list, not copied");
            continue;
        }
        let src_child = src.join(&name);
        let dst_child = dst.join(&name);
        if src_child.as_std_path().is_dir() {
            if recurse {
                let child = copy_tree_once(&src_child, &dst_child, true, mode, skip_list)?;
                stats.skipped += child.skipped;
                stats.resumed += child.resumed;
                stats.copied += child.copied;
            }
            continue;
        }
        let result = copy_file_inner(&src_child, &dst_child, mode)?;
        if result.resumed {
            stats.resumed += 1;
        } else if result.copied {
            stats.copied += 1;
        } else {
            stats.skipped += 1;
        }
    }
    Ok(stats)
}

fn copy_file_inner(
    src: &Utf8Path,
    dst: &Utf8Path,
    mode: OverwriteMode,
) -> Result<FileCopyResult, CopyFault> {
    let src_meta = fs::metadata(src.as_std_path())
        .map_err(|err| CopyFault::new(&format!("stat {src}"), &err))?;
    let src_len = src_meta.len();
    let src_mtime = FileTime::from_last_modification_time(&src_meta);

    if mode == OverwriteMode::IfDifferent
        && let Ok(dst_meta) = fs::metadata(dst.as_std_path())
    {
        let dst_mtime = FileTime::from_last_modification_time(&dst_meta);
        let drift = (src_mtime.unix_seconds() - dst_mtime.unix_seconds()).abs();
        if dst_meta.len() == src_len && drift <= MTIME_TOLERANCE_SECS {
            return Ok(FileCopyResult {
                copied: false,
                resumed: false,
            });
        }
        if dst_meta.len() > 0 && dst_meta.len() < src_len && seam_matches(src, dst, dst_meta.len())? {
            append_tail(src, dst, dst_meta.len())?;
            set_mtime(dst, src_mtime)?;
            return Ok(FileCopyResult {
                copied: true,
                resumed: true,
            });
        }
    }

    stream_copy(src, dst)?;
    set_mtime(dst, src_mtime)?;
    Ok(FileCopyResult {
        copied: true,
        resumed: false,
    })
}

// The destination tail must match the source at the same offset before the
// partial file is trusted as a resume base.
fn seam_matches(src: &Utf8Path, dst: &Utf8Path, dst_len: u64) -> Result<bool, CopyFault> {
    let check = dst_len.min(SEAM_CHECK_BYTES);
    let offset = dst_len - check;

    let mut src_file = File::open(src.as_std_path())
        .map_err(|err| CopyFault::new(&format!("open {src}"), &err))?;
    let mut dst_file = File::open(dst.as_std_path())
        .map_err(|err| CopyFault::new(&format!("open {dst}"), &err))?;

    let mut src_tail = vec![0u8; check as usize];
    let mut dst_tail = vec![0u8; check as usize];
    src_file
        .seek(SeekFrom::Start(offset))
        .and_then(|_| src_file.read_exact(&mut src_tail))
        .map_err(|err| CopyFault::new(&format!("read {src}"), &err))?;
    dst_file
        .seek(SeekFrom::Start(offset))
        .and_then(|_| dst_file.read_exact(&mut dst_tail))
        .map_err(|err| CopyFault::new(&format!("read {dst}"), &err))?;

    Ok(src_tail == dst_tail)
}

fn append_tail(src: &Utf8Path, dst: &Utf8Path, from: u64) -> Result<(), CopyFault> {
    let mut src_file = File::open(src.as_std_path())
        .map_err(|err| CopyFault::new(&format!("open {src}"), &err))?;
    src_file
        .seek(SeekFrom::Start(from))
        .map_err(|err| CopyFault::new(&format!("seek {src}"), &err))?;
    let mut dst_file = OpenOptions::new()
        .append(true)
        .open(dst.as_std_path())
        .map_err(|err| CopyFault::new(&format!("open {dst}"), &err))?;
    debug!(src = %src, dst = %dst, from, "resuming partial file");
    pump(&mut src_file, &mut dst_file, src, dst)
}

fn stream_copy(src: &Utf8Path, dst: &Utf8Path) -> Result<(), CopyFault> {
    let mut src_file = File::open(src.as_std_path())
        .map_err(|err| CopyFault::new(&format!("open {src}"), &err))?;
    let mut dst_file = File::create(dst.as_std_path())
        .map_err(|err| CopyFault::new(&format!("create {dst}"), &err))?;
    pump(&mut src_file, &mut dst_file, src, dst)
}

fn pump(
    src_file: &mut File,
    dst_file: &mut File,
    src: &Utf8Path,
    dst: &Utf8Path,
) -> Result<(), CopyFault> {
    let mut buffer = vec![0u8; COPY_BUFFER_BYTES];
    loop {
        let read = src_file
            .read(&mut buffer)
            .map_err(|err| CopyFault::new(&format!("read {src}"), &err))?;
        if read == 0 {
            break;
        }
        dst_file
            .write_all(&buffer[..read])
            .map_err(|err| CopyFault::new(&format!("write {dst}"), &err))?;
    }
    dst_file
        .flush()
        .map_err(|err| CopyFault::new(&format!("flush {dst}"), &err))
}

fn set_mtime(dst: &Utf8Path, mtime: FileTime) -> Result<(), CopyFault> {
    filetime::set_file_mtime(dst.as_std_path(), mtime)
        .map_err(|err| CopyFault::new(&format!("set mtime {dst}"), &err))
}

use std::fmt;
use std::fs;
use std::str::FromStr;

use camino::{Utf8Path, Utf8PathBuf};
use tracing::info;

use crate::error::CaptureError;

/// Marker prefixed onto renamed-aside destination entries.
pub const SUPERSEDED_PREFIX: &str = "x_";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExistingDirPolicy {
    OverwriteSingleItem,
    Delete,
    Rename,
    Fail,
}

impl FromStr for ExistingDirPolicy {
    type Err = CaptureError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "overwrite_single_item" => Ok(ExistingDirPolicy::OverwriteSingleItem),
            "delete" => Ok(ExistingDirPolicy::Delete),
            "rename" => Ok(ExistingDirPolicy::Rename),
            "fail" => Ok(ExistingDirPolicy::Fail),
            _ => Err(CaptureError::InvalidConflictPolicy(value.to_string())),
        }
    }
}

impl fmt::Display for ExistingDirPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExistingDirPolicy::OverwriteSingleItem => "overwrite_single_item",
            ExistingDirPolicy::Delete => "delete",
            ExistingDirPolicy::Rename => "rename",
            ExistingDirPolicy::Fail => "fail",
        };
        write!(f, "{name}")
    }
}

/// Decides what to do with a pre-existing destination directory. `Ok(())`
/// means the copy may proceed.
pub fn resolve_conflict(
    dest: &Utf8Path,
    policy: ExistingDirPolicy,
    copy_is_resumable: bool,
    max_files: usize,
    max_folders: usize,
) -> Result<(), CaptureError> {
    if !dest.as_std_path().is_dir() {
        return Ok(());
    }
    let (files, folders) = list_top_level(dest)?;
    if files.is_empty() && folders.is_empty() {
        return Ok(());
    }

    match policy {
        ExistingDirPolicy::OverwriteSingleItem => {
            overwrite_single_item(dest, &files, &folders, copy_is_resumable, max_files, max_folders)
        }
        ExistingDirPolicy::Delete => {
            fs::remove_dir_all(dest.as_std_path()).map_err(|err| {
                CaptureError::DestinationConflict(format!("delete {dest}: {err}"))
            })?;
            info!(dest = %dest, "existing destination deleted");
            Ok(())
        }
        ExistingDirPolicy::Rename => {
            let renamed = superseded_sibling(dest)?;
            fs::rename(dest.as_std_path(), renamed.as_std_path()).map_err(|err| {
                CaptureError::DestinationConflict(format!("rename {dest} to {renamed}: {err}"))
            })?;
            info!(dest = %dest, renamed = %renamed, "existing destination renamed aside");
            Ok(())
        }
        ExistingDirPolicy::Fail => Err(CaptureError::DestinationConflict(format!(
            "destination {dest} already exists and policy is fail"
        ))),
    }
}

fn overwrite_single_item(
    dest: &Utf8Path,
    files: &[String],
    folders: &[String],
    copy_is_resumable: bool,
    max_files: usize,
    max_folders: usize,
) -> Result<(), CaptureError> {
    // Explicit thresholds apply only when both are configured; otherwise
    // the default heuristic decides.
    let small_enough = if max_files > 0 && max_folders > 0 {
        files.len() <= max_files && folders.len() <= max_folders
    } else {
        (folders.is_empty() && files.len() <= 2) || (files.is_empty() && folders.len() <= 1)
    };

    if small_enough {
        if copy_is_resumable {
            // The copy engine merges into the existing content.
            return Ok(());
        }
        let entries = files.iter().chain(folders.iter());
        let total = files.len() + folders.len();
        for name in entries {
            // A lone entry that already carries the marker was renamed by a
            // previous attempt; prefixing again would stack markers on every
            // retry.
            if total == 1 && name.starts_with(SUPERSEDED_PREFIX) {
                continue;
            }
            let from = dest.join(name);
            let to = dest.join(format!("{SUPERSEDED_PREFIX}{name}"));
            fs::rename(from.as_std_path(), to.as_std_path()).map_err(|err| {
                CaptureError::DestinationConflict(format!("rename {from} to {to}: {err}"))
            })?;
        }
        return Ok(());
    }

    if folders.is_empty() && copy_is_resumable {
        return Ok(());
    }

    Err(CaptureError::DestinationConflict(format!(
        "destination {dest} holds {} files and {} subfolders; too much existing content to overwrite",
        files.len(),
        folders.len()
    )))
}

fn superseded_sibling(dest: &Utf8Path) -> Result<Utf8PathBuf, CaptureError> {
    let name = dest.file_name().ok_or_else(|| {
        CaptureError::DestinationConflict(format!("destination {dest} has no final component"))
    })?;
    let parent = dest.parent().ok_or_else(|| {
        CaptureError::DestinationConflict(format!("destination {dest} has no parent"))
    })?;
    Ok(parent.join(format!("{SUPERSEDED_PREFIX}{name}")))
}

fn list_top_level(dest: &Utf8Path) -> Result<(Vec<String>, Vec<String>), CaptureError> {
    let mut files = Vec::new();
    let mut folders = Vec::new();
    let entries = fs::read_dir(dest.as_std_path())
        .map_err(|err| CaptureError::Filesystem(format!("read {dest}: {err}")))?;
    for entry in entries {
        let entry =
            entry.map_err(|err| CaptureError::Filesystem(format!("read {dest}: {err}")))?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if entry.path().is_dir() {
            folders.push(name);
        } else {
            files.push(name);
        }
    }
    files.sort();
    folders.sort();
    Ok((files, folders))
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use camino::Utf8PathBuf;

    use super::*;

    fn dest(temp: &tempfile::TempDir) -> Utf8PathBuf {
        Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap()
    }

    #[test]
    fn missing_destination_proceeds() {
        resolve_conflict(
            Utf8Path::new("/no/such/dir"),
            ExistingDirPolicy::Fail,
            true,
            0,
            0,
        )
        .unwrap();
    }

    #[test]
    fn empty_destination_proceeds_under_fail_policy() {
        let temp = tempfile::tempdir().unwrap();
        resolve_conflict(&dest(&temp), ExistingDirPolicy::Fail, true, 0, 0).unwrap();
    }

    #[test]
    fn fail_policy_rejects_populated_destination() {
        let temp = tempfile::tempdir().unwrap();
        std::fs::write(temp.path().join("Sample_A.raw"), b"data").unwrap();

        let err =
            resolve_conflict(&dest(&temp), ExistingDirPolicy::Fail, true, 0, 0).unwrap_err();
        assert_matches!(err, CaptureError::DestinationConflict(_));
        assert!(temp.path().join("Sample_A.raw").exists());
    }

    #[test]
    fn small_content_renamed_aside_when_not_resumable() {
        let temp = tempfile::tempdir().unwrap();
        std::fs::write(temp.path().join("Sample_A.raw"), b"data").unwrap();

        resolve_conflict(
            &dest(&temp),
            ExistingDirPolicy::OverwriteSingleItem,
            false,
            0,
            0,
        )
        .unwrap();
        assert!(temp.path().join("x_Sample_A.raw").exists());
        assert!(!temp.path().join("Sample_A.raw").exists());
    }

    #[test]
    fn lone_marked_entry_not_prefixed_again() {
        let temp = tempfile::tempdir().unwrap();
        std::fs::write(temp.path().join("x_Sample_A.raw"), b"data").unwrap();

        resolve_conflict(
            &dest(&temp),
            ExistingDirPolicy::OverwriteSingleItem,
            false,
            0,
            0,
        )
        .unwrap();
        assert!(temp.path().join("x_Sample_A.raw").exists());
        assert!(!temp.path().join("x_x_Sample_A.raw").exists());
    }

    #[test]
    fn small_content_left_alone_when_resumable() {
        let temp = tempfile::tempdir().unwrap();
        std::fs::write(temp.path().join("Sample_A.raw"), b"data").unwrap();

        resolve_conflict(
            &dest(&temp),
            ExistingDirPolicy::OverwriteSingleItem,
            true,
            0,
            0,
        )
        .unwrap();
        assert!(temp.path().join("Sample_A.raw").exists());
    }

    #[test]
    fn large_flat_content_requires_resumable_copy() {
        let temp = tempfile::tempdir().unwrap();
        for index in 0..5 {
            std::fs::write(temp.path().join(format!("file{index}.raw")), b"data").unwrap();
        }

        resolve_conflict(
            &dest(&temp),
            ExistingDirPolicy::OverwriteSingleItem,
            true,
            0,
            0,
        )
        .unwrap();

        let err = resolve_conflict(
            &dest(&temp),
            ExistingDirPolicy::OverwriteSingleItem,
            false,
            0,
            0,
        )
        .unwrap_err();
        assert_matches!(err, CaptureError::DestinationConflict(_));
    }

    #[test]
    fn configured_thresholds_override_heuristic() {
        let temp = tempfile::tempdir().unwrap();
        for index in 0..4 {
            std::fs::write(temp.path().join(format!("file{index}.raw")), b"data").unwrap();
        }

        // Four files exceed the default heuristic but sit inside the
        // configured limits.
        resolve_conflict(
            &dest(&temp),
            ExistingDirPolicy::OverwriteSingleItem,
            false,
            10,
            2,
        )
        .unwrap();
        assert!(temp.path().join("x_file0.raw").exists());
    }

    #[test]
    fn delete_policy_removes_destination() {
        let temp = tempfile::tempdir().unwrap();
        let target = temp.path().join("Sample_A");
        std::fs::create_dir(&target).unwrap();
        std::fs::write(target.join("old.raw"), b"data").unwrap();
        let target = Utf8PathBuf::from_path_buf(target).unwrap();

        resolve_conflict(&target, ExistingDirPolicy::Delete, true, 0, 0).unwrap();
        assert!(!target.as_std_path().exists());
    }

    #[test]
    fn rename_policy_moves_whole_directory() {
        let temp = tempfile::tempdir().unwrap();
        let target = temp.path().join("Sample_A");
        std::fs::create_dir(&target).unwrap();
        std::fs::write(target.join("old.raw"), b"data").unwrap();
        let target = Utf8PathBuf::from_path_buf(target).unwrap();

        resolve_conflict(&target, ExistingDirPolicy::Rename, true, 0, 0).unwrap();
        assert!(!target.as_std_path().exists());
        assert!(temp.path().join("x_Sample_A/old.raw").exists());
    }

    #[test]
    fn unknown_policy_string_is_rejected() {
        let err = "archive".parse::<ExistingDirPolicy>().unwrap_err();
        assert_matches!(err, CaptureError::InvalidConflictPolicy(value) if value == "archive");
    }
}

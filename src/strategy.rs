use std::fs;
use std::sync::OnceLock;

use camino::{Utf8Path, Utf8PathBuf};
use rayon::prelude::*;
use regex::Regex;
use tracing::{debug, info};

use crate::companion::{self, CompanionConfig};
use crate::copy_engine::{self, OverwriteMode};
use crate::error::CaptureError;
use crate::instrument::{self, InstrumentClass};
use crate::readiness;
use crate::shape::{DatasetDescriptor, RawDatasetShape};

// Auxiliary files the acquisition host keeps open; copying them stalls the
// whole transfer.
const ALWAYS_LOCKED: &[&str] = &["desktop.ini", "Thumbs.db"];

// Zero-byte placeholders the Bruker acquisition tool leaves behind.
const BRUKER_ARTIFACTS: &[&str] = &["ProjectCreationHelper", "SyncHelper", "lock.file"];

// MALDI spot folders are positionally named: row digit(s), underscore,
// column letter plus digits, e.g. 0_D4.
fn spot_folder_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^\d+_[A-Z]\d+$").unwrap())
}

pub struct StrategyContext<'a> {
    pub dataset: &'a str,
    pub descriptor: &'a DatasetDescriptor,
    pub source_dir: &'a Utf8Path,
    pub dest_dir: &'a Utf8Path,
    pub class: InstrumentClass,
    pub sleep_secs: u64,
    pub companion: &'a CompanionConfig,
}

impl StrategyContext<'_> {
    fn source_entry(&self) -> Utf8PathBuf {
        self.source_dir.join(&self.descriptor.entry_name)
    }
}

/// Runs the shape-specific capture pipeline. Returns the success message;
/// every failure mode comes back as a `CaptureError` for classification.
pub fn run(ctx: &StrategyContext<'_>) -> Result<String, CaptureError> {
    match ctx.descriptor.shape {
        RawDatasetShape::NotFound => Err(CaptureError::DatasetNotFound(
            ctx.descriptor.entry_name.clone(),
        )),
        RawDatasetShape::SingleFile => {
            capture_file_group(ctx, std::slice::from_ref(&ctx.descriptor.entry_name))
        }
        RawDatasetShape::MultiFileGroup => capture_file_group(ctx, &ctx.descriptor.file_group),
        RawDatasetShape::FolderWithExtension => capture_folder(ctx, FolderLayout::Nested),
        RawDatasetShape::FolderNoExtension => capture_folder(ctx, FolderLayout::Merged),
        RawDatasetShape::BrukerImagingFolder => capture_bruker_imaging(ctx),
        RawDatasetShape::BrukerSpotFolder => capture_bruker_spot(ctx),
    }
}

fn capture_file_group(
    ctx: &StrategyContext<'_>,
    files: &[String],
) -> Result<String, CaptureError> {
    let unstable: Vec<String> = files
        .par_iter()
        .map(|name| -> Result<Option<String>, CaptureError> {
            let path = ctx.source_dir.join(name);
            let stable = readiness::is_stable(&path, true, ctx.sleep_secs)?;
            Ok((!stable).then(|| name.clone()))
        })
        .collect::<Result<Vec<_>, _>>()?
        .into_iter()
        .flatten()
        .collect();
    if !unstable.is_empty() {
        return Err(CaptureError::NotReady(format!(
            "still being written: {}",
            unstable.join(", ")
        )));
    }

    fs::create_dir_all(ctx.dest_dir.as_std_path())
        .map_err(|err| CaptureError::Filesystem(format!("create {}: {err}", ctx.dest_dir)))?;

    for name in files {
        let target = sanitize_file_name(name, ctx.dataset);
        if target != *name {
            info!(from = %name, to = %target, "sanitizing captured file name");
        }
        copy_engine::copy_file(&ctx.source_dir.join(name), &ctx.dest_dir.join(&target))?;
    }

    companion::capture(ctx.companion, ctx.dataset, ctx.dest_dir)?;
    Ok(format!("captured {} file(s)", files.len()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FolderLayout {
    /// The instrument folder keeps its (sanitized) name inside the dataset
    /// directory, e.g. `Sample_A/Sample_A.d`.
    Nested,
    /// Extension-free folders share the dataset name, so their contents
    /// merge straight into the dataset directory.
    Merged,
}

fn capture_folder(ctx: &StrategyContext<'_>, layout: FolderLayout) -> Result<String, CaptureError> {
    let src = ctx.source_entry();
    instrument::check_incomplete_markers(&src)?;
    if layout == FolderLayout::Merged {
        instrument::validate_folder_dataset(&src, ctx.class)?;
    }

    if !readiness::is_stable(&src, false, ctx.sleep_secs)? {
        return Err(CaptureError::NotReady(format!("still being written: {src}")));
    }

    let target_name = sanitize_file_name(&ctx.descriptor.entry_name, ctx.dataset);
    let dst = match layout {
        FolderLayout::Nested => ctx.dest_dir.join(&target_name),
        FolderLayout::Merged => ctx.dest_dir.to_path_buf(),
    };
    let stats = copy_engine::copy_tree(&src, &dst, true, OverwriteMode::IfDifferent, ALWAYS_LOCKED)?;
    debug!(
        copied = stats.copied,
        resumed = stats.resumed,
        skipped = stats.skipped,
        "folder copy complete"
    );

    companion::capture(ctx.companion, ctx.dataset, ctx.dest_dir)?;
    remove_bruker_artifacts(&dst)?;
    Ok(format!(
        "captured folder {target_name} ({} copied, {} resumed, {} skipped)",
        stats.copied, stats.resumed, stats.skipped
    ))
}

fn capture_bruker_imaging(ctx: &StrategyContext<'_>) -> Result<String, CaptureError> {
    let src = ctx.source_entry();
    let (files, _) = top_level(&src)?;
    // Imaging datasets exist only after the acquisition tool has finished
    // compressing, so the archive must already be there.
    if !files.iter().any(|name| has_extension(name, "zip")) {
        return Err(CaptureError::Validation(format!(
            "{src} holds no compressed archive; acquisition has not finished compressing"
        )));
    }

    if !readiness::is_stable(&src, false, ctx.sleep_secs)? {
        return Err(CaptureError::NotReady(format!("still being written: {src}")));
    }

    fs::create_dir_all(ctx.dest_dir.as_std_path())
        .map_err(|err| CaptureError::Filesystem(format!("create {}: {err}", ctx.dest_dir)))?;
    // Top-level files only; subfolders stay on the instrument.
    for name in &files {
        let target = sanitize_file_name(name, ctx.dataset);
        copy_engine::copy_file(&src.join(name), &ctx.dest_dir.join(&target))?;
    }
    Ok(format!("captured {} imaging file(s)", files.len()))
}

fn capture_bruker_spot(ctx: &StrategyContext<'_>) -> Result<String, CaptureError> {
    let src = ctx.source_entry();
    let (files, folders) = top_level(&src)?;

    if let Some(archive) = files.iter().find(|name| has_extension(name, "zip")) {
        return Err(CaptureError::Validation(format!(
            "{src} holds compressed archive {archive}; this is the imaging variant, not spot data"
        )));
    }
    if folders.is_empty() {
        return Err(CaptureError::Validation(format!(
            "{src} holds no data subfolders"
        )));
    }
    if folders.len() > 1
        && let Some(stray) = folders
            .iter()
            .find(|name| !spot_folder_pattern().is_match(name))
    {
        return Err(CaptureError::Validation(format!(
            "subfolder {stray} does not match the spot naming pattern"
        )));
    }

    if !readiness::is_stable(&src, false, ctx.sleep_secs)? {
        return Err(CaptureError::NotReady(format!("still being written: {src}")));
    }

    let stats = copy_engine::copy_tree(&src, ctx.dest_dir, true, OverwriteMode::Always, &[])?;
    Ok(format!(
        "captured {} spot folder(s), {} file(s)",
        folders.len(),
        stats.copied
    ))
}

/// Renames a copied entry when stripping spaces, percent signs, and embedded
/// periods makes its base name exactly equal the dataset name. Anything else
/// keeps the name the instrument wrote.
fn sanitize_file_name(name: &str, dataset: &str) -> String {
    let (base, extension) = match name.rsplit_once('.') {
        Some((base, extension)) => (base, Some(extension)),
        None => (name, None),
    };
    if base == dataset || !base.contains([' ', '%', '.']) {
        return name.to_string();
    }
    let cleaned: String = base.chars().filter(|ch| !matches!(ch, ' ' | '%' | '.')).collect();
    if cleaned == dataset {
        match extension {
            Some(extension) => format!("{dataset}.{extension}"),
            None => dataset.to_string(),
        }
    } else {
        name.to_string()
    }
}

fn remove_bruker_artifacts(dir: &Utf8Path) -> Result<(), CaptureError> {
    let mut stack = vec![dir.to_path_buf()];
    while let Some(current) = stack.pop() {
        let entries = fs::read_dir(current.as_std_path())
            .map_err(|err| CaptureError::Filesystem(format!("read {current}: {err}")))?;
        for entry in entries {
            let entry = entry
                .map_err(|err| CaptureError::Filesystem(format!("read {current}: {err}")))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            let path = current.join(&name);
            if path.as_std_path().is_dir() {
                stack.push(path);
                continue;
            }
            let is_artifact = BRUKER_ARTIFACTS.iter().any(|artifact| name == *artifact);
            if is_artifact {
                let len = entry
                    .metadata()
                    .map_err(|err| CaptureError::Filesystem(format!("stat {path}: {err}")))?
                    .len();
                if len == 0 {
                    fs::remove_file(path.as_std_path()).map_err(|err| {
                        CaptureError::Filesystem(format!("remove {path}: {err}"))
                    })?;
                    debug!(artifact = %path, "zero-byte artifact removed");
                }
            }
        }
    }
    Ok(())
}

fn has_extension(name: &str, extension: &str) -> bool {
    name.rsplit_once('.')
        .is_some_and(|(_, ext)| ext.eq_ignore_ascii_case(extension))
}

fn top_level(dir: &Utf8Path) -> Result<(Vec<String>, Vec<String>), CaptureError> {
    let mut files = Vec::new();
    let mut folders = Vec::new();
    let entries = fs::read_dir(dir.as_std_path())
        .map_err(|err| CaptureError::Filesystem(format!("read {dir}: {err}")))?;
    for entry in entries {
        let entry =
            entry.map_err(|err| CaptureError::Filesystem(format!("read {dir}: {err}")))?;
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
    use super::*;

    #[test]
    fn sanitize_strips_spaces_matching_dataset() {
        assert_eq!(sanitize_file_name("Sample A.raw", "SampleA"), "SampleA.raw");
    }

    #[test]
    fn sanitize_strips_percent_and_embedded_period() {
        assert_eq!(
            sanitize_file_name("Sample%A_1.raw", "SampleA_1"),
            "SampleA_1.raw"
        );
        assert_eq!(
            sanitize_file_name("Sample.A_1.raw", "SampleA_1"),
            "SampleA_1.raw"
        );
    }

    #[test]
    fn sanitize_requires_exact_case_match() {
        assert_eq!(sanitize_file_name("sample A.raw", "SampleA"), "sample A.raw");
    }

    #[test]
    fn sanitize_preserves_unrelated_names() {
        assert_eq!(
            sanitize_file_name("Sample B.raw", "SampleA"),
            "Sample B.raw"
        );
        assert_eq!(sanitize_file_name("Sample_A.raw", "Sample_A"), "Sample_A.raw");
    }

    #[test]
    fn spot_pattern_accepts_positional_names() {
        assert!(spot_folder_pattern().is_match("0_D4"));
        assert!(spot_folder_pattern().is_match("12_E10"));
        assert!(!spot_folder_pattern().is_match("spotA"));
        assert!(!spot_folder_pattern().is_match("0_d4"));
    }

    #[test]
    fn zero_byte_artifacts_removed_after_copy() {
        let temp = tempfile::tempdir().unwrap();
        std::fs::write(temp.path().join("SyncHelper"), b"").unwrap();
        std::fs::write(temp.path().join("lock.file"), b"").unwrap();
        std::fs::write(temp.path().join("ser"), b"data").unwrap();
        let dir = camino::Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();

        remove_bruker_artifacts(&dir).unwrap();
        assert!(!temp.path().join("SyncHelper").exists());
        assert!(!temp.path().join("lock.file").exists());
        assert!(temp.path().join("ser").exists());
    }

    #[test]
    fn nonempty_artifact_names_are_kept() {
        let temp = tempfile::tempdir().unwrap();
        std::fs::write(temp.path().join("SyncHelper"), b"not empty").unwrap();
        let dir = camino::Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();

        remove_bruker_artifacts(&dir).unwrap();
        assert!(temp.path().join("SyncHelper").exists());
    }
}

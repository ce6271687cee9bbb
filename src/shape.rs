use std::fmt;

use camino::Utf8Path;
use serde::Serialize;

use crate::error::CaptureError;
use crate::instrument::InstrumentClass;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RawDatasetShape {
    NotFound,
    SingleFile,
    MultiFileGroup,
    FolderWithExtension,
    FolderNoExtension,
    BrukerImagingFolder,
    BrukerSpotFolder,
}

impl fmt::Display for RawDatasetShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RawDatasetShape::NotFound => "not_found",
            RawDatasetShape::SingleFile => "single_file",
            RawDatasetShape::MultiFileGroup => "multi_file_group",
            RawDatasetShape::FolderWithExtension => "folder_with_extension",
            RawDatasetShape::FolderNoExtension => "folder_no_extension",
            RawDatasetShape::BrukerImagingFolder => "bruker_imaging_folder",
            RawDatasetShape::BrukerSpotFolder => "bruker_spot_folder",
        };
        write!(f, "{name}")
    }
}

#[derive(Debug, Clone)]
pub struct DatasetDescriptor {
    pub dataset: String,
    pub entry_name: String,
    pub shape: RawDatasetShape,
    /// Matched file names sharing the base name, ordered; populated only
    /// for `MultiFileGroup`.
    pub file_group: Vec<String>,
}

impl DatasetDescriptor {
    fn not_found(entry_name: &str) -> Self {
        Self {
            dataset: entry_name.to_string(),
            entry_name: entry_name.to_string(),
            shape: RawDatasetShape::NotFound,
            file_group: Vec::new(),
        }
    }
}

enum SearchPass {
    Files,
    Folder,
}

/// Determines which on-disk layout the instrument produced for `entry_name`
/// under `source_dir`. Always terminates with exactly one shape from the
/// closed set; a missing source root short-circuits to `NotFound`.
pub fn resolve(
    source_dir: &Utf8Path,
    entry_name: &str,
    class: InstrumentClass,
) -> Result<DatasetDescriptor, CaptureError> {
    if !source_dir.as_std_path().is_dir() {
        return Ok(DatasetDescriptor::not_found(entry_name));
    }

    let folder_first = class.policy().folder_first;
    let order = if folder_first {
        [SearchPass::Folder, SearchPass::Files]
    } else {
        [SearchPass::Files, SearchPass::Folder]
    };
    // One retry with the search order swapped before giving up.
    let swapped = if folder_first {
        [SearchPass::Files, SearchPass::Folder]
    } else {
        [SearchPass::Folder, SearchPass::Files]
    };

    for pass in order.into_iter().chain(swapped) {
        let found = match pass {
            SearchPass::Files => match_files(source_dir, entry_name)?,
            SearchPass::Folder => match_folder(source_dir, entry_name, class)?,
        };
        if let Some(descriptor) = found {
            return Ok(descriptor);
        }
    }

    Ok(DatasetDescriptor::not_found(entry_name))
}

fn match_files(
    source_dir: &Utf8Path,
    entry_name: &str,
) -> Result<Option<DatasetDescriptor>, CaptureError> {
    let prefix = format!("{entry_name}.");
    let mut matches = Vec::new();
    for name in read_entry_names(source_dir)? {
        let path = source_dir.join(&name);
        if !path.as_std_path().is_file() {
            continue;
        }
        if name.len() > prefix.len()
            && name[..prefix.len()].eq_ignore_ascii_case(&prefix)
        {
            matches.push(name);
        }
    }
    matches.sort();

    match matches.len() {
        0 => Ok(None),
        1 => Ok(Some(DatasetDescriptor {
            dataset: entry_name.to_string(),
            entry_name: matches[0].clone(),
            shape: RawDatasetShape::SingleFile,
            file_group: Vec::new(),
        })),
        _ => Ok(Some(DatasetDescriptor {
            dataset: entry_name.to_string(),
            entry_name: entry_name.to_string(),
            shape: RawDatasetShape::MultiFileGroup,
            file_group: matches,
        })),
    }
}

fn match_folder(
    source_dir: &Utf8Path,
    entry_name: &str,
    class: InstrumentClass,
) -> Result<Option<DatasetDescriptor>, CaptureError> {
    for name in read_entry_names(source_dir)? {
        let path = source_dir.join(&name);
        if !path.as_std_path().is_dir() {
            continue;
        }
        let has_extension = if name.eq_ignore_ascii_case(entry_name) {
            false
        } else if name
            .rsplit_once('.')
            .is_some_and(|(stem, _)| stem.eq_ignore_ascii_case(entry_name))
        {
            true
        } else {
            continue;
        };
        let shape = if has_extension {
            RawDatasetShape::FolderWithExtension
        } else {
            match class {
                InstrumentClass::BrukerMaldiImaging => RawDatasetShape::BrukerImagingFolder,
                InstrumentClass::BrukerMaldiSpot => RawDatasetShape::BrukerSpotFolder,
                _ => RawDatasetShape::FolderNoExtension,
            }
        };
        return Ok(Some(DatasetDescriptor {
            dataset: entry_name.to_string(),
            entry_name: name,
            shape,
            file_group: Vec::new(),
        }));
    }
    Ok(None)
}

fn read_entry_names(dir: &Utf8Path) -> Result<Vec<String>, CaptureError> {
    let entries = std::fs::read_dir(dir.as_std_path()).map_err(|err| {
        CaptureError::Filesystem(format!("read source dir {dir}: {err}"))
    })?;
    let mut names = Vec::new();
    for entry in entries {
        let entry =
            entry.map_err(|err| CaptureError::Filesystem(format!("read source dir {dir}: {err}")))?;
        names.push(entry.file_name().to_string_lossy().into_owned());
    }
    names.sort();
    Ok(names)
}

use std::fmt;
use std::str::FromStr;

use camino::Utf8Path;

use crate::error::CaptureError;
use crate::shape::RawDatasetShape;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InstrumentClass {
    FinniganIonTrap,
    TripleQuad,
    IonMobility,
    AgilentTofV2,
    BrukerFtms,
    TimsTof,
    BrukerMaldiImaging,
    BrukerMaldiSpot,
}

impl FromStr for InstrumentClass {
    type Err = CaptureError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "Finnigan_Ion_Trap" => Ok(InstrumentClass::FinniganIonTrap),
            "Triple_Quad" => Ok(InstrumentClass::TripleQuad),
            "IMS_Agilent_TOF" => Ok(InstrumentClass::IonMobility),
            "Agilent_TOF_V2" => Ok(InstrumentClass::AgilentTofV2),
            "BrukerFTMS" => Ok(InstrumentClass::BrukerFtms),
            "BrukerTOF_TIMS" | "TimsTOF" => Ok(InstrumentClass::TimsTof),
            "BrukerMALDI_Imaging" => Ok(InstrumentClass::BrukerMaldiImaging),
            "BrukerMALDI_Spot" => Ok(InstrumentClass::BrukerMaldiSpot),
            _ => Err(CaptureError::InvalidInstrumentClass(value.to_string())),
        }
    }
}

impl fmt::Display for InstrumentClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            InstrumentClass::FinniganIonTrap => "Finnigan_Ion_Trap",
            InstrumentClass::TripleQuad => "Triple_Quad",
            InstrumentClass::IonMobility => "IMS_Agilent_TOF",
            InstrumentClass::AgilentTofV2 => "Agilent_TOF_V2",
            InstrumentClass::BrukerFtms => "BrukerFTMS",
            InstrumentClass::TimsTof => "BrukerTOF_TIMS",
            InstrumentClass::BrukerMaldiImaging => "BrukerMALDI_Imaging",
            InstrumentClass::BrukerMaldiSpot => "BrukerMALDI_Spot",
        };
        write!(f, "{name}")
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ClassPolicy {
    pub allowed_shapes: &'static [RawDatasetShape],
    /// Imaging classes store folder datasets, so the resolver looks for a
    /// folder before looking for files.
    pub folder_first: bool,
    /// Whether captures for this class go through the skip/resume copy path.
    pub resumable_copy: bool,
    /// Folder datasets must contain exactly one file with this extension.
    pub required_file_extension: Option<&'static str>,
    /// Modern container format expected; a stray legacy analysis.baf with no
    /// analysis.tdf beside it means the acquisition ran in the wrong mode.
    pub expects_tdf: bool,
    pub max_data_subfolders: Option<usize>,
}

impl InstrumentClass {
    pub fn policy(self) -> ClassPolicy {
        use RawDatasetShape::*;
        match self {
            InstrumentClass::FinniganIonTrap => ClassPolicy {
                allowed_shapes: &[SingleFile],
                folder_first: false,
                resumable_copy: true,
                required_file_extension: None,
                expects_tdf: false,
                max_data_subfolders: None,
            },
            InstrumentClass::TripleQuad => ClassPolicy {
                allowed_shapes: &[SingleFile, MultiFileGroup],
                folder_first: false,
                resumable_copy: true,
                required_file_extension: None,
                expects_tdf: false,
                max_data_subfolders: None,
            },
            InstrumentClass::IonMobility => ClassPolicy {
                allowed_shapes: &[SingleFile, FolderNoExtension],
                folder_first: true,
                resumable_copy: true,
                required_file_extension: Some("uimf"),
                expects_tdf: false,
                max_data_subfolders: Some(0),
            },
            InstrumentClass::AgilentTofV2 => ClassPolicy {
                allowed_shapes: &[FolderWithExtension],
                folder_first: true,
                resumable_copy: true,
                required_file_extension: None,
                expects_tdf: false,
                max_data_subfolders: None,
            },
            InstrumentClass::BrukerFtms => ClassPolicy {
                allowed_shapes: &[FolderWithExtension, FolderNoExtension],
                folder_first: true,
                resumable_copy: true,
                required_file_extension: None,
                expects_tdf: false,
                max_data_subfolders: Some(1),
            },
            InstrumentClass::TimsTof => ClassPolicy {
                allowed_shapes: &[FolderWithExtension],
                folder_first: true,
                resumable_copy: true,
                required_file_extension: None,
                expects_tdf: true,
                max_data_subfolders: None,
            },
            InstrumentClass::BrukerMaldiImaging => ClassPolicy {
                allowed_shapes: &[BrukerImagingFolder],
                folder_first: true,
                resumable_copy: true,
                required_file_extension: None,
                expects_tdf: false,
                max_data_subfolders: None,
            },
            InstrumentClass::BrukerMaldiSpot => ClassPolicy {
                allowed_shapes: &[BrukerSpotFolder],
                folder_first: true,
                resumable_copy: false,
                required_file_extension: None,
                expects_tdf: false,
                max_data_subfolders: None,
            },
        }
    }

    pub fn allows(self, shape: RawDatasetShape) -> bool {
        self.policy().allowed_shapes.contains(&shape)
    }
}

// Primary acquisition files that must never be empty once the run finishes.
const PRIMARY_DATA_FILES: &[&str] = &["ser", "fid", "analysis.baf", "analysis.tdf", "analysis.tsf"];

/// Pre-checks for markers that mean the acquisition is definitely incomplete:
/// a zero-length primary data file, or a database journal/WAL left open by
/// the acquisition software. Cheaper and more decisive than a stability wait.
pub fn check_incomplete_markers(dir: &Utf8Path) -> Result<(), CaptureError> {
    let mut stack = vec![dir.to_path_buf()];
    while let Some(current) = stack.pop() {
        let entries = std::fs::read_dir(current.as_std_path()).map_err(|err| {
            CaptureError::Filesystem(format!("read {current}: {err}"))
        })?;
        for entry in entries {
            let entry = entry
                .map_err(|err| CaptureError::Filesystem(format!("read {current}: {err}")))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            let path = current.join(&name);
            if path.as_std_path().is_dir() {
                stack.push(path);
                continue;
            }
            if name.ends_with("-journal") || name.ends_with("-wal") {
                return Err(CaptureError::Validation(format!(
                    "in-progress write marker present: {path}"
                )));
            }
            if PRIMARY_DATA_FILES
                .iter()
                .any(|primary| name.eq_ignore_ascii_case(primary))
            {
                let len = entry
                    .metadata()
                    .map_err(|err| CaptureError::Filesystem(format!("stat {path}: {err}")))?
                    .len();
                if len == 0 {
                    return Err(CaptureError::Validation(format!(
                        "primary data file is zero bytes: {path}"
                    )));
                }
            }
        }
    }
    Ok(())
}

/// Structural rules for extension-free folder datasets.
pub fn validate_folder_dataset(dir: &Utf8Path, class: InstrumentClass) -> Result<(), CaptureError> {
    let policy = class.policy();
    let mut subfolders = Vec::new();
    let mut d_subfolders = Vec::new();
    let mut files = Vec::new();

    let entries = std::fs::read_dir(dir.as_std_path())
        .map_err(|err| CaptureError::Filesystem(format!("read {dir}: {err}")))?;
    for entry in entries {
        let entry =
            entry.map_err(|err| CaptureError::Filesystem(format!("read {dir}: {err}")))?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if entry.path().is_dir() {
            if name.to_lowercase().ends_with(".d") {
                d_subfolders.push(name.clone());
            }
            subfolders.push(name);
        } else {
            files.push(name);
        }
    }
    subfolders.sort();
    d_subfolders.sort();

    if d_subfolders.len() > 1 && !paired_d_exception(dir, &d_subfolders) {
        return Err(CaptureError::Validation(format!(
            "{dir} holds {} .d subfolders; at most one data subfolder is allowed",
            d_subfolders.len()
        )));
    }

    if policy.expects_tdf {
        let has_baf = files.iter().any(|name| name.eq_ignore_ascii_case("analysis.baf"));
        let has_tdf = files.iter().any(|name| name.eq_ignore_ascii_case("analysis.tdf"));
        if has_baf && !has_tdf {
            return Err(CaptureError::Validation(format!(
                "{dir} holds a legacy analysis.baf but no analysis.tdf; expected the modern container format"
            )));
        }
    }

    if let Some(extension) = policy.required_file_extension {
        let count = files
            .iter()
            .filter(|name| {
                name.rsplit_once('.')
                    .is_some_and(|(_, ext)| ext.eq_ignore_ascii_case(extension))
            })
            .count();
        if count != 1 {
            return Err(CaptureError::Validation(format!(
                "{dir} holds {count} .{extension} files; exactly one is required"
            )));
        }
    }

    if let Some(max) = policy.max_data_subfolders
        && subfolders.len() > max
    {
        return Err(CaptureError::Validation(format!(
            "{dir} holds {} subfolders; at most {max} allowed for {class}",
            subfolders.len()
        )));
    }

    Ok(())
}

// Two .d subfolders are tolerated only when one holds a ser file and the
// other an analysis.baf (a recognized paired-acquisition layout).
fn paired_d_exception(dir: &Utf8Path, d_subfolders: &[String]) -> bool {
    if d_subfolders.len() != 2 {
        return false;
    }
    let first = dir.join(&d_subfolders[0]);
    let second = dir.join(&d_subfolders[1]);
    let holds = |folder: &Utf8Path, name: &str| folder.join(name).as_std_path().is_file();
    (holds(&first, "ser") && holds(&second, "analysis.baf"))
        || (holds(&second, "ser") && holds(&first, "analysis.baf"))
}

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use camino::Utf8PathBuf;

use crate::conflict::ExistingDirPolicy;
use crate::error::CaptureError;
use crate::instrument::InstrumentClass;
use crate::share::ConnectorKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Perspective {
    Client,
    Server,
}

impl FromStr for Perspective {
    type Err = CaptureError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "client" => Ok(Perspective::Client),
            "server" => Ok(Perspective::Server),
            _ => Err(CaptureError::InvalidPerspective(value.to_string())),
        }
    }
}

impl fmt::Display for Perspective {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Perspective::Client => write!(f, "client"),
            Perspective::Server => write!(f, "server"),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ParamMap(HashMap<String, String>);

impl ParamMap {
    pub fn new(values: HashMap<String, String>) -> Self {
        Self(values)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn get_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.get(key).unwrap_or(default)
    }

    pub fn get_required(&self, key: &str) -> Result<&str, CaptureError> {
        self.get(key)
            .filter(|value| !value.is_empty())
            .ok_or_else(|| CaptureError::MissingParameter(key.to_string()))
    }

    pub fn get_nonempty(&self, key: &str) -> Option<&str> {
        self.get(key).filter(|value| !value.is_empty())
    }

    pub fn get_u64_or(&self, key: &str, default: u64) -> u64 {
        self.get(key)
            .and_then(|value| value.trim().parse().ok())
            .unwrap_or(default)
    }

    pub fn get_usize_or(&self, key: &str, default: usize) -> usize {
        self.get(key)
            .and_then(|value| value.trim().parse().ok())
            .unwrap_or(default)
    }

    pub fn get_bool_or(&self, key: &str, default: bool) -> bool {
        self.get(key)
            .map(|value| matches!(value.trim().to_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(default)
    }
}

impl<const N: usize> From<[(&str, &str); N]> for ParamMap {
    fn from(pairs: [(&str, &str); N]) -> Self {
        Self(
            pairs
                .into_iter()
                .map(|(key, value)| (key.to_string(), value.to_string()))
                .collect(),
        )
    }
}

/// Reverses the additive byte obfuscation applied to credentials at rest:
/// each stored byte is the plaintext byte plus one.
pub fn decode_password(obfuscated: &str) -> String {
    obfuscated
        .bytes()
        .map(|byte| byte.wrapping_sub(1) as char)
        .collect()
}

#[derive(Debug, Clone)]
pub struct CaptureRequest {
    pub dataset: String,
    pub job: String,
    pub source_vol: String,
    pub source_path: String,
    pub capture_subdirectory: Option<String>,
    pub source_folder_name: Option<String>,
    pub storage_vol: String,
    pub storage_path: String,
    pub storage_vol_external: String,
    pub storage_folder_name: Option<String>,
    pub instrument_class: InstrumentClass,
    pub perspective: Perspective,
    pub connector: ConnectorKind,
}

impl CaptureRequest {
    pub fn from_params(task: &ParamMap, manager: &ParamMap) -> Result<Self, CaptureError> {
        let capture_subdirectory = task
            .get_nonempty("Capture_Subfolder")
            .or_else(|| task.get_nonempty("Capture_Subdirectory"))
            .map(str::to_string);

        Ok(Self {
            dataset: task.get_required("Dataset")?.to_string(),
            job: task.get_required("Job")?.to_string(),
            source_vol: task.get_required("Source_Vol")?.to_string(),
            source_path: task.get_required("Source_Path")?.to_string(),
            capture_subdirectory,
            source_folder_name: task.get_nonempty("Source_Folder_Name").map(str::to_string),
            storage_vol: task.get_required("Storage_Vol")?.to_string(),
            storage_path: task.get_required("Storage_Path")?.to_string(),
            storage_vol_external: task.get_required("Storage_Vol_External")?.to_string(),
            storage_folder_name: task.get_nonempty("Storage_Folder_Name").map(str::to_string),
            instrument_class: task.get_required("Instrument_Class")?.parse()?,
            perspective: manager.get_or("perspective", "client").parse()?,
            connector: manager.get_or("ShareConnectorType", "prism").parse()?,
        })
    }

    /// Name of the source entry to look for; the canonical dataset name
    /// unless an explicit override was supplied.
    pub fn source_entry_name(&self) -> &str {
        self.source_folder_name.as_deref().unwrap_or(&self.dataset)
    }

    pub fn source_dir(&self) -> Utf8PathBuf {
        let mut dir = Utf8PathBuf::from(&self.source_vol);
        dir.push(trim_separators(&self.source_path));
        if let Some(sub) = &self.capture_subdirectory {
            dir.push(trim_separators(sub));
        }
        dir
    }

    /// Root of the share to connect to (volume plus top-level share path,
    /// without any capture subdirectory).
    pub fn share_path(&self) -> Utf8PathBuf {
        let mut dir = Utf8PathBuf::from(&self.source_vol);
        dir.push(trim_separators(&self.source_path));
        dir
    }

    pub fn dest_dir(&self) -> Utf8PathBuf {
        let vol = match self.perspective {
            Perspective::Client => &self.storage_vol_external,
            Perspective::Server => &self.storage_vol,
        };
        let folder = self.storage_folder_name.as_deref().unwrap_or(&self.dataset);
        let mut dir = Utf8PathBuf::from(vol);
        dir.push(trim_separators(&self.storage_path));
        dir.push(folder);
        dir
    }
}

fn trim_separators(value: &str) -> &str {
    value.trim_matches(['/', '\\'])
}

#[derive(Debug, Clone)]
pub struct ManagerConfig {
    pub username: String,
    pub password: String,
    pub sleep_secs: u64,
    pub conflict_policy: ExistingDirPolicy,
    pub max_resume_files: usize,
    pub max_resume_folders: usize,
    pub companion_root: Option<Utf8PathBuf>,
    pub method_extension: String,
    pub filter_method_timestamps: bool,
}

impl ManagerConfig {
    pub fn from_params(manager: &ParamMap) -> Result<Self, CaptureError> {
        Ok(Self {
            username: manager.get_or("bionetuser", "").to_string(),
            password: decode_password(manager.get_or("bionetpwd", "")),
            sleep_secs: manager.get_u64_or("sleepinterval", 30),
            conflict_policy: manager
                .get_or("DSFolderExistsAction", "overwrite_single_item")
                .parse()?,
            max_resume_files: manager.get_usize_or("MaxResumeFiles", 0),
            max_resume_folders: manager.get_usize_or("MaxResumeFolders", 0),
            companion_root: manager
                .get_nonempty("MethodFileShare")
                .map(Utf8PathBuf::from),
            method_extension: manager
                .get_or("MethodFileExtension", "meth")
                .trim_start_matches('.')
                .to_string(),
            filter_method_timestamps: manager.get_bool_or("MethodFileTimestampFilter", false),
        })
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn task_params() -> ParamMap {
        ParamMap::from([
            ("Dataset", "Sample_A"),
            ("Job", "12345"),
            ("Source_Vol", "\\\\proto-7"),
            ("Source_Path", "instrument_xfer"),
            ("Storage_Vol", "/mnt/storage"),
            ("Storage_Path", "2026_3"),
            ("Storage_Vol_External", "\\\\proto-7\\storage"),
            ("Instrument_Class", "Finnigan_Ion_Trap"),
        ])
    }

    #[test]
    fn decode_password_subtracts_one_from_each_byte() {
        assert_eq!(decode_password("tfdsfu"), "secret");
        assert_eq!(decode_password(""), "");
    }

    #[test]
    fn request_uses_dataset_when_no_override() {
        let request =
            CaptureRequest::from_params(&task_params(), &ParamMap::default()).unwrap();
        assert_eq!(request.source_entry_name(), "Sample_A");
        assert_eq!(request.perspective, Perspective::Client);
    }

    #[test]
    fn request_requires_dataset() {
        let mut params = task_params();
        params.0.remove("Dataset");
        let err = CaptureRequest::from_params(&params, &ParamMap::default()).unwrap_err();
        assert_matches!(err, CaptureError::MissingParameter(key) if key == "Dataset");
    }

    #[test]
    fn dest_dir_follows_perspective() {
        let manager = ParamMap::from([("perspective", "server")]);
        let request = CaptureRequest::from_params(&task_params(), &manager).unwrap();
        assert_eq!(request.dest_dir(), "/mnt/storage/2026_3/Sample_A");
    }

    #[test]
    fn capture_subdirectory_extends_source_dir() {
        let mut params = task_params();
        params
            .0
            .insert("Capture_Subfolder".to_string(), "run2".to_string());
        let request = CaptureRequest::from_params(&params, &ParamMap::default()).unwrap();
        assert!(request.source_dir().as_str().ends_with("run2"));
    }

    #[test]
    fn manager_config_reads_method_file_settings() {
        let manager = ParamMap::from([
            ("MethodFileShare", "/mnt/methods"),
            ("MethodFileExtension", ".mth"),
            ("MethodFileTimestampFilter", "true"),
        ]);
        let config = ManagerConfig::from_params(&manager).unwrap();
        assert_eq!(config.companion_root.as_deref(), Some("/mnt/methods".into()));
        assert_eq!(config.method_extension, "mth");
        assert!(config.filter_method_timestamps);

        let defaults = ManagerConfig::from_params(&ParamMap::default()).unwrap();
        assert_eq!(defaults.method_extension, "meth");
        assert!(!defaults.filter_method_timestamps);
    }

    #[test]
    fn invalid_perspective_is_rejected() {
        let manager = ParamMap::from([("perspective", "sideways")]);
        let err = CaptureRequest::from_params(&task_params(), &manager).unwrap_err();
        assert_matches!(err, CaptureError::InvalidPerspective(_));
    }
}

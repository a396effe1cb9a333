//! Configuration file handling for ~/.tapedeck/config.ini.
//!
//! Loads the library description with sensible defaults: a `[library]`
//! section for paths and policy, plus one `[drive:N]` section per tape
//! drive. Values found in the INI overlay the defaults.
//!
//! ```ini
//! [library]
//! mount_point = /mnt/ltfs
//! mtx_path = /opt/mtx/bin
//!
//! [drive:1]
//! address = 1.0.0.0
//! serial = 10WT012345
//! ```

use ini::Ini;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Default HTTP listen address of the server.
pub const DEFAULT_LISTEN: &str = "0.0.0.0:8747";

/// Default base directory for per-drive LTFS mount points on Linux.
pub const DEFAULT_MOUNT_POINT: &str = "/mnt/ltfs";

/// Configuration file errors.
#[derive(Debug, Error)]
pub enum ConfigFileError {
    /// Failed to read config file
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] ini::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {section}.{key} = '{value}' - {reason}")]
    InvalidValue {
        /// Section the value came from.
        section: String,
        /// Key within the section.
        key: String,
        /// The offending value.
        value: String,
        /// Why the value was rejected.
        reason: String,
    },

    /// A required key is missing
    #[error("Missing configuration: {section}.{key}")]
    MissingKey {
        /// Section the key belongs to.
        section: String,
        /// The missing key.
        key: String,
    },
}

/// Complete application configuration loaded from config.ini.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    /// Library-wide settings
    pub library: LibrarySettings,
    /// Configured tape drives, sorted by slot number
    pub drives: Vec<DriveSettings>,
}

/// The `[library]` section.
#[derive(Debug, Clone)]
pub struct LibrarySettings {
    /// Directory holding the LTFS tool binaries (`ltfs`, `ltfsck`,
    /// `mkltfs`, the `LtfsCmd*` wrappers); bare tool names when unset.
    pub ltfs_path: Option<PathBuf>,
    /// Directory holding the `mtx` binary; bare name when unset.
    pub mtx_path: Option<PathBuf>,
    /// Base directory for per-drive mount points (Linux).
    pub mount_point: PathBuf,
    /// Changer number used to build the `Changer{N}` device (Windows).
    pub mtx_changer: u32,
    /// Run `ltfsck` before assuming a failed rewind still released the
    /// device (the alternative LTFS12035E policy).
    pub check_before_release: bool,
    /// HTTP listen address for the server.
    pub listen: String,
}

/// One `[drive:N]` section.
#[derive(Debug, Clone)]
pub struct DriveSettings {
    /// Data transfer element number (the `N` of the section name).
    pub slot_number: u32,
    /// SCSI address (Windows) or element address (Linux).
    pub address: String,
    /// Drive serial, when known up front.
    pub serial: Option<String>,
}

impl Default for LibrarySettings {
    fn default() -> Self {
        Self {
            ltfs_path: None,
            mtx_path: None,
            mount_point: PathBuf::from(DEFAULT_MOUNT_POINT),
            mtx_changer: 0,
            check_before_release: false,
            listen: DEFAULT_LISTEN.to_string(),
        }
    }
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self {
            library: LibrarySettings::default(),
            drives: Vec::new(),
        }
    }
}

impl LibrarySettings {
    /// Full path of an LTFS tool, honoring `ltfs_path` relocation.
    pub fn ltfs_tool(&self, name: &str) -> String {
        match &self.ltfs_path {
            Some(dir) => dir.join(name).to_string_lossy().into_owned(),
            None => name.to_string(),
        }
    }

    /// Full path of the `mtx` binary, honoring `mtx_path` relocation.
    pub fn mtx_tool(&self) -> String {
        match &self.mtx_path {
            Some(dir) => dir.join("mtx").to_string_lossy().into_owned(),
            None => "mtx".to_string(),
        }
    }
}

impl ConfigFile {
    /// Load configuration from the default path (~/.tapedeck/config.ini).
    ///
    /// Returns defaults if the file doesn't exist.
    pub fn load() -> Result<Self, ConfigFileError> {
        Self::load_from(&config_file_path())
    }

    /// Load configuration from a specific path.
    ///
    /// Returns defaults if the file doesn't exist.
    pub fn load_from(path: &Path) -> Result<Self, ConfigFileError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let ini = Ini::load_from_file(path)?;
        parse_ini(&ini)
    }

    /// Look up a configured drive by slot number.
    pub fn drive(&self, slot_number: u32) -> Option<&DriveSettings> {
        self.drives
            .iter()
            .find(|drive| drive.slot_number == slot_number)
    }
}

/// Parse an `Ini` object into a `ConfigFile`.
///
/// Starts from `ConfigFile::default()` and overlays any values found.
fn parse_ini(ini: &Ini) -> Result<ConfigFile, ConfigFileError> {
    let mut config = ConfigFile::default();

    if let Some(section) = ini.section(Some("library")) {
        if let Some(v) = section.get("ltfs_path") {
            let v = v.trim();
            if !v.is_empty() {
                config.library.ltfs_path = Some(PathBuf::from(v));
            }
        }
        if let Some(v) = section.get("mtx_path") {
            let v = v.trim();
            if !v.is_empty() {
                config.library.mtx_path = Some(PathBuf::from(v));
            }
        }
        if let Some(v) = section.get("mount_point") {
            let v = v.trim();
            if !v.is_empty() {
                config.library.mount_point = PathBuf::from(v);
            }
        }
        if let Some(v) = section.get("mtx_changer") {
            config.library.mtx_changer =
                v.parse().map_err(|_| ConfigFileError::InvalidValue {
                    section: "library".to_string(),
                    key: "mtx_changer".to_string(),
                    value: v.to_string(),
                    reason: "must be a non-negative integer".to_string(),
                })?;
        }
        if let Some(v) = section.get("check_before_release") {
            config.library.check_before_release =
                v.parse().map_err(|_| ConfigFileError::InvalidValue {
                    section: "library".to_string(),
                    key: "check_before_release".to_string(),
                    value: v.to_string(),
                    reason: "must be 'true' or 'false'".to_string(),
                })?;
        }
        if let Some(v) = section.get("listen") {
            let v = v.trim();
            if !v.is_empty() {
                config.library.listen = v.to_string();
            }
        }
    }

    for (name, section) in ini.iter() {
        let Some(name) = name else { continue };
        let Some(slot) = name.strip_prefix("drive:") else {
            continue;
        };
        let slot_number = slot.parse().map_err(|_| ConfigFileError::InvalidValue {
            section: name.to_string(),
            key: "slot".to_string(),
            value: slot.to_string(),
            reason: "drive section must be named [drive:<slot number>]".to_string(),
        })?;
        let address = section
            .get("address")
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| ConfigFileError::MissingKey {
                section: name.to_string(),
                key: "address".to_string(),
            })?;
        config.drives.push(DriveSettings {
            slot_number,
            address: address.to_string(),
            serial: section
                .get("serial")
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string),
        });
    }
    config.drives.sort_by_key(|drive| drive.slot_number);

    Ok(config)
}

/// Get the path to the config directory (~/.tapedeck).
pub fn config_directory() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".tapedeck")
}

/// Get the path to the config file (~/.tapedeck/config.ini).
pub fn config_file_path() -> PathBuf {
    config_directory().join("config.ini")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(content: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.ini");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(content.as_bytes()).unwrap();
        (dir, path)
    }

    #[test]
    fn test_load_nonexistent_returns_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = ConfigFile::load_from(&dir.path().join("missing.ini")).unwrap();
        assert!(config.drives.is_empty());
        assert_eq!(config.library.mount_point, PathBuf::from(DEFAULT_MOUNT_POINT));
        assert_eq!(config.library.listen, DEFAULT_LISTEN);
        assert!(!config.library.check_before_release);
    }

    #[test]
    fn test_parse_full_config() {
        let (_dir, path) = write_config(
            "[library]\n\
             ltfs_path = /opt/ltfs/bin\n\
             mtx_path = /opt/mtx/bin\n\
             mount_point = /srv/tapes\n\
             mtx_changer = 2\n\
             check_before_release = true\n\
             listen = 127.0.0.1:9000\n\
             \n\
             [drive:2]\n\
             address = 2.0.0.0\n\
             \n\
             [drive:1]\n\
             address = 1.0.0.0\n\
             serial = 10WT012345\n",
        );

        let config = ConfigFile::load_from(&path).unwrap();
        assert_eq!(config.library.mount_point, PathBuf::from("/srv/tapes"));
        assert_eq!(config.library.mtx_changer, 2);
        assert!(config.library.check_before_release);
        assert_eq!(config.library.listen, "127.0.0.1:9000");

        assert_eq!(config.drives.len(), 2);
        // Sorted by slot number regardless of section order.
        assert_eq!(config.drives[0].slot_number, 1);
        assert_eq!(config.drives[0].serial.as_deref(), Some("10WT012345"));
        assert_eq!(config.drives[1].slot_number, 2);
        assert_eq!(config.drives[1].serial, None);

        assert_eq!(config.library.mtx_tool(), "/opt/mtx/bin/mtx");
        assert_eq!(config.library.ltfs_tool("ltfsck"), "/opt/ltfs/bin/ltfsck");
    }

    #[test]
    fn test_bare_tool_names_without_paths() {
        let settings = LibrarySettings::default();
        assert_eq!(settings.mtx_tool(), "mtx");
        assert_eq!(settings.ltfs_tool("mkltfs"), "mkltfs");
    }

    #[test]
    fn test_drive_section_requires_address() {
        let (_dir, path) = write_config("[drive:1]\nserial = ABC\n");
        let err = ConfigFile::load_from(&path).unwrap_err();
        assert!(matches!(err, ConfigFileError::MissingKey { .. }));
    }

    #[test]
    fn test_bad_drive_section_name_is_rejected() {
        let (_dir, path) = write_config("[drive:one]\naddress = 1.0.0.0\n");
        assert!(ConfigFile::load_from(&path).is_err());
    }

    #[test]
    fn test_drive_lookup() {
        let (_dir, path) = write_config("[drive:1]\naddress = 1.0.0.0\n");
        let config = ConfigFile::load_from(&path).unwrap();
        assert!(config.drive(1).is_some());
        assert!(config.drive(9).is_none());
    }
}

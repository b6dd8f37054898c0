use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::visibility::{Visibility, VisibilityConverter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SystemType {
    Windows,
    Unix,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferMode {
    Ascii,
    #[default]
    Binary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisibilityModes {
    pub public: u32,
    pub private: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PermissionMap {
    pub file: VisibilityModes,
    pub dir: VisibilityModes,
}

impl Default for PermissionMap {
    fn default() -> Self {
        Self {
            file: VisibilityModes {
                public: 0o644,
                private: 0o600,
            },
            dir: VisibilityModes {
                public: 0o755,
                private: 0o700,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FtpConnectionOptions {
    pub host: String,
    pub username: String,
    pub password: String,
    pub root: String,
    pub port: u16,
    pub ssl: bool,
    /// Seconds.
    pub timeout: u64,
    pub utf8: bool,
    pub passive: bool,
    pub transfer_mode: TransferMode,
    pub system_type: Option<SystemType>,
    pub use_raw_list_options: Option<bool>,
    pub ignore_passive_address: Option<bool>,
    pub timestamps_on_unix_listings_enabled: bool,
    pub recurse_manually: bool,
}

impl Default for FtpConnectionOptions {
    fn default() -> Self {
        Self {
            host: String::new(),
            username: String::new(),
            password: String::new(),
            root: String::new(),
            port: 21,
            ssl: false,
            timeout: 90,
            utf8: false,
            passive: true,
            transfer_mode: TransferMode::Binary,
            system_type: None,
            use_raw_list_options: None,
            ignore_passive_address: None,
            timestamps_on_unix_listings_enabled: true,
            recurse_manually: true,
        }
    }
}

impl FtpConnectionOptions {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "camelCase")]
pub enum SftpAuth {
    Agent,
    Password {
        password: String,
    },
    KeyFile {
        path: PathBuf,
        passphrase: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SftpConnectionOptions {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub auth: SftpAuth,
    pub root: String,
    /// Seconds.
    pub timeout: u64,
    pub max_tries: u32,
    pub host_fingerprint: Option<String>,
    pub use_ping: bool,
}

impl Default for SftpConnectionOptions {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 22,
            username: String::new(),
            auth: SftpAuth::Agent,
            root: String::new(),
            timeout: 30,
            max_tries: 4,
            host_fingerprint: None,
            use_ping: false,
        }
    }
}

impl SftpConnectionOptions {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkHandling {
    Skip,
    #[default]
    Disallow,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LocalOptions {
    pub root: PathBuf,
    pub link_handling: LinkHandling,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "driver", rename_all = "lowercase")]
pub enum DiskSpec {
    Local(LocalOptions),
    Ftp(FtpConnectionOptions),
    Sftp(SftpConnectionOptions),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiskConfig {
    #[serde(flatten)]
    pub disk: DiskSpec,
    #[serde(default)]
    pub permissions: PermissionMap,
    #[serde(default)]
    pub visibility: Option<Visibility>,
    #[serde(default)]
    pub directory_visibility: Option<Visibility>,
    #[serde(default = "default_true")]
    pub retain_visibility: bool,
    #[serde(default)]
    pub read_only: bool,
    #[serde(default)]
    pub finder_mime_type_detect: bool,
    #[serde(default)]
    pub detect_mime_type_using_path: bool,
}

impl DiskConfig {
    pub fn new(disk: DiskSpec) -> Self {
        Self {
            disk,
            permissions: PermissionMap::default(),
            visibility: None,
            directory_visibility: None,
            retain_visibility: true,
            read_only: false,
            finder_mime_type_detect: false,
            detect_mime_type_using_path: false,
        }
    }

    pub fn visibility_converter(&self) -> VisibilityConverter {
        let default_for_directories = self
            .directory_visibility
            .or(self.visibility)
            .unwrap_or(Visibility::Private);
        VisibilityConverter::from_permissions(&self.permissions, default_for_directories)
    }

    /// Per-call options seeded from the disk-level defaults.
    pub fn write_options(&self) -> WriteOptions {
        WriteOptions {
            visibility: self.visibility,
            directory_visibility: self.directory_visibility,
            retain_visibility: self.retain_visibility,
        }
    }
}

/// Options accepted by writing operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteOptions {
    pub visibility: Option<Visibility>,
    pub directory_visibility: Option<Visibility>,
    /// Copy carries the source visibility to the destination unless an
    /// explicit `visibility` is given.
    pub retain_visibility: bool,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            visibility: None,
            directory_visibility: None,
            retain_visibility: true,
        }
    }
}

impl WriteOptions {
    pub fn with_visibility(mut self, visibility: Visibility) -> Self {
        self.visibility = Some(visibility);
        self
    }

    pub fn with_directory_visibility(mut self, visibility: Visibility) -> Self {
        self.directory_visibility = Some(visibility);
        self
    }

    pub fn without_retained_visibility(mut self) -> Self {
        self.retain_visibility = false;
        self
    }
}

fn default_true() -> bool {
    true
}

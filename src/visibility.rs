use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::config::PermissionMap;
use crate::errors::FsError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", try_from = "String")]
pub enum Visibility {
    Public,
    Private,
}

impl Visibility {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Private => "private",
        }
    }
}

impl fmt::Display for Visibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Visibility {
    type Err = FsError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "public" => Ok(Self::Public),
            "private" => Ok(Self::Private),
            other => Err(FsError::InvalidVisibility {
                value: other.to_string(),
            }),
        }
    }
}

impl TryFrom<String> for Visibility {
    type Error = FsError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Maps abstract visibility to numeric permission bits and back.
///
/// The inverse lookups treat any mode that matches neither configured value
/// as [`Visibility::Public`]. Custom permission schemes therefore read back
/// as public.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VisibilityConverter {
    file_public: u32,
    file_private: u32,
    directory_public: u32,
    directory_private: u32,
    default_for_directories: Visibility,
}

impl Default for VisibilityConverter {
    fn default() -> Self {
        Self::from_permissions(&PermissionMap::default(), Visibility::Private)
    }
}

impl VisibilityConverter {
    pub fn new(
        file_public: u32,
        file_private: u32,
        directory_public: u32,
        directory_private: u32,
        default_for_directories: Visibility,
    ) -> Self {
        Self {
            file_public,
            file_private,
            directory_public,
            directory_private,
            default_for_directories,
        }
    }

    pub fn from_permissions(permissions: &PermissionMap, default_for_directories: Visibility) -> Self {
        Self::new(
            permissions.file.public,
            permissions.file.private,
            permissions.dir.public,
            permissions.dir.private,
            default_for_directories,
        )
    }

    pub fn for_file(&self, visibility: Visibility) -> u32 {
        match visibility {
            Visibility::Public => self.file_public,
            Visibility::Private => self.file_private,
        }
    }

    pub fn for_directory(&self, visibility: Visibility) -> u32 {
        match visibility {
            Visibility::Public => self.directory_public,
            Visibility::Private => self.directory_private,
        }
    }

    pub fn inverse_for_file(&self, mode: u32) -> Visibility {
        match mode {
            mode if mode == self.file_public => Visibility::Public,
            mode if mode == self.file_private => Visibility::Private,
            _ => Visibility::Public,
        }
    }

    pub fn inverse_for_directory(&self, mode: u32) -> Visibility {
        match mode {
            mode if mode == self.directory_public => Visibility::Public,
            mode if mode == self.directory_private => Visibility::Private,
            _ => Visibility::Public,
        }
    }

    pub fn default_for_directories(&self) -> u32 {
        self.for_directory(self.default_for_directories)
    }
}

use std::error::Error as StdError;
use std::fmt;
use std::io;

use thiserror::Error;

pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataKind {
    FileSize,
    Visibility,
    LastModified,
    MimeType,
}

impl MetadataKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::FileSize => "file_size",
            Self::Visibility => "visibility",
            Self::LastModified => "last_modified",
            Self::MimeType => "mime_type",
        }
    }
}

impl fmt::Display for MetadataKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Step of connection establishment that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStage {
    ConnectToHost,
    Authenticate,
    EnableUtf8Mode,
    SetOption,
    MakePassive,
    LoadPrivateKey,
    HostAuthenticity,
    OpenSubsystem,
    HealthCheck,
}

impl fmt::Display for ConnectionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::ConnectToHost => "connect to host",
            Self::Authenticate => "authenticate",
            Self::EnableUtf8Mode => "enable utf-8 mode",
            Self::SetOption => "set option",
            Self::MakePassive => "make connection passive",
            Self::LoadPrivateKey => "load private key",
            Self::HostAuthenticity => "establish authenticity of host",
            Self::OpenSubsystem => "open sftp subsystem",
            Self::HealthCheck => "health check",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Error)]
pub enum FsError {
    #[error("connection failed during {stage}: {reason}")]
    Connection {
        stage: ConnectionStage,
        reason: String,
        #[source]
        source: Option<BoxError>,
    },
    #[error("unable to resolve connection root {root:?}: {reason}")]
    RootResolution { root: String, reason: String },
    #[error("unable to check existence for: {path} ({reason})")]
    CheckExistence {
        path: String,
        reason: String,
        #[source]
        source: Option<BoxError>,
    },
    #[error("unable to read file from location: {path} ({reason})")]
    Read {
        path: String,
        reason: String,
        #[source]
        source: Option<BoxError>,
    },
    #[error("unable to write file at location: {path} ({reason})")]
    Write {
        path: String,
        reason: String,
        #[source]
        source: Option<BoxError>,
    },
    #[error("unable to retrieve the {kind} for file at path: {path} ({reason})")]
    Metadata {
        path: String,
        kind: MetadataKind,
        reason: String,
        #[source]
        source: Option<BoxError>,
    },
    #[error("unable to set visibility for file {path} ({reason})")]
    SetVisibility {
        path: String,
        reason: String,
        #[source]
        source: Option<BoxError>,
    },
    #[error("unable to create a directory at {path} ({reason})")]
    CreateDirectory {
        path: String,
        reason: String,
        #[source]
        source: Option<BoxError>,
    },
    #[error("unable to delete file located at: {path} ({reason})")]
    DeleteFile {
        path: String,
        reason: String,
        #[source]
        source: Option<BoxError>,
    },
    #[error("unable to delete directory located at: {path} ({reason})")]
    DeleteDirectory {
        path: String,
        reason: String,
        #[source]
        source: Option<BoxError>,
    },
    #[error("unable to move file from {from} to {to} ({reason})")]
    Move {
        from: String,
        to: String,
        reason: String,
        #[source]
        source: Option<BoxError>,
    },
    #[error("unable to copy file from {from} to {to} ({reason})")]
    Copy {
        from: String,
        to: String,
        reason: String,
        #[source]
        source: Option<BoxError>,
    },
    #[error("unable to list contents of {path:?} ({reason})")]
    Listing {
        path: String,
        reason: String,
        #[source]
        source: Option<BoxError>,
    },
    #[error("metadata can't be parsed from listing item {line:?}: {reason}")]
    InvalidListing { line: String, reason: String },
    #[error("invalid visibility provided {value:?}, expected either public or private")]
    InvalidVisibility { value: String },
    #[error("path traversal detected: {path}")]
    PathTraversal { path: String },
    #[error("corrupted path detected: {path}")]
    CorruptedPath { path: String },
    #[error("unsupported symbolic link encountered at location {path}")]
    SymbolicLink { path: String },
    #[error("{operation} is not allowed on a read-only adapter: {path}")]
    ReadOnly {
        operation: &'static str,
        path: String,
    },
}

pub type FsResult<T> = Result<T, FsError>;

impl FsError {
    pub fn connection(stage: ConnectionStage, reason: impl Into<String>) -> Self {
        Self::Connection {
            stage,
            reason: reason.into(),
            source: None,
        }
    }

    pub fn check_existence(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::CheckExistence {
            path: path.into(),
            reason: reason.into(),
            source: None,
        }
    }

    pub fn read(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Read {
            path: path.into(),
            reason: reason.into(),
            source: None,
        }
    }

    pub fn write(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Write {
            path: path.into(),
            reason: reason.into(),
            source: None,
        }
    }

    pub fn metadata(path: impl Into<String>, kind: MetadataKind, reason: impl Into<String>) -> Self {
        Self::Metadata {
            path: path.into(),
            kind,
            reason: reason.into(),
            source: None,
        }
    }

    pub fn set_visibility(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::SetVisibility {
            path: path.into(),
            reason: reason.into(),
            source: None,
        }
    }

    pub fn create_directory(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::CreateDirectory {
            path: path.into(),
            reason: reason.into(),
            source: None,
        }
    }

    pub fn delete_file(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::DeleteFile {
            path: path.into(),
            reason: reason.into(),
            source: None,
        }
    }

    pub fn delete_directory(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::DeleteDirectory {
            path: path.into(),
            reason: reason.into(),
            source: None,
        }
    }

    pub fn move_failed(
        from: impl Into<String>,
        to: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::Move {
            from: from.into(),
            to: to.into(),
            reason: reason.into(),
            source: None,
        }
    }

    pub fn copy_failed(
        from: impl Into<String>,
        to: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::Copy {
            from: from.into(),
            to: to.into(),
            reason: reason.into(),
            source: None,
        }
    }

    pub fn listing(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Listing {
            path: path.into(),
            reason: reason.into(),
            source: None,
        }
    }

    pub fn invalid_listing(line: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidListing {
            line: line.into(),
            reason: reason.into(),
        }
    }

    /// Attaches `cause` as the error source. Variants without a source slot
    /// are returned unchanged.
    pub fn caused_by(mut self, cause: impl Into<BoxError>) -> Self {
        match &mut self {
            Self::Connection { source, .. }
            | Self::CheckExistence { source, .. }
            | Self::Read { source, .. }
            | Self::Write { source, .. }
            | Self::Metadata { source, .. }
            | Self::SetVisibility { source, .. }
            | Self::CreateDirectory { source, .. }
            | Self::DeleteFile { source, .. }
            | Self::DeleteDirectory { source, .. }
            | Self::Move { source, .. }
            | Self::Copy { source, .. }
            | Self::Listing { source, .. } => *source = Some(cause.into()),
            _ => {}
        }
        self
    }

    pub fn operation(&self) -> &'static str {
        match self {
            Self::Connection { .. } => "CONNECT",
            Self::RootResolution { .. } => "RESOLVE_ROOT",
            Self::CheckExistence { .. } => "EXISTENCE_CHECK",
            Self::Read { .. } => "READ",
            Self::Write { .. } => "WRITE",
            Self::Metadata { .. } => "RETRIEVE_METADATA",
            Self::SetVisibility { .. } => "SET_VISIBILITY",
            Self::CreateDirectory { .. } => "CREATE_DIRECTORY",
            Self::DeleteFile { .. } => "DELETE_FILE",
            Self::DeleteDirectory { .. } => "DELETE_DIRECTORY",
            Self::Move { .. } => "MOVE",
            Self::Copy { .. } => "COPY",
            Self::Listing { .. } | Self::InvalidListing { .. } => "LIST",
            Self::InvalidVisibility { .. } => "VISIBILITY",
            Self::PathTraversal { .. } | Self::CorruptedPath { .. } => "NORMALIZE_PATH",
            Self::SymbolicLink { .. } => "LIST",
            Self::ReadOnly { operation, .. } => *operation,
        }
    }

    /// Logical path the failure refers to. For moves and copies this is the
    /// source path.
    pub fn path(&self) -> Option<&str> {
        match self {
            Self::CheckExistence { path, .. }
            | Self::Read { path, .. }
            | Self::Write { path, .. }
            | Self::Metadata { path, .. }
            | Self::SetVisibility { path, .. }
            | Self::CreateDirectory { path, .. }
            | Self::DeleteFile { path, .. }
            | Self::DeleteDirectory { path, .. }
            | Self::Listing { path, .. }
            | Self::PathTraversal { path }
            | Self::CorruptedPath { path }
            | Self::SymbolicLink { path }
            | Self::ReadOnly { path, .. } => Some(path),
            Self::Move { from, .. } | Self::Copy { from, .. } => Some(from),
            _ => None,
        }
    }
}

pub(crate) fn io_reason(err: &io::Error) -> String {
    match err.kind() {
        io::ErrorKind::NotFound => "no such file or directory".to_string(),
        io::ErrorKind::PermissionDenied => "permission denied".to_string(),
        _ => err.to_string(),
    }
}

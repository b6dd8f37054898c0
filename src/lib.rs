//! Uniform storage adapters over local disk, FTP and SFTP.
//!
//! Every adapter implements [`Adapter`] on logical, root-relative paths and
//! reports listings as normalized [`Attributes`].

pub mod attributes;
pub mod backend;
pub mod cli;
pub mod config;
pub mod errors;
pub mod ftp;
pub mod local;
pub mod mime;
pub mod path;
pub mod read_only;
pub mod sftp;
pub mod visibility;

pub use attributes::{Attributes, DirectoryAttributes, FileAttributes, Finder};
pub use backend::{Adapter, ReadStream, adapter_from_config};
pub use config::{DiskConfig, DiskSpec, WriteOptions};
pub use errors::{FsError, FsResult};
pub use ftp::FtpAdapter;
pub use local::LocalAdapter;
pub use read_only::ReadOnlyAdapter;
pub use sftp::SftpAdapter;
pub use visibility::{Visibility, VisibilityConverter};

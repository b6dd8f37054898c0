//! SFTP backend over `ssh2`.

mod connection;
#[cfg(test)]
mod fake;
mod transport;

use std::io::Read;
use std::time::Duration;

use crate::attributes::{Attributes, DirectoryAttributes, FileAttributes, Finder};
use crate::backend::{Adapter, ReadStream, TreeNode, copy_through_stream, delete_listed_tree, spooled_stream};
use crate::config::{SftpConnectionOptions, WriteOptions};
use crate::errors::{BoxError, FsError, FsResult, MetadataKind};
use crate::mime::{ContentMimeTypeDetector, MimeTypeDetector};
use crate::path::{PathPrefixer, join_logical, normalize_path, parent_directory};
use crate::visibility::{Visibility, VisibilityConverter};

pub use connection::{SftpConnectionProvider, SftpConnectivityChecker};
pub use transport::{
    RemoteFileType, RemoteStat, SftpDialer, SftpTransport, Ssh2Dialer, Ssh2Transport,
    fingerprint_matches,
};

pub struct SftpAdapter {
    provider: SftpConnectionProvider,
    prefixer: PathPrefixer,
    converter: VisibilityConverter,
    mime_detector: Box<dyn MimeTypeDetector>,
    finder_mime_type_detect: bool,
    detect_mime_type_using_path: bool,
}

impl SftpAdapter {
    pub fn new(options: SftpConnectionOptions, converter: VisibilityConverter) -> Self {
        let prefixer = PathPrefixer::new(&options.root, '/');
        Self {
            provider: SftpConnectionProvider::new(options),
            prefixer,
            converter,
            mime_detector: Box::new(ContentMimeTypeDetector::new()),
            finder_mime_type_detect: false,
            detect_mime_type_using_path: false,
        }
    }

    pub fn with_dialer(mut self, dialer: Box<dyn SftpDialer>) -> Self {
        self.provider.set_dialer(dialer);
        self
    }

    pub fn with_connectivity_checker(mut self, checker: SftpConnectivityChecker) -> Self {
        self.provider.set_checker(checker);
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.provider.set_retry_delay(delay);
        self
    }

    pub fn with_mime_type_detector(mut self, detector: Box<dyn MimeTypeDetector>) -> Self {
        self.mime_detector = detector;
        self
    }

    pub fn with_finder_mime_type_detect(mut self, enabled: bool) -> Self {
        self.finder_mime_type_detect = enabled;
        self
    }

    pub fn with_detect_mime_type_using_path(mut self, enabled: bool) -> Self {
        self.detect_mime_type_using_path = enabled;
        self
    }

    /// Physical location of a directory listing; the login directory when
    /// no root is configured.
    fn listing_location(&self, directory: &str) -> String {
        let location = self.prefixer.prefix_path(directory);
        if location.is_empty() {
            ".".to_string()
        } else {
            location
        }
    }

    fn make_directory(&mut self, directory: &str, visibility: Option<Visibility>) -> FsResult<()> {
        let mode = visibility.map_or_else(
            || self.converter.default_for_directories(),
            |visibility| self.converter.for_directory(visibility),
        );
        let connection = self.provider.provide_connection()?;

        let mut current = String::new();
        for segment in directory.split('/').filter(|segment| !segment.is_empty()) {
            current = join_logical(&current, segment);
            let location = self.prefixer.prefix_path(&current);
            let existing = connection.stat(&location).map_err(|err| {
                FsError::create_directory(current.as_str(), "unable to stat the directory")
                    .caused_by(err)
            })?;
            match existing {
                Some(stat) if stat.is_dir() => continue,
                Some(_) => {
                    return Err(FsError::create_directory(
                        current.as_str(),
                        "a file exists at this location",
                    ));
                }
                None => {}
            }

            if let Err(err) = connection.mkdir(&location, mode) {
                let created = matches!(connection.stat(&location), Ok(Some(stat)) if stat.is_dir());
                if !created {
                    return Err(FsError::create_directory(
                        current.as_str(),
                        "unable to create the directory",
                    )
                    .caused_by(err));
                }
            }
        }
        Ok(())
    }

    fn fetch_metadata(&mut self, path: &str, kind: MetadataKind) -> FsResult<FileAttributes> {
        let logical = normalize_path(path)?;
        let location = self.prefixer.prefix_path(&logical);
        let stat = self
            .provider
            .provide_connection()?
            .stat(&location)
            .map_err(|err| FsError::metadata(logical.as_str(), kind, "stat failed").caused_by(err))?
            .ok_or_else(|| FsError::metadata(logical.as_str(), kind, "no such file"))?;

        match self.convert(&logical, &stat) {
            Attributes::File(file) => Ok(file),
            Attributes::Directory(_) => Err(FsError::metadata(logical, kind, "path is not a file")),
        }
    }

    fn convert(&self, path: &str, stat: &RemoteStat) -> Attributes {
        let permissions = stat.permissions.unwrap_or(0) & 0o777;
        let last_modified = stat.mtime.and_then(|mtime| i64::try_from(mtime).ok());

        if stat.is_dir() {
            return DirectoryAttributes::new(path)
                .with_visibility(Some(self.converter.inverse_for_directory(permissions)))
                .with_last_modified(last_modified)
                .into();
        }

        let mime_type = self
            .finder_mime_type_detect
            .then(|| self.mime_detector.detect_mime_type_from_path(path))
            .flatten();
        FileAttributes::new(path)
            .with_file_size(stat.size.unwrap_or(0))
            .with_visibility(Some(self.converter.inverse_for_file(permissions)))
            .with_last_modified(last_modified)
            .with_mime_type(mime_type)
            .into()
    }

    /// Entries of one directory. A directory that does not exist lists as
    /// empty.
    fn list_directory(&mut self, directory: &str) -> FsResult<Vec<(String, RemoteStat)>> {
        let location = self.listing_location(directory);
        let connection = self.provider.provide_connection()?;
        match connection.read_dir(&location) {
            Ok(entries) => Ok(entries),
            Err(_) if matches!(connection.stat(&location), Ok(None)) => Ok(Vec::new()),
            Err(err) => {
                Err(FsError::listing(directory, "unable to read the directory").caused_by(err))
            }
        }
    }

    fn remove_node(&mut self, node: TreeNode<'_>) -> FsResult<()> {
        let connection = self.provider.provide_connection()?;
        match node {
            TreeNode::File(path) => connection
                .unlink(&self.prefixer.prefix_path(path))
                .map_err(|err| FsError::delete_file(path, "unlink failed").caused_by(err)),
            TreeNode::Directory(path) => connection
                .rmdir(&self.prefixer.prefix_path(path))
                .map_err(|err| FsError::delete_directory(path, "rmdir failed").caused_by(err)),
        }
    }
}

impl Drop for SftpAdapter {
    fn drop(&mut self) {
        self.provider.disconnect();
    }
}

impl Adapter for SftpAdapter {
    fn backend_name(&self) -> &'static str {
        "sftp"
    }

    fn file_exists(&mut self, path: &str) -> FsResult<bool> {
        let logical = normalize_path(path)?;
        let location = self.prefixer.prefix_path(&logical);
        let stat = self.provider.provide_connection()?.stat(&location).map_err(|err| {
            FsError::check_existence(logical, "unable to stat the file").caused_by(err)
        })?;
        Ok(stat.is_some_and(|stat| stat.is_file()))
    }

    fn directory_exists(&mut self, path: &str) -> FsResult<bool> {
        let logical = normalize_path(path)?;
        let location = self.listing_location(&logical);
        let stat = self.provider.provide_connection()?.stat(&location).map_err(|err| {
            FsError::check_existence(logical, "unable to stat the directory").caused_by(err)
        })?;
        Ok(stat.is_some_and(|stat| stat.is_dir()))
    }

    fn read_stream(&mut self, path: &str) -> FsResult<ReadStream> {
        let logical = normalize_path(path)?;
        let location = self.prefixer.prefix_path(&logical);
        let connection = self.provider.provide_connection()?;
        spooled_stream(|sink| connection.download(&location, sink))
            .map_err(|err| FsError::read(logical, "unable to read file").caused_by(err))
    }

    fn write_stream(
        &mut self,
        path: &str,
        contents: &mut dyn Read,
        options: &WriteOptions,
    ) -> FsResult<()> {
        let logical = normalize_path(path)?;
        if let Some(parent) = parent_directory(&logical) {
            self.make_directory(parent, options.directory_visibility)
                .map_err(|err| {
                    FsError::write(logical.as_str(), "creating parent directory failed")
                        .caused_by(err)
                })?;
        }

        let location = self.prefixer.prefix_path(&logical);
        let write_error = |err: BoxError| {
            FsError::write(logical.as_str(), "not able to write the file").caused_by(err)
        };
        let session = self
            .provider
            .provide_connection()
            .map_err(|err| write_error(err.into()))?;
        session.upload(&location, contents).map_err(write_error)?;

        if let Some(visibility) = options.visibility {
            self.set_visibility(&logical, visibility).map_err(|err| {
                FsError::write(logical.as_str(), "setting visibility failed").caused_by(err)
            })?;
        }
        Ok(())
    }

    fn delete(&mut self, path: &str) -> FsResult<()> {
        let logical = normalize_path(path)?;
        let location = self.prefixer.prefix_path(&logical);
        let connection = self.provider.provide_connection()?;
        if let Err(err) = connection.unlink(&location) {
            if matches!(connection.stat(&location), Ok(Some(_))) {
                return Err(FsError::delete_file(logical, "the file still exists").caused_by(err));
            }
        }
        Ok(())
    }

    fn delete_directory(&mut self, path: &str) -> FsResult<()> {
        let logical = normalize_path(path)?;
        let location = self.listing_location(&logical);
        let exists = self
            .provider
            .provide_connection()?
            .stat(&location)
            .map_err(|err| {
                FsError::delete_directory(logical.as_str(), "unable to stat the directory")
                    .caused_by(err)
            })?
            .is_some_and(|stat| stat.is_dir());
        if !exists {
            return Ok(());
        }

        let entries = self
            .finder(&logical, true)
            .and_then(Finder::into_vec)
            .map_err(|err| {
                FsError::delete_directory(logical.as_str(), "unable to list the directory")
                    .caused_by(err)
            })?;
        delete_listed_tree(&logical, entries, |node| self.remove_node(node))
    }

    fn create_directory(&mut self, path: &str, options: &WriteOptions) -> FsResult<()> {
        let logical = normalize_path(path)?;
        self.make_directory(&logical, options.directory_visibility.or(options.visibility))
    }

    fn move_file(&mut self, from: &str, to: &str, options: &WriteOptions) -> FsResult<()> {
        let source = normalize_path(from)?;
        let destination = normalize_path(to)?;
        let move_error = |reason: &str| {
            FsError::move_failed(source.as_str(), destination.as_str(), reason)
        };

        if let Some(parent) = parent_directory(&destination) {
            self.make_directory(parent, options.directory_visibility)
                .map_err(|err| move_error("creating parent directory failed").caused_by(err))?;
        }

        let from_location = self.prefixer.prefix_path(&source);
        let to_location = self.prefixer.prefix_path(&destination);
        if from_location == to_location {
            return Ok(());
        }

        let connection = self.provider.provide_connection()?;
        let Err(err) = connection.rename(&from_location, &to_location) else {
            return Ok(());
        };

        let overwrite = matches!(connection.stat(&to_location), Ok(Some(stat)) if stat.is_file());
        if !overwrite {
            return Err(move_error("rename failed").caused_by(err));
        }
        connection
            .unlink(&to_location)
            .and_then(|()| connection.rename(&from_location, &to_location))
            .map_err(|err| move_error("overwriting the destination failed").caused_by(err))
    }

    fn copy(&mut self, from: &str, to: &str, options: &WriteOptions) -> FsResult<()> {
        copy_through_stream(self, from, to, options, true)
    }

    fn set_visibility(&mut self, path: &str, visibility: Visibility) -> FsResult<()> {
        let logical = normalize_path(path)?;
        let location = self.prefixer.prefix_path(&logical);
        let mode = self.converter.for_file(visibility);
        self.provider
            .provide_connection()?
            .chmod(&location, mode)
            .map_err(|err| FsError::set_visibility(logical, "chmod failed").caused_by(err))
    }

    fn visibility(&mut self, path: &str) -> FsResult<FileAttributes> {
        self.fetch_metadata(path, MetadataKind::Visibility)
    }

    fn last_modified(&mut self, path: &str) -> FsResult<FileAttributes> {
        self.fetch_metadata(path, MetadataKind::LastModified)
    }

    fn file_size(&mut self, path: &str) -> FsResult<FileAttributes> {
        self.fetch_metadata(path, MetadataKind::FileSize)
    }

    fn mime_type(&mut self, path: &str) -> FsResult<FileAttributes> {
        let logical = normalize_path(path)?;
        let mime_type = if self.detect_mime_type_using_path {
            self.mime_detector.detect_mime_type_from_path(&logical)
        } else {
            let contents = self.read(&logical).map_err(|err| {
                FsError::metadata(logical.as_str(), MetadataKind::MimeType, "unable to read the file")
                    .caused_by(err)
            })?;
            self.mime_detector.detect_mime_type(&logical, &contents)
        };

        let mime_type = mime_type
            .ok_or_else(|| FsError::metadata(logical.as_str(), MetadataKind::MimeType, "unknown"))?;
        Ok(FileAttributes::new(&logical).with_mime_type(Some(mime_type)))
    }

    fn finder(&mut self, path: &str, deep: bool) -> FsResult<Finder<'_>> {
        let logical = normalize_path(path)?;
        let entries = self.list_directory(&logical)?;
        Ok(Finder::new(SftpListing {
            adapter: self,
            frames: vec![(logical, entries.into_iter())],
            pending_directory: None,
            deep,
        }))
    }

    fn disconnect(&mut self) {
        self.provider.disconnect();
    }
}

/// Depth-first walk that lists a subdirectory right after yielding it.
struct SftpListing<'a> {
    adapter: &'a mut SftpAdapter,
    frames: Vec<(String, std::vec::IntoIter<(String, RemoteStat)>)>,
    pending_directory: Option<String>,
    deep: bool,
}

impl Iterator for SftpListing<'_> {
    type Item = FsResult<Attributes>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            // Descend lazily so the directory itself is yielded even when
            // its listing fails.
            if let Some(directory) = self.pending_directory.take() {
                match self.adapter.list_directory(&directory) {
                    Ok(children) => self.frames.push((directory, children.into_iter())),
                    Err(err) => return Some(Err(err)),
                }
            }

            let (base, entries) = self.frames.last_mut()?;
            let Some((name, stat)) = entries.next() else {
                self.frames.pop();
                continue;
            };

            let path = join_logical(base, &name);
            let entry = self.adapter.convert(&path, &stat);
            if self.deep && entry.is_dir() {
                self.pending_directory = Some(path);
            }
            return Some(Ok(entry));
        }
    }
}

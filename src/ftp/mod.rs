//! FTP backend.
//!
//! One control connection is kept per adapter and health-checked before
//! every operation. Listings are parsed from raw `LIST` output since servers
//! disagree on `MLSD` support.

mod connection;
#[cfg(test)]
mod fake;
mod listing;
mod transport;

use std::io::Read;

use tracing::debug;

use crate::attributes::{Attributes, FileAttributes, Finder};
use crate::backend::{Adapter, ReadStream, TreeNode, copy_through_stream, delete_listed_tree, spooled_stream};
use crate::config::{FtpConnectionOptions, SystemType, WriteOptions};
use crate::errors::{FsError, FsResult, MetadataKind};
use crate::mime::{ContentMimeTypeDetector, MimeTypeDetector};
use crate::path::{join_logical, normalize_path, parent_directory};
use crate::visibility::{Visibility, VisibilityConverter};

pub use connection::{
    ConnectivityChecker, FtpConnectionProvider, NoopCommandChecker, RawListChecker,
};
pub use transport::{FtpDialer, FtpResponse, FtpTransport, SuppaFtpDialer, SuppaFtpTransport};

use connection::ConnectionManager;
use listing::{ListingLine, ListingParser, classify_line};

/// Glob characters Pure-FTPd expands in path arguments.
fn escape_path(path: &str) -> String {
    let mut escaped = String::with_capacity(path.len());
    for character in path.chars() {
        if matches!(character, '*' | '[' | ']') {
            escaped.push('\\');
        }
        escaped.push(character);
    }
    escaped
}

pub struct FtpAdapter {
    options: FtpConnectionOptions,
    connections: ConnectionManager,
    parser: ListingParser,
    converter: VisibilityConverter,
    mime_detector: Box<dyn MimeTypeDetector>,
    finder_mime_type_detect: bool,
    detect_mime_type_using_path: bool,
}

impl FtpAdapter {
    pub fn new(options: FtpConnectionOptions, converter: VisibilityConverter) -> Self {
        let parser = ListingParser::new(
            options.system_type,
            converter,
            options.timestamps_on_unix_listings_enabled,
        );
        Self {
            connections: ConnectionManager::new(options.clone()),
            options,
            parser,
            converter,
            mime_detector: Box::new(ContentMimeTypeDetector::new()),
            finder_mime_type_detect: false,
            detect_mime_type_using_path: false,
        }
    }

    pub fn with_connection_provider(mut self, provider: FtpConnectionProvider) -> Self {
        self.connections.set_provider(provider);
        self
    }

    pub fn with_connectivity_checker(mut self, checker: Box<dyn ConnectivityChecker>) -> Self {
        self.connections.set_checker(checker);
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

    /// Guess mime types from the extension instead of downloading the file.
    pub fn with_detect_mime_type_using_path(mut self, enabled: bool) -> Self {
        self.detect_mime_type_using_path = enabled;
        self
    }

    fn ensure_directory_exists(
        &mut self,
        directory: &str,
        visibility: Option<Visibility>,
    ) -> FsResult<()> {
        let mode = visibility.map_or_else(
            || self.converter.default_for_directories(),
            |visibility| self.converter.for_directory(visibility),
        );
        let session = self.connections.connection()?;

        let mut current = String::new();
        for segment in directory.split('/').filter(|segment| !segment.is_empty()) {
            current = join_logical(&current, segment);
            let location = session.prefixer.prefix_path(&current);
            if session.transport.chdir(&location).is_ok() {
                continue;
            }

            session.transport.mkdir(&location).map_err(|err| {
                FsError::create_directory(current.as_str(), "unable to create the directory")
                    .caused_by(err)
            })?;
            session.transport.chmod(mode, &location).map_err(|err| {
                FsError::create_directory(current.as_str(), "unable to chmod the directory")
                    .caused_by(err)
            })?;
        }
        Ok(())
    }

    fn fetch_metadata(&mut self, path: &str, kind: MetadataKind) -> FsResult<FileAttributes> {
        let logical = normalize_path(path)?;
        let mut session = self.connections.connection()?;
        let mut location = session.prefixer.prefix_path(&logical);
        if session.is_pure_ftpd() {
            location = escape_path(&location);
        }

        let response = session
            .transport
            .raw(&format!("STAT {location}"))
            .map_err(|err| {
                FsError::metadata(logical.as_str(), kind, "STAT command failed").caused_by(err)
            })?;
        if response.lines.len() < 3 || response.lines[1].starts_with("ftpd:") {
            return Err(FsError::metadata(logical, kind, response.text()));
        }

        let entry = self.parser.parse(&response.lines[1], "").map_err(|err| {
            FsError::metadata(logical.as_str(), kind, "unable to parse STAT reply").caused_by(err)
        })?;
        match entry.with_path(&logical) {
            Attributes::File(file) => Ok(file),
            Attributes::Directory(_) => Err(FsError::metadata(
                logical,
                kind,
                "expected file, directory found",
            )),
        }
    }

    /// Raw `LIST` lines for `directory`, recursive when the server supports
    /// list options.
    fn raw_listing(&mut self, directory: &str, recursive: bool) -> FsResult<Vec<String>> {
        let mut session = self.connections.connection()?;
        let pure_ftpd = session.is_pure_ftpd();
        let list_options = session.supports_list_options();

        let mut location = format!(
            "{}/",
            session.prefixer.prefix_path(directory).trim_end_matches('/')
        );
        if pure_ftpd {
            location = escape_path(&location.replace(' ', "\\ "));
        }

        let options = match (list_options, recursive) {
            (false, _) => "",
            (true, true) => "-alnR",
            (true, false) => "-aln",
        };
        let argument = if options.is_empty() {
            location
        } else {
            format!("{options} {location}")
        };
        debug!(argument = %argument, "listing ftp directory");

        session
            .transport
            .raw_list(&argument, options.contains('R'))
            .map_err(|err| FsError::listing(directory, "raw listing failed").caused_by(err))
    }

    fn remove_node(&mut self, node: TreeNode<'_>) -> FsResult<()> {
        match node {
            TreeNode::File(path) => self.delete(path),
            TreeNode::Directory(path) => {
                let session = self.connections.connection()?;
                let location = session.prefixer.prefix_path(path);
                session.transport.rmdir(&location).map_err(|err| {
                    FsError::delete_directory(path, "unable to remove the directory").caused_by(err)
                })
            }
        }
    }

    fn with_detected_mime_type(&self, entry: Attributes) -> Attributes {
        match entry {
            Attributes::File(file) if self.finder_mime_type_detect => {
                let mime_type = self.mime_detector.detect_mime_type_from_path(file.path());
                Attributes::File(file.with_mime_type(mime_type))
            }
            other => other,
        }
    }
}

impl Drop for FtpAdapter {
    fn drop(&mut self) {
        self.connections.disconnect();
    }
}

impl Adapter for FtpAdapter {
    fn backend_name(&self) -> &'static str {
        "ftp"
    }

    fn file_exists(&mut self, path: &str) -> FsResult<bool> {
        match self.file_size(path) {
            Ok(_) => Ok(true),
            Err(FsError::Metadata { .. }) => Ok(false),
            Err(err) => Err(err),
        }
    }

    fn directory_exists(&mut self, path: &str) -> FsResult<bool> {
        let logical = normalize_path(path)?;
        let session = self.connections.connection()?;
        let location = session.prefixer.prefix_directory_path(&logical);
        Ok(session.transport.chdir(&location).is_ok())
    }

    fn read_stream(&mut self, path: &str) -> FsResult<ReadStream> {
        let logical = normalize_path(path)?;
        let mode = self.options.transfer_mode;
        let session = self.connections.connection()?;
        let location = session.prefixer.prefix_path(&logical);

        spooled_stream(|sink| session.transport.get(&location, mode, sink))
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
            self.ensure_directory_exists(parent, options.directory_visibility)
                .map_err(|err| {
                    FsError::write(logical.as_str(), "creating parent directory failed")
                        .caused_by(err)
                })?;
        }

        let mode = self.options.transfer_mode;
        let session = self.connections.connection().map_err(|err| {
            FsError::write(logical.as_str(), "writing the file failed").caused_by(err)
        })?;
        let location = session.prefixer.prefix_path(&logical);
        session
            .transport
            .put(&location, mode, contents)
            .map_err(|err| FsError::write(logical.as_str(), "writing the file failed").caused_by(err))?;

        if let Some(visibility) = options.visibility {
            self.set_visibility(&logical, visibility).map_err(|err| {
                FsError::write(logical.as_str(), "setting visibility failed").caused_by(err)
            })?;
        }
        Ok(())
    }

    /// A failed `DELE` only counts when the file is still there afterwards.
    fn delete(&mut self, path: &str) -> FsResult<()> {
        let logical = normalize_path(path)?;
        let session = self.connections.connection()?;
        let location = session.prefixer.prefix_path(&logical);

        if let Err(err) = session.transport.delete(&location) {
            if session.transport.size(&location).is_ok() {
                return Err(FsError::delete_file(logical, "the file still exists").caused_by(err));
            }
        }
        Ok(())
    }

    fn delete_directory(&mut self, path: &str) -> FsResult<()> {
        let logical = normalize_path(path)?;
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
        self.ensure_directory_exists(
            &logical,
            options.directory_visibility.or(options.visibility),
        )
    }

    fn move_file(&mut self, from: &str, to: &str, options: &WriteOptions) -> FsResult<()> {
        let source = normalize_path(from)?;
        let destination = normalize_path(to)?;
        if let Some(parent) = parent_directory(&destination) {
            self.ensure_directory_exists(parent, options.directory_visibility)
                .map_err(|err| {
                    FsError::move_failed(
                        source.as_str(),
                        destination.as_str(),
                        "creating parent directory failed",
                    )
                    .caused_by(err)
                })?;
        }

        let session = self.connections.connection()?;
        let from_location = session.prefixer.prefix_path(&source);
        let to_location = session.prefixer.prefix_path(&destination);
        session
            .transport
            .rename(&from_location, &to_location)
            .map_err(|err| {
                FsError::move_failed(source.as_str(), destination.as_str(), "rename failed")
                    .caused_by(err)
            })
    }

    /// Windows servers report no permissions, so there is no visibility to
    /// carry over.
    fn copy(&mut self, from: &str, to: &str, options: &WriteOptions) -> FsResult<()> {
        let transferable = self.parser.system_type() != Some(SystemType::Windows);
        copy_through_stream(self, from, to, options, transferable)
    }

    fn set_visibility(&mut self, path: &str, visibility: Visibility) -> FsResult<()> {
        let logical = normalize_path(path)?;
        let mode = self.converter.for_file(visibility);
        let session = self.connections.connection()?;
        let location = session.prefixer.prefix_path(&logical);
        session
            .transport
            .chmod(mode, &location)
            .map_err(|err| FsError::set_visibility(logical, "chmod failed").caused_by(err))
    }

    fn visibility(&mut self, path: &str) -> FsResult<FileAttributes> {
        self.fetch_metadata(path, MetadataKind::Visibility)
    }

    fn last_modified(&mut self, path: &str) -> FsResult<FileAttributes> {
        let logical = normalize_path(path)?;
        let session = self.connections.connection()?;
        let location = session.prefixer.prefix_path(&logical);
        let timestamp = session.transport.mdtm(&location).map_err(|err| {
            FsError::metadata(logical.as_str(), MetadataKind::LastModified, "MDTM failed")
                .caused_by(err)
        })?;
        Ok(FileAttributes::new(&logical).with_last_modified(Some(timestamp)))
    }

    fn file_size(&mut self, path: &str) -> FsResult<FileAttributes> {
        let logical = normalize_path(path)?;
        let session = self.connections.connection()?;
        let location = session.prefixer.prefix_path(&logical);
        let size = session.transport.size(&location).map_err(|err| {
            FsError::metadata(logical.as_str(), MetadataKind::FileSize, "SIZE failed").caused_by(err)
        })?;
        Ok(FileAttributes::new(&logical).with_file_size(size))
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
        let recurse_manually = deep && self.options.recurse_manually;
        let lines = self.raw_listing(&logical, deep && !recurse_manually)?;

        Ok(Finder::new(ListingIter {
            adapter: self,
            frames: vec![ListingFrame {
                lines: lines.into_iter(),
                base: logical,
            }],
            pending_directory: None,
            recurse_manually,
        }))
    }

    fn disconnect(&mut self) {
        self.connections.disconnect();
    }
}

struct ListingFrame {
    lines: std::vec::IntoIter<String>,
    base: String,
}

/// Walks raw listings depth first. Subdirectories found during manual
/// recursion are listed when the iterator reaches them.
struct ListingIter<'a> {
    adapter: &'a mut FtpAdapter,
    frames: Vec<ListingFrame>,
    pending_directory: Option<String>,
    recurse_manually: bool,
}

impl Iterator for ListingIter<'_> {
    type Item = FsResult<Attributes>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(directory) = self.pending_directory.take() {
                match self.adapter.raw_listing(&directory, false) {
                    Ok(lines) => self.frames.push(ListingFrame {
                        lines: lines.into_iter(),
                        base: directory,
                    }),
                    Err(err) => return Some(Err(err)),
                }
            }

            let frame = self.frames.last_mut()?;
            let Some(line) = frame.lines.next() else {
                self.frames.pop();
                continue;
            };

            let item = match classify_line(&line, self.adapter.connections.current_prefixer()) {
                ListingLine::Skip => continue,
                ListingLine::Header(base) => {
                    frame.base = base;
                    continue;
                }
                ListingLine::Entry(item) => item,
            };

            let entry = match self.adapter.parser.parse(item, &frame.base) {
                Ok(entry) => entry,
                Err(err) => return Some(Err(err)),
            };
            if self.recurse_manually && entry.is_dir() {
                self.pending_directory = Some(entry.path().to_string());
            }
            return Some(Ok(self.adapter.with_detected_mime_type(entry)));
        }
    }
}

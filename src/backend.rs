use std::io::{Read, Seek, SeekFrom, Write};

use crate::attributes::{Attributes, FileAttributes, Finder};
use crate::config::{DiskConfig, DiskSpec, WriteOptions};
use crate::errors::{BoxError, FsError, FsResult};
use crate::ftp::FtpAdapter;
use crate::local::LocalAdapter;
use crate::mime::{ContentMimeTypeDetector, MimeTypeDetector};
use crate::read_only::ReadOnlyAdapter;
use crate::sftp::SftpAdapter;
use crate::visibility::Visibility;

/// Downloads up to this size stay in memory before spilling to a temp file.
const SPOOL_MEMORY_LIMIT: usize = 2 * 1024 * 1024;

pub type ReadStream = Box<dyn Read + Send>;

/// Storage contract shared by every backend.
///
/// All paths are logical: root-relative and forward-slash separated. Every
/// failure is reported as a typed [`FsError`]; adapters never turn errors
/// into `false` or empty results.
pub trait Adapter: Send {
    fn backend_name(&self) -> &'static str;

    fn file_exists(&mut self, path: &str) -> FsResult<bool>;

    fn directory_exists(&mut self, path: &str) -> FsResult<bool>;

    fn read(&mut self, path: &str) -> FsResult<Vec<u8>> {
        let mut stream = self.read_stream(path)?;
        let mut contents = Vec::new();
        stream
            .read_to_end(&mut contents)
            .map_err(|err| FsError::read(path, "reading the stream failed").caused_by(err))?;
        Ok(contents)
    }

    fn read_stream(&mut self, path: &str) -> FsResult<ReadStream>;

    fn write(&mut self, path: &str, contents: &[u8], options: &WriteOptions) -> FsResult<()> {
        let mut reader = contents;
        self.write_stream(path, &mut reader, options)
    }

    fn write_stream(
        &mut self,
        path: &str,
        contents: &mut dyn Read,
        options: &WriteOptions,
    ) -> FsResult<()>;

    fn delete(&mut self, path: &str) -> FsResult<()>;

    /// Removes a directory and everything below it.
    fn delete_directory(&mut self, path: &str) -> FsResult<()>;

    /// Creates every missing segment from the root down to `path`.
    fn create_directory(&mut self, path: &str, options: &WriteOptions) -> FsResult<()>;

    fn move_file(&mut self, from: &str, to: &str, options: &WriteOptions) -> FsResult<()>;

    fn copy(&mut self, from: &str, to: &str, options: &WriteOptions) -> FsResult<()>;

    fn set_visibility(&mut self, path: &str, visibility: Visibility) -> FsResult<()>;

    fn visibility(&mut self, path: &str) -> FsResult<FileAttributes>;

    fn last_modified(&mut self, path: &str) -> FsResult<FileAttributes>;

    fn file_size(&mut self, path: &str) -> FsResult<FileAttributes>;

    fn mime_type(&mut self, path: &str) -> FsResult<FileAttributes>;

    /// Lists the contents of `path`, descending into subdirectories when
    /// `deep` is set. The directory itself is not part of the listing.
    fn finder(&mut self, path: &str, deep: bool) -> FsResult<Finder<'_>>;

    fn disconnect(&mut self) {}
}

pub fn adapter_from_config(config: &DiskConfig) -> FsResult<Box<dyn Adapter>> {
    let converter = config.visibility_converter();
    let detector: Box<dyn MimeTypeDetector> = Box::new(ContentMimeTypeDetector::new());

    let adapter: Box<dyn Adapter> = match &config.disk {
        DiskSpec::Local(options) => Box::new(
            LocalAdapter::new(options.clone(), converter)
                .with_mime_type_detector(detector)
                .with_finder_mime_type_detect(config.finder_mime_type_detect),
        ),
        DiskSpec::Ftp(options) => Box::new(
            FtpAdapter::new(options.clone(), converter)
                .with_mime_type_detector(detector)
                .with_finder_mime_type_detect(config.finder_mime_type_detect)
                .with_detect_mime_type_using_path(config.detect_mime_type_using_path),
        ),
        DiskSpec::Sftp(options) => Box::new(
            SftpAdapter::new(options.clone(), converter)
                .with_mime_type_detector(detector)
                .with_finder_mime_type_detect(config.finder_mime_type_detect)
                .with_detect_mime_type_using_path(config.detect_mime_type_using_path),
        ),
    };

    if config.read_only {
        return Ok(Box::new(ReadOnlyAdapter::new(adapter)));
    }
    Ok(adapter)
}

/// Buffers a push-style download into a readable stream.
pub(crate) fn spooled_stream(
    fill: impl FnOnce(&mut dyn Write) -> Result<(), BoxError>,
) -> Result<ReadStream, BoxError> {
    let mut buffer = tempfile::spooled_tempfile(SPOOL_MEMORY_LIMIT);
    fill(&mut buffer)?;
    buffer.seek(SeekFrom::Start(0))?;
    Ok(Box::new(buffer))
}

pub(crate) enum TreeNode<'a> {
    File(&'a str),
    Directory(&'a str),
}

/// Deletes a listed tree: every file first, then the directories deepest
/// first, `path` itself last. The first file that cannot be deleted aborts
/// the whole operation before any directory is touched.
pub(crate) fn delete_listed_tree(
    path: &str,
    entries: Vec<Attributes>,
    mut remove: impl FnMut(TreeNode<'_>) -> FsResult<()>,
) -> FsResult<()> {
    let mut directories = vec![path.to_string()];
    for entry in entries {
        if entry.is_dir() {
            directories.push(entry.path().to_string());
            continue;
        }
        remove(TreeNode::File(entry.path())).map_err(|err| {
            FsError::delete_directory(path, format!("unable to delete child {}", entry.path()))
                .caused_by(err)
        })?;
    }

    directories.sort_unstable_by(|left, right| right.cmp(left));
    for directory in &directories {
        remove(TreeNode::Directory(directory)).map_err(|err| {
            FsError::delete_directory(path, format!("could not delete directory {directory}"))
                .caused_by(err)
        })?;
    }
    Ok(())
}

/// Copy for backends without a server-side copy: read the source, decide the
/// destination visibility, write it back.
pub(crate) fn copy_through_stream<A: Adapter + ?Sized>(
    adapter: &mut A,
    from: &str,
    to: &str,
    options: &WriteOptions,
    visibility_transferable: bool,
) -> FsResult<()> {
    fn run<A: Adapter + ?Sized>(
        adapter: &mut A,
        from: &str,
        to: &str,
        options: &WriteOptions,
        visibility_transferable: bool,
    ) -> FsResult<()> {
        let mut stream = adapter.read_stream(from)?;
        let mut options = *options;
        if options.visibility.is_none() && options.retain_visibility && visibility_transferable {
            options.visibility = adapter.visibility(from)?.visibility();
        }
        adapter.write_stream(to, &mut stream, &options)
    }

    run(adapter, from, to, options, visibility_transferable)
        .map_err(|err| FsError::copy_failed(from, to, "copying through a stream failed").caused_by(err))
}

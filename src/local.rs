use std::fs::{self, DirBuilder, File};
use std::io::{self, Read};
use std::path::{MAIN_SEPARATOR, MAIN_SEPARATOR_STR, Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use walkdir::WalkDir;

use crate::attributes::{Attributes, DirectoryAttributes, FileAttributes, Finder};
use crate::backend::{Adapter, ReadStream};
use crate::config::{LinkHandling, LocalOptions, WriteOptions};
use crate::errors::{FsError, FsResult, MetadataKind, io_reason};
use crate::mime::{ContentMimeTypeDetector, MimeTypeDetector};
use crate::path::{PathPrefixer, normalize_path};
use crate::visibility::{Visibility, VisibilityConverter};

pub struct LocalAdapter {
    root: PathBuf,
    prefixer: PathPrefixer,
    converter: VisibilityConverter,
    link_handling: LinkHandling,
    mime_detector: Box<dyn MimeTypeDetector>,
    finder_mime_type_detect: bool,
}

impl LocalAdapter {
    pub fn new(options: LocalOptions, converter: VisibilityConverter) -> Self {
        let prefixer = PathPrefixer::new(&options.root.to_string_lossy(), MAIN_SEPARATOR);
        Self {
            root: options.root,
            prefixer,
            converter,
            link_handling: options.link_handling,
            mime_detector: Box::new(ContentMimeTypeDetector::new()),
            finder_mime_type_detect: false,
        }
    }

    pub fn with_mime_type_detector(mut self, detector: Box<dyn MimeTypeDetector>) -> Self {
        self.mime_detector = detector;
        self
    }

    pub fn with_finder_mime_type_detect(mut self, enabled: bool) -> Self {
        self.finder_mime_type_detect = enabled;
        self
    }

    fn location(&self, path: &str) -> FsResult<(String, PathBuf)> {
        let normalized = normalize_path(path)?;
        let physical = if MAIN_SEPARATOR == '/' {
            self.prefixer.prefix_path(&normalized)
        } else {
            self.prefixer
                .prefix_path(&normalized.replace('/', MAIN_SEPARATOR_STR))
        };
        Ok((normalized, PathBuf::from(physical)))
    }

    fn logical_path(&self, physical: &Path) -> String {
        self.prefixer
            .strip_prefix(&physical.to_string_lossy())
            .replace('\\', "/")
    }

    fn ensure_root_directory_exists(&self) -> FsResult<()> {
        if self.root.as_os_str().is_empty() {
            return Ok(());
        }
        ensure_directory_exists(&self.root, self.converter.default_for_directories())
    }

    fn ensure_parent_directory_exists(
        &self,
        location: &Path,
        options: &WriteOptions,
    ) -> FsResult<()> {
        self.ensure_root_directory_exists()?;
        match location.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => {
                ensure_directory_exists(parent, self.directory_mode(options.directory_visibility))
            }
            _ => Ok(()),
        }
    }

    fn directory_mode(&self, visibility: Option<Visibility>) -> u32 {
        visibility.map_or_else(
            || self.converter.default_for_directories(),
            |visibility| self.converter.for_directory(visibility),
        )
    }

    fn convert_entry(
        &self,
        entry: walkdir::Result<walkdir::DirEntry>,
    ) -> FsResult<Option<Attributes>> {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                if err.path().is_some_and(|path| !path.exists()) {
                    return Ok(None);
                }
                let path = err
                    .path()
                    .map(|path| self.logical_path(path))
                    .unwrap_or_default();
                return Err(FsError::listing(path, "unable to read directory entry").caused_by(err));
            }
        };

        let path = self.logical_path(entry.path());
        if entry.path_is_symlink() {
            return match self.link_handling {
                LinkHandling::Skip => Ok(None),
                LinkHandling::Disallow => Err(FsError::SymbolicLink { path }),
            };
        }

        let metadata = match entry.metadata() {
            Ok(metadata) => metadata,
            Err(_) if !entry.path().exists() => return Ok(None),
            Err(err) => {
                return Err(FsError::listing(path, "unable to read entry metadata").caused_by(err));
            }
        };

        let permissions = permission_bits(&metadata);
        let last_modified = metadata.modified().ok().map(unix_timestamp);
        if metadata.is_dir() {
            return Ok(Some(
                DirectoryAttributes::new(&path)
                    .with_visibility(Some(self.converter.inverse_for_directory(permissions)))
                    .with_last_modified(last_modified)
                    .into(),
            ));
        }

        let mime_type = self
            .finder_mime_type_detect
            .then(|| self.mime_detector.detect_mime_type_from_path(&path))
            .flatten();
        Ok(Some(
            FileAttributes::new(&path)
                .with_file_size(metadata.len())
                .with_visibility(Some(self.converter.inverse_for_file(permissions)))
                .with_last_modified(last_modified)
                .with_mime_type(mime_type)
                .into(),
        ))
    }
}

impl Adapter for LocalAdapter {
    fn backend_name(&self) -> &'static str {
        "local"
    }

    fn file_exists(&mut self, path: &str) -> FsResult<bool> {
        let (_, location) = self.location(path)?;
        Ok(location.is_file())
    }

    fn directory_exists(&mut self, path: &str) -> FsResult<bool> {
        let (_, location) = self.location(path)?;
        Ok(location.is_dir())
    }

    fn read(&mut self, path: &str) -> FsResult<Vec<u8>> {
        let (logical, location) = self.location(path)?;
        fs::read(&location).map_err(|err| FsError::read(logical, io_reason(&err)).caused_by(err))
    }

    fn read_stream(&mut self, path: &str) -> FsResult<ReadStream> {
        let (logical, location) = self.location(path)?;
        let file = File::open(&location)
            .map_err(|err| FsError::read(logical, io_reason(&err)).caused_by(err))?;
        Ok(Box::new(file))
    }

    fn write_stream(
        &mut self,
        path: &str,
        contents: &mut dyn Read,
        options: &WriteOptions,
    ) -> FsResult<()> {
        let (logical, location) = self.location(path)?;
        self.ensure_parent_directory_exists(&location, options)
            .map_err(|err| {
                FsError::write(logical.as_str(), "creating parent directory failed").caused_by(err)
            })?;

        let mut file = File::create(&location)
            .map_err(|err| FsError::write(logical.as_str(), io_reason(&err)).caused_by(err))?;
        io::copy(contents, &mut file)
            .map_err(|err| FsError::write(logical.as_str(), io_reason(&err)).caused_by(err))?;

        if let Some(visibility) = options.visibility {
            self.set_visibility(&logical, visibility).map_err(|err| {
                FsError::write(logical.as_str(), "setting visibility failed").caused_by(err)
            })?;
        }
        Ok(())
    }

    fn delete(&mut self, path: &str) -> FsResult<()> {
        let (logical, location) = self.location(path)?;
        if fs::symlink_metadata(&location).is_err() {
            return Ok(());
        }
        fs::remove_file(&location)
            .map_err(|err| FsError::delete_file(logical, io_reason(&err)).caused_by(err))
    }

    fn delete_directory(&mut self, path: &str) -> FsResult<()> {
        let (logical, location) = self.location(path)?;
        if !location.is_dir() {
            return Ok(());
        }

        for entry in WalkDir::new(&location).min_depth(1).contents_first(true) {
            let entry = entry.map_err(|err| {
                FsError::delete_directory(logical.as_str(), "unable to list directory contents")
                    .caused_by(err)
            })?;
            let removed = if entry.file_type().is_dir() {
                fs::remove_dir(entry.path())
            } else {
                fs::remove_file(entry.path())
            };
            removed.map_err(|err| {
                FsError::delete_directory(
                    logical.as_str(),
                    format!("unable to delete file at {}", self.logical_path(entry.path())),
                )
                .caused_by(err)
            })?;
        }

        fs::remove_dir(&location)
            .map_err(|err| FsError::delete_directory(logical, io_reason(&err)).caused_by(err))
    }

    fn create_directory(&mut self, path: &str, options: &WriteOptions) -> FsResult<()> {
        self.ensure_root_directory_exists()?;
        let (logical, location) = self.location(path)?;
        let mode = self.directory_mode(options.visibility.or(options.directory_visibility));

        if location.is_dir() {
            return set_permissions(&location, mode)
                .map_err(|err| FsError::set_visibility(logical, io_reason(&err)).caused_by(err));
        }
        create_directories(&location, mode)
            .map_err(|err| FsError::create_directory(logical, io_reason(&err)).caused_by(err))
    }

    fn move_file(&mut self, from: &str, to: &str, options: &WriteOptions) -> FsResult<()> {
        let (from_logical, source) = self.location(from)?;
        let (to_logical, destination) = self.location(to)?;
        self.ensure_parent_directory_exists(&destination, options)
            .map_err(|err| {
                FsError::move_failed(
                    from_logical.as_str(),
                    to_logical.as_str(),
                    "creating parent directory failed",
                )
                .caused_by(err)
            })?;

        fs::rename(&source, &destination).map_err(|err| {
            FsError::move_failed(from_logical.as_str(), to_logical.as_str(), io_reason(&err))
                .caused_by(err)
        })?;

        if let Some(visibility) = options.visibility {
            self.set_visibility(&to_logical, visibility).map_err(|err| {
                FsError::move_failed(
                    from_logical.as_str(),
                    to_logical.as_str(),
                    "setting visibility failed",
                )
                .caused_by(err)
            })?;
        }
        Ok(())
    }

    fn copy(&mut self, from: &str, to: &str, options: &WriteOptions) -> FsResult<()> {
        let (from_logical, source) = self.location(from)?;
        let (to_logical, destination) = self.location(to)?;
        self.ensure_parent_directory_exists(&destination, options)
            .map_err(|err| {
                FsError::copy_failed(
                    from_logical.as_str(),
                    to_logical.as_str(),
                    "creating parent directory failed",
                )
                .caused_by(err)
            })?;

        if source != destination {
            fs::copy(&source, &destination).map_err(|err| {
                FsError::copy_failed(from_logical.as_str(), to_logical.as_str(), io_reason(&err))
                    .caused_by(err)
            })?;
        }

        let copy_error = |err: FsError| {
            FsError::copy_failed(
                from_logical.as_str(),
                to_logical.as_str(),
                "transferring visibility failed",
            )
            .caused_by(err)
        };
        let visibility = match options.visibility {
            Some(visibility) => Some(visibility),
            None if options.retain_visibility => self
                .visibility(&from_logical)
                .map_err(copy_error)?
                .visibility(),
            None => None,
        };
        if let Some(visibility) = visibility {
            self.set_visibility(&to_logical, visibility)
                .map_err(copy_error)?;
        }
        Ok(())
    }

    fn set_visibility(&mut self, path: &str, visibility: Visibility) -> FsResult<()> {
        let (logical, location) = self.location(path)?;
        let mode = if location.is_dir() {
            self.converter.for_directory(visibility)
        } else {
            self.converter.for_file(visibility)
        };
        set_permissions(&location, mode)
            .map_err(|err| FsError::set_visibility(logical, io_reason(&err)).caused_by(err))
    }

    fn visibility(&mut self, path: &str) -> FsResult<FileAttributes> {
        let (logical, location) = self.location(path)?;
        let metadata = fs::metadata(&location).map_err(|err| {
            FsError::metadata(logical.as_str(), MetadataKind::Visibility, io_reason(&err)).caused_by(err)
        })?;
        let visibility = self.converter.inverse_for_file(permission_bits(&metadata));
        Ok(FileAttributes::new(&logical).with_visibility(Some(visibility)))
    }

    fn last_modified(&mut self, path: &str) -> FsResult<FileAttributes> {
        let (logical, location) = self.location(path)?;
        let modified = fs::metadata(&location)
            .and_then(|metadata| metadata.modified())
            .map_err(|err| {
                FsError::metadata(logical.as_str(), MetadataKind::LastModified, io_reason(&err))
                    .caused_by(err)
            })?;
        Ok(FileAttributes::new(&logical).with_last_modified(Some(unix_timestamp(modified))))
    }

    fn file_size(&mut self, path: &str) -> FsResult<FileAttributes> {
        let (logical, location) = self.location(path)?;
        match fs::metadata(&location) {
            Ok(metadata) if metadata.is_file() => {
                Ok(FileAttributes::new(&logical).with_file_size(metadata.len()))
            }
            Ok(_) => Err(FsError::metadata(logical, MetadataKind::FileSize, "path is not a file")),
            Err(err) => Err(
                FsError::metadata(logical.as_str(), MetadataKind::FileSize, io_reason(&err))
                    .caused_by(err),
            ),
        }
    }

    fn mime_type(&mut self, path: &str) -> FsResult<FileAttributes> {
        let (logical, location) = self.location(path)?;
        if !location.is_file() {
            return Err(FsError::metadata(
                logical,
                MetadataKind::MimeType,
                "no such file exists",
            ));
        }
        let mime_type = self
            .mime_detector
            .detect_mime_type_from_file(&location)
            .ok_or_else(|| FsError::metadata(logical.as_str(), MetadataKind::MimeType, "unknown"))?;
        Ok(FileAttributes::new(&logical).with_mime_type(Some(mime_type)))
    }

    fn finder(&mut self, path: &str, deep: bool) -> FsResult<Finder<'_>> {
        let (_, location) = self.location(path)?;
        if !location.is_dir() {
            return Ok(Finder::empty());
        }

        let walker = WalkDir::new(location)
            .min_depth(1)
            .max_depth(if deep { usize::MAX } else { 1 })
            .follow_links(false);
        let adapter = &*self;
        Ok(Finder::new(
            walker
                .into_iter()
                .filter_map(move |entry| adapter.convert_entry(entry).transpose()),
        ))
    }
}

fn ensure_directory_exists(directory: &Path, mode: u32) -> FsResult<()> {
    if directory.is_dir() {
        return Ok(());
    }
    let created = create_directories(directory, mode);
    if directory.is_dir() {
        return Ok(());
    }
    let path = directory.to_string_lossy();
    Err(match created {
        Err(err) => FsError::create_directory(path, io_reason(&err)).caused_by(err),
        Ok(()) => FsError::create_directory(path, "directory missing after creation"),
    })
}

fn unix_timestamp(time: SystemTime) -> i64 {
    DateTime::<Utc>::from(time).timestamp()
}

#[cfg(unix)]
fn permission_bits(metadata: &fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;

    metadata.permissions().mode() & 0o777
}

#[cfg(not(unix))]
fn permission_bits(metadata: &fs::Metadata) -> u32 {
    let base = if metadata.is_dir() { 0o755 } else { 0o644 };
    if metadata.permissions().readonly() {
        base & !0o222
    } else {
        base
    }
}

#[cfg(unix)]
fn set_permissions(path: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_permissions(path: &Path, mode: u32) -> io::Result<()> {
    let mut permissions = fs::metadata(path)?.permissions();
    permissions.set_readonly(mode & 0o200 == 0);
    fs::set_permissions(path, permissions)
}

fn create_directories(path: &Path, mode: u32) -> io::Result<()> {
    let mut builder = DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(mode);
    }
    #[cfg(not(unix))]
    let _ = mode;
    builder.create(path)
}

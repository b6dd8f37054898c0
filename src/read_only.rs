use std::io::Read;

use crate::attributes::{FileAttributes, Finder};
use crate::backend::{Adapter, ReadStream};
use crate::config::WriteOptions;
use crate::errors::{FsError, FsResult};
use crate::visibility::Visibility;

/// Passes reads through to the wrapped adapter and refuses every write.
pub struct ReadOnlyAdapter {
    inner: Box<dyn Adapter>,
}

impl ReadOnlyAdapter {
    pub fn new(inner: Box<dyn Adapter>) -> Self {
        Self { inner }
    }

    pub fn into_inner(self) -> Box<dyn Adapter> {
        self.inner
    }
}

fn refuse<T>(operation: &'static str, path: &str) -> FsResult<T> {
    Err(FsError::ReadOnly {
        operation,
        path: path.to_string(),
    })
}

impl Adapter for ReadOnlyAdapter {
    fn backend_name(&self) -> &'static str {
        self.inner.backend_name()
    }

    fn file_exists(&mut self, path: &str) -> FsResult<bool> {
        self.inner.file_exists(path)
    }

    fn directory_exists(&mut self, path: &str) -> FsResult<bool> {
        self.inner.directory_exists(path)
    }

    fn read(&mut self, path: &str) -> FsResult<Vec<u8>> {
        self.inner.read(path)
    }

    fn read_stream(&mut self, path: &str) -> FsResult<ReadStream> {
        self.inner.read_stream(path)
    }

    fn write(&mut self, path: &str, _contents: &[u8], _options: &WriteOptions) -> FsResult<()> {
        refuse("WRITE", path)
    }

    fn write_stream(
        &mut self,
        path: &str,
        _contents: &mut dyn Read,
        _options: &WriteOptions,
    ) -> FsResult<()> {
        refuse("WRITE", path)
    }

    fn delete(&mut self, path: &str) -> FsResult<()> {
        refuse("DELETE_FILE", path)
    }

    fn delete_directory(&mut self, path: &str) -> FsResult<()> {
        refuse("DELETE_DIRECTORY", path)
    }

    fn create_directory(&mut self, path: &str, _options: &WriteOptions) -> FsResult<()> {
        refuse("CREATE_DIRECTORY", path)
    }

    fn move_file(&mut self, from: &str, _to: &str, _options: &WriteOptions) -> FsResult<()> {
        refuse("MOVE", from)
    }

    fn copy(&mut self, from: &str, _to: &str, _options: &WriteOptions) -> FsResult<()> {
        refuse("COPY", from)
    }

    fn set_visibility(&mut self, path: &str, _visibility: Visibility) -> FsResult<()> {
        refuse("SET_VISIBILITY", path)
    }

    fn visibility(&mut self, path: &str) -> FsResult<FileAttributes> {
        self.inner.visibility(path)
    }

    fn last_modified(&mut self, path: &str) -> FsResult<FileAttributes> {
        self.inner.last_modified(path)
    }

    fn file_size(&mut self, path: &str) -> FsResult<FileAttributes> {
        self.inner.file_size(path)
    }

    fn mime_type(&mut self, path: &str) -> FsResult<FileAttributes> {
        self.inner.mime_type(path)
    }

    fn finder(&mut self, path: &str, deep: bool) -> FsResult<Finder<'_>> {
        self.inner.finder(path, deep)
    }

    fn disconnect(&mut self) {
        self.inner.disconnect();
    }
}

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::errors::FsResult;
use crate::visibility::Visibility;

pub type ExtraMetadata = BTreeMap<String, serde_json::Value>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileAttributes {
    path: String,
    file_size: Option<u64>,
    visibility: Option<Visibility>,
    last_modified: Option<i64>,
    mime_type: Option<String>,
    #[serde(default)]
    extra_metadata: ExtraMetadata,
}

impl FileAttributes {
    pub fn new(path: &str) -> Self {
        Self {
            path: path.trim_start_matches('/').to_string(),
            file_size: None,
            visibility: None,
            last_modified: None,
            mime_type: None,
            extra_metadata: ExtraMetadata::new(),
        }
    }

    pub fn with_file_size(mut self, size: u64) -> Self {
        self.file_size = Some(size);
        self
    }

    pub fn with_visibility(mut self, visibility: Option<Visibility>) -> Self {
        self.visibility = visibility;
        self
    }

    pub fn with_last_modified(mut self, timestamp: Option<i64>) -> Self {
        self.last_modified = timestamp;
        self
    }

    pub fn with_mime_type(mut self, mime_type: Option<String>) -> Self {
        self.mime_type = mime_type;
        self
    }

    pub fn with_extra_metadata(mut self, extra_metadata: ExtraMetadata) -> Self {
        self.extra_metadata = extra_metadata;
        self
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Size in bytes, 0 when the backend did not report one.
    pub fn size(&self) -> u64 {
        self.file_size.unwrap_or(0)
    }

    pub fn file_size(&self) -> Option<u64> {
        self.file_size
    }

    pub fn visibility(&self) -> Option<Visibility> {
        self.visibility
    }

    pub fn last_modified(&self) -> Option<i64> {
        self.last_modified
    }

    pub fn mime_type(&self) -> Option<&str> {
        self.mime_type.as_deref()
    }

    pub fn extra_metadata(&self) -> &ExtraMetadata {
        &self.extra_metadata
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryAttributes {
    path: String,
    visibility: Option<Visibility>,
    last_modified: Option<i64>,
    #[serde(default)]
    extra_metadata: ExtraMetadata,
}

impl DirectoryAttributes {
    pub fn new(path: &str) -> Self {
        Self {
            path: path.trim_matches('/').to_string(),
            visibility: None,
            last_modified: None,
            extra_metadata: ExtraMetadata::new(),
        }
    }

    pub fn with_visibility(mut self, visibility: Option<Visibility>) -> Self {
        self.visibility = visibility;
        self
    }

    pub fn with_last_modified(mut self, timestamp: Option<i64>) -> Self {
        self.last_modified = timestamp;
        self
    }

    pub fn with_extra_metadata(mut self, extra_metadata: ExtraMetadata) -> Self {
        self.extra_metadata = extra_metadata;
        self
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn visibility(&self) -> Option<Visibility> {
        self.visibility
    }

    pub fn last_modified(&self) -> Option<i64> {
        self.last_modified
    }

    pub fn extra_metadata(&self) -> &ExtraMetadata {
        &self.extra_metadata
    }
}

/// A single finder entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Attributes {
    File(FileAttributes),
    #[serde(rename = "dir")]
    Directory(DirectoryAttributes),
}

impl From<FileAttributes> for Attributes {
    fn from(value: FileAttributes) -> Self {
        Self::File(value)
    }
}

impl From<DirectoryAttributes> for Attributes {
    fn from(value: DirectoryAttributes) -> Self {
        Self::Directory(value)
    }
}

impl Attributes {
    pub fn path(&self) -> &str {
        match self {
            Self::File(file) => file.path(),
            Self::Directory(dir) => dir.path(),
        }
    }

    pub fn is_file(&self) -> bool {
        matches!(self, Self::File(_))
    }

    pub fn is_dir(&self) -> bool {
        matches!(self, Self::Directory(_))
    }

    pub fn visibility(&self) -> Option<Visibility> {
        match self {
            Self::File(file) => file.visibility(),
            Self::Directory(dir) => dir.visibility(),
        }
    }

    pub fn last_modified(&self) -> Option<i64> {
        match self {
            Self::File(file) => file.last_modified(),
            Self::Directory(dir) => dir.last_modified(),
        }
    }

    pub fn extra_metadata(&self) -> &ExtraMetadata {
        match self {
            Self::File(file) => file.extra_metadata(),
            Self::Directory(dir) => dir.extra_metadata(),
        }
    }

    pub fn as_file(&self) -> Option<&FileAttributes> {
        match self {
            Self::File(file) => Some(file),
            Self::Directory(_) => None,
        }
    }

    /// Copy of this entry relocated to `path`.
    pub fn with_path(&self, path: &str) -> Self {
        match self {
            Self::File(file) => Self::File(FileAttributes {
                path: path.trim_start_matches('/').to_string(),
                ..file.clone()
            }),
            Self::Directory(dir) => Self::Directory(DirectoryAttributes {
                path: path.trim_matches('/').to_string(),
                ..dir.clone()
            }),
        }
    }
}

/// Lazy listing produced by an adapter.
///
/// Entries are pulled from the backend as the finder is iterated. The first
/// error ends the sequence; iterate again by calling the adapter again.
pub struct Finder<'a> {
    entries: Box<dyn Iterator<Item = FsResult<Attributes>> + 'a>,
    done: bool,
}

impl<'a> Finder<'a> {
    pub fn new(entries: impl Iterator<Item = FsResult<Attributes>> + 'a) -> Self {
        Self {
            entries: Box::new(entries),
            done: false,
        }
    }

    pub fn empty() -> Self {
        Self::new(std::iter::empty())
    }

    pub fn filter(self, mut predicate: impl FnMut(&Attributes) -> bool + 'a) -> Self {
        Self::new(Iterator::filter(self, move |entry| match entry {
            Ok(attributes) => predicate(attributes),
            Err(_) => true,
        }))
    }

    pub fn files(self) -> Self {
        Finder::filter(self, Attributes::is_file)
    }

    pub fn directories(self) -> Self {
        Finder::filter(self, Attributes::is_dir)
    }

    pub fn paths(self) -> impl Iterator<Item = FsResult<String>> + 'a {
        self.map(|entry| entry.map(|attributes| attributes.path().to_string()))
    }

    pub fn into_vec(self) -> FsResult<Vec<Attributes>> {
        self.collect()
    }

    /// Drains the listing and orders it by path.
    pub fn sort_by_path(self) -> FsResult<Vec<Attributes>> {
        let mut entries = self.into_vec()?;
        entries.sort_by(|left, right| left.path().cmp(right.path()));
        Ok(entries)
    }
}

impl Iterator for Finder<'_> {
    type Item = FsResult<Attributes>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let next = self.entries.next();
        if matches!(next, None | Some(Err(_))) {
            self.done = true;
        }
        next
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::errors::FsError;

    use super::*;

    #[test]
    fn paths_are_trimmed_per_kind() {
        assert_eq!(FileAttributes::new("/a/b.txt").path(), "a/b.txt");
        assert_eq!(DirectoryAttributes::new("/a/b/").path(), "a/b");
    }

    #[test]
    fn file_and_directory_are_exclusive() {
        let file = Attributes::from(FileAttributes::new("a.txt"));
        let dir = Attributes::from(DirectoryAttributes::new("a"));
        assert!(file.is_file() && !file.is_dir());
        assert!(dir.is_dir() && !dir.is_file());
    }

    #[test]
    fn with_path_returns_relocated_copy() {
        let original = Attributes::from(
            FileAttributes::new("a.txt")
                .with_file_size(12)
                .with_visibility(Some(Visibility::Private)),
        );
        let moved = original.with_path("/b/c.txt");

        assert_eq!(original.path(), "a.txt");
        assert_eq!(moved.path(), "b/c.txt");
        assert_eq!(moved.visibility(), Some(Visibility::Private));
        assert_eq!(moved.as_file().map(FileAttributes::size), Some(12));
    }

    #[test]
    fn missing_size_reads_as_zero() {
        let file = FileAttributes::new("a.txt");
        assert_eq!(file.size(), 0);
        assert_eq!(file.file_size(), None);
    }

    #[test]
    fn serializes_with_type_tag() {
        let file = Attributes::from(
            FileAttributes::new("docs/readme.md")
                .with_file_size(42)
                .with_last_modified(Some(1_700_000_000))
                .with_mime_type(Some("text/markdown".to_string())),
        );
        assert_eq!(
            serde_json::to_value(&file).unwrap(),
            json!({
                "type": "file",
                "path": "docs/readme.md",
                "fileSize": 42,
                "visibility": null,
                "lastModified": 1_700_000_000,
                "mimeType": "text/markdown",
                "extraMetadata": {},
            })
        );

        let dir = Attributes::from(DirectoryAttributes::new("docs").with_visibility(Some(Visibility::Public)));
        let value = serde_json::to_value(&dir).unwrap();
        assert_eq!(value["type"], "dir");
        assert_eq!(value["visibility"], "public");

        let parsed: Attributes = serde_json::from_value(value).unwrap();
        assert_eq!(parsed, dir);
    }

    #[test]
    fn finder_stops_after_first_error() {
        let entries = vec![
            Ok(Attributes::from(FileAttributes::new("a"))),
            Err(FsError::listing("x", "boom")),
            Ok(Attributes::from(FileAttributes::new("b"))),
        ];
        let collected: Vec<_> = Finder::new(entries.into_iter()).collect();

        assert_eq!(collected.len(), 2);
        assert!(collected[1].is_err());
    }

    fn mixed_entries() -> Vec<FsResult<Attributes>> {
        vec![
            Ok(Attributes::from(FileAttributes::new("z.txt"))),
            Ok(Attributes::from(DirectoryAttributes::new("dir"))),
            Ok(Attributes::from(FileAttributes::new("a.txt"))),
        ]
    }

    #[test]
    fn finder_combinators_filter_and_sort() {
        let files = Finder::new(mixed_entries().into_iter())
            .files()
            .sort_by_path()
            .unwrap();
        let paths: Vec<_> = files.iter().map(Attributes::path).collect();
        assert_eq!(paths, ["a.txt", "z.txt"]);

        let dirs: Vec<String> = Finder::new(mixed_entries().into_iter())
            .directories()
            .paths()
            .collect::<FsResult<_>>()
            .unwrap();
        assert_eq!(dirs, ["dir"]);
    }
}

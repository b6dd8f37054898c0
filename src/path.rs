//! Logical path handling shared by every adapter.
//!
//! Callers hand adapters root-relative, forward-slash paths. [`normalize_path`]
//! collapses them into a canonical form and refuses anything that would leave
//! the root; [`PathPrefixer`] then maps the canonical form onto a
//! backend-specific physical location and back.

use std::sync::LazyLock;

use regex::Regex;

use crate::errors::{FsError, FsResult};

static CONTROL_CHARACTERS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\p{C}").expect("control character pattern is valid"));

/// Normalizes a logical path.
///
/// Backslashes become forward slashes, empty and `.` segments are dropped and
/// every `..` pops the previous segment. A `..` with nothing left to pop is a
/// traversal above the root.
pub fn normalize_path(path: &str) -> FsResult<String> {
    let path = path.replace('\\', "/");
    if CONTROL_CHARACTERS.is_match(&path) {
        return Err(FsError::CorruptedPath { path });
    }

    let mut parts: Vec<&str> = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                if parts.pop().is_none() {
                    return Err(FsError::PathTraversal {
                        path: path.clone(),
                    });
                }
            }
            other => parts.push(other),
        }
    }

    Ok(parts.join("/"))
}

/// Parent of a normalized logical path, `None` for top-level entries.
pub fn parent_directory(path: &str) -> Option<&str> {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(0) | None => None,
        Some(index) => Some(&trimmed[..index]),
    }
}

/// Appends `name` to the logical directory `base`.
pub fn join_logical(base: &str, name: &str) -> String {
    let base = base.trim_end_matches('/');
    if base.is_empty() {
        name.to_string()
    } else {
        format!("{base}/{name}")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPrefixer {
    prefix: String,
    separator: char,
}

impl PathPrefixer {
    pub fn new(root: &str, separator: char) -> Self {
        let mut prefix = root.trim_end_matches(['\\', '/']).to_string();
        if !prefix.is_empty() || (root.len() == separator.len_utf8() && root.starts_with(separator))
        {
            prefix.push(separator);
        }
        Self { prefix, separator }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn prefix_path(&self, path: &str) -> String {
        format!("{}{}", self.prefix, path.trim_start_matches(['\\', '/']))
    }

    pub fn strip_prefix(&self, path: &str) -> String {
        path.strip_prefix(self.prefix.as_str())
            .unwrap_or(path)
            .to_string()
    }

    pub fn strip_directory_prefix(&self, path: &str) -> String {
        self.strip_prefix(path)
            .trim_end_matches(['\\', '/'])
            .to_string()
    }

    pub fn prefix_directory_path(&self, path: &str) -> String {
        let mut prefixed = self.prefix_path(path.trim_end_matches(['\\', '/']));
        if prefixed.is_empty() || prefixed.ends_with(self.separator) {
            return prefixed;
        }
        prefixed.push(self.separator);
        prefixed
    }
}

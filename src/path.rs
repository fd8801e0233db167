//! # Path Prefixing
//!
//! Rewrites caller-relative paths into backend-rooted paths and back. Two
//! disks sharing a backend but carrying different roots can never collide,
//! because every path crosses the prefixer before reaching the connector.

use crate::errors::{StorageError, StorageResult};

/// Joins a configured root/prefix onto caller paths
///
/// The prefix is stored with a single trailing separator so prefixing is a
/// plain concatenation; an empty prefix makes both directions the identity.
#[derive(Debug, Clone)]
pub struct PathPrefixer {
    prefix: String,
    separator: char,
}

impl PathPrefixer {
    /// Create a prefixer with the default `/` separator
    pub fn new(prefix: impl AsRef<str>) -> Self {
        Self::with_separator(prefix, '/')
    }

    /// Create a prefixer with an explicit separator
    ///
    /// Only the trailing edge of the prefix is trimmed: a leading separator
    /// is part of an absolute root, not of the joint being normalized.
    pub fn with_separator(prefix: impl AsRef<str>, separator: char) -> Self {
        let trimmed = prefix.as_ref().trim_end_matches(separator);
        let prefix = if trimmed.is_empty() {
            String::new()
        } else {
            format!("{}{}", trimmed, separator)
        };
        Self { prefix, separator }
    }

    /// Join two path fragments, normalizing separators at the joint
    pub fn join(left: &str, right: &str) -> String {
        let left = left.trim_end_matches('/');
        let right = right.trim_start_matches('/');
        match (left.is_empty(), right.is_empty()) {
            (true, _) => right.to_string(),
            (_, true) => left.to_string(),
            _ => format!("{}/{}", left, right),
        }
    }

    /// The configured prefix, without its trailing separator
    pub fn prefix(&self) -> &str {
        self.prefix.trim_end_matches(self.separator)
    }

    /// Prepend the prefix to a caller path
    pub fn prefix_path(&self, path: &str) -> String {
        format!("{}{}", self.prefix, path.trim_start_matches(self.separator))
    }

    /// As [`prefix_path`](Self::prefix_path), but non-empty results carry a
    /// trailing separator (object-store listing prefixes).
    pub fn prefix_directory_path(&self, path: &str) -> String {
        let prefixed = self.prefix_path(path);
        if prefixed.is_empty() || prefixed.ends_with(self.separator) {
            prefixed
        } else {
            format!("{}{}", prefixed, self.separator)
        }
    }

    /// Translate a backend-reported path back to a caller-relative one
    pub fn strip_prefix(&self, path: &str) -> String {
        path.strip_prefix(&self.prefix)
            .unwrap_or(path)
            .trim_start_matches(self.separator)
            .to_string()
    }
}

/// Successive ancestor paths of `path`, shallowest first, keeping a leading
/// separator when the path is absolute
///
/// `"/srv/a/b"` yields `["/srv", "/srv/a", "/srv/a/b"]`.
pub fn ancestor_chain(path: &str) -> Vec<String> {
    let anchored = path.starts_with('/');
    let mut built = String::new();
    let mut chain = Vec::new();
    for segment in path.split('/').filter(|s| !s.is_empty()) {
        if built.is_empty() {
            built = if anchored {
                format!("/{}", segment)
            } else {
                segment.to_string()
            };
        } else {
            built = format!("{}/{}", built, segment);
        }
        chain.push(built.clone());
    }
    chain
}

/// Reject caller paths that could escape the configured root
///
/// Paths are caller-relative by contract; a `..` segment would let a
/// relative path climb out of the prefix, so it is always an error.
pub fn assert_no_traversal(path: &str) -> StorageResult<()> {
    let traverses = path
        .split(['/', '\\'])
        .any(|segment| segment == "..");
    if traverses {
        return Err(StorageError::InvalidPath(path.to_string()));
    }
    Ok(())
}

//! # Backend Connectors
//!
//! Each connector owns a low-level transport and exposes the same minimal
//! operation set over already-prefixed paths. Connectors classify their
//! native failures into [`StorageError`](crate::errors::StorageError) kinds
//! before returning; nothing backend-specific crosses this boundary.
//!
//! Backend-specific capabilities (public URLs, presigned URLs) are separate
//! traits rather than an open-ended passthrough; a connector implements
//! them only when the backend genuinely offers the capability.

mod checksum;
pub mod local;

pub mod ftp;
#[cfg(feature = "sftp")]
pub mod sftp;

pub mod s3;

use std::collections::HashMap;
use std::io::Read;

use chrono::{DateTime, Utc};

use crate::config::ChecksumAlgo;
use crate::errors::StorageResult;
use crate::visibility::Visibility;

pub use checksum::hash_reader;
pub use local::LocalBackend;

pub use ftp::FtpBackend;
pub use s3::S3Backend;
#[cfg(feature = "sftp")]
pub use sftp::SftpBackend;

/// One listing entry, with whatever metadata the backend reported
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// Backend path (still prefixed)
    pub path: String,
    /// Whether the entry is a directory
    pub is_dir: bool,
    /// Size in bytes, files only
    pub size: Option<u64>,
    /// Last modification time, when reported
    pub last_modified: Option<DateTime<Utc>>,
}

impl Entry {
    /// Listing entry for a file
    pub fn file(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            is_dir: false,
            size: None,
            last_modified: None,
        }
    }

    /// Listing entry for a directory
    pub fn directory(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            is_dir: true,
            size: None,
            last_modified: None,
        }
    }

    /// Set the size
    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    /// Set the modification time
    pub fn with_modified(mut self, time: DateTime<Utc>) -> Self {
        self.last_modified = Some(time);
        self
    }
}

/// Per-write options resolved by the adapter from disk defaults
#[derive(Debug, Clone, Default)]
pub struct WriteOptions {
    /// Visibility for the written file
    pub visibility: Option<Visibility>,
    /// Visibility for directories created along the way
    pub directory_visibility: Option<Visibility>,
    /// Content type, when the caller knows it
    pub mime_type: Option<String>,
}

/// Backend trait for storage connectors
///
/// All paths are fully prefixed by the time they arrive here. Streams
/// returned or consumed are scoped resources: implementations release the
/// underlying descriptor or connection on every exit path.
pub trait StorageBackend: Send + Sync + std::fmt::Debug {
    /// Check whether a file exists at path
    fn file_exists(&self, path: &str) -> StorageResult<bool>;

    /// Check whether a directory exists at path
    fn directory_exists(&self, path: &str) -> StorageResult<bool>;

    /// Read the full contents at path
    fn read(&self, path: &str) -> StorageResult<Vec<u8>>;

    /// Open a readable stream over the contents at path
    fn read_stream(&self, path: &str) -> StorageResult<Box<dyn Read + Send>>;

    /// Write from a stream to path, creating parent directories as needed
    fn write(&self, path: &str, reader: &mut dyn Read, opts: &WriteOptions) -> StorageResult<()>;

    /// Delete the file at path
    fn delete(&self, path: &str) -> StorageResult<()>;

    /// Copy a file within the backend
    fn copy(&self, from: &str, to: &str, opts: &WriteOptions) -> StorageResult<()>;

    /// Move a file within the backend
    fn rename(&self, from: &str, to: &str, opts: &WriteOptions) -> StorageResult<()>;

    /// Create a directory (and parents)
    fn create_directory(&self, path: &str, opts: &WriteOptions) -> StorageResult<()>;

    /// Delete a directory and its contents
    fn delete_directory(&self, path: &str) -> StorageResult<()>;

    /// List entries under path
    fn list(&self, path: &str, recursive: bool) -> StorageResult<Vec<Entry>>;

    /// Size of the file at path
    fn file_size(&self, path: &str) -> StorageResult<u64>;

    /// Last modification time of the file at path
    fn last_modified(&self, path: &str) -> StorageResult<DateTime<Utc>>;

    /// MIME type of the file at path
    fn mime_type(&self, path: &str) -> StorageResult<String>;

    /// Visibility of the file at path
    fn visibility(&self, path: &str) -> StorageResult<Visibility>;

    /// Change the visibility of the file at path
    fn set_visibility(&self, path: &str, visibility: Visibility) -> StorageResult<()>;

    /// Checksum of the file at path
    fn checksum(&self, path: &str, algo: ChecksumAlgo) -> StorageResult<String>;
}

/// Capability: the backend can produce durable public URLs
pub trait PublicUrlGenerator: Send + Sync {
    /// Durable URL for the (prefixed) path
    fn public_url(&self, path: &str) -> StorageResult<String>;
}

/// Capability: the backend can produce expiring signed URLs
pub trait Presigner: Send + Sync {
    /// Signed GET URL for the (prefixed) path, valid for `expires_in`
    /// seconds; extra query parameters are folded into the signature.
    fn presign_get(
        &self,
        path: &str,
        expires_in: u32,
        custom_queries: Option<HashMap<String, String>>,
    ) -> StorageResult<String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_builders() {
        let entry = Entry::file("docs/a.txt").with_size(12);
        assert_eq!(entry.path, "docs/a.txt");
        assert!(!entry.is_dir);
        assert_eq!(entry.size, Some(12));

        let dir = Entry::directory("docs");
        assert!(dir.is_dir);
        assert_eq!(dir.size, None);
    }
}

//! # Local Filesystem Connector
//!
//! Operates on fully prefixed (rooted) paths with std::fs. Traversal honors
//! the disk's symlink policy, and visibility maps onto POSIX mode bits
//! where the platform has them.

use std::fs;
use std::io::{self, ErrorKind, Read};
use std::path::Path;

use chrono::{DateTime, Utc};
use log::debug;
use walkdir::WalkDir;

use super::{hash_reader, Entry, StorageBackend, WriteOptions};
use crate::config::{ChecksumAlgo, LinkPolicy};
use crate::errors::{StorageError, StorageResult};
use crate::mime::MimeResolver;
use crate::visibility::{UnixVisibility, Visibility};

/// Local filesystem storage connector
#[derive(Debug)]
pub struct LocalBackend {
    modes: UnixVisibility,
    links: LinkPolicy,
    mime: MimeResolver,
}

impl LocalBackend {
    /// Create a connector with the given mode table and symlink policy
    pub fn new(modes: UnixVisibility, links: LinkPolicy) -> Self {
        Self {
            modes,
            links,
            mime: MimeResolver::new(),
        }
    }

    /// Replace the MIME lookup collaborator
    pub fn with_mime_resolver(mut self, mime: MimeResolver) -> Self {
        self.mime = mime;
        self
    }

    fn ensure_parent(&self, path: &Path, opts: &WriteOptions) -> io::Result<()> {
        let Some(parent) = path.parent() else {
            return Ok(());
        };
        if parent.as_os_str().is_empty() || parent.exists() {
            return Ok(());
        }
        fs::create_dir_all(parent)?;
        if let Some(visibility) = opts.directory_visibility {
            self.apply_mode(parent, self.modes.dir_mode(visibility))?;
        }
        Ok(())
    }

    #[cfg(unix)]
    fn apply_mode(&self, path: &Path, mode: u32) -> io::Result<()> {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(mode))
    }

    #[cfg(not(unix))]
    fn apply_mode(&self, _path: &Path, _mode: u32) -> io::Result<()> {
        Ok(())
    }

    fn entry_for(&self, entry: &walkdir::DirEntry) -> Entry {
        let path = entry.path().to_string_lossy().into_owned();
        if entry.file_type().is_dir() {
            Entry::directory(path)
        } else {
            let mut file = Entry::file(path);
            if let Ok(meta) = entry.metadata() {
                file = file.with_size(meta.len());
                if let Some(modified) = meta.modified().ok().and_then(system_time_to_chrono) {
                    file = file.with_modified(modified);
                }
            }
            file
        }
    }
}

/// Convert system time to chrono DateTime
fn system_time_to_chrono(time: std::time::SystemTime) -> Option<DateTime<Utc>> {
    time.duration_since(std::time::UNIX_EPOCH)
        .ok()
        .and_then(|d| DateTime::from_timestamp(d.as_secs() as i64, d.subsec_nanos()))
}

fn classify_read(path: &str, e: io::Error) -> StorageError {
    if e.kind() == ErrorKind::NotFound {
        StorageError::not_found(path)
    } else {
        StorageError::unreadable(path, e)
    }
}

fn classify_write(path: &str, e: io::Error) -> StorageError {
    StorageError::unwritable(path, e)
}

impl StorageBackend for LocalBackend {
    fn file_exists(&self, path: &str) -> StorageResult<bool> {
        Ok(Path::new(path).is_file())
    }

    fn directory_exists(&self, path: &str) -> StorageResult<bool> {
        Ok(Path::new(path).is_dir())
    }

    fn read(&self, path: &str) -> StorageResult<Vec<u8>> {
        fs::read(path).map_err(|e| classify_read(path, e))
    }

    fn read_stream(&self, path: &str) -> StorageResult<Box<dyn Read + Send>> {
        let file = fs::File::open(path).map_err(|e| classify_read(path, e))?;
        Ok(Box::new(file))
    }

    fn write(&self, path: &str, reader: &mut dyn Read, opts: &WriteOptions) -> StorageResult<()> {
        let target = Path::new(path);
        self.ensure_parent(target, opts)
            .map_err(|e| classify_write(path, e))?;

        let mut file = fs::File::create(target).map_err(|e| classify_write(path, e))?;
        io::copy(reader, &mut file).map_err(|e| classify_write(path, e))?;

        if let Some(visibility) = opts.visibility {
            self.apply_mode(target, self.modes.file_mode(visibility))
                .map_err(|e| StorageError::UnableToSetVisibility {
                    path: path.to_string(),
                    reason: e.to_string(),
                })?;
        }
        Ok(())
    }

    fn delete(&self, path: &str) -> StorageResult<()> {
        fs::remove_file(path).map_err(|e| {
            if e.kind() == ErrorKind::NotFound {
                StorageError::not_found(path)
            } else {
                StorageError::DeleteFailed {
                    path: path.to_string(),
                    reason: e.to_string(),
                }
            }
        })
    }

    fn copy(&self, from: &str, to: &str, opts: &WriteOptions) -> StorageResult<()> {
        if !Path::new(from).is_file() {
            return Err(StorageError::not_found(from));
        }
        self.ensure_parent(Path::new(to), opts)
            .map_err(|e| StorageError::CopyFailed {
                from: from.to_string(),
                to: to.to_string(),
                reason: e.to_string(),
            })?;
        fs::copy(from, to)
            .map(|_| ())
            .map_err(|e| StorageError::CopyFailed {
                from: from.to_string(),
                to: to.to_string(),
                reason: e.to_string(),
            })
    }

    fn rename(&self, from: &str, to: &str, opts: &WriteOptions) -> StorageResult<()> {
        if !Path::new(from).exists() {
            return Err(StorageError::not_found(from));
        }
        self.ensure_parent(Path::new(to), opts)
            .map_err(|e| StorageError::MoveFailed {
                from: from.to_string(),
                to: to.to_string(),
                reason: e.to_string(),
            })?;
        fs::rename(from, to).map_err(|e| StorageError::MoveFailed {
            from: from.to_string(),
            to: to.to_string(),
            reason: e.to_string(),
        })
    }

    fn create_directory(&self, path: &str, opts: &WriteOptions) -> StorageResult<()> {
        fs::create_dir_all(path).map_err(|e| StorageError::DirectoryCreateFailed {
            path: path.to_string(),
            reason: e.to_string(),
        })?;
        if let Some(visibility) = opts.directory_visibility {
            self.apply_mode(Path::new(path), self.modes.dir_mode(visibility))
                .map_err(|e| StorageError::UnableToSetVisibility {
                    path: path.to_string(),
                    reason: e.to_string(),
                })?;
        }
        Ok(())
    }

    fn delete_directory(&self, path: &str) -> StorageResult<()> {
        if !Path::new(path).is_dir() {
            // Deleting an absent directory is a no-op
            return Ok(());
        }
        fs::remove_dir_all(path).map_err(|e| StorageError::DirectoryDeleteFailed {
            path: path.to_string(),
            reason: e.to_string(),
        })
    }

    fn list(&self, path: &str, recursive: bool) -> StorageResult<Vec<Entry>> {
        let base = Path::new(path);
        if !base.is_dir() {
            return Ok(Vec::new());
        }

        let mut walker = WalkDir::new(base).min_depth(1).follow_links(false);
        if !recursive {
            walker = walker.max_depth(1);
        }

        let mut entries = Vec::new();
        for item in walker {
            let item = item.map_err(|e| StorageError::unreadable(path, e))?;
            if item.file_type().is_symlink() {
                match self.links {
                    LinkPolicy::Skip => {
                        debug!("skipping symlink {}", item.path().display());
                        continue;
                    }
                    LinkPolicy::Disallow => {
                        return Err(StorageError::unreadable(
                            item.path().to_string_lossy(),
                            "symbolic link encountered",
                        ));
                    }
                }
            }
            entries.push(self.entry_for(&item));
        }
        Ok(entries)
    }

    fn file_size(&self, path: &str) -> StorageResult<u64> {
        let meta = fs::metadata(path).map_err(|e| classify_read(path, e))?;
        if !meta.is_file() {
            return Err(StorageError::not_found(path));
        }
        Ok(meta.len())
    }

    fn last_modified(&self, path: &str) -> StorageResult<DateTime<Utc>> {
        let meta = fs::metadata(path).map_err(|e| classify_read(path, e))?;
        meta.modified()
            .ok()
            .and_then(system_time_to_chrono)
            .ok_or_else(|| StorageError::unreadable(path, "modification time unavailable"))
    }

    fn mime_type(&self, path: &str) -> StorageResult<String> {
        if !Path::new(path).is_file() {
            return Err(StorageError::not_found(path));
        }
        self.mime
            .guess(path)
            .ok_or_else(|| StorageError::unreadable(path, "mime type unknown"))
    }

    #[cfg(unix)]
    fn visibility(&self, path: &str) -> StorageResult<Visibility> {
        use std::os::unix::fs::PermissionsExt;
        let meta = fs::metadata(path).map_err(|e| classify_read(path, e))?;
        let mode = meta.permissions().mode();
        Ok(if meta.is_dir() {
            self.modes.from_dir_mode(mode)
        } else {
            self.modes.from_file_mode(mode)
        })
    }

    #[cfg(not(unix))]
    fn visibility(&self, path: &str) -> StorageResult<Visibility> {
        if !Path::new(path).exists() {
            return Err(StorageError::not_found(path));
        }
        Ok(Visibility::Private)
    }

    fn set_visibility(&self, path: &str, visibility: Visibility) -> StorageResult<()> {
        let meta = fs::metadata(path).map_err(|e| classify_read(path, e))?;
        let mode = if meta.is_dir() {
            self.modes.dir_mode(visibility)
        } else {
            self.modes.file_mode(visibility)
        };
        self.apply_mode(Path::new(path), mode)
            .map_err(|e| StorageError::UnableToSetVisibility {
                path: path.to_string(),
                reason: e.to_string(),
            })
    }

    fn checksum(&self, path: &str, algo: ChecksumAlgo) -> StorageResult<String> {
        let mut file = fs::File::open(path).map_err(|e| classify_read(path, e))?;
        hash_reader(path, &mut file, algo)
    }
}

//! # Disk
//!
//! The capability surface applications are written against. A `Disk` binds
//! one connector to one configuration: every operation prefixes the caller
//! path, delegates to the backend, and then applies the disk's fail-soft or
//! fail-fast policy to the classified result.

use std::collections::HashMap;
use std::fs;
use std::io::{Cursor, Read};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde_json::Value;

use crate::backend::{Presigner, PublicUrlGenerator, StorageBackend, WriteOptions};
use crate::config::{ChecksumAlgo, DiskConfig};
use crate::errors::{StorageError, StorageResult};
use crate::path::{assert_no_traversal, PathPrefixer};
use crate::upload::PendingUpload;
use crate::visibility::Visibility;

/// Content accepted by [`Disk::put`]
pub enum Contents {
    /// Raw bytes, written as-is
    Bytes(Vec<u8>),
    /// A byte stream, preferred for large content since it is never
    /// buffered by the adapter
    Stream(Box<dyn Read + Send>),
    /// A pending upload handle, forwarded to [`Disk::put_file`]
    Upload(PendingUpload),
}

impl From<Vec<u8>> for Contents {
    fn from(bytes: Vec<u8>) -> Self {
        Contents::Bytes(bytes)
    }
}

impl From<&[u8]> for Contents {
    fn from(bytes: &[u8]) -> Self {
        Contents::Bytes(bytes.to_vec())
    }
}

impl From<&str> for Contents {
    fn from(text: &str) -> Self {
        Contents::Bytes(text.as_bytes().to_vec())
    }
}

impl From<String> for Contents {
    fn from(text: String) -> Self {
        Contents::Bytes(text.into_bytes())
    }
}

impl From<PendingUpload> for Contents {
    fn from(upload: PendingUpload) -> Self {
        Contents::Upload(upload)
    }
}

impl From<Box<dyn Read + Send>> for Contents {
    fn from(reader: Box<dyn Read + Send>) -> Self {
        Contents::Stream(reader)
    }
}

/// Caller-supplied expiring-URL builder, consulted before the backend
pub type TemporaryUrlBuilder =
    Arc<dyn Fn(&str, DateTime<Utc>) -> StorageResult<String> + Send + Sync>;

/// One configured disk: a connector plus path prefixing, visibility
/// defaults and the error policy
#[derive(Clone)]
pub struct Disk {
    backend: Arc<dyn StorageBackend>,
    urls: Option<Arc<dyn PublicUrlGenerator>>,
    presigner: Option<Arc<dyn Presigner>>,
    temporary_url_builder: Option<TemporaryUrlBuilder>,
    prefixer: PathPrefixer,
    config: DiskConfig,
}

impl std::fmt::Debug for Disk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Disk")
            .field("driver", &self.config.driver)
            .field("root", &self.config.effective_root())
            .finish()
    }
}

impl Disk {
    /// Bind a connector to its configuration
    pub fn new(backend: Arc<dyn StorageBackend>, config: DiskConfig) -> Self {
        let prefixer = PathPrefixer::new(config.effective_root());
        Self {
            backend,
            urls: None,
            presigner: None,
            temporary_url_builder: None,
            prefixer,
            config,
        }
    }

    /// Attach a native public-URL capability
    pub fn with_url_generator(mut self, urls: Arc<dyn PublicUrlGenerator>) -> Self {
        self.urls = Some(urls);
        self
    }

    /// Attach a native presigning capability
    pub fn with_presigner(mut self, presigner: Arc<dyn Presigner>) -> Self {
        self.presigner = Some(presigner);
        self
    }

    /// Install a caller-supplied expiring-URL builder
    pub fn with_temporary_url_builder(mut self, builder: TemporaryUrlBuilder) -> Self {
        self.temporary_url_builder = Some(builder);
        self
    }

    /// The disk's configuration
    pub fn config(&self) -> &DiskConfig {
        &self.config
    }

    /// The fully prefixed backend path for `path`, for diagnostics
    pub fn path(&self, path: &str) -> String {
        self.prefixer.prefix_path(path)
    }

    fn full_path(&self, path: &str) -> StorageResult<String> {
        assert_no_traversal(path)?;
        Ok(self.prefixer.prefix_path(path))
    }

    /// Apply the disk's error policy: swallow classified failures into the
    /// fallback unless the kind always raises or `throw` is set.
    fn guard<T>(&self, operation: &str, fallback: T, result: StorageResult<T>) -> StorageResult<T> {
        match result {
            Ok(value) => Ok(value),
            Err(e) if e.always_raised() || self.config.throw => Err(e),
            Err(e) => {
                warn!("{} swallowed: {}", operation, e);
                Ok(fallback)
            }
        }
    }

    fn write_options(&self) -> WriteOptions {
        WriteOptions {
            visibility: self.config.visibility,
            directory_visibility: self
                .config
                .directory_visibility
                .or(self.config.visibility),
            mime_type: None,
        }
    }

    fn write_options_with(&self, visibility: Visibility) -> WriteOptions {
        WriteOptions {
            visibility: Some(visibility),
            ..self.write_options()
        }
    }

    // ---- existence -------------------------------------------------------

    fn probe(&self, path: &str, f: impl FnOnce(&str) -> StorageResult<bool>) -> bool {
        match assert_no_traversal(path) {
            Ok(()) => match f(&self.prefixer.prefix_path(path)) {
                Ok(found) => found,
                Err(e) => {
                    debug!("existence probe for {} failed: {}", path, e);
                    false
                }
            },
            Err(_) => false,
        }
    }

    /// Whether a file or directory exists at `path`; never fails
    pub fn exists(&self, path: &str) -> bool {
        self.file_exists(path) || self.directory_exists(path)
    }

    /// Inverse of [`exists`](Self::exists)
    pub fn missing(&self, path: &str) -> bool {
        !self.exists(path)
    }

    /// Whether a file exists at `path`; never fails
    pub fn file_exists(&self, path: &str) -> bool {
        self.probe(path, |p| self.backend.file_exists(p))
    }

    /// Inverse of [`file_exists`](Self::file_exists)
    pub fn file_missing(&self, path: &str) -> bool {
        !self.file_exists(path)
    }

    /// Whether a directory exists at `path`; never fails
    pub fn directory_exists(&self, path: &str) -> bool {
        self.probe(path, |p| self.backend.directory_exists(p))
    }

    /// Inverse of [`directory_exists`](Self::directory_exists)
    pub fn directory_missing(&self, path: &str) -> bool {
        !self.directory_exists(path)
    }

    // ---- reads -----------------------------------------------------------

    /// Full contents at `path`, or `None` on a swallowed failure
    pub fn get(&self, path: &str) -> StorageResult<Option<Vec<u8>>> {
        let full = self.full_path(path)?;
        self.guard("get", None, self.backend.read(&full).map(Some))
    }

    /// Contents decoded as UTF-8
    pub fn get_string(&self, path: &str) -> StorageResult<Option<String>> {
        let full = self.full_path(path)?;
        let result = self.backend.read(&full).and_then(|bytes| {
            String::from_utf8(bytes).map_err(|e| StorageError::unreadable(&full, e))
        });
        self.guard("get_string", None, result.map(Some))
    }

    /// Contents decoded as JSON; malformed documents read as `None`
    pub fn json(&self, path: &str) -> StorageResult<Option<Value>> {
        Ok(self
            .get_string(path)?
            .and_then(|text| serde_json::from_str(&text).ok()))
    }

    /// A readable stream over the contents at `path`
    pub fn read_stream(&self, path: &str) -> StorageResult<Option<Box<dyn Read + Send>>> {
        let full = self.full_path(path)?;
        self.guard("read_stream", None, self.backend.read_stream(&full).map(Some))
    }

    // ---- writes ----------------------------------------------------------

    /// Write `contents` to `path` with the disk's default visibility
    pub fn put(&self, path: &str, contents: impl Into<Contents>) -> StorageResult<bool> {
        self.put_inner(path, contents.into(), self.write_options())
    }

    /// Write `contents` to `path` with an explicit visibility
    pub fn put_with_visibility(
        &self,
        path: &str,
        contents: impl Into<Contents>,
        visibility: Visibility,
    ) -> StorageResult<bool> {
        self.put_inner(path, contents.into(), self.write_options_with(visibility))
    }

    fn put_inner(&self, path: &str, contents: Contents, opts: WriteOptions) -> StorageResult<bool> {
        match contents {
            Contents::Bytes(bytes) => {
                let mut reader = Cursor::new(bytes);
                self.write_with(path, &mut reader, opts)
            }
            Contents::Stream(mut reader) => self.write_with(path, &mut *reader, opts),
            Contents::Upload(upload) => {
                // Pending uploads go through the generated-name flow
                self.store_upload(path, &upload, &upload.generated_name(), opts)
                    .map(|stored| stored.is_some())
            }
        }
    }

    /// Stream `reader` into `path`
    pub fn write_stream(&self, path: &str, reader: &mut dyn Read) -> StorageResult<bool> {
        self.write_with(path, reader, self.write_options())
    }

    fn write_with(
        &self,
        path: &str,
        reader: &mut dyn Read,
        opts: WriteOptions,
    ) -> StorageResult<bool> {
        let full = self.full_path(path)?;
        self.guard("put", false, self.backend.write(&full, reader, &opts).map(|_| true))
    }

    /// Store a pending upload under `dir` with a generated name; returns the
    /// stored caller-relative path
    pub fn put_file(&self, dir: &str, file: &PendingUpload) -> StorageResult<Option<String>> {
        self.store_upload(dir, file, &file.generated_name(), self.write_options())
    }

    /// Store a pending upload under `dir` as `name`
    pub fn put_file_as(
        &self,
        dir: &str,
        file: &PendingUpload,
        name: &str,
    ) -> StorageResult<Option<String>> {
        self.store_upload(dir, file, name, self.write_options())
    }

    fn store_upload(
        &self,
        dir: &str,
        file: &PendingUpload,
        name: &str,
        opts: WriteOptions,
    ) -> StorageResult<Option<String>> {
        let target = PathPrefixer::join(dir, name);
        let full = self.full_path(&target)?;

        // The source handle is scoped to this block and closed on every
        // exit path.
        let result = fs::File::open(file.path())
            .map_err(|e| StorageError::unreadable(file.path().to_string_lossy(), e))
            .and_then(|mut handle| self.backend.write(&full, &mut handle, &opts));

        self.guard("put_file", None, result.map(|_| Some(target)))
    }

    /// Append `data` to `path`, separated by a newline; creates the file
    /// when absent
    pub fn append(&self, path: &str, data: &str) -> StorageResult<bool> {
        self.append_with_separator(path, data, "\n")
    }

    /// Append with an explicit separator
    pub fn append_with_separator(
        &self,
        path: &str,
        data: &str,
        separator: &str,
    ) -> StorageResult<bool> {
        self.read_modify_write(path, |existing| match existing {
            Some(mut bytes) => {
                bytes.extend_from_slice(separator.as_bytes());
                bytes.extend_from_slice(data.as_bytes());
                bytes
            }
            None => data.as_bytes().to_vec(),
        })
    }

    /// Prepend `data` to `path`, separated by a newline; creates the file
    /// when absent
    pub fn prepend(&self, path: &str, data: &str) -> StorageResult<bool> {
        self.prepend_with_separator(path, data, "\n")
    }

    /// Prepend with an explicit separator
    pub fn prepend_with_separator(
        &self,
        path: &str,
        data: &str,
        separator: &str,
    ) -> StorageResult<bool> {
        self.read_modify_write(path, |existing| match existing {
            Some(bytes) => {
                let mut combined = data.as_bytes().to_vec();
                combined.extend_from_slice(separator.as_bytes());
                combined.extend(bytes);
                combined
            }
            None => data.as_bytes().to_vec(),
        })
    }

    /// Non-atomic read-modify-write; a concurrent writer can interleave
    fn read_modify_write(
        &self,
        path: &str,
        apply: impl FnOnce(Option<Vec<u8>>) -> Vec<u8>,
    ) -> StorageResult<bool> {
        let full = self.full_path(path)?;
        let result = (|| {
            let existing = match self.backend.read(&full) {
                Ok(bytes) => Some(bytes),
                Err(StorageError::NotFound { .. }) => None,
                Err(e) => return Err(e),
            };
            let combined = apply(existing);
            self.backend
                .write(&full, &mut Cursor::new(combined), &self.write_options())
        })();
        self.guard("append", false, result.map(|_| true))
    }

    // ---- deletes, copies, moves -----------------------------------------

    /// Delete one path
    pub fn delete(&self, path: &str) -> StorageResult<bool> {
        self.delete_all([path])
    }

    /// Delete several paths; keeps going after per-path failures and
    /// reports `false` when any of them failed
    pub fn delete_all<I, S>(&self, paths: I) -> StorageResult<bool>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut success = true;
        for path in paths {
            let full = self.full_path(path.as_ref())?;
            match self.backend.delete(&full) {
                Ok(()) => {}
                Err(e) if e.always_raised() || self.config.throw => return Err(e),
                Err(e) => {
                    warn!("delete {} swallowed: {}", path.as_ref(), e);
                    success = false;
                }
            }
        }
        Ok(success)
    }

    /// Copy `from` to `to`
    pub fn copy(&self, from: &str, to: &str) -> StorageResult<bool> {
        let from_full = self.full_path(from)?;
        let to_full = self.full_path(to)?;
        self.guard(
            "copy",
            false,
            self.backend
                .copy(&from_full, &to_full, &self.write_options())
                .map(|_| true),
        )
    }

    /// Move `from` to `to`
    pub fn rename(&self, from: &str, to: &str) -> StorageResult<bool> {
        let from_full = self.full_path(from)?;
        let to_full = self.full_path(to)?;
        self.guard(
            "move",
            false,
            self.backend
                .rename(&from_full, &to_full, &self.write_options())
                .map(|_| true),
        )
    }

    // ---- visibility ------------------------------------------------------

    /// Visibility of `path`
    pub fn get_visibility(&self, path: &str) -> StorageResult<Visibility> {
        let full = self.full_path(path)?;
        self.backend.visibility(&full)
    }

    /// Change the visibility of `path`
    pub fn set_visibility(&self, path: &str, visibility: Visibility) -> StorageResult<bool> {
        let full = self.full_path(path)?;
        self.guard(
            "set_visibility",
            false,
            self.backend.set_visibility(&full, visibility).map(|_| true),
        )
    }

    // ---- metadata --------------------------------------------------------

    /// Size in bytes of the file at `path`
    pub fn size(&self, path: &str) -> StorageResult<Option<u64>> {
        let full = self.full_path(path)?;
        self.guard("size", None, self.backend.file_size(&full).map(Some))
    }

    /// Last modification time of the file at `path`
    pub fn last_modified(&self, path: &str) -> StorageResult<Option<DateTime<Utc>>> {
        let full = self.full_path(path)?;
        self.guard(
            "last_modified",
            None,
            self.backend.last_modified(&full).map(Some),
        )
    }

    /// MIME type of the file at `path`
    pub fn mime_type(&self, path: &str) -> StorageResult<Option<String>> {
        let full = self.full_path(path)?;
        self.guard("mime_type", None, self.backend.mime_type(&full).map(Some))
    }

    /// Checksum with the disk's configured algorithm
    pub fn checksum(&self, path: &str) -> StorageResult<Option<String>> {
        self.checksum_with(path, self.config.checksum)
    }

    /// Checksum with an explicit algorithm
    pub fn checksum_with(&self, path: &str, algo: ChecksumAlgo) -> StorageResult<Option<String>> {
        let full = self.full_path(path)?;
        self.guard("checksum", None, self.backend.checksum(&full, algo).map(Some))
    }

    // ---- listings --------------------------------------------------------

    /// Files directly under `dir`, caller-relative and sorted
    pub fn files(&self, dir: &str) -> StorageResult<Vec<String>> {
        self.list_paths(dir, false, false)
    }

    /// All files under `dir`, caller-relative and sorted
    pub fn all_files(&self, dir: &str) -> StorageResult<Vec<String>> {
        self.list_paths(dir, true, false)
    }

    /// Directories directly under `dir`, in backend order
    pub fn directories(&self, dir: &str) -> StorageResult<Vec<String>> {
        self.list_paths(dir, false, true)
    }

    /// All directories under `dir`, in backend order
    pub fn all_directories(&self, dir: &str) -> StorageResult<Vec<String>> {
        self.list_paths(dir, true, true)
    }

    fn list_paths(&self, dir: &str, recursive: bool, dirs: bool) -> StorageResult<Vec<String>> {
        let full = self.full_path(dir)?;
        let entries = self.guard("list", Vec::new(), self.backend.list(&full, recursive))?;
        let mut paths: Vec<String> = entries
            .into_iter()
            .filter(|e| e.is_dir == dirs)
            .map(|e| self.prefixer.strip_prefix(&e.path))
            .collect();
        if !dirs {
            // File listings are sorted for deterministic output; directory
            // listings keep backend order
            paths.sort();
        }
        Ok(paths)
    }

    // ---- directories -----------------------------------------------------

    /// Create the directory at `path`, parents included; idempotent
    pub fn make_directory(&self, path: &str) -> StorageResult<bool> {
        let full = self.full_path(path)?;
        self.guard(
            "make_directory",
            false,
            self.backend
                .create_directory(&full, &self.write_options())
                .map(|_| true),
        )
    }

    /// Delete the directory at `path` and everything under it
    pub fn delete_directory(&self, path: &str) -> StorageResult<bool> {
        let full = self.full_path(path)?;
        self.guard(
            "delete_directory",
            false,
            self.backend.delete_directory(&full).map(|_| true),
        )
    }

    // ---- URLs ------------------------------------------------------------

    /// Durable URL for `path`
    ///
    /// Dispatch order: a configured `url` base wins; then a backend with a
    /// native URL capability; FTP/SFTP fall back to the raw prefixed path;
    /// local synthesizes the `/storage` convention. Anything else cannot
    /// produce URLs.
    pub fn url(&self, path: &str) -> StorageResult<String> {
        assert_no_traversal(path)?;

        if let Some(base) = &self.config.url {
            return Ok(concat_url(base, &self.scoped_relative(path)));
        }
        if let Some(urls) = &self.urls {
            return urls.public_url(&self.prefixer.prefix_path(path));
        }
        match self.config.driver.as_str() {
            "ftp" | "sftp" => Ok(self.prefixer.prefix_path(path)),
            "local" => Ok(local_url(&self.scoped_relative(path))),
            _ => Err(StorageError::UnsupportedOperation {
                operation: "url",
                driver: self.config.driver.clone(),
            }),
        }
    }

    /// The path as seen from the disk's scope: the configured `prefix`
    /// participates in URLs, the backend root does not.
    fn scoped_relative(&self, path: &str) -> String {
        match self.config.prefix.as_deref() {
            Some(prefix) => PathPrefixer::join(prefix, path),
            None => path.trim_start_matches('/').to_string(),
        }
    }

    /// Expiring URL for `path`
    pub fn temporary_url(&self, path: &str, expires_at: DateTime<Utc>) -> StorageResult<String> {
        self.temporary_url_with(path, expires_at, None)
    }

    /// Expiring URL with extra query parameters folded into the signature
    pub fn temporary_url_with(
        &self,
        path: &str,
        expires_at: DateTime<Utc>,
        custom_queries: Option<HashMap<String, String>>,
    ) -> StorageResult<String> {
        assert_no_traversal(path)?;

        if let Some(builder) = &self.temporary_url_builder {
            return builder(path, expires_at);
        }

        let presigner = self
            .presigner
            .as_ref()
            .ok_or_else(|| StorageError::UnsupportedOperation {
                operation: "temporary_url",
                driver: self.config.driver.clone(),
            })?;

        let expires_in = (expires_at - Utc::now()).num_seconds().max(1) as u32;
        let full = self.prefixer.prefix_path(path);
        let url = presigner.presign_get(&full, expires_in, custom_queries)?;

        Ok(match &self.config.temporary_url {
            Some(base) => replace_base_url(&url, base),
            None => url,
        })
    }

    /// Whether this disk can produce expiring URLs
    pub fn provides_temporary_urls(&self) -> bool {
        self.presigner.is_some() || self.temporary_url_builder.is_some()
    }
}

fn concat_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

/// The `/storage` URL convention for local disks, collapsing an accidental
/// `public/` scope segment
fn local_url(path: &str) -> String {
    let url = format!("/storage/{}", path.trim_start_matches('/'));
    if url.contains("/storage/public/") {
        url.replacen("/public/", "/", 1)
    } else {
        url
    }
}

/// Swap the scheme/host/port of `url` for `base`, keeping path and query
fn replace_base_url(url: &str, base: &str) -> String {
    let base = base.trim_end_matches('/');
    let path_start = url
        .find("://")
        .and_then(|i| url[i + 3..].find('/').map(|j| i + 3 + j));
    match path_start {
        Some(start) => format!("{}{}", base, &url[start..]),
        None => format!("{}/{}", base, url.trim_start_matches('/')),
    }
}

//! # FTP Connector
//!
//! Drives a remote FTP server over a lazily established control connection.
//! Listings use MLSD facts; visibility rides on `SITE CHMOD` and the
//! `UNIX.mode` fact. A dropped control connection is discarded and
//! re-established on the next operation.

mod client;

use std::io::{Cursor, Read};
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, Utc};
use log::debug;

pub use client::{FtpClient, FtpError};

use super::{hash_reader, Entry, StorageBackend, WriteOptions};
use crate::config::{ChecksumAlgo, DiskConfig};
use crate::errors::{StorageError, StorageResult};
use crate::mime::MimeResolver;
use crate::path::{ancestor_chain, PathPrefixer};
use crate::visibility::{UnixVisibility, Visibility};

/// FTP storage connector
#[derive(Debug)]
pub struct FtpBackend {
    host: String,
    port: u16,
    username: String,
    password: String,
    timeout: Duration,
    modes: UnixVisibility,
    mime: MimeResolver,
    conn: Mutex<Option<FtpClient>>,
}

impl FtpBackend {
    /// Create a connector; the control connection is opened on first use
    pub fn new(
        host: impl Into<String>,
        port: u16,
        username: impl Into<String>,
        password: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            username: username.into(),
            password: password.into(),
            timeout,
            modes: UnixVisibility::default(),
            mime: MimeResolver::new(),
            conn: Mutex::new(None),
        }
    }

    /// Build a connector from a disk configuration
    pub fn from_config(config: &DiskConfig) -> StorageResult<Self> {
        let host = config.require("host", &config.host)?;
        let username = config.require("username", &config.username)?;
        let password = config.password.as_deref().unwrap_or("");
        let mut backend = Self::new(
            host,
            config.port.unwrap_or(21),
            username,
            password,
            Duration::from_secs(config.timeout_secs),
        );
        backend.modes = config.unix_visibility();
        Ok(backend)
    }

    /// Replace the unix mode table
    pub fn with_modes(mut self, modes: UnixVisibility) -> Self {
        self.modes = modes;
        self
    }

    /// Replace the MIME lookup collaborator
    pub fn with_mime_resolver(mut self, mime: MimeResolver) -> Self {
        self.mime = mime;
        self
    }

    /// Run an operation against the (re)established control connection
    fn run<T>(&self, f: impl FnOnce(&mut FtpClient) -> Result<T, FtpError>) -> Result<T, FtpError> {
        let mut guard = self.conn.lock().map_err(|_| {
            FtpError::Io(std::io::Error::other("connection lock poisoned"))
        })?;

        if guard.is_none() {
            debug!("ftp connecting to {}:{}", self.host, self.port);
            let mut client = FtpClient::connect(&self.host, self.port, self.timeout)?;
            client.login(&self.username, &self.password)?;
            *guard = Some(client);
        }

        let client = match guard.as_mut() {
            Some(client) => client,
            None => {
                return Err(FtpError::Io(std::io::Error::other(
                    "connection unavailable",
                )))
            }
        };
        let result = f(client);
        if matches!(result, Err(FtpError::Io(_))) {
            // The control connection state is unknown; reconnect next time
            *guard = None;
        }
        result
    }

    /// Create every segment of `dir`, tolerating segments that already exist
    fn make_directories(&self, dir: &str) -> Result<(), FtpError> {
        let chain = ancestor_chain(dir);
        if chain.is_empty() {
            return Ok(());
        }
        self.run(|client| {
            for target in &chain {
                // Already-existing directories answer 550; that is fine
                let reply = client.command(&format!("MKD {}", target))?;
                if !reply.is_positive() {
                    debug!("ftp MKD {} -> {}", target, reply.code);
                }
            }
            Ok(())
        })
    }

    fn ensure_parents(&self, path: &str) -> Result<(), FtpError> {
        match path.rsplit_once('/') {
            Some((parents, _)) => self.make_directories(parents),
            None => Ok(()),
        }
    }

    fn facts_for(&self, path: &str) -> Result<Option<MlsdEntry>, FtpError> {
        match self.run(|client| client.mlst(path)) {
            Ok(line) => Ok(parse_facts(&line, path)),
            Err(FtpError::UnexpectedReply { code: 550, .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn list_flat(&self, path: &str) -> Result<Vec<MlsdEntry>, FtpError> {
        let lines = self.run(|client| client.mlsd(path))?;
        Ok(lines
            .iter()
            .filter_map(|line| parse_mlsd_line(line, path))
            .collect())
    }
}

impl Drop for FtpBackend {
    fn drop(&mut self) {
        if let Ok(mut guard) = self.conn.lock() {
            if let Some(client) = guard.as_mut() {
                let _ = client.quit();
            }
        }
    }
}

/// One entry parsed from MLSD/MLST facts
#[derive(Debug, Clone)]
struct MlsdEntry {
    path: String,
    is_dir: bool,
    size: Option<u64>,
    modified: Option<DateTime<Utc>>,
    mode: Option<u32>,
}

fn parse_mlsd_line(line: &str, dir: &str) -> Option<MlsdEntry> {
    let (facts, name) = line.split_once(' ')?;
    // cdir/pdir describe the listing itself, not its contents
    if facts.contains("type=cdir") || facts.contains("type=pdir") {
        return None;
    }
    parse_facts_with_name(facts, &PathPrefixer::join(dir, name.trim()))
}

fn parse_facts(line: &str, path: &str) -> Option<MlsdEntry> {
    let facts = line.split_once(' ').map(|(f, _)| f).unwrap_or(line);
    parse_facts_with_name(facts, path)
}

fn parse_facts_with_name(facts: &str, path: &str) -> Option<MlsdEntry> {
    let mut entry = MlsdEntry {
        path: path.to_string(),
        is_dir: false,
        size: None,
        modified: None,
        mode: None,
    };
    for fact in facts.split(';').filter(|f| !f.is_empty()) {
        let Some((key, value)) = fact.split_once('=') else {
            continue;
        };
        match key.to_ascii_lowercase().as_str() {
            "type" => entry.is_dir = value.eq_ignore_ascii_case("dir"),
            "size" => entry.size = value.parse().ok(),
            "modify" => entry.modified = parse_mdtm(value),
            "unix.mode" => entry.mode = u32::from_str_radix(value, 8).ok(),
            _ => {}
        }
    }
    Some(entry)
}

/// Parse a YYYYMMDDHHMMSS timestamp (MDTM reply / MLSD modify fact)
fn parse_mdtm(value: &str) -> Option<DateTime<Utc>> {
    let value = value.split('.').next()?;
    NaiveDateTime::parse_from_str(value.trim(), "%Y%m%d%H%M%S")
        .ok()
        .map(|naive| DateTime::from_naive_utc_and_offset(naive, Utc))
}

fn classify(
    e: FtpError,
    path: &str,
    fallback: impl FnOnce(String, String) -> StorageError,
) -> StorageError {
    match e {
        FtpError::UnexpectedReply { code: 550, .. } => StorageError::not_found(path),
        other => fallback(path.to_string(), other.to_string()),
    }
}

impl StorageBackend for FtpBackend {
    fn file_exists(&self, path: &str) -> StorageResult<bool> {
        let facts = self
            .facts_for(path)
            .map_err(|e| StorageError::unreadable(path, e))?;
        Ok(facts.map(|f| !f.is_dir).unwrap_or(false))
    }

    fn directory_exists(&self, path: &str) -> StorageResult<bool> {
        let facts = self
            .facts_for(path)
            .map_err(|e| StorageError::unreadable(path, e))?;
        Ok(facts.map(|f| f.is_dir).unwrap_or(false))
    }

    fn read(&self, path: &str) -> StorageResult<Vec<u8>> {
        self.run(|client| client.retr(path))
            .map_err(|e| classify(e, path, |path, reason| StorageError::Unreadable { path, reason }))
    }

    fn read_stream(&self, path: &str) -> StorageResult<Box<dyn Read + Send>> {
        // The control connection cannot be shared with a long-lived data
        // stream, so reads are spooled before handing out a reader.
        let bytes = self.read(path)?;
        Ok(Box::new(Cursor::new(bytes)))
    }

    fn write(&self, path: &str, reader: &mut dyn Read, opts: &WriteOptions) -> StorageResult<()> {
        self.ensure_parents(path)
            .map_err(|e| StorageError::unwritable(path, e))?;
        self.run(|client| client.stor(path, reader))
            .map_err(|e| classify(e, path, |path, reason| StorageError::Unwritable { path, reason }))?;

        if let Some(visibility) = opts.visibility {
            self.set_visibility(path, visibility)?;
        }
        Ok(())
    }

    fn delete(&self, path: &str) -> StorageResult<()> {
        self.run(|client| client.expect(&format!("DELE {}", path), &[250]).map(|_| ()))
            .map_err(|e| classify(e, path, |path, reason| StorageError::DeleteFailed { path, reason }))
    }

    fn copy(&self, from: &str, to: &str, opts: &WriteOptions) -> StorageResult<()> {
        let bytes = self.read(from).map_err(|e| match e {
            StorageError::NotFound { .. } => e,
            other => StorageError::CopyFailed {
                from: from.to_string(),
                to: to.to_string(),
                reason: other.to_string(),
            },
        })?;
        let mut reader = Cursor::new(bytes);
        self.write(to, &mut reader, opts)
            .map_err(|e| StorageError::CopyFailed {
                from: from.to_string(),
                to: to.to_string(),
                reason: e.to_string(),
            })
    }

    fn rename(&self, from: &str, to: &str, _opts: &WriteOptions) -> StorageResult<()> {
        self.ensure_parents(to)
            .map_err(|e| StorageError::unwritable(to, e))?;
        self.run(|client| {
            client.expect(&format!("RNFR {}", from), &[350])?;
            client.expect(&format!("RNTO {}", to), &[250])?;
            Ok(())
        })
        .map_err(|e| match e {
            FtpError::UnexpectedReply { code: 550, .. } => StorageError::not_found(from),
            other => StorageError::MoveFailed {
                from: from.to_string(),
                to: to.to_string(),
                reason: other.to_string(),
            },
        })
    }

    fn create_directory(&self, path: &str, _opts: &WriteOptions) -> StorageResult<()> {
        self.make_directories(path)
            .map_err(|e| StorageError::DirectoryCreateFailed {
                path: path.to_string(),
                reason: e.to_string(),
            })?;
        if !self.directory_exists(path)? {
            return Err(StorageError::DirectoryCreateFailed {
                path: path.to_string(),
                reason: "server did not create the directory".to_string(),
            });
        }
        Ok(())
    }

    fn delete_directory(&self, path: &str) -> StorageResult<()> {
        let entries = self.list(path, true)?;

        // Files first, then directories deepest-first, then the root
        for entry in entries.iter().filter(|e| !e.is_dir) {
            self.delete(&entry.path)?;
        }
        let mut dirs: Vec<&Entry> = entries.iter().filter(|e| e.is_dir).collect();
        dirs.sort_by_key(|e| std::cmp::Reverse(e.path.len()));
        for dir in dirs {
            self.run(|client| client.expect(&format!("RMD {}", dir.path), &[250]).map(|_| ()))
                .map_err(|e| StorageError::DirectoryDeleteFailed {
                    path: dir.path.clone(),
                    reason: e.to_string(),
                })?;
        }

        match self.run(|client| client.expect(&format!("RMD {}", path), &[250]).map(|_| ())) {
            Ok(()) => Ok(()),
            // Deleting an absent directory is a no-op
            Err(FtpError::UnexpectedReply { code: 550, .. }) => Ok(()),
            Err(e) => Err(StorageError::DirectoryDeleteFailed {
                path: path.to_string(),
                reason: e.to_string(),
            }),
        }
    }

    fn list(&self, path: &str, recursive: bool) -> StorageResult<Vec<Entry>> {
        let mut pending = vec![path.to_string()];
        let mut entries = Vec::new();

        while let Some(dir) = pending.pop() {
            let listed = match self.list_flat(&dir) {
                Ok(listed) => listed,
                // A missing listing root yields an empty listing
                Err(FtpError::UnexpectedReply { code: 550, .. }) => continue,
                Err(e) => return Err(StorageError::unreadable(&dir, e)),
            };
            for item in listed {
                if item.is_dir && recursive {
                    pending.push(item.path.clone());
                }
                let mut entry = if item.is_dir {
                    Entry::directory(item.path)
                } else {
                    Entry::file(item.path)
                };
                entry.size = item.size;
                entry.last_modified = item.modified;
                entries.push(entry);
            }
        }
        Ok(entries)
    }

    fn file_size(&self, path: &str) -> StorageResult<u64> {
        let reply = self
            .run(|client| client.expect(&format!("SIZE {}", path), &[213]))
            .map_err(|e| classify(e, path, |path, reason| StorageError::Unreadable { path, reason }))?;
        reply
            .text
            .trim()
            .parse()
            .map_err(|_| StorageError::unreadable(path, "malformed SIZE reply"))
    }

    fn last_modified(&self, path: &str) -> StorageResult<DateTime<Utc>> {
        let reply = self
            .run(|client| client.expect(&format!("MDTM {}", path), &[213]))
            .map_err(|e| classify(e, path, |path, reason| StorageError::Unreadable { path, reason }))?;
        parse_mdtm(reply.text.trim())
            .ok_or_else(|| StorageError::unreadable(path, "malformed MDTM reply"))
    }

    fn mime_type(&self, path: &str) -> StorageResult<String> {
        if !self.file_exists(path)? {
            return Err(StorageError::not_found(path));
        }
        self.mime
            .guess(path)
            .ok_or_else(|| StorageError::unreadable(path, "mime type unknown"))
    }

    fn visibility(&self, path: &str) -> StorageResult<Visibility> {
        let facts = self
            .facts_for(path)
            .map_err(|e| StorageError::unreadable(path, e))?
            .ok_or_else(|| StorageError::not_found(path))?;

        // Servers that do not advertise UNIX.mode read back as private
        Ok(match facts.mode {
            Some(mode) if facts.is_dir => self.modes.from_dir_mode(mode),
            Some(mode) => self.modes.from_file_mode(mode),
            None => Visibility::Private,
        })
    }

    fn set_visibility(&self, path: &str, visibility: Visibility) -> StorageResult<()> {
        let mode = self.modes.file_mode(visibility);
        self.run(|client| {
            client
                .expect(&format!("SITE CHMOD {:o} {}", mode, path), &[200, 250])
                .map(|_| ())
        })
        .map_err(|e| match e {
            FtpError::UnexpectedReply { code: 550, .. } => StorageError::not_found(path),
            other => StorageError::UnableToSetVisibility {
                path: path.to_string(),
                reason: other.to_string(),
            },
        })
    }

    fn checksum(&self, path: &str, algo: ChecksumAlgo) -> StorageResult<String> {
        let bytes = self.read(path)?;
        hash_reader(path, &mut Cursor::new(bytes), algo)
    }
}

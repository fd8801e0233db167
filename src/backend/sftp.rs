//! # SFTP Connector
//!
//! ssh2-backed connector, available behind the `sftp` cargo feature so the
//! default build carries no libssh2 linkage. Visibility maps onto remote
//! mode bits via `setstat`.

use std::io::{self, Cursor, Read};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::debug;
use ssh2::{ErrorCode, FileStat, Session, Sftp};

use super::{hash_reader, Entry, StorageBackend, WriteOptions};
use crate::config::{ChecksumAlgo, DiskConfig};
use crate::errors::{StorageError, StorageResult};
use crate::mime::MimeResolver;
use crate::path::ancestor_chain;
use crate::visibility::{UnixVisibility, Visibility};

// libssh2 SFTP status codes for missing remote paths
const FX_NO_SUCH_FILE: i32 = 2;
const FX_NO_SUCH_PATH: i32 = 10;

/// SFTP authentication material
#[derive(Debug, Clone)]
enum Auth {
    Password(String),
    PrivateKey {
        path: PathBuf,
        passphrase: Option<String>,
    },
}

/// SFTP storage connector
pub struct SftpBackend {
    host: String,
    port: u16,
    username: String,
    auth: Auth,
    timeout: Duration,
    modes: UnixVisibility,
    mime: MimeResolver,
    conn: Mutex<Option<(Session, Sftp)>>,
}

impl std::fmt::Debug for SftpBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SftpBackend")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .finish()
    }
}

impl SftpBackend {
    /// Build a connector from a disk configuration
    pub fn from_config(config: &DiskConfig) -> StorageResult<Self> {
        let host = config.require("host", &config.host)?;
        let username = config.require("username", &config.username)?;

        let auth = match (&config.private_key, &config.password) {
            (Some(key), _) => Auth::PrivateKey {
                path: PathBuf::from(key),
                passphrase: config.passphrase.clone(),
            },
            (None, Some(password)) => Auth::Password(password.clone()),
            (None, None) => {
                return Err(StorageError::Configuration(format!(
                    "disk driver '{}' requires 'password' or 'private_key'",
                    config.driver
                )))
            }
        };

        Ok(Self {
            host: host.to_string(),
            port: config.port.unwrap_or(22),
            username: username.to_string(),
            auth,
            timeout: Duration::from_secs(config.timeout_secs),
            modes: config.unix_visibility(),
            mime: MimeResolver::new(),
            conn: Mutex::new(None),
        })
    }

    fn connect(&self) -> StorageResult<(Session, Sftp)> {
        debug!("sftp connecting to {}:{}", self.host, self.port);
        let addr = (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|e| StorageError::Configuration(format!("sftp host: {}", e)))?
            .next()
            .ok_or_else(|| {
                StorageError::Configuration(format!("sftp host '{}' did not resolve", self.host))
            })?;
        let tcp = TcpStream::connect_timeout(&addr, self.timeout)
            .map_err(|e| StorageError::unreadable(&self.host, e))?;
        tcp.set_read_timeout(Some(self.timeout))
            .and_then(|_| tcp.set_write_timeout(Some(self.timeout)))
            .map_err(|e| StorageError::unreadable(&self.host, e))?;

        let mut session = Session::new().map_err(|e| StorageError::unreadable(&self.host, e))?;
        session.set_tcp_stream(tcp);
        session
            .handshake()
            .map_err(|e| StorageError::unreadable(&self.host, e))?;

        match &self.auth {
            Auth::Password(password) => session
                .userauth_password(&self.username, password)
                .map_err(|e| StorageError::unreadable(&self.host, e))?,
            Auth::PrivateKey { path, passphrase } => session
                .userauth_pubkey_file(&self.username, None, path, passphrase.as_deref())
                .map_err(|e| StorageError::unreadable(&self.host, e))?,
        }

        let sftp = session
            .sftp()
            .map_err(|e| StorageError::unreadable(&self.host, e))?;
        Ok((session, sftp))
    }

    /// Run an operation against the (re)established session
    fn run<T>(&self, f: impl FnOnce(&Sftp) -> Result<T, ssh2::Error>) -> StorageResult<Result<T, ssh2::Error>> {
        let mut guard = self
            .conn
            .lock()
            .map_err(|_| StorageError::Internal("sftp connection lock poisoned".to_string()))?;
        if guard.is_none() {
            *guard = Some(self.connect()?);
        }
        let sftp = match guard.as_ref() {
            Some((_, sftp)) => sftp,
            None => {
                return Err(StorageError::Internal(
                    "sftp connection unavailable".to_string(),
                ))
            }
        };
        let result = f(sftp);
        if matches!(&result, Err(e) if matches!(e.code(), ErrorCode::Session(_))) {
            // Session-level failures leave the transport in an unknown state
            *guard = None;
        }
        Ok(result)
    }

    fn mode_stat(mode: u32) -> FileStat {
        FileStat {
            size: None,
            uid: None,
            gid: None,
            perm: Some(mode),
            atime: None,
            mtime: None,
        }
    }
}

fn is_missing(err: &ssh2::Error) -> bool {
    matches!(err.code(), ErrorCode::SFTP(FX_NO_SUCH_FILE) | ErrorCode::SFTP(FX_NO_SUCH_PATH))
}

fn classify_read(path: &str, err: ssh2::Error) -> StorageError {
    if is_missing(&err) {
        StorageError::not_found(path)
    } else {
        StorageError::unreadable(path, err)
    }
}

impl StorageBackend for SftpBackend {
    fn file_exists(&self, path: &str) -> StorageResult<bool> {
        let stat = self.run(|sftp| sftp.stat(Path::new(path)))?;
        match stat {
            Ok(stat) => Ok(stat.is_file()),
            Err(e) if is_missing(&e) => Ok(false),
            Err(e) => Err(StorageError::unreadable(path, e)),
        }
    }

    fn directory_exists(&self, path: &str) -> StorageResult<bool> {
        let stat = self.run(|sftp| sftp.stat(Path::new(path)))?;
        match stat {
            Ok(stat) => Ok(stat.is_dir()),
            Err(e) if is_missing(&e) => Ok(false),
            Err(e) => Err(StorageError::unreadable(path, e)),
        }
    }

    fn read(&self, path: &str) -> StorageResult<Vec<u8>> {
        let result = self.run(|sftp| {
            let mut file = sftp.open(Path::new(path))?;
            let mut bytes = Vec::new();
            Ok(file.read_to_end(&mut bytes).map(|_| bytes))
        })?;
        result
            .map_err(|e| classify_read(path, e))?
            .map_err(|e| StorageError::unreadable(path, e))
    }

    fn read_stream(&self, path: &str) -> StorageResult<Box<dyn Read + Send>> {
        // Remote handles borrow the session; reads are spooled before
        // handing out a reader.
        let bytes = self.read(path)?;
        Ok(Box::new(Cursor::new(bytes)))
    }

    fn write(&self, path: &str, reader: &mut dyn Read, opts: &WriteOptions) -> StorageResult<()> {
        if let Some((parents, _)) = path.rsplit_once('/') {
            let dir_mode = self
                .modes
                .dir_mode(opts.directory_visibility.unwrap_or_default());
            for target in ancestor_chain(parents) {
                // Existing directories answer with a failure; tolerated
                let _ = self.run(move |sftp| sftp.mkdir(Path::new(&target), dir_mode as i32))?;
            }
        }

        let mut content = Vec::new();
        reader
            .read_to_end(&mut content)
            .map_err(|e| StorageError::unwritable(path, e))?;
        let result = self.run(move |sftp| {
            let mut file = sftp.create(Path::new(path))?;
            Ok(io::Write::write_all(&mut file, &content))
        })?;
        result
            .map_err(|e| StorageError::unwritable(path, e))?
            .map_err(|e| StorageError::unwritable(path, e))?;

        if let Some(visibility) = opts.visibility {
            self.set_visibility(path, visibility)?;
        }
        Ok(())
    }

    fn delete(&self, path: &str) -> StorageResult<()> {
        let result = self.run(|sftp| sftp.unlink(Path::new(path)))?;
        result.map_err(|e| {
            if is_missing(&e) {
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
        let bytes = self.read(from).map_err(|e| match e {
            StorageError::NotFound { .. } => e,
            other => StorageError::CopyFailed {
                from: from.to_string(),
                to: to.to_string(),
                reason: other.to_string(),
            },
        })?;
        self.write(to, &mut Cursor::new(bytes), opts)
            .map_err(|e| StorageError::CopyFailed {
                from: from.to_string(),
                to: to.to_string(),
                reason: e.to_string(),
            })
    }

    fn rename(&self, from: &str, to: &str, _opts: &WriteOptions) -> StorageResult<()> {
        let result = self.run(|sftp| sftp.rename(Path::new(from), Path::new(to), None))?;
        result.map_err(|e| {
            if is_missing(&e) {
                StorageError::not_found(from)
            } else {
                StorageError::MoveFailed {
                    from: from.to_string(),
                    to: to.to_string(),
                    reason: e.to_string(),
                }
            }
        })
    }

    fn create_directory(&self, path: &str, opts: &WriteOptions) -> StorageResult<()> {
        let mode = self
            .modes
            .dir_mode(opts.directory_visibility.unwrap_or_default());
        let chain = ancestor_chain(path);
        let last = chain.len().saturating_sub(1);
        for (index, target) in chain.into_iter().enumerate() {
            let mkdir_target = target.clone();
            let result = self.run(move |sftp| sftp.mkdir(Path::new(&mkdir_target), mode as i32))?;
            if let Err(e) = result {
                // The final segment must exist afterwards; intermediate
                // failures usually mean the directory was already there
                if index == last && !self.directory_exists(&target)? {
                    return Err(StorageError::DirectoryCreateFailed {
                        path: path.to_string(),
                        reason: e.to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    fn delete_directory(&self, path: &str) -> StorageResult<()> {
        let entries = self.list(path, true)?;
        for entry in entries.iter().filter(|e| !e.is_dir) {
            self.delete(&entry.path)?;
        }
        let mut dirs: Vec<&Entry> = entries.iter().filter(|e| e.is_dir).collect();
        dirs.sort_by_key(|e| std::cmp::Reverse(e.path.len()));
        for dir in dirs {
            let target = dir.path.clone();
            let result = self.run(move |sftp| sftp.rmdir(Path::new(&target)))?;
            result.map_err(|e| StorageError::DirectoryDeleteFailed {
                path: dir.path.clone(),
                reason: e.to_string(),
            })?;
        }
        let result = self.run(|sftp| sftp.rmdir(Path::new(path)))?;
        match result {
            Ok(()) => Ok(()),
            Err(e) if is_missing(&e) => Ok(()),
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
            let target = dir.clone();
            let listed = self.run(move |sftp| sftp.readdir(Path::new(&target)))?;
            let listed = match listed {
                Ok(listed) => listed,
                Err(e) if is_missing(&e) => continue,
                Err(e) => return Err(StorageError::unreadable(&dir, e)),
            };
            for (item_path, stat) in listed {
                let item = item_path.to_string_lossy().into_owned();
                if stat.is_dir() {
                    if recursive {
                        pending.push(item.clone());
                    }
                    entries.push(Entry::directory(item));
                } else {
                    let mut entry = Entry::file(item);
                    if let Some(size) = stat.size {
                        entry = entry.with_size(size);
                    }
                    if let Some(modified) =
                        stat.mtime.and_then(|t| DateTime::from_timestamp(t as i64, 0))
                    {
                        entry = entry.with_modified(modified);
                    }
                    entries.push(entry);
                }
            }
        }
        Ok(entries)
    }

    fn file_size(&self, path: &str) -> StorageResult<u64> {
        let stat = self.run(|sftp| sftp.stat(Path::new(path)))?;
        let stat = stat.map_err(|e| classify_read(path, e))?;
        if stat.is_dir() {
            return Err(StorageError::not_found(path));
        }
        stat.size
            .ok_or_else(|| StorageError::unreadable(path, "no size reported"))
    }

    fn last_modified(&self, path: &str) -> StorageResult<DateTime<Utc>> {
        let stat = self.run(|sftp| sftp.stat(Path::new(path)))?;
        let stat = stat.map_err(|e| classify_read(path, e))?;
        stat.mtime
            .and_then(|t| DateTime::from_timestamp(t as i64, 0))
            .ok_or_else(|| StorageError::unreadable(path, "no modification time reported"))
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
        let stat = self.run(|sftp| sftp.stat(Path::new(path)))?;
        let stat = stat.map_err(|e| classify_read(path, e))?;
        Ok(match stat.perm {
            Some(mode) if stat.is_dir() => self.modes.from_dir_mode(mode),
            Some(mode) => self.modes.from_file_mode(mode),
            None => Visibility::Private,
        })
    }

    fn set_visibility(&self, path: &str, visibility: Visibility) -> StorageResult<()> {
        let stat = self.run(|sftp| sftp.stat(Path::new(path)))?;
        let stat = stat.map_err(|e| classify_read(path, e))?;
        let mode = if stat.is_dir() {
            self.modes.dir_mode(visibility)
        } else {
            self.modes.file_mode(visibility)
        };
        let result = self.run(move |sftp| sftp.setstat(Path::new(path), Self::mode_stat(mode)))?;
        result.map_err(|e| StorageError::UnableToSetVisibility {
            path: path.to_string(),
            reason: e.to_string(),
        })
    }

    fn checksum(&self, path: &str, algo: ChecksumAlgo) -> StorageResult<String> {
        let bytes = self.read(path)?;
        hash_reader(path, &mut Cursor::new(bytes), algo)
    }
}

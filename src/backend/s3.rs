//! # S3-Compatible Connector
//!
//! Object stores have no real directories: directory operations are
//! simulated with zero-byte `<prefix>/` marker objects and prefix listings.
//! Visibility is persisted as a `visibility` object tag, the representation
//! the sync client exposes (it has no ACL calls); anything other than the
//! exact public marker reads back as private.

use std::collections::HashMap;
use std::io::{Cursor, Read};

use chrono::{DateTime, Utc};
use log::debug;
use s3::creds::Credentials;
use s3::error::S3Error;
use s3::region::Region;
use s3::Bucket;

use super::{hash_reader, Entry, Presigner, PublicUrlGenerator, StorageBackend, WriteOptions};
use crate::config::{ChecksumAlgo, DiskConfig};
use crate::errors::{StorageError, StorageResult};
use crate::mime::MimeResolver;
use crate::visibility::Visibility;

const VISIBILITY_TAG: &str = "visibility";

/// S3-compatible storage connector
#[derive(Debug)]
pub struct S3Backend {
    bucket: Bucket,
    bucket_name: String,
    endpoint: String,
    use_path_style: bool,
    mime: MimeResolver,
}

impl S3Backend {
    /// Build a connector from a disk configuration
    pub fn from_config(config: &DiskConfig) -> StorageResult<Self> {
        let bucket_name = config.require("bucket", &config.bucket)?;
        let key = config.require("key", &config.key)?;
        let secret = config.require("secret", &config.secret)?;
        let region_name = config.region.clone().unwrap_or_else(|| "us-east-1".to_string());
        let endpoint = normalize_endpoint(config.endpoint.as_deref(), &region_name);

        let region = Region::Custom {
            region: region_name,
            endpoint: endpoint.clone(),
        };
        let credentials = Credentials::new(
            Some(key),
            Some(secret),
            config.token.as_deref(),
            None,
            None,
        )
        .map_err(|e| StorageError::Configuration(format!("invalid object-store credentials: {}", e)))?;

        let mut bucket_box = Bucket::new(bucket_name, region, credentials)
            .map_err(|e| StorageError::Configuration(format!("invalid bucket config: {}", e)))?;
        if config.use_path_style {
            bucket_box = bucket_box.with_path_style();
        }
        let bucket: Bucket = *bucket_box;

        Ok(Self {
            bucket,
            bucket_name: bucket_name.to_string(),
            endpoint,
            use_path_style: config.use_path_style,
            mime: MimeResolver::new(),
        })
    }

    /// Replace the MIME lookup collaborator
    pub fn with_mime_resolver(mut self, mime: MimeResolver) -> Self {
        self.mime = mime;
        self
    }

    /// The underlying bucket client, for backend-specific extras
    pub fn client(&self) -> &Bucket {
        &self.bucket
    }

    fn head(&self, path: &str) -> StorageResult<s3::serde_types::HeadObjectResult> {
        match self.bucket.head_object(path) {
            Ok((head, code)) if (200..300).contains(&code) => Ok(head),
            Ok((_, 404)) => Err(StorageError::not_found(path)),
            Ok((_, code)) => Err(StorageError::unreadable(path, format!("HEAD returned {}", code))),
            Err(e) => Err(classify_read(path, e)),
        }
    }

    fn directory_marker(path: &str) -> String {
        format!("{}/", path.trim_end_matches('/'))
    }

    fn keys_under(&self, prefix: &str) -> StorageResult<Vec<String>> {
        let pages = self
            .bucket
            .list(prefix.to_string(), None)
            .map_err(|e| classify_read(prefix, e))?;
        let mut keys = Vec::new();
        for page in pages {
            for object in page.contents {
                keys.push(object.key);
            }
        }
        Ok(keys)
    }
}

fn normalize_endpoint(endpoint: Option<&str>, region: &str) -> String {
    match endpoint {
        Some(e) if e.contains("://") => e.trim_end_matches('/').to_string(),
        Some(e) => format!("https://{}", e.trim_end_matches('/')),
        None => format!("https://s3.{}.amazonaws.com", region),
    }
}

fn status_of(err: &S3Error) -> Option<u16> {
    match err {
        S3Error::HttpFailWithBody(code, _) => Some(*code),
        _ => None,
    }
}

fn classify_read(path: &str, err: S3Error) -> StorageError {
    if status_of(&err) == Some(404) {
        StorageError::not_found(path)
    } else {
        StorageError::unreadable(path, err)
    }
}

fn classify_write(path: &str, err: S3Error) -> StorageError {
    StorageError::unwritable(path, err)
}

/// Listing timestamps arrive as RFC 3339, HEAD timestamps as HTTP dates
fn parse_object_date(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .or_else(|_| DateTime::parse_from_rfc2822(value))
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

impl StorageBackend for S3Backend {
    fn file_exists(&self, path: &str) -> StorageResult<bool> {
        match self.head(path) {
            Ok(_) => Ok(true),
            Err(StorageError::NotFound { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn directory_exists(&self, path: &str) -> StorageResult<bool> {
        // A "directory" exists when any key lives under its prefix
        let prefix = Self::directory_marker(path);
        let pages = self
            .bucket
            .list(prefix, Some("/".to_string()))
            .map_err(|e| classify_read(path, e))?;
        Ok(pages.iter().any(|page| {
            !page.contents.is_empty()
                || page
                    .common_prefixes
                    .as_ref()
                    .map(|p| !p.is_empty())
                    .unwrap_or(false)
        }))
    }

    fn read(&self, path: &str) -> StorageResult<Vec<u8>> {
        let response = self
            .bucket
            .get_object(path)
            .map_err(|e| classify_read(path, e))?;
        Ok(response.bytes().to_vec())
    }

    fn read_stream(&self, path: &str) -> StorageResult<Box<dyn Read + Send>> {
        let bytes = self.read(path)?;
        Ok(Box::new(Cursor::new(bytes)))
    }

    fn write(&self, path: &str, reader: &mut dyn Read, opts: &WriteOptions) -> StorageResult<()> {
        let mut content = Vec::new();
        reader
            .read_to_end(&mut content)
            .map_err(|e| StorageError::unwritable(path, e))?;

        let mime = opts
            .mime_type
            .clone()
            .or_else(|| self.mime.guess(path));
        match mime {
            Some(mime) => self
                .bucket
                .put_object_with_content_type(path, &content, &mime)
                .map_err(|e| classify_write(path, e))?,
            None => self
                .bucket
                .put_object(path, &content)
                .map_err(|e| classify_write(path, e))?,
        };

        if let Some(visibility) = opts.visibility {
            self.set_visibility(path, visibility)?;
        }
        Ok(())
    }

    fn delete(&self, path: &str) -> StorageResult<()> {
        // Object stores treat deleting an absent key as success
        self.bucket
            .delete_object(path)
            .map_err(|e| StorageError::DeleteFailed {
                path: path.to_string(),
                reason: e.to_string(),
            })
            .map(|_| ())
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

    fn rename(&self, from: &str, to: &str, opts: &WriteOptions) -> StorageResult<()> {
        self.copy(from, to, opts).map_err(|e| match e {
            StorageError::NotFound { .. } => e,
            other => StorageError::MoveFailed {
                from: from.to_string(),
                to: to.to_string(),
                reason: other.to_string(),
            },
        })?;
        self.delete(from).map_err(|e| StorageError::MoveFailed {
            from: from.to_string(),
            to: to.to_string(),
            reason: e.to_string(),
        })
    }

    fn create_directory(&self, path: &str, _opts: &WriteOptions) -> StorageResult<()> {
        let marker = Self::directory_marker(path);
        self.bucket
            .put_object(&marker, &[])
            .map(|_| ())
            .map_err(|e| StorageError::DirectoryCreateFailed {
                path: path.to_string(),
                reason: e.to_string(),
            })
    }

    fn delete_directory(&self, path: &str) -> StorageResult<()> {
        let prefix = Self::directory_marker(path);
        let keys = self.keys_under(&prefix).map_err(|e| {
            StorageError::DirectoryDeleteFailed {
                path: path.to_string(),
                reason: e.to_string(),
            }
        })?;
        for key in keys {
            debug!("deleting object {}", key);
            self.bucket
                .delete_object(&key)
                .map_err(|e| StorageError::DirectoryDeleteFailed {
                    path: path.to_string(),
                    reason: e.to_string(),
                })?;
        }
        Ok(())
    }

    fn list(&self, path: &str, recursive: bool) -> StorageResult<Vec<Entry>> {
        let prefix = if path.is_empty() {
            String::new()
        } else {
            Self::directory_marker(path)
        };
        let delimiter = if recursive {
            None
        } else {
            Some("/".to_string())
        };

        let pages = self
            .bucket
            .list(prefix.clone(), delimiter)
            .map_err(|e| classify_read(path, e))?;

        let mut entries = Vec::new();
        for page in pages {
            for common in page.common_prefixes.into_iter().flatten() {
                let dir = common.prefix.trim_end_matches('/');
                if !dir.is_empty() && dir != path {
                    entries.push(Entry::directory(dir));
                }
            }
            for object in page.contents {
                if object.key == prefix {
                    continue;
                }
                if object.key.ends_with('/') {
                    // Zero-byte directory marker
                    entries.push(Entry::directory(object.key.trim_end_matches('/')));
                    continue;
                }
                let mut entry = Entry::file(object.key.clone()).with_size(object.size as u64);
                if let Some(modified) = parse_object_date(&object.last_modified) {
                    entry = entry.with_modified(modified);
                }
                entries.push(entry);
            }
        }
        Ok(entries)
    }

    fn file_size(&self, path: &str) -> StorageResult<u64> {
        let head = self.head(path)?;
        head.content_length
            .map(|len| len as u64)
            .ok_or_else(|| StorageError::unreadable(path, "no content length reported"))
    }

    fn last_modified(&self, path: &str) -> StorageResult<DateTime<Utc>> {
        let head = self.head(path)?;
        head.last_modified
            .as_deref()
            .and_then(parse_object_date)
            .ok_or_else(|| StorageError::unreadable(path, "no modification time reported"))
    }

    fn mime_type(&self, path: &str) -> StorageResult<String> {
        let head = self.head(path)?;
        head.content_type
            .or_else(|| self.mime.guess(path))
            .ok_or_else(|| StorageError::unreadable(path, "mime type unknown"))
    }

    fn visibility(&self, path: &str) -> StorageResult<Visibility> {
        let (tags, _) = self
            .bucket
            .get_object_tagging(path)
            .map_err(|e| classify_read(path, e))?;
        let marker = tags
            .iter()
            .find(|t| t.key() == VISIBILITY_TAG)
            .map(|t| t.value())
            .unwrap_or_default();
        Ok(Visibility::from_marker(&marker))
    }

    fn set_visibility(&self, path: &str, visibility: Visibility) -> StorageResult<()> {
        self.bucket
            .put_object_tagging(path, &[(VISIBILITY_TAG, visibility.as_str())])
            .map(|_| ())
            .map_err(|e| {
                if status_of(&e) == Some(404) {
                    StorageError::not_found(path)
                } else {
                    StorageError::UnableToSetVisibility {
                        path: path.to_string(),
                        reason: e.to_string(),
                    }
                }
            })
    }

    fn checksum(&self, path: &str, algo: ChecksumAlgo) -> StorageResult<String> {
        match algo {
            ChecksumAlgo::Etag => {
                let head = self.head(path).map_err(|e| match e {
                    StorageError::NotFound { .. } => e,
                    other => StorageError::ChecksumUnavailable {
                        path: path.to_string(),
                        reason: other.to_string(),
                    },
                })?;
                head.e_tag
                    .map(|etag| etag.trim_matches('"').to_string())
                    .ok_or_else(|| StorageError::ChecksumUnavailable {
                        path: path.to_string(),
                        reason: "no etag reported".to_string(),
                    })
            }
            other => {
                let bytes = self.read(path)?;
                hash_reader(path, &mut Cursor::new(bytes), other)
            }
        }
    }
}

impl PublicUrlGenerator for S3Backend {
    fn public_url(&self, path: &str) -> StorageResult<String> {
        let key = path.trim_start_matches('/');
        if self.use_path_style {
            return Ok(format!("{}/{}/{}", self.endpoint, self.bucket_name, key));
        }
        let (scheme, host) = self
            .endpoint
            .split_once("://")
            .unwrap_or(("https", self.endpoint.as_str()));
        Ok(format!("{}://{}.{}/{}", scheme, self.bucket_name, host, key))
    }
}

impl Presigner for S3Backend {
    fn presign_get(
        &self,
        path: &str,
        expires_in: u32,
        custom_queries: Option<HashMap<String, String>>,
    ) -> StorageResult<String> {
        self.bucket
            .presign_get(path, expires_in, custom_queries)
            .map_err(|e| StorageError::Configuration(format!("unable to presign {}: {}", path, e)))
    }
}

//! # Disk Configuration
//!
//! One flat configuration record per disk, deserializable from any serde
//! format. Backend-specific keys live alongside the common ones; keys not
//! modeled here are preserved for custom drivers in the flattened `options`
//! map.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{StorageError, StorageResult};
use crate::visibility::{UnixVisibility, Visibility};

/// Symlink policy for local disk traversal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkPolicy {
    /// Fail the listing when a symlink is encountered
    Disallow,
    /// Drop symlinked entries from listings
    Skip,
}

impl Default for LinkPolicy {
    fn default() -> Self {
        Self::Disallow
    }
}

/// Checksum algorithm selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumAlgo {
    Sha256,
    Crc32,
    /// Backend-reported entity tag (object stores only)
    Etag,
}

impl Default for ChecksumAlgo {
    fn default() -> Self {
        Self::Sha256
    }
}

/// Configuration for one named disk
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiskConfig {
    /// Backend kind: `local`, `ftp`, `sftp`, `s3`, `scoped`, or a custom tag
    pub driver: String,

    /// Base path (local), remote directory (FTP/SFTP) or key prefix (S3)
    #[serde(default)]
    pub root: Option<String>,

    /// Additional prefix applied on top of `root`
    #[serde(default)]
    pub prefix: Option<String>,

    /// Default visibility for written files
    #[serde(default)]
    pub visibility: Option<Visibility>,

    /// Default visibility for created directories
    #[serde(default)]
    pub directory_visibility: Option<Visibility>,

    /// Base URL for `url()`
    #[serde(default)]
    pub url: Option<String>,

    /// Replacement base URL for presigned `temporary_url()` results
    #[serde(default)]
    pub temporary_url: Option<String>,

    /// Propagate classified errors instead of returning sentinels
    #[serde(default)]
    pub throw: bool,

    /// Unix mode table override (local/SFTP)
    #[serde(default)]
    pub permissions: Option<UnixVisibility>,

    /// Symlink policy (local only)
    #[serde(default)]
    pub links: LinkPolicy,

    /// Checksum algorithm for `checksum()`
    #[serde(default)]
    pub checksum: ChecksumAlgo,

    // Transport keys (FTP/SFTP)
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub private_key: Option<String>,
    #[serde(default)]
    pub passphrase: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    // Object-store keys (S3-compatible)
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub secret: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub bucket: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub use_path_style: bool,

    /// Target disk name (scoped driver)
    #[serde(default)]
    pub disk: Option<String>,

    /// Unmodeled keys, kept for custom drivers
    #[serde(flatten)]
    pub options: serde_json::Map<String, Value>,
}

fn default_timeout_secs() -> u64 {
    30
}

impl DiskConfig {
    /// Create a config with just a driver tag set
    pub fn for_driver(driver: impl Into<String>) -> Self {
        Self {
            driver: driver.into(),
            timeout_secs: default_timeout_secs(),
            ..Self::default()
        }
    }

    /// Root joined with the scoping prefix, as the disk's effective root
    pub fn effective_root(&self) -> String {
        let root = self.root.as_deref().unwrap_or("");
        match self.prefix.as_deref() {
            Some(prefix) => crate::path::PathPrefixer::join(root, prefix),
            None => root.to_string(),
        }
    }

    /// Default file visibility, private when unset
    pub fn file_visibility(&self) -> Visibility {
        self.visibility.unwrap_or_default()
    }

    /// Default directory visibility, falling back to the file default
    pub fn dir_visibility(&self) -> Visibility {
        self.directory_visibility
            .unwrap_or_else(|| self.file_visibility())
    }

    /// Unix mode table, defaults applied
    pub fn unix_visibility(&self) -> UnixVisibility {
        self.permissions.unwrap_or_default()
    }

    /// Fetch a required key or fail with a configuration error
    pub fn require<'a>(&'a self, key: &str, value: &'a Option<String>) -> StorageResult<&'a str> {
        value.as_deref().ok_or_else(|| {
            StorageError::Configuration(format!(
                "disk driver '{}' requires the '{}' key",
                self.driver, key
            ))
        })
    }
}

/// The full storage configuration: a default disk name plus named disks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Name of the disk returned when none is requested
    #[serde(default = "default_disk_name")]
    pub default: String,

    /// Disk configurations keyed by name
    #[serde(default)]
    pub disks: HashMap<String, DiskConfig>,
}

fn default_disk_name() -> String {
    "local".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            default: default_disk_name(),
            disks: HashMap::new(),
        }
    }
}

impl StorageConfig {
    /// Build a configuration from a raw JSON value
    pub fn from_value(value: Value) -> StorageResult<Self> {
        serde_json::from_value(value)
            .map_err(|e| StorageError::Configuration(format!("invalid storage config: {}", e)))
    }

    /// Look up a disk's configuration by name
    pub fn disk(&self, name: &str) -> StorageResult<&DiskConfig> {
        self.disks.get(name).ok_or_else(|| {
            StorageError::Configuration(format!("disk '{}' is not configured", name))
        })
    }
}

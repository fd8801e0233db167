//! # Storage Manager
//!
//! Registry of named disks. Each disk is lazily resolved from its
//! configuration via a driver factory and cached until forgotten; racing
//! first constructions are tolerated and the later write wins, since
//! connectors are safe to construct twice and the loser is merely dropped.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use log::debug;
use serde_json::Value;

use crate::adapter::Disk;
use crate::backend::{FtpBackend, LocalBackend, S3Backend};
use crate::config::{DiskConfig, StorageConfig};
use crate::errors::{StorageError, StorageResult};
use crate::path::PathPrefixer;

/// Constructor for one driver kind
pub type DriverFactory =
    Arc<dyn Fn(&StorageManager, &DiskConfig) -> StorageResult<Disk> + Send + Sync>;

/// Resolves and caches disks by name
pub struct StorageManager {
    config: StorageConfig,
    disks: RwLock<HashMap<String, Disk>>,
    factories: RwLock<HashMap<String, DriverFactory>>,
}

impl std::fmt::Debug for StorageManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageManager")
            .field("default", &self.config.default)
            .field("disks", &self.config.disks.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl StorageManager {
    /// Create a manager with the built-in drivers registered
    pub fn new(config: StorageConfig) -> Self {
        let builtins: [(&str, DriverFactory); 6] = [
            ("local", Arc::new(|_: &StorageManager, c: &DiskConfig| Self::create_local(c))),
            ("ftp", Arc::new(|_: &StorageManager, c: &DiskConfig| Self::create_ftp(c))),
            ("sftp", Arc::new(|_: &StorageManager, c: &DiskConfig| Self::create_sftp(c))),
            ("s3", Arc::new(|_: &StorageManager, c: &DiskConfig| Self::create_s3(c))),
            ("scoped", Arc::new(|m: &StorageManager, c: &DiskConfig| m.create_scoped(c))),
            ("ondemand", Arc::new(|m: &StorageManager, c: &DiskConfig| m.create_ondemand(c))),
        ];
        let mut factories: HashMap<String, DriverFactory> = HashMap::new();
        for (name, factory) in builtins {
            factories.insert(name.to_string(), factory);
        }

        Self {
            config,
            disks: RwLock::new(HashMap::new()),
            factories: RwLock::new(factories),
        }
    }

    /// Create a manager from a raw JSON configuration value
    pub fn from_value(value: Value) -> StorageResult<Self> {
        Ok(Self::new(StorageConfig::from_value(value)?))
    }

    /// The manager's configuration
    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    /// The configured default disk
    pub fn default_disk(&self) -> StorageResult<Disk> {
        let name = self.config.default.clone();
        self.disk(&name)
    }

    /// The named disk, constructing and caching it on first access
    pub fn disk(&self, name: &str) -> StorageResult<Disk> {
        {
            let disks = self
                .disks
                .read()
                .map_err(|_| StorageError::Internal("disk cache poisoned".to_string()))?;
            if let Some(disk) = disks.get(name) {
                return Ok(disk.clone());
            }
        }

        let config = self.config.disk(name)?.clone();
        debug!("resolving disk '{}' with driver '{}'", name, config.driver);
        let disk = self.resolve(&config)?;

        let mut disks = self
            .disks
            .write()
            .map_err(|_| StorageError::Internal("disk cache poisoned".to_string()))?;
        disks.insert(name.to_string(), disk.clone());
        Ok(disk)
    }

    /// Construct a one-off, uncached disk from an inline configuration
    pub fn build(&self, config: DiskConfig) -> StorageResult<Disk> {
        self.resolve(&config)
    }

    /// Construct a one-off disk from a raw JSON configuration value
    pub fn build_from_value(&self, value: Value) -> StorageResult<Disk> {
        let config: DiskConfig = serde_json::from_value(value)
            .map_err(|e| StorageError::Configuration(format!("invalid disk config: {}", e)))?;
        self.build(config)
    }

    /// Register (or override) a driver factory
    pub fn extend(&self, driver: impl Into<String>, factory: DriverFactory) -> StorageResult<()> {
        let mut factories = self
            .factories
            .write()
            .map_err(|_| StorageError::Internal("factory registry poisoned".to_string()))?;
        factories.insert(driver.into(), factory);
        Ok(())
    }

    /// Drop a cached disk so the next access reconstructs it
    pub fn forget_disk(&self, name: &str) -> StorageResult<()> {
        let mut disks = self
            .disks
            .write()
            .map_err(|_| StorageError::Internal("disk cache poisoned".to_string()))?;
        disks.remove(name);
        Ok(())
    }

    /// Evict a cached disk; used when credentials rotate or a connection
    /// must be recreated
    pub fn purge(&self, name: &str) -> StorageResult<()> {
        self.forget_disk(name)
    }

    fn resolve(&self, config: &DiskConfig) -> StorageResult<Disk> {
        let factory = {
            let factories = self
                .factories
                .read()
                .map_err(|_| StorageError::Internal("factory registry poisoned".to_string()))?;
            factories.get(&config.driver).cloned()
        };
        match factory {
            Some(factory) => factory(self, config),
            None => Err(StorageError::Configuration(format!(
                "unknown storage driver '{}'",
                config.driver
            ))),
        }
    }

    fn create_local(config: &DiskConfig) -> StorageResult<Disk> {
        config.require("root", &config.root)?;
        let backend = LocalBackend::new(config.unix_visibility(), config.links);
        Ok(Disk::new(Arc::new(backend), config.clone()))
    }

    fn create_ftp(config: &DiskConfig) -> StorageResult<Disk> {
        let backend = FtpBackend::from_config(config)?;
        Ok(Disk::new(Arc::new(backend), config.clone()))
    }

    #[cfg(feature = "sftp")]
    fn create_sftp(config: &DiskConfig) -> StorageResult<Disk> {
        let backend = crate::backend::SftpBackend::from_config(config)?;
        Ok(Disk::new(Arc::new(backend), config.clone()))
    }

    #[cfg(not(feature = "sftp"))]
    fn create_sftp(_config: &DiskConfig) -> StorageResult<Disk> {
        Err(StorageError::Configuration(
            "sftp disks require building with the 'sftp' feature".to_string(),
        ))
    }

    fn create_s3(config: &DiskConfig) -> StorageResult<Disk> {
        let backend = Arc::new(S3Backend::from_config(config)?);
        Ok(Disk::new(backend.clone(), config.clone())
            .with_url_generator(backend.clone())
            .with_presigner(backend))
    }

    /// An ad hoc local disk rooted wherever the caller points it
    fn create_ondemand(&self, config: &DiskConfig) -> StorageResult<Disk> {
        let mut local = config.clone();
        local.driver = "local".to_string();
        self.resolve(&local)
    }

    /// A sub-rooted view over another named disk's configuration
    fn create_scoped(&self, config: &DiskConfig) -> StorageResult<Disk> {
        let target_name = config.require("disk", &config.disk)?;
        let prefix = config.require("prefix", &config.prefix)?;

        let mut target = self.config.disk(target_name)?.clone();
        target.prefix = Some(match target.prefix.as_deref() {
            Some(existing) => PathPrefixer::join(existing, prefix),
            None => prefix.to_string(),
        });
        self.resolve(&target)
    }
}

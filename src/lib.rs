//! aerostore - backend-agnostic file storage
//!
//! Application code talks to named "disks" through one capability surface;
//! each disk resolves to a local-filesystem, FTP, SFTP or S3-compatible
//! connector behind it. Paths are rooted per disk, visibility is translated
//! per backend, and failures collapse into one classified error enum with a
//! per-disk fail-soft/fail-fast policy.

pub mod adapter;
pub mod backend;
pub mod config;
pub mod errors;
pub mod manager;
pub mod mime;
pub mod path;
pub mod upload;
pub mod visibility;

pub use adapter::{Contents, Disk, TemporaryUrlBuilder};
pub use backend::{Entry, Presigner, PublicUrlGenerator, StorageBackend, WriteOptions};
pub use config::{ChecksumAlgo, DiskConfig, LinkPolicy, StorageConfig};
pub use errors::{StorageError, StorageResult};
pub use manager::{DriverFactory, StorageManager};
pub use mime::MimeResolver;
pub use path::PathPrefixer;
pub use upload::PendingUpload;
pub use visibility::{UnixVisibility, Visibility};

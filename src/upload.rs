//! # Pending Uploads
//!
//! Handle for a file an upstream upload layer has already parked in
//! temporary storage. `Disk::put_file` streams it into place, generating a
//! collision-resistant name when the caller does not supply one.

use std::path::{Path, PathBuf};

use rand::RngCore;

/// A file awaiting storage: its temporary location plus original metadata
#[derive(Debug, Clone)]
pub struct PendingUpload {
    path: PathBuf,
    original_name: Option<String>,
}

impl PendingUpload {
    /// Wrap a temporary file path
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            original_name: None,
        }
    }

    /// Attach the client-supplied original file name
    pub fn with_original_name(mut self, name: impl Into<String>) -> Self {
        self.original_name = Some(name.into());
        self
    }

    /// Location of the temporary file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Original name, when the upload layer captured one
    pub fn original_name(&self) -> Option<&str> {
        self.original_name.as_deref()
    }

    /// Extension taken from the original name, falling back to the
    /// temporary path
    pub fn extension(&self) -> Option<String> {
        let from = |s: &Path| {
            s.extension()
                .and_then(|e| e.to_str())
                .map(str::to_ascii_lowercase)
        };
        self.original_name
            .as_deref()
            .and_then(|n| from(Path::new(n)))
            .or_else(|| from(&self.path))
    }

    /// Generate a storage name: unix millis, a random hex suffix, and the
    /// original extension
    pub fn generated_name(&self) -> String {
        let millis = chrono::Utc::now().timestamp_millis();
        let mut bytes = [0u8; 8];
        rand::thread_rng().fill_bytes(&mut bytes);
        let suffix: String = bytes.iter().map(|b| format!("{:02x}", b)).collect();

        match self.extension() {
            Some(ext) => format!("{}-{}.{}", millis, suffix, ext),
            None => format!("{}-{}", millis, suffix),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extension_prefers_original_name() {
        let upload = PendingUpload::new("/tmp/upload-f81a").with_original_name("Report.PDF");
        assert_eq!(upload.extension().as_deref(), Some("pdf"));
    }

    #[test]
    fn test_extension_falls_back_to_path() {
        let upload = PendingUpload::new("/tmp/upload-f81a.dat");
        assert_eq!(upload.extension().as_deref(), Some("dat"));
    }

    #[test]
    fn test_generated_name_shape() {
        let upload = PendingUpload::new("/tmp/u1").with_original_name("photo.jpeg");
        let name = upload.generated_name();
        let (stem, ext) = name.rsplit_once('.').unwrap();
        assert_eq!(ext, "jpeg");

        let (millis, suffix) = stem.split_once('-').unwrap();
        assert!(millis.chars().all(|c| c.is_ascii_digit()));
        assert_eq!(suffix.len(), 16);
        assert!(suffix.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_generated_names_do_not_collide() {
        let upload = PendingUpload::new("/tmp/u1");
        let a = upload.generated_name();
        let b = upload.generated_name();
        assert_ne!(a, b);
    }
}

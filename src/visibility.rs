//! # Visibility Model
//!
//! The abstraction exposes exactly two visibility values; each backend maps
//! them onto its native representation (POSIX mode bits, object tags).
//! Decoding fails closed: any native value that is not the backend's exact
//! "public" marker reads back as private.

use serde::{Deserialize, Serialize};

/// Access visibility at the abstraction boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    /// World readable
    Public,
    /// Owner only
    Private,
}

impl Default for Visibility {
    fn default() -> Self {
        Self::Private
    }
}

impl Visibility {
    /// Returns the string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Visibility::Public => "public",
            Visibility::Private => "private",
        }
    }

    /// Decode a string marker, falling back to private for anything that is
    /// not exactly `"public"`.
    pub fn from_marker(value: &str) -> Self {
        if value == "public" {
            Visibility::Public
        } else {
            Visibility::Private
        }
    }
}

/// Unix mode table used by the local and SFTP connectors
///
/// Defaults follow the conventional 644/600 file and 755/700 directory
/// split; a disk's `permissions` table overrides individual entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnixVisibility {
    #[serde(default = "default_file_public")]
    pub file_public: u32,
    #[serde(default = "default_file_private")]
    pub file_private: u32,
    #[serde(default = "default_dir_public")]
    pub dir_public: u32,
    #[serde(default = "default_dir_private")]
    pub dir_private: u32,
}

fn default_file_public() -> u32 {
    0o644
}

fn default_file_private() -> u32 {
    0o600
}

fn default_dir_public() -> u32 {
    0o755
}

fn default_dir_private() -> u32 {
    0o700
}

impl Default for UnixVisibility {
    fn default() -> Self {
        Self {
            file_public: default_file_public(),
            file_private: default_file_private(),
            dir_public: default_dir_public(),
            dir_private: default_dir_private(),
        }
    }
}

impl UnixVisibility {
    /// Mode bits for a file with the given visibility
    pub fn file_mode(&self, visibility: Visibility) -> u32 {
        match visibility {
            Visibility::Public => self.file_public,
            Visibility::Private => self.file_private,
        }
    }

    /// Mode bits for a directory with the given visibility
    pub fn dir_mode(&self, visibility: Visibility) -> u32 {
        match visibility {
            Visibility::Public => self.dir_public,
            Visibility::Private => self.dir_private,
        }
    }

    /// Decode file mode bits; anything other than the public marker is
    /// private.
    pub fn from_file_mode(&self, mode: u32) -> Visibility {
        if mode & 0o777 == self.file_public {
            Visibility::Public
        } else {
            Visibility::Private
        }
    }

    /// Decode directory mode bits; anything other than the public marker is
    /// private.
    pub fn from_dir_mode(&self, mode: u32) -> Visibility {
        if mode & 0o777 == self.dir_public {
            Visibility::Public
        } else {
            Visibility::Private
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_private_default() {
        assert_eq!(Visibility::default(), Visibility::Private);
    }

    #[test]
    fn test_marker_round_trip() {
        assert_eq!(Visibility::from_marker("public"), Visibility::Public);
        assert_eq!(Visibility::from_marker("private"), Visibility::Private);
        assert_eq!(
            Visibility::from_marker(Visibility::Public.as_str()),
            Visibility::Public
        );
    }

    #[test]
    fn test_unknown_marker_fails_closed() {
        assert_eq!(Visibility::from_marker("PUBLIC"), Visibility::Private);
        assert_eq!(Visibility::from_marker("world"), Visibility::Private);
        assert_eq!(Visibility::from_marker(""), Visibility::Private);
    }

    #[test]
    fn test_mode_round_trip() {
        let modes = UnixVisibility::default();
        for v in [Visibility::Public, Visibility::Private] {
            assert_eq!(modes.from_file_mode(modes.file_mode(v)), v);
            assert_eq!(modes.from_dir_mode(modes.dir_mode(v)), v);
        }
    }

    #[test]
    fn test_unexpected_mode_fails_closed() {
        let modes = UnixVisibility::default();
        assert_eq!(modes.from_file_mode(0o640), Visibility::Private);
        assert_eq!(modes.from_file_mode(0o777), Visibility::Private);
        // Extra type bits are masked off before comparison
        assert_eq!(modes.from_file_mode(0o100644), Visibility::Public);
    }

    #[test]
    fn test_custom_table() {
        let modes = UnixVisibility {
            file_public: 0o664,
            ..UnixVisibility::default()
        };
        assert_eq!(modes.file_mode(Visibility::Public), 0o664);
        assert_eq!(modes.from_file_mode(0o664), Visibility::Public);
        assert_eq!(modes.from_file_mode(0o644), Visibility::Private);
    }

    #[test]
    fn test_serde_lowercase() {
        let v: Visibility = serde_json::from_str("\"public\"").unwrap();
        assert_eq!(v, Visibility::Public);
        assert_eq!(serde_json::to_string(&Visibility::Private).unwrap(), "\"private\"");
    }
}

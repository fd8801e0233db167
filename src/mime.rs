//! # MIME Type Lookup
//!
//! A small injected collaborator around the mime_guess table. Connectors
//! hold their own resolver instance, so callers can override entries per
//! disk instead of reaching into process-wide state.

use std::collections::HashMap;

/// Extension-based MIME lookup with per-instance overrides
#[derive(Debug, Clone, Default)]
pub struct MimeResolver {
    overrides: HashMap<String, String>,
}

impl MimeResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an extension override, e.g. `("md", "text/markdown")`
    pub fn with_override(mut self, extension: impl Into<String>, mime: impl Into<String>) -> Self {
        self.overrides
            .insert(extension.into().to_ascii_lowercase(), mime.into());
        self
    }

    /// Guess the MIME type for a path from its extension
    pub fn guess(&self, path: &str) -> Option<String> {
        let extension = std::path::Path::new(path)
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)?;

        if let Some(mime) = self.overrides.get(&extension) {
            return Some(mime.clone());
        }

        mime_guess::from_ext(&extension)
            .first()
            .map(|m| m.essence_str().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guess_common_types() {
        let resolver = MimeResolver::new();
        assert_eq!(resolver.guess("a/b.txt").as_deref(), Some("text/plain"));
        assert_eq!(resolver.guess("logo.png").as_deref(), Some("image/png"));
        assert_eq!(resolver.guess("data.json").as_deref(), Some("application/json"));
    }

    #[test]
    fn test_no_extension() {
        let resolver = MimeResolver::new();
        assert_eq!(resolver.guess("Makefile"), None);
    }

    #[test]
    fn test_override_wins() {
        let resolver = MimeResolver::new().with_override("bin", "application/x-firmware");
        assert_eq!(
            resolver.guess("fw/image.BIN").as_deref(),
            Some("application/x-firmware")
        );
    }
}

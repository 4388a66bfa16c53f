// Copyright (c) 2026 Gatehouse Contributors
// SPDX-License-Identifier: AGPL-3.0
//! Path Sanitizer Domain Service
//!
//! Normalizes host mount sources and decides whether they fall under a
//! configured allow-root. This is a domain service because the mount
//! allowlist is the security boundary between callers and the host.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Host path normalization and allow-root containment

use std::path::{Component, Path, PathBuf};
use thiserror::Error;

/// Path sanitization errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PathSanitizerError {
    #[error("Path traversal attempt detected: {0}")]
    PathTraversal(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Path outside allowed roots: {0}")]
    OutsideBoundary(String),

    #[error("Path too long: {0}")]
    PathTooLong(String),
}

/// Host path sanitizer
///
/// # Security Guarantees
/// - Rejects relative paths, `..` components and NUL bytes
/// - Collapses `.` components and repeated separators
/// - Containment is decided per path component, so `/srv/data2` is not
///   under `/srv/data`
/// - Paths listed as forbidden (the daemon socket) are refused even when an
///   allow-root covers them, and so are their ancestors
#[derive(Debug, Clone)]
pub struct PathSanitizer {
    max_path_len: usize,
    forbidden: Vec<PathBuf>,
}

impl PathSanitizer {
    pub fn new() -> Self {
        Self {
            max_path_len: 4096,
            forbidden: Vec::new(),
        }
    }

    pub fn with_max_length(max_path_len: usize) -> Self {
        Self {
            max_path_len,
            ..Self::new()
        }
    }

    /// Add a path that may never be mounted, nor anything beneath or above it.
    pub fn forbid(mut self, path: impl Into<PathBuf>) -> Self {
        self.forbidden.push(path.into());
        self
    }

    /// Normalize an absolute host path.
    ///
    /// ```
    /// use gatehouse_core::domain::path_sanitizer::PathSanitizer;
    /// use std::path::PathBuf;
    ///
    /// let sanitizer = PathSanitizer::new();
    /// let path = sanitizer.normalize("/srv//data/./cache").unwrap();
    /// assert_eq!(path, PathBuf::from("/srv/data/cache"));
    /// assert!(sanitizer.normalize("/srv/../etc").is_err());
    /// ```
    pub fn normalize(&self, path: &str) -> Result<PathBuf, PathSanitizerError> {
        if path.len() > self.max_path_len {
            return Err(PathSanitizerError::PathTooLong(path.to_string()));
        }
        if path.contains('\0') {
            tracing::warn!(path = %path.escape_debug(), "Host path contains null byte");
            return Err(PathSanitizerError::InvalidPath(
                "Path contains null byte".to_string(),
            ));
        }
        if path.contains('\\') {
            return Err(PathSanitizerError::InvalidPath(format!(
                "Backslash separators are not accepted: {}",
                path
            )));
        }

        let raw = Path::new(path);
        if !raw.is_absolute() {
            return Err(PathSanitizerError::InvalidPath(format!(
                "Host path must be absolute: {}",
                path
            )));
        }

        let mut normalized = PathBuf::new();
        for component in raw.components() {
            match component {
                Component::RootDir | Component::Prefix(_) => normalized.push(component),
                Component::CurDir => {}
                Component::Normal(part) => normalized.push(part),
                Component::ParentDir => {
                    tracing::warn!(path = %path, "Host path traversal attempt detected");
                    return Err(PathSanitizerError::PathTraversal(path.to_string()));
                }
            }
        }
        Ok(normalized)
    }

    /// Normalize `path` and require it to sit under one of `roots`.
    ///
    /// Roots are normalized with the same rules; an unparseable root never
    /// matches.
    pub fn contain(&self, path: &str, roots: &[PathBuf]) -> Result<PathBuf, PathSanitizerError> {
        let normalized = self.normalize(path)?;

        for forbidden in &self.forbidden {
            if normalized.starts_with(forbidden) || forbidden.starts_with(&normalized) {
                tracing::warn!(path = %path, forbidden = %forbidden.display(), "Forbidden host path requested");
                return Err(PathSanitizerError::OutsideBoundary(path.to_string()));
            }
        }

        let allowed = roots.iter().any(|root| {
            root.to_str()
                .and_then(|r| self.normalize(r).ok())
                .map(|root| normalized.starts_with(&root))
                .unwrap_or(false)
        });

        if !allowed {
            tracing::warn!(path = %path, "Host path outside allowed roots");
            return Err(PathSanitizerError::OutsideBoundary(path.to_string()));
        }
        Ok(normalized)
    }
}

impl Default for PathSanitizer {
    fn default() -> Self {
        Self::new()
    }
}

//! Error types shared by every cache crate

use miette::Diagnostic;
use std::path::Path;
use thiserror::Error;

/// Error type for cache operations.
///
/// Every failure the engine can recover from maps to exactly one of these
/// kinds; there is no catch-all variant. Build-step failures raised by the
/// driver are not part of this space and pass through the engine unchanged.
#[derive(Error, Debug, Diagnostic)]
pub enum Error {
    /// Invalid configuration. Fatal at initialize time.
    #[error("invalid cache configuration: {message}")]
    #[diagnostic(
        code(buildcache::configuration),
        help("Fix the cache configuration file or the overriding properties")
    )]
    Configuration {
        /// What was wrong with the configuration
        message: String,
    },

    /// Reading a build input failed. The affected module degrades to a
    /// cache miss with forced execution.
    #[error("failed to {operation} input {}", path.display())]
    #[diagnostic(code(buildcache::input_io))]
    InputIo {
        #[source]
        source: std::io::Error,
        /// The offending input path
        path: Box<Path>,
        /// Operation that failed (e.g. "open", "read")
        operation: String,
    },

    /// On-disk digest mismatch during restore. Fatal; the corrupted record
    /// is deleted before this error surfaces.
    #[error("integrity failure for {path}: expected digest {expected}, computed {actual}")]
    #[diagnostic(
        code(buildcache::integrity),
        help("The corrupted cache record has been removed; rerun the build")
    )]
    Integrity {
        /// Store path of the corrupted object
        path: String,
        expected: String,
        actual: String,
    },

    /// Transport or filesystem failure inside a blob store. Reads recover
    /// as "absent", writes recover as a skipped save; both log at WARN.
    #[error("store {operation} failed for {path}")]
    #[diagnostic(code(buildcache::store_io))]
    StoreIo {
        #[source]
        source: std::io::Error,
        /// Store-relative path of the object
        path: String,
        /// Operation that failed (e.g. "get", "put", "rename")
        operation: String,
    },

    /// Tracked property difference against the baseline build.
    #[error("reconciliation failed for {module}: {mismatches} tracked propert{} differ from the baseline", if *mismatches == 1 { "y" } else { "ies" })]
    #[diagnostic(
        code(buildcache::reconciliation),
        help("See diff.xml for the offending properties")
    )]
    Reconciliation {
        /// Module whose build diverged from the baseline
        module: String,
        /// Number of tracked properties that differ
        mismatches: usize,
    },

    /// Caching was disabled by the user; the API that raised this is a
    /// no-op for the rest of the session.
    #[error("cache is disabled")]
    #[diagnostic(code(buildcache::disabled))]
    Disabled,
}

impl Error {
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn input_io(
        source: std::io::Error,
        path: impl AsRef<Path>,
        operation: impl Into<String>,
    ) -> Self {
        Self::InputIo {
            source,
            path: path.as_ref().into(),
            operation: operation.into(),
        }
    }

    #[must_use]
    pub fn integrity(
        path: impl Into<String>,
        expected: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        Self::Integrity {
            path: path.into(),
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    #[must_use]
    pub fn store_io(
        source: std::io::Error,
        path: impl Into<String>,
        operation: impl Into<String>,
    ) -> Self {
        Self::StoreIo {
            source,
            path: path.into(),
            operation: operation.into(),
        }
    }

    #[must_use]
    pub fn reconciliation(module: impl Into<String>, mismatches: usize) -> Self {
        Self::Reconciliation {
            module: module.into(),
            mismatches,
        }
    }

    /// True when the error may be recovered by treating the lookup as a
    /// cache miss instead of failing the build.
    #[must_use]
    pub fn degrades_to_miss(&self) -> bool {
        matches!(self, Self::InputIo { .. } | Self::StoreIo { .. })
    }
}

/// Result type for cache operations
pub type Result<T> = std::result::Result<T, Error>;

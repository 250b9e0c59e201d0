//! Project index aggregation
//!
//! Collects per-module outcomes over the whole build and produces the
//! project index written at build completion. Entries are sorted by module
//! identity so the document bytes are identical for identical outcomes.

use buildcache_core::hash::Fingerprint;
use buildcache_core::model::{ModuleId, ProjectIndex, ProjectIndexEntry};
use std::sync::Mutex;

/// Thread-safe collector of module outcomes
#[derive(Debug, Default)]
pub struct Reporter {
    entries: Mutex<Vec<ProjectIndexEntry>>,
}

impl Reporter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one module's fingerprint and, when it was pushed to a shared
    /// store, its record URL
    pub fn add_module(&self, module: ModuleId, fingerprint: Fingerprint, url: Option<String>) {
        self.entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(ProjectIndexEntry {
                module,
                fingerprint,
                url,
            });
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Produce the index for this build, sorted by module identity
    #[must_use]
    pub fn build_index(&self, build_id: &str) -> ProjectIndex {
        let mut entries = self
            .entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone();
        entries.sort_by(|a, b| a.module.cmp(&b.module));
        ProjectIndex {
            build_id: build_id.to_string(),
            entries,
        }
    }
}

//! Module fingerprint computation and cross-module publication
//!
//! A module's fingerprint folds together, in fixed order: the cache
//! implementation version, the module identity (version excluded), the
//! canonicalized effective descriptor, the per-plugin configuration
//! digests, the sorted input file digests, and the fingerprints of every
//! immediate upstream module. Identical inputs yield identical
//! fingerprints on every run and every machine.

use crate::context::{ModuleBuildContext, PluginDescriptor};
use buildcache_core::config::CacheConfig;
use buildcache_core::hash::Fingerprint;
use buildcache_core::model::{InputFileRecord, ModuleId, UpstreamModule, CACHE_IMPLEMENTATION_VERSION};
use buildcache_core::Result;
use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::{Condvar, Mutex};
use tracing::{debug, warn};

/// Computes module fingerprints per configuration
pub struct ProjectFingerprinter<'a> {
    config: &'a CacheConfig,
}

impl<'a> ProjectFingerprinter<'a> {
    #[must_use]
    pub fn new(config: &'a CacheConfig) -> Self {
        Self { config }
    }

    /// Digest one plugin's effective configuration: keys in sorted order,
    /// values verbatim, excluded keys dropped
    #[must_use]
    pub fn plugin_configuration_digest(
        &self,
        group_id: &str,
        artifact_id: &str,
        configuration: &BTreeMap<String, String>,
    ) -> Fingerprint {
        let excludes = self.config.plugin_config_excludes(group_id, artifact_id);
        let mut hasher = self.config.algorithm().hasher();
        for (key, value) in configuration {
            if excludes.contains(key.as_str()) {
                continue;
            }
            hasher.update(&(key.len() as u64).to_le_bytes());
            hasher.update_str(key);
            hasher.update(&(value.len() as u64).to_le_bytes());
            hasher.update_str(value);
        }
        hasher.finish()
    }

    /// Compute the module fingerprint from the scanned inputs, the
    /// canonical descriptor bytes, and the published upstream fingerprints.
    pub fn compute(
        &self,
        module: &ModuleBuildContext,
        inputs: &[InputFileRecord],
        canonical_descriptor: &[u8],
        upstream: &[UpstreamModule],
    ) -> Result<Fingerprint> {
        let algo = self.config.algorithm();

        let mut plugin_parts = Vec::new();
        if self.config.is_process_plugins() {
            let mut plugins: Vec<&PluginDescriptor> = module.plugins.iter().collect();
            plugins.sort_by(|a, b| a.id.cmp(&b.id));
            for plugin in plugins {
                plugin_parts.push(algo.hash_str(&plugin.id.coordinates()));
                plugin_parts.push(self.plugin_configuration_digest(
                    &plugin.id.group_id,
                    &plugin.id.artifact_id,
                    &plugin.configuration,
                ));
            }
        }

        // inputs arrive sorted by relative path from the scanner
        let input_digests: Vec<Fingerprint> =
            inputs.iter().map(|f| f.digest.clone()).collect();

        let mut upstream_sorted: Vec<&UpstreamModule> = upstream.iter().collect();
        upstream_sorted.sort_by(|a, b| a.module.cmp(&b.module));
        let upstream_digests: Vec<Fingerprint> = upstream_sorted
            .iter()
            .map(|u| u.fingerprint.clone())
            .collect();

        let parts = vec![
            algo.hash_str(CACHE_IMPLEMENTATION_VERSION),
            algo.hash_str(&module.id.group_id),
            algo.hash_str(&module.id.artifact_id),
            algo.hash(canonical_descriptor),
            algo.combine(&plugin_parts)?,
            algo.combine(&input_digests)?,
            algo.combine(&upstream_digests)?,
        ];
        let fingerprint = algo.combine(&parts)?;
        debug!(module = %module.id, fingerprint = %fingerprint, files = inputs.len(),
            "module fingerprint computed");
        Ok(fingerprint)
    }
}

/// Per-build publication state of one module
#[derive(Debug, Clone, PartialEq, Eq)]
enum Publication {
    Published(Fingerprint),
    /// The module was skipped or could not be fingerprinted; downstream
    /// modules become ineligible too
    Ineligible,
}

/// Append-only, single-writer-per-key map of published module fingerprints.
///
/// Writers publish exactly once per module; readers blocked in
/// [`FingerprintIndex::wait_for_upstream`] observe a fingerprint only after
/// its publication (the mutex provides the happens-before edge). The driver
/// must publish or declare ineligible every module it schedules, otherwise
/// downstream waiters would block forever.
#[derive(Debug, Default)]
pub struct FingerprintIndex {
    entries: Mutex<HashMap<ModuleId, Publication>>,
    ready: Condvar,
}

impl FingerprintIndex {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a module's fingerprint. A second publication for the same
    /// module is a driver bug; the first value wins.
    pub fn publish(&self, module: ModuleId, fingerprint: Fingerprint) {
        self.insert(module, Publication::Published(fingerprint));
    }

    /// Declare a module ineligible for caching this build
    pub fn publish_ineligible(&self, module: ModuleId) {
        self.insert(module, Publication::Ineligible);
    }

    fn insert(&self, module: ModuleId, publication: Publication) {
        let mut entries = self
            .entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if entries.contains_key(&module) {
            warn!(%module, "fingerprint published twice; keeping the first publication");
        } else {
            entries.insert(module, publication);
        }
        drop(entries);
        self.ready.notify_all();
    }

    /// The published fingerprint of a module: `None` when nothing was
    /// published yet, `Some(None)` when the module is ineligible.
    #[must_use]
    pub fn get(&self, module: &ModuleId) -> Option<Option<Fingerprint>> {
        let entries = self
            .entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        entries.get(module).map(|p| match p {
            Publication::Published(fp) => Some(fp.clone()),
            Publication::Ineligible => None,
        })
    }

    /// Block until every listed upstream module has published, then return
    /// their fingerprints. `None` when any upstream is ineligible, which
    /// makes the waiting module ineligible as well.
    #[must_use]
    pub fn wait_for_upstream(&self, upstream: &[ModuleId]) -> Option<Vec<UpstreamModule>> {
        let mut entries = self
            .entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        loop {
            let mut resolved = Vec::with_capacity(upstream.len());
            let mut pending = false;
            for module in upstream {
                match entries.get(module) {
                    Some(Publication::Published(fp)) => resolved.push(UpstreamModule {
                        module: module.clone(),
                        fingerprint: fp.clone(),
                    }),
                    Some(Publication::Ineligible) => return None,
                    None => {
                        pending = true;
                        break;
                    }
                }
            }
            if !pending {
                return Some(resolved);
            }
            entries = self
                .ready
                .wait(entries)
                .unwrap_or_else(std::sync::PoisonError::into_inner);
        }
    }
}

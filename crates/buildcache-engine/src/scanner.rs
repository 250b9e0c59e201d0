//! Module input enumeration
//!
//! Produces the canonical input set of a module: every regular file under
//! the configured roots that survives the glob filter and the exclusion
//! rules, digested and sorted by relative path. The result is identical
//! for identical trees regardless of filesystem enumeration order.

use crate::context::ModuleBuildContext;
use buildcache_core::config::{CacheConfig, DirScan};
use buildcache_core::model::InputFileRecord;
use buildcache_core::{Error, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info_span, warn};
use walkdir::WalkDir;

/// Scans a module's inputs per configuration
pub struct InputScanner<'a> {
    config: &'a CacheConfig,
}

impl<'a> InputScanner<'a> {
    #[must_use]
    pub fn new(config: &'a CacheConfig) -> Self {
        Self { config }
    }

    /// Enumerate, digest and sort the module's input files.
    ///
    /// # Errors
    ///
    /// An unreadable file (or a followed symlink escaping the module root)
    /// is an `InputIo` error; the caller degrades the module to a miss with
    /// forced execution.
    pub fn scan(&self, module: &ModuleBuildContext) -> Result<Vec<InputFileRecord>> {
        let span = info_span!("input_scan", module = %module.id);
        let _guard = span.enter();

        let glob_filter = self.build_glob_filter()?;
        let exclude_set = self.build_exclude_set(module)?;
        let roots = self.scan_roots(module);
        let follow = self.config.follow_symlinks();
        let canonical_root = fs::canonicalize(&module.root_dir)
            .map_err(|e| Error::input_io(e, &module.root_dir, "canonicalize"))?;

        let mut seen: BTreeSet<String> = BTreeSet::new();
        let mut records: Vec<InputFileRecord> = Vec::new();

        for root in &roots {
            if !root.exists() {
                debug!(root = %root.display(), "scan root does not exist, skipping");
                continue;
            }
            for entry in WalkDir::new(root).follow_links(follow) {
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(e) => {
                        let path = e.path().map(Path::to_path_buf).unwrap_or_default();
                        let io = e
                            .into_io_error()
                            .unwrap_or_else(|| std::io::Error::other("walk failed"));
                        return Err(Error::input_io(io, path, "walk"));
                    }
                };
                let path = entry.path();

                if follow && entry.path_is_symlink() {
                    let target = fs::canonicalize(path)
                        .map_err(|e| Error::input_io(e, path, "canonicalize"))?;
                    if !target.starts_with(&canonical_root) {
                        return Err(Error::input_io(
                            std::io::Error::other(format!(
                                "symlink target {} escapes the module root",
                                target.display()
                            )),
                            path,
                            "follow",
                        ));
                    }
                }

                if !entry.file_type().is_file() {
                    continue;
                }
                let Ok(rel) = path.strip_prefix(&module.root_dir) else {
                    continue;
                };
                // build output is never an input, and neither are
                // dot-directories (VCS metadata, tool state, the local
                // cache itself under .mvn)
                if rel
                    .components()
                    .next()
                    .is_some_and(|c| c.as_os_str() == module.output_dir_name.as_str())
                    || rel
                        .components()
                        .any(|c| c.as_os_str().to_string_lossy().starts_with('.'))
                {
                    continue;
                }
                let rel_str = forward_slashes(rel);
                if exclude_set.is_match(rel) || self.config.is_output_excluded(&rel_str) {
                    continue;
                }
                if let Some(filter) = &glob_filter {
                    if !filter.is_match(rel) {
                        continue;
                    }
                }
                if !seen.insert(rel_str.clone()) {
                    continue;
                }
                let (digest, size_bytes) = self.config.algorithm().hash_file(path)?;
                records.push(InputFileRecord {
                    relative_path: rel_str,
                    digest,
                    size_bytes,
                });
            }
        }

        records.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
        debug!(files = records.len(), "input scan complete");
        Ok(records)
    }

    fn build_glob_filter(&self) -> Result<Option<GlobSet>> {
        let Some(glob) = self.config.global_glob() else {
            return Ok(None);
        };
        let compiled = Glob::new(glob)
            .map_err(|e| Error::configuration(format!("invalid input glob '{glob}': {e}")))?;
        let set = GlobSetBuilder::new()
            .add(compiled)
            .build()
            .map_err(|e| Error::configuration(format!("invalid input glob '{glob}': {e}")))?;
        Ok(Some(set))
    }

    fn build_exclude_set(&self, module: &ModuleBuildContext) -> Result<GlobSet> {
        let mut builder = GlobSetBuilder::new();
        let mut add = |pattern: &str| -> Result<()> {
            for expanded in path_pattern(pattern) {
                let glob = Glob::new(&expanded).map_err(|e| {
                    Error::configuration(format!("invalid exclude path '{pattern}': {e}"))
                })?;
                builder.add(glob);
            }
            Ok(())
        };
        for exclude in self.config.global_excludes() {
            add(exclude)?;
        }
        for plugin in &module.plugins {
            for dir_scan in self.plugin_dir_scans(plugin) {
                for exclude in &dir_scan.excludes.exclude {
                    add(exclude)?;
                }
            }
        }
        builder
            .build()
            .map_err(|e| Error::configuration(format!("invalid exclude set: {e}")))
    }

    /// The directories to walk: the module root (or the configured global
    /// includes) plus every configured plugin dir-scan include
    fn scan_roots(&self, module: &ModuleBuildContext) -> Vec<PathBuf> {
        let mut roots: Vec<PathBuf> = Vec::new();
        if self.config.global_includes().is_empty() {
            roots.push(module.root_dir.clone());
        } else {
            for include in self.config.global_includes() {
                roots.push(module.root_dir.join(include.trim_end_matches('/')));
            }
        }
        for plugin in &module.plugins {
            for dir_scan in self.plugin_dir_scans(plugin) {
                for include in &dir_scan.includes.include {
                    let root = module.root_dir.join(include.trim_end_matches('/'));
                    if !roots.contains(&root) {
                        roots.push(root);
                    }
                }
            }
        }
        roots
    }

    fn plugin_dir_scans(&self, plugin: &crate::context::PluginDescriptor) -> Vec<&'a DirScan> {
        let mut scans = Vec::new();
        if let Some(config) = self
            .config
            .plugin_scan(&plugin.id.group_id, &plugin.id.artifact_id)
        {
            if let Some(dir_scan) = &config.dir_scan {
                scans.push(dir_scan);
            }
        }
        for execution in &plugin.executions {
            if let Some(dir_scan) = self.config.execution_scan(
                &plugin.id.group_id,
                &plugin.id.artifact_id,
                &execution.id,
            ) {
                scans.push(dir_scan);
            }
        }
        scans
    }
}

/// Scan failures degrade the module instead of failing the build; this
/// helper centralizes the WARN the policy requires.
pub fn warn_degraded(module: &buildcache_core::model::ModuleId, error: &Error) {
    warn!(%module, %error, "input scan failed; module builds without caching");
}

fn forward_slashes(rel: &Path) -> String {
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// A configured include/exclude path selects the file itself and, for
/// directories, everything beneath it. Entries containing glob metacharacters
/// pass through untouched.
fn path_pattern(entry: &str) -> Vec<String> {
    let trimmed = entry.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return Vec::new();
    }
    let has_meta = trimmed.contains(['*', '?', '[', '{']);
    if has_meta {
        vec![trimmed.to_string()]
    } else {
        vec![trimmed.to_string(), format!("{trimmed}/**")]
    }
}

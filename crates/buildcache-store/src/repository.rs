//! Build-record repository
//!
//! Binds a fingerprint to its record location on every store and exposes
//! find/restore/save for records and artifacts. Saves go artifacts-first,
//! record-last, so any reader that observes a record is guaranteed to find
//! every artifact it references. The at-most-one-writer invariant rides on
//! the store's create-if-absent primitive over a lock object next to the
//! record.

use crate::blob::{BlobStore, LocalBlobStore};
use crate::evict;
use crate::remote::RemoteBlobStore;
use buildcache_core::hash::Fingerprint;
use buildcache_core::model::{
    ArtifactEntry, BuildRecord, ModuleId, ProjectIndex, RecordSource, BUILD_RECORD_FILE,
    CACHE_IMPLEMENTATION_VERSION, PROJECT_INDEX_FILE,
};
use buildcache_core::{xml, Error, Result};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Suffix of the lock object guarding a record save
pub const LOCK_SUFFIX: &str = ".lock";

/// Store directory of one (module, fingerprint) record
#[must_use]
pub fn record_dir(module: &ModuleId, fingerprint: &Fingerprint) -> String {
    format!(
        "v{CACHE_IMPLEMENTATION_VERSION}/{}/{}/{}",
        module.group_id,
        module.artifact_id,
        fingerprint.to_hex()
    )
}

/// Store path of the record document itself
#[must_use]
pub fn record_path(module: &ModuleId, fingerprint: &Fingerprint) -> String {
    format!("{}/{BUILD_RECORD_FILE}", record_dir(module, fingerprint))
}

/// Store path of one artifact inside a record directory
#[must_use]
pub fn artifact_path(module: &ModuleId, fingerprint: &Fingerprint, file_name: &str) -> String {
    format!("{}/{file_name}", record_dir(module, fingerprint))
}

/// Store path of a build's project index
#[must_use]
pub fn report_path(build_id: &str) -> String {
    format!("v{CACHE_IMPLEMENTATION_VERSION}/reports/{build_id}/{PROJECT_INDEX_FILE}")
}

/// How one store concluded a save
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    Saved,
    /// Another writer holds the record for this fingerprint
    AlreadyPresent,
    /// Saving was disabled, offline, or failed recoverably
    Skipped,
}

/// Per-store outcomes of one record save
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SaveReceipt {
    pub local: SaveOutcome,
    pub remote: SaveOutcome,
}

/// An artifact to persist: its manifest entry and the produced file
#[derive(Debug, Clone)]
pub struct ProducedArtifact {
    pub entry: ArtifactEntry,
    pub file: PathBuf,
}

/// Record repository over a local store and an optional remote store
#[derive(Debug)]
pub struct CacheRepository {
    local: LocalBlobStore,
    remote: Option<RemoteBlobStore>,
    save_to_remote: bool,
    /// Eviction requires exclusive access over the local root
    evict_lock: std::sync::Mutex<()>,
}

impl CacheRepository {
    #[must_use]
    pub fn new(
        local: LocalBlobStore,
        remote: Option<RemoteBlobStore>,
        save_to_remote: bool,
    ) -> Self {
        Self {
            local,
            remote,
            save_to_remote,
            evict_lock: std::sync::Mutex::new(()),
        }
    }

    #[must_use]
    pub fn local(&self) -> &LocalBlobStore {
        &self.local
    }

    /// Drop idle remote sessions at the end of the build
    pub fn shutdown(&self) {
        if let Some(remote) = &self.remote {
            remote.shutdown();
        }
    }

    /// Look up a record for (module, fingerprint): local store first, then
    /// the remote store. A remote hit is copied into the local store so the
    /// next lookup is local. Store failures on this read path degrade to
    /// "absent" with a WARN; they never fail the build.
    pub fn find_build(
        &self,
        module: &ModuleId,
        fingerprint: &Fingerprint,
    ) -> Result<Option<BuildRecord>> {
        let path = record_path(module, fingerprint);

        match self.local.get(&path) {
            Ok(Some(bytes)) => match xml::read_build_record(&bytes) {
                Ok(mut record) => {
                    record.source = RecordSource::Local;
                    // LRU eviction keys on the record file mtime
                    if let Err(e) = self.local.put(&path, &bytes) {
                        debug!(%module, error = %e, "could not refresh record mtime");
                    }
                    debug!(%module, fingerprint = %fingerprint, "cache hit in local store");
                    return Ok(Some(record));
                }
                Err(e) => {
                    warn!(%module, path, error = %e, "discarding unreadable local record");
                    let _ = self.local.delete_dir(&record_dir(module, fingerprint));
                }
            },
            Ok(None) => {}
            Err(e) => warn!(%module, path, error = %e, "local lookup failed; treating as absent"),
        }

        let Some(remote) = &self.remote else {
            return Ok(None);
        };
        let bytes = match remote.get(&path) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return Ok(None),
            Err(e) => {
                warn!(%module, path, error = %e, "remote lookup failed; treating as absent");
                return Ok(None);
            }
        };
        match xml::read_build_record(&bytes) {
            Ok(mut record) => {
                record.source = RecordSource::Remote;
                if let Err(e) = self.local.put(&path, &bytes) {
                    warn!(%module, error = %e, "could not copy remote record into local store");
                }
                debug!(%module, fingerprint = %fingerprint, "cache hit in remote store");
                Ok(Some(record))
            }
            Err(e) => {
                warn!(%module, path, error = %e, "remote record unreadable; treating as absent");
                Ok(None)
            }
        }
    }

    /// Transfer one artifact to `target` and verify its digest.
    ///
    /// Returns `false` when the artifact is absent from every store (the
    /// caller downgrades the module to a miss).
    ///
    /// # Errors
    ///
    /// A digest mismatch after transfer is an integrity failure: the local
    /// record is deleted, the partial target removed, and the build aborts.
    pub fn restore_artifact(
        &self,
        record: &BuildRecord,
        entry: &ArtifactEntry,
        target: &Path,
    ) -> Result<bool> {
        let path = artifact_path(&record.module, &record.fingerprint, &entry.file_name);

        let found_locally = match self.local.get_to_file(&path, target) {
            Ok(found) => found,
            Err(e) => {
                warn!(path, error = %e, "local artifact read failed; trying remote");
                false
            }
        };
        if !found_locally {
            let Some(remote) = &self.remote else {
                return Ok(false);
            };
            match remote.get_to_file(&path, target) {
                Ok(true) => {}
                Ok(false) => return Ok(false),
                Err(e) => {
                    warn!(path, error = %e, "remote artifact read failed; treating as absent");
                    return Ok(false);
                }
            }
        }

        let (digest, _size) = entry.digest.algorithm().hash_file(target)?;
        if digest != entry.digest {
            let _ = std::fs::remove_file(target);
            self.local
                .delete_dir(&record_dir(&record.module, &record.fingerprint))?;
            return Err(Error::integrity(
                path,
                entry.digest.to_hex(),
                digest.to_hex(),
            ));
        }
        debug!(path, "artifact restored");
        Ok(true)
    }

    /// Persist a completed build: artifact blobs first, the record last.
    ///
    /// At most one writer succeeds per (module, fingerprint); the losers
    /// observe [`SaveOutcome::AlreadyPresent`] and discard their record
    /// without retrying. Store failures downgrade the affected store to
    /// [`SaveOutcome::Skipped`] with a WARN.
    pub fn save_build(
        &self,
        record: &BuildRecord,
        artifacts: &[ProducedArtifact],
    ) -> Result<SaveReceipt> {
        let bytes = xml::write_build_record(record)?;
        let local = self.save_to(&self.local, "local", record, artifacts, &bytes);
        let remote = match (&self.remote, self.save_to_remote) {
            (Some(remote), true) => {
                if remote.is_offline() {
                    debug!(module = %record.module, "offline: remote save skipped");
                    SaveOutcome::Skipped
                } else {
                    self.save_to(remote, "remote", record, artifacts, &bytes)
                }
            }
            _ => SaveOutcome::Skipped,
        };
        Ok(SaveReceipt { local, remote })
    }

    fn save_to(
        &self,
        store: &dyn BlobStore,
        store_name: &str,
        record: &BuildRecord,
        artifacts: &[ProducedArtifact],
        record_bytes: &[u8],
    ) -> SaveOutcome {
        let dir = record_dir(&record.module, &record.fingerprint);
        let lock = format!("{dir}/{BUILD_RECORD_FILE}{LOCK_SUFFIX}");
        match store.put_if_absent(&lock, b"") {
            Ok(true) => {}
            Ok(false) => {
                debug!(module = %record.module, store = store_name,
                    "record already being written by another producer; discarding this one");
                return SaveOutcome::AlreadyPresent;
            }
            Err(e) => {
                warn!(module = %record.module, store = store_name, error = %e,
                    "could not take save lock; skipping save");
                return SaveOutcome::Skipped;
            }
        }

        for artifact in artifacts {
            let path = artifact_path(&record.module, &record.fingerprint, &artifact.entry.file_name);
            if let Err(e) = store.put_file(&path, &artifact.file) {
                warn!(module = %record.module, store = store_name, path, error = %e,
                    "artifact save failed; skipping save");
                return SaveOutcome::Skipped;
            }
        }
        let path = record_path(&record.module, &record.fingerprint);
        if let Err(e) = store.put(&path, record_bytes) {
            warn!(module = %record.module, store = store_name, path, error = %e,
                "record save failed; skipping save");
            return SaveOutcome::Skipped;
        }
        debug!(module = %record.module, store = store_name, path, "build record saved");
        SaveOutcome::Saved
    }

    /// Write the project index for a completed top-level build
    pub fn save_report(&self, index: &ProjectIndex) -> Result<()> {
        let bytes = xml::write_project_index(index)?;
        let path = report_path(&index.build_id);
        self.local.put(&path, &bytes)?;
        if let (Some(remote), true) = (&self.remote, self.save_to_remote) {
            if let Err(e) = remote.put(&path, &bytes) {
                warn!(path, error = %e, "could not publish project index to remote store");
            }
        }
        Ok(())
    }

    /// Read a previously written project index, e.g. as a baseline
    pub fn find_report(&self, build_id: &str) -> Result<Option<ProjectIndex>> {
        let path = report_path(build_id);
        if let Some(bytes) = self.local.get(&path)? {
            return xml::read_project_index(&bytes).map(Some);
        }
        let Some(remote) = &self.remote else {
            return Ok(None);
        };
        match remote.get(&path) {
            Ok(Some(bytes)) => xml::read_project_index(&bytes).map(Some),
            Ok(None) => Ok(None),
            Err(e) => {
                warn!(path, error = %e, "remote report lookup failed; treating as absent");
                Ok(None)
            }
        }
    }

    /// Delete a local record, e.g. after an integrity failure
    pub fn delete_local_record(
        &self,
        module: &ModuleId,
        fingerprint: &Fingerprint,
    ) -> Result<()> {
        self.local.delete_dir(&record_dir(module, fingerprint))
    }

    /// Enforce the bounded local cache, never touching fingerprints that
    /// the ongoing build references
    pub fn enforce_local_limit(
        &self,
        max_builds: usize,
        in_use: &HashSet<String>,
    ) -> Result<evict::EvictionStats> {
        let _exclusive = self
            .evict_lock
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        evict::enforce_limit(&self.local, max_builds, in_use)
    }
}

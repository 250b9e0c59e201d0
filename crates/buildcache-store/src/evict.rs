//! Bounded local cache enforcement
//!
//! The local store keeps at most `maxBuildsCached` record directories.
//! Eviction is LRU by record mtime (lookups refresh the mtime of the
//! record they hit) and runs with exclusive access over the local root,
//! after a save. A record referenced by the ongoing build is never deleted
//! regardless of its age.

use crate::blob::LocalBlobStore;
use buildcache_core::model::{BUILD_RECORD_FILE, CACHE_IMPLEMENTATION_VERSION};
use buildcache_core::{Error, Result};
use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;
use std::time::SystemTime;
use tracing::{debug, info};
use walkdir::WalkDir;

/// What an eviction pass did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvictionStats {
    pub scanned: usize,
    pub deleted: usize,
}

struct RecordDirInfo {
    dir: PathBuf,
    fingerprint_hex: String,
    mtime: SystemTime,
}

/// Delete the least recently touched record directories beyond
/// `max_builds`. Fingerprints listed in `in_use` are pinned.
pub fn enforce_limit(
    store: &LocalBlobStore,
    max_builds: usize,
    in_use: &HashSet<String>,
) -> Result<EvictionStats> {
    let version_root = store
        .root()
        .join(format!("v{CACHE_IMPLEMENTATION_VERSION}"));
    if !version_root.is_dir() {
        return Ok(EvictionStats {
            scanned: 0,
            deleted: 0,
        });
    }

    // record directories live at <root>/v1/<group>/<artifact>/<hex>/
    let mut records: Vec<RecordDirInfo> = Vec::new();
    for entry in WalkDir::new(&version_root)
        .min_depth(3)
        .max_depth(3)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        if !entry.file_type().is_dir() {
            continue;
        }
        let dir = entry.path().to_path_buf();
        let record_file = dir.join(BUILD_RECORD_FILE);
        let Ok(meta) = fs::metadata(&record_file) else {
            // interrupted save: lock without a record; not a cached build
            continue;
        };
        let mtime = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
        let fingerprint_hex = entry.file_name().to_string_lossy().to_string();
        records.push(RecordDirInfo {
            dir,
            fingerprint_hex,
            mtime,
        });
    }

    let scanned = records.len();
    records.sort_by(|a, b| b.mtime.cmp(&a.mtime));

    let mut deleted = 0usize;
    for (rank, record) in records.iter().enumerate() {
        if rank < max_builds {
            continue;
        }
        if in_use.contains(&record.fingerprint_hex) {
            debug!(fingerprint = %record.fingerprint_hex, "not evicting record in use by this build");
            continue;
        }
        match fs::remove_dir_all(&record.dir) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => {
                return Err(Error::store_io(
                    e,
                    record.dir.display().to_string(),
                    "remove_dir_all",
                ))
            }
        }
        deleted += 1;
        debug!(dir = %record.dir.display(), "evicted cache record");
    }

    if deleted > 0 {
        info!(scanned, deleted, max_builds, "local cache bounded");
    }
    Ok(EvictionStats { scanned, deleted })
}

//! Remote blob store over a pooled transport

use crate::blob::BlobStore;
use crate::transport::{TransportFactory, TransportPool};
use buildcache_core::Result;
use std::path::Path;
use tracing::info;

/// Blob store backed by a remote transport.
///
/// Every operation acquires a session from the shared pool and returns it
/// on completion. When the store is offline, reads answer "absent" and
/// writes are no-ops; both log the short-circuit so a silent cache miss is
/// never a mystery.
pub struct RemoteBlobStore {
    pool: TransportPool,
    offline: bool,
}

impl RemoteBlobStore {
    #[must_use]
    pub fn new(factory: TransportFactory, offline: bool) -> Self {
        Self {
            pool: TransportPool::new(factory),
            offline,
        }
    }

    #[must_use]
    pub fn is_offline(&self) -> bool {
        self.offline
    }

    /// Drop idle sessions at shutdown
    pub fn shutdown(&self) {
        self.pool.drain();
    }

    #[cfg(test)]
    pub(crate) fn idle_sessions(&self) -> usize {
        self.pool.idle_count()
    }
}

impl std::fmt::Debug for RemoteBlobStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteBlobStore")
            .field("offline", &self.offline)
            .finish_non_exhaustive()
    }
}

impl BlobStore for RemoteBlobStore {
    fn get(&self, path: &str) -> Result<Option<Vec<u8>>> {
        if self.offline {
            info!(path, "offline: remote read answered absent");
            return Ok(None);
        }
        let mut session = self.pool.acquire()?;
        session.get(path)
    }

    fn get_to_file(&self, path: &str, target: &Path) -> Result<bool> {
        if self.offline {
            info!(path, "offline: remote read answered absent");
            return Ok(false);
        }
        let mut session = self.pool.acquire()?;
        session.get_to_file(path, target)
    }

    fn put(&self, path: &str, bytes: &[u8]) -> Result<()> {
        if self.offline {
            info!(path, "offline: remote write skipped");
            return Ok(());
        }
        let mut session = self.pool.acquire()?;
        session.put(path, bytes)
    }

    fn put_file(&self, path: &str, source: &Path) -> Result<()> {
        if self.offline {
            info!(path, "offline: remote write skipped");
            return Ok(());
        }
        let mut session = self.pool.acquire()?;
        session.put_file(path, source)
    }

    fn put_if_absent(&self, path: &str, bytes: &[u8]) -> Result<bool> {
        if self.offline {
            info!(path, "offline: remote write skipped");
            return Ok(false);
        }
        let mut session = self.pool.acquire()?;
        session.put_if_absent(path, bytes)
    }
}

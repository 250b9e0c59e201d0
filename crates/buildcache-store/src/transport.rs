//! Remote transport seam and session pooling
//!
//! The wire protocol to a remote cache stays outside this crate: the engine
//! only needs the three blob operations. A [`Transport`] is one stateful
//! session against the remote endpoint; sessions are pooled and reused
//! across modules. [`FileTransport`] is the concrete shared-filesystem
//! implementation and the test double for every remote scenario.

use buildcache_core::{Error, Result};
use std::fs;
use std::io::Write;
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;
use tracing::debug;

/// One session against the remote endpoint.
///
/// Methods take `&mut self`: a session carries connection state and must
/// not be shared across threads; the pool hands each worker its own.
pub trait Transport: Send {
    fn get(&mut self, path: &str) -> Result<Option<Vec<u8>>>;

    fn get_to_file(&mut self, path: &str, target: &Path) -> Result<bool>;

    fn put(&mut self, path: &str, bytes: &[u8]) -> Result<()>;

    fn put_file(&mut self, path: &str, source: &Path) -> Result<()>;

    /// Create-if-absent. Transports without a conditional PUT emulate this
    /// with a lock-suffix probe, which is best-effort: two writers racing
    /// through such a transport can both observe "created". The filesystem
    /// implementation is exact.
    fn put_if_absent(&mut self, path: &str, bytes: &[u8]) -> Result<bool>;
}

/// Connection parameters handed to transport constructors
#[derive(Debug, Clone, Copy)]
pub struct TransportSettings {
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(60),
        }
    }
}

/// Factory producing connected sessions on demand
pub type TransportFactory = Box<dyn Fn() -> Result<Box<dyn Transport>> + Send + Sync>;

/// Pool of idle transport sessions.
///
/// Grows on demand with no hard size cap; a worker acquires a session
/// before every remote operation and the guard returns it on drop, error
/// paths included. `drain` drops every idle session at shutdown.
pub struct TransportPool {
    factory: TransportFactory,
    idle: Mutex<Vec<Box<dyn Transport>>>,
}

impl TransportPool {
    #[must_use]
    pub fn new(factory: TransportFactory) -> Self {
        Self {
            factory,
            idle: Mutex::new(Vec::new()),
        }
    }

    /// Take an idle session or connect a new one
    pub fn acquire(&self) -> Result<PooledTransport<'_>> {
        let reused = self
            .idle
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .pop();
        let session = match reused {
            Some(s) => s,
            None => {
                debug!("connecting new remote cache session");
                (self.factory)()?
            }
        };
        Ok(PooledTransport {
            pool: self,
            session: Some(session),
        })
    }

    /// Drop every idle session
    pub fn drain(&self) {
        self.idle
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clear();
    }

    #[must_use]
    pub fn idle_count(&self) -> usize {
        self.idle
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }

    fn release(&self, session: Box<dyn Transport>) {
        self.idle
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(session);
    }
}

impl std::fmt::Debug for TransportPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportPool")
            .field("idle", &self.idle_count())
            .finish()
    }
}

/// Guard over an acquired session; returns it to the pool on drop
pub struct PooledTransport<'a> {
    pool: &'a TransportPool,
    session: Option<Box<dyn Transport>>,
}

impl Deref for PooledTransport<'_> {
    type Target = dyn Transport;

    fn deref(&self) -> &Self::Target {
        self.session.as_deref().expect("session taken")
    }
}

impl DerefMut for PooledTransport<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.session.as_deref_mut().expect("session taken")
    }
}

impl Drop for PooledTransport<'_> {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            self.pool.release(session);
        }
    }
}

/// Shared-filesystem transport rooted under a directory.
///
/// Stands in for any URL-addressed remote; the settings are accepted for
/// contract parity but a local filesystem has no connection to time out.
#[derive(Debug, Clone)]
pub struct FileTransport {
    root: PathBuf,
}

impl FileTransport {
    /// Connect to the shared root.
    ///
    /// # Errors
    ///
    /// An unreachable root fails here, at connect time, the way a remote
    /// endpoint would.
    pub fn connect(root: impl Into<PathBuf>, _settings: TransportSettings) -> Result<Self> {
        let root = root.into();
        if !root.is_dir() {
            return Err(Error::store_io(
                std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("remote root {} is not reachable", root.display()),
                ),
                root.display().to_string(),
                "connect",
            ));
        }
        Ok(Self { root })
    }

    fn resolve(&self, path: &str) -> PathBuf {
        let mut full = self.root.clone();
        for part in path.split('/').filter(|p| !p.is_empty()) {
            full.push(part);
        }
        full
    }
}

impl Transport for FileTransport {
    fn get(&mut self, path: &str) -> Result<Option<Vec<u8>>> {
        match fs::read(self.resolve(path)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::store_io(e, path, "get")),
        }
    }

    fn get_to_file(&mut self, path: &str, target: &Path) -> Result<bool> {
        let full = self.resolve(path);
        if !full.is_file() {
            return Ok(false);
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|e| Error::store_io(e, path, "create_dir_all"))?;
        }
        let tmp = target.with_extension("restore-tmp");
        fs::copy(&full, &tmp).map_err(|e| Error::store_io(e, path, "get"))?;
        fs::rename(&tmp, target).map_err(|e| Error::store_io(e, path, "rename"))?;
        Ok(true)
    }

    fn put(&mut self, path: &str, bytes: &[u8]) -> Result<()> {
        let full = self.resolve(path);
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent).map_err(|e| Error::store_io(e, path, "create_dir_all"))?;
        }
        let tmp = full.with_extension("tmp");
        fs::write(&tmp, bytes).map_err(|e| Error::store_io(e, path, "put"))?;
        fs::rename(&tmp, &full).map_err(|e| Error::store_io(e, path, "rename"))
    }

    fn put_file(&mut self, path: &str, source: &Path) -> Result<()> {
        let full = self.resolve(path);
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent).map_err(|e| Error::store_io(e, path, "create_dir_all"))?;
        }
        let tmp = full.with_extension("tmp");
        fs::copy(source, &tmp).map_err(|e| Error::store_io(e, path, "put"))?;
        fs::rename(&tmp, &full).map_err(|e| Error::store_io(e, path, "rename"))
    }

    fn put_if_absent(&mut self, path: &str, bytes: &[u8]) -> Result<bool> {
        let full = self.resolve(path);
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent).map_err(|e| Error::store_io(e, path, "create_dir_all"))?;
        }
        let mut file = match fs::OpenOptions::new().write(true).create_new(true).open(&full) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => return Ok(false),
            Err(e) => return Err(Error::store_io(e, path, "create_new")),
        };
        file.write_all(bytes)
            .map_err(|e| Error::store_io(e, path, "put"))?;
        Ok(true)
    }
}

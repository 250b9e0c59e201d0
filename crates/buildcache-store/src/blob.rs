//! Blob store contract and the local filesystem implementation
//!
//! A blob store is a minimal key/value store over opaque forward-slash
//! paths. The local implementation is rooted under a configured directory
//! and writes through temp-file + rename so that a cancelled or crashed
//! build never leaves a partially written object at its final path.

use buildcache_core::{Error, Result};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Minimal key/value store over opaque paths
pub trait BlobStore: Send + Sync {
    /// Fetch an object; absent is `None`, not an error
    fn get(&self, path: &str) -> Result<Option<Vec<u8>>>;

    /// Transfer an object into a local file; `false` when absent
    fn get_to_file(&self, path: &str, target: &Path) -> Result<bool>;

    /// Store an object, overwriting any existing one
    fn put(&self, path: &str, bytes: &[u8]) -> Result<()>;

    /// Store a local file's contents, overwriting any existing object
    fn put_file(&self, path: &str, source: &Path) -> Result<()>;

    /// Atomically create an object only if none exists yet; `true` when
    /// this call created it. This is the primitive behind the
    /// at-most-one-writer guarantee on record saves.
    fn put_if_absent(&self, path: &str, bytes: &[u8]) -> Result<bool>;
}

/// Filesystem-backed blob store rooted under a configured directory
#[derive(Debug, Clone)]
pub struct LocalBlobStore {
    root: PathBuf,
}

impl LocalBlobStore {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> PathBuf {
        let mut full = self.root.clone();
        for part in path.split('/').filter(|p| !p.is_empty()) {
            full.push(part);
        }
        full
    }

    /// Remove a single object; absent is not an error
    pub fn delete(&self, path: &str) -> Result<()> {
        let full = self.resolve(path);
        match fs::remove_file(&full) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::store_io(e, path, "remove_file")),
        }
    }

    /// Remove a whole directory of objects, e.g. a corrupted record
    pub fn delete_dir(&self, path: &str) -> Result<()> {
        let full = self.resolve(path);
        match fs::remove_dir_all(&full) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::store_io(e, path, "remove_dir_all")),
        }
    }

    #[must_use]
    pub fn exists(&self, path: &str) -> bool {
        self.resolve(path).exists()
    }

    fn write_atomic(&self, path: &str, full: &Path, bytes: &[u8]) -> Result<()> {
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent).map_err(|e| Error::store_io(e, path, "create_dir_all"))?;
        }
        let tmp = full.with_extension("tmp");
        let mut file =
            fs::File::create(&tmp).map_err(|e| Error::store_io(e, path, "create"))?;
        file.write_all(bytes)
            .map_err(|e| Error::store_io(e, path, "write"))?;
        file.sync_all()
            .map_err(|e| Error::store_io(e, path, "sync"))?;
        drop(file);
        fs::rename(&tmp, full).map_err(|e| Error::store_io(e, path, "rename"))
    }
}

impl BlobStore for LocalBlobStore {
    fn get(&self, path: &str) -> Result<Option<Vec<u8>>> {
        let full = self.resolve(path);
        match fs::read(&full) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::store_io(e, path, "read")),
        }
    }

    fn get_to_file(&self, path: &str, target: &Path) -> Result<bool> {
        let full = self.resolve(path);
        if !full.is_file() {
            return Ok(false);
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|e| Error::store_io(e, path, "create_dir_all"))?;
        }
        let tmp = target.with_extension("restore-tmp");
        fs::copy(&full, &tmp).map_err(|e| Error::store_io(e, path, "copy"))?;
        fs::rename(&tmp, target).map_err(|e| Error::store_io(e, path, "rename"))?;
        Ok(true)
    }

    fn put(&self, path: &str, bytes: &[u8]) -> Result<()> {
        let full = self.resolve(path);
        self.write_atomic(path, &full, bytes)
    }

    fn put_file(&self, path: &str, source: &Path) -> Result<()> {
        let full = self.resolve(path);
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent).map_err(|e| Error::store_io(e, path, "create_dir_all"))?;
        }
        let tmp = full.with_extension("tmp");
        fs::copy(source, &tmp).map_err(|e| Error::store_io(e, path, "copy"))?;
        fs::rename(&tmp, &full).map_err(|e| Error::store_io(e, path, "rename"))
    }

    fn put_if_absent(&self, path: &str, bytes: &[u8]) -> Result<bool> {
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
            .map_err(|e| Error::store_io(e, path, "write"))?;
        file.sync_all()
            .map_err(|e| Error::store_io(e, path, "sync"))?;
        Ok(true)
    }
}

//! Blob stores and the build-record repository
//!
//! Two [`blob::BlobStore`] implementations sit behind one contract: the
//! local filesystem store and a remote store over a pooled
//! [`transport::Transport`]. [`repository::CacheRepository`] binds
//! fingerprints to record locations on top of them and owns the
//! artifacts-first/record-last save protocol, digest verification on
//! restore, and the at-most-one-writer lock.

pub mod blob;
pub mod evict;
pub mod remote;
pub mod repository;
pub mod transport;

pub use blob::{BlobStore, LocalBlobStore};
pub use remote::RemoteBlobStore;
pub use repository::{
    artifact_path, record_dir, record_path, report_path, CacheRepository, ProducedArtifact,
    SaveOutcome, SaveReceipt,
};
pub use transport::{
    FileTransport, PooledTransport, Transport, TransportFactory, TransportPool, TransportSettings,
};

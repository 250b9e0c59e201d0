//! Content digest engine
//!
//! Fingerprints are algorithm-tagged digests: the algorithm identifier is
//! carried next to the bytes so that a record produced under one algorithm
//! is never silently accepted by a session running another. The supported
//! algorithms are a closed set addressed by string identifier.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha512};
use std::fmt;
use std::fs;
use std::io::Read;
use std::path::Path;

/// Closed set of supported digest algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HashAlgorithm {
    Sha256,
    Sha512,
}

impl HashAlgorithm {
    /// Resolve an algorithm from its string identifier.
    ///
    /// # Errors
    ///
    /// Unknown identifiers are a configuration error; the set is closed.
    pub fn from_id(id: &str) -> Result<Self> {
        match id {
            "SHA-256" => Ok(Self::Sha256),
            "SHA-512" => Ok(Self::Sha512),
            other => Err(Error::configuration(format!(
                "unsupported hash algorithm '{other}' (supported: SHA-256, SHA-512)"
            ))),
        }
    }

    /// String identifier persisted in records and configuration
    #[must_use]
    pub fn id(&self) -> &'static str {
        match self {
            Self::Sha256 => "SHA-256",
            Self::Sha512 => "SHA-512",
        }
    }

    /// Digest width in bytes
    #[must_use]
    pub fn digest_len(&self) -> usize {
        match self {
            Self::Sha256 => 32,
            Self::Sha512 => 64,
        }
    }

    /// Start a streaming hasher
    #[must_use]
    pub fn hasher(&self) -> Hasher {
        let state = match self {
            Self::Sha256 => HasherState::Sha256(Sha256::new()),
            Self::Sha512 => HasherState::Sha512(Sha512::new()),
        };
        Hasher {
            algorithm: *self,
            state,
        }
    }

    /// Digest a byte slice in one shot
    #[must_use]
    pub fn hash(&self, bytes: &[u8]) -> Fingerprint {
        let mut hasher = self.hasher();
        hasher.update(bytes);
        hasher.finish()
    }

    /// Digest a UTF-8 string in one shot
    #[must_use]
    pub fn hash_str(&self, s: &str) -> Fingerprint {
        self.hash(s.as_bytes())
    }

    /// Digest a file's contents block-wise, returning the fingerprint and
    /// the file size in bytes. Never loads the whole file into memory.
    pub fn hash_file(&self, path: &Path) -> Result<(Fingerprint, u64)> {
        let mut file =
            fs::File::open(path).map_err(|e| Error::input_io(e, path, "open"))?;
        let mut hasher = self.hasher();
        let mut buf = [0u8; 1024 * 64];
        let mut total: u64 = 0;
        loop {
            let n = file
                .read(&mut buf)
                .map_err(|e| Error::input_io(e, path, "read"))?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
            total += n as u64;
        }
        Ok((hasher.finish(), total))
    }

    /// Fold ordered fingerprints into one aggregate.
    ///
    /// Defined as the digest of the length-prefixed concatenation of the
    /// inputs; ordering is the caller's responsibility. Mixing fingerprints
    /// produced under another algorithm is rejected rather than coerced.
    pub fn combine(&self, parts: &[Fingerprint]) -> Result<Fingerprint> {
        let mut hasher = self.hasher();
        for part in parts {
            if part.algorithm != *self {
                return Err(Error::configuration(format!(
                    "cannot combine {} fingerprint into a {} aggregate",
                    part.algorithm.id(),
                    self.id()
                )));
            }
            hasher.update(&(part.bytes.len() as u64).to_le_bytes());
            hasher.update(&part.bytes);
        }
        Ok(hasher.finish())
    }
}

impl Default for HashAlgorithm {
    fn default() -> Self {
        Self::Sha256
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

enum HasherState {
    Sha256(Sha256),
    Sha512(Sha512),
}

/// Stateful digest accumulator
pub struct Hasher {
    algorithm: HashAlgorithm,
    state: HasherState,
}

impl Hasher {
    pub fn update(&mut self, bytes: &[u8]) {
        match &mut self.state {
            HasherState::Sha256(h) => h.update(bytes),
            HasherState::Sha512(h) => h.update(bytes),
        }
    }

    pub fn update_str(&mut self, s: &str) {
        self.update(s.as_bytes());
    }

    #[must_use]
    pub fn finish(self) -> Fingerprint {
        let bytes: Box<[u8]> = match self.state {
            HasherState::Sha256(h) => h.finalize().to_vec().into_boxed_slice(),
            HasherState::Sha512(h) => h.finalize().to_vec().into_boxed_slice(),
        };
        Fingerprint {
            algorithm: self.algorithm,
            bytes,
        }
    }
}

/// Algorithm-tagged content digest.
///
/// Two fingerprints compare equal iff both the algorithm and the digest
/// bytes match. Hex encoding is used for persistence and lookup keys.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    algorithm: HashAlgorithm,
    bytes: Box<[u8]>,
}

impl Fingerprint {
    /// Parse a fingerprint from its persisted hex form.
    ///
    /// # Errors
    ///
    /// Fails when the hex is malformed or its width does not match the
    /// tagged algorithm.
    pub fn from_hex(algorithm: HashAlgorithm, hex_str: &str) -> Result<Self> {
        let bytes = hex::decode(hex_str).map_err(|e| {
            Error::configuration(format!("malformed fingerprint '{hex_str}': {e}"))
        })?;
        if bytes.len() != algorithm.digest_len() {
            return Err(Error::configuration(format!(
                "fingerprint width {} does not match {} (expected {})",
                bytes.len(),
                algorithm.id(),
                algorithm.digest_len()
            )));
        }
        Ok(Self {
            algorithm,
            bytes: bytes.into_boxed_slice(),
        })
    }

    #[must_use]
    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Lowercase hex of the digest bytes, as used in store paths
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(&self.bytes)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm.id(), self.to_hex())
    }
}

//! Content hashing over byte streams, files and strings.
//!
//! Integrity checks need a primary digest (SHA-256, compared against the
//! manifest) while cache-key derivation uses a compact legacy digest
//! (SHA-1). [`MultiHasher`] computes several algorithms in one streaming pass
//! so a file is read once no matter how many digests are requested.

use camino::Utf8Path;
use sha1::Sha1;
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use thiserror::Error;

/// Read buffer size for streaming digests.
const BUFFER_SIZE: usize = 8192;

/// Errors arising while computing digests.
#[derive(Debug, Error)]
pub enum DigestError {
    /// The input could not be read.
    #[error("failed to read {source_name} for hashing: {source}")]
    Read {
        /// Human-readable name of the input (usually a path).
        source_name: String,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// A digest for an algorithm that was not computed was requested.
    #[error("{algorithm} digest was not computed")]
    Missing {
        /// The requested algorithm.
        algorithm: DigestAlgorithm,
    },

    /// No algorithms were supplied to a [`MultiHasher`].
    #[error("at least one digest algorithm is required")]
    NoAlgorithms,
}

/// Supported digest algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DigestAlgorithm {
    /// 160-bit SHA-1, used for cache keys.
    Sha1,
    /// 256-bit SHA-256, used for integrity verification.
    Sha256,
}

impl DigestAlgorithm {
    /// Hash every byte produced by `reader`.
    ///
    /// # Errors
    ///
    /// Returns [`DigestError::Read`] when the reader fails.
    pub fn hash_reader(self, reader: impl Read) -> Result<ContentDigest, DigestError> {
        let mut digests = MultiHasher::new(&[self])?.hash_reader(reader, "stream")?;
        digests.take(self)
    }

    /// Hash the contents of the file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`DigestError::Read`] when the file cannot be opened or read.
    pub fn hash_file(self, path: &Utf8Path) -> Result<ContentDigest, DigestError> {
        let mut digests = MultiHasher::new(&[self])?.hash_file(path)?;
        digests.take(self)
    }

    /// Hash the UTF-8 bytes of `value`.
    ///
    /// # Examples
    ///
    /// ```
    /// use stowaway_common::digest::DigestAlgorithm;
    ///
    /// let digest = DigestAlgorithm::Sha1.hash_str("abc");
    /// assert_eq!(digest.as_hex(), "a9993e364706816aba3e25717850c26c9cd0d89d");
    /// ```
    #[must_use]
    pub fn hash_str(self, value: &str) -> ContentDigest {
        self.hash_bytes(value.as_bytes())
    }

    /// Hash an in-memory byte slice.
    #[must_use]
    pub fn hash_bytes(self, bytes: &[u8]) -> ContentDigest {
        let mut state = HasherState::new(self);
        state.update(bytes);
        state.finish()
    }
}

impl fmt::Display for DigestAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sha1 => write!(f, "SHA-1"),
            Self::Sha256 => write!(f, "SHA-256"),
        }
    }
}

/// A computed digest: algorithm plus raw bytes.
///
/// Two digests are equal when both the algorithm and the bytes match.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContentDigest {
    algorithm: DigestAlgorithm,
    bytes: Vec<u8>,
}

impl ContentDigest {
    /// The algorithm that produced this digest.
    #[must_use]
    pub const fn algorithm(&self) -> DigestAlgorithm {
        self.algorithm
    }

    /// Raw digest bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Lowercase hex rendering of the digest bytes.
    #[must_use]
    pub fn as_hex(&self) -> String {
        hex::encode(&self.bytes)
    }
}

impl fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.as_hex())
    }
}

/// Digests of one input, keyed by algorithm.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestSet {
    digests: Vec<ContentDigest>,
}

impl DigestSet {
    /// Look up the digest computed for `algorithm`.
    ///
    /// # Errors
    ///
    /// Returns [`DigestError::Missing`] when the algorithm was not part of the
    /// hashing pass.
    pub fn get(&self, algorithm: DigestAlgorithm) -> Result<&ContentDigest, DigestError> {
        self.digests
            .iter()
            .find(|digest| digest.algorithm == algorithm)
            .ok_or(DigestError::Missing { algorithm })
    }

    fn take(&mut self, algorithm: DigestAlgorithm) -> Result<ContentDigest, DigestError> {
        let index = self
            .digests
            .iter()
            .position(|digest| digest.algorithm == algorithm)
            .ok_or(DigestError::Missing { algorithm })?;
        Ok(self.digests.swap_remove(index))
    }
}

/// Computes several digests over the same input in a single read.
///
/// # Examples
///
/// ```
/// use stowaway_common::digest::{DigestAlgorithm, MultiHasher};
///
/// let hasher = MultiHasher::new(&[DigestAlgorithm::Sha1, DigestAlgorithm::Sha256])
///     .expect("algorithms supplied");
/// let digests = hasher.hash_reader(&b"abc"[..], "bytes").expect("in-memory read");
/// assert_eq!(
///     digests.get(DigestAlgorithm::Sha256).expect("computed").as_hex(),
///     "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
/// );
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultiHasher {
    algorithms: Vec<DigestAlgorithm>,
}

impl MultiHasher {
    /// Create a hasher for the given algorithms.
    ///
    /// # Errors
    ///
    /// Returns [`DigestError::NoAlgorithms`] when `algorithms` is empty.
    pub fn new(algorithms: &[DigestAlgorithm]) -> Result<Self, DigestError> {
        if algorithms.is_empty() {
            return Err(DigestError::NoAlgorithms);
        }
        let mut unique = algorithms.to_vec();
        unique.sort_unstable();
        unique.dedup();
        Ok(Self { algorithms: unique })
    }

    /// The SHA-1 + SHA-256 pair used for artifact verification.
    #[must_use]
    pub fn integrity() -> Self {
        Self {
            algorithms: vec![DigestAlgorithm::Sha1, DigestAlgorithm::Sha256],
        }
    }

    /// Hash a reader, fanning each chunk out to every algorithm.
    ///
    /// `source_name` only labels read errors.
    ///
    /// # Errors
    ///
    /// Returns [`DigestError::Read`] when the reader fails.
    pub fn hash_reader(
        &self,
        mut reader: impl Read,
        source_name: &str,
    ) -> Result<DigestSet, DigestError> {
        let mut states: Vec<HasherState> =
            self.algorithms.iter().copied().map(HasherState::new).collect();
        let mut buffer = [0u8; BUFFER_SIZE];
        loop {
            let bytes_read = match reader.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(source) => {
                    return Err(DigestError::Read {
                        source_name: source_name.to_owned(),
                        source,
                    });
                }
            };
            let chunk = buffer.get(..bytes_read).unwrap_or_default();
            for state in &mut states {
                state.update(chunk);
            }
        }
        Ok(DigestSet {
            digests: states.into_iter().map(HasherState::finish).collect(),
        })
    }

    /// Hash the contents of the file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`DigestError::Read`] when the file cannot be opened or read.
    pub fn hash_file(&self, path: &Utf8Path) -> Result<DigestSet, DigestError> {
        let file = File::open(path).map_err(|source| DigestError::Read {
            source_name: path.to_string(),
            source,
        })?;
        self.hash_reader(file, path.as_str())
    }
}

enum HasherState {
    Sha1(Sha1),
    Sha256(Sha256),
}

impl HasherState {
    fn new(algorithm: DigestAlgorithm) -> Self {
        match algorithm {
            DigestAlgorithm::Sha1 => Self::Sha1(Sha1::new()),
            DigestAlgorithm::Sha256 => Self::Sha256(Sha256::new()),
        }
    }

    fn update(&mut self, chunk: &[u8]) {
        match self {
            Self::Sha1(hasher) => hasher.update(chunk),
            Self::Sha256(hasher) => hasher.update(chunk),
        }
    }

    fn finish(self) -> ContentDigest {
        match self {
            Self::Sha1(hasher) => ContentDigest {
                algorithm: DigestAlgorithm::Sha1,
                bytes: hasher.finalize().to_vec(),
            },
            Self::Sha256(hasher) => ContentDigest {
                algorithm: DigestAlgorithm::Sha256,
                bytes: hasher.finalize().to_vec(),
            },
        }
    }
}

//! Shared building blocks for stowaway: artifact coordinates, content
//! digests and write-then-rename file helpers.

pub mod coordinate;
pub mod digest;
pub mod fs;

pub use coordinate::{ArtifactCoordinate, ArtifactKey, CoordinateError, DEFAULT_EXTENSION};
pub use digest::{ContentDigest, DigestAlgorithm, DigestError, DigestSet, MultiHasher};

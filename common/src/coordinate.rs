//! Artifact coordinates and their textual notation.
//!
//! A coordinate names one binary file in a Maven-style repository:
//! `group:name:version[:classifier]@extension`, paired with the SHA-256
//! digest the file must hash to. The same relative path serves both as the
//! download location under a repository base URL and as the slot in the
//! local cache.

use crate::digest::{ContentDigest, DigestAlgorithm};
use camino::Utf8PathBuf;
use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Packaging type assumed when a notation omits `@extension`.
pub const DEFAULT_EXTENSION: &str = "jar";

/// Expected length of a hex-encoded SHA-256 digest.
const SHA256_HEX_LEN: usize = 64;

/// Timestamped snapshot versions such as `1.0-20240101.123456-7`.
#[expect(
    clippy::expect_used,
    reason = "the pattern is a literal and is covered by unit tests"
)]
static UNIQUE_SNAPSHOT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^.+-(\d{8}\.\d{6}-\d+)$").expect("snapshot pattern compiles"));

/// Errors arising from malformed coordinate notation or hashes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoordinateError {
    /// The `group:name:version[:classifier]@extension` notation is malformed.
    #[error("invalid coordinate notation \"{notation}\": {reason}")]
    InvalidNotation {
        /// The rejected notation.
        notation: String,
        /// Description of the validation failure.
        reason: String,
    },

    /// The expected hash is not a 64-character hex string.
    #[error("invalid SHA-256 hash \"{value}\": {reason}")]
    InvalidHash {
        /// The rejected hash.
        value: String,
        /// Description of the validation failure.
        reason: String,
    },
}

/// Identity of an artifact without its expected hash.
///
/// A manifest may list each key at most once.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ArtifactKey {
    group: String,
    name: String,
    version: String,
    classifier: Option<String>,
    extension: String,
}

impl fmt::Display for ArtifactKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.group, self.name, self.version)?;
        if let Some(classifier) = &self.classifier {
            write!(f, ":{classifier}")?;
        }
        write!(f, "@{}", self.extension)
    }
}

/// An immutable artifact coordinate with its expected SHA-256 hash.
///
/// Ordering is lexicographic over group, name, version, classifier (absent
/// sorts as empty), extension and hash, so sorted coordinate lists hash to a
/// stable value.
///
/// # Examples
///
/// ```
/// use stowaway_common::coordinate::ArtifactCoordinate;
///
/// let hash = "ab".repeat(32);
/// let coordinate = ArtifactCoordinate::parse("org.example:lib:1.2.3:sources@jar", &hash)
///     .expect("valid coordinate");
/// assert_eq!(coordinate.classifier(), Some("sources"));
/// assert_eq!(coordinate.extension(), "jar");
/// assert_eq!(coordinate.to_string(), "org.example:lib:1.2.3:sources@jar");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ArtifactCoordinate {
    key: ArtifactKey,
    expected_hash: String,
}

impl ArtifactCoordinate {
    /// Build a coordinate from its parts, validating the hash.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinateError::InvalidNotation`] when a required part is
    /// empty or contains a separator, and [`CoordinateError::InvalidHash`]
    /// when `expected_hash` is not 64 hex characters.
    pub fn new(
        group: &str,
        name: &str,
        version: &str,
        classifier: Option<&str>,
        extension: &str,
        expected_hash: &str,
    ) -> Result<Self, CoordinateError> {
        let key = ArtifactKey {
            group: group.to_owned(),
            name: name.to_owned(),
            version: version.to_owned(),
            classifier: classifier.map(str::to_owned),
            extension: extension.to_owned(),
        };
        validate_parts(&key)?;
        Ok(Self {
            key,
            expected_hash: normalise_hash(expected_hash)?,
        })
    }

    /// Parse `group:name:version[:classifier][@extension]` with a hash.
    ///
    /// A missing `@extension` selects [`DEFAULT_EXTENSION`].
    ///
    /// # Errors
    ///
    /// Returns a [`CoordinateError`] when the notation does not have three or
    /// four `:`-separated parts, any part is empty, or the hash is invalid.
    pub fn parse(notation: &str, expected_hash: &str) -> Result<Self, CoordinateError> {
        let invalid = |reason: &str| CoordinateError::InvalidNotation {
            notation: notation.to_owned(),
            reason: reason.to_owned(),
        };

        let (body, extension) = notation
            .rsplit_once('@')
            .unwrap_or((notation, DEFAULT_EXTENSION));
        let parts: Vec<&str> = body.split(':').collect();
        let (group, name, version, classifier) = match parts.as_slice() {
            [group, name, version] => (*group, *name, *version, None),
            [group, name, version, classifier] => (*group, *name, *version, Some(*classifier)),
            _ => return Err(invalid("expected group:name:version[:classifier]")),
        };
        Self::new(group, name, version, classifier, extension, expected_hash)
    }

    /// Parse a manifest dependency line of the form `notation sha256`.
    ///
    /// # Errors
    ///
    /// Returns a [`CoordinateError`] when the line does not contain exactly
    /// two whitespace-separated tokens or either token is invalid.
    pub fn parse_line(line: &str) -> Result<Self, CoordinateError> {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        match tokens.as_slice() {
            [notation, hash] => Self::parse(notation, hash),
            _ => Err(CoordinateError::InvalidNotation {
                notation: line.to_owned(),
                reason: "expected \"<notation> <sha256>\"".to_owned(),
            }),
        }
    }

    /// Group identifier, e.g. `org.example`.
    #[must_use]
    pub fn group(&self) -> &str {
        &self.key.group
    }

    /// Artifact name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.key.name
    }

    /// Version string as declared.
    #[must_use]
    pub fn version(&self) -> &str {
        &self.key.version
    }

    /// Optional classifier, e.g. `sources`.
    #[must_use]
    pub fn classifier(&self) -> Option<&str> {
        self.key.classifier.as_deref()
    }

    /// Packaging extension, e.g. `jar`.
    #[must_use]
    pub fn extension(&self) -> &str {
        &self.key.extension
    }

    /// Lowercase hex SHA-256 the artifact must hash to.
    #[must_use]
    pub fn expected_hash(&self) -> &str {
        &self.expected_hash
    }

    /// The coordinate identity without its hash.
    #[must_use]
    pub const fn key(&self) -> &ArtifactKey {
        &self.key
    }

    /// Whether the artifact has the default packaging type.
    #[must_use]
    pub fn is_default_packaging(&self) -> bool {
        self.key.extension == DEFAULT_EXTENSION
    }

    /// Whether `digest` is a SHA-256 digest equal to the expected hash.
    #[must_use]
    pub fn matches(&self, digest: &ContentDigest) -> bool {
        digest.algorithm() == DigestAlgorithm::Sha256 && digest.as_hex() == self.expected_hash
    }

    /// Render the manifest dependency line, `notation sha256`.
    #[must_use]
    pub fn to_manifest_line(&self) -> String {
        format!("{} {}", self.key, self.expected_hash)
    }

    /// Repository-relative path of the artifact.
    ///
    /// The layout is `group/as/dirs/name/version/name-version[-classifier].ext`.
    /// Timestamped snapshot versions are folded to `-SNAPSHOT` in the version
    /// directory so repeated snapshot builds share one slot.
    ///
    /// # Examples
    ///
    /// ```
    /// use stowaway_common::coordinate::ArtifactCoordinate;
    ///
    /// let hash = "0".repeat(64);
    /// let coordinate = ArtifactCoordinate::parse("org.example:lib:1.0", &hash).expect("valid");
    /// assert_eq!(
    ///     coordinate.repository_path().as_str(),
    ///     "org/example/lib/1.0/lib-1.0.jar"
    /// );
    /// ```
    #[must_use]
    pub fn repository_path(&self) -> Utf8PathBuf {
        let mut path: Utf8PathBuf = self.key.group.split('.').collect();
        path.push(&self.key.name);
        path.push(non_unique_snapshot(&self.key.version));
        path.push(self.file_name());
        path
    }

    /// File name of the artifact, `name-version[-classifier].ext`.
    #[must_use]
    pub fn file_name(&self) -> String {
        let classifier = self
            .key
            .classifier
            .as_ref()
            .map(|classifier| format!("-{classifier}"))
            .unwrap_or_default();
        format!(
            "{}-{}{}.{}",
            self.key.name, self.key.version, classifier, self.key.extension
        )
    }
}

impl fmt::Display for ArtifactCoordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key)
    }
}

impl FromStr for ArtifactCoordinate {
    type Err = CoordinateError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        Self::parse_line(line)
    }
}

/// Replace a timestamped snapshot qualifier with `SNAPSHOT`.
///
/// # Examples
///
/// ```
/// use stowaway_common::coordinate::non_unique_snapshot;
///
/// assert_eq!(non_unique_snapshot("1.0-20240101.123456-7"), "1.0-SNAPSHOT");
/// assert_eq!(non_unique_snapshot("1.0"), "1.0");
/// ```
#[must_use]
pub fn non_unique_snapshot(version: &str) -> String {
    UNIQUE_SNAPSHOT
        .captures(version)
        .and_then(|captures| captures.get(1))
        .map_or_else(
            || version.to_owned(),
            |timestamp| {
                format!(
                    "{}SNAPSHOT",
                    version.get(..timestamp.start()).unwrap_or_default()
                )
            },
        )
}

fn validate_parts(key: &ArtifactKey) -> Result<(), CoordinateError> {
    let mut parts = vec![
        ("group", key.group.as_str()),
        ("name", key.name.as_str()),
        ("version", key.version.as_str()),
        ("extension", key.extension.as_str()),
    ];
    if let Some(classifier) = &key.classifier {
        parts.push(("classifier", classifier.as_str()));
    }
    for (label, value) in parts {
        if value.is_empty() {
            return Err(CoordinateError::InvalidNotation {
                notation: key.to_string(),
                reason: format!("{label} must not be empty"),
            });
        }
        if value
            .chars()
            .any(|c| matches!(c, ':' | '@' | '/' | '\\') || c.is_whitespace())
        {
            return Err(CoordinateError::InvalidNotation {
                notation: key.to_string(),
                reason: format!("{label} \"{value}\" contains a reserved character"),
            });
        }
    }
    if key.group.split('.').any(|segment| segment.is_empty() || segment == "..") {
        return Err(CoordinateError::InvalidNotation {
            notation: key.to_string(),
            reason: "group must be dot-separated non-empty segments".to_owned(),
        });
    }
    if matches!(key.name.as_str(), "." | "..") || matches!(key.version.as_str(), "." | "..") {
        return Err(CoordinateError::InvalidNotation {
            notation: key.to_string(),
            reason: "name and version must not be relative path components".to_owned(),
        });
    }
    Ok(())
}

/// Validate a hex SHA-256 and fold it to lowercase.
fn normalise_hash(value: &str) -> Result<String, CoordinateError> {
    if value.len() != SHA256_HEX_LEN {
        return Err(CoordinateError::InvalidHash {
            value: value.to_owned(),
            reason: format!(
                "expected {SHA256_HEX_LEN} hex characters, got {}",
                value.len()
            ),
        });
    }
    if let Some(bad) = value.chars().find(|c| !c.is_ascii_hexdigit()) {
        return Err(CoordinateError::InvalidHash {
            value: value.to_owned(),
            reason: format!("non-hex character '{bad}'"),
        });
    }
    Ok(value.to_ascii_lowercase())
}

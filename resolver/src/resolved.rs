//! The result of a resolution.

use camino::{Utf8Path, Utf8PathBuf};
use std::collections::BTreeMap;
use stowaway_common::coordinate::ArtifactCoordinate;

/// Immutable mapping from declared artifact to its final local path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedSet {
    paths: BTreeMap<ArtifactCoordinate, Utf8PathBuf>,
}

impl ResolvedSet {
    /// Wrap a finished mapping.
    #[must_use]
    pub const fn new(paths: BTreeMap<ArtifactCoordinate, Utf8PathBuf>) -> Self {
        Self { paths }
    }

    /// The path resolved for `coordinate`.
    #[must_use]
    pub fn get(&self, coordinate: &ArtifactCoordinate) -> Option<&Utf8Path> {
        self.paths.get(coordinate).map(Utf8PathBuf::as_path)
    }

    /// Every entry, ordered by coordinate.
    pub fn iter(&self) -> impl Iterator<Item = (&ArtifactCoordinate, &Utf8Path)> {
        self.paths
            .iter()
            .map(|(coordinate, path)| (coordinate, path.as_path()))
    }

    /// Entries whose extension is the default packaging type.
    pub fn default_packaging(&self) -> impl Iterator<Item = (&ArtifactCoordinate, &Utf8Path)> {
        self.iter()
            .filter(|(coordinate, _)| coordinate.is_default_packaging())
    }

    /// Number of resolved artifacts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.paths.len()
    }

    /// Whether nothing was resolved.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    /// Take the underlying map.
    #[must_use]
    pub fn into_map(self) -> BTreeMap<ArtifactCoordinate, Utf8PathBuf> {
        self.paths
    }
}

impl<'a> IntoIterator for &'a ResolvedSet {
    type Item = (&'a ArtifactCoordinate, &'a Utf8PathBuf);
    type IntoIter = std::collections::btree_map::Iter<'a, ArtifactCoordinate, Utf8PathBuf>;

    fn into_iter(self) -> Self::IntoIter {
        self.paths.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_packaging_view_filters_by_extension() {
        let hash = "d".repeat(64);
        let jar = ArtifactCoordinate::parse("g:lib:1", &hash).expect("jar");
        let pom = ArtifactCoordinate::parse("g:lib:1@pom", &hash).expect("pom");
        let set = ResolvedSet::new(BTreeMap::from([
            (jar.clone(), Utf8PathBuf::from("/c/lib-1.jar")),
            (pom.clone(), Utf8PathBuf::from("/c/lib-1.pom")),
        ]));

        let jars: Vec<_> = set.default_packaging().map(|(c, _)| c.clone()).collect();
        assert_eq!(jars, [jar.clone()]);
        assert_eq!(set.len(), 2);
        assert_eq!(set.get(&pom), Some(Utf8Path::new("/c/lib-1.pom")));
        assert_eq!(set.get(&jar), Some(Utf8Path::new("/c/lib-1.jar")));
    }
}

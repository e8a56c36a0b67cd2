//! The candidate pipeline: crawl, parse, filter, rank.
//!
//! For a requirement, the iterator collects seed links from every fetcher,
//! crawls them, parses each discovered href into a [`Package`], discards
//! variants outside the configured precedence and candidates that do not
//! satisfy the requirement, and yields the rest best-match first.

use async_trait::async_trait;
use indexmap::IndexSet;

use crate::crawler::Crawler;
use crate::fetcher::Fetcher;
use crate::types::{Link, Package, PackageKind, Requirement};

/// The preference order over package variants. A variant not in the list is
/// ranked below every listed one and filtered out of iterator results
/// entirely, which is how `--no-build` and `--no-wheel` take effect.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Precedence(Vec<PackageKind>);

impl Default for Precedence {
    /// Binaries first, building from source as the last resort.
    fn default() -> Self {
        Precedence(vec![
            PackageKind::Wheel,
            PackageKind::Egg,
            PackageKind::Source,
        ])
    }
}

impl Precedence {
    /// A precedence over exactly the given variants, most preferred first.
    pub fn new(kinds: impl IntoIterator<Item = PackageKind>) -> Precedence {
        let mut seen = Vec::new();
        for kind in kinds {
            if !seen.contains(&kind) {
                seen.push(kind);
            }
        }
        Precedence(seen)
    }

    /// The variants in preference order.
    pub fn kinds(&self) -> &[PackageKind] {
        &self.0
    }

    /// Is the variant allowed at all?
    pub fn allows(&self, kind: PackageKind) -> bool {
        self.0.contains(&kind)
    }

    /// The rank of a variant: its position from the end of the list, so that
    /// more-preferred variants rank higher. Unlisted variants rank `-1`.
    pub fn rank(&self, kind: PackageKind) -> i32 {
        match self.0.iter().position(|k| *k == kind) {
            Some(idx) => (self.0.len() - 1 - idx) as i32,
            None => -1,
        }
    }

    /// This precedence with `kind` prepended as the most preferred variant.
    pub fn preferring(&self, kind: PackageKind) -> Precedence {
        Precedence::new(std::iter::once(kind).chain(self.0.iter().copied()))
    }

    /// This precedence with `kind` appended as the least preferred variant.
    pub fn falling_back_to(&self, kind: PackageKind) -> Precedence {
        Precedence::new(self.0.iter().copied().chain(std::iter::once(kind)))
    }

    /// This precedence with `kind` removed.
    pub fn without(&self, kind: PackageKind) -> Precedence {
        Precedence(self.0.iter().copied().filter(|k| *k != kind).collect())
    }
}

/// The total ranking key of a package: highest version first, then preferred
/// variant, then local over remote.
pub fn precedence_key(package: &Package, precedence: &Precedence) -> impl Ord {
    (
        package.version().clone(),
        precedence.rank(package.kind()),
        package.local(),
    )
}

/// Sorts candidates best-match first with a deterministic tie-break on the
/// underlying URL.
pub fn sort_by_precedence(packages: &mut [Package], precedence: &Precedence) {
    packages.sort_by(|a, b| {
        precedence_key(b, precedence)
            .cmp(&precedence_key(a, precedence))
            .then_with(|| a.link().url().as_str().cmp(b.link().url().as_str()))
    });
}

/// Anything that can enumerate candidate packages for a requirement, best
/// match first.
#[async_trait]
pub trait PackageIter: Send + Sync {
    /// The candidates satisfying `requirement`, in rank order.
    async fn iter(&self, requirement: &Requirement) -> Vec<Package>;
}

/// The crawl → parse → filter → rank pipeline over a set of fetchers.
pub struct PackageIterator {
    fetchers: Vec<Fetcher>,
    crawler: Crawler,
    precedence: Precedence,
    follow_links: bool,
}

impl PackageIterator {
    /// Assembles a pipeline.
    pub fn new(
        fetchers: Vec<Fetcher>,
        crawler: Crawler,
        precedence: Precedence,
        follow_links: bool,
    ) -> PackageIterator {
        PackageIterator {
            fetchers,
            crawler,
            precedence,
            follow_links,
        }
    }
}

#[async_trait]
impl PackageIter for PackageIterator {
    async fn iter(&self, requirement: &Requirement) -> Vec<Package> {
        let name = requirement.key();
        let mut seeds: IndexSet<Link> = IndexSet::new();
        for fetcher in &self.fetchers {
            seeds.extend(fetcher.links(&name));
        }

        let discovered = self.crawler.crawl(seeds, self.follow_links).await;
        let mut packages: Vec<Package> = discovered
            .into_iter()
            .filter_map(Package::from_link)
            .filter(|package| self.precedence.allows(package.kind()))
            .filter(|package| package.satisfies(requirement))
            .collect();
        sort_by_precedence(&mut packages, &self.precedence);
        packages
    }
}

/// An iterator over an already-known candidate set. The resolver uses this to
/// re-narrow a name's current compatible set against a new requirement
/// without touching the network again.
pub struct StaticIterator {
    packages: Vec<Package>,
    precedence: Precedence,
}

impl StaticIterator {
    /// Wraps a fixed candidate set.
    pub fn new(packages: impl IntoIterator<Item = Package>, precedence: Precedence) -> Self {
        StaticIterator {
            packages: packages.into_iter().collect(),
            precedence,
        }
    }
}

#[async_trait]
impl PackageIter for StaticIterator {
    async fn iter(&self, requirement: &Requirement) -> Vec<Package> {
        let mut packages: Vec<Package> = self
            .packages
            .iter()
            .filter(|package| package.satisfies(requirement))
            .cloned()
            .collect();
        sort_by_precedence(&mut packages, &self.precedence);
        packages
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::context::Context;
    use std::time::Duration;

    fn packages() -> (Package, Package, Package) {
        (
            Package::from_href("psutil-0.6.1.tar.gz").unwrap(),
            Package::from_href("psutil-0.6.1-py2.7-macosx-10.4-x86_64.egg").unwrap(),
            Package::from_href("psutil-0.6.1-cp27-none-macosx_10_4_x86_64.whl").unwrap(),
        )
    }

    #[test]
    fn test_default_precedence_ranks_binaries_first() {
        let (tgz, egg, whl) = packages();
        let precedence = Precedence::default();

        assert!(
            precedence_key(&whl, &precedence) > precedence_key(&egg, &precedence),
            "wheels beat eggs"
        );
        assert!(
            precedence_key(&egg, &precedence) > precedence_key(&tgz, &precedence),
            "eggs beat sdists"
        );
    }

    #[test]
    fn test_unlisted_variant_ranks_below_everything() {
        let (tgz, egg, whl) = packages();
        let precedence = Precedence::new([PackageKind::Egg, PackageKind::Wheel]);

        assert_eq!(precedence.rank(PackageKind::Source), -1);
        assert!(precedence_key(&egg, &precedence) > precedence_key(&whl, &precedence));
        assert!(precedence_key(&whl, &precedence) > precedence_key(&tgz, &precedence));

        let mut ranked = vec![tgz, egg.clone(), whl.clone()];
        sort_by_precedence(&mut ranked, &precedence);
        assert_eq!(ranked[0], egg);
        assert_eq!(ranked[1], whl);
    }

    #[test]
    fn test_higher_version_beats_preferred_variant() {
        let old_wheel = Package::from_href("foo-1.0-py3-none-any.whl").unwrap();
        let new_sdist = Package::from_href("foo-2.0.tar.gz").unwrap();
        let precedence = Precedence::default();
        assert!(precedence_key(&new_sdist, &precedence) > precedence_key(&old_wheel, &precedence));
    }

    #[test]
    fn test_local_beats_remote() {
        let local = Package::from_href("/somewhere/foo-1.0.tar.gz").unwrap();
        let remote = Package::from_href("https://example.com/foo-1.0.tar.gz").unwrap();
        let precedence = Precedence::default();
        assert!(precedence_key(&local, &precedence) > precedence_key(&remote, &precedence));
    }

    #[tokio::test]
    async fn test_static_iterator_narrows() {
        let one = Package::from_href("foo-1.0.tar.gz").unwrap();
        let two = Package::from_href("foo-2.0.tar.gz").unwrap();
        let iter = StaticIterator::new([one, two.clone()], Precedence::default());

        let all = iter.iter(&"foo".parse().unwrap()).await;
        assert_eq!(all.len(), 2);
        assert_eq!(all[0], two, "highest version first");

        let narrowed = iter.iter(&"foo>=2".parse().unwrap()).await;
        assert_eq!(narrowed.len(), 1);
        assert_eq!(narrowed[0], two);
    }

    #[tokio::test]
    async fn test_pipeline_over_local_repository() {
        let dir = tempfile::tempdir().unwrap();
        for name in [
            "project-0.0.0.tar.gz",
            "project-1.2.0.tar.gz",
            "project-2.0.0b1.notanarchive",
            "other-9.0.tar.gz",
        ] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }

        let crawler = Crawler::new(Context::new(Duration::from_secs(5)).unwrap(), 2);
        let fetchers = vec![Fetcher::repository(Link::from_path(dir.path()).unwrap())];
        let iter = PackageIterator::new(fetchers, crawler, Precedence::default(), false);

        let found = iter.iter(&"project".parse().unwrap()).await;
        let versions: Vec<String> = found.iter().map(|p| p.version().to_string()).collect();
        assert_eq!(versions, vec!["1.2.0", "0.0.0"]);
    }
}

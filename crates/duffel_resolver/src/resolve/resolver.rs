use std::collections::{BTreeMap, HashSet, VecDeque};
use std::path::PathBuf;

use indexmap::IndexMap;

use crate::context::Context;
use crate::crawler::Crawler;
use crate::distribution::Distribution;
use crate::interpreter::InterpreterIdentity;
use crate::iterator::{sort_by_precedence, PackageIterator, StaticIterator};
use crate::marker::MarkerSnapshot;
use crate::resolvable::Resolvable;
use crate::resolve::cache::PackageCache;
use crate::resolve::error::ResolveError;
use crate::resolve::options::ResolverOptions;
use crate::resolve::resolvable_set::ResolvableSet;
use crate::tags::Platform;
use crate::translator::{default_translator, ChainedTranslator, Translate};
use crate::types::{Link, NormalizedPackageName, Package};

/// The transitive resolver.
///
/// `resolve` alternates two phases until nothing changes: **narrow** drains
/// the work queue, obtaining candidates for each resolvable and intersecting
/// them into the per-name [`ResolvableSet`]; **select & expand** commits to
/// the best candidate of every name, materializes it, and enqueues the
/// dependencies its distribution declares under the extras accumulated so
/// far. There is no backtracking: re-selecting a name to a different package
/// in a later round is reported as ambiguity.
pub struct Resolver {
    options: ResolverOptions,
    identity: InterpreterIdentity,
    platform: Platform,
    markers: MarkerSnapshot,
    context: Context,
    crawler: Crawler,
    translator: ChainedTranslator,
    cache: Option<PackageCache>,
    target_dir: PathBuf,
}

impl Resolver {
    /// Prepares a resolver for one target. `markers` describes the target
    /// environment for conditional dependencies; derive it from `identity`
    /// when the target interpreter cannot be executed.
    pub fn new(
        options: ResolverOptions,
        identity: InterpreterIdentity,
        platform: Platform,
        markers: MarkerSnapshot,
    ) -> Result<Resolver, ResolveError> {
        let context = Context::new(options.timeout)?;
        let crawler = Crawler::new(context.clone(), options.workers);
        let translator = default_translator(
            &identity,
            &platform,
            &options.precedence,
            options.python.as_deref(),
        );
        let cache = match &options.cache_dir {
            Some(dir) => Some(PackageCache::new(dir.clone(), options.cache_ttl)?),
            None => None,
        };
        // Without a cache, materialized distributions live in a scratch
        // directory that outlives the resolver (the archive writer reads the
        // files after resolution finishes).
        let target_dir = match &cache {
            Some(cache) => cache.dir().to_path_buf(),
            None => tempfile::tempdir()?.into_path(),
        };

        Ok(Resolver {
            options,
            identity,
            platform,
            markers,
            context,
            crawler,
            translator,
            cache,
            target_dir,
        })
    }

    /// The directory materialized distributions are placed in.
    pub fn target_dir(&self) -> &std::path::Path {
        &self.target_dir
    }

    fn network_iterator(&self, name: &NormalizedPackageName) -> PackageIterator {
        PackageIterator::new(
            self.options.fetchers.clone(),
            self.crawler.clone(),
            self.options.precedence.clone(),
            self.options.allows_external(name),
        )
    }

    /// Obtains candidates for a resolvable.
    ///
    /// When the set already holds candidates for this name, they are narrowed
    /// statically — the intersection constraint needs no catalog. Otherwise
    /// the cache is consulted first: exact pins accept any cache hit, range
    /// constraints accept cached candidates within the TTL, and everything
    /// else falls through to the network pipeline.
    async fn package_iterator(
        &self,
        resolvable: &Resolvable,
        existing: Option<Vec<Package>>,
    ) -> Vec<Package> {
        if let Some(existing) = existing {
            let narrowing = StaticIterator::new(existing, self.options.precedence.clone());
            return resolvable.packages(&narrowing).await;
        }

        if let Some(cache) = &self.cache {
            if let Some(cache_fetcher) = cache.fetcher() {
                let cache_only = PackageIterator::new(
                    vec![cache_fetcher],
                    self.crawler.clone(),
                    self.options.precedence.clone(),
                    false,
                );
                let cached = resolvable.packages(&cache_only).await;
                if !cached.is_empty() {
                    if resolvable.exact() {
                        tracing::debug!("package cache hit: {resolvable}");
                        return cached;
                    }
                    if cache.has_ttl() {
                        let fresh: Vec<Package> = cached
                            .into_iter()
                            .filter(|package| cache.within_ttl(package))
                            .collect();
                        if !fresh.is_empty() {
                            tracing::debug!("package cache hit (inexact): {resolvable}");
                            return fresh;
                        }
                    }
                }
                tracing::debug!("package cache miss: {resolvable}");
            }
        }

        resolvable
            .packages(&self.network_iterator(&resolvable.name()))
            .await
    }

    /// Materializes a selected package: fetch it locally if needed, then
    /// translate it into an importable distribution in the target directory.
    async fn build(&self, package: &Package) -> Result<Distribution, ResolveError> {
        let local = if package.local() {
            package.clone()
        } else {
            let fetched = match &self.cache {
                // The cache fetch also stamps the mtime, keeping the TTL
                // clock honest for range constraints resolved later.
                Some(cache) => cache.fetch(&self.context, package.link()).await?,
                None => self.context.fetch(package.link(), &self.target_dir).await?,
            };
            Link::from_path(&fetched)
                .ok()
                .and_then(Package::from_link)
                .ok_or_else(|| ResolveError::Untranslateable {
                    package: package.to_string(),
                })?
        };

        let distribution = self
            .translator
            .translate(&local, &self.target_dir)
            .await
            .ok_or_else(|| ResolveError::Untranslateable {
                package: package.to_string(),
            })?;

        if let Some(cache) = &self.cache {
            cache.refresh(distribution.location());
        }
        Ok(distribution)
    }

    /// Resolves the given resolvables into one distribution per distinct
    /// project name, sorted by name.
    pub async fn resolve(
        &self,
        resolvables: Vec<Resolvable>,
    ) -> Result<Vec<Distribution>, ResolveError> {
        let mut work: VecDeque<Resolvable> = resolvables.into();
        let mut processed: HashSet<String> = HashSet::new();
        let mut set = ResolvableSet::new();
        let mut selected: BTreeMap<NormalizedPackageName, Package> = BTreeMap::new();
        let mut distributions: IndexMap<Package, Distribution> = IndexMap::new();

        while !work.is_empty() {
            // Phase A: narrow. Every queued resolvable contributes its
            // candidate set, filtered to the target, into the intersection.
            while let Some(resolvable) = work.pop_front() {
                if !processed.insert(resolvable.to_string()) {
                    continue;
                }
                let name = resolvable.name();
                let existing = set.get(&name).filter(|packages| !packages.is_empty());
                let candidates = self.package_iterator(&resolvable, existing).await;
                let compatible: Vec<Package> = candidates
                    .into_iter()
                    .filter(|package| package.compatible(&self.identity, &self.platform))
                    .collect();
                tracing::debug!(
                    "{resolvable}: {} compatible candidate(s)",
                    compatible.len()
                );
                set.merge(resolvable, compatible)?;
            }

            // Phase B: select & expand, in name order so ambiguity detection
            // is reproducible run to run.
            for (name, mut candidates) in set.packages() {
                sort_by_precedence(&mut candidates, &self.options.precedence);
                let Some(best) = candidates.first().cloned() else {
                    continue;
                };

                if let Some(previous) = selected.get(&name) {
                    if *previous != best {
                        return Err(ResolveError::Ambiguous {
                            name,
                            previous: previous.to_string(),
                            conflicting: best.to_string(),
                        });
                    }
                } else {
                    tracing::debug!("selecting {best} for '{name}'");
                    selected.insert(name.clone(), best.clone());
                }

                if !distributions.contains_key(&best) {
                    let distribution = self.build(&best).await?;
                    distributions.insert(best.clone(), distribution);
                }
                let Some(distribution) = distributions.get(&best) else {
                    continue;
                };

                let extras = set.extras(&name);
                for requirement in distribution.requires(&extras, &self.markers) {
                    let dependency = Resolvable::from(requirement);
                    if !processed.contains(&dependency.to_string()) {
                        tracing::debug!("{name} adds dependency {dependency}");
                        work.push_back(dependency);
                    }
                }
            }
        }

        let mut resolved: Vec<Distribution> = distributions.into_values().collect();
        resolved.sort_by(|a, b| a.name().cmp(b.name()));
        Ok(resolved)
    }
}

/// Produces all distributions needed to transitively meet `requirements`.
///
/// Each requirement-like string is dispatched through [`Resolvable::parse`]:
/// requirement expressions, local archive paths, and direct URLs are all
/// accepted.
pub async fn resolve(
    requirements: impl IntoIterator<Item = impl AsRef<str>>,
    options: ResolverOptions,
    identity: InterpreterIdentity,
    platform: Platform,
    markers: MarkerSnapshot,
) -> Result<Vec<Distribution>, ResolveError> {
    let mut resolvables = Vec::new();
    for requirement in requirements {
        resolvables.push(Resolvable::parse(requirement.as_ref())?);
    }
    let resolver = Resolver::new(options, identity, platform, markers)?;
    resolver.resolve(resolvables).await
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::interpreter::PythonVersion;
    use crate::testing::write_wheel;
    use std::path::Path;
    use std::time::Duration;

    fn identity() -> InterpreterIdentity {
        InterpreterIdentity {
            implementation: "CPython".into(),
            version: PythonVersion {
                major: 3,
                minor: 9,
                micro: 0,
            },
            abi: "cp39".into(),
        }
    }

    fn platform() -> Platform {
        Platform::new("linux_x86_64")
    }

    fn markers() -> MarkerSnapshot {
        identity().marker_snapshot(&platform())
    }

    fn catalog_options(dir: &Path) -> ResolverOptions {
        let mut builder = ResolverOptions::builder();
        builder
            .set_fetchers(Vec::new())
            .add_repository(Link::from_path(dir).unwrap());
        builder.build()
    }

    async fn run(
        requirements: &[&str],
        options: ResolverOptions,
    ) -> Result<Vec<Distribution>, ResolveError> {
        resolve(requirements, options, identity(), platform(), markers()).await
    }

    #[tokio::test]
    async fn test_empty_resolve() {
        let resolved = run(&[], ResolverOptions::default()).await.unwrap();
        assert!(resolved.is_empty());

        let cache = tempfile::tempdir().unwrap();
        let mut builder = ResolverOptions::builder();
        builder.cache_dir(cache.path().to_path_buf());
        let resolved = run(&[], builder.build()).await.unwrap();
        assert!(resolved.is_empty());
    }

    #[tokio::test]
    async fn test_simple_local_resolve() {
        let dir = tempfile::tempdir().unwrap();
        write_wheel(dir.path(), "project", "0.0.0", &[], &[], "py3-none-any");

        let resolved = run(&["project"], catalog_options(dir.path())).await.unwrap();
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].name().as_str(), "project");
        assert_eq!(resolved[0].version(), &"0.0.0".parse().unwrap());
        assert!(resolved[0].location().exists());
    }

    #[tokio::test]
    async fn test_constraint_intersection() {
        let dir = tempfile::tempdir().unwrap();
        write_wheel(dir.path(), "foo", "2.3.4", &[], &[], "py3-none-any");
        write_wheel(dir.path(), "foo", "3.0.0", &[], &[], "py3-none-any");

        let resolved = run(&["foo", "foo==2.3.4"], catalog_options(dir.path()))
            .await
            .unwrap();
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].version(), &"2.3.4".parse().unwrap());
    }

    #[tokio::test]
    async fn test_unsatisfiable_intersection() {
        let dir = tempfile::tempdir().unwrap();
        write_wheel(dir.path(), "foo", "3.0.0", &[], &[], "py3-none-any");

        let err = run(&["foo", "foo==2.3.4"], catalog_options(dir.path()))
            .await
            .unwrap_err();
        match err {
            ResolveError::Unsatisfiable { name, contributors } => {
                assert_eq!(name.as_str(), "foo");
                assert_eq!(contributors.len(), 2);
            }
            other => panic!("expected Unsatisfiable, got {other}"),
        }
    }

    #[tokio::test]
    async fn test_transitive_dependencies() {
        let dir = tempfile::tempdir().unwrap();
        write_wheel(
            dir.path(),
            "app",
            "1.0",
            &["lib>=1", "winlib; os_name == 'nt'"],
            &[],
            "py3-none-any",
        );
        write_wheel(dir.path(), "lib", "1.5", &[], &[], "py3-none-any");
        write_wheel(dir.path(), "winlib", "9.9", &[], &[], "py3-none-any");

        let resolved = run(&["app"], catalog_options(dir.path())).await.unwrap();
        let names: Vec<&str> = resolved.iter().map(|d| d.name().as_str()).collect();
        // The windows-only dependency is dropped for a posix target.
        assert_eq!(names, vec!["app", "lib"]);
    }

    #[tokio::test]
    async fn test_extras_pull_in_conditional_dependencies() {
        let dir = tempfile::tempdir().unwrap();
        write_wheel(
            dir.path(),
            "app",
            "1.0",
            &["base>=1", "shiny; extra == 'fancy'"],
            &["fancy"],
            "py3-none-any",
        );
        write_wheel(dir.path(), "base", "1.0", &[], &[], "py3-none-any");
        write_wheel(dir.path(), "shiny", "2.0", &[], &[], "py3-none-any");

        let without = run(&["app"], catalog_options(dir.path())).await.unwrap();
        assert_eq!(without.len(), 2);

        let with = run(&["app[fancy]"], catalog_options(dir.path()))
            .await
            .unwrap();
        let names: Vec<&str> = with.iter().map(|d| d.name().as_str()).collect();
        assert_eq!(names, vec!["app", "base", "shiny"]);
    }

    #[tokio::test]
    async fn test_incompatible_candidates_are_unsatisfiable() {
        let dir = tempfile::tempdir().unwrap();
        write_wheel(dir.path(), "native", "1.0", &[], &[], "cp27-cp27m-win_amd64");

        let err = run(&["native"], catalog_options(dir.path())).await.unwrap_err();
        assert!(matches!(err, ResolveError::Unsatisfiable { .. }));
    }

    #[tokio::test]
    async fn test_ambiguous_commitment_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        write_wheel(dir.path(), "core", "1.0", &[], &[], "py3-none-any");
        write_wheel(dir.path(), "core", "2.0", &[], &[], "py3-none-any");
        write_wheel(dir.path(), "app", "1.0", &["core==1.0"], &[], "py3-none-any");

        // "core" commits to 2.0 in the first round; app's pin then narrows
        // the set to 1.0 and the resolver refuses to re-select.
        let err = run(&["core", "app"], catalog_options(dir.path()))
            .await
            .unwrap_err();
        match err {
            ResolveError::Ambiguous { name, .. } => assert_eq!(name.as_str(), "core"),
            other => panic!("expected Ambiguous, got {other}"),
        }
    }

    #[tokio::test]
    async fn test_pinned_package_resolvable() {
        let dir = tempfile::tempdir().unwrap();
        let wheel = write_wheel(dir.path(), "pinned", "3.1", &[], &[], "py3-none-any");

        let resolved = run(
            &[wheel.to_str().unwrap()],
            catalog_options(dir.path()),
        )
        .await
        .unwrap();
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].name().as_str(), "pinned");
    }

    #[tokio::test]
    async fn test_exact_requirement_resolves_from_cache_without_network() {
        let cache = tempfile::tempdir().unwrap();
        write_wheel(cache.path(), "foo", "2.0", &[], &[], "py3-none-any");

        // No fetchers at all: any fall-through to the network pipeline would
        // find nothing and fail.
        let mut builder = ResolverOptions::builder();
        builder
            .set_fetchers(Vec::new())
            .cache_dir(cache.path().to_path_buf());

        let resolved = run(&["foo==2.0"], builder.build()).await.unwrap();
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].version(), &"2.0".parse().unwrap());
        assert_eq!(resolved[0].location().parent().unwrap(), cache.path());
    }

    #[tokio::test]
    async fn test_cache_ttl_governs_inexact_requirements() {
        let cache = tempfile::tempdir().unwrap();
        write_wheel(cache.path(), "foo", "2.0", &[], &[], "py3-none-any");

        // Within the freshness window the cached candidate is trusted.
        let mut fresh = ResolverOptions::builder();
        fresh
            .set_fetchers(Vec::new())
            .cache_dir(cache.path().to_path_buf())
            .cache_ttl(Duration::from_secs(60));
        let resolved = run(&["foo>=1.0"], fresh.build()).await.unwrap();
        assert_eq!(resolved.len(), 1);

        // A zero-length window trusts nothing; with no fetchers configured
        // the fall-through finds no candidates.
        let mut stale = ResolverOptions::builder();
        stale
            .set_fetchers(Vec::new())
            .cache_dir(cache.path().to_path_buf())
            .cache_ttl(Duration::ZERO);
        assert!(matches!(
            run(&["foo>=1.0"], stale.build()).await,
            Err(ResolveError::Unsatisfiable { .. })
        ));

        // Without any TTL an inexact requirement never trusts the cache.
        let mut no_ttl = ResolverOptions::builder();
        no_ttl
            .set_fetchers(Vec::new())
            .cache_dir(cache.path().to_path_buf());
        assert!(run(&["foo>=1.0"], no_ttl.build()).await.is_err());
    }

    #[tokio::test]
    async fn test_resolved_files_land_in_cache() {
        let dir = tempfile::tempdir().unwrap();
        let cache = tempfile::tempdir().unwrap();
        write_wheel(dir.path(), "foo", "1.0", &[], &[], "py3-none-any");

        let mut builder = ResolverOptions::builder();
        builder
            .set_fetchers(Vec::new())
            .add_repository(Link::from_path(dir.path()).unwrap())
            .cache_dir(cache.path().to_path_buf());

        let resolved = run(&["foo"], builder.build()).await.unwrap();
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].location().parent().unwrap(), cache.path());
        assert!(resolved[0].location().exists());
    }

    #[tokio::test]
    async fn test_untranslateable_package() {
        let dir = tempfile::tempdir().unwrap();
        // A wheel-shaped file with no readable archive inside.
        std::fs::write(dir.path().join("broken-1.0-py3-none-any.whl"), b"junk").unwrap();

        let err = run(&["broken"], catalog_options(dir.path())).await.unwrap_err();
        match err {
            ResolveError::Untranslateable { package } => {
                assert!(package.contains("broken-1.0"));
            }
            other => panic!("expected Untranslateable, got {other}"),
        }
    }

    #[tokio::test]
    async fn test_resolvable_set_narrowing_invariant() {
        // Successive merges only shrink a name's candidate set, and the set
        // stays within every contributor's own candidates.
        let one = Package::from_href("foo-1.0.tar.gz").unwrap();
        let two = Package::from_href("foo-2.0.tar.gz").unwrap();

        let mut set = ResolvableSet::new();
        set.merge(
            Resolvable::parse("foo").unwrap(),
            vec![one.clone(), two.clone()],
        )
        .unwrap();
        let before = set.get(&"foo".parse().unwrap()).unwrap();
        set.merge(Resolvable::parse("foo<2.0").unwrap(), vec![one.clone()])
            .unwrap();
        let after = set.get(&"foo".parse().unwrap()).unwrap();
        assert!(after.iter().all(|p| before.contains(p)));
        assert_eq!(after, vec![one]);
    }
}

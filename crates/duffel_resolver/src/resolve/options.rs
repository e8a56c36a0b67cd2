use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use url::Url;

use crate::fetcher::Fetcher;
use crate::iterator::Precedence;
use crate::types::{Link, NormalizedPackageName, PackageKind};

/// The default per-fetch network timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Everything configurable about a resolve.
#[derive(Debug, Clone)]
pub struct ResolverOptions {
    /// The fetchers consulted for every requirement, in order.
    pub fetchers: Vec<Fetcher>,
    /// Names whose external (`rel=`) links may be crawled.
    pub allow_external: HashSet<NormalizedPackageName>,
    /// Crawl external links for every name.
    pub allow_all_external: bool,
    /// Names the user marked as acceptable unverified. Recorded from the
    /// requirement file and command line; nothing enforces it.
    pub allow_unverified: HashSet<NormalizedPackageName>,
    /// Preference order over package variants.
    pub precedence: Precedence,
    /// Crawler worker-pool width.
    pub workers: usize,
    /// Per-fetch network timeout.
    pub timeout: Duration,
    /// On-disk cache directory, if caching is wanted.
    pub cache_dir: Option<PathBuf>,
    /// Freshness window for serving non-exact requirements from the cache.
    pub cache_ttl: Option<Duration>,
    /// The interpreter used to build source packages.
    pub python: Option<PathBuf>,
}

impl ResolverOptions {
    /// A builder seeded with the defaults: the public index, binaries
    /// preferred over source builds, one crawler worker.
    pub fn builder() -> ResolverOptionsBuilder {
        ResolverOptionsBuilder::default()
    }

    /// May external links be followed when crawling for `name`?
    pub fn allows_external(&self, name: &NormalizedPackageName) -> bool {
        self.allow_all_external || self.allow_external.contains(name)
    }
}

impl Default for ResolverOptions {
    fn default() -> Self {
        ResolverOptions::builder().build()
    }
}

/// Accumulates resolver configuration from the command line and requirement
/// files.
#[derive(Debug, Clone)]
pub struct ResolverOptionsBuilder {
    fetchers: Vec<Fetcher>,
    allow_external: HashSet<NormalizedPackageName>,
    allow_all_external: bool,
    allow_unverified: HashSet<NormalizedPackageName>,
    precedence: Precedence,
    workers: usize,
    timeout: Duration,
    cache_dir: Option<PathBuf>,
    cache_ttl: Option<Duration>,
    python: Option<PathBuf>,
}

impl Default for ResolverOptionsBuilder {
    fn default() -> Self {
        ResolverOptionsBuilder {
            fetchers: vec![Fetcher::default_index()],
            allow_external: HashSet::new(),
            allow_all_external: false,
            allow_unverified: HashSet::new(),
            precedence: Precedence::default(),
            workers: 1,
            timeout: DEFAULT_TIMEOUT,
            cache_dir: None,
            cache_ttl: None,
            python: None,
        }
    }
}

impl ResolverOptionsBuilder {
    /// Replaces every fetcher.
    pub fn set_fetchers(&mut self, fetchers: Vec<Fetcher>) -> &mut Self {
        self.fetchers = fetchers;
        self
    }

    /// Drops every configured index and installs `index` as the only one.
    /// Repository fetchers are kept.
    pub fn set_index(&mut self, index: Url) -> &mut Self {
        self.clear_indices();
        self.fetchers.push(Fetcher::index(index));
        self
    }

    /// Adds an additional index.
    pub fn add_index(&mut self, index: Url) -> &mut Self {
        let fetcher = Fetcher::index(index);
        if !self.fetchers.contains(&fetcher) {
            self.fetchers.push(fetcher);
        }
        self
    }

    /// Adds a repository of links (a directory or a flat page).
    pub fn add_repository(&mut self, link: Link) -> &mut Self {
        let fetcher = Fetcher::repository(link);
        if !self.fetchers.contains(&fetcher) {
            self.fetchers.push(fetcher);
        }
        self
    }

    /// Drops every index fetcher (`--no-index`).
    pub fn clear_indices(&mut self) -> &mut Self {
        self.fetchers.retain(|fetcher| !fetcher.is_index());
        self
    }

    /// Whitelists external links for one name.
    pub fn allow_external(&mut self, name: NormalizedPackageName) -> &mut Self {
        self.allow_external.insert(name);
        self
    }

    /// Whitelists external links for every name.
    pub fn allow_all_external(&mut self) -> &mut Self {
        self.allow_all_external = true;
        self
    }

    /// Records that `name` may be installed unverified. Parse-only.
    pub fn allow_unverified(&mut self, name: NormalizedPackageName) -> &mut Self {
        self.allow_unverified.insert(name);
        self
    }

    /// Puts wheels at the front of the precedence order.
    pub fn use_wheel(&mut self) -> &mut Self {
        if !self.precedence.allows(PackageKind::Wheel) {
            self.precedence = self.precedence.preferring(PackageKind::Wheel);
        }
        self
    }

    /// Removes wheels from the precedence order (`--no-use-wheel`).
    pub fn no_use_wheel(&mut self) -> &mut Self {
        self.precedence = self.precedence.without(PackageKind::Wheel);
        self
    }

    /// Allows building from source, as the last resort.
    pub fn allow_builds(&mut self) -> &mut Self {
        if !self.precedence.allows(PackageKind::Source) {
            self.precedence = self.precedence.falling_back_to(PackageKind::Source);
        }
        self
    }

    /// Disallows building from source (`--no-build`).
    pub fn no_allow_builds(&mut self) -> &mut Self {
        self.precedence = self.precedence.without(PackageKind::Source);
        self
    }

    /// Replaces the precedence order outright.
    pub fn set_precedence(&mut self, precedence: Precedence) -> &mut Self {
        self.precedence = precedence;
        self
    }

    /// Sets the crawler worker-pool width.
    pub fn workers(&mut self, workers: usize) -> &mut Self {
        self.workers = workers.max(1);
        self
    }

    /// Sets the per-fetch network timeout.
    pub fn timeout(&mut self, timeout: Duration) -> &mut Self {
        self.timeout = timeout;
        self
    }

    /// Enables the on-disk cache at `dir`.
    pub fn cache_dir(&mut self, dir: PathBuf) -> &mut Self {
        self.cache_dir = Some(dir);
        self
    }

    /// Sets the cache freshness window.
    pub fn cache_ttl(&mut self, ttl: Duration) -> &mut Self {
        self.cache_ttl = Some(ttl);
        self
    }

    /// Sets the interpreter used for source builds.
    pub fn python(&mut self, python: PathBuf) -> &mut Self {
        self.python = Some(python);
        self
    }

    /// Finalizes the options.
    pub fn build(&self) -> ResolverOptions {
        ResolverOptions {
            fetchers: self.fetchers.clone(),
            allow_external: self.allow_external.clone(),
            allow_all_external: self.allow_all_external,
            allow_unverified: self.allow_unverified.clone(),
            precedence: self.precedence.clone(),
            workers: self.workers,
            timeout: self.timeout,
            cache_dir: self.cache_dir.clone(),
            cache_ttl: self.cache_ttl,
            python: self.python.clone(),
        }
    }
}

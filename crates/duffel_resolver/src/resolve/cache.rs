use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use crate::context::{Context, ContextError};
use crate::fetcher::Fetcher;
use crate::types::{Link, Package};

/// The on-disk package cache: a flat directory of materialized distribution
/// files whose mtimes are the "last validated" timestamps.
///
/// Exact pins are served from the cache unconditionally. Range constraints
/// are served only while their cached candidates are younger than the TTL;
/// after that the resolver re-checks the index. There is no lockfile —
/// concurrent safety comes from every write going through a temporary name
/// and an atomic rename.
#[derive(Debug, Clone)]
pub struct PackageCache {
    dir: PathBuf,
    ttl: Option<Duration>,
}

impl PackageCache {
    /// Opens (creating if needed) a cache rooted at `dir`.
    pub fn new(dir: PathBuf, ttl: Option<Duration>) -> std::io::Result<PackageCache> {
        fs_err::create_dir_all(&dir)?;
        Ok(PackageCache { dir, ttl })
    }

    /// The cache directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Is a freshness window configured?
    pub fn has_ttl(&self) -> bool {
        self.ttl.is_some()
    }

    /// A fetcher over the cache directory, for cache-only iteration.
    pub fn fetcher(&self) -> Option<Fetcher> {
        Link::from_path(&self.dir).ok().map(Fetcher::repository)
    }

    /// Is this candidate acceptable for a non-exact requirement? Remote
    /// candidates always are (they will be re-fetched anyway); local files
    /// only while their mtime is within the TTL.
    pub fn within_ttl(&self, package: &Package) -> bool {
        if package.remote() {
            return true;
        }
        let Some(ttl) = self.ttl else {
            return false;
        };
        let age = fs_err::metadata(package.path())
            .and_then(|metadata| metadata.modified())
            .map(|mtime| SystemTime::now().duration_since(mtime).unwrap_or_default());
        match age {
            Ok(age) => age < ttl,
            Err(_) => false,
        }
    }

    /// Fetches a remote link into the cache and stamps the destination's
    /// mtime, even when the file was already present — the stamp is the TTL
    /// clock.
    pub async fn fetch(&self, context: &Context, link: &Link) -> Result<PathBuf, ContextError> {
        let path = context.fetch(link, &self.dir).await?;
        self.refresh(&path);
        Ok(path)
    }

    /// Stamps `path` as freshly validated. Best effort; a failed stamp only
    /// shortens how long the entry is trusted.
    pub fn refresh(&self, path: &Path) {
        let stamped = fs_err::OpenOptions::new()
            .write(true)
            .open(path)
            .and_then(|file| file.file().set_modified(SystemTime::now()));
        if let Err(e) = stamped {
            tracing::debug!("failed to refresh mtime of {}: {e}", path.display());
        }
    }
}

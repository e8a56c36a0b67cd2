//! Mapping requirements to the seed URLs their candidates are crawled from.

use url::Url;

use crate::types::{Link, NormalizedPackageName};

/// The index every resolve consults unless configured otherwise.
pub const DEFAULT_INDEX: &str = "https://pypi.org/simple/";

/// Produces the seed URLs to crawl for a requirement.
///
/// * An **index** fetcher points at a simple-index base and yields the
///   project page `<base>/<canonical name>/`.
/// * A **repository** fetcher yields its fixed links unchanged, whatever the
///   requirement.
///
/// Fetchers compose by concatenation; ordering is preserved and the iterator
/// deduplicates seed links by URL equality.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Fetcher {
    /// A PEP-503 simple index.
    Index {
        /// The index base URL, normalized to end in `/`.
        base: Url,
    },
    /// A fixed set of repository links (directories or flat pages).
    Repository {
        /// The links to crawl.
        links: Vec<Link>,
    },
}

/// Normalizes an index base URL so project names can be joined onto it.
pub fn normalize_index_url(mut url: Url) -> Url {
    let path = url.path();
    if !path.ends_with('/') {
        url.set_path(&format!("{path}/"));
    }
    url
}

impl Fetcher {
    /// An index fetcher over `base`.
    pub fn index(base: Url) -> Fetcher {
        Fetcher::Index {
            base: normalize_index_url(base),
        }
    }

    /// An index fetcher over the default package index.
    pub fn default_index() -> Fetcher {
        Fetcher::index(Url::parse(DEFAULT_INDEX).expect("the default index URL is valid"))
    }

    /// A repository fetcher over a single link.
    pub fn repository(link: Link) -> Fetcher {
        Fetcher::Repository { links: vec![link] }
    }

    /// Is this an index fetcher? (`--no-index` drops exactly these.)
    pub fn is_index(&self) -> bool {
        matches!(self, Fetcher::Index { .. })
    }

    /// The seed links to crawl for `name`.
    pub fn links(&self, name: &NormalizedPackageName) -> Vec<Link> {
        match self {
            Fetcher::Index { base } => base
                .join(&format!("{name}/"))
                .map(|url| vec![Link::from_url(url)])
                .unwrap_or_default(),
            Fetcher::Repository { links } => links.clone(),
        }
    }
}

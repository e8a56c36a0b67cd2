use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use miette::Diagnostic;
use serde_with::{DeserializeFromStr, SerializeDisplay};
use thiserror::Error;
use url::Url;

/// A normalized URL to a package artifact or an index page.
///
/// Links come in two flavors: *local* (`file://`) and *remote* (`http://` /
/// `https://`). Anything that does not parse as an absolute URL is treated as
/// a filesystem path and normalized to a `file://` URL with a canonical path.
/// Two links are equal iff their parsed URLs are equal.
#[derive(Debug, Clone, Eq, PartialEq, Hash, SerializeDisplay, DeserializeFromStr)]
pub struct Link {
    url: Url,
}

/// Error returned when a string cannot be turned into a [`Link`].
#[derive(Debug, Error, Diagnostic)]
#[allow(missing_docs)]
pub enum ParseLinkError {
    #[error("invalid URL '{url}'")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("cannot express path '{0}' as a file:// URL")]
    InvalidPath(PathBuf),
}

impl Link {
    /// Wraps a string that is either an absolute URL or a filesystem path.
    pub fn wrap(s: &str) -> Result<Link, ParseLinkError> {
        match Url::parse(s) {
            Ok(url) => Ok(Link { url }),
            Err(url::ParseError::RelativeUrlWithoutBase) => Link::from_path(s),
            Err(source) => Err(ParseLinkError::InvalidUrl {
                url: s.to_owned(),
                source,
            }),
        }
    }

    /// Builds a local link from a filesystem path. The path is canonicalized
    /// when it exists, and merely absolutized when it does not (fetch targets
    /// are links before the file appears on disk).
    pub fn from_path(path: impl AsRef<Path>) -> Result<Link, ParseLinkError> {
        let path = path.as_ref();
        let absolute = match dunce::canonicalize(path) {
            Ok(real) => real,
            Err(_) if path.is_absolute() => path.to_path_buf(),
            Err(_) => std::env::current_dir()
                .map_err(|_| ParseLinkError::InvalidPath(path.to_path_buf()))?
                .join(path),
        };
        let url = Url::from_file_path(&absolute)
            .map_err(|_| ParseLinkError::InvalidPath(absolute.clone()))?;
        Ok(Link { url })
    }

    /// Creates a link directly from a parsed URL.
    pub fn from_url(url: Url) -> Link {
        Link { url }
    }

    /// The underlying URL.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// The last path segment of the URL, without the query or fragment.
    pub fn filename(&self) -> &str {
        self.url
            .path_segments()
            .and_then(|segments| segments.filter(|s| !s.is_empty()).next_back())
            .unwrap_or("")
    }

    /// The filesystem path of a local link. For remote links this returns the
    /// URL path verbatim.
    pub fn path(&self) -> PathBuf {
        if self.local() {
            self.url
                .to_file_path()
                .unwrap_or_else(|_| PathBuf::from(self.url.path()))
        } else {
            PathBuf::from(self.url.path())
        }
    }

    /// Is this a `file://` link?
    pub fn local(&self) -> bool {
        self.url.scheme() == "file"
    }

    /// Is this an `http://` or `https://` link?
    pub fn remote(&self) -> bool {
        matches!(self.url.scheme(), "http" | "https")
    }

    /// Resolves `href` against this link, the way a browser would resolve a
    /// link found on a page.
    pub fn join(&self, href: &str) -> Option<Link> {
        self.url.join(href).ok().map(|url| Link { url })
    }

    /// The integrity declaration carried in the URL fragment, if any.
    /// Recognizes the historical `#md5=<hex>` convention as well as
    /// `#sha256=<hex>`.
    pub fn hash_fragment(&self) -> Option<(HashAlgorithm, &str)> {
        let (algorithm, hex) = self.url.fragment()?.split_once('=')?;
        let algorithm = match algorithm {
            "md5" => HashAlgorithm::Md5,
            "sha256" => HashAlgorithm::Sha256,
            _ => return None,
        };
        Some((algorithm, hex))
    }
}

/// The digest algorithms understood in link fragments.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[allow(missing_docs)]
pub enum HashAlgorithm {
    Md5,
    Sha256,
}

impl Display for Link {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.url)
    }
}

impl FromStr for Link {
    type Err = ParseLinkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Link::wrap(s)
    }
}

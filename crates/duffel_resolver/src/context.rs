//! Byte transport over local and remote links.
//!
//! A [`Context`] owns an ordered list of transports, tried in registration
//! order: construction failures drop a transport from the list, and open
//! failures fall through to the next transport that claims the scheme.
//! Downloads land via a temporary sibling file and an atomic rename, so a
//! torn fetch never leaves a half-written archive behind.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::TryStreamExt;
use miette::Diagnostic;
use rattler_digest::digest::Digest;
use rattler_digest::{parse_digest_from_hex, Md5, Sha256};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::compat::FuturesAsyncReadCompatExt;

use crate::types::{HashAlgorithm, Link};

/// An open stream of bytes behind a link.
pub type ByteStream = Box<dyn AsyncRead + Send + Unpin>;

/// Fetched bytes did not match the integrity declaration in the link
/// fragment. Fatal for the fetch, never for the resolve; the caller may
/// retry.
#[derive(Debug, Error, Diagnostic)]
#[error("integrity mismatch for {link}: expected {expected}, got {actual}")]
pub struct IntegrityError {
    /// The link whose bytes were hashed.
    pub link: String,
    /// The digest the fragment declared.
    pub expected: String,
    /// The digest of the bytes actually received.
    pub actual: String,
}

/// Error produced by transport operations.
#[derive(Debug, Error, Diagnostic)]
#[allow(missing_docs)]
pub enum ContextError {
    #[error("no transport can open '{0}'")]
    NoTransport(Link),

    #[error("no transport could be constructed")]
    NoUsableTransport,

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Integrity(#[from] IntegrityError),
}

/// A single way of opening links (local files, HTTP, ...).
#[async_trait]
pub trait Transport: Send + Sync {
    /// Does this transport claim the link's scheme?
    fn handles(&self, link: &Link) -> bool;

    /// Opens a byte stream for the link.
    async fn open(&self, link: &Link) -> Result<ByteStream, ContextError>;
}

/// Direct file opens for `file://` links.
#[derive(Debug, Default)]
pub struct FileTransport;

#[async_trait]
impl Transport for FileTransport {
    fn handles(&self, link: &Link) -> bool {
        link.local()
    }

    async fn open(&self, link: &Link) -> Result<ByteStream, ContextError> {
        let file = tokio::fs::File::open(link.path()).await?;
        Ok(Box::new(file))
    }
}

/// Streaming HTTP(S) via reqwest, with a per-fetch timeout.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Builds the transport with `timeout` applied to every request.
    pub fn new(timeout: Duration) -> Result<HttpTransport, ContextError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()?;
        Ok(HttpTransport { client })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    fn handles(&self, link: &Link) -> bool {
        link.remote()
    }

    async fn open(&self, link: &Link) -> Result<ByteStream, ContextError> {
        // The fragment is client-side metadata, never part of the request.
        let mut url = link.url().clone();
        url.set_fragment(None);

        let response = self.client.get(url).send().await?.error_for_status()?;
        let reader = response
            .bytes_stream()
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))
            .into_async_read()
            .compat();
        Ok(Box::new(reader))
    }
}

/// The composed transport stack handed to everything that needs bytes.
#[derive(Clone)]
pub struct Context {
    transports: Vec<Arc<dyn Transport>>,
}

impl Context {
    /// Builds the default transport stack: local files, then HTTP with the
    /// given per-fetch timeout. A transport whose construction fails is
    /// logged and skipped.
    pub fn new(timeout: Duration) -> Result<Context, ContextError> {
        let mut transports: Vec<Arc<dyn Transport>> = vec![Arc::new(FileTransport)];
        match HttpTransport::new(timeout) {
            Ok(http) => transports.push(Arc::new(http)),
            Err(e) => tracing::warn!("http transport unavailable: {e}"),
        }
        Context::from_transports(transports)
    }

    /// Builds a context from an explicit transport list, in priority order.
    pub fn from_transports(transports: Vec<Arc<dyn Transport>>) -> Result<Context, ContextError> {
        if transports.is_empty() {
            return Err(ContextError::NoUsableTransport);
        }
        Ok(Context { transports })
    }

    /// Opens the link with the first transport that claims and can open it.
    pub async fn open(&self, link: &Link) -> Result<ByteStream, ContextError> {
        let mut last_error = None;
        for transport in self.transports.iter().filter(|t| t.handles(link)) {
            match transport.open(link).await {
                Ok(stream) => return Ok(stream),
                Err(e) => {
                    tracing::debug!("transport failed to open {link}: {e}");
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| ContextError::NoTransport(link.clone())))
    }

    /// Reads the full contents behind the link, verifying any integrity
    /// fragment.
    pub async fn read(&self, link: &Link) -> Result<Vec<u8>, ContextError> {
        let mut stream = self.open(link).await?;
        let mut payload = Vec::new();
        stream.read_to_end(&mut payload).await?;
        verify(link, &payload)?;
        Ok(payload)
    }

    /// Fetches the link into the directory `into`, returning the final path.
    ///
    /// An already-present file is assumed safe and returned as-is. Otherwise
    /// bytes stream into a temporary sibling which is atomically renamed into
    /// place, hashing incrementally when the link declares an integrity
    /// fragment.
    pub async fn fetch(&self, link: &Link, into: &Path) -> Result<PathBuf, ContextError> {
        fs_err::create_dir_all(into)?;
        let target = into.join(link.filename());
        if target.exists() {
            return Ok(target);
        }

        tracing::debug!("fetching {link}");
        let mut stream = self.open(link).await?;
        let mut staged = tempfile::NamedTempFile::new_in(into)?;
        let mut hasher = link.hash_fragment().map(|(algorithm, _)| match algorithm {
            HashAlgorithm::Md5 => Hasher::Md5(Md5::new()),
            HashAlgorithm::Sha256 => Hasher::Sha256(Sha256::new()),
        });

        let mut buffer = vec![0u8; 64 * 1024];
        loop {
            let n = stream.read(&mut buffer).await?;
            if n == 0 {
                break;
            }
            if let Some(hasher) = &mut hasher {
                hasher.update(&buffer[..n]);
            }
            io::Write::write_all(&mut staged, &buffer[..n])?;
        }

        if let (Some(hasher), Some((_, expected))) = (hasher, link.hash_fragment()) {
            hasher.verify(link, expected)?;
        }

        match staged.persist(&target) {
            Ok(_) => Ok(target),
            // Lost the race against a concurrent fetch of the same link; the
            // winner's bytes are just as good.
            Err(_) if target.exists() => Ok(target),
            Err(e) => Err(ContextError::Io(e.error)),
        }
    }
}

enum Hasher {
    Md5(Md5),
    Sha256(Sha256),
}

impl Hasher {
    fn update(&mut self, bytes: &[u8]) {
        match self {
            Hasher::Md5(h) => h.update(bytes),
            Hasher::Sha256(h) => h.update(bytes),
        }
    }

    fn verify(self, link: &Link, expected_hex: &str) -> Result<(), IntegrityError> {
        let actual = match self {
            Hasher::Md5(h) => data_encoding::HEXLOWER.encode(h.finalize().as_slice()),
            Hasher::Sha256(h) => data_encoding::HEXLOWER.encode(h.finalize().as_slice()),
        };
        if actual != expected_hex.to_ascii_lowercase() {
            return Err(IntegrityError {
                link: link.to_string(),
                expected: expected_hex.to_ascii_lowercase(),
                actual,
            });
        }
        Ok(())
    }
}

fn verify(link: &Link, payload: &[u8]) -> Result<(), IntegrityError> {
    let Some((algorithm, expected)) = link.hash_fragment() else {
        return Ok(());
    };
    let matches = match algorithm {
        HashAlgorithm::Md5 => parse_digest_from_hex::<Md5>(expected)
            .map(|digest| digest == rattler_digest::compute_bytes_digest::<Md5>(payload)),
        HashAlgorithm::Sha256 => parse_digest_from_hex::<Sha256>(expected)
            .map(|digest| digest == rattler_digest::compute_bytes_digest::<Sha256>(payload)),
    };
    match matches {
        Some(true) => Ok(()),
        _ => {
            let actual = match algorithm {
                HashAlgorithm::Md5 => data_encoding::HEXLOWER
                    .encode(rattler_digest::compute_bytes_digest::<Md5>(payload).as_slice()),
                HashAlgorithm::Sha256 => data_encoding::HEXLOWER
                    .encode(rattler_digest::compute_bytes_digest::<Sha256>(payload).as_slice()),
            };
            Err(IntegrityError {
                link: link.to_string(),
                expected: expected.to_ascii_lowercase(),
                actual,
            })
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Write;

    fn context() -> Context {
        Context::new(Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn test_read_local_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hello.txt");
        std::fs::write(&path, b"hello, duffel").unwrap();

        let link = Link::from_path(&path).unwrap();
        let payload = context().read(&link).await.unwrap();
        assert_eq!(payload, b"hello, duffel");
    }

    #[tokio::test]
    async fn test_fetch_is_atomic_and_idempotent() {
        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();
        let path = src.path().join("pkg-1.0.tar.gz");
        std::fs::write(&path, b"archive bytes").unwrap();

        let link = Link::from_path(&path).unwrap();
        let fetched = context().fetch(&link, dst.path()).await.unwrap();
        assert_eq!(fetched, dst.path().join("pkg-1.0.tar.gz"));
        assert_eq!(std::fs::read(&fetched).unwrap(), b"archive bytes");

        // A second fetch short-circuits on the existing file.
        let again = context().fetch(&link, dst.path()).await.unwrap();
        assert_eq!(again, fetched);

        // No stray temporaries left behind.
        let entries: Vec<_> = std::fs::read_dir(dst.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(entries.len(), 1);
    }

    #[tokio::test]
    async fn test_integrity_fragment() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pkg-1.0.tar.gz");
        std::fs::write(&path, b"payload").unwrap();

        let digest = data_encoding::HEXLOWER
            .encode(rattler_digest::compute_bytes_digest::<Md5>(b"payload").as_slice());
        let good = Link::wrap(&format!(
            "{}#md5={digest}",
            Link::from_path(&path).unwrap().url()
        ))
        .unwrap();
        assert!(context().read(&good).await.is_ok());

        let bad = Link::wrap(&format!(
            "{}#md5={}",
            Link::from_path(&path).unwrap().url(),
            "0".repeat(32)
        ))
        .unwrap();
        match context().read(&bad).await {
            Err(ContextError::Integrity(e)) => {
                assert_eq!(e.actual, digest);
            }
            other => panic!("expected an integrity error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_fetch_verifies_integrity() {
        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();
        let path = src.path().join("pkg-1.0.tar.gz");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(b"real bytes").unwrap();

        let bad = Link::wrap(&format!(
            "{}#md5={}",
            Link::from_path(&path).unwrap().url(),
            "f".repeat(32)
        ))
        .unwrap();
        assert!(matches!(
            context().fetch(&bad, dst.path()).await,
            Err(ContextError::Integrity(_))
        ));
        // The failed fetch must not have produced the target file.
        assert!(!dst.path().join("pkg-1.0.tar.gz").exists());
    }
}

//! Turning local packages into importable distributions.
//!
//! Pre-built archives (wheels, eggs) translate by a compatibility check, an
//! atomic copy into the target directory, and a metadata load. Source
//! archives are unpacked and built with the target interpreter, and the built
//! artifact goes through the same check-copy-load path. Every failure mode is
//! a logged skip: the resolver decides whether a missing translation is fatal
//! at the point it commits to a package.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::distribution::Distribution;
use crate::interpreter::InterpreterIdentity;
use crate::iterator::Precedence;
use crate::tags::Platform;
use crate::types::{Package, PackageKind, SourceFormat};

/// A strategy for translating one package variant.
#[async_trait]
pub trait Translate: Send + Sync {
    /// Translates `package`, placing the resulting archive in `into`.
    /// `None` means "not my variant" or a recoverable failure.
    async fn translate(&self, package: &Package, into: &Path) -> Option<Distribution>;
}

/// Tries a list of translators in order; the first non-empty result wins.
pub struct ChainedTranslator {
    translators: Vec<Box<dyn Translate>>,
}

impl ChainedTranslator {
    /// Chains the given translators.
    pub fn new(translators: Vec<Box<dyn Translate>>) -> ChainedTranslator {
        ChainedTranslator { translators }
    }
}

#[async_trait]
impl Translate for ChainedTranslator {
    async fn translate(&self, package: &Package, into: &Path) -> Option<Distribution> {
        for translator in &self.translators {
            if let Some(distribution) = translator.translate(package, into).await {
                return Some(distribution);
            }
        }
        None
    }
}

/// Copies `source` to `into/<filename>` through a temporary sibling so a
/// concurrent reader never observes a partial file. An existing target is
/// reused as-is.
fn stage_into(source: &Path, into: &Path) -> std::io::Result<PathBuf> {
    let filename = source
        .file_name()
        .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::InvalidInput, "no filename"))?;
    let target = into.join(filename);
    if target == source {
        return Ok(target);
    }
    if target.exists() {
        return Ok(target);
    }
    fs_err::create_dir_all(into)?;
    let staged = tempfile::NamedTempFile::new_in(into)?;
    fs_err::copy(source, staged.path())?;
    match staged.persist(&target) {
        Ok(_) => Ok(target),
        Err(_) if target.exists() => Ok(target),
        Err(e) => Err(e.error),
    }
}

/// Translates a pre-built archive variant: compatibility check, copy, load.
struct BinaryTranslator {
    kind: PackageKind,
    identity: InterpreterIdentity,
    platform: Platform,
}

#[async_trait]
impl Translate for BinaryTranslator {
    async fn translate(&self, package: &Package, into: &Path) -> Option<Distribution> {
        if package.kind() != self.kind {
            return None;
        }
        if !package.local() {
            tracing::warn!("cannot translate unfetched package {package}");
            return None;
        }
        if !package.compatible(&self.identity, &self.platform) {
            tracing::debug!("{package} is not compatible with the target interpreter");
            return None;
        }

        let target = match stage_into(&package.path(), into) {
            Ok(target) => target,
            Err(e) => {
                tracing::warn!("failed to copy {package} into place: {e}");
                return None;
            }
        };
        match Distribution::load(&target) {
            Ok(distribution) => Some(distribution),
            Err(e) => {
                tracing::warn!("failed to load metadata from {package}: {e}");
                None
            }
        }
    }
}

/// Translator for wheels.
pub struct WheelTranslator(BinaryTranslator);

impl WheelTranslator {
    /// A wheel translator for the given target.
    pub fn new(identity: InterpreterIdentity, platform: Platform) -> WheelTranslator {
        WheelTranslator(BinaryTranslator {
            kind: PackageKind::Wheel,
            identity,
            platform,
        })
    }
}

#[async_trait]
impl Translate for WheelTranslator {
    async fn translate(&self, package: &Package, into: &Path) -> Option<Distribution> {
        self.0.translate(package, into).await
    }
}

/// Translator for eggs.
pub struct EggTranslator(BinaryTranslator);

impl EggTranslator {
    /// An egg translator for the given target.
    pub fn new(identity: InterpreterIdentity, platform: Platform) -> EggTranslator {
        EggTranslator(BinaryTranslator {
            kind: PackageKind::Egg,
            identity,
            platform,
        })
    }
}

#[async_trait]
impl Translate for EggTranslator {
    async fn translate(&self, package: &Package, into: &Path) -> Option<Distribution> {
        self.0.translate(package, into).await
    }
}

/// Which built format the source translator asks the interpreter for.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[allow(missing_docs)]
pub enum BuildFormat {
    Wheel,
    Egg,
}

impl BuildFormat {
    fn command(&self) -> &'static str {
        match self {
            BuildFormat::Wheel => "bdist_wheel",
            BuildFormat::Egg => "bdist_egg",
        }
    }
}

/// Builds source archives with the target interpreter and translates the
/// produced artifact.
pub struct SourceTranslator {
    python: PathBuf,
    build: BuildFormat,
    identity: InterpreterIdentity,
    platform: Platform,
}

impl SourceTranslator {
    /// A source translator that builds with the interpreter at `python`.
    pub fn new(
        python: PathBuf,
        build: BuildFormat,
        identity: InterpreterIdentity,
        platform: Platform,
    ) -> SourceTranslator {
        SourceTranslator {
            python,
            build,
            identity,
            platform,
        }
    }

    fn unpack(&self, package: &Package, scratch: &Path) -> Option<PathBuf> {
        let Package::Source(source) = package else {
            return None;
        };
        let archive = package.path();
        let unpacked = scratch.join("src");
        fs_err::create_dir_all(&unpacked).ok()?;

        let result = match source.format() {
            SourceFormat::TarGz => fs_err::File::open(&archive).and_then(|file| {
                let decoder = flate2::read::GzDecoder::new(file);
                tar::Archive::new(decoder).unpack(&unpacked)
            }),
            SourceFormat::Tar => fs_err::File::open(&archive)
                .and_then(|file| tar::Archive::new(file).unpack(&unpacked)),
            SourceFormat::Zip => fs_err::File::open(&archive).and_then(|file| {
                zip::ZipArchive::new(file.into_parts().0)
                    .and_then(|mut archive| archive.extract(&unpacked))
                    .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
            }),
            SourceFormat::TarBz2 => {
                tracing::warn!("cannot build {package}: bzip2 archives are not supported");
                return None;
            }
        };
        if let Err(e) = result {
            tracing::warn!("failed to unpack {package}: {e}");
            return None;
        }

        // Most sdists unpack into a single `name-version` directory.
        let mut entries: Vec<PathBuf> = fs_err::read_dir(&unpacked)
            .ok()?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .collect();
        if entries.len() == 1 && entries[0].is_dir() {
            entries.pop()
        } else {
            Some(unpacked)
        }
    }
}

#[async_trait]
impl Translate for SourceTranslator {
    async fn translate(&self, package: &Package, into: &Path) -> Option<Distribution> {
        if package.kind() != PackageKind::Source {
            return None;
        }
        if !package.local() {
            tracing::warn!("cannot build unfetched package {package}");
            return None;
        }

        let scratch = match tempfile::tempdir() {
            Ok(scratch) => scratch,
            Err(e) => {
                tracing::warn!("failed to create a build directory: {e}");
                return None;
            }
        };
        let source_root = self.unpack(package, scratch.path())?;

        let dist_dir = scratch.path().join("dist");
        tracing::debug!("building {package} with {}", self.python.display());
        let built = tokio::process::Command::new(&self.python)
            .arg("setup.py")
            .arg(self.build.command())
            .arg("--dist-dir")
            .arg(&dist_dir)
            .current_dir(&source_root)
            .output()
            .await;
        match built {
            Ok(output) if output.status.success() => {}
            Ok(output) => {
                tracing::warn!(
                    "build of {package} failed: {}",
                    String::from_utf8_lossy(&output.stderr).trim()
                );
                return None;
            }
            Err(e) => {
                tracing::warn!("failed to run the build for {package}: {e}");
                return None;
            }
        }

        let artifact = fs_err::read_dir(&dist_dir)
            .ok()?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .find_map(|path| {
                let link = crate::types::Link::from_path(&path).ok()?;
                Package::from_link(link)
            });
        let Some(artifact) = artifact else {
            tracing::warn!("build of {package} produced no recognizable artifact");
            return None;
        };
        if !artifact.compatible(&self.identity, &self.platform) {
            tracing::warn!("build of {package} produced an incompatible artifact {artifact}");
            return None;
        }

        let target = match stage_into(&artifact.path(), into) {
            Ok(target) => target,
            Err(e) => {
                tracing::warn!("failed to move built artifact for {package}: {e}");
                return None;
            }
        };
        match Distribution::load(&target) {
            Ok(distribution) => Some(distribution),
            Err(e) => {
                tracing::warn!("failed to load metadata built from {package}: {e}");
                None
            }
        }
    }
}

/// Assembles the translator chain implied by a precedence list: one binary
/// translator per allowed built variant, and a source translator when builds
/// are allowed and an interpreter is available to run them.
pub fn default_translator(
    identity: &InterpreterIdentity,
    platform: &Platform,
    precedence: &Precedence,
    python: Option<&Path>,
) -> ChainedTranslator {
    let mut translators: Vec<Box<dyn Translate>> = Vec::new();
    for kind in precedence.kinds() {
        match kind {
            PackageKind::Wheel => translators.push(Box::new(WheelTranslator::new(
                identity.clone(),
                platform.clone(),
            ))),
            PackageKind::Egg => translators.push(Box::new(EggTranslator::new(
                identity.clone(),
                platform.clone(),
            ))),
            PackageKind::Source => {
                let Some(python) = python else {
                    tracing::debug!("no interpreter available; source packages will not build");
                    continue;
                };
                let build = if precedence.allows(PackageKind::Wheel) {
                    BuildFormat::Wheel
                } else {
                    BuildFormat::Egg
                };
                translators.push(Box::new(SourceTranslator::new(
                    python.to_path_buf(),
                    build,
                    identity.clone(),
                    platform.clone(),
                )));
            }
        }
    }
    ChainedTranslator::new(translators)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::interpreter::PythonVersion;
    use crate::testing::{write_egg, write_wheel};

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

    #[tokio::test]
    async fn test_wheel_translation_copies_and_loads() {
        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();
        let path = write_wheel(src.path(), "demo", "1.0", &[], &[], "py3-none-any");
        let package = Package::from_link(crate::types::Link::from_path(&path).unwrap()).unwrap();

        let translator = WheelTranslator::new(identity(), platform());
        let dist = translator.translate(&package, dst.path()).await.unwrap();
        assert_eq!(dist.name().as_str(), "demo");
        assert_eq!(dist.location(), dst.path().join("demo-1.0-py3-none-any.whl"));
        assert!(dist.location().exists());
    }

    #[tokio::test]
    async fn test_wrong_variant_is_not_mine() {
        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();
        let path = write_egg(src.path(), "demo", "1.0", "py3.9", None);
        let package = Package::from_link(crate::types::Link::from_path(&path).unwrap()).unwrap();

        let translator = WheelTranslator::new(identity(), platform());
        assert!(translator.translate(&package, dst.path()).await.is_none());
    }

    #[tokio::test]
    async fn test_incompatible_wheel_is_skipped() {
        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();
        let path = write_wheel(src.path(), "demo", "1.0", &[], &[], "cp27-cp27m-win_amd64");
        let package = Package::from_link(crate::types::Link::from_path(&path).unwrap()).unwrap();

        let translator = WheelTranslator::new(identity(), platform());
        assert!(translator.translate(&package, dst.path()).await.is_none());
    }

    #[tokio::test]
    async fn test_remote_package_is_skipped() {
        let dst = tempfile::tempdir().unwrap();
        let package = Package::from_href("https://example.com/demo-1.0-py3-none-any.whl").unwrap();
        let translator = WheelTranslator::new(identity(), platform());
        assert!(translator.translate(&package, dst.path()).await.is_none());
    }

    #[tokio::test]
    async fn test_build_failure_is_skipped() {
        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();
        let path = crate::testing::write_sdist(src.path(), "demo", "1.0");
        let package = Package::from_link(crate::types::Link::from_path(&path).unwrap()).unwrap();

        // The archive unpacks fine; the build command cannot even start.
        let translator = SourceTranslator::new(
            PathBuf::from("/nonexistent/interpreter"),
            BuildFormat::Wheel,
            identity(),
            platform(),
        );
        assert!(translator.translate(&package, dst.path()).await.is_none());
    }

    #[tokio::test]
    async fn test_unreadable_source_archive_is_skipped() {
        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();
        let path = src.path().join("demo-1.0.tar.gz");
        std::fs::write(&path, b"this is not a tarball").unwrap();
        let package = Package::from_link(crate::types::Link::from_path(&path).unwrap()).unwrap();

        let translator = SourceTranslator::new(
            PathBuf::from("python3"),
            BuildFormat::Wheel,
            identity(),
            platform(),
        );
        assert!(translator.translate(&package, dst.path()).await.is_none());
    }

    #[tokio::test]
    async fn test_chained_translator_takes_first_success() {
        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();
        let path = write_wheel(src.path(), "demo", "1.0", &[], &[], "py3-none-any");
        let package = Package::from_link(crate::types::Link::from_path(&path).unwrap()).unwrap();

        let chain = default_translator(&identity(), &platform(), &Precedence::default(), None);
        let dist = chain.translate(&package, dst.path()).await.unwrap();
        assert_eq!(dist.name().as_str(), "demo");
    }
}

use std::fmt::{Display, Formatter};
use std::path::PathBuf;
use std::str::FromStr;

use pep440_rs::Version;

use crate::interpreter::InterpreterIdentity;
use crate::tags::{CompatibilityTag, Platform};
use crate::types::{Link, PackageName, Requirement};

/// A distribution archive discovered behind a [`Link`], classified by its
/// filename.
///
/// * **Source** archives build on any interpreter and platform but require a
///   build step before they can be imported.
/// * **Egg** archives are pre-built and carry an optional interpreter and
///   platform tag.
/// * **Wheel** archives are pre-built and carry PEP-425 compatibility tags.
///
/// Parsing is infallible only in the sense that a malformed filename yields
/// `None`; callers must tolerate that.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub enum Package {
    /// An sdist archive (`foo-1.0.tar.gz`).
    Source(SourcePackage),
    /// A built egg (`foo-1.0-py2.7[-plat].egg`).
    Egg(EggPackage),
    /// A built wheel (`foo-1.0-py3-none-any.whl`).
    Wheel(WheelPackage),
}

/// The archive format of a source package.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
#[allow(missing_docs)]
pub enum SourceFormat {
    Zip,
    TarGz,
    TarBz2,
    Tar,
}

impl SourceFormat {
    fn strip(filename: &str) -> Option<(&str, SourceFormat)> {
        if let Some(stem) = filename.strip_suffix(".zip") {
            Some((stem, SourceFormat::Zip))
        } else if let Some(stem) = filename.strip_suffix(".tar.gz") {
            Some((stem, SourceFormat::TarGz))
        } else if let Some(stem) = filename.strip_suffix(".tgz") {
            Some((stem, SourceFormat::TarGz))
        } else if let Some(stem) = filename.strip_suffix(".tar.bz2") {
            Some((stem, SourceFormat::TarBz2))
        } else if let Some(stem) = filename.strip_suffix(".tar") {
            Some((stem, SourceFormat::Tar))
        } else {
            None
        }
    }
}

/// An sdist archive.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct SourcePackage {
    link: Link,
    name: PackageName,
    version: Version,
    format: SourceFormat,
}

impl SourcePackage {
    /// The archive format, determined from the filename extension.
    pub fn format(&self) -> SourceFormat {
        self.format
    }

    fn from_link(link: Link) -> Option<SourcePackage> {
        let (stem, format) = SourceFormat::strip(link.filename())?;
        let (name, version) = split_name_version(stem)?;
        Some(SourcePackage {
            link,
            name,
            version,
            format,
        })
    }
}

/// A built egg. Compatible when the embedded interpreter tag is absent or
/// matches the target `major.minor`, and the platform tag is absent or equal
/// to the target platform.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct EggPackage {
    link: Link,
    name: PackageName,
    version: Version,
    py_tag: Option<String>,
    platform_tag: Option<String>,
}

impl EggPackage {
    fn from_link(link: Link) -> Option<EggPackage> {
        let stem = link.filename().strip_suffix(".egg")?;

        // name-version[-pyX.Y[-platform]] where the platform itself may
        // contain dashes (`linux-x86_64`).
        let (py_tag, platform_tag, name_version) = match stem.split('-').position(is_python_tag) {
            Some(idx) => {
                let parts: Vec<&str> = stem.split('-').collect();
                let platform = if idx + 1 < parts.len() {
                    Some(parts[idx + 1..].join("-"))
                } else {
                    None
                };
                (
                    Some(parts[idx].to_owned()),
                    platform,
                    parts[..idx].join("-"),
                )
            }
            None => (None, None, stem.to_owned()),
        };

        let (name, version) = split_name_version(&name_version)?;
        Some(EggPackage {
            link,
            name,
            version,
            py_tag,
            platform_tag,
        })
    }
}

fn is_python_tag(part: &str) -> bool {
    part.strip_prefix("py")
        .map(|rest| !rest.is_empty() && rest.chars().all(|c| c.is_ascii_digit() || c == '.'))
        .unwrap_or(false)
}

/// A built wheel, tagged `name-version[-build]-py-abi-plat`. Compatible when
/// any of its tag triples appears in the target interpreter's tag set.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct WheelPackage {
    link: Link,
    name: PackageName,
    version: Version,
    build_tag: Option<String>,
    py_tags: Vec<String>,
    abi_tags: Vec<String>,
    platform_tags: Vec<String>,
}

impl WheelPackage {
    fn from_link(link: Link) -> Option<WheelPackage> {
        let stem = link.filename().strip_suffix(".whl")?;

        let (rest, platform_tags) = stem.rsplit_once('-')?;
        let (rest, abi_tags) = rest.rsplit_once('-')?;
        let (rest, py_tags) = rest.rsplit_once('-')?;

        let (name_version, build_tag) = match split_name_version(rest) {
            Some(found) => (found, None),
            None => {
                // One component left over after name and version: a build tag,
                // which must start with a digit.
                let (prefix, build) = rest.rsplit_once('-')?;
                if !build.starts_with(|c: char| c.is_ascii_digit()) {
                    return None;
                }
                (split_name_version(prefix)?, Some(build.to_owned()))
            }
        };
        let (name, version) = name_version;

        let split = |tags: &str| tags.split('.').map(ToOwned::to_owned).collect::<Vec<_>>();
        let py_tags = split(py_tags);
        let abi_tags = split(abi_tags);
        let platform_tags = split(platform_tags);
        Some(WheelPackage {
            link,
            name,
            version,
            build_tag,
            py_tags,
            abi_tags,
            platform_tags,
        })
    }

    /// Every `(py, abi, platform)` triple this wheel declares.
    pub fn tag_triples(&self) -> impl Iterator<Item = CompatibilityTag> + '_ {
        self.py_tags.iter().flat_map(move |py| {
            self.abi_tags.iter().flat_map(move |abi| {
                self.platform_tags.iter().map(move |plat| CompatibilityTag {
                    python: py.clone(),
                    abi: abi.clone(),
                    platform: plat.clone(),
                })
            })
        })
    }
}

/// The variant of a [`Package`], used for precedence configuration.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
#[allow(missing_docs)]
pub enum PackageKind {
    Source,
    Egg,
    Wheel,
}

impl Display for PackageKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PackageKind::Source => "source",
            PackageKind::Egg => "egg",
            PackageKind::Wheel => "wheel",
        };
        write!(f, "{s}")
    }
}

/// Splits a `name-version` stem by scanning for the first `-` followed by
/// something that parses as a version. This mirrors the way installers
/// recover the project name from filenames like `zope.interface-4.1.1`.
fn split_name_version(stem: &str) -> Option<(PackageName, Version)> {
    for (idx, _) in stem.match_indices('-') {
        let candidate = &stem[idx + 1..];
        if !candidate.starts_with(|c: char| c.is_ascii_digit()) {
            continue;
        }
        if let Ok(version) = Version::from_str(candidate) {
            let name = PackageName::from_str(&stem[..idx]).ok()?;
            return Some((name, version));
        }
    }
    None
}

fn normalize_platform(platform: &str) -> String {
    platform
        .chars()
        .map(|c| match c {
            '-' | '.' => '_',
            c => c.to_ascii_lowercase(),
        })
        .collect()
}

impl Package {
    /// Classifies and parses an href by its filename suffix. Returns `None`
    /// for anything that is not a recognizable distribution archive.
    pub fn from_href(href: &str) -> Option<Package> {
        let link = Link::wrap(href).ok()?;
        Package::from_link(link)
    }

    /// Classifies and parses an already-normalized link.
    pub fn from_link(link: Link) -> Option<Package> {
        let filename = link.filename();
        if filename.ends_with(".whl") {
            WheelPackage::from_link(link).map(Package::Wheel)
        } else if filename.ends_with(".egg") {
            EggPackage::from_link(link).map(Package::Egg)
        } else {
            SourcePackage::from_link(link).map(Package::Source)
        }
    }

    /// The variant of this package.
    pub fn kind(&self) -> PackageKind {
        match self {
            Package::Source(_) => PackageKind::Source,
            Package::Egg(_) => PackageKind::Egg,
            Package::Wheel(_) => PackageKind::Wheel,
        }
    }

    /// The project name parsed from the filename.
    pub fn name(&self) -> &PackageName {
        match self {
            Package::Source(p) => &p.name,
            Package::Egg(p) => &p.name,
            Package::Wheel(p) => &p.name,
        }
    }

    /// The version parsed from the filename.
    pub fn version(&self) -> &Version {
        match self {
            Package::Source(p) => &p.version,
            Package::Egg(p) => &p.version,
            Package::Wheel(p) => &p.version,
        }
    }

    /// The link this package was parsed from.
    pub fn link(&self) -> &Link {
        match self {
            Package::Source(p) => &p.link,
            Package::Egg(p) => &p.link,
            Package::Wheel(p) => &p.link,
        }
    }

    /// The filename of the archive.
    pub fn filename(&self) -> &str {
        self.link().filename()
    }

    /// The filesystem path of a local package.
    pub fn path(&self) -> PathBuf {
        self.link().path()
    }

    /// Is the archive on the local filesystem?
    pub fn local(&self) -> bool {
        self.link().local()
    }

    /// Is the archive behind a remote URL?
    pub fn remote(&self) -> bool {
        self.link().remote()
    }

    /// True iff the canonical names match and the version meets every
    /// specifier of `requirement`.
    pub fn satisfies(&self, requirement: &Requirement) -> bool {
        self.name() == &requirement.name && requirement.versions_match(self.version())
    }

    /// Can this archive be loaded by `identity` on `platform`? Source
    /// archives always can (they are built on demand); built archives match
    /// their embedded tags against the target.
    pub fn compatible(&self, identity: &InterpreterIdentity, platform: &Platform) -> bool {
        match self {
            Package::Source(_) => true,
            Package::Egg(egg) => {
                let py_matches = egg
                    .py_tag
                    .as_ref()
                    .map(|tag| *tag == format!("py{}", identity.python()))
                    .unwrap_or(true);
                let platform_matches = egg
                    .platform_tag
                    .as_ref()
                    .map(|tag| normalize_platform(tag) == normalize_platform(platform.as_str()))
                    .unwrap_or(true);
                py_matches && platform_matches
            }
            Package::Wheel(wheel) => {
                let supported = identity.tags(platform);
                wheel.tag_triples().any(|tag| supported.contains(&tag))
            }
        }
    }
}

impl Display for Package {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.link())
    }
}

//! Materialized distributions and their declared dependencies.

use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};

use indexmap::IndexSet;
use miette::Diagnostic;
use pep440_rs::Version;
use thiserror::Error;

use crate::marker::{MarkerSnapshot, WithExtra};
use crate::metadata::{DistMetadata, MetadataError};
use crate::types::{Extra, PackageName, Requirement};

/// A fully materialized distribution: an archive on the local filesystem
/// together with its importable metadata.
///
/// Distributions are what a resolve returns; the archive builder consumes
/// them one by one.
#[derive(Debug, Clone)]
pub struct Distribution {
    location: PathBuf,
    metadata: DistMetadata,
}

/// Error produced while loading a distribution from disk.
#[derive(Debug, Error, Diagnostic)]
#[allow(missing_docs)]
pub enum DistributionError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("failed to read archive: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("no metadata found inside '{0}'")]
    MissingMetadata(PathBuf),

    #[error("unsupported distribution archive '{0}'")]
    UnsupportedArchive(PathBuf),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Metadata(#[from] MetadataError),
}

impl Distribution {
    /// Loads a distribution archive, dispatching on the filename suffix.
    pub fn load(path: &Path) -> Result<Distribution, DistributionError> {
        let filename = path
            .file_name()
            .and_then(|f| f.to_str())
            .unwrap_or_default();
        if filename.ends_with(".whl") {
            Distribution::from_wheel(path)
        } else if filename.ends_with(".egg") {
            Distribution::from_egg(path)
        } else {
            Err(DistributionError::UnsupportedArchive(path.to_path_buf()))
        }
    }

    /// Loads metadata from a wheel's `*.dist-info/METADATA`.
    pub fn from_wheel(path: &Path) -> Result<Distribution, DistributionError> {
        let file = fs_err::File::open(path)?;
        let mut archive = zip::ZipArchive::new(file.into_parts().0)?;

        let metadata_name = archive
            .file_names()
            .find(|name| {
                name.ends_with("/METADATA")
                    && name.splitn(2, '/').next().is_some_and(|dir| {
                        dir.ends_with(".dist-info") && !dir.contains('/')
                    })
            })
            .map(ToOwned::to_owned)
            .ok_or_else(|| DistributionError::MissingMetadata(path.to_path_buf()))?;

        let mut payload = Vec::new();
        std::io::Read::read_to_end(&mut archive.by_name(&metadata_name)?, &mut payload)?;
        let metadata = DistMetadata::from_metadata(&payload)?;

        Ok(Distribution {
            location: path.to_path_buf(),
            metadata,
        })
    }

    /// Loads metadata from an egg's `EGG-INFO/PKG-INFO`, folding in
    /// `EGG-INFO/requires.txt` when present.
    pub fn from_egg(path: &Path) -> Result<Distribution, DistributionError> {
        let file = fs_err::File::open(path)?;
        let mut archive = zip::ZipArchive::new(file.into_parts().0)?;

        let mut payload = Vec::new();
        match archive.by_name("EGG-INFO/PKG-INFO") {
            Ok(mut entry) => {
                std::io::Read::read_to_end(&mut entry, &mut payload)?;
            }
            Err(zip::result::ZipError::FileNotFound) => {
                return Err(DistributionError::MissingMetadata(path.to_path_buf()))
            }
            Err(e) => return Err(e.into()),
        }
        let mut metadata = DistMetadata::from_metadata(&payload)?;

        let mut requires = String::new();
        if let Ok(mut entry) = archive.by_name("EGG-INFO/requires.txt") {
            std::io::Read::read_to_string(&mut entry, &mut requires)?;
            metadata.merge_requires_txt(&requires);
        }

        Ok(Distribution {
            location: path.to_path_buf(),
            metadata,
        })
    }

    /// The distribution name.
    pub fn name(&self) -> &PackageName {
        &self.metadata.name
    }

    /// The distribution version.
    pub fn version(&self) -> &Version {
        &self.metadata.version
    }

    /// Where the archive lives on disk.
    pub fn location(&self) -> &Path {
        &self.location
    }

    /// The parsed metadata.
    pub fn metadata(&self) -> &DistMetadata {
        &self.metadata
    }

    /// The dependencies of this distribution under the given set of active
    /// feature groups, evaluated against the target environment `snapshot`.
    /// Dependencies whose marker evaluates false are dropped; the markers of
    /// the survivors are consumed here and stripped from the result.
    pub fn requires(&self, extras: &IndexSet<Extra>, snapshot: &MarkerSnapshot) -> Vec<Requirement> {
        let mut out: Vec<Requirement> = Vec::new();
        let mut seen: IndexSet<String> = IndexSet::new();

        for declared in &self.metadata.requires_dist {
            let applies = match &declared.marker {
                None => true,
                Some(marker) => {
                    let bare = WithExtra {
                        snapshot,
                        extra: None,
                    };
                    marker.eval(&bare)
                        || extras.iter().any(|extra| {
                            marker.eval(&WithExtra {
                                snapshot,
                                extra: Some(extra),
                            })
                        })
                }
            };
            if !applies {
                continue;
            }
            let mut requirement = declared.clone();
            requirement.marker = None;
            if seen.insert(requirement.to_string()) {
                out.push(requirement);
            }
        }

        out
    }
}

impl Display for Distribution {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.name().as_str(), self.version())
    }
}

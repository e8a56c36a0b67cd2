use std::borrow::Borrow;
use std::cmp::Ordering;
use std::fmt::{Display, Formatter};
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use miette::Diagnostic;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_with::{DeserializeFromStr, SerializeDisplay};
use thiserror::Error;

/// The name of a project as it appears in requirements, filenames and index
/// pages. Keeps the spelling it was parsed from next to the canonical key used
/// for every comparison: lowercased, with every run of non-alphanumeric
/// characters collapsed into a single `-`.
#[derive(Debug, Clone, Eq, SerializeDisplay, DeserializeFromStr)]
pub struct PackageName {
    source: Box<str>,
    canonical: Box<str>,
}

/// Error returned when a string cannot be used as a project name.
#[derive(Debug, Clone, Error, Diagnostic)]
#[allow(missing_docs)]
pub enum ParsePackageNameError {
    #[error("invalid project name '{0}'")]
    InvalidName(String),
}

static VALID_NAME: Lazy<Regex> = Lazy::new(|| {
    // https://packaging.python.org/specifications/core-metadata/#name
    Regex::new(r"(?i)^[A-Z0-9]([A-Z0-9._-]*[A-Z0-9])?$").unwrap()
});

fn canonicalize(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut dash_pending = false;
    for ch in name.chars() {
        if ch.is_ascii_alphanumeric() {
            if dash_pending && !out.is_empty() {
                out.push('-');
            }
            dash_pending = false;
            out.push(ch.to_ascii_lowercase());
        } else {
            dash_pending = true;
        }
    }
    out
}

impl PackageName {
    /// The name exactly as written by the user or in the filename.
    pub fn as_source_str(&self) -> &str {
        self.source.as_ref()
    }

    /// The canonical key for this name.
    pub fn as_str(&self) -> &str {
        self.canonical.as_ref()
    }

    /// Returns the canonical form, dropping the source spelling.
    pub fn to_canonical(&self) -> NormalizedPackageName {
        NormalizedPackageName(self.canonical.clone())
    }
}

impl FromStr for PackageName {
    type Err = ParsePackageNameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if !VALID_NAME.is_match(s) {
            return Err(ParsePackageNameError::InvalidName(s.into()));
        }
        Ok(PackageName {
            source: s.to_owned().into_boxed_str(),
            canonical: canonicalize(s).into_boxed_str(),
        })
    }
}

impl Display for PackageName {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.source)
    }
}

impl Hash for PackageName {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.canonical.hash(state)
    }
}

impl PartialEq for PackageName {
    fn eq(&self, other: &Self) -> bool {
        self.canonical.eq(&other.canonical)
    }
}

impl PartialOrd for PackageName {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PackageName {
    fn cmp(&self, other: &Self) -> Ordering {
        self.canonical.cmp(&other.canonical)
    }
}

/// A project name reduced to its canonical key. Guaranteed to compare equal to
/// every spelling that canonicalizes to it.
#[repr(transparent)]
#[derive(
    Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, SerializeDisplay, DeserializeFromStr,
)]
pub struct NormalizedPackageName(Box<str>);

impl NormalizedPackageName {
    /// Returns the canonical key as a string slice.
    pub fn as_str(&self) -> &str {
        self.0.as_ref()
    }
}

impl From<PackageName> for NormalizedPackageName {
    fn from(value: PackageName) -> Self {
        Self(value.canonical)
    }
}

impl From<NormalizedPackageName> for PackageName {
    fn from(value: NormalizedPackageName) -> Self {
        Self {
            source: value.0.clone(),
            canonical: value.0,
        }
    }
}

impl Display for NormalizedPackageName {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for NormalizedPackageName {
    type Err = ParsePackageNameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(PackageName::from_str(s)?.into())
    }
}

impl Borrow<str> for NormalizedPackageName {
    fn borrow(&self) -> &str {
        self.0.as_ref()
    }
}

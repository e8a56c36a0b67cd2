//! The things a user can ask to resolve.
//!
//! A resolvable is either a symbolic requirement (resolved by iterating a
//! catalog) or a pinned concrete package (a path or direct URL to an
//! archive). Version-control URLs are recognized so they can be rejected with
//! a useful error; supporting them is reserved.
//!
//! String dispatch tries each form in a fixed order — VCS, package,
//! requirement — and the first parser that accepts the string wins.

use std::fmt::{Display, Formatter};
use std::str::FromStr;

use miette::Diagnostic;
use thiserror::Error;

use crate::iterator::PackageIter;
use crate::types::{Extra, NormalizedPackageName, Package, Requirement};

const VCS_SCHEMES: &[&str] = &["git", "svn", "hg", "bzr"];

/// A requirement-like input to the resolver.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolvable {
    /// A symbolic requirement, satisfied by whatever the catalog offers.
    Requirement(Requirement),
    /// A concrete package the user pinned directly.
    Package(Package),
}

/// Error produced when a string is not resolvable.
#[derive(Debug, Clone, Error, Diagnostic)]
#[allow(missing_docs)]
pub enum ResolvableError {
    #[error("version-control URLs are not supported: '{0}'")]
    UnsupportedVcs(String),

    #[error("'{0}' is neither a package archive nor a requirement expression")]
    InvalidRequirement(String),
}

impl Resolvable {
    /// Parses a resolvable string, trying each form in registration order.
    pub fn parse(input: &str) -> Result<Resolvable, ResolvableError> {
        let input = input.trim();
        if VCS_SCHEMES
            .iter()
            .any(|vcs| input.starts_with(&format!("{vcs}+")))
        {
            return Err(ResolvableError::UnsupportedVcs(input.to_owned()));
        }
        if let Some(package) = Package::from_href(input) {
            return Ok(Resolvable::Package(package));
        }
        if let Ok(requirement) = input.parse::<Requirement>() {
            return Ok(Resolvable::Requirement(requirement));
        }
        Err(ResolvableError::InvalidRequirement(input.to_owned()))
    }

    /// The canonical name of the project this resolvable constrains.
    pub fn name(&self) -> NormalizedPackageName {
        match self {
            Resolvable::Requirement(requirement) => requirement.key(),
            Resolvable::Package(package) => package.name().to_canonical(),
        }
    }

    /// Is this pinned to exactly one version?
    pub fn exact(&self) -> bool {
        match self {
            Resolvable::Requirement(requirement) => requirement.is_exact(),
            Resolvable::Package(_) => true,
        }
    }

    /// The feature groups this resolvable activates. Concrete packages carry
    /// none; extras syntax on package hrefs is not parsed.
    pub fn extras(&self) -> Vec<Extra> {
        match self {
            Resolvable::Requirement(requirement) => requirement.extras.clone(),
            Resolvable::Package(_) => Vec::new(),
        }
    }

    /// The candidate packages for this resolvable. Requirements consult the
    /// iterator; pinned packages ignore it.
    pub async fn packages(&self, iterator: &dyn PackageIter) -> Vec<Package> {
        match self {
            Resolvable::Requirement(requirement) => iterator.iter(requirement).await,
            Resolvable::Package(package) => vec![package.clone()],
        }
    }
}

impl FromStr for Resolvable {
    type Err = ResolvableError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Resolvable::parse(s)
    }
}

impl Display for Resolvable {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Resolvable::Requirement(requirement) => write!(f, "{requirement}"),
            Resolvable::Package(package) => write!(f, "{package}"),
        }
    }
}

impl From<Requirement> for Resolvable {
    fn from(requirement: Requirement) -> Self {
        Resolvable::Requirement(requirement)
    }
}

impl From<Package> for Resolvable {
    fn from(package: Package) -> Self {
        Resolvable::Package(package)
    }
}

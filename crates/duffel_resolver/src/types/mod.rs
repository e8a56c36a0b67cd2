//! The vocabulary the resolver is written in: names, links, requirement
//! expressions, and the package taxonomy.

mod extra;
mod link;
mod package;
mod package_name;
mod requirement;

pub use extra::{Extra, ParseExtraError};
pub use link::{HashAlgorithm, Link, ParseLinkError};
pub use package::{
    EggPackage, Package, PackageKind, SourceFormat, SourcePackage, WheelPackage,
};
pub use package_name::{NormalizedPackageName, PackageName, ParsePackageNameError};
pub use requirement::{ParseRequirementError, Requirement};

pub use pep440_rs::{Version, VersionSpecifier, VersionSpecifiers};

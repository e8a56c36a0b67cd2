use std::fmt::{Display, Formatter};
use std::str::FromStr;

use miette::Diagnostic;
use pep440_rs::{Operator, Version, VersionSpecifiers};
use serde_with::{DeserializeFromStr, SerializeDisplay};
use thiserror::Error;

use crate::marker::MarkerExpr;
use crate::types::{Extra, NormalizedPackageName, PackageName};

/// A requirement expression: a project name, an optional set of feature
/// groups, a set of version specifiers and an optional environment marker.
///
/// A requirement is *exact* when it pins a single version with `==`. The
/// project name is compared through its canonical key everywhere.
#[derive(Debug, Clone, Eq, PartialEq, SerializeDisplay, DeserializeFromStr)]
pub struct Requirement {
    /// The project this requirement constrains.
    pub name: PackageName,
    /// Requested feature groups (`flask[async]`).
    pub extras: Vec<Extra>,
    /// The version constraints a candidate must meet.
    pub specifiers: VersionSpecifiers,
    /// Guard evaluated against the target environment; a false marker drops
    /// the requirement entirely.
    pub marker: Option<MarkerExpr>,
}

/// Error returned when a string is not a valid requirement expression.
#[derive(Debug, Error, Diagnostic)]
#[error("failed to parse requirement '{input}'")]
pub struct ParseRequirementError {
    /// The offending input.
    pub input: String,
    #[source]
    source: peg::error::ParseError<peg::str::LineCol>,
}

impl Requirement {
    /// The canonical key of the project name.
    pub fn key(&self) -> NormalizedPackageName {
        self.name.to_canonical()
    }

    /// True when the requirement is a single `== <version>` pin.
    pub fn is_exact(&self) -> bool {
        self.exact_version().is_some()
    }

    /// The pinned version of an exact requirement.
    pub fn exact_version(&self) -> Option<&Version> {
        match &self.specifiers[..] {
            [only] if matches!(only.operator(), Operator::Equal | Operator::ExactEqual) => {
                Some(only.version())
            }
            _ => None,
        }
    }

    /// Does `version` meet every specifier of this requirement?
    pub fn versions_match(&self, version: &Version) -> bool {
        self.specifiers.contains(version)
    }
}

impl FromStr for Requirement {
    type Err = ParseRequirementError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        crate::reqparse::requirement(s).map_err(|source| ParseRequirementError {
            input: s.to_owned(),
            source,
        })
    }
}

impl Display for Requirement {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name.as_source_str())?;
        if !self.extras.is_empty() {
            write!(f, "[")?;
            for (i, extra) in self.extras.iter().enumerate() {
                if i > 0 {
                    write!(f, ",")?;
                }
                write!(f, "{}", extra.as_source_str())?;
            }
            write!(f, "]")?;
        }
        if !self.specifiers.is_empty() {
            write!(f, " {}", self.specifiers)?;
        }
        if let Some(marker) = &self.marker {
            write!(f, "; {marker}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_parse_basics() {
        let req: Requirement = "flask>=0.9,<1.0".parse().unwrap();
        assert_eq!(req.name.as_str(), "flask");
        assert!(req.extras.is_empty());
        assert_eq!(req.specifiers.len(), 2);
        assert!(req.marker.is_none());
        assert!(!req.is_exact());

        assert!(req.versions_match(&"0.9.1".parse().unwrap()));
        assert!(!req.versions_match(&"1.0".parse().unwrap()));
    }

    #[test]
    fn test_parse_extras_and_marker() {
        let req: Requirement = "foo[bar,Baz_Qux]==2.3.4; python_version == '2.7'"
            .parse()
            .unwrap();
        assert_eq!(req.extras.len(), 2);
        assert_eq!(req.extras[0].as_str(), "bar");
        assert_eq!(req.extras[1].as_str(), "baz-qux");
        assert!(req.is_exact());
        assert_eq!(req.exact_version(), Some(&"2.3.4".parse().unwrap()));
        assert!(req.marker.is_some());
    }

    #[test]
    fn test_parenthesized_specifiers() {
        let req: Requirement = "foo (>=2, <3)".parse().unwrap();
        assert_eq!(req.specifiers.len(), 2);
    }

    #[test]
    fn test_exactness() {
        assert!(Requirement::from_str("foo==2.3.4").unwrap().is_exact());
        assert!(!Requirement::from_str("foo").unwrap().is_exact());
        assert!(!Requirement::from_str("foo>=2.3.4").unwrap().is_exact());
        assert!(!Requirement::from_str("foo==2.3.*").unwrap().is_exact());
        assert!(!Requirement::from_str("foo==2.3,==2.4").unwrap().is_exact());
    }

    #[test]
    fn test_direct_references_rejected() {
        assert!(Requirement::from_str("foo @ https://example.com/foo-1.0.tar.gz").is_err());
    }

    #[test]
    fn test_display_roundtrip() {
        for input in [
            "foo",
            "foo==2.3.4",
            "foo[bar] >=2,<3",
            "foo >=1,<2,!=1.5",
            "foo; python_version >= '3' and sys_platform == 'linux'",
            "foo.bar-baz (~=7.1); 'win' in sys_platform",
        ] {
            let req: Requirement = input.parse().unwrap();
            let reparsed: Requirement = req.to_string().parse().unwrap();
            assert_eq!(req, reparsed, "{input}");
        }
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(Requirement::from_str("").is_err());
        assert!(Requirement::from_str("==1.0").is_err());
        assert!(Requirement::from_str("foo bar").is_err());
    }
}

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

/// The name of an optional feature group of a package (e.g. the `async` in
/// `flask[async]`). Compared through the same canonical key as project names.
#[derive(Debug, Clone, Eq, SerializeDisplay, DeserializeFromStr)]
pub struct Extra {
    source: Box<str>,
    canonical: Box<str>,
}

/// Error returned when a string is not a valid extra name.
#[derive(Debug, Clone, Error, Diagnostic)]
#[allow(missing_docs)]
pub enum ParseExtraError {
    #[error("invalid extra name '{0}'")]
    InvalidExtra(String),
}

static VALID_EXTRA: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^[A-Z0-9]([A-Z0-9._-]*[A-Z0-9])?$").unwrap());

impl Extra {
    /// The extra exactly as written.
    pub fn as_source_str(&self) -> &str {
        self.source.as_ref()
    }

    /// The canonical key for this extra.
    pub fn as_str(&self) -> &str {
        self.canonical.as_ref()
    }
}

impl FromStr for Extra {
    type Err = ParseExtraError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if !VALID_EXTRA.is_match(s) {
            return Err(ParseExtraError::InvalidExtra(s.into()));
        }
        let mut canonical = String::with_capacity(s.len());
        let mut dash_pending = false;
        for ch in s.chars() {
            if ch.is_ascii_alphanumeric() {
                if dash_pending && !canonical.is_empty() {
                    canonical.push('-');
                }
                dash_pending = false;
                canonical.push(ch.to_ascii_lowercase());
            } else {
                dash_pending = true;
            }
        }
        Ok(Extra {
            source: s.to_owned().into_boxed_str(),
            canonical: canonical.into_boxed_str(),
        })
    }
}

impl Display for Extra {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.source)
    }
}

impl Hash for Extra {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.canonical.hash(state)
    }
}

impl PartialEq for Extra {
    fn eq(&self, other: &Self) -> bool {
        self.canonical.eq(&other.canonical)
    }
}

impl PartialOrd for Extra {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Extra {
    fn cmp(&self, other: &Self) -> Ordering {
        self.canonical.cmp(&other.canonical)
    }
}

impl Borrow<str> for Extra {
    fn borrow(&self) -> &str {
        self.canonical.as_ref()
    }
}

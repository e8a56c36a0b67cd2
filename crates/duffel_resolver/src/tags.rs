//! Built distributions encode the interpreter, ABI, and platform they support
//! in their filenames as compatibility tags. This module provides the tag
//! vocabulary; the ordered tag set an interpreter can load is derived in
//! [`crate::interpreter`].

use std::fmt::{Display, Formatter};
use std::str::FromStr;

use indexmap::IndexSet;
use itertools::Itertools;
use serde_with::{DeserializeFromStr, SerializeDisplay};

/// A `(python, abi, platform)` tag triple of a built distribution.
#[derive(Debug, Clone, Hash, Eq, PartialEq, SerializeDisplay, DeserializeFromStr)]
pub struct CompatibilityTag {
    /// The interpreter tag, e.g. `cp27`.
    pub python: String,
    /// The ABI tag, e.g. `cp27m` or `none`.
    pub abi: String,
    /// The platform tag, e.g. `macosx_10_4_x86_64` or `any`.
    pub platform: String,
}

impl FromStr for CompatibilityTag {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let Some((python, abi, platform)) = s.split('-').map(ToOwned::to_owned).collect_tuple()
        else {
            return Err(String::from("expected a py-abi-platform triple"));
        };
        Ok(Self {
            python,
            abi,
            platform,
        })
    }
}

impl Display for CompatibilityTag {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}-{}", &self.python, &self.abi, &self.platform)
    }
}

/// The ordered set of tags a target can load, most specific first.
#[derive(Debug, Clone)]
pub struct CompatibilityTags {
    tags: IndexSet<CompatibilityTag>,
}

impl CompatibilityTags {
    /// Iterates the supported tags in preference order.
    pub fn iter(&self) -> impl Iterator<Item = &'_ CompatibilityTag> + '_ {
        self.tags.iter()
    }

    /// Is `tag` supported at all?
    pub fn contains(&self, tag: &CompatibilityTag) -> bool {
        self.tags.contains(tag)
    }

    /// The preference rank of `tag`; higher is better, `None` means
    /// unsupported.
    pub fn rank(&self, tag: &CompatibilityTag) -> Option<i32> {
        self.tags.get_index_of(tag).map(|idx| -(idx as i32))
    }
}

impl FromIterator<CompatibilityTag> for CompatibilityTags {
    fn from_iter<T: IntoIterator<Item = CompatibilityTag>>(iter: T) -> Self {
        Self {
            tags: FromIterator::from_iter(iter),
        }
    }
}

/// A PEP-425-style platform string (`linux_x86_64`, `macosx_10_4_x86_64`,
/// `win_amd64`, or `any`).
#[derive(Debug, Clone, Eq, PartialEq, Hash, SerializeDisplay, DeserializeFromStr)]
pub struct Platform(String);

impl Platform {
    /// Wraps a platform string.
    pub fn new(platform: impl Into<String>) -> Platform {
        Platform(platform.into())
    }

    /// The platform string of the machine the resolver runs on. This is a
    /// coarse mapping; cross-resolving callers pass an explicit platform
    /// obtained from the target interpreter instead.
    pub fn current() -> Platform {
        let arch = match std::env::consts::ARCH {
            "x86" => "i686",
            arch => arch,
        };
        let platform = match std::env::consts::OS {
            "linux" => format!("linux_{arch}"),
            "macos" => format!("macosx_10_9_{arch}"),
            "windows" => match arch {
                "x86_64" => String::from("win_amd64"),
                "i686" => String::from("win32"),
                arch => format!("win_{arch}"),
            },
            os => format!("{os}_{arch}"),
        };
        Platform(platform)
    }

    /// The platform string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for Platform {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Platform(s.to_owned()))
    }
}

impl Display for Platform {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_tag_from_str() {
        let tag = CompatibilityTag::from_str("py2-none-any").unwrap();
        assert_eq!(tag.python, "py2");
        assert_eq!(tag.abi, "none");
        assert_eq!(tag.platform, "any");
        assert_eq!(tag.to_string(), "py2-none-any");

        assert!(CompatibilityTag::from_str("py2-none").is_err());
    }

    #[test]
    fn test_rank_prefers_earlier_tags() {
        let tags: CompatibilityTags = ["cp27-cp27m-linux_x86_64", "cp27-none-any", "py2-none-any"]
            .into_iter()
            .map(|t| t.parse().unwrap())
            .collect();

        let specific: CompatibilityTag = "cp27-cp27m-linux_x86_64".parse().unwrap();
        let generic: CompatibilityTag = "py2-none-any".parse().unwrap();
        assert!(tags.rank(&specific) > tags.rank(&generic));
        assert_eq!(tags.rank(&"cp39-none-any".parse().unwrap()), None);
    }
}

//! Wheels encode the Python interpreter, ABI, and platform that they support
//! in their filenames using platform compatibility tags. This module holds
//! the ordered preference list of tags an interpreter supports and answers
//! whether, and how well, a wheel matches it.
//!
//! The finder never computes the tag list itself: which tags the target
//! interpreter supports is configuration, supplied by whoever constructs the
//! [`crate::PackageFinder`].

use indexmap::IndexSet;
use miette::Diagnostic;
use serde_with::{DeserializeFromStr, SerializeDisplay};
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use thiserror::Error;

/// One (interpreter, abi, platform) compatibility triple, as written between
/// the dashes of a wheel filename or listed by the target interpreter.
#[derive(Debug, Clone, Hash, Eq, PartialEq, SerializeDisplay, DeserializeFromStr)]
pub struct WheelTag {
    /// The interpreter tag, e.g. "cp311" or "py3".
    pub interpreter: String,

    /// The ABI tag, e.g. "abi3" or "none".
    pub abi: String,

    /// The platform tag, e.g. "manylinux_2_17_x86_64" or "any".
    pub platform: String,
}

/// The error returned when a string is not an `interpreter-abi-platform`
/// triple. The three parts are dash-free by construction, so the split is
/// unambiguous.
#[derive(Debug, Clone, Error, Diagnostic)]
#[error("'{0}' is not an interpreter-abi-platform tag triple")]
pub struct ParseWheelTagError(pub String);

impl FromStr for WheelTag {
    type Err = ParseWheelTagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split('-');
        match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(interpreter), Some(abi), Some(platform), None) => Ok(Self {
                interpreter: interpreter.to_owned(),
                abi: abi.to_owned(),
                platform: platform.to_owned(),
            }),
            _ => Err(ParseWheelTagError(s.to_owned())),
        }
    }
}

impl Display for WheelTag {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let WheelTag {
            interpreter,
            abi,
            platform,
        } = self;
        write!(f, "{interpreter}-{abi}-{platform}")
    }
}

/// An ordered preference list of platform tags. The earlier a tag appears,
/// the more specific it is to the running interpreter, and the more a wheel
/// matching it is preferred.
#[derive(Debug, Clone, Default)]
pub struct WheelTags {
    tags: IndexSet<WheelTag>,
}

impl WheelTags {
    /// Returns an iterator over the supported tags, most preferred first.
    pub fn tags(&self) -> impl Iterator<Item = &'_ WheelTag> + '_ {
        self.tags.iter()
    }

    /// The number of supported tags. Source archives sort as if they matched
    /// one past the least preferred tag.
    pub fn len(&self) -> usize {
        self.tags.len()
    }

    /// Returns true if no tags are present.
    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    /// Returns the preference index of the specified tag, or `None` if the
    /// tag is not supported. Index 0 is the strongest preference.
    pub fn index_of(&self, tag: &WheelTag) -> Option<usize> {
        self.tags.get_index_of(tag)
    }

    /// Returns if the specified tag is compatible with this set.
    pub fn is_compatible(&self, tag: &WheelTag) -> bool {
        self.tags.contains(tag)
    }

    /// Projects this set onto the platform-independent tags (platform `any`),
    /// preserving their relative order. Pure-python wheels are supported
    /// everywhere; this subset is what the index-hosted binary wheel policy
    /// checks against.
    pub fn noarch(&self) -> WheelTags {
        self.tags
            .iter()
            .filter(|tag| tag.platform == "any")
            .cloned()
            .collect()
    }
}

impl FromIterator<WheelTag> for WheelTags {
    fn from_iter<T: IntoIterator<Item = WheelTag>>(iter: T) -> Self {
        Self {
            tags: FromIterator::from_iter(iter),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn tags(s: &[&str]) -> WheelTags {
        s.iter().map(|t| t.parse().unwrap()).collect()
    }

    #[test]
    fn test_tag_parse_round_trips() {
        let tag: WheelTag = "cp311-abi3-manylinux_2_17_x86_64".parse().unwrap();
        assert_eq!(tag.interpreter, "cp311");
        assert_eq!(tag.abi, "abi3");
        assert_eq!(tag.platform, "manylinux_2_17_x86_64");
        assert_eq!(tag.to_string(), "cp311-abi3-manylinux_2_17_x86_64");
    }

    #[test]
    fn test_malformed_tags_rejected() {
        assert!("py3-none".parse::<WheelTag>().is_err());
        assert!("py3-none-any-extra".parse::<WheelTag>().is_err());
        let err = "py3".parse::<WheelTag>().unwrap_err();
        assert_eq!(
            err.to_string(),
            "'py3' is not an interpreter-abi-platform tag triple"
        );
    }

    #[test]
    fn test_index_of_prefers_earlier_tags() {
        let tags = tags(&[
            "cp311-cp311-linux_x86_64",
            "cp311-abi3-linux_x86_64",
            "py3-none-any",
        ]);
        assert_eq!(tags.index_of(&"py3-none-any".parse().unwrap()), Some(2));
        assert_eq!(
            tags.index_of(&"cp311-cp311-linux_x86_64".parse().unwrap()),
            Some(0)
        );
        assert_eq!(tags.index_of(&"py2-none-any".parse().unwrap()), None);
        assert!(tags.is_compatible(&"cp311-abi3-linux_x86_64".parse().unwrap()));
    }

    #[test]
    fn test_noarch_projection() {
        let tags = tags(&[
            "cp311-cp311-linux_x86_64",
            "py3-none-any",
            "py31-none-any",
            "cp311-none-linux_x86_64",
        ]);
        let noarch: Vec<_> = tags.noarch().tags().map(ToString::to_string).collect();
        assert_eq!(noarch, vec!["py3-none-any", "py31-none-any"]);
    }
}

use crate::tags::{WheelTag, WheelTags};
use miette::Diagnostic;
use regex::Regex;
use serde_with::{DeserializeFromStr, SerializeDisplay};
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use std::sync::OnceLock;
use thiserror::Error;

/// The filename extension of a wheel.
pub const WHEEL_EXT: &str = ".whl";

/// The information encoded in a wheel filename, following the
/// [File Name Convention](https://www.python.org/dev/peps/pep-0427/#file-name-convention):
/// `{distribution}-{version}(-{build tag})?-{python tag}-{abi tag}-{platform tag}.whl`.
///
/// Underscores in the distribution and version are replaced with dashes so
/// that the parsed fields compare cleanly against project names and version
/// strings found elsewhere.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Debug, SerializeDisplay, DeserializeFromStr)]
pub struct WheelFilename {
    /// Distribution name, e.g. ‘django’, ‘pyramid’.
    pub distribution: String,

    /// Distribution version, e.g. 1.0.
    pub version: String,

    /// Optional build number, acts as a tie-breaker between otherwise equal
    /// wheels.
    pub build_tag: Option<String>,

    /// Language implementation and version tags, e.g. ‘py2’, ‘py3’, ‘cp311’.
    pub py_tags: Vec<String>,

    /// ABI specific tags, e.g. ‘cp33m’, ‘abi3’, ‘none’.
    pub abi_tags: Vec<String>,

    /// Architecture specific tags, e.g. ‘linux_x86_64’, ‘any’.
    pub arch_tags: Vec<String>,
}

/// The error returned when a `.whl` filename does not follow the wheel naming
/// convention.
#[derive(Debug, Clone, Error, Diagnostic)]
#[error("'{0}' is not a valid wheel filename")]
pub struct InvalidWheelFilename(pub String);

impl FromStr for WheelFilename {
    type Err = InvalidWheelFilename;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_filename(s)
    }
}

impl WheelFilename {
    /// Parses a wheel filename, e.g. `trio-0.18.0-py3-none-any.whl`.
    ///
    /// Unlike sdist names, wheel names can be parsed without knowing the
    /// project being searched for: the three trailing tag groups are dash
    /// free, which anchors the split.
    pub fn from_filename(filename: &str) -> Result<Self, InvalidWheelFilename> {
        static WHEEL_FILE_RE: OnceLock<Regex> = OnceLock::new();
        let wheel_file_re = WHEEL_FILE_RE.get_or_init(|| {
            Regex::new(
                r"^(?P<name>.+?)-(?P<ver>\d.*?)(-(?P<build>\d.*?))?-(?P<pyver>.+?)-(?P<abi>.+?)-(?P<plat>.+?)\.whl$",
            )
            .unwrap()
        });

        let captures = wheel_file_re
            .captures(filename)
            .ok_or_else(|| InvalidWheelFilename(filename.to_owned()))?;

        let tag_list = |group: &str| {
            captures[group]
                .split('.')
                .map(ToOwned::to_owned)
                .collect::<Vec<_>>()
        };

        Ok(Self {
            distribution: captures["name"].replace('_', "-"),
            version: captures["ver"].replace('_', "-"),
            build_tag: captures.name("build").map(|m| m.as_str().to_owned()),
            py_tags: tag_list("pyver"),
            abi_tags: tag_list("abi"),
            arch_tags: tag_list("plat"),
        })
    }

    /// Returns an iterator over every (python, abi, platform) tag triple this
    /// wheel declares. The iterator may yield duplicates.
    pub fn all_tags_iter(&self) -> impl Iterator<Item = WheelTag> + '_ {
        itertools::iproduct!(&self.py_tags, &self.abi_tags, &self.arch_tags).map(
            |(py, abi, arch)| WheelTag {
                interpreter: py.clone(),
                abi: abi.clone(),
                platform: arch.clone(),
            },
        )
    }

    /// Returns true if at least one of this wheel's tag triples appears in
    /// `tags`.
    pub fn supported(&self, tags: &WheelTags) -> bool {
        self.all_tags_iter().any(|tag| tags.is_compatible(&tag))
    }

    /// Returns the smallest preference index in `tags` matched by any of this
    /// wheel's tag triples. A smaller index means a better platform fit.
    /// `None` means the wheel is not supported at all.
    pub fn support_index_min(&self, tags: &WheelTags) -> Option<usize> {
        self.all_tags_iter()
            .filter_map(|tag| tags.index_of(&tag))
            .min()
    }
}

impl Display for WheelFilename {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.distribution, self.version)?;
        if let Some(build) = &self.build_tag {
            write!(f, "-{build}")?;
        }
        write!(
            f,
            "-{}-{}-{}.whl",
            self.py_tags.join("."),
            self.abi_tags.join("."),
            self.arch_tags.join(".")
        )
    }
}

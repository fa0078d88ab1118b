use crate::types::Link;
use pep440_rs::Version;
use std::fmt::{Display, Formatter};

/// Where a [`FoundVersion`] can be obtained. The `Installed` variant is the
/// sentinel for "this candidate is the version that is already installed";
/// it carries no URL and only ever equals itself.
#[derive(Debug, Clone)]
pub enum FoundLink {
    /// The candidate is already present in the target environment.
    Installed,

    /// A downloadable wheel, with the preference rank of the best supported
    /// tag it matched (0 is the strongest preference). Recorded when the
    /// filter accepts the wheel, so ranking never has to re-derive it.
    Wheel {
        /// The link to the wheel file.
        link: Link,
        /// The index into the supported-tags list of the wheel's best tag.
        support_rank: usize,
    },

    /// A downloadable source archive (or an egg-fragment reference).
    Archive {
        /// The link to the archive.
        link: Link,
    },
}

impl FoundLink {
    /// The underlying link, unless this is the installed sentinel.
    pub fn link(&self) -> Option<&Link> {
        match self {
            FoundLink::Installed => None,
            FoundLink::Wheel { link, .. } => Some(link),
            FoundLink::Archive { link } => Some(link),
        }
    }
}

impl Display for FoundLink {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            FoundLink::Installed => write!(f, "<installed>"),
            FoundLink::Wheel { link, .. } => write!(f, "{link}"),
            FoundLink::Archive { link } => write!(f, "{link}"),
        }
    }
}

/// One version of a project, found at a particular place.
#[derive(Debug, Clone)]
pub struct FoundVersion {
    version: String,
    parsed: Version,
    link: FoundLink,
}

impl FoundVersion {
    pub(crate) fn new(version: String, parsed: Version, link: FoundLink) -> Self {
        FoundVersion {
            version,
            parsed,
            link,
        }
    }

    /// Creates the candidate representing an already-installed version.
    pub fn installed(version: Version) -> Self {
        FoundVersion {
            version: version.to_string(),
            parsed: version,
            link: FoundLink::Installed,
        }
    }

    /// The version string as it appeared in the artifact name.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// The version, parsed to a totally ordered value.
    pub fn parsed_version(&self) -> &Version {
        &self.parsed
    }

    /// Where this candidate can be obtained.
    pub fn found_link(&self) -> &FoundLink {
        &self.link
    }

    /// The link to download this candidate, unless it is already installed.
    pub fn link(&self) -> Option<&Link> {
        self.link.link()
    }

    /// Consumes the candidate, returning its link unless it is the installed
    /// sentinel.
    pub fn into_link(self) -> Option<Link> {
        match self.link {
            FoundLink::Installed => None,
            FoundLink::Wheel { link, .. } => Some(link),
            FoundLink::Archive { link } => Some(link),
        }
    }

    /// True iff this candidate is the installed sentinel.
    pub fn currently_installed(&self) -> bool {
        matches!(self.link, FoundLink::Installed)
    }

    /// True iff the version is a pre-release or development version.
    pub fn prerelease(&self) -> bool {
        self.parsed.any_prerelease()
    }

    fn sort_priority(&self, use_wheel: bool, supported_tag_count: usize) -> i64 {
        if !use_wheel {
            return 0;
        }
        match &self.link {
            FoundLink::Installed => 1,
            FoundLink::Wheel { support_rank, .. } => -(*support_rank as i64),
            FoundLink::Archive { .. } => -(supported_tag_count as i64),
        }
    }

    /// Sorts candidates so that the most preferred comes first: newest
    /// version, and within a version an existing install beats wheels, a
    /// better-ranked wheel beats a worse one, and every wheel beats a source
    /// archive. When wheel support is disabled only the version counts. The
    /// sort is stable: candidates with equal keys keep their input order.
    pub fn sort(
        mut versions: Vec<FoundVersion>,
        use_wheel: bool,
        supported_tag_count: usize,
    ) -> Vec<FoundVersion> {
        versions.sort_by(|a, b| {
            b.parsed
                .cmp(&a.parsed)
                .then_with(|| {
                    b.sort_priority(use_wheel, supported_tag_count)
                        .cmp(&a.sort_priority(use_wheel, supported_tag_count))
                })
        });
        versions
    }
}

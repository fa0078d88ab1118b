//! `pypi_finder` answers one question: given a requirement on a single Python
//! project and a set of places to look (index base URLs, find-links locations,
//! local files and directories, dependency links), which downloadable artifact
//! should an installer pick?
//!
//! The crate walks HTML index pages and local listings, parses sdist/egg and
//! wheel filenames, filters candidates by name, archive format, platform
//! compatibility, trust and pre-release policy, and ranks the survivors so
//! that the best candidate comes out on top. It deliberately does not
//! download, build, install or resolve dependency graphs; transports and
//! installed-environment introspection are collaborators behind small
//! interfaces.

#![deny(missing_docs)]

pub mod index;
pub mod tags;
pub mod types;

pub use index::{
    find_packages_latest_versions, FetchError, FindRequirementError, FoundLink, FoundVersion,
    HtmlPage, HtmlSession, LatestVersion, PackageFinder, PackageFinderBuilder, SessionResponse,
};
pub use types::{
    InstalledDistribution, InvalidWheelFilename, Link, LinkOrigin, NormalizedPackageName,
    PackageName, PageOrigin, ParsePackageNameError, Requirement, WheelFilename,
};

pub use pep440_rs::{Version, VersionSpecifier, VersionSpecifiers};

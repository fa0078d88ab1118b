use super::{Link, PackageName, ParsePackageNameError};
use miette::Diagnostic;
use pep440_rs::{Operator, Version, VersionSpecifiers};
use regex::Regex;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::OnceLock;
use thiserror::Error;
use url::Url;

/// A record of an installed distribution, as reported by whatever introspects
/// the target environment. The finder only ever reads these.
#[derive(Debug, Clone)]
pub struct InstalledDistribution {
    /// The name of the distribution.
    pub name: PackageName,

    /// The installed version.
    pub version: Version,

    /// Where the distribution is installed, when known.
    pub location: Option<PathBuf>,

    /// The `dependency_links.txt` entries of the distribution's metadata,
    /// already read out by the environment collaborator.
    pub dependency_links: Vec<String>,
}

impl InstalledDistribution {
    /// Creates a record from the two mandatory fields.
    pub fn new(name: PackageName, version: Version) -> Self {
        Self {
            name,
            version,
            location: None,
            dependency_links: Vec::new(),
        }
    }
}

/// An abstract install requirement: one project plus an optional version
/// range, together with the search policy that is scoped to this requirement
/// rather than to the whole finder.
#[derive(Debug, Clone)]
pub struct Requirement {
    name: PackageName,
    specifiers: VersionSpecifiers,
    prereleases: bool,
    satisfied_by: Option<InstalledDistribution>,
}

/// Errors building a [`Requirement`].
#[derive(Debug, Error, Diagnostic)]
pub enum RequirementError {
    /// The project name is not a valid package name.
    #[error(transparent)]
    InvalidName(#[from] ParsePackageNameError),

    /// The requirement string could not be parsed.
    #[error("{0}")]
    InvalidRequirement(String),

    /// The requirement pins a direct URL; there is no version range to
    /// search for.
    #[error("direct URL requirements have no versions to discover")]
    UrlRequirement,
}

impl Requirement {
    /// Creates a requirement on any version of `name`.
    pub fn new(name: PackageName) -> Self {
        Self {
            name,
            specifiers: VersionSpecifiers::from_iter([]),
            prereleases: false,
            satisfied_by: None,
        }
    }

    /// Restricts the requirement to versions matching `specifiers`.
    pub fn with_specifiers(mut self, specifiers: VersionSpecifiers) -> Self {
        self.specifiers = specifiers;
        self
    }

    /// Allows pre-release versions for this requirement specifically.
    pub fn with_prereleases(mut self, prereleases: bool) -> Self {
        self.prereleases = prereleases;
        self
    }

    /// Records the version of this project that is already installed.
    pub fn with_satisfied_by(mut self, satisfied_by: InstalledDistribution) -> Self {
        self.satisfied_by = Some(satisfied_by);
        self
    }

    /// The name of the required project.
    pub fn name(&self) -> &PackageName {
        &self.name
    }

    /// The spelling of the name used to build index page URLs: the name as
    /// the user first wrote it.
    pub fn url_name(&self) -> &str {
        self.name.as_source_str()
    }

    /// The version range, possibly empty.
    pub fn specifiers(&self) -> &VersionSpecifiers {
        &self.specifiers
    }

    /// Whether pre-releases are acceptable for this requirement.
    pub fn prereleases(&self) -> bool {
        self.prereleases
    }

    /// The already-installed version, if any.
    pub fn satisfied_by(&self) -> Option<&InstalledDistribution> {
        self.satisfied_by.as_ref()
    }

    /// True when `version` is within the requirement's range. An empty range
    /// admits everything.
    pub fn satisfies(&self, version: &Version) -> bool {
        self.specifiers.contains(version)
    }

    /// The versions this requirement pins exactly (`==`, non-wildcard). Used
    /// to try `<index>/<name>/<version>` pages directly.
    pub fn absolute_versions(&self) -> Vec<String> {
        self.specifiers
            .iter()
            .filter(|spec| *spec.operator() == Operator::Equal)
            .map(|spec| spec.version().to_string())
            .collect()
    }
}

impl Display for Requirement {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name.as_source_str())?;
        if !self.specifiers.is_empty() {
            write!(f, "{}", self.specifiers)?;
        }
        Ok(())
    }
}

impl TryFrom<pep508_rs::Requirement> for Requirement {
    type Error = RequirementError;

    fn try_from(req: pep508_rs::Requirement) -> Result<Self, Self::Error> {
        let name = PackageName::from_str(&req.name)?;
        let specifiers = match req.version_or_url {
            None => VersionSpecifiers::from_iter([]),
            Some(pep508_rs::VersionOrUrl::VersionSpecifier(specifiers)) => specifiers,
            Some(pep508_rs::VersionOrUrl::Url(_)) => return Err(RequirementError::UrlRequirement),
        };
        Ok(Requirement::new(name).with_specifiers(specifiers))
    }
}

impl FromStr for Requirement {
    type Err = RequirementError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let req = pep508_rs::Requirement::from_str(s)
            .map_err(|e| RequirementError::InvalidRequirement(e.to_string()))?;
        req.try_into()
    }
}

/// Derives a requirement string from a URL, looking at the `#egg=` fragment
/// first and the filename second: `Foo-1.2` becomes `Foo==1.2`, a bare name
/// stays as it is.
pub fn requirement_from_url(url: &Url) -> Option<String> {
    let link = Link::new(url.clone());
    let egg_info = match link.egg_fragment() {
        Some(egg) => egg.to_owned(),
        None => {
            let stem = link
                .splitext()
                .map(|(stem, _)| stem)
                .unwrap_or_else(|| link.filename());
            stem.strip_suffix(".tar").unwrap_or(stem).to_owned()
        }
    };
    if egg_info.is_empty() {
        return None;
    }

    static NAME_VERSION_RE: OnceLock<Regex> = OnceLock::new();
    let name_version_re =
        NAME_VERSION_RE.get_or_init(|| Regex::new(r"^(.*?)-(dev|\d.*)$").unwrap());
    match name_version_re.captures(&egg_info) {
        Some(captures) => Some(format!("{}=={}", &captures[1], &captures[2])),
        None => Some(egg_info),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_requirement_from_str() {
        let req: Requirement = "Foo ==1.0".parse().unwrap();
        assert_eq!(req.name().as_str(), "foo");
        assert_eq!(req.url_name(), "Foo");
        assert!(req.satisfies(&"1.0".parse().unwrap()));
        assert!(!req.satisfies(&"1.1".parse().unwrap()));
        assert_eq!(req.absolute_versions(), vec!["1.0"]);
    }

    #[test]
    fn test_empty_specifiers_admit_everything() {
        let req = Requirement::new("foo".parse().unwrap());
        assert!(req.satisfies(&"0.0.1".parse().unwrap()));
        assert!(req.satisfies(&"2.0a1".parse().unwrap()));
        assert!(req.absolute_versions().is_empty());
    }

    #[test]
    fn test_ranges_are_not_absolute() {
        let req: Requirement = "foo >=1.0, <2.0".parse().unwrap();
        assert!(req.absolute_versions().is_empty());
        assert!(req.satisfies(&"1.5".parse().unwrap()));
        assert!(!req.satisfies(&"2.0".parse().unwrap()));
    }

    #[test]
    fn test_requirement_from_url() {
        let url = |s: &str| Url::parse(s).unwrap();
        assert_eq!(
            requirement_from_url(&url("https://example.com/repo.zip#egg=Foo-1.2")).as_deref(),
            Some("Foo==1.2")
        );
        assert_eq!(
            requirement_from_url(&url("https://example.com/Foo-1.2.tar.gz")).as_deref(),
            Some("Foo==1.2")
        );
        assert_eq!(
            requirement_from_url(&url("https://example.com/repo.zip#egg=foo")).as_deref(),
            Some("foo")
        );
    }
}

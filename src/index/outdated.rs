//! Latest-version scanning over an installed environment: for each installed
//! distribution, ask the finder what the newest applicable version is.

use super::finder::{FindRequirementError, PackageFinder};
use super::found::FoundVersion;
use crate::types::{InstalledDistribution, Requirement};

/// The newest discoverable version of one installed distribution.
#[derive(Debug, Clone)]
pub struct LatestVersion {
    /// The installed distribution that was searched for.
    pub distribution: InstalledDistribution,

    /// The newest applicable candidate. When the installed version is
    /// already the best one this is the installed sentinel.
    pub latest: FoundVersion,
}

impl LatestVersion {
    /// True when something newer than the installed version is available.
    pub fn is_outdated(&self) -> bool {
        self.latest.parsed_version() > &self.distribution.version
    }

    /// True when the installed version is the newest available one.
    pub fn is_up_to_date(&self) -> bool {
        self.latest.parsed_version() == &self.distribution.version
    }
}

/// Determines the latest available version of every installed distribution.
///
/// Dependency links advertised in the installed metadata are fed to the
/// finder first (they only matter if the finder was configured to process
/// them). Distributions that cannot be found at all are silently skipped:
/// not being published on the configured indexes is normal for local or
/// private packages.
pub async fn find_packages_latest_versions(
    finder: &mut PackageFinder,
    installed: &[InstalledDistribution],
) -> Vec<LatestVersion> {
    let dependency_links: Vec<String> = installed
        .iter()
        .flat_map(|dist| dist.dependency_links.iter().cloned())
        .collect();
    finder.add_dependency_links(dependency_links);

    let mut results = Vec::new();
    for dist in installed {
        let req = Requirement::new(dist.name.clone()).with_satisfied_by(dist.clone());
        match finder.find_requirement(&req, true).await {
            Ok(Some(link)) => {
                if let Some(found) = finder.link_package_version(&req, &link) {
                    results.push(LatestVersion {
                        distribution: dist.clone(),
                        latest: found,
                    });
                }
            }
            Ok(None) => {}
            Err(FindRequirementError::BestVersionAlreadyInstalled { .. }) => {
                results.push(LatestVersion {
                    distribution: dist.clone(),
                    latest: FoundVersion::installed(dist.version.clone()),
                });
            }
            Err(_) => {}
        }
    }
    results
}

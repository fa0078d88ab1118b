//! The package finder: enumerates search locations, merges the candidate
//! pools and selects the best artifact for a requirement.

use super::filter::{package_versions, FilterConfig, SearchState};
use super::found::FoundVersion;
use super::html::HtmlPage;
use super::locations::{location_to_url, sort_locations, url_to_path, warn_insecure_transport};
use super::pages::fetch_page;
use super::session::HtmlSession;
use crate::tags::WheelTags;
use crate::types::{normalize_name, Link, NormalizedPackageName, PackageName, Requirement};
use miette::Diagnostic;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use thiserror::Error;
use url::Url;

/// The errors that can end a [`PackageFinder::find_requirement`] call. Fetch
/// problems never surface here; they only ever shrink the candidate set.
#[derive(Debug, Error, Diagnostic)]
pub enum FindRequirementError {
    /// Discovery produced no candidates at all.
    #[error("no distributions at all found for {requirement}")]
    NoDistributionsFound {
        /// The requirement that was searched for.
        requirement: String,
    },

    /// Candidates were found, but none matches the requirement's version
    /// range and pre-release policy.
    #[error("no distributions matching the version for {requirement}")]
    NoMatchingDistribution {
        /// The requirement that was searched for.
        requirement: String,
        /// Every version that was observed during discovery.
        versions: Vec<String>,
    },

    /// Selection succeeded, and the winner is the version that is already
    /// installed.
    #[error("best version of {requirement} is already installed")]
    BestVersionAlreadyInstalled {
        /// The requirement that was searched for.
        requirement: String,
    },
}

/// Builder for a [`PackageFinder`]; see [`PackageFinder::builder`].
pub struct PackageFinderBuilder {
    session: Arc<dyn HtmlSession>,
    find_links: Vec<String>,
    index_urls: Vec<Url>,
    use_wheel: bool,
    allow_external: HashSet<NormalizedPackageName>,
    allow_unverified: HashSet<NormalizedPackageName>,
    allow_all_external: bool,
    allow_all_prereleases: bool,
    process_dependency_links: bool,
    supported_tags: WheelTags,
    platform: String,
    python_version: String,
}

impl PackageFinderBuilder {
    /// Starts building a finder that fetches pages through `session`.
    pub fn new(session: Arc<dyn HtmlSession>) -> Self {
        Self {
            session,
            find_links: Vec::new(),
            index_urls: Vec::new(),
            use_wheel: true,
            allow_external: HashSet::new(),
            allow_unverified: HashSet::new(),
            allow_all_external: false,
            allow_all_prereleases: false,
            process_dependency_links: false,
            supported_tags: WheelTags::default(),
            platform: String::new(),
            python_version: String::new(),
        }
    }

    /// Locations to scan directly for archives: URLs, local archive paths or
    /// local directories. Everything listed here is trusted.
    pub fn with_find_links(mut self, find_links: impl IntoIterator<Item = String>) -> Self {
        self.find_links.extend(find_links);
        self
    }

    /// Index base URLs to search, in order. The first one is the main index.
    /// Leave empty to disable index lookup entirely.
    pub fn with_index_urls(mut self, index_urls: impl IntoIterator<Item = Url>) -> Self {
        self.index_urls.extend(index_urls);
        self
    }

    /// Whether wheels are acceptable at all. Defaults to true.
    pub fn with_use_wheel(mut self, use_wheel: bool) -> Self {
        self.use_wheel = use_wheel;
        self
    }

    /// Projects whose externally hosted (but still verifiable) files are
    /// acceptable.
    pub fn with_allow_external(mut self, names: impl IntoIterator<Item = PackageName>) -> Self {
        self.allow_external
            .extend(names.into_iter().map(NormalizedPackageName::from));
        self
    }

    /// Projects whose unverifiable files are acceptable.
    pub fn with_allow_unverified(mut self, names: impl IntoIterator<Item = PackageName>) -> Self {
        self.allow_unverified
            .extend(names.into_iter().map(NormalizedPackageName::from));
        self
    }

    /// Accept externally hosted files for every project.
    pub fn with_allow_all_external(mut self, allow: bool) -> Self {
        self.allow_all_external = allow;
        self
    }

    /// Accept pre-release versions for every requirement.
    pub fn with_allow_all_prereleases(mut self, allow: bool) -> Self {
        self.allow_all_prereleases = allow;
        self
    }

    /// Whether [`PackageFinder::add_dependency_links`] has any effect.
    pub fn with_process_dependency_links(mut self, process: bool) -> Self {
        self.process_dependency_links = process;
        self
    }

    /// The ordered preference list of tags the target interpreter supports.
    /// Without it no wheel is ever compatible.
    pub fn with_supported_tags(mut self, tags: WheelTags) -> Self {
        self.supported_tags = tags;
        self
    }

    /// The target platform string (e.g. `linux_x86_64`, `win32`,
    /// `macosx_10_9_x86_64`), as used by the index-hosted binary wheel
    /// policy.
    pub fn with_platform(mut self, platform: impl Into<String>) -> Self {
        self.platform = platform.into();
        self
    }

    /// The interpreter version string that `-pyX.Y` artifact suffixes are
    /// compared against: the first `major.minor` digits of the interpreter
    /// version, e.g. `"2.7"` or `"3.1"`.
    pub fn with_python_version(mut self, python_version: impl Into<String>) -> Self {
        self.python_version = python_version.into();
        self
    }

    /// Finalizes the configuration.
    pub fn build(self) -> PackageFinder {
        // Anything that is allowed unverified is also allowed external.
        let mut allow_external = self.allow_external;
        allow_external.extend(self.allow_unverified.iter().cloned());
        let supported_tags_noarch = self.supported_tags.noarch();
        PackageFinder {
            session: self.session,
            find_links: self.find_links,
            index_urls: self.index_urls,
            dependency_links: Vec::new(),
            use_wheel: self.use_wheel,
            allow_external,
            allow_unverified: self.allow_unverified,
            allow_all_external: self.allow_all_external,
            allow_all_prereleases: self.allow_all_prereleases,
            process_dependency_links: self.process_dependency_links,
            supported_tags: self.supported_tags,
            supported_tags_noarch,
            platform: self.platform,
            python_version: self.python_version,
        }
    }
}

/// This finds packages.
///
/// A finder is configured once per command invocation, used for any number of
/// sequential [`find_requirement`](Self::find_requirement) calls, and
/// discarded. It is not thread-safe: the bookkeeping of a running search is
/// scoped to the call, but `add_dependency_links` mutates the finder itself.
pub struct PackageFinder {
    session: Arc<dyn HtmlSession>,
    find_links: Vec<String>,
    index_urls: Vec<Url>,
    dependency_links: Vec<String>,
    use_wheel: bool,
    allow_external: HashSet<NormalizedPackageName>,
    allow_unverified: HashSet<NormalizedPackageName>,
    allow_all_external: bool,
    allow_all_prereleases: bool,
    process_dependency_links: bool,
    supported_tags: WheelTags,
    supported_tags_noarch: WheelTags,
    platform: String,
    python_version: String,
}

/// Joins an index base URL and a project name into the project's index page
/// URL. The path always ends in a trailing slash: not every index can handle
/// the bare form.
fn mkurl_pypi_url(index_url: &Url, url_name: &str) -> Option<Url> {
    let mut loc = index_url.as_str().trim_end_matches('/').to_owned();
    loc.push('/');
    loc.push_str(url_name);
    if !loc.ends_with('/') {
        loc.push('/');
    }
    Url::parse(&loc).ok()
}

impl PackageFinder {
    /// Starts building a finder that fetches pages through `session`.
    pub fn builder(session: Arc<dyn HtmlSession>) -> PackageFinderBuilder {
        PackageFinderBuilder::new(session)
    }

    /// Registers dependency links advertised by already-installed project
    /// metadata. Without `process_dependency_links` in the configuration this
    /// does nothing.
    pub fn add_dependency_links(&mut self, links: impl IntoIterator<Item = String>) {
        if self.process_dependency_links {
            tracing::warn!(
                "Dependency links processing has been deprecated and will be removed in a \
                 future release."
            );
            self.dependency_links.extend(links);
        }
    }

    fn filter_config(&self) -> FilterConfig<'_> {
        FilterConfig {
            use_wheel: self.use_wheel,
            allow_external: &self.allow_external,
            allow_unverified: &self.allow_unverified,
            allow_all_external: self.allow_all_external,
            supported_tags: &self.supported_tags,
            supported_tags_noarch: &self.supported_tags_noarch,
            platform: &self.platform,
            python_version: &self.python_version,
        }
    }

    /// Runs the filter over a single link, as used to recover the version of
    /// an already selected link.
    pub fn link_package_version(&self, req: &Requirement, link: &Link) -> Option<FoundVersion> {
        let mut state = SearchState::new();
        super::filter::link_package_versions(
            link,
            &req.url_name().to_lowercase(),
            &self.filter_config(),
            &mut state,
        )
    }

    /// Finds the best candidate for `req`.
    ///
    /// Returns the link to download, or `None` when `upgrade` is false and
    /// the installed version already satisfies the requirement. Fails with
    /// [`FindRequirementError::BestVersionAlreadyInstalled`] when an upgrade
    /// was requested but the installed version is already the best one, and
    /// with the two not-found errors when discovery comes up empty.
    pub async fn find_requirement(
        &self,
        req: &Requirement,
        upgrade: bool,
    ) -> Result<Option<Link>, FindRequirementError> {
        let mut state = SearchState::new();
        let search_name = req.url_name().to_lowercase();

        // Only check the main index if an index URL is given, and correct a
        // missing page through case-insensitive rediscovery of the name.
        let mut url_name = req.url_name().to_owned();
        let mut main_index_url = None;
        if let Some(main_index) = self.index_urls.first() {
            let main_link = mkurl_pypi_url(main_index, &url_name).map(Link::trusted);
            if let Some(main_link) = main_link {
                if fetch_page(&*self.session, &main_link, req).await.is_none() {
                    if let Some(real_name) = self
                        .find_url_name(&Link::trusted(main_index.clone()), &url_name, req)
                        .await
                    {
                        url_name = real_name;
                    }
                }
                main_index_url = Some(main_link);
            }
        }

        let mut locations: Vec<String> = self
            .index_urls
            .iter()
            .filter_map(|index_url| mkurl_pypi_url(index_url, &url_name))
            .map(String::from)
            .collect();
        locations.extend(self.find_links.iter().cloned());
        for version in req.absolute_versions() {
            if let Some(main) = &main_index_url {
                if let Ok(absolute) = main.url().join(&version) {
                    locations.insert(0, absolute.into());
                }
            }
        }

        let (mut file_locations, url_locations) = sort_locations(&locations, &self.find_links);
        let (dependency_files, dependency_urls) =
            sort_locations(&self.dependency_links, &self.find_links);
        file_locations.extend(dependency_files);

        // Every URL the user handed us, whether an index or a find-links
        // entry, is trusted; dependency links explicitly are not.
        let mut page_locations: Vec<Link> =
            url_locations.into_iter().map(Link::trusted).collect();
        page_locations.extend(dependency_urls.into_iter().map(Link::new));

        tracing::debug!("URLs to search for versions for {req}:");
        for location in &page_locations {
            tracing::debug!("* {location}");
            warn_insecure_transport(location.url(), &mut state.warned_insecure);
        }

        let config = self.filter_config();

        let find_links_links: Vec<Link> = self
            .find_links
            .iter()
            .filter_map(|location| location_to_url(location))
            .map(Link::from_find_links)
            .collect();
        let found_versions =
            package_versions(&find_links_links, &search_name, &config, &mut state);

        let mut page_versions = Vec::new();
        let pages = self.get_pages(page_locations, req, &mut state).await;
        for page in pages {
            tracing::debug!("Analyzing links from page {}", page.url());
            page_versions.extend(package_versions(
                &page.links(),
                &search_name,
                &config,
                &mut state,
            ));
        }

        let dependency_link_links: Vec<Link> = self
            .dependency_links
            .iter()
            .filter_map(|location| location_to_url(location))
            .map(Link::new)
            .collect();
        let dependency_versions =
            package_versions(&dependency_link_links, &search_name, &config, &mut state);
        if !dependency_versions.is_empty() {
            tracing::debug!(
                "dependency links found: {}",
                dependency_versions
                    .iter()
                    .filter_map(|found| found.link())
                    .map(|link| link.url().as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            );
        }

        let file_links: Vec<Link> = file_locations.into_iter().map(Link::new).collect();
        let file_versions = package_versions(&file_links, &search_name, &config, &mut state);

        if found_versions.is_empty()
            && page_versions.is_empty()
            && dependency_versions.is_empty()
            && file_versions.is_empty()
        {
            tracing::error!("Could not find any downloads that satisfy the requirement {req}");
            self.warn_about_ignored_files(req, &state);
            return Err(FindRequirementError::NoDistributionsFound {
                requirement: req.to_string(),
            });
        }

        let installed_version: Vec<FoundVersion> = req
            .satisfied_by()
            .map(|dist| FoundVersion::installed(dist.version.clone()))
            .into_iter()
            .collect();

        let file_versions =
            FoundVersion::sort(file_versions, self.use_wheel, self.supported_tags.len());
        if !file_versions.is_empty() {
            tracing::debug!(
                "Local files found: {}",
                file_versions
                    .iter()
                    .filter_map(|found| found.link())
                    .filter_map(|link| url_to_path(link.url()))
                    .map(|path| path.display().to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            );
        }

        // The pool order is observable: it breaks ties between candidates
        // the composite sort considers equal.
        let all_versions: Vec<FoundVersion> = installed_version
            .into_iter()
            .chain(file_versions)
            .chain(found_versions)
            .chain(page_versions)
            .chain(dependency_versions)
            .collect();

        let all_version_strings: Vec<String> = all_versions
            .iter()
            .map(|found| found.version().to_owned())
            .collect();

        let mut applicable_versions = Vec::new();
        for found in all_versions {
            if !req.satisfies(found.parsed_version()) {
                tracing::debug!(
                    "Ignoring link {}, version {} doesn't match {}",
                    found.found_link(),
                    found.version(),
                    req.specifiers(),
                );
                continue;
            }
            if found.prerelease()
                && !(self.allow_all_prereleases || req.prereleases())
                && !found.currently_installed()
            {
                // Unless it is the already installed one, a pre-release only
                // counts when pre-releases were asked for.
                tracing::debug!(
                    "Ignoring link {}, version {} is a pre-release",
                    found.found_link(),
                    found.version(),
                );
                continue;
            }
            applicable_versions.push(found);
        }
        let applicable_versions = FoundVersion::sort(
            applicable_versions,
            self.use_wheel,
            self.supported_tags.len(),
        );

        let existing_applicable = applicable_versions
            .iter()
            .any(FoundVersion::currently_installed);

        let Some(best) = applicable_versions.first() else {
            tracing::error!(
                "Could not find a version that satisfies the requirement {req} (from versions: \
                 {})",
                sorted_unique(&all_version_strings).join(", ")
            );
            self.warn_about_ignored_files(req, &state);
            return Err(FindRequirementError::NoMatchingDistribution {
                requirement: req.to_string(),
                versions: sorted_unique(&all_version_strings),
            });
        };

        if !upgrade && existing_applicable {
            if best.currently_installed() {
                tracing::debug!(
                    "Existing installed version ({}) is most up-to-date and satisfies requirement",
                    installed_version_display(req),
                );
            } else {
                tracing::debug!(
                    "Existing installed version ({}) satisfies requirement (most up-to-date \
                     version is {})",
                    installed_version_display(req),
                    best.version(),
                );
            }
            return Ok(None);
        }

        if best.currently_installed() {
            // We have an existing version, and it is the best version.
            tracing::debug!(
                "Installed version ({}) is most up-to-date (past versions: {})",
                installed_version_display(req),
                past_versions_display(&applicable_versions),
            );
            return Err(FindRequirementError::BestVersionAlreadyInstalled {
                requirement: req.to_string(),
            });
        }

        if applicable_versions.len() > 1 {
            tracing::debug!(
                "Using version {} (newest of versions: {})",
                best.version(),
                applicable_versions
                    .iter()
                    .map(FoundVersion::version)
                    .collect::<Vec<_>>()
                    .join(", ")
            );
        }

        let mut applicable_versions = applicable_versions;
        match applicable_versions.swap_remove(0).into_link() {
            Some(selected) => {
                if selected.verifiable() == Some(false) {
                    tracing::warn!(
                        "{} is potentially insecure and unverifiable.",
                        req.name().as_source_str()
                    );
                }
                if selected.is_deprecated_regex() {
                    tracing::warn!(
                        "{} discovered using a deprecated method of parsing; in the future it \
                         will no longer be discovered.",
                        req.name().as_source_str()
                    );
                }
                Ok(Some(selected))
            }
            None => Err(FindRequirementError::BestVersionAlreadyInstalled {
                requirement: req.to_string(),
            }),
        }
    }

    /// Finds the true URL name of a project when the given name isn't quite
    /// right, by matching it case-insensitively against the anchors of the
    /// root index page.
    async fn find_url_name(
        &self,
        index_url: &Link,
        url_name: &str,
        req: &Requirement,
    ) -> Option<String> {
        // Vaguely part of the index API: the root listing wants a trailing
        // slash. Links are immutable, so build a fixed one instead.
        let index_link = if index_url.url().path().ends_with('/') {
            index_url.clone()
        } else {
            Link::trusted(Url::parse(&format!("{}/", index_url.url())).ok()?)
        };

        let Some(page) = fetch_page(&*self.session, &index_link, req).await else {
            tracing::error!("Cannot fetch index base URL {index_link}");
            return None;
        };

        let norm_name = normalize_name(url_name);
        for link in page.links() {
            let base = link
                .path()
                .trim_end_matches('/')
                .rsplit('/')
                .next()
                .unwrap_or("");
            if normalize_name(base) == norm_name {
                tracing::debug!("Real name of requirement {url_name} is {base}");
                return Some(base.to_owned());
            }
        }
        None
    }

    /// Walks the given locations in order, fetching each page at most once
    /// and queueing the homepage/download relations of every fetched page,
    /// subject to the external/trust admission rules.
    async fn get_pages(
        &self,
        locations: Vec<Link>,
        req: &Requirement,
        state: &mut SearchState,
    ) -> Vec<HtmlPage> {
        let mut pending: VecDeque<Link> = locations.into();
        let mut seen: HashSet<Url> = HashSet::new();
        let mut pages = Vec::new();

        while let Some(location) = pending.pop_front() {
            if !seen.insert(location.url().clone()) {
                continue;
            }

            let Some(page) = fetch_page(&*self.session, &location, req).await else {
                continue;
            };

            for link in page.rel_links() {
                let normalized = req.name().as_str();

                if !self.allow_external.contains(normalized) && !self.allow_all_external {
                    state.need_warn_external = true;
                    tracing::debug!(
                        "Not searching {link} for files because external urls are disallowed."
                    );
                    continue;
                }

                if link.is_trusted() == Some(false)
                    && !self.allow_unverified.contains(normalized)
                {
                    tracing::debug!(
                        "Not searching {link} for urls, it is an untrusted link and cannot \
                         produce safe or verifiable files."
                    );
                    state.need_warn_unverified = true;
                    continue;
                }

                pending.push_back(link);
            }

            pages.push(page);
        }

        pages
    }

    fn warn_about_ignored_files(&self, req: &Requirement, state: &SearchState) {
        if state.need_warn_external {
            tracing::warn!(
                "Some externally hosted files were ignored as access to them may be unreliable \
                 (allow externally hosted files for {} to include them).",
                req.name().as_source_str()
            );
        }
        if state.need_warn_unverified {
            tracing::warn!(
                "Some insecure and unverifiable files were ignored (allow unverified files for \
                 {} to include them).",
                req.name().as_source_str()
            );
        }
    }
}

fn installed_version_display(req: &Requirement) -> String {
    req.satisfied_by()
        .map(|dist| dist.version.to_string())
        .unwrap_or_default()
}

fn past_versions_display(applicable_versions: &[FoundVersion]) -> String {
    let past: Vec<&str> = applicable_versions
        .iter()
        .skip(1)
        .map(FoundVersion::version)
        .collect();
    if past.is_empty() {
        String::from("none")
    } else {
        past.join(", ")
    }
}

fn sorted_unique(versions: &[String]) -> Vec<String> {
    let mut unique: Vec<String> = versions
        .iter()
        .cloned()
        .collect::<HashSet<_>>()
        .into_iter()
        .collect();
    unique.sort();
    unique
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_mkurl_pypi_url() {
        let index = Url::parse("https://example.com/simple/").unwrap();
        assert_eq!(
            mkurl_pypi_url(&index, "Foo").unwrap().as_str(),
            "https://example.com/simple/Foo/"
        );

        let no_slash = Url::parse("https://example.com/simple").unwrap();
        assert_eq!(
            mkurl_pypi_url(&no_slash, "foo").unwrap().as_str(),
            "https://example.com/simple/foo/"
        );
    }

    #[test]
    fn test_sorted_unique() {
        let versions = vec![
            String::from("2.0"),
            String::from("1.0"),
            String::from("2.0"),
        ];
        assert_eq!(sorted_unique(&versions), vec!["1.0", "2.0"]);
    }
}

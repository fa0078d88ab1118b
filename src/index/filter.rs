//! The per-link filter: decides whether a single candidate link yields a
//! usable version of the searched project, and under which name/format/trust
//! rules it gets skipped.

use super::found::{FoundLink, FoundVersion};
use crate::tags::WheelTags;
use crate::types::{
    normalize_name, Link, LinkOrigin, NormalizedPackageName, WheelFilename, WHEEL_EXT,
};
use pep440_rs::Version;
use regex::Regex;
use std::collections::HashSet;
use std::str::FromStr;
use std::sync::OnceLock;
use url::Url;

/// The archive extensions the finder understands, not counting wheels.
/// `.tar.gz` and `.tar.bz2` are double extensions; extension splitting has to
/// re-attach the `.tar` before matching against this list.
const ARCHIVE_EXTENSIONS: &[&str] = &[".tar.gz", ".tar.bz2", ".tar", ".tgz", ".zip"];

fn is_known_extension(ext: &str, use_wheel: bool) -> bool {
    ARCHIVE_EXTENSIONS.contains(&ext) || (use_wheel && ext == WHEEL_EXT)
}

/// The mutable bookkeeping of one `find_requirement` call. Passed explicitly
/// through the filter so the filter stays a pure function of its inputs.
#[derive(Debug, Default)]
pub(crate) struct SearchState {
    /// Links whose skip reason has already been logged this search.
    pub logged_links: HashSet<Url>,

    /// Set when an externally hosted file was ignored, so the final failure
    /// can tell the user why nothing was found.
    pub need_warn_external: bool,

    /// Set when an unverifiable file was ignored, for the same reason.
    pub need_warn_unverified: bool,

    /// (scheme, host) pairs already warned about over insecure transport.
    pub warned_insecure: HashSet<(String, String)>,
}

impl SearchState {
    pub(crate) fn new() -> Self {
        Self::default()
    }
}

/// The slice of finder configuration the filter reads.
pub(crate) struct FilterConfig<'a> {
    pub use_wheel: bool,
    pub allow_external: &'a HashSet<NormalizedPackageName>,
    pub allow_unverified: &'a HashSet<NormalizedPackageName>,
    pub allow_all_external: bool,
    pub supported_tags: &'a WheelTags,
    pub supported_tags_noarch: &'a WheelTags,
    pub platform: &'a str,
    pub python_version: &'a str,
}

fn log_skip_once(state: &mut SearchState, link: &Link, reason: &str) {
    if state.logged_links.insert(link.url().clone()) {
        tracing::debug!("Skipping link {link}; {reason}");
    }
}

/// Matches an sdist/egg stem against the searched project: the stem must
/// parse as `name-version` and the name (after lowercasing and `_`→`-`) must
/// be exactly the search name followed by a dash. Returns the version part.
pub(crate) fn egg_info_matches(egg_info: &str, search_name: &str, link: &Link) -> Option<String> {
    static EGG_INFO_RE: OnceLock<Regex> = OnceLock::new();
    let egg_info_re =
        EGG_INFO_RE.get_or_init(|| Regex::new(r"(?i)([a-z0-9_.]+)-([a-z0-9_.-]+)").unwrap());

    let Some(found) = egg_info_re.find(egg_info) else {
        tracing::debug!("Could not parse version from link: {link}");
        return None;
    };
    // To match the "safe" name a build backend would have written:
    let name = found.as_str().to_lowercase().replace('_', "-");
    let look_for = format!("{}-", search_name.to_lowercase());
    if name.starts_with(&look_for) {
        Some(found.as_str()[look_for.len()..].to_owned())
    } else {
        None
    }
}

/// Returns the links in order, non-egg links first and egg links second,
/// while eliminating duplicate URLs.
pub(crate) fn sort_links(links: &[Link]) -> Vec<&Link> {
    let mut seen = HashSet::new();
    let mut no_eggs = Vec::new();
    let mut eggs = Vec::new();
    for link in links {
        if seen.insert(link.url()) {
            if link.egg_fragment().is_some() {
                eggs.push(link);
            } else {
                no_eggs.push(link);
            }
        }
    }
    no_eggs.extend(eggs);
    no_eggs
}

/// Decides whether `link` contributes a version of `search_name`. The checks
/// run in a fixed order; any failure skips the link with a debug line, and
/// the external/unverifiable gates additionally flag the search state so the
/// final failure message can mention what was ignored.
pub(crate) fn link_package_versions(
    link: &Link,
    search_name: &str,
    config: &FilterConfig<'_>,
    state: &mut SearchState,
) -> Option<FoundVersion> {
    let mut wheel_version: Option<(String, usize)> = None;

    let egg_info = if let Some(egg) = link.egg_fragment() {
        egg.to_owned()
    } else {
        let Some((stem, ext)) = link.splitext() else {
            log_skip_once(state, link, "not a file");
            return None;
        };
        // A `.tar.gz` splits as `.gz`; reattach the `.tar`.
        let (stem, ext) = match stem.strip_suffix(".tar") {
            Some(stripped) => (stripped, format!(".tar{ext}")),
            None => (stem, ext.to_owned()),
        };
        if !is_known_extension(&ext, config.use_wheel) {
            log_skip_once(state, link, &format!("unknown archive format: {ext}"));
            return None;
        }
        if link.path().contains("macosx10") && ext == ".zip" {
            log_skip_once(state, link, "macosx10 one");
            return None;
        }
        if ext == WHEEL_EXT {
            let wheel = match WheelFilename::from_filename(link.filename()) {
                Ok(wheel) => wheel,
                Err(_) => {
                    log_skip_once(state, link, "the wheel filename is invalid");
                    return None;
                }
            };
            if !wheel.distribution.eq_ignore_ascii_case(search_name) {
                log_skip_once(
                    state,
                    link,
                    &format!("wrong project name (not {search_name})"),
                );
                return None;
            }
            let Some(support_rank) = wheel.support_index_min(config.supported_tags) else {
                log_skip_once(state, link, "it is not compatible with this Python");
                return None;
            };
            if pypi_hosted_binary_excluded(link, &wheel, config) {
                log_skip_once(
                    state,
                    link,
                    "it is a pypi-hosted binary wheel on an unsupported platform",
                );
                return None;
            }
            wheel_version = Some((wheel.version.clone(), support_rank));
        }
        stem.to_owned()
    };

    let (mut version, support_rank) = match wheel_version {
        Some((version, support_rank)) => (version, Some(support_rank)),
        None => match egg_info_matches(&egg_info, search_name, link) {
            Some(version) => (version, None),
            None => {
                log_skip_once(
                    state,
                    link,
                    &format!("wrong project name (not {search_name})"),
                );
                return None;
            }
        },
    };

    let normalized = normalize_name(search_name);

    if link.is_internal() == Some(false)
        && !config.allow_external.contains(normalized.as_str())
        && !config.allow_all_external
    {
        // We are sure the file is hosted off the index, and nothing allows
        // externally hosted files for this project.
        log_skip_once(state, link, "it is externally hosted");
        state.need_warn_external = true;
        return None;
    }

    if link.verifiable() == Some(false) && !config.allow_unverified.contains(normalized.as_str()) {
        // We are sure we cannot verify the file's integrity after download.
        log_skip_once(state, link, "it is an insecure and unverifiable file");
        state.need_warn_unverified = true;
        return None;
    }

    static PY_VERSION_RE: OnceLock<Regex> = OnceLock::new();
    let py_version_re =
        PY_VERSION_RE.get_or_init(|| Regex::new(r"-py([123]\.?[0-9]?)$").unwrap());
    let py_suffix = py_version_re
        .captures(&version)
        .map(|captures| (captures.get(0).map_or(0, |m| m.start()), captures[1].to_owned()));
    if let Some((suffix_start, py_version)) = py_suffix {
        if py_version != config.python_version {
            log_skip_once(state, link, "Python version is incorrect");
            return None;
        }
        version.truncate(suffix_start);
    }

    let Ok(parsed) = Version::from_str(&version) else {
        log_skip_once(state, link, &format!("could not parse version: {version}"));
        return None;
    };

    tracing::debug!("Found link {link}, version: {version}");
    let found_link = match support_rank {
        Some(support_rank) => FoundLink::Wheel {
            link: link.clone(),
            support_rank,
        },
        None => FoundLink::Archive { link: link.clone() },
    };
    Some(FoundVersion::new(version, parsed, found_link))
}

/// The PyPI-hosted binary wheel policy: on platforms other than Windows,
/// macOS and `cli`, a binary wheel served from pypi.python.org is only
/// acceptable if it is pure (supported under the noarch tag subset).
fn pypi_hosted_binary_excluded(
    link: &Link,
    wheel: &WheelFilename,
    config: &FilterConfig<'_>,
) -> bool {
    if config.platform.starts_with("win")
        || config.platform.starts_with("macosx")
        || config.platform == "cli"
    {
        return false;
    }
    let Some(LinkOrigin::Page(page)) = link.comes_from() else {
        return false;
    };
    if !page
        .url
        .host_str()
        .map_or(false, |host| host.ends_with("pypi.python.org"))
    {
        return false;
    }
    !wheel.supported(config.supported_tags_noarch)
}

/// Filters an entire pool of links, in the [`sort_links`] order.
pub(crate) fn package_versions(
    links: &[Link],
    search_name: &str,
    config: &FilterConfig<'_>,
    state: &mut SearchState,
) -> Vec<FoundVersion> {
    sort_links(links)
        .into_iter()
        .filter_map(|link| link_package_versions(link, search_name, config, state))
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::types::PageOrigin;
    use rstest::rstest;

    fn tags(s: &[&str]) -> WheelTags {
        s.iter().map(|t| t.parse().unwrap()).collect()
    }

    struct Fixture {
        supported: WheelTags,
        noarch: WheelTags,
        allow_external: HashSet<NormalizedPackageName>,
        allow_unverified: HashSet<NormalizedPackageName>,
        allow_all_external: bool,
        use_wheel: bool,
    }

    impl Fixture {
        fn new() -> Self {
            let supported = tags(&[
                "cp311-cp311-linux_x86_64",
                "cp311-abi3-linux_x86_64",
                "py3-none-any",
            ]);
            let noarch = supported.noarch();
            Fixture {
                supported,
                noarch,
                allow_external: HashSet::new(),
                allow_unverified: HashSet::new(),
                allow_all_external: false,
                use_wheel: true,
            }
        }

        fn config(&self) -> FilterConfig<'_> {
            FilterConfig {
                use_wheel: self.use_wheel,
                allow_external: &self.allow_external,
                allow_unverified: &self.allow_unverified,
                allow_all_external: self.allow_all_external,
                supported_tags: &self.supported,
                supported_tags_noarch: &self.noarch,
                platform: "linux_x86_64",
                python_version: "3.1",
            }
        }
    }

    fn link(url: &str) -> Link {
        Link::new(Url::from_str(url).unwrap())
    }

    fn filter(fixture: &Fixture, link: &Link, state: &mut SearchState) -> Option<FoundVersion> {
        link_package_versions(link, "foo", &fixture.config(), state)
    }

    #[test]
    fn test_sdist_accepted() {
        let fixture = Fixture::new();
        let mut state = SearchState::new();
        let found = filter(&fixture, &link("https://example.com/foo-1.0.tar.gz"), &mut state)
            .expect("sdist should be accepted");
        assert_eq!(found.version(), "1.0");
        assert!(matches!(found.found_link(), FoundLink::Archive { .. }));
    }

    #[test]
    fn test_supported_wheel_accepted_with_rank() {
        let fixture = Fixture::new();
        let mut state = SearchState::new();
        let found = filter(
            &fixture,
            &link("https://example.com/foo-1.0-py3-none-any.whl"),
            &mut state,
        )
        .expect("supported wheel should be accepted");
        assert_eq!(found.version(), "1.0");
        assert!(
            matches!(found.found_link(), FoundLink::Wheel { support_rank: 2, .. }),
            "py3-none-any is the third preference"
        );
    }

    #[rstest]
    #[case::not_a_file("https://example.com/foo")]
    #[case::unknown_archive_format("https://example.com/foo-1.0.exe")]
    #[case::macosx10_zip("https://example.com/macosx10.9/foo-1.0.zip")]
    #[case::invalid_wheel_filename("https://example.com/foo-py3-none-any.whl")]
    #[case::wheel_wrong_name("https://example.com/bar-1.0-py3-none-any.whl")]
    #[case::wheel_unsupported("https://example.com/foo-1.0-py2-none-any.whl")]
    #[case::sdist_wrong_name("https://example.com/bar-1.0.tar.gz")]
    #[case::python_suffix_mismatch("https://example.com/foo-1.0-py2.7.tar.gz")]
    #[case::unparseable_version("https://example.com/foo-bad.version.here.tar.gz")]
    fn test_skipped(#[case] url: &str) {
        let fixture = Fixture::new();
        let mut state = SearchState::new();
        assert!(filter(&fixture, &link(url), &mut state).is_none());
        assert!(!state.need_warn_external);
        assert!(!state.need_warn_unverified);
    }

    #[test]
    fn test_python_suffix_match_is_stripped() {
        let fixture = Fixture::new();
        let mut state = SearchState::new();
        let found = filter(
            &fixture,
            &link("https://example.com/foo-1.0-py3.1.tar.gz"),
            &mut state,
        )
        .expect("matching python suffix should be accepted");
        assert_eq!(found.version(), "1.0");
    }

    #[test]
    fn test_wheel_ignored_without_wheel_support() {
        let mut fixture = Fixture::new();
        fixture.use_wheel = false;
        let mut state = SearchState::new();
        assert!(filter(
            &fixture,
            &link("https://example.com/foo-1.0-py3-none-any.whl"),
            &mut state
        )
        .is_none());
    }

    #[test]
    fn test_egg_fragment_bypasses_extension_checks() {
        let fixture = Fixture::new();
        let mut state = SearchState::new();
        let found = filter(
            &fixture,
            &link("https://example.com/archive/main#egg=foo-1.0"),
            &mut state,
        )
        .expect("egg fragment should carry the version");
        assert_eq!(found.version(), "1.0");
    }

    #[test]
    fn test_external_link_sets_warning_flag() {
        let fixture = Fixture::new();
        let mut state = SearchState::new();
        let origin = PageOrigin {
            url: Url::from_str("https://example.com/simple/foo/").unwrap(),
            trusted: Some(true),
            api_version: Some(2),
        };
        let external = Link::from_page(
            Url::from_str("https://elsewhere.example.com/foo-1.0.tar.gz").unwrap(),
            origin,
            Some(false),
        );
        assert!(filter(&fixture, &external, &mut state).is_none());
        assert!(state.need_warn_external);
    }

    #[test]
    fn test_external_link_allowed_when_configured() {
        let mut fixture = Fixture::new();
        fixture
            .allow_external
            .insert("foo".parse::<NormalizedPackageName>().unwrap());
        let mut state = SearchState::new();
        let origin = PageOrigin {
            url: Url::from_str("https://example.com/simple/foo/").unwrap(),
            trusted: Some(true),
            api_version: Some(2),
        };
        let external = Link::from_page(
            Url::from_str("https://elsewhere.example.com/foo-1.0.tar.gz#md5=00ff").unwrap(),
            origin,
            Some(false),
        );
        // Externally hosted but allowed, and hash-carrying so verifiable.
        assert!(filter(&fixture, &external, &mut state).is_some());
        assert!(!state.need_warn_external);
    }

    #[test]
    fn test_unverifiable_link_sets_warning_flag() {
        let fixture = Fixture::new();
        let mut state = SearchState::new();
        let origin = PageOrigin {
            url: Url::from_str("https://example.com/simple/foo/").unwrap(),
            trusted: Some(true),
            api_version: Some(2),
        };
        // Internal but hashless on an api-v2 page: unverifiable.
        let unverified = Link::from_page(
            Url::from_str("https://example.com/foo-1.0.tar.gz").unwrap(),
            origin,
            Some(true),
        );
        assert!(filter(&fixture, &unverified, &mut state).is_none());
        assert!(state.need_warn_unverified);
    }

    #[test]
    fn test_pypi_hosted_binary_wheel_policy() {
        let fixture = Fixture::new();
        let mut state = SearchState::new();
        let origin = PageOrigin {
            url: Url::from_str("https://pypi.python.org/simple/foo/").unwrap(),
            trusted: Some(true),
            api_version: None,
        };
        let binary = Link::from_page(
            Url::from_str("https://pypi.python.org/foo-1.0-cp311-cp311-linux_x86_64.whl")
                .unwrap(),
            origin.clone(),
            None,
        );
        assert!(
            filter(&fixture, &binary, &mut state).is_none(),
            "binary wheel from pypi is refused on linux"
        );

        let pure = Link::from_page(
            Url::from_str("https://pypi.python.org/foo-1.0-py3-none-any.whl").unwrap(),
            origin,
            None,
        );
        assert!(
            filter(&fixture, &pure, &mut state).is_some(),
            "pure wheel from pypi is fine"
        );
    }

    #[test]
    fn test_skip_lines_logged_once_per_link() {
        let fixture = Fixture::new();
        let mut state = SearchState::new();
        let bad = link("https://example.com/foo");
        assert!(filter(&fixture, &bad, &mut state).is_none());
        assert_eq!(state.logged_links.len(), 1);
        // A second pass over the same link adds nothing.
        assert!(filter(&fixture, &bad, &mut state).is_none());
        assert_eq!(state.logged_links.len(), 1);
    }

    #[test]
    fn test_sort_links_dedupes_and_orders_eggs_last() {
        let egg = link("https://example.com/repo#egg=foo-1.0");
        let plain = link("https://example.com/foo-1.0.tar.gz");
        let duplicate = link("https://example.com/foo-1.0.tar.gz");
        let links = vec![egg.clone(), plain.clone(), duplicate];
        let sorted = sort_links(&links);
        assert_eq!(sorted.len(), 2);
        assert_eq!(sorted[0], &plain);
        assert_eq!(sorted[1], &egg);
    }

    #[rstest]
    #[case("foo-1.0", "foo", Some("1.0"))]
    #[case("Foo-1.0", "foo", Some("1.0"))]
    #[case("foo_bar-2.0a1", "foo-bar", Some("2.0a1"))]
    #[case("foobar-1.0", "foo", None)]
    #[case("bar-1.0", "foo", None)]
    #[case("!!!", "foo", None)]
    fn test_egg_info_matches(
        #[case] egg_info: &str,
        #[case] search_name: &str,
        #[case] expected: Option<&str>,
    ) {
        let link = link("https://example.com/");
        assert_eq!(
            egg_info_matches(egg_info, search_name, &link).as_deref(),
            expected
        );
    }
}

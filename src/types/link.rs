use regex::Regex;
use std::fmt::{Display, Formatter};
use std::hash::{Hash, Hasher};
use std::sync::OnceLock;
use url::Url;

/// Where a [`Link`] was discovered. Carried by value so that links never hold
/// an owning reference back into the page they came from.
#[derive(Debug, Clone)]
pub enum LinkOrigin {
    /// The link was listed directly in the user's find-links configuration.
    FindLinks,

    /// The link was scraped from an HTML page.
    Page(PageOrigin),
}

/// The identity of the HTML page a link was found on: its canonical URL, the
/// trust inherited from the link the page was fetched through, and the
/// `api-version` the page advertised.
#[derive(Debug, Clone)]
pub struct PageOrigin {
    /// The canonical URL of the page, after redirects.
    pub url: Url,

    /// Whether the page itself was reached through a trusted link.
    pub trusted: Option<bool>,

    /// The `<meta name="api-version">` value of the page, if any.
    pub api_version: Option<u32>,
}

/// A single candidate URL, immutable once constructed. Two links are equal
/// iff their URLs are equal; where they came from and how much they are
/// trusted never enters into identity.
#[derive(Debug, Clone)]
pub struct Link {
    url: Url,
    comes_from: Option<LinkOrigin>,
    trusted: Option<bool>,
    internal: Option<bool>,
    deprecated_regex: bool,
}

impl Link {
    /// Creates a link with unknown trust and no origin, as used for
    /// dependency links and bare file locations.
    pub fn new(url: Url) -> Self {
        Link {
            url,
            comes_from: None,
            trusted: None,
            internal: None,
            deprecated_regex: false,
        }
    }

    /// Creates a link the user configured directly and therefore trusts, as
    /// used for index URLs.
    pub fn trusted(url: Url) -> Self {
        Link {
            trusted: Some(true),
            ..Link::new(url)
        }
    }

    /// Creates a trusted link originating from the find-links configuration.
    pub fn from_find_links(url: Url) -> Self {
        Link {
            comes_from: Some(LinkOrigin::FindLinks),
            trusted: Some(true),
            ..Link::new(url)
        }
    }

    /// Creates a link for an anchor scraped from an index page. `internal` is
    /// only meaningful when the page advertises api-version ≥ 2.
    pub(crate) fn from_page(url: Url, origin: PageOrigin, internal: Option<bool>) -> Self {
        Link {
            comes_from: Some(LinkOrigin::Page(origin)),
            internal,
            ..Link::new(url)
        }
    }

    /// Creates an untrusted homepage/download relation link scraped from a
    /// page. `deprecated_regex` marks the two legacy raw-HTML extractors.
    pub(crate) fn rel_from_page(url: Url, origin: PageOrigin, deprecated_regex: bool) -> Self {
        Link {
            comes_from: Some(LinkOrigin::Page(origin)),
            trusted: Some(false),
            deprecated_regex,
            ..Link::new(url)
        }
    }

    /// The URL of this link.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// The URL with any `#fragment` removed, which is what gets fetched.
    pub fn url_without_fragment(&self) -> Url {
        let mut url = self.url.clone();
        url.set_fragment(None);
        url
    }

    /// Where this link was discovered, if it was discovered rather than
    /// configured.
    pub fn comes_from(&self) -> Option<&LinkOrigin> {
        self.comes_from.as_ref()
    }

    /// Whether the link itself is trusted. `None` means unknown.
    pub fn is_trusted(&self) -> Option<bool> {
        self.trusted
    }

    /// Whether an api-version ≥ 2 index page tagged this anchor
    /// `rel="internal"`. `None` when the page made no such distinction.
    pub fn is_internal(&self) -> Option<bool> {
        self.internal
    }

    /// True when this link was found through the legacy raw-HTML scraping of
    /// "Home Page" / "Download URL" table cells.
    pub fn is_deprecated_regex(&self) -> bool {
        self.deprecated_regex
    }

    /// The URL path.
    pub fn path(&self) -> &str {
        self.url.path()
    }

    /// The last path segment (ignoring a trailing slash), falling back to the
    /// host when the path is empty.
    pub fn filename(&self) -> &str {
        let path = self.url.path().trim_end_matches('/');
        let basename = path.rsplit('/').next().unwrap_or("");
        if basename.is_empty() {
            self.url.host_str().unwrap_or("")
        } else {
            basename
        }
    }

    /// Splits the filename at its final dot into a stem and an extension
    /// (including the dot). Returns `None` when there is no extension. The
    /// double-extension cases (`.tar.gz` and friends) are the caller's
    /// business.
    pub fn splitext(&self) -> Option<(&str, &str)> {
        let filename = self.filename();
        match filename.rfind('.') {
            Some(idx) if idx > 0 => Some(filename.split_at(idx)),
            _ => None,
        }
    }

    /// The value of a trailing `#egg=<name>` fragment, if present.
    pub fn egg_fragment(&self) -> Option<&str> {
        static EGG_FRAGMENT_RE: OnceLock<Regex> = OnceLock::new();
        let egg_fragment_re =
            EGG_FRAGMENT_RE.get_or_init(|| Regex::new(r"#egg=([^&]*)").unwrap());
        egg_fragment_re
            .captures(self.url.as_str())
            .and_then(|captures| captures.get(1))
            .map(|egg| egg.as_str())
            .filter(|egg| !egg.is_empty())
    }

    fn hash_match(&self) -> Option<(&str, &str)> {
        static HASH_RE: OnceLock<Regex> = OnceLock::new();
        let hash_re = HASH_RE
            .get_or_init(|| Regex::new(r"(sha1|sha224|sha384|sha256|sha512|md5)=([a-f0-9]+)").unwrap());
        hash_re
            .captures(self.url.as_str())
            .and_then(|captures| match (captures.get(1), captures.get(2)) {
                (Some(name), Some(digest)) => Some((name.as_str(), digest.as_str())),
                _ => None,
            })
    }

    /// The hexadecimal digest embedded in the URL fragment, if any.
    pub fn hash(&self) -> Option<&str> {
        self.hash_match().map(|(_, digest)| digest)
    }

    /// The name of the hash algorithm of [`Link::hash`].
    pub fn hash_name(&self) -> Option<&str> {
        self.hash_match().map(|(name, _)| name)
    }

    /// Whether a download from this link could be verified after the fact.
    ///
    /// A link inherits trust from the page it came from. For trusted links the
    /// answer additionally depends on the page's api-version: pages at version
    /// 1 (or with no version) make no claims either way, while version ≥ 2
    /// pages are expected to publish a hash for every verifiable file.
    /// Returns `None` when nothing can be determined.
    pub fn verifiable(&self) -> Option<bool> {
        let trusted = self.trusted.or_else(|| match &self.comes_from {
            Some(LinkOrigin::Page(page)) => page.trusted,
            _ => None,
        });

        match trusted {
            Some(true) => {
                let api_version = match &self.comes_from {
                    Some(LinkOrigin::Page(page)) => page.api_version,
                    _ => None,
                };
                if api_version.map_or(true, |version| version <= 1) {
                    // Trusted, but the page predates the internal/external
                    // distinction, so no claim can be made.
                    None
                } else {
                    Some(self.hash().is_some())
                }
            }
            Some(false) => Some(false),
            None => None,
        }
    }
}

impl Display for Link {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.comes_from {
            Some(LinkOrigin::FindLinks) => write!(f, "{} (from -f)", self.url),
            Some(LinkOrigin::Page(page)) => write!(f, "{} (from {})", self.url, page.url),
            None => write!(f, "{}", self.url),
        }
    }
}

impl PartialEq for Link {
    fn eq(&self, other: &Self) -> bool {
        self.url == other.url
    }
}

impl Eq for Link {}

impl Hash for Link {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.url.hash(state)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::str::FromStr;

    fn link(url: &str) -> Link {
        Link::new(Url::from_str(url).unwrap())
    }

    #[test]
    fn test_filename_and_splitext() {
        let l = link("https://example.com/packages/foo-1.0.tar.gz");
        assert_eq!(l.filename(), "foo-1.0.tar.gz");
        assert_eq!(l.splitext(), Some(("foo-1.0.tar", ".gz")));

        let l = link("https://example.com/simple/foo/");
        assert_eq!(l.filename(), "foo");
        assert_eq!(l.splitext(), None);

        let l = link("https://example.com/");
        assert_eq!(l.filename(), "example.com");
    }

    #[test]
    fn test_egg_fragment() {
        let l = link("https://example.com/repo.zip#egg=foo-1.0");
        assert_eq!(l.egg_fragment(), Some("foo-1.0"));

        let l = link("https://example.com/repo.zip#egg=foo&subdirectory=bar");
        assert_eq!(l.egg_fragment(), Some("foo"));

        assert_eq!(link("https://example.com/repo.zip").egg_fragment(), None);
        assert_eq!(link("https://example.com/repo.zip#egg=").egg_fragment(), None);
    }

    #[test]
    fn test_hash_fragment() {
        let l = link("https://example.com/foo-1.0.tar.gz#md5=aabbcc");
        assert_eq!(l.hash(), Some("aabbcc"));
        assert_eq!(l.hash_name(), Some("md5"));
        assert_eq!(link("https://example.com/foo-1.0.tar.gz").hash(), None);
    }

    #[test]
    fn test_equality_is_url_based() {
        let origin = PageOrigin {
            url: Url::from_str("https://example.com/simple/foo/").unwrap(),
            trusted: Some(true),
            api_version: None,
        };
        let a = link("https://example.com/foo-1.0.tar.gz");
        let b = Link::from_page(
            Url::from_str("https://example.com/foo-1.0.tar.gz").unwrap(),
            origin,
            None,
        );
        assert_eq!(a, b);
    }

    #[test]
    fn test_verifiable() {
        // Directly trusted, no page: no claim can be made.
        let l = Link::trusted(Url::from_str("https://example.com/foo-1.0.tar.gz").unwrap());
        assert_eq!(l.verifiable(), None);

        let page_v2 = |trusted| PageOrigin {
            url: Url::from_str("https://example.com/simple/foo/").unwrap(),
            trusted,
            api_version: Some(2),
        };

        // Trusted api-v2 page: verifiability tracks the hash fragment.
        let l = Link::from_page(
            Url::from_str("https://example.com/foo-1.0.tar.gz#md5=00ff").unwrap(),
            page_v2(Some(true)),
            Some(true),
        );
        assert_eq!(l.verifiable(), Some(true));

        let l = Link::from_page(
            Url::from_str("https://example.com/foo-1.0.tar.gz").unwrap(),
            page_v2(Some(true)),
            Some(true),
        );
        assert_eq!(l.verifiable(), Some(false));

        // Untrusted rel-link: never verifiable.
        let l = Link::rel_from_page(
            Url::from_str("https://elsewhere.example/foo-1.0.tar.gz").unwrap(),
            page_v2(Some(true)),
            false,
        );
        assert_eq!(l.verifiable(), Some(false));

        // Nothing known at all.
        let l = link("https://example.com/foo-1.0.tar.gz");
        assert_eq!(l.verifiable(), None);
    }

    #[test]
    fn test_url_without_fragment() {
        let l = link("https://example.com/foo-1.0.tar.gz#egg=foo");
        assert_eq!(
            l.url_without_fragment().as_str(),
            "https://example.com/foo-1.0.tar.gz"
        );
    }
}

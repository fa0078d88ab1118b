//! Parsing of HTML index pages: candidate anchors, homepage/download
//! relations and the page-level metadata that drives the trust rules.

use crate::types::{Link, PageOrigin};
use regex::Regex;
use std::collections::HashSet;
use std::sync::OnceLock;
use tl::HTMLTag;
use url::Url;

/// One fetched index page, along with its canonical URL and the trust it
/// inherited from the link it was fetched through.
///
/// The `api-version` meta tag and the `<base href>` override are extracted at
/// construction; the anchor lists are parsed on demand.
#[derive(Debug, Clone)]
pub struct HtmlPage {
    content: String,
    url: Url,
    trusted: Option<bool>,
    api_version: Option<u32>,
    base_url: Url,
}

fn tag_attribute<'dom>(tag: &HTMLTag<'dom>, name: &'dom str) -> Option<String> {
    tag.attributes()
        .get(name)
        .flatten()
        .map(|value| value.as_utf8_str().into_owned())
}

impl HtmlPage {
    /// Parses a page from its raw source. `url` is the canonical URL after
    /// redirects; `trusted` is inherited from the link the page was fetched
    /// through.
    pub fn new(content: String, url: Url, trusted: Option<bool>) -> Self {
        let api_version = parse_api_version(&content);
        let base_url = parse_base_url(&content).unwrap_or_else(|| url.clone());
        HtmlPage {
            content,
            url,
            trusted,
            api_version,
            base_url,
        }
    }

    /// The canonical URL of this page.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Whether the page was reached through a trusted link.
    pub fn is_trusted(&self) -> Option<bool> {
        self.trusted
    }

    /// The `<meta name="api-version">` value, if the page carries one.
    pub fn api_version(&self) -> Option<u32> {
        self.api_version
    }

    /// The URL hrefs are resolved against: the `<base href>` when present,
    /// the page URL otherwise.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// This page's identity as carried by the links found on it.
    pub fn origin(&self) -> PageOrigin {
        PageOrigin {
            url: self.url.clone(),
            trusted: self.trusted,
            api_version: self.api_version,
        }
    }

    /// All candidate links on the page, in document order and with duplicate
    /// URLs dropped: one per `<a href>` anchor, resolved against the base URL
    /// and percent-encoded. On pages advertising api-version ≥ 2 every link
    /// records whether it was tagged `rel="internal"`; on older pages that
    /// distinction does not exist.
    pub fn links(&self) -> Vec<Link> {
        let mut seen = HashSet::new();
        let mut links = Vec::new();
        self.for_each_anchor(|anchor| {
            let Some(href) = tag_attribute(anchor, "href") else {
                return;
            };
            let Some(url) = self.resolve_href(&href) else {
                return;
            };
            if !seen.insert(url.clone()) {
                return;
            }

            let internal = if self.api_version.map_or(false, |version| version >= 2) {
                let rel = tag_attribute(anchor, "rel").unwrap_or_default();
                Some(rel.split_whitespace().any(|r| r == "internal"))
            } else {
                None
            };

            links.push(Link::from_page(url, self.origin(), internal));
        });
        links
    }

    /// The anchors explicitly related to the project: `rel="homepage"` and
    /// `rel="download"`. These point off the index and are never trusted.
    pub fn explicit_rel_links(&self) -> Vec<Link> {
        let mut links = Vec::new();
        self.for_each_anchor(|anchor| {
            let rel = tag_attribute(anchor, "rel").unwrap_or_default();
            if !rel
                .split_whitespace()
                .any(|r| r == "homepage" || r == "download")
            {
                return;
            }
            let Some(href) = tag_attribute(anchor, "href") else {
                return;
            };
            if let Some(url) = self.resolve_href(&href) {
                links.push(Link::rel_from_page(url, self.origin(), false));
            }
        });
        links
    }

    /// The legacy fallback for pages that render "Home Page" and
    /// "Download URL" table rows instead of rel-attributes: scrape the raw
    /// source for the first href after each label. Links found this way are
    /// marked so that selecting one can warn about the deprecated discovery.
    pub fn scraped_rel_links(&self) -> Vec<Link> {
        static HOMEPAGE_RE: OnceLock<Regex> = OnceLock::new();
        static DOWNLOAD_RE: OnceLock<Regex> = OnceLock::new();
        static HREF_RE: OnceLock<Regex> = OnceLock::new();
        let homepage_re =
            HOMEPAGE_RE.get_or_init(|| Regex::new(r"(?i)<th>\s*home\s*page").unwrap());
        let download_re =
            DOWNLOAD_RE.get_or_init(|| Regex::new(r"(?i)<th>\s*download\s+url").unwrap());
        let href_re = HREF_RE.get_or_init(|| {
            Regex::new(r#"(?is)href=(?:"([^"]*)"|'([^']*)'|([^>\s\n]*))"#).unwrap()
        });

        let mut links = Vec::new();
        for label_re in [homepage_re, download_re] {
            let Some(label) = label_re.find(&self.content) else {
                continue;
            };
            let Some(captures) = href_re.captures_at(&self.content, label.end()) else {
                continue;
            };
            let href = captures
                .get(1)
                .or_else(|| captures.get(2))
                .or_else(|| captures.get(3))
                .map(|m| m.as_str())
                .unwrap_or("");
            if href.is_empty() {
                continue;
            }
            if let Some(url) = self.resolve_href(href) {
                links.push(Link::rel_from_page(url, self.origin(), true));
            }
        }
        links
    }

    /// Every link worth crawling onward from this page: the explicit
    /// homepage/download relations followed by the scraped fallbacks.
    pub fn rel_links(&self) -> Vec<Link> {
        let mut links = self.explicit_rel_links();
        links.extend(self.scraped_rel_links());
        links
    }

    fn for_each_anchor(&self, mut f: impl FnMut(&HTMLTag<'_>)) {
        let Ok(dom) = tl::parse(&self.content, tl::ParserOptions::default()) else {
            return;
        };
        let Some(anchors) = dom.query_selector("a") else {
            return;
        };
        for anchor in anchors {
            if let Some(tag) = anchor.get(dom.parser()).and_then(|node| node.as_tag()) {
                f(tag);
            }
        }
    }

    /// Resolves an href against the base URL and cleans up unsafe characters.
    fn resolve_href(&self, href: &str) -> Option<Url> {
        let href = html_escape::decode_html_entities(href);
        let joined = self.base_url.join(href.as_ref()).ok()?;
        Url::parse(&clean_link(joined.as_str())).ok()
    }
}

fn parse_api_version(content: &str) -> Option<u32> {
    let dom = tl::parse(content, tl::ParserOptions::default()).ok()?;
    let metas = dom.query_selector("meta")?;
    for meta in metas {
        let Some(tag) = meta.get(dom.parser()).and_then(|node| node.as_tag()) else {
            continue;
        };
        let name = tag_attribute(tag, "name").unwrap_or_default();
        if name.eq_ignore_ascii_case("api-version") {
            return tag_attribute(tag, "value").and_then(|value| value.trim().parse().ok());
        }
    }
    None
}

fn parse_base_url(content: &str) -> Option<Url> {
    let dom = tl::parse(content, tl::ParserOptions::default()).ok()?;
    let bases = dom.query_selector("base")?;
    for base in bases {
        let Some(tag) = base.get(dom.parser()).and_then(|node| node.as_tag()) else {
            continue;
        };
        if let Some(href) = tag_attribute(tag, "href") {
            if let Ok(url) = Url::parse(&href) {
                return Some(url);
            }
        }
    }
    None
}

/// Percent-encodes every character a URL should not contain, leaving existing
/// escapes alone: a stray space becomes `%20` without over-quoting `%` or the
/// rest of the URL.
pub fn clean_link(url: &str) -> String {
    static CLEAN_RE: OnceLock<Regex> = OnceLock::new();
    let clean_re =
        CLEAN_RE.get_or_init(|| Regex::new(r"(?i)[^a-z0-9$&+,/:;=?@.#%_\\|-]").unwrap());
    clean_re
        .replace_all(url, |captures: &regex::Captures<'_>| {
            let mut encoded = String::new();
            for c in captures[0].chars() {
                encoded.push_str(&format!("%{:02x}", c as u32));
            }
            encoded
        })
        .into_owned()
}

//! Fetching of HTML pages from search locations: scheme gates, the
//! content-type probe for archive-looking URLs, `file://` handling, and the
//! rule that a failed fetch never fails the search.

use super::html::HtmlPage;
use super::session::{FetchError, HtmlSession, SessionResponse};
use crate::types::{Link, Requirement};
use http::header::{ACCEPT, CACHE_CONTROL};
use http::{HeaderMap, HeaderValue};
use url::Url;

/// Version-control scheme prefixes that cannot be looked at as web pages.
const VCS_SCHEMES: &[&str] = &["git", "hg", "svn", "bzr"];

/// URL suffixes that look like archives and therefore get a HEAD probe
/// before a full GET.
const ARCHIVE_SUFFIXES: &[&str] = &[".tar", ".tar.gz", ".tar.bz2", ".tgz", ".zip"];

fn is_vcs_url(url: &Url) -> bool {
    let lowered = url.as_str().to_lowercase();
    VCS_SCHEMES.iter().any(|scheme| {
        lowered
            .strip_prefix(scheme)
            .and_then(|rest| rest.chars().next())
            .map_or(false, |c| c == '+' || c == ':')
    })
}

/// Fetches one location as an HTML page. All failures are logged at debug and
/// collapse to `None`: a page that cannot be fetched is simply not searched.
pub(crate) async fn fetch_page(
    session: &dyn HtmlSession,
    link: &Link,
    req: &Requirement,
) -> Option<HtmlPage> {
    let url = link.url_without_fragment();

    // Check for VCS schemes that do not support lookup as web pages.
    if is_vcs_url(&url) {
        let scheme = url.scheme();
        tracing::debug!("Cannot look at {scheme} URL {link}");
        return None;
    }

    match fetch_page_inner(session, link, &url).await {
        Ok(page) => page,
        Err(error) => {
            handle_fail(req, link, &error);
            None
        }
    }
}

async fn fetch_page_inner(
    session: &dyn HtmlSession,
    link: &Link,
    url: &Url,
) -> Result<Option<HtmlPage>, FetchError> {
    // The URL merely looking like an archive is no proof: probe the
    // Content-Type with a HEAD request and only proceed for HTML.
    let filename = link.filename();
    for suffix in ARCHIVE_SUFFIXES {
        if filename.ends_with(suffix) {
            let content_type = head_content_type(session, url).await?;
            if content_type.to_lowercase().starts_with("text/html") {
                break;
            }
            tracing::debug!("Skipping page {link} because of Content-Type: {content_type}");
            return Ok(None);
        }
    }

    tracing::debug!("Getting page {url}");

    if url.scheme() == "file" {
        return fetch_local_page(link, url).map_err(FetchError::Connection);
    }

    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static("text/html"));
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("max-age=600"));
    let response: SessionResponse = session.get(url, &headers).await?.error_for_status()?;

    // The archive check above only sees archive-looking URLs; anything can
    // hide behind any URL, so the served Content-Type is checked as well.
    let content_type = response.content_type();
    if !content_type.to_lowercase().starts_with("text/html") {
        tracing::debug!("Skipping page {link} because of Content-Type: {content_type}");
        return Ok(None);
    }

    Ok(Some(HtmlPage::new(
        response.text,
        response.url,
        link.is_trusted(),
    )))
}

/// Reads a `file://` location from disk. Directories get `index.html`
/// appended, plain files must look like HTML to be worth parsing.
fn fetch_local_page(link: &Link, url: &Url) -> Result<Option<HtmlPage>, String> {
    let path = url
        .to_file_path()
        .map_err(|_| format!("not a local path: {url}"))?;

    let (path, final_url) = if path.is_dir() {
        // Add a trailing slash first so joining doesn't trim the last
        // path segment.
        let mut dir_url = url.clone();
        if !dir_url.path().ends_with('/') {
            dir_url.set_path(&format!("{}/", dir_url.path()));
        }
        let index_url = dir_url
            .join("index.html")
            .map_err(|e| e.to_string())?;
        tracing::debug!(" file: URL is directory, getting {index_url}");
        (path.join("index.html"), index_url)
    } else {
        (path, url.clone())
    };

    if mime_guess::from_path(&path).first() != Some(mime::TEXT_HTML) {
        tracing::debug!("Skipping page {link}; not HTML");
        return Ok(None);
    }

    let content = fs_err::read_to_string(&path).map_err(|e| e.to_string())?;
    Ok(Some(HtmlPage::new(content, final_url, link.is_trusted())))
}

/// Gets the Content-Type of the given URL using a HEAD request. Schemes that
/// don't speak HTTP have no content type to report.
async fn head_content_type(session: &dyn HtmlSession, url: &Url) -> Result<String, FetchError> {
    if !matches!(url.scheme(), "http" | "https" | "ftp" | "ftps") {
        return Ok(String::new());
    }

    let response = session.head(url).await?.error_for_status()?;
    Ok(response.content_type().to_owned())
}

fn handle_fail(req: &Requirement, link: &Link, error: &FetchError) {
    let reason = match error {
        FetchError::Http { status, .. } => format!("HTTP error {status}"),
        FetchError::Connection(detail) => format!("connection error: {detail}"),
        FetchError::Timeout => String::from("timed out"),
    };
    tracing::debug!("Could not fetch URL {link}: {reason}");
    let url = link.url();
    tracing::debug!("Will skip URL {url} when looking for download links for {req}");
}

#[cfg(test)]
mod test {
    use super::*;
    use async_trait::async_trait;
    use http::StatusCode;
    use std::str::FromStr;

    struct NoSession;

    #[async_trait]
    impl HtmlSession for NoSession {
        async fn get(&self, url: &Url, _headers: &HeaderMap) -> Result<SessionResponse, FetchError> {
            Err(FetchError::Http {
                status: StatusCode::NOT_FOUND,
                url: url.clone(),
            })
        }

        async fn head(&self, url: &Url) -> Result<SessionResponse, FetchError> {
            Err(FetchError::Http {
                status: StatusCode::NOT_FOUND,
                url: url.clone(),
            })
        }
    }

    fn req() -> Requirement {
        Requirement::new("foo".parse().unwrap())
    }

    #[tokio::test]
    async fn test_vcs_urls_are_rejected() {
        let link = Link::new(Url::from_str("git+https://example.com/foo.git").unwrap());
        assert!(fetch_page(&NoSession, &link, &req()).await.is_none());
    }

    #[tokio::test]
    async fn test_fetch_errors_are_swallowed() {
        let link = Link::new(Url::from_str("https://example.com/simple/foo/").unwrap());
        assert!(fetch_page(&NoSession, &link, &req()).await.is_none());
    }

    #[tokio::test]
    async fn test_local_directory_serves_its_index() {
        let dir = tempfile::tempdir().unwrap();
        fs_err::write(
            dir.path().join("index.html"),
            br#"<html><body><a href="foo-1.0.tar.gz">foo</a></body></html>"#,
        )
        .unwrap();

        let url = Url::from_directory_path(fs_err::canonicalize(dir.path()).unwrap()).unwrap();
        let link = Link::trusted(url);
        let page = fetch_page(&NoSession, &link, &req())
            .await
            .expect("directory should produce its index page");
        assert!(page.url().as_str().ends_with("/index.html"));
        assert_eq!(page.links().len(), 1);
    }

    #[tokio::test]
    async fn test_local_archive_file_is_not_a_page() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("foo-1.0.tar.gz");
        fs_err::write(&archive, b"not html").unwrap();

        let url = Url::from_file_path(fs_err::canonicalize(&archive).unwrap()).unwrap();
        let link = Link::trusted(url);
        assert!(fetch_page(&NoSession, &link, &req()).await.is_none());
    }

    #[tokio::test]
    async fn test_missing_local_index_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let url = Url::from_directory_path(fs_err::canonicalize(dir.path()).unwrap()).unwrap();
        let link = Link::trusted(url);
        assert!(fetch_page(&NoSession, &link, &req()).await.is_none());
    }
}

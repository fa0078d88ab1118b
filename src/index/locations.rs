//! Partitioning of search locations into archive files and HTML-serving URLs,
//! plus the insecure-transport warning for plain-http locations.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use url::Url;

/// The hostnames that are exempt from the insecure-transport warning.
const LOCAL_HOSTNAMES: &[&str] = &["localhost", "127.0.0.1"];

/// The secure schemes to suggest instead of an insecure one.
fn secure_alternatives(scheme: &str) -> &'static [&'static str] {
    match scheme {
        "http" => &["https"],
        _ => &[],
    }
}

/// Converts a local path into a `file://` URL, resolving relative paths
/// first.
pub(crate) fn path_to_url(path: &Path) -> Option<Url> {
    let absolute = if path.is_absolute() {
        path.to_owned()
    } else {
        fs_err::canonicalize(path).ok()?
    };
    Url::from_file_path(absolute).ok()
}

/// Converts a `file://` URL back into a path.
pub(crate) fn url_to_path(url: &Url) -> Option<PathBuf> {
    url.to_file_path().ok()
}

/// Turns a raw location string into a URL: already-URL strings parse as they
/// are, existing paths become `file://` URLs, anything else is dropped with a
/// warning.
pub(crate) fn location_to_url(location: &str) -> Option<Url> {
    if let Ok(url) = Url::parse(location) {
        return Some(url);
    }
    let path = Path::new(location);
    if path.exists() {
        return path_to_url(path);
    }
    tracing::warn!("Ignoring location {location}; not an existing path or a valid URL");
    None
}

fn sort_path(path: &Path, files: &mut Vec<Url>, urls: &mut Vec<Url>) {
    let Some(url) = path_to_url(path) else {
        return;
    };
    if mime_guess::from_path(path).first() == Some(mime::TEXT_HTML) {
        urls.push(url);
    } else {
        files.push(url);
    }
}

/// Sorts locations into "files" (archives) and "urls" (pages to fetch), and
/// returns the pair of lists `(files, urls)`.
///
/// Existing directories listed in `find_links` are expanded into their
/// entries, each classified by its guessed MIME type. `file://` URLs to
/// directories stay URLs and get their index page resolved at fetch time.
pub(crate) fn sort_locations(locations: &[String], find_links: &[String]) -> (Vec<Url>, Vec<Url>) {
    let mut files = Vec::new();
    let mut urls = Vec::new();

    for location in locations {
        let is_local_path = Path::new(location).exists();
        let is_file_url = location.starts_with("file:");
        let is_find_link = find_links.iter().any(|fl| fl == location);

        if is_local_path || is_file_url {
            let path = if is_local_path {
                PathBuf::from(location)
            } else {
                match Url::parse(location).ok().and_then(|url| url_to_path(&url)) {
                    Some(path) => path,
                    None => {
                        tracing::warn!("Ignoring unreadable file URL {location}");
                        continue;
                    }
                }
            };
            if is_find_link && path.is_dir() {
                let path = fs_err::canonicalize(&path).unwrap_or(path);
                let Ok(entries) = fs_err::read_dir(&path) else {
                    continue;
                };
                for entry in entries.flatten() {
                    sort_path(&entry.path(), &mut files, &mut urls);
                }
            } else if is_file_url && path.is_dir() {
                if let Ok(url) = Url::parse(location) {
                    urls.push(url);
                }
            } else if path.is_file() {
                sort_path(&path, &mut files, &mut urls);
            }
        } else if let Some(url) = location_to_url(location) {
            urls.push(url);
        }
    }

    (files, urls)
}

/// Warns when a location uses an insecure transport scheme, once per distinct
/// (scheme, host) pair per search. Local hosts are not a risk and stay quiet.
/// Returns whether a warning was emitted.
pub(crate) fn warn_insecure_transport(url: &Url, warned: &mut HashSet<(String, String)>) -> bool {
    let scheme = url.scheme();
    let secure_schemes = secure_alternatives(scheme);
    if secure_schemes.is_empty() {
        return false;
    }

    let host = url.host_str().unwrap_or("");
    if LOCAL_HOSTNAMES.contains(&host) {
        return false;
    }
    if !warned.insert((scheme.to_owned(), host.to_owned())) {
        return false;
    }

    let secure = secure_schemes.join(", ");
    tracing::warn!(
        "{url} uses an insecure transport scheme ({scheme}). Consider using {secure} if {host} \
         has it available"
    );
    true
}

#[cfg(test)]
mod test {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_sort_locations_expands_find_links_directories() {
        let dir = tempfile::tempdir().unwrap();
        fs_err::write(dir.path().join("foo-1.0.tar.gz"), b"sdist").unwrap();
        fs_err::write(dir.path().join("index.html"), b"<html></html>").unwrap();

        let location = dir.path().to_str().unwrap().to_owned();
        let (files, urls) = sort_locations(&[location.clone()], &[location]);

        assert_eq!(files.len(), 1);
        assert!(files[0].path().ends_with("foo-1.0.tar.gz"));
        assert_eq!(urls.len(), 1);
        assert!(urls[0].path().ends_with("index.html"));
    }

    #[test]
    fn test_directory_not_in_find_links_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        fs_err::write(dir.path().join("foo-1.0.tar.gz"), b"sdist").unwrap();

        let location = dir.path().to_str().unwrap().to_owned();
        let (files, urls) = sort_locations(&[location], &[]);
        assert!(files.is_empty());
        assert!(urls.is_empty());
    }

    #[test]
    fn test_file_url_directory_stays_a_url() {
        let dir = tempfile::tempdir().unwrap();
        let url = Url::from_directory_path(fs_err::canonicalize(dir.path()).unwrap()).unwrap();
        let (files, urls) = sort_locations(&[url.to_string()], &[]);
        assert!(files.is_empty());
        assert_eq!(urls, vec![url]);
    }

    #[test]
    fn test_remote_urls_pass_through() {
        let (files, urls) = sort_locations(&["https://example.com/simple/foo/".to_owned()], &[]);
        assert!(files.is_empty());
        assert_eq!(urls[0].as_str(), "https://example.com/simple/foo/");
    }

    #[test]
    fn test_insecure_warning_once_per_host() {
        let mut warned = HashSet::new();
        let insecure = Url::from_str("http://example.com/simple/foo/").unwrap();
        assert!(warn_insecure_transport(&insecure, &mut warned));
        let same_host = Url::from_str("http://example.com/simple/bar/").unwrap();
        assert!(!warn_insecure_transport(&same_host, &mut warned));
        let other_host = Url::from_str("http://mirror.example.com/simple/foo/").unwrap();
        assert!(warn_insecure_transport(&other_host, &mut warned));

        let local = Url::from_str("http://localhost:8000/simple/foo/").unwrap();
        assert!(!warn_insecure_transport(&local, &mut warned));
        let secure = Url::from_str("https://example.com/simple/foo/").unwrap();
        assert!(!warn_insecure_transport(&secure, &mut warned));
    }
}

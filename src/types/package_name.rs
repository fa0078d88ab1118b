use miette::Diagnostic;
use regex::Regex;
use serde_with::{DeserializeFromStr, SerializeDisplay};
use std::borrow::Borrow;
use std::cmp::Ordering;
use std::fmt::{Display, Formatter};
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use std::sync::OnceLock;
use thiserror::Error;

/// Lowercases a name and collapses every run of `-`, `_` and `.` into a
/// single dash, the normalization used for every name comparison in the
/// finder: the allow-lists, wheel distribution matching and the
/// case-insensitive rediscovery of index URL names.
///
/// Unlike [`NormalizedPackageName`] this accepts arbitrary input, which
/// matters when the string being compared is an anchor basename scraped from
/// an index page rather than a known-valid project name.
pub fn normalize_name(name: &str) -> String {
    static SEPARATORS: OnceLock<Regex> = OnceLock::new();
    let separators = SEPARATORS.get_or_init(|| Regex::new(r"[-_.]+").unwrap());
    separators.replace_all(name, "-").to_lowercase()
}

/// A python project name as the user (or an artifact filename) spelled it,
/// paired with its normal form.
///
/// Identity is always the normal form: two spellings of the same project
/// compare, hash and sort as equal. The original spelling is kept around
/// because index page URLs are built from it.
#[derive(Debug, Clone, SerializeDisplay, DeserializeFromStr)]
pub struct PackageName {
    source: Box<str>,
    normalized: NormalizedPackageName,
}

impl PackageName {
    /// The spelling this name was created from.
    pub fn as_source_str(&self) -> &str {
        &self.source
    }

    /// The normal form, as a string.
    pub fn as_str(&self) -> &str {
        self.normalized.as_str()
    }

    /// The normal form.
    pub fn normalized(&self) -> &NormalizedPackageName {
        &self.normalized
    }
}

/// Error when parsing a package name
#[derive(Debug, Clone, Error, Diagnostic)]
pub enum ParsePackageNameError {
    /// The string is not a valid project name: names consist of ASCII
    /// letters, digits, `.`, `_` and `-`, and must start and end with a
    /// letter or digit.
    #[error("invalid package name '{0}'")]
    InvalidPackageName(String),
}

impl FromStr for PackageName {
    type Err = ParsePackageNameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // https://packaging.python.org/specifications/core-metadata/#name
        let interior_ok = s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
        let edges_ok = s.chars().next().map_or(false, |c| c.is_ascii_alphanumeric())
            && s.chars().next_back().map_or(false, |c| c.is_ascii_alphanumeric());
        if !interior_ok || !edges_ok {
            return Err(ParsePackageNameError::InvalidPackageName(s.into()));
        }

        Ok(PackageName {
            source: s.into(),
            normalized: NormalizedPackageName(normalize_name(s).into_boxed_str()),
        })
    }
}

impl Hash for PackageName {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.normalized.hash(state)
    }
}

impl PartialEq for PackageName {
    fn eq(&self, other: &Self) -> bool {
        self.normalized == other.normalized
    }
}

impl Eq for PackageName {}

impl PartialOrd for PackageName {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PackageName {
    fn cmp(&self, other: &Self) -> Ordering {
        self.normalized.cmp(&other.normalized)
    }
}

impl Display for PackageName {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.source)
    }
}

/// A name that is already in normal form: lowercase, with every run of `-`,
/// `_` and `.` collapsed to one dash (the identity under [`normalize_name`]).
/// This is the key type of the allow-lists.
#[derive(
    Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, SerializeDisplay, DeserializeFromStr,
)]
pub struct NormalizedPackageName(Box<str>);

impl NormalizedPackageName {
    /// Returns a string reference
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<PackageName> for NormalizedPackageName {
    fn from(name: PackageName) -> Self {
        name.normalized
    }
}

impl From<NormalizedPackageName> for PackageName {
    fn from(normalized: NormalizedPackageName) -> Self {
        PackageName {
            source: normalized.0.clone(),
            normalized,
        }
    }
}

impl Display for NormalizedPackageName {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for NormalizedPackageName {
    type Err = ParsePackageNameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PackageName::from_str(s).map(Self::from)
    }
}

impl Borrow<str> for NormalizedPackageName {
    fn borrow(&self) -> &str {
        self.as_str()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_identity_is_the_normal_form() {
        let typed: PackageName = "Twisted_Web".parse().unwrap();
        assert_eq!(typed.as_source_str(), "Twisted_Web");
        assert_eq!(typed.as_str(), "twisted-web");
        assert_eq!(typed.to_string(), "Twisted_Web");

        let listed: PackageName = "twisted.web".parse().unwrap();
        assert_eq!(typed, listed);
        assert_eq!(typed.normalized(), listed.normalized());

        let longer: PackageName = "twisted-webs".parse().unwrap();
        assert_ne!(typed, longer);
        assert!(typed < longer);
    }

    #[test]
    fn test_normal_form_round_trips() {
        let name: PackageName = "Pillow".parse().unwrap();
        let normalized = NormalizedPackageName::from(name);
        assert_eq!(normalized.as_str(), "pillow");

        let back = PackageName::from(normalized);
        assert_eq!(back.as_source_str(), "pillow");
    }

    #[test]
    fn test_normalize_collapses_runs() {
        assert_eq!(normalize_name("foo-_.bar"), "foo-bar");
        assert_eq!(normalize_name("FOO..BAR"), "foo-bar");
        // Arbitrary strings pass through; only separators and case change.
        assert_eq!(normalize_name("0-._.-0"), "0-0");
    }

    #[test]
    fn test_invalid_names_rejected() {
        assert!(PackageName::from_str("").is_err());
        assert!(PackageName::from_str("-foo").is_err());
        assert!(PackageName::from_str("foo-").is_err());
        assert!(PackageName::from_str("foo bar").is_err());
        assert!(PackageName::from_str("héllo").is_err());

        assert!(PackageName::from_str("a").is_ok());
        assert!(PackageName::from_str("8080").is_ok());
    }
}

//! Everything that talks to package indexes: the HTTP session boundary, HTML
//! page parsing, location handling, the per-link filter and the finder that
//! ties them together.

mod filter;
mod finder;
mod found;
pub mod html;
mod locations;
mod outdated;
mod pages;
mod session;

pub use finder::{FindRequirementError, PackageFinder, PackageFinderBuilder};
pub use found::{FoundLink, FoundVersion};
pub use html::{clean_link, HtmlPage};
pub use outdated::{find_packages_latest_versions, LatestVersion};
pub use session::{FetchError, HtmlSession, SessionResponse};

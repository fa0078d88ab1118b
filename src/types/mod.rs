//! The vocabulary types of the finder: package names, artifact filenames,
//! links and requirements.

mod artifact_name;

mod package_name;

mod link;

mod requirement;

pub use artifact_name::{InvalidWheelFilename, WheelFilename, WHEEL_EXT};

pub use package_name::{
    normalize_name, NormalizedPackageName, PackageName, ParsePackageNameError,
};

pub use link::{Link, LinkOrigin, PageOrigin};

pub use requirement::{
    requirement_from_url, InstalledDistribution, Requirement, RequirementError,
};

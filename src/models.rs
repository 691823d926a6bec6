//! Core value types shared across the crate.
//!
//! Defines dataset identities, host classes, read locations and the
//! resolved-path record handed out by the resolver.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Ordered tuple of short tokens naming one dataset variant,
/// e.g. `ESA_CCI_SM / v061 / COMBINED`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DatasetId(Vec<String>);

impl DatasetId {
    pub fn new<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(tokens.into_iter().map(Into::into).collect())
    }

    pub fn tokens(&self) -> &[String] {
        &self.0
    }

    /// First token, the product name (`ESA_CCI_SM`, `ERA5`, ...).
    pub fn product(&self) -> &str {
        self.0.first().map(String::as_str).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Underscore-joined form used to qualify file names.
    pub fn slug(&self) -> String {
        self.0.join("_")
    }
}

impl fmt::Display for DatasetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join("/"))
    }
}

impl From<&[&str]> for DatasetId {
    fn from(tokens: &[&str]) -> Self {
        Self::new(tokens.iter().copied())
    }
}

impl<const N: usize> From<[&str; N]> for DatasetId {
    fn from(tokens: [&str; N]) -> Self {
        Self::new(tokens)
    }
}

impl From<Vec<String>> for DatasetId {
    fn from(tokens: Vec<String>) -> Self {
        Self(tokens)
    }
}

/// What a caller hands to a reader constructor: a registered identity or a
/// raw directory that bypasses the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatasetSource {
    Id(DatasetId),
    Path(PathBuf),
}

impl DatasetSource {
    /// Name used in logs and error messages.
    pub fn label(&self) -> String {
        match self {
            DatasetSource::Id(id) => id.to_string(),
            DatasetSource::Path(path) => path.display().to_string(),
        }
    }
}

impl From<DatasetId> for DatasetSource {
    fn from(id: DatasetId) -> Self {
        DatasetSource::Id(id)
    }
}

impl From<PathBuf> for DatasetSource {
    fn from(path: PathBuf) -> Self {
        DatasetSource::Path(path)
    }
}

/// Host classes distinguished by path configurations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HostClass {
    Win,
    Lin,
}

impl HostClass {
    /// `Win` on Windows, `Lin` everywhere else.
    pub fn detect() -> Self {
        if cfg!(windows) {
            HostClass::Win
        } else {
            HostClass::Lin
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HostClass::Win => "win",
            HostClass::Lin => "lin",
        }
    }
}

/// Where to read: geographic coordinates or a grid point index.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Location {
    LonLat { lon: f64, lat: f64 },
    Gpi(u64),
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::LonLat { lon, lat } => write!(f, "lon={}, lat={}", lon, lat),
            Location::Gpi(gpi) => write!(f, "gpi={}", gpi),
        }
    }
}

/// Directory chosen for a dataset on this host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPath {
    pub path: PathBuf,
    /// Path group the directory came from; `None` for raw paths.
    pub group: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_structural_equality() {
        let a = DatasetId::from(["ESA_CCI_SM", "v061", "COMBINED"]);
        let b = DatasetId::new(vec!["ESA_CCI_SM".to_string(), "v061".into(), "COMBINED".into()]);
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "ESA_CCI_SM/v061/COMBINED");
        assert_eq!(a.slug(), "ESA_CCI_SM_v061_COMBINED");
        assert_eq!(a.product(), "ESA_CCI_SM");
    }

    #[test]
    fn test_identity_deserializes_from_list() {
        let id: DatasetId = serde_yaml::from_str("[ERA5, v20190613, swvl1]").unwrap();
        assert_eq!(id, DatasetId::from(["ERA5", "v20190613", "swvl1"]));
    }

    #[test]
    fn test_host_class_matches_platform() {
        let host = HostClass::detect();
        if cfg!(windows) {
            assert_eq!(host.as_str(), "win");
        } else {
            assert_eq!(host.as_str(), "lin");
        }
    }
}

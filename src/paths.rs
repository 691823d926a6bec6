//! Path configurations and the resolver that picks one directory per host.
//!
//! A [`PathConfig`] is an ordered list of named path groups (`local`,
//! `radar`, `climers`, `__test`, ...). Each group maps host classes to an
//! optional absolute path. Resolution walks the groups in declaration order
//! and returns the first directory that exists on this machine.

use crate::constants::TEST_PATH_GROUP;
use crate::error::{Result, SmError};
use crate::models::{DatasetId, DatasetSource, HostClass, ResolvedPath};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Candidate paths of one group, per host class.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostPaths {
    pub win: Option<String>,
    pub lin: Option<String>,
}

impl HostPaths {
    pub fn new(win: Option<&str>, lin: Option<&str>) -> Self {
        Self {
            win: win.map(str::to_string),
            lin: lin.map(str::to_string),
        }
    }

    /// Same path on every host, used for the bundled fixtures.
    pub fn everywhere(path: &str) -> Self {
        Self::new(Some(path), Some(path))
    }

    pub fn for_host(&self, host: HostClass) -> Option<&str> {
        match host {
            HostClass::Win => self.win.as_deref(),
            HostClass::Lin => self.lin.as_deref(),
        }
    }
}

/// Ordered mapping from path-group name to [`HostPaths`].
///
/// Order is preference order, so this is a list and not a hash map.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathConfig {
    groups: Vec<(String, HostPaths)>,
}

impl PathConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a group; a group declared twice keeps its first position and
    /// takes the later paths.
    pub fn with_group(mut self, name: impl Into<String>, paths: HostPaths) -> Self {
        let name = name.into();
        match self.groups.iter_mut().find(|(n, _)| *n == name) {
            Some((_, existing)) => *existing = paths,
            None => self.groups.push((name, paths)),
        }
        self
    }

    pub fn group(&self, name: &str) -> Option<&HostPaths> {
        self.groups
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, paths)| paths)
    }

    pub fn group_names(&self) -> Vec<&str> {
        self.groups.iter().map(|(n, _)| n.as_str()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &HostPaths)> {
        self.groups.iter().map(|(n, p)| (n.as_str(), p))
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

/// Options steering [`resolve`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolveOptions {
    /// Only consult this group.
    pub force_path_group: Option<String>,
    /// Groups skipped during the ordered scan.
    pub ignore_path_groups: Vec<String>,
}

impl Default for ResolveOptions {
    fn default() -> Self {
        Self {
            force_path_group: None,
            ignore_path_groups: vec![TEST_PATH_GROUP.to_string()],
        }
    }
}

impl ResolveOptions {
    pub fn with_force_path_group(mut self, group: impl Into<String>) -> Self {
        self.force_path_group = Some(group.into());
        self
    }

    pub fn with_ignore_path_groups(mut self, groups: Vec<String>) -> Self {
        self.ignore_path_groups = groups;
        self
    }
}

/// Expand a leading `~` to the user's home directory.
///
/// Falls back to `/home/$USER` when no home directory can be determined.
pub fn expand_user(path: &str) -> PathBuf {
    let rest = match path.strip_prefix('~') {
        Some(rest) if rest.is_empty() || rest.starts_with('/') || rest.starts_with('\\') => rest,
        _ => return PathBuf::from(path),
    };

    let home = dirs::home_dir().or_else(|| {
        std::env::var("USER")
            .ok()
            .map(|user| PathBuf::from("/home").join(user))
    });

    match home {
        Some(home) => {
            let rest = rest.trim_start_matches(['/', '\\']);
            if rest.is_empty() {
                home
            } else {
                home.join(rest)
            }
        }
        None => PathBuf::from(path),
    }
}

/// Resolve a dataset source on the current host.
///
/// Raw paths only need to exist; identities are resolved through `config`.
pub fn resolve_source(
    source: &DatasetSource,
    config: Option<&PathConfig>,
    options: &ResolveOptions,
) -> Result<ResolvedPath> {
    match source {
        DatasetSource::Path(path) => {
            let expanded = expand_user(&path.to_string_lossy());
            if expanded.is_dir() {
                Ok(ResolvedPath {
                    path: expanded,
                    group: None,
                })
            } else {
                Err(SmError::PathNotFound {
                    dataset: path.display().to_string(),
                    attempted: vec![expanded],
                })
            }
        }
        DatasetSource::Id(id) => {
            let config = config.ok_or_else(|| {
                SmError::config_not_found("path configuration", Some(id.to_string()))
            })?;
            resolve(id, config, options)
        }
    }
}

/// Resolve `id` on the host this process runs on.
pub fn resolve(id: &DatasetId, config: &PathConfig, options: &ResolveOptions) -> Result<ResolvedPath> {
    resolve_for_host(id, config, options, HostClass::detect())
}

/// Resolve `id` for an explicit host class.
pub fn resolve_for_host(
    id: &DatasetId,
    config: &PathConfig,
    options: &ResolveOptions,
    host: HostClass,
) -> Result<ResolvedPath> {
    if let Some(forced) = &options.force_path_group {
        let paths = config.group(forced).ok_or_else(|| {
            SmError::config_not_found(format!("path group '{}'", forced), Some(id.to_string()))
        })?;

        return match paths.for_host(host).map(expand_user) {
            Some(path) if path.is_dir() => {
                debug!("Dataset {} resolved via forced group '{}': {}", id, forced, path.display());
                Ok(ResolvedPath {
                    path,
                    group: Some(forced.clone()),
                })
            }
            other => Err(SmError::PathNotFound {
                dataset: id.to_string(),
                attempted: other.into_iter().collect(),
            }),
        };
    }

    let mut attempted = Vec::new();
    for (name, paths) in config.iter() {
        if options.ignore_path_groups.iter().any(|g| g == name) {
            debug!("Skipping ignored path group '{}' for {}", name, id);
            continue;
        }

        let Some(raw) = paths.for_host(host) else {
            continue;
        };

        let path = expand_user(raw);
        if is_existing_dir(&path) {
            debug!("Dataset {} resolved via group '{}': {}", id, name, path.display());
            return Ok(ResolvedPath {
                path,
                group: Some(name.to_string()),
            });
        }

        debug!("Group '{}' for {} does not exist: {}", name, id, path.display());
        attempted.push(path);
    }

    Err(SmError::PathNotFound {
        dataset: id.to_string(),
        attempted,
    })
}

fn is_existing_dir(path: &Path) -> bool {
    path.is_dir()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn cci_id() -> DatasetId {
        DatasetId::from(["ESA_CCI_SM", "v061", "COMBINED"])
    }

    fn config_with(local: &Path, climers: &Path, test: &Path) -> PathConfig {
        PathConfig::new()
            .with_group("local", HostPaths::everywhere(&local.to_string_lossy()))
            .with_group("climers", HostPaths::everywhere(&climers.to_string_lossy()))
            .with_group(TEST_PATH_GROUP, HostPaths::everywhere(&test.to_string_lossy()))
    }

    #[test]
    fn test_ordered_scan_skips_missing_and_test_group() {
        let tmp = TempDir::new().unwrap();
        let climers = tmp.path().join("climers/combined");
        let test = tmp.path().join("tests/combined");
        fs::create_dir_all(&climers).unwrap();
        fs::create_dir_all(&test).unwrap();

        let config = config_with(&tmp.path().join("missing"), &climers, &test);
        let resolved = resolve(&cci_id(), &config, &ResolveOptions::default()).unwrap();

        assert_eq!(resolved.path, climers);
        assert_eq!(resolved.group.as_deref(), Some("climers"));
    }

    #[test]
    fn test_forced_test_group() {
        let tmp = TempDir::new().unwrap();
        let climers = tmp.path().join("climers");
        let test = tmp.path().join("test");
        fs::create_dir_all(&climers).unwrap();
        fs::create_dir_all(&test).unwrap();

        let config = config_with(&tmp.path().join("missing"), &climers, &test);
        let options = ResolveOptions::default().with_force_path_group(TEST_PATH_GROUP);
        let resolved = resolve(&cci_id(), &config, &options).unwrap();
        assert_eq!(resolved.path, test);
    }

    #[test]
    fn test_forced_group_missing_directory() {
        let tmp = TempDir::new().unwrap();
        let config = config_with(
            &tmp.path().join("a"),
            &tmp.path().join("b"),
            &tmp.path().join("c"),
        );
        let options = ResolveOptions::default().with_force_path_group(TEST_PATH_GROUP);
        match resolve(&cci_id(), &config, &options) {
            Err(SmError::PathNotFound { attempted, .. }) => {
                assert_eq!(attempted, vec![tmp.path().join("c")]);
            }
            other => panic!("Expected PathNotFound, got {:?}", other),
        }
    }

    #[test]
    fn test_forced_unknown_group() {
        let config = PathConfig::new().with_group("local", HostPaths::everywhere("/nowhere"));
        let options = ResolveOptions::default().with_force_path_group("radar");
        assert!(matches!(
            resolve(&cci_id(), &config, &options),
            Err(SmError::ConfigNotFound { .. })
        ));
    }

    #[test]
    fn test_null_host_path_is_skipped() {
        let tmp = TempDir::new().unwrap();
        let config = PathConfig::new()
            .with_group("radar", HostPaths::new(Some("R:\\data"), None))
            .with_group("local", HostPaths::everywhere(&tmp.path().to_string_lossy()));
        let resolved =
            resolve_for_host(&cci_id(), &config, &ResolveOptions::default(), HostClass::Lin)
                .unwrap();
        assert_eq!(resolved.group.as_deref(), Some("local"));
    }

    #[test]
    fn test_nothing_resolves() {
        let config = PathConfig::new().with_group("local", HostPaths::everywhere("/definitely/not/here"));
        match resolve(&cci_id(), &config, &ResolveOptions::default()) {
            Err(SmError::PathNotFound { dataset, attempted }) => {
                assert_eq!(dataset, "ESA_CCI_SM/v061/COMBINED");
                assert_eq!(attempted.len(), 1);
            }
            other => panic!("Expected PathNotFound, got {:?}", other),
        }
    }

    #[test]
    fn test_raw_path_source() {
        let tmp = TempDir::new().unwrap();
        let source = DatasetSource::Path(tmp.path().to_path_buf());
        let resolved = resolve_source(&source, None, &ResolveOptions::default()).unwrap();
        assert_eq!(resolved.path, tmp.path());
        assert!(resolved.group.is_none());

        let missing = DatasetSource::Path(tmp.path().join("nope"));
        assert!(resolve_source(&missing, None, &ResolveOptions::default()).is_err());
    }

    #[test]
    fn test_group_order_is_declaration_order() {
        let config = PathConfig::new()
            .with_group("local", HostPaths::default())
            .with_group("radar", HostPaths::default())
            .with_group("local", HostPaths::everywhere("/x"));
        assert_eq!(config.group_names(), vec!["local", "radar"]);
        assert_eq!(config.group("local").unwrap().lin.as_deref(), Some("/x"));
    }

    #[test]
    fn test_expand_user() {
        assert_eq!(expand_user("/abs/path"), PathBuf::from("/abs/path"));
        assert_eq!(expand_user("~user/x"), PathBuf::from("~user/x"));
        let expanded = expand_user("~/data");
        assert!(expanded.ends_with("data"));
        assert!(!expanded.to_string_lossy().starts_with('~'));
    }
}

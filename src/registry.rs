//! Dataset registry: identity → (path configuration, reader family).
//!
//! Datasets are declared with [`RegistryBuilder::register`] and the table
//! is sealed with [`RegistryBuilder::finalize`], which cross-checks every
//! family's implemented identities against the declared path settings.
//! The sealed [`Registry`] is immutable and safe to share between threads.

use crate::error::{Result, SmError};
use crate::models::{DatasetId, DatasetSource, ResolvedPath};
use crate::paths::{PathConfig, ResolveOptions, resolve_source};
use crate::products::ProductSpec;
use crate::settings;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::OnceLock;
use tracing::{debug, info};

/// Everything the registry knows about one dataset.
#[derive(Debug, Clone)]
pub struct RegistryEntry {
    pub id: DatasetId,
    pub paths: PathConfig,
    pub product: &'static ProductSpec,
}

/// Collects registrations until [`finalize`](Self::finalize).
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    entries: BTreeMap<DatasetId, RegistryEntry>,
    families: Vec<&'static ProductSpec>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a family without registering any path for it.
    pub fn declare_family(&mut self, product: &'static ProductSpec) {
        if !self.families.iter().any(|f| std::ptr::eq(*f, product)) {
            self.families.push(product);
        }
    }

    /// Register one dataset.
    ///
    /// # Errors
    /// * `SmError::DuplicateDataset` if the identity is already registered
    pub fn register(
        &mut self,
        id: DatasetId,
        paths: PathConfig,
        product: &'static ProductSpec,
    ) -> Result<()> {
        if self.entries.contains_key(&id) {
            return Err(SmError::DuplicateDataset {
                dataset: id.to_string(),
            });
        }
        self.declare_family(product);
        self.entries.insert(id.clone(), RegistryEntry { id, paths, product });
        Ok(())
    }

    /// Seal the registry.
    ///
    /// For every declared family the set of registered identities must equal
    /// the family's implemented set. A family implementing nothing must not
    /// have any registered identity either.
    ///
    /// # Errors
    /// * `SmError::RegistryMismatch` naming the first inconsistent family
    pub fn finalize(self) -> Result<Registry> {
        for family in &self.families {
            let registered: BTreeSet<&DatasetId> = self
                .entries
                .values()
                .filter(|e| std::ptr::eq(e.product, *family))
                .map(|e| &e.id)
                .collect();
            let implemented = family.implemented_ids();
            let implemented: BTreeSet<&DatasetId> = implemented.iter().collect();

            let missing: Vec<String> = implemented
                .difference(&registered)
                .map(|id| id.to_string())
                .collect();
            let unexpected: Vec<String> = registered
                .difference(&implemented)
                .map(|id| id.to_string())
                .collect();

            if !missing.is_empty() || !unexpected.is_empty() {
                return Err(SmError::RegistryMismatch {
                    family: family.family.to_string(),
                    missing,
                    unexpected,
                });
            }
            debug!("Family {} consistent ({} datasets)", family.family, registered.len());
        }

        info!(
            "Registry finalized: {} datasets in {} families",
            self.entries.len(),
            self.families.len()
        );
        Ok(Registry {
            entries: self.entries,
            families: self.families,
        })
    }
}

/// Sealed, read-only dataset registry.
#[derive(Debug, Clone)]
pub struct Registry {
    entries: BTreeMap<DatasetId, RegistryEntry>,
    families: Vec<&'static ProductSpec>,
}

impl Registry {
    /// Registry of every built-in family and its declared path settings.
    pub fn builtin() -> Result<Self> {
        let mut builder = RegistryBuilder::new();
        for (product, seeds) in settings::builtin() {
            builder.declare_family(product);
            for (id, paths) in seeds {
                builder.register(id, paths, product)?;
            }
        }
        builder.finalize()
    }

    /// Look up a dataset.
    ///
    /// # Errors
    /// * `SmError::ConfigNotFound` for unknown identities
    pub fn get(&self, id: &DatasetId) -> Result<&RegistryEntry> {
        self.entries.get(id).ok_or_else(|| {
            SmError::config_not_found("dataset identity", Some(id.to_string()))
        })
    }

    pub fn contains(&self, id: &DatasetId) -> bool {
        self.entries.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Registered identities in sorted order.
    pub fn ids(&self) -> impl Iterator<Item = &DatasetId> {
        self.entries.keys()
    }

    pub fn entries(&self) -> impl Iterator<Item = &RegistryEntry> {
        self.entries.values()
    }

    pub fn families(&self) -> &[&'static ProductSpec] {
        &self.families
    }

    /// Identities whose first token equals `product`.
    pub fn find_by_product(&self, product: &str) -> Vec<&DatasetId> {
        self.entries
            .keys()
            .filter(|id| id.product().eq_ignore_ascii_case(product))
            .collect()
    }

    /// Resolve a source on this host using the registered path configuration.
    pub fn resolve(&self, source: &DatasetSource, options: &ResolveOptions) -> Result<ResolvedPath> {
        match source {
            DatasetSource::Id(id) => resolve_source(source, Some(&self.get(id)?.paths), options),
            DatasetSource::Path(_) => resolve_source(source, None, options),
        }
    }
}

static GLOBAL: OnceLock<Result<Registry>> = OnceLock::new();

/// Process-wide built-in registry, built on first use.
///
/// # Errors
/// * `SmError::RegistryMismatch` or `SmError::DuplicateDataset` when the
///   built-in tables are inconsistent; every call reports the same error
pub fn global() -> Result<&'static Registry> {
    GLOBAL
        .get_or_init(Registry::builtin)
        .as_ref()
        .map_err(replay_build_error)
}

/// Copy of a stored registry build error with the same kind.
fn replay_build_error(error: &SmError) -> SmError {
    match error {
        SmError::RegistryMismatch {
            family,
            missing,
            unexpected,
        } => SmError::RegistryMismatch {
            family: family.clone(),
            missing: missing.clone(),
            unexpected: unexpected.clone(),
        },
        SmError::DuplicateDataset { dataset } => SmError::DuplicateDataset {
            dataset: dataset.clone(),
        },
        other => SmError::unsupported(format!("built-in registry: {}", other), None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::paths::HostPaths;
    use crate::products::{ERA5, ESA_CCI_SM, families};
    use std::fs;
    use tempfile::TempDir;

    static EMPTY_FAMILY: ProductSpec = ProductSpec {
        family: "PLANNED",
        implemented: &[],
        fill_values: &[],
        default_parameters: &[],
        flag_columns: &[],
        exact_index: None,
    };

    fn era5_builder() -> RegistryBuilder {
        let mut builder = RegistryBuilder::new();
        for id in ERA5.implemented_ids() {
            builder.register(id, PathConfig::new(), &ERA5).unwrap();
        }
        builder
    }

    #[test]
    fn test_builtin_registry_is_consistent() {
        let registry = Registry::builtin().unwrap();
        let expected: usize = families().iter().map(|f| f.implemented.len()).sum();
        assert_eq!(registry.len(), expected);
        for family in families() {
            for id in family.implemented_ids() {
                let entry = registry.get(&id).unwrap();
                assert!(std::ptr::eq(entry.product, family));
            }
        }
    }

    #[test]
    fn test_global_registry() {
        let registry = global().unwrap();
        assert!(registry.contains(&DatasetId::from(["ESA_CCI_SM", "v061", "COMBINED"])));
    }

    #[test]
    fn test_build_errors_keep_their_kind() {
        let mut builder = era5_builder();
        let err = builder
            .register(DatasetId::from(["ERA5", "v20190613"]), PathConfig::new(), &ERA5)
            .unwrap_err();
        assert!(matches!(
            replay_build_error(&err),
            SmError::DuplicateDataset { dataset } if dataset == "ERA5/v20190613"
        ));

        let mismatch = SmError::RegistryMismatch {
            family: "ERA5".to_string(),
            missing: vec!["ERA5_LAND v20190904".to_string()],
            unexpected: Vec::new(),
        };
        match replay_build_error(&mismatch) {
            SmError::RegistryMismatch { family, missing, .. } => {
                assert_eq!(family, "ERA5");
                assert_eq!(missing, vec!["ERA5_LAND v20190904".to_string()]);
            }
            other => panic!("Expected RegistryMismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_registration_detected() {
        let mut builder = RegistryBuilder::new();
        builder
            .register(DatasetId::from(["ERA5", "v20190613"]), PathConfig::new(), &ERA5)
            .unwrap();

        match builder.finalize().unwrap_err() {
            SmError::RegistryMismatch { family, missing, unexpected } => {
                assert_eq!(family, "ERA5");
                assert_eq!(missing, vec!["ERA5_LAND/v20190904".to_string()]);
                assert!(unexpected.is_empty());
            }
            other => panic!("Expected RegistryMismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_unexpected_registration_detected() {
        let mut builder = era5_builder();
        builder
            .register(DatasetId::from(["ERA5", "v99"]), PathConfig::new(), &ERA5)
            .unwrap();

        match builder.finalize().unwrap_err() {
            SmError::RegistryMismatch { unexpected, .. } => {
                assert_eq!(unexpected, vec!["ERA5/v99".to_string()]);
            }
            other => panic!("Expected RegistryMismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_empty_family() {
        let mut builder = era5_builder();
        builder.declare_family(&EMPTY_FAMILY);
        assert!(builder.finalize().is_ok());

        let mut builder = era5_builder();
        builder
            .register(DatasetId::from(["PLANNED", "v1"]), PathConfig::new(), &EMPTY_FAMILY)
            .unwrap();
        assert!(matches!(
            builder.finalize(),
            Err(SmError::RegistryMismatch { .. })
        ));
    }

    #[test]
    fn test_duplicate_registration() {
        let mut builder = era5_builder();
        let result = builder.register(
            DatasetId::from(["ERA5", "v20190613"]),
            PathConfig::new(),
            &ERA5,
        );
        assert!(matches!(result, Err(SmError::DuplicateDataset { .. })));
    }

    #[test]
    fn test_unknown_identity() {
        let registry = era5_builder().finalize().unwrap();
        match registry.get(&DatasetId::from(["ERA5", "v1"])).unwrap_err() {
            SmError::ConfigNotFound { dataset, .. } => {
                assert_eq!(dataset.as_deref(), Some("ERA5/v1"));
            }
            other => panic!("Expected ConfigNotFound, got {:?}", other),
        }
    }

    #[test]
    fn test_resolve_through_registry() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("era5");
        fs::create_dir_all(&dir).unwrap();

        let mut builder = RegistryBuilder::new();
        builder
            .register(
                DatasetId::from(["ERA5", "v20190613"]),
                PathConfig::new().with_group("local", HostPaths::everywhere(&dir.to_string_lossy())),
                &ERA5,
            )
            .unwrap();
        builder
            .register(DatasetId::from(["ERA5_LAND", "v20190904"]), PathConfig::new(), &ERA5)
            .unwrap();
        let registry = builder.finalize().unwrap();

        let source = DatasetSource::Id(DatasetId::from(["ERA5", "v20190613"]));
        let resolved = registry.resolve(&source, &ResolveOptions::default()).unwrap();
        assert_eq!(resolved.path, dir);
        assert_eq!(resolved.group.as_deref(), Some("local"));

        let land = DatasetSource::Id(DatasetId::from(["ERA5_LAND", "v20190904"]));
        assert!(matches!(
            registry.resolve(&land, &ResolveOptions::default()),
            Err(SmError::PathNotFound { .. })
        ));
    }

    #[test]
    fn test_find_by_product() {
        let registry = Registry::builtin().unwrap();
        assert_eq!(registry.find_by_product("esa_cci_sm").len(), ESA_CCI_SM.implemented.len());
        assert!(registry.find_by_product("NOPE").is_empty());
    }
}

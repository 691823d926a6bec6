//! Error handling for dataset resolution, reading and adaptation.
//!
//! Every failure carries the dataset identity (when one is known) and the
//! path(s) that were attempted so that a caller can tell which of many
//! configured datasets went wrong.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SmError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Polars error: {0}")]
    Polars(#[from] polars::error::PolarsError),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Not configured: {what}{}", fmt_dataset(.dataset))]
    ConfigNotFound {
        what: String,
        dataset: Option<String>,
    },

    #[error("No existing directory for dataset {dataset}; attempted: {}", fmt_paths(.attempted))]
    PathNotFound {
        dataset: String,
        attempted: Vec<PathBuf>,
    },

    #[error("Cannot convert '{value}' with tag <{tag}>: {reason}")]
    Conversion {
        tag: String,
        value: String,
        reason: String,
    },

    #[error("Invalid data in file: {path} - {reason}")]
    Format { path: PathBuf, reason: String },

    #[error("Unsupported: {feature}{}", fmt_dataset(.dataset))]
    Unsupported {
        feature: String,
        dataset: Option<String>,
    },

    #[error(
        "Registry mismatch for reader family {family}: missing paths for {missing:?}, unexpected paths for {unexpected:?}"
    )]
    RegistryMismatch {
        family: String,
        missing: Vec<String>,
        unexpected: Vec<String>,
    },

    #[error("Dataset {dataset} is registered more than once")]
    DuplicateDataset { dataset: String },

    #[error("Column '{column}' produced by more than one dataset; add a rename entry")]
    DuplicateColumn { column: String },

    #[error("Column '{column}' not found{}", fmt_dataset(.dataset))]
    ColumnNotFound {
        column: String,
        dataset: Option<String>,
    },

    #[error("Length mismatch for '{name}': expected {expected}, found {found}")]
    LengthMismatch {
        name: String,
        expected: usize,
        found: usize,
    },

    #[error("Invalid resampling frequency: {value}")]
    InvalidFrequency { value: String },

    #[error("Reader for {dataset} has been closed")]
    ReaderClosed { dataset: String },

    #[error("Worker task failed: {reason}")]
    Worker { reason: String },
}

fn fmt_dataset(dataset: &Option<String>) -> String {
    match dataset {
        Some(name) => format!(" (dataset {})", name),
        None => String::new(),
    }
}

fn fmt_paths(paths: &[PathBuf]) -> String {
    if paths.is_empty() {
        return "<none>".to_string();
    }
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

impl SmError {
    pub fn config_not_found(what: impl Into<String>, dataset: Option<String>) -> Self {
        Self::ConfigNotFound {
            what: what.into(),
            dataset,
        }
    }

    pub fn unsupported(feature: impl Into<String>, dataset: Option<String>) -> Self {
        Self::Unsupported {
            feature: feature.into(),
            dataset,
        }
    }

    pub fn format(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Format {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn column_not_found(column: impl Into<String>) -> Self {
        Self::ColumnNotFound {
            column: column.into(),
            dataset: None,
        }
    }

    /// True for failures that the multi-dataset reader may replace with an
    /// empty table when a dataset is configured to do so.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            SmError::PathNotFound { .. }
                | SmError::Io(_)
                | SmError::Format { .. }
                | SmError::Polars(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, SmError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_not_found_lists_attempts() {
        let err = SmError::PathNotFound {
            dataset: "ESA_CCI_SM/v061/COMBINED".to_string(),
            attempted: vec![PathBuf::from("/a"), PathBuf::from("/b")],
        };
        let msg = err.to_string();
        assert!(msg.contains("ESA_CCI_SM/v061/COMBINED"));
        assert!(msg.contains("/a, /b"));
    }

    #[test]
    fn test_config_not_found_without_dataset() {
        let err = SmError::config_not_found("path group 'nas'", None);
        assert_eq!(err.to_string(), "Not configured: path group 'nas'");
    }

    #[test]
    fn test_recoverable_kinds() {
        assert!(
            SmError::PathNotFound {
                dataset: "x".into(),
                attempted: vec![]
            }
            .is_recoverable()
        );
        assert!(!SmError::config_not_found("x", None).is_recoverable());
        assert!(!SmError::unsupported("exact index", None).is_recoverable());
    }
}

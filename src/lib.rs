//! Soil moisture dataset readers
//!
//! A Rust library for locating and reading per-location time series of
//! soil moisture and related land surface products stored as cell files.
//!
//! This library provides tools for:
//! - A registry of known dataset variants with per-host path groups
//! - Path resolution with forced and ignored groups
//! - Dataset readers that clean fill values and build exact timestamps
//! - Stackable adapters: masking, anomalies, column combination,
//!   preprocessing, renaming and resampling
//! - Joining several datasets into one table per location
//! - Tagged keyword-argument conversion for YAML job files
//! - Parallel reading of many locations with per-worker readers

pub mod config;
pub mod constants;
pub mod error;
pub mod format;
pub mod frame;
pub mod grid;
pub mod models;
pub mod multi;
pub mod paths;
pub mod pool;
pub mod products;
pub mod registry;
pub mod settings;
pub mod tags;

pub mod adapters;
pub mod readers;

// CLI modules
pub mod cli {
    pub mod args;
    pub mod commands;
}

// Re-export commonly used types
pub use config::JobConfig;
pub use error::{Result, SmError};
pub use frame::TimeSeriesFrame;
pub use models::{DatasetId, DatasetSource, Location};
pub use multi::{DatasetRequest, MultiDatasetReader, MultiReaderConfig, OnError};
pub use readers::{DatasetReader, ReaderOptions, TimeSeriesReader};
pub use registry::Registry;

//! The reader contract and the low-level dataset readers.
//!
//! Every reader, low level or adapter, implements [`TimeSeriesReader`]:
//! given a location it returns a [`TimeSeriesFrame`]. Adapters hold an
//! inner reader and forward the optional attributes (grid, parameters,
//! scale factors) so a stack of them still looks like the bottom reader.

pub mod dataset;

pub use dataset::{DatasetReader, ReaderState};

use crate::constants::DEFAULT_MAX_DIST_KM;
use crate::error::{Result, SmError};
use crate::format::CellFormat;
use crate::frame::TimeSeriesFrame;
use crate::grid::Grid;
use crate::models::Location;
use crate::paths::ResolveOptions;
use crate::tags::KwValue;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// A source of time series tables.
pub trait TimeSeriesReader: Send {
    /// Table for one location; empty when there is no data there.
    fn read(&mut self, location: Location) -> Result<TimeSeriesFrame>;

    fn read_lonlat(&mut self, lon: f64, lat: f64) -> Result<TimeSeriesFrame> {
        self.read(Location::LonLat { lon, lat })
    }

    fn read_gpi(&mut self, gpi: u64) -> Result<TimeSeriesFrame> {
        self.read(Location::Gpi(gpi))
    }

    /// Grid of the underlying dataset, if it has one.
    fn grid(&self) -> Option<&Grid> {
        None
    }

    /// Columns extracted on read; `None` means all.
    fn parameters(&self) -> Option<&[String]> {
        None
    }

    fn scale_factors(&self) -> Option<&HashMap<String, f64>> {
        None
    }

    /// Whether the index holds exact per-observation timestamps.
    fn exact_index(&self) -> bool {
        false
    }

    /// Quality flag and offset columns that are not measurements.
    fn auxiliary_columns(&self) -> Vec<String> {
        Vec::new()
    }

    /// Release open handles and caches. Further reads fail.
    fn close(&mut self) {}
}

impl<R: TimeSeriesReader + ?Sized> TimeSeriesReader for Box<R> {
    fn read(&mut self, location: Location) -> Result<TimeSeriesFrame> {
        (**self).read(location)
    }

    fn grid(&self) -> Option<&Grid> {
        (**self).grid()
    }

    fn parameters(&self) -> Option<&[String]> {
        (**self).parameters()
    }

    fn scale_factors(&self) -> Option<&HashMap<String, f64>> {
        (**self).scale_factors()
    }

    fn exact_index(&self) -> bool {
        (**self).exact_index()
    }

    fn auxiliary_columns(&self) -> Vec<String> {
        (**self).auxiliary_columns()
    }

    fn close(&mut self) {
        (**self).close()
    }
}

/// Construction options of a dataset reader.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReaderOptions {
    /// Only consult this path group.
    pub force_path_group: Option<String>,
    /// Groups skipped during resolution; `None` skips only the fixtures.
    pub ignore_path_groups: Option<Vec<String>>,
    /// Rebuild exact timestamps from the product's offset column.
    pub exact_index: bool,
    /// Columns to extract; `None` for all.
    pub parameters: Option<Vec<String>>,
    /// Keep whole cells in memory between reads.
    pub bulk: bool,
    /// Multiplier per column that fill values are scaled by.
    pub scale_factors: HashMap<String, f64>,
    /// Cell file format; detected from the directory when unset.
    pub cell_format: Option<CellFormat>,
    /// Search radius for coordinate lookups.
    pub max_dist_km: f64,
}

impl Default for ReaderOptions {
    fn default() -> Self {
        Self {
            force_path_group: None,
            ignore_path_groups: None,
            exact_index: false,
            parameters: None,
            bulk: false,
            scale_factors: HashMap::new(),
            cell_format: None,
            max_dist_km: DEFAULT_MAX_DIST_KM,
        }
    }
}

impl ReaderOptions {
    pub fn with_force_path_group(mut self, group: impl Into<String>) -> Self {
        self.force_path_group = Some(group.into());
        self
    }

    pub fn with_exact_index(mut self, exact_index: bool) -> Self {
        self.exact_index = exact_index;
        self
    }

    pub fn with_parameters<S: Into<String>>(mut self, parameters: impl IntoIterator<Item = S>) -> Self {
        self.parameters = Some(parameters.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_bulk(mut self, bulk: bool) -> Self {
        self.bulk = bulk;
        self
    }

    pub fn with_scale_factor(mut self, column: impl Into<String>, factor: f64) -> Self {
        self.scale_factors.insert(column.into(), factor);
        self
    }

    pub fn with_cell_format(mut self, format: CellFormat) -> Self {
        self.cell_format = Some(format);
        self
    }

    pub fn resolve_options(&self) -> ResolveOptions {
        let mut options = ResolveOptions::default();
        options.force_path_group = self.force_path_group.clone();
        if let Some(ignore) = &self.ignore_path_groups {
            options.ignore_path_groups = ignore.clone();
        }
        options
    }

    /// Build options from converted keyword arguments.
    ///
    /// # Errors
    /// * `SmError::ConfigNotFound` for unknown keys
    /// * `SmError::Conversion` for values of the wrong kind
    pub fn from_kwargs(kwargs: &BTreeMap<String, KwValue>) -> Result<Self> {
        let mut options = Self::default();
        for (key, value) in kwargs {
            let wrong = |expected: &str| SmError::Conversion {
                tag: expected.to_string(),
                value: format!("{:?}", value),
                reason: format!("reader option '{}' expects {}", key, expected),
            };
            match key.as_str() {
                "force_path_group" => {
                    options.force_path_group = match value {
                        KwValue::Null => None,
                        v => Some(v.as_str().ok_or_else(|| wrong("str"))?.to_string()),
                    }
                }
                "ignore_path_groups" => {
                    options.ignore_path_groups =
                        Some(value.as_string_list().ok_or_else(|| wrong("list"))?)
                }
                "exact_index" => options.exact_index = value.as_bool().ok_or_else(|| wrong("bool"))?,
                "bulk" => options.bulk = value.as_bool().ok_or_else(|| wrong("bool"))?,
                "parameters" => {
                    options.parameters = match value {
                        KwValue::Null => None,
                        v => Some(v.as_string_list().ok_or_else(|| wrong("list"))?),
                    }
                }
                "scale_factors" => {
                    let dict = value.as_dict().ok_or_else(|| wrong("dict"))?;
                    for (column, factor) in dict {
                        let factor = factor.as_f64().ok_or_else(|| wrong("dict of numbers"))?;
                        options.scale_factors.insert(column.clone(), factor);
                    }
                }
                "cell_format" => {
                    options.cell_format = match value.as_str() {
                        Some("parquet") => Some(CellFormat::Parquet),
                        Some("csv") => Some(CellFormat::Csv),
                        _ => return Err(wrong("'parquet' or 'csv'")),
                    }
                }
                "max_dist_km" | "max_dist" => {
                    options.max_dist_km = value.as_f64().ok_or_else(|| wrong("float"))?
                }
                other => {
                    return Err(SmError::config_not_found(
                        format!("reader option '{}'", other),
                        None,
                    ));
                }
            }
        }
        Ok(options)
    }
}

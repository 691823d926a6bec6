//! Reading several datasets at one location into a single table.
//!
//! Every requested dataset gets its own stack: the dataset reader, then an
//! optional self-mask, then an optional anomaly adapter. A read runs each
//! stack, keeps the requested parameters, applies per-dataset renames,
//! outer-joins the results on time and optionally resamples the joined
//! table.

use crate::adapters::{
    Aggregation, AnomalyClimatology, AnomalySpec, Frequency, MaskSpec, SelfMasking, resample,
};
use crate::constants::CLIMATOLOGY_SUFFIX;
use crate::error::{Result, SmError};
use crate::frame::TimeSeriesFrame;
use crate::models::{DatasetId, Location};
use crate::readers::{DatasetReader, ReaderOptions, TimeSeriesReader};
use crate::registry::Registry;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// What to do when one dataset cannot be opened or read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OnError {
    /// Propagate the error.
    #[default]
    Fail,
    /// Log it and contribute an empty table.
    Empty,
}

/// One dataset and the columns wanted from it.
#[derive(Debug, Clone, PartialEq)]
pub struct DatasetRequest {
    pub id: DatasetId,
    /// Columns kept in the output; empty keeps everything.
    pub parameters: Vec<String>,
    pub options: ReaderOptions,
    pub mask: Option<MaskSpec>,
    pub anomaly: Option<AnomalySpec>,
    pub on_error: OnError,
}

impl DatasetRequest {
    pub fn new(id: impl Into<DatasetId>, parameters: &[&str]) -> Self {
        Self {
            id: id.into(),
            parameters: parameters.iter().map(|p| p.to_string()).collect(),
            options: ReaderOptions::default(),
            mask: None,
            anomaly: None,
            on_error: OnError::Fail,
        }
    }

    pub fn with_options(mut self, options: ReaderOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_mask(mut self, mask: MaskSpec) -> Self {
        self.mask = Some(mask);
        self
    }

    pub fn with_anomaly(mut self, anomaly: AnomalySpec) -> Self {
        self.anomaly = Some(anomaly);
        self
    }

    pub fn with_on_error(mut self, on_error: OnError) -> Self {
        self.on_error = on_error;
        self
    }

    /// Columns the dataset reader must extract: the requested ones plus
    /// the mask column.
    fn extraction_parameters(&self) -> Option<Vec<String>> {
        if self.parameters.is_empty() {
            return self.options.parameters.clone();
        }
        let mut parameters = self.parameters.clone();
        if let Some(mask) = &self.mask {
            if !parameters.contains(&mask.column) {
                parameters.push(mask.column.clone());
            }
        }
        Some(parameters)
    }

    /// Output columns: requested parameters and their climatologies.
    fn keeps(&self, column: &str) -> bool {
        if self.parameters.is_empty() {
            return true;
        }
        let base = column.strip_suffix(CLIMATOLOGY_SUFFIX).unwrap_or(column);
        self.parameters.iter().any(|p| p == column || p == base)
    }
}

/// Full multi-dataset configuration.
#[derive(Debug, Clone, Default)]
pub struct MultiReaderConfig {
    /// Datasets in output column order.
    pub datasets: Vec<DatasetRequest>,
    /// `(dataset, column)` → new column name.
    pub rename: HashMap<(DatasetId, String), String>,
    pub resample: Option<(Frequency, Aggregation)>,
}

impl MultiReaderConfig {
    pub fn with_dataset(mut self, request: DatasetRequest) -> Self {
        self.datasets.push(request);
        self
    }

    pub fn with_rename(mut self, id: impl Into<DatasetId>, column: &str, to: &str) -> Self {
        self.rename.insert((id.into(), column.to_string()), to.to_string());
        self
    }

    pub fn with_resample(mut self, frequency: Frequency, aggregation: Aggregation) -> Self {
        self.resample = Some((frequency, aggregation));
        self
    }
}

type BoxedReader = Box<dyn TimeSeriesReader>;

struct DatasetStack {
    request: DatasetRequest,
    reader: Option<BoxedReader>,
    rename: HashMap<String, String>,
    /// Output columns after renaming, in output order.
    columns: Vec<String>,
}

impl DatasetStack {
    fn build(registry: &Registry, request: DatasetRequest, rename: HashMap<String, String>) -> Result<Self> {
        let auxiliary = registry
            .get(&request.id)
            .map(|entry| entry.product.auxiliary_columns())
            .unwrap_or_default();
        let columns = output_columns(&request, &rename, &auxiliary);

        match open_stack(registry, &request) {
            Ok(reader) => Ok(Self {
                request,
                reader: Some(reader),
                rename,
                columns,
            }),
            Err(e) if request.on_error == OnError::Empty && e.is_recoverable() => {
                warn!("Dataset {} unavailable, contributing empty tables: {}", request.id, e);
                Ok(Self {
                    request,
                    reader: None,
                    rename,
                    columns,
                })
            }
            Err(e) => Err(e),
        }
    }

    fn read(&mut self, location: Location) -> Result<TimeSeriesFrame> {
        let Some(reader) = self.reader.as_mut() else {
            return self.conform(TimeSeriesFrame::empty());
        };

        let frame = match reader.read(location) {
            Ok(frame) => frame,
            Err(e) if self.request.on_error == OnError::Empty && e.is_recoverable() => {
                warn!("Reading {} at {} failed, using empty table: {}", self.request.id, location, e);
                return self.conform(TimeSeriesFrame::empty());
            }
            Err(e) => return Err(e),
        };

        let dropped: Vec<String> = frame
            .column_names()
            .into_iter()
            .filter(|c| !self.request.keeps(c))
            .collect();
        let frame = frame.drop_columns(&dropped)?;

        let frame = if self.rename.is_empty() {
            frame
        } else {
            frame.rename(&self.rename)?
        };
        self.conform(frame)
    }

    /// Give `frame` exactly the dataset's output columns.
    ///
    /// Empty tables become a rowless table with every output column.
    /// Columns missing from a non-empty table are filled with NaN, and
    /// columns first seen here are appended to the output columns.
    fn conform(&mut self, mut frame: TimeSeriesFrame) -> Result<TimeSeriesFrame> {
        if frame.is_empty() {
            let columns = self.columns.iter().map(|c| (c.clone(), Vec::new())).collect();
            return TimeSeriesFrame::from_columns(Vec::new(), columns);
        }

        for column in frame.column_names() {
            if !self.columns.contains(&column) {
                self.columns.push(column);
            }
        }
        for column in &self.columns {
            if !frame.has_column(column) {
                frame.set_values(column, vec![f64::NAN; frame.len()])?;
            }
        }
        frame.select(&self.columns)
    }
}

/// Output columns known from the configuration: the requested parameters,
/// their climatologies when the anomaly adapter emits them, renamed.
fn output_columns(
    request: &DatasetRequest,
    rename: &HashMap<String, String>,
    auxiliary: &[String],
) -> Vec<String> {
    let parameters = if request.parameters.is_empty() {
        request.options.parameters.clone().unwrap_or_default()
    } else {
        request.parameters.clone()
    };

    let mut columns = Vec::with_capacity(parameters.len());
    for parameter in &parameters {
        columns.push(parameter.clone());
    }
    if let Some(anomaly) = request.anomaly.as_ref().filter(|a| a.return_climatology) {
        for parameter in &parameters {
            let transformed = match &anomaly.columns {
                Some(columns) => columns.contains(parameter),
                None => !auxiliary.contains(parameter),
            };
            if transformed {
                columns.push(format!("{}{}", parameter, CLIMATOLOGY_SUFFIX));
            }
        }
    }

    columns
        .into_iter()
        .map(|c| rename.get(&c).cloned().unwrap_or(c))
        .collect()
}

fn open_stack(registry: &Registry, request: &DatasetRequest) -> Result<BoxedReader> {
    let mut options = request.options.clone();
    options.parameters = request.extraction_parameters();

    let mut reader: BoxedReader = Box::new(DatasetReader::open(registry, &request.id, &options)?);
    if let Some(mask) = &request.mask {
        reader = Box::new(SelfMasking::from_spec(reader, mask.clone()));
    }
    if let Some(anomaly) = &request.anomaly {
        reader = Box::new(AnomalyClimatology::new(reader, anomaly.clone()));
    }
    Ok(reader)
}

/// Reads every configured dataset and joins the results on time.
pub struct MultiDatasetReader {
    stacks: Vec<DatasetStack>,
    resample: Option<(Frequency, Aggregation)>,
}

impl MultiDatasetReader {
    /// Build every dataset stack.
    ///
    /// # Errors
    /// * Any construction error of a dataset whose policy is
    ///   [`OnError::Fail`], or a non-recoverable one otherwise
    /// * `SmError::ConfigNotFound` for rename entries naming an unknown
    ///   dataset
    pub fn new(registry: &Registry, config: MultiReaderConfig) -> Result<Self> {
        for (id, column) in config.rename.keys() {
            if !config.datasets.iter().any(|d| d.id == *id) {
                return Err(SmError::config_not_found(
                    format!("rename entry for column '{}'", column),
                    Some(id.to_string()),
                ));
            }
        }

        let mut stacks = Vec::with_capacity(config.datasets.len());
        for request in config.datasets {
            let rename: HashMap<String, String> = config
                .rename
                .iter()
                .filter(|((id, _), _)| *id == request.id)
                .map(|((_, column), to)| (column.clone(), to.clone()))
                .collect();
            stacks.push(DatasetStack::build(registry, request, rename)?);
        }

        info!("Multi-dataset reader over {} datasets", stacks.len());
        Ok(Self {
            stacks,
            resample: config.resample,
        })
    }

    pub fn datasets(&self) -> Vec<&DatasetId> {
        self.stacks.iter().map(|s| &s.request.id).collect()
    }

    /// Datasets that could not be opened and only contribute empty tables.
    pub fn unavailable(&self) -> Vec<&DatasetId> {
        self.stacks
            .iter()
            .filter(|s| s.reader.is_none())
            .map(|s| &s.request.id)
            .collect()
    }
}

impl TimeSeriesReader for MultiDatasetReader {
    fn read(&mut self, location: Location) -> Result<TimeSeriesFrame> {
        let mut frames = Vec::with_capacity(self.stacks.len());
        for stack in &mut self.stacks {
            let frame = stack.read(location)?;
            debug!("{} contributed {} rows at {}", stack.request.id, frame.len(), location);
            frames.push(frame);
        }

        let joined = TimeSeriesFrame::outer_join(&frames)?;
        match &self.resample {
            Some((frequency, aggregation)) => resample(&joined, frequency, aggregation),
            None => Ok(joined),
        }
    }

    fn close(&mut self) {
        for stack in &mut self.stacks {
            if let Some(reader) = stack.reader.as_mut() {
                reader.close();
            }
        }
    }
}

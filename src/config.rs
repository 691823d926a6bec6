//! Job configuration.
//!
//! A job file (YAML) lists the datasets to read together with their reader
//! options, masks, anomaly settings and error policies, plus rename,
//! resampling, worker and output settings. Reader option values may be
//! tagged strings (`<bool>true`, `<list>sm,flag`, ...) converted through
//! [`TagConverters`].

use crate::adapters::{AnomalySpec, MaskSpec, ResampleSpec};
use crate::error::{Result, SmError};
use crate::models::DatasetId;
use crate::multi::{DatasetRequest, MultiReaderConfig, OnError};
use crate::pool::{ErrorPolicy, PoolConfig};
use crate::readers::ReaderOptions;
use crate::tags::{KwValue, TagConverters};
use polars::prelude::ParquetCompression;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

/// One dataset entry of a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetJob {
    /// Identity tokens, e.g. `[ESA_CCI_SM, v061, COMBINED]`
    pub id: DatasetId,

    /// Columns kept in the output; empty keeps everything
    #[serde(default)]
    pub parameters: Vec<String>,

    /// Reader keyword arguments, converted through the tag table
    #[serde(default)]
    pub reader: BTreeMap<String, serde_yaml::Value>,

    #[serde(default)]
    pub mask: Option<MaskSpec>,

    #[serde(default)]
    pub anomaly: Option<AnomalySpec>,

    #[serde(default)]
    pub on_error: OnError,
}

/// Rename one column of one dataset in the joined output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenameEntry {
    pub dataset: DatasetId,
    pub column: String,
    pub to: String,
}

/// Table file format written by the command line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Csv,
    Parquet,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Csv => "csv",
            OutputFormat::Parquet => "parquet",
        }
    }
}

/// Supported compression algorithms for parquet output
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionAlgorithm {
    /// Snappy compression - good balance of speed and compression
    #[default]
    Snappy,
    /// ZSTD compression - better compression ratio, slower
    Zstd,
    /// LZ4 compression - fastest, lower compression ratio
    Lz4,
    /// No compression
    Uncompressed,
}

impl CompressionAlgorithm {
    /// Convert to polars ParquetCompression type
    pub fn to_polars_compression(&self) -> ParquetCompression {
        match self {
            CompressionAlgorithm::Snappy => ParquetCompression::Snappy,
            CompressionAlgorithm::Zstd => ParquetCompression::Zstd(None),
            CompressionAlgorithm::Lz4 => ParquetCompression::Lz4Raw,
            CompressionAlgorithm::Uncompressed => ParquetCompression::Uncompressed,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub format: OutputFormat,
    pub compression: CompressionAlgorithm,
}

/// A complete read job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    /// Datasets in output column order
    pub datasets: Vec<DatasetJob>,

    #[serde(default)]
    pub rename: Vec<RenameEntry>,

    #[serde(default)]
    pub resample: Option<ResampleSpec>,

    /// Worker pool settings for multi-location runs
    #[serde(default)]
    pub pool: PoolConfig,

    #[serde(default)]
    pub output: OutputConfig,
}

/// Convert a YAML value into a keyword-argument value; strings go through
/// the tag table.
pub fn yaml_to_kwvalue(value: &serde_yaml::Value, tags: &TagConverters) -> Result<KwValue> {
    use serde_yaml::Value;
    Ok(match value {
        Value::Null => KwValue::Null,
        Value::Bool(b) => KwValue::Bool(*b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => KwValue::Int(i),
            None => KwValue::Float(n.as_f64().unwrap_or(f64::NAN)),
        },
        Value::String(s) => tags.convert(s)?,
        Value::Sequence(items) => KwValue::List(
            items
                .iter()
                .map(|item| yaml_to_kwvalue(item, tags))
                .collect::<Result<_>>()?,
        ),
        Value::Mapping(map) => {
            let mut dict = BTreeMap::new();
            for (key, value) in map {
                let key = key.as_str().ok_or_else(|| SmError::Conversion {
                    tag: "dict".to_string(),
                    value: format!("{:?}", key),
                    reason: "mapping keys must be strings".to_string(),
                })?;
                dict.insert(key.to_string(), yaml_to_kwvalue(value, tags)?);
            }
            KwValue::Dict(dict)
        }
        Value::Tagged(tagged) => yaml_to_kwvalue(&tagged.value, tags)?,
    })
}

impl JobConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let job: Self = serde_yaml::from_str(yaml)?;
        debug!("Parsed job with {} datasets", job.datasets.len());
        Ok(job)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let yaml = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&yaml)
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.pool = self.pool.with_workers(workers);
        self
    }

    pub fn with_error_policy(mut self, policy: ErrorPolicy) -> Self {
        self.pool = self.pool.with_error_policy(policy);
        self
    }

    pub fn with_output_format(mut self, format: OutputFormat) -> Self {
        self.output.format = format;
        self
    }

    /// Reader options of one dataset entry.
    pub fn reader_options(job: &DatasetJob, tags: &TagConverters) -> Result<ReaderOptions> {
        let mut kwargs = BTreeMap::new();
        for (key, value) in &job.reader {
            kwargs.insert(key.clone(), yaml_to_kwvalue(value, tags)?);
        }
        ReaderOptions::from_kwargs(&kwargs).map_err(|e| match e {
            SmError::ConfigNotFound { what, .. } => SmError::ConfigNotFound {
                what,
                dataset: Some(job.id.to_string()),
            },
            other => other,
        })
    }

    /// Multi-dataset reader configuration of this job.
    pub fn to_multi_config(&self, tags: &TagConverters) -> Result<MultiReaderConfig> {
        let mut config = MultiReaderConfig::default();
        for job in &self.datasets {
            let request = DatasetRequest {
                id: job.id.clone(),
                parameters: job.parameters.clone(),
                options: Self::reader_options(job, tags)?,
                mask: job.mask.clone(),
                anomaly: job.anomaly.clone(),
                on_error: job.on_error,
            };
            config = config.with_dataset(request);
        }
        for entry in &self.rename {
            config = config.with_rename(entry.dataset.clone(), &entry.column, &entry.to);
        }
        if let Some(spec) = &self.resample {
            let (frequency, aggregation) = spec.build()?;
            config = config.with_resample(frequency, aggregation);
        }
        Ok(config)
    }
}

//! Temporal resampling to fixed-width buckets.
//!
//! Buckets are aligned to the Unix epoch, weeks to Monday 1970-01-05, and
//! labelled by their start. Only buckets holding at least one row are
//! emitted.

use crate::error::{Result, SmError};
use crate::frame::{TimeSeriesFrame, from_millis, to_millis};
use crate::models::Location;
use crate::readers::TimeSeriesReader;
use chrono::NaiveDateTime;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, OnceLock};
use tracing::debug;

const MILLIS_PER_MINUTE: i64 = 60_000;
const MILLIS_PER_HOUR: i64 = 60 * MILLIS_PER_MINUTE;
const MILLIS_PER_DAY: i64 = 24 * MILLIS_PER_HOUR;
const FIRST_MONDAY_MILLIS: i64 = 4 * MILLIS_PER_DAY;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FreqUnit {
    Minute,
    Hour,
    Day,
    Week,
}

/// Bucket width such as `6H`, `D` or `2W`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frequency {
    pub count: u32,
    pub unit: FreqUnit,
}

impl Frequency {
    pub fn new(count: u32, unit: FreqUnit) -> Result<Self> {
        if count == 0 {
            return Err(SmError::InvalidFrequency {
                value: format!("0 {:?}", unit),
            });
        }
        Ok(Self { count, unit })
    }

    pub fn period_millis(&self) -> i64 {
        let unit = match self.unit {
            FreqUnit::Minute => MILLIS_PER_MINUTE,
            FreqUnit::Hour => MILLIS_PER_HOUR,
            FreqUnit::Day => MILLIS_PER_DAY,
            FreqUnit::Week => 7 * MILLIS_PER_DAY,
        };
        unit * self.count as i64
    }

    /// Start of the bucket holding `ts`.
    pub fn bucket_start(&self, ts: &NaiveDateTime) -> i64 {
        let origin = match self.unit {
            FreqUnit::Week => FIRST_MONDAY_MILLIS,
            _ => 0,
        };
        let period = self.period_millis();
        origin + (to_millis(ts) - origin).div_euclid(period) * period
    }
}

fn frequency_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^\s*(\d+)?\s*(min|T|H|h|D|d|W|w)\s*$").expect("frequency pattern is a valid regex")
    })
}

impl FromStr for Frequency {
    type Err = SmError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || SmError::InvalidFrequency { value: s.to_string() };
        let captures = frequency_pattern().captures(s).ok_or_else(invalid)?;
        let count = match captures.get(1) {
            Some(m) => m.as_str().parse::<u32>().map_err(|_| invalid())?,
            None => 1,
        };
        let unit = match &captures[2] {
            "min" | "T" => FreqUnit::Minute,
            "H" | "h" => FreqUnit::Hour,
            "D" | "d" => FreqUnit::Day,
            _ => FreqUnit::Week,
        };
        Frequency::new(count, unit).map_err(|_| invalid())
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let unit = match self.unit {
            FreqUnit::Minute => "min",
            FreqUnit::Hour => "H",
            FreqUnit::Day => "D",
            FreqUnit::Week => "W",
        };
        write!(f, "{}{}", self.count, unit)
    }
}

/// Reduction of the finite values that fall into one bucket.
#[derive(Clone)]
pub struct Aggregation {
    name: String,
    func: Arc<dyn Fn(&[f64]) -> f64 + Send + Sync>,
}

impl fmt::Debug for Aggregation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Aggregation").field("name", &self.name).finish()
    }
}

fn or_nan(values: &[f64], f: impl Fn(&[f64]) -> f64) -> f64 {
    if values.is_empty() { f64::NAN } else { f(values) }
}

impl Aggregation {
    /// Custom reduction. `func` only sees finite values and is not called
    /// for buckets without any.
    pub fn custom<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&[f64]) -> f64 + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            func: Arc::new(move |values: &[f64]| or_nan(values, &func)),
        }
    }

    fn builtin(name: &str, func: fn(&[f64]) -> f64) -> Self {
        Self {
            name: name.to_string(),
            func: Arc::new(move |values: &[f64]| or_nan(values, func)),
        }
    }

    pub fn mean() -> Self {
        Self::builtin("mean", |v| v.iter().sum::<f64>() / v.len() as f64)
    }

    pub fn median() -> Self {
        Self::builtin("median", |v| {
            let mut sorted = v.to_vec();
            sorted.sort_by(|a, b| a.total_cmp(b));
            let n = sorted.len();
            if n % 2 == 1 {
                sorted[n / 2]
            } else {
                (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
            }
        })
    }

    pub fn sum() -> Self {
        Self::builtin("sum", |v| v.iter().sum())
    }

    pub fn min() -> Self {
        Self::builtin("min", |v| v.iter().copied().fold(f64::INFINITY, f64::min))
    }

    pub fn max() -> Self {
        Self::builtin("max", |v| v.iter().copied().fold(f64::NEG_INFINITY, f64::max))
    }

    pub fn first() -> Self {
        Self::builtin("first", |v| v[0])
    }

    pub fn last() -> Self {
        Self::builtin("last", |v| v[v.len() - 1])
    }

    /// Number of finite values; 0 for buckets without any.
    pub fn count() -> Self {
        Self {
            name: "count".to_string(),
            func: Arc::new(|values: &[f64]| values.len() as f64),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn apply(&self, values: &[f64]) -> f64 {
        let finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
        (self.func)(&finite)
    }
}

impl FromStr for Aggregation {
    type Err = SmError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mean" => Ok(Self::mean()),
            "median" => Ok(Self::median()),
            "sum" => Ok(Self::sum()),
            "min" => Ok(Self::min()),
            "max" => Ok(Self::max()),
            "first" => Ok(Self::first()),
            "last" => Ok(Self::last()),
            "count" => Ok(Self::count()),
            other => Err(SmError::config_not_found(format!("aggregation '{}'", other), None)),
        }
    }
}

/// Declarative resampling settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResampleSpec {
    pub frequency: String,
    #[serde(default = "default_aggregation")]
    pub aggregation: String,
}

fn default_aggregation() -> String {
    "mean".to_string()
}

impl ResampleSpec {
    pub fn build(&self) -> Result<(Frequency, Aggregation)> {
        Ok((self.frequency.parse()?, self.aggregation.parse()?))
    }
}

/// Aggregate every numeric column of `frame` into buckets of `frequency`.
///
/// Rows are grouped by bucket regardless of their order in the input; the
/// output is sorted by bucket start. Aggregated columns are floats and
/// non-numeric columns are left out.
pub fn resample(frame: &TimeSeriesFrame, frequency: &Frequency, aggregation: &Aggregation) -> Result<TimeSeriesFrame> {
    if frame.is_empty() {
        return Ok(frame.clone());
    }

    let mut buckets: BTreeMap<i64, Vec<usize>> = BTreeMap::new();
    for (row, ts) in frame.index()?.iter().enumerate() {
        buckets.entry(frequency.bucket_start(ts)).or_default().push(row);
    }

    let index = buckets
        .keys()
        .map(|&ms| {
            from_millis(ms).ok_or_else(|| SmError::InvalidFrequency {
                value: frequency.to_string(),
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let mut columns = Vec::new();
    for name in frame.numeric_columns() {
        let values = frame.values(&name)?;
        let aggregated: Vec<f64> = buckets
            .values()
            .map(|rows| {
                let bucket: Vec<f64> = rows.iter().map(|&r| values[r]).collect();
                aggregation.apply(&bucket)
            })
            .collect();
        columns.push((name, aggregated));
    }

    debug!(
        "Resampled {} rows into {} {} buckets ({})",
        frame.len(),
        index.len(),
        frequency,
        aggregation.name()
    );
    TimeSeriesFrame::from_columns(index, columns)
}

/// Resamples whatever the inner reader returns.
pub struct Resampling<R> {
    inner: R,
    frequency: Frequency,
    aggregation: Aggregation,
}

impl<R: TimeSeriesReader> Resampling<R> {
    pub fn new(inner: R, frequency: Frequency, aggregation: Aggregation) -> Self {
        Self {
            inner,
            frequency,
            aggregation,
        }
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: TimeSeriesReader> TimeSeriesReader for Resampling<R> {
    fn read(&mut self, location: Location) -> Result<TimeSeriesFrame> {
        let frame = self.inner.read(location)?;
        resample(&frame, &self.frequency, &self.aggregation)
    }

    forward_reader_attributes!();
}

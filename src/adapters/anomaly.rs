//! Anomalies against a day-of-year climatology or a moving average.
//!
//! The climatology is built on a 366-day year in which Feb 29 is always
//! day 60, so non-leap years skip that slot. The raw series is smoothed
//! first, averaged per day of year, and the 366 values are then smoothed
//! again with a circular window that wraps from Dec 31 to Jan 1.

use crate::constants::{
    CLIMATOLOGY_DAYS, CLIMATOLOGY_SUFFIX, DEFAULT_ANOMALY_WINDOW, DEFAULT_MIN_OBS_CLIM,
    DEFAULT_MOVING_AVG_CLIM, DEFAULT_MOVING_AVG_ORIG,
};
use crate::error::{Result, SmError};
use crate::frame::{TimeSeriesFrame, to_millis};
use crate::models::Location;
use crate::readers::TimeSeriesReader;
use chrono::{Datelike, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use tracing::debug;

const MILLIS_PER_DAY: f64 = 86_400_000.0;

fn default_moving_avg_orig() -> f64 {
    DEFAULT_MOVING_AVG_ORIG
}

fn default_moving_avg_clim() -> f64 {
    DEFAULT_MOVING_AVG_CLIM
}

fn default_min_obs() -> usize {
    DEFAULT_MIN_OBS_CLIM
}

fn default_window() -> f64 {
    DEFAULT_ANOMALY_WINDOW
}

/// How anomalies are computed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum AnomalyMethod {
    /// Deviation from the smoothed day-of-year climatology.
    Climatology {
        #[serde(default = "default_moving_avg_orig")]
        moving_avg_orig: f64,
        #[serde(default = "default_moving_avg_clim")]
        moving_avg_clim: f64,
        #[serde(default = "default_min_obs")]
        min_obs: usize,
        /// Only observations in this closed range build the climatology.
        #[serde(default)]
        timespan: Option<(NaiveDateTime, NaiveDateTime)>,
        /// Per-day median instead of mean.
        #[serde(default)]
        median: bool,
    },
    /// Deviation from a centered moving average.
    MovingAverage {
        #[serde(default = "default_window")]
        window_size: f64,
    },
}

impl Default for AnomalyMethod {
    fn default() -> Self {
        AnomalyMethod::Climatology {
            moving_avg_orig: DEFAULT_MOVING_AVG_ORIG,
            moving_avg_clim: DEFAULT_MOVING_AVG_CLIM,
            min_obs: DEFAULT_MIN_OBS_CLIM,
            timespan: None,
            median: false,
        }
    }
}

/// Declarative form of an [`AnomalyClimatology`] adapter.
///
/// `method` may be left out, which selects the climatology method with
/// its default parameters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawAnomalySpec")]
pub struct AnomalySpec {
    /// Columns to transform; all numeric measurement columns when unset.
    #[serde(default)]
    pub columns: Option<Vec<String>>,
    #[serde(flatten)]
    pub method: AnomalyMethod,
    /// Also emit `<column>_climatology` with the reference values.
    #[serde(default)]
    pub return_climatology: bool,
}

#[derive(Deserialize)]
struct RawAnomalySpec {
    #[serde(default)]
    columns: Option<Vec<String>>,
    #[serde(default)]
    return_climatology: bool,
    #[serde(flatten)]
    method: serde_yaml::Mapping,
}

impl TryFrom<RawAnomalySpec> for AnomalySpec {
    type Error = serde_yaml::Error;

    fn try_from(raw: RawAnomalySpec) -> std::result::Result<Self, Self::Error> {
        let mut fields = raw.method;
        let tag = serde_yaml::Value::from("method");
        if !fields.contains_key(&tag) {
            fields.insert(tag, serde_yaml::Value::from("climatology"));
        }
        Ok(Self {
            columns: raw.columns,
            method: serde_yaml::from_value(serde_yaml::Value::Mapping(fields))?,
            return_climatology: raw.return_climatology,
        })
    }
}

/// Day of year on the fixed 366-day calendar, 1-based.
pub fn climatology_doy(date: NaiveDate) -> usize {
    let ordinal = date.ordinal() as usize;
    if !date.leap_year() && ordinal >= 60 {
        ordinal + 1
    } else {
        ordinal
    }
}

/// Centered moving average over `window_days`, ignoring NaN.
///
/// Rows whose window holds no finite value get NaN. `index` does not need
/// to be sorted; the result is in input order.
pub fn moving_average(index: &[NaiveDateTime], values: &[f64], window_days: f64) -> Vec<f64> {
    let half = (window_days / 2.0 * MILLIS_PER_DAY).round() as i64;
    let mut order: Vec<usize> = (0..index.len()).collect();
    order.sort_by_key(|&i| index[i]);
    let times: Vec<i64> = order.iter().map(|&i| to_millis(&index[i])).collect();

    let mut averaged = vec![f64::NAN; index.len()];
    let (mut lo, mut hi) = (0, 0);
    for (k, &row) in order.iter().enumerate() {
        while lo < times.len() && times[lo] < times[k] - half {
            lo += 1;
        }
        while hi < times.len() && times[hi] <= times[k] + half {
            hi += 1;
        }
        let window: Vec<f64> = order[lo..hi]
            .iter()
            .map(|&i| values[i])
            .filter(|v| v.is_finite())
            .collect();
        if !window.is_empty() {
            averaged[row] = window.iter().sum::<f64>() / window.len() as f64;
        }
    }
    averaged
}

fn median(values: &mut [f64]) -> f64 {
    values.sort_by(|a, b| a.total_cmp(b));
    let n = values.len();
    if n % 2 == 1 {
        values[n / 2]
    } else {
        (values[n / 2 - 1] + values[n / 2]) / 2.0
    }
}

/// Smooth a day-of-year table with a window that wraps around the year.
/// Undefined days stay undefined.
fn smooth_circular(raw: &[f64], window_days: f64) -> Vec<f64> {
    let half = (window_days / 2.0).floor() as i64;
    let days = raw.len() as i64;
    raw.iter()
        .enumerate()
        .map(|(d, value)| {
            if !value.is_finite() {
                return f64::NAN;
            }
            let window: Vec<f64> = (-half..=half)
                .map(|offset| raw[(d as i64 + offset).rem_euclid(days) as usize])
                .filter(|v| v.is_finite())
                .collect();
            window.iter().sum::<f64>() / window.len() as f64
        })
        .collect()
}

/// Day-of-year climatology of a series; element `d` is day `d + 1`.
pub fn climatology(
    index: &[NaiveDateTime],
    values: &[f64],
    moving_avg_orig: f64,
    moving_avg_clim: f64,
    min_obs: usize,
    timespan: Option<(NaiveDateTime, NaiveDateTime)>,
    use_median: bool,
) -> Vec<f64> {
    let (index, values): (Vec<NaiveDateTime>, Vec<f64>) = index
        .iter()
        .zip(values)
        .filter(|(ts, _)| match timespan {
            Some((start, end)) => **ts >= start && **ts <= end,
            None => true,
        })
        .map(|(ts, v)| (*ts, *v))
        .unzip();

    let smoothed = moving_average(&index, &values, moving_avg_orig);

    let mut per_day: Vec<Vec<f64>> = vec![Vec::new(); CLIMATOLOGY_DAYS];
    for (ts, value) in index.iter().zip(smoothed) {
        if value.is_finite() {
            per_day[climatology_doy(ts.date()) - 1].push(value);
        }
    }

    let raw: Vec<f64> = per_day
        .into_iter()
        .map(|mut obs| {
            if obs.is_empty() || obs.len() < min_obs {
                f64::NAN
            } else if use_median {
                median(&mut obs)
            } else {
                obs.iter().sum::<f64>() / obs.len() as f64
            }
        })
        .collect();

    smooth_circular(&raw, moving_avg_clim)
}

/// Per-row anomaly and reference value of one series.
pub fn anomaly(index: &[NaiveDateTime], values: &[f64], method: &AnomalyMethod) -> (Vec<f64>, Vec<f64>) {
    let reference: Vec<f64> = match method {
        AnomalyMethod::Climatology {
            moving_avg_orig,
            moving_avg_clim,
            min_obs,
            timespan,
            median,
        } => {
            let clim = climatology(
                index,
                values,
                *moving_avg_orig,
                *moving_avg_clim,
                *min_obs,
                *timespan,
                *median,
            );
            index
                .iter()
                .map(|ts| clim[climatology_doy(ts.date()) - 1])
                .collect()
        }
        AnomalyMethod::MovingAverage { window_size } => moving_average(index, values, *window_size),
    };

    let anomalies = values
        .iter()
        .zip(&reference)
        .map(|(value, reference)| value - reference)
        .collect();
    (anomalies, reference)
}

/// Replaces columns by their anomalies.
pub struct AnomalyClimatology<R> {
    inner: R,
    spec: AnomalySpec,
}

impl<R: TimeSeriesReader> AnomalyClimatology<R> {
    pub fn new(inner: R, spec: AnomalySpec) -> Self {
        Self { inner, spec }
    }

    pub fn spec(&self) -> &AnomalySpec {
        &self.spec
    }

    pub fn into_inner(self) -> R {
        self.inner
    }

    pub fn transform(&self, frame: &TimeSeriesFrame) -> Result<TimeSeriesFrame> {
        if frame.is_empty() {
            return Ok(frame.clone());
        }
        let columns = match &self.spec.columns {
            Some(columns) => columns.clone(),
            None => {
                let auxiliary = self.inner.auxiliary_columns();
                frame
                    .numeric_columns()
                    .into_iter()
                    .filter(|c| !auxiliary.contains(c))
                    .collect()
            }
        };

        let index = frame.index()?;
        let mut out = frame.clone();
        for column in &columns {
            if !frame.has_column(column) {
                return Err(SmError::column_not_found(column.as_str()));
            }
            let values = frame.values(column)?;
            let (anomalies, reference) = anomaly(&index, &values, &self.spec.method);
            out.set_values(column, anomalies)?;
            if self.spec.return_climatology {
                out.set_values(&format!("{}{}", column, CLIMATOLOGY_SUFFIX), reference)?;
            }
        }
        debug!("Computed anomalies for {} columns", columns.len());
        Ok(out)
    }
}

impl<R: TimeSeriesReader> TimeSeriesReader for AnomalyClimatology<R> {
    fn read(&mut self, location: Location) -> Result<TimeSeriesFrame> {
        let frame = self.inner.read(location)?;
        self.transform(&frame)
    }

    forward_reader_attributes!();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::testing::{StaticReader, day};
    use chrono::TimeDelta;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_doy_calendar() {
        assert_eq!(climatology_doy(date(2001, 1, 1)), 1);
        assert_eq!(climatology_doy(date(2001, 2, 28)), 59);
        assert_eq!(climatology_doy(date(2001, 3, 1)), 61);
        assert_eq!(climatology_doy(date(2000, 2, 29)), 60);
        assert_eq!(climatology_doy(date(2000, 3, 1)), 61);
        assert_eq!(climatology_doy(date(2000, 12, 31)), 366);
        assert_eq!(climatology_doy(date(2001, 12, 31)), 366);
    }

    #[test]
    fn test_moving_average_window() {
        let index = vec![day(1), day(2), day(3), day(10)];
        let values = vec![1.0, f64::NAN, 3.0, 5.0];
        let avg = moving_average(&index, &values, 3.0);
        assert_eq!(avg[0], 1.0);
        assert_eq!(avg[1], 2.0);
        assert_eq!(avg[2], 3.0);
        assert_eq!(avg[3], 5.0);
    }

    #[test]
    fn test_moving_average_unsorted_input() {
        let index = vec![day(3), day(1), day(2)];
        let values = vec![3.0, 1.0, 2.0];
        let avg = moving_average(&index, &values, 1.0);
        assert_eq!(avg, values);
    }

    #[test]
    fn test_constant_series_has_zero_anomaly() {
        let start = date(2001, 1, 1).and_hms_opt(0, 0, 0).unwrap();
        let index: Vec<NaiveDateTime> = (0..730).map(|d| start + TimeDelta::days(d)).collect();
        let values = vec![0.25; index.len()];

        let (anomalies, reference) = anomaly(&index, &values, &AnomalyMethod::default());
        assert!(anomalies.iter().all(|a| a.abs() < 1e-12));
        assert!(reference.iter().all(|r| (r - 0.25).abs() < 1e-12));
    }

    #[test]
    fn test_min_obs_leaves_sparse_days_undefined() {
        let index = vec![day(1), day(2)];
        let values = vec![1.0, 2.0];
        let clim = climatology(&index, &values, 1.0, 1.0, 2, None, false);
        assert!(clim[0].is_nan());
        assert!(clim[1].is_nan());
    }

    #[test]
    fn test_timespan_restricts_climatology() {
        let index = vec![
            date(2000, 1, 1).and_hms_opt(0, 0, 0).unwrap(),
            date(2001, 1, 1).and_hms_opt(0, 0, 0).unwrap(),
        ];
        let values = vec![1.0, 3.0];
        let span = Some((index[1], index[1]));
        let clim = climatology(&index, &values, 1.0, 1.0, 1, span, false);
        assert_eq!(clim[0], 3.0);
    }

    #[test]
    fn test_circular_smoothing_wraps_year() {
        let mut raw = vec![f64::NAN; CLIMATOLOGY_DAYS];
        raw[0] = 1.0;
        raw[365] = 3.0;
        let smooth = smooth_circular(&raw, 2.0);
        assert_eq!(smooth[0], 2.0);
        assert_eq!(smooth[365], 2.0);
        assert!(smooth[100].is_nan());
    }

    #[test]
    fn test_adapter_with_climatology_column() {
        let reader = StaticReader::from_columns(
            vec![day(1), day(2), day(3)],
            vec![("sm", vec![1.0, 2.0, 3.0]), ("flag", vec![0.0, 0.0, 0.0])],
        );
        let spec = AnomalySpec {
            columns: Some(vec!["sm".to_string()]),
            method: AnomalyMethod::MovingAverage { window_size: 3.0 },
            return_climatology: true,
        };
        let mut adapter = AnomalyClimatology::new(reader, spec);
        let frame = adapter.read_gpi(1).unwrap();

        assert_eq!(
            frame.column_names(),
            vec!["sm".to_string(), "flag".to_string(), "sm_climatology".to_string()]
        );
        assert_eq!(frame.values("sm_climatology").unwrap(), vec![1.5, 2.0, 2.5]);
        assert_eq!(frame.values("sm").unwrap(), vec![-0.5, 0.0, 0.5]);
        assert_eq!(frame.values("flag").unwrap(), vec![0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_missing_column_is_an_error() {
        let reader = StaticReader::from_columns(vec![day(1)], vec![("sm", vec![1.0])]);
        let spec = AnomalySpec {
            columns: Some(vec!["swvl1".to_string()]),
            ..AnomalySpec::default()
        };
        let mut adapter = AnomalyClimatology::new(reader, spec);
        assert!(matches!(
            adapter.read_gpi(1),
            Err(SmError::ColumnNotFound { .. })
        ));
    }

    #[test]
    fn test_default_columns_skip_flags_and_offsets() {
        let mut reader = StaticReader::from_columns(
            vec![day(1), day(2), day(3)],
            vec![
                ("sm", vec![1.0, 2.0, 3.0]),
                ("flag", vec![0.0, 1.0, 0.0]),
                ("t0", vec![18262.5, 18263.5, 18264.5]),
            ],
        );
        reader.auxiliary = vec!["flag".to_string(), "t0".to_string()];
        let spec = AnomalySpec {
            method: AnomalyMethod::MovingAverage { window_size: 3.0 },
            ..AnomalySpec::default()
        };
        let mut adapter = AnomalyClimatology::new(reader, spec);
        let frame = adapter.read_gpi(1).unwrap();

        assert_eq!(frame.values("sm").unwrap(), vec![-0.5, 0.0, 0.5]);
        assert_eq!(frame.values("flag").unwrap(), vec![0.0, 1.0, 0.0]);
        assert_eq!(frame.values("t0").unwrap(), vec![18262.5, 18263.5, 18264.5]);
    }

    #[test]
    fn test_spec_method_defaults_to_climatology() {
        let spec: AnomalySpec = serde_yaml::from_str("columns: [sm]
").unwrap();
        assert_eq!(spec.method, AnomalyMethod::default());
        assert_eq!(spec.columns, Some(vec!["sm".to_string()]));

        let spec: AnomalySpec = serde_yaml::from_str("return_climatology: true
min_obs: 4
").unwrap();
        assert!(spec.return_climatology);
        assert!(matches!(spec.method, AnomalyMethod::Climatology { min_obs: 4, .. }));

        assert!(serde_yaml::from_str::<AnomalySpec>("method: harmonic
").is_err());
    }

    #[test]
    fn test_spec_from_yaml() {
        let spec: AnomalySpec =
            serde_yaml::from_str("method: moving_average\nwindow_size: 10\n").unwrap();
        assert_eq!(spec.method, AnomalyMethod::MovingAverage { window_size: 10.0 });

        let spec: AnomalySpec = serde_yaml::from_str("method: climatology\nmin_obs: 3\n").unwrap();
        match spec.method {
            AnomalyMethod::Climatology { min_obs, moving_avg_clim, .. } => {
                assert_eq!(min_obs, 3);
                assert_eq!(moving_avg_clim, DEFAULT_MOVING_AVG_CLIM);
            }
            other => panic!("Expected Climatology, got {:?}", other),
        }
    }
}

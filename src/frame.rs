//! Time series tables.
//!
//! [`TimeSeriesFrame`] wraps a polars [`DataFrame`] whose first column is a
//! timezone-free millisecond `Datetime` index named [`INDEX_COLUMN`]. All
//! readers and adapters exchange this type, so transformations can be
//! nested freely.

use crate::constants::INDEX_COLUMN;
use crate::error::{Result, SmError};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use polars::prelude::*;
use std::collections::{BTreeMap, HashMap, HashSet};

/// Milliseconds since the Unix epoch for a naive timestamp.
pub fn to_millis(ts: &NaiveDateTime) -> i64 {
    ts.and_utc().timestamp_millis()
}

/// Inverse of [`to_millis`].
pub fn from_millis(ms: i64) -> Option<NaiveDateTime> {
    DateTime::from_timestamp_millis(ms).map(|dt| dt.naive_utc())
}

/// Parse ISO-like timestamps (`2020-01-01`, `2020-01-01 12:00`,
/// `2020-01-01T12:00:00.5`).
pub fn parse_timestamp(value: &str) -> Option<NaiveDateTime> {
    const FORMATS: &[&str] = &[
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d %H:%M",
    ];
    let value = value.trim();
    FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(value, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

fn index_series(index: &[NaiveDateTime]) -> Series {
    let millis: Vec<i64> = index.iter().map(to_millis).collect();
    Int64Chunked::from_vec(INDEX_COLUMN.into(), millis)
        .into_datetime(TimeUnit::Milliseconds, None)
        .into_series()
}

fn is_numeric(dtype: &DataType) -> bool {
    matches!(
        dtype,
        DataType::Float32
            | DataType::Float64
            | DataType::Int8
            | DataType::Int16
            | DataType::Int32
            | DataType::Int64
            | DataType::UInt8
            | DataType::UInt16
            | DataType::UInt32
            | DataType::UInt64
    )
}

fn float_series(name: &str, values: Vec<f64>) -> Series {
    Float64Chunked::from_vec(name.into(), values).into_series()
}

/// Table of measurements keyed by timestamp.
#[derive(Debug, Clone)]
pub struct TimeSeriesFrame {
    df: DataFrame,
}

impl Default for TimeSeriesFrame {
    fn default() -> Self {
        Self::empty()
    }
}

impl PartialEq for TimeSeriesFrame {
    fn eq(&self, other: &Self) -> bool {
        self.df.equals_missing(&other.df)
    }
}

impl TimeSeriesFrame {
    /// A table without rows or measurement columns.
    pub fn empty() -> Self {
        let df = DataFrame::new(vec![Column::from(index_series(&[]))])
            .unwrap_or_else(|_| DataFrame::empty());
        Self { df }
    }

    /// Build a table of float columns over `index`.
    pub fn from_columns(index: Vec<NaiveDateTime>, columns: Vec<(String, Vec<f64>)>) -> Result<Self> {
        let height = index.len();
        let mut cols = Vec::with_capacity(columns.len() + 1);
        cols.push(Column::from(index_series(&index)));

        let mut seen = HashSet::new();
        for (name, values) in columns {
            if values.len() != height {
                return Err(SmError::LengthMismatch {
                    name,
                    expected: height,
                    found: values.len(),
                });
            }
            if name == INDEX_COLUMN || !seen.insert(name.clone()) {
                return Err(SmError::DuplicateColumn { column: name });
            }
            cols.push(Column::from(float_series(&name, values)));
        }

        Ok(Self {
            df: DataFrame::new(cols)?,
        })
    }

    /// Attach `index` in front of the measurement columns in `data`.
    pub fn from_parts(index: &[NaiveDateTime], mut data: DataFrame) -> Result<Self> {
        if data.width() > 0 && data.height() != index.len() {
            return Err(SmError::LengthMismatch {
                name: INDEX_COLUMN.to_string(),
                expected: data.height(),
                found: index.len(),
            });
        }
        if data.column(INDEX_COLUMN).is_ok() {
            return Err(SmError::DuplicateColumn {
                column: INDEX_COLUMN.to_string(),
            });
        }
        data.insert_column(0, index_series(index))?;
        Ok(Self { df: data })
    }

    /// Wrap a frame whose `time_column` holds `Date` or `Datetime` values.
    ///
    /// The index is converted to tz-naive milliseconds, renamed to
    /// [`INDEX_COLUMN`], moved to the front and rows with a null index
    /// are dropped.
    pub fn from_dataframe(mut df: DataFrame, time_column: &str) -> Result<Self> {
        let dtype = df
            .column(time_column)
            .map_err(|_| SmError::column_not_found(time_column))?
            .dtype()
            .clone();

        match dtype {
            DataType::Datetime(_, _) | DataType::Date => {}
            other => {
                return Err(SmError::unsupported(
                    format!("index column '{}' of type {}", time_column, other),
                    None,
                ));
            }
        }

        if time_column != INDEX_COLUMN {
            if df.column(INDEX_COLUMN).is_ok() {
                return Err(SmError::DuplicateColumn {
                    column: INDEX_COLUMN.to_string(),
                });
            }
            df.rename(time_column, INDEX_COLUMN.into())?;
        }

        let index = df
            .column(INDEX_COLUMN)?
            .cast(&DataType::Datetime(TimeUnit::Milliseconds, None))?;
        df.with_column(index)?;

        let mut order: Vec<PlSmallStr> = vec![INDEX_COLUMN.into()];
        order.extend(
            df.get_column_names()
                .into_iter()
                .filter(|n| n.as_str() != INDEX_COLUMN)
                .cloned(),
        );
        let df = df.select(order)?;

        let mask: Vec<bool> = df
            .column(INDEX_COLUMN)?
            .cast(&DataType::Int64)?
            .i64()?
            .into_iter()
            .map(|v| v.is_some())
            .collect();

        let frame = Self { df };
        if mask.iter().all(|keep| *keep) {
            Ok(frame)
        } else {
            frame.filter(&mask)
        }
    }

    pub fn len(&self) -> usize {
        self.df.height()
    }

    pub fn is_empty(&self) -> bool {
        self.df.height() == 0
    }

    pub fn dataframe(&self) -> &DataFrame {
        &self.df
    }

    pub fn into_dataframe(self) -> DataFrame {
        self.df
    }

    /// Measurement column names in table order.
    pub fn column_names(&self) -> Vec<String> {
        self.df
            .get_column_names()
            .into_iter()
            .filter(|n| n.as_str() != INDEX_COLUMN)
            .map(|n| n.to_string())
            .collect()
    }

    pub fn has_column(&self, name: &str) -> bool {
        name != INDEX_COLUMN && self.df.column(name).is_ok()
    }

    /// Names of the columns holding numeric data.
    pub fn numeric_columns(&self) -> Vec<String> {
        self.df
            .get_columns()
            .iter()
            .filter(|c| c.name().as_str() != INDEX_COLUMN && is_numeric(c.dtype()))
            .map(|c| c.name().to_string())
            .collect()
    }

    /// The timestamp index.
    pub fn index(&self) -> Result<Vec<NaiveDateTime>> {
        let millis = self.df.column(INDEX_COLUMN)?.cast(&DataType::Int64)?;
        millis
            .i64()?
            .into_iter()
            .map(|v| {
                v.and_then(from_millis).ok_or_else(|| {
                    SmError::unsupported("null or out-of-range timestamp in index", None)
                })
            })
            .collect()
    }

    /// Values of `name` as floats; nulls become NaN.
    ///
    /// # Errors
    /// * `SmError::ColumnNotFound` for absent columns
    /// * `SmError::Unsupported` for columns that do not hold numbers
    pub fn values(&self, name: &str) -> Result<Vec<f64>> {
        if name == INDEX_COLUMN {
            return Err(SmError::column_not_found(name));
        }
        let column = self
            .df
            .column(name)
            .map_err(|_| SmError::column_not_found(name))?;
        if !is_numeric(column.dtype()) {
            return Err(SmError::unsupported(
                format!("numeric values of column '{}' of type {}", name, column.dtype()),
                None,
            ));
        }
        let floats = column.cast(&DataType::Float64)?;
        Ok(floats
            .f64()?
            .into_iter()
            .map(|v| v.unwrap_or(f64::NAN))
            .collect())
    }

    /// Insert or overwrite a float column.
    pub fn set_values(&mut self, name: &str, values: Vec<f64>) -> Result<()> {
        if values.len() != self.len() {
            return Err(SmError::LengthMismatch {
                name: name.to_string(),
                expected: self.len(),
                found: values.len(),
            });
        }
        if name == INDEX_COLUMN {
            return Err(SmError::DuplicateColumn {
                column: name.to_string(),
            });
        }
        self.df.with_column(float_series(name, values))?;
        Ok(())
    }

    /// Replace the index, keeping row order.
    pub fn replace_index(&mut self, index: &[NaiveDateTime]) -> Result<()> {
        if index.len() != self.len() {
            return Err(SmError::LengthMismatch {
                name: INDEX_COLUMN.to_string(),
                expected: self.len(),
                found: index.len(),
            });
        }
        self.df.with_column(index_series(index))?;
        Ok(())
    }

    /// Keep rows where `mask` is true.
    pub fn filter(&self, mask: &[bool]) -> Result<Self> {
        if mask.len() != self.len() {
            return Err(SmError::LengthMismatch {
                name: "mask".to_string(),
                expected: self.len(),
                found: mask.len(),
            });
        }
        let mask = BooleanChunked::from_slice("mask".into(), mask);
        Ok(Self {
            df: self.df.filter(&mask)?,
        })
    }

    /// Keep only the index and `columns`, in the given order.
    pub fn select(&self, columns: &[String]) -> Result<Self> {
        let mut names: Vec<PlSmallStr> = vec![INDEX_COLUMN.into()];
        for column in columns {
            if !self.has_column(column) {
                return Err(SmError::column_not_found(column.as_str()));
            }
            names.push(column.as_str().into());
        }
        Ok(Self {
            df: self.df.select(names)?,
        })
    }

    /// Drop columns that are present; absent names are ignored.
    pub fn drop_columns(&self, columns: &[String]) -> Result<Self> {
        let mut df = self.df.clone();
        for column in columns {
            if column != INDEX_COLUMN && df.column(column).is_ok() {
                df = df.drop(column)?;
            }
        }
        Ok(Self { df })
    }

    /// Rename measurement columns; names not in `mapping` are kept.
    pub fn rename(&self, mapping: &HashMap<String, String>) -> Result<Self> {
        let mut columns = self.df.get_columns().to_vec();
        let mut seen = HashSet::new();
        for column in columns.iter_mut() {
            let current = column.name().to_string();
            if current != INDEX_COLUMN {
                if let Some(new_name) = mapping.get(&current) {
                    column.rename(new_name.as_str().into());
                }
            }
            let name = column.name().to_string();
            if !seen.insert(name.clone()) {
                return Err(SmError::DuplicateColumn { column: name });
            }
        }
        Ok(Self {
            df: DataFrame::new(columns)?,
        })
    }

    /// Stable sort by timestamp.
    pub fn sort_by_index(&self) -> Result<Self> {
        let index = self.index()?;
        if index.windows(2).all(|w| w[0] <= w[1]) {
            return Ok(self.clone());
        }
        let mut order: Vec<usize> = (0..index.len()).collect();
        order.sort_by_key(|&i| index[i]);
        self.take(&order)
    }

    /// Rows at `positions`, in that order.
    pub fn take(&self, positions: &[usize]) -> Result<Self> {
        let idx: Vec<IdxSize> = positions.iter().map(|&p| p as IdxSize).collect();
        let idx = IdxCa::from_vec("idx".into(), idx);
        Ok(Self {
            df: self.df.take(&idx)?,
        })
    }

    /// Whether the index is non-decreasing.
    pub fn is_index_monotonic(&self) -> Result<bool> {
        Ok(self.index()?.windows(2).all(|w| w[0] <= w[1]))
    }

    /// Align frames on the union of their timestamps.
    ///
    /// Repeated timestamps inside one frame are matched by occurrence.
    /// Float columns come back as `Float64` with NaN where a frame has no
    /// row. Every other column keeps its dtype and gets nulls there.
    pub fn outer_join(frames: &[TimeSeriesFrame]) -> Result<Self> {
        let mut keys: BTreeMap<(NaiveDateTime, usize), usize> = BTreeMap::new();
        let mut frame_keys = Vec::with_capacity(frames.len());

        for frame in frames {
            let mut occurrences: HashMap<NaiveDateTime, usize> = HashMap::new();
            let mut row_keys = Vec::with_capacity(frame.len());
            for ts in frame.index()? {
                let n = occurrences.entry(ts).or_insert(0);
                row_keys.push((ts, *n));
                keys.insert((ts, *n), 0);
                *n += 1;
            }
            frame_keys.push(row_keys);
        }

        for (position, slot) in keys.values_mut().enumerate() {
            *slot = position;
        }

        let index: Vec<NaiveDateTime> = keys.keys().map(|(ts, _)| *ts).collect();
        let mut columns = vec![Column::from(index_series(&index))];
        let mut seen = HashSet::new();

        for (frame, row_keys) in frames.iter().zip(&frame_keys) {
            let mut positions: Vec<Option<IdxSize>> = vec![None; index.len()];
            for (row, key) in row_keys.iter().enumerate() {
                positions[keys[key]] = Some(row as IdxSize);
            }
            let gather = IdxCa::from_iter_options("gather".into(), positions.iter().copied());

            for column in frame.df.get_columns() {
                let name = column.name().to_string();
                if name == INDEX_COLUMN {
                    continue;
                }
                if !seen.insert(name.clone()) {
                    return Err(SmError::DuplicateColumn { column: name });
                }
                let aligned = if column.dtype().is_float() {
                    let values = frame.values(&name)?;
                    let mut aligned = vec![f64::NAN; index.len()];
                    for (value, key) in values.into_iter().zip(row_keys) {
                        aligned[keys[key]] = value;
                    }
                    float_series(&name, aligned)
                } else {
                    column.as_materialized_series().take(&gather)?
                };
                columns.push(Column::from(aligned));
            }
        }

        Ok(Self {
            df: DataFrame::new(columns)?,
        })
    }
}

//! User-supplied transformation of one column.

use crate::error::{Result, SmError};
use crate::frame::TimeSeriesFrame;
use crate::models::Location;
use crate::readers::TimeSeriesReader;
use chrono::NaiveDateTime;
use std::sync::Arc;
use tracing::debug;

/// Pure transformation of one series; must return as many values as it gets.
pub type SeriesFn = Arc<dyn Fn(&[NaiveDateTime], &[f64]) -> Vec<f64> + Send + Sync>;

/// Replaces `column` by `func(index, column)`.
///
/// Tables lacking the column pass through unchanged.
pub struct Preprocessing<R> {
    inner: R,
    column: String,
    func: SeriesFn,
}

impl<R: TimeSeriesReader> Preprocessing<R> {
    pub fn new(inner: R, column: impl Into<String>, func: SeriesFn) -> Self {
        Self {
            inner,
            column: column.into(),
            func,
        }
    }

    pub fn into_inner(self) -> R {
        self.inner
    }

    pub fn apply(&self, frame: &TimeSeriesFrame) -> Result<TimeSeriesFrame> {
        if frame.is_empty() {
            return Ok(frame.clone());
        }
        if !frame.has_column(&self.column) {
            debug!("Preprocessing skipped: no column '{}'", self.column);
            return Ok(frame.clone());
        }

        let index = frame.index()?;
        let values = frame.values(&self.column)?;
        let transformed = (self.func)(&index, &values);
        if transformed.len() != values.len() {
            return Err(SmError::LengthMismatch {
                name: self.column.clone(),
                expected: values.len(),
                found: transformed.len(),
            });
        }

        let mut out = frame.clone();
        out.set_values(&self.column, transformed)?;
        Ok(out)
    }
}

impl<R: TimeSeriesReader> TimeSeriesReader for Preprocessing<R> {
    fn read(&mut self, location: Location) -> Result<TimeSeriesFrame> {
        let frame = self.inner.read(location)?;
        self.apply(&frame)
    }

    forward_reader_attributes!();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::testing::{StaticReader, day};

    fn reader() -> StaticReader {
        StaticReader::from_columns(vec![day(1), day(2)], vec![("sm", vec![20.0, 30.0])])
    }

    #[test]
    fn test_percent_to_fraction() {
        let func: SeriesFn = Arc::new(|_: &[NaiveDateTime], values: &[f64]| -> Vec<f64> {
            values.iter().map(|v| v / 100.0).collect()
        });
        let mut pre = Preprocessing::new(reader(), "sm", func);
        assert_eq!(pre.read_gpi(1).unwrap().values("sm").unwrap(), vec![0.2, 0.3]);
    }

    #[test]
    fn test_length_change_rejected() {
        let func: SeriesFn = Arc::new(|_: &[NaiveDateTime], _: &[f64]| vec![1.0]);
        let mut pre = Preprocessing::new(reader(), "sm", func);
        assert!(matches!(pre.read_gpi(1), Err(SmError::LengthMismatch { .. })));
    }

    #[test]
    fn test_missing_column_passes_through() {
        let func: SeriesFn = Arc::new(|_: &[NaiveDateTime], values: &[f64]| values.to_vec());
        let mut pre = Preprocessing::new(reader(), "swvl1", func);
        let frame = pre.read_gpi(1).unwrap();
        assert_eq!(frame.values("sm").unwrap(), vec![20.0, 30.0]);
    }
}

//! Row-wise combination of several columns into a new one.

use crate::error::{Result, SmError};
use crate::frame::TimeSeriesFrame;
use crate::models::Location;
use crate::readers::TimeSeriesReader;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Function reducing one row of inputs to a single value.
pub type RowFn = Arc<dyn Fn(&[f64]) -> f64 + Send + Sync>;

/// Built-in row reductions usable from configuration files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Combiner {
    Mean,
    Sum,
    Min,
    Max,
    /// First input minus the sum of the others.
    Difference,
}

impl Combiner {
    pub fn into_fn(self) -> RowFn {
        match self {
            Combiner::Mean => Arc::new(|row: &[f64]| row.iter().sum::<f64>() / row.len() as f64),
            Combiner::Sum => Arc::new(|row: &[f64]| -> f64 { row.iter().sum() }),
            Combiner::Min => Arc::new(|row: &[f64]| row.iter().copied().fold(f64::INFINITY, f64::min)),
            Combiner::Max => {
                Arc::new(|row: &[f64]| row.iter().copied().fold(f64::NEG_INFINITY, f64::max))
            }
            Combiner::Difference => Arc::new(|row: &[f64]| match row.split_first() {
                Some((first, rest)) => first - rest.iter().sum::<f64>(),
                None => f64::NAN,
            }),
        }
    }
}

/// Appends `output = func(columns...)` evaluated per row.
pub struct ColumnCombination<R> {
    inner: R,
    columns: Vec<String>,
    output: String,
    func: RowFn,
}

impl<R: TimeSeriesReader> ColumnCombination<R> {
    pub fn new(inner: R, columns: Vec<String>, output: impl Into<String>, func: RowFn) -> Self {
        Self {
            inner,
            columns,
            output: output.into(),
            func,
        }
    }

    pub fn with_combiner(inner: R, columns: Vec<String>, output: impl Into<String>, combiner: Combiner) -> Self {
        Self::new(inner, columns, output, combiner.into_fn())
    }

    pub fn into_inner(self) -> R {
        self.inner
    }

    pub fn combine(&self, frame: &TimeSeriesFrame) -> Result<TimeSeriesFrame> {
        if frame.is_empty() {
            return Ok(frame.clone());
        }
        if frame.has_column(&self.output) {
            return Err(SmError::DuplicateColumn {
                column: self.output.clone(),
            });
        }

        let inputs = self
            .columns
            .iter()
            .map(|c| frame.values(c))
            .collect::<Result<Vec<_>>>()?;

        let mut row = vec![0.0; inputs.len()];
        let combined: Vec<f64> = (0..frame.len())
            .map(|i| {
                for (slot, column) in row.iter_mut().zip(&inputs) {
                    *slot = column[i];
                }
                (self.func)(&row)
            })
            .collect();

        let mut out = frame.clone();
        out.set_values(&self.output, combined)?;
        Ok(out)
    }
}

impl<R: TimeSeriesReader> TimeSeriesReader for ColumnCombination<R> {
    fn read(&mut self, location: Location) -> Result<TimeSeriesFrame> {
        let frame = self.inner.read(location)?;
        self.combine(&frame)
    }

    forward_reader_attributes!();
}

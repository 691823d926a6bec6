//! Row masking by a threshold on one of the table's own columns.

use crate::error::{Result, SmError};
use crate::frame::TimeSeriesFrame;
use crate::models::Location;
use crate::readers::TimeSeriesReader;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, warn};

/// Comparison applied as `column <op> threshold`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            CompareOp::Eq => "==",
            CompareOp::Ne => "!=",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
        }
    }

    /// NaN never satisfies a comparison, so NaN rows are always masked.
    pub fn apply(&self, value: f64, threshold: f64) -> bool {
        if value.is_nan() {
            return false;
        }
        match self {
            CompareOp::Eq => value == threshold,
            CompareOp::Ne => value != threshold,
            CompareOp::Lt => value < threshold,
            CompareOp::Le => value <= threshold,
            CompareOp::Gt => value > threshold,
            CompareOp::Ge => value >= threshold,
        }
    }
}

impl FromStr for CompareOp {
    type Err = SmError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "==" | "eq" => Ok(CompareOp::Eq),
            "!=" | "ne" => Ok(CompareOp::Ne),
            "<" | "lt" => Ok(CompareOp::Lt),
            "<=" | "le" => Ok(CompareOp::Le),
            ">" | "gt" => Ok(CompareOp::Gt),
            ">=" | "ge" => Ok(CompareOp::Ge),
            other => Err(SmError::Conversion {
                tag: "op".to_string(),
                value: other.to_string(),
                reason: "expected one of ==, !=, <, <=, >, >=".to_string(),
            }),
        }
    }
}

impl TryFrom<String> for CompareOp {
    type Error = SmError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<CompareOp> for String {
    fn from(op: CompareOp) -> Self {
        op.symbol().to_string()
    }
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// Declarative form of a [`SelfMasking`] adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaskSpec {
    pub column: String,
    pub op: CompareOp,
    pub threshold: f64,
}

impl MaskSpec {
    pub fn new(column: impl Into<String>, op: CompareOp, threshold: f64) -> Self {
        Self {
            column: column.into(),
            op,
            threshold,
        }
    }
}

/// Keeps the rows where `column <op> threshold` holds.
///
/// A non-empty table lacking the mask column yields an empty table: when
/// the mask cannot be evaluated no row is trusted.
pub struct SelfMasking<R> {
    inner: R,
    spec: MaskSpec,
}

impl<R: TimeSeriesReader> SelfMasking<R> {
    pub fn new(inner: R, column: impl Into<String>, op: CompareOp, threshold: f64) -> Self {
        Self::from_spec(inner, MaskSpec::new(column, op, threshold))
    }

    pub fn from_spec(inner: R, spec: MaskSpec) -> Self {
        Self { inner, spec }
    }

    pub fn spec(&self) -> &MaskSpec {
        &self.spec
    }

    pub fn into_inner(self) -> R {
        self.inner
    }

    /// Apply the mask to an already read table.
    pub fn mask(&self, frame: &TimeSeriesFrame) -> Result<TimeSeriesFrame> {
        if frame.is_empty() {
            return Ok(frame.clone());
        }
        if !frame.has_column(&self.spec.column) {
            warn!(
                "Mask column '{}' missing; returning empty table",
                self.spec.column
            );
            return Ok(TimeSeriesFrame::empty());
        }

        let keep: Vec<bool> = frame
            .values(&self.spec.column)?
            .into_iter()
            .map(|v| self.spec.op.apply(v, self.spec.threshold))
            .collect();
        let masked = frame.filter(&keep)?;
        debug!(
            "Mask {} {} {} kept {}/{} rows",
            self.spec.column,
            self.spec.op,
            self.spec.threshold,
            masked.len(),
            frame.len()
        );
        Ok(masked)
    }
}

impl<R: TimeSeriesReader> TimeSeriesReader for SelfMasking<R> {
    fn read(&mut self, location: Location) -> Result<TimeSeriesFrame> {
        let frame = self.inner.read(location)?;
        self.mask(&frame)
    }

    forward_reader_attributes!();
}

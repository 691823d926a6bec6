//! Column renaming.

use crate::error::Result;
use crate::frame::TimeSeriesFrame;
use crate::models::Location;
use crate::readers::TimeSeriesReader;
use std::collections::HashMap;

/// Renames columns by a fixed mapping; names not in the mapping are kept.
pub struct ColumnRename<R> {
    inner: R,
    mapping: HashMap<String, String>,
}

impl<R: TimeSeriesReader> ColumnRename<R> {
    pub fn new(inner: R, mapping: HashMap<String, String>) -> Self {
        Self { inner, mapping }
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: TimeSeriesReader> TimeSeriesReader for ColumnRename<R> {
    fn read(&mut self, location: Location) -> Result<TimeSeriesFrame> {
        let frame = self.inner.read(location)?;
        if frame.is_empty() || self.mapping.is_empty() {
            return Ok(frame);
        }
        frame.rename(&self.mapping)
    }

    forward_reader_attributes!();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::testing::{StaticReader, day};
    use crate::error::SmError;

    #[test]
    fn test_rename() {
        let reader = StaticReader::from_columns(
            vec![day(1)],
            vec![("sm", vec![0.1]), ("flag", vec![0.0])],
        );
        let mapping = HashMap::from([("sm".to_string(), "cci_sm".to_string())]);
        let mut renamed = ColumnRename::new(reader, mapping);
        assert_eq!(
            renamed.read_gpi(1).unwrap().column_names(),
            vec!["cci_sm".to_string(), "flag".to_string()]
        );
    }

    #[test]
    fn test_identity_rename_is_noop() {
        let reader = StaticReader::from_columns(vec![day(1)], vec![("sm", vec![0.1])]);
        let expected = reader.frame.clone();
        let mapping = HashMap::from([("sm".to_string(), "sm".to_string())]);
        let mut renamed = ColumnRename::new(reader, mapping);
        assert_eq!(renamed.read_gpi(1).unwrap(), expected);
    }

    #[test]
    fn test_collision_rejected() {
        let reader = StaticReader::from_columns(
            vec![day(1)],
            vec![("sm", vec![0.1]), ("flag", vec![0.0])],
        );
        let mapping = HashMap::from([("flag".to_string(), "sm".to_string())]);
        let mut renamed = ColumnRename::new(reader, mapping);
        assert!(matches!(renamed.read_gpi(1), Err(SmError::DuplicateColumn { .. })));
    }
}

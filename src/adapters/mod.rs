//! Reader adapters.
//!
//! Each adapter wraps an inner [`TimeSeriesReader`], transforms the tables
//! it returns and is itself a reader, so adapters compose in any order.
//! Empty tables pass through every adapter unchanged.
//!
//! [`TimeSeriesReader`]: crate::readers::TimeSeriesReader

/// Forward the optional reader attributes to `self.inner`.
macro_rules! forward_reader_attributes {
    () => {
        fn grid(&self) -> Option<&crate::grid::Grid> {
            self.inner.grid()
        }

        fn parameters(&self) -> Option<&[String]> {
            self.inner.parameters()
        }

        fn scale_factors(&self) -> Option<&std::collections::HashMap<String, f64>> {
            self.inner.scale_factors()
        }

        fn exact_index(&self) -> bool {
            self.inner.exact_index()
        }

        fn auxiliary_columns(&self) -> Vec<String> {
            self.inner.auxiliary_columns()
        }

        fn close(&mut self) {
            self.inner.close()
        }
    };
}

pub mod anomaly;
pub mod combination;
pub mod masking;
pub mod preprocessing;
pub mod rename;
pub mod resample;

pub use anomaly::{AnomalyClimatology, AnomalyMethod, AnomalySpec};
pub use combination::{ColumnCombination, Combiner};
pub use masking::{CompareOp, MaskSpec, SelfMasking};
pub use preprocessing::Preprocessing;
pub use rename::ColumnRename;
pub use resample::{Aggregation, Frequency, ResampleSpec, Resampling, resample};

//! Product family definitions.
//!
//! Each family is described as plain data: the identities it implements,
//! the sentinel values its files use for "no measurement", the parameters
//! read by default and, for products that store a per-observation time
//! offset, how to rebuild exact timestamps from it.

use crate::error::Result;
use crate::frame::TimeSeriesFrame;
use crate::models::DatasetId;
use chrono::{NaiveDate, NaiveDateTime, TimeDelta};
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

/// Day-offset column and the epoch it counts from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExactIndexSpec {
    pub column: &'static str,
    pub epoch: (i32, u32, u32),
}

impl ExactIndexSpec {
    pub fn epoch(&self) -> NaiveDateTime {
        let (y, m, d) = self.epoch;
        NaiveDate::from_ymd_opt(y, m, d)
            .and_then(|date| date.and_hms_opt(0, 0, 0))
            .unwrap_or_default()
    }

    /// Timestamp `offset_days` after the epoch; `None` for NaN or
    /// out-of-range offsets.
    pub fn timestamp(&self, offset_days: f64) -> Option<NaiveDateTime> {
        if !offset_days.is_finite() {
            return None;
        }
        let millis = (offset_days * 86_400_000.0).round();
        if millis.abs() > i64::MAX as f64 {
            return None;
        }
        self.epoch()
            .checked_add_signed(TimeDelta::try_milliseconds(millis as i64)?)
    }
}

/// Static description of one reader family.
#[derive(Debug)]
pub struct ProductSpec {
    pub family: &'static str,
    pub implemented: &'static [&'static [&'static str]],
    pub fill_values: &'static [(&'static str, &'static [f64])],
    pub default_parameters: &'static [&'static str],
    /// Quality flag columns; kept out of default anomaly columns.
    pub flag_columns: &'static [&'static str],
    pub exact_index: Option<ExactIndexSpec>,
}

impl ProductSpec {
    pub fn implemented_ids(&self) -> Vec<DatasetId> {
        self.implemented.iter().map(|t| DatasetId::from(*t)).collect()
    }

    pub fn implements(&self, id: &DatasetId) -> bool {
        self.implemented
            .iter()
            .any(|tokens| DatasetId::from(*tokens) == *id)
    }

    /// Flag columns plus the exact-index offset column.
    pub fn auxiliary_columns(&self) -> Vec<String> {
        self.flag_columns
            .iter()
            .map(|c| c.to_string())
            .chain(self.exact_index.as_ref().map(|spec| spec.column.to_string()))
            .collect()
    }

    pub fn fill_value_table(&self) -> FillValueTable {
        FillValueTable::new(
            self.fill_values
                .iter()
                .map(|(column, values)| (column.to_string(), values.to_vec())),
        )
    }
}

/// Column → sentinel values that encode missing data.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FillValueTable {
    entries: BTreeMap<String, Vec<f64>>,
}

impl FillValueTable {
    pub fn new<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (String, Vec<f64>)>,
    {
        Self {
            entries: entries.into_iter().collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Replace every sentinel in `frame` with NaN.
    ///
    /// A sentinel is compared after multiplying it by the column's scale
    /// factor, when one is configured. Matching is exact.
    pub fn clean(&self, frame: &mut TimeSeriesFrame, scale_factors: &HashMap<String, f64>) -> Result<usize> {
        let mut replaced = 0;
        for (column, sentinels) in &self.entries {
            if !frame.has_column(column) {
                continue;
            }
            let scale = scale_factors.get(column).copied().unwrap_or(1.0);
            let targets: Vec<f64> = sentinels.iter().map(|s| s * scale).collect();

            let mut values = frame.values(column)?;
            let mut hits = 0;
            for value in values.iter_mut() {
                if targets.iter().any(|t| *t == *value) {
                    *value = f64::NAN;
                    hits += 1;
                }
            }
            if hits > 0 {
                debug!("Replaced {} fill values in column {}", hits, column);
                frame.set_values(column, values)?;
                replaced += hits;
            }
        }
        Ok(replaced)
    }
}

/// Replace the index of `frame` by exact timestamps from `spec.column`.
///
/// Rows whose offset is missing are dropped. Row order is kept.
pub fn apply_exact_index(frame: &TimeSeriesFrame, spec: &ExactIndexSpec) -> Result<TimeSeriesFrame> {
    if frame.is_empty() {
        return Ok(frame.clone());
    }
    let exact: Vec<Option<NaiveDateTime>> = frame
        .values(spec.column)?
        .into_iter()
        .map(|offset| spec.timestamp(offset))
        .collect();

    let keep: Vec<bool> = exact.iter().map(Option::is_some).collect();
    let mut kept = frame.filter(&keep)?;
    let index: Vec<NaiveDateTime> = exact.into_iter().flatten().collect();
    kept.replace_index(&index)?;
    Ok(kept)
}

const CCI_FILL_VALUES: &[(&str, &[f64])] = &[
    ("sm", &[-9999.0]),
    ("sm_uncertainty", &[-9999.0]),
    ("t0", &[-3440586.5]),
];

const UNIX_T0: ExactIndexSpec = ExactIndexSpec {
    column: "t0",
    epoch: (1970, 1, 1),
};

pub static ESA_CCI_SM: ProductSpec = ProductSpec {
    family: "ESA_CCI_SM",
    implemented: &[
        &["ESA_CCI_SM", "v033", "COMBINED"],
        &["ESA_CCI_SM", "v033", "ACTIVE"],
        &["ESA_CCI_SM", "v033", "PASSIVE"],
        &["ESA_CCI_SM", "v045", "COMBINED"],
        &["ESA_CCI_SM", "v045", "ACTIVE"],
        &["ESA_CCI_SM", "v045", "PASSIVE"],
        &["ESA_CCI_SM", "v047", "COMBINED"],
        &["ESA_CCI_SM", "v047", "ACTIVE"],
        &["ESA_CCI_SM", "v047", "PASSIVE"],
        &["ESA_CCI_SM", "v052", "COMBINED"],
        &["ESA_CCI_SM", "v052", "ACTIVE"],
        &["ESA_CCI_SM", "v052", "PASSIVE"],
        &["ESA_CCI_SM", "v061", "COMBINED"],
        &["ESA_CCI_SM", "v061", "ACTIVE"],
        &["ESA_CCI_SM", "v061", "PASSIVE"],
    ],
    fill_values: CCI_FILL_VALUES,
    default_parameters: &["sm", "sm_uncertainty", "flag"],
    flag_columns: &["flag"],
    exact_index: Some(UNIX_T0),
};

pub static C3S_SM: ProductSpec = ProductSpec {
    family: "C3S_SM",
    implemented: &[
        &["C3S_SM", "v201706", "COMBINED", "DAILY"],
        &["C3S_SM", "v201706", "ACTIVE", "DAILY"],
        &["C3S_SM", "v201706", "PASSIVE", "DAILY"],
        &["C3S_SM", "v202012", "COMBINED", "DAILY"],
        &["C3S_SM", "v202012", "ACTIVE", "DAILY"],
        &["C3S_SM", "v202012", "PASSIVE", "DAILY"],
    ],
    fill_values: CCI_FILL_VALUES,
    default_parameters: &["sm", "flag"],
    flag_columns: &["flag"],
    exact_index: Some(UNIX_T0),
};

pub static SMAP_L3: ProductSpec = ProductSpec {
    family: "SMAP_L3",
    implemented: &[
        &["SMAP_L3", "v6", "AM"],
        &["SMAP_L3", "v6", "PM"],
        &["SMAP_L3", "v8", "AM"],
        &["SMAP_L3", "v8", "PM"],
    ],
    fill_values: &[
        ("soil_moisture", &[-9999.0]),
        ("soil_moisture_error", &[-9999.0]),
        ("retrieval_qual_flag", &[65534.0]),
    ],
    default_parameters: &["soil_moisture", "retrieval_qual_flag"],
    flag_columns: &["retrieval_qual_flag"],
    exact_index: None,
};

pub static ERA5: ProductSpec = ProductSpec {
    family: "ERA5",
    implemented: &[&["ERA5", "v20190613"], &["ERA5_LAND", "v20190904"]],
    fill_values: &[],
    default_parameters: &["swvl1"],
    flag_columns: &[],
    exact_index: None,
};

pub static GLDAS: ProductSpec = ProductSpec {
    family: "GLDAS",
    implemented: &[&["GLDAS", "v21", "025", "3H"]],
    fill_values: &[("SoilMoi0_10cm_inst", &[-9999.0])],
    default_parameters: &["SoilMoi0_10cm_inst"],
    flag_columns: &[],
    exact_index: None,
};

pub static SMOS_IC: ProductSpec = ProductSpec {
    family: "SMOS_IC",
    implemented: &[&["SMOS_IC", "v105", "ASC"], &["SMOS_IC", "v105", "DES"]],
    fill_values: &[("Soil_Moisture", &[-999.0]), ("Optical_Thickness_Nad", &[-999.0])],
    default_parameters: &["Soil_Moisture", "Quality_Flag"],
    flag_columns: &["Quality_Flag"],
    exact_index: None,
};

/// Every built-in family.
pub fn families() -> [&'static ProductSpec; 6] {
    [&ESA_CCI_SM, &C3S_SM, &SMAP_L3, &ERA5, &GLDAS, &SMOS_IC]
}

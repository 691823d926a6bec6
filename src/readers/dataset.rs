//! Low-level reader for one registered dataset.
//!
//! A [`DatasetReader`] resolves its directory, opens the cell store and, on
//! every read, replaces fill values with NaN and optionally rebuilds exact
//! timestamps. What differs between product families is data
//! ([`ProductSpec`]), so one reader type serves all of them.

use super::{ReaderOptions, TimeSeriesReader};
use crate::error::{Result, SmError};
use crate::format::{CellFileReader, CellFormat, CellReader};
use crate::frame::TimeSeriesFrame;
use crate::grid::Grid;
use crate::models::{DatasetId, DatasetSource, Location, ResolvedPath};
use crate::paths::{PathConfig, resolve_source};
use crate::products::{ExactIndexSpec, FillValueTable, ProductSpec, apply_exact_index};
use crate::registry::Registry;
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info};

/// Lifecycle of a reader after construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderState {
    Open,
    Released,
}

pub struct DatasetReader {
    label: String,
    product: &'static ProductSpec,
    resolved: Option<ResolvedPath>,
    cells: Box<dyn CellReader>,
    fill_values: FillValueTable,
    scale_factors: HashMap<String, f64>,
    exact_index: Option<ExactIndexSpec>,
    parameters: Option<Vec<String>>,
    max_dist_km: f64,
    state: ReaderState,
}

impl std::fmt::Debug for DatasetReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatasetReader")
            .field("label", &self.label)
            .field("family", &self.product.family)
            .field("resolved", &self.resolved)
            .field("exact_index", &self.exact_index.is_some())
            .field("state", &self.state)
            .finish()
    }
}

/// Parameters to extract, with the offset column appended when exact
/// timestamps are requested.
fn effective_parameters(options: &ReaderOptions, exact: Option<&ExactIndexSpec>) -> Option<Vec<String>> {
    let mut parameters = options.parameters.clone()?;
    if let Some(spec) = exact {
        if !parameters.iter().any(|p| p == spec.column) {
            parameters.push(spec.column.to_string());
        }
    }
    Some(parameters)
}

fn exact_index_spec(
    product: &'static ProductSpec,
    options: &ReaderOptions,
    label: &str,
) -> Result<Option<ExactIndexSpec>> {
    if !options.exact_index {
        return Ok(None);
    }
    match product.exact_index {
        Some(spec) => Ok(Some(spec)),
        None => Err(SmError::unsupported(
            format!("exact index for family {}", product.family),
            Some(label.to_string()),
        )),
    }
}

impl DatasetReader {
    /// Open a registered dataset.
    ///
    /// # Errors
    /// * `SmError::ConfigNotFound` for unknown identities or path groups
    /// * `SmError::PathNotFound` when no configured directory exists
    /// * `SmError::Unsupported` when exact timestamps are requested for a
    ///   family that has no offset column
    pub fn open(registry: &Registry, id: &DatasetId, options: &ReaderOptions) -> Result<Self> {
        let entry = registry.get(id)?;
        Self::with_product(
            entry.product,
            &DatasetSource::Id(id.clone()),
            Some(&entry.paths),
            options,
        )
    }

    /// Open a dataset read by `product`, from an identity resolved
    /// through `paths` or from a raw directory.
    pub fn with_product(
        product: &'static ProductSpec,
        source: &DatasetSource,
        paths: Option<&PathConfig>,
        options: &ReaderOptions,
    ) -> Result<Self> {
        let label = source.label();
        let exact = exact_index_spec(product, options, &label)?;

        let resolved = resolve_source(source, paths, &options.resolve_options())?;
        let format = match options.cell_format {
            Some(format) => format,
            None => CellFormat::detect(&resolved.path)?,
        };

        let cells = CellFileReader::open(&resolved.path, format)?
            .with_parameters(effective_parameters(options, exact.as_ref()))
            .with_bulk(options.bulk);

        info!(
            "Opened {} ({}) at {}",
            label,
            product.family,
            resolved.path.display()
        );

        let mut reader = Self::from_cell_reader(&label, product, Box::new(cells), options)?;
        reader.resolved = Some(resolved);
        Ok(reader)
    }

    /// Wrap an already opened cell reader.
    pub fn from_cell_reader(
        label: &str,
        product: &'static ProductSpec,
        cells: Box<dyn CellReader>,
        options: &ReaderOptions,
    ) -> Result<Self> {
        let exact = exact_index_spec(product, options, label)?;
        Ok(Self {
            label: label.to_string(),
            product,
            resolved: None,
            cells,
            fill_values: product.fill_value_table(),
            scale_factors: options.scale_factors.clone(),
            parameters: effective_parameters(options, exact.as_ref()),
            exact_index: exact,
            max_dist_km: options.max_dist_km,
            state: ReaderState::Open,
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn product(&self) -> &'static ProductSpec {
        self.product
    }

    pub fn state(&self) -> ReaderState {
        self.state
    }

    /// Directory the data is read from; `None` for injected cell readers.
    pub fn path(&self) -> Option<&Path> {
        self.resolved.as_ref().map(|r| r.path.as_path())
    }

    pub fn resolved(&self) -> Option<&ResolvedPath> {
        self.resolved.as_ref()
    }

    fn locate(&self, location: Location) -> Option<u64> {
        match location {
            Location::Gpi(gpi) => Some(gpi),
            Location::LonLat { lon, lat } => {
                let found = self.cells.grid().find_nearest_gpi(lon, lat, self.max_dist_km);
                match found {
                    Some((gpi, dist)) => {
                        debug!("{}: lon={} lat={} -> gpi {} ({:.2} km)", self.label, lon, lat, gpi, dist);
                        Some(gpi)
                    }
                    None => {
                        debug!(
                            "{}: no grid point within {} km of lon={} lat={}",
                            self.label, self.max_dist_km, lon, lat
                        );
                        None
                    }
                }
            }
        }
    }
}

impl TimeSeriesReader for DatasetReader {
    fn read(&mut self, location: Location) -> Result<TimeSeriesFrame> {
        if self.state == ReaderState::Released {
            return Err(SmError::ReaderClosed {
                dataset: self.label.clone(),
            });
        }

        let Some(gpi) = self.locate(location) else {
            return Ok(TimeSeriesFrame::empty());
        };

        let mut frame = self.cells.read_gpi(gpi)?;
        if frame.is_empty() {
            return Ok(frame);
        }

        self.fill_values.clean(&mut frame, &self.scale_factors)?;

        if let Some(spec) = &self.exact_index {
            frame = apply_exact_index(&frame, spec)?;
        }

        Ok(frame)
    }

    fn grid(&self) -> Option<&Grid> {
        Some(self.cells.grid())
    }

    fn parameters(&self) -> Option<&[String]> {
        self.parameters.as_deref()
    }

    fn scale_factors(&self) -> Option<&HashMap<String, f64>> {
        if self.scale_factors.is_empty() {
            None
        } else {
            Some(&self.scale_factors)
        }
    }

    fn exact_index(&self) -> bool {
        self.exact_index.is_some()
    }

    fn auxiliary_columns(&self) -> Vec<String> {
        self.product.auxiliary_columns()
    }

    fn close(&mut self) {
        if self.state == ReaderState::Open {
            debug!("Closing reader for {}", self.label);
            self.cells.close();
            self.state = ReaderState::Released;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::GRID_FILE_NAME;
    use crate::grid::GridPoint;
    use crate::paths::HostPaths;
    use crate::products::{ERA5, ESA_CCI_SM};
    use chrono::{NaiveDate, NaiveDateTime};
    use std::fs;
    use tempfile::TempDir;

    fn at(d: u32, h: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2000, 1, d)
            .unwrap()
            .and_hms_opt(h, 0, 0)
            .unwrap()
    }

    /// In-memory cell store serving one fixed table for gpi 1.
    struct FixedCells {
        grid: Grid,
        frame: TimeSeriesFrame,
        closed: bool,
    }

    impl FixedCells {
        fn new(frame: TimeSeriesFrame) -> Self {
            Self {
                grid: Grid::new(vec![GridPoint { gpi: 1, lon: 16.0, lat: 48.0, cell: 0 }]).unwrap(),
                frame,
                closed: false,
            }
        }
    }

    impl CellReader for FixedCells {
        fn read_gpi(&mut self, gpi: u64) -> Result<TimeSeriesFrame> {
            assert!(!self.closed);
            if gpi == 1 {
                Ok(self.frame.clone())
            } else {
                Ok(TimeSeriesFrame::empty())
            }
        }

        fn grid(&self) -> &Grid {
            &self.grid
        }

        fn parameters(&self) -> Option<&[String]> {
            None
        }

        fn close(&mut self) {
            self.closed = true;
        }
    }

    fn cci_frame() -> TimeSeriesFrame {
        TimeSeriesFrame::from_columns(
            vec![at(1, 0), at(2, 0)],
            vec![
                ("sm".into(), vec![-9999.0, 0.25]),
                ("t0".into(), vec![-3440586.5, 10958.5]),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_fill_values_replaced_on_read() {
        let cells = Box::new(FixedCells::new(cci_frame()));
        let mut reader =
            DatasetReader::from_cell_reader("cci", &ESA_CCI_SM, cells, &ReaderOptions::default()).unwrap();

        let frame = reader.read_gpi(1).unwrap();
        let sm = frame.values("sm").unwrap();
        assert!(sm[0].is_nan());
        assert_eq!(sm[1], 0.25);
        assert!(frame.values("t0").unwrap()[0].is_nan());
    }

    #[test]
    fn test_exact_index_drops_filled_offsets() {
        let cells = Box::new(FixedCells::new(cci_frame()));
        let options = ReaderOptions::default().with_exact_index(true);
        let mut reader = DatasetReader::from_cell_reader("cci", &ESA_CCI_SM, cells, &options).unwrap();

        let frame = reader.read_gpi(1).unwrap();
        assert_eq!(frame.index().unwrap(), vec![at(2, 12)]);
        assert_eq!(frame.values("sm").unwrap(), vec![0.25]);
        assert!(reader.exact_index());
    }

    #[test]
    fn test_exact_index_unsupported_for_family() {
        let cells = Box::new(FixedCells::new(cci_frame()));
        let options = ReaderOptions::default().with_exact_index(true);
        match DatasetReader::from_cell_reader("era5", &ERA5, cells, &options).unwrap_err() {
            SmError::Unsupported { dataset, .. } => assert_eq!(dataset.as_deref(), Some("era5")),
            other => panic!("Expected Unsupported, got {:?}", other),
        }
    }

    #[test]
    fn test_exact_index_adds_offset_parameter() {
        let cells = Box::new(FixedCells::new(cci_frame()));
        let options = ReaderOptions::default()
            .with_exact_index(true)
            .with_parameters(["sm"]);
        let reader = DatasetReader::from_cell_reader("cci", &ESA_CCI_SM, cells, &options).unwrap();
        assert_eq!(
            reader.parameters().unwrap(),
            &["sm".to_string(), "t0".to_string()]
        );
    }

    #[test]
    fn test_location_outside_grid_is_empty() {
        let cells = Box::new(FixedCells::new(cci_frame()));
        let mut reader =
            DatasetReader::from_cell_reader("cci", &ESA_CCI_SM, cells, &ReaderOptions::default()).unwrap();

        assert!(reader.read_lonlat(-120.0, -40.0).unwrap().is_empty());
        assert_eq!(reader.read_lonlat(16.01, 48.01).unwrap().len(), 2);
    }

    #[test]
    fn test_read_after_close() {
        let cells = Box::new(FixedCells::new(cci_frame()));
        let mut reader =
            DatasetReader::from_cell_reader("cci", &ESA_CCI_SM, cells, &ReaderOptions::default()).unwrap();
        reader.close();
        assert_eq!(reader.state(), ReaderState::Released);
        assert!(matches!(
            reader.read_gpi(1),
            Err(SmError::ReaderClosed { .. })
        ));
        // closing twice is harmless
        reader.close();
    }

    #[test]
    fn test_open_from_disk_with_forced_group() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("era5");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(GRID_FILE_NAME), "gpi,lon,lat,cell\n7,10.0,45.0,1\n").unwrap();
        fs::write(
            dir.join("0001.csv"),
            "gpi,time,swvl1\n7,2010-01-02,0.31\n7,2010-01-01,0.30\n",
        )
        .unwrap();

        let paths = PathConfig::new()
            .with_group("local", HostPaths::everywhere("/not/here"))
            .with_group("__test", HostPaths::everywhere(&dir.to_string_lossy()));
        let source = DatasetSource::Id(DatasetId::from(["ERA5", "v20190613"]));

        let options = ReaderOptions::default().with_force_path_group("__test");
        let mut reader = DatasetReader::with_product(&ERA5, &source, Some(&paths), &options).unwrap();
        assert_eq!(reader.path(), Some(dir.as_path()));

        let frame = reader.read_lonlat(10.0, 45.0).unwrap();
        assert_eq!(frame.values("swvl1").unwrap(), vec![0.30, 0.31]);

        assert!(matches!(
            DatasetReader::with_product(&ERA5, &source, Some(&paths), &ReaderOptions::default()),
            Err(SmError::PathNotFound { .. })
        ));
    }
}

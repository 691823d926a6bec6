//! Cell-file time series storage.
//!
//! Datasets on disk are laid out as a `grid.csv` describing every grid
//! point plus one file per cell (`0001.parquet` or `0001.csv`) holding
//! the observations of all points of that cell. [`CellFileReader`] is the
//! format-specific reader the dataset readers delegate to.

use crate::constants::{GPI_COLUMN, GRID_FILE_NAME, INDEX_COLUMN};
use crate::error::{Result, SmError};
use crate::frame::{TimeSeriesFrame, parse_timestamp};
use crate::grid::Grid;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Storage format of the cell files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CellFormat {
    Parquet,
    Csv,
}

impl CellFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            CellFormat::Parquet => "parquet",
            CellFormat::Csv => "csv",
        }
    }

    /// Format of the cell files under `root`: Parquet as soon as one
    /// `.parquet` file is present, CSV otherwise.
    pub fn detect(root: &Path) -> Result<Self> {
        let pattern = root.join("*.parquet");
        let mut matches = glob::glob(&pattern.to_string_lossy())
            .map_err(|e| SmError::format(root, format!("bad cell pattern: {}", e)))?;
        if matches.any(|entry| entry.is_ok()) {
            Ok(CellFormat::Parquet)
        } else {
            Ok(CellFormat::Csv)
        }
    }
}

/// Reader over a directory of per-cell time series files.
pub trait CellReader: Send {
    /// Raw table of one grid point; empty when the point has no data.
    fn read_gpi(&mut self, gpi: u64) -> Result<TimeSeriesFrame>;

    fn grid(&self) -> &Grid;

    /// Columns extracted on read, `None` for all columns.
    fn parameters(&self) -> Option<&[String]>;

    /// Release cached cell data.
    fn close(&mut self);
}

/// [`CellReader`] for cell files in Parquet or CSV format.
#[derive(Debug)]
pub struct CellFileReader {
    root: PathBuf,
    grid: Grid,
    format: CellFormat,
    parameters: Option<Vec<String>>,
    bulk: bool,
    cache: HashMap<u32, DataFrame>,
}

impl CellFileReader {
    /// Open the dataset directory at `root`, loading its grid.
    pub fn open(root: &Path, format: CellFormat) -> Result<Self> {
        let grid_path = root.join(GRID_FILE_NAME);
        if !grid_path.is_file() {
            return Err(SmError::format(&grid_path, "grid definition not found"));
        }
        let grid = Grid::from_csv(&grid_path)?;

        debug!(
            "Opened {} cell store at {} ({} points)",
            format.extension(),
            root.display(),
            grid.len()
        );

        Ok(Self {
            root: root.to_path_buf(),
            grid,
            format,
            parameters: None,
            bulk: false,
            cache: HashMap::new(),
        })
    }

    /// Restrict reads to `parameters`.
    pub fn with_parameters(mut self, parameters: Option<Vec<String>>) -> Self {
        self.parameters = parameters;
        self
    }

    /// Keep whole cells in memory after their first read.
    pub fn with_bulk(mut self, bulk: bool) -> Self {
        self.bulk = bulk;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn cached_cells(&self) -> usize {
        self.cache.len()
    }

    pub fn cell_path(&self, cell: u32) -> PathBuf {
        self.root
            .join(format!("{:04}.{}", cell, self.format.extension()))
    }

    /// Cell files present in the directory.
    pub fn available_cells(&self) -> Result<Vec<u32>> {
        let pattern = self.root.join(format!("*.{}", self.format.extension()));
        let pattern = pattern.to_string_lossy();
        let paths = glob::glob(&pattern)
            .map_err(|e| SmError::format(&self.root, format!("bad cell pattern: {}", e)))?;

        let mut cells: Vec<u32> = paths
            .filter_map(|entry| entry.ok())
            .filter_map(|path| {
                path.file_stem()
                    .and_then(|stem| stem.to_str())
                    .and_then(|stem| stem.parse::<u32>().ok())
            })
            .collect();
        cells.sort_unstable();
        Ok(cells)
    }

    fn load_cell(&self, cell: u32) -> Result<Option<DataFrame>> {
        let path = self.cell_path(cell);
        if !path.is_file() {
            debug!("No cell file {}", path.display());
            return Ok(None);
        }

        let df = match self.format {
            CellFormat::Parquet => ParquetReader::new(File::open(&path)?).finish(),
            CellFormat::Csv => CsvReadOptions::default()
                .with_has_header(true)
                .try_into_reader_with_file_path(Some(path.clone()))?
                .finish(),
        }
        .map_err(|e| SmError::format(&path, e.to_string()))?;

        for required in [GPI_COLUMN, INDEX_COLUMN] {
            if df.column(required).is_err() {
                return Err(SmError::format(
                    &path,
                    format!("cell file lacks column '{}'", required),
                ));
            }
        }
        Ok(Some(df))
    }

    fn cell_frame(&mut self, cell: u32) -> Result<Option<DataFrame>> {
        if let Some(df) = self.cache.get(&cell) {
            debug!("Cell {} served from cache", cell);
            return Ok(Some(df.clone()));
        }
        let loaded = self.load_cell(cell)?;
        if self.bulk {
            if let Some(df) = &loaded {
                self.cache.insert(cell, df.clone());
            }
        }
        Ok(loaded)
    }

    fn rows_of_gpi(&self, df: &DataFrame, gpi: u64, path: &Path) -> Result<DataFrame> {
        let mask: Vec<bool> = df
            .column(GPI_COLUMN)?
            .cast(&DataType::Float64)?
            .f64()?
            .into_iter()
            .map(|v| v == Some(gpi as f64))
            .collect();
        let mask = BooleanChunked::from_slice("mask".into(), &mask);
        let rows = df.filter(&mask)?.drop(GPI_COLUMN)?;

        match &self.parameters {
            None => Ok(rows),
            Some(parameters) => {
                let mut selection: Vec<PlSmallStr> = vec![INDEX_COLUMN.into()];
                for parameter in parameters {
                    if rows.column(parameter).is_err() {
                        return Err(SmError::ColumnNotFound {
                            column: parameter.clone(),
                            dataset: Some(path.display().to_string()),
                        });
                    }
                    selection.push(parameter.as_str().into());
                }
                Ok(rows.select(selection)?)
            }
        }
    }
}

/// Turn a raw cell table with a `time` column of strings, dates or
/// datetimes into a [`TimeSeriesFrame`].
fn to_frame(rows: DataFrame, path: &Path) -> Result<TimeSeriesFrame> {
    let dtype = rows.column(INDEX_COLUMN)?.dtype().clone();
    if !matches!(dtype, DataType::String) {
        return TimeSeriesFrame::from_dataframe(rows, INDEX_COLUMN);
    }

    let parsed: Vec<Option<chrono::NaiveDateTime>> = rows
        .column(INDEX_COLUMN)?
        .str()?
        .into_iter()
        .map(|v| v.and_then(parse_timestamp))
        .collect();

    let invalid = parsed.iter().filter(|v| v.is_none()).count();
    let rows = if invalid > 0 {
        warn!(
            "Dropping {} rows with unparseable timestamps in {}",
            invalid,
            path.display()
        );
        let keep: Vec<bool> = parsed.iter().map(Option::is_some).collect();
        rows.filter(&BooleanChunked::from_slice("mask".into(), &keep))?
    } else {
        rows
    };

    let index: Vec<chrono::NaiveDateTime> = parsed.into_iter().flatten().collect();
    TimeSeriesFrame::from_parts(&index, rows.drop(INDEX_COLUMN)?)
}

impl CellReader for CellFileReader {
    fn read_gpi(&mut self, gpi: u64) -> Result<TimeSeriesFrame> {
        let Some(cell) = self.grid.gpi_to_cell(gpi) else {
            debug!("gpi {} not in grid of {}", gpi, self.root.display());
            return Ok(TimeSeriesFrame::empty());
        };

        let Some(df) = self.cell_frame(cell)? else {
            return Ok(TimeSeriesFrame::empty());
        };

        let path = self.cell_path(cell);
        let rows = self.rows_of_gpi(&df, gpi, &path)?;
        to_frame(rows, &path)?.sort_by_index()
    }

    fn grid(&self) -> &Grid {
        &self.grid
    }

    fn parameters(&self) -> Option<&[String]> {
        self.parameters.as_deref()
    }

    fn close(&mut self) {
        if !self.cache.is_empty() {
            debug!("Releasing {} cached cells", self.cache.len());
        }
        self.cache.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write_store(dir: &Path) {
        fs::write(
            dir.join(GRID_FILE_NAME),
            "gpi,lon,lat,cell\n1,16.0,48.0,5\n2,16.25,48.0,5\n3,30.0,10.0,9\n",
        )
        .unwrap();
        fs::write(
            dir.join("0005.csv"),
            "gpi,time,sm,flag\n\
             1,2020-01-02,0.2,1\n\
             1,2020-01-01,0.3,0\n\
             2,2020-01-01,0.4,0\n\
             1,not-a-date,0.5,0\n",
        )
        .unwrap();
    }

    #[test]
    fn test_read_gpi_sorted_and_filtered() {
        let tmp = TempDir::new().unwrap();
        write_store(tmp.path());

        let mut reader = CellFileReader::open(tmp.path(), CellFormat::Csv).unwrap();
        let frame = reader.read_gpi(1).unwrap();

        assert_eq!(frame.len(), 2);
        assert_eq!(frame.column_names(), vec!["sm".to_string(), "flag".to_string()]);
        assert_eq!(frame.values("sm").unwrap(), vec![0.3, 0.2]);
        assert!(frame.is_index_monotonic().unwrap());
    }

    #[test]
    fn test_parameter_selection() {
        let tmp = TempDir::new().unwrap();
        write_store(tmp.path());

        let mut reader = CellFileReader::open(tmp.path(), CellFormat::Csv)
            .unwrap()
            .with_parameters(Some(vec!["flag".to_string()]));
        assert_eq!(reader.read_gpi(2).unwrap().column_names(), vec!["flag".to_string()]);

        let mut reader = CellFileReader::open(tmp.path(), CellFormat::Csv)
            .unwrap()
            .with_parameters(Some(vec!["missing".to_string()]));
        assert!(matches!(
            reader.read_gpi(2),
            Err(SmError::ColumnNotFound { .. })
        ));
    }

    #[test]
    fn test_missing_cell_and_unknown_gpi_are_empty() {
        let tmp = TempDir::new().unwrap();
        write_store(tmp.path());

        let mut reader = CellFileReader::open(tmp.path(), CellFormat::Csv).unwrap();
        assert!(reader.read_gpi(3).unwrap().is_empty());
        assert!(reader.read_gpi(42).unwrap().is_empty());
    }

    #[test]
    fn test_bulk_cache_lifecycle() {
        let tmp = TempDir::new().unwrap();
        write_store(tmp.path());

        let mut reader = CellFileReader::open(tmp.path(), CellFormat::Csv)
            .unwrap()
            .with_bulk(true);
        reader.read_gpi(1).unwrap();
        assert_eq!(reader.cached_cells(), 1);

        // served from memory even after the file disappears
        fs::remove_file(tmp.path().join("0005.csv")).unwrap();
        assert_eq!(reader.read_gpi(2).unwrap().len(), 1);

        reader.close();
        assert_eq!(reader.cached_cells(), 0);
        assert!(reader.read_gpi(2).unwrap().is_empty());
    }

    #[test]
    fn test_missing_grid() {
        let tmp = TempDir::new().unwrap();
        assert!(matches!(
            CellFileReader::open(tmp.path(), CellFormat::Parquet),
            Err(SmError::Format { .. })
        ));
    }

    #[test]
    fn test_available_cells() {
        let tmp = TempDir::new().unwrap();
        write_store(tmp.path());
        fs::write(tmp.path().join("0002.csv"), "gpi,time\n").unwrap();
        fs::write(tmp.path().join("notes.csv"), "x\n").unwrap();

        let reader = CellFileReader::open(tmp.path(), CellFormat::Csv).unwrap();
        assert_eq!(reader.available_cells().unwrap(), vec![2, 5]);
    }
}

//! Point lookup grids.
//!
//! A grid lists every grid point index (gpi) of a dataset with its
//! coordinates and the cell file that stores it. Lookups by coordinate use
//! great circle distance to the nearest point.

use crate::constants::{EARTH_RADIUS_KM, GPI_COLUMN};
use crate::error::{Result, SmError};
use polars::prelude::*;
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use tracing::debug;

/// One grid point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridPoint {
    pub gpi: u64,
    pub lon: f64,
    pub lat: f64,
    pub cell: u32,
}

/// Collection of grid points with O(1) lookups by gpi.
#[derive(Debug, Clone, Default)]
pub struct Grid {
    points: Vec<GridPoint>,
    by_gpi: HashMap<u64, usize>,
}

/// Great circle distance in km between two coordinates in degrees.
pub fn haversine_km(lon1: f64, lat1: f64, lon2: f64, lat2: f64) -> f64 {
    let (phi1, phi2) = (lat1.to_radians(), lat2.to_radians());
    let dphi = (lat2 - lat1).to_radians();
    let dlambda = (lon2 - lon1).to_radians();
    let a = (dphi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (dlambda / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * a.sqrt().min(1.0).asin()
}

impl Grid {
    pub fn new(points: Vec<GridPoint>) -> Result<Self> {
        let mut by_gpi = HashMap::with_capacity(points.len());
        for (i, point) in points.iter().enumerate() {
            if by_gpi.insert(point.gpi, i).is_some() {
                return Err(SmError::unsupported(
                    format!("duplicate gpi {} in grid", point.gpi),
                    None,
                ));
            }
        }
        Ok(Self { points, by_gpi })
    }

    /// Load `gpi,lon,lat,cell` rows from a CSV grid definition.
    pub fn from_csv(path: &Path) -> Result<Self> {
        let df = CsvReadOptions::default()
            .with_has_header(true)
            .try_into_reader_with_file_path(Some(path.to_path_buf()))?
            .finish()
            .map_err(|e| SmError::format(path, format!("unreadable grid file: {}", e)))?;

        let column = |name: &str| -> Result<Vec<Option<f64>>> {
            let col = df
                .column(name)
                .map_err(|_| SmError::format(path, format!("grid file lacks column '{}'", name)))?;
            Ok(col
                .cast(&DataType::Float64)?
                .f64()?
                .into_iter()
                .collect())
        };

        let gpis = column(GPI_COLUMN)?;
        let lons = column("lon")?;
        let lats = column("lat")?;
        let cells = column("cell")?;

        let mut points = Vec::with_capacity(gpis.len());
        for (row, (((gpi, lon), lat), cell)) in gpis
            .into_iter()
            .zip(lons)
            .zip(lats)
            .zip(cells)
            .enumerate()
        {
            match (gpi, lon, lat, cell) {
                (Some(gpi), Some(lon), Some(lat), Some(cell)) if gpi >= 0.0 && cell >= 0.0 => {
                    points.push(GridPoint {
                        gpi: gpi as u64,
                        lon,
                        lat,
                        cell: cell as u32,
                    });
                }
                _ => {
                    return Err(SmError::format(
                        path,
                        format!("incomplete grid row {}", row + 1),
                    ));
                }
            }
        }

        debug!("Loaded grid with {} points from {}", points.len(), path.display());
        Self::new(points)
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn points(&self) -> &[GridPoint] {
        &self.points
    }

    pub fn get(&self, gpi: u64) -> Option<&GridPoint> {
        self.by_gpi.get(&gpi).map(|&i| &self.points[i])
    }

    pub fn gpi_to_lonlat(&self, gpi: u64) -> Option<(f64, f64)> {
        self.get(gpi).map(|p| (p.lon, p.lat))
    }

    pub fn gpi_to_cell(&self, gpi: u64) -> Option<u32> {
        self.get(gpi).map(|p| p.cell)
    }

    /// Cells present in the grid, ascending.
    pub fn cells(&self) -> Vec<u32> {
        self.points
            .iter()
            .map(|p| p.cell)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Nearest grid point within `max_dist_km`, with its distance.
    ///
    /// Ties are broken by the lower gpi.
    pub fn find_nearest_gpi(&self, lon: f64, lat: f64, max_dist_km: f64) -> Option<(u64, f64)> {
        self.points
            .iter()
            .map(|p| (p.gpi, haversine_km(lon, lat, p.lon, p.lat)))
            .filter(|(_, dist)| *dist <= max_dist_km)
            .min_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)))
    }

    /// Grid restricted to the given cells.
    pub fn subset_cells(&self, cells: &[u32]) -> Result<Self> {
        Self::new(
            self.points
                .iter()
                .filter(|p| cells.contains(&p.cell))
                .copied()
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn sample_grid() -> Grid {
        Grid::new(vec![
            GridPoint { gpi: 10, lon: 16.0, lat: 48.0, cell: 1 },
            GridPoint { gpi: 11, lon: 16.25, lat: 48.0, cell: 1 },
            GridPoint { gpi: 20, lon: -100.0, lat: 40.0, cell: 7 },
        ])
        .unwrap()
    }

    #[test]
    fn test_nearest_gpi() {
        let grid = sample_grid();
        let (gpi, dist) = grid.find_nearest_gpi(16.2, 48.01, 50.0).unwrap();
        assert_eq!(gpi, 11);
        assert!(dist < 5.0);
        assert!(grid.find_nearest_gpi(0.0, 0.0, 50.0).is_none());
    }

    #[test]
    fn test_tie_prefers_lower_gpi() {
        let grid = sample_grid();
        let (gpi, _) = grid.find_nearest_gpi(16.125, 48.0, 50.0).unwrap();
        assert_eq!(gpi, 10);
    }

    #[test]
    fn test_lookups() {
        let grid = sample_grid();
        assert_eq!(grid.gpi_to_cell(20), Some(7));
        assert_eq!(grid.gpi_to_lonlat(10), Some((16.0, 48.0)));
        assert_eq!(grid.cells(), vec![1, 7]);
        assert_eq!(grid.subset_cells(&[7]).unwrap().len(), 1);
        assert!(grid.get(99).is_none());
    }

    #[test]
    fn test_duplicate_gpi_rejected() {
        let point = GridPoint { gpi: 1, lon: 0.0, lat: 0.0, cell: 0 };
        assert!(Grid::new(vec![point, point]).is_err());
    }

    #[test]
    fn test_from_csv() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("grid.csv");
        fs::write(&path, "gpi,lon,lat,cell\n1,10.0,45.0,3\n2,10.5,45.0,3\n").unwrap();

        let grid = Grid::from_csv(&path).unwrap();
        assert_eq!(grid.len(), 2);
        assert_eq!(grid.gpi_to_cell(2), Some(3));
    }

    #[test]
    fn test_from_csv_missing_column() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("grid.csv");
        fs::write(&path, "gpi,lon,lat\n1,10.0,45.0\n").unwrap();
        assert!(matches!(
            Grid::from_csv(&path),
            Err(SmError::Format { .. })
        ));
    }

    #[test]
    fn test_haversine_known_distance() {
        // one degree of latitude
        let d = haversine_km(0.0, 0.0, 0.0, 1.0);
        assert!((d - 111.19).abs() < 0.1);
    }
}

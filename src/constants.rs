//! Application constants for the dataset readers
//!
//! Root locations per host class, reserved names and the default values
//! used throughout the reading pipeline.

use crate::models::HostClass;

// =============================================================================
// Path Groups and Roots
// =============================================================================

/// Path group reserved for the fixtures bundled with the repository.
///
/// Skipped by the resolver unless a caller forces it.
pub const TEST_PATH_GROUP: &str = "__test";

/// Local mirror on developer machines
pub const LOCAL_GROUP: &str = "local";

/// Department network share
pub const RADAR_GROUP: &str = "radar";

/// Shared climate archive mount
pub const CLIMERS_GROUP: &str = "climers";

/// Root of the local mirror (expanded with `~`)
pub const LOCAL_ROOT_LIN: &str = "~/shares/home/Data4projects";
pub const LOCAL_ROOT_WIN: &str = "~\\shares\\home\\Data4projects";

/// Root of the radar share
pub const RADAR_ROOT_LIN: &str = "/home/shares/radar";
pub const RADAR_ROOT_WIN: &str = "R:";

/// Root of the climers archive; not mounted on Windows hosts
pub const CLIMERS_ROOT_LIN: &str = "/data-read/USERS/climers";

/// Root of the bundled fixture tree
pub const TEST_DATA_ROOT: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/test-data");

/// Root directory for a group on a host, or `None` when the group is not
/// available there.
pub fn group_root(group: &str, host: HostClass) -> Option<&'static str> {
    match (group, host) {
        (LOCAL_GROUP, HostClass::Lin) => Some(LOCAL_ROOT_LIN),
        (LOCAL_GROUP, HostClass::Win) => Some(LOCAL_ROOT_WIN),
        (RADAR_GROUP, HostClass::Lin) => Some(RADAR_ROOT_LIN),
        (RADAR_GROUP, HostClass::Win) => Some(RADAR_ROOT_WIN),
        (CLIMERS_GROUP, HostClass::Lin) => Some(CLIMERS_ROOT_LIN),
        (TEST_PATH_GROUP, _) => Some(TEST_DATA_ROOT),
        _ => None,
    }
}

// =============================================================================
// Table Layout
// =============================================================================

/// Name of the timestamp index column of every time series table
pub const INDEX_COLUMN: &str = "time";

/// Grid point index column in grid and cell files
pub const GPI_COLUMN: &str = "gpi";

/// Grid definition file inside a dataset directory
pub const GRID_FILE_NAME: &str = "grid.csv";

/// Suffix of companion columns written by the anomaly adapter
pub const CLIMATOLOGY_SUFFIX: &str = "_climatology";

// =============================================================================
// Reader Defaults
// =============================================================================

/// Maximum distance (km) between a requested coordinate and its grid point
pub const DEFAULT_MAX_DIST_KM: f64 = 50.0;

/// Mean Earth radius used for great circle distances (km)
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Default number of parallel workers for the pool driver
pub const DEFAULT_PARALLEL_WORKERS: usize = 4;

// =============================================================================
// Anomaly Defaults
// =============================================================================

/// Moving average window (days) applied to the series before building a climatology
pub const DEFAULT_MOVING_AVG_ORIG: f64 = 5.0;

/// Moving average window (days) applied to the day-of-year climatology
pub const DEFAULT_MOVING_AVG_CLIM: f64 = 30.0;

/// Observations a day of year needs before its climatology is defined
pub const DEFAULT_MIN_OBS_CLIM: usize = 1;

/// Window (days) for moving-average anomalies
pub const DEFAULT_ANOMALY_WINDOW: f64 = 35.0;

/// Days of the climatology year; Feb 29 is always day 60
pub const CLIMATOLOGY_DAYS: usize = 366;

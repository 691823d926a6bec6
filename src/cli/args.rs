//! Command-line argument definitions.
//!
//! The interface covers the registry (listing and path resolution) and
//! reading jobs for one location or a file of locations.

use crate::config::OutputFormat;
use crate::models::{DatasetId, Location};
use anyhow::{Result, bail};
use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::PathBuf;

/// Soil moisture and land surface time series reader
#[derive(Debug, Clone, Parser)]
#[command(
    name = "sm-readers",
    version,
    about = "Resolve dataset locations and read adapted soil moisture time series",
    long_about = "Looks up datasets in the built-in registry, resolves their directories \
                  for the current host and reads per-location time series through a \
                  configurable stack of masking, anomaly, rename and resampling stages."
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Increase verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only log errors
    #[arg(short = 'q', long = "quiet", global = true, conflicts_with = "verbose")]
    pub quiet: bool,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Commands {
    /// List registered datasets
    Datasets(DatasetsArgs),
    /// Resolve the directory of one dataset on this host
    Resolve(ResolveArgs),
    /// Read one location through a job file
    Read(ReadArgs),
    /// Read every location of a points file in parallel
    ReadMany(ReadManyArgs),
}

#[derive(Debug, Clone, ClapArgs)]
pub struct DatasetsArgs {
    /// Only list datasets of this product (case-insensitive)
    #[arg(long, value_name = "NAME")]
    pub product: Option<String>,

    /// Also resolve each dataset's directory
    #[arg(long)]
    pub detailed: bool,
}

#[derive(Debug, Clone, ClapArgs)]
pub struct ResolveArgs {
    /// Identity tokens, e.g. ESA_CCI_SM v061 COMBINED
    #[arg(required = true, num_args = 1..)]
    pub tokens: Vec<String>,

    /// Use only this path group
    #[arg(long = "force-group", value_name = "GROUP")]
    pub force_group: Option<String>,

    /// Do not skip the test fixture group
    #[arg(long = "include-test")]
    pub include_test: bool,
}

impl ResolveArgs {
    pub fn dataset_id(&self) -> DatasetId {
        DatasetId::new(self.tokens.iter().cloned())
    }
}

#[derive(Debug, Clone, ClapArgs)]
pub struct ReadArgs {
    /// YAML job file
    #[arg(short = 'j', long = "job", value_name = "PATH")]
    pub job: PathBuf,

    #[arg(long, allow_hyphen_values = true, requires = "lat", conflicts_with = "gpi")]
    pub lon: Option<f64>,

    #[arg(long, allow_hyphen_values = true, requires = "lon")]
    pub lat: Option<f64>,

    /// Grid point index
    #[arg(long)]
    pub gpi: Option<u64>,

    /// Write the table here instead of printing a summary
    #[arg(short = 'o', long = "output", value_name = "PATH")]
    pub output: Option<PathBuf>,

    /// Output format, overriding the job file
    #[arg(long, value_enum)]
    pub format: Option<OutputFormat>,
}

impl ReadArgs {
    pub fn location(&self) -> Result<Location> {
        match (self.gpi, self.lon, self.lat) {
            (Some(gpi), None, None) => Ok(Location::Gpi(gpi)),
            (None, Some(lon), Some(lat)) => {
                if !(-180.0..=180.0).contains(&lon) || !(-90.0..=90.0).contains(&lat) {
                    bail!("Coordinates out of range: lon {}, lat {}", lon, lat);
                }
                Ok(Location::LonLat { lon, lat })
            }
            _ => bail!("Give either --gpi or both --lon and --lat"),
        }
    }
}

#[derive(Debug, Clone, ClapArgs)]
pub struct ReadManyArgs {
    /// YAML job file
    #[arg(short = 'j', long = "job", value_name = "PATH")]
    pub job: PathBuf,

    /// CSV file with either a `gpi` column or `lon` and `lat` columns
    #[arg(short = 'p', long = "points", value_name = "PATH")]
    pub points: PathBuf,

    /// One table per location is written here
    #[arg(short = 'o', long = "output-dir", value_name = "PATH")]
    pub output_dir: PathBuf,

    /// Number of workers, overriding the job file
    #[arg(short = 'w', long)]
    pub workers: Option<usize>,

    /// Skip failing locations instead of stopping
    #[arg(long = "ignore-errors")]
    pub ignore_errors: bool,

    /// Output format, overriding the job file
    #[arg(long, value_enum)]
    pub format: Option<OutputFormat>,
}

impl Args {
    pub fn get_log_level(&self) -> &'static str {
        if self.quiet {
            "error"
        } else {
            match self.verbose {
                0 => "warn",
                1 => "info",
                2 => "debug",
                _ => "trace",
            }
        }
    }

    pub fn show_progress(&self) -> bool {
        !self.quiet
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_read_by_gpi() {
        let args = Args::parse_from(["sm-readers", "read", "--job", "job.yml", "--gpi", "3"]);
        match args.command {
            Some(Commands::Read(read)) => {
                assert_eq!(read.location().unwrap(), Location::Gpi(3));
            }
            other => panic!("Expected read command, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_read_by_lonlat() {
        let args = Args::parse_from([
            "sm-readers", "read", "-j", "job.yml", "--lon", "-10.5", "--lat", "45",
        ]);
        let Some(Commands::Read(read)) = args.command else {
            panic!("Expected read command");
        };
        assert_eq!(read.location().unwrap(), Location::LonLat { lon: -10.5, lat: 45.0 });
    }

    #[test]
    fn test_location_out_of_range() {
        let args = Args::parse_from([
            "sm-readers", "read", "-j", "job.yml", "--lon", "200", "--lat", "45",
        ]);
        let Some(Commands::Read(read)) = args.command else {
            panic!("Expected read command");
        };
        assert!(read.location().is_err());
    }

    #[test]
    fn test_gpi_and_lonlat_conflict() {
        let result = Args::try_parse_from([
            "sm-readers", "read", "-j", "job.yml", "--gpi", "1", "--lon", "1", "--lat", "1",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_resolve_tokens() {
        let args = Args::parse_from(["sm-readers", "resolve", "ERA5", "v20190613", "--include-test"]);
        let Some(Commands::Resolve(resolve)) = args.command else {
            panic!("Expected resolve command");
        };
        assert_eq!(resolve.dataset_id(), DatasetId::from(["ERA5", "v20190613"]));
        assert!(resolve.include_test);
    }

    #[test]
    fn test_log_levels() {
        assert_eq!(Args::parse_from(["sm-readers"]).get_log_level(), "warn");
        assert_eq!(Args::parse_from(["sm-readers", "-vv"]).get_log_level(), "debug");
        assert_eq!(Args::parse_from(["sm-readers", "-q"]).get_log_level(), "error");
    }
}

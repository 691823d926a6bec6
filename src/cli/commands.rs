//! Command implementations for the command-line interface.

use crate::cli::args::{Args, Commands, DatasetsArgs, ReadArgs, ReadManyArgs, ResolveArgs};
use crate::config::{JobConfig, OutputConfig, OutputFormat};
use crate::frame::TimeSeriesFrame;
use crate::models::{DatasetSource, Location};
use crate::multi::MultiDatasetReader;
use crate::paths::ResolveOptions;
use crate::pool::{ErrorPolicy, parallel_process};
use crate::readers::TimeSeriesReader;
use crate::registry::{self, Registry};
use crate::tags::TagConverters;
use anyhow::{Context, Result, bail};
use colored::*;
use polars::prelude::*;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info};

/// Main command runner
pub async fn run(args: Args) -> Result<()> {
    setup_logging(&args)?;
    debug!("Command line arguments: {:?}", args);

    let registry = registry::global().context("Built-in dataset registry is inconsistent")?;

    match &args.command {
        Some(Commands::Datasets(cmd)) => run_datasets(registry, cmd),
        Some(Commands::Resolve(cmd)) => run_resolve(registry, cmd),
        Some(Commands::Read(cmd)) => run_read(registry, cmd),
        Some(Commands::ReadMany(cmd)) => run_read_many(registry, cmd, args.show_progress()).await,
        None => bail!("No command given; see --help"),
    }
}

/// Set up structured logging based on CLI arguments
fn setup_logging(args: &Args) -> Result<()> {
    use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

    let log_level = args.get_log_level();
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("sm_readers={}", log_level)));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_target(false)
                .with_level(true)
                .with_writer(std::io::stderr)
                .compact(),
        )
        .try_init()
        .context("Failed to initialise logging")?;

    debug!("Logging initialized at level: {}", log_level);
    Ok(())
}

fn run_datasets(registry: &Registry, args: &DatasetsArgs) -> Result<()> {
    let options = ResolveOptions::default();

    for family in registry.families() {
        let entries: Vec<_> = registry
            .entries()
            .filter(|entry| std::ptr::eq(entry.product, *family))
            .filter(|entry| match &args.product {
                Some(product) => entry.id.product().eq_ignore_ascii_case(product),
                None => true,
            })
            .collect();
        if entries.is_empty() {
            continue;
        }

        println!("{}", family.family.bold());
        for entry in entries {
            if !args.detailed {
                println!("  {}", entry.id.to_string().green());
                continue;
            }
            println!(
                "  {} groups: {}",
                entry.id.to_string().green(),
                entry.paths.group_names().join(", ")
            );
            match registry.resolve(&DatasetSource::Id(entry.id.clone()), &options) {
                Ok(resolved) => println!(
                    "    {} {}",
                    format!("[{}]", resolved.group.as_deref().unwrap_or("-")).cyan(),
                    resolved.path.display().to_string().dimmed()
                ),
                Err(_) => println!("    {}", "unavailable".yellow()),
            }
        }
    }
    println!("{} datasets registered", registry.len());
    Ok(())
}

fn run_resolve(registry: &Registry, args: &ResolveArgs) -> Result<()> {
    let id = args.dataset_id();
    let mut options = ResolveOptions::default();
    if args.include_test {
        options = options.with_ignore_path_groups(Vec::new());
    }
    if let Some(group) = &args.force_group {
        options = options.with_force_path_group(group);
    }

    let resolved = registry.resolve(&DatasetSource::Id(id.clone()), &options)?;
    println!(
        "{} {} {}",
        id.to_string().green(),
        format!("[{}]", resolved.group.as_deref().unwrap_or("-")).cyan(),
        resolved.path.display()
    );
    Ok(())
}

fn load_job(path: &Path, format: Option<OutputFormat>) -> Result<JobConfig> {
    let job = JobConfig::from_file(path)
        .with_context(|| format!("Failed to load job file {}", path.display()))?;
    Ok(match format {
        Some(format) => job.with_output_format(format),
        None => job,
    })
}

fn run_read(registry: &'static Registry, args: &ReadArgs) -> Result<()> {
    let location = args.location()?;
    let job = load_job(&args.job, args.format)?;
    let config = job.to_multi_config(&TagConverters::default())?;

    let mut reader = MultiDatasetReader::new(registry, config)?;
    for id in reader.unavailable() {
        println!("{} {} is unavailable and contributes no columns", "warning:".yellow(), id);
    }
    let frame = reader.read(location)?;
    reader.close();

    match &args.output {
        Some(path) => {
            write_frame(&frame, path, &job.output)?;
            println!("{} {} rows to {}", "Wrote".green(), frame.len(), path.display());
        }
        None => print_summary(location, &frame)?,
    }
    Ok(())
}

fn print_summary(location: Location, frame: &TimeSeriesFrame) -> Result<()> {
    println!("{} {}", "Location".bold(), location);
    if frame.is_empty() {
        println!("{}", "No data".yellow());
        return Ok(());
    }
    let index = frame.index()?;
    if let (Some(first), Some(last)) = (index.iter().min(), index.iter().max()) {
        println!("{} rows from {} to {}", frame.len(), first, last);
    }
    println!("{}", frame.dataframe().head(Some(10)));
    Ok(())
}

async fn run_read_many(registry: &'static Registry, args: &ReadManyArgs, show_progress: bool) -> Result<()> {
    let start = Instant::now();
    let mut job = load_job(&args.job, args.format)?;
    if let Some(workers) = args.workers {
        job = job.with_workers(workers);
    }
    if args.ignore_errors {
        job = job.with_error_policy(ErrorPolicy::Ignore);
    }
    let pool = job.pool.clone().with_progress(show_progress);
    let config = job.to_multi_config(&TagConverters::default())?;

    let locations = load_points(&args.points)?;
    fs::create_dir_all(&args.output_dir)
        .with_context(|| format!("Failed to create {}", args.output_dir.display()))?;
    info!("Reading {} locations with {} workers", locations.len(), pool.workers);

    let output_dir = args.output_dir.clone();
    let output = job.output.clone();
    let total = locations.len();

    let results = parallel_process(
        locations,
        move || MultiDatasetReader::new(registry, config.clone()),
        move |reader: &mut MultiDatasetReader, location: Location| {
            let frame = reader.read(location)?;
            let path = output_path(&output_dir, location, output.format);
            write_frame(&frame, &path, &output)?;
            Ok(frame.len())
        },
        &pool,
    )
    .await?;

    let written = results.iter().flatten().count();
    let rows: usize = results.iter().flatten().sum();
    println!(
        "{} {}/{} locations, {} rows in {:.1}s",
        "Done:".green().bold(),
        written,
        total,
        rows,
        start.elapsed().as_secs_f64()
    );
    if written < total {
        println!("{} {} locations failed", "warning:".yellow(), total - written);
    }
    Ok(())
}

/// File name of one location's table.
pub fn output_path(dir: &Path, location: Location, format: OutputFormat) -> PathBuf {
    let stem = match location {
        Location::Gpi(gpi) => format!("gpi_{}", gpi),
        Location::LonLat { lon, lat } => format!("lon{:.4}_lat{:.4}", lon, lat),
    };
    dir.join(format!("{}.{}", stem, format.extension()))
}

/// Write a table as CSV or Parquet.
pub fn write_frame(frame: &TimeSeriesFrame, path: &Path, output: &OutputConfig) -> crate::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let mut df = frame.dataframe().clone();
    let file = File::create(path)?;
    match output.format {
        OutputFormat::Csv => {
            CsvWriter::new(file).include_header(true).finish(&mut df)?;
        }
        OutputFormat::Parquet => {
            ParquetWriter::new(file)
                .with_compression(output.compression.to_polars_compression())
                .finish(&mut df)?;
        }
    }
    debug!("Wrote {} rows to {}", df.height(), path.display());
    Ok(())
}

/// Read locations from a CSV file with a `gpi` column or `lon`/`lat` columns.
pub fn load_points(path: &Path) -> Result<Vec<Location>> {
    let df = CsvReadOptions::default()
        .with_has_header(true)
        .try_into_reader_with_file_path(Some(path.to_path_buf()))?
        .finish()
        .with_context(|| format!("Failed to read points file {}", path.display()))?;

    if let Ok(column) = df.column("gpi") {
        let gpis = column.cast(&DataType::UInt64)?;
        return gpis
            .u64()?
            .into_iter()
            .enumerate()
            .map(|(row, gpi)| match gpi {
                Some(gpi) => Ok(Location::Gpi(gpi)),
                None => bail!("Missing gpi in row {} of {}", row + 1, path.display()),
            })
            .collect();
    }

    let (Ok(lon), Ok(lat)) = (df.column("lon"), df.column("lat")) else {
        bail!("{} needs a 'gpi' column or 'lon' and 'lat' columns", path.display());
    };
    let lon = lon.cast(&DataType::Float64)?;
    let lat = lat.cast(&DataType::Float64)?;
    lon.f64()?
        .into_iter()
        .zip(lat.f64()?.into_iter())
        .enumerate()
        .map(|(row, pair)| match pair {
            (Some(lon), Some(lat)) => Ok(Location::LonLat { lon, lat }),
            _ => bail!("Missing coordinate in row {} of {}", row + 1, path.display()),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::testing::day;
    use crate::config::CompressionAlgorithm;
    use tempfile::TempDir;

    #[test]
    fn test_load_gpi_points() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("points.csv");
        fs::write(&path, "gpi\n3\n1\n").unwrap();
        assert_eq!(
            load_points(&path).unwrap(),
            vec![Location::Gpi(3), Location::Gpi(1)]
        );
    }

    #[test]
    fn test_load_lonlat_points() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("points.csv");
        fs::write(&path, "lon,lat\n10.5,45.0\n-3.25,50.0\n").unwrap();
        assert_eq!(
            load_points(&path).unwrap(),
            vec![
                Location::LonLat { lon: 10.5, lat: 45.0 },
                Location::LonLat { lon: -3.25, lat: 50.0 },
            ]
        );
    }

    #[test]
    fn test_points_without_location_columns() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("points.csv");
        fs::write(&path, "x,y\n1,2\n").unwrap();
        assert!(load_points(&path).is_err());
    }

    #[test]
    fn test_output_path_names() {
        let dir = Path::new("out");
        assert_eq!(
            output_path(dir, Location::Gpi(7), OutputFormat::Parquet),
            dir.join("gpi_7.parquet")
        );
        assert_eq!(
            output_path(dir, Location::LonLat { lon: 1.5, lat: -2.0 }, OutputFormat::Csv),
            dir.join("lon1.5000_lat-2.0000.csv")
        );
    }

    #[test]
    fn test_write_frame_formats() {
        let dir = TempDir::new().unwrap();
        let frame = TimeSeriesFrame::from_columns(
            vec![day(1), day(2)],
            vec![("sm".to_string(), vec![0.1, 0.2])],
        )
        .unwrap();

        let csv = dir.path().join("nested").join("a.csv");
        write_frame(&frame, &csv, &OutputConfig::default()).unwrap();
        let text = fs::read_to_string(&csv).unwrap();
        assert!(text.starts_with("time,sm"));
        assert_eq!(text.lines().count(), 3);

        let parquet = dir.path().join("a.parquet");
        let output = OutputConfig {
            format: OutputFormat::Parquet,
            compression: CompressionAlgorithm::Zstd,
        };
        write_frame(&frame, &parquet, &output).unwrap();
        let df = ParquetReader::new(File::open(&parquet).unwrap()).finish().unwrap();
        assert_eq!(df.height(), 2);
    }
}

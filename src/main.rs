use clap::Parser;
use sm_readers::cli::{args::Args, commands};
use std::process;

fn main() {
    let args = Args::parse();

    if args.command.is_none() {
        show_help_and_commands();
        process::exit(0);
    }

    let runtime = tokio::runtime::Runtime::new().unwrap_or_else(|e| {
        eprintln!("Failed to create async runtime: {}", e);
        process::exit(1);
    });

    let result = runtime.block_on(async {
        tokio::select! {
            result = commands::run(args) => result,
            _ = tokio::signal::ctrl_c() => {
                eprintln!("\nReceived CTRL+C, shutting down...");
                Err(anyhow::anyhow!("Interrupted by user"))
            }
        }
    });

    if let Err(error) = result {
        eprintln!("Error: {:#}", error);
        process::exit(1);
    }
}

/// Show help information and available commands when no subcommand is provided
fn show_help_and_commands() {
    println!("sm-readers - soil moisture time series reader");
    println!("=============================================");
    println!();
    println!("USAGE:");
    println!("    sm-readers <COMMAND> [OPTIONS]");
    println!();
    println!("COMMANDS:");
    println!("    datasets    List registered datasets");
    println!("    resolve     Resolve the directory of one dataset on this host");
    println!("    read        Read one location through a job file");
    println!("    read-many   Read every location of a points file in parallel");
    println!();
    println!("EXAMPLES:");
    println!("    sm-readers datasets --product ESA_CCI_SM --detailed");
    println!("    sm-readers resolve ERA5 v20190613 --force-group radar");
    println!("    sm-readers read --job job.yml --lon 15.2 --lat 48.1 --output ts.csv");
    println!("    sm-readers read-many --job job.yml --points points.csv --output-dir out -w 8");
    println!();
    println!("For detailed help on any command, use:");
    println!("    sm-readers <COMMAND> --help");
}

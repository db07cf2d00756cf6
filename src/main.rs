mod commands;
mod console;
mod logging;

use std::io::{self, Write};
use std::process;

use clap::{CommandFactory, Parser};
use colored::*;
use commands::{Cli, Commands, ScanArgs};
use console::CliReporter;
use dotenv::dotenv;
use shoebox::state::ScanStateStore;
use shoebox::storage::Database;
use shoebox::{ScanEngine, ScanSummary};
use tracing::{error, info};

fn main() -> anyhow::Result<()> {
    dotenv().ok();

    let _guard = logging::init_logger();

    let config = match shoebox::config::load_configuration() {
        Ok(config) => config,
        Err(err) => {
            error!("Error loading configuration: {}", err);
            process::exit(1);
        }
    };

    let args = Cli::parse();

    match args.command {
        Some(Commands::Scan(scan_args)) => {
            if let Err(err) = run_scan(config, &scan_args) {
                error!("Error: {}", err);
                process::exit(1);
            }
        }
        Some(Commands::PrintConfig) => {
            println!("Configuration: {:?}", config);
        }
        Some(Commands::StateInfo) => match ScanStateStore::open(config.state_path.as_ref()) {
            Ok(store) => match store.count() {
                Ok(count) => info!("{} entries in the scan-state store", count),
                Err(err) => error!("Error counting scan state: {}", err),
            },
            Err(err) => error!("Error opening scan state: {}", err),
        },
        Some(Commands::ClearState) => {
            match prompt_confirm(
                "Clear the scan state? The next scan will reprocess every file.",
                Some(false),
            ) {
                Ok(true) => match ScanStateStore::open(config.state_path.as_ref()) {
                    Ok(store) => {
                        if let Err(err) = store.clear_all() {
                            error!("Error clearing scan state: {}", err);
                        } else {
                            println!("Scan state cleared");
                        }
                    }
                    Err(err) => error!("Error opening scan state: {}", err),
                },
                _ => {
                    process::exit(0);
                }
            }
        }
        Some(Commands::TruncateDb) => {
            match prompt_confirm(
                "Are you SURE you want to COMPLETELY DELETE the catalog?",
                Some(false),
            ) {
                Ok(true) => match Database::open(&config.db_path) {
                    Ok(db) => {
                        if let Err(err) = db.truncate_all() {
                            error!("Error truncating database: {}", err);
                        } else {
                            println!("All tables truncated");
                        }
                    }
                    Err(err) => error!("Error opening database: {}", err),
                },
                _ => {
                    process::exit(0);
                }
            }
        }
        None => {
            let _ = Cli::command().print_long_help();
        }
    }

    Ok(())
}

fn run_scan(mut config: shoebox::AppConfig, scan_args: &ScanArgs) -> anyhow::Result<()> {
    scan_args.apply(&mut config);

    let db = Database::open(&config.db_path)?;
    let engine = ScanEngine::new(config);
    let reporter = CliReporter::new();
    let summary = engine.scan(&db, &reporter)?;

    println!();
    print_summary(&summary);

    Ok(())
}

fn print_summary(summary: &ScanSummary) {
    info!(
        "{} albums, {} processed, {} skipped, {} errors in {}",
        format!("{}", summary.albums).cyan(),
        format!("{}", summary.processed).green(),
        format!("{}", summary.skipped).green(),
        format!("{}", summary.errors).red(),
        format!("{:.2}s", summary.duration.as_secs_f64()).green(),
    );
    info!(
        "Matched: {} exact, {} copy-index, {} edited-variant",
        format!("{}", summary.matched_exact).green(),
        format!("{}", summary.matched_copy_index).yellow(),
        format!("{}", summary.matched_edited).yellow(),
    );
    info!(
        "Unmatched: {} media, {} sidecars, {} duplicate sidecars",
        format!("{}", summary.unmatched_media).red(),
        format!("{}", summary.unmatched_sidecars).red(),
        format!("{}", summary.duplicate_sidecars).red(),
    );
    if summary.cancelled {
        info!("{}", "Scan was cancelled; resume to pick up where it left off".yellow());
    }
}

fn prompt_confirm(prompt: &str, default: Option<bool>) -> io::Result<bool> {
    let mut input = String::new();

    loop {
        input.clear();

        match default {
            Some(true) => print!("{} (Y/n): ", prompt),
            Some(false) | None => print!("{} (y/N): ", prompt),
        }
        io::stdout().flush()?;

        io::stdin().read_line(&mut input)?;

        match input.trim().to_uppercase().as_str() {
            "Y" => return Ok(true),
            "N" => return Ok(false),
            "" => match default {
                Some(default) => return Ok(default),
                None => continue,
            },
            _ => continue,
        }
    }
}

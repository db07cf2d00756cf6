use clap::{Args, Parser, Subcommand};

use shoebox::AppConfig;

#[derive(Debug, Parser)]
#[command(name = "shoebox")]
#[command(about = "Catalogs exported media archives and their JSON sidecars", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Scan the export tree and catalog every media file
    Scan(ScanArgs),
    /// Print configuration values
    PrintConfig,
    /// Display the number of entries in the scan-state store
    StateInfo,
    /// Clear the scan-state store (the next scan reprocesses everything)
    ClearState,
    /// Truncate all catalog database tables
    TruncateDb,
}

#[derive(Debug, Args)]
pub struct ScanArgs {
    /// Root of the export tree (overrides the configured root_path)
    pub root: Option<String>,

    /// Start from scratch instead of resuming the previous scan
    #[arg(long)]
    pub no_resume: bool,

    /// Extraction workers (0 = one per core)
    #[arg(long)]
    pub cpu_workers: Option<usize>,

    /// File-read workers (0 = twice the core count)
    #[arg(long)]
    pub io_workers: Option<usize>,

    /// Shed workers above this system CPU percentage
    #[arg(long)]
    pub cpu_ceiling: Option<f32>,

    /// Shed workers above this system memory percentage
    #[arg(long)]
    pub memory_ceiling: Option<f32>,
}

impl ScanArgs {
    /// Layer the command-line overrides onto the loaded configuration.
    pub fn apply(&self, config: &mut AppConfig) {
        if let Some(root) = &self.root {
            config.root_path = root.clone();
        }
        if self.no_resume {
            config.resume = false;
        }
        if let Some(n) = self.cpu_workers {
            config.cpu_workers = n;
        }
        if let Some(n) = self.io_workers {
            config.io_workers = n;
        }
        if let Some(pct) = self.cpu_ceiling {
            config.cpu_ceiling_pct = pct;
        }
        if let Some(pct) = self.memory_ceiling {
            config.memory_ceiling_pct = pct;
        }
    }
}

//! Command-line interface definitions and argument parsing

use crate::pipeline::ColumnWindow;
use clap::Parser;
use std::path::PathBuf;

/// Customer cohort retention report from retail transaction data
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to the input CSV file
    #[arg(short, long, default_value = "data.csv")]
    pub input: String,

    /// Directory to write retention_counts.csv and retention_percent.csv into
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,

    /// Fix the matrix to cohort indices 1..=N instead of every observed index
    /// Example: --max-offset 13 for one year of observation
    #[arg(short, long)]
    pub max_offset: Option<u32>,

    /// Decimal places shown for retention percentages
    #[arg(short, long, default_value = "1")]
    pub precision: usize,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,
}

impl Args {
    /// Column window selected by `--max-offset`
    pub fn window(&self) -> crate::Result<ColumnWindow> {
        match self.max_offset {
            None => Ok(ColumnWindow::Dynamic),
            Some(0) => anyhow::bail!("--max-offset must be at least 1"),
            Some(n) => Ok(ColumnWindow::Fixed(n)),
        }
    }

    /// Default log filter when `RUST_LOG` is unset
    pub fn log_filter(&self) -> &'static str {
        if self.verbose {
            "debug"
        } else {
            "info"
        }
    }
}

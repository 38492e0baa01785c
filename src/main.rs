//! CohortForge: cohort retention report CLI
//!
//! This is the main entrypoint that orchestrates data loading, the retention
//! pipeline, and report output.

use anyhow::Result;
use clap::Parser;
use cohortforge::{load_transactions, report, run, Args, CohortReport};
use std::time::Instant;

const COUNTS_FILE: &str = "retention_counts.csv";
const PERCENT_FILE: &str = "retention_percent.csv";

fn main() -> Result<()> {
    let args = Args::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(args.log_filter()))
        .init();

    let window = args.window()?;
    let start_time = Instant::now();

    log::info!("Loading transactions from {}", args.input);
    let transactions = load_transactions(&args.input)?;
    let load_time = start_time.elapsed();
    log::debug!("Loading took {:.2}s", load_time.as_secs_f64());

    let retention = run(transactions, window)?;

    print_report(&args, &retention);

    if let Some(output_dir) = &args.output_dir {
        std::fs::create_dir_all(output_dir)?;
        let counts_path = output_dir.join(COUNTS_FILE);
        let percent_path = output_dir.join(PERCENT_FILE);

        report::write_counts_csv(&retention.counts, &counts_path)?;
        report::write_percent_csv(&retention.percent, &percent_path)?;

        println!("Counts saved to: {}", counts_path.display());
        println!("Percentages saved to: {}", percent_path.display());
    }

    log::info!(
        "Total processing time: {:.2}s",
        start_time.elapsed().as_secs_f64()
    );

    Ok(())
}

fn print_report(args: &Args, retention: &CohortReport) {
    println!("=== Cleaning Summary ===");
    println!("{}\n", report::render_cleaning_summary(&retention.stats));

    if retention.counts.is_empty() {
        println!("No customers to report on.");
        return;
    }

    println!(
        "=== Retention Counts ({} customers, {} cohorts) ===",
        retention.counts.total_customers(),
        retention.counts.cohorts().len()
    );
    println!("{}", report::render_counts(&retention.counts));

    println!("=== Retention (%) ===");
    println!("{}", report::render_percent(&retention.percent, args.precision));
}

use anyhow::{Context, Result};
use clap::Parser;
use log::info;
use mercount::args::CountArgs;
use mercount::config::RunConfig;
use mercount::count;
use mercount::logging::init_logger;

fn main() -> Result<()> {
    let cmdline: Vec<String> = std::env::args().collect();
    let args = CountArgs::parse();
    init_logger(args.verbose);

    let config = RunConfig::from_args(&args, cmdline).context("Invalid arguments")?;
    info!(
        "Counting {}-mers with {} threads into '{}'",
        config.k,
        config.threads,
        config.output.display()
    );

    let report = count::run(&config)
        .with_context(|| format!("Failed to count k-mers into {}", config.output.display()))?;

    if let Some(summary) = &report.merge {
        info!(
            "Merged {} intermediate files: {} distinct k-mers written",
            summary.inputs, summary.records_written
        );
    } else if !report.intermediate_files.is_empty() {
        info!(
            "Left {} intermediate files unmerged",
            report.intermediate_files.len()
        );
    }
    for (phase, elapsed) in &report.timings {
        info!("{:<9}{:.3}s", phase, elapsed.as_secs_f64());
    }
    Ok(())
}

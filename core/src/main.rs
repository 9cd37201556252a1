use breastprep_core::cli::report::CaseReport;
use breastprep_core::cli::{setup_logging, Cli};
use breastprep_core::pipeline::{discover_cases, listing, run_batch, select_range, COOLDOWN_SECS};
use breastprep_core::tools::CommandLineTools;
use breastprep_core::{PipelineOptions, Result};
use clap::Parser;
use log::{error, info, warn};
use std::process;

fn main() {
    let cli = Cli::parse();

    // Setup logging
    setup_logging(cli.verbose);

    if !cli.dcm_dir.is_dir() {
        eprintln!(
            "Error: Data directory not found at {}",
            cli.dcm_dir.display()
        );
        process::exit(1);
    }

    let cases = select_range(discover_cases(&cli.dcm_dir), cli.start, cli.end);
    if cli.list {
        for line in listing(&cases) {
            println!("{}", line);
        }
        return;
    }

    let (options, tools) = match configure(&cli) {
        Ok(configured) => configured,
        Err(e) => {
            error!("Failed to configure pipeline: {}", e);
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    };

    info!("Processing {} case(s) from {}", cases.len(), cli.dcm_dir.display());
    let report = run_batch(&cases, &tools, &options, COOLDOWN_SECS, |summary| {
        info!("\n{}", CaseReport::new(summary));
    });

    info!(
        "Finished: {} completed, {} failed",
        report.completed,
        report.failed.len()
    );
    for case in &report.failed {
        warn!("- Failed: {}", case.display());
    }
}

fn configure(cli: &Cli) -> Result<(PipelineOptions, CommandLineTools)> {
    let support_dir = cli.resolve_support_dir()?;
    info!("Using support directory {}", support_dir.display());
    let options = cli.pipeline_options(&support_dir)?;
    let paths = cli.tool_paths(&support_dir)?;
    if paths.mask_models.is_empty() {
        warn!("No mask model parameter files found; breast masks will not be predicted");
    }
    let tools = CommandLineTools::new(paths, options.force_cpu);
    Ok((options, tools))
}

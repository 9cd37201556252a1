use breastprep_core::adc;
use breastprep_core::cli::{setup_logging, MakeAdcCli};
use breastprep_core::tools::CommandLineTools;
use breastprep_core::ToolPaths;
use clap::Parser;
use log::{error, info};
use std::process;

fn main() {
    let cli = MakeAdcCli::parse();

    // Setup logging
    setup_logging(cli.verbose);

    let dirs = match cli.directories() {
        Ok(dirs) => dirs,
        Err(e) => {
            error!("Failed to collect directories: {}", e);
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    };

    if cli.list {
        for (i, dir) in dirs.iter().enumerate() {
            println!("{}: {}", i, dir.display());
        }
        return;
    }

    let tools = CommandLineTools::new(ToolPaths::default().with_dcm2niix(&cli.dcm2niix), false);
    let created = adc::run(&dirs, &tools, cli.adc_options());
    info!("Created {} ADC map(s)", created.len());
}

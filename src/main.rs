use anyhow::Result;
use clap::Parser;

use virmet::config::PipelineConfig;
use virmet::terminal::{App, Commands};
use virmet::tools::Toolkit;
use virmet::utils::init_logger;


fn main() -> Result<()> {
    let cli = App::parse();

    init_logger(cli.log_file.clone());

    match cli.command {
        Commands::Run(args) => {
            let virmet = args.validate_and_build()?;
            let toolkit = Toolkit::external(&virmet.config);

            log::info!("Running on {} read file(s) of run {}", virmet.inputs.len(), virmet.run_name);
            let report = virmet.run(&toolkit)?;

            for sample in &report.samples {
                let top = sample.organisms.first().map(|o| o.organism.as_str()).unwrap_or("none");
                log::info!("{}: {} organisms detected (most reads: {})", sample.name, sample.organisms.len(), top);
            }
        },
        Commands::Config(args) => {
            PipelineConfig::default().to_json(&args.output)?;
            log::info!("Default configuration written to {}", args.output.display());
        }
    }

    Ok(())
}

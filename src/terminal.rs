use std::path::PathBuf;
use clap::{crate_version, ArgGroup, Args, Parser, Subcommand};

use crate::config::PipelineConfig;
use crate::error::VirmetError;
use crate::pipeline::{Virmet, VirmetBuilder};

#[derive(Debug, Parser)]
#[command(
    version=crate_version!(),
    about="Viral metagenomics: quality filtering, decontamination and viral read classification",
    help_template="\
{before-help}{name} {version}
{about-with-newline}
{usage-heading} {usage}

{all-args}{after-help}
"
)]
#[command(styles=get_styles())]
#[command(arg_required_else_help(true))]
pub struct App {
    /// Output logs to file instead of terminal
    ///
    /// Specify a file path to store the output logs. If not provided,
    /// logs will be displayed in the terminal.
    #[arg(short, long)]
    pub log_file: Option<PathBuf>,

    #[clap(subcommand)]
    pub command: Commands,
}

/// Enumeration of available commands for VirMet.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run the pipeline on a sequencing run directory or a single read file.
    Run(RunArgs),
    /// Write the default pipeline configuration (.json) for editing.
    Config(ConfigArgs),
}

/// Command-line arguments for a pipeline run
#[derive(Args, Debug)]
#[command(group(ArgGroup::new("input").required(true).args(["run", "file"])))]
pub struct RunArgs {
    /// Sequencing run directory
    ///
    /// Read files matching '*_S*.fastq*' are taken from 'Data/Intensities/BaseCalls'
    /// if present, otherwise from the directory itself. One sample directory is
    /// created per read file.
    #[arg(short, long)]
    pub run: Option<PathBuf>,
    /// Single read file (optional .gz)
    #[arg(short, long)]
    pub file: Option<PathBuf>,
    /// Pipeline configuration (.json)
    ///
    /// Contaminant references, viral database and thresholds. Defaults to the
    /// database layout under '/data/virmet_databases'; write the defaults with
    /// 'virmet config' to start from.
    #[arg(short, long)]
    pub config: Option<PathBuf>,
    /// Directory in which 'virmet_output_<run>' is created
    #[arg(short, long, default_value = ".")]
    pub outdir: PathBuf,
    /// Number of threads for each alignment process
    #[arg(short, long)]
    pub threads: Option<usize>,
    /// Summary output file (.json)
    ///
    /// Path to a JSON file for storing the counts of every sample
    /// and the organisms detected.
    #[arg(short, long)]
    pub json: Option<PathBuf>,
}
impl RunArgs {
    /// Validates the provided arguments and builds a `Virmet` instance.
    pub fn validate_and_build(self) -> Result<Virmet, VirmetError> {

        let command = std::env::args().collect::<Vec<String>>().join(" ");

        let config = match self.config {
            Some(path) => PipelineConfig::from_json(&path)?,
            None => PipelineConfig::default(),
        };

        let virmet = VirmetBuilder::new()
            .command(command)
            .run_dir(self.run)
            .file(self.file)
            .outdir(self.outdir)
            .threads(self.threads)
            .json(self.json)
            .config(config)
            .build()?;

        Ok(virmet)
    }
}

#[derive(Args, Debug)]
pub struct ConfigArgs {
    /// Output configuration file (.json)
    #[arg(short, long, default_value = "virmet.json")]
    pub output: PathBuf,
}

/// Configures the styles for the command-line interface.
pub fn get_styles() -> clap::builder::Styles {
    clap::builder::Styles::styled()
        .usage(
            anstyle::Style::new()
                .bold()
                .underline()
                .fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Yellow))),
        )
        .header(
            anstyle::Style::new()
                .bold()
                .underline()
                .fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Yellow))),
        )
        .literal(
            anstyle::Style::new()
                .bold()
                .fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Green))),
        )
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_requires_an_input_source() {
        assert!(App::try_parse_from(["virmet", "run"]).is_err());
        assert!(App::try_parse_from(["virmet", "run", "--run", "r", "--file", "f"]).is_err());
    }

    #[test]
    fn run_arguments_are_parsed() {
        let app = App::try_parse_from(["virmet", "--log-file", "v.log", "run", "--file", "s.fastq.gz", "-t", "8"]).unwrap();
        assert_eq!(app.log_file, Some(PathBuf::from("v.log")));
        match app.command {
            Commands::Run(args) => {
                assert_eq!(args.file, Some(PathBuf::from("s.fastq.gz")));
                assert_eq!(args.threads, Some(8));
                assert_eq!(args.outdir, PathBuf::from("."));
            }
            Commands::Config(_) => panic!("expected run command"),
        }
    }
}

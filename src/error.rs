use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum VirmetError {

    #[error("Failed to execute command '{0}': {1}")]
    CommandExecutionFailed(String, String),

    #[error("Tool '{tool}' failed with status {status} (arguments: {args:?})\n{output}")]
    ExternalToolFailed {
        tool: String,
        args: Vec<String>,
        status: i32,
        output: String
    },

    #[error("Failed to capture output of command '{0}'")]
    CommandOutputCapture(String),

    #[error("Expected input file was not found: {0}")]
    MissingInputFile(PathBuf),

    #[error("Input read files must not be empty.")]
    EmptyInput,

    #[error("At least one contaminant reference must be configured.")]
    MissingContaminantReferences,

    #[error("Contaminant reference names must be unique: {0}")]
    DuplicateContaminantReference(String),

    #[error("Quality filter log {0} does not contain a '{1}' line")]
    QualityLogLineMissing(PathBuf, String),

    #[error("Quality filter log {0} contains an invalid count in line: {1}")]
    QualityLogCount(PathBuf, String),

    #[error("Statistics key '{0}' has already been recorded for this sample")]
    LedgerKeyExists(String),

    #[error("Statistics file {0} contains an invalid line: {1}")]
    LedgerLine(PathBuf, String),

    #[error("Failed to parse FASTQ record header into UTF8")]
    NeedletailFastqHeader,

    #[error("Could not determine a sample name from input file: {0}")]
    SampleName(PathBuf),

    #[error("No read files matching '*_S*.fastq*' found in run directory: {0}")]
    EmptyRunDirectory(PathBuf),

    #[error("Input files map to the same sample directory: {0}")]
    DuplicateSampleName(String),

    #[error("Either a run directory or a single read file must be provided.")]
    MissingRunOrFile,

    #[error(transparent)]
    IoError(#[from] std::io::Error),

    #[error(transparent)]
    NeedletailParseError(#[from] needletail::errors::ParseError),

    #[error(transparent)]
    NifflerError(#[from] niffler::Error),

    #[error(transparent)]
    CsvError(#[from] csv::Error),

    #[error(transparent)]
    JsonError(#[from] serde_json::Error),

    #[error(transparent)]
    Utf8Error(#[from] std::str::Utf8Error),

    #[error(transparent)]
    ParseIntError(#[from] std::num::ParseIntError),

    #[error(transparent)]
    ThreadPoolBuildError(#[from] rayon::ThreadPoolBuildError),
}

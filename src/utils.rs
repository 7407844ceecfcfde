use chrono::Local;
use env_logger::Builder;
use log::LevelFilter;
use needletail::{parse_fastx_file, FastxReader};
use niffler::get_writer;
use std::{ffi::OsStr, fs::{File, OpenOptions}, io::{BufWriter, Write}, path::{Path, PathBuf}};
use termcolor::{Color, ColorChoice, ColorSpec, StandardStream, WriteColor};

use crate::error::VirmetError;


/// Extension trait for inferring compression format from file extension.
pub trait CompressionExt {
    fn from_path<S: AsRef<OsStr> + ?Sized>(p: &S) -> Self;
}

impl CompressionExt for niffler::compression::Format {
    /// Attempts to infer the compression type from the file extension.
    /// If the extension is not known, `Uncompressed` is returned.
    fn from_path<S: AsRef<OsStr> + ?Sized>(p: &S) -> Self {
        let path = Path::new(p);
        match path.extension().map(|s| s.to_str()) {
            Some(Some("gz")) => Self::Gzip,
            Some(Some("bz") | Some("bz2")) => Self::Bzip,
            Some(Some("lzma") | Some("xz")) => Self::Lzma,
            _ => Self::No,
        }
    }
}

/// Opens a read file with Needletail, returning `None` for an empty file.
///
/// Needletail refuses to parse zero-length input, but an empty read set is
/// a legitimate intermediate (e.g. every read removed by a contaminant
/// round), so callers treat `None` as a set without records.
pub fn parse_fastx_file_with_check(path: &Path) -> Result<Option<Box<dyn FastxReader>>, VirmetError> {
    if !path.exists() {
        return Err(VirmetError::MissingInputFile(path.to_path_buf()));
    }
    if std::fs::metadata(path)?.len() == 0 {
        return Ok(None);
    }
    Ok(Some(parse_fastx_file(path)?))
}

/// Creates a buffered writer, compressed according to the output extension
/// unless a format is given explicitly.
pub fn get_fastx_writer(
    output: &Path,
    compression_level: niffler::compression::Level,
    output_format: Option<niffler::compression::Format>,
) -> Result<Box<dyn Write>, VirmetError> {
    let file_handle = BufWriter::new(File::create(output)?);
    let format = match output_format {
        None => niffler::Format::from_path(output),
        Some(format) => format,
    };
    Ok(get_writer(Box::new(file_handle), format, compression_level)?)
}

/// Extracts the read identifier (first whitespace-delimited token) from a
/// FASTQ or FASTA record header.
///
/// # Example
///
/// ```
/// use virmet::utils::get_id;
/// assert_eq!(get_id(b"read1 1:N:0:1").unwrap(), "read1");
/// ```
pub fn get_id(id: &[u8]) -> Result<String, VirmetError> {
    let header = std::str::from_utf8(id)?;
    match header.split_whitespace().next() {
        Some(id) => Ok(id.to_string()),
        None => Err(VirmetError::NeedletailFastqHeader),
    }
}

/// Removes a file if it exists, ignoring files that were never written.
pub fn remove_if_exists(path: &Path) -> Result<(), VirmetError> {
    if path.exists() {
        std::fs::remove_file(path)?;
    }
    Ok(())
}

/// Name of a file as an owned string, used to derive artifact names.
pub fn file_name_string(path: &Path) -> Option<String> {
    path.file_name().map(|name| name.to_string_lossy().to_string())
}

pub fn init_logger(log_file: Option<PathBuf>) {
    let mut builder = Builder::new();

    match log_file {
        Some(log_path) => {
            // Plain lines without colour codes when logging to a file
            builder.format(|buf, record| {
                writeln!(
                    buf,
                    "{} [{}] - {}",
                    Local::now().format("%Y-%m-%dT%H:%M:%S"),
                    record.level(),
                    record.args()
                )
            });
            match OpenOptions::new().append(true).create(true).open(&log_path) {
                Ok(file) => {
                    builder.target(env_logger::Target::Pipe(Box::new(file)));
                },
                Err(err) => eprintln!("Failed to open log file {}: {err}", log_path.display())
            }
        },
        None => {
            builder.format(|_, record| {
                let choice = ColorChoice::Auto;
                let mut stream = match record.level() {
                    log::Level::Error | log::Level::Warn => StandardStream::stderr(choice),
                    _ => StandardStream::stdout(choice),
                };

                let mut style = ColorSpec::new();
                match record.level() {
                    log::Level::Trace => style.set_fg(Some(Color::White)).set_bold(true),
                    log::Level::Debug => style.set_fg(Some(Color::Rgb(255, 195, 0))).set_bold(true),
                    log::Level::Info => style.set_fg(Some(Color::Green)).set_bold(true),
                    log::Level::Warn => style.set_fg(Some(Color::Rgb(255, 102, 0))).set_bold(true),
                    log::Level::Error => style.set_fg(Some(Color::Red)).set_bold(true),
                };

                write!(&mut stream, "{} [", Local::now().format("%Y-%m-%dT%H:%M:%S"))?;
                stream.set_color(&style)?;
                write!(&mut stream, "{}", record.level())?;
                stream.reset()?;
                writeln!(&mut stream, "] - {}", record.args())?;

                Ok(())
            });
        }
    }

    builder.filter(None, LevelFilter::Info);
    builder.parse_env("VIRMET_LOG");
    builder.init();
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_is_first_header_token() {
        assert_eq!(get_id(b"M01234:12:000 1:N:0:2").unwrap(), "M01234:12:000");
        assert_eq!(get_id(b"read_7").unwrap(), "read_7");
    }

    #[test]
    fn blank_header_is_rejected() {
        assert!(matches!(get_id(b"   "), Err(VirmetError::NeedletailFastqHeader)));
    }

    #[test]
    fn compression_inferred_from_extension() {
        assert_eq!(niffler::compression::Format::from_path("reads.fastq.gz"), niffler::compression::Format::Gzip);
        assert_eq!(niffler::compression::Format::from_path("reads.fastq"), niffler::compression::Format::No);
        assert_eq!(niffler::compression::Format::from_path("reads.xz"), niffler::compression::Format::Lzma);
    }

    #[test]
    fn empty_read_file_yields_no_reader() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.fastq");
        File::create(&path).unwrap();
        assert!(parse_fastx_file_with_check(&path).unwrap().is_none());
    }

    #[test]
    fn missing_read_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = parse_fastx_file_with_check(&dir.path().join("absent.fastq"));
        assert!(matches!(result, Err(VirmetError::MissingInputFile(_))));
    }
}

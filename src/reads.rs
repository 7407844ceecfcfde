//! Operations on read sets backed by FASTQ/FASTA files.

use std::collections::HashSet;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use needletail::parser::{write_fasta, LineEnding};

use crate::error::VirmetError;
use crate::utils::{get_fastx_writer, get_id, parse_fastx_file_with_check};

/// Counts the records of a read file.
pub fn count_reads(path: &Path) -> Result<u64, VirmetError> {
    let mut count = 0;
    if let Some(mut reader) = parse_fastx_file_with_check(path)? {
        while let Some(record) = reader.next() {
            record?;
            count += 1;
        }
    }
    Ok(count)
}

/// Collects the identifiers of a read file.
pub fn read_ids(path: &Path) -> Result<HashSet<String>, VirmetError> {
    let mut ids = HashSet::new();
    if let Some(mut reader) = parse_fastx_file_with_check(path)? {
        while let Some(record) = reader.next() {
            ids.insert(get_id(record?.id())?);
        }
    }
    Ok(ids)
}

/// Maximum number of records per shard so that `shards` files hold `total`
/// records: `ceil(total / shards)`, at least one.
pub fn shard_size(total: u64, shards: usize) -> u64 {
    let shards = shards.max(1) as u64;
    ((total + shards - 1) / shards).max(1)
}

/// Splits a read file into shards of at most `max_records` whole records.
///
/// Shards are written in input order, each preserving the order of its
/// records; `name` maps a shard index to its output path. Returns the shard
/// paths actually written (none for an empty input).
pub fn shard_reads<F>(input: &Path, max_records: u64, name: F) -> Result<Vec<PathBuf>, VirmetError>
where
    F: Fn(usize) -> PathBuf,
{
    let max_records = max_records.max(1);
    let mut shards = Vec::new();

    let mut reader = match parse_fastx_file_with_check(input)? {
        Some(reader) => reader,
        None => return Ok(shards),
    };

    let mut writer: Option<BufWriter<File>> = None;
    let mut in_shard = 0;
    while let Some(record) = reader.next() {
        let record = record?;
        if writer.is_none() || in_shard == max_records {
            if let Some(mut previous) = writer.take() {
                previous.flush()?;
            }
            let path = name(shards.len());
            writer = Some(BufWriter::new(File::create(&path)?));
            shards.push(path);
            in_shard = 0;
        }
        if let Some(out) = writer.as_mut() {
            record.write(out, None)?;
        }
        in_shard += 1;
    }
    if let Some(mut last) = writer {
        last.flush()?;
    }

    Ok(shards)
}

/// Concatenates `inputs` byte-wise into `output`; inputs that were never
/// written are skipped.
pub fn concatenate(inputs: &[PathBuf], output: &Path) -> Result<(), VirmetError> {
    let mut writer = BufWriter::new(File::create(output)?);
    for input in inputs {
        if !input.exists() {
            log::debug!("Skipping missing file during concatenation: {}", input.display());
            continue;
        }
        let mut reader = File::open(input)?;
        io::copy(&mut reader, &mut writer)?;
    }
    writer.flush()?;
    Ok(())
}

/// Writes the sequence-only (FASTA) form of a read file and returns the
/// number of sequences written.
pub fn write_sequences(input: &Path, output: &Path) -> Result<u64, VirmetError> {
    let mut writer = BufWriter::new(File::create(output)?);
    let mut count = 0;
    if let Some(mut reader) = parse_fastx_file_with_check(input)? {
        while let Some(record) = reader.next() {
            let record = record?;
            write_fasta(record.id(), &record.seq(), &mut writer, LineEnding::Unix)?;
            count += 1;
        }
    }
    writer.flush()?;
    Ok(count)
}

/// Result of streaming a read set through a [`ReadSieve`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SieveCounts {
    /// Records whose identifier was not in the target set.
    pub kept: u64,
    /// Records whose identifier was in the target set.
    pub matched: u64,
}

impl SieveCounts {
    pub fn total(&self) -> u64 {
        self.kept + self.matched
    }
}

/// Streams a read set once and separates records by membership of their
/// identifier in a target set.
pub struct ReadSieve {
    input: PathBuf,
}

impl ReadSieve {
    pub fn from(input: &Path) -> Self {
        Self { input: input.to_owned() }
    }

    /// Writes every record whose identifier is *not* in `read_ids` to
    /// `output`. Reads without a reported match are always kept.
    pub fn deplete(&self, read_ids: &HashSet<String>, output: &Path) -> Result<SieveCounts, VirmetError> {
        let mut writer = get_fastx_writer(output, niffler::compression::Level::Six, None)?;
        let mut counts = SieveCounts::default();

        if let Some(mut reader) = parse_fastx_file_with_check(&self.input)? {
            while let Some(rec) = reader.next() {
                let record = rec?;
                let id = get_id(record.id())?;
                if read_ids.contains(&id) {
                    counts.matched += 1;
                } else {
                    record.write(&mut writer, None)?;
                    counts.kept += 1;
                    if counts.kept % 100_000 == 0 {
                        log::debug!("Written {} clean reads", counts.kept);
                    }
                }
            }
        } else {
            log::warn!("Input file is empty: {}", self.input.display())
        }
        writer.flush()?;

        Ok(counts)
    }

    /// Writes records whose identifier is in `read_ids` to `matched_output`
    /// and all others to `other_output`; each record lands in exactly one.
    pub fn partition(
        &self,
        read_ids: &HashSet<String>,
        matched_output: &Path,
        other_output: &Path,
    ) -> Result<SieveCounts, VirmetError> {
        let mut matched_writer = get_fastx_writer(matched_output, niffler::compression::Level::Six, None)?;
        let mut other_writer = get_fastx_writer(other_output, niffler::compression::Level::Six, None)?;
        let mut counts = SieveCounts::default();

        if let Some(mut reader) = parse_fastx_file_with_check(&self.input)? {
            while let Some(rec) = reader.next() {
                let record = rec?;
                let id = get_id(record.id())?;
                if read_ids.contains(&id) {
                    record.write(&mut matched_writer, None)?;
                    counts.matched += 1;
                } else {
                    record.write(&mut other_writer, None)?;
                    counts.kept += 1;
                }
            }
        }
        matched_writer.flush()?;
        other_writer.flush()?;

        Ok(counts)
    }
}

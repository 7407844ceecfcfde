//! Per-sample statistics ledger (`stats.tsv`).
//!
//! Every stage records its counts through a `&mut StatsLedger`; each key can
//! be written once, and every write is appended to the file immediately so
//! that the file reflects pipeline stage order even if a later stage fails.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use csv::{ReaderBuilder, WriterBuilder};
use serde::{Deserialize, Serialize};

use crate::error::VirmetError;

pub const STATS_FILE: &str = "stats.tsv";

pub const RAW_READS: &str = "raw_reads";
pub const TRIMMED_TOO_SHORT: &str = "trimmed_too_short";
pub const LOW_ENTROPY: &str = "low_entropy";
pub const LOW_QUALITY: &str = "low_quality";
pub const PASSING_FILTER: &str = "passing_filter";
pub const READS_TO_BLAST: &str = "reads_to_blast";
pub const VIRAL_READS: &str = "viral_reads";
pub const UNDETERMINED_READS: &str = "undetermined_reads";

/// Ledger key for the reads matched against one contaminant reference.
pub fn matching_key(reference: &str) -> String {
    format!("matching_{reference}")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub key: String,
    pub count: u64,
}

#[derive(Debug, Clone)]
pub struct StatsLedger {
    path: PathBuf,
    entries: Vec<LedgerEntry>,
}

impl StatsLedger {
    /// Starts a fresh ledger in `dir`, truncating any previous `stats.tsv`.
    pub fn create(dir: &Path) -> Result<Self, VirmetError> {
        let path = dir.join(STATS_FILE);
        File::create(&path)?;
        Ok(Self { path, entries: Vec::new() })
    }

    /// Reads an existing ledger file.
    pub fn load(path: &Path) -> Result<Self, VirmetError> {
        if !path.exists() {
            return Err(VirmetError::MissingInputFile(path.to_path_buf()));
        }
        let mut reader = ReaderBuilder::new()
            .delimiter(b'\t')
            .has_headers(false)
            .flexible(true)
            .from_path(path)?;

        let mut entries = Vec::new();
        for record in reader.records() {
            let record = record?;
            if record.len() != 2 {
                return Err(VirmetError::LedgerLine(path.to_path_buf(), record.iter().collect::<Vec<_>>().join("\t")));
            }
            entries.push(LedgerEntry {
                key: record[0].to_string(),
                count: record[1].parse::<u64>()?,
            });
        }
        Ok(Self { path: path.to_path_buf(), entries })
    }

    /// Records `count` under `key` and appends the line to the ledger file.
    pub fn record(&mut self, key: &str, count: u64) -> Result<(), VirmetError> {
        if self.get(key).is_some() {
            return Err(VirmetError::LedgerKeyExists(key.to_string()));
        }
        let file = OpenOptions::new().append(true).create(true).open(&self.path)?;
        let mut writer = WriterBuilder::new()
            .delimiter(b'\t')
            .has_headers(false)
            .from_writer(file);
        writer.write_record([key, count.to_string().as_str()])?;
        writer.flush()?;

        log::debug!("{}: {} = {}", self.path.display(), key, count);
        self.entries.push(LedgerEntry { key: key.to_string(), count });
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<u64> {
        self.entries.iter().find(|entry| entry.key == key).map(|entry| entry.count)
    }
    pub fn entries(&self) -> &[LedgerEntry] {
        &self.entries
    }
    pub fn path(&self) -> &Path {
        &self.path
    }
}

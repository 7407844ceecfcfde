//! Viral homology search of decontaminated reads and summary of the
//! best hit per read.

use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::path::{Path, PathBuf};

use csv::{ReaderBuilder, StringRecord, WriterBuilder};
use serde::{Deserialize, Serialize};

use crate::config::{SearchConfig, Thresholds};
use crate::error::VirmetError;
use crate::ledger::{self, StatsLedger};
use crate::pool::WorkerPool;
use crate::reads::{shard_reads, shard_size, write_sequences};
use crate::tools::{HomologySearch, HIT_COLUMNS};
use crate::utils::remove_if_exists;

pub const SEARCH_READS: &str = "hq_decont_reads.fastq";
pub const SEARCH_SEQUENCES: &str = "hq_decont_reads.fasta";
pub const BEST_HITS: &str = "unique.tsv";
pub const ORGANISMS: &str = "orgs_list.tsv";

/// One row of the homology search table.
///
/// Field names match the requested output columns, so the struct reads
/// both header-less shard tables (by position) and the merged table (by
/// header).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HitRecord {
    pub qseqid: String,
    pub sseqid: String,
    pub sscinames: String,
    pub stitle: String,
    pub pident: f64,
    pub qcovs: f64,
    pub score: f64,
    pub length: u64,
    pub mismatch: u64,
    pub gapopen: u64,
    pub qstart: u64,
    pub qend: u64,
    pub sstart: u64,
    pub send: u64,
    pub staxids: String,
}

fn table_reader(path: &Path, has_headers: bool) -> Result<csv::Reader<File>, VirmetError> {
    // titles may contain quote characters
    Ok(ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(has_headers)
        .quoting(false)
        .from_path(path)?)
}

/// Merges search tables in the given order into `output`, keeping only the
/// first row seen for each query identifier. Rows are copied verbatim under
/// a fixed header. Returns the number of rows written.
pub fn merge_best_hits(tables: &[PathBuf], output: &Path) -> Result<u64, VirmetError> {
    let mut writer = WriterBuilder::new()
        .delimiter(b'\t')
        .quote_style(csv::QuoteStyle::Never)
        .flexible(true)
        .from_path(output)?;
    writer.write_record(HIT_COLUMNS)?;

    let mut seen: HashSet<String> = HashSet::new();
    let mut rows = 0;
    for table in tables {
        if !table.exists() {
            log::debug!("Skipping missing search table: {}", table.display());
            continue;
        }
        let mut reader = table_reader(table, false)?;
        let mut record = StringRecord::new();
        while reader.read_record(&mut record)? {
            let Some(qseqid) = record.get(0) else { continue };
            if seen.insert(qseqid.to_string()) {
                writer.write_record(&record)?;
                rows += 1;
            }
        }
    }
    writer.flush()?;
    Ok(rows)
}

/// Rows of a merged best-hit table passing the identity and coverage
/// thresholds.
pub fn viral_hits(best_hits: &Path, thresholds: &Thresholds) -> Result<Vec<HitRecord>, VirmetError> {
    if !best_hits.exists() {
        return Err(VirmetError::MissingInputFile(best_hits.to_path_buf()));
    }
    let mut reader = table_reader(best_hits, true)?;
    let mut hits = Vec::new();
    for result in reader.deserialize() {
        let hit: HitRecord = result?;
        if thresholds.is_viral(&hit) {
            hits.push(hit);
        }
    }
    Ok(hits)
}

/// Identifiers of reads with a passing best hit.
pub fn viral_ids(best_hits: &Path, thresholds: &Thresholds) -> Result<HashSet<String>, VirmetError> {
    Ok(viral_hits(best_hits, thresholds)?
        .into_iter()
        .map(|hit| hit.qseqid)
        .collect())
}

/// Read counts per organism, most frequent first; ties ordered by name.
pub fn organism_counts(hits: &[HitRecord]) -> Vec<(String, u64)> {
    let mut counts: HashMap<&str, u64> = HashMap::new();
    for hit in hits {
        *counts.entry(hit.sscinames.as_str()).or_insert(0) += 1;
    }
    let mut counts: Vec<(String, u64)> = counts
        .into_iter()
        .map(|(name, count)| (name.to_string(), count))
        .collect();
    counts.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    counts
}

pub fn write_organism_counts(counts: &[(String, u64)], output: &Path) -> Result<(), VirmetError> {
    let mut writer = WriterBuilder::new()
        .delimiter(b'\t')
        .quote_style(csv::QuoteStyle::Never)
        .from_path(output)?;
    writer.write_record(["organism", "reads"])?;
    for (organism, reads) in counts {
        writer.write_record([organism.as_str(), reads.to_string().as_str()])?;
    }
    writer.flush()?;
    Ok(())
}

#[derive(Debug, Clone)]
pub struct SearchSummary {
    pub reads_to_blast: u64,
    pub viral_reads: u64,
    pub undetermined_reads: u64,
    /// Merged best-hit table.
    pub best_hits: PathBuf,
    pub organisms: Vec<(String, u64)>,
}

pub struct ViralSearchStage<'a> {
    pub search: &'a dyn HomologySearch,
    pub config: &'a SearchConfig,
}

impl ViralSearchStage<'_> {
    /// Searches the final decontaminated reads of a sample against the
    /// viral database and records the read counts.
    pub fn run(&self, residual: &Path, sample_dir: &Path, ledger: &mut StatsLedger) -> Result<SearchSummary, VirmetError> {

        let reads = sample_dir.join(SEARCH_READS);
        if residual != reads {
            std::fs::rename(residual, &reads)?;
        }
        let sequences = sample_dir.join(SEARCH_SEQUENCES);
        let reads_to_blast = write_sequences(&reads, &sequences)?;
        ledger.record(ledger::READS_TO_BLAST, reads_to_blast)?;

        let pool = WorkerPool::bounded(self.config.max_shards);
        let shard_count = pool.workers();
        let max_records = shard_size(reads_to_blast, shard_count);
        let queries = shard_reads(&sequences, max_records, |i| sample_dir.join(format!("splitted_clean_{i}.fasta")))?;

        log::info!("Searching {} reads in {} shards against {}", reads_to_blast, queries.len(), self.config.viral_db.display());

        let tasks: Vec<(PathBuf, PathBuf)> = queries
            .iter()
            .enumerate()
            .map(|(i, query)| (query.clone(), sample_dir.join(format!("tmp_{i}.tsv"))))
            .collect();

        let tables = pool.run(tasks, |(query, hits)| {
            self.search.search(&query, &hits)?;
            Ok(hits)
        })?;

        let best_hits = sample_dir.join(BEST_HITS);
        let rows = merge_best_hits(&tables, &best_hits)?;
        log::debug!("Found best hits for {rows} reads");

        for path in queries.iter().chain(tables.iter()) {
            remove_if_exists(path)?;
        }

        let hits = viral_hits(&best_hits, &self.config.thresholds)?;
        let organisms = organism_counts(&hits);
        write_organism_counts(&organisms, &sample_dir.join(ORGANISMS))?;

        let viral_reads = hits.len() as u64;
        log::debug!("{viral_reads} hits passing coverage and identity filter");
        ledger.record(ledger::VIRAL_READS, viral_reads)?;

        let undetermined_reads = reads_to_blast.saturating_sub(viral_reads);
        ledger.record(ledger::UNDETERMINED_READS, undetermined_reads)?;

        Ok(SearchSummary {
            reads_to_blast,
            viral_reads,
            undetermined_reads,
            best_hits,
            organisms,
        })
    }
}

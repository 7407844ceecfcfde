//! Quality filtering of raw reads: length trimming, then sharded
//! low-complexity and low-quality filtering.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use crate::config::QualityConfig;
use crate::error::VirmetError;
use crate::ledger::{self, StatsLedger};
use crate::pool::WorkerPool;
use crate::reads::{concatenate, count_reads, shard_reads, shard_size};
use crate::tools::{QualityFilter, QualityShard, ReadTrimmer};
use crate::utils::remove_if_exists;

pub const FILTERED_READS: &str = "good.fastq";
pub const REJECTED_READS: &str = "bad.fastq";
pub const FILTER_LOG: &str = "prinseq.log";
const TRIMMED_READS: &str = "intermediate.fastq";

const ENTROPY_LINE: &str = "lc_method:";
const QUALITY_LINE: &str = "min_qual_mean:";

/// Rejection counts reported in one quality-filter log.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PrinseqLog {
    pub low_entropy: u64,
    pub low_quality: u64,
}

impl PrinseqLog {
    /// Parses the `lc_method: <n>` and `min_qual_mean: <n>` lines of a
    /// filter log. Both lines must be present.
    pub fn from_path(path: &Path) -> Result<Self, VirmetError> {
        if !path.exists() {
            return Err(VirmetError::MissingInputFile(path.to_path_buf()));
        }
        let reader = BufReader::new(File::open(path)?);

        let mut low_entropy = None;
        let mut low_quality = None;
        for line in reader.lines() {
            let line = line?;
            if let Some(count) = trailing_count(path, &line, ENTROPY_LINE)? {
                *low_entropy.get_or_insert(0) += count;
            } else if let Some(count) = trailing_count(path, &line, QUALITY_LINE)? {
                *low_quality.get_or_insert(0) += count;
            }
        }

        Ok(Self {
            low_entropy: low_entropy.ok_or_else(|| VirmetError::QualityLogLineMissing(path.to_path_buf(), ENTROPY_LINE.to_string()))?,
            low_quality: low_quality.ok_or_else(|| VirmetError::QualityLogLineMissing(path.to_path_buf(), QUALITY_LINE.to_string()))?,
        })
    }
}

impl std::ops::Add for PrinseqLog {
    type Output = Self;
    fn add(self, other: Self) -> Self {
        Self {
            low_entropy: self.low_entropy + other.low_entropy,
            low_quality: self.low_quality + other.low_quality,
        }
    }
}

/// Count at the end of a line of the form `... <label> <digits>`.
fn trailing_count(path: &Path, line: &str, label: &str) -> Result<Option<u64>, VirmetError> {
    let line = line.trim_end();
    let Some(position) = line.rfind(label) else {
        return Ok(None);
    };
    let value = line[position + label.len()..].trim();
    if value.is_empty() {
        return Err(VirmetError::QualityLogCount(path.to_path_buf(), line.to_string()));
    }
    match value.parse::<u64>() {
        Ok(count) => Ok(Some(count)),
        // label occurs inside other text, e.g. the echoed command line
        Err(_) if !value.chars().all(|c| c.is_ascii_digit()) => Ok(None),
        Err(_) => Err(VirmetError::QualityLogCount(path.to_path_buf(), line.to_string())),
    }
}

/// Counts of a completed quality filter run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QualitySummary {
    pub raw_reads: u64,
    pub trimmed_too_short: u64,
    /// Reads written by the trimmer and handed to the filter.
    pub entering_filter: u64,
    pub low_entropy: u64,
    pub low_quality: u64,
    pub passing_filter: u64,
}

impl QualitySummary {
    /// Reads unaccounted for by the filter (positive) or counted twice
    /// (negative).
    pub fn lost_reads(&self) -> i64 {
        self.entering_filter as i64 - (self.passing_filter + self.low_entropy + self.low_quality) as i64
    }
}

pub struct QualityStage<'a> {
    pub trimmer: &'a dyn ReadTrimmer,
    pub filter: &'a dyn QualityFilter,
    pub config: &'a QualityConfig,
}

impl QualityStage<'_> {
    /// Filters `input` into `sample_dir/good.fastq` and records the counts
    /// of every step in the ledger.
    pub fn run(&self, input: &Path, sample_dir: &Path, ledger: &mut StatsLedger) -> Result<QualitySummary, VirmetError> {

        let raw_reads = count_reads(input)?;
        ledger.record(ledger::RAW_READS, raw_reads)?;

        log::debug!("Trimming reads shorter than {} bases", self.config.min_length);
        let trimmed = sample_dir.join(TRIMMED_READS);
        self.trimmer.trim(input, &trimmed, self.config.min_length)?;
        let long_reads = count_reads(&trimmed)?;
        let trimmed_too_short = raw_reads.saturating_sub(long_reads);
        ledger.record(ledger::TRIMMED_TOO_SHORT, trimmed_too_short)?;

        let pool = WorkerPool::bounded(self.config.max_shards);
        let shard_count = pool.workers();
        let max_records = shard_size(long_reads, shard_count);
        let splits = shard_reads(&trimmed, max_records, |i| sample_dir.join(format!("splitted{i:02}.fastq")))?;
        std::fs::remove_file(&trimmed)?;

        log::debug!("Quality filtering {} shards of at most {} reads", splits.len(), max_records);

        let shards: Vec<QualityShard> = splits
            .iter()
            .enumerate()
            .map(|(i, input)| QualityShard {
                input: input.clone(),
                good: sample_dir.join(format!("good{i:02}.fastq")),
                bad: sample_dir.join(format!("bad{i:02}.fastq")),
                log: sample_dir.join(format!("prinseq{i:02}.log")),
            })
            .collect();

        let counts = pool.run(shards.clone(), |shard| {
            self.filter.filter(&shard)?;
            PrinseqLog::from_path(&shard.log)
        })?;
        let rejected = counts.into_iter().fold(PrinseqLog::default(), |acc, c| acc + c);

        let good: Vec<PathBuf> = shards.iter().map(|s| s.good.clone()).collect();
        let bad: Vec<PathBuf> = shards.iter().map(|s| s.bad.clone()).collect();
        let logs: Vec<PathBuf> = shards.iter().map(|s| s.log.clone()).collect();

        let filtered = sample_dir.join(FILTERED_READS);
        concatenate(&good, &filtered)?;
        concatenate(&bad, &sample_dir.join(REJECTED_READS))?;
        concatenate(&logs, &sample_dir.join(FILTER_LOG))?;

        for shard in &shards {
            for path in [&shard.input, &shard.good, &shard.bad, &shard.log] {
                remove_if_exists(path)?;
            }
        }

        ledger.record(ledger::LOW_ENTROPY, rejected.low_entropy)?;
        ledger.record(ledger::LOW_QUALITY, rejected.low_quality)?;

        let passing_filter = count_reads(&filtered)?;

        let summary = QualitySummary {
            raw_reads,
            trimmed_too_short,
            entering_filter: long_reads,
            low_entropy: rejected.low_entropy,
            low_quality: rejected.low_quality,
            passing_filter,
        };
        let lost = summary.lost_reads();
        if lost != 0 {
            log::warn!(
                "{} reads were lost during quality filtering in {} ({} entering, {} passing, {} low entropy, {} low quality)",
                lost, sample_dir.display(), summary.entering_filter, passing_filter, rejected.low_entropy, rejected.low_quality
            );
        }
        ledger.record(ledger::PASSING_FILTER, passing_filter)?;

        Ok(summary)
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_log(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        let mut file = File::create(&path).unwrap();
        file.write_all(content.as_bytes()).unwrap();
        path
    }

    #[test]
    fn log_counts_are_parsed() {
        let dir = tempfile::tempdir().unwrap();
        let log = write_log(dir.path(), "p.log", "\
[prinseq-lite-0.20.4] [12:00:00] Executing PRINSEQ with command: \"perl prinseq-lite.pl -lc_method entropy -min_qual_mean 20\"
[prinseq-lite-0.20.4] [12:00:01] Filter stats
[prinseq-lite-0.20.4] [12:00:01] min_qual_mean: 12
[prinseq-lite-0.20.4] [12:00:01] lc_method: 5
");
        assert_eq!(PrinseqLog::from_path(&log).unwrap(), PrinseqLog { low_entropy: 5, low_quality: 12 });
    }

    #[test]
    fn missing_count_line_fails_loudly() {
        let dir = tempfile::tempdir().unwrap();
        let log = write_log(dir.path(), "p.log", "min_qual_mean: 3\n");
        let err = PrinseqLog::from_path(&log).unwrap_err();
        assert!(matches!(err, VirmetError::QualityLogLineMissing(_, label) if label == ENTROPY_LINE));
    }

    #[test]
    fn absent_log_is_missing_input() {
        let dir = tempfile::tempdir().unwrap();
        let err = PrinseqLog::from_path(&dir.path().join("none.log")).unwrap_err();
        assert!(matches!(err, VirmetError::MissingInputFile(_)));
    }

    #[test]
    fn lost_reads_balance() {
        let summary = QualitySummary {
            raw_reads: 1000,
            trimmed_too_short: 100,
            entering_filter: 900,
            low_entropy: 50,
            low_quality: 50,
            passing_filter: 800,
        };
        assert_eq!(summary.lost_reads(), 0);
        assert_eq!(QualitySummary { passing_filter: 790, ..summary }.lost_reads(), 10);
    }

    #[test]
    fn lost_reads_follow_trimmer_output() {
        // trimmer emitted more reads than it was given
        let summary = QualitySummary {
            raw_reads: 100,
            trimmed_too_short: 0,
            entering_filter: 110,
            low_entropy: 5,
            low_quality: 5,
            passing_filter: 100,
        };
        assert_eq!(summary.lost_reads(), 0);
    }

    #[test]
    fn count_line_without_number_fails_loudly() {
        let dir = tempfile::tempdir().unwrap();
        let log = write_log(dir.path(), "p.log", "min_qual_mean: 3\nlc_method:\n");
        let err = PrinseqLog::from_path(&log).unwrap_err();
        assert!(matches!(err, VirmetError::QualityLogCount(..)));
    }
}

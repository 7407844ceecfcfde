//! Final partition of the searched reads and archival of the sample
//! directory: compressed read sets, reference-compressed alignments and
//! removal of intermediates.

use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use niffler::compression::{Format, Level};

use crate::config::Thresholds;
use crate::decontam::DecontaminationRound;
use crate::error::VirmetError;
use crate::ledger::{self, StatsLedger};
use crate::quality::{FILTERED_READS, REJECTED_READS};
use crate::reads::ReadSieve;
use crate::search::{viral_ids, BEST_HITS, SEARCH_READS, SEARCH_SEQUENCES};
use crate::pool::WorkerPool;
use crate::tools::ArchiveConverter;
use crate::utils::{get_fastx_writer, remove_if_exists};

pub const VIRAL_READS: &str = "viral_reads.fastq.gz";
pub const UNDETERMINED_READS: &str = "undetermined_reads.fastq.gz";

#[derive(Debug, Clone)]
pub struct ArchiveSummary {
    pub viral_reads: u64,
    pub undetermined_reads: u64,
    pub archives: Vec<PathBuf>,
}

/// Gzip-compresses `input` next to itself with a `.gz` suffix and removes
/// the original.
pub fn compress_file(input: &Path) -> Result<PathBuf, VirmetError> {
    let mut name = input.as_os_str().to_owned();
    name.push(".gz");
    let output = PathBuf::from(name);

    let mut reader = File::open(input)?;
    let mut writer = get_fastx_writer(&output, Level::Six, Some(Format::Gzip))?;
    io::copy(&mut reader, &mut writer)?;
    writer.flush()?;
    drop(writer);

    std::fs::remove_file(input)?;
    Ok(output)
}

pub struct ArchiveStage<'a> {
    pub converter: &'a dyn ArchiveConverter,
    pub thresholds: &'a Thresholds,
    /// Pool running the conversions, one task per alignment.
    pub pool: WorkerPool,
}

impl ArchiveStage<'_> {
    /// Splits the searched reads into viral and undetermined sets, archives
    /// the alignments of every decontamination round and removes the
    /// intermediate files of the sample.
    pub fn run(&self, sample_dir: &Path, rounds: &[DecontaminationRound], ledger: &StatsLedger) -> Result<ArchiveSummary, VirmetError> {

        let best_hits = sample_dir.join(BEST_HITS);
        let viral = viral_ids(&best_hits, self.thresholds)?;

        let reads = sample_dir.join(SEARCH_READS);
        let counts = ReadSieve::from(&reads).partition(
            &viral,
            &sample_dir.join(VIRAL_READS),
            &sample_dir.join(UNDETERMINED_READS),
        )?;
        log::info!("Written {} undetermined reads", counts.kept);
        log::info!("Written {} viral reads", counts.matched);

        if let Some(recorded) = ledger.get(ledger::VIRAL_READS) {
            if recorded != counts.matched {
                log::warn!(
                    "Viral reads written ({}) differ from viral reads recorded ({}) in {}",
                    counts.matched, recorded, sample_dir.display()
                );
            }
        }

        let tasks: Vec<(PathBuf, PathBuf, PathBuf)> = rounds
            .iter()
            .map(|round| (
                round.alignment.clone(),
                round.reference.fasta.clone(),
                round.alignment.with_extension("cram"),
            ))
            .collect();

        let results = self.pool.run(tasks, |(alignment, reference, archive)| {
            let result = self.converter.convert(&alignment, &reference, &archive)?;
            Ok((archive, result))
        })?;

        let mut archives = Vec::with_capacity(results.len());
        for (archive, result) in results {
            log::debug!("{}", result);
            archives.push(archive);
        }

        for round in rounds {
            remove_if_exists(&round.alignment)?;
            remove_if_exists(&round.residual)?;
        }
        for name in [FILTERED_READS, REJECTED_READS, SEARCH_SEQUENCES, SEARCH_READS] {
            remove_if_exists(&sample_dir.join(name))?;
        }
        compress_file(&best_hits)?;

        Ok(ArchiveSummary {
            viral_reads: counts.matched,
            undetermined_reads: counts.kept,
            archives,
        })
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ContaminantReference;
    use crate::reads::{read_ids, tests::write_fastq};
    use crate::search::{merge_best_hits, tests::{hit, write_hit}};
    use std::collections::HashSet;
    use std::io::Read;

    /// Converter copying the alignment text into the archive.
    struct CopyConverter;

    impl ArchiveConverter for CopyConverter {
        fn convert(&self, alignment: &Path, _reference: &Path, archive: &Path) -> Result<String, VirmetError> {
            std::fs::copy(alignment, archive)?;
            Ok(format!("{} -> {}", alignment.display(), archive.display()))
        }
    }

    #[test]
    fn compressed_file_replaces_original() {
        let dir = tempfile::tempdir().unwrap();
        let table = dir.path().join("unique.tsv");
        std::fs::write(&table, "qseqid\tsseqid\n").unwrap();
        let output = compress_file(&table).unwrap();
        assert_eq!(output, dir.path().join("unique.tsv.gz"));
        assert!(!table.exists());

        let (mut reader, format) = niffler::from_path(&output).unwrap();
        assert_eq!(format, Format::Gzip);
        let mut text = String::new();
        reader.read_to_string(&mut text).unwrap();
        assert_eq!(text, "qseqid\tsseqid\n");
    }

    #[test]
    fn sample_directory_is_archived() {
        let dir = tempfile::tempdir().unwrap();
        let sample = dir.path();

        let records: Vec<(String, String)> = (0..30).map(|i| (format!("r{i}"), "ACGT".repeat(20))).collect();
        write_fastq(&sample.join(SEARCH_READS), &records);
        for name in [FILTERED_READS, REJECTED_READS, SEARCH_SEQUENCES] {
            File::create(sample.join(name)).unwrap();
        }

        let table = sample.join("tmp_0.tsv");
        let mut file = File::create(&table).unwrap();
        for i in 0..4 {
            write_hit(&mut file, &hit(&format!("r{i}"), "Rhinovirus A", 99.0, 100.0)).unwrap();
        }
        write_hit(&mut file, &hit("r10", "Weak", 60.0, 100.0)).unwrap();
        drop(file);
        merge_best_hits(&[table.clone()], &sample.join(BEST_HITS)).unwrap();
        std::fs::remove_file(&table).unwrap();

        let reference = ContaminantReference::new("humanGRCh38", sample.join("idx"), sample.join("ref.fasta"));
        let alignment = sample.join("good_humanGRCh38.sam");
        std::fs::write(&alignment, "@HD\tVN:1.6\n").unwrap();
        let residual = sample.join("good_humanGRCh38.fastq");
        File::create(&residual).unwrap();
        let rounds = vec![DecontaminationRound {
            reference,
            residual: residual.clone(),
            alignment: alignment.clone(),
            input_reads: 30,
            matched_reads: 0,
            residual_reads: 30,
        }];

        let mut ledger = StatsLedger::create(sample).unwrap();
        ledger.record(ledger::VIRAL_READS, 4).unwrap();

        let stage = ArchiveStage { converter: &CopyConverter, thresholds: &Thresholds::default(), pool: WorkerPool::new(2) };
        let summary = stage.run(sample, &rounds, &ledger).unwrap();

        assert_eq!(summary.viral_reads, 4);
        assert_eq!(summary.undetermined_reads, 26);
        assert_eq!(summary.archives, vec![sample.join("good_humanGRCh38.cram")]);

        let viral = read_ids(&sample.join(VIRAL_READS)).unwrap();
        let undetermined = read_ids(&sample.join(UNDETERMINED_READS)).unwrap();
        assert!(viral.is_disjoint(&undetermined));
        assert_eq!(viral.len() + undetermined.len(), 30);
        assert_eq!(viral, (0..4).map(|i| format!("r{i}")).collect::<HashSet<_>>());

        assert!(sample.join("good_humanGRCh38.cram").exists());
        assert!(sample.join("unique.tsv.gz").exists());
        for gone in [alignment, residual, sample.join(BEST_HITS), sample.join(SEARCH_READS), sample.join(FILTERED_READS)] {
            assert!(!gone.exists(), "{} should be removed", gone.display());
        }
    }
}

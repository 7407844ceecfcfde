//! Removal of reads aligning to contaminant references.

use std::collections::HashSet;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use crate::config::ContaminantReference;
use crate::error::VirmetError;
use crate::ledger::{matching_key, StatsLedger};
use crate::pipeline::SampleRun;
use crate::reads::ReadSieve;
use crate::tools::Aligner;

/// Identifiers of all reads with an alignment record in a SAM file.
/// Header lines (`@`) are skipped; only the first field is read.
pub fn mapped_read_ids(alignment: &Path) -> Result<HashSet<String>, VirmetError> {
    if !alignment.exists() {
        return Err(VirmetError::MissingInputFile(alignment.to_path_buf()));
    }
    let reader = BufReader::new(File::open(alignment)?);

    let mut read_ids = HashSet::new();
    for line in reader.lines() {
        let line = line?;
        if line.is_empty() || line.starts_with('@') {
            continue;
        }
        if let Some(qname) = line.split('\t').next() {
            if !qname.is_empty() {
                read_ids.insert(qname.to_string());
            }
        }
    }
    Ok(read_ids)
}

/// Artifacts of one decontamination round for one sample.
#[derive(Debug, Clone)]
pub struct DecontaminationRound {
    pub reference: ContaminantReference,
    /// Reads without an alignment to the reference.
    pub residual: PathBuf,
    /// Alignment records of the removed reads, kept for archiving.
    pub alignment: PathBuf,
    pub input_reads: u64,
    pub matched_reads: u64,
    pub residual_reads: u64,
}

/// Names of the round outputs for `input` against `reference`: the input
/// stem up to its first `.` joined with the reference name.
fn round_stem(input: &Path, reference: &ContaminantReference) -> String {
    let file_name = input
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default();
    let head = file_name.split('.').next().unwrap_or_default();
    format!("{}_{}", head, reference.name)
}

/// Aligns `input` against `reference`, records `matching_<reference>` and
/// writes the reads without alignments next to the input.
pub fn decontaminate(
    aligner: &dyn Aligner,
    input: &Path,
    reference: &ContaminantReference,
    ledger: &mut StatsLedger,
) -> Result<DecontaminationRound, VirmetError> {
    let dir = input.parent().unwrap_or(Path::new("."));
    let stem = round_stem(input, reference);
    let alignment = dir.join(format!("{stem}.sam"));
    let error_log = dir.join(format!("{stem}.err"));
    let residual = dir.join(format!("{stem}.fastq"));

    log::debug!("Aligning {} against {}", input.display(), reference.name);
    aligner.align(reference, input, &alignment, &error_log)?;

    let mapped = mapped_read_ids(&alignment)?;

    log::debug!("Cleaning reads in {} with alignments in {}", input.display(), alignment.display());
    let counts = ReadSieve::from(input).deplete(&mapped, &residual)?;

    // Alignment records can only name reads of the input; any excess means
    // the aligner reported identifiers we could not find
    if counts.matched != mapped.len() as u64 {
        log::warn!(
            "{} of {} aligned read identifiers against {} were not found in {}",
            (mapped.len() as u64).saturating_sub(counts.matched),
            mapped.len(),
            reference.name,
            input.display()
        );
    }
    ledger.record(&matching_key(&reference.name), counts.matched)?;

    log::info!("Written {} clean reads ({} matching {})", counts.kept, counts.matched, reference.name);

    Ok(DecontaminationRound {
        reference: reference.clone(),
        residual,
        alignment,
        input_reads: counts.total(),
        matched_reads: counts.matched,
        residual_reads: counts.kept,
    })
}

/// Runs every reference against every sample, reference-major. Each round
/// of a sample consumes that sample's residual from the previous round.
pub fn decontaminate_samples(
    aligner: &dyn Aligner,
    references: &[ContaminantReference],
    samples: &mut [SampleRun],
) -> Result<(), VirmetError> {
    for reference in references {
        log::info!("Decontamination against {}", reference.name);
        for sample in samples.iter_mut() {
            log::info!("--- now for sample {}", sample.name);
            let round = decontaminate(aligner, &sample.residual, reference, &mut sample.ledger)?;
            sample.residual = round.residual.clone();
            sample.rounds.push(round);
        }
    }
    Ok(())
}

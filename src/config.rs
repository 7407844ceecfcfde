//! Pipeline configuration: contaminant references, viral database and the
//! thresholds applied by each stage. Serialisable to and from JSON.

use std::collections::HashSet;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::VirmetError;
use crate::search::HitRecord;

const DB_DIR: &str = "/data/virmet_databases";

/// One contaminant database: the alignment index used for decontamination
/// and the full sequence file used to archive its alignments.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ContaminantReference {
    pub name: String,
    pub index: PathBuf,
    pub fasta: PathBuf,
}

impl ContaminantReference {
    pub fn new(name: &str, index: PathBuf, fasta: PathBuf) -> Self {
        Self { name: name.to_string(), index, fasta }
    }
}

/// Identity and coverage cutoffs (percent, exclusive) for calling a read viral.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq)]
pub struct Thresholds {
    pub identity: f64,
    pub coverage: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self { identity: 75.0, coverage: 75.0 }
    }
}

impl Thresholds {
    pub fn is_viral(&self, hit: &HitRecord) -> bool {
        hit.pident > self.identity && hit.qcovs > self.coverage
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct QualityConfig {
    /// Reads shorter than this after trimming are discarded.
    pub min_length: usize,
    /// Entropy threshold for low-complexity filtering.
    pub entropy_threshold: u32,
    /// Minimum mean base quality.
    pub min_qual_mean: u32,
    /// Upper bound on quality-filter shards (and concurrent filter processes).
    pub max_shards: usize,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            min_length: 75,
            entropy_threshold: 70,
            min_qual_mean: 20,
            max_shards: 16,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct SearchConfig {
    /// BLAST database of viral sequences.
    pub viral_db: PathBuf,
    /// Directory exported as `BLASTDB` so taxonomy names resolve.
    pub blastdb: PathBuf,
    /// Upper bound on search shards (and concurrent search processes).
    pub max_shards: usize,
    pub thresholds: Thresholds,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            viral_db: PathBuf::from(DB_DIR).join("viral_nuccore/viral_db"),
            blastdb: PathBuf::from(DB_DIR),
            max_shards: 12,
            thresholds: Thresholds::default(),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct PipelineConfig {
    /// Contaminant references in the order they are applied.
    pub contaminants: Vec<ContaminantReference>,
    pub quality: QualityConfig,
    pub search: SearchConfig,
    /// Threads given to each alignment process.
    pub align_threads: usize,
    /// Threads given to each archive conversion process.
    pub archive_threads: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let db = PathBuf::from(DB_DIR);
        let reference = |name: &str, index: &str, fasta: &str| {
            ContaminantReference::new(name, db.join(index), db.join(fasta))
        };
        Self {
            contaminants: vec![
                reference("humanGRCh38", "human/bwa/humanGRCh38", "human/fasta/GRCh38.fasta.gz"),
                reference("bact1", "bacteria/bwa/bact1", "bacteria/fasta/bact1.fasta.gz"),
                reference("bact2", "bacteria/bwa/bact2", "bacteria/fasta/bact2.fasta.gz"),
                reference("bact3", "bacteria/bwa/bact3", "bacteria/fasta/bact3.fasta.gz"),
                reference("fungi1", "fungi/bwa/fungi1", "fungi/fasta/fungi1.fasta.gz"),
                reference("bt_ref", "bovine/bwa/bt_ref", "bovine/fasta/bt_ref_Bos_taurus_UMD_3.1.1.fasta.gz"),
            ],
            quality: QualityConfig::default(),
            search: SearchConfig::default(),
            align_threads: crate::pool::available_parallelism().min(16),
            archive_threads: 4,
        }
    }
}

impl PipelineConfig {
    pub fn from_json(path: &Path) -> Result<Self, VirmetError> {
        if !path.exists() {
            return Err(VirmetError::MissingInputFile(path.to_path_buf()));
        }
        let config: Self = serde_json::from_reader(BufReader::new(File::open(path)?))?;
        config.validate()?;
        Ok(config)
    }
    pub fn to_json(&self, path: &Path) -> Result<(), VirmetError> {
        let mut writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(&mut writer, self)?;
        writer.write_all(b"\n")?;
        Ok(())
    }
    /// Checks that references are present and uniquely named, since the
    /// reference name keys both the ledger entry and the artifact files.
    pub fn validate(&self) -> Result<(), VirmetError> {
        if self.contaminants.is_empty() {
            return Err(VirmetError::MissingContaminantReferences);
        }
        let mut names = HashSet::new();
        for reference in &self.contaminants {
            if !names.insert(reference.name.as_str()) {
                return Err(VirmetError::DuplicateContaminantReference(reference.name.clone()));
            }
        }
        Ok(())
    }
}

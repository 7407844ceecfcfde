//! External collaborators of the pipeline.
//!
//! Each collaborator is a trait so that the stages only depend on the
//! input/output contract of the tool; the default implementations drive
//! seqtk, prinseq, bwa/samtools and blastn through [`ToolCommand`].

use std::path::{Path, PathBuf};

use tempfile::Builder;

use crate::command::ToolCommand;
use crate::config::{ContaminantReference, PipelineConfig};
use crate::error::VirmetError;

/// Output columns requested from the homology search, in order.
pub const HIT_COLUMNS: [&str; 15] = [
    "qseqid", "sseqid", "sscinames", "stitle", "pident", "qcovs", "score", "length",
    "mismatch", "gapopen", "qstart", "qend", "sstart", "send", "staxids",
];

/// Trims read ends and discards reads shorter than `min_length`.
pub trait ReadTrimmer: Send + Sync {
    fn trim(&self, input: &Path, output: &Path, min_length: usize) -> Result<(), VirmetError>;
    fn check(&self) -> Result<(), VirmetError> { Ok(()) }
}

/// Files belonging to one quality-filter shard.
#[derive(Debug, Clone)]
pub struct QualityShard {
    pub input: PathBuf,
    pub good: PathBuf,
    pub bad: PathBuf,
    pub log: PathBuf,
}

/// Splits a shard into passing (`good`) and rejected (`bad`) reads and
/// writes a log stating how many reads each filter removed.
pub trait QualityFilter: Send + Sync {
    fn filter(&self, shard: &QualityShard) -> Result<(), VirmetError>;
    fn check(&self) -> Result<(), VirmetError> { Ok(()) }
}

/// Aligns reads against a contaminant reference, writing only records of
/// reads with at least one alignment (SAM text) to `alignment`.
pub trait Aligner: Send + Sync {
    fn align(
        &self,
        reference: &ContaminantReference,
        reads: &Path,
        alignment: &Path,
        log: &Path,
    ) -> Result<(), VirmetError>;
    fn check(&self) -> Result<(), VirmetError> { Ok(()) }
}

/// Searches query sequences against the viral database, writing a
/// tab-separated table with [`HIT_COLUMNS`], best hit first per query.
pub trait HomologySearch: Send + Sync {
    fn search(&self, query: &Path, hits: &Path) -> Result<(), VirmetError>;
    fn check(&self) -> Result<(), VirmetError> { Ok(()) }
}

/// Converts an alignment into a compact reference-based archive.
pub trait ArchiveConverter: Send + Sync {
    fn convert(&self, alignment: &Path, reference: &Path, archive: &Path) -> Result<String, VirmetError>;
    fn check(&self) -> Result<(), VirmetError> { Ok(()) }
}

/// The set of collaborators used by a pipeline run.
pub struct Toolkit {
    pub trimmer: Box<dyn ReadTrimmer>,
    pub quality: Box<dyn QualityFilter>,
    pub aligner: Box<dyn Aligner>,
    pub search: Box<dyn HomologySearch>,
    pub archiver: Box<dyn ArchiveConverter>,
}

impl Toolkit {
    /// Collaborators backed by the external command line tools.
    pub fn external(config: &PipelineConfig) -> Self {
        Self {
            trimmer: Box::new(Seqtk),
            quality: Box::new(Prinseq {
                executable: "prinseq-lite.pl".to_string(),
                entropy_threshold: config.quality.entropy_threshold,
                min_qual_mean: config.quality.min_qual_mean,
            }),
            aligner: Box::new(Bwa { threads: config.align_threads }),
            search: Box::new(Blastn {
                db: config.search.viral_db.clone(),
                blastdb: config.search.blastdb.clone(),
            }),
            archiver: Box::new(SamtoolsCram { threads: config.archive_threads }),
        }
    }
    /// Verifies every collaborator can be executed before any work starts.
    pub fn check(&self) -> Result<(), VirmetError> {
        self.trimmer.check()?;
        self.quality.check()?;
        self.aligner.check()?;
        self.search.check()?;
        self.archiver.check()?;
        Ok(())
    }
}

/// A program counts as installed if it can be spawned at all; several of
/// these tools print usage and exit nonzero when run without input.
fn check_installed(program: &str, args: &[&str]) -> Result<(), VirmetError> {
    match ToolCommand::new(program).args(args.iter().copied()).run() {
        Ok(_) | Err(VirmetError::ExternalToolFailed { .. }) => Ok(()),
        Err(err) => Err(err),
    }
}

pub struct Seqtk;

impl ReadTrimmer for Seqtk {
    fn trim(&self, input: &Path, output: &Path, min_length: usize) -> Result<(), VirmetError> {
        ToolCommand::new("seqtk")
            .arg("trimfq")
            .path_arg(input)
            .pipe(
                &ToolCommand::new("seqtk")
                    .args(["seq", "-L", min_length.to_string().as_str(), "-"])
                    .stdout_to(output),
            )?;
        Ok(())
    }
    fn check(&self) -> Result<(), VirmetError> {
        check_installed("seqtk", &[])
    }
}

pub struct Prinseq {
    pub executable: String,
    pub entropy_threshold: u32,
    pub min_qual_mean: u32,
}

impl QualityFilter for Prinseq {
    fn filter(&self, shard: &QualityShard) -> Result<(), VirmetError> {
        // prinseq appends the format extension to the output prefixes
        let output = ToolCommand::new(&self.executable)
            .arg("-fastq").path_arg(&shard.input)
            .args(["-lc_method", "entropy", "-lc_threshold", self.entropy_threshold.to_string().as_str()])
            .arg("-log").path_arg(&shard.log)
            .args(["-min_qual_mean", self.min_qual_mean.to_string().as_str()])
            .arg("-out_good").path_arg(&shard.good.with_extension(""))
            .arg("-out_bad").path_arg(&shard.bad.with_extension(""))
            .run()?;
        log::debug!("{}", output.trim());
        Ok(())
    }
    fn check(&self) -> Result<(), VirmetError> {
        check_installed(&self.executable, &["-version"])
    }
}

pub struct Bwa {
    pub threads: usize,
}

impl Aligner for Bwa {
    fn align(
        &self,
        reference: &ContaminantReference,
        reads: &Path,
        alignment: &Path,
        log: &Path,
    ) -> Result<(), VirmetError> {
        let bwa = ToolCommand::new("bwa")
            .args(["mem", "-t", self.threads.to_string().as_str()])
            .args(["-R", "@RG\\tID:foo\\tSM:bar\\tLB:library1"])
            .args(["-T", "75", "-M"])
            .path_arg(&reference.index)
            .path_arg(reads)
            .stderr_to(log);
        // -F 4 drops unmapped records
        let samtools = ToolCommand::new("samtools")
            .args(["view", "-h", "-F", "4", "-"])
            .stdout_to(alignment);
        bwa.pipe(&samtools)?;
        Ok(())
    }
    fn check(&self) -> Result<(), VirmetError> {
        check_installed("bwa", &[])?;
        check_installed("samtools", &["--version"])
    }
}

pub struct Blastn {
    pub db: PathBuf,
    pub blastdb: PathBuf,
}

impl HomologySearch for Blastn {
    fn search(&self, query: &Path, hits: &Path) -> Result<(), VirmetError> {
        ToolCommand::new("blastn")
            .env("BLASTDB", &self.blastdb.to_string_lossy())
            .args(["-task", "megablast"])
            .arg("-query").path_arg(query)
            .arg("-db").path_arg(&self.db)
            .arg("-out").path_arg(hits)
            .arg("-outfmt").arg(format!("6 {}", HIT_COLUMNS.join(" ")))
            .run()?;
        Ok(())
    }
    fn check(&self) -> Result<(), VirmetError> {
        check_installed("blastn", &["-version"])
    }
}

pub struct SamtoolsCram {
    pub threads: usize,
}

impl ArchiveConverter for SamtoolsCram {
    fn convert(&self, alignment: &Path, reference: &Path, archive: &Path) -> Result<String, VirmetError> {
        let parent = alignment.parent().unwrap_or(Path::new("."));
        let sort_dir = Builder::new().prefix("sort").tempdir_in(parent)?;
        let threads = self.threads.to_string();

        let sort = ToolCommand::new("samtools")
            .args(["sort", "-O", "bam", "-l", "0", "-T"])
            .path_arg(&sort_dir.path().join("tmp"))
            .args(["-@", threads.as_str()])
            .path_arg(alignment);
        let view = ToolCommand::new("samtools")
            .arg("view")
            .arg("-T").path_arg(reference)
            .arg("-C")
            .arg("-o").path_arg(archive)
            .args(["-@", threads.as_str(), "-"]);
        let output = sort.pipe(&view)?;

        sort_dir.close()?;
        Ok(format!("{} -> {} {}", alignment.display(), archive.display(), output.trim()))
    }
    fn check(&self) -> Result<(), VirmetError> {
        check_installed("samtools", &["--version"])
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hit_columns_cover_fifteen_fields() {
        assert_eq!(HIT_COLUMNS.len(), 15);
        assert_eq!(HIT_COLUMNS[0], "qseqid");
        assert_eq!(HIT_COLUMNS[4], "pident");
        assert_eq!(HIT_COLUMNS[5], "qcovs");
    }

    #[test]
    fn spawnable_program_counts_as_installed() {
        // `false` exits nonzero but exists
        assert!(check_installed("false", &[]).is_ok());
        assert!(check_installed("virmet-no-such-tool", &[]).is_err());
    }
}

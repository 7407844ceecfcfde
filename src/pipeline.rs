//! Pipeline driver: input discovery, per-sample working directories and
//! the stage sequence quality filter, decontamination, viral search and
//! archive.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs::create_dir_all;
use std::path::{Path, PathBuf};

use crate::archive::ArchiveStage;
use crate::config::PipelineConfig;
use crate::decontam::{decontaminate_samples, DecontaminationRound};
use crate::error::VirmetError;
use crate::ledger::StatsLedger;
use crate::pool::WorkerPool;
use crate::quality::{QualityStage, FILTERED_READS};
use crate::report::{RunReport, SampleReport};
use crate::search::ViralSearchStage;
use crate::tools::Toolkit;
use crate::utils::file_name_string;

const BASECALLS_DIR: &str = "Data/Intensities/BaseCalls";
const OUTPUT_PREFIX: &str = "virmet_output_";

/// Read files of a sequencing run: files in the basecalls directory (or the
/// run directory itself) whose name contains `_S` and `.fastq`, sorted.
pub fn discover_run_files(run_dir: &Path) -> Result<Vec<PathBuf>, VirmetError> {
    if !run_dir.is_dir() {
        return Err(VirmetError::MissingInputFile(run_dir.to_path_buf()));
    }
    let basecalls = run_dir.join(BASECALLS_DIR);
    let search_dir = if basecalls.is_dir() { basecalls } else { run_dir.to_path_buf() };

    let mut files = Vec::new();
    for entry in std::fs::read_dir(&search_dir)? {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        if let Some(name) = file_name_string(&path) {
            if name.contains("_S") && name.contains(".fastq") {
                files.push(path);
            }
        }
    }
    if files.is_empty() {
        return Err(VirmetError::EmptyRunDirectory(search_dir));
    }
    files.sort();
    Ok(files)
}

/// Sample directory name for a read file: the first two `_`-separated
/// tokens of the file name (`17-1234_S1_L001_R1_001.fastq.gz` gives
/// `17-1234_S1`), or the name up to its first `.` otherwise.
pub fn sample_name(path: &Path) -> Result<String, VirmetError> {
    let name = file_name_string(path).ok_or_else(|| VirmetError::SampleName(path.to_path_buf()))?;
    let tokens: Vec<&str> = name.split('_').collect();
    let sample = if tokens.len() >= 2 {
        tokens[..2].join("_")
    } else {
        name.split('.').next().unwrap_or_default().to_string()
    };
    if sample.is_empty() {
        return Err(VirmetError::SampleName(path.to_path_buf()));
    }
    Ok(sample)
}

/// Run name from the run directory basename or the read file name up to
/// its first `.`.
pub fn run_name(run_dir: Option<&Path>, file: Option<&Path>) -> Result<String, VirmetError> {
    match (run_dir, file) {
        (Some(dir), _) => file_name_string(dir).ok_or_else(|| VirmetError::SampleName(dir.to_path_buf())),
        (None, Some(file)) => {
            let name = file_name_string(file).ok_or_else(|| VirmetError::SampleName(file.to_path_buf()))?;
            Ok(name.split('.').next().unwrap_or_default().to_string())
        }
        (None, None) => Err(VirmetError::MissingRunOrFile),
    }
}

/// State of one sample while it moves through the stages.
#[derive(Debug)]
pub struct SampleRun {
    pub name: String,
    pub input: PathBuf,
    /// Working directory holding every artifact of the sample.
    pub dir: PathBuf,
    pub ledger: StatsLedger,
    /// Reads entering the next stage.
    pub residual: PathBuf,
    pub rounds: Vec<DecontaminationRound>,
}

impl SampleRun {
    /// Creates the sample directory under `outdir` and starts its ledger.
    pub fn new(input: &Path, outdir: &Path) -> Result<Self, VirmetError> {
        let name = sample_name(input)?;
        let dir = outdir.join(&name);
        create_dir_all(&dir)?;
        let ledger = StatsLedger::create(&dir)?;
        Ok(Self {
            residual: dir.join(FILTERED_READS),
            name,
            input: input.to_path_buf(),
            dir,
            ledger,
            rounds: Vec::new(),
        })
    }
}

/// A configured pipeline run over one or more read files.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Virmet {
    pub inputs: Vec<PathBuf>,
    pub run_name: String,
    /// Output directory of the run, `virmet_output_<run>`.
    pub outdir: PathBuf,
    pub json: Option<PathBuf>,
    pub command: Option<String>,
    pub config: PipelineConfig,
}

impl Virmet {
    pub fn builder() -> VirmetBuilder {
        VirmetBuilder::new()
    }

    /// Runs all stages on all samples. Stages run one after the other over
    /// every sample; any error aborts the run.
    pub fn run(&self, toolkit: &Toolkit) -> Result<RunReport, VirmetError> {
        toolkit.check()?;

        let mut samples = Vec::with_capacity(self.inputs.len());
        for input in &self.inputs {
            log::info!("Running quality filter on {}", input.display());
            let mut sample = SampleRun::new(input, &self.outdir)?;
            QualityStage {
                trimmer: toolkit.trimmer.as_ref(),
                filter: toolkit.quality.as_ref(),
                config: &self.config.quality,
            }.run(input, &sample.dir, &mut sample.ledger)?;
            samples.push(sample);
        }

        decontaminate_samples(toolkit.aligner.as_ref(), &self.config.contaminants, &mut samples)?;

        log::info!("Searching against viral database");
        let search = ViralSearchStage {
            search: toolkit.search.as_ref(),
            config: &self.config.search,
        };
        let mut organisms = Vec::with_capacity(samples.len());
        for sample in samples.iter_mut() {
            log::info!("Now sample {}", sample.name);
            let summary = search.run(&sample.residual, &sample.dir, &mut sample.ledger)?;
            sample.residual = sample.dir.join(crate::search::SEARCH_READS);
            organisms.push(summary.organisms);
        }

        log::info!("Summarising and cleaning up");
        let archive = ArchiveStage {
            converter: toolkit.archiver.as_ref(),
            thresholds: &self.config.search.thresholds,
            pool: self.archive_pool(),
        };
        for sample in &samples {
            log::info!("Now in {}", sample.dir.display());
            archive.run(&sample.dir, &sample.rounds, &sample.ledger)?;
        }

        let sample_reports = samples
            .iter()
            .zip(organisms)
            .map(|(sample, organisms)| SampleReport::from_sample(sample, organisms))
            .collect();

        let report = RunReport::create(self, sample_reports);
        if let Some(json) = &self.json {
            report.to_json(json)?;
        }
        log::info!("Results written to {}", self.outdir.display());
        Ok(report)
    }

    /// Conversions run concurrently up to the available parallelism; each
    /// conversion process uses `archive_threads` threads of its own.
    pub fn archive_pool(&self) -> WorkerPool {
        WorkerPool::bounded(self.config.contaminants.len())
    }
}

/// Builder for constructing a `Virmet` run.
pub struct VirmetBuilder {
    pub run_dir: Option<PathBuf>,
    pub file: Option<PathBuf>,
    pub outdir: PathBuf,
    pub json: Option<PathBuf>,
    pub command: Option<String>,
    pub threads: Option<usize>,
    pub config: PipelineConfig,
}

impl VirmetBuilder {
    pub fn new() -> Self {
        Self {
            run_dir: None,
            file: None,
            outdir: PathBuf::from("."),
            json: None,
            command: None,
            threads: None,
            config: PipelineConfig::default(),
        }
    }
    /// Sets the sequencing run directory.
    pub fn run_dir<T: Into<Option<PathBuf>>>(mut self, run_dir: T) -> Self {
        self.run_dir = run_dir.into();
        self
    }
    /// Sets a single read file instead of a run directory.
    pub fn file<T: Into<Option<PathBuf>>>(mut self, file: T) -> Self {
        self.file = file.into();
        self
    }
    /// Sets the directory in which `virmet_output_<run>` is created.
    pub fn outdir(mut self, outdir: PathBuf) -> Self {
        self.outdir = outdir;
        self
    }
    pub fn json<T: Into<Option<PathBuf>>>(mut self, json: T) -> Self {
        self.json = json.into();
        self
    }
    pub fn command<T: Into<Option<String>>>(mut self, command: T) -> Self {
        self.command = command.into();
        self
    }
    /// Sets the number of alignment threads.
    pub fn threads(mut self, threads: Option<usize>) -> Self {
        self.threads = threads;
        self
    }
    pub fn config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }
    /// Validates inputs and configuration, then creates the output
    /// directory.
    pub fn build(self) -> Result<Virmet, VirmetError> {

        let inputs = match (&self.run_dir, &self.file) {
            (Some(run_dir), None) => discover_run_files(run_dir)?,
            (None, Some(file)) => {
                if !file.is_file() {
                    return Err(VirmetError::MissingInputFile(file.clone()));
                }
                vec![file.clone()]
            }
            _ => return Err(VirmetError::MissingRunOrFile),
        };

        let mut names = Vec::with_capacity(inputs.len());
        let mut seen = HashSet::new();
        for input in &inputs {
            let name = sample_name(input)?;
            if !seen.insert(name.clone()) {
                return Err(VirmetError::DuplicateSampleName(name));
            }
            names.push(name);
        }
        log::info!("Samples to run: {}", names.join(" "));

        let mut config = self.config;
        if let Some(threads) = self.threads {
            config.align_threads = threads.max(1);
        }
        config.validate()?;

        let run_name = run_name(self.run_dir.as_deref(), self.file.as_deref())?;
        let outdir = self.outdir.join(format!("{OUTPUT_PREFIX}{run_name}"));
        if outdir.exists() {
            log::warn!("Output directory exists: {}", outdir.display());
        }
        create_dir_all(&outdir)?;

        Ok(Virmet {
            inputs,
            run_name,
            outdir,
            json: self.json,
            command: self.command,
            config,
        })
    }
}

impl Default for VirmetBuilder {
    fn default() -> Self {
        Self::new()
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::available_parallelism;
    use std::fs::File;

    #[test]
    fn sample_name_uses_first_two_tokens() {
        assert_eq!(sample_name(Path::new("/runs/x/17-1234_S1_L001_R1_001.fastq.gz")).unwrap(), "17-1234_S1");
        assert_eq!(sample_name(Path::new("sample.fastq.gz")).unwrap(), "sample");
        assert!(sample_name(Path::new(".fastq")).is_err());
    }

    #[test]
    fn run_name_from_directory_or_file() {
        assert_eq!(run_name(Some(Path::new("/runs/170101_M01234_0001-ABCDE/")), None).unwrap(), "170101_M01234_0001-ABCDE");
        assert_eq!(run_name(None, Some(Path::new("/data/sample.fastq.gz"))).unwrap(), "sample");
        assert!(matches!(run_name(None, None), Err(VirmetError::MissingRunOrFile)));
    }

    #[test]
    fn run_files_found_in_basecalls_directory() {
        let dir = tempfile::tempdir().unwrap();
        let basecalls = dir.path().join(BASECALLS_DIR);
        create_dir_all(&basecalls).unwrap();
        for name in ["B_S2_L001_R1_001.fastq.gz", "A_S1_L001_R1_001.fastq.gz", "Undetermined.txt", "notes.fastq"] {
            File::create(basecalls.join(name)).unwrap();
        }
        let files = discover_run_files(dir.path()).unwrap();
        assert_eq!(files, vec![basecalls.join("A_S1_L001_R1_001.fastq.gz"), basecalls.join("B_S2_L001_R1_001.fastq.gz")]);
    }

    #[test]
    fn run_without_read_files_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        File::create(dir.path().join("readme.txt")).unwrap();
        assert!(matches!(discover_run_files(dir.path()), Err(VirmetError::EmptyRunDirectory(_))));
    }

    #[test]
    fn builder_creates_output_directory() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("sample.fastq");
        File::create(&file).unwrap();

        let virmet = Virmet::builder()
            .file(file.clone())
            .outdir(dir.path().to_path_buf())
            .threads(Some(3))
            .build()
            .unwrap();
        assert_eq!(virmet.outdir, dir.path().join("virmet_output_sample"));
        assert!(virmet.outdir.is_dir());
        assert_eq!(virmet.inputs, vec![file]);
        assert_eq!(virmet.config.align_threads, 3);
    }

    #[test]
    fn builder_requires_exactly_one_input_source() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(Virmet::builder().build(), Err(VirmetError::MissingRunOrFile)));
        let missing = Virmet::builder().file(dir.path().join("absent.fastq")).build();
        assert!(matches!(missing, Err(VirmetError::MissingInputFile(_))));
    }

    #[test]
    fn colliding_sample_names_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["A_S1_L001_R1_001.fastq", "A_S1_L001_R2_001.fastq"] {
            File::create(dir.path().join(name)).unwrap();
        }
        let result = Virmet::builder()
            .run_dir(dir.path().to_path_buf())
            .outdir(dir.path().join("out"))
            .build();
        assert!(matches!(result, Err(VirmetError::DuplicateSampleName(name)) if name == "A_S1"));
    }

    #[test]
    fn archive_pool_follows_parallelism_not_process_threads() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("sample.fastq");
        File::create(&file).unwrap();

        let config = PipelineConfig { archive_threads: 64, ..PipelineConfig::default() };
        let virmet = Virmet::builder()
            .file(file)
            .outdir(dir.path().to_path_buf())
            .config(config)
            .build()
            .unwrap();

        let workers = virmet.archive_pool().workers();
        let expected = available_parallelism().min(virmet.config.contaminants.len()).max(1);
        assert_eq!(workers, expected);
        assert!(workers <= available_parallelism());
    }
}

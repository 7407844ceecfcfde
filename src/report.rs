use std::path::{Path, PathBuf};
use std::io::Write;
use chrono::{SecondsFormat, Local};
use clap::crate_version;
use serde::{Deserialize, Serialize};
use crate::{error::VirmetError, ledger::LedgerEntry, pipeline::{SampleRun, Virmet}};


/// Summary of a completed run, written as JSON on request.
#[derive(Serialize, Deserialize, Debug)]
pub struct RunReport {
    pub version: String,
    pub date: String,
    pub command: String,
    pub run: String,
    pub output: PathBuf,
    pub samples: Vec<SampleReport>,
}
impl RunReport {
    pub fn create(virmet: &Virmet, samples: Vec<SampleReport>) -> Self {
        Self {
            version: crate_version!().to_string(),
            date: Local::now().to_rfc3339_opts(SecondsFormat::Millis, false),
            command: match virmet.command {
                Some(ref cmd) => cmd.to_string(),
                None => String::new()
            },
            run: virmet.run_name.clone(),
            output: virmet.outdir.clone(),
            samples,
        }
    }
    pub fn to_json(&self, output: &Path) -> Result<(), VirmetError> {
        let mut file = std::fs::File::create(output)?;
        let json_string = serde_json::to_string_pretty(self)?;
        file.write_all(json_string.as_bytes())?;
        Ok(())
    }
    pub fn from_json(path: &Path) -> Result<Self, VirmetError> {
        let file = std::fs::File::open(path)?;
        Ok(serde_json::from_reader(std::io::BufReader::new(file))?)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct OrganismCount {
    pub organism: String,
    pub reads: u64,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SampleReport {
    pub name: String,
    pub input: PathBuf,
    pub directory: PathBuf,
    /// Ledger entries in the order they were recorded.
    pub stats: Vec<LedgerEntry>,
    pub organisms: Vec<OrganismCount>,
}
impl SampleReport {
    pub fn from_sample(sample: &SampleRun, organisms: Vec<(String, u64)>) -> Self {
        Self {
            name: sample.name.clone(),
            input: sample.input.clone(),
            directory: sample.dir.clone(),
            stats: sample.ledger.entries().to_vec(),
            organisms: organisms
                .into_iter()
                .map(|(organism, reads)| OrganismCount { organism, reads })
                .collect(),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;

    #[test]
    fn report_round_trips_through_json() {
        let dir = tempfile::tempdir().unwrap();
        let virmet = Virmet {
            inputs: vec![PathBuf::from("A_S1.fastq")],
            run_name: "run1".to_string(),
            outdir: dir.path().join("virmet_output_run1"),
            json: None,
            command: Some("virmet run --file A_S1.fastq".to_string()),
            config: PipelineConfig::default(),
        };
        let sample = SampleReport {
            name: "A_S1".to_string(),
            input: PathBuf::from("A_S1.fastq"),
            directory: dir.path().join("virmet_output_run1/A_S1"),
            stats: vec![LedgerEntry { key: "raw_reads".to_string(), count: 10 }],
            organisms: vec![OrganismCount { organism: "Rhinovirus A".to_string(), reads: 2 }],
        };
        let report = RunReport::create(&virmet, vec![sample]);
        assert_eq!(report.version, crate_version!());

        let path = dir.path().join("report.json");
        report.to_json(&path).unwrap();
        let loaded = RunReport::from_json(&path).unwrap();
        assert_eq!(loaded.run, "run1");
        assert_eq!(loaded.command, "virmet run --file A_S1.fastq");
        assert_eq!(loaded.samples[0].stats, report.samples[0].stats);
        assert_eq!(loaded.samples[0].organisms[0].reads, 2);
    }
}

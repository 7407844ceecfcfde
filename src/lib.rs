pub mod archive;
pub mod command;
pub mod config;
pub mod decontam;
pub mod error;
pub mod ledger;
pub mod pipeline;
pub mod pool;
pub mod quality;
pub mod reads;
pub mod report;
pub mod search;
pub mod terminal;
pub mod tools;
pub mod utils;

pub mod prelude {
    pub use crate::config::{ContaminantReference, PipelineConfig, Thresholds};
    pub use crate::error::VirmetError;
    pub use crate::ledger::StatsLedger;
    pub use crate::pipeline::{Virmet, VirmetBuilder};
    pub use crate::report::RunReport;
    pub use crate::tools::Toolkit;
    pub use crate::utils::init_logger;
}

pub mod adc;
pub mod catalog;
pub mod cli;
pub mod config;
pub mod error;
pub mod extraction;
pub mod pipeline;
pub mod record;
pub mod selection;
pub mod stages;
pub mod tools;
pub mod types;
pub mod volume;

#[cfg(test)]
mod testing;

pub use cli::report::CaseReport;
pub use config::{PipelineOptions, ToolPaths};
pub use error::{PrepError, Result};
pub use pipeline::{process_case, CaseSummary};
pub use record::CaseRecord;
pub use types::*;

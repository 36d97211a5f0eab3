use std::path::PathBuf;

use thiserror::Error;
use ufdur_pivot::PivotCacheError;

use crate::extract::ExtractionDiagnostic;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("cannot open {path} as a spreadsheet package: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: PivotCacheError,
    },
    #[error("no pivot cache could be extracted: {}", format_diagnostics(.diagnostics))]
    NoCacheExtracted {
        diagnostics: Vec<ExtractionDiagnostic>,
    },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
}

#[derive(Debug, Error)]
pub enum MergeError {
    #[error("period table directory not found: {0}")]
    MissingDirectory(PathBuf),
    #[error("no period tables to merge in {dir}")]
    NoInputToMerge { dir: PathBuf },
    #[error("invalid period table {path}: {reason}")]
    InvalidPeriodTable { path: PathBuf, reason: String },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
}

fn format_diagnostics(diagnostics: &[ExtractionDiagnostic]) -> String {
    diagnostics
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

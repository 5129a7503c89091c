use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum HarvestError {
    #[error("invalid SRA experiment accession: {0}")]
    InvalidExperimentId(String),

    #[error("invalid GEO series accession: {0}")]
    InvalidSeriesAccession(String),

    #[error("invalid GEO sample accession: {0}")]
    InvalidSampleAccession(String),

    #[error("invalid run configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to read keyword input: {0}")]
    KeywordInput(String),

    #[error("keyword column not found in input: {0}")]
    MissingKeywordColumn(String),

    #[error("Entrez request failed: {0}")]
    EntrezHttp(String),

    #[error("Entrez returned status {status}: {message}")]
    EntrezStatus { status: u16, message: String },

    #[error("GEO request failed: {0}")]
    GeoHttp(String),

    #[error("GEO returned status {status}: {message}")]
    GeoStatus { status: u16, message: String },

    #[error("inference request failed: {0}")]
    LlmHttp(String),

    #[error("inference endpoint returned status {status}: {message}")]
    LlmStatus { status: u16, message: String },

    #[error("inference endpoint unavailable: {0}")]
    LlmUnavailable(String),

    #[error("output target is not writable: {0}")]
    OutputUnwritable(PathBuf),

    #[error("csv error: {0}")]
    Csv(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),
}

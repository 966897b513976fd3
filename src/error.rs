use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum GctsError {
    #[error("invalid region of interest: {0}")]
    #[diagnostic(help("bounds are west,south,east,north with west < east and south < north"))]
    InvalidRegion(String),

    #[error("unsupported coordinate reference system: {0}")]
    UnsupportedCrs(String),

    #[error("reprojection from {from} to {to} failed: {message}")]
    Reprojection {
        from: String,
        to: String,
        message: String,
    },

    #[error("catalog resolution failed: {0}")]
    CatalogResolution(String),

    #[error("partition fetch failed for {location}: {reason}")]
    PartitionFetch { location: String, reason: String },

    #[error("query cancelled")]
    Cancelled,

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("invalid failure policy: {0}")]
    InvalidPolicy(String),

    #[error("invalid boundary rule: {0}")]
    InvalidBoundary(String),

    #[error("export failed: {0}")]
    Export(String),

    #[error("worker pool error: {0}")]
    WorkerPool(String),
}

impl GctsError {
    pub fn fetch(location: impl Into<String>, reason: impl Into<String>) -> Self {
        GctsError::PartitionFetch {
            location: location.into(),
            reason: reason.into(),
        }
    }
}

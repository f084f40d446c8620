//! Job-level errors

use polystat_parallel::ParallelError;
use thiserror::Error;

/// Why a job could not start or finish.
///
/// Per-zone problems (degenerate geometry, failed formulas, unreadable
/// windows) are never errors; they become diagnostics.
#[derive(Error, Debug)]
pub enum ZonalError {
    #[error("invalid job configuration: {}", .0.join("; "))]
    Config(Vec<String>),

    #[error(transparent)]
    Raster(#[from] polystat_core::Error),

    #[error(
        "zone '{zone}' needs {requested} bytes of raster data but the memory ceiling is \
         {limit} bytes; lower the chunk size or raise the memory ceiling"
    )]
    ResourceExhausted {
        zone: String,
        requested: usize,
        limit: usize,
    },

    #[error(transparent)]
    Parallel(#[from] ParallelError),
}

impl ZonalError {
    pub(crate) fn config(problem: impl Into<String>) -> Self {
        ZonalError::Config(vec![problem.into()])
    }
}

pub type Result<T> = std::result::Result<T, ZonalError>;

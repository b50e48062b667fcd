//! Runtime errors

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use skyloop_core::{ArmError, FlightError, MissionError};

/// Errors raised outside the per-cycle path: loading, arming, thread management
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("malformed JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Flight(#[from] FlightError),

    #[error("arming refused: {0}")]
    Arm(#[from] ArmError),

    #[error(transparent)]
    Mission(#[from] MissionError),

    #[error("{0} thread panicked")]
    ThreadPanicked(&'static str),
}

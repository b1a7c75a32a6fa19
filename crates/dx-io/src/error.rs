//! Audio I/O error types

use dx_separate::SeparationError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AudioIoError {
    #[error("Input not found: {0}")]
    InputNotFound(String),

    #[error("Read error: {0}")]
    ReadError(String),

    #[error("Write error: {0}")]
    WriteError(String),

    #[error("Encoding error: {0}")]
    EncodingError(String),

    #[error("Sample rate conversion failed: {0}")]
    SampleRateConversion(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Separation(#[from] SeparationError),
}

pub type AudioIoResult<T> = Result<T, AudioIoError>;

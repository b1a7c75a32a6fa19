//! Error types for the separation pipeline

use dx_dsp::DspError;
use thiserror::Error;

/// Separation error types
#[derive(Error, Debug)]
pub enum SeparationError {
    /// Spectral transform contract violated
    #[error("Spectral contract violated: {0}")]
    Dsp(#[from] DspError),

    /// Model output disagrees with the expected tensor layout
    #[error("Invalid model output `{tensor}`: expected {expected}, got {got}")]
    OutputShape {
        tensor: &'static str,
        expected: String,
        got: String,
    },

    /// Internal shape or ordering contract broken
    #[error("Contract violation: {0}")]
    ContractViolation(String),

    /// A sample of the output received no segment weight
    #[error("Coverage gap at sample {index}: no segment contributed weight")]
    CoverageGap { index: usize },

    /// Buffer allocation refused
    #[error("Could not allocate {bytes} bytes for {what}")]
    ResourceExhaustion { what: &'static str, bytes: usize },

    /// Input audio rejected
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Configuration rejected by validation
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Backend failed to run
    #[error("Inference failed: {reason}")]
    InferenceFailed { reason: String },

    /// Model file not found
    #[error("Model not found: {path}")]
    ModelNotFound { path: String },

    /// Model loading failed
    #[error("Failed to load model: {reason}")]
    ModelLoadFailed { reason: String },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Config (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SeparationError {
    /// True for errors that indicate a bug or a model that does not honor the
    /// tensor contract, as opposed to bad input or environment problems.
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            Self::Dsp(_) | Self::OutputShape { .. } | Self::ContractViolation(_) | Self::CoverageGap { .. }
        )
    }

    /// Only allocation failures may succeed on retry (e.g. with a shorter
    /// segment or after other jobs finish).
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::ResourceExhaustion { .. })
    }
}

/// Result type for separation operations
pub type SeparationResult<T> = Result<T, SeparationError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        let shape = SeparationError::OutputShape {
            tensor: "x",
            expected: "[4, 4, 2048, 216]".into(),
            got: "[4, 4, 2048, 215]".into(),
        };
        assert!(shape.is_contract_violation());
        assert!(!shape.is_recoverable());

        let dsp: SeparationError = DspError::FrameCountMismatch { expected: 220, got: 219 }.into();
        assert!(dsp.is_contract_violation());

        let oom = SeparationError::ResourceExhaustion { what: "accumulator", bytes: 1 << 40 };
        assert!(oom.is_recoverable());
        assert!(!oom.is_contract_violation());

        assert!(!SeparationError::InvalidInput("empty".into()).is_contract_violation());
    }

    #[test]
    fn test_display() {
        let err = SeparationError::CoverageGap { index: 42 };
        assert!(err.to_string().contains("42"));
    }
}

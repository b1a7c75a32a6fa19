//! Error types for DSP primitives

use thiserror::Error;

/// DSP errors
///
/// Every variant describes a broken shape or parameter contract; none of them
/// depend on the audio content itself.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DspError {
    /// FFT size must be positive and divisible by 4 (hop = nfft / 4)
    #[error("Invalid FFT size {nfft}: must be a positive multiple of 4")]
    InvalidFftSize { nfft: usize },

    /// Cropped spectrogram frame count disagrees with the padding contract
    #[error("Spectrogram frame count mismatch: expected {expected}, got {got}")]
    FrameCountMismatch { expected: usize, got: usize },

    /// Tensor shape disagrees with what the operation requires
    #[error("Shape mismatch: expected {expected}, got {got}")]
    ShapeMismatch { expected: String, got: String },

    /// Signal has no samples
    #[error("Empty signal")]
    EmptySignal,

    /// FFT backend failure
    #[error("FFT failed: {0}")]
    Fft(String),
}

/// Result type for DSP operations
pub type DspResult<T> = Result<T, DspError>;
